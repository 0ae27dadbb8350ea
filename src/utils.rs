//! Utility functions for file naming, file moves and temporary files

use crate::error::{DownloadError, Result};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Maximum length in bytes of a single path component written to disk
pub const NAME_BYTE_LIMIT: usize = 250;

/// Characters that are replaced by `_` in names used as path components
const FORBIDDEN_CHARS: &[char] = &['\\', '/', '*', '?', '"', ',', '<', '>', '|', '$', ':'];

/// Make a metadata string safe to use as a path component
///
/// Trailing whitespace is trimmed and every forbidden character is replaced by `_`.
///
/// # Examples
///
/// ```
/// use melodl::utils::sanitise_name;
///
/// assert_eq!(sanitise_name("AC/DC: Live?  "), "AC_DC_ Live_");
/// ```
pub fn sanitise_name(name: &str) -> String {
    name.trim_end()
        .chars()
        .map(|c| if FORBIDDEN_CHARS.contains(&c) { '_' } else { c })
        .collect()
}

/// Truncate the final component of `path` to `limit` bytes on a char boundary
pub fn fix_byte_limit(path: &Path, limit: usize) -> PathBuf {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return path.to_path_buf();
    };
    if name.len() <= limit {
        return path.to_path_buf();
    }

    let mut end = limit;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    path.with_file_name(&name[..end])
}

/// Append `.ext` to a path without treating dots in the name as an extension
pub fn with_extension(stem: &Path, ext: &str) -> PathBuf {
    let mut s = stem.as_os_str().to_owned();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

/// Move a file, creating the destination directory and falling back to
/// copy + delete when a rename crosses file systems
pub async fn move_file(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    if tokio::fs::rename(source, dest).await.is_ok() {
        return Ok(());
    }

    tokio::fs::copy(source, dest).await.map_err(|e| DownloadError::MoveFailed {
        source_path: source.to_path_buf(),
        dest_path: dest.to_path_buf(),
        reason: e.to_string(),
    })?;
    if let Err(e) = tokio::fs::remove_file(source).await {
        tracing::debug!(path = %source.display(), error = %e, "Failed to remove moved source file");
    }
    Ok(())
}

/// Hands out unique temporary paths and removes them when the run ends
pub struct TempFiles {
    base: PathBuf,
    issued: Mutex<Vec<PathBuf>>,
}

impl TempFiles {
    /// Temporary files live directly under `base`
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            issued: Mutex::new(Vec::new()),
        }
    }

    /// Reserve a fresh path with the given suffix (e.g. ".jpg"); the file is not created
    pub async fn path(&self, suffix: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.base).await?;
        let path = self
            .base
            .join(format!("melodl_{}{}", uuid::Uuid::new_v4().simple(), suffix));
        self.issued.lock().await.push(path.clone());
        Ok(path)
    }

    /// Delete every issued path that still exists
    pub async fn cleanup(&self) {
        let paths = std::mem::take(&mut *self.issued.lock().await);
        for path in paths {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Failed to remove temporary file");
                }
            }
        }
    }
}
