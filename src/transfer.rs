//! HTTP byte transfer for track streams and side assets

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::progress::{ProgressTracker, ProgressUpdate};
use crate::retry::download_with_retry;
use crate::types::TaskId;

/// Connect timeout for every request
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where byte progress of a transfer is reported
#[derive(Clone, Copy)]
pub struct TransferProgress<'a> {
    /// Tracker receiving byte counters
    pub tracker: &'a ProgressTracker,
    /// Task the counters belong to
    pub task_id: TaskId,
}

/// Streams remote files to disk with retry on transient failures
#[derive(Clone)]
pub struct Transfer {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl Transfer {
    /// Build a client with the default timeouts
    pub fn new(retry: RetryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("melodl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client, retry))
    }

    /// Use an existing client
    pub fn with_client(client: reqwest::Client, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    /// Download `url` to `dest` unless `dest` already exists
    pub async fn download_missing(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        dest: &Path,
    ) -> Result<()> {
        if tokio::fs::try_exists(dest).await.unwrap_or(false) {
            tracing::debug!(path = %dest.display(), "File exists, skipping transfer");
            return Ok(());
        }
        self.download(url, headers, dest, None).await
    }

    /// Download `url` to `dest`, replacing any existing file
    ///
    /// Bytes go to `<dest>.part` first and are renamed into place once
    /// complete; the partial file is removed when the transfer fails.
    pub async fn download(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        dest: &Path,
        progress: Option<TransferProgress<'_>>,
    ) -> Result<()> {
        let parsed = url::Url::parse(url)
            .map_err(|e| Error::Other(format!("invalid URL '{}': {}", url, e)))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(dest);

        let result = download_with_retry(&self.retry, || {
            self.attempt(parsed.clone(), headers, &partial, progress)
        })
        .await;

        match result {
            Ok(()) => {
                tokio::fs::rename(&partial, dest).await?;
                Ok(())
            }
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&partial).await
                    && remove_err.kind() != std::io::ErrorKind::NotFound
                {
                    tracing::warn!(path = %partial.display(), error = %remove_err, "Failed to remove partial download");
                }
                Err(e)
            }
        }
    }

    async fn attempt(
        &self,
        url: url::Url,
        headers: &HashMap<String, String>,
        partial: &Path,
        progress: Option<TransferProgress<'_>>,
    ) -> Result<()> {
        let mut request = self.client.get(url.clone());
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let mut response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let total = response.content_length().unwrap_or(0);
        if let Some(p) = progress {
            p.tracker.update(p.task_id, ProgressUpdate::bytes(0, total));
        }

        let mut file = tokio::fs::File::create(partial).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            if let Some(p) = progress {
                p.tracker.update(
                    p.task_id,
                    ProgressUpdate {
                        current: Some(written),
                        ..Default::default()
                    },
                );
            }
        }
        file.flush().await?;

        if total > 0 && written < total {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("received {} of {} bytes from {}", written, total, url),
            )));
        }
        Ok(())
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    crate::utils::with_extension(dest, "part")
}
