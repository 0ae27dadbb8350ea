//! Tag writing
//!
//! The downloader hands every finished file to a [`Tagger`]. Failures are
//! downgraded to a warning by the pipeline: the file stays on disk untagged.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;
use crate::models::{Container, CreditsInfo, TrackInfo};

/// Everything needed to tag one file
#[derive(Debug, Clone, Copy)]
pub struct TagRequest<'a> {
    /// File to tag in place
    pub file: &'a Path,
    /// Container of the file
    pub container: Container,
    /// Track metadata
    pub track: &'a TrackInfo,
    /// Cover image to embed
    pub cover: Option<&'a Path>,
    /// Credits lines
    pub credits: &'a [CreditsInfo],
    /// Lyrics text to embed
    pub lyrics: Option<&'a str>,
}

/// Writes tags into an audio file
#[async_trait]
pub trait Tagger: Send + Sync {
    /// Write tags in place; an error is reported as [`Error::Tagging`](crate::Error::Tagging)
    async fn tag(&self, request: TagRequest<'_>) -> Result<()>;

    /// Name of the implementation
    fn name(&self) -> &'static str;
}

/// Tagger that leaves files untouched
///
/// Used when no tagger is configured.
///
/// # Examples
///
/// ```
/// use melodl::models::{Container, TrackInfo};
/// use melodl::tagging::{NoOpTagger, TagRequest, Tagger};
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let track = TrackInfo::default();
/// NoOpTagger
///     .tag(TagRequest {
///         file: Path::new("song.flac"),
///         container: Container::Flac,
///         track: &track,
///         cover: None,
///         credits: &[],
///         lyrics: None,
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct NoOpTagger;

#[async_trait]
impl Tagger for NoOpTagger {
    async fn tag(&self, request: TagRequest<'_>) -> Result<()> {
        tracing::debug!(file = %request.file.display(), "No tagger configured, leaving file untagged");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
