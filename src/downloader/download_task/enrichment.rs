//! Cover, lyrics and credits lookups
//!
//! A third-party backend configured for a capability is asked first: the
//! track is searched by name and artists and the first hit is used. Without
//! one, the track's own backend answers when it declares the capability.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::context::TrackContext;
use crate::backend::Backend;
use crate::config::LyricsConfig;
use crate::error::Result;
use crate::models::{CoverOptions, CreditsInfo, ImageFormat, LyricsInfo, SearchResult, TrackInfo};
use crate::types::{Capability, MediaKind};
use crate::utils::with_extension;

/// Cover image for embedding, fetched once per album and run
pub(super) async fn cover(ctx: &TrackContext, info: &TrackInfo) -> Result<Option<PathBuf>> {
    if info.album_id.is_empty() {
        return fetch_cover(ctx, info).await;
    }

    let cell = {
        let mut memo = ctx.downloader.run.covers.lock().await;
        Arc::clone(memo.entry(info.album_id.clone()).or_default())
    };
    let path = cell.get_or_try_init(|| fetch_cover(ctx, info)).await?;
    Ok(path.clone())
}

async fn fetch_cover(ctx: &TrackContext, info: &TrackInfo) -> Result<Option<PathBuf>> {
    let covers = &ctx.config().covers;
    let options = CoverOptions {
        file_type: ImageFormat::Jpg,
        resolution: covers.main_resolution,
        compression: covers.main_compression,
    };

    let mut located = None;
    if let Some(backend) = ctx.auxiliary(Capability::COVERS).await?
        && let Some(hit) = first_match(backend.as_ref(), info).await?
    {
        located = backend
            .track_cover(&hit.result_id, &options, hit.data.as_ref())
            .await?
            .map(|c| (c.url, c.file_type));
    }
    if located.is_none() {
        located = info.cover_url.clone().map(|url| (url, ImageFormat::Jpg));
    }
    if located.is_none() && ctx.supports(Capability::COVERS) {
        located = ctx
            .task
            .backend
            .track_cover(&ctx.task.track_id, &options, info.cover_data.as_ref())
            .await?
            .map(|c| (c.url, c.file_type));
    }

    let Some((url, file_type)) = located else {
        tracing::debug!(track_id = %ctx.task.track_id, "No cover available");
        return Ok(None);
    };
    let path = ctx
        .downloader
        .run
        .temp_files
        .path(&format!(".{}", file_type.extension()))
        .await?;
    ctx.downloader
        .collaborators
        .transfer
        .download(&url, &HashMap::new(), &path, None)
        .await?;
    Ok(Some(path))
}

/// Plain and synced lyrics
pub(super) async fn lyrics(ctx: &TrackContext, info: &TrackInfo) -> Result<LyricsInfo> {
    if let Some(backend) = ctx.auxiliary(Capability::LYRICS).await? {
        return match first_match(backend.as_ref(), info).await? {
            Some(hit) => backend.track_lyrics(&hit.result_id, hit.data.as_ref()).await,
            None => Ok(LyricsInfo::default()),
        };
    }
    if !ctx.supports(Capability::LYRICS) {
        return Ok(LyricsInfo::default());
    }
    ctx.task
        .backend
        .track_lyrics(&ctx.task.track_id, info.lyrics_data.as_ref())
        .await
}

/// Credit lines
pub(super) async fn credits(ctx: &TrackContext, info: &TrackInfo) -> Result<Vec<CreditsInfo>> {
    if let Some(backend) = ctx.auxiliary(Capability::CREDITS).await? {
        return match first_match(backend.as_ref(), info).await? {
            Some(hit) => backend.track_credits(&hit.result_id, hit.data.as_ref()).await,
            None => Ok(Vec::new()),
        };
    }
    if !ctx.supports(Capability::CREDITS) {
        return Ok(Vec::new());
    }
    ctx.task
        .backend
        .track_credits(&ctx.task.track_id, info.credits_data.as_ref())
        .await
}

/// Lyrics text to embed: synced when configured and available, plain otherwise
pub(super) fn embedded_lyrics<'a>(config: &LyricsConfig, lyrics: &'a LyricsInfo) -> Option<&'a str> {
    if !config.embed_lyrics {
        return None;
    }
    if config.embed_synced_lyrics
        && let Some(synced) = lyrics.synced.as_deref()
    {
        return Some(synced);
    }
    lyrics.embedded.as_deref()
}

/// Write `<stem>.lrc` unless it exists
pub(super) async fn save_synced_lyrics(stem: &Path, synced: &str) -> Result<()> {
    let path = with_extension(stem, "lrc");
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, synced).await?;
    Ok(())
}

async fn first_match(backend: &dyn Backend, info: &TrackInfo) -> Result<Option<SearchResult>> {
    let query = format!("{} {}", info.name, info.artists.join(" "));
    let hits = backend
        .search(MediaKind::Track, query.trim(), Some(info))
        .await?;
    Ok(hits.into_iter().next())
}
