//! Track pipeline orchestration: the lifecycle of a single track task.

use std::path::{Path, PathBuf};

use super::context::TrackContext;
use super::{conversion, enrichment};
use crate::backend::TrackQuery;
use crate::error::{DownloadError, Error, Result};
use crate::layout::TrackLayout;
use crate::models::{Codec, DownloadDescriptor, TrackInfo};
use crate::progress::ProgressUpdate;
use crate::retry::{IsRetryable, download_with_retry_until};
use crate::tagging::TagRequest;
use crate::transfer::TransferProgress;
use crate::types::{MediaKind, ProgressMode, TrackOutcome, TrackStatus};
use crate::utils::{move_file, with_extension};

/// How a spawned track task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TaskEnd {
    /// The pipeline ran and its outcome was recorded
    Finished(TrackOutcome),
    /// The run was stopped before the task acquired a slot
    NotStarted,
    /// The run was stopped while the pipeline was in flight
    Stopped,
}

/// Run one track task: waits for a slot, runs the pipeline and records the outcome.
///
/// Phases:
/// 1. Acquire the concurrency gate (or never start once the run is stopped)
/// 2. Run the pipeline, retrying transient failures
/// 3. Report the terminal status and mark the task complete
/// 4. Trigger abort on failure when configured, or the track extension hooks on success
pub(crate) async fn run_track_task(ctx: TrackContext) -> TaskEnd {
    let cancel = ctx.downloader.run.cancel.clone();
    let semaphore = ctx.downloader.queue.semaphore();

    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!(track_id = %ctx.task.track_id, "Run stopped before track started");
            return TaskEnd::NotStarted;
        }
        permit = semaphore.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return TaskEnd::NotStarted,
        },
    };
    if cancel.is_cancelled() {
        return TaskEnd::NotStarted;
    }

    ctx.message("Fetching track info").await;
    let retry = ctx.config().track_retry.clone();
    let outcome = match download_with_retry_until(&retry, &cancel, || download_track(&ctx)).await {
        Ok(outcome) => {
            let message = match outcome {
                TrackOutcome::Skipped => "Skipped",
                _ => "Download complete",
            };
            ctx.update(
                ProgressUpdate::status(outcome.status())
                    .with_counter(100, 100)
                    .with_mode(ProgressMode::Percent)
                    .with_message(message),
            )
            .await;
            outcome
        }
        Err(Error::Download(DownloadError::Cancelled)) => {
            tracing::debug!(track_id = %ctx.task.track_id, "Track stopped by cancellation");
            return TaskEnd::Stopped;
        }
        Err(e) if cancel.is_cancelled() && e.is_retryable() => {
            tracing::debug!(track_id = %ctx.task.track_id, error = %e, "Retry stopped by cancellation");
            return TaskEnd::Stopped;
        }
        Err(e) => {
            let reason = e.to_string();
            tracing::error!(
                job_id = %ctx.task.job_id,
                track_id = %ctx.task.track_id,
                error = %e,
                "Track download failed"
            );
            ctx.update(ProgressUpdate::status(TrackStatus::Failed).with_message(&reason))
                .await;
            TrackOutcome::Failed(reason)
        }
    };

    ctx.downloader
        .queue
        .mark_track_complete(ctx.task.id, &outcome)
        .await;

    match &outcome {
        TrackOutcome::Failed(reason) if ctx.config().download.abort_on_single_failure => {
            tracing::warn!(track_id = %ctx.task.track_id, "Aborting run after track failure");
            ctx.abort(reason);
        }
        TrackOutcome::Failed(_) => {}
        TrackOutcome::Completed | TrackOutcome::Skipped => spawn_track_hooks(&ctx).await,
    }

    TaskEnd::Finished(outcome)
}

async fn spawn_track_hooks(ctx: &TrackContext) {
    let downloader = &ctx.downloader;
    if downloader.extensions.is_empty() {
        return;
    }
    let Some(job) = downloader.queue.job(ctx.task.job_id).await else {
        return;
    };
    let Some(track) = job.track_infos.get(&ctx.task.track_id).cloned() else {
        return;
    };

    let extensions = downloader.extensions.clone();
    let task_id = ctx.task.id;
    downloader.run.background.spawn(async move {
        extensions.track_complete(task_id, &job, &track).await;
    });
}

/// One pipeline attempt
async fn download_track(ctx: &TrackContext) -> Result<TrackOutcome> {
    ctx.checkpoint()?;
    let task = &ctx.task;
    let config = ctx.config();
    let queue = &ctx.downloader.queue;

    let query = TrackQuery {
        quality: config.download.quality,
        codecs: config.codecs,
    };
    let mut info = task
        .backend
        .track_info(&task.track_id, &query, task.track_data.as_ref())
        .await?
        .ok_or_else(|| ctx.invalid_track("track metadata missing"))?;

    if !config.formatting.force_album_format {
        if task.index > 0 {
            info.tags.track_number = Some(task.index);
        }
        if task.total > 0 {
            info.tags.total_tracks = Some(task.total);
        }
    }
    queue.record_track_info(task.id, &info).await;
    ctx.update(
        ProgressUpdate::status(TrackStatus::Downloading)
            .with_track(&info.name, info.artist_line(), &info.album)
            .with_message("Preparing"),
    )
    .await;

    if is_other_artist(ctx, &info) {
        tracing::info!(
            track_id = %task.track_id,
            artists = %info.artist_line(),
            "Track not credited to the requested artist, skipping"
        );
        return Ok(TrackOutcome::Skipped);
    }
    if let Some(reason) = &info.error {
        return Err(ctx.invalid_track(reason.clone()));
    }

    ctx.checkpoint()?;
    let (dir, layout) = track_location(ctx, &info).await?;
    let stem = ctx
        .downloader
        .collaborators
        .layout
        .track_stem(&dir, &info, layout);

    let final_codec = config.conversion.target_for(info.codec);
    let expected = with_extension(&stem, final_codec.container().extension());
    if config.download.dry_run {
        tracing::info!(track_id = %task.track_id, path = %expected.display(), "Dry run, not downloading");
        return Ok(TrackOutcome::Skipped);
    }
    if config.download.ignore_existing_files && tokio::fs::try_exists(&expected).await.unwrap_or(false) {
        tracing::info!(track_id = %task.track_id, path = %expected.display(), "Track already exists, skipping");
        return Ok(TrackOutcome::Skipped);
    }

    ctx.checkpoint()?;
    ctx.message("Downloading audio").await;
    let (file, codec) = fetch_audio(ctx, &info, &stem).await?;
    info.codec = codec;

    ctx.checkpoint()?;
    let cover = if config.covers.embed_cover {
        ctx.message("Fetching cover").await;
        enrichment::cover(ctx, &info).await?
    } else {
        None
    };

    let lyrics = if config.lyrics.wanted() {
        ctx.message("Fetching lyrics").await;
        enrichment::lyrics(ctx, &info).await?
    } else {
        Default::default()
    };
    if config.lyrics.save_synced_lyrics
        && let Some(synced) = &lyrics.synced
    {
        enrichment::save_synced_lyrics(&stem, synced).await?;
    }
    let embedded_lyrics = enrichment::embedded_lyrics(&config.lyrics, &lyrics);

    ctx.message("Fetching credits").await;
    let credits = enrichment::credits(ctx, &info).await?;

    ctx.checkpoint()?;
    let (file, codec) = conversion::convert(ctx, file, &stem, codec).await?;
    info.codec = codec;

    ctx.message("Tagging").await;
    let tagged = ctx
        .downloader
        .collaborators
        .tagger
        .tag(TagRequest {
            file: &file,
            container: codec.container(),
            track: &info,
            cover: cover.as_deref(),
            credits: &credits,
            lyrics: embedded_lyrics,
        })
        .await;
    if let Err(e) = tagged {
        tracing::warn!(track_id = %task.track_id, path = %file.display(), error = %e, "Tagging failed, keeping untagged file");
    }

    queue.record_track_info(task.id, &info).await;
    tracing::info!(track_id = %task.track_id, path = %file.display(), "Track downloaded");
    Ok(TrackOutcome::Completed)
}

/// Tracks of an artist download credited to someone else are skipped when configured
fn is_other_artist(ctx: &TrackContext, info: &TrackInfo) -> bool {
    ctx.task.job_kind == MediaKind::Artist
        && ctx.config().artist.ignore_different_artists
        && ctx
            .task
            .main_artist
            .as_deref()
            .is_some_and(|artist| !info.credits_artist(artist))
}

/// Directory and layout of the track file
///
/// A track requested on its own lands directly under its output directory,
/// unless album layout is forced: then its album is resolved and used.
async fn track_location(ctx: &TrackContext, info: &TrackInfo) -> Result<(PathBuf, TrackLayout)> {
    let task = &ctx.task;
    let config = ctx.config();
    if task.job_kind != MediaKind::Track {
        return Ok((task.output_dir.clone(), TrackLayout::Album));
    }
    if !config.formatting.force_album_format || info.album_id.is_empty() {
        return Ok((task.output_dir.clone(), TrackLayout::Single));
    }

    let album = match task.backend.album_info(&info.album_id, None).await {
        Ok(Some(album)) => album,
        Ok(None) | Err(Error::NotSupported(_)) => {
            tracing::debug!(track_id = %task.track_id, album_id = %info.album_id, "Album unavailable, using single layout");
            return Ok((task.output_dir.clone(), TrackLayout::Single));
        }
        Err(e) => return Err(e),
    };

    let layout = &ctx.downloader.collaborators.layout;
    let dir = layout.album_dir(&task.output_dir, &info.album_id, &album);
    if !config.download.dry_run {
        ctx.downloader.album_assets(&dir, &album).await;
    }
    Ok((dir, TrackLayout::Album))
}

/// Materialise the backend's download descriptor next to `stem`
///
/// Returns the written file and the codec actually delivered.
async fn fetch_audio(ctx: &TrackContext, info: &TrackInfo, stem: &Path) -> Result<(PathBuf, Codec)> {
    let task = &ctx.task;
    let target = with_extension(stem, info.codec.container().extension());
    let download = task.backend.track_download(&task.track_id, info, &target).await?;

    match &download.descriptor {
        DownloadDescriptor::Url { url, headers } => {
            url::Url::parse(url)
                .map_err(|e| ctx.invalid_descriptor(format!("invalid URL '{}': {}", url, e)))?;
            let progress = TransferProgress {
                tracker: ctx.downloader.queue.progress(),
                task_id: task.id,
            };
            ctx.downloader
                .collaborators
                .transfer
                .download(url, headers, &target, Some(progress))
                .await?;
        }
        DownloadDescriptor::TempFile(path) => {
            if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                return Err(ctx.invalid_descriptor(format!(
                    "temporary file {} does not exist",
                    path.display()
                )));
            }
            move_file(path, &target).await?;
        }
        DownloadDescriptor::Direct => {
            if !tokio::fs::try_exists(&target).await.unwrap_or(false) {
                return Err(ctx.invalid_descriptor("backend did not write the track file"));
            }
        }
    }

    match download.different_codec {
        Some(actual) if actual != info.codec => {
            let relocated = with_extension(stem, actual.container().extension());
            if relocated != target {
                move_file(&target, &relocated).await?;
            }
            tracing::debug!(track_id = %task.track_id, codec = %actual, "Backend delivered a different codec");
            Ok((relocated, actual))
        }
        _ => Ok((target, info.codec)),
    }
}
