//! Codec conversion of a finished track file

use std::path::{Path, PathBuf};

use super::context::TrackContext;
use crate::error::Result;
use crate::models::Codec;
use crate::transcode::TranscodeRequest;
use crate::utils::{move_file, with_extension};

/// Why a configured conversion is not attempted
#[derive(Debug, PartialEq, Eq)]
pub(super) enum Refusal {
    Spatial,
    Undesirable,
}

/// Check a conversion against the codec rules
pub(super) fn refusal(from: Codec, to: Codec, allow_undesirable: bool) -> Option<Refusal> {
    if from.spatial() || to.spatial() {
        return Some(Refusal::Spatial);
    }
    if !from.lossless() && to.lossless() && !allow_undesirable {
        return Some(Refusal::Undesirable);
    }
    None
}

/// Convert `file` when the configuration maps `codec` to another codec
///
/// Returns the file and codec to tag. Refused or impossible conversions
/// keep the original file; a failing transcoder fails the track.
pub(super) async fn convert(
    ctx: &TrackContext,
    file: PathBuf,
    stem: &Path,
    codec: Codec,
) -> Result<(PathBuf, Codec)> {
    let conversion = &ctx.config().conversion;
    let target = conversion.target_for(codec);
    if target == codec {
        return Ok((file, codec));
    }

    match refusal(codec, target, conversion.enable_undesirable_conversions) {
        Some(Refusal::Spatial) => {
            tracing::warn!(from = %codec, to = %target, "Spatial codecs are never converted, keeping original");
            return Ok((file, codec));
        }
        Some(Refusal::Undesirable) => {
            tracing::warn!(from = %codec, to = %target, "Lossy to lossless conversion is disabled, keeping original");
            return Ok((file, codec));
        }
        None => {}
    }
    let Some(transcoder) = &ctx.downloader.collaborators.transcoder else {
        tracing::warn!(from = %codec, to = %target, "No transcoder available, keeping original");
        return Ok((file, codec));
    };

    ctx.message(format!("Converting to {}", target.pretty_name())).await;
    let extension = target.container().extension();
    let scratch = ctx
        .downloader
        .run
        .temp_files
        .path(&format!(".{}", extension))
        .await?;
    let flags = conversion
        .conversion_flags
        .get(&target)
        .cloned()
        .unwrap_or_default();
    transcoder
        .transcode(TranscodeRequest {
            source: &file,
            target: &scratch,
            from: codec,
            to: target,
            flags: &flags,
        })
        .await?;

    let converted = with_extension(stem, extension);
    move_file(&scratch, &converted).await?;
    if !conversion.keep_original && converted != file {
        match tokio::fs::remove_file(&file).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %file.display(), error = %e, "Failed to remove original after conversion"),
        }
    }
    tracing::info!(from = %codec, to = %target, path = %converted.display(), transcoder = transcoder.name(), "Converted track");
    Ok((converted, target))
}
