//! Codec conversion
//!
//! The downloader converts a finished file when `conversion.codec_conversions`
//! maps its codec to another one. Conversion goes through a [`Transcoder`];
//! [`FfmpegTranscoder`] drives an external `ffmpeg` binary.

use async_trait::async_trait;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::models::Codec;

/// One conversion job
#[derive(Debug, Clone, Copy)]
pub struct TranscodeRequest<'a> {
    /// Existing file
    pub source: &'a Path,
    /// File to produce
    pub target: &'a Path,
    /// Codec of `source`
    pub from: Codec,
    /// Codec to produce
    pub to: Codec,
    /// Encoder options for the target codec, e.g. `compression_level = 5`
    pub flags: &'a HashMap<String, String>,
}

/// Converts audio between codecs
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Produce `request.target`; failures are [`Error::Conversion`]
    async fn transcode(&self, request: TranscodeRequest<'_>) -> Result<()>;

    /// Name of the implementation
    fn name(&self) -> &'static str;
}

/// Transcoder backed by the `ffmpeg` binary
///
/// # Examples
///
/// ```no_run
/// use melodl::transcode::FfmpegTranscoder;
///
/// let transcoder = FfmpegTranscoder::from_path().expect("ffmpeg not found in PATH");
/// ```
pub struct FfmpegTranscoder {
    binary_path: PathBuf,
}

impl FfmpegTranscoder {
    /// Use an explicit binary
    pub fn new(binary_path: PathBuf) -> Self {
        Self { binary_path }
    }

    /// Find `ffmpeg` in PATH
    pub fn from_path() -> Option<Self> {
        which::which("ffmpeg").ok().map(Self::new)
    }

    fn arguments(request: &TranscodeRequest<'_>) -> Result<Vec<OsString>> {
        let encoder: &[&str] = match request.to {
            Codec::Flac => &["-c:a", "flac"],
            Codec::Alac => &["-c:a", "alac"],
            Codec::Wav => &["-c:a", "pcm_s16le"],
            Codec::Opus => &["-c:a", "libopus"],
            Codec::Vorbis => &["-c:a", "libvorbis"],
            Codec::Mp3 => &["-c:a", "libmp3lame"],
            Codec::Aac => &["-c:a", "aac"],
            Codec::Heaac => &["-c:a", "libfdk_aac", "-profile:a", "aac_he"],
            other => {
                return Err(Error::Conversion {
                    from: request.from.to_string(),
                    to: other.to_string(),
                    reason: "no encoder for target codec".into(),
                });
            }
        };

        let mut args: Vec<OsString> = ["-y", "-hide_banner", "-loglevel", "error", "-i"]
            .iter()
            .map(OsString::from)
            .collect();
        args.push(request.source.as_os_str().to_owned());
        args.extend(["-map", "0:a"].iter().map(OsString::from));
        args.extend(encoder.iter().map(OsString::from));

        let mut flags: Vec<(&String, &String)> = request.flags.iter().collect();
        flags.sort();
        for (key, value) in flags {
            args.push(format!("-{}", key).into());
            args.push(value.into());
        }

        args.push(request.target.as_os_str().to_owned());
        Ok(args)
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, request: TranscodeRequest<'_>) -> Result<()> {
        let conversion_error = |reason: String| Error::Conversion {
            from: request.from.to_string(),
            to: request.to.to_string(),
            reason,
        };

        let output = Command::new(&self.binary_path)
            .args(Self::arguments(&request)?)
            .output()
            .await
            .map_err(|e| conversion_error(format!("failed to execute ffmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(conversion_error(stderr.trim().to_string()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}
