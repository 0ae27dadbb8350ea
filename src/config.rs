//! Configuration types for melodl
//!
//! A [`Config`] is built once by the embedding application and shared as
//! `Arc<Config>` with the queue, the downloader and every backend instance.
//! Loading and persisting settings files is left to the application.

use crate::error::{ConfigError, Result};
use crate::models::{Codec, CoverCompression, ImageFormat, Quality};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf, time::Duration};

/// Download behavior configuration (paths, concurrency, failure policy)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Base output directory (default: "./downloads")
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,

    /// Directory for temporary files (None = system temp directory)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// Maximum number of track pipelines downloading at once (default: 5)
    #[serde(default = "default_concurrent_downloads")]
    pub concurrent_downloads: usize,

    /// Requested quality tier, forwarded to backends (default: hifi)
    #[serde(default)]
    pub quality: Quality,

    /// Resolve metadata and paths only, never fetch track bytes or side assets
    #[serde(default)]
    pub dry_run: bool,

    /// Skip tracks whose target file already exists
    #[serde(default)]
    pub ignore_existing_files: bool,

    /// Turn the first track failure into a cancellation of the whole run
    #[serde(default)]
    pub abort_on_single_failure: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_path: default_output_path(),
            temp_dir: None,
            concurrent_downloads: default_concurrent_downloads(),
            quality: Quality::default(),
            dry_run: false,
            ignore_existing_files: false,
            abort_on_single_failure: false,
        }
    }
}

/// Artist discography download behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtistConfig {
    /// Ask backends for albums the artist is only credited on (default: true)
    #[serde(default = "default_true")]
    pub return_credited_albums: bool,

    /// Do not enqueue standalone tracks that already appeared in an album (default: true)
    #[serde(default = "default_true")]
    pub skip_standalone_tracks_in_albums: bool,

    /// Skip tracks whose artists do not include the requested artist (default: true)
    #[serde(default = "default_true")]
    pub ignore_different_artists: bool,
}

impl Default for ArtistConfig {
    fn default() -> Self {
        Self {
            return_credited_albums: true,
            skip_standalone_tracks_in_albums: true,
            ignore_different_artists: true,
        }
    }
}

/// Layout templates handed to the path builder
///
/// Templates use `{field}` placeholders. Unknown placeholders make the path
/// builder fall back to a fixed safe layout.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FormattingConfig {
    /// Album directory template, relative to the output path
    #[serde(default = "default_album_format")]
    pub album_format: String,

    /// Playlist directory template, relative to the output path
    #[serde(default = "default_playlist_format")]
    pub playlist_format: String,

    /// Track file name template inside an album or playlist directory
    #[serde(default = "default_track_filename_format")]
    pub track_filename_format: String,

    /// Full path template for single-track downloads
    #[serde(default = "default_single_full_path_format")]
    pub single_full_path_format: String,

    /// Zero-pad track and disc numbers to the width of the track total (default: true)
    #[serde(default = "default_true")]
    pub enable_zfill: bool,

    /// Lay out single tracks as part of their album
    #[serde(default)]
    pub force_album_format: bool,
}

impl Default for FormattingConfig {
    fn default() -> Self {
        Self {
            album_format: default_album_format(),
            playlist_format: default_playlist_format(),
            track_filename_format: default_track_filename_format(),
            single_full_path_format: default_single_full_path_format(),
            enable_zfill: true,
            force_album_format: false,
        }
    }
}

/// Codec preferences forwarded to backends when resolving track metadata
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodecPreferences {
    /// Allow proprietary codecs such as MQA or Dolby (default: false)
    #[serde(default)]
    pub proprietary_codecs: bool,

    /// Allow spatial audio codecs (default: true)
    #[serde(default = "default_true")]
    pub spatial_codecs: bool,
}

impl Default for CodecPreferences {
    fn default() -> Self {
        Self {
            proprietary_codecs: false,
            spatial_codecs: true,
        }
    }
}

/// Lyrics handling
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LyricsConfig {
    /// Embed plain lyrics in the tags (default: true)
    #[serde(default = "default_true")]
    pub embed_lyrics: bool,

    /// Embed synced lyrics instead of plain lyrics when available
    #[serde(default)]
    pub embed_synced_lyrics: bool,

    /// Save synced lyrics next to the track as `.lrc` (default: true)
    #[serde(default = "default_true")]
    pub save_synced_lyrics: bool,
}

impl Default for LyricsConfig {
    fn default() -> Self {
        Self {
            embed_lyrics: true,
            embed_synced_lyrics: false,
            save_synced_lyrics: true,
        }
    }
}

impl LyricsConfig {
    /// Whether lyrics need to be fetched at all
    pub fn wanted(&self) -> bool {
        self.embed_lyrics || self.save_synced_lyrics
    }
}

/// Cover art handling
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoverConfig {
    /// Embed cover art in the tags (default: true)
    #[serde(default = "default_true")]
    pub embed_cover: bool,

    /// Resolution of embedded covers in pixels (default: 1400)
    #[serde(default = "default_main_resolution")]
    pub main_resolution: u32,

    /// Compression of embedded covers (default: high)
    #[serde(default = "default_main_compression")]
    pub main_compression: CoverCompression,

    /// Save the album cover as a separate file in the album directory
    #[serde(default)]
    pub save_external: bool,

    /// Format of the external cover file (default: png)
    #[serde(default = "default_external_format")]
    pub external_format: ImageFormat,

    /// Resolution of the external cover in pixels (default: 3000)
    #[serde(default = "default_external_resolution")]
    pub external_resolution: u32,

    /// Compression of the external cover (default: low)
    #[serde(default)]
    pub external_compression: CoverCompression,

    /// Save animated covers when the backend provides one (default: true)
    #[serde(default = "default_true")]
    pub save_animated_cover: bool,
}

impl Default for CoverConfig {
    fn default() -> Self {
        Self {
            embed_cover: true,
            main_resolution: default_main_resolution(),
            main_compression: default_main_compression(),
            save_external: false,
            external_format: default_external_format(),
            external_resolution: default_external_resolution(),
            external_compression: CoverCompression::Low,
            save_animated_cover: true,
        }
    }
}

/// Codec conversion rules
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Source codec → target codec (default: alac → flac, wav → flac)
    #[serde(default = "default_codec_conversions")]
    pub codec_conversions: HashMap<Codec, Codec>,

    /// Encoder flags per target codec (default: flac compression_level 5)
    #[serde(default = "default_conversion_flags")]
    pub conversion_flags: HashMap<Codec, HashMap<String, String>>,

    /// Keep the source file after a successful conversion
    #[serde(default)]
    pub keep_original: bool,

    /// Allow lossy → lossless conversions
    #[serde(default)]
    pub enable_undesirable_conversions: bool,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            codec_conversions: default_codec_conversions(),
            conversion_flags: default_conversion_flags(),
            keep_original: false,
            enable_undesirable_conversions: false,
        }
    }
}

impl ConversionConfig {
    /// Codec a track of `codec` ends up in after conversion rules apply
    pub fn target_for(&self, codec: Codec) -> Codec {
        self.codec_conversions.get(&codec).copied().unwrap_or(codec)
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::track()
    }
}

impl RetryConfig {
    /// Policy for a whole track pipeline: 3 attempts, 2s doubling up to 30s
    pub fn track() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    /// Policy for raw byte streaming: 10 attempts, 400ms doubling up to 60s
    pub fn stream() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

/// Main configuration for [`MediaDownloader`](crate::MediaDownloader)
///
/// Fields are organized into logical sub-configs:
/// - [`download`](DownloadConfig): paths, concurrency, failure policy
/// - [`artist`](ArtistConfig): discography behavior
/// - [`formatting`](FormattingConfig): layout templates
/// - [`codecs`](CodecPreferences), [`lyrics`](LyricsConfig), [`covers`](CoverConfig)
/// - [`conversion`](ConversionConfig): transcoding rules
/// - `track_retry` / `stream_retry`: backoff policies
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior
    #[serde(default)]
    pub download: DownloadConfig,

    /// Artist discography behavior
    #[serde(default)]
    pub artist: ArtistConfig,

    /// Layout templates
    #[serde(default)]
    pub formatting: FormattingConfig,

    /// Codec preferences
    #[serde(default)]
    pub codecs: CodecPreferences,

    /// Lyrics handling
    #[serde(default)]
    pub lyrics: LyricsConfig,

    /// Cover art handling
    #[serde(default)]
    pub covers: CoverConfig,

    /// Codec conversion rules
    #[serde(default)]
    pub conversion: ConversionConfig,

    /// Retry policy wrapped around each track pipeline
    #[serde(default = "RetryConfig::track")]
    pub track_retry: RetryConfig,

    /// Retry policy for streaming bytes from a URL
    #[serde(default = "RetryConfig::stream")]
    pub stream_retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download: DownloadConfig::default(),
            artist: ArtistConfig::default(),
            formatting: FormattingConfig::default(),
            codecs: CodecPreferences::default(),
            lyrics: LyricsConfig::default(),
            covers: CoverConfig::default(),
            conversion: ConversionConfig::default(),
            track_retry: RetryConfig::track(),
            stream_retry: RetryConfig::stream(),
        }
    }
}

impl Config {
    /// Check settings that would make a run impossible
    pub fn validate(&self) -> Result<()> {
        if self.download.concurrent_downloads == 0 {
            return Err(ConfigError::InvalidSetting {
                key: "download.concurrent_downloads".into(),
                message: "must be at least 1".into(),
            }
            .into());
        }

        for retry in [("track_retry", &self.track_retry), ("stream_retry", &self.stream_retry)] {
            if retry.1.max_attempts == 0 {
                return Err(ConfigError::InvalidSetting {
                    key: format!("{}.max_attempts", retry.0),
                    message: "must be at least 1".into(),
                }
                .into());
            }
        }

        if let Some((from, to)) = self
            .conversion
            .codec_conversions
            .iter()
            .find(|(from, to)| **from == Codec::None || **to == Codec::None)
        {
            return Err(ConfigError::InvalidSetting {
                key: "conversion.codec_conversions".into(),
                message: format!("cannot convert {} to {}", from, to),
            }
            .into());
        }

        Ok(())
    }

    /// Directory used for temporary files
    pub fn temp_dir(&self) -> PathBuf {
        self.download
            .temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

// Default value functions
fn default_output_path() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_concurrent_downloads() -> usize {
    5
}

fn default_true() -> bool {
    true
}

fn default_album_format() -> String {
    "{name}{explicit}".into()
}

fn default_playlist_format() -> String {
    "{name}{explicit}".into()
}

fn default_track_filename_format() -> String {
    "{track_number}. {name}".into()
}

fn default_single_full_path_format() -> String {
    "{name}".into()
}

fn default_main_resolution() -> u32 {
    1400
}

fn default_main_compression() -> CoverCompression {
    CoverCompression::High
}

fn default_external_format() -> ImageFormat {
    ImageFormat::Png
}

fn default_external_resolution() -> u32 {
    3000
}

fn default_codec_conversions() -> HashMap<Codec, Codec> {
    HashMap::from([(Codec::Alac, Codec::Flac), (Codec::Wav, Codec::Flac)])
}

fn default_conversion_flags() -> HashMap<Codec, HashMap<String, String>> {
    HashMap::from([(
        Codec::Flac,
        HashMap::from([("compression_level".to_string(), "5".to_string())]),
    )])
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Durations are stored as whole milliseconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
