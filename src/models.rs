//! Media metadata exchanged with backends, taggers and transcoders

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// File container, which also decides the file extension
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    /// FLAC
    Flac,
    /// RIFF WAVE
    Wav,
    /// Ogg Opus
    Opus,
    /// Ogg Vorbis
    Ogg,
    /// MPEG-4 audio
    M4a,
    /// MPEG-1 layer 3
    Mp3,
}

impl Container {
    /// File extension without the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            Container::Flac => "flac",
            Container::Wav => "wav",
            Container::Opus => "opus",
            Container::Ogg => "ogg",
            Container::M4a => "m4a",
            Container::Mp3 => "mp3",
        }
    }
}

impl std::fmt::Display for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Audio codec reported by a backend
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// Free Lossless Audio Codec
    Flac,
    /// Apple Lossless
    Alac,
    /// Uncompressed PCM in a WAVE file
    Wav,
    /// Master Quality Authenticated
    Mqa,
    /// Opus
    Opus,
    /// Vorbis
    Vorbis,
    /// MP3
    Mp3,
    /// AAC-LC
    Aac,
    /// HE-AAC
    Heaac,
    /// MPEG-H 3D audio (MHA1)
    Mha1,
    /// MPEG-H 3D audio (MHM1)
    Mhm1,
    /// E-AC-3 JOC
    Eac3,
    /// AC-4 IMS
    Ac4,
    /// Dolby Digital
    Ac3,
    /// Unknown or errored codec
    #[default]
    None,
}

impl Codec {
    /// Human-readable codec name
    pub fn pretty_name(&self) -> &'static str {
        match self {
            Codec::Flac => "FLAC",
            Codec::Alac => "ALAC",
            Codec::Wav => "WAVE",
            Codec::Mqa => "MQA",
            Codec::Opus => "Opus",
            Codec::Vorbis => "Vorbis",
            Codec::Mp3 => "MP3",
            Codec::Aac => "AAC-LC",
            Codec::Heaac => "HE-AAC",
            Codec::Mha1 => "MPEG-H 3D (MHA1)",
            Codec::Mhm1 => "MPEG-H 3D (MHM1)",
            Codec::Eac3 => "E-AC-3 JOC",
            Codec::Ac4 => "AC-4 IMS",
            Codec::Ac3 => "Dolby Digital",
            Codec::None => "Error",
        }
    }

    /// Container this codec is stored in
    pub fn container(&self) -> Container {
        match self {
            Codec::Flac | Codec::Mqa => Container::Flac,
            Codec::Wav => Container::Wav,
            Codec::Opus => Container::Opus,
            Codec::Vorbis => Container::Ogg,
            Codec::Mp3 => Container::Mp3,
            Codec::Alac
            | Codec::Aac
            | Codec::Heaac
            | Codec::Mha1
            | Codec::Mhm1
            | Codec::Eac3
            | Codec::Ac4
            | Codec::Ac3
            | Codec::None => Container::M4a,
        }
    }

    /// Whether the codec is lossless
    pub fn lossless(&self) -> bool {
        matches!(self, Codec::Flac | Codec::Alac | Codec::Wav)
    }

    /// Whether the codec carries spatial audio
    pub fn spatial(&self) -> bool {
        matches!(
            self,
            Codec::Mha1 | Codec::Mhm1 | Codec::Eac3 | Codec::Ac4 | Codec::Ac3
        )
    }

    /// Whether the codec is proprietary
    pub fn proprietary(&self) -> bool {
        matches!(self, Codec::Mqa | Codec::Eac3 | Codec::Ac4 | Codec::Ac3)
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.pretty_name())
    }
}

/// Quality tier requested from backends
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Lowest available
    Minimum,
    /// Low bitrate lossy
    Low,
    /// Medium bitrate lossy
    Medium,
    /// High bitrate lossy
    High,
    /// CD-quality lossless
    Lossless,
    /// Best available, including hi-res
    #[default]
    Hifi,
}

/// Image file type for covers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// JPEG
    #[default]
    Jpg,
    /// PNG
    Png,
    /// WebP
    Webp,
}

impl ImageFormat {
    /// File extension without the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Webp => "webp",
        }
    }
}

/// Cover compression level
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverCompression {
    /// Light compression, large files
    #[default]
    Low,
    /// Strong compression, small files
    High,
}

/// Requested cover rendition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverOptions {
    /// Image type
    pub file_type: ImageFormat,
    /// Edge length in pixels
    pub resolution: u32,
    /// Compression level
    pub compression: CoverCompression,
}

/// A cover location returned by a backend
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverInfo {
    /// Where to fetch the image
    pub url: String,
    /// Image type behind the URL
    pub file_type: ImageFormat,
}

/// Tag fields that do not drive orchestration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Tags {
    /// Album artist
    pub album_artist: Option<String>,
    /// Composer
    pub composer: Option<String>,
    /// 1-based position in the release
    pub track_number: Option<u32>,
    /// Number of tracks in the release
    pub total_tracks: Option<u32>,
    /// Copyright line
    pub copyright: Option<String>,
    /// ISRC
    pub isrc: Option<String>,
    /// UPC
    pub upc: Option<String>,
    /// 1-based disc number
    pub disc_number: Option<u32>,
    /// Number of discs
    pub total_discs: Option<u32>,
    /// ReplayGain track gain
    pub replay_gain: Option<f64>,
    /// ReplayGain track peak
    pub replay_peak: Option<f64>,
    /// Genres
    #[serde(default)]
    pub genres: Vec<String>,
    /// Release date, YYYY-MM-DD
    pub release_date: Option<String>,
    /// Description
    pub description: Option<String>,
    /// Comment
    pub comment: Option<String>,
    /// Label
    pub label: Option<String>,
    /// Backend-specific tags written verbatim
    #[serde(default)]
    pub extra_tags: HashMap<String, String>,
}

/// Metadata for a single track
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    /// Track title
    pub name: String,
    /// Album title
    pub album: String,
    /// Backend album id, used to share covers between sibling tracks
    pub album_id: String,
    /// Credited artists, primary first
    pub artists: Vec<String>,
    /// Tag fields
    #[serde(default)]
    pub tags: Tags,
    /// Codec the backend will deliver
    pub codec: Codec,
    /// Cover image URL
    pub cover_url: Option<String>,
    /// Release year
    pub release_year: Option<i32>,
    /// Duration in seconds
    pub duration: Option<u32>,
    /// Explicit content flag
    #[serde(default)]
    pub explicit: bool,
    /// Backend artist id
    pub artist_id: Option<String>,
    /// Animated cover URL
    pub animated_cover_url: Option<String>,
    /// Free-form description
    pub description: Option<String>,
    /// Bits per sample
    pub bit_depth: Option<u8>,
    /// Sample rate in kHz
    pub sample_rate: Option<f32>,
    /// Bitrate in kbit/s
    pub bitrate: Option<u32>,
    /// URL handed back to the backend when requesting a download
    pub download_url: Option<String>,
    /// Opaque backend data for the download call
    pub download_data: Option<serde_json::Value>,
    /// Opaque backend data for the cover call
    pub cover_data: Option<serde_json::Value>,
    /// Opaque backend data for the credits call
    pub credits_data: Option<serde_json::Value>,
    /// Opaque backend data for the lyrics call
    pub lyrics_data: Option<serde_json::Value>,
    /// Set by the backend when the track cannot be downloaded
    pub error: Option<String>,
}

impl TrackInfo {
    /// Artists joined for display
    pub fn artist_line(&self) -> String {
        self.artists.join(", ")
    }

    /// Whether `artist` is among the credited artists, ignoring case
    pub fn credits_artist(&self, artist: &str) -> bool {
        let wanted = artist.to_lowercase();
        self.artists.iter().any(|a| a.to_lowercase() == wanted)
    }
}

/// Metadata for an album
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AlbumInfo {
    /// Album title
    pub name: String,
    /// Primary album artist
    pub artist: String,
    /// Track ids in release order
    pub tracks: Vec<String>,
    /// Release year
    pub release_year: Option<i32>,
    /// Duration in seconds
    pub duration: Option<u32>,
    /// Explicit content flag
    #[serde(default)]
    pub explicit: bool,
    /// Backend artist id
    pub artist_id: Option<String>,
    /// Quality label, e.g. "24bit/96kHz"
    pub quality: Option<String>,
    /// Digital booklet URL
    pub booklet_url: Option<String>,
    /// Cover image URL
    pub cover_url: Option<String>,
    /// UPC
    pub upc: Option<String>,
    /// Cover image type
    #[serde(default)]
    pub cover_type: ImageFormat,
    /// Animated cover URL
    pub animated_cover_url: Option<String>,
    /// Free-form description
    pub description: Option<String>,
    /// Per-track data returned together with the album, keyed by track id
    #[serde(default)]
    pub track_data: HashMap<String, serde_json::Value>,
}

/// Metadata for a playlist
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaylistInfo {
    /// Playlist title
    pub name: String,
    /// Playlist creator
    pub creator: String,
    /// Track ids in playlist order
    pub tracks: Vec<String>,
    /// Release year
    pub release_year: Option<i32>,
    /// Duration in seconds
    pub duration: Option<u32>,
    /// Explicit content flag
    #[serde(default)]
    pub explicit: bool,
    /// Backend creator id
    pub creator_id: Option<String>,
    /// Cover image URL
    pub cover_url: Option<String>,
    /// Cover image type
    #[serde(default)]
    pub cover_type: ImageFormat,
    /// Animated cover URL
    pub animated_cover_url: Option<String>,
    /// Free-form description
    pub description: Option<String>,
    /// Per-track data returned together with the playlist, keyed by track id
    #[serde(default)]
    pub track_data: HashMap<String, serde_json::Value>,
}

/// Metadata for an artist discography
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtistInfo {
    /// Artist name
    pub name: String,
    /// Album ids
    #[serde(default)]
    pub albums: Vec<String>,
    /// Per-album data, keyed by album id
    #[serde(default)]
    pub album_data: HashMap<String, serde_json::Value>,
    /// Standalone track ids
    #[serde(default)]
    pub tracks: Vec<String>,
    /// Per-track data, keyed by track id
    #[serde(default)]
    pub track_data: HashMap<String, serde_json::Value>,
}

/// Lyrics for a track
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LyricsInfo {
    /// Plain lyrics
    pub embedded: Option<String>,
    /// LRC-formatted synced lyrics
    pub synced: Option<String>,
}

/// One credit line, e.g. producer → [names]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditsInfo {
    /// Credit role
    #[serde(rename = "type")]
    pub kind: String,
    /// People credited in that role
    pub names: Vec<String>,
}

/// A search hit
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Backend id of the hit
    pub result_id: String,
    /// Title
    pub name: Option<String>,
    /// Artists
    #[serde(default)]
    pub artists: Vec<String>,
    /// Year as displayed by the service
    pub year: Option<String>,
    /// Explicit content flag
    #[serde(default)]
    pub explicit: bool,
    /// Duration in seconds
    pub duration: Option<u32>,
    /// Extra display columns
    #[serde(default)]
    pub additional: Vec<String>,
    /// Opaque backend data for follow-up calls
    pub data: Option<serde_json::Value>,
}

/// How the bytes of a track are delivered
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadDescriptor {
    /// Stream from a remote URL with optional request headers
    Url {
        /// Remote location
        url: String,
        /// Extra request headers
        headers: HashMap<String, String>,
    },
    /// The backend already wrote the bytes to a temporary file
    TempFile(PathBuf),
    /// The backend wrote the bytes straight to the target path
    Direct,
}

/// Download answer from a backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackDownload {
    /// Delivery method
    pub descriptor: DownloadDescriptor,
    /// Codec actually delivered, when it differs from the metadata
    pub different_codec: Option<Codec>,
}

impl TrackDownload {
    /// Stream from `url` without extra headers
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            descriptor: DownloadDescriptor::Url {
                url: url.into(),
                headers: HashMap::new(),
            },
            different_codec: None,
        }
    }

    /// Bytes already written to the target path
    pub fn direct() -> Self {
        Self {
            descriptor: DownloadDescriptor::Direct,
            different_codec: None,
        }
    }

    /// Bytes waiting in a temporary file
    pub fn temp_file(path: impl Into<PathBuf>) -> Self {
        Self {
            descriptor: DownloadDescriptor::TempFile(path.into()),
            different_codec: None,
        }
    }
}
