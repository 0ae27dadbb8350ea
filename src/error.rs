//! Error types for melodl
//!
//! This module provides the error taxonomy used across the library:
//! - Configuration errors (unknown backend, missing capability, duplicate service host)
//! - Region restrictions, recoverable through account failover
//! - Transient I/O and network failures, recoverable through bounded retry
//! - Per-track failures (invalid track, conversion) that never abort siblings

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{Capability, MediaKind};

/// Result type alias for melodl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for melodl
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (fatal before any download starts)
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The account used for a request cannot access the content from its region
    #[error("region restricted on {backend} (account {account_index}): {message}")]
    RegionRestricted {
        /// Backend that rejected the request
        backend: String,
        /// Account index that was rejected
        account_index: usize,
        /// Message reported by the backend
        message: String,
    },

    /// Download-related error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Tag writing failed (downgraded to a warning by the pipeline)
    #[error("tagging failed: {0}")]
    Tagging(String),

    /// Codec conversion failed
    #[error("conversion from {from} to {to} failed: {reason}")]
    Conversion {
        /// Source codec name
        from: String,
        /// Target codec name
        to: String,
        /// Reason reported by the transcoder
        reason: String,
    },

    /// Error reported by a backend plugin
    #[error("backend error: {0}")]
    Backend(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Remote server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// Requested URL
        url: String,
        /// Status code returned by the server
        status: u16,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation not supported (missing collaborator, unsupported descriptor, etc.)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// The downloader no longer accepts requests
    #[error("downloader is shutting down")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Configuration errors, raised before any track is scheduled
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No backend registered under this name
    #[error("unknown backend '{name}'")]
    UnknownBackend {
        /// Requested backend name
        name: String,
    },

    /// Backend does not declare a capability the request needs
    #[error("backend '{backend}' does not support {capability}")]
    UnsupportedCapability {
        /// Backend name
        backend: String,
        /// Missing capability
        capability: Capability,
    },

    /// Two public backends claim the same service host
    #[error("service host '{host}' is claimed by both '{first}' and '{second}'")]
    DuplicateServiceHost {
        /// Contested host
        host: String,
        /// First backend claiming it
        first: String,
        /// Second backend claiming it
        second: String,
    },

    /// A setting has an invalid value
    #[error("invalid setting '{key}': {message}")]
    InvalidSetting {
        /// Setting key (e.g., "conversion.codec_conversions")
        key: String,
        /// What is wrong with it
        message: String,
    },
}

/// Download-related errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Job id unknown to the queue
    #[error("job {id} not found")]
    JobNotFound {
        /// The job id that was not found
        id: String,
    },

    /// Metadata for a track was missing or flagged as an error by the backend
    #[error("invalid track {track_id}: {reason}")]
    InvalidTrack {
        /// Backend track id
        track_id: String,
        /// Why the track is unusable
        reason: String,
    },

    /// Requested media could not be resolved by the backend
    #[error("{kind} {media_id} not found on {backend}")]
    MediaNotFound {
        /// Media kind that was requested
        kind: MediaKind,
        /// Backend media id
        media_id: String,
        /// Backend name
        backend: String,
    },

    /// Backend returned a descriptor that cannot be materialised
    #[error("unusable download descriptor for track {track_id}: {reason}")]
    InvalidDescriptor {
        /// Backend track id
        track_id: String,
        /// Why the descriptor is unusable
        reason: String,
    },

    /// Moving a downloaded file into place failed
    #[error("failed to move {source_path} to {dest_path}: {reason}")]
    MoveFailed {
        /// Source path
        source_path: PathBuf,
        /// Destination path
        dest_path: PathBuf,
        /// Underlying reason
        reason: String,
    },

    /// Processing was aborted because a track failed with abort-on-failure enabled
    #[error("download aborted after track {track_id} failed: {reason}")]
    Aborted {
        /// Backend track id of the failure that triggered the abort
        track_id: String,
        /// Failure message of that track
        reason: String,
    },

    /// The run was cancelled from outside before every track finished
    #[error("download cancelled")]
    Cancelled,
}

impl Error {
    /// Convenience constructor for backend failures
    pub fn backend(message: impl Into<String>) -> Self {
        Error::Backend(message.into())
    }

    /// Whether this error is a region restriction that another account may avoid
    pub fn is_region_restricted(&self) -> bool {
        matches!(self, Error::RegionRestricted { .. })
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_render_context() {
        let err: Error = ConfigError::UnsupportedCapability {
            backend: "tidal".into(),
            capability: Capability::LYRICS,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "configuration error: backend 'tidal' does not support lyrics"
        );

        let err: Error = ConfigError::DuplicateServiceHost {
            host: "play.example.com".into(),
            first: "a".into(),
            second: "b".into(),
        }
        .into();
        assert!(err.to_string().contains("play.example.com"));
    }

    #[test]
    fn region_restriction_is_detected() {
        let err = Error::RegionRestricted {
            backend: "qobuz".into(),
            account_index: 0,
            message: "not available in your country".into(),
        };
        assert!(err.is_region_restricted());
        assert!(!Error::backend("boom").is_region_restricted());
        assert_eq!(
            err.to_string(),
            "region restricted on qobuz (account 0): not available in your country"
        );
    }

    #[test]
    fn download_errors_convert_into_error() {
        let err: Error = DownloadError::InvalidTrack {
            track_id: "42".into(),
            reason: "track metadata missing".into(),
        }
        .into();
        assert!(matches!(
            err,
            Error::Download(DownloadError::InvalidTrack { .. })
        ));
        assert_eq!(
            err.to_string(),
            "download error: invalid track 42: track metadata missing"
        );
    }

    #[test]
    fn media_not_found_names_kind() {
        let err = DownloadError::MediaNotFound {
            kind: MediaKind::Album,
            media_id: "a1".into(),
            backend: "stub".into(),
        };
        assert_eq!(err.to_string(), "album a1 not found on stub");
    }
}
