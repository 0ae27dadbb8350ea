//! # melodl
//!
//! Concurrent music download orchestrator with pluggable service backends.
//!
//! ## Design Philosophy
//!
//! melodl is designed to be:
//! - **Backend-agnostic** - Streaming services plug in through the [`Backend`] trait
//! - **Sensible defaults** - Works out of the box with zero configuration
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! A request names albums, playlists, artists or tracks per backend. The
//! downloader expands it into jobs and track tasks (population), then runs
//! one pipeline per track with bounded concurrency: metadata, audio,
//! cover, lyrics, credits, conversion and tagging.
//!
//! ## Quick Start
//!
//! ```no_run
//! use melodl::{Config, DownloadRequest, MediaDownloader, MediaIdentification, MediaKind};
//! # use std::sync::Arc;
//! # fn my_backend() -> Arc<dyn melodl::BackendFactory> { unimplemented!() }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.download.output_path = "/music".into();
//!
//!     let session = MediaDownloader::builder(config)
//!         .backend("service", my_backend(), vec![Default::default()])
//!         .build()?;
//!
//!     // Subscribe to events
//!     let mut events = session.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let request = DownloadRequest::new(
//!         "service",
//!         vec![MediaIdentification::new(MediaKind::Album, "123")],
//!     );
//!     let outcome = session.download(&request).await?;
//!     for (track_id, reason) in &outcome.failed {
//!         eprintln!("{track_id}: {reason}");
//!     }
//!
//!     session.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Backend plugin traits and registry
pub mod backend;
/// Configuration types
pub mod config;
/// One download run (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Post-download extension hooks
pub mod extensions;
/// Output layout
pub mod layout;
/// Media metadata models
pub mod models;
/// Progress throttling and the event bus
pub mod progress;
/// Job and track task registry
pub mod queue;
/// Retry logic with exponential backoff
pub mod retry;
/// Long-lived download session
pub mod session;
/// Tag writing
pub mod tagging;
/// Codec conversion
pub mod transcode;
/// HTTP byte transfer
pub mod transfer;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use backend::{Backend, BackendDescriptor, BackendFactory, BackendRegistry};
pub use config::Config;
pub use downloader::Downloader;
pub use error::{ConfigError, DownloadError, Error, Result};
pub use extensions::Extension;
pub use session::{MediaDownloader, MediaDownloaderBuilder, run_with_shutdown};
pub use types::{
    Capability, DownloadOutcome, DownloadRequest, Event, JobId, JobStatus, MediaIdentification,
    MediaKind, ProgressEvent, TaskId, TrackOutcome, TrackStatus,
};
