//! One download run split into focused submodules.
//!
//! The [`Downloader`] struct and its methods are organized by phase:
//! - [`population`] - Request validation and queue population with account failover
//! - [`assets`] - Album and playlist side assets
//! - [`processing`] - Concurrent processing of every queued track task
//! - [`download_task`] - The per-track pipeline

mod assets;
mod download_task;
mod population;
mod processing;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use population::{ArtistScope, Source, Target};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::backend::BackendRegistry;
use crate::config::Config;
use crate::error::Result;
use crate::extensions::ExtensionSet;
use crate::layout::Layout;
use crate::progress::{EventBus, ProgressTracker};
use crate::queue::{DownloadQueue, Job, JobCallback};
use crate::tagging::Tagger;
use crate::transcode::Transcoder;
use crate::transfer::Transfer;
use crate::types::{Capability, DownloadOutcome, DownloadRequest, Event};
use crate::utils::TempFiles;

/// Pluggable pieces shared by every run of a session
#[derive(Clone)]
pub struct Collaborators {
    /// Output layout
    pub layout: Layout,
    /// HTTP byte transfer
    pub transfer: Transfer,
    /// Metadata writer
    pub tagger: Arc<dyn Tagger>,
    /// Codec converter; conversions are skipped without one
    pub transcoder: Option<Arc<dyn Transcoder>>,
}

/// Cover file memo keyed by album id; one fetch per album and run
pub(crate) type CoverMemo = Arc<Mutex<HashMap<String, Arc<OnceCell<Option<PathBuf>>>>>>;

/// Scratch state living for one run
#[derive(Clone)]
pub(crate) struct RunState {
    /// Cancelled on abort or from outside; pipelines stop at the next stage boundary
    pub(crate) cancel: CancellationToken,
    /// Extension hooks spawned while tracks and jobs finish
    pub(crate) background: TaskTracker,
    /// Temporary covers and conversion outputs
    pub(crate) temp_files: Arc<TempFiles>,
    pub(crate) covers: CoverMemo,
    /// First failure that triggered an abort: (track id, reason)
    pub(crate) abort: Arc<std::sync::Mutex<Option<(String, String)>>>,
}

/// A single download run (cloneable - all fields are Arc-wrapped)
///
/// Every run owns a fresh [`DownloadQueue`]; backend instances, config and
/// collaborators come from the session.
#[derive(Clone)]
pub struct Downloader {
    pub(crate) config: Arc<Config>,
    pub(crate) registry: Arc<BackendRegistry>,
    pub(crate) queue: DownloadQueue,
    pub(crate) collaborators: Collaborators,
    pub(crate) extensions: ExtensionSet,
    pub(crate) events: EventBus,
    /// Third-party backend per capability (covers, lyrics, credits)
    pub(crate) auxiliary: Arc<HashMap<Capability, String>>,
    pub(crate) run: RunState,
}

impl Downloader {
    /// Prepare a run; nothing is fetched until [`Downloader::run`]
    pub fn new(
        config: Arc<Config>,
        registry: Arc<BackendRegistry>,
        collaborators: Collaborators,
        extensions: ExtensionSet,
        events: EventBus,
        auxiliary: HashMap<Capability, String>,
        cancel: CancellationToken,
    ) -> Self {
        let background = TaskTracker::new();
        let progress = Arc::new(ProgressTracker::new(Arc::new(events.clone())));
        let queue = DownloadQueue::new(config.download.concurrent_downloads, progress)
            .with_job_callback(job_callback(
                events.clone(),
                extensions.clone(),
                background.clone(),
            ));

        Self {
            run: RunState {
                cancel,
                background,
                temp_files: Arc::new(TempFiles::new(config.temp_dir())),
                covers: Arc::new(Mutex::new(HashMap::new())),
                abort: Arc::new(std::sync::Mutex::new(None)),
            },
            config,
            registry,
            queue,
            collaborators,
            extensions,
            events,
            auxiliary: Arc::new(auxiliary),
        }
    }

    /// Queue of this run
    pub fn queue(&self) -> &DownloadQueue {
        &self.queue
    }

    /// Token that stops this run
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.run.cancel
    }

    /// Validate, populate and process `request`
    ///
    /// Extension hooks spawned during the run have finished when this
    /// returns, and temporary files are removed.
    pub async fn run(&self, request: &DownloadRequest) -> Result<DownloadOutcome> {
        if let Err(e) = self.validate(request).await {
            tracing::error!(error = %e, "Download request rejected");
            return Err(e);
        }

        let result = match self.populate(request).await {
            Ok(()) => {
                self.events.emit(Event::QueueReady {
                    jobs: self.queue.job_count().await,
                    tracks: self.queue.track_count().await,
                });
                self.process_queue().await
            }
            Err(e) => {
                tracing::error!(error = %e, "Queue population failed");
                Err(e)
            }
        };

        self.finish(result.is_ok()).await;
        result
    }

    /// Wait for background hooks, run batch finalization and clean up
    async fn finish(&self, succeeded: bool) {
        self.run.background.close();
        self.run.background.wait().await;

        if succeeded && !self.extensions.is_empty() {
            let jobs = self.queue.jobs().await;
            self.extensions.all_complete(&jobs).await;
        }

        self.run.temp_files.cleanup().await;

        let results = self.queue.results().await;
        tracing::info!(
            completed = results.completed.len(),
            failed = results.failed.len(),
            "Download run finished"
        );
        self.events.emit(Event::DownloadFinished {
            completed: results.completed.len(),
            failed: results.failed.len(),
        });
    }
}

/// Emit `JobFinished` and hand the job to the extension job hooks
fn job_callback(events: EventBus, extensions: ExtensionSet, background: TaskTracker) -> JobCallback {
    Arc::new(move |job: Job| {
        let progress = job.progress();
        events.emit(Event::JobFinished {
            job_id: job.id,
            name: job.name.clone(),
            status: job.status,
            completed: progress.completed,
            failed: progress.failed,
            skipped: progress.skipped,
        });

        if job.path.is_some() && !extensions.is_empty() {
            let extensions = extensions.clone();
            background.spawn(async move {
                extensions.job_complete(&job).await;
            });
        }
    })
}
