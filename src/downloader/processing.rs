//! Concurrent processing of every queued track task

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::task::JoinSet;

use super::Downloader;
use super::download_task::{TaskEnd, TrackContext, run_track_task};
use crate::error::{DownloadError, Result};
use crate::types::{DownloadOutcome, TrackOutcome};

impl Downloader {
    /// Spawn one pipeline per track task and wait for all of them
    ///
    /// At most `download.concurrent_downloads` pipelines are active at once.
    /// When the run is aborted or cancelled, tasks that never started are
    /// left unmarked, unfinished jobs get their abort status and the error
    /// is returned. Otherwise the aggregate results are returned.
    pub async fn process_queue(&self) -> Result<DownloadOutcome> {
        let tasks = self.queue.track_tasks().await;
        if tasks.is_empty() {
            tracing::info!("No tracks queued");
            return Ok(self.queue.results().await);
        }
        tracing::info!(
            tracks = tasks.len(),
            concurrency = self.config.download.concurrent_downloads,
            "Processing queue"
        );

        let mut set = JoinSet::new();
        for task in tasks {
            let queue = self.queue.clone();
            let (task_id, track_id) = (task.id, task.track_id.clone());
            let ctx = TrackContext::new(self.clone(), task);
            set.spawn(async move {
                match AssertUnwindSafe(run_track_task(ctx)).catch_unwind().await {
                    Ok(end) => end,
                    Err(_) => {
                        tracing::error!(track_id = %track_id, "Track pipeline panicked");
                        let outcome = TrackOutcome::Failed("track pipeline panicked".to_string());
                        queue.mark_track_complete(task_id, &outcome).await;
                        TaskEnd::Finished(outcome)
                    }
                }
            });
        }

        let (mut finished, mut stopped) = (0usize, 0usize);
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(TaskEnd::Finished(_)) => finished += 1,
                Ok(TaskEnd::NotStarted | TaskEnd::Stopped) => stopped += 1,
                Err(e) => tracing::error!(error = %e, "Track task could not be joined"),
            }
        }
        tracing::debug!(finished, stopped, "Every track task returned");

        let abort = self.run.abort.lock().ok().and_then(|slot| slot.clone());
        if let Some((track_id, reason)) = abort {
            self.queue.fail_unfinished().await;
            return Err(DownloadError::Aborted { track_id, reason }.into());
        }
        if self.run.cancel.is_cancelled() {
            self.queue.fail_unfinished().await;
            return Err(DownloadError::Cancelled.into());
        }

        Ok(self.queue.results().await)
    }
}
