//! Track task context: the run and task a pipeline works on.

use std::sync::Arc;

use super::super::Downloader;
use crate::backend::Backend;
use crate::config::Config;
use crate::error::{DownloadError, Error, Result};
use crate::progress::ProgressUpdate;
use crate::queue::TrackTask;
use crate::types::Capability;

/// Everything a track pipeline needs
pub(crate) struct TrackContext {
    pub(crate) downloader: Downloader,
    pub(crate) task: TrackTask,
}

impl TrackContext {
    pub(crate) fn new(downloader: Downloader, task: TrackTask) -> Self {
        Self { downloader, task }
    }

    pub(super) fn config(&self) -> &Config {
        &self.downloader.config
    }

    pub(super) async fn update(&self, update: ProgressUpdate) {
        self.downloader.queue.update_progress(self.task.id, update).await;
    }

    pub(super) async fn message(&self, message: impl Into<String>) {
        self.update(ProgressUpdate::message(message)).await;
    }

    /// Stop between stages once the run is cancelled
    pub(super) fn checkpoint(&self) -> Result<()> {
        if self.downloader.run.cancel.is_cancelled() {
            return Err(DownloadError::Cancelled.into());
        }
        Ok(())
    }

    pub(super) fn invalid_track(&self, reason: impl Into<String>) -> Error {
        DownloadError::InvalidTrack {
            track_id: self.task.track_id.clone(),
            reason: reason.into(),
        }
        .into()
    }

    pub(super) fn invalid_descriptor(&self, reason: impl Into<String>) -> Error {
        DownloadError::InvalidDescriptor {
            track_id: self.task.track_id.clone(),
            reason: reason.into(),
        }
        .into()
    }

    /// Whether the task's own backend declares `capability`
    pub(super) fn supports(&self, capability: Capability) -> bool {
        self.downloader
            .registry
            .capabilities(&self.task.backend_name)
            .is_ok_and(|c| c.contains(capability))
    }

    /// Third-party backend configured for `capability`, unless it is the task's own
    pub(super) async fn auxiliary(&self, capability: Capability) -> Result<Option<Arc<dyn Backend>>> {
        match self.downloader.auxiliary.get(&capability) {
            Some(name) if *name != self.task.backend_name => {
                Ok(Some(self.downloader.registry.load_any(name).await?))
            }
            _ => Ok(None),
        }
    }

    /// Record the first failure as the abort cause and stop the run
    pub(super) fn abort(&self, reason: &str) {
        if let Ok(mut slot) = self.downloader.run.abort.lock()
            && slot.is_none()
        {
            *slot = Some((self.task.track_id.clone(), reason.to_string()));
        }
        self.downloader.run.cancel.cancel();
    }
}
