//! Post-download extension hooks
//!
//! Extensions observe finished tracks and jobs. Every hook is best-effort:
//! errors are logged and never reach the caller of a download.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::models::TrackInfo;
use crate::queue::Job;
use crate::types::TaskId;

/// Default extension priority
pub const DEFAULT_PRIORITY: i32 = 100;

/// Hooks run after tracks, jobs and whole runs finish
///
/// Extensions run in ascending [`priority`](Extension::priority) order.
#[async_trait]
pub trait Extension: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Lower values run first
    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    /// A track task completed
    async fn on_track_complete(&self, task_id: TaskId, job: &Job, track: &TrackInfo) -> Result<()> {
        let _ = (task_id, job, track);
        Ok(())
    }

    /// Every track of a job reached a terminal state
    async fn on_job_complete(&self, job: &Job) -> Result<()> {
        let _ = job;
        Ok(())
    }

    /// Every job hook of a run finished
    async fn on_all_complete(&self, jobs: &[Job]) -> Result<()> {
        let _ = jobs;
        Ok(())
    }
}

/// Extensions sorted by priority, stable for equal priorities
#[derive(Clone, Default)]
pub struct ExtensionSet {
    extensions: Vec<Arc<dyn Extension>>,
}

impl ExtensionSet {
    /// Build a set from extensions in registration order
    pub fn new(mut extensions: Vec<Arc<dyn Extension>>) -> Self {
        extensions.sort_by_key(|e| e.priority());
        Self { extensions }
    }

    /// Whether no extension is registered
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Run every track hook
    pub async fn track_complete(&self, task_id: TaskId, job: &Job, track: &TrackInfo) {
        for extension in &self.extensions {
            if let Err(e) = extension.on_track_complete(task_id, job, track).await {
                tracing::warn!(
                    extension = extension.name(),
                    task_id = %task_id,
                    error = %e,
                    "Track extension hook failed"
                );
            }
        }
    }

    /// Run every job hook
    pub async fn job_complete(&self, job: &Job) {
        for extension in &self.extensions {
            if let Err(e) = extension.on_job_complete(job).await {
                tracing::warn!(
                    extension = extension.name(),
                    job_id = %job.id,
                    error = %e,
                    "Job extension hook failed"
                );
            }
        }
    }

    /// Run every batch hook
    pub async fn all_complete(&self, jobs: &[Job]) {
        for extension in &self.extensions {
            if let Err(e) = extension.on_all_complete(jobs).await {
                tracing::warn!(extension = extension.name(), error = %e, "Batch extension hook failed");
            }
        }
    }
}
