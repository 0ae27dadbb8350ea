//! Download queue: the registry of jobs and track tasks
//!
//! The queue owns every [`Job`] and [`TrackTask`] of a run, the semaphore
//! bounding concurrent pipelines, and completion detection. Pipelines never
//! touch job state directly; they go through [`DownloadQueue::update_progress`]
//! and [`DownloadQueue::mark_track_complete`].
//!
//! The registry lock is only held around map and set mutations. Progress
//! dispatch and the job completion callback run after it is released.

mod job;


pub use job::{Job, NewJob, TrackTask};

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};

use crate::error::{DownloadError, Result};
use crate::models::TrackInfo;
use crate::progress::{ProgressTracker, ProgressUpdate};
use crate::types::{
    DownloadOutcome, JobId, JobProgress, JobStatus, ProgressEvent, TaskId, TrackOutcome,
    TrackStatus,
};

/// Called once per job when its last track reaches a terminal state
pub type JobCallback = Arc<dyn Fn(Job) + Send + Sync>;

#[derive(Default)]
struct Registry {
    jobs: HashMap<JobId, Job>,
    job_order: Vec<JobId>,
    tasks: HashMap<TaskId, TrackTask>,
    task_order: Vec<TaskId>,
    notified: HashSet<JobId>,
}

/// Concurrency-safe registry of jobs and track tasks (cloneable, Arc-backed)
#[derive(Clone)]
pub struct DownloadQueue {
    registry: Arc<Mutex<Registry>>,
    semaphore: Arc<Semaphore>,
    progress: Arc<ProgressTracker>,
    on_job_complete: Option<JobCallback>,
}

impl DownloadQueue {
    /// Queue admitting at most `max_concurrent` active pipelines
    pub fn new(max_concurrent: usize, progress: Arc<ProgressTracker>) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            progress,
            on_job_complete: None,
        }
    }

    /// Install the job completion callback
    pub fn with_job_callback(mut self, callback: JobCallback) -> Self {
        self.on_job_complete = Some(callback);
        self
    }

    /// Gate every pipeline acquires before network I/O
    pub fn semaphore(&self) -> Arc<Semaphore> {
        self.semaphore.clone()
    }

    /// Progress tracker shared with the pipelines
    pub fn progress(&self) -> &Arc<ProgressTracker> {
        &self.progress
    }

    /// Register a new job with a fresh id
    pub async fn create_job(&self, params: NewJob) -> JobId {
        let id = JobId::new();
        let job = Job {
            id,
            original_request: params.original_request,
            kind: params.kind,
            media_id: params.media_id,
            backend_name: params.backend_name,
            name: params.name,
            artist: params.artist,
            path: params.path,
            cover_url: params.cover_url,
            created_at: Utc::now(),
            ..Default::default()
        };

        let mut registry = self.registry.lock().await;
        tracing::debug!(job_id = %id, kind = %job.kind, media_id = %job.media_id, "Created job");
        registry.jobs.insert(id, job);
        registry.job_order.push(id);
        id
    }

    /// Append a track task to a job
    ///
    /// Returns `Ok(false)` when the job already holds this track id; the
    /// duplicate is dropped.
    pub async fn add_track(&self, job_id: JobId, mut task: TrackTask) -> Result<bool> {
        task.job_id = job_id;
        let (job_name, task_id, track_id, backend_name) = {
            let mut registry = self.registry.lock().await;
            let Some(job) = registry.jobs.get_mut(&job_id) else {
                return Err(DownloadError::JobNotFound {
                    id: job_id.to_string(),
                }
                .into());
            };
            if job.track_ids.contains(&task.track_id) {
                tracing::debug!(job_id = %job_id, track_id = %task.track_id, "Duplicate track dropped");
                return Ok(false);
            }
            job.track_ids.push(task.track_id.clone());
            task.job_kind = job.kind;
            let job_name = job.name.clone();

            let (task_id, track_id, backend_name) =
                (task.id, task.track_id.clone(), task.backend_name.clone());
            registry.task_order.push(task_id);
            registry.tasks.insert(task_id, task);
            (job_name, task_id, track_id, backend_name)
        };

        self.progress.create(task_id, &track_id, &job_name, &backend_name);
        Ok(true)
    }

    /// Record the terminal outcome of a task
    ///
    /// The first outcome recorded for a track wins. When this completes the
    /// job, its terminal status is set and the completion callback runs
    /// exactly once, after the registry lock is released.
    pub async fn mark_track_complete(&self, task_id: TaskId, outcome: &TrackOutcome) {
        let finished_job = {
            let mut registry = self.registry.lock().await;
            let Some(task) = registry.tasks.get(&task_id) else {
                tracing::warn!(task_id = %task_id, "Track task not found in queue");
                return;
            };
            let (job_id, track_id) = (task.job_id, task.track_id.clone());

            let Some(job) = registry.jobs.get_mut(&job_id) else {
                tracing::warn!(job_id = %job_id, track_id = %track_id, "Job not found for track");
                return;
            };
            if job.is_track_finished(&track_id) {
                tracing::debug!(job_id = %job_id, track_id = %track_id, "Track already finished");
                return;
            }

            match outcome {
                TrackOutcome::Completed => {
                    job.completed.insert(track_id);
                }
                TrackOutcome::Skipped => {
                    job.skipped.insert(track_id);
                }
                TrackOutcome::Failed(reason) => {
                    job.failed.insert(track_id, reason.clone());
                }
            }

            if job.is_finished() && !job.status.is_terminal() {
                job.status = if job.failed.is_empty() {
                    JobStatus::Completed
                } else {
                    JobStatus::Partial
                };
                tracing::info!(
                    job_id = %job_id,
                    name = %job.name,
                    completed = job.completed.len(),
                    failed = job.failed.len(),
                    skipped = job.skipped.len(),
                    "Job finished"
                );
                let job = job.clone();
                registry.notified.insert(job_id).then_some(job)
            } else {
                None
            }
        };

        if let (Some(job), Some(callback)) = (finished_job, &self.on_job_complete) {
            callback(job);
        }
    }

    /// Forward a progress update; the first active update moves the job to `Downloading`
    pub async fn update_progress(&self, task_id: TaskId, update: ProgressUpdate) -> ProgressEvent {
        let activates = update.status == Some(TrackStatus::Downloading);
        let event = self.progress.update(task_id, update);

        if activates {
            let mut registry = self.registry.lock().await;
            let job_id = registry.tasks.get(&task_id).map(|t| t.job_id);
            if let Some(job) = job_id.and_then(|id| registry.jobs.get_mut(&id))
                && job.status == JobStatus::Pending
            {
                job.status = JobStatus::Downloading;
            }
        }
        event
    }

    /// Store the metadata resolved for a task on its job
    pub async fn record_track_info(&self, task_id: TaskId, info: &TrackInfo) {
        let mut registry = self.registry.lock().await;
        let Some(task) = registry.tasks.get(&task_id) else {
            return;
        };
        let (job_id, track_id) = (task.job_id, task.track_id.clone());
        if let Some(job) = registry.jobs.get_mut(&job_id) {
            job.track_infos.insert(track_id, info.clone());
        }
    }

    /// Job by id
    pub async fn job(&self, id: JobId) -> Option<Job> {
        self.registry.lock().await.jobs.get(&id).cloned()
    }

    /// Track task by id
    pub async fn track_task(&self, id: TaskId) -> Option<TrackTask> {
        self.registry.lock().await.tasks.get(&id).cloned()
    }

    /// Every job in creation order
    pub async fn jobs(&self) -> Vec<Job> {
        let registry = self.registry.lock().await;
        registry
            .job_order
            .iter()
            .filter_map(|id| registry.jobs.get(id).cloned())
            .collect()
    }

    /// Every track task in enqueue order
    pub async fn track_tasks(&self) -> Vec<TrackTask> {
        let registry = self.registry.lock().await;
        registry
            .task_order
            .iter()
            .filter_map(|id| registry.tasks.get(id).cloned())
            .collect()
    }

    /// Number of jobs
    pub async fn job_count(&self) -> usize {
        self.registry.lock().await.jobs.len()
    }

    /// Number of track tasks
    pub async fn track_count(&self) -> usize {
        self.registry.lock().await.tasks.len()
    }

    /// Counters of a job; zeroed for an unknown id
    pub async fn job_progress(&self, id: JobId) -> JobProgress {
        self.registry
            .lock()
            .await
            .jobs
            .get(&id)
            .map(Job::progress)
            .unwrap_or_default()
    }

    /// Completed track ids and failed `(track id, reason)` pairs
    ///
    /// Jobs are visited in creation order and tracks in enqueue order.
    pub async fn results(&self) -> DownloadOutcome {
        let registry = self.registry.lock().await;
        let mut outcome = DownloadOutcome::default();
        for job in registry.job_order.iter().filter_map(|id| registry.jobs.get(id)) {
            for track_id in &job.track_ids {
                if job.completed.contains(track_id) {
                    outcome.completed.push(track_id.clone());
                } else if let Some(reason) = job.failed.get(track_id) {
                    outcome.failed.push((track_id.clone(), reason.clone()));
                }
            }
        }
        outcome
    }

    /// Move every unfinished job to its abort status
    ///
    /// A job with no completed or skipped track becomes `Failed`, any other
    /// unfinished job `Partial`. Completion callbacks do not run.
    pub async fn fail_unfinished(&self) -> Vec<JobId> {
        let mut registry = self.registry.lock().await;
        let mut changed = Vec::new();
        for job in registry.jobs.values_mut() {
            if job.status.is_terminal() {
                continue;
            }
            job.status = if job.completed.is_empty() && job.skipped.is_empty() {
                JobStatus::Failed
            } else {
                JobStatus::Partial
            };
            tracing::info!(job_id = %job.id, status = ?job.status, "Job aborted");
            changed.push(job.id);
        }
        changed
    }

    /// Drop every track of a job before it is repopulated
    ///
    /// Used when population moves to another account: the job keeps its id
    /// and metadata, its tasks are removed. Returns false for an unknown job.
    pub async fn reset_job(&self, id: JobId) -> bool {
        let mut registry = self.registry.lock().await;
        let Some(job) = registry.jobs.get_mut(&id) else {
            return false;
        };
        job.track_ids.clear();
        job.track_infos.clear();
        job.completed.clear();
        job.failed.clear();
        job.skipped.clear();
        job.status = JobStatus::Pending;

        let dropped = drop_job_tasks(&mut registry, id);
        drop(registry);
        self.retire(dropped);
        true
    }

    /// Remove a job and its tasks
    pub async fn remove_job(&self, id: JobId) -> bool {
        let mut registry = self.registry.lock().await;
        if registry.jobs.remove(&id).is_none() {
            return false;
        }
        registry.job_order.retain(|j| *j != id);
        registry.notified.remove(&id);
        let dropped = drop_job_tasks(&mut registry, id);
        drop(registry);
        self.retire(dropped);
        true
    }

    fn retire(&self, task_ids: Vec<TaskId>) {
        for task_id in task_ids {
            self.progress.remove(task_id);
        }
    }

    /// Remove every job and task
    pub async fn clear(&self) {
        let mut registry = self.registry.lock().await;
        *registry = Registry::default();
        drop(registry);
        self.progress.clear();
    }
}

/// Remove a job's tasks from the registry and return their ids
fn drop_job_tasks(registry: &mut Registry, job_id: JobId) -> Vec<TaskId> {
    let dropped: Vec<TaskId> = registry
        .tasks
        .values()
        .filter(|task| task.job_id == job_id)
        .map(|task| task.id)
        .collect();
    registry.tasks.retain(|_, task| task.job_id != job_id);
    let Registry {
        tasks, task_order, ..
    } = registry;
    task_order.retain(|task_id| tasks.contains_key(task_id));
    dropped
}
