//! Custom assertions over session events

use melodl::{Event, JobStatus};
use tokio::sync::broadcast;

/// Summary of a `JobFinished` event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedJob {
    pub name: String,
    pub status: JobStatus,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Drain every buffered event and keep the job completions
pub fn finished_jobs(events: &mut broadcast::Receiver<Event>) -> Vec<FinishedJob> {
    let mut jobs = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::JobFinished {
            name,
            status,
            completed,
            failed,
            skipped,
            ..
        } = event
        {
            jobs.push(FinishedJob {
                name,
                status,
                completed,
                failed,
                skipped,
            });
        }
    }
    jobs
}

/// Assert exactly one job finished, with `status`, and return it
pub fn single_job(events: &mut broadcast::Receiver<Event>, status: JobStatus) -> FinishedJob {
    let jobs = finished_jobs(events);
    assert_eq!(jobs.len(), 1, "expected one finished job, got {jobs:?}");
    assert_eq!(jobs[0].status, status, "unexpected status for {:?}", jobs[0]);
    jobs[0].clone()
}
