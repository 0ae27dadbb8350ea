//! Job and track task records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::Backend;
use crate::models::TrackInfo;
use crate::types::{JobId, JobProgress, JobStatus, MediaKind, TaskId};

/// One original request (a track, album, playlist or artist)
///
/// `completed`, `failed` and `skipped` are pairwise disjoint subsets of
/// `track_ids`; the job is finished once they cover every track.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Job {
    /// Job id
    pub id: JobId,
    /// Request string that created the job
    pub original_request: String,
    /// Requested media kind
    pub kind: MediaKind,
    /// Requested media id
    pub media_id: String,
    /// Backend that owns the job
    pub backend_name: String,
    /// Display name
    pub name: String,
    /// Display artist
    pub artist: String,
    /// Output directory; extension job hooks only run when it is set
    pub path: Option<PathBuf>,
    /// Track ids in enqueue order
    pub track_ids: Vec<String>,
    /// Metadata resolved while processing, keyed by track id
    pub track_infos: HashMap<String, TrackInfo>,
    /// Completed track ids
    pub completed: HashSet<String>,
    /// Failed track ids with the failure message
    pub failed: HashMap<String, String>,
    /// Skipped track ids
    pub skipped: HashSet<String>,
    /// Lifecycle status
    pub status: JobStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Cover image URL
    pub cover_url: Option<String>,
}

impl Job {
    /// Tracks in the job
    pub fn total_tracks(&self) -> usize {
        self.track_ids.len()
    }

    /// Tracks in a terminal state
    pub fn finished_tracks(&self) -> usize {
        self.completed.len() + self.failed.len() + self.skipped.len()
    }

    /// Whether every track reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.total_tracks() > 0 && self.finished_tracks() >= self.total_tracks()
    }

    /// Whether at least one track was written (skips do not count)
    pub fn has_successful_downloads(&self) -> bool {
        !self.completed.is_empty()
    }

    /// Whether a track already reached a terminal state
    pub fn is_track_finished(&self, track_id: &str) -> bool {
        self.completed.contains(track_id)
            || self.failed.contains_key(track_id)
            || self.skipped.contains(track_id)
    }

    /// Counter snapshot
    pub fn progress(&self) -> JobProgress {
        JobProgress {
            completed: self.completed.len(),
            failed: self.failed.len(),
            skipped: self.skipped.len(),
            total: self.total_tracks(),
        }
    }
}

/// Parameters for [`DownloadQueue::create_job`](super::DownloadQueue::create_job)
#[derive(Clone, Debug, Default)]
pub struct NewJob {
    /// Request string
    pub original_request: String,
    /// Requested media kind
    pub kind: MediaKind,
    /// Requested media id
    pub media_id: String,
    /// Owning backend
    pub backend_name: String,
    /// Display name
    pub name: String,
    /// Display artist
    pub artist: String,
    /// Output directory
    pub path: Option<PathBuf>,
    /// Cover image URL
    pub cover_url: Option<String>,
}

/// One schedulable track download
#[derive(Clone)]
pub struct TrackTask {
    /// Task id
    pub id: TaskId,
    /// Backend track id
    pub track_id: String,
    /// Owning job
    pub job_id: JobId,
    /// Kind of the owning job, set when the task is added to it
    pub job_kind: MediaKind,
    /// Backend name
    pub backend_name: String,
    /// Backend instance bound to `account_index`
    pub backend: Arc<dyn Backend>,
    /// Directory the track is laid out under
    pub output_dir: PathBuf,
    /// 1-based position in the parent release, 0 when unknown
    pub index: u32,
    /// Number of tracks in the parent release, 0 when unknown
    pub total: u32,
    /// Requested artist for artist downloads
    pub main_artist: Option<String>,
    /// Track data pre-fetched by the parent lookup
    pub track_data: Option<Value>,
    /// Account that produced the task
    pub account_index: usize,
}

impl TrackTask {
    /// Task with a fresh id and no numbering
    pub fn new(
        track_id: impl Into<String>,
        backend_name: impl Into<String>,
        backend: Arc<dyn Backend>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            track_id: track_id.into(),
            job_id: JobId::default(),
            job_kind: MediaKind::Track,
            backend_name: backend_name.into(),
            backend,
            output_dir: output_dir.into(),
            index: 0,
            total: 0,
            main_artist: None,
            track_data: None,
            account_index: 0,
        }
    }

    /// Set 1-based position and total
    pub fn numbered(mut self, index: u32, total: u32) -> Self {
        self.index = index;
        self.total = total;
        self
    }

    /// Attach data pre-fetched by the parent lookup
    pub fn with_data(mut self, data: Option<Value>) -> Self {
        self.track_data = data;
        self
    }

    /// Set the requested artist of an artist download
    pub fn with_main_artist(mut self, artist: impl Into<String>) -> Self {
        self.main_artist = Some(artist.into());
        self
    }

    /// Set the account the backend instance is bound to
    pub fn on_account(mut self, account_index: usize) -> Self {
        self.account_index = account_index;
        self
    }
}

impl std::fmt::Debug for TrackTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackTask")
            .field("id", &self.id)
            .field("track_id", &self.track_id)
            .field("job_id", &self.job_id)
            .field("job_kind", &self.job_kind)
            .field("backend_name", &self.backend_name)
            .field("output_dir", &self.output_dir)
            .field("index", &self.index)
            .field("total", &self.total)
            .field("main_artist", &self.main_artist)
            .field("account_index", &self.account_index)
            .finish_non_exhaustive()
    }
}
