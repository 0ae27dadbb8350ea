//! Core types for melodl

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a job (one original request)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a track task
///
/// The same backend track id may appear in several jobs; each occurrence is a
/// separate task with its own `TaskId`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of media a request refers to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// A single track
    #[default]
    Track,
    /// An album
    Album,
    /// A playlist
    Playlist,
    /// An artist discography
    Artist,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MediaKind::Track => "track",
            MediaKind::Album => "album",
            MediaKind::Playlist => "playlist",
            MediaKind::Artist => "artist",
        };
        f.write_str(s)
    }
}

/// One requested media item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaIdentification {
    /// Kind of media
    pub kind: MediaKind,
    /// Backend media id
    pub media_id: String,
    /// Request string that produced this item (URL, search pick, ...)
    #[serde(default)]
    pub original_request: String,
}

impl MediaIdentification {
    /// Create an identification without an original request string
    pub fn new(kind: MediaKind, media_id: impl Into<String>) -> Self {
        Self {
            kind,
            media_id: media_id.into(),
            original_request: String::new(),
        }
    }
}

/// Everything one download run works on
///
/// `media` maps backend names to the items requested from them. `auxiliary`
/// names a third-party backend per capability (covers, lyrics, credits).
/// Playlists are resolved by their backend and downloaded through
/// `playlist_download_backend` when it names a different one.
#[derive(Clone, Debug, Default)]
pub struct DownloadRequest {
    /// Requested items per backend
    pub media: std::collections::HashMap<String, Vec<MediaIdentification>>,
    /// Third-party backend per capability
    pub auxiliary: std::collections::HashMap<Capability, String>,
    /// Backend that downloads playlist tracks
    pub playlist_download_backend: Option<String>,
}

impl DownloadRequest {
    /// Request `items` from `backend`
    pub fn new(backend: impl Into<String>, items: Vec<MediaIdentification>) -> Self {
        let mut request = Self::default();
        request.media.insert(backend.into(), items);
        request
    }

    /// Use `backend` for `capability` instead of the requested backend
    pub fn with_auxiliary(mut self, capability: Capability, backend: impl Into<String>) -> Self {
        self.auxiliary.insert(capability, backend.into());
        self
    }

    /// Download playlist tracks through `backend`
    pub fn with_playlist_download_backend(mut self, backend: impl Into<String>) -> Self {
        self.playlist_download_backend = Some(backend.into());
        self
    }
}

/// Job lifecycle
///
/// `Pending → Downloading → {Completed | Partial | Failed}`. `Failed` is only
/// produced when a run is aborted before any track of the job finished.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// No track has started yet
    #[default]
    Pending,
    /// At least one track is active
    Downloading,
    /// Every track completed or was skipped
    Completed,
    /// Finished with at least one failed track
    Partial,
    /// Aborted before any track finished
    Failed,
}

impl JobStatus {
    /// Whether the status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Partial | JobStatus::Failed
        )
    }
}

/// Per-track progress status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    /// Waiting for a slot or for metadata
    #[default]
    Pending,
    /// Metadata resolved and work in progress
    Downloading,
    /// File written
    Completed,
    /// Pipeline failed
    Failed,
    /// Nothing to do (exists, dry run, different artist)
    Skipped,
}

impl TrackStatus {
    /// Whether the status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TrackStatus::Completed | TrackStatus::Failed | TrackStatus::Skipped
        )
    }
}

/// Terminal result of a single track pipeline
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackOutcome {
    /// File written
    Completed,
    /// Nothing to do
    Skipped,
    /// Pipeline failed with this message
    Failed(String),
}

impl TrackOutcome {
    /// Progress status matching this outcome
    pub fn status(&self) -> TrackStatus {
        match self {
            TrackOutcome::Completed => TrackStatus::Completed,
            TrackOutcome::Skipped => TrackStatus::Skipped,
            TrackOutcome::Failed(_) => TrackStatus::Failed,
        }
    }
}

/// Unit of a progress counter
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressMode {
    /// `current`/`total` are percentage points
    #[default]
    Percent,
    /// `current`/`total` are bytes
    Bytes,
}

/// Snapshot of one track's progress, pushed to the progress sink
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Track task the event belongs to
    pub task_id: TaskId,
    /// Current status
    pub status: TrackStatus,
    /// Track title
    pub name: String,
    /// Artist line
    pub artist: String,
    /// Album or job name
    pub album: String,
    /// Backend name
    pub service: String,
    /// Progress counter
    pub current: u64,
    /// Counter total (0 = unknown)
    pub total: u64,
    /// Human-readable stage message
    pub message: String,
    /// Counter unit
    pub mode: ProgressMode,
}

impl ProgressEvent {
    /// Progress as a ratio in `0.0..=1.0`
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.current as f64 / self.total as f64
        }
    }
}

/// Per-job progress snapshot
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Completed tracks
    pub completed: usize,
    /// Failed tracks
    pub failed: usize,
    /// Skipped tracks
    pub skipped: usize,
    /// Tracks in the job
    pub total: usize,
}

impl JobProgress {
    /// Tracks in a terminal state
    pub fn finished(&self) -> usize {
        self.completed + self.failed + self.skipped
    }

    /// Whether every track reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.total > 0 && self.finished() >= self.total
    }

    /// Finished tracks over total, 0.0 for an empty job
    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.finished() as f64 / self.total as f64
        }
    }
}

/// Aggregate result of a run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOutcome {
    /// Completed backend track ids, jobs in creation order, tracks in enqueue order
    pub completed: Vec<String>,
    /// Failed backend track ids with the failure message
    pub failed: Vec<(String, String)>,
}

/// Feature a backend may declare
///
/// A small bitset; combine flags with `|`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(u8);

impl Capability {
    /// Can produce track downloads
    pub const DOWNLOAD: Capability = Capability(1);
    /// Can resolve playlists
    pub const PLAYLIST: Capability = Capability(1 << 1);
    /// Can fetch lyrics
    pub const LYRICS: Capability = Capability(1 << 2);
    /// Can fetch credits
    pub const CREDITS: Capability = Capability(1 << 3);
    /// Can fetch covers
    pub const COVERS: Capability = Capability(1 << 4);

    const NAMES: [(Capability, &'static str); 5] = [
        (Capability::DOWNLOAD, "download"),
        (Capability::PLAYLIST, "playlist"),
        (Capability::LYRICS, "lyrics"),
        (Capability::CREDITS, "credits"),
        (Capability::COVERS, "covers"),
    ];

    /// No capabilities
    pub const fn empty() -> Self {
        Capability(0)
    }

    /// Whether every flag of `other` is set
    pub const fn contains(&self, other: Capability) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Capability {
    type Output = Capability;

    fn bitor(self, rhs: Capability) -> Capability {
        Capability(self.0 | rhs.0)
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// Event broadcast by a [`MediaDownloader`](crate::MediaDownloader)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Progress of a single track task
    TrackProgress(ProgressEvent),

    /// Population finished; processing is about to start
    QueueReady {
        /// Number of jobs created
        jobs: usize,
        /// Number of track tasks registered
        tracks: usize,
    },

    /// Every track of a job reached a terminal state
    JobFinished {
        /// Job id
        job_id: JobId,
        /// Job display name
        name: String,
        /// Terminal status
        status: JobStatus,
        /// Completed tracks
        completed: usize,
        /// Failed tracks
        failed: usize,
        /// Skipped tracks
        skipped: usize,
    },

    /// A run returned
    DownloadFinished {
        /// Completed track count
        completed: usize,
        /// Failed track count
        failed: usize,
    },
}
