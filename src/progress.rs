//! Per-track progress reporting
//!
//! Every state transition of a track task is pushed to a [`ProgressSink`].
//! [`ProgressTracker`] keeps the merged snapshot of each task and throttles
//! counter updates: byte counters are reported every 100 KiB, percent
//! counters every unit. Status, name and mode changes, forced updates and
//! reaching the total are always reported.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use crate::types::{Event, ProgressEvent, ProgressMode, TaskId, TrackStatus};

/// Minimum byte delta between two reported byte-mode events
pub const THROTTLE_BYTES: u64 = 102_400;

/// Minimum delta between two reported percent-mode events
pub const THROTTLE_PERCENT: u64 = 1;

/// Receives progress events
///
/// Publishing must not block; events for one task arrive in order.
pub trait ProgressSink: Send + Sync {
    /// Push one event
    fn publish(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn publish(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Broadcast channel of [`Event`]s with any number of subscribers
///
/// Used as the default progress sink: every progress event becomes an
/// [`Event::TrackProgress`].
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per slow subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to every event sent from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Send an event; dropped silently when nobody listens
    pub fn emit(&self, event: Event) {
        self.tx.send(event).ok();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl ProgressSink for EventBus {
    fn publish(&self, event: ProgressEvent) {
        self.emit(Event::TrackProgress(event));
    }
}

/// Partial update merged into a task's snapshot
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// New status
    pub status: Option<TrackStatus>,
    /// New display name
    pub name: Option<String>,
    /// New artist line
    pub artist: Option<String>,
    /// New album name
    pub album: Option<String>,
    /// New counter value
    pub current: Option<u64>,
    /// New counter total
    pub total: Option<u64>,
    /// New stage message
    pub message: Option<String>,
    /// New counter unit
    pub mode: Option<ProgressMode>,
    /// Report even when throttled
    pub force: bool,
}

impl ProgressUpdate {
    /// Status change
    pub fn status(status: TrackStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Forced stage message
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            force: true,
            ..Default::default()
        }
    }

    /// Byte counter
    pub fn bytes(current: u64, total: u64) -> Self {
        Self {
            current: Some(current),
            total: Some(total),
            mode: Some(ProgressMode::Bytes),
            ..Default::default()
        }
    }

    /// Set the message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set name, artist and album
    pub fn with_track(
        mut self,
        name: impl Into<String>,
        artist: impl Into<String>,
        album: impl Into<String>,
    ) -> Self {
        self.name = Some(name.into());
        self.artist = Some(artist.into());
        self.album = Some(album.into());
        self
    }

    /// Set the counter
    pub fn with_counter(mut self, current: u64, total: u64) -> Self {
        self.current = Some(current);
        self.total = Some(total);
        self
    }

    /// Set the counter unit
    pub fn with_mode(mut self, mode: ProgressMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

#[derive(Default)]
struct TrackerState {
    snapshots: HashMap<TaskId, ProgressEvent>,
    last_reported: HashMap<TaskId, u64>,
}

/// Merges updates per task and forwards the throttled result to a sink
pub struct ProgressTracker {
    sink: Arc<dyn ProgressSink>,
    state: Mutex<TrackerState>,
}

impl ProgressTracker {
    /// Tracker publishing to `sink`
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            sink,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Register a task in the pending state and report it
    pub fn create(&self, task_id: TaskId, name: &str, album: &str, service: &str) {
        let event = ProgressEvent {
            task_id,
            status: TrackStatus::Pending,
            name: name.to_string(),
            album: album.to_string(),
            service: service.to_string(),
            ..Default::default()
        };
        if let Ok(mut state) = self.state.lock() {
            state.snapshots.insert(task_id, event.clone());
            state.last_reported.insert(task_id, 0);
        }
        self.sink.publish(event);
    }

    /// Merge `update` into the task's snapshot and report it unless throttled
    ///
    /// Returns the merged snapshot. Unknown tasks start from an empty snapshot.
    pub fn update(&self, task_id: TaskId, update: ProgressUpdate) -> ProgressEvent {
        let (event, dispatch) = {
            let Ok(mut state) = self.state.lock() else {
                return ProgressEvent {
                    task_id,
                    ..Default::default()
                };
            };
            let event = state
                .snapshots
                .entry(task_id)
                .or_insert_with(|| ProgressEvent {
                    task_id,
                    ..Default::default()
                });
            merge(event, &update);
            let event = event.clone();

            let last = state.last_reported.get(&task_id).copied().unwrap_or(0);
            let dispatch = should_dispatch(&event, &update, last);
            if dispatch {
                state.last_reported.insert(task_id, event.current);
            }
            (event, dispatch)
        };

        if dispatch {
            self.sink.publish(event.clone());
        }
        event
    }

    /// Add `amount` to the task's counter
    pub fn advance(&self, task_id: TaskId, amount: u64, total: Option<u64>) -> ProgressEvent {
        let current = self
            .snapshot(task_id)
            .map_or(0, |e| e.current)
            .saturating_add(amount);
        self.update(
            task_id,
            ProgressUpdate {
                current: Some(current),
                total,
                ..Default::default()
            },
        )
    }

    /// Current snapshot of a task
    pub fn snapshot(&self, task_id: TaskId) -> Option<ProgressEvent> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.snapshots.get(&task_id).cloned())
    }

    /// Close a task that will never run and forget it
    ///
    /// Reports a final `Skipped` event so subscribers holding the pending
    /// snapshot see the task end. Unknown tasks are ignored.
    pub fn remove(&self, task_id: TaskId) {
        let removed = self.state.lock().ok().and_then(|mut state| {
            state.last_reported.remove(&task_id);
            state.snapshots.remove(&task_id)
        });
        if let Some(mut event) = removed {
            if event.status.is_terminal() {
                return;
            }
            event.status = TrackStatus::Skipped;
            event.message = "Removed from queue".to_string();
            self.sink.publish(event);
        }
    }

    /// Forget every task
    pub fn clear(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.snapshots.clear();
            state.last_reported.clear();
        }
    }
}

fn merge(event: &mut ProgressEvent, update: &ProgressUpdate) {
    if let Some(status) = update.status {
        event.status = status;
    }
    if let Some(name) = &update.name {
        event.name = name.clone();
    }
    if let Some(artist) = &update.artist {
        event.artist = artist.clone();
    }
    if let Some(album) = &update.album {
        event.album = album.clone();
    }
    if let Some(current) = update.current {
        event.current = current;
    }
    if let Some(total) = update.total {
        event.total = total;
    }
    if let Some(message) = &update.message {
        event.message = message.clone();
    }
    if let Some(mode) = update.mode {
        event.mode = mode;
    }
}

fn should_dispatch(event: &ProgressEvent, update: &ProgressUpdate, last: u64) -> bool {
    let throttle = match event.mode {
        ProgressMode::Bytes => THROTTLE_BYTES,
        ProgressMode::Percent => THROTTLE_PERCENT,
    };
    update.force
        || update.status.is_some()
        || update.name.is_some()
        || update.mode.is_some()
        || event.current.saturating_sub(last) >= throttle
        || (event.total > 0 && event.current >= event.total)
}
