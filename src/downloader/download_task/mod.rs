//! Track pipeline execution: one track from metadata to tagged file.
//!
//! Split into focused submodules:
//! - [`context`] - Per-task state, progress helpers and cancellation checkpoints
//! - [`orchestration`] - Gate, retry, stage order and terminal reporting
//! - [`enrichment`] - Cover, lyrics and credits lookups
//! - [`conversion`] - Codec conversion of the finished file

mod context;
mod conversion;
mod enrichment;
mod orchestration;

pub(crate) use context::TrackContext;
pub(crate) use orchestration::{TaskEnd, run_track_task};
