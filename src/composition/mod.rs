//! # Composition
//!
//! The engine that runs whole jobs, plus the multi-stream stages it drives:
//! muxing, merging and ad splicing.

pub mod engine;
pub mod jobs;
pub mod merge;
pub mod muxer;
pub mod splice;

use tokio_util::sync::CancellationToken;

use crate::error::{CompositorError, Result, Stage};

// Re-exports for convenience
pub use engine::{ClipEngine, JobReport};
pub use jobs::{check_unique_orders, AdInsertionJob, AdPlacement, MergeEntry, MergeJob, ProcessingRequest, SplicePlan};
pub use merge::{MergeEngine, MergeStrategy};
pub use muxer::Muxer;
pub use splice::{AdSplicer, SpliceMachine, SpliceState};

/// Fail with `Cancelled` if the job was cancelled before `stage` starts
pub(crate) fn checkpoint(cancel: &CancellationToken, stage: Stage) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(CompositorError::Cancelled { stage });
    }
    Ok(())
}
