//! # Clip-Compositor
//!
//! Trim, retime, filter, merge and ad-splice video clips.
//!
//! Frame-level pixel processing happens in-process; decoding, encoding,
//! audio tempo changes and container work are delegated to `ffmpeg` and
//! `ffprobe`, driven through structured invocations. Every job runs in its
//! own temporary workspace that is removed whether the job succeeds or not.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use clip_compositor::{
//!     composition::{ClipEngine, ProcessingRequest},
//!     config::Config,
//!     filters::FilterKind,
//!     media::{SpeedFactor, TimeRange},
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let engine = ClipEngine::new(Config::default())?;
//! let clip = engine.probe("talk.mp4")?;
//!
//! let request = ProcessingRequest::new(clip.clone(), TimeRange::within(&clip, 5.0, 15.0)?)
//!     .with_speed(SpeedFactor::ThreeHalves)
//!     .with_filter(FilterKind::Sepia);
//!
//! let report = engine
//!     .process_async(request, "talk_sepia.mp4".into(), CancellationToken::new())
//!     .await?;
//! println!("{} is {:.1}s long", report.output.display(), report.clip.duration_seconds());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`filters`] - Per-frame pixel kernels
//! - [`video`] - Decode, filter and re-encode a time range
//! - [`audio`] - Audio extraction and tempo changes
//! - [`composition`] - Job engine, muxing, merging and ad splicing
//! - [`media`] - Shared types, probing, tool invocations and workspaces
//! - [`config`] - Configuration management
//!
//! ## Custom Filters
//!
//! Implement [`FrameFilter`](filters::FrameFilter) and register it by name:
//!
//! ```rust
//! use clip_compositor::filters::{FilterRegistry, FrameFilter};
//! use clip_compositor::media::Frame;
//! use clip_compositor::{CompositorError, Result, Stage};
//!
//! struct Invert;
//!
//! impl FrameFilter for Invert {
//!     fn name(&self) -> &str {
//!         "invert"
//!     }
//!
//!     fn description(&self) -> &str {
//!         "Inverts every channel"
//!     }
//!
//!     fn apply(&self, frame: Frame) -> Result<Frame> {
//!         let (width, height, layout) = (frame.width(), frame.height(), frame.layout());
//!         let data = frame.as_raw().iter().map(|v| 255 - v).collect();
//!         Frame::from_raw(layout, width, height, data)
//!             .ok_or_else(|| CompositorError::encode(Stage::Transcode, "frame size changed"))
//!     }
//! }
//!
//! let mut registry = FilterRegistry::new();
//! registry.register("invert", || Box::new(Invert));
//! assert!(registry.has_filter("invert"));
//! ```

pub mod audio;
pub mod composition;
pub mod config;
pub mod error;
pub mod filters;
pub mod media;
pub mod video;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types for convenience
pub use crate::{
    composition::{AdInsertionJob, AdPlacement, ClipEngine, JobReport, MergeEntry, MergeJob, ProcessingRequest},
    config::Config,
    error::{CompositorError, Result, Stage},
    filters::{FilterKind, FilterRegistry, FrameFilter},
    media::{MediaClip, SpeedFactor, TimeRange},
};
