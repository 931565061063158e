//! # Video Processing Module
//!
//! Frame-level transcoding: decode a time range, run a filter over every
//! frame, and encode video-only output at the speed-adjusted frame rate.

pub mod transcoder;

pub use transcoder::{expected_frame_count, FrameTranscoder, TranscodedVideo};
