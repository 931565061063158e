//! # Media plumbing
//!
//! Types shared by every stage, and the seam to the external codec tool:
//! structured invocations, probing, raw-frame pipes and per-job workspaces.

pub mod backend;
pub mod command;
pub mod pipe;
pub mod probe;
pub mod types;
pub mod workspace;

pub use backend::{DecodeSpec, EncodeSpec, FfmpegBackend, FrameReader, FrameWriter, MediaBackend};
pub use command::{FfmpegCommand, Invocation};
pub use types::{
    parse_timestamp, Frame, FrameRate, MediaClip, PixelLayout, Resolution, SpeedFactor, TimeRange,
};
pub use workspace::TempWorkspace;
