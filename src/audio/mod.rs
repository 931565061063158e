//! # Audio Retiming
//!
//! Pulls the audio track out of a source clip, trims it to the requested
//! window, and changes its tempo to match the speed-adjusted video.

pub mod retimer;

pub use retimer::{tempo_chain, AudioRetimer, AudioTrack, RetimedTrack};
