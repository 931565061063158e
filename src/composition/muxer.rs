use std::path::Path;

use tracing::{debug, info};

use crate::audio::RetimedTrack;
use crate::config::{AudioConfig, MuxConfig};
use crate::error::{CompositorError, OutputError, Result, Stage};
use crate::media::backend::MediaBackend;
use crate::media::types::{container_of, FrameRate, MediaClip};

/// Combines a video-only stream and an audio stream into one container
///
/// Video is stream-copied; audio is re-encoded into the configured codec.
pub struct Muxer<'a> {
    backend: &'a dyn MediaBackend,
    audio: &'a AudioConfig,
    mux: &'a MuxConfig,
}

impl<'a> Muxer<'a> {
    pub fn new(backend: &'a dyn MediaBackend, audio: &'a AudioConfig, mux: &'a MuxConfig) -> Self {
        Self { backend, audio, mux }
    }

    /// Largest accepted length difference for a given video rate
    pub fn tolerance(&self, frame_rate: FrameRate) -> f64 {
        self.mux.tolerance_frames * frame_rate.frame_interval()
    }

    /// Reject inputs whose lengths disagree by more than the tolerance
    pub fn check_durations(&self, video_seconds: f64, audio_seconds: f64, frame_rate: FrameRate) -> Result<()> {
        let tolerance = self.tolerance(frame_rate);
        // float noise from probing must not tip an exact-tolerance difference over
        if (video_seconds - audio_seconds).abs() > tolerance + 1e-6 {
            return Err(OutputError::DurationMismatch {
                video: video_seconds,
                audio: audio_seconds,
                tolerance,
            }
            .into());
        }
        Ok(())
    }

    pub fn combine(&self, video: &MediaClip, audio: &RetimedTrack, output: &Path) -> Result<MediaClip> {
        self.check_durations(video.duration_seconds(), audio.duration_seconds, video.frame_rate())?;

        info!(
            "🔗 Muxing '{}' ({:.3}s) with audio ({:.3}s)",
            video.name(),
            video.duration_seconds(),
            audio.duration_seconds
        );

        let mut command = self
            .backend
            .ffmpeg()
            .input(video.path())
            .input(&audio.path)
            .map("0:v:0")
            .map("1:a:0")
            .opt("-c:v", "copy")
            .opt("-c:a", &self.audio.codec)
            .opt("-b:a", &self.audio.bitrate);
        // movflags only exists for the QuickTime-family muxers
        if matches!(container_of(output), Some("mp4" | "mov")) {
            command = command.opt("-movflags", "+faststart");
        }
        let invocation = command.output(output);
        self.backend.run(Stage::Mux, &invocation)?;

        let muxed = self
            .backend
            .probe(output)
            .map_err(|e| CompositorError::invalid_output(Stage::Mux, output, e.to_string()))?;
        if !muxed.has_audio() {
            return Err(OutputError::Mux {
                reason: format!("{} has no audio stream after muxing", output.display()),
            }
            .into());
        }

        debug!("Muxed output is {:.3}s", muxed.duration_seconds());
        Ok(muxed)
    }
}
