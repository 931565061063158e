use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{CompositorError, MediaError, Result, Stage};
use crate::media::backend::MediaBackend;
use crate::media::types::{MediaClip, SpeedFactor, TimeRange};

/// Smallest and largest factor a single `atempo` stage accepts
pub const TEMPO_STAGE_MIN: f64 = 0.5;
pub const TEMPO_STAGE_MAX: f64 = 2.0;

/// Source audio stream-copied out of a clip
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    pub path: PathBuf,
    /// Length of the source clip; the audio never outlasts it
    pub duration_seconds: f64,
}

/// Trimmed, tempo-shifted PCM audio
#[derive(Debug, Clone, PartialEq)]
pub struct RetimedTrack {
    pub path: PathBuf,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Split a tempo factor into `atempo` stages that each stay inside
/// `[0.5, 2.0]` and multiply back to `factor`
///
/// `factor` must be positive and finite; anything else yields no stages.
pub fn tempo_chain(factor: f64) -> Vec<f64> {
    let mut stages = Vec::new();
    if !(factor.is_finite() && factor > 0.0) {
        return stages;
    }

    let mut remaining = factor;
    while remaining > TEMPO_STAGE_MAX {
        stages.push(TEMPO_STAGE_MAX);
        remaining /= TEMPO_STAGE_MAX;
    }
    while remaining < TEMPO_STAGE_MIN {
        stages.push(TEMPO_STAGE_MIN);
        remaining /= TEMPO_STAGE_MIN;
    }
    if (remaining - 1.0).abs() > 1e-9 {
        stages.push(remaining);
    }
    stages
}

/// `-filter:a` value for a tempo chain, None when no filtering is needed
pub fn tempo_filter(factor: f64) -> Option<String> {
    let stages = tempo_chain(factor);
    if stages.is_empty() {
        return None;
    }
    Some(
        stages
            .iter()
            .map(|stage| format!("atempo={}", stage))
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// Duration, sample rate and channel count of a WAV file
pub fn wav_info(path: &Path, stage: Stage) -> Result<(f64, u32, u16)> {
    let reader = hound::WavReader::open(path)
        .map_err(|e| CompositorError::invalid_output(stage, path, format!("unreadable WAV: {}", e)))?;
    let spec = reader.spec();
    let frames = reader.duration();

    if frames == 0 || spec.sample_rate == 0 {
        return Err(CompositorError::invalid_output(stage, path, "WAV contains no samples"));
    }
    Ok((frames as f64 / spec.sample_rate as f64, spec.sample_rate, spec.channels))
}

/// Extracts and retimes audio through the media backend
pub struct AudioRetimer<'a> {
    backend: &'a dyn MediaBackend,
}

impl<'a> AudioRetimer<'a> {
    pub fn new(backend: &'a dyn MediaBackend) -> Self {
        Self { backend }
    }

    /// Stream-copy the clip's audio into a Matroska audio file
    pub fn extract(&self, clip: &MediaClip, output: &Path) -> Result<AudioTrack> {
        if !clip.has_audio() {
            return Err(MediaError::NoAudioStream {
                path: clip.path().to_path_buf(),
            }
            .into());
        }

        debug!("Extracting audio from '{}'", clip.name());
        let invocation = self
            .backend
            .ffmpeg()
            .input(clip.path())
            .flag("-vn")
            .opt("-c:a", "copy")
            .output(output);
        self.backend.run(Stage::ExtractAudio, &invocation)?;

        let size = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(CompositorError::invalid_output(
                Stage::ExtractAudio,
                output,
                "extracted audio is empty",
            ));
        }

        Ok(AudioTrack {
            path: output.to_path_buf(),
            duration_seconds: clip.duration_seconds(),
        })
    }

    /// Trim `track` to the request window and change its tempo by `speed`
    ///
    /// The window end is derived from the request, never from the length of
    /// the speed-adjusted video, and is clamped to the track.
    pub fn retime(&self, track: &AudioTrack, range: TimeRange, speed: SpeedFactor, output: &Path) -> Result<RetimedTrack> {
        let target_duration = range.duration() / speed.value();
        let adjusted_end = (range.start() + target_duration * speed.value()).min(track.duration_seconds);
        let trim = adjusted_end - range.start();

        if trim <= 0.0 {
            return Err(CompositorError::encode(
                Stage::RetimeAudio,
                format!(
                    "audio track ends at {:.3}s, before the requested start {:.3}s",
                    track.duration_seconds,
                    range.start()
                ),
            ));
        }

        info!(
            "🎵 Retiming audio {:.3}s-{:.3}s at {} (target {:.3}s)",
            range.start(),
            adjusted_end,
            speed,
            target_duration
        );

        let mut command = self
            .backend
            .ffmpeg()
            .seek(range.start())
            .input(&track.path)
            .duration(trim);
        if let Some(filter) = tempo_filter(speed.value()) {
            command = command.opt("-filter:a", filter);
        }
        let invocation = command.flag("-vn").opt("-c:a", "pcm_s16le").output(output);
        self.backend.run(Stage::RetimeAudio, &invocation)?;

        let (duration_seconds, sample_rate, channels) = wav_info(output, Stage::RetimeAudio)?;
        debug!("Retimed track is {:.3}s ({} Hz, {} ch)", duration_seconds, sample_rate, channels);

        Ok(RetimedTrack {
            path: output.to_path_buf(),
            duration_seconds,
            sample_rate,
            channels,
        })
    }
}
