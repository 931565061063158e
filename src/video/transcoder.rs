use std::path::Path;

use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::{PipelineConfig, VideoConfig};
use crate::error::{CompositorError, MediaError, Result, Stage};
use crate::filters::FrameFilter;
use crate::media::backend::{DecodeSpec, EncodeSpec, MediaBackend};
use crate::media::types::{Frame, FrameRate, MediaClip, PixelLayout, SpeedFactor, TimeRange};

/// Result of a successful transcode
#[derive(Debug, Clone)]
pub struct TranscodedVideo {
    /// Video-only artifact, probed after the encoder exited
    pub clip: MediaClip,
    pub frames_written: u64,
    pub frame_rate: FrameRate,
}

impl TranscodedVideo {
    pub fn path(&self) -> &Path {
        self.clip.path()
    }
}

/// Number of source frames inside `range`, never zero
pub fn expected_frame_count(range: &TimeRange, frame_rate: FrameRate) -> u64 {
    ((range.duration() * frame_rate.as_f64()).round() as u64).max(1)
}

/// Decodes a range, filters each frame, and re-encodes at the scaled rate
///
/// Speed changes never drop or duplicate frames: every decoded frame is
/// written once and the output rate is `source rate x speed`, so the output
/// lasts `(end - start) / speed`.
pub struct FrameTranscoder<'a> {
    backend: &'a dyn MediaBackend,
    video: &'a VideoConfig,
    pipeline: &'a PipelineConfig,
}

impl<'a> FrameTranscoder<'a> {
    pub fn new(backend: &'a dyn MediaBackend, video: &'a VideoConfig, pipeline: &'a PipelineConfig) -> Self {
        Self {
            backend,
            video,
            pipeline,
        }
    }

    /// Output pixel format for a filter's output layout
    fn output_pixel_format(&self, layout: PixelLayout) -> String {
        match layout {
            PixelLayout::Gray8 => "gray".to_string(),
            PixelLayout::Rgb24 => self.video.pixel_format.clone(),
        }
    }

    pub fn transcode(
        &self,
        clip: &MediaClip,
        range: TimeRange,
        speed: SpeedFactor,
        filter: &dyn FrameFilter,
        output: &Path,
    ) -> Result<TranscodedVideo> {
        let source_rate = clip.frame_rate();
        let output_rate = source_rate.scaled(speed)?;
        let expected = expected_frame_count(&range, source_rate);
        let output_layout = filter.output_layout(PixelLayout::Rgb24);

        info!(
            "🎞️  Transcoding '{}' {:.3}s-{:.3}s at {} with '{}' ({} frames, {} -> {} fps)",
            clip.name(),
            range.start(),
            range.end(),
            speed,
            filter.name(),
            expected,
            source_rate,
            output_rate
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.pipeline.processing_threads)
            .build()
            .map_err(|e| CompositorError::encode(Stage::Transcode, format!("filter thread pool: {}", e)))?;

        let mut decoder = self.backend.open_decoder(&DecodeSpec {
            source: clip.path().to_path_buf(),
            range,
            resolution: clip.resolution(),
            frame_rate: source_rate,
        })?;

        let mut encoder = self.backend.open_encoder(&EncodeSpec {
            output: output.to_path_buf(),
            resolution: clip.resolution(),
            input_layout: output_layout,
            frame_rate: output_rate,
            codec: self.video.codec.clone(),
            preset: self.video.preset.clone(),
            crf: self.video.crf(),
            output_pixel_format: self.output_pixel_format(output_layout),
        })?;

        let batch_size = self.pipeline.frame_batch_size;
        let mut decoded: u64 = 0;
        let mut written: u64 = 0;
        let mut exhausted = false;

        while decoded < expected && !exhausted {
            let mut batch: Vec<Frame> = Vec::with_capacity(batch_size);
            while batch.len() < batch_size && decoded < expected {
                match decoder.read_frame()? {
                    Some(frame) => {
                        batch.push(frame);
                        decoded += 1;
                    }
                    None => {
                        exhausted = true;
                        break;
                    }
                }
            }
            if batch.is_empty() {
                break;
            }

            let filtered = pool.install(|| {
                batch
                    .into_par_iter()
                    .map(|frame| filter.apply(frame))
                    .collect::<Result<Vec<Frame>>>()
            })?;

            for frame in &filtered {
                encoder.write_frame(frame)?;
                written += 1;
            }
        }
        drop(decoder);

        // one frame of slack for container timestamp rounding
        if decoded + 1 < expected {
            return Err(MediaError::PrematureEnd {
                path: clip.path().to_path_buf(),
                decoded,
                expected,
            }
            .into());
        }

        encoder.finish()?;
        debug!("Encoder finished after {} frames", written);

        let probed = self
            .backend
            .probe(output)
            .map_err(|e| CompositorError::invalid_output(Stage::Transcode, output, e.to_string()))?;

        Ok(TranscodedVideo {
            clip: probed,
            frames_written: written,
            frame_rate: output_rate,
        })
    }
}
