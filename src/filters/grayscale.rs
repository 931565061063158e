use image::imageops;

use crate::error::Result;
use crate::filters::FrameFilter;
use crate::media::types::{Frame, PixelLayout};

/// Luma conversion; the only filter that changes the channel count
pub struct GrayscaleFilter;

impl GrayscaleFilter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GrayscaleFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameFilter for GrayscaleFilter {
    fn name(&self) -> &str {
        "grayscale"
    }

    fn description(&self) -> &str {
        "Single-channel luma; the encoder switches to a gray pixel format"
    }

    fn output_layout(&self, _input: PixelLayout) -> PixelLayout {
        PixelLayout::Gray8
    }

    fn apply(&self, frame: Frame) -> Result<Frame> {
        Ok(match frame {
            Frame::Rgb(buffer) => Frame::Gray(imageops::grayscale(&buffer)),
            gray @ Frame::Gray(_) => gray,
        })
    }
}
