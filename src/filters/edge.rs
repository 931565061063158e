use image::imageops;
use rayon::prelude::*;

use crate::error::Result;
use crate::filters::FrameFilter;
use crate::media::types::{Frame, PixelLayout};

/// Gradient magnitude above which a pixel counts as an edge
pub const EDGE_THRESHOLD: f32 = 100.0;

/// Binary edge map from Sobel gradients, emitted as color frames
pub struct EdgeDetectFilter;

impl EdgeDetectFilter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EdgeDetectFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameFilter for EdgeDetectFilter {
    fn name(&self) -> &str {
        "edge-detect"
    }

    fn description(&self) -> &str {
        "Sobel edge map, white edges on black"
    }

    fn output_layout(&self, _input: PixelLayout) -> PixelLayout {
        PixelLayout::Rgb24
    }

    fn apply(&self, frame: Frame) -> Result<Frame> {
        let luma = match &frame {
            Frame::Rgb(buffer) => imageops::grayscale(buffer),
            Frame::Gray(buffer) => buffer.clone(),
        };
        let (width, height) = luma.dimensions();
        if width == 0 || height == 0 {
            return Ok(Frame::Rgb(image::RgbImage::new(width, height)));
        }
        let mut output = vec![0u8; width as usize * height as usize * 3];

        // clamp-to-edge sampling
        let at = |x: i64, y: i64| -> f32 {
            let x = x.clamp(0, width as i64 - 1) as u32;
            let y = y.clamp(0, height as i64 - 1) as u32;
            luma.get_pixel(x, y)[0] as f32
        };

        output
            .par_chunks_mut(width as usize * 3)
            .enumerate()
            .for_each(|(y, row)| {
                let y = y as i64;
                for x in 0..width as i64 {
                    let gx = (at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1))
                        - (at(x - 1, y - 1) + 2.0 * at(x - 1, y) + at(x - 1, y + 1));
                    let gy = (at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1))
                        - (at(x - 1, y - 1) + 2.0 * at(x, y - 1) + at(x + 1, y - 1));

                    let level = if (gx * gx + gy * gy).sqrt() > EDGE_THRESHOLD { 255 } else { 0 };
                    let offset = x as usize * 3;
                    row[offset..offset + 3].fill(level);
                }
            });

        image::RgbImage::from_raw(width, height, output)
            .map(Frame::Rgb)
            .ok_or_else(|| crate::error::CompositorError::encode(
                crate::error::Stage::Transcode,
                "edge map has the wrong size",
            ))
    }
}
