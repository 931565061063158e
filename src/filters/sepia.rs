use rayon::prelude::*;

use crate::error::Result;
use crate::filters::FrameFilter;
use crate::media::types::Frame;

/// Rows of the sepia color matrix, applied to (r, g, b)
const SEPIA_MATRIX: [[f32; 3]; 3] = [
    [0.393, 0.769, 0.189],
    [0.349, 0.686, 0.168],
    [0.272, 0.534, 0.131],
];

/// Warm brown tone via a fixed linear color transform
pub struct SepiaFilter;

impl SepiaFilter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SepiaFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn sepia_pixel(pixel: &mut [u8]) {
    let (r, g, b) = (pixel[0] as f32, pixel[1] as f32, pixel[2] as f32);
    for (channel, row) in pixel.iter_mut().zip(SEPIA_MATRIX.iter()) {
        let value = row[0] * r + row[1] * g + row[2] * b;
        *channel = value.round().clamp(0.0, 255.0) as u8;
    }
}

impl FrameFilter for SepiaFilter {
    fn name(&self) -> &str {
        "sepia"
    }

    fn description(&self) -> &str {
        "Warm sepia tone from a fixed 3x3 color matrix"
    }

    fn apply(&self, frame: Frame) -> Result<Frame> {
        let mut buffer = match frame {
            Frame::Rgb(buffer) => buffer,
            gray @ Frame::Gray(_) => gray.to_rgb(),
        };

        let row_len = buffer.width() as usize * 3;
        if row_len > 0 {
            buffer.par_chunks_mut(row_len).for_each(|row| {
                row.chunks_exact_mut(3).for_each(sepia_pixel);
            });
        }

        Ok(Frame::Rgb(buffer))
    }
}
