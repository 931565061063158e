use rayon::prelude::*;

use crate::error::Result;
use crate::filters::FrameFilter;
use crate::media::types::Frame;

/// 5-tap binomial approximation of a Gaussian, normalized by 16
const KERNEL: [u32; 5] = [1, 4, 6, 4, 1];
const KERNEL_SUM: u32 = 16;
const RADIUS: i64 = 2;

/// Separable Gaussian blur with clamped edges
pub struct BlurFilter;

impl BlurFilter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BlurFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Blur an interleaved buffer of `channels` bytes per pixel
pub fn blur_interleaved(data: &[u8], width: usize, height: usize, channels: usize) -> Vec<u8> {
    let row_len = width * channels;
    if row_len == 0 || height == 0 {
        return data.to_vec();
    }

    let clamp = |v: i64, len: usize| v.clamp(0, len as i64 - 1) as usize;

    let mut horizontal = vec![0u8; data.len()];
    horizontal
        .par_chunks_mut(row_len)
        .zip(data.par_chunks(row_len))
        .for_each(|(out, src)| {
            for x in 0..width {
                for c in 0..channels {
                    let sum: u32 = KERNEL
                        .iter()
                        .enumerate()
                        .map(|(k, weight)| {
                            let sx = clamp(x as i64 + k as i64 - RADIUS, width);
                            weight * src[sx * channels + c] as u32
                        })
                        .sum();
                    out[x * channels + c] = ((sum + KERNEL_SUM / 2) / KERNEL_SUM) as u8;
                }
            }
        });

    let mut output = vec![0u8; data.len()];
    output
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, out)| {
            for (i, value) in out.iter_mut().enumerate() {
                let sum: u32 = KERNEL
                    .iter()
                    .enumerate()
                    .map(|(k, weight)| {
                        let sy = clamp(y as i64 + k as i64 - RADIUS, height);
                        weight * horizontal[sy * row_len + i] as u32
                    })
                    .sum();
                *value = ((sum + KERNEL_SUM / 2) / KERNEL_SUM) as u8;
            }
        });

    output
}

impl FrameFilter for BlurFilter {
    fn name(&self) -> &str {
        "blur"
    }

    fn description(&self) -> &str {
        "Soft 5x5 Gaussian blur"
    }

    fn apply(&self, frame: Frame) -> Result<Frame> {
        let layout = frame.layout();
        let (width, height) = (frame.width(), frame.height());
        let blurred = blur_interleaved(frame.as_raw(), width as usize, height as usize, layout.channels());

        Frame::from_raw(layout, width, height, blurred).ok_or_else(|| {
            crate::error::CompositorError::encode(crate::error::Stage::Transcode, "blurred frame has the wrong size")
        })
    }
}
