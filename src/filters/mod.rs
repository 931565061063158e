//! # Frame Filters
//!
//! Pure per-frame pixel transforms applied by the transcoder.
//!
//! ## Built-in Filters
//!
//! - **none**: identity
//! - **sepia**: fixed 3x3 color matrix, clamped
//! - **grayscale**: luma, one channel out
//! - **edge-detect**: thresholded Sobel magnitude, three channels out
//! - **blur**: separable 5-tap Gaussian, clamped edges
//!
//! Every filter keeps the frame's width and height. Only grayscale changes
//! the channel count.
//!
//! ## Usage
//!
//! ```rust
//! use clip_compositor::filters::{FilterKind, FilterRegistry};
//! use clip_compositor::media::Frame;
//!
//! let registry = FilterRegistry::new();
//! let sepia = registry.resolve(FilterKind::Sepia).unwrap();
//! let frame = sepia.apply(Frame::new_filled(4, 4, [120, 80, 40])).unwrap();
//! assert_eq!(frame.channels(), 3);
//! ```

pub mod blur;
pub mod edge;
pub mod grayscale;
pub mod registry;
pub mod sepia;
pub mod traits;

pub use blur::BlurFilter;
pub use edge::EdgeDetectFilter;
pub use grayscale::GrayscaleFilter;
pub use registry::FilterRegistry;
pub use sepia::SepiaFilter;
pub use traits::{FilterKind, FrameFilter, IdentityFilter};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::types::Frame;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_dimensions_and_channels_contract() {
        let registry = FilterRegistry::new();
        let mut rng = SmallRng::seed_from_u64(42);

        for kind in FilterKind::ALL {
            let filter = registry.resolve(kind).unwrap();
            let (w, h) = (rng.gen_range(1..32), rng.gen_range(1..32));
            let raw: Vec<u8> = (0..w * h * 3).map(|_| rng.gen()).collect();
            let frame = Frame::from_raw(crate::media::PixelLayout::Rgb24, w, h, raw).unwrap();

            let expected_layout = filter.output_layout(frame.layout());
            let output = filter.apply(frame).unwrap();

            assert_eq!((output.width(), output.height()), (w, h), "{kind}");
            assert_eq!(output.layout(), expected_layout, "{kind}");
            let expected_channels = if kind == FilterKind::Grayscale { 1 } else { 3 };
            assert_eq!(output.channels(), expected_channels, "{kind}");
        }
    }
}
