use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};
use crate::media::types::{Frame, PixelLayout};

/// Core trait that all frame filters implement
///
/// Filters are pure: the same input frame always produces the same output,
/// and no state is carried between frames. That lets the transcoder run one
/// filter instance across many frames in parallel.
pub trait FrameFilter: Send + Sync {
    /// Returns the unique name of this filter
    fn name(&self) -> &str;

    /// Returns a human-readable description of this filter
    fn description(&self) -> &str;

    /// Layout of frames this filter produces for a given input layout
    ///
    /// The encoder is configured from this before the first frame is written.
    fn output_layout(&self, input: PixelLayout) -> PixelLayout {
        input
    }

    /// Transform one frame
    ///
    /// Output dimensions always equal input dimensions.
    fn apply(&self, frame: Frame) -> Result<Frame>;
}

/// Pixel filters a processing request can select
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterKind {
    #[default]
    None,
    Sepia,
    Grayscale,
    EdgeDetect,
    Blur,
}

impl FilterKind {
    pub const ALL: [FilterKind; 5] = [
        FilterKind::None,
        FilterKind::Sepia,
        FilterKind::Grayscale,
        FilterKind::EdgeDetect,
        FilterKind::Blur,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKind::None => "none",
            FilterKind::Sepia => "sepia",
            FilterKind::Grayscale => "grayscale",
            FilterKind::EdgeDetect => "edge-detect",
            FilterKind::Blur => "blur",
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        FilterKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| ValidationError::UnknownFilter { name: s.to_string() })
    }
}

/// Pass-through filter used for `FilterKind::None`
pub struct IdentityFilter;

impl FrameFilter for IdentityFilter {
    fn name(&self) -> &str {
        "none"
    }

    fn description(&self) -> &str {
        "Leaves frames untouched"
    }

    fn apply(&self, frame: Frame) -> Result<Frame> {
        Ok(frame)
    }
}
