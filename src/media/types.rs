use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Container extensions the pipeline accepts as sources
pub const SUPPORTED_CONTAINERS: [&str; 3] = ["mp4", "avi", "mov"];

/// Check whether a path has one of the accepted container extensions
pub fn is_supported_container<P: AsRef<Path>>(path: P) -> bool {
    container_of(path).is_some()
}

/// The accepted container a path's extension names, lowercased
pub fn container_of<P: AsRef<Path>>(path: P) -> Option<&'static str> {
    let ext = path.as_ref().extension()?.to_str()?.to_lowercase();
    SUPPORTED_CONTAINERS.into_iter().find(|container| *container == ext)
}

/// Memory layout of a raw frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelLayout {
    /// Three interleaved 8-bit channels
    Rgb24,
    /// One 8-bit luma channel
    Gray8,
}

impl PixelLayout {
    pub fn channels(&self) -> usize {
        match self {
            PixelLayout::Rgb24 => 3,
            PixelLayout::Gray8 => 1,
        }
    }

    /// Name ffmpeg uses for this layout in `-pix_fmt`
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            PixelLayout::Rgb24 => "rgb24",
            PixelLayout::Gray8 => "gray",
        }
    }

    /// Bytes needed for one frame of the given geometry
    pub fn frame_size(&self, resolution: Resolution) -> usize {
        resolution.width as usize * resolution.height as usize * self.channels()
    }
}

/// A single decoded video frame
///
/// Color frames come out of the decoder; grayscale frames only exist after
/// the grayscale kernel has run.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Rgb(RgbImage),
    Gray(GrayImage),
}

impl Frame {
    /// Create a new color frame filled with the specified color
    pub fn new_filled(width: u32, height: u32, color: [u8; 3]) -> Self {
        Frame::Rgb(ImageBuffer::from_pixel(width, height, Rgb(color)))
    }

    /// Create a new grayscale frame filled with the specified level
    pub fn new_gray(width: u32, height: u32, level: u8) -> Self {
        Frame::Gray(ImageBuffer::from_pixel(width, height, Luma([level])))
    }

    /// Build a frame from raw bytes; None if the length does not match
    pub fn from_raw(layout: PixelLayout, width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        match layout {
            PixelLayout::Rgb24 => ImageBuffer::from_raw(width, height, data).map(Frame::Rgb),
            PixelLayout::Gray8 => ImageBuffer::from_raw(width, height, data).map(Frame::Gray),
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            Frame::Rgb(buffer) => buffer.width(),
            Frame::Gray(buffer) => buffer.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Frame::Rgb(buffer) => buffer.height(),
            Frame::Gray(buffer) => buffer.height(),
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }

    pub fn layout(&self) -> PixelLayout {
        match self {
            Frame::Rgb(_) => PixelLayout::Rgb24,
            Frame::Gray(_) => PixelLayout::Gray8,
        }
    }

    pub fn channels(&self) -> usize {
        self.layout().channels()
    }

    /// Raw interleaved bytes, ready for an encoder pipe
    pub fn as_raw(&self) -> &[u8] {
        match self {
            Frame::Rgb(buffer) => buffer.as_raw(),
            Frame::Gray(buffer) => buffer.as_raw(),
        }
    }

    /// Color view of the frame; gray frames are expanded to three channels
    pub fn to_rgb(&self) -> RgbImage {
        match self {
            Frame::Rgb(buffer) => buffer.clone(),
            Frame::Gray(buffer) => ImageBuffer::from_fn(buffer.width(), buffer.height(), |x, y| {
                let level = buffer.get_pixel(x, y)[0];
                Rgb([level, level, level])
            }),
        }
    }

    /// Save the frame as a PNG file
    pub fn save_png<P: AsRef<Path>>(&self, path: P) -> std::result::Result<(), image::ImageError> {
        match self {
            Frame::Rgb(buffer) => buffer.save(path),
            Frame::Gray(buffer) => buffer.save(path),
        }
    }
}

/// Frame geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Exact frame rate as a reduced fraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRate {
    num: u32,
    den: u32,
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl FrameRate {
    pub fn new(num: u32, den: u32) -> Option<Self> {
        if num == 0 || den == 0 {
            return None;
        }
        let divisor = gcd(num as u64, den as u64) as u32;
        Some(Self {
            num: num / divisor,
            den: den / divisor,
        })
    }

    /// Parse ffprobe's `30000/1001` or a plain integer rate
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        match text.split_once('/') {
            Some((num, den)) => Self::new(num.trim().parse().ok()?, den.trim().parse().ok()?),
            None => Self::new(text.parse().ok()?, 1),
        }
    }

    pub fn num(&self) -> u32 {
        self.num
    }

    pub fn den(&self) -> u32 {
        self.den
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Duration of one frame in seconds
    pub fn frame_interval(&self) -> f64 {
        self.den as f64 / self.num as f64
    }

    /// Multiply by a speed factor, keeping the result exact
    pub fn scaled(&self, speed: SpeedFactor) -> Result<Self, ValidationError> {
        let (speed_num, speed_den) = speed.ratio();
        let num = self.num as u64 * speed_num as u64;
        let den = self.den as u64 * speed_den as u64;
        let divisor = gcd(num, den);

        match (u32::try_from(num / divisor), u32::try_from(den / divisor)) {
            (Ok(num), Ok(den)) => Ok(Self { num, den }),
            _ => Err(ValidationError::FrameRateOverflow {
                rate: self.to_string(),
                speed: speed.to_string(),
            }),
        }
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// A probed source file
///
/// Built by the prober and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaClip {
    path: PathBuf,
    duration_seconds: f64,
    frame_rate: FrameRate,
    resolution: Resolution,
    video_codec_tag: String,
    pixel_format: Option<String>,
    audio_codec: Option<String>,
    audio_sample_rate: Option<u32>,
    audio_channels: Option<u16>,
}

impl MediaClip {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(
        path: P,
        duration_seconds: f64,
        frame_rate: FrameRate,
        resolution: Resolution,
        video_codec_tag: S,
    ) -> Self {
        Self {
            path: path.into(),
            duration_seconds,
            frame_rate,
            resolution,
            video_codec_tag: video_codec_tag.into(),
            pixel_format: None,
            audio_codec: None,
            audio_sample_rate: None,
            audio_channels: None,
        }
    }

    pub fn with_audio<S: Into<String>>(mut self, codec: S) -> Self {
        self.audio_codec = Some(codec.into());
        self
    }

    /// Sample rate and channel count of the audio stream, when the prober reports them
    pub fn with_audio_format(mut self, sample_rate: Option<u32>, channels: Option<u16>) -> Self {
        self.audio_sample_rate = sample_rate;
        self.audio_channels = channels;
        self
    }

    pub fn with_pixel_format<S: Into<String>>(mut self, pixel_format: S) -> Self {
        self.pixel_format = Some(pixel_format.into());
        self
    }

    /// Same streams, found at another path (after a move)
    pub fn with_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = path.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }

    pub fn frame_rate(&self) -> FrameRate {
        self.frame_rate
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn video_codec_tag(&self) -> &str {
        &self.video_codec_tag
    }

    pub fn pixel_format(&self) -> Option<&str> {
        self.pixel_format.as_deref()
    }

    pub fn audio_codec(&self) -> Option<&str> {
        self.audio_codec.as_deref()
    }

    pub fn audio_sample_rate(&self) -> Option<u32> {
        self.audio_sample_rate
    }

    pub fn audio_channels(&self) -> Option<u16> {
        self.audio_channels
    }

    pub fn has_audio(&self) -> bool {
        self.audio_codec.is_some()
    }

    /// Human-readable name for logs
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// A validated `[start, end)` window inside a clip, in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    start: f64,
    end: f64,
}

impl TimeRange {
    /// Build a range; requires `0 <= start < end <= clip_duration`
    pub fn new(start: f64, end: f64, clip_duration: f64) -> Result<Self, ValidationError> {
        let valid = start.is_finite()
            && end.is_finite()
            && clip_duration.is_finite()
            && start >= 0.0
            && start < end
            && end <= clip_duration;

        if !valid {
            return Err(ValidationError::InvalidTimeRange {
                start,
                end,
                duration: clip_duration,
            });
        }
        Ok(Self { start, end })
    }

    pub fn within(clip: &MediaClip, start: f64, end: f64) -> Result<Self, ValidationError> {
        Self::new(start, end, clip.duration_seconds())
    }

    /// The whole clip
    pub fn full(clip: &MediaClip) -> Result<Self, ValidationError> {
        Self::new(0.0, clip.duration_seconds(), clip.duration_seconds())
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Playback speed, restricted to the values the editor offers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SpeedFactor {
    Half,
    ThreeQuarters,
    #[default]
    Normal,
    FiveQuarters,
    ThreeHalves,
}

impl SpeedFactor {
    pub const ALL: [SpeedFactor; 5] = [
        SpeedFactor::Half,
        SpeedFactor::ThreeQuarters,
        SpeedFactor::Normal,
        SpeedFactor::FiveQuarters,
        SpeedFactor::ThreeHalves,
    ];

    /// Exact value as `(numerator, denominator)`
    pub fn ratio(&self) -> (u32, u32) {
        match self {
            SpeedFactor::Half => (1, 2),
            SpeedFactor::ThreeQuarters => (3, 4),
            SpeedFactor::Normal => (1, 1),
            SpeedFactor::FiveQuarters => (5, 4),
            SpeedFactor::ThreeHalves => (3, 2),
        }
    }

    pub fn value(&self) -> f64 {
        let (num, den) = self.ratio();
        num as f64 / den as f64
    }

    pub fn is_normal(&self) -> bool {
        *self == SpeedFactor::Normal
    }
}

impl TryFrom<f64> for SpeedFactor {
    type Error = ValidationError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        SpeedFactor::ALL
            .into_iter()
            .find(|speed| (speed.value() - value).abs() < 1e-9)
            .ok_or_else(|| ValidationError::UnsupportedSpeed {
                value: value.to_string(),
            })
    }
}

impl FromStr for SpeedFactor {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_end_matches(['x', 'X']);
        let value: f64 = trimmed.parse().map_err(|_| ValidationError::UnsupportedSpeed {
            value: s.to_string(),
        })?;
        SpeedFactor::try_from(value)
    }
}

impl fmt::Display for SpeedFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.value())
    }
}

/// Parse `ss`, `mm:ss` or `hh:mm:ss` (fractional seconds allowed) into seconds
pub fn parse_timestamp(input: &str) -> Result<f64, ValidationError> {
    let invalid = || ValidationError::InvalidTimestamp {
        input: input.to_string(),
    };

    let parts: Vec<&str> = input.trim().split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(invalid());
    }

    let (seconds_part, whole_parts) = parts.split_last().ok_or_else(invalid)?;
    let seconds: f64 = seconds_part.parse().map_err(|_| invalid())?;
    if !seconds.is_finite() || seconds < 0.0 || (!whole_parts.is_empty() && seconds >= 60.0) {
        return Err(invalid());
    }

    let mut total = 0.0;
    for (index, part) in whole_parts.iter().enumerate() {
        let value: u32 = part.parse().map_err(|_| invalid())?;
        // minutes under an hour field must stay below 60
        if whole_parts.len() == 2 && index == 1 && value >= 60 {
            return Err(invalid());
        }
        total = total * 60.0 + value as f64;
    }

    Ok(total * 60.0 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(duration: f64) -> MediaClip {
        MediaClip::new(
            "/videos/main.mp4",
            duration,
            FrameRate::new(30, 1).unwrap(),
            Resolution::new(640, 360),
            "h264",
        )
    }

    #[test]
    fn test_time_range_invariant() {
        let clip = clip(20.0);
        assert!(TimeRange::within(&clip, 0.0, 20.0).is_ok());
        assert!(TimeRange::within(&clip, 5.0, 5.0).is_err());
        assert!(TimeRange::within(&clip, 6.0, 5.0).is_err());
        assert!(TimeRange::within(&clip, -1.0, 5.0).is_err());
        assert!(TimeRange::within(&clip, 0.0, 20.5).is_err());
        assert!(TimeRange::within(&clip, 0.0, f64::NAN).is_err());

        let range = TimeRange::within(&clip, 2.5, 7.5).unwrap();
        assert_eq!(range.duration(), 5.0);
    }

    #[test]
    fn test_speed_factor_set() {
        assert_eq!(SpeedFactor::try_from(1.25).unwrap(), SpeedFactor::FiveQuarters);
        assert!(SpeedFactor::try_from(2.0).is_err());
        assert!(SpeedFactor::try_from(0.0).is_err());
        assert_eq!("0.75x".parse::<SpeedFactor>().unwrap(), SpeedFactor::ThreeQuarters);
        assert_eq!("1.5".parse::<SpeedFactor>().unwrap(), SpeedFactor::ThreeHalves);
        assert!("fast".parse::<SpeedFactor>().is_err());
        assert_eq!(SpeedFactor::Half.to_string(), "0.5x");
    }

    #[test]
    fn test_frame_rate_scaling_is_exact() {
        let ntsc = FrameRate::parse("30000/1001").unwrap();
        assert_eq!(ntsc.scaled(SpeedFactor::Half).unwrap(), FrameRate::new(15000, 1001).unwrap());
        assert_eq!(ntsc.scaled(SpeedFactor::Normal).unwrap(), ntsc);

        let thirty = FrameRate::parse("30").unwrap();
        assert_eq!(thirty.scaled(SpeedFactor::ThreeHalves).unwrap().as_f64(), 45.0);
        assert_eq!(thirty.scaled(SpeedFactor::FiveQuarters).unwrap().to_string(), "75/2");
        assert!(FrameRate::parse("0/0").is_none());
        assert!((thirty.frame_interval() - 1.0 / 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_frame_rate_scaling_overflow_is_rejected() {
        // odd numerator and denominator, so nothing cancels against 5/4
        let huge = FrameRate::new(u32::MAX, 7).unwrap();
        assert_eq!(
            huge.scaled(SpeedFactor::FiveQuarters),
            Err(ValidationError::FrameRateOverflow {
                rate: format!("{}/7", u32::MAX),
                speed: "1.25x".to_string(),
            })
        );

        let tiny_den = FrameRate::new(1, u32::MAX).unwrap();
        assert!(tiny_den.scaled(SpeedFactor::ThreeQuarters).is_err());
        assert_eq!(huge.scaled(SpeedFactor::Normal).unwrap(), huge);
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("90").unwrap(), 90.0);
        assert_eq!(parse_timestamp("01:30").unwrap(), 90.0);
        assert_eq!(parse_timestamp("1:02:03.5").unwrap(), 3723.5);
        assert_eq!(parse_timestamp("00:00").unwrap(), 0.0);
        assert!(parse_timestamp("1:75").is_err());
        assert!(parse_timestamp("1:60:00").is_err());
        assert!(parse_timestamp("a:b").is_err());
        assert!(parse_timestamp("1:2:3:4").is_err());
        assert!(parse_timestamp("").is_err());
    }

    #[test]
    fn test_supported_containers() {
        assert!(is_supported_container("a.mp4"));
        assert!(is_supported_container("A.MOV"));
        assert!(is_supported_container("/x/y.avi"));
        assert!(!is_supported_container("clip.mkv"));
        assert!(!is_supported_container("noext"));

        assert_eq!(container_of("/out/Final.MOV"), Some("mov"));
        assert_eq!(container_of("clip.avi"), Some("avi"));
        assert_eq!(container_of("clip.webm"), None);
    }

    #[test]
    fn test_frame_layouts() {
        let frame = Frame::new_filled(4, 2, [10, 20, 30]);
        assert_eq!(frame.layout(), PixelLayout::Rgb24);
        assert_eq!(frame.as_raw().len(), PixelLayout::Rgb24.frame_size(frame.resolution()));

        let gray = Frame::new_gray(4, 2, 7);
        assert_eq!(gray.channels(), 1);
        assert_eq!(gray.to_rgb().get_pixel(3, 1).0, [7, 7, 7]);

        assert!(Frame::from_raw(PixelLayout::Gray8, 4, 2, vec![0; 8]).is_some());
        assert!(Frame::from_raw(PixelLayout::Rgb24, 4, 2, vec![0; 8]).is_none());
    }
}
