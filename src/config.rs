use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Main configuration for the clip compositor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// External tool locations and limits
    pub tools: ToolConfig,

    /// Video encoding settings
    pub video: VideoConfig,

    /// Audio encoding settings
    pub audio: AudioConfig,

    /// Merge settings
    pub merge: MergeConfig,

    /// Mux settings
    pub mux: MuxConfig,

    /// Pipeline execution settings
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound { path: path.display().to_string() })?;

        let config: Config = toml::from_str(&content)
            .map_err(|_| ConfigError::ParseFailed { path: path.display().to_string() })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::InvalidValue {
                key: "config".to_string(),
                value: e.to_string()
            })?;

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.tools.validate()?;
        self.video.validate()?;
        self.merge.validate()?;
        self.mux.validate()?;
        self.pipeline.validate()?;
        Ok(())
    }
}

fn invalid(key: &str, value: impl ToString) -> crate::error::CompositorError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
    .into()
}

/// Where to find ffmpeg/ffprobe and how long to let them run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Explicit ffmpeg path; looked up on PATH when unset
    pub ffmpeg: Option<PathBuf>,

    /// Explicit ffprobe path; looked up on PATH when unset
    pub ffprobe: Option<PathBuf>,

    /// Deadline in seconds for each tool run, frame pipes included
    pub timeout_secs: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            ffmpeg: None,
            ffprobe: None,
            timeout_secs: 600,
        }
    }
}

impl ToolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(invalid("tools.timeout_secs", self.timeout_secs));
        }
        Ok(())
    }
}

/// Video encoding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Encoder used for filtered and normalized video
    pub codec: String,

    /// Encoder speed preset
    pub preset: String,

    /// Quality setting (0-100, higher is better)
    pub quality: u8,

    /// Output pixel format for color output
    pub pixel_format: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            preset: "medium".to_string(),
            quality: 85,
            pixel_format: "yuv420p".to_string(),
        }
    }
}

impl VideoConfig {
    /// Map the 0-100 quality scale onto x264's CRF scale
    pub fn crf(&self) -> u8 {
        (51 - ((self.quality as f32 / 100.0) * 51.0) as u8).clamp(0, 51)
    }

    fn validate(&self) -> Result<()> {
        if self.quality > 100 {
            return Err(invalid("video.quality", self.quality));
        }
        if self.codec.trim().is_empty() {
            return Err(invalid("video.codec", &self.codec));
        }
        Ok(())
    }
}

/// Audio encoding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Codec the muxer re-encodes audio into
    pub codec: String,

    /// Target bitrate
    pub bitrate: String,

    /// Sample rate used for the silent track added during normalization
    pub sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            codec: "aac".to_string(),
            bitrate: "192k".to_string(),
            sample_rate: 48_000,
        }
    }
}

/// Merge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Largest number of clips a merge job may contain
    pub max_clips: usize,

    /// Re-encode incompatible clips to a common profile instead of failing
    pub normalize_incompatible: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_clips: 6,
            normalize_incompatible: false,
        }
    }
}

impl MergeConfig {
    fn validate(&self) -> Result<()> {
        if self.max_clips == 0 {
            return Err(invalid("merge.max_clips", self.max_clips));
        }
        Ok(())
    }
}

/// Mux configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    /// Largest accepted audio/video length difference, in video frame intervals
    pub tolerance_frames: f64,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self { tolerance_frames: 1.0 }
    }
}

impl MuxConfig {
    fn validate(&self) -> Result<()> {
        if !(self.tolerance_frames.is_finite() && self.tolerance_frames >= 0.0) {
            return Err(invalid("mux.tolerance_frames", self.tolerance_frames));
        }
        Ok(())
    }
}

/// Pipeline execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Run the frame transcoder and audio retimer concurrently
    pub parallel_stages: bool,

    /// Threads used by the filter kernels
    pub processing_threads: usize,

    /// Frames filtered per parallel batch
    pub frame_batch_size: usize,

    /// Parent directory for per-job workspaces; system temp dir when unset
    pub temp_root: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parallel_stages: true,
            processing_threads: num_cpus::get(),
            frame_batch_size: 32,
            temp_root: None,
        }
    }
}

impl PipelineConfig {
    fn validate(&self) -> Result<()> {
        if self.processing_threads == 0 {
            return Err(invalid("pipeline.processing_threads", self.processing_threads));
        }
        if self.frame_batch_size == 0 {
            return Err(invalid("pipeline.frame_batch_size", self.frame_batch_size));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("test_config.toml");

        let mut original_config = Config::default();
        original_config.merge.normalize_incompatible = true;
        original_config.tools.ffmpeg = Some(PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));

        original_config.save_to_file(&file_path).unwrap();
        let loaded_config = Config::from_file(&file_path).unwrap();

        assert!(loaded_config.merge.normalize_incompatible);
        assert_eq!(loaded_config.tools.ffmpeg, original_config.tools.ffmpeg);
        assert_eq!(loaded_config.video.quality, original_config.video.quality);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("partial.toml");
        std::fs::write(&file_path, "[merge]\nmax_clips = 3\n").unwrap();

        let config = Config::from_file(&file_path).unwrap();
        assert_eq!(config.merge.max_clips, 3);
        assert_eq!(config.audio.codec, "aac");
        assert_eq!(config.tools.timeout_secs, 600);
    }

    #[test]
    fn test_missing_file() {
        let result = Config::from_file("/definitely/not/here.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        config.pipeline.frame_batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.mux.tolerance_frames = -1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.tools.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_quality_to_crf() {
        let mut video = VideoConfig::default();
        video.quality = 100;
        assert_eq!(video.crf(), 0);
        video.quality = 0;
        assert_eq!(video.crf(), 51);
    }
}
