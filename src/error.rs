use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Pipeline stage an error or log line belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Validate,
    Probe,
    Transcode,
    ExtractAudio,
    RetimeAudio,
    Mux,
    Normalize,
    Concat,
    Split,
    TrimAd,
    Publish,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Probe => "probe",
            Stage::Transcode => "transcode",
            Stage::ExtractAudio => "extract-audio",
            Stage::RetimeAudio => "retime-audio",
            Stage::Mux => "mux",
            Stage::Normalize => "normalize",
            Stage::Concat => "concat",
            Stage::Split => "split",
            Stage::TrimAd => "trim-ad",
            Stage::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the clip compositor
#[derive(Error, Debug)]
pub enum CompositorError {
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("{0}")]
    Process(#[from] ProcessFailure),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job cancelled before stage '{stage}'")]
    Cancelled { stage: Stage },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Caller mistakes, rejected before any external process runs
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("time range {start}s..{end}s is invalid for a {duration}s clip")]
    InvalidTimeRange { start: f64, end: f64, duration: f64 },

    #[error("unsupported speed {value}x (allowed: 0.5, 0.75, 1, 1.25, 1.5)")]
    UnsupportedSpeed { value: String },

    #[error("unknown filter '{name}'")]
    UnknownFilter { name: String },

    #[error("merge order {order} is assigned to more than one clip")]
    DuplicateOrder { order: u32 },

    #[error("merge orders must be exactly 1..={count}, found {order}")]
    OrderOutOfRange { order: u32, count: usize },

    #[error("merge needs at least one clip")]
    EmptyMerge,

    #[error("merge accepts at most {max} clips, got {count}")]
    TooManyClips { count: usize, max: usize },

    #[error("insert point {at}s must lie strictly inside the {duration}s main clip")]
    InvalidInsertPoint { at: f64, duration: f64 },

    #[error("ad duration {requested}s must be positive and at most {available}s")]
    InvalidAdDuration { requested: f64, available: f64 },

    #[error("unsupported container '{}' (expected .mp4, .avi or .mov)", path.display())]
    UnsupportedContainer { path: PathBuf },

    #[error("invalid timestamp '{input}'")]
    InvalidTimestamp { input: String },

    #[error("recurring ad interval {at}s is shorter than the {min}s minimum")]
    AdIntervalTooShort { at: f64, min: f64 },

    #[error("recurring placement would insert {count} ads, at most {max} are allowed")]
    TooManyAds { count: usize, max: usize },

    #[error("frame rate {rate} at {speed} does not fit a 32-bit fraction")]
    FrameRateOverflow { rate: String, speed: String },
}

/// Source-side and tooling failures
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("source not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    #[error("failed to decode {}: {reason}", path.display())]
    DecodeFailed { path: PathBuf, reason: String },

    #[error("{} has no audio stream", path.display())]
    NoAudioStream { path: PathBuf },

    #[error("required tool '{tool}' not found")]
    ToolNotFound { tool: String },

    #[error("could not read probe output for {}: {reason}", path.display())]
    ProbeFailed { path: PathBuf, reason: String },

    #[error("stream ended after {decoded} of {expected} frames in {}", path.display())]
    PrematureEnd {
        path: PathBuf,
        decoded: u64,
        expected: u64,
    },
}

/// An external tool exited unsuccessfully or hung
#[derive(Error, Debug)]
pub enum ProcessFailure {
    #[error("{program} failed during {stage} (exit code {}): {stderr}", code_label(*exit_code))]
    NonZeroExit {
        stage: Stage,
        program: String,
        args: Vec<String>,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("{program} timed out after {seconds}s during {stage}")]
    Timeout {
        stage: Stage,
        program: String,
        args: Vec<String>,
        seconds: u64,
    },
}

fn code_label(code: Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string())
}

/// Output-side incompatibilities
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("encoder error during {stage}: {reason}")]
    Encode { stage: Stage, reason: String },

    #[error("mux failed: {reason}")]
    Mux { reason: String },

    #[error("video {video:.3}s and audio {audio:.3}s differ by more than {tolerance:.3}s")]
    DurationMismatch {
        video: f64,
        audio: f64,
        tolerance: f64,
    },

    #[error("clips cannot be stream-copied together: {details}")]
    FormatMismatch { details: String },

    #[error("{stage} produced an unusable file {}: {reason}", path.display())]
    InvalidOutput {
        stage: Stage,
        path: PathBuf,
        reason: String,
    },
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file: {path}")]
    ParseFailed { path: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },
}

/// Convenience type alias for Results using CompositorError
pub type Result<T> = std::result::Result<T, CompositorError>;

impl CompositorError {
    pub fn encode<S: Into<String>>(stage: Stage, reason: S) -> Self {
        OutputError::Encode {
            stage,
            reason: reason.into(),
        }
        .into()
    }

    pub fn invalid_output<S: Into<String>>(stage: Stage, path: impl Into<PathBuf>, reason: S) -> Self {
        OutputError::InvalidOutput {
            stage,
            path: path.into(),
            reason: reason.into(),
        }
        .into()
    }

    /// True for errors caused by the request itself; nothing ran and nothing
    /// needs cleaning up.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Stage the failure happened in, when known
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Validation(_) => Some(Stage::Validate),
            Self::Process(ProcessFailure::NonZeroExit { stage, .. })
            | Self::Process(ProcessFailure::Timeout { stage, .. }) => Some(*stage),
            Self::Output(OutputError::Encode { stage, .. })
            | Self::Output(OutputError::InvalidOutput { stage, .. }) => Some(*stage),
            Self::Output(OutputError::Mux { .. })
            | Self::Output(OutputError::DurationMismatch { .. }) => Some(Stage::Mux),
            Self::Cancelled { stage } => Some(*stage),
            _ => None,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Media(MediaError::SourceNotFound { path }) => {
                format!("Could not find '{}'. Please check the file exists.", path.display())
            }
            Self::Media(MediaError::ToolNotFound { tool }) => {
                format!("'{}' is not installed or not on PATH. Please install FFmpeg.", tool)
            }
            Self::Media(MediaError::NoAudioStream { path }) => {
                format!("'{}' has no audio. Enable mute to process it as video only.", path.display())
            }
            Self::Validation(ValidationError::DuplicateOrder { .. }) => {
                "Each video must have a unique order.".to_string()
            }
            Self::Output(OutputError::FormatMismatch { details }) => {
                format!("These clips use different formats ({}). Enable normalization to merge them.", details)
            }
            Self::Process(ProcessFailure::NonZeroExit { program, stage, exit_code, .. }) => {
                format!("{} failed while running the {} step (exit code {}).", program, stage, code_label(*exit_code))
            }
            _ => self.to_string(),
        }
    }
}
