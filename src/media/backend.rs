//! The seam between the pipeline and the outside world.
//!
//! Every external-tool interaction (probing, running an invocation, streaming
//! frames in and out) goes through [`MediaBackend`]. All methods block, some
//! for a long time; callers on an async runtime or UI thread must offload
//! them (see `ClipEngine`'s async wrappers).

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::runtime::{self, Runtime};
use tracing::debug;

use crate::config::ToolConfig;
use crate::error::{CompositorError, MediaError, ProcessFailure, Result, Stage};
use crate::media::command::{FfmpegCommand, Invocation};
use crate::media::pipe::{PipeDecoder, PipeEncoder};
use crate::media::probe;
use crate::media::types::{Frame, FrameRate, MediaClip, PixelLayout, Resolution, TimeRange};

/// Sequential source of decoded frames
pub trait FrameReader: Send {
    /// Next frame, or None at end of stream
    fn read_frame(&mut self) -> Result<Option<Frame>>;
}

/// Sequential sink for frames to encode
pub trait FrameWriter: Send {
    /// Queue one frame; rejects frames that do not match the encoder setup
    fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    /// Flush, wait for the encoder, and report how it exited
    fn finish(self: Box<Self>) -> Result<()>;
}

/// What to decode
#[derive(Debug, Clone)]
pub struct DecodeSpec {
    pub source: PathBuf,
    pub range: TimeRange,
    pub resolution: Resolution,
    pub frame_rate: FrameRate,
}

/// How to encode
#[derive(Debug, Clone)]
pub struct EncodeSpec {
    pub output: PathBuf,
    pub resolution: Resolution,
    pub input_layout: PixelLayout,
    pub frame_rate: FrameRate,
    pub codec: String,
    pub preset: String,
    pub crf: u8,
    pub output_pixel_format: String,
}

/// Access to the codec/container tool and the frame codec
pub trait MediaBackend: Send + Sync {
    /// Probe a container into a clip description
    fn probe(&self, path: &Path) -> Result<MediaClip>;

    /// Start an ffmpeg invocation with the standard preamble
    fn ffmpeg(&self) -> FfmpegCommand;

    /// Run an invocation to completion; nonzero exit is a `ProcessFailure`
    fn run(&self, stage: Stage, invocation: &Invocation) -> Result<()>;

    fn open_decoder(&self, spec: &DecodeSpec) -> Result<Box<dyn FrameReader>>;

    fn open_encoder(&self, spec: &EncodeSpec) -> Result<Box<dyn FrameWriter>>;
}

/// Backend driving the ffmpeg and ffprobe executables
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    timeout: Duration,
}

impl FfmpegBackend {
    /// Resolve both tools from the configuration or PATH
    pub fn new(config: &ToolConfig) -> Result<Self> {
        Ok(Self {
            ffmpeg: resolve_tool("ffmpeg", config.ffmpeg.as_deref())?,
            ffprobe: resolve_tool("ffprobe", config.ffprobe.as_deref())?,
            timeout: config.timeout(),
        })
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg
    }

    pub fn ffprobe_path(&self) -> &Path {
        &self.ffprobe
    }
}

/// Get the path to a tool, preferring a configured path over PATH lookup
pub fn resolve_tool(name: &str, configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
    }

    which::which(name).map_err(|_| {
        MediaError::ToolNotFound {
            tool: name.to_string(),
        }
        .into()
    })
}

impl MediaBackend for FfmpegBackend {
    fn probe(&self, path: &Path) -> Result<MediaClip> {
        if !path.exists() {
            return Err(MediaError::SourceNotFound { path: path.to_path_buf() }.into());
        }

        let invocation = Invocation::new(&self.ffprobe)
            .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path);

        let stdout = execute(Stage::Probe, &invocation, self.timeout, true)?;
        probe::parse_ffprobe_json(path, &stdout)
    }

    fn ffmpeg(&self) -> FfmpegCommand {
        FfmpegCommand::new(&self.ffmpeg)
    }

    fn run(&self, stage: Stage, invocation: &Invocation) -> Result<()> {
        execute(stage, invocation, self.timeout, false).map(|_| ())
    }

    fn open_decoder(&self, spec: &DecodeSpec) -> Result<Box<dyn FrameReader>> {
        Ok(Box::new(PipeDecoder::spawn(self.ffmpeg(), spec, self.timeout)?))
    }

    fn open_encoder(&self, spec: &EncodeSpec) -> Result<Box<dyn FrameWriter>> {
        Ok(Box::new(PipeEncoder::spawn(self.ffmpeg(), spec, self.timeout)?))
    }
}

/// Read a child pipe to the end
pub(crate) async fn read_all<R: AsyncRead + Unpin>(mut pipe: R) -> Vec<u8> {
    let mut buffer = Vec::new();
    let _ = pipe.read_to_end(&mut buffer).await;
    buffer
}

/// Single-threaded runtime that drives one tool's pipes and deadline
///
/// Only built on blocking threads; the pipeline never calls into a backend
/// from async code.
pub(crate) fn tool_runtime() -> Result<Runtime> {
    Ok(runtime::Builder::new_current_thread().enable_all().build()?)
}

/// Keep the last few lines of stderr for error reports
pub(crate) fn stderr_tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join(" | ")
}

pub(crate) fn spawn_error(invocation: &Invocation, err: std::io::Error) -> CompositorError {
    if err.kind() == std::io::ErrorKind::NotFound {
        MediaError::ToolNotFound {
            tool: invocation.program_name(),
        }
        .into()
    } else {
        err.into()
    }
}

pub(crate) fn timed_out(stage: Stage, invocation: &Invocation, timeout: Duration) -> CompositorError {
    ProcessFailure::Timeout {
        stage,
        program: invocation.program_name(),
        args: invocation.args_lossy(),
        seconds: timeout.as_secs(),
    }
    .into()
}

/// Run an invocation with a deadline, returning captured stdout
fn execute(stage: Stage, invocation: &Invocation, timeout: Duration, capture_stdout: bool) -> Result<Vec<u8>> {
    debug!("[{}] {}", stage, invocation);

    let mut command = invocation.to_command();
    command
        .stdin(Stdio::null())
        .stdout(if capture_stdout { Stdio::piped() } else { Stdio::null() })
        .stderr(Stdio::piped());

    let output = tool_runtime()?.block_on(async {
        let child = command.spawn().map_err(|e| spawn_error(invocation, e))?;
        // dropping the timed-out future drops the child, which kills it
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => Ok(output?),
            Err(_) => Err(timed_out(stage, invocation, timeout)),
        }
    })?;

    if !output.status.success() {
        return Err(ProcessFailure::NonZeroExit {
            stage,
            program: invocation.program_name(),
            args: invocation.args_lossy(),
            exit_code: output.status.code(),
            stderr: stderr_tail(&output.stderr),
        }
        .into());
    }

    Ok(output.stdout)
}
