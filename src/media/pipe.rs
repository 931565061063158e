//! Raw-video pipes to and from ffmpeg.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{CompositorError, MediaError, ProcessFailure, Result, Stage};
use crate::media::backend::{
    read_all, spawn_error, stderr_tail, timed_out, tool_runtime, DecodeSpec, EncodeSpec, FrameReader, FrameWriter,
};
use crate::media::command::{seconds_arg, FfmpegCommand, Invocation};
use crate::media::types::{Frame, PixelLayout, Resolution};

/// Build the decoder invocation: seek, limit, raw rgb24 on stdout
pub fn decoder_invocation(command: FfmpegCommand, spec: &DecodeSpec) -> Invocation {
    command
        .seek(spec.range.start())
        .input(&spec.source)
        .duration(spec.range.duration())
        .flag("-an")
        .opt("-f", "rawvideo")
        .opt("-pix_fmt", PixelLayout::Rgb24.ffmpeg_name())
        .opt("-s", spec.resolution.to_string())
        .output_pipe()
}

/// Build the encoder invocation: raw frames on stdin, video-only file out
pub fn encoder_invocation(command: FfmpegCommand, spec: &EncodeSpec) -> Invocation {
    command
        .opt("-f", "rawvideo")
        .opt("-pix_fmt", spec.input_layout.ffmpeg_name())
        .opt("-s", spec.resolution.to_string())
        .opt("-r", spec.frame_rate.to_string())
        .opt("-i", "-")
        .flag("-an")
        .opt("-c:v", &spec.codec)
        .opt("-preset", &spec.preset)
        .opt("-crf", spec.crf.to_string())
        .opt("-pix_fmt", &spec.output_pixel_format)
        .output(&spec.output)
}

/// Fill `buffer` from `reader`, returning how many bytes arrived before EOF
async fn fill<R: AsyncRead + Unpin>(reader: &mut R, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Frames decoded by an ffmpeg child process
///
/// The whole decode shares one deadline, measured from spawn; a child still
/// running when it passes is killed and reported as a timeout.
pub struct PipeDecoder {
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    invocation: Invocation,
    timeout: Duration,
    deadline: Instant,
    source: PathBuf,
    resolution: Resolution,
    frame_size: usize,
    finished: bool,
    runtime: Runtime,
}

impl PipeDecoder {
    pub fn spawn(command: FfmpegCommand, spec: &DecodeSpec, timeout: Duration) -> Result<Self> {
        let invocation = decoder_invocation(command, spec);
        debug!("[{}] decoder: {}", Stage::Transcode, invocation);

        let runtime = tool_runtime()?;
        let mut child = {
            let _context = runtime.enter();
            invocation
                .to_command()
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|e| spawn_error(&invocation, e))?
        };

        let frame_size = PixelLayout::Rgb24.frame_size(spec.resolution);
        let stdout = child.stdout.take().ok_or_else(|| MediaError::DecodeFailed {
            path: spec.source.clone(),
            reason: "decoder stdout unavailable".to_string(),
        })?;
        let stderr = child.stderr.take().map(|pipe| runtime.spawn(read_all(pipe)));

        Ok(Self {
            child,
            stdout: BufReader::with_capacity(frame_size * 2, stdout),
            stderr,
            invocation,
            timeout,
            deadline: Instant::now() + timeout,
            source: spec.source.clone(),
            resolution: spec.resolution,
            frame_size,
            finished: false,
            runtime,
        })
    }

    fn decode_error(&self, reason: String) -> CompositorError {
        MediaError::DecodeFailed {
            path: self.source.clone(),
            reason,
        }
        .into()
    }

    /// Kill the child and report the deadline
    fn expire(&mut self) -> CompositorError {
        self.finished = true;
        let _ = self.child.start_kill();
        timed_out(Stage::Transcode, &self.invocation, self.timeout)
    }

    /// Reap the child after EOF; a failed exit carries its stderr
    fn reap(&mut self) -> Result<()> {
        self.finished = true;
        let deadline = self.deadline;
        let (child, stderr) = (&mut self.child, self.stderr.take());
        let waited = self.runtime.block_on(async move {
            let status = tokio::time::timeout_at(deadline, child.wait()).await;
            let stderr = match stderr {
                Some(handle) if matches!(status, Ok(Ok(_))) => handle.await.unwrap_or_default(),
                _ => Vec::new(),
            };
            (status, stderr)
        });

        match waited {
            (Err(_), _) => Err(self.expire()),
            (Ok(status), stderr) => {
                if status?.success() {
                    Ok(())
                } else {
                    Err(self.decode_error(stderr_tail(&stderr)))
                }
            }
        }
    }
}

impl FrameReader for PipeDecoder {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }

        let mut buffer = vec![0u8; self.frame_size];
        let deadline = self.deadline;
        let stdout = &mut self.stdout;
        let read = self
            .runtime
            .block_on(async { tokio::time::timeout_at(deadline, fill(stdout, &mut buffer)).await });

        let filled = match read {
            Ok(filled) => filled?,
            Err(_) => return Err(self.expire()),
        };

        if filled == 0 {
            self.reap()?;
            return Ok(None);
        }
        if filled < self.frame_size {
            self.finished = true;
            return Err(self.decode_error(format!(
                "stream ended mid-frame ({} of {} bytes)",
                filled, self.frame_size
            )));
        }

        let frame = Frame::from_raw(
            PixelLayout::Rgb24,
            self.resolution.width,
            self.resolution.height,
            buffer,
        )
        .ok_or_else(|| self.decode_error("frame buffer has the wrong size".to_string()))?;
        Ok(Some(frame))
    }
}

/// Frames encoded by an ffmpeg child process
///
/// Writes and the final wait share one deadline, measured from spawn.
pub struct PipeEncoder {
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
    invocation: Invocation,
    spec: EncodeSpec,
    timeout: Duration,
    deadline: Instant,
    frames_written: u64,
    runtime: Runtime,
}

impl PipeEncoder {
    pub fn spawn(command: FfmpegCommand, spec: &EncodeSpec, timeout: Duration) -> Result<Self> {
        let invocation = encoder_invocation(command, spec);
        debug!("[{}] encoder: {}", Stage::Transcode, invocation);

        let runtime = tool_runtime()?;
        let mut child = {
            let _context = runtime.enter();
            invocation
                .to_command()
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|e| spawn_error(&invocation, e))?
        };

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CompositorError::encode(Stage::Transcode, "encoder stdin unavailable"))?;
        let stderr = child.stderr.take().map(|pipe| runtime.spawn(read_all(pipe)));

        Ok(Self {
            child,
            stdin: Some(BufWriter::with_capacity(spec.input_layout.frame_size(spec.resolution), stdin)),
            stderr,
            invocation,
            spec: spec.clone(),
            timeout,
            deadline: Instant::now() + timeout,
            frames_written: 0,
            runtime,
        })
    }

    fn collect_stderr(&mut self) -> String {
        let deadline = self.deadline;
        match self.stderr.take() {
            Some(handle) => self
                .runtime
                .block_on(async move { tokio::time::timeout_at(deadline, handle).await })
                .ok()
                .and_then(|joined| joined.ok())
                .map(|bytes| stderr_tail(&bytes))
                .unwrap_or_default(),
            None => String::new(),
        }
    }

    /// Kill the child and report the deadline
    fn expire(&mut self) -> CompositorError {
        self.stdin = None;
        let _ = self.child.start_kill();
        timed_out(Stage::Transcode, &self.invocation, self.timeout)
    }

    /// The encoder went away mid-stream; report why
    fn broken_pipe(&mut self) -> CompositorError {
        self.stdin = None;
        let deadline = self.deadline;
        let child = &mut self.child;
        if self
            .runtime
            .block_on(async move { tokio::time::timeout_at(deadline, child.wait()).await })
            .is_err()
        {
            return self.expire();
        }
        let stderr = self.collect_stderr();
        CompositorError::encode(
            Stage::Transcode,
            format!(
                "encoder for {} exited after {} frames: {}",
                self.spec.output.display(),
                self.frames_written,
                stderr
            ),
        )
    }
}

impl FrameWriter for PipeEncoder {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.layout() != self.spec.input_layout {
            return Err(CompositorError::encode(
                Stage::Transcode,
                format!(
                    "frame has {} channel(s) but the encoder expects {}",
                    frame.channels(),
                    self.spec.input_layout.channels()
                ),
            ));
        }
        if frame.resolution() != self.spec.resolution {
            return Err(CompositorError::encode(
                Stage::Transcode,
                format!("frame is {} but the encoder expects {}", frame.resolution(), self.spec.resolution),
            ));
        }

        let deadline = self.deadline;
        let written = match self.stdin.as_mut() {
            Some(stdin) => self
                .runtime
                .block_on(async { tokio::time::timeout_at(deadline, stdin.write_all(frame.as_raw())).await }),
            None => return Err(self.broken_pipe()),
        };
        match written {
            Ok(Ok(())) => {
                self.frames_written += 1;
                Ok(())
            }
            Ok(Err(e)) if e.kind() == ErrorKind::BrokenPipe => Err(self.broken_pipe()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(self.expire()),
        }
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        let deadline = self.deadline;
        let stdin = self.stdin.take();
        let child = &mut self.child;
        let waited = self.runtime.block_on(async move {
            tokio::time::timeout_at(deadline, async move {
                if let Some(mut stdin) = stdin {
                    if let Err(e) = stdin.shutdown().await {
                        if e.kind() != ErrorKind::BrokenPipe {
                            return Err(e);
                        }
                    }
                }
                child.wait().await
            })
            .await
        });

        let status = match waited {
            Ok(status) => status?,
            Err(_) => return Err(self.expire()),
        };
        if !status.success() {
            let stderr = self.collect_stderr();
            return Err(ProcessFailure::NonZeroExit {
                stage: Stage::Transcode,
                program: self.invocation.program_name(),
                args: self.invocation.args_lossy(),
                exit_code: status.code(),
                stderr,
            }
            .into());
        }

        debug!(
            "Encoder wrote {} frames to {} at {} fps",
            self.frames_written,
            self.spec.output.display(),
            seconds_arg(self.spec.frame_rate.as_f64())
        );
        Ok(())
    }
}
