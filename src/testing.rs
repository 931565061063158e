//! In-process stand-in for ffmpeg/ffprobe used by the unit tests.
//!
//! Media files are small JSON documents describing streams and a content
//! timeline of `(source, start, end)` segments. Invocations are interpreted
//! just far enough to trim, concatenate, normalize and mux those timelines,
//! so tests can assert on what ended up in an output and in what order.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{CompositorError, MediaError, ProcessFailure, Result, Stage};
use crate::media::backend::{DecodeSpec, EncodeSpec, FrameReader, FrameWriter, MediaBackend};
use crate::media::command::{FfmpegCommand, Invocation};
use crate::media::types::{Frame, FrameRate, MediaClip, Resolution};

const WAV_SAMPLE_RATE: u32 = 8_000;

/// Audio format of sources and of outputs whose audio has no file input
const DEFAULT_AUDIO_FORMAT: (u32, u16) = (48_000, 2);

/// Stream layout of a simulated source file
#[derive(Debug, Clone)]
pub struct SourceSpec {
    duration: f64,
    fps: u32,
    width: u32,
    height: u32,
    audio: Option<String>,
    audio_format: (u32, u16),
}

impl SourceSpec {
    /// h264/yuv420p video with 48 kHz stereo AAC audio at 64x36
    pub fn new(duration: f64, fps: u32) -> Self {
        Self {
            duration,
            fps,
            width: 64,
            height: 36,
            audio: Some("aac".to_string()),
            audio_format: DEFAULT_AUDIO_FORMAT,
        }
    }

    pub fn audio_format(mut self, sample_rate: u32, channels: u16) -> Self {
        self.audio_format = (sample_rate, channels);
        self
    }

    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn without_audio(mut self) -> Self {
        self.audio = None;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Segment {
    label: String,
    start: f64,
    end: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SimMedia {
    duration: f64,
    fps_num: u32,
    fps_den: u32,
    width: u32,
    height: u32,
    codec: String,
    pixel_format: String,
    audio: Option<String>,
    #[serde(default)]
    audio_format: Option<(u32, u16)>,
    segments: Vec<Segment>,
}

impl SimMedia {
    fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).map_err(|_| MediaError::SourceNotFound {
            path: path.to_path_buf(),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            MediaError::ProbeFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec(self)
            .map_err(|e| CompositorError::invalid_output(Stage::Probe, path, e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }

    /// The part of this timeline between `from` and `from + length`
    fn slice(&self, from: f64, length: Option<f64>) -> SimMedia {
        let from = from.clamp(0.0, self.duration);
        let to = length.map_or(self.duration, |l| (from + l).min(self.duration));

        let mut segments = Vec::new();
        let mut position = 0.0;
        for segment in &self.segments {
            let span = segment.end - segment.start;
            let lo = from.max(position);
            let hi = to.min(position + span);
            if hi - lo > 1e-9 {
                segments.push(Segment {
                    label: segment.label.clone(),
                    start: segment.start + (lo - position),
                    end: segment.start + (hi - position),
                });
            }
            position += span;
        }

        SimMedia {
            duration: to - from,
            segments,
            ..self.clone()
        }
    }

    fn to_clip(&self, path: &Path) -> Result<MediaClip> {
        let rate = FrameRate::new(self.fps_num, self.fps_den).ok_or_else(|| MediaError::ProbeFailed {
            path: path.to_path_buf(),
            reason: "zero frame rate".to_string(),
        })?;
        let clip = MediaClip::new(path, self.duration, rate, Resolution::new(self.width, self.height), &self.codec)
            .with_pixel_format(&self.pixel_format);
        Ok(match (&self.audio, self.audio_format) {
            (Some(codec), Some((rate, channels))) => clip.with_audio(codec).with_audio_format(Some(rate), Some(channels)),
            (Some(codec), None) => clip.with_audio(codec),
            (None, _) => clip,
        })
    }
}

fn codec_tag(encoder: &str) -> String {
    match encoder {
        "libx264" => "h264".to_string(),
        "libx265" => "hevc".to_string(),
        other => other.to_string(),
    }
}

fn label_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[derive(Debug, Default)]
struct SimState {
    runs: Vec<(Stage, Invocation)>,
    fail: HashSet<Stage>,
    decode_limit: Option<u64>,
    last_encode: Option<EncodeSpec>,
}

/// Media backend that fakes every tool in-process
#[derive(Debug, Default)]
pub struct SimulatedBackend {
    state: Mutex<SimState>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a source file at `path` and return its probe
    pub fn add_source<P: AsRef<Path>>(&self, path: P, spec: SourceSpec) -> MediaClip {
        let path = path.as_ref();
        let media = SimMedia {
            duration: spec.duration,
            fps_num: spec.fps,
            fps_den: 1,
            width: spec.width,
            height: spec.height,
            codec: "h264".to_string(),
            pixel_format: "yuv420p".to_string(),
            audio_format: spec.audio.as_ref().map(|_| spec.audio_format),
            audio: spec.audio,
            segments: vec![Segment {
                label: label_of(path),
                start: 0.0,
                end: spec.duration,
            }],
        };
        media.save(path).unwrap();
        media.to_clip(path).unwrap()
    }

    /// Every `run` invocation so far, failed ones included
    pub fn invocations(&self) -> Vec<Invocation> {
        self.state.lock().unwrap().runs.iter().map(|(_, inv)| inv.clone()).collect()
    }

    /// Stage of every `run` invocation so far
    /// Every `run` so far with the stage it ran for
    pub fn runs(&self) -> Vec<(Stage, Invocation)> {
        self.state.lock().unwrap().runs.clone()
    }

    pub fn stages_run(&self) -> Vec<Stage> {
        self.state.lock().unwrap().runs.iter().map(|(stage, _)| *stage).collect()
    }

    /// Make every later invocation at `stage` exit nonzero
    pub fn fail_at(&self, stage: Stage) {
        self.state.lock().unwrap().fail.insert(stage);
    }

    /// Make decoders hit end of stream after `frames` frames
    pub fn truncate_decode_after(&self, frames: u64) {
        self.state.lock().unwrap().decode_limit = Some(frames);
    }

    pub fn last_encode_spec(&self) -> Option<EncodeSpec> {
        self.state.lock().unwrap().last_encode.clone()
    }

    /// Content timeline of a simulated file as `(source name, start, end)`
    pub fn content_of(&self, path: &Path) -> Vec<(String, f64, f64)> {
        SimMedia::load(path)
            .unwrap()
            .segments
            .into_iter()
            .map(|s| (s.label, s.start, s.end))
            .collect()
    }

    fn should_fail(&self, stage: Stage) -> bool {
        self.state.lock().unwrap().fail.contains(&stage)
    }
}

fn failure(stage: Stage, invocation: &Invocation) -> CompositorError {
    ProcessFailure::NonZeroExit {
        stage,
        program: invocation.program_name(),
        args: invocation.args_lossy(),
        exit_code: Some(1),
        stderr: "simulated failure".to_string(),
    }
    .into()
}

/// One `-i` of an invocation
enum SimInput {
    File(SimMedia),
    /// PCM written by a retime run
    Wav,
    /// `anullsrc` from lavfi
    Silence,
}

impl SimInput {
    fn has_audio(&self) -> bool {
        match self {
            SimInput::File(media) => media.audio.is_some(),
            SimInput::Wav | SimInput::Silence => true,
        }
    }
}

fn read_concat_list(list: &Path) -> Result<SimMedia> {
    let text = fs::read_to_string(list)?;
    let mut merged: Option<SimMedia> = None;
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let quoted = line.trim().trim_start_matches("file ").trim();
        let path = quoted.trim_matches('\'').replace("'\\''", "'");
        let part = SimMedia::load(Path::new(&path))?;
        merged = Some(match merged {
            None => part,
            Some(mut acc) => {
                acc.duration += part.duration;
                acc.segments.extend(part.segments);
                acc
            }
        });
    }
    merged.ok_or_else(|| MediaError::DecodeFailed {
        path: list.to_path_buf(),
        reason: "empty concat list".to_string(),
    }
    .into())
}

fn parse_inputs(args: &[OsString]) -> Result<Vec<SimInput>> {
    let mut inputs = Vec::new();
    let mut seek = 0.0;
    let mut format: Option<String> = None;
    let mut i = 0;
    while i < args.len() {
        let arg = args[i].to_string_lossy();
        let value = args.get(i + 1).map(|v| v.to_string_lossy().into_owned());
        match (&*arg, value) {
            ("-ss", Some(v)) => {
                seek = v.parse().unwrap_or(0.0);
                i += 1;
            }
            ("-f", Some(v)) => {
                format = Some(v);
                i += 1;
            }
            ("-i", Some(v)) => {
                let path = Path::new(&v);
                let input = match format.take().as_deref() {
                    Some("lavfi") => SimInput::Silence,
                    Some("concat") => SimInput::File(read_concat_list(path)?.slice(seek, None)),
                    _ if path.extension().map_or(false, |ext| ext == "wav") => SimInput::Wav,
                    _ => SimInput::File(SimMedia::load(path)?.slice(seek, None)),
                };
                inputs.push(input);
                seek = 0.0;
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }
    Ok(inputs)
}

fn tempo_of(invocation: &Invocation) -> f64 {
    invocation
        .value_of("-filter:a")
        .map(|chain| {
            chain
                .to_string_lossy()
                .split(',')
                .filter_map(|stage| stage.strip_prefix("atempo=").and_then(|v| v.parse::<f64>().ok()))
                .product()
        })
        .unwrap_or(1.0)
}

fn write_wav(path: &Path, seconds: f64) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: WAV_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let samples = (seconds * WAV_SAMPLE_RATE as f64).round() as u64;
    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| CompositorError::encode(Stage::RetimeAudio, e.to_string()))?;
    for _ in 0..samples {
        writer
            .write_sample(0i16)
            .map_err(|e| CompositorError::encode(Stage::RetimeAudio, e.to_string()))?;
    }
    writer
        .finalize()
        .map_err(|e| CompositorError::encode(Stage::RetimeAudio, e.to_string()))
}

fn has_flag(invocation: &Invocation, flag: &str) -> bool {
    invocation.raw_args().iter().any(|a| a == flag)
}

fn apply_video_filter(media: &mut SimMedia, filter: &str) {
    for part in filter.split(',') {
        if let Some(size) = part.strip_prefix("scale=") {
            if let Some((w, h)) = size.split_once(':') {
                media.width = w.parse().unwrap_or(media.width);
                media.height = h.parse().unwrap_or(media.height);
            }
        } else if let Some(rate) = part.strip_prefix("fps=") {
            if let Some(rate) = FrameRate::parse(rate) {
                media.fps_num = rate.num();
                media.fps_den = rate.den();
            }
        } else if let Some(format) = part.strip_prefix("format=") {
            media.pixel_format = format.to_string();
        }
    }
}

impl MediaBackend for SimulatedBackend {
    fn probe(&self, path: &Path) -> Result<MediaClip> {
        if !path.exists() {
            return Err(MediaError::SourceNotFound { path: path.to_path_buf() }.into());
        }
        SimMedia::load(path)?.to_clip(path)
    }

    fn ffmpeg(&self) -> FfmpegCommand {
        FfmpegCommand::new("ffmpeg")
    }

    fn run(&self, stage: Stage, invocation: &Invocation) -> Result<()> {
        self.state.lock().unwrap().runs.push((stage, invocation.clone()));
        if self.should_fail(stage) {
            return Err(failure(stage, invocation));
        }

        let output = invocation
            .output_path()
            .map(Path::to_path_buf)
            .ok_or_else(|| failure(stage, invocation))?;
        let inputs = parse_inputs(invocation.raw_args())?;
        let limit = invocation
            .value_of("-t")
            .and_then(|t| t.to_string_lossy().parse::<f64>().ok());

        let Some(SimInput::File(primary)) = inputs.first() else {
            return Err(failure(stage, invocation));
        };
        let primary = primary.slice(0.0, limit);

        if output.extension().map_or(false, |ext| ext == "wav") {
            return write_wav(&output, primary.duration / tempo_of(invocation));
        }

        let mut media = primary;
        if let Some(filter) = invocation.value_of("-vf") {
            apply_video_filter(&mut media, &filter.to_string_lossy());
        }
        if let Some(codec) = invocation.value_of("-c:v") {
            let codec = codec.to_string_lossy();
            if codec != "copy" {
                media.codec = codec_tag(&codec);
            }
        }

        media.audio = if has_flag(invocation, "-an") || !inputs.iter().any(SimInput::has_audio) {
            None
        } else {
            match invocation.value_of("-c:a").map(|c| c.to_string_lossy().into_owned()) {
                Some(codec) if codec != "copy" => Some(codec),
                _ => inputs.iter().find_map(|input| match input {
                    SimInput::File(media) => media.audio.clone(),
                    SimInput::Wav | SimInput::Silence => None,
                }),
            }
        };
        media.audio_format = media.audio.as_ref().map(|_| {
            let (rate, channels) = inputs
                .iter()
                .find_map(|input| match input {
                    SimInput::File(media) if media.audio.is_some() => media.audio_format,
                    _ => None,
                })
                .unwrap_or(DEFAULT_AUDIO_FORMAT);
            let rate = invocation
                .value_of("-ar")
                .and_then(|v| v.to_string_lossy().parse().ok())
                .unwrap_or(rate);
            let channels = invocation
                .value_of("-ac")
                .and_then(|v| v.to_string_lossy().parse().ok())
                .unwrap_or(channels);
            (rate, channels)
        });

        media.save(&output)
    }

    fn open_decoder(&self, spec: &DecodeSpec) -> Result<Box<dyn FrameReader>> {
        if !spec.source.exists() {
            return Err(MediaError::SourceNotFound {
                path: spec.source.clone(),
            }
            .into());
        }
        let available = (spec.range.duration() * spec.frame_rate.as_f64()).round() as u64;
        let limit = self.state.lock().unwrap().decode_limit;
        Ok(Box::new(SimDecoder {
            resolution: spec.resolution,
            remaining: limit.map_or(available, |l| l.min(available)),
            index: 0,
        }))
    }

    fn open_encoder(&self, spec: &EncodeSpec) -> Result<Box<dyn FrameWriter>> {
        let fail = self.should_fail(Stage::Transcode);
        self.state.lock().unwrap().last_encode = Some(spec.clone());
        Ok(Box::new(SimEncoder {
            spec: spec.clone(),
            frames: 0,
            fail,
        }))
    }
}

struct SimDecoder {
    resolution: Resolution,
    remaining: u64,
    index: u64,
}

impl FrameReader for SimDecoder {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        self.index += 1;
        let level = (self.index % 256) as u8;
        Ok(Some(Frame::new_filled(
            self.resolution.width,
            self.resolution.height,
            [level, level / 2, 255 - level],
        )))
    }
}

struct SimEncoder {
    spec: EncodeSpec,
    frames: u64,
    fail: bool,
}

impl FrameWriter for SimEncoder {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if frame.layout() != self.spec.input_layout || frame.resolution() != self.spec.resolution {
            return Err(CompositorError::encode(Stage::Transcode, "frame does not match encoder setup"));
        }
        self.frames += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let invocation = Invocation::new("ffmpeg").arg(&self.spec.output);
        if self.fail {
            return Err(failure(Stage::Transcode, &invocation));
        }

        let duration = self.frames as f64 / self.spec.frame_rate.as_f64();
        let media = SimMedia {
            duration,
            fps_num: self.spec.frame_rate.num(),
            fps_den: self.spec.frame_rate.den(),
            width: self.spec.resolution.width,
            height: self.spec.resolution.height,
            codec: codec_tag(&self.spec.codec),
            pixel_format: self.spec.output_pixel_format.clone(),
            audio: None,
            audio_format: None,
            segments: vec![Segment {
                label: label_of(&self.spec.output),
                start: 0.0,
                end: duration,
            }],
        };
        media.save(&self.spec.output)
    }
}

/// Write an executable shell script that stands in for ffmpeg or ffprobe
#[cfg(unix)]
pub fn stand_in_tool(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write stand-in tool");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("make stand-in executable");
    path
}

/// Real backend whose ffmpeg and ffprobe are both the given script
#[cfg(unix)]
pub fn stand_in_backend(dir: &Path, body: &str, timeout_secs: u64) -> crate::media::backend::FfmpegBackend {
    let tool = stand_in_tool(dir, "tool.sh", body);
    let config = crate::config::ToolConfig {
        ffmpeg: Some(tool.clone()),
        ffprobe: Some(tool),
        timeout_secs,
    };
    crate::media::backend::FfmpegBackend::new(&config).expect("stand-in backend")
}
