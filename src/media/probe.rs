//! ffprobe JSON parsing.

use std::path::Path;

use serde::Deserialize;

use crate::error::{MediaError, Result};
use crate::media::types::{FrameRate, MediaClip, Resolution};

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    pix_fmt: Option<String>,
    duration: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Build a `MediaClip` from `ffprobe -print_format json -show_format -show_streams` output
pub fn parse_ffprobe_json(path: &Path, stdout: &[u8]) -> Result<MediaClip> {
    let failed = |reason: &str| MediaError::ProbeFailed {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let output: ProbeOutput =
        serde_json::from_slice(stdout).map_err(|e| failed(&format!("invalid JSON: {}", e)))?;

    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| MediaError::DecodeFailed {
            path: path.to_path_buf(),
            reason: "no video stream".to_string(),
        })?;

    let codec = video
        .codec_name
        .clone()
        .ok_or_else(|| failed("video stream has no codec name"))?;

    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(failed("video stream has no dimensions").into()),
    };

    // r_frame_rate is 0/0 for some containers; fall back to the average rate
    let frame_rate = [&video.r_frame_rate, &video.avg_frame_rate]
        .into_iter()
        .flatten()
        .find_map(|rate| FrameRate::parse(rate))
        .ok_or_else(|| failed("video stream has no usable frame rate"))?;

    let duration = output
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(video.duration.as_deref())
        .and_then(|d| d.trim().parse::<f64>().ok())
        .ok_or_else(|| failed("no duration reported"))?;

    if !(duration.is_finite() && duration > 0.0) {
        return Err(failed(&format!("duration {} is not positive", duration)).into());
    }

    let mut clip = MediaClip::new(path, duration, frame_rate, Resolution::new(width, height), codec);
    if let Some(pix_fmt) = &video.pix_fmt {
        clip = clip.with_pixel_format(pix_fmt);
    }

    if let Some(audio) = output.streams.iter().find(|s| s.codec_type.as_deref() == Some("audio")) {
        // ffprobe reports sample_rate as a string
        let sample_rate = audio.sample_rate.as_deref().and_then(|r| r.trim().parse::<u32>().ok());
        clip = clip
            .with_audio(audio.codec_name.clone().unwrap_or_else(|| "unknown".to_string()))
            .with_audio_format(sample_rate, audio.channels);
    }

    Ok(clip)
}
