use std::fs;
use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::composition::checkpoint;
use crate::config::Config;
use crate::error::{CompositorError, OutputError, Result, Stage};
use crate::media::backend::MediaBackend;
use crate::media::types::MediaClip;
use crate::media::workspace::TempWorkspace;

/// How a set of clips will be concatenated
#[derive(Debug, Clone, PartialEq)]
pub enum MergeStrategy {
    /// Every clip shares one stream profile; stream-copy through a concat list
    StreamCopy,
    /// Re-encode every clip to the first clip's profile first
    Normalize { issues: Vec<String> },
}

/// Differences that rule out stream-copy concatenation, relative to the first clip
pub fn compatibility_issues(clips: &[MediaClip]) -> Vec<String> {
    let mut issues = Vec::new();
    let Some(reference) = clips.first() else {
        return issues;
    };

    for clip in &clips[1..] {
        let name = clip.name();
        if clip.video_codec_tag() != reference.video_codec_tag() {
            issues.push(format!(
                "{}: codec {} vs {}",
                name,
                clip.video_codec_tag(),
                reference.video_codec_tag()
            ));
        }
        if clip.resolution() != reference.resolution() {
            issues.push(format!("{}: resolution {} vs {}", name, clip.resolution(), reference.resolution()));
        }
        if clip.frame_rate() != reference.frame_rate() {
            issues.push(format!("{}: frame rate {} vs {}", name, clip.frame_rate(), reference.frame_rate()));
        }
        if clip.pixel_format() != reference.pixel_format() {
            issues.push(format!(
                "{}: pixel format {} vs {}",
                name,
                clip.pixel_format().unwrap_or("unknown"),
                reference.pixel_format().unwrap_or("unknown")
            ));
        }
        if clip.audio_codec() != reference.audio_codec() {
            issues.push(format!(
                "{}: audio {} vs {}",
                name,
                clip.audio_codec().unwrap_or("none"),
                reference.audio_codec().unwrap_or("none")
            ));
        } else if clip.has_audio() {
            if clip.audio_sample_rate() != reference.audio_sample_rate() {
                issues.push(format!(
                    "{}: sample rate {} vs {}",
                    name,
                    or_unknown(clip.audio_sample_rate()),
                    or_unknown(reference.audio_sample_rate())
                ));
            }
            if clip.audio_channels() != reference.audio_channels() {
                issues.push(format!(
                    "{}: channels {} vs {}",
                    name,
                    or_unknown(clip.audio_channels()),
                    or_unknown(reference.audio_channels())
                ));
            }
        }
    }
    issues
}

fn or_unknown<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "unknown".to_string(), |v| v.to_string())
}

/// One concat-demuxer line; single quotes are closed, escaped and reopened
pub fn concat_list_entry(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\'', "'\\''");
    format!("file '{}'", text)
}

/// Concat-demuxer list for `clips`, with absolute paths
pub fn concat_list(clips: &[MediaClip]) -> Result<String> {
    let mut list = String::new();
    for clip in clips {
        let absolute = fs::canonicalize(clip.path())?;
        list.push_str(&concat_list_entry(&absolute));
        list.push('\n');
    }
    Ok(list)
}

/// Concatenates clips, normalizing them first when required and allowed
pub struct MergeEngine<'a> {
    backend: &'a dyn MediaBackend,
    config: &'a Config,
    container: &'static str,
}

impl<'a> MergeEngine<'a> {
    /// Engine writing an mp4 result
    pub fn new(backend: &'a dyn MediaBackend, config: &'a Config) -> Self {
        Self {
            backend,
            config,
            container: "mp4",
        }
    }

    /// Write the concatenated result in `container` (an extension such as "mov")
    pub fn with_container(mut self, container: &'static str) -> Self {
        self.container = container;
        self
    }

    /// Decide how `clips` can be joined; fails when they are incompatible
    /// and normalization is disabled
    pub fn strategy(&self, clips: &[MediaClip]) -> Result<MergeStrategy> {
        let issues = compatibility_issues(clips);
        if issues.is_empty() {
            return Ok(MergeStrategy::StreamCopy);
        }
        if !self.config.merge.normalize_incompatible {
            return Err(OutputError::FormatMismatch {
                details: issues.join("; "),
            }
            .into());
        }
        Ok(MergeStrategy::Normalize { issues })
    }

    /// Concatenate `clips` in the given order into a new workspace artifact
    pub fn concatenate(
        &self,
        clips: &[MediaClip],
        workspace: &mut TempWorkspace,
        cancel: &CancellationToken,
        completed: &mut Vec<Stage>,
    ) -> Result<MediaClip> {
        let parts = match self.strategy(clips)? {
            MergeStrategy::StreamCopy => clips.to_vec(),
            MergeStrategy::Normalize { issues } => {
                for issue in &issues {
                    warn!("Incompatible clip, normalizing: {}", issue);
                }
                checkpoint(cancel, Stage::Normalize)?;
                let normalized = self.normalize_all(clips, workspace, cancel)?;
                completed.push(Stage::Normalize);
                normalized
            }
        };

        checkpoint(cancel, Stage::Concat)?;
        let list_path = workspace.artifact("concat.txt");
        fs::write(&list_path, concat_list(&parts)?)?;

        let output = workspace.artifact(&format!("concat.{}", self.container));
        info!("📼 Concatenating {} clips", parts.len());
        let invocation = self
            .backend
            .ffmpeg()
            .concat_list(&list_path)
            .copy_streams()
            .output(&output);
        self.backend.run(Stage::Concat, &invocation)?;

        let merged = self
            .backend
            .probe(&output)
            .map_err(|e| CompositorError::invalid_output(Stage::Concat, &output, e.to_string()))?;
        completed.push(Stage::Concat);
        Ok(merged)
    }

    /// Re-encode every clip to the first clip's geometry and rate
    fn normalize_all(
        &self,
        clips: &[MediaClip],
        workspace: &mut TempWorkspace,
        cancel: &CancellationToken,
    ) -> Result<Vec<MediaClip>> {
        let Some(reference) = clips.first() else {
            return Ok(Vec::new());
        };
        let with_audio = clips.iter().any(MediaClip::has_audio);

        let mut normalized = Vec::with_capacity(clips.len());
        for (index, clip) in clips.iter().enumerate() {
            checkpoint(cancel, Stage::Normalize)?;
            let output = workspace.artifact(&format!("normalized_{}.mp4", index));
            self.normalize(clip, reference, with_audio, &output)?;

            let probed = self
                .backend
                .probe(&output)
                .map_err(|e| CompositorError::invalid_output(Stage::Normalize, &output, e.to_string()))?;
            normalized.push(probed);
        }
        Ok(normalized)
    }

    fn normalize(&self, clip: &MediaClip, reference: &MediaClip, with_audio: bool, output: &Path) -> Result<()> {
        let video = &self.config.video;
        let audio = &self.config.audio;
        let target = reference.resolution();
        let needs_silence = with_audio && !clip.has_audio();

        debug!("Normalizing '{}' to {} @ {}", clip.name(), target, reference.frame_rate());

        let mut command = self.backend.ffmpeg().input(clip.path());
        if needs_silence {
            command = command
                .opt("-f", "lavfi")
                .opt("-i", format!("anullsrc=r={}:cl=stereo", audio.sample_rate));
        }
        command = command
            .opt(
                "-vf",
                format!(
                    "scale={}:{},fps={},format={}",
                    target.width,
                    target.height,
                    reference.frame_rate(),
                    video.pixel_format
                ),
            )
            .map("0:v:0")
            .opt("-c:v", &video.codec)
            .opt("-preset", &video.preset)
            .opt("-crf", video.crf().to_string());

        command = if with_audio {
            command
                .map(if needs_silence { "1:a:0" } else { "0:a:0" })
                .opt("-c:a", &audio.codec)
                .opt("-b:a", &audio.bitrate)
                .opt("-ar", audio.sample_rate.to_string())
                .opt("-ac", "2")
                .flag("-shortest")
        } else {
            command.flag("-an")
        };

        self.backend.run(Stage::Normalize, &command.output(output))
    }
}
