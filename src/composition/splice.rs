use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::composition::checkpoint;
use crate::composition::jobs::{AdInsertionJob, SplicePlan};
use crate::composition::merge::MergeEngine;
use crate::config::Config;
use crate::error::{CompositorError, Result, Stage};
use crate::media::backend::MediaBackend;
use crate::media::types::MediaClip;
use crate::media::workspace::TempWorkspace;

/// Where an ad-splice job is
#[derive(Debug, Clone, PartialEq)]
pub enum SpliceState {
    Split,
    TrimAd,
    Concat,
    Completed(PathBuf),
    Failed { stage: Stage, reason: String },
}

impl SpliceState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SpliceState::Completed(_) | SpliceState::Failed { .. })
    }
}

/// Forward-only state machine with its transition history
#[derive(Debug, Clone)]
pub struct SpliceMachine {
    history: Vec<SpliceState>,
}

impl SpliceMachine {
    pub fn new() -> Self {
        Self {
            history: vec![SpliceState::Split],
        }
    }

    pub fn state(&self) -> &SpliceState {
        // history always starts with Split
        &self.history[self.history.len() - 1]
    }

    pub fn history(&self) -> &[SpliceState] {
        &self.history
    }

    fn advance(&mut self, next: SpliceState) {
        if self.state().is_terminal() {
            return;
        }
        debug!("Splice {:?} -> {:?}", self.state(), next);
        self.history.push(next);
    }

    fn stage(&self) -> Stage {
        match self.state() {
            SpliceState::Split => Stage::Split,
            SpliceState::TrimAd => Stage::TrimAd,
            SpliceState::Concat | SpliceState::Completed(_) => Stage::Concat,
            SpliceState::Failed { stage, .. } => *stage,
        }
    }
}

impl Default for SpliceMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits the main clip, trims the ad, and concatenates the pieces
pub struct AdSplicer<'a> {
    backend: &'a dyn MediaBackend,
    config: &'a Config,
    container: &'static str,
}

impl<'a> AdSplicer<'a> {
    pub fn new(backend: &'a dyn MediaBackend, config: &'a Config) -> Self {
        Self {
            backend,
            config,
            container: "mp4",
        }
    }

    /// Container of the spliced result; the split parts stay mp4
    pub fn with_container(mut self, container: &'static str) -> Self {
        self.container = container;
        self
    }

    /// Drive `machine` to a terminal state
    ///
    /// Every intermediate file lands in `workspace`; the caller's workspace
    /// drop removes them whether this succeeds or not.
    pub fn run(
        &self,
        job: &AdInsertionJob,
        plan: &SplicePlan,
        workspace: &mut TempWorkspace,
        cancel: &CancellationToken,
        machine: &mut SpliceMachine,
        completed: &mut Vec<Stage>,
    ) -> Result<MediaClip> {
        match self.run_states(job, plan, workspace, cancel, machine, completed) {
            Ok(output) => {
                machine.advance(SpliceState::Completed(output.path().to_path_buf()));
                Ok(output)
            }
            Err(err) => {
                let stage = err.stage().unwrap_or_else(|| machine.stage());
                machine.advance(SpliceState::Failed {
                    stage,
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn run_states(
        &self,
        job: &AdInsertionJob,
        plan: &SplicePlan,
        workspace: &mut TempWorkspace,
        cancel: &CancellationToken,
        machine: &mut SpliceMachine,
        completed: &mut Vec<Stage>,
    ) -> Result<MediaClip> {
        checkpoint(cancel, Stage::Split)?;
        info!(
            "✂️  Splitting '{}' at {:?}",
            job.main_clip.name(),
            plan.boundaries
        );
        let segments = plan.main_segments();
        let last = segments.len() - 1;
        let mut parts = Vec::with_capacity(segments.len());
        for (index, (start, end)) in segments.into_iter().enumerate() {
            let output = workspace.artifact(&format!("main_part_{}.mp4", index));
            // the final part runs to the end of the source without a length limit
            let length = if index == last { None } else { Some(end - start) };
            parts.push(self.trim_copy(Stage::Split, job.main_clip.path(), start, length, &output)?);
        }
        completed.push(Stage::Split);

        machine.advance(SpliceState::TrimAd);
        checkpoint(cancel, Stage::TrimAd)?;
        let ad_output = workspace.artifact("ad_trimmed.mp4");
        let ad = self.trim_copy(Stage::TrimAd, job.ad_clip.path(), 0.0, Some(plan.ad_duration), &ad_output)?;
        completed.push(Stage::TrimAd);

        machine.advance(SpliceState::Concat);
        let mut sequence = Vec::with_capacity(parts.len() * 2);
        for (index, part) in parts.into_iter().enumerate() {
            if index > 0 {
                sequence.push(ad.clone());
            }
            sequence.push(part);
        }

        MergeEngine::new(self.backend, self.config)
            .with_container(self.container)
            .concatenate(&sequence, workspace, cancel, completed)
    }

    fn trim_copy(&self, stage: Stage, source: &Path, start: f64, length: Option<f64>, output: &Path) -> Result<MediaClip> {
        let mut command = self.backend.ffmpeg().seek(start).input(source);
        if let Some(length) = length {
            command = command.duration(length);
        }
        let invocation = command
            .copy_streams()
            .opt("-avoid_negative_ts", "make_zero")
            .output(output);
        self.backend.run(stage, &invocation)?;

        self.backend
            .probe(output)
            .map_err(|e| CompositorError::invalid_output(stage, output, e.to_string()))
    }
}
