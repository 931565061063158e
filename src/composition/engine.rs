use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    audio::{AudioRetimer, RetimedTrack},
    composition::{
        checkpoint,
        jobs::{AdInsertionJob, MergeJob, ProcessingRequest},
        merge::MergeEngine,
        muxer::Muxer,
        splice::{AdSplicer, SpliceMachine},
    },
    config::Config,
    error::{CompositorError, MediaError, Result, Stage, ValidationError},
    filters::{FilterRegistry, FrameFilter},
    media::{
        backend::{FfmpegBackend, MediaBackend},
        types::{container_of, is_supported_container, MediaClip},
        workspace::TempWorkspace,
    },
    video::{FrameTranscoder, TranscodedVideo},
};

/// What a finished job produced
#[derive(Debug, Clone)]
pub struct JobReport {
    /// Published artifact at the caller's path
    pub output: PathBuf,
    /// Probe of the published artifact
    pub clip: MediaClip,
    /// Stages that ran, in order
    pub stages: Vec<Stage>,
    pub started_at: DateTime<Local>,
    pub elapsed: Duration,
}

/// Main entry point that runs processing, merge and ad-splice jobs
///
/// Every job follows the same shape:
/// 1. Validation - reject bad requests before any external process runs
/// 2. Workspace - a fresh temp directory owns every intermediate file
/// 3. Stages - run in order, with a cancellation check before each one
/// 4. Publish - move the final artifact to the caller's path
///
/// The workspace is removed on every exit path. All methods block, often
/// for seconds; use the `*_async` variants from async code.
#[derive(Clone)]
pub struct ClipEngine {
    config: Arc<Config>,
    backend: Arc<dyn MediaBackend>,
    filters: Arc<FilterRegistry>,
}

impl ClipEngine {
    /// Create an engine driving the ffmpeg/ffprobe executables
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let backend = FfmpegBackend::new(&config.tools)?;
        debug!(
            "Using ffmpeg at {} and ffprobe at {}",
            backend.ffmpeg_path().display(),
            backend.ffprobe_path().display()
        );
        Ok(Self::with_backend(config, Arc::new(backend)))
    }

    /// Create an engine over any media backend
    pub fn with_backend(config: Config, backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            config: Arc::new(config),
            backend,
            filters: Arc::new(FilterRegistry::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    /// Probe a source file after checking its path
    pub fn probe<P: AsRef<Path>>(&self, path: P) -> Result<MediaClip> {
        let path = path.as_ref();
        validate_source(path)?;
        self.backend.probe(path)
    }

    // ==========================================
    // TRIM / SPEED / FILTER
    // ==========================================

    /// Trim, retime and filter one clip into `output`
    pub fn process(&self, request: &ProcessingRequest, output: &Path, cancel: &CancellationToken) -> Result<JobReport> {
        let started = JobClock::start();
        let clip = &request.clip;

        info!("🎬 Processing '{}' -> {}", clip.name(), output.display());
        info!(
            "   Range: {:.3}s-{:.3}s, speed {}, filter {}, audio {}",
            request.range.start(),
            request.range.end(),
            request.speed,
            request.filter,
            if request.mute_audio { "muted" } else { "kept" }
        );

        request.validate()?;
        validate_source(clip.path())?;
        let container = output_container(output)?;
        let filter = self.filters.resolve(request.filter)?;
        if !request.mute_audio && !clip.has_audio() {
            return Err(MediaError::NoAudioStream {
                path: clip.path().to_path_buf(),
            }
            .into());
        }

        let mut workspace = self.workspace("process")?;
        let mut completed = Vec::new();

        checkpoint(cancel, Stage::Transcode)?;
        // a muted job publishes the encoder output as-is
        let video_path = if request.mute_audio {
            workspace.artifact(&format!("video.{}", container))
        } else {
            workspace.artifact("video.mp4")
        };
        let audio_paths = (!request.mute_audio).then(|| (workspace.artifact("audio.mka"), workspace.artifact("audio.wav")));

        let (video, audio) = match &audio_paths {
            None => (self.transcode(request, filter.as_ref(), &video_path)?, None),
            Some((extracted, retimed)) if self.config.pipeline.parallel_stages => {
                debug!("Running transcode and audio retime in parallel");
                let (video, audio) = rayon::join(
                    || self.transcode(request, filter.as_ref(), &video_path),
                    || self.retime_audio(request, extracted, retimed),
                );
                (video?, Some(audio?))
            }
            Some((extracted, retimed)) => {
                let video = self.transcode(request, filter.as_ref(), &video_path)?;
                checkpoint(cancel, Stage::ExtractAudio)?;
                (video, Some(self.retime_audio(request, extracted, retimed)?))
            }
        };
        completed.push(Stage::Transcode);

        let final_clip = match audio {
            None => {
                info!("🔇 Audio muted, keeping video-only output");
                video.clip
            }
            Some(audio) => {
                completed.extend([Stage::ExtractAudio, Stage::RetimeAudio]);
                checkpoint(cancel, Stage::Mux)?;
                let muxed_path = workspace.artifact(&format!("final.{}", container));
                let muxed = Muxer::new(self.backend.as_ref(), &self.config.audio, &self.config.mux)
                    .combine(&video.clip, &audio, &muxed_path)?;
                completed.push(Stage::Mux);
                muxed
            }
        };

        self.publish(workspace, final_clip.path(), output, cancel, completed, started)
    }

    fn transcode(&self, request: &ProcessingRequest, filter: &dyn FrameFilter, output: &Path) -> Result<TranscodedVideo> {
        FrameTranscoder::new(self.backend.as_ref(), &self.config.video, &self.config.pipeline).transcode(
            &request.clip,
            request.range,
            request.speed,
            filter,
            output,
        )
    }

    fn retime_audio(&self, request: &ProcessingRequest, extracted: &Path, retimed: &Path) -> Result<RetimedTrack> {
        let retimer = AudioRetimer::new(self.backend.as_ref());
        let track = retimer.extract(&request.clip, extracted)?;
        retimer.retime(&track, request.range, request.speed, retimed)
    }

    // ==========================================
    // MERGE
    // ==========================================

    /// Concatenate clips in their requested order into `output`
    pub fn merge(&self, job: &MergeJob, output: &Path, cancel: &CancellationToken) -> Result<JobReport> {
        let started = JobClock::start();
        info!("🎬 Merging {} clips -> {}", job.entries.len(), output.display());

        job.validate(self.config.merge.max_clips)?;
        for entry in &job.entries {
            validate_source(entry.clip.path())?;
        }
        let container = output_container(output)?;

        let clips = job.ordered_clips();
        for (position, clip) in clips.iter().enumerate() {
            debug!("   {}. {} ({:.3}s)", position + 1, clip.name(), clip.duration_seconds());
        }

        let merger = MergeEngine::new(self.backend.as_ref(), &self.config).with_container(container);
        // incompatible clips fail here, before the workspace exists
        merger.strategy(&clips)?;

        let mut workspace = self.workspace("merge")?;
        let mut completed = Vec::new();
        let merged = merger.concatenate(&clips, &mut workspace, cancel, &mut completed)?;

        self.publish(workspace, merged.path(), output, cancel, completed, started)
    }

    // ==========================================
    // AD SPLICE
    // ==========================================

    /// Splice `job.ad_clip` into `job.main_clip` and write the result to `output`
    pub fn insert_ad(&self, job: &AdInsertionJob, output: &Path, cancel: &CancellationToken) -> Result<JobReport> {
        let started = JobClock::start();
        info!(
            "🎬 Inserting '{}' into '{}' -> {}",
            job.ad_clip.name(),
            job.main_clip.name(),
            output.display()
        );

        let plan = job.plan()?;
        validate_source(job.main_clip.path())?;
        validate_source(job.ad_clip.path())?;
        let container = output_container(output)?;
        info!(
            "   {} ad(s) of {:.3}s, expected length {:.3}s",
            plan.ad_count(),
            plan.ad_duration,
            plan.expected_duration()
        );

        MergeEngine::new(self.backend.as_ref(), &self.config)
            .strategy(&[job.main_clip.clone(), job.ad_clip.clone()])?;

        let mut workspace = self.workspace("splice")?;
        let mut completed = Vec::new();
        let mut machine = SpliceMachine::new();
        let spliced = AdSplicer::new(self.backend.as_ref(), &self.config)
            .with_container(container)
            .run(job, &plan, &mut workspace, cancel, &mut machine, &mut completed)?;
        debug!("Splice states: {:?}", machine.history());

        self.publish(workspace, spliced.path(), output, cancel, completed, started)
    }

    // ==========================================
    // ASYNC WRAPPERS
    // ==========================================

    /// `process` on the blocking thread pool
    pub async fn process_async(
        &self,
        request: ProcessingRequest,
        output: PathBuf,
        cancel: CancellationToken,
    ) -> Result<JobReport> {
        let engine = self.clone();
        run_blocking(move || engine.process(&request, &output, &cancel)).await
    }

    /// `merge` on the blocking thread pool
    pub async fn merge_async(&self, job: MergeJob, output: PathBuf, cancel: CancellationToken) -> Result<JobReport> {
        let engine = self.clone();
        run_blocking(move || engine.merge(&job, &output, &cancel)).await
    }

    /// `insert_ad` on the blocking thread pool
    pub async fn insert_ad_async(
        &self,
        job: AdInsertionJob,
        output: PathBuf,
        cancel: CancellationToken,
    ) -> Result<JobReport> {
        let engine = self.clone();
        run_blocking(move || engine.insert_ad(&job, &output, &cancel)).await
    }

    /// `probe` on the blocking thread pool
    pub async fn probe_async(&self, path: PathBuf) -> Result<MediaClip> {
        let engine = self.clone();
        run_blocking(move || engine.probe(&path)).await
    }

    // ==========================================
    // HELPERS
    // ==========================================

    fn workspace(&self, label: &str) -> Result<TempWorkspace> {
        TempWorkspace::new(label, self.config.pipeline.temp_root.as_deref())
    }

    fn publish(
        &self,
        workspace: TempWorkspace,
        artifact: &Path,
        output: &Path,
        cancel: &CancellationToken,
        mut completed: Vec<Stage>,
        started: JobClock,
    ) -> Result<JobReport> {
        checkpoint(cancel, Stage::Publish)?;
        // nothing reaches the caller's path unless it probes cleanly
        let clip = self
            .backend
            .probe(artifact)
            .map_err(|e| CompositorError::invalid_output(Stage::Publish, artifact, e.to_string()))?;

        workspace.publish(artifact, output)?;
        if let Err(e) = workspace.close() {
            warn!("Workspace cleanup failed: {}", e);
        }
        completed.push(Stage::Publish);

        let clip = clip.with_path(output);
        let elapsed = started.instant.elapsed();

        info!(
            "🎉 Done! {} ({:.3}s) written in {:.1}s",
            output.display(),
            clip.duration_seconds(),
            elapsed.as_secs_f64()
        );

        Ok(JobReport {
            output: output.to_path_buf(),
            clip,
            stages: completed,
            started_at: started.wall,
            elapsed,
        })
    }
}

struct JobClock {
    wall: DateTime<Local>,
    instant: Instant,
}

impl JobClock {
    fn start() -> Self {
        Self {
            wall: Local::now(),
            instant: Instant::now(),
        }
    }
}

/// Container named by the output's extension; the final artifact is written in it
fn output_container(output: &Path) -> Result<&'static str> {
    container_of(output).ok_or_else(|| {
        ValidationError::UnsupportedContainer {
            path: output.to_path_buf(),
        }
        .into()
    })
}

/// Reject unsupported extensions, then missing files
pub fn validate_source(path: &Path) -> Result<()> {
    if !is_supported_container(path) {
        return Err(ValidationError::UnsupportedContainer {
            path: path.to_path_buf(),
        }
        .into());
    }
    if !path.is_file() {
        return Err(MediaError::SourceNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }
    Ok(())
}

async fn run_blocking<T, F>(job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("job task failed: {}", e)))?
}
