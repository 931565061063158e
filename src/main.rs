use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

use clip_compositor::{
    composition::{AdInsertionJob, AdPlacement, ClipEngine, JobReport, MergeEntry, MergeJob, ProcessingRequest},
    config::Config,
    error::CompositorError,
    filters::FilterKind,
    media::{parse_timestamp, SpeedFactor, TimeRange},
};

#[derive(Parser)]
#[command(
    name = "clip-compositor",
    version,
    about = "Trim, retime, filter, merge and ad-splice video clips",
    long_about = "Clip-Compositor processes short video clips with ffmpeg: trim a time range, change its speed, apply a pixel filter, merge several clips in a chosen order, or splice an advert into a main clip."
)]
struct Cli {
    /// Configuration file (optional)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Trim, retime and filter one clip
    Process {
        /// Source clip (mp4, avi, mov)
        #[arg(short, long)]
        input: PathBuf,

        /// Output video file path
        #[arg(short, long)]
        output: PathBuf,

        /// Range start (ss, mm:ss or hh:mm:ss)
        #[arg(long, default_value = "0", value_parser = timestamp)]
        start: f64,

        /// Range end; the end of the clip when omitted
        #[arg(long, value_parser = timestamp)]
        end: Option<f64>,

        /// Playback speed (0.5, 0.75, 1.0, 1.25, 1.5)
        #[arg(short, long, default_value = "1.0")]
        speed: SpeedFactor,

        /// Pixel filter (none, sepia, grayscale, edge-detect, blur)
        #[arg(short, long, default_value = "none")]
        filter: FilterKind,

        /// Drop the audio track
        #[arg(long)]
        mute: bool,
    },

    /// Concatenate clips in order
    Merge {
        /// Clips to merge
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Position of each input in the result (1-based); input order when omitted
        #[arg(long, value_delimiter = ',')]
        order: Option<Vec<u32>>,

        /// Output video file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Splice an ad into a main clip
    InsertAd {
        /// Main clip
        #[arg(long)]
        main: PathBuf,

        /// Ad clip
        #[arg(long)]
        ad: PathBuf,

        /// Insert after this much main content (ss, mm:ss or hh:mm:ss)
        #[arg(long, value_parser = timestamp)]
        at: f64,

        /// Play only this much of the ad; the whole ad when omitted
        #[arg(long, value_parser = timestamp)]
        ad_duration: Option<f64>,

        /// Repeat the ad after every `--at` interval
        #[arg(long)]
        recurring: bool,

        /// Output video file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print what ffprobe reports for a clip
    Probe {
        input: PathBuf,
    },

    /// List the available filters
    Filters,
}

fn timestamp(text: &str) -> std::result::Result<f64, String> {
    parse_timestamp(text).map_err(|e| e.to_string())
}

/// Show the friendly message for library errors
fn friendly(err: CompositorError) -> anyhow::Error {
    anyhow::anyhow!(err.user_message())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .init();

    info!("Starting Clip-Compositor v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = match cli.config {
        Some(config_path) => {
            info!("Loading configuration from {:?}", config_path);
            Config::from_file(&config_path).map_err(friendly)?
        }
        None => {
            info!("Using default configuration");
            Config::default()
        }
    };

    if let Command::Filters = cli.command {
        let registry = clip_compositor::FilterRegistry::new();
        for name in registry.available_filters() {
            if let Some(filter) = registry.get_filter(&name) {
                println!("{:<12} {}", name, filter.description());
            }
        }
        return Ok(());
    }

    let engine = ClipEngine::new(config).map_err(friendly)?;
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let report = match cli.command {
        Command::Process {
            input,
            output,
            start,
            end,
            speed,
            filter,
            mute,
        } => {
            let clip = engine.probe_async(input).await.map_err(friendly)?;
            let end = end.unwrap_or_else(|| clip.duration_seconds());
            let range = TimeRange::within(&clip, start, end).map_err(|e| friendly(e.into()))?;
            let request = ProcessingRequest::new(clip, range)
                .with_speed(speed)
                .with_filter(filter)
                .muted(mute);

            engine.process_async(request, output, cancel).await
        }
        Command::Merge { inputs, order, output } => {
            let orders = order.unwrap_or_else(|| (1..=inputs.len() as u32).collect());
            if orders.len() != inputs.len() {
                anyhow::bail!("--order has {} values for {} inputs", orders.len(), inputs.len());
            }

            let mut entries = Vec::with_capacity(inputs.len());
            for (input, order) in inputs.into_iter().zip(orders) {
                let clip = engine.probe_async(input).await.map_err(friendly)?;
                entries.push(MergeEntry::new(clip, order));
            }

            engine.merge_async(MergeJob::new(entries), output, cancel).await
        }
        Command::InsertAd {
            main,
            ad,
            at,
            ad_duration,
            recurring,
            output,
        } => {
            let main = engine.probe_async(main).await.map_err(friendly)?;
            let ad = engine.probe_async(ad).await.map_err(friendly)?;

            let mut job = AdInsertionJob::new(main, ad, at);
            if let Some(seconds) = ad_duration {
                job = job.with_ad_duration(seconds);
            }
            if recurring {
                job = job.with_placement(AdPlacement::Recurring);
            }

            engine.insert_ad_async(job, output, cancel).await
        }
        Command::Probe { input } => {
            let clip = engine.probe_async(input).await.map_err(friendly)?;
            print_clip(clip.path(), &clip);
            return Ok(());
        }
        Command::Filters => return Ok(()),
    };

    let report = report.map_err(friendly)?;
    summarize(&report);
    Ok(())
}

/// Cancel the running job on Ctrl-C; the current stage finishes first
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current stage");
            cancel.cancel();
        }
    });
}

fn print_clip(path: &Path, clip: &clip_compositor::MediaClip) {
    println!("{}", path.display());
    println!("  duration:   {:.3}s", clip.duration_seconds());
    println!("  video:      {} {} @ {} fps", clip.video_codec_tag(), clip.resolution(), clip.frame_rate());
    if let Some(pixel_format) = clip.pixel_format() {
        println!("  pixels:     {}", pixel_format);
    }
    match (clip.audio_codec(), clip.audio_sample_rate(), clip.audio_channels()) {
        (Some(codec), Some(rate), Some(channels)) => println!("  audio:      {} {} Hz, {} ch", codec, rate, channels),
        (codec, _, _) => println!("  audio:      {}", codec.unwrap_or("none")),
    }
}

fn summarize(report: &JobReport) {
    let stages: Vec<&str> = report.stages.iter().map(|s| s.as_str()).collect();
    info!("Stages: {}", stages.join(" -> "));
    info!(
        "Started {} and took {:.1}s",
        report.started_at.format("%H:%M:%S"),
        report.elapsed.as_secs_f64()
    );
    print_clip(&report.output, &report.clip);
}
