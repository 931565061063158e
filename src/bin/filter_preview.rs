// Applies every built-in filter to one still image so kernel output can be
// checked by eye.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use image::{ImageBuffer, Rgb};

use clip_compositor::{filters::FilterRegistry, media::Frame};

#[derive(Parser)]
#[command(name = "filter_preview", about = "Render every filter over a still image")]
struct Args {
    /// Source image; a generated test card when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Directory for the rendered PNGs
    #[arg(short, long, default_value = "filter_preview")]
    output: PathBuf,
}

/// Color bars over a horizontal gradient, with a hard edge in the middle
fn test_card(width: u32, height: u32) -> Frame {
    const BARS: [[u8; 3]; 6] = [
        [235, 235, 235],
        [235, 235, 16],
        [16, 235, 235],
        [16, 235, 16],
        [235, 16, 235],
        [235, 16, 16],
    ];
    Frame::Rgb(ImageBuffer::from_fn(width, height, |x, y| {
        if y < height / 2 {
            Rgb(BARS[(x * BARS.len() as u32 / width) as usize])
        } else {
            let level = (x * 255 / width.max(1)) as u8;
            Rgb([level, level, level])
        }
    }))
}

fn main() -> Result<()> {
    let args = Args::parse();
    println!("🎬 Clip-Compositor filter preview");

    let source = match &args.input {
        Some(path) => {
            let image = image::open(path).with_context(|| format!("could not open {}", path.display()))?;
            Frame::Rgb(image.to_rgb8())
        }
        None => test_card(320, 180),
    };
    println!("   Source frame: {}", source.resolution());

    std::fs::create_dir_all(&args.output)?;
    source.save_png(args.output.join("source.png"))?;

    let registry = FilterRegistry::new();
    for name in registry.available_filters() {
        let Some(filter) = registry.get_filter(&name) else {
            continue;
        };

        let started = Instant::now();
        let frame = filter.apply(source.clone())?;
        let elapsed = started.elapsed();

        let path = args.output.join(format!("{}.png", name));
        frame.save_png(&path)?;
        println!(
            "   ✅ {:<12} {} channel(s), {:.2}ms -> {}",
            name,
            frame.channels(),
            elapsed.as_secs_f64() * 1000.0,
            path.display()
        );
    }

    println!("\n🎉 Wrote {} previews to {}", registry.len() + 1, args.output.display());
    Ok(())
}
