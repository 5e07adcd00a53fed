// src/bin/frame_probe.rs - Checks that a camera video can be probed and decoded
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use pose_proofreader::video::{self, FfmpegSource, FrameDirSource, FrameSource, SeekMode};

#[derive(Parser)]
#[command(name = "frame_probe", about = "Probe a camera video and decode one frame")]
struct Args {
    video: PathBuf,

    /// Frame to decode.
    #[arg(long, default_value_t = 0)]
    frame: usize,

    /// Save the decoded frame as an image.
    #[arg(long)]
    save: Option<PathBuf>,

    /// Extract every frame to a temporary folder.
    #[arg(long)]
    extract: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    println!("Testing video access...\n");

    let info = match video::probe(&args.video) {
        Ok(info) => info,
        Err(e) => {
            println!("✗ Failed to probe video: {}", e);
            println!("\nPossible causes:");
            println!("1. ffmpeg/ffprobe are not installed");
            println!("2. The path does not point at a video file");
            return Err(e).context("probe failed");
        }
    };
    println!(
        "✓ Probed {} ({}x{}, {:.2} fps, {} frames)",
        info.path.display(),
        info.width,
        info.height,
        info.fps,
        info.frame_count
    );

    let mut source = FfmpegSource::open(&args.video).context("Failed to open decoder")?;
    match source
        .decode(args.frame, SeekMode::Random)
        .with_context(|| format!("Failed to decode frame {}", args.frame))?
    {
        Some(frame) => {
            println!("✓ Frame {} decoded ({}x{})", args.frame, frame.width(), frame.height());
            if let Some(out) = &args.save {
                frame
                    .save(out)
                    .with_context(|| format!("Failed to save {}", out.display()))?;
                println!("✓ Saved to {}", out.display());
            }
        }
        None => println!("✗ Frame {} is past the end of the video", args.frame),
    }

    if args.extract {
        let dir = video::extract_frames(&args.video).context("Frame extraction failed")?;
        let frames = FrameDirSource::open(&dir)?;
        println!("✓ Extracted {} frames to {}", frames.frame_count(), dir.display());
    }
    Ok(())
}
