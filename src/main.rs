// src/main.rs
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use pose_proofreader::app::{Command, ReviewApp};
use pose_proofreader::body;
use pose_proofreader::config::Config;
use pose_proofreader::detection::{self, OutlierDetector, INTERVALS_FILE};
use pose_proofreader::logging::SessionLog;
use pose_proofreader::pose::{self, PoseEditStore};
use pose_proofreader::review::{ReviewSession, SessionSetup, PROGRESS_FILE};
use pose_proofreader::video::{DiskLibrary, FrameSource, VideoLibrary};

const HOTKEYS: &str = "\
a / d        previous / next frame
q / e        previous / next interval
s            next recommended camera
<space>      play / pause
x            stop playback
g <n>        go to interval n
c <cam>      switch camera
cache <n>    frames cached per camera
edit on|off  enable / disable pose editing
set [lm] <x> <y>, place [lm], del [lm...]
t <lm>       target landmark for edits without a name
w            save pose edits
:q           save and quit";

#[derive(Parser)]
#[command(
    name = "pose_proofreader",
    about = "Find and review tracking outliers in multi-camera pose data"
)]
struct Cli {
    /// JSON settings file; built-in defaults apply to anything it leaves out.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect outlier intervals and write the interval table.
    Detect {
        /// Joint-angle table (one column per angle channel).
        angles: PathBuf,
        /// 3D coordinate table (`<Part>_x/_y/_z` columns).
        coords: PathBuf,
        /// Output folder; defaults to the configured output directory.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also write the per-stage angle and segment-length tables.
        #[arg(long)]
        intermediates: bool,
    },
    /// Step through detected intervals of one trial folder.
    Review {
        /// Trial folder holding the camera videos.
        trial: PathBuf,
        /// Interval table; defaults to the one inside the trial folder.
        #[arg(long)]
        intervals: Option<PathBuf>,
        /// Folder of per-camera pose tables; defaults to the trial folder.
        #[arg(long)]
        poses: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Detect {
            angles,
            coords,
            output,
            intermediates,
        } => detect(&config, &angles, &coords, output, intermediates),
        Commands::Review {
            trial,
            intervals,
            poses,
        } => review(&config, &trial, intervals, poses),
    }
}

fn detect(
    config: &Config,
    angles: &Path,
    coords: &Path,
    output: Option<PathBuf>,
    intermediates: bool,
) -> Result<()> {
    let output = output.unwrap_or_else(|| config.output_directory.clone());
    std::fs::create_dir_all(&output)
        .with_context(|| format!("Failed to create output folder {}", output.display()))?;

    let detector =
        OutlierDetector::new(config.detection.clone()).context("Invalid detection settings")?;
    let report = detector
        .run_files(angles, coords, Some(&output), intermediates)
        .context("Outlier detection failed")?;

    if !report.skipped_channels.is_empty() {
        warn!("Skipped short channels: {}", report.skipped_channels.join(", "));
    }
    println!(
        "{} intervals ({} excluded) written to {}",
        report.intervals.len(),
        report.excluded,
        output.join(INTERVALS_FILE).display()
    );
    Ok(())
}

fn review(
    config: &Config,
    trial: &Path,
    intervals: Option<PathBuf>,
    poses: Option<PathBuf>,
) -> Result<()> {
    let intervals_path = intervals.unwrap_or_else(|| trial.join(INTERVALS_FILE));
    let intervals = detection::read_intervals(&intervals_path)
        .with_context(|| format!("Failed to read intervals from {}", intervals_path.display()))?;

    let cameras = body::all_cameras();
    let library = DiskLibrary::discover(trial, &cameras);
    let mut frame_counts = BTreeMap::new();
    for camera in library.cameras() {
        match library.open(&camera) {
            Ok(source) => {
                frame_counts.insert(camera, source.frame_count());
            }
            Err(e) => warn!("Camera {} unavailable: {}", camera, e),
        }
    }

    let pose_dir = poses.unwrap_or_else(|| trial.to_path_buf());
    let mut store = PoseEditStore::new();
    for (camera, path) in pose::discover_pose_tables(&pose_dir, &cameras) {
        if let Err(e) = store.load(camera, &path) {
            warn!("Skipping pose table {}: {}", path.display(), e);
        }
    }

    if let Err(e) = std::fs::create_dir_all(&config.output_directory) {
        warn!(
            "Could not create output folder {}: {}",
            config.output_directory.display(),
            e
        );
    }

    let log = SessionLog::start();
    let setup = SessionSetup {
        intervals,
        progress_path: trial.join(PROGRESS_FILE),
        layout: config.detection.layout()?,
        options: config.review.clone(),
        frame_counts,
        poses: store,
        output_directory: config.output_directory.clone(),
    };
    let session = ReviewSession::load(setup, log).context("Failed to open review progress")?;
    info!(
        "Reviewing {} intervals in {}",
        session.len(),
        trial.display()
    );
    println!("{}\n", HOTKEYS);

    let (tx, mut rx) = mpsc::channel(32);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            match Command::parse(&line) {
                Some(command) => {
                    if tx.blocking_send(command).is_err() {
                        break;
                    }
                }
                None if line.trim().is_empty() => {}
                None => warn!("Unknown command: {}", line.trim()),
            }
        }
    });

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start event loop")?;
    let mut app = ReviewApp::new(session, Arc::new(library));
    runtime.block_on(app.run(&mut rx));

    if let Some(path) = app.close() {
        println!("Session log written to {}", path.display());
    }
    Ok(())
}
