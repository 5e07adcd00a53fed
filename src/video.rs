// src/video.rs - Frame sources for the review workflow
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;

use image::RgbImage;
use tracing::{debug, info, warn};

use crate::error::VideoError;

pub type Frame = Arc<RgbImage>;

/// How a frame request reaches the decoder. Sequential reads continue the
/// open stream when the frame is the successor of the previous one; random
/// reads always seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    Sequential,
    Random,
}

pub trait FrameSource {
    fn frame_count(&self) -> usize;

    /// Decodes one frame. `Ok(None)` means the source has no such frame.
    fn decode(&mut self, frame: usize, mode: SeekMode) -> Result<Option<Frame>, VideoError>;
}

/// Opens independent frame sources per camera. Each call returns a new
/// handle with its own decode cursor.
pub trait VideoLibrary {
    fn cameras(&self) -> Vec<String>;
    fn open(&self, camera: &str) -> Result<Box<dyn FrameSource>, VideoError>;
}

#[derive(Debug, Clone)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: usize,
}

fn require_tool(tool: &'static str) -> Result<(), VideoError> {
    match Command::new(tool).arg("-version").output() {
        Ok(_) => Ok(()),
        Err(_) => Err(VideoError::ToolMissing(tool)),
    }
}

/// Reads width, height, frame rate and frame count with ffprobe.
pub fn probe(path: &Path) -> Result<VideoInfo, VideoError> {
    if !path.exists() {
        return Err(VideoError::NotFound(path.to_path_buf()));
    }
    require_tool("ffprobe")?;

    let output = Command::new("ffprobe")
        .args(["-v", "error", "-select_streams", "v:0", "-count_frames"])
        .args(["-show_entries", "stream=width,height,r_frame_rate,nb_read_frames"])
        .args(["-of", "csv=p=0"])
        .arg(path)
        .output()?;

    let info = String::from_utf8_lossy(&output.stdout);
    parse_probe_output(path, info.trim())
}

fn parse_probe_output(path: &Path, line: &str) -> Result<VideoInfo, VideoError> {
    let bad = |reason: &str| VideoError::Probe {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 4 {
        return Err(bad("unexpected ffprobe output"));
    }

    let width = parts[0].parse().map_err(|_| bad("invalid width"))?;
    let height = parts[1].parse().map_err(|_| bad("invalid height"))?;
    let fps = match parts[2].split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().map_err(|_| bad("invalid frame rate"))?;
            let den: f64 = den.parse().map_err(|_| bad("invalid frame rate"))?;
            if den == 0.0 {
                return Err(bad("invalid frame rate"));
            }
            num / den
        }
        None => parts[2].parse().map_err(|_| bad("invalid frame rate"))?,
    };
    let frame_count: usize = parts[3].parse().map_err(|_| bad("invalid frame count"))?;
    if frame_count == 0 {
        return Err(bad("video has no frames"));
    }

    Ok(VideoInfo {
        path: path.to_path_buf(),
        width,
        height,
        fps,
        frame_count,
    })
}

struct DecodeStream {
    child: Child,
    stdout: ChildStdout,
}

impl Drop for DecodeStream {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Decodes a video file through an ffmpeg child process emitting raw RGB.
/// The process stays open between sequential reads.
pub struct FfmpegSource {
    info: VideoInfo,
    stream: Option<DecodeStream>,
    next_frame: usize,
}

impl FfmpegSource {
    pub fn open(path: &Path) -> Result<Self, VideoError> {
        let info = probe(path)?;
        require_tool("ffmpeg")?;
        info!(
            "Opened {} ({}x{}, {:.2} fps, {} frames)",
            path.display(),
            info.width,
            info.height,
            info.fps,
            info.frame_count
        );
        Ok(Self {
            info,
            stream: None,
            next_frame: 0,
        })
    }

    pub fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn restart_at(&mut self, frame: usize) -> Result<(), VideoError> {
        self.stream = None;
        let seconds = frame as f64 / self.info.fps;
        debug!("Seeking {} to frame {}", self.info.path.display(), frame);
        let mut child = Command::new("ffmpeg")
            .args(["-v", "error", "-ss", &format!("{:.6}", seconds), "-i"])
            .arg(&self.info.path)
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "ffmpeg stdout unavailable"))?;
        self.stream = Some(DecodeStream { child, stdout });
        self.next_frame = frame;
        Ok(())
    }
}

impl FrameSource for FfmpegSource {
    fn frame_count(&self) -> usize {
        self.info.frame_count
    }

    fn decode(&mut self, frame: usize, mode: SeekMode) -> Result<Option<Frame>, VideoError> {
        if frame >= self.info.frame_count {
            return Ok(None);
        }
        let continues = mode == SeekMode::Sequential && self.stream.is_some() && self.next_frame == frame;
        if !continues {
            self.restart_at(frame)?;
        }

        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        let size = self.info.width as usize * self.info.height as usize * 3;
        let mut bytes = vec![0u8; size];
        match stream.stdout.read_exact(&mut bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                self.stream = None;
                return Ok(None);
            }
            Err(e) => {
                self.stream = None;
                return Err(e.into());
            }
        }
        self.next_frame = frame + 1;
        Ok(RgbImage::from_raw(self.info.width, self.info.height, bytes).map(Arc::new))
    }
}

/// Frames already extracted to `frame_00001.png`, `frame_00002.png`, ...
/// (ffmpeg numbering starts at 1; frame index 0 is `frame_00001.png`).
pub struct FrameDirSource {
    dir: PathBuf,
    frame_count: usize,
}

impl FrameDirSource {
    pub fn open(dir: &Path) -> Result<Self, VideoError> {
        if !dir.is_dir() {
            return Err(VideoError::NotFound(dir.to_path_buf()));
        }
        let frame_count = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .filter(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                name.starts_with("frame_") && name.ends_with(".png")
            })
            .count();
        debug!("Frame directory {} has {} frames", dir.display(), frame_count);
        Ok(Self {
            dir: dir.to_path_buf(),
            frame_count,
        })
    }

    pub fn frame_path(&self, frame: usize) -> PathBuf {
        self.dir.join(format!("frame_{:05}.png", frame + 1))
    }
}

impl FrameSource for FrameDirSource {
    fn frame_count(&self) -> usize {
        self.frame_count
    }

    fn decode(&mut self, frame: usize, _mode: SeekMode) -> Result<Option<Frame>, VideoError> {
        let path = self.frame_path(frame);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(Arc::new(image::open(&path)?.to_rgb8())))
    }
}

/// Extracts every frame of `video` into a fresh uuid-named temp directory
/// readable by [`FrameDirSource`].
pub fn extract_frames(video: &Path) -> Result<PathBuf, VideoError> {
    if !video.exists() {
        return Err(VideoError::NotFound(video.to_path_buf()));
    }
    require_tool("ffmpeg")?;
    let out_dir = std::env::temp_dir().join(format!("proofreader_frames_{}", uuid::Uuid::new_v4()));
    fs::create_dir_all(&out_dir)?;

    info!("Extracting frames of {} to {}", video.display(), out_dir.display());
    let status = Command::new("ffmpeg")
        .args(["-v", "error", "-i"])
        .arg(video)
        .arg(out_dir.join("frame_%05d.png"))
        .status()?;
    if !status.success() {
        let _ = fs::remove_dir_all(&out_dir);
        return Err(VideoError::Probe {
            path: video.to_path_buf(),
            reason: "ffmpeg frame extraction failed".to_string(),
        });
    }
    Ok(out_dir)
}

/// Camera videos found on disk: `<CAM>-*.mp4` files or `<CAM>-*` frame
/// directories in a trial folder or its `Ball` subfolder.
pub struct DiskLibrary {
    sources: BTreeMap<String, PathBuf>,
}

impl DiskLibrary {
    pub fn discover(dir: &Path, cameras: &[&str]) -> Self {
        let mut sources = BTreeMap::new();
        for folder in [dir.to_path_buf(), dir.join("Ball")] {
            let Ok(entries) = fs::read_dir(&folder) else {
                continue;
            };
            let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
            paths.sort();
            for path in paths {
                let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_uppercase()) else {
                    continue;
                };
                let usable = path.is_dir() || name.ends_with(".MP4");
                if !usable {
                    continue;
                }
                for cam in cameras {
                    if name.starts_with(&format!("{}-", cam.to_uppercase())) {
                        sources.entry(cam.to_string()).or_insert_with(|| path.clone());
                    }
                }
            }
        }
        if sources.is_empty() {
            warn!("No camera videos found in {}", dir.display());
        }
        Self { sources }
    }

    pub fn path(&self, camera: &str) -> Option<&Path> {
        self.sources.get(camera).map(PathBuf::as_path)
    }
}

impl VideoLibrary for DiskLibrary {
    fn cameras(&self) -> Vec<String> {
        self.sources.keys().cloned().collect()
    }

    fn open(&self, camera: &str) -> Result<Box<dyn FrameSource>, VideoError> {
        let path = self
            .sources
            .get(camera)
            .ok_or_else(|| VideoError::NotFound(PathBuf::from(camera)))?;
        if path.is_dir() {
            Ok(Box::new(FrameDirSource::open(path)?))
        } else {
            Ok(Box::new(FfmpegSource::open(path)?))
        }
    }
}
