// src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// Failures that abort a detection run. Partial results would under-report
/// anomalies, so none of these are recovered locally.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("window length must be positive, got {0}")]
    InvalidWindowLength(usize),

    #[error("smoothing window {window} must exceed polynomial order {order}")]
    InvalidSmoothing { window: usize, order: usize },

    #[error("series length mismatch: {what} has {found} frames, expected {expected}")]
    LengthMismatch {
        what: String,
        expected: usize,
        found: usize,
    },

    #[error("required angle channel `{0}` not found in angle table")]
    MissingChannel(String),

    #[error("table {path} is empty or has no header")]
    EmptyTable { path: PathBuf },

    #[error("failed to read {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Failures while writing or reading persisted review state.
/// Callers keep their dirty state so the next flush retries.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("malformed pose table {path}: {reason}")]
    MalformedPoseTable { path: PathBuf, reason: String },

    #[error("no pose table loaded for camera {0}")]
    NoPoseTable(String),
}

impl PersistenceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PersistenceError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        PersistenceError::Csv {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PoseEditError {
    #[error("no pose table loaded for camera {0}")]
    UnknownCamera(String),

    #[error("camera {camera} has no landmark `{landmark}`")]
    UnknownLandmark { camera: String, landmark: String },

    #[error("frame {frame} is outside the pose table for camera {camera} ({frames} frames)")]
    FrameOutOfRange {
        camera: String,
        frame: usize,
        frames: usize,
    },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("pose editing is disabled while playback is active")]
    EditingDisabled,

    #[error("no interval is selected")]
    NoInterval,

    #[error("no camera is selected")]
    NoCamera,

    #[error("no landmark given and no target landmark selected")]
    NoTargetLandmark,

    #[error(transparent)]
    Edit(#[from] PoseEditError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Error)]
pub enum VideoError {
    #[error("video file does not exist: {0}")]
    NotFound(PathBuf),

    #[error("ffmpeg tool `{0}` is not installed or not in PATH")]
    ToolMissing(&'static str),

    #[error("could not probe {path}: {reason}")]
    Probe { path: PathBuf, reason: String },

    #[error("decoder I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("image decode failure: {0}")]
    Image(#[from] image::ImageError),
}
