// src/pose.rs - Per-camera 2D pose tables and the edit store that owns them
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::data;
use crate::error::{PersistenceError, PoseEditError};

const COORDS: [&str; 3] = ["x", "y", "likelihood"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LandmarkPoint {
    pub x: f64,
    pub y: f64,
    pub confidence: f64,
}

impl LandmarkPoint {
    pub const DELETED: LandmarkPoint = LandmarkPoint {
        x: f64::NAN,
        y: f64::NAN,
        confidence: 0.0,
    };

    pub fn is_deleted(&self) -> bool {
        self.confidence == 0.0 && self.x.is_nan() && self.y.is_nan()
    }
}

/// Landmark positions for every frame of one camera.
///
/// On disk this is a CSV with three header rows (`scorer`, `bodyparts`,
/// `coords`) followed by one row per frame: the frame index, then
/// `x, y, likelihood` for each landmark. Missing values are empty cells.
#[derive(Debug, Clone)]
pub struct PoseTable {
    scorer: String,
    landmarks: Vec<String>,
    index: HashMap<String, usize>,
    frames: Vec<Vec<LandmarkPoint>>,
}

impl PoseTable {
    pub fn new(scorer: impl Into<String>, landmarks: Vec<String>, frame_count: usize) -> Self {
        let empty = vec![
            LandmarkPoint {
                x: f64::NAN,
                y: f64::NAN,
                confidence: 0.0,
            };
            landmarks.len()
        ];
        let index = landmarks
            .iter()
            .enumerate()
            .map(|(i, l)| (l.clone(), i))
            .collect();
        Self {
            scorer: scorer.into(),
            landmarks,
            index,
            frames: vec![empty; frame_count],
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn landmarks(&self) -> &[String] {
        &self.landmarks
    }

    pub fn get(&self, frame: usize, landmark: &str) -> Option<LandmarkPoint> {
        let column = *self.index.get(landmark)?;
        self.frames.get(frame).map(|row| row[column])
    }

    /// All landmarks at one frame, in column order.
    pub fn frame(&self, frame: usize) -> Option<&[LandmarkPoint]> {
        self.frames.get(frame).map(Vec::as_slice)
    }

    fn slot(&mut self, camera: &str, frame: usize, landmark: &str) -> Result<&mut LandmarkPoint, PoseEditError> {
        let frames = self.frames.len();
        let column = *self
            .index
            .get(landmark)
            .ok_or_else(|| PoseEditError::UnknownLandmark {
                camera: camera.to_string(),
                landmark: landmark.to_string(),
            })?;
        let row = self
            .frames
            .get_mut(frame)
            .ok_or_else(|| PoseEditError::FrameOutOfRange {
                camera: camera.to_string(),
                frame,
                frames,
            })?;
        Ok(&mut row[column])
    }

    pub fn read(path: &Path) -> Result<Self, PersistenceError> {
        let malformed = |reason: &str| PersistenceError::MalformedPoseTable {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .map_err(|e| PersistenceError::csv(path, e))?;
        let mut records = reader.records();
        let mut header_row = |name: &str| -> Result<Vec<String>, PersistenceError> {
            let record = records
                .next()
                .ok_or_else(|| malformed(&format!("missing `{}` header row", name)))?
                .map_err(|e| PersistenceError::csv(path, e))?;
            Ok(record.iter().skip(1).map(|c| c.trim().to_string()).collect())
        };

        let scorers = header_row("scorer")?;
        let bodyparts = header_row("bodyparts")?;
        let coords = header_row("coords")?;
        if bodyparts.len() != coords.len() || coords.len() % COORDS.len() != 0 {
            return Err(malformed("header rows disagree in width"));
        }

        let mut landmarks = Vec::with_capacity(coords.len() / COORDS.len());
        for (i, chunk) in coords.chunks(COORDS.len()).enumerate() {
            if chunk != COORDS {
                return Err(malformed(&format!("unexpected coords {:?}", chunk)));
            }
            let part = &bodyparts[i * COORDS.len()];
            if bodyparts[i * COORDS.len()..(i + 1) * COORDS.len()]
                .iter()
                .any(|b| b != part)
            {
                return Err(malformed(&format!("split columns for landmark {}", part)));
            }
            landmarks.push(part.clone());
        }

        let scorer = scorers.first().cloned().unwrap_or_default();
        let mut table = PoseTable::new(scorer, landmarks, 0);
        let width = coords.len() + 1;
        for record in records {
            let record = record.map_err(|e| PersistenceError::csv(path, e))?;
            if record.len() != width {
                return Err(malformed(&format!(
                    "row {} has {} cells, expected {}",
                    table.frames.len(),
                    record.len(),
                    width
                )));
            }
            let values: Vec<f64> = record
                .iter()
                .skip(1)
                .map(|c| c.trim().parse::<f64>().unwrap_or(f64::NAN))
                .collect();
            table.frames.push(
                values
                    .chunks(COORDS.len())
                    .map(|v| LandmarkPoint {
                        x: v[0],
                        y: v[1],
                        confidence: if v[2].is_nan() { 0.0 } else { v[2] },
                    })
                    .collect(),
            );
        }
        debug!(
            "Read pose table {}: {} landmarks, {} frames",
            path.display(),
            table.landmarks.len(),
            table.frames.len()
        );
        Ok(table)
    }

    /// Writes the whole table through a temporary file and renames it into place.
    pub fn write(&self, path: &Path) -> Result<(), PersistenceError> {
        let cell = |v: f64| if v.is_nan() { String::new() } else { v.to_string() };
        data::write_atomic(path, |out| {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(out);
            let mut put = |record: Vec<String>| {
                writer
                    .write_record(&record)
                    .map_err(|e| PersistenceError::csv(path, e))
            };

            let width = self.landmarks.len() * COORDS.len();
            put(std::iter::once("scorer".to_string())
                .chain(std::iter::repeat(self.scorer.clone()).take(width))
                .collect())?;
            put(std::iter::once("bodyparts".to_string())
                .chain(
                    self.landmarks
                        .iter()
                        .flat_map(|l| std::iter::repeat(l.clone()).take(COORDS.len())),
                )
                .collect())?;
            put(std::iter::once("coords".to_string())
                .chain(
                    self.landmarks
                        .iter()
                        .flat_map(|_| COORDS.iter().map(|c| c.to_string())),
                )
                .collect())?;
            for (frame, row) in self.frames.iter().enumerate() {
                put(std::iter::once(frame.to_string())
                    .chain(row.iter().flat_map(|p| [cell(p.x), cell(p.y), cell(p.confidence)]))
                    .collect())?;
            }
            writer.flush().map_err(|e| PersistenceError::io(path, e))
        })
    }
}

/// Finds `<anything>-<CAMERA>.csv` pose tables in `dir`, keyed by camera letter.
pub fn discover_pose_tables(dir: &Path, cameras: &[&str]) -> BTreeMap<String, PathBuf> {
    let mut found = BTreeMap::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return found;
    };
    let mut names: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    names.sort();
    for path in names {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_uppercase()) else {
            continue;
        };
        for cam in cameras {
            if name.ends_with(&format!("-{}.CSV", cam.to_uppercase())) {
                found.entry(cam.to_string()).or_insert_with(|| path.clone());
            }
        }
    }
    found
}

struct CameraPose {
    table: PoseTable,
    path: PathBuf,
}

/// Progress callback payload for multi-camera flushes.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushProgress<'a> {
    pub camera: &'a str,
    pub done: usize,
    pub total: usize,
}

#[derive(Debug, Default)]
pub struct FlushSummary {
    pub flushed: Vec<String>,
    pub failed: Vec<(String, PersistenceError)>,
}

impl FlushSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Owns every loaded pose table and tracks which cameras have unsaved edits.
#[derive(Default)]
pub struct PoseEditStore {
    cameras: BTreeMap<String, CameraPose>,
    dirty: BTreeSet<String>,
}

impl PoseEditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, camera: impl Into<String>, table: PoseTable, path: PathBuf) {
        let camera = camera.into();
        self.dirty.remove(&camera);
        self.cameras.insert(camera, CameraPose { table, path });
    }

    pub fn load(&mut self, camera: impl Into<String>, path: &Path) -> Result<(), PersistenceError> {
        let camera = camera.into();
        let table = PoseTable::read(path)?;
        info!(
            "Loaded pose table for camera {} ({} frames)",
            camera,
            table.frame_count()
        );
        self.insert(camera, table, path.to_path_buf());
        Ok(())
    }

    pub fn has_camera(&self, camera: &str) -> bool {
        self.cameras.contains_key(camera)
    }

    pub fn table(&self, camera: &str) -> Option<&PoseTable> {
        self.cameras.get(camera).map(|c| &c.table)
    }

    pub fn get(&self, camera: &str, frame: usize, landmark: &str) -> Result<LandmarkPoint, PoseEditError> {
        let table = self.table(camera).ok_or_else(|| PoseEditError::UnknownCamera(camera.to_string()))?;
        if frame >= table.frame_count() {
            return Err(PoseEditError::FrameOutOfRange {
                camera: camera.to_string(),
                frame,
                frames: table.frame_count(),
            });
        }
        table.get(frame, landmark).ok_or_else(|| PoseEditError::UnknownLandmark {
            camera: camera.to_string(),
            landmark: landmark.to_string(),
        })
    }

    fn slot(&mut self, camera: &str, frame: usize, landmark: &str) -> Result<&mut LandmarkPoint, PoseEditError> {
        let pose = self
            .cameras
            .get_mut(camera)
            .ok_or_else(|| PoseEditError::UnknownCamera(camera.to_string()))?;
        pose.table.slot(camera, frame, landmark)
    }

    pub fn set(
        &mut self,
        camera: &str,
        frame: usize,
        landmark: &str,
        x: f64,
        y: f64,
        confidence: f64,
    ) -> Result<(), PoseEditError> {
        *self.slot(camera, frame, landmark)? = LandmarkPoint { x, y, confidence };
        self.dirty.insert(camera.to_string());
        Ok(())
    }

    /// Marks a landmark deleted. The slot stays so every frame keeps the same landmark count.
    pub fn delete(&mut self, camera: &str, frame: usize, landmark: &str) -> Result<(), PoseEditError> {
        *self.slot(camera, frame, landmark)? = LandmarkPoint::DELETED;
        self.dirty.insert(camera.to_string());
        Ok(())
    }

    /// Restores a landmark at full confidence, keeping its last finite position or the origin.
    pub fn place(&mut self, camera: &str, frame: usize, landmark: &str) -> Result<LandmarkPoint, PoseEditError> {
        let slot = self.slot(camera, frame, landmark)?;
        let (x, y) = if slot.x.is_finite() && slot.y.is_finite() {
            (slot.x, slot.y)
        } else {
            (0.0, 0.0)
        };
        *slot = LandmarkPoint { x, y, confidence: 1.0 };
        let placed = *slot;
        self.dirty.insert(camera.to_string());
        Ok(placed)
    }

    pub fn is_dirty(&self, camera: &str) -> bool {
        self.dirty.contains(camera)
    }

    pub fn any_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn dirty_cameras(&self) -> impl Iterator<Item = &str> {
        self.dirty.iter().map(String::as_str)
    }

    /// Persists the full table for `camera` if it has edits. The dirty flag
    /// is cleared only when the write succeeds. Returns whether a write happened.
    pub fn flush(&mut self, camera: &str) -> Result<bool, PersistenceError> {
        if !self.dirty.contains(camera) {
            return Ok(false);
        }
        let pose = self
            .cameras
            .get(camera)
            .ok_or_else(|| PersistenceError::NoPoseTable(camera.to_string()))?;
        pose.table.write(&pose.path)?;
        self.dirty.remove(camera);
        info!("Saved pose edits for camera {} to {}", camera, pose.path.display());
        Ok(true)
    }

    /// Flushes every dirty camera, reporting progress after each one.
    /// Failures are logged and collected; their cameras stay dirty.
    pub fn flush_all<F>(&mut self, mut progress: F) -> FlushSummary
    where
        F: FnMut(FlushProgress<'_>),
    {
        let pending: Vec<String> = self.dirty.iter().cloned().collect();
        let total = pending.len();
        let mut summary = FlushSummary::default();
        for (i, camera) in pending.into_iter().enumerate() {
            match self.flush(&camera) {
                Ok(_) => summary.flushed.push(camera.clone()),
                Err(e) => {
                    error!("Failed to save pose edits for camera {}: {}", camera, e);
                    summary.failed.push((camera.clone(), e));
                }
            }
            progress(FlushProgress {
                camera: &camera,
                done: i + 1,
                total,
            });
        }
        summary
    }
}
