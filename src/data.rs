// src/data.rs - Tabular input/output for angle, coordinate and review tables
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use nalgebra::Vector3;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::body::{BodyPartKey, ChannelKey};
use crate::error::{DetectionError, PersistenceError};

/// One named angle signal, one value per frame.
#[derive(Debug, Clone)]
pub struct AngleChannel {
    pub name: String,
    /// Side/leg identity when the name follows the `R1D_flex` convention.
    pub key: Option<ChannelKey>,
    pub values: Vec<f64>,
}

/// Angle channels in column order. All channels share one length.
#[derive(Debug, Clone, Default)]
pub struct AngleSeries {
    channels: Vec<AngleChannel>,
    total_length: usize,
}

impl AngleSeries {
    pub fn new(channels: Vec<(String, Vec<f64>)>) -> Result<Self, DetectionError> {
        let total_length = channels.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut out = Vec::with_capacity(channels.len());
        for (name, values) in channels {
            if values.len() != total_length {
                return Err(DetectionError::LengthMismatch {
                    what: format!("angle channel {}", name),
                    expected: total_length,
                    found: values.len(),
                });
            }
            out.push(AngleChannel {
                key: ChannelKey::parse(&name),
                name,
                values,
            });
        }
        Ok(Self {
            channels: out,
            total_length,
        })
    }

    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self, DetectionError> {
        let (headers, columns) = read_numeric_columns(path.as_ref())?;
        Self::new(headers.into_iter().zip(columns).collect())
    }

    pub fn total_length(&self) -> usize {
        self.total_length
    }

    pub fn channel(&self, name: &str) -> Option<&AngleChannel> {
        self.channels.iter().find(|c| c.name == name)
    }

    pub fn channels(&self) -> &[AngleChannel] {
        &self.channels
    }
}

/// 3D joint trajectories keyed by limb joint. Parts that are not leg joints
/// (antennae, notum, wing hinges) are not needed for segment lengths and are dropped.
#[derive(Debug, Clone, Default)]
pub struct CoordinateSeries {
    joints: HashMap<BodyPartKey, Vec<Vector3<f64>>>,
    total_length: usize,
}

impl CoordinateSeries {
    pub fn new(
        total_length: usize,
        joints: Vec<(BodyPartKey, Vec<Vector3<f64>>)>,
    ) -> Result<Self, DetectionError> {
        let mut map = HashMap::with_capacity(joints.len());
        for (key, points) in joints {
            if points.len() != total_length {
                return Err(DetectionError::LengthMismatch {
                    what: format!("joint {}", key),
                    expected: total_length,
                    found: points.len(),
                });
            }
            map.insert(key, points);
        }
        Ok(Self {
            joints: map,
            total_length,
        })
    }

    /// Reads `{part}_x`, `{part}_y`, `{part}_z` columns. A part missing any
    /// of the three axes is left out.
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self, DetectionError> {
        let (headers, columns) = read_numeric_columns(path.as_ref())?;
        let total_length = columns.first().map(Vec::len).unwrap_or(0);

        let mut axes: HashMap<&str, [Option<usize>; 3]> = HashMap::new();
        for (i, header) in headers.iter().enumerate() {
            let Some((part, axis)) = header.rsplit_once('_') else {
                continue;
            };
            let slot = match axis {
                "x" => 0,
                "y" => 1,
                "z" => 2,
                _ => continue,
            };
            axes.entry(part).or_default()[slot] = Some(i);
        }

        let mut joints = Vec::new();
        for (part, idx) in axes {
            let (Some(xi), Some(yi), Some(zi)) = (idx[0], idx[1], idx[2]) else {
                debug!("Skipping {}: incomplete xyz columns", part);
                continue;
            };
            let Some(key) = BodyPartKey::parse(part) else {
                debug!("Skipping {}: not a leg joint", part);
                continue;
            };
            let points = (0..total_length)
                .map(|f| Vector3::new(columns[xi][f], columns[yi][f], columns[zi][f]))
                .collect();
            joints.push((key, points));
        }
        Self::new(total_length, joints)
    }

    pub fn total_length(&self) -> usize {
        self.total_length
    }

    pub fn joint(&self, key: &BodyPartKey) -> Option<&[Vector3<f64>]> {
        self.joints.get(key).map(Vec::as_slice)
    }
}

/// Reads a numeric CSV into column vectors. Rows with the wrong field count
/// are skipped; empty or non-numeric cells become NaN.
fn read_numeric_columns(path: &Path) -> Result<(Vec<String>, Vec<Vec<f64>>), DetectionError> {
    let csv_err = |source| DetectionError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(csv_err)?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.is_empty() || headers.iter().all(String::is_empty) {
        return Err(DetectionError::EmptyTable {
            path: path.to_path_buf(),
        });
    }

    let mut columns = vec![Vec::new(); headers.len()];
    let mut skipped = 0usize;
    for record in reader.records() {
        let record = record.map_err(csv_err)?;
        if record.len() != headers.len() {
            skipped += 1;
            continue;
        }
        for (column, cell) in columns.iter_mut().zip(record.iter()) {
            column.push(cell.trim().parse::<f64>().unwrap_or(f64::NAN));
        }
    }
    if skipped > 0 {
        warn!("Skipped {} malformed rows in {}", skipped, path.display());
    }
    Ok((headers, columns))
}

/// Writes `path` through a uuid-named temporary file in the same directory,
/// renamed over the target only after the contents are fully on disk.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<(), PersistenceError>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<(), PersistenceError>,
{
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(|e| PersistenceError::io(&parent, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let temp_path = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

    let result = File::create(&temp_path)
        .map_err(|e| PersistenceError::io(&temp_path, e))
        .and_then(|file| {
            let mut writer = BufWriter::new(file);
            write(&mut writer)?;
            writer.flush().map_err(|e| PersistenceError::io(&temp_path, e))?;
            writer
                .get_ref()
                .sync_all()
                .map_err(|e| PersistenceError::io(&temp_path, e))
        })
        .and_then(|_| std::fs::rename(&temp_path, path).map_err(|e| PersistenceError::io(path, e)));

    if result.is_err() {
        let _ = std::fs::remove_file(&temp_path);
    }
    result
}

/// Writes a header row followed by serialized rows, atomically.
/// The header is written even when there are no rows.
pub fn write_csv_atomic<T: Serialize>(
    path: &Path,
    header: &[&str],
    rows: &[T],
) -> Result<(), PersistenceError> {
    write_atomic(path, |out| {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(out);
        writer
            .write_record(header)
            .map_err(|e| PersistenceError::csv(path, e))?;
        for row in rows {
            writer
                .serialize(row)
                .map_err(|e| PersistenceError::csv(path, e))?;
        }
        writer.flush().map_err(|e| PersistenceError::io(path, e))
    })
}

/// Reads serde rows from a CSV with a header. An empty file yields no rows.
pub fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, PersistenceError> {
    let metadata = std::fs::metadata(path).map_err(|e| PersistenceError::io(path, e))?;
    if metadata.len() == 0 {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path).map_err(|e| PersistenceError::csv(path, e))?;
    reader
        .deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| PersistenceError::csv(path, e))
}
