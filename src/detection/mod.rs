// src/detection/mod.rs - Outlier detection pipeline
pub mod angle;
pub mod length;
pub mod merge;
pub mod savgol;
pub mod segmenter;

use std::path::Path;

use tracing::info;

use crate::body;
use crate::config::{ChannelSelection, DetectionConfig, DEFAULT_ANGLE_CHANNELS};
use crate::data::{self, AngleChannel, AngleSeries, CoordinateSeries};
use crate::error::{DetectionError, PersistenceError};

use angle::{AngleBunch, AngleOutlierDetector};
use length::{DegenerateSegment, SegmentLengthDetector, SegmentZRow};
use merge::{ErrorInterval, ErrorRow, INTERVAL_HEADER};
use savgol::SavitzkyGolay;
use segmenter::WindowLayout;

pub const INTERVALS_FILE: &str = "bunched_outlier_errors.csv";
pub const ANGLE_OUTLIERS_FILE: &str = "angle_outliers.csv";
pub const SEGMENT_OUTLIERS_FILE: &str = "segment_length_outliers.csv";

/// Every stage's output of one detection run.
#[derive(Debug, Default)]
pub struct DetectionReport {
    pub angle_bunches: Vec<AngleBunch>,
    pub segment_rows: Vec<SegmentZRow>,
    pub error_rows: Vec<ErrorRow>,
    pub intervals: Vec<ErrorInterval>,
    /// Channels too short for the smoothing window.
    pub skipped_channels: Vec<String>,
    pub degenerate_segments: Vec<DegenerateSegment>,
    /// Intervals dropped because their body part is excluded.
    pub excluded: usize,
}

pub struct OutlierDetector {
    config: DetectionConfig,
    layout: WindowLayout,
}

impl OutlierDetector {
    pub fn new(config: DetectionConfig) -> Result<Self, DetectionError> {
        config.validate()?;
        let layout = config.layout()?;
        Ok(Self { config, layout })
    }

    pub fn layout(&self) -> WindowLayout {
        self.layout
    }

    /// Runs all stages over in-memory tables. Pure: identical inputs give identical reports.
    pub fn run(
        &self,
        angles: &AngleSeries,
        coords: &CoordinateSeries,
    ) -> Result<DetectionReport, DetectionError> {
        if coords.total_length() != angles.total_length() {
            return Err(DetectionError::LengthMismatch {
                what: "coordinate table".to_string(),
                expected: angles.total_length(),
                found: coords.total_length(),
            });
        }

        let channels = self.select_channels(angles)?;
        let total_length = angles.total_length();
        let windows = self.layout.build_windows(total_length);
        info!(
            "Detecting outliers over {} frames, {} windows, {} channels",
            total_length,
            windows.len(),
            channels.len()
        );

        let filter = SavitzkyGolay::new(
            self.config.smoothing_window_length,
            self.config.smoothing_poly_order,
        )?;
        let angle_scan = AngleOutlierDetector::new(filter, self.config.difference_threshold)
            .scan(channels, &windows);
        let length_scan =
            SegmentLengthDetector::new(self.config.length_pairs.clone()).scan(coords, &windows);

        let error_rows = merge::build_error_rows(&angle_scan.bunches, &length_scan.rows);
        let mut intervals = merge::bunch_final_errors(&error_rows);

        let before = intervals.len();
        if !self.config.excluded_parts.is_empty() {
            intervals.retain(|i| !body::refers_to_any(&i.name, &self.config.excluded_parts));
        }
        let excluded = before - intervals.len();
        if excluded > 0 {
            info!(
                "Filtered out {} intervals for excluded parts {:?}",
                excluded, self.config.excluded_parts
            );
        }

        info!(
            "Found {} angle bunches, {} segment rows, {} intervals",
            angle_scan.bunches.len(),
            length_scan.rows.len(),
            intervals.len()
        );

        Ok(DetectionReport {
            angle_bunches: angle_scan.bunches,
            segment_rows: length_scan.rows,
            error_rows,
            intervals,
            skipped_channels: angle_scan.skipped_short,
            degenerate_segments: length_scan.degenerate,
            excluded,
        })
    }

    /// Loads both tables, runs the pipeline and, when `output_dir` is given,
    /// writes the interval table (and optionally the per-stage tables) there.
    pub fn run_files(
        &self,
        angles_path: &Path,
        coords_path: &Path,
        output_dir: Option<&Path>,
        write_intermediates: bool,
    ) -> Result<DetectionReport, DetectionError> {
        let angles = AngleSeries::from_csv(angles_path)?;
        let coords = CoordinateSeries::from_csv(coords_path)?;
        let report = self.run(&angles, &coords)?;

        if let Some(dir) = output_dir {
            write_intervals(&dir.join(INTERVALS_FILE), &report.intervals)?;
            if write_intermediates {
                data::write_csv_atomic(
                    &dir.join(ANGLE_OUTLIERS_FILE),
                    &[
                        "Part",
                        "N",
                        "Start_Frame",
                        "End_Frame",
                        "Frame_Count",
                        "Max_Difference",
                        "Avg_Difference",
                    ],
                    &report.angle_bunches,
                )?;
                data::write_csv_atomic(
                    &dir.join(SEGMENT_OUTLIERS_FILE),
                    &["Part", "N", "Frame", "Length", "Mean_Length", "Std_Dev", "Z-score"],
                    &report.segment_rows,
                )?;
            }
            info!("Wrote detection output to {}", dir.display());
        }
        Ok(report)
    }

    fn select_channels<'a>(
        &self,
        angles: &'a AngleSeries,
    ) -> Result<Vec<&'a AngleChannel>, DetectionError> {
        let require = |name: &str| {
            angles
                .channel(name)
                .ok_or_else(|| DetectionError::MissingChannel(name.to_string()))
        };
        match &self.config.angle_channels {
            ChannelSelection::Default => DEFAULT_ANGLE_CHANNELS.iter().map(|n| require(*n)).collect(),
            ChannelSelection::Explicit(names) => names.iter().map(|n| require(n.as_str())).collect(),
            ChannelSelection::All => Ok(angles
                .channels()
                .iter()
                .filter(|c| c.name.chars().any(|ch| ch.is_ascii_digit()) && !c.name.contains('A'))
                .collect()),
        }
    }
}

pub fn write_intervals(path: &Path, intervals: &[ErrorInterval]) -> Result<(), PersistenceError> {
    data::write_csv_atomic(path, &INTERVAL_HEADER, intervals)
}

pub fn read_intervals(path: &Path) -> Result<Vec<ErrorInterval>, PersistenceError> {
    data::read_csv(path)
}
