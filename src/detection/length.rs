// src/detection/length.rs - Segment length z-scores
use serde::Serialize;
use tracing::{debug, info};

use crate::body::{BodyPartKey, Leg, Side};
use crate::data::CoordinateSeries;
use crate::detection::segmenter::{locate, Window};

/// Z-score of one body segment's length at one frame inside a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentZRow {
    #[serde(skip)]
    pub side: Side,
    #[serde(skip)]
    pub leg: Leg,
    #[serde(rename = "Part")]
    pub label: String,
    #[serde(rename = "N")]
    pub window_index: usize,
    #[serde(rename = "Frame")]
    pub frame_rel: usize,
    #[serde(rename = "Length")]
    pub length: f64,
    #[serde(rename = "Mean_Length")]
    pub mean_length: f64,
    #[serde(rename = "Std_Dev")]
    pub std_length: f64,
    #[serde(rename = "Z-score")]
    pub z_score: f64,
}

/// A side/leg/segment combination that produced no rows because its length never varied.
#[derive(Debug, Clone, PartialEq)]
pub struct DegenerateSegment {
    pub side: Side,
    pub leg: Leg,
    pub pair: (String, String),
}

#[derive(Debug, Default)]
pub struct LengthScan {
    pub rows: Vec<SegmentZRow>,
    pub degenerate: Vec<DegenerateSegment>,
}

pub struct SegmentLengthDetector {
    pairs: Vec<(String, String)>,
}

impl SegmentLengthDetector {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }

    pub fn scan(&self, coords: &CoordinateSeries, windows: &[Window]) -> LengthScan {
        let mut scan = LengthScan::default();
        for side in Side::ALL {
            for leg in Leg::ALL {
                for (start_joint, end_joint) in &self.pairs {
                    let start = BodyPartKey::new(side, leg, start_joint.as_str());
                    let end = BodyPartKey::new(side, leg, end_joint.as_str());
                    let (Some(a), Some(b)) = (coords.joint(&start), coords.joint(&end)) else {
                        debug!("No coordinates for {} / {}, skipping", start, end);
                        continue;
                    };

                    let lengths: Vec<f64> = a.iter().zip(b.iter()).map(|(p, q)| (q - p).norm()).collect();
                    let Some((mean, std)) = population_stats(&lengths) else {
                        info!(
                            "Segment {}-{} on {}{} has no length variance, skipping",
                            start_joint,
                            end_joint,
                            side.code(),
                            leg.number()
                        );
                        scan.degenerate.push(DegenerateSegment {
                            side,
                            leg,
                            pair: (start_joint.clone(), end_joint.clone()),
                        });
                        continue;
                    };

                    let label = format!(
                        "{}-{}: {}-{}",
                        side.code(),
                        leg.number(),
                        start_joint,
                        end_joint
                    );
                    for (frame, length) in lengths.iter().enumerate() {
                        let Some((window_index, frame_rel)) = locate(frame, windows) else {
                            continue;
                        };
                        scan.rows.push(SegmentZRow {
                            side,
                            leg,
                            label: label.clone(),
                            window_index,
                            frame_rel,
                            length: *length,
                            mean_length: mean,
                            std_length: std,
                            z_score: (length - mean) / std,
                        });
                    }
                }
            }
        }
        scan
    }
}

/// Population mean and standard deviation, `None` when the deviation is zero
/// or not finite.
pub fn population_stats(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    if std > 0.0 && std.is_finite() {
        Some((mean, std))
    } else {
        None
    }
}
