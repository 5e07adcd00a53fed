// src/detection/angle.rs - Angle deviation outliers
use serde::Serialize;
use tracing::{debug, warn};

use crate::body::ChannelKey;
use crate::data::AngleChannel;
use crate::detection::savgol::SavitzkyGolay;
use crate::detection::segmenter::{locate, Window};

/// Flagged frames further apart than this start a new bunch.
pub const MAX_BUNCH_GAP: usize = 4;

/// A gap-tolerant run of frames whose raw-minus-smoothed deviation
/// exceeded the threshold, located inside one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AngleBunch {
    #[serde(rename = "Part")]
    pub channel: String,
    #[serde(skip)]
    pub key: Option<ChannelKey>,
    #[serde(rename = "N")]
    pub window_index: usize,
    #[serde(rename = "Start_Frame")]
    pub start_frame_rel: usize,
    #[serde(rename = "End_Frame")]
    pub end_frame_rel: usize,
    #[serde(rename = "Frame_Count")]
    pub frame_count: usize,
    #[serde(rename = "Max_Difference")]
    pub max_deviation: f64,
    #[serde(rename = "Avg_Difference")]
    pub avg_deviation: f64,
}

/// Result of scanning the configured channels.
#[derive(Debug, Default)]
pub struct AngleScan {
    pub bunches: Vec<AngleBunch>,
    /// Channels not longer than the smoothing window.
    pub skipped_short: Vec<String>,
}

pub struct AngleOutlierDetector {
    filter: SavitzkyGolay,
    threshold: f64,
}

impl AngleOutlierDetector {
    pub fn new(filter: SavitzkyGolay, threshold: f64) -> Self {
        Self { filter, threshold }
    }

    /// Bunches for every channel, each channel's bunches sorted by
    /// descending peak deviation (stable), channels in the given order.
    pub fn scan<'a>(
        &self,
        channels: impl IntoIterator<Item = &'a AngleChannel>,
        windows: &[Window],
    ) -> AngleScan {
        let mut scan = AngleScan::default();
        for channel in channels {
            let Some(smoothed) = self.filter.smooth(&channel.values) else {
                warn!(
                    "Skipping channel {}: {} frames do not exceed smoothing window {}",
                    channel.name,
                    channel.values.len(),
                    self.filter.window()
                );
                scan.skipped_short.push(channel.name.clone());
                continue;
            };
            let deviation: Vec<f64> = channel
                .values
                .iter()
                .zip(smoothed.iter())
                .map(|(raw, smooth)| (raw - smooth).abs())
                .collect();
            let mut bunches = self.bunches_for(channel, &deviation, windows);
            debug!("Channel {}: {} bunches", channel.name, bunches.len());
            bunches.sort_by(|a, b| b.max_deviation.total_cmp(&a.max_deviation));
            scan.bunches.extend(bunches);
        }
        scan
    }

    fn bunches_for(&self, channel: &AngleChannel, deviation: &[f64], windows: &[Window]) -> Vec<AngleBunch> {
        let flagged: Vec<usize> = deviation
            .iter()
            .enumerate()
            .filter(|(_, d)| **d > self.threshold)
            .map(|(i, _)| i)
            .collect();

        let mut out = Vec::new();
        for run in group_runs(&flagged, MAX_BUNCH_GAP) {
            let (Some(first), Some(last)) = (run.first(), run.last()) else {
                continue;
            };
            let (Some((first_window, _)), Some((last_window, _))) =
                (locate(*first, windows), locate(*last, windows))
            else {
                continue;
            };

            if first_window == last_window {
                out.extend(make_bunch(channel, run, deviation, windows));
                continue;
            }

            // A run crossing a window edge is reported once per window it touches.
            let mut piece: Vec<usize> = Vec::new();
            let mut piece_window = first_window;
            for &frame in run {
                match locate(frame, windows) {
                    Some((w, _)) if w == piece_window => piece.push(frame),
                    Some((w, _)) => {
                        out.extend(make_bunch(channel, &piece, deviation, windows));
                        piece = vec![frame];
                        piece_window = w;
                    }
                    None => {}
                }
            }
            out.extend(make_bunch(channel, &piece, deviation, windows));
        }
        out
    }
}

/// Splits ascending frame indices where consecutive entries are more than `max_gap` apart.
pub fn group_runs(frames: &[usize], max_gap: usize) -> Vec<&[usize]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..frames.len() {
        if frames[i] - frames[i - 1] > max_gap {
            runs.push(&frames[start..i]);
            start = i;
        }
    }
    if start < frames.len() {
        runs.push(&frames[start..]);
    }
    runs
}

fn make_bunch(
    channel: &AngleChannel,
    frames: &[usize],
    deviation: &[f64],
    windows: &[Window],
) -> Option<AngleBunch> {
    let (window_index, start_rel) = locate(*frames.first()?, windows)?;
    let (_, end_rel) = locate(*frames.last()?, windows)?;
    let values: Vec<f64> = frames.iter().map(|&f| deviation[f]).collect();
    let max_deviation = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg_deviation = values.iter().sum::<f64>() / values.len() as f64;
    Some(AngleBunch {
        channel: channel.name.clone(),
        key: channel.key.clone(),
        window_index,
        start_frame_rel: start_rel,
        end_frame_rel: end_rel,
        frame_count: frames.len(),
        max_deviation,
        avg_deviation,
    })
}
