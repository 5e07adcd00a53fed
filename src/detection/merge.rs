// src/detection/merge.rs - Combine angle and segment-length evidence into review intervals
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::body::{Leg, Side};
use crate::detection::angle::AngleBunch;
use crate::detection::length::SegmentZRow;

/// Angle deviations are divided by this before entering the error signal.
pub const ANGLE_ERROR_SCALE: f64 = 10.0;
/// Absolute z-scores are divided by this before entering the error signal.
pub const LENGTH_ERROR_SCALE: f64 = 10.0;
/// Error rows further apart than this start a new interval.
pub const MAX_INTERVAL_GAP: usize = 3;

pub const INTERVAL_HEADER: [&str; 11] = [
    "Outlier_Name",
    "N",
    "Start_Frame",
    "End_Frame",
    "Frame_Count",
    "Max_Error",
    "Avg_Error",
    "Max_Angle_Error",
    "Avg_Angle_Error",
    "Max_Length_Error",
    "Avg_Length_Error",
];

/// One frame of one angle bunch with its combined error.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRow {
    pub name: String,
    pub limb: Option<(Side, Leg)>,
    pub window_index: usize,
    pub frame: usize,
    pub total_error: f64,
    pub angle_error: f64,
    pub length_error: f64,
}

/// The unit an operator reviews. Frames are relative to window `window_index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInterval {
    #[serde(rename = "Outlier_Name")]
    pub name: String,
    #[serde(rename = "N")]
    pub window_index: usize,
    #[serde(rename = "Start_Frame")]
    pub start_frame: usize,
    #[serde(rename = "End_Frame")]
    pub end_frame: usize,
    #[serde(rename = "Frame_Count")]
    pub frame_count: usize,
    #[serde(rename = "Max_Error")]
    pub max_error: f64,
    #[serde(rename = "Avg_Error")]
    pub avg_error: f64,
    #[serde(rename = "Max_Angle_Error")]
    pub max_angle_error: f64,
    #[serde(rename = "Avg_Angle_Error")]
    pub avg_angle_error: f64,
    #[serde(rename = "Max_Length_Error")]
    pub max_length_error: f64,
    #[serde(rename = "Avg_Length_Error")]
    pub avg_length_error: f64,
}

type JoinKey = (Side, Leg, usize, usize);

/// Expands every bunch into per-frame rows and folds in the matching
/// segment z-score. Rows with no match (or channels without limb identity)
/// keep a length error of zero.
pub fn build_error_rows(bunches: &[AngleBunch], segments: &[SegmentZRow]) -> Vec<ErrorRow> {
    // Several segment pairs on one limb collapse to the strongest deviation.
    let mut z_by_key: HashMap<JoinKey, f64> = HashMap::new();
    for row in segments {
        let key = (row.side, row.leg, row.window_index, row.frame_rel);
        let z = row.z_score.abs();
        z_by_key
            .entry(key)
            .and_modify(|current| *current = current.max(z))
            .or_insert(z);
    }

    let mut rows = Vec::new();
    for bunch in bunches {
        let angle_error = bunch.avg_deviation / ANGLE_ERROR_SCALE;
        let limb = bunch.key.as_ref().map(|k| (k.side, k.leg));
        for frame in bunch.start_frame_rel..=bunch.end_frame_rel {
            let z = limb
                .and_then(|(side, leg)| z_by_key.get(&(side, leg, bunch.window_index, frame)))
                .copied()
                .unwrap_or(0.0);
            let length_error = z / LENGTH_ERROR_SCALE;
            rows.push(ErrorRow {
                name: bunch.channel.clone(),
                limb,
                window_index: bunch.window_index,
                frame,
                total_error: angle_error + length_error,
                angle_error,
                length_error,
            });
        }
    }
    rows
}

/// Groups rows by (name, window), splits each group where frames are more
/// than [`MAX_INTERVAL_GAP`] apart, and orders the intervals by descending
/// peak error. Ties keep (name, window, start) order.
pub fn bunch_final_errors(rows: &[ErrorRow]) -> Vec<ErrorInterval> {
    let mut groups: BTreeMap<(&str, usize), Vec<&ErrorRow>> = BTreeMap::new();
    for row in rows {
        groups
            .entry((row.name.as_str(), row.window_index))
            .or_default()
            .push(row);
    }

    let mut intervals = Vec::new();
    for ((name, window_index), mut group) in groups {
        group.sort_by_key(|r| r.frame);
        let mut start = 0;
        for i in 1..=group.len() {
            if i == group.len() || group[i].frame - group[i - 1].frame > MAX_INTERVAL_GAP {
                intervals.push(summarize(name, window_index, &group[start..i]));
                start = i;
            }
        }
    }

    intervals.sort_by(|a, b| b.max_error.total_cmp(&a.max_error));
    intervals
}

fn summarize(name: &str, window_index: usize, run: &[&ErrorRow]) -> ErrorInterval {
    let start_frame = run.iter().map(|r| r.frame).min().unwrap_or(0);
    let end_frame = run.iter().map(|r| r.frame).max().unwrap_or(0);
    let stats = |f: fn(&ErrorRow) -> f64| {
        let max = run.iter().map(|r| f(*r)).fold(f64::NEG_INFINITY, f64::max);
        let avg = run.iter().map(|r| f(*r)).sum::<f64>() / run.len() as f64;
        (max, avg)
    };
    let (max_error, avg_error) = stats(|r| r.total_error);
    let (max_angle_error, avg_angle_error) = stats(|r| r.angle_error);
    let (max_length_error, avg_length_error) = stats(|r| r.length_error);
    ErrorInterval {
        name: name.to_string(),
        window_index,
        start_frame,
        end_frame,
        frame_count: end_frame - start_frame + 1,
        max_error,
        avg_error,
        max_angle_error,
        avg_angle_error,
        max_length_error,
        avg_length_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::ChannelKey;

    fn bunch(channel: &str, window: usize, start: usize, end: usize, avg: f64) -> AngleBunch {
        AngleBunch {
            channel: channel.to_string(),
            key: ChannelKey::parse(channel),
            window_index: window,
            start_frame_rel: start,
            end_frame_rel: end,
            frame_count: end - start + 1,
            max_deviation: avg,
            avg_deviation: avg,
        }
    }

    fn z_row(side: Side, leg: Leg, window: usize, frame: usize, z: f64) -> SegmentZRow {
        SegmentZRow {
            side,
            leg,
            label: format!("{}-{}: TiTa-TaG", side.code(), leg.number()),
            window_index: window,
            frame_rel: frame,
            length: 1.0,
            mean_length: 1.0,
            std_length: 1.0,
            z_score: z,
        }
    }

    #[test]
    fn test_expand_without_segments() {
        let rows = build_error_rows(&[bunch("R1D_flex", 1, 10, 12, 20.0)], &[]);
        assert_eq!(rows.len(), 3);
        for (row, frame) in rows.iter().zip(10..) {
            assert_eq!(row.frame, frame);
            assert_eq!(row.angle_error, 2.0);
            assert_eq!(row.length_error, 0.0);
            assert_eq!(row.total_error, 2.0);
        }
    }

    #[test]
    fn test_join_matches_side_leg_window_frame() {
        let segments = vec![
            z_row(Side::Right, Leg::Front, 1, 11, -5.0),
            // wrong leg, wrong window, wrong side
            z_row(Side::Right, Leg::Mid, 1, 10, 9.0),
            z_row(Side::Right, Leg::Front, 2, 10, 9.0),
            z_row(Side::Left, Leg::Front, 1, 10, 9.0),
        ];
        let rows = build_error_rows(&[bunch("R1D_flex", 1, 10, 12, 20.0)], &segments);
        assert_eq!(rows[0].length_error, 0.0);
        assert!((rows[1].length_error - 0.5).abs() < 1e-12);
        assert!((rows[1].total_error - 2.5).abs() < 1e-12);
        assert_eq!(rows[2].length_error, 0.0);
    }

    #[test]
    fn test_unparsed_channel_never_joins() {
        let segments = vec![z_row(Side::Right, Leg::Front, 1, 10, 9.0)];
        let rows = build_error_rows(&[bunch("custom_angle", 1, 10, 10, 20.0)], &segments);
        assert_eq!(rows[0].length_error, 0.0);
    }

    #[test]
    fn test_rebunch_splits_on_gap_over_three() {
        let rows = build_error_rows(
            &[
                bunch("R1D_flex", 1, 10, 12, 20.0),
                bunch("R1D_flex", 1, 15, 16, 40.0),
                bunch("R1D_flex", 1, 21, 22, 10.0),
            ],
            &[],
        );
        let intervals = bunch_final_errors(&rows);
        assert_eq!(intervals.len(), 2);
        // frames 10..=12 and 15..=16 merge (gap 3), 21..=22 stays apart (gap 5)
        let merged = &intervals[0];
        assert_eq!((merged.start_frame, merged.end_frame), (10, 16));
        assert_eq!(merged.frame_count, 7);
        assert_eq!(merged.max_error, 4.0);
        assert!((merged.avg_error - (2.0 * 3.0 + 4.0 * 2.0) / 5.0).abs() < 1e-12);
        assert_eq!((intervals[1].start_frame, intervals[1].end_frame), (21, 22));
    }

    #[test]
    fn test_groups_do_not_mix_channels_or_windows() {
        let rows = build_error_rows(
            &[
                bunch("R1D_flex", 1, 10, 12, 20.0),
                bunch("L1D_flex", 1, 10, 12, 30.0),
                bunch("R1D_flex", 2, 10, 12, 50.0),
            ],
            &[],
        );
        let intervals = bunch_final_errors(&rows);
        assert_eq!(intervals.len(), 3);
        let order: Vec<_> = intervals.iter().map(|i| (i.name.as_str(), i.window_index)).collect();
        assert_eq!(order, vec![("R1D_flex", 2), ("L1D_flex", 1), ("R1D_flex", 1)]);
    }

    #[test]
    fn test_empty_input() {
        assert!(bunch_final_errors(&build_error_rows(&[], &[])).is_empty());
    }
}
