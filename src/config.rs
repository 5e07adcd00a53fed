// src/config.rs
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::detection::segmenter::WindowLayout;
use crate::error::DetectionError;

/// Distal flexion channels checked when no explicit selection is given.
pub const DEFAULT_ANGLE_CHANNELS: [&str; 6] = [
    "L1D_flex", "R1D_flex", "L2D_flex", "R2D_flex", "L3D_flex", "R3D_flex",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub review: ReviewConfig,
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,
}

/// Which angle columns the detector smooths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelSelection {
    Default,
    /// Every column whose name has a digit and no `A` (thorax-coxa angles are skipped).
    All,
    Explicit(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Frames per review window.
    #[serde(default = "default_window_length")]
    pub window_length: usize,
    /// Frames before each window; also the gap between windows.
    #[serde(default)]
    pub start_offset: usize,
    #[serde(default = "default_difference_threshold")]
    pub difference_threshold: f64,
    #[serde(default = "default_smoothing_window_length")]
    pub smoothing_window_length: usize,
    #[serde(default = "default_smoothing_poly_order")]
    pub smoothing_poly_order: usize,
    #[serde(default = "default_channel_selection")]
    pub angle_channels: ChannelSelection,
    #[serde(default = "default_length_pairs")]
    pub length_pairs: Vec<(String, String)>,
    /// Body parts (e.g. `R-F-TaG`) whose intervals are dropped from the final table.
    #[serde(default)]
    pub excluded_parts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity_per_camera: usize,
    #[serde(default = "default_playback_margin")]
    pub playback_margin_frames: usize,
    #[serde(default = "default_playback_fps")]
    pub playback_fps: u32,
    #[serde(default = "default_true")]
    pub auto_mark_on_advance: bool,
    #[serde(default)]
    pub cut_playback_at_boundary: bool,
    #[serde(default = "default_preload_radius")]
    pub preload_radius: usize,
    #[serde(default = "default_preload_per_cycle")]
    pub preload_per_cycle: usize,
    #[serde(default = "default_preload_delay_ms")]
    pub preload_delay_ms: u64,
}

fn default_window_length() -> usize {
    1400
}

fn default_difference_threshold() -> f64 {
    10.0
}

fn default_smoothing_window_length() -> usize {
    24
}

fn default_smoothing_poly_order() -> usize {
    8
}

fn default_channel_selection() -> ChannelSelection {
    ChannelSelection::Default
}

fn default_length_pairs() -> Vec<(String, String)> {
    vec![("TiTa".to_string(), "TaG".to_string())]
}

fn default_cache_capacity() -> usize {
    10
}

fn default_playback_margin() -> usize {
    20
}

fn default_playback_fps() -> u32 {
    40
}

fn default_true() -> bool {
    true
}

fn default_preload_radius() -> usize {
    3
}

fn default_preload_per_cycle() -> usize {
    3
}

fn default_preload_delay_ms() -> u64 {
    100
}

fn default_output_directory() -> PathBuf {
    directories::UserDirs::new()
        .and_then(|dirs| dirs.document_dir().map(|p| p.join("PoseProofreader")))
        .unwrap_or_else(|| PathBuf::from("./output"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            detection: DetectionConfig::default(),
            review: ReviewConfig::default(),
            output_directory: default_output_directory(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            window_length: default_window_length(),
            start_offset: 0,
            difference_threshold: default_difference_threshold(),
            smoothing_window_length: default_smoothing_window_length(),
            smoothing_poly_order: default_smoothing_poly_order(),
            angle_channels: default_channel_selection(),
            length_pairs: default_length_pairs(),
            excluded_parts: Vec::new(),
        }
    }
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            cache_capacity_per_camera: default_cache_capacity(),
            playback_margin_frames: default_playback_margin(),
            playback_fps: default_playback_fps(),
            auto_mark_on_advance: true,
            cut_playback_at_boundary: false,
            preload_radius: default_preload_radius(),
            preload_per_cycle: default_preload_per_cycle(),
            preload_delay_ms: default_preload_delay_ms(),
        }
    }
}

impl DetectionConfig {
    pub fn layout(&self) -> Result<WindowLayout, DetectionError> {
        WindowLayout::new(self.window_length, self.start_offset)
    }

    pub fn validate(&self) -> Result<(), DetectionError> {
        self.layout()?;
        if self.smoothing_window_length <= self.smoothing_poly_order {
            return Err(DetectionError::InvalidSmoothing {
                window: self.smoothing_window_length,
                order: self.smoothing_poly_order,
            });
        }
        Ok(())
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.detection.validate()?;
        if self.review.playback_fps == 0 {
            anyhow::bail!("playback_fps must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"detection": {"start_offset": 100}}"#).unwrap();
        assert_eq!(config.detection.start_offset, 100);
        assert_eq!(config.detection.window_length, 1400);
        assert_eq!(config.detection.angle_channels, ChannelSelection::Default);
        assert_eq!(config.review.cache_capacity_per_camera, 10);
        assert_eq!(config.review.playback_fps, 40);
        assert!(config.review.auto_mark_on_advance);
        assert!(!config.review.cut_playback_at_boundary);
        assert_eq!(config.detection.difference_threshold, 10.0);
        assert_eq!(config.detection.smoothing_window_length, 24);
        assert_eq!(config.detection.smoothing_poly_order, 8);
        assert_eq!(
            config.detection.length_pairs,
            vec![("TiTa".to_string(), "TaG".to_string())]
        );
        assert_eq!(config.review.playback_margin_frames, 20);
        assert_eq!(config.review.preload_radius, 3);
        assert_eq!(config.review.preload_per_cycle, 3);
        assert_eq!(config.review.preload_delay_ms, 100);
    }

    #[test]
    fn test_explicit_channel_selection() {
        let config: Config = serde_json::from_str(
            r#"{"detection": {"angle_channels": {"explicit": ["R1D_flex"]}}}"#,
        )
        .unwrap();
        assert_eq!(
            config.detection.angle_channels,
            ChannelSelection::Explicit(vec!["R1D_flex".to_string()])
        );
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut detection = DetectionConfig::default();
        detection.window_length = 0;
        assert_matches!(
            detection.validate(),
            Err(DetectionError::InvalidWindowLength(0))
        );
    }

    #[test]
    fn test_smoothing_order_must_fit_window() {
        let mut detection = DetectionConfig::default();
        detection.smoothing_window_length = 5;
        detection.smoothing_poly_order = 5;
        assert_matches!(
            detection.validate(),
            Err(DetectionError::InvalidSmoothing { window: 5, order: 5 })
        );
    }

    #[test]
    fn test_zero_fps_rejected() {
        let mut config = Config::default();
        config.review.playback_fps = 0;
        assert!(config.validate().is_err());
    }
}
