// src/review/session.rs - Interval review state machine
use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{error, info, warn};

use crate::body;
use crate::config::ReviewConfig;
use crate::detection::merge::ErrorInterval;
use crate::detection::segmenter::WindowLayout;
use crate::error::{PersistenceError, SessionError};
use crate::logging::SessionLog;
use crate::pose::{LandmarkPoint, PoseEditStore};
use crate::review::progress::ProgressTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Previous,
    Next,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Viewing(usize),
    Playing(usize),
    Paused(usize),
    Done,
}

/// Inclusive absolute frame range played for one interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayRange {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Not playing, or paused.
    Idle,
    Advanced(usize),
    /// The range end was reached; playback has stopped.
    Finished(usize),
}

#[derive(Debug, Clone, Copy)]
struct Playback {
    range: PlayRange,
    paused: bool,
}

/// Everything a session needs besides its log.
pub struct SessionSetup {
    pub intervals: Vec<ErrorInterval>,
    pub progress_path: PathBuf,
    pub layout: WindowLayout,
    pub options: ReviewConfig,
    /// Available cameras and their frame counts.
    pub frame_counts: BTreeMap<String, usize>,
    pub poses: PoseEditStore,
    pub output_directory: PathBuf,
}

pub struct ReviewSession {
    intervals: Vec<ErrorInterval>,
    progress: ProgressTable,
    position: usize,
    layout: WindowLayout,
    options: ReviewConfig,
    frame_counts: BTreeMap<String, usize>,
    camera: Option<String>,
    current_frame: usize,
    playback: Option<Playback>,
    edit_enabled: bool,
    saved_edit_mode: Option<bool>,
    /// Landmark edits default to when none is named; follows the interval's body part.
    target_landmark: Option<String>,
    poses: PoseEditStore,
    output_directory: PathBuf,
    log: SessionLog,
    log_path: Option<PathBuf>,
    closed: bool,
}

impl ReviewSession {
    /// Opens the progress table (creating it on first use) and positions the
    /// session at the first incomplete interval.
    pub fn load(setup: SessionSetup, log: SessionLog) -> Result<Self, PersistenceError> {
        let progress = ProgressTable::load_or_create(&setup.progress_path, setup.intervals.len())?;
        let position = progress.first_incomplete();
        let camera = setup.frame_counts.keys().next().cloned();

        let mut session = Self {
            intervals: setup.intervals,
            progress,
            position,
            layout: setup.layout,
            options: setup.options,
            frame_counts: setup.frame_counts,
            camera,
            current_frame: 0,
            playback: None,
            edit_enabled: true,
            saved_edit_mode: None,
            target_landmark: None,
            poses: setup.poses,
            output_directory: setup.output_directory,
            log,
            log_path: None,
            closed: false,
        };
        info!(
            "Loaded {} intervals, {} already completed",
            session.intervals.len(),
            session.progress.completed_count()
        );
        if !session.intervals.is_empty() {
            session.enter(position);
        }
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        if self.closed {
            return SessionState::Done;
        }
        match self.playback {
            Some(Playback { paused: true, .. }) => SessionState::Paused(self.position),
            Some(_) => SessionState::Playing(self.position),
            None => SessionState::Viewing(self.position),
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn interval(&self) -> Option<&ErrorInterval> {
        self.intervals.get(self.position)
    }

    pub fn progress(&self) -> &ProgressTable {
        &self.progress
    }

    pub fn poses(&self) -> &PoseEditStore {
        &self.poses
    }

    pub fn camera(&self) -> Option<&str> {
        self.camera.as_deref()
    }

    pub fn cameras(&self) -> impl Iterator<Item = &str> {
        self.frame_counts.keys().map(String::as_str)
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Frame count of the current camera, 0 when unknown.
    pub fn total_frames(&self) -> usize {
        self.camera
            .as_ref()
            .and_then(|c| self.frame_counts.get(c))
            .copied()
            .unwrap_or(0)
    }

    pub fn edit_enabled(&self) -> bool {
        self.edit_enabled
    }

    pub fn options(&self) -> &ReviewConfig {
        &self.options
    }

    pub fn status(&self) -> &str {
        self.log.status()
    }

    pub fn set_status(&mut self, message: impl Into<String>) {
        self.log.set_status(message);
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    pub fn target_landmark(&self) -> Option<&str> {
        self.target_landmark.as_deref()
    }

    pub fn set_target_landmark(&mut self, landmark: &str) {
        self.target_landmark = Some(landmark.to_string());
        self.log.set_status(format!("Target landmark: {}", landmark));
    }

    /// The named landmark, or the target landmark when none is named.
    pub fn resolve_landmark(&self, landmark: Option<&str>) -> Result<String, SessionError> {
        landmark
            .or(self.target_landmark.as_deref())
            .map(str::to_string)
            .ok_or(SessionError::NoTargetLandmark)
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.playback, Some(Playback { paused: false, .. }))
    }

    /// Absolute video frame of the current interval's first frame. Derived
    /// from the layout on every call.
    pub fn absolute_frame(&self) -> Option<usize> {
        self.interval()
            .map(|i| self.layout.absolute_frame(i.window_index, i.start_frame))
    }

    /// Replaces the window layout; positions derived from it are recomputed.
    pub fn set_layout(&mut self, layout: WindowLayout) {
        self.stop();
        self.layout = layout;
        if !self.intervals.is_empty() {
            self.enter(self.position);
        }
    }

    pub fn play_range(&self) -> Option<PlayRange> {
        let interval = self.interval()?;
        let margin = self.options.playback_margin_frames;
        let abs_start = self.layout.absolute_frame(interval.window_index, interval.start_frame);
        let abs_end = self.layout.absolute_frame(interval.window_index, interval.end_frame);

        let mut start = abs_start.saturating_sub(margin);
        if self.options.cut_playback_at_boundary {
            start = start.max(self.layout.window_start(interval.window_index));
        }
        let mut end = abs_end + margin;
        let total = self.total_frames();
        if total > 0 {
            end = end.min(total - 1);
        }
        Some(PlayRange {
            start: start.min(end),
            end,
        })
    }

    fn clamp_frame(&self, frame: usize) -> usize {
        match self.total_frames() {
            0 => frame,
            total => frame.min(total - 1),
        }
    }

    /// Moves to `position` without flushing: picks the first available
    /// recommended camera and jumps to the interval's first frame.
    fn enter(&mut self, position: usize) {
        self.position = position;
        let Some(interval) = self.intervals.get(position) else {
            return;
        };
        let recommended = body::recommended_cameras(&interval.name)
            .iter()
            .find(|cam| self.frame_counts.contains_key(**cam));
        if let Some(cam) = recommended {
            if self.camera.as_deref() != Some(*cam) {
                info!("Switching to recommended camera {} for {}", cam, interval.name);
                self.camera = Some(cam.to_string());
            }
        }
        self.target_landmark = Some(body::body_part_for(&interval.name).to_string());
        let absolute = self.layout.absolute_frame(interval.window_index, interval.start_frame);
        self.current_frame = self.clamp_frame(absolute);
        info!(
            "Interval {}/{}: {} window {} frames {}-{} (absolute frame {})",
            position + 1,
            self.intervals.len(),
            interval.name,
            interval.window_index,
            interval.start_frame,
            interval.end_frame,
            absolute
        );
    }

    /// Saves every dirty camera. Failures are logged and shown in the status
    /// line; those cameras stay dirty and are retried on the next flush.
    pub fn flush_edits(&mut self) -> bool {
        if !self.poses.any_dirty() {
            return true;
        }
        let log = &mut self.log;
        let summary = self.poses.flush_all(|p| {
            log.set_status(format!("Saving pose edits {}/{} (camera {})", p.done, p.total, p.camera))
        });
        if summary.is_clean() {
            self.log
                .set_status(format!("Saved pose edits for {} camera(s)", summary.flushed.len()));
            true
        } else {
            let failed: Vec<&str> = summary.failed.iter().map(|(c, _)| c.as_str()).collect();
            error!("Pose edits for cameras {:?} were not saved", failed);
            self.log.set_status(format!(
                "Could not save pose edits for camera(s) {}; will retry",
                failed.join(", ")
            ));
            false
        }
    }

    fn persist_progress(&mut self) {
        if let Err(e) = self.progress.persist() {
            error!("Failed to save progress: {}", e);
            self.log.set_status(format!("Could not save progress: {}", e));
        }
    }

    /// Steps one interval. Moving forward marks the current interval
    /// complete when auto-mark is on; both directions flush pending edits.
    /// Clamped at both ends; going back from the first interval does nothing.
    pub fn advance(&mut self, direction: Direction) -> bool {
        if self.closed || self.intervals.is_empty() {
            return false;
        }
        if direction == Direction::Previous && self.position == 0 {
            return false;
        }

        self.stop();
        if direction == Direction::Next && self.options.auto_mark_on_advance {
            if self.progress.mark_completed(self.position) {
                self.persist_progress();
            }
        }
        self.flush_edits();

        let target = match direction {
            Direction::Previous => self.position - 1,
            Direction::Next => (self.position + 1).min(self.intervals.len() - 1),
        };
        if target == self.position {
            return false;
        }
        self.enter(target);
        true
    }

    /// Jumps to a 0-based position, clamped into range.
    pub fn goto(&mut self, position: usize) -> bool {
        if self.closed || self.intervals.is_empty() {
            return false;
        }
        self.stop();
        self.flush_edits();
        self.enter(position.min(self.intervals.len() - 1));
        true
    }

    /// Jumps to the operator's 1-based interval number. Out-of-range numbers are ignored.
    pub fn goto_display_number(&mut self, number: usize) -> bool {
        if number == 0 || number > self.intervals.len() {
            self.log.set_status(format!(
                "No interval {} (1-{} available)",
                number,
                self.intervals.len()
            ));
            return false;
        }
        self.goto(number - 1)
    }

    /// Starts playback of the current interval, or resumes a paused one.
    /// Returns the frame to show first.
    pub fn play(&mut self) -> Result<usize, SessionError> {
        if self.closed {
            return Err(SessionError::NoInterval);
        }
        match self.playback.as_mut() {
            Some(p) if p.paused => {
                p.paused = false;
                self.edit_enabled = false;
                info!("Playback resumed at frame {}", self.current_frame);
                return Ok(self.current_frame);
            }
            Some(_) => return Ok(self.current_frame),
            None => {}
        }

        let range = self.play_range().ok_or(SessionError::NoInterval)?;
        self.saved_edit_mode = Some(self.edit_enabled);
        self.edit_enabled = false;
        self.current_frame = range.start;
        self.playback = Some(Playback {
            range,
            paused: false,
        });
        info!(
            "Playing frames {}-{} at {} fps",
            range.start, range.end, self.options.playback_fps
        );
        Ok(range.start)
    }

    /// One playback step. Cancellation is checked first.
    pub fn tick(&mut self) -> Tick {
        let end = match self.playback {
            Some(Playback { paused: false, range }) => range.end,
            _ => return Tick::Idle,
        };
        if self.current_frame < end {
            self.current_frame += 1;
            if self.current_frame < end {
                return Tick::Advanced(self.current_frame);
            }
        }
        self.stop();
        info!("Playback finished at frame {}", self.current_frame);
        Tick::Finished(self.current_frame)
    }

    /// Toggles pause. Pausing restores the pre-playback edit mode; resuming
    /// disables editing again and continues from the paused frame.
    pub fn pause(&mut self) -> bool {
        let Some(playback) = self.playback.as_mut() else {
            return false;
        };
        if playback.paused {
            playback.paused = false;
            self.edit_enabled = false;
            info!("Playback resumed at frame {}", self.current_frame);
        } else {
            playback.paused = true;
            if let Some(saved) = self.saved_edit_mode {
                self.edit_enabled = saved;
            }
            info!("Playback paused at frame {}", self.current_frame);
        }
        true
    }

    /// Ends playback. Safe to call at any time; always restores the saved edit mode.
    pub fn stop(&mut self) {
        if self.playback.take().is_some() {
            info!("Playback stopped at frame {}", self.current_frame);
        }
        if let Some(saved) = self.saved_edit_mode.take() {
            self.edit_enabled = saved;
        }
    }

    pub fn prev_frame(&mut self) -> usize {
        self.stop();
        self.current_frame = self.current_frame.saturating_sub(1);
        self.current_frame
    }

    pub fn next_frame(&mut self) -> usize {
        self.stop();
        self.current_frame = self.clamp_frame(self.current_frame + 1);
        self.current_frame
    }

    /// Switches to an available camera, saving pending edits first.
    pub fn switch_camera(&mut self, camera: &str) -> bool {
        if self.closed || self.camera.as_deref() == Some(camera) {
            return false;
        }
        if !self.frame_counts.contains_key(camera) {
            self.log.set_status(format!("Camera {} is not available", camera));
            return false;
        }
        self.stop();
        self.flush_edits();
        self.camera = Some(camera.to_string());
        self.current_frame = self.clamp_frame(self.current_frame);
        info!("Switched to camera {}", camera);
        true
    }

    /// Cycles through the available cameras recommended for the current interval.
    pub fn next_recommended_camera(&mut self) -> Option<String> {
        let interval = self.interval()?;
        let candidates: Vec<&str> = body::recommended_cameras(&interval.name)
            .iter()
            .copied()
            .filter(|c| self.frame_counts.contains_key(*c))
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let next = match self
            .camera
            .as_deref()
            .and_then(|cur| candidates.iter().position(|c| *c == cur))
        {
            Some(i) => candidates[(i + 1) % candidates.len()],
            None => candidates[0],
        }
        .to_string();
        self.switch_camera(&next);
        self.log
            .set_status(format!("Switched to recommended camera: {}", next));
        Some(next)
    }

    /// Enables or disables pose editing. Editing cannot be enabled while playing.
    /// During playback the choice also replaces the mode restored by `stop`.
    pub fn set_edit_enabled(&mut self, enabled: bool) -> Result<(), SessionError> {
        match self.playback {
            Some(Playback { paused: false, .. }) if enabled => Err(SessionError::EditingDisabled),
            Some(_) => {
                self.saved_edit_mode = Some(enabled);
                self.edit_enabled = enabled;
                Ok(())
            }
            None => {
                self.edit_enabled = enabled;
                Ok(())
            }
        }
    }

    fn edit_target(&self) -> Result<String, SessionError> {
        if self.closed {
            return Err(SessionError::NoInterval);
        }
        if !self.edit_enabled {
            return Err(SessionError::EditingDisabled);
        }
        self.camera.clone().ok_or(SessionError::NoCamera)
    }

    /// Moves a landmark on the current camera and frame, at full confidence.
    pub fn set_landmark(&mut self, landmark: &str, x: f64, y: f64) -> Result<(), SessionError> {
        let camera = self.edit_target()?;
        self.poses
            .set(&camera, self.current_frame, landmark, x, y, 1.0)?;
        Ok(())
    }

    pub fn delete_landmark(&mut self, landmark: &str) -> Result<(), SessionError> {
        let camera = self.edit_target()?;
        self.poses.delete(&camera, self.current_frame, landmark)?;
        Ok(())
    }

    pub fn delete_many(&mut self, landmarks: &[String]) -> Result<usize, SessionError> {
        let camera = self.edit_target()?;
        for landmark in landmarks {
            self.poses.delete(&camera, self.current_frame, landmark)?;
        }
        Ok(landmarks.len())
    }

    pub fn place_landmark(&mut self, landmark: &str) -> Result<LandmarkPoint, SessionError> {
        let camera = self.edit_target()?;
        Ok(self.poses.place(&camera, self.current_frame, landmark)?)
    }

    /// Ends the session: stops playback, saves edits and progress, and
    /// writes the session log. Calling it again returns the same log path.
    pub fn close(&mut self) -> Option<PathBuf> {
        if self.closed {
            return self.log_path.clone();
        }
        self.stop();
        if !self.flush_edits() {
            warn!("Closing with unsaved pose edits");
        }
        self.persist_progress();
        self.closed = true;
        info!(
            "Session closed: {}/{} intervals completed",
            self.progress.completed_count(),
            self.progress.len()
        );
        match self.log.persist(&self.output_directory) {
            Ok(path) => {
                info!("Session log written to {}", path.display());
                self.log_path = Some(path);
            }
            Err(e) => error!("Failed to write session log: {}", e),
        }
        self.log_path.clone()
    }
}
