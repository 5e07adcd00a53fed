// src/detection/segmenter.rs
use crate::error::DetectionError;

/// One review window, half-open `[start_frame, end_frame)`.
/// `index` is 1-based, the number operators see in the interval table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub index: usize,
    pub start_frame: usize,
    pub end_frame: usize,
}

impl Window {
    pub fn len(&self) -> usize {
        self.end_frame - self.start_frame
    }

    pub fn is_empty(&self) -> bool {
        self.end_frame == self.start_frame
    }

    pub fn contains(&self, frame: usize) -> bool {
        self.start_frame <= frame && frame < self.end_frame
    }
}

/// Window length plus the offset that precedes every window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLayout {
    window_length: usize,
    start_offset: usize,
}

impl WindowLayout {
    pub fn new(window_length: usize, start_offset: usize) -> Result<Self, DetectionError> {
        if window_length == 0 {
            return Err(DetectionError::InvalidWindowLength(window_length));
        }
        Ok(Self {
            window_length,
            start_offset,
        })
    }

    pub fn window_length(&self) -> usize {
        self.window_length
    }

    pub fn start_offset(&self) -> usize {
        self.start_offset
    }

    /// First absolute frame of window `window_index` (1-based).
    pub fn window_start(&self, window_index: usize) -> usize {
        (self.start_offset + self.window_length) * window_index.saturating_sub(1) + self.start_offset
    }

    /// Inverse of [`locate`] for frames inside window `window_index`.
    pub fn absolute_frame(&self, window_index: usize, relative_frame: usize) -> usize {
        self.window_start(window_index) + relative_frame
    }

    pub fn build_windows(&self, total_length: usize) -> Vec<Window> {
        build_windows(total_length, self.start_offset, self.window_length)
    }
}

/// Splits `[0, total_length)` into windows of `window_length` frames, each
/// preceded by `start_offset` frames of gap. The last window is clamped.
pub fn build_windows(total_length: usize, start_offset: usize, window_length: usize) -> Vec<Window> {
    if window_length == 0 {
        return Vec::new();
    }
    let mut windows = Vec::new();
    let mut current_start = start_offset;
    while current_start < total_length {
        windows.push(Window {
            index: windows.len() + 1,
            start_frame: current_start,
            end_frame: (current_start + window_length).min(total_length),
        });
        current_start += window_length + start_offset;
    }
    windows
}

/// Window containing `frame` and the offset inside it, or `None` for frames in a gap.
pub fn locate(frame: usize, windows: &[Window]) -> Option<(usize, usize)> {
    windows
        .iter()
        .find(|w| w.contains(frame))
        .map(|w| (w.index, frame - w.start_frame))
}
