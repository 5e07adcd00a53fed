// src/review/mod.rs - Proofreading workflow over detected intervals
pub mod progress;
pub mod session;

pub use progress::{ProgressTable, PROGRESS_FILE};
pub use session::{Direction, PlayRange, ReviewSession, SessionSetup, SessionState, Tick};
