// src/logging.rs - Session-scoped log sink
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use tracing::subscriber::DefaultGuard;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;

use crate::data;
use crate::error::PersistenceError;

/// In-memory log buffer shared between the subscriber and the session.
#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self
            .0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log buffer poisoned"))?;
        inner.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Log sink owned by one review session. While it lives, events on this
/// thread go to stderr and to an in-memory buffer that is written out when
/// the session closes.
pub struct SessionLog {
    buffer: SharedBuffer,
    started: DateTime<Local>,
    status: String,
    _guard: DefaultGuard,
}

impl SessionLog {
    pub fn start() -> Self {
        let buffer = SharedBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::registry()
            .with(LevelFilter::INFO)
            .with(fmt::layer().with_writer(io::stderr))
            .with(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(move || writer.clone()),
            );
        let guard = tracing::subscriber::set_default(subscriber);
        let started = Local::now();
        info!("Review session started at {}", started.format("%Y-%m-%d %H:%M:%S"));
        Self {
            buffer,
            started,
            status: String::new(),
            _guard: guard,
        }
    }

    /// The single user-facing status line.
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status = message.into();
        info!("{}", self.status);
    }

    /// Everything logged so far in this session.
    pub fn contents(&self) -> String {
        self.buffer
            .0
            .lock()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default()
    }

    pub fn file_name(&self) -> String {
        format!("proofreader_log_{}.log", self.started.format("%Y-%m-%d_%H-%M-%S"))
    }

    /// Writes the buffer into `dir`, or into the temp directory if that fails.
    pub fn persist(&self, dir: &Path) -> Result<PathBuf, PersistenceError> {
        let contents = self.contents();
        let write = |path: &Path| {
            data::write_atomic(path, |out| {
                out.write_all(contents.as_bytes())
                    .map_err(|e| PersistenceError::io(path, e))
            })
        };

        let primary = dir.join(self.file_name());
        match write(&primary) {
            Ok(()) => Ok(primary),
            Err(e) => {
                warn!("Could not write session log to {}: {}", primary.display(), e);
                let fallback = std::env::temp_dir().join(self.file_name());
                write(&fallback)?;
                Ok(fallback)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::error;

    #[test]
    fn test_events_are_captured() {
        let log = SessionLog::start();
        info!("opened interval 7");
        error!("flush failed for camera B");
        let text = log.contents();
        assert!(text.contains("opened interval 7"));
        assert!(text.contains("flush failed for camera B"));
    }

    #[test]
    fn test_status_is_logged() {
        let mut log = SessionLog::start();
        log.set_status("Saved 2 cameras");
        assert_eq!(log.status(), "Saved 2 cameras");
        assert!(log.contents().contains("Saved 2 cameras"));
    }

    #[test]
    fn test_persist_writes_timestamped_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = SessionLog::start();
        info!("something worth keeping");
        let path = log.persist(dir.path()).unwrap();
        assert_eq!(path.parent().unwrap(), dir.path());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("proofreader_log_") && name.ends_with(".log"));
        assert!(std::fs::read_to_string(&path)
            .unwrap()
            .contains("something worth keeping"));
    }

    #[test]
    fn test_persist_falls_back_to_temp() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file").unwrap();
        let log = SessionLog::start();
        let path = log.persist(&blocker.join("logs")).unwrap();
        assert!(path.starts_with(std::env::temp_dir()));
        let _ = std::fs::remove_file(path);
    }
}
