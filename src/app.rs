// src/app.rs - Review event loop: session, frame cache, preloading and playback
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::cache::{FrameCache, Preloader};
use crate::review::{Direction, ReviewSession, SessionState, Tick};
use crate::video::{Frame, FrameSource, SeekMode, VideoLibrary};

/// Operator input understood by the review loop.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    PrevFrame,
    NextFrame,
    PrevInterval,
    NextInterval,
    RecommendedCamera,
    TogglePlay,
    Stop,
    /// 1-based interval number.
    Goto(usize),
    Camera(String),
    CacheCapacity(usize),
    EditMode(bool),
    /// Landmark commands without a name act on the target landmark.
    SetLandmark { landmark: Option<String>, x: f64, y: f64 },
    DeleteLandmarks(Vec<String>),
    PlaceLandmark(Option<String>),
    Target(String),
    Save,
    Quit,
}

impl Command {
    /// Parses one line of operator input. A line holding a single space
    /// toggles playback, like the space bar.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line == " " {
            return Some(Command::TogglePlay);
        }
        let mut words = line.split_whitespace();
        let head = words.next()?;
        let args: Vec<&str> = words.collect();

        let command = match (head, args.as_slice()) {
            ("a", []) => Command::PrevFrame,
            ("d", []) => Command::NextFrame,
            ("q", []) => Command::PrevInterval,
            ("e", []) => Command::NextInterval,
            ("s", []) => Command::RecommendedCamera,
            ("space" | "p", []) => Command::TogglePlay,
            ("x", []) => Command::Stop,
            ("g", [n]) => Command::Goto(n.parse().ok()?),
            ("c", [camera]) => Command::Camera(camera.to_uppercase()),
            ("cache", [n]) => Command::CacheCapacity(n.parse().ok()?),
            ("edit", ["on"]) => Command::EditMode(true),
            ("edit", ["off"]) => Command::EditMode(false),
            ("set", [landmark, x, y]) => Command::SetLandmark {
                landmark: Some(landmark.to_string()),
                x: x.parse().ok()?,
                y: y.parse().ok()?,
            },
            ("set", [x, y]) => Command::SetLandmark {
                landmark: None,
                x: x.parse().ok()?,
                y: y.parse().ok()?,
            },
            ("del", landmarks) => Command::DeleteLandmarks(landmarks.iter().map(|l| l.to_string()).collect()),
            ("place", []) => Command::PlaceLandmark(None),
            ("place", [landmark]) => Command::PlaceLandmark(Some(landmark.to_string())),
            ("t", [landmark]) => Command::Target(landmark.to_string()),
            ("w", []) => Command::Save,
            (":q", []) => Command::Quit,
            _ => return None,
        };
        Some(command)
    }
}

/// What is currently on screen.
#[derive(Debug, Clone)]
pub enum View {
    Frame {
        camera: String,
        frame: usize,
        image: Frame,
    },
    Placeholder {
        frame: usize,
        message: String,
    },
}

/// Single-threaded review loop. Display decodes go through one source per
/// camera; the preloader keeps its own.
pub struct ReviewApp {
    session: ReviewSession,
    library: Arc<dyn VideoLibrary>,
    sources: HashMap<String, Box<dyn FrameSource>>,
    cache: FrameCache,
    preloader: Preloader,
    view: Option<View>,
    next_tick: Option<Instant>,
    frame_interval: Duration,
}

impl ReviewApp {
    pub fn new(session: ReviewSession, library: Arc<dyn VideoLibrary>) -> Self {
        let options = session.options().clone();
        let preloader = Preloader::new(
            library.clone(),
            options.preload_radius,
            options.preload_per_cycle,
            Duration::from_millis(options.preload_delay_ms),
        );
        Self {
            session,
            library,
            sources: HashMap::new(),
            cache: FrameCache::new(options.cache_capacity_per_camera),
            preloader,
            view: None,
            next_tick: None,
            frame_interval: Duration::from_millis(1000 / u64::from(options.playback_fps.max(1))),
        }
    }

    pub fn session(&self) -> &ReviewSession {
        &self.session
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    pub fn view(&self) -> Option<&View> {
        self.view.as_ref()
    }

    fn fetch(&mut self, camera: &str, frame: usize, mode: SeekMode) -> Option<Frame> {
        if let Some(hit) = self.cache.get(camera, frame) {
            return Some(hit);
        }
        if !self.sources.contains_key(camera) {
            match self.library.open(camera) {
                Ok(source) => {
                    self.sources.insert(camera.to_string(), source);
                }
                Err(e) => {
                    warn!("Cannot open video for camera {}: {}", camera, e);
                    return None;
                }
            }
        }
        let source = self.sources.get_mut(camera)?;
        match source.decode(frame, mode) {
            Ok(Some(image)) => {
                self.cache.put(camera, frame, image.clone());
                Some(image)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Decoding frame {} of camera {} failed: {}", frame, camera, e);
                None
            }
        }
    }

    /// Shows the session's current frame, from the cache when possible.
    /// A successful display schedules preloading around it.
    pub fn display_current(&mut self, mode: SeekMode, now: Instant) -> &View {
        let frame = self.session.current_frame();
        let shown = match self.session.camera().map(str::to_string) {
            Some(camera) => self.fetch(&camera, frame, mode).map(|image| {
                self.preloader.schedule(&camera, frame, now);
                debug!("Showing camera {} frame {}", camera, frame);
                View::Frame {
                    camera,
                    frame,
                    image,
                }
            }),
            None => None,
        };
        let view = match shown {
            Some(view) => view,
            None => {
                let message = format!("Frame {} not available", frame);
                self.session.set_status(message.clone());
                View::Placeholder { frame, message }
            }
        };
        self.view.insert(view)
    }

    /// Applies one command. Returns false once the operator asked to quit.
    pub fn handle(&mut self, command: Command, now: Instant) -> bool {
        let camera_before = self.session.camera().map(str::to_string);
        let redraw = match command {
            Command::PrevFrame => {
                self.session.prev_frame();
                true
            }
            Command::NextFrame => {
                self.session.next_frame();
                true
            }
            Command::PrevInterval => self.session.advance(Direction::Previous),
            Command::NextInterval => self.session.advance(Direction::Next),
            Command::Goto(number) => self.session.goto_display_number(number),
            Command::RecommendedCamera => self.session.next_recommended_camera().is_some(),
            Command::Camera(camera) => self.session.switch_camera(&camera),
            Command::TogglePlay => self.toggle_play(),
            Command::Stop => {
                self.session.stop();
                false
            }
            Command::CacheCapacity(capacity) => {
                self.cache.set_capacity(capacity);
                info!("Frame cache capacity set to {} per camera", capacity);
                true
            }
            Command::EditMode(enabled) => {
                if let Err(e) = self.session.set_edit_enabled(enabled) {
                    self.session.set_status(e.to_string());
                }
                false
            }
            Command::SetLandmark { landmark, x, y } => {
                let result = self.session.resolve_landmark(landmark.as_deref()).and_then(|landmark| {
                    self.session.set_landmark(&landmark, x, y)?;
                    Ok(format!("Moved {} to ({:.1}, {:.1})", landmark, x, y))
                });
                self.report_edit(result);
                false
            }
            Command::DeleteLandmarks(landmarks) => {
                let landmarks = if landmarks.is_empty() {
                    self.session.resolve_landmark(None).map(|l| vec![l])
                } else {
                    Ok(landmarks)
                };
                let result = landmarks.and_then(|landmarks| self.session.delete_many(&landmarks));
                self.report_edit(result.map(|n| format!("Deleted {} landmark(s)", n)));
                false
            }
            Command::PlaceLandmark(landmark) => {
                let result = self.session.resolve_landmark(landmark.as_deref()).and_then(|landmark| {
                    let p = self.session.place_landmark(&landmark)?;
                    Ok(format!("Placed {} at ({:.1}, {:.1})", landmark, p.x, p.y))
                });
                self.report_edit(result);
                false
            }
            Command::Target(landmark) => {
                self.session.set_target_landmark(&landmark);
                false
            }
            Command::Save => {
                self.session.flush_edits();
                false
            }
            Command::Quit => return false,
        };

        if self.session.camera() != camera_before.as_deref() {
            if let Some(camera) = self.session.camera() {
                self.cache.invalidate(Some(camera));
            }
            self.preloader.cancel();
        }
        if redraw {
            self.display_current(SeekMode::Random, now);
        }
        self.next_tick = match (self.session.is_playing(), self.next_tick) {
            (true, Some(due)) => Some(due),
            (true, None) => Some(now + self.frame_interval),
            (false, _) => None,
        };
        true
    }

    fn toggle_play(&mut self) -> bool {
        match self.session.state() {
            SessionState::Playing(_) | SessionState::Paused(_) => {
                self.session.pause();
                false
            }
            SessionState::Viewing(_) => match self.session.play() {
                Ok(_) => true,
                Err(e) => {
                    self.session.set_status(format!("Cannot play: {}", e));
                    false
                }
            },
            SessionState::Done => false,
        }
    }

    fn report_edit<E: std::fmt::Display>(&mut self, result: Result<String, E>) {
        match result {
            Ok(message) => info!("{}", message),
            Err(e) => self.session.set_status(e.to_string()),
        }
    }

    /// One playback step. The next tick is scheduled only after this frame
    /// has been shown.
    pub fn on_tick(&mut self) {
        self.next_tick = None;
        match self.session.tick() {
            Tick::Advanced(_) => {
                self.display_current(SeekMode::Sequential, Instant::now());
                self.next_tick = Some(Instant::now() + self.frame_interval);
            }
            Tick::Finished(_) => {
                self.display_current(SeekMode::Sequential, Instant::now());
            }
            Tick::Idle => {}
        }
    }

    /// Runs until `:q` or until the command channel closes. Operator input
    /// wins over playback ticks, and ticks win over preloading.
    pub async fn run(&mut self, commands: &mut mpsc::Receiver<Command>) {
        self.display_current(SeekMode::Random, Instant::now());
        loop {
            let tick_at = self.next_tick;
            let preload_at = self.preloader.deadline();
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle(command, Instant::now()) {
                            break;
                        }
                    }
                    None => break,
                },
                _ = wait_until(tick_at) => self.on_tick(),
                _ = wait_until(preload_at) => {
                    let loaded = self.preloader.run_due(&mut self.cache, Instant::now());
                    if !loaded.is_empty() {
                        debug!("Preloaded frames {:?}", loaded);
                    }
                }
            }
        }
    }

    /// Stops preloading and closes the session.
    pub fn close(&mut self) -> Option<PathBuf> {
        self.preloader.cancel();
        self.next_tick = None;
        self.session.close()
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReviewConfig;
    use crate::detection::merge::ErrorInterval;
    use crate::detection::segmenter::WindowLayout;
    use crate::error::VideoError;
    use crate::logging::SessionLog;
    use crate::pose::{PoseEditStore, PoseTable};
    use crate::review::{SessionSetup, PROGRESS_FILE};
    use assert_matches::assert_matches;
    use image::RgbImage;
    use std::cell::RefCell;
    use std::path::Path;
    use std::rc::Rc;
    use tokio::time::sleep;

    const LANDMARK: &str = "R-F-TaG";

    /// (source id, camera, frame, mode) for every decode.
    type DecodeLog = Rc<RefCell<Vec<(usize, String, usize, SeekMode)>>>;

    struct FakeSource {
        id: usize,
        camera: String,
        frames: usize,
        log: DecodeLog,
    }

    impl FrameSource for FakeSource {
        fn frame_count(&self) -> usize {
            self.frames
        }

        fn decode(&mut self, frame: usize, mode: SeekMode) -> Result<Option<Frame>, VideoError> {
            if frame >= self.frames {
                return Ok(None);
            }
            self.log
                .borrow_mut()
                .push((self.id, self.camera.clone(), frame, mode));
            Ok(Some(Arc::new(RgbImage::from_pixel(
                2,
                2,
                image::Rgb([(frame % 256) as u8, 0, 0]),
            ))))
        }
    }

    struct FakeLibrary {
        frames: usize,
        opened: RefCell<usize>,
        log: DecodeLog,
    }

    impl VideoLibrary for FakeLibrary {
        fn cameras(&self) -> Vec<String> {
            vec!["A".to_string(), "B".to_string(), "H".to_string()]
        }

        fn open(&self, camera: &str) -> Result<Box<dyn FrameSource>, VideoError> {
            let mut opened = self.opened.borrow_mut();
            let id = *opened;
            *opened += 1;
            Ok(Box::new(FakeSource {
                id,
                camera: camera.to_string(),
                frames: self.frames,
                log: self.log.clone(),
            }))
        }
    }

    fn interval(name: &str, window: usize, start: usize, end: usize) -> ErrorInterval {
        ErrorInterval {
            name: name.to_string(),
            window_index: window,
            start_frame: start,
            end_frame: end,
            frame_count: end - start + 1,
            max_error: 2.0,
            avg_error: 1.5,
            max_angle_error: 2.0,
            avg_angle_error: 1.5,
            max_length_error: 0.0,
            avg_length_error: 0.0,
        }
    }

    /// Windows of 100 frames after 10-frame gaps, so interval 1 opens on
    /// camera A at absolute frame 60 and interval 2 on camera H at 123.
    fn app(dir: &Path, video_frames: usize) -> (ReviewApp, DecodeLog) {
        let mut poses = PoseEditStore::new();
        for cam in ["A", "B", "H"] {
            poses.insert(
                cam,
                PoseTable::new("DLC", vec![LANDMARK.to_string()], 400),
                dir.join(format!("pose-{}.csv", cam)),
            );
        }
        let setup = SessionSetup {
            intervals: vec![
                interval("R1D_flex", 1, 50, 60),
                interval("L1D_flex", 2, 3, 8),
            ],
            progress_path: dir.join(PROGRESS_FILE),
            layout: WindowLayout::new(100, 10).unwrap(),
            options: ReviewConfig {
                playback_margin_frames: 5,
                ..ReviewConfig::default()
            },
            frame_counts: ["A", "B", "H"].iter().map(|c| (c.to_string(), 400)).collect(),
            poses,
            output_directory: dir.to_path_buf(),
        };
        let session = ReviewSession::load(setup, SessionLog::start()).unwrap();
        let log: DecodeLog = Rc::new(RefCell::new(Vec::new()));
        let library = Arc::new(FakeLibrary {
            frames: video_frames,
            opened: RefCell::new(0),
            log: log.clone(),
        });
        (ReviewApp::new(session, library), log)
    }

    fn decodes_by(log: &DecodeLog, source: usize) -> Vec<(usize, SeekMode)> {
        log.borrow()
            .iter()
            .filter(|(id, ..)| *id == source)
            .map(|(_, _, frame, mode)| (*frame, *mode))
            .collect()
    }

    #[test]
    fn test_parse_hotkeys() {
        assert_eq!(Command::parse("a"), Some(Command::PrevFrame));
        assert_eq!(Command::parse("d\n"), Some(Command::NextFrame));
        assert_eq!(Command::parse("q"), Some(Command::PrevInterval));
        assert_eq!(Command::parse("e"), Some(Command::NextInterval));
        assert_eq!(Command::parse("s"), Some(Command::RecommendedCamera));
        assert_eq!(Command::parse(" \n"), Some(Command::TogglePlay));
        assert_eq!(Command::parse("x"), Some(Command::Stop));
        assert_eq!(Command::parse("g 12"), Some(Command::Goto(12)));
        assert_eq!(Command::parse("c h"), Some(Command::Camera("H".to_string())));
        assert_eq!(Command::parse(":q"), Some(Command::Quit));
        assert_eq!(
            Command::parse("del R-F-TaG R-F-TiTa"),
            Some(Command::DeleteLandmarks(vec![
                "R-F-TaG".to_string(),
                "R-F-TiTa".to_string()
            ]))
        );
        assert_eq!(
            Command::parse("set R-F-TaG 10 20.5"),
            Some(Command::SetLandmark {
                landmark: Some("R-F-TaG".to_string()),
                x: 10.0,
                y: 20.5
            })
        );
        assert_eq!(
            Command::parse("set 3 4"),
            Some(Command::SetLandmark {
                landmark: None,
                x: 3.0,
                y: 4.0
            })
        );
        assert_eq!(Command::parse("del"), Some(Command::DeleteLandmarks(Vec::new())));
        assert_eq!(Command::parse("place"), Some(Command::PlaceLandmark(None)));
        assert_eq!(Command::parse("t L-F-TaG"), Some(Command::Target("L-F-TaG".to_string())));
    }

    #[test]
    fn test_parse_rejects_malformed_input() {
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse("g"), None);
        assert_eq!(Command::parse("g two"), None);
        assert_eq!(Command::parse("a b"), None);
        assert_eq!(Command::parse("set 3"), None);
        assert_eq!(Command::parse("place a b"), None);
        assert_eq!(Command::parse("t"), None);
        assert_eq!(Command::parse("zoom"), None);
    }

    #[tokio::test]
    async fn test_display_reuses_cached_frame() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, log) = app(dir.path(), 400);

        let view = app.display_current(SeekMode::Random, Instant::now()).clone();
        assert_matches!(view, View::Frame { ref camera, frame: 60, .. } if camera == "A");
        app.display_current(SeekMode::Random, Instant::now());

        assert_eq!(decodes_by(&log, 0), vec![(60, SeekMode::Random)]);
        assert!(app.cache().contains("A", 60));
    }

    #[tokio::test]
    async fn test_missing_frame_shows_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _log) = app(dir.path(), 50);

        let view = app.display_current(SeekMode::Random, Instant::now()).clone();
        assert_matches!(view, View::Placeholder { frame: 60, ref message } if message == "Frame 60 not available");
        assert_eq!(app.session().status(), "Frame 60 not available");
        assert!(app.preloader.deadline().is_none());
    }

    #[tokio::test]
    async fn test_camera_switch_drops_stale_frames() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, log) = app(dir.path(), 400);
        app.cache.put("B", 60, Arc::new(RgbImage::new(1, 1)));

        assert!(app.handle(Command::Camera("B".to_string()), Instant::now()));

        assert_eq!(app.session().camera(), Some("B"));
        assert!(log
            .borrow()
            .iter()
            .any(|(_, camera, frame, _)| camera == "B" && *frame == 60));
        assert_matches!(app.view(), Some(View::Frame { camera, .. }) if camera == "B");
    }

    #[tokio::test]
    async fn test_capacity_change_clears_cache() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, log) = app(dir.path(), 400);
        app.display_current(SeekMode::Random, Instant::now());

        app.handle(Command::CacheCapacity(2), Instant::now());

        assert_eq!(app.cache().capacity(), 2);
        assert_eq!(decodes_by(&log, 0), vec![(60, SeekMode::Random), (60, SeekMode::Random)]);
    }

    #[tokio::test]
    async fn test_next_interval_opens_recommended_camera() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _log) = app(dir.path(), 400);

        app.handle(Command::NextInterval, Instant::now());

        assert_eq!(app.session().position(), 1);
        assert!(app.session().progress().is_completed(0));
        assert_matches!(
            app.view(),
            Some(View::Frame { camera, frame: 123, .. }) if camera == "H"
        );
    }

    #[tokio::test]
    async fn test_edit_commands_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _log) = app(dir.path(), 400);

        app.handle(Command::PlaceLandmark(Some(LANDMARK.to_string())), Instant::now());
        assert!(app.session().poses().is_dirty("A"));
        app.handle(Command::Save, Instant::now());
        assert!(!app.session().poses().is_dirty("A"));
        assert!(dir.path().join("pose-A.csv").exists());

        app.handle(Command::EditMode(false), Instant::now());
        app.handle(
            Command::SetLandmark {
                landmark: None,
                x: 1.0,
                y: 2.0,
            },
            Instant::now(),
        );
        assert!(!app.session().poses().is_dirty("A"));
        assert!(app.session().status().contains("disabled"));
    }

    #[tokio::test]
    async fn test_unnamed_landmark_edits_use_interval_target() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _log) = app(dir.path(), 400);
        assert_eq!(app.session().target_landmark(), Some(LANDMARK));

        app.handle(Command::parse("set 4 5").unwrap(), Instant::now());
        let p = app.session().poses().get("A", 60, LANDMARK).unwrap();
        assert_eq!((p.x, p.y, p.confidence), (4.0, 5.0, 1.0));

        app.handle(Command::parse("del").unwrap(), Instant::now());
        assert!(app.session().poses().get("A", 60, LANDMARK).unwrap().is_deleted());

        app.handle(Command::parse("t R-F-TiTa").unwrap(), Instant::now());
        app.handle(Command::parse("place").unwrap(), Instant::now());
        assert_eq!(app.session().target_landmark(), Some("R-F-TiTa"));
        assert!(app.session().status().contains("has no landmark `R-F-TiTa`"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_decodes_sequentially_to_range_end() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, log) = app(dir.path(), 400);
        let (tx, mut rx) = mpsc::channel(8);

        let driver = async move {
            tx.send(Command::TogglePlay).await.unwrap();
            sleep(Duration::from_secs(2)).await;
            tx.send(Command::Quit).await.unwrap();
        };
        tokio::join!(app.run(&mut rx), driver);

        // 60 is still cached from the first display, so the decoder jumps 59 -> 61.
        let mut expected = vec![(60, SeekMode::Random), (55, SeekMode::Random)];
        expected.extend((56..=75).filter(|f| *f != 60).map(|f| (f, SeekMode::Sequential)));
        assert_eq!(decodes_by(&log, 0), expected);
        assert_eq!(app.session().state(), SessionState::Viewing(0));
        assert_eq!(app.session().current_frame(), 75);
        assert!(app.session().edit_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_holds_frame_until_resumed() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _log) = app(dir.path(), 400);
        let (tx, mut rx) = mpsc::channel(8);

        app.display_current(SeekMode::Random, Instant::now());
        app.handle(Command::TogglePlay, Instant::now());
        app.handle(Command::TogglePlay, Instant::now());
        assert_eq!(app.session().state(), SessionState::Paused(0));
        assert!(app.next_tick.is_none());

        let driver = async move {
            sleep(Duration::from_secs(1)).await;
            tx.send(Command::Quit).await.unwrap();
        };
        tokio::join!(app.run(&mut rx), driver);
        assert_eq!(app.session().current_frame(), 55);
        assert!(app.session().edit_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_is_scheduled_from_command_time() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _log) = app(dir.path(), 400);

        let at = Instant::now() + Duration::from_secs(30);
        app.handle(Command::TogglePlay, at);
        assert_eq!(app.next_tick, Some(at + app.frame_interval));

        app.handle(Command::Stop, at);
        assert!(app.next_tick.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_preloads_neighbours_through_separate_source() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, log) = app(dir.path(), 400);
        let (tx, mut rx) = mpsc::channel(8);

        let driver = async move {
            tx.send(Command::NextFrame).await.unwrap();
            sleep(Duration::from_secs(1)).await;
            tx.send(Command::Quit).await.unwrap();
        };
        tokio::join!(app.run(&mut rx), driver);

        assert_eq!(
            decodes_by(&log, 0),
            vec![(60, SeekMode::Random), (61, SeekMode::Random)]
        );
        assert_eq!(
            decodes_by(&log, 1),
            vec![
                (58, SeekMode::Random),
                (59, SeekMode::Random),
                (62, SeekMode::Random)
            ]
        );
        assert!(!app.cache().contains("A", 63));
        assert!(app.close().is_some());
    }
}
