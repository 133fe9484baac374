use crate::config::{Config, ConfigError};
use image::RgbImage;
use rollcall_core::pipeline::PipelineError;
use rollcall_core::{
    annotate::{Annotator, LabelFont}, load_gallery, Detector, Encoder, FaceDetector, FacePipeline,
    FaceRecognizer, Gallery, MatchResult,
};
use rollcall_hw::{Camera, CameraError, FrameSource};
use rollcall_store::{
    AttendanceGate, AttendanceOutcome, AttendanceStore, Clock, SqliteStore, StoreError, SystemClock,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("detector error: {0}")]
    Detector(#[from] rollcall_core::detector::DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] rollcall_core::recognizer::RecognizerError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
}

/// Lifecycle of one engine instance. There is no way back to `Running`;
/// a new engine (and camera) is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Run the pipeline on every Nth captured frame.
    pub frame_skip: u32,
    /// Consecutive failed frames tolerated before the loop stops.
    pub max_consecutive_errors: u32,
    /// Frames discarded before the loop starts.
    pub warmup_frames: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frame_skip: 3,
            max_consecutive_errors: 5,
            warmup_frames: 0,
        }
    }
}

/// A processed frame with its faces outlined.
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub image: RgbImage,
    /// 1-based capture count of this frame.
    pub sequence: u64,
    pub matches: Vec<MatchResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceEvent {
    pub name: String,
    pub date: chrono::NaiveDate,
    pub outcome: AttendanceOutcome,
}

/// Events delivered to the presentation side, in processing order.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Frame(AnnotatedFrame),
    Attendance(AttendanceEvent),
}

pub type EventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Counts every Nth call, starting with the Nth.
#[derive(Debug)]
pub struct FrameSkip {
    every: u64,
    captured: u64,
}

impl FrameSkip {
    pub fn new(every: u32) -> Self {
        Self {
            every: u64::from(every.max(1)),
            captured: 0,
        }
    }

    /// Register one captured frame; true if it should be processed.
    pub fn should_process(&mut self) -> bool {
        self.captured += 1;
        self.captured % self.every == 0
    }

    pub fn captured(&self) -> u64 {
        self.captured
    }
}

#[derive(Debug, Default)]
struct Counters {
    frames_captured: AtomicU64,
    frames_processed: AtomicU64,
    attendance_recorded: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub frames_captured: u64,
    pub frames_processed: u64,
    pub attendance_recorded: u64,
    pub errors: u64,
}

/// State shared between the worker thread and its handles.
///
/// Events are only sent while holding `state` and only in `Running`, so
/// once `stop()` has taken the lock nothing more can be emitted.
#[derive(Debug)]
struct Shared {
    state: Mutex<EngineState>,
    counters: Counters,
    gallery_size: usize,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn state(&self) -> EngineState {
        *self.lock_state()
    }

    fn set_state(&self, next: EngineState) {
        *self.lock_state() = next;
    }

    /// Returns false if the event was not delivered (stopped, or the
    /// receiver is gone).
    fn emit(&self, tx: &mpsc::UnboundedSender<EngineEvent>, event: EngineEvent) -> bool {
        let mut state = self.lock_state();
        if *state != EngineState::Running {
            return false;
        }
        if tx.send(event).is_err() {
            tracing::warn!("event receiver dropped; stopping engine");
            *state = EngineState::Stopping;
            return false;
        }
        true
    }
}

/// Clone-safe handle to a started engine.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl EngineHandle {
    /// Request a stop. Idempotent; returns true for the call that moved the
    /// engine out of `Running`. No event is emitted after this returns.
    pub fn stop(&self) -> bool {
        let mut state = self.shared.lock_state();
        match *state {
            EngineState::Idle | EngineState::Running => {
                *state = EngineState::Stopping;
                tracing::info!("engine stop requested");
                true
            }
            EngineState::Stopping | EngineState::Stopped => false,
        }
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    pub fn stats(&self) -> EngineStats {
        let c = &self.shared.counters;
        EngineStats {
            frames_captured: c.frames_captured.load(Ordering::Relaxed),
            frames_processed: c.frames_processed.load(Ordering::Relaxed),
            attendance_recorded: c.attendance_recorded.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
        }
    }

    pub fn gallery_size(&self) -> usize {
        self.shared.gallery_size
    }

    /// Block until the worker thread has exited and the camera is released.
    pub fn join(&self) {
        let worker = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = worker {
            if handle.join().is_err() {
                tracing::error!("engine thread panicked");
                self.shared.set_state(EngineState::Stopped);
            }
        }
    }
}

/// Capture → detect → match → gate loop over one frame source.
pub struct Engine<S, D, E, St, C = SystemClock> {
    source: S,
    pipeline: FacePipeline<D, E>,
    gallery: Arc<Gallery>,
    gate: AttendanceGate<St, C>,
    annotator: Annotator,
    config: EngineConfig,
    shared: Arc<Shared>,
}

impl<S, D, E, St, C> Engine<S, D, E, St, C>
where
    S: FrameSource + 'static,
    D: Detector + Send + 'static,
    E: Encoder + Send + 'static,
    St: AttendanceStore + 'static,
    C: Clock + 'static,
{
    pub fn new(
        source: S,
        pipeline: FacePipeline<D, E>,
        gallery: Arc<Gallery>,
        gate: AttendanceGate<St, C>,
        config: EngineConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(EngineState::Idle),
            counters: Counters::default(),
            gallery_size: gallery.len(),
        });
        Self {
            source,
            pipeline,
            gallery,
            gate,
            annotator: Annotator::default(),
            config,
            shared,
        }
    }

    /// Replace the default box-only annotator.
    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = annotator;
        self
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    /// Spawn the worker on a dedicated OS thread and return its handle and
    /// event stream.
    pub fn start(self) -> Result<(EngineHandle, EventReceiver), EngineError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = self.shared.clone();
        shared.set_state(EngineState::Running);

        let worker = std::thread::Builder::new()
            .name("rollcall-engine".into())
            .spawn(move || self.run(tx))
            .map_err(|e| {
                shared.set_state(EngineState::Stopped);
                EngineError::Spawn(e)
            })?;

        let handle = EngineHandle {
            shared,
            worker: Arc::new(Mutex::new(Some(worker))),
        };
        Ok((handle, rx))
    }

    fn run(mut self, tx: mpsc::UnboundedSender<EngineEvent>) {
        tracing::info!(
            gallery = self.gallery.len(),
            frame_skip = self.config.frame_skip,
            "engine thread started"
        );

        self.warmup();

        let mut skip = FrameSkip::new(self.config.frame_skip);
        let mut consecutive_errors = 0u32;

        while self.shared.state() == EngineState::Running {
            // A buffer that arrived but would not convert is a bad frame,
            // not a dead device.
            let frame = match self.source.capture() {
                Ok(frame) => Ok(frame),
                Err(CameraError::Frame(e)) => Err(e),
                Err(e) => {
                    tracing::error!(error = %e, "frame capture failed; stopping");
                    self.shared.counters.errors.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            };
            self.shared.counters.frames_captured.fetch_add(1, Ordering::Relaxed);

            if !skip.should_process() {
                continue;
            }
            let sequence = skip.captured();

            let failed = match frame.and_then(|f| f.into_image()) {
                Ok(image) => !self.process(image, sequence, &tx),
                Err(e) => {
                    tracing::warn!(sequence, error = %e, "malformed frame skipped");
                    true
                }
            };

            if failed {
                consecutive_errors += 1;
                self.shared.counters.errors.fetch_add(1, Ordering::Relaxed);
                if consecutive_errors >= self.config.max_consecutive_errors {
                    tracing::error!(consecutive_errors, "too many consecutive frame failures; stopping");
                    break;
                }
            } else {
                consecutive_errors = 0;
            }
        }

        self.source.release();
        self.shared.set_state(EngineState::Stopped);
        tracing::info!(stats = ?self.stats_snapshot(), "engine thread exiting");
    }

    fn warmup(&mut self) {
        if self.config.warmup_frames == 0 {
            return;
        }
        tracing::info!(count = self.config.warmup_frames, "discarding warmup frames");
        for _ in 0..self.config.warmup_frames {
            if self.shared.state() != EngineState::Running {
                return;
            }
            if let Err(e) = self.source.capture() {
                tracing::debug!(error = %e, "warmup capture failed");
            }
        }
    }

    /// Run one frame through the pipeline and gate, then emit. Returns
    /// false if the frame failed (pipeline or store error).
    fn process(
        &mut self,
        mut image: RgbImage,
        sequence: u64,
        tx: &mpsc::UnboundedSender<EngineEvent>,
    ) -> bool {
        let matches = match self.pipeline.recognize(&image, &self.gallery) {
            Ok(matches) => matches,
            Err(e) => {
                tracing::warn!(sequence, error = %e, "inference failed; frame skipped");
                return false;
            }
        };
        self.shared.counters.frames_processed.fetch_add(1, Ordering::Relaxed);

        let mut attendance = Vec::new();
        let mut store_failed = false;
        for name in matches.iter().filter_map(|m| m.identity.name()) {
            match self.gate.admit(name) {
                Ok((date, outcome)) => {
                    if outcome == AttendanceOutcome::Recorded {
                        self.shared.counters.attendance_recorded.fetch_add(1, Ordering::Relaxed);
                        tracing::info!(name, %date, "attendance recorded");
                    }
                    attendance.push(AttendanceEvent {
                        name: name.to_string(),
                        date,
                        outcome,
                    });
                }
                Err(e) => {
                    tracing::error!(name, error = %e, "attendance store write failed");
                    store_failed = true;
                }
            }
        }

        self.annotator.annotate(&mut image, &matches);

        let frame = EngineEvent::Frame(AnnotatedFrame {
            image,
            sequence,
            matches,
        });
        if self.shared.emit(tx, frame) {
            for event in attendance {
                if !self.shared.emit(tx, EngineEvent::Attendance(event)) {
                    break;
                }
            }
        }

        !store_failed
    }

    fn stats_snapshot(&self) -> EngineStats {
        let c = &self.shared.counters;
        EngineStats {
            frames_captured: c.frames_captured.load(Ordering::Relaxed),
            frames_processed: c.frames_processed.load(Ordering::Relaxed),
            attendance_recorded: c.attendance_recorded.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
        }
    }
}

/// Production engine: V4L2 camera, ONNX models, SQLite attendance.
pub type DaemonEngine = Engine<Camera, FaceDetector, FaceRecognizer, SqliteStore>;

/// Validate config, load models and gallery, open the store, then open the
/// camera. Everything that can fail fatally happens before the camera is
/// acquired.
pub fn build(config: &Config) -> Result<DaemonEngine, EngineError> {
    config.validate()?;

    let detector = FaceDetector::load(&config.detector_model_path(), config.detector_config())?;
    let recognizer = FaceRecognizer::load(&config.encoder_model_path())?;
    let mut pipeline = FacePipeline::new(detector, recognizer, config.pipeline_config())?;

    let sources = config.gallery_sources()?;
    let gallery = load_gallery(&mut pipeline, &sources);

    let mut store = SqliteStore::open(&config.db_path)?;
    for name in gallery.names() {
        if !store.exists(name)? {
            store.register(name)?;
            tracing::info!(name, "student added to roster from gallery");
        }
    }

    let camera = Camera::open(&config.camera_device, config.capture_width, config.capture_height)?;
    tracing::info!(
        device = %config.camera_device,
        width = camera.width,
        height = camera.height,
        fourcc = ?camera.fourcc,
        "camera opened"
    );

    let annotator = Annotator::new(label_font(config));
    if !annotator.draws_labels() {
        tracing::warn!("no label font found; preview frames carry boxes without names");
    }

    Ok(Engine::new(
        camera,
        pipeline,
        Arc::new(gallery),
        AttendanceGate::new(store),
        EngineConfig {
            frame_skip: config.frame_skip,
            max_consecutive_errors: config.max_consecutive_errors,
            warmup_frames: config.warmup_frames,
        },
    )
    .with_annotator(annotator))
}

/// The configured label font, else the first system font that loads.
fn label_font(config: &Config) -> Option<LabelFont> {
    if let Some(path) = &config.label_font {
        match LabelFont::load(path) {
            Ok(font) => return Some(font),
            Err(e) => tracing::warn!(error = %e, "configured label font unusable; trying system fonts"),
        }
    }
    LabelFont::discover()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rollcall_core::detector::DetectorError;
    use rollcall_core::recognizer::RecognizerError;
    use rollcall_core::{Embedding, PipelineConfig, RawDetection};
    use rollcall_hw::{Frame, FrameError};
    use rollcall_store::{FixedClock, MemoryStore};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    const W: u32 = 64;
    const H: u32 = 64;

    /// Yields uniform frames; fails once `limit` frames have been captured.
    /// Capture numbers listed in `corrupt` return an undecodable buffer.
    struct MockCamera {
        limit: Option<u64>,
        captured: u64,
        corrupt: Vec<u64>,
        delay: Duration,
        released: Arc<AtomicBool>,
    }

    impl MockCamera {
        fn new(limit: Option<u64>, delay: Duration) -> (Self, Arc<AtomicBool>) {
            let released = Arc::new(AtomicBool::new(false));
            let cam = Self {
                limit,
                captured: 0,
                corrupt: Vec::new(),
                delay,
                released: released.clone(),
            };
            (cam, released)
        }
    }

    impl FrameSource for MockCamera {
        fn capture(&mut self) -> Result<Frame, CameraError> {
            if self.is_released() {
                return Err(CameraError::Released);
            }
            if self.limit.is_some_and(|limit| self.captured >= limit) {
                return Err(CameraError::CaptureFailed("end of test stream".into()));
            }
            std::thread::sleep(self.delay);
            self.captured += 1;
            if self.corrupt.contains(&self.captured) {
                return Err(FrameError::Decode("truncated jpeg".into()).into());
            }
            Ok(Frame {
                data: vec![200; (W * H * 3) as usize],
                width: W,
                height: H,
                timestamp: std::time::Instant::now(),
                sequence: self.captured as u32,
            })
        }

        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }

        fn is_released(&self) -> bool {
            self.released.load(Ordering::SeqCst)
        }
    }

    /// One centered face per frame, or an inference failure.
    struct MockDetector {
        fail: bool,
    }

    impl Detector for MockDetector {
        fn input_size(&self) -> (u32, u32) {
            (32, 32)
        }

        fn detect(&mut self, _resized: &RgbImage) -> Result<Vec<RawDetection>, DetectorError> {
            if self.fail {
                return Err(DetectorError::InferenceFailed("mock failure".into()));
            }
            Ok(vec![RawDetection {
                confidence: 0.9,
                xmin: 0.1,
                ymin: 0.1,
                xmax: 0.9,
                ymax: 0.9,
            }])
        }
    }

    /// Always returns the same encoding.
    struct MockEncoder(Vec<f32>);

    impl Encoder for MockEncoder {
        fn encode(&mut self, _face: &RgbImage) -> Result<Option<Embedding>, RecognizerError> {
            Ok(Some(Embedding::new(self.0.clone())))
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 9, 16).unwrap()
    }

    fn engine(
        camera: MockCamera,
        fail: bool,
        alice: Vec<f32>,
        config: EngineConfig,
    ) -> Engine<MockCamera, MockDetector, MockEncoder, MemoryStore, FixedClock> {
        let pipeline = FacePipeline::new(
            MockDetector { fail },
            MockEncoder(vec![1.0, 0.0]),
            PipelineConfig::default(),
        )
        .unwrap();
        let mut gallery = Gallery::new();
        gallery.insert("Alice", Embedding::new(alice));
        Engine::new(
            camera,
            pipeline,
            Arc::new(gallery),
            AttendanceGate::with_clock(MemoryStore::new(), FixedClock(today())),
            config,
        )
    }

    fn drain(rx: &mut EventReceiver) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_frame_skip_every_third() {
        let mut skip = FrameSkip::new(3);
        let processed: Vec<u64> = (1..=10)
            .filter(|_| skip.should_process())
            .collect();
        assert_eq!(processed, vec![3, 6, 9]);

        let mut every = FrameSkip::new(1);
        assert!((0..5).all(|_| every.should_process()));
    }

    #[test]
    fn test_known_face_recorded_once_then_suppressed() {
        let (camera, released) = MockCamera::new(Some(9), Duration::ZERO);
        let engine = engine(camera, false, vec![1.0, 0.0], EngineConfig::default());
        assert_eq!(engine.state(), EngineState::Idle);

        let (handle, mut rx) = engine.start().unwrap();
        handle.join();

        assert_eq!(handle.state(), EngineState::Stopped);
        assert!(released.load(Ordering::SeqCst));

        let events = drain(&mut rx);
        let frames: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Frame(f) => Some(f.sequence),
                _ => None,
            })
            .collect();
        assert_eq!(frames, vec![3, 6, 9]);

        let outcomes: Vec<AttendanceOutcome> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Attendance(a) => {
                    assert_eq!(a.name, "Alice");
                    assert_eq!(a.date, today());
                    Some(a.outcome)
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            outcomes,
            vec![
                AttendanceOutcome::Recorded,
                AttendanceOutcome::AlreadyRecorded,
                AttendanceOutcome::AlreadyRecorded,
            ]
        );

        // Each attendance event follows its frame.
        assert!(matches!(events[0], EngineEvent::Frame(_)));
        assert!(matches!(events[1], EngineEvent::Attendance(_)));

        let stats = handle.stats();
        assert_eq!(stats.frames_captured, 9);
        assert_eq!(stats.frames_processed, 3);
        assert_eq!(stats.attendance_recorded, 1);
    }

    #[test]
    fn test_unknown_face_never_reaches_gate() {
        let (camera, _released) = MockCamera::new(Some(6), Duration::ZERO);
        let engine = engine(camera, false, vec![-1.0, 0.0], EngineConfig::default());

        let (handle, mut rx) = engine.start().unwrap();
        handle.join();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        for event in &events {
            match event {
                EngineEvent::Frame(f) => {
                    assert_eq!(f.matches.len(), 1);
                    assert!(!f.matches[0].identity.is_known());
                }
                EngineEvent::Attendance(_) => panic!("unknown face must not be admitted"),
            }
        }
        assert_eq!(handle.stats().attendance_recorded, 0);
    }

    #[test]
    fn test_frames_are_annotated() {
        let (camera, _released) = MockCamera::new(Some(3), Duration::ZERO);
        let engine = engine(camera, false, vec![1.0, 0.0], EngineConfig::default());
        let (handle, mut rx) = engine.start().unwrap();
        handle.join();

        let events = drain(&mut rx);
        let EngineEvent::Frame(frame) = &events[0] else {
            panic!("expected a frame first");
        };
        let bbox = frame.matches[0].detection.bbox;
        assert_eq!(
            *frame.image.get_pixel(bbox.xmin, bbox.ymin),
            rollcall_core::annotate::KNOWN_COLOR
        );
    }

    #[test]
    fn test_stop_mid_loop_silences_events_and_releases_camera() {
        let (camera, released) = MockCamera::new(None, Duration::from_millis(2));
        let config = EngineConfig {
            frame_skip: 1,
            ..EngineConfig::default()
        };
        let engine = engine(camera, false, vec![1.0, 0.0], config);
        let (handle, mut rx) = engine.start().unwrap();

        // Let a few frames through.
        let mut seen = 0;
        while seen < 3 {
            match rx.blocking_recv() {
                Some(_) => seen += 1,
                None => panic!("engine exited early"),
            }
        }

        assert!(handle.stop());
        assert!(!handle.stop());
        drain(&mut rx);

        handle.join();
        assert_eq!(handle.state(), EngineState::Stopped);
        assert!(released.load(Ordering::SeqCst));
        assert!(rx.try_recv().is_err(), "event emitted after stop");
    }

    #[test]
    fn test_persistent_inference_errors_stop_loop() {
        let (camera, released) = MockCamera::new(None, Duration::ZERO);
        let config = EngineConfig {
            frame_skip: 1,
            max_consecutive_errors: 4,
            warmup_frames: 0,
        };
        let engine = engine(camera, true, vec![1.0, 0.0], config);
        let (handle, mut rx) = engine.start().unwrap();
        handle.join();

        assert_eq!(handle.state(), EngineState::Stopped);
        assert!(released.load(Ordering::SeqCst));
        assert!(drain(&mut rx).is_empty());
        let stats = handle.stats();
        assert_eq!(stats.frames_captured, 4);
        assert_eq!(stats.frames_processed, 0);
        assert_eq!(stats.errors, 4);
    }

    #[test]
    fn test_undecodable_frame_is_skipped_not_fatal() {
        let (mut camera, released) = MockCamera::new(Some(5), Duration::ZERO);
        camera.corrupt = vec![2];
        let config = EngineConfig {
            frame_skip: 1,
            ..EngineConfig::default()
        };
        let engine = engine(camera, false, vec![1.0, 0.0], config);
        let (handle, mut rx) = engine.start().unwrap();
        handle.join();

        assert_eq!(handle.state(), EngineState::Stopped);
        assert!(released.load(Ordering::SeqCst));

        let frames: Vec<u64> = drain(&mut rx)
            .iter()
            .filter_map(|e| match e {
                EngineEvent::Frame(f) => Some(f.sequence),
                _ => None,
            })
            .collect();
        assert_eq!(frames, vec![1, 3, 4, 5]);

        let stats = handle.stats();
        assert_eq!(stats.frames_captured, 5);
        assert_eq!(stats.frames_processed, 4);
        // The bad frame, then the end of the stream.
        assert_eq!(stats.errors, 2);
    }

    #[test]
    fn test_dropped_receiver_stops_loop() {
        let (camera, released) = MockCamera::new(None, Duration::ZERO);
        let config = EngineConfig {
            frame_skip: 1,
            ..EngineConfig::default()
        };
        let engine = engine(camera, false, vec![1.0, 0.0], config);
        let (handle, rx) = engine.start().unwrap();
        drop(rx);
        handle.join();

        assert_eq!(handle.state(), EngineState::Stopped);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_warmup_frames_are_not_counted() {
        let (camera, _released) = MockCamera::new(Some(5), Duration::ZERO);
        let config = EngineConfig {
            frame_skip: 1,
            max_consecutive_errors: 5,
            warmup_frames: 2,
        };
        let engine = engine(camera, false, vec![1.0, 0.0], config);
        let (handle, _rx) = engine.start().unwrap();
        handle.join();
        assert_eq!(handle.stats().frames_captured, 3);
    }
}
