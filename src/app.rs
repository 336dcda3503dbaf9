use std::time::{Duration, Instant};

use anyhow::Result;
use image::RgbaImage;
use tracing::{Level, debug, error, info, span, trace};

use crate::config::CameraRequest;
use crate::draw::{Canvas, Overlay, draw_face_landmarks, draw_pose_landmarks};
use crate::landmark::LandmarkerResult;
use crate::pipeline::{Landmarker, LandmarkerFactory, Task};
use crate::video::{VideoSource, composite};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMode {
    None,
    Face,
    Pose,
}

impl DetectionMode {
    pub fn task(&self) -> Option<Task> {
        match self {
            DetectionMode::None => None,
            DetectionMode::Face => Some(Task::Face),
            DetectionMode::Pose => Some(Task::Pose),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Normal,
    Loading,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub message: String,
    pub kind: StatusKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonStates {
    pub start_enabled: bool,
    pub face_enabled: bool,
    pub pose_enabled: bool,
    pub face_active: bool,
    pub pose_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StartCamera,
    SelectMode(DetectionMode),
}

/// Remembers the media time of the last processed frame.
#[derive(Debug, Default)]
pub struct FrameGate {
    last_media_time: Option<Duration>,
}

impl FrameGate {
    /// True, and remembers `media_time`, when it differs from the last one.
    pub fn advance(&mut self, media_time: Duration) -> bool {
        if self.last_media_time == Some(media_time) {
            return false;
        }
        self.last_media_time = Some(media_time);
        true
    }
}

type AnimationHandle = u64;

/// Ties the camera, the landmarkers and the overlay together and holds the
/// control panel state. At most one detection mode runs at a time, driven
/// by a single scheduled animation callback.
pub struct App<V: VideoSource, F: LandmarkerFactory> {
    source: V,
    factory: F,
    camera: CameraRequest,
    canvas: Overlay,
    status: Status,
    start_enabled: bool,
    modes_enabled: bool,
    mode: DetectionMode,
    animation: Option<AnimationHandle>,
    next_animation: AnimationHandle,
    gate: FrameGate,
    face: Option<Box<dyn Landmarker>>,
    pose: Option<Box<dyn Landmarker>>,
    pending: Option<Command>,
    epoch: Instant,
}

impl<V: VideoSource, F: LandmarkerFactory> App<V, F> {
    pub fn new(source: V, factory: F, camera: CameraRequest) -> Self {
        App {
            source,
            factory,
            camera,
            canvas: Overlay::new(0, 0),
            status: Status {
                message: "Press start to open the camera.".to_string(),
                kind: StatusKind::Normal,
            },
            start_enabled: true,
            modes_enabled: false,
            mode: DetectionMode::None,
            animation: None,
            next_animation: 0,
            gate: FrameGate::default(),
            face: None,
            pose: None,
            pending: None,
            epoch: Instant::now(),
        }
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn buttons(&self) -> ButtonStates {
        ButtonStates {
            start_enabled: self.start_enabled,
            face_enabled: self.modes_enabled,
            pose_enabled: self.modes_enabled,
            face_active: self.mode == DetectionMode::Face,
            pose_active: self.mode == DetectionMode::Pose,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Accepts a command from the control panel. Work that blocks (opening
    /// the camera, loading a model) is deferred to `run_pending` so the
    /// loading status can be shown first. Returns false for commands on
    /// disabled buttons.
    pub fn queue(&mut self, command: Command) -> bool {
        match command {
            Command::StartCamera => {
                if !self.start_enabled {
                    return false;
                }
                self.start_enabled = false;
                self.update_status("Starting camera...", StatusKind::Loading);
            }
            Command::SelectMode(mode) => {
                if !self.modes_enabled {
                    return false;
                }
                // a mode queued but not yet started counts as selected
                let selected = match self.pending {
                    Some(Command::SelectMode(pending)) => pending,
                    _ => self.mode,
                };
                if mode == selected {
                    self.pending = None;
                    self.stop_detection();
                    return true;
                }
                if let Some(task) = mode.task() {
                    self.update_status(
                        &format!("Initializing {} detection...", task.label()),
                        StatusKind::Loading,
                    );
                }
            }
        }

        self.pending = Some(command);
        true
    }

    pub fn run_pending(&mut self) {
        match self.pending.take() {
            Some(Command::StartCamera) => self.start_camera(),
            Some(Command::SelectMode(mode)) => self.set_mode(mode),
            None => {}
        }
    }

    pub fn start_camera(&mut self) {
        let span = span!(Level::INFO, "start_camera");
        let _guard = span.enter();

        self.update_status("Starting camera...", StatusKind::Loading);
        self.start_enabled = false;

        match self.source.start(&self.camera) {
            Ok(resolution) => {
                self.resize_canvas(resolution.width, resolution.height);
                self.modes_enabled = true;
                self.update_status(
                    "Camera ready. Select a detection mode.",
                    StatusKind::Normal,
                );
            }
            Err(e) => {
                error!("Camera error: {e:?}");
                self.update_status("Failed to start camera.", StatusKind::Error);
                self.start_enabled = true;
            }
        }
    }

    /// Matches the overlay to the video's pixel size. Normalized landmarks
    /// are scaled when drawn, so nothing needs re-detecting.
    pub fn resize_canvas(&mut self, width: u32, height: u32) {
        if self.canvas.width() == width && self.canvas.height() == height {
            return;
        }
        debug!("Resizing canvas to {width}x{height}");
        self.canvas = Overlay::new(width, height);
    }

    pub fn set_mode(&mut self, new_mode: DetectionMode) {
        if self.mode == new_mode {
            self.stop_detection();
            return;
        }
        let Some(task) = new_mode.task() else {
            self.stop_detection();
            return;
        };

        self.update_status(
            &format!("Initializing {} detection...", task.label()),
            StatusKind::Loading,
        );

        match self.ensure_landmarker(task) {
            Ok(()) => {
                self.mode = new_mode;
                self.start_detection();
                self.update_status(
                    &format!("Running {} detection...", task.label()),
                    StatusKind::Normal,
                );
            }
            Err(e) => {
                error!("Initialization error: {e:?}");
                self.update_status("Initialization failed.", StatusKind::Error);
                self.mode = DetectionMode::None;
            }
        }
    }

    pub fn stop_detection(&mut self) {
        self.cancel_animation_frame();
        self.mode = DetectionMode::None;
        self.canvas.clear();
        self.update_status("Detection stopped.", StatusKind::Normal);
    }

    /// One pass of the render loop: pick up the newest camera frame, then
    /// run the scheduled animation callback, if any. Returns true when the
    /// overlay was redrawn.
    pub fn tick(&mut self) -> bool {
        self.source.poll();
        if let Some(frame) = self.source.latest() {
            let (width, height) = frame.image.dimensions();
            self.resize_canvas(width, height);
        }

        match self.animation.take() {
            Some(handle) => {
                trace!("Running animation frame {handle}");
                self.run_animation_frame()
            }
            None => false,
        }
    }

    pub fn media_time(&self) -> Option<Duration> {
        self.source.latest().map(|frame| frame.media_time)
    }

    /// Latest camera frame with the overlay on top, with its media time.
    pub fn composite(&self) -> Option<(Duration, RgbaImage)> {
        let frame = self.source.latest()?;
        Some((
            frame.media_time,
            composite(&frame.image, self.canvas.image()),
        ))
    }

    fn ensure_landmarker(&mut self, task: Task) -> Result<()> {
        let slot = match task {
            Task::Face => &mut self.face,
            Task::Pose => &mut self.pose,
        };
        if slot.is_none() {
            *slot = Some(self.factory.create(task)?);
            info!("{} landmarker ready", task.label());
        }
        Ok(())
    }

    fn start_detection(&mut self) {
        self.cancel_animation_frame();
        self.run_animation_frame();
    }

    fn request_animation_frame(&mut self) -> AnimationHandle {
        self.next_animation += 1;
        self.next_animation
    }

    fn cancel_animation_frame(&mut self) {
        if let Some(handle) = self.animation.take() {
            debug!("Cancelled animation frame {handle}");
        }
    }

    fn run_animation_frame(&mut self) -> bool {
        if self.mode == DetectionMode::None {
            return false;
        }

        let redrawn = self.detect();
        self.animation = Some(self.request_animation_frame());
        redrawn
    }

    fn detect(&mut self) -> bool {
        let Some(frame) = self.source.latest() else {
            return false;
        };
        if !self.gate.advance(frame.media_time) {
            return false;
        }

        self.canvas.clear();

        let timestamp_ms = self.epoch.elapsed().as_secs_f64() * 1000.;
        let landmarker = match self.mode {
            DetectionMode::Face => self.face.as_mut(),
            DetectionMode::Pose => self.pose.as_mut(),
            DetectionMode::None => None,
        };
        let Some(landmarker) = landmarker else {
            return true;
        };

        match landmarker.detect_for_video(&frame.image, timestamp_ms) {
            Ok(LandmarkerResult::Face(result)) => draw_face_landmarks(&mut self.canvas, &result),
            Ok(LandmarkerResult::Pose(result)) => draw_pose_landmarks(&mut self.canvas, &result),
            Err(e) => error!("Detection error: {e:?}"),
        }

        true
    }

    fn update_status(&mut self, message: &str, kind: StatusKind) {
        debug!("Status: {message}");
        self.status = Status {
            message: message.to_string(),
            kind,
        };
    }
}
