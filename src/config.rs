use std::fmt;
use std::path::{Path, PathBuf};

pub const FACE_DETECTION_MODEL: &str = "face_detection_short_range.onnx";
pub const FACE_LANDMARK_MODEL: &str = "face_landmark.onnx";
pub const POSE_LANDMARK_MODEL: &str = "pose_landmark_lite.onnx";

/// Execution backend requested from the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delegate {
    Cpu,
    Gpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningMode {
    /// Independent still images, no tracking between calls.
    Image,
    /// Consecutive frames with strictly increasing timestamps.
    Video,
}

impl fmt::Display for RunningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunningMode::Image => write!(f, "IMAGE"),
            RunningMode::Video => write!(f, "VIDEO"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BaseOptions {
    pub model_asset_path: PathBuf,
    pub delegate: Delegate,
    pub threads: usize,
}

impl BaseOptions {
    pub fn new(model_asset_path: impl Into<PathBuf>) -> BaseOptions {
        BaseOptions {
            model_asset_path: model_asset_path.into(),
            delegate: Delegate::Gpu,
            threads: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FaceLandmarkerOptions {
    pub base_options: BaseOptions,
    pub detector_model_path: PathBuf,
    pub running_mode: RunningMode,
    pub num_faces: usize,
    pub min_face_detection_confidence: f32,
    pub min_face_presence_confidence: f32,
    pub min_tracking_confidence: f32,
}

impl FaceLandmarkerOptions {
    pub fn in_dir(models_dir: &Path) -> FaceLandmarkerOptions {
        FaceLandmarkerOptions {
            base_options: BaseOptions::new(models_dir.join(FACE_LANDMARK_MODEL)),
            detector_model_path: models_dir.join(FACE_DETECTION_MODEL),
            ..Default::default()
        }
    }
}

impl Default for FaceLandmarkerOptions {
    fn default() -> Self {
        FaceLandmarkerOptions {
            base_options: BaseOptions::new(Path::new("models").join(FACE_LANDMARK_MODEL)),
            detector_model_path: Path::new("models").join(FACE_DETECTION_MODEL),
            running_mode: RunningMode::Video,
            num_faces: 1,
            min_face_detection_confidence: 0.5,
            min_face_presence_confidence: 0.5,
            min_tracking_confidence: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoseLandmarkerOptions {
    pub base_options: BaseOptions,
    pub running_mode: RunningMode,
    pub num_poses: usize,
    pub min_pose_detection_confidence: f32,
    pub min_pose_presence_confidence: f32,
    pub min_tracking_confidence: f32,
}

impl PoseLandmarkerOptions {
    pub fn in_dir(models_dir: &Path) -> PoseLandmarkerOptions {
        PoseLandmarkerOptions {
            base_options: BaseOptions::new(models_dir.join(POSE_LANDMARK_MODEL)),
            ..Default::default()
        }
    }
}

impl Default for PoseLandmarkerOptions {
    fn default() -> Self {
        PoseLandmarkerOptions {
            base_options: BaseOptions::new(Path::new("models").join(POSE_LANDMARK_MODEL)),
            running_mode: RunningMode::Video,
            num_poses: 1,
            min_pose_detection_confidence: 0.5,
            min_pose_presence_confidence: 0.5,
            min_tracking_confidence: 0.5,
        }
    }
}

/// Camera stream request. The resolution is a preference, not a guarantee.
#[derive(Debug, Clone)]
pub struct CameraRequest {
    pub index: Option<u32>,
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub fps: u32,
}

impl Default for CameraRequest {
    fn default() -> Self {
        CameraRequest {
            index: None,
            ideal_width: 1280,
            ideal_height: 720,
            fps: 30,
        }
    }
}
