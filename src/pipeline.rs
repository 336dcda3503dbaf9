use std::path::PathBuf;

use anyhow::Result;
use image::RgbImage;
use tracing::{Level, info, span};

use crate::config::{Delegate, FaceLandmarkerOptions, PoseLandmarkerOptions, RunningMode};
use crate::error::LandmarkerError;
use crate::landmark::LandmarkerResult;
pub use face::FaceLandmarker;
pub use pose::PoseLandmarker;

mod detection;
mod face;
mod model;
mod pose;
mod roi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Face,
    Pose,
}

impl Task {
    pub fn label(&self) -> &'static str {
        match self {
            Task::Face => "face",
            Task::Pose => "pose",
        }
    }
}

/// A landmark detector fed with consecutive video frames.
pub trait Landmarker {
    fn detect_for_video(&mut self, frame: &RgbImage, timestamp_ms: f64)
    -> Result<LandmarkerResult>;
}

/// Builds landmarkers on demand. Creation is expensive (model load).
pub trait LandmarkerFactory {
    fn create(&self, task: Task) -> Result<Box<dyn Landmarker>>;
}

impl Landmarker for FaceLandmarker {
    fn detect_for_video(
        &mut self,
        frame: &RgbImage,
        timestamp_ms: f64,
    ) -> Result<LandmarkerResult> {
        Ok(FaceLandmarker::detect_for_video(self, frame, timestamp_ms)?.into())
    }
}

impl Landmarker for PoseLandmarker {
    fn detect_for_video(
        &mut self,
        frame: &RgbImage,
        timestamp_ms: f64,
    ) -> Result<LandmarkerResult> {
        Ok(PoseLandmarker::detect_for_video(self, frame, timestamp_ms)?.into())
    }
}

/// ONNX Runtime backed landmarkers using the models found in `models_dir`.
pub struct OnnxLandmarkers {
    pub models_dir: PathBuf,
    pub delegate: Delegate,
    pub threads: usize,
}

impl OnnxLandmarkers {
    pub fn face_options(&self, running_mode: RunningMode) -> FaceLandmarkerOptions {
        let mut options = FaceLandmarkerOptions::in_dir(&self.models_dir);
        options.base_options.delegate = self.delegate;
        options.base_options.threads = self.threads;
        options.running_mode = running_mode;
        options
    }

    pub fn pose_options(&self, running_mode: RunningMode) -> PoseLandmarkerOptions {
        let mut options = PoseLandmarkerOptions::in_dir(&self.models_dir);
        options.base_options.delegate = self.delegate;
        options.base_options.threads = self.threads;
        options.running_mode = running_mode;
        options
    }
}

impl LandmarkerFactory for OnnxLandmarkers {
    fn create(&self, task: Task) -> Result<Box<dyn Landmarker>> {
        let span = span!(Level::INFO, "create_landmarker");
        let _guard = span.enter();
        info!("Initializing {} landmarker", task.label());

        Ok(match task {
            Task::Face => Box::new(FaceLandmarker::create_from_options(
                self.face_options(RunningMode::Video),
            )?),
            Task::Pose => Box::new(PoseLandmarker::create_from_options(
                self.pose_options(RunningMode::Video),
            )?),
        })
    }
}

/// What a landmarker does with a crop given its presence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Below the keep threshold, discarded.
    Drop,
    /// Reported for this frame only.
    Keep,
    /// Reported, and its landmarks seed the next frame's crop.
    Track,
}

impl Verdict {
    /// Scores equal to a threshold pass it.
    pub fn judge(score: f32, min_keep: f32, min_tracking: f32) -> Verdict {
        if score < min_keep {
            Verdict::Drop
        } else if score >= min_tracking {
            Verdict::Track
        } else {
            Verdict::Keep
        }
    }
}

/// Enforces the running mode API split and, in video mode, strictly
/// increasing timestamps.
#[derive(Debug)]
pub struct RunningModeGuard {
    mode: RunningMode,
    last_timestamp_ms: Option<f64>,
}

impl RunningModeGuard {
    pub fn new(mode: RunningMode) -> RunningModeGuard {
        RunningModeGuard {
            mode,
            last_timestamp_ms: None,
        }
    }

    pub fn check_image(&self) -> Result<(), LandmarkerError> {
        self.require(RunningMode::Image)
    }

    pub fn check_video(&mut self, timestamp_ms: f64) -> Result<(), LandmarkerError> {
        self.require(RunningMode::Video)?;

        if let Some(previous) = self.last_timestamp_ms {
            if timestamp_ms <= previous {
                return Err(LandmarkerError::NonMonotonicTimestamp {
                    previous,
                    current: timestamp_ms,
                });
            }
        }
        self.last_timestamp_ms = Some(timestamp_ms);

        Ok(())
    }

    fn require(&self, expected: RunningMode) -> Result<(), LandmarkerError> {
        if self.mode != expected {
            return Err(LandmarkerError::WrongRunningMode {
                expected,
                actual: self.mode,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_timestamps_must_increase() {
        let mut guard = RunningModeGuard::new(RunningMode::Video);
        assert!(guard.check_video(10.).is_ok());
        assert!(guard.check_video(10.5).is_ok());
        assert!(matches!(
            guard.check_video(10.5),
            Err(LandmarkerError::NonMonotonicTimestamp { .. })
        ));
        assert!(matches!(
            guard.check_video(3.),
            Err(LandmarkerError::NonMonotonicTimestamp { .. })
        ));
        // rejected timestamps do not move the clock
        assert!(guard.check_video(11.).is_ok());
    }

    #[test]
    fn test_running_mode_mismatch() {
        let video = RunningModeGuard::new(RunningMode::Video);
        assert!(matches!(
            video.check_image(),
            Err(LandmarkerError::WrongRunningMode { .. })
        ));

        let mut image = RunningModeGuard::new(RunningMode::Image);
        assert!(image.check_image().is_ok());
        assert!(matches!(
            image.check_video(1.),
            Err(LandmarkerError::WrongRunningMode { .. })
        ));
    }

    #[test]
    fn test_verdict_thresholds() {
        assert_eq!(Verdict::judge(0.49, 0.5, 0.7), Verdict::Drop);
        assert_eq!(Verdict::judge(0.5, 0.5, 0.7), Verdict::Keep);
        assert_eq!(Verdict::judge(0.69, 0.5, 0.7), Verdict::Keep);
        assert_eq!(Verdict::judge(0.7, 0.5, 0.7), Verdict::Track);
        assert_eq!(Verdict::judge(1., 0.5, 0.7), Verdict::Track);
        // tracking below the keep threshold never rescues a crop
        assert_eq!(Verdict::judge(0.3, 0.5, 0.2), Verdict::Drop);
        assert_eq!(Verdict::judge(0.5, 0.5, 0.2), Verdict::Track);
    }

    #[test]
    fn test_factory_options() {
        let factory = OnnxLandmarkers {
            models_dir: PathBuf::from("assets"),
            delegate: Delegate::Cpu,
            threads: 2,
        };
        let face = factory.face_options(RunningMode::Image);
        assert_eq!(face.running_mode, RunningMode::Image);
        assert_eq!(face.base_options.delegate, Delegate::Cpu);
        assert_eq!(face.base_options.threads, 2);
        assert_eq!(
            face.detector_model_path,
            PathBuf::from("assets/face_detection_short_range.onnx")
        );

        let pose = factory.pose_options(RunningMode::Video);
        assert_eq!(
            pose.base_options.model_asset_path,
            PathBuf::from("assets/pose_landmark_lite.onnx")
        );
    }
}
