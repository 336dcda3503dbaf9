use super::{RunningModeGuard, Verdict};
use super::model::{Session, initialize_model, read_f32, run_model};
use super::roi::{OutputRange, Roi};
use crate::config::PoseLandmarkerOptions;
use crate::error::LandmarkerError;
use crate::landmark::{Landmark, PoseLandmarkerResult, sigmoid};
use crate::shapes::point::PointF32;
use crate::shapes::rect::RectF32;
use anyhow::Result;
use image::RgbImage;
use tracing::{Level, debug, span};

const SIDE: u32 = 256;
const NUM_LANDMARKS: usize = 33;
// 33 pose landmarks followed by 6 auxiliary ones, 5 values each
const NUM_OUTPUT_LANDMARKS: usize = 39;
const VALUES_PER_LANDMARK: usize = 5;
const ROI_SCALE: f32 = 1.25;

const LEFT_SHOULDER: usize = 11;
const RIGHT_SHOULDER: usize = 12;
const LEFT_HIP: usize = 23;
const RIGHT_HIP: usize = 24;

/// Single-person pose landmarker around the lite BlazePose landmark network.
///
/// Fresh detections run the network on the whole frame, letterboxed. While
/// a pose is tracked, the next frame is cropped around the previous
/// landmarks and aligned with the hip to shoulder axis.
pub struct PoseLandmarker {
    model: Session,
    options: PoseLandmarkerOptions,
    guard: RunningModeGuard,
    tracked: Option<Roi>,
}

struct Pose {
    landmarks: Vec<Landmark>,
    presence: f32,
}

impl PoseLandmarker {
    pub fn create_from_options(options: PoseLandmarkerOptions) -> Result<PoseLandmarker> {
        if options.num_poses > 1 {
            debug!(
                "Requested {} poses, only a single pose is supported",
                options.num_poses
            );
        }

        Ok(PoseLandmarker {
            model: initialize_model(&options.base_options.model_asset_path, &options.base_options)?,
            guard: RunningModeGuard::new(options.running_mode),
            options,
            tracked: None,
        })
    }

    pub fn detect(&mut self, img: &RgbImage) -> Result<PoseLandmarkerResult> {
        self.guard.check_image()?;
        let full_frame = Roi::full_frame(img.width(), img.height());
        let pose = select_pose(None, &full_frame, &self.options, |roi| self.run(img, roi))?;

        Ok(self.to_result(pose.map(|(p, _)| p.landmarks)))
    }

    pub fn detect_for_video(
        &mut self,
        img: &RgbImage,
        timestamp_ms: f64,
    ) -> Result<PoseLandmarkerResult> {
        let span = span!(Level::DEBUG, "pose_landmarker", timestamp_ms);
        let _guard = span.enter();
        self.guard.check_video(timestamp_ms)?;

        let tracked = self.tracked.take();
        let full_frame = Roi::full_frame(img.width(), img.height());
        let pose = select_pose(tracked.as_ref(), &full_frame, &self.options, |roi| {
            self.run(img, roi)
        })?;

        if let Some((p, Verdict::Track)) = &pose {
            self.tracked = roi_from_landmarks(&p.landmarks, img.width(), img.height());
        }

        Ok(self.to_result(pose.map(|(p, _)| p.landmarks)))
    }

    fn to_result(&self, landmarks: Option<Vec<Landmark>>) -> PoseLandmarkerResult {
        PoseLandmarkerResult {
            landmarks: landmarks
                .into_iter()
                .take(self.options.num_poses)
                .collect(),
        }
    }

    fn run(&self, img: &RgbImage, roi: &Roi) -> Result<Pose> {
        let input = roi.to_tensor(img, SIDE, OutputRange::ZeroToOne);
        let (screen_landmarks, pose_flag) = run_model(&self.model, "input_1", input, |outputs| {
            Ok((read_f32(outputs, "Identity")?, read_f32(outputs, "Identity_1")?))
        })?;
        let presence = pose_flag.first().copied().ok_or_else(|| {
            LandmarkerError::UnexpectedOutput("pose flag output is empty".into())
        })?;

        Ok(Pose {
            landmarks: extract_landmarks(&screen_landmarks, roi, img.width(), img.height())?,
            presence,
        })
    }
}

/// Tries the tracked crop first, gated by the presence threshold. Otherwise
/// runs on the whole frame, gated by the detection threshold.
fn select_pose(
    tracked: Option<&Roi>,
    full_frame: &Roi,
    options: &PoseLandmarkerOptions,
    mut run: impl FnMut(&Roi) -> Result<Pose>,
) -> Result<Option<(Pose, Verdict)>> {
    if let Some(roi) = tracked {
        let pose = run(roi)?;
        debug!("Tracked pose presence {:.3}", pose.presence);
        let verdict = Verdict::judge(
            pose.presence,
            options.min_pose_presence_confidence,
            options.min_tracking_confidence,
        );
        if verdict != Verdict::Drop {
            return Ok(Some((pose, verdict)));
        }
    }

    let pose = run(full_frame)?;
    debug!("Pose presence {:.3}", pose.presence);
    let verdict = Verdict::judge(
        pose.presence,
        options.min_pose_detection_confidence,
        options.min_tracking_confidence,
    );

    Ok((verdict != Verdict::Drop).then_some((pose, verdict)))
}

fn extract_landmarks(values: &[f32], roi: &Roi, width: u32, height: u32) -> Result<Vec<Landmark>> {
    if values.len() != NUM_OUTPUT_LANDMARKS * VALUES_PER_LANDMARK {
        return Err(LandmarkerError::UnexpectedOutput(format!(
            "Expected {} pose landmark values, got {}",
            NUM_OUTPUT_LANDMARKS * VALUES_PER_LANDMARK,
            values.len()
        ))
        .into());
    }

    let side = SIDE as f32;
    Ok(values
        .chunks_exact(VALUES_PER_LANDMARK)
        .take(NUM_LANDMARKS)
        .map(|v| {
            let p = roi.project(v[0], v[1], side, width, height);
            Landmark {
                x: p.x,
                y: p.y,
                z: roi.project_depth(v[2], side, width),
                visibility: sigmoid(v[3]),
                presence: sigmoid(v[4]),
            }
        })
        .collect())
}

fn roi_from_landmarks(landmarks: &[Landmark], width: u32, height: u32) -> Option<Roi> {
    let to_px = |lm: &Landmark| PointF32::new(lm.x * width as f32, lm.y * height as f32);
    let midpoint = |a: usize, b: usize| -> Option<PointF32> {
        let a = to_px(landmarks.get(a)?);
        let b = to_px(landmarks.get(b)?);
        Some(PointF32::new((a.x + b.x) / 2., (a.y + b.y) / 2.))
    };

    let bounds = RectF32::enclosing(landmarks.iter().map(to_px))?;
    let hips = midpoint(LEFT_HIP, RIGHT_HIP)?;
    let shoulders = midpoint(LEFT_SHOULDER, RIGHT_SHOULDER)?;
    // zero when the shoulders sit straight above the hips
    let theta = (shoulders.x - hips.x).atan2(hips.y - shoulders.y);

    Some(Roi::around(bounds, ROI_SCALE, theta))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_landmarks() {
        let mut values = vec![0.; NUM_OUTPUT_LANDMARKS * VALUES_PER_LANDMARK];
        for (i, v) in values.chunks_exact_mut(VALUES_PER_LANDMARK).enumerate() {
            v[0] = 128.;
            v[1] = i as f32;
            v[3] = 0.;
            v[4] = 10.;
        }

        let roi = Roi::full_frame(256, 256);
        let landmarks = extract_landmarks(&values, &roi, 256, 256).unwrap();
        assert_eq!(landmarks.len(), NUM_LANDMARKS);
        assert!((landmarks[0].x - 0.5).abs() < 1e-6);
        assert!((landmarks[32].y - 32. / 256.).abs() < 1e-6);
        assert_eq!(landmarks[5].visibility, 0.5);
        assert!(landmarks[5].presence > 0.99);
    }

    #[test]
    fn test_extract_landmarks_rejects_bad_length() {
        let roi = Roi::full_frame(256, 256);
        assert!(extract_landmarks(&[0.; 33 * 5], &roi, 256, 256).is_err());
    }

    fn standing(width: f32) -> Vec<Landmark> {
        let mut landmarks = vec![Landmark::new(0.5, 0.5, 0.); NUM_LANDMARKS];
        landmarks[0] = Landmark::new(0.5, 0.1, 0.);
        landmarks[32] = Landmark::new(0.5, 0.9, 0.);
        landmarks[LEFT_SHOULDER] = Landmark::new(0.5 + width, 0.3, 0.);
        landmarks[RIGHT_SHOULDER] = Landmark::new(0.5 - width, 0.3, 0.);
        landmarks[LEFT_HIP] = Landmark::new(0.5 + width, 0.6, 0.);
        landmarks[RIGHT_HIP] = Landmark::new(0.5 - width, 0.6, 0.);
        landmarks
    }

    #[test]
    fn test_roi_from_upright_pose() {
        let roi = roi_from_landmarks(&standing(0.1), 200, 100).unwrap();
        assert!(roi.rotation.abs() < 1e-6);
        assert!((roi.center.x - 100.).abs() < 1e-4);
        assert!((roi.center.y - 50.).abs() < 1e-4);
        // 80px tall, 40px wide
        assert!((roi.size - 100.).abs() < 1e-3);
    }

    #[test]
    fn test_roi_from_lying_pose() {
        let mut landmarks = standing(0.1);
        // shoulders to the right of the hips
        landmarks[LEFT_SHOULDER] = Landmark::new(0.8, 0.45, 0.);
        landmarks[RIGHT_SHOULDER] = Landmark::new(0.8, 0.55, 0.);
        landmarks[LEFT_HIP] = Landmark::new(0.5, 0.45, 0.);
        landmarks[RIGHT_HIP] = Landmark::new(0.5, 0.55, 0.);

        let roi = roi_from_landmarks(&landmarks, 100, 100).unwrap();
        assert!((roi.rotation - std::f32::consts::FRAC_PI_2).abs() < 1e-4);
    }

    fn gated_options() -> PoseLandmarkerOptions {
        PoseLandmarkerOptions {
            min_pose_detection_confidence: 0.6,
            min_pose_presence_confidence: 0.4,
            min_tracking_confidence: 0.8,
            ..Default::default()
        }
    }

    /// Runs `select_pose` with fixed presence scores for the tracked crop
    /// and the full frame, returning the verdict and the crops run.
    fn select(tracked: Option<f32>, fresh: f32) -> (Option<Verdict>, Vec<Roi>) {
        let tracked_roi = Roi {
            center: PointF32::new(50., 50.),
            size: 40.,
            rotation: 0.,
        };
        let full_frame = Roi::full_frame(100, 100);
        let mut runs = Vec::new();
        let pose = select_pose(
            tracked.map(|_| &tracked_roi),
            &full_frame,
            &gated_options(),
            |roi| {
                runs.push(*roi);
                let presence = if *roi == full_frame {
                    fresh
                } else {
                    tracked.unwrap_or(0.)
                };
                Ok(Pose {
                    landmarks: standing(0.1),
                    presence,
                })
            },
        )
        .unwrap();

        (pose.map(|(_, verdict)| verdict), runs)
    }

    #[test]
    fn test_fresh_pose_uses_detection_threshold() {
        let full_frame = Roi::full_frame(100, 100);
        assert_eq!(select(None, 0.59), (None, vec![full_frame]));
        assert_eq!(select(None, 0.6), (Some(Verdict::Keep), vec![full_frame]));
        assert_eq!(select(None, 0.8), (Some(Verdict::Track), vec![full_frame]));
    }

    #[test]
    fn test_tracked_pose_uses_presence_threshold() {
        // kept below the detection threshold, no fresh run
        let (verdict, runs) = select(Some(0.4), 0.);
        assert_eq!(verdict, Some(Verdict::Keep));
        assert_eq!(runs.len(), 1);
        assert_ne!(runs[0], Roi::full_frame(100, 100));

        let (verdict, runs) = select(Some(0.8), 0.);
        assert_eq!(verdict, Some(Verdict::Track));
        assert_eq!(runs.len(), 1);
    }

    #[test]
    fn test_lost_pose_falls_back_to_full_frame() {
        let full_frame = Roi::full_frame(100, 100);
        let (verdict, runs) = select(Some(0.39), 0.7);
        assert_eq!(verdict, Some(Verdict::Keep));
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[1], full_frame);

        let (verdict, runs) = select(Some(0.39), 0.5);
        assert_eq!(verdict, None);
        assert_eq!(runs.len(), 2);
    }
}
