use super::{RunningModeGuard, Verdict};
use super::detection::FaceDetector;
use super::model::{Session, initialize_model, read_f32, run_model};
use super::roi::{OutputRange, Roi};
use crate::config::FaceLandmarkerOptions;
use crate::error::LandmarkerError;
use crate::landmark::{FaceLandmarkerResult, Landmark, sigmoid};
use crate::shapes::point::PointF32;
use crate::shapes::rect::RectF32;
use anyhow::Result;
use image::RgbImage;
use tracing::{Level, debug, span, trace};

const SIDE: u32 = 192;
const NUM_LANDMARKS: usize = 468;
// face box (detected or from the last frame's mesh) to crop
const ROI_SCALE: f32 = 1.5;
// outer eye corners, image left then image right
const L_EYE_CORNER: usize = 33;
const R_EYE_CORNER: usize = 263;

/// Face mesh landmarker: BlazeFace finds faces, the face mesh network
/// places 468 landmarks inside each face crop.
pub struct FaceLandmarker {
    detector: FaceDetector,
    model: Session,
    options: FaceLandmarkerOptions,
    guard: RunningModeGuard,
    tracked: Vec<Roi>,
}

struct Mesh {
    landmarks: Vec<Landmark>,
    presence: f32,
}

/// Landmarks per reported face, and the crops to track into the next frame.
type Faces = (Vec<Vec<Landmark>>, Vec<Roi>);

impl FaceLandmarker {
    pub fn create_from_options(options: FaceLandmarkerOptions) -> Result<FaceLandmarker> {
        Ok(FaceLandmarker {
            detector: FaceDetector::new(&options)?,
            model: initialize_model(&options.base_options.model_asset_path, &options.base_options)?,
            guard: RunningModeGuard::new(options.running_mode),
            options,
            tracked: Vec::new(),
        })
    }

    /// Single image, always runs the detector.
    pub fn detect(&mut self, img: &RgbImage) -> Result<FaceLandmarkerResult> {
        self.guard.check_image()?;
        let rois = self.detect_rois(img)?;
        let (faces, _) = self.landmark(img, &rois)?;

        Ok(FaceLandmarkerResult {
            face_landmarks: faces,
        })
    }

    /// Video frame. Faces still confidently tracked from the previous frame
    /// are re-cropped from their landmarks and the detector is skipped.
    pub fn detect_for_video(
        &mut self,
        img: &RgbImage,
        timestamp_ms: f64,
    ) -> Result<FaceLandmarkerResult> {
        let span = span!(Level::DEBUG, "face_landmarker", timestamp_ms);
        let _guard = span.enter();
        self.guard.check_video(timestamp_ms)?;

        let tracked = std::mem::take(&mut self.tracked);
        let (faces, next) = track_or_detect(
            &tracked,
            |rois| self.landmark(img, rois),
            || self.detect_rois(img),
        )?;
        self.tracked = next;

        Ok(FaceLandmarkerResult {
            face_landmarks: faces,
        })
    }

    fn detect_rois(&self, img: &RgbImage) -> Result<Vec<Roi>> {
        Ok(self
            .detector
            .run(img)?
            .into_iter()
            .map(|face| Roi::around(face.bounds, ROI_SCALE, face.rot_theta()))
            .collect())
    }

    fn landmark(&self, img: &RgbImage, rois: &[Roi]) -> Result<Faces> {
        collect_faces(rois, &self.options, img.dimensions(), |roi| {
            self.run_mesh(img, roi)
        })
    }

    fn run_mesh(&self, img: &RgbImage, roi: &Roi) -> Result<Mesh> {
        let input = roi.to_tensor(img, SIDE, OutputRange::ZeroToOne);
        let (mesh, flag) = run_model(&self.model, "input_1", input, |outputs| {
            Ok((read_f32(outputs, "conv2d_21")?, read_f32(outputs, "conv2d_31")?))
        })?;
        let flag = flag.first().copied().ok_or_else(|| {
            LandmarkerError::UnexpectedOutput("face flag output is empty".into())
        })?;

        Ok(Mesh {
            landmarks: extract_landmarks(&mesh, roi, img.width(), img.height())?,
            presence: sigmoid(flag),
        })
    }
}

/// Landmarks the tracked crops. The detector only runs when there is
/// nothing to track or no tracked face survives.
fn track_or_detect(
    tracked: &[Roi],
    mut landmark: impl FnMut(&[Roi]) -> Result<Faces>,
    detect: impl FnOnce() -> Result<Vec<Roi>>,
) -> Result<Faces> {
    if !tracked.is_empty() {
        trace!("Tracking {} faces", tracked.len());
        let (faces, next) = landmark(tracked)?;
        if !faces.is_empty() {
            return Ok((faces, next));
        }
    }

    let rois = detect()?;
    landmark(&rois)
}

/// Runs the mesh on up to `num_faces` crops, keeping faces that pass the
/// presence threshold and tracking those that pass the tracking one.
fn collect_faces(
    rois: &[Roi],
    options: &FaceLandmarkerOptions,
    (width, height): (u32, u32),
    mut run_mesh: impl FnMut(&Roi) -> Result<Mesh>,
) -> Result<Faces> {
    let mut faces = Vec::new();
    let mut next = Vec::new();

    for roi in rois.iter().take(options.num_faces) {
        let mesh = run_mesh(roi)?;
        debug!("Face presence {:.3}", mesh.presence);
        match Verdict::judge(
            mesh.presence,
            options.min_face_presence_confidence,
            options.min_tracking_confidence,
        ) {
            Verdict::Drop => continue,
            Verdict::Keep => {}
            Verdict::Track => next.extend(roi_from_landmarks(&mesh.landmarks, width, height)),
        }
        faces.push(mesh.landmarks);
    }

    Ok((faces, next))
}

fn extract_landmarks(mesh: &[f32], roi: &Roi, width: u32, height: u32) -> Result<Vec<Landmark>> {
    if mesh.len() != NUM_LANDMARKS * 3 {
        return Err(LandmarkerError::UnexpectedOutput(format!(
            "Expected {} face mesh values, got {}",
            NUM_LANDMARKS * 3,
            mesh.len()
        ))
        .into());
    }

    let side = SIDE as f32;
    Ok(mesh
        .chunks_exact(3)
        .map(|xyz| {
            let p = roi.project(xyz[0], xyz[1], side, width, height);
            Landmark::new(p.x, p.y, roi.project_depth(xyz[2], side, width))
        })
        .collect())
}

/// Crop for the next frame, aligned with the eye line.
fn roi_from_landmarks(landmarks: &[Landmark], width: u32, height: u32) -> Option<Roi> {
    let to_px = |lm: &Landmark| PointF32::new(lm.x * width as f32, lm.y * height as f32);

    let bounds = RectF32::enclosing(landmarks.iter().map(to_px))?;
    let l_eye = to_px(landmarks.get(L_EYE_CORNER)?);
    let r_eye = to_px(landmarks.get(R_EYE_CORNER)?);
    let theta = (r_eye.y - l_eye.y).atan2(r_eye.x - l_eye.x);

    Some(Roi::around(bounds, ROI_SCALE, theta))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_landmarks_projects_into_frame() {
        let mut mesh = vec![96.; NUM_LANDMARKS * 3];
        // first landmark at the crop's top-left corner
        mesh[0] = 0.;
        mesh[1] = 0.;
        mesh[2] = 0.;

        let roi = Roi::full_frame(400, 200);
        let landmarks = extract_landmarks(&mesh, &roi, 400, 200).unwrap();
        assert_eq!(landmarks.len(), NUM_LANDMARKS);

        // letterboxed: the square crop starts 100px above the frame
        assert!((landmarks[0].x - 0.).abs() < 1e-6);
        assert!((landmarks[0].y + 0.5).abs() < 1e-6);
        assert!((landmarks[1].x - 0.5).abs() < 1e-6);
        assert!((landmarks[1].y - 0.5).abs() < 1e-6);
        assert!((landmarks[1].z - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_extract_landmarks_rejects_short_output() {
        let roi = Roi::full_frame(10, 10);
        assert!(extract_landmarks(&[0.; 12], &roi, 10, 10).is_err());
    }

    #[test]
    fn test_roi_from_tilted_landmarks() {
        let mut landmarks = vec![Landmark::new(0.5, 0.5, 0.); NUM_LANDMARKS];
        landmarks[0] = Landmark::new(0.3, 0.3, 0.);
        landmarks[1] = Landmark::new(0.7, 0.7, 0.);
        landmarks[L_EYE_CORNER] = Landmark::new(0.4, 0.4, 0.);
        landmarks[R_EYE_CORNER] = Landmark::new(0.6, 0.6, 0.);

        let roi = roi_from_landmarks(&landmarks, 100, 100).unwrap();
        assert!((roi.center.x - 50.).abs() < 1e-4);
        assert!((roi.size - 60.).abs() < 1e-4);
        assert!((roi.rotation - std::f32::consts::FRAC_PI_4).abs() < 1e-4);
    }

    #[test]
    fn test_roi_from_too_few_landmarks() {
        assert!(roi_from_landmarks(&[Landmark::new(0.1, 0.1, 0.)], 10, 10).is_none());
    }

    fn mesh_at(x: f32, presence: f32) -> Mesh {
        let mut landmarks = vec![Landmark::new(x, 0.5, 0.); NUM_LANDMARKS];
        landmarks[L_EYE_CORNER] = Landmark::new(x - 0.05, 0.45, 0.);
        landmarks[R_EYE_CORNER] = Landmark::new(x + 0.05, 0.45, 0.);
        Mesh {
            landmarks,
            presence,
        }
    }

    fn roi_at(x: f32) -> Roi {
        Roi {
            center: PointF32::new(x, 50.),
            size: 20.,
            rotation: 0.,
        }
    }

    fn tracking_options() -> FaceLandmarkerOptions {
        FaceLandmarkerOptions {
            num_faces: 3,
            min_face_presence_confidence: 0.5,
            min_tracking_confidence: 0.7,
            ..Default::default()
        }
    }

    #[test]
    fn test_collect_faces_thresholds() {
        let presences = [0.49, 0.5, 0.7];
        let rois: Vec<Roi> = (0..3).map(|i| roi_at(i as f32 * 30.)).collect();

        let mut i = 0;
        let (faces, next) = collect_faces(&rois, &tracking_options(), (100, 100), |_| {
            let mesh = mesh_at(0.2 + i as f32 * 0.3, presences[i]);
            i += 1;
            Ok(mesh)
        })
        .unwrap();

        // presence at the threshold is kept, only the last one is tracked
        assert_eq!(faces.len(), 2);
        assert!((faces[0][0].x - 0.5).abs() < 1e-6);
        assert_eq!(next.len(), 1);
        assert!((next[0].center.x - 80.).abs() < 1e-3);
    }

    #[test]
    fn test_collect_faces_caps_face_count() {
        let rois: Vec<Roi> = (0..3).map(|i| roi_at(i as f32 * 30.)).collect();
        let options = FaceLandmarkerOptions {
            num_faces: 1,
            ..tracking_options()
        };

        let mut runs = 0;
        let (faces, _) = collect_faces(&rois, &options, (100, 100), |_| {
            runs += 1;
            Ok(mesh_at(0.5, 0.9))
        })
        .unwrap();
        assert_eq!(runs, 1);
        assert_eq!(faces.len(), 1);
    }

    #[test]
    fn test_tracked_face_skips_detector() {
        let mut detections = 0;
        let mut landmarked = Vec::new();
        let (faces, next) = track_or_detect(
            &[roi_at(10.)],
            |rois| {
                landmarked.push(rois.len());
                Ok((vec![mesh_at(0.1, 0.9).landmarks], vec![roi_at(12.)]))
            },
            || {
                detections += 1;
                Ok(vec![roi_at(40.)])
            },
        )
        .unwrap();

        assert_eq!(detections, 0);
        assert_eq!(landmarked, [1]);
        assert_eq!(faces.len(), 1);
        assert_eq!(next, [roi_at(12.)]);
    }

    #[test]
    fn test_lost_track_falls_back_to_detector() {
        let mut detections = 0;
        let mut landmarked = Vec::new();
        let (faces, _) = track_or_detect(
            &[roi_at(10.)],
            |rois| {
                landmarked.push(rois[0].center.x);
                if rois[0] == roi_at(10.) {
                    // tracked crop lost the face
                    Ok((Vec::new(), Vec::new()))
                } else {
                    Ok((vec![mesh_at(0.4, 0.9).landmarks], Vec::new()))
                }
            },
            || {
                detections += 1;
                Ok(vec![roi_at(40.)])
            },
        )
        .unwrap();

        assert_eq!(detections, 1);
        assert_eq!(landmarked, [10., 40.]);
        assert_eq!(faces.len(), 1);
    }

    #[test]
    fn test_nothing_tracked_runs_detector() {
        let mut detections = 0;
        let (faces, next) = track_or_detect(
            &[],
            |rois| Ok((Vec::new(), rois.to_vec())),
            || {
                detections += 1;
                Ok(Vec::new())
            },
        )
        .unwrap();

        assert_eq!(detections, 1);
        assert!(faces.is_empty() && next.is_empty());
    }
}
