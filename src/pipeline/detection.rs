use super::model::{Session, initialize_model, read_f32, run_model};
use super::roi::{OutputRange, Roi};
use crate::config::FaceLandmarkerOptions;
use crate::error::LandmarkerError;
use crate::landmark::sigmoid;
use crate::shapes::point::PointF32;
use crate::shapes::rect::RectF32;
use anchors::{NUM_ANCHORS, gen_anchors};
use anyhow::Result;
use image::RgbImage;
use tracing::{Level, span, trace};

mod anchors;

const SIDE: u32 = 128;
const VALUES_PER_ANCHOR: usize = 16;
const MAX_OVERLAP_PCT: f32 = 30.;

/// A face found by the detector, in frame pixels.
#[derive(Debug, Clone)]
pub struct Face {
    pub bounds: RectF32,
    // subject's right eye, on the left of the image
    pub l_eye: PointF32,
    pub r_eye: PointF32,
    pub confidence: f32,
}

impl Face {
    pub fn rot_theta(&self) -> f32 {
        let dx = self.r_eye.x - self.l_eye.x;
        let dy = self.r_eye.y - self.l_eye.y;
        dy.atan2(dx)
    }
}

/*
BlazeFace (short range) wrapper.

Model Input: 1x128x128x3 f32 image in -1..1
Model Output:
- classificators: 896 raw scores, one per anchor
- regressors: 896 x 16 values per anchor. The first 4 are center offset,
  width and height in input pixels relative to the anchor. The remaining
  12 are 6 keypoints (eyes, nose, mouth, ears).
*/
pub struct FaceDetector {
    model: Session,
    anchors: Vec<PointF32>,
    min_confidence: f32,
    max_faces: usize,
}

impl FaceDetector {
    pub fn new(options: &FaceLandmarkerOptions) -> Result<FaceDetector> {
        Ok(FaceDetector {
            model: initialize_model(&options.detector_model_path, &options.base_options)?,
            anchors: gen_anchors(),
            min_confidence: options.min_face_detection_confidence,
            max_faces: options.num_faces,
        })
    }

    pub fn run(&self, img: &RgbImage) -> Result<Vec<Face>> {
        let span = span!(Level::DEBUG, "face_detector");
        let _guard = span.enter();

        let roi = Roi::full_frame(img.width(), img.height());
        let input = roi.to_tensor(img, SIDE, OutputRange::NegOneToOne);
        let (regressors, scores) = run_model(&self.model, "input", input, |outputs| {
            Ok((
                read_f32(outputs, "regressors")?,
                read_f32(outputs, "classificators")?,
            ))
        })?;

        let faces = decode(
            &regressors,
            &scores,
            &self.anchors,
            self.min_confidence,
            self.max_faces,
        )?
        .into_iter()
        .map(|f| to_frame(&f, &roi))
        .collect::<Vec<_>>();

        trace!("Detected {} faces", faces.len());

        Ok(faces)
    }
}

/// Decodes raw outputs into faces in normalized input space, best first.
fn decode(
    regressors: &[f32],
    scores: &[f32],
    anchors: &[PointF32],
    min_confidence: f32,
    max_faces: usize,
) -> Result<Vec<Face>> {
    if scores.len() != NUM_ANCHORS || regressors.len() != NUM_ANCHORS * VALUES_PER_ANCHOR {
        return Err(LandmarkerError::UnexpectedOutput(format!(
            "Expected {NUM_ANCHORS} anchors, got {} scores and {} regressors",
            scores.len(),
            regressors.len()
        ))
        .into());
    }

    let side = SIDE as f32;
    let mut candidates: Vec<Face> = Vec::new();
    for (idx, res) in regressors.chunks_exact(VALUES_PER_ANCHOR).enumerate() {
        let score = sigmoid(scores[idx].clamp(-100., 100.));
        if score < min_confidence {
            continue;
        }

        let anchor = anchors[idx];
        candidates.push(Face {
            bounds: RectF32::from_center(
                res[0] / side + anchor.x,
                res[1] / side + anchor.y,
                res[2] / side,
                res[3] / side,
            ),
            l_eye: PointF32::new(res[4] / side + anchor.x, res[5] / side + anchor.y),
            r_eye: PointF32::new(res[6] / side + anchor.x, res[7] / side + anchor.y),
            confidence: score,
        });
    }

    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut faces: Vec<Face> = Vec::new();
    for candidate in candidates {
        if faces.len() >= max_faces {
            break;
        }
        if faces
            .iter()
            .all(|f| f.bounds.overlap_pct(&candidate.bounds) <= MAX_OVERLAP_PCT)
        {
            faces.push(candidate);
        }
    }

    Ok(faces)
}

fn to_frame(face: &Face, roi: &Roi) -> Face {
    let center = roi.to_frame(face.bounds.x, face.bounds.y);

    Face {
        bounds: RectF32::from_center(
            center.x,
            center.y,
            face.bounds.w * roi.size,
            face.bounds.h * roi.size,
        ),
        l_eye: roi.to_frame(face.l_eye.x, face.l_eye.y),
        r_eye: roi.to_frame(face.r_eye.x, face.r_eye.y),
        confidence: face.confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_outputs() -> (Vec<f32>, Vec<f32>) {
        (
            vec![0.; NUM_ANCHORS * VALUES_PER_ANCHOR],
            vec![-10.; NUM_ANCHORS],
        )
    }

    fn set_face(regressors: &mut [f32], scores: &mut [f32], idx: usize, score: f32, w: f32) {
        scores[idx] = score;
        let r = &mut regressors[idx * VALUES_PER_ANCHOR..(idx + 1) * VALUES_PER_ANCHOR];
        r[2] = w;
        r[3] = w;
        r[4] = -10.;
        r[6] = 10.;
    }

    #[test]
    fn test_decode_filters_low_scores() {
        let (regressors, scores) = raw_outputs();
        let faces = decode(&regressors, &scores, &gen_anchors(), 0.5, 1).unwrap();
        assert!(faces.is_empty());
    }

    #[test]
    fn test_decode_keeps_best_of_overlapping() {
        let (mut regressors, mut scores) = raw_outputs();
        // anchors 0 and 1 share a center
        set_face(&mut regressors, &mut scores, 0, 2., 32.);
        set_face(&mut regressors, &mut scores, 1, 4., 32.);
        // far away on the 8x8 grid
        set_face(&mut regressors, &mut scores, 895, 1., 16.);

        let faces = decode(&regressors, &scores, &gen_anchors(), 0.5, 5).unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].confidence, sigmoid(4.));
        assert!((faces[0].bounds.w - 0.25).abs() < 1e-6);
        assert_eq!(faces[1].confidence, sigmoid(1.));

        let faces = decode(&regressors, &scores, &gen_anchors(), 0.5, 1).unwrap();
        assert_eq!(faces.len(), 1);
    }

    #[test]
    fn test_decode_rejects_bad_shapes() {
        assert!(decode(&[0.; 16], &[0.], &gen_anchors(), 0.5, 1).is_err());
    }

    #[test]
    fn test_to_frame_and_rotation() {
        let (mut regressors, mut scores) = raw_outputs();
        set_face(&mut regressors, &mut scores, 0, 4., 32.);
        let face = &decode(&regressors, &scores, &gen_anchors(), 0.5, 1).unwrap()[0];

        let framed = to_frame(face, &Roi::full_frame(256, 256));
        assert!((framed.bounds.w - 64.).abs() < 1e-4);
        assert!((framed.bounds.x - 8.).abs() < 1e-4);
        assert!(framed.rot_theta().abs() < 1e-6);
    }
}
