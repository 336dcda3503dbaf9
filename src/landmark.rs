use crate::shapes::point::PointF32;
use crate::shapes::rect::RectF32;

/// A key-point in normalized frame coordinates: x and y in [0, 1] relative
/// to frame width and height, z relative to the same scale as x.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub visibility: f32,
    pub presence: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Landmark {
        Landmark {
            x,
            y,
            z,
            visibility: 1.,
            presence: 1.,
        }
    }

    pub fn point(&self) -> PointF32 {
        PointF32::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FaceLandmarkerResult {
    /// One list of 468 landmarks per detected face.
    pub face_landmarks: Vec<Vec<Landmark>>,
}

#[derive(Debug, Clone, Default)]
pub struct PoseLandmarkerResult {
    /// One list of 33 landmarks per detected pose.
    pub landmarks: Vec<Vec<Landmark>>,
}

#[derive(Debug, Clone)]
pub enum LandmarkerResult {
    Face(FaceLandmarkerResult),
    Pose(PoseLandmarkerResult),
}

impl LandmarkerResult {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Face(r) => r.face_landmarks.is_empty(),
            Self::Pose(r) => r.landmarks.is_empty(),
        }
    }
}

impl From<FaceLandmarkerResult> for LandmarkerResult {
    fn from(r: FaceLandmarkerResult) -> Self {
        Self::Face(r)
    }
}

impl From<PoseLandmarkerResult> for LandmarkerResult {
    fn from(r: PoseLandmarkerResult) -> Self {
        Self::Pose(r)
    }
}

/// Normalized bounding box of a landmark set.
pub fn bounds(landmarks: &[Landmark]) -> Option<RectF32> {
    RectF32::enclosing(landmarks.iter().map(Landmark::point))
}

pub fn sigmoid(x: f32) -> f32 {
    if x >= 0. {
        1. / (1. + (-x).exp())
    } else {
        x.exp() / (1. + x.exp())
    }
}
