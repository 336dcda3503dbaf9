#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointF32 {
    pub x: f32,
    pub y: f32,
}

impl PointF32 {
    pub fn new(x: f32, y: f32) -> PointF32 {
        PointF32 { x, y }
    }

    /// Rotates counter-clockwise in image space (y down) around `origin`.
    pub fn rotate(&self, origin: PointF32, theta: f32) -> PointF32 {
        let x = self.x - origin.x;
        let y = self.y - origin.y;
        let (sin, cos) = theta.sin_cos();

        PointF32 {
            x: x * cos - y * sin + origin.x,
            y: x * sin + y * cos + origin.y,
        }
    }

    pub fn distance(&self, other: &PointF32) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}
