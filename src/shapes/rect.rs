use super::point::PointF32;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RectF32 {
    // centerpoint
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl RectF32 {
    pub fn from_center(xc: f32, yc: f32, w: f32, h: f32) -> RectF32 {
        RectF32 { x: xc, y: yc, w, h }
    }

    pub fn from_bounds(left: f32, top: f32, right: f32, bottom: f32) -> RectF32 {
        RectF32 {
            x: (left + right) / 2.,
            y: (top + bottom) / 2.,
            w: right - left,
            h: bottom - top,
        }
    }

    /// Smallest rect holding every point, `None` when empty.
    pub fn enclosing(points: impl IntoIterator<Item = PointF32>) -> Option<RectF32> {
        let mut points = points.into_iter();
        let first = points.next()?;
        let (mut left, mut top, mut right, mut bottom) = (first.x, first.y, first.x, first.y);
        for p in points {
            left = left.min(p.x);
            right = right.max(p.x);
            top = top.min(p.y);
            bottom = bottom.max(p.y);
        }

        Some(RectF32::from_bounds(left, top, right, bottom))
    }

    pub fn center(&self) -> PointF32 {
        PointF32 {
            x: self.x,
            y: self.y,
        }
    }

    pub fn left(&self) -> f32 {
        self.x - self.w / 2.
    }

    pub fn right(&self) -> f32 {
        self.x + self.w / 2.
    }

    pub fn top(&self) -> f32 {
        self.y - self.h / 2.
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.h / 2.
    }

    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    pub fn overlap_pct(&self, other: &RectF32) -> f32 {
        let x_min = self.left().max(other.left());
        let x_max = self.right().min(other.right());
        let y_min = self.top().max(other.top());
        let y_max = self.bottom().min(other.bottom());

        let overlap_area = if x_min < x_max && y_min < y_max {
            (x_max - x_min) * (y_max - y_min)
        } else {
            0.
        };

        let area_delta = self.area() + other.area() - overlap_area;

        if area_delta > 0. {
            overlap_area / area_delta * 100.
        } else {
            0.
        }
    }
}
