use image::{Rgba, RgbaImage};
use imageproc::drawing;
use imageproc::point::Point;

use crate::landmark::{FaceLandmarkerResult, Landmark, PoseLandmarkerResult};
use crate::shapes::point::PointF32;

pub const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);
pub const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Pairs of pose landmark indices joined by a line.
#[rustfmt::skip]
pub const POSE_CONNECTIONS: [(usize, usize); 33] = [
    // face
    (0, 1), (1, 2), (2, 3), (3, 7), (0, 4), (4, 5), (5, 6), (6, 8),
    // torso and arms
    (9, 10), (11, 12), (11, 13), (13, 15), (15, 17), (15, 19), (15, 21),
    (12, 14), (14, 16), (16, 18), (16, 20), (16, 22), (11, 23), (12, 24), (23, 24),
    // legs
    (23, 25), (25, 27), (27, 29), (29, 31), (27, 31),
    (24, 26), (26, 28), (28, 30), (28, 32), (30, 32),
];

#[derive(Debug, Clone, Copy)]
pub struct LineStyle {
    pub color: Rgba<u8>,
    pub line_width: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct DotStyle {
    pub color: Rgba<u8>,
    pub radius: f32,
}

/// 2D drawing surface in pixels.
pub trait Canvas {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn clear(&mut self);
    fn fill_circle(&mut self, center: PointF32, radius: f32, color: Rgba<u8>);
    fn stroke_line(&mut self, from: PointF32, to: PointF32, line_width: f32, color: Rgba<u8>);

    /// Pixel position of a normalized landmark at the current canvas size.
    fn to_pixels(&self, landmark: &Landmark) -> PointF32 {
        PointF32::new(
            landmark.x * self.width() as f32,
            landmark.y * self.height() as f32,
        )
    }
}

/// Transparent RGBA layer drawn over the video frame.
pub struct Overlay {
    image: RgbaImage,
}

impl Overlay {
    pub fn new(width: u32, height: u32) -> Overlay {
        Overlay {
            image: RgbaImage::new(width, height),
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

impl Canvas for Overlay {
    fn width(&self) -> u32 {
        self.image.width()
    }

    fn height(&self) -> u32 {
        self.image.height()
    }

    fn clear(&mut self) {
        for p in self.image.pixels_mut() {
            *p = TRANSPARENT;
        }
    }

    fn fill_circle(&mut self, center: PointF32, radius: f32, color: Rgba<u8>) {
        drawing::draw_filled_circle_mut(
            &mut self.image,
            (center.x.round() as i32, center.y.round() as i32),
            radius.round() as i32,
            color,
        );
    }

    fn stroke_line(&mut self, from: PointF32, to: PointF32, line_width: f32, color: Rgba<u8>) {
        if line_width <= 1. {
            drawing::draw_line_segment_mut(&mut self.image, (from.x, from.y), (to.x, to.y), color);
            return;
        }

        let length = from.distance(&to);
        let half = line_width / 2.;
        if length < 1. {
            self.fill_circle(from, half, color);
            return;
        }

        // quad around the segment, offset along its normal
        let nx = -(to.y - from.y) / length * half;
        let ny = (to.x - from.x) / length * half;
        let corner = |p: PointF32, sign: f32| {
            Point::new(
                (p.x + sign * nx).round() as i32,
                (p.y + sign * ny).round() as i32,
            )
        };
        let quad = [
            corner(from, 1.),
            corner(to, 1.),
            corner(to, -1.),
            corner(from, -1.),
        ];
        // thin diagonals can round both ends of a side onto one pixel
        if quad[0] == quad[3] || quad[1] == quad[2] {
            drawing::draw_line_segment_mut(&mut self.image, (from.x, from.y), (to.x, to.y), color);
            return;
        }
        drawing::draw_polygon_mut(&mut self.image, &quad, color);
    }
}

/// Draws a line for every connection whose two landmarks exist.
pub fn draw_connectors(
    canvas: &mut impl Canvas,
    landmarks: &[Landmark],
    connections: &[(usize, usize)],
    style: LineStyle,
) {
    for &(start, end) in connections {
        if let (Some(start), Some(end)) = (landmarks.get(start), landmarks.get(end)) {
            let from = canvas.to_pixels(start);
            let to = canvas.to_pixels(end);
            canvas.stroke_line(from, to, style.line_width, style.color);
        }
    }
}

pub fn draw_landmarks(canvas: &mut impl Canvas, landmarks: &[Landmark], style: DotStyle) {
    for landmark in landmarks {
        let center = canvas.to_pixels(landmark);
        canvas.fill_circle(center, style.radius, style.color);
    }
}

/// First face only: a line through consecutive landmarks, then the points.
pub fn draw_face_landmarks(canvas: &mut impl Canvas, result: &FaceLandmarkerResult) {
    let Some(landmarks) = result.face_landmarks.first() else {
        return;
    };

    for pair in landmarks.windows(2) {
        let from = canvas.to_pixels(&pair[0]);
        let to = canvas.to_pixels(&pair[1]);
        canvas.stroke_line(from, to, 1., GREEN);
    }

    draw_landmarks(
        canvas,
        landmarks,
        DotStyle {
            color: RED,
            radius: 2.,
        },
    );
}

/// First pose only: skeleton lines, then the points.
pub fn draw_pose_landmarks(canvas: &mut impl Canvas, result: &PoseLandmarkerResult) {
    let Some(landmarks) = result.landmarks.first() else {
        return;
    };

    draw_connectors(
        canvas,
        landmarks,
        &POSE_CONNECTIONS,
        LineStyle {
            color: GREEN,
            line_width: 2.,
        },
    );
    draw_landmarks(
        canvas,
        landmarks,
        DotStyle {
            color: RED,
            radius: 4.,
        },
    );
}
