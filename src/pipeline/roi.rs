use image::RgbImage;
use ndarray::Array4;

use crate::shapes::point::PointF32;
use crate::shapes::rect::RectF32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputRange {
    ZeroToOne,
    NegOneToOne,
}

impl OutputRange {
    fn map(&self, channel: u8) -> f32 {
        match self {
            Self::ZeroToOne => channel as f32 / 255.,
            Self::NegOneToOne => channel as f32 / 127.5 - 1.,
        }
    }
}

/// Rotated square crop of a frame, in frame pixels.
///
/// A point at `local` offset from the center of the upright crop sits at
/// `center + rotate(local, rotation)` in the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Roi {
    pub center: PointF32,
    pub size: f32,
    pub rotation: f32,
}

impl Roi {
    /// The whole frame, letterboxed into a square.
    pub fn full_frame(width: u32, height: u32) -> Roi {
        Roi {
            center: PointF32::new(width as f32 / 2., height as f32 / 2.),
            size: width.max(height) as f32,
            rotation: 0.,
        }
    }

    /// Square around `bounds` (pixels) grown by `scale`.
    pub fn around(bounds: RectF32, scale: f32, rotation: f32) -> Roi {
        Roi {
            center: bounds.center(),
            size: bounds.w.max(bounds.h) * scale,
            rotation,
        }
    }

    /// Frame position of a point given in crop-relative units (0..1).
    pub fn to_frame(&self, u: f32, v: f32) -> PointF32 {
        let local = PointF32::new((u - 0.5) * self.size, (v - 0.5) * self.size);
        PointF32::new(local.x + self.center.x, local.y + self.center.y)
            .rotate(self.center, self.rotation)
    }

    /// Maps a point from a `side`x`side` network input back to normalized
    /// frame coordinates.
    pub fn project(&self, x: f32, y: f32, side: f32, frame_w: u32, frame_h: u32) -> PointF32 {
        let p = self.to_frame(x / side, y / side);
        PointF32::new(p.x / frame_w as f32, p.y / frame_h as f32)
    }

    /// Scales a network-space depth value to the normalized x scale.
    pub fn project_depth(&self, z: f32, side: f32, frame_w: u32) -> f32 {
        z / side * self.size / frame_w as f32
    }

    /// Nearest-neighbour samples the crop into a 1 x side x side x 3 tensor.
    /// Pixels falling outside the frame read as black.
    pub fn to_tensor(&self, img: &RgbImage, side: u32, range: OutputRange) -> Array4<f32> {
        let side_f = side as f32;
        let (width, height) = (img.width() as f32, img.height() as f32);

        Array4::from_shape_fn((1, side as usize, side as usize, 3), |(_, y, x, c)| {
            let p = self.to_frame((x as f32 + 0.5) / side_f, (y as f32 + 0.5) / side_f);
            if p.x < 0. || p.y < 0. || p.x >= width || p.y >= height {
                range.map(0)
            } else {
                range.map(img.get_pixel(p.x as u32, p.y as u32)[c])
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_full_frame_letterbox() {
        let roi = Roi::full_frame(200, 100);
        assert_eq!(roi.size, 200.);

        // top-left of the square lies 50px above the frame
        let tl = roi.to_frame(0., 0.);
        assert!((tl.x - 0.).abs() < 1e-4 && (tl.y + 50.).abs() < 1e-4);

        let center = roi.project(64., 64., 128., 200, 100);
        assert!((center.x - 0.5).abs() < 1e-6 && (center.y - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_project_rotated() {
        let roi = Roi {
            center: PointF32::new(50., 50.),
            size: 20.,
            rotation: std::f32::consts::FRAC_PI_2,
        };
        // right edge of the upright crop ends up below the center
        let p = roi.project(192., 96., 192., 100, 100);
        assert!((p.x - 0.5).abs() < 1e-4, "{p:?}");
        assert!((p.y - 0.6).abs() < 1e-4, "{p:?}");
    }

    #[test]
    fn test_to_tensor_pads_outside_frame() {
        let mut img = RgbImage::new(4, 2);
        for p in img.pixels_mut() {
            *p = Rgb([255, 255, 255]);
        }
        let tensor = Roi::full_frame(4, 2).to_tensor(&img, 4, OutputRange::NegOneToOne);
        assert_eq!(tensor.shape(), &[1, 4, 4, 3]);

        // rows 0 and 3 are letterbox padding, rows 1 and 2 the frame
        assert_eq!(tensor[[0, 0, 0, 0]], -1.);
        assert_eq!(tensor[[0, 1, 2, 1]], 1.);
        assert_eq!(tensor[[0, 2, 3, 2]], 1.);
        assert_eq!(tensor[[0, 3, 1, 0]], -1.);
    }

    #[test]
    fn test_depth_scale() {
        let roi = Roi::full_frame(100, 100);
        assert!((roi.project_depth(128., 256., 100) - 0.5).abs() < 1e-6);
    }
}
