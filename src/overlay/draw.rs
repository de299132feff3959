//! Thick line and ring primitives over any `imageproc` canvas.

use imageproc::drawing::{draw_hollow_circle_mut, draw_line_segment_mut, Canvas};
use nalgebra::Vector2;

/// Draws a segment `thickness` pixels wide by stacking parallel one-pixel
/// segments across the line normal.
pub fn draw_thick_line<C: Canvas>(
    canvas: &mut C,
    start: &Vector2<f64>,
    end: &Vector2<f64>,
    color: C::Pixel,
    thickness: u32,
) {
    if !start.iter().chain(end.iter()).all(|v| v.is_finite()) {
        return;
    }
    let thickness = thickness.max(1);
    let direction = end - start;
    let length = direction.norm();
    let normal = if length > f64::EPSILON {
        Vector2::new(-direction.y, direction.x) / length
    } else {
        Vector2::zeros()
    };

    let half = (thickness as f64 - 1.0) / 2.0;
    for k in 0..thickness {
        let offset = normal * (k as f64 - half);
        let a = start + offset;
        let b = end + offset;
        draw_line_segment_mut(
            canvas,
            (a.x as f32, a.y as f32),
            (b.x as f32, b.y as f32),
            color,
        );
    }
}

/// Draws a circle outline of the given radius, `thickness` rings wide.
pub fn draw_ring<C: Canvas>(
    canvas: &mut C,
    center: (i32, i32),
    radius: i32,
    color: C::Pixel,
    thickness: u32,
) {
    for k in 0..thickness.max(1) as i32 {
        draw_hollow_circle_mut(canvas, center, radius + k, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, RgbImage};

    #[test]
    fn test_thick_line_covers_both_sides() {
        let mut img = RgbImage::new(20, 20);
        let red = Rgb([255, 0, 0]);
        draw_thick_line(&mut img, &Vector2::new(2.0, 10.0), &Vector2::new(17.0, 10.0), red, 3);
        assert_eq!(*img.get_pixel(10, 9), red);
        assert_eq!(*img.get_pixel(10, 10), red);
        assert_eq!(*img.get_pixel(10, 11), red);
        assert_eq!(*img.get_pixel(10, 14), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_non_finite_endpoints_are_skipped() {
        let mut img = RgbImage::new(8, 8);
        draw_thick_line(
            &mut img,
            &Vector2::new(f64::NAN, 1.0),
            &Vector2::new(5.0, 5.0),
            Rgb([255, 255, 255]),
            1,
        );
        assert!(img.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn test_ring_leaves_center_untouched() {
        let mut img = image::GrayImage::from_pixel(30, 30, Luma([200]));
        draw_ring(&mut img, (15, 15), 5, Luma([0]), 2);
        assert_eq!(img.get_pixel(15, 15)[0], 200);
        assert_eq!(img.get_pixel(20, 15)[0], 0);
        assert_eq!(img.get_pixel(21, 15)[0], 0);
    }
}
