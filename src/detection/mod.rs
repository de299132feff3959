//! Planar chessboard detection.
//!
//! [`detect`] runs the full chain on one frame: ChESS corner candidates from
//! `chess-corners`, grid assembly and sub-pixel refinement. It always returns an
//! annotated copy of the frame; image points are only reported when the whole
//! `rows x cols` grid was found.

pub mod grid;
pub mod subpix;

pub use grid::assemble_grid;
pub use subpix::{refine_corners, SubPixParams};

use chess_corners::{find_chess_corners_image, ChessConfig};
use image::{GrayImage, Rgb, RgbImage};
use log::debug;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::geometry::PatternSize;
use crate::overlay::draw::{draw_ring, draw_thick_line};

/// Candidate extraction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    /// Peaks below this fraction of the strongest response are dropped.
    pub threshold_rel: f32,
    pub nms_radius: u32,
}

impl DetectorParams {
    fn chess_config(&self) -> ChessConfig {
        let mut cfg = ChessConfig::single_scale();
        cfg.params.threshold_rel = self.threshold_rel;
        cfg.params.nms_radius = self.nms_radius;
        cfg
    }
}

impl Default for DetectorParams {
    fn default() -> Self {
        DetectorParams {
            threshold_rel: 0.2,
            nms_radius: 2,
        }
    }
}

/// Outcome of one detection pass.
#[derive(Debug, Clone)]
pub struct Detection {
    pub found: bool,
    /// Row-major refined corners; empty unless `found`.
    pub image_points: Vec<Vector2<f64>>,
    /// The input frame with the detected grid, or the rejected candidates,
    /// drawn on top.
    pub overlay: RgbImage,
}

const ROW_COLORS: [Rgb<u8>; 7] = [
    Rgb([255, 0, 0]),
    Rgb([255, 128, 0]),
    Rgb([200, 200, 0]),
    Rgb([0, 255, 0]),
    Rgb([0, 200, 200]),
    Rgb([0, 0, 255]),
    Rgb([255, 0, 255]),
];

/// Detects the `pattern` chessboard in `frame`.
pub fn detect(
    frame: &RgbImage,
    pattern: PatternSize,
    params: &DetectorParams,
    subpix: &SubPixParams,
) -> Detection {
    let gray = image::imageops::grayscale(frame);
    let positions = corner_candidates(&gray, params);
    debug!(
        "{} corner candidates for a {}x{} pattern",
        positions.len(),
        pattern.rows,
        pattern.cols
    );

    let mut overlay = frame.clone();
    match assemble_grid(&positions, pattern) {
        Some(mut points) => {
            refine_corners(&gray, &mut points, subpix);
            draw_grid(&mut overlay, &points, pattern);
            Detection {
                found: true,
                image_points: points,
                overlay,
            }
        }
        None => {
            for p in &positions {
                let center = (p.x.round() as i32, p.y.round() as i32);
                draw_ring(&mut overlay, center, 4, ROW_COLORS[0], 1);
            }
            Detection {
                found: false,
                image_points: Vec::new(),
                overlay,
            }
        }
    }
}

/// Unordered ChESS corner positions, strongest response first.
pub fn corner_candidates(gray: &GrayImage, params: &DetectorParams) -> Vec<Vector2<f64>> {
    let mut corners = find_chess_corners_image(gray, &params.chess_config());
    corners.sort_by(|a, b| b.response.total_cmp(&a.response));
    corners
        .iter()
        .map(|c| Vector2::new(c.x as f64, c.y as f64))
        .collect()
}

/// Circles every corner and links consecutive corners, one color per row.
fn draw_grid(overlay: &mut RgbImage, points: &[Vector2<f64>], pattern: PatternSize) {
    let cols = pattern.cols.max(1);
    for (idx, p) in points.iter().enumerate() {
        let color = ROW_COLORS[(idx / cols) % ROW_COLORS.len()];
        draw_ring(overlay, (p.x.round() as i32, p.y.round() as i32), 4, color, 1);
        if idx + 1 < points.len() {
            draw_thick_line(overlay, p, &points[idx + 1], color, 1);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Renders an axis-aligned board of `squares_x x squares_y` squares with
    /// a white margin; inner corners sit at `margin + square * k - 0.5`.
    pub(crate) fn render_board(
        squares_x: u32,
        squares_y: u32,
        square: u32,
        margin: u32,
    ) -> RgbImage {
        let width = squares_x * square + 2 * margin;
        let height = squares_y * square + 2 * margin;
        RgbImage::from_fn(width, height, |x, y| {
            if x < margin || y < margin || x >= width - margin || y >= height - margin {
                return Rgb([255, 255, 255]);
            }
            let c = (x - margin) / square;
            let r = (y - margin) / square;
            if (r + c) % 2 == 0 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        })
    }

    #[test]
    fn test_detect_clean_board_returns_all_corners() {
        let frame = render_board(10, 7, 30, 40);
        let pattern = PatternSize::new(6, 9);
        let detection = detect(
            &frame,
            pattern,
            &DetectorParams::default(),
            &SubPixParams::default(),
        );

        assert!(detection.found);
        assert_eq!(detection.image_points.len(), 54);
        for (idx, p) in detection.image_points.iter().enumerate() {
            let r = (idx / 9) as f64;
            let c = (idx % 9) as f64;
            let expected =
                Vector2::new(40.0 + 30.0 * (c + 1.0) - 0.5, 40.0 + 30.0 * (r + 1.0) - 0.5);
            assert!((p - expected).norm() < 1.0, "corner {idx}: {p:?} vs {expected:?}");
        }
        let step = detection.image_points[1] - detection.image_points[0];
        assert!((step.x - 30.0).abs() < 1.0 && step.y.abs() < 1.0);
        assert_eq!(detection.overlay.dimensions(), frame.dimensions());
    }

    #[test]
    fn test_corner_candidates_cover_inner_corners() {
        let frame = render_board(4, 3, 30, 40);
        let gray = image::imageops::grayscale(&frame);
        let candidates = corner_candidates(&gray, &DetectorParams::default());

        // 3x2 inner corners, each with a candidate within a pixel.
        for r in 1..3 {
            for c in 1..4 {
                let expected = Vector2::new(40.0 + 30.0 * c as f64, 40.0 + 30.0 * r as f64)
                    - Vector2::new(0.5, 0.5);
                assert!(
                    candidates.iter().any(|p| (p - expected).norm() < 1.0),
                    "no candidate near {expected:?}"
                );
            }
        }

        let blank = GrayImage::from_pixel(160, 120, image::Luma([128]));
        assert!(corner_candidates(&blank, &DetectorParams::default()).is_empty());
    }

    #[test]
    fn test_detect_blank_frame_finds_nothing() {
        let frame = RgbImage::from_pixel(320, 240, Rgb([128, 128, 128]));
        let detection = detect(
            &frame,
            PatternSize::default(),
            &DetectorParams::default(),
            &SubPixParams::default(),
        );
        assert!(!detection.found);
        assert!(detection.image_points.is_empty());
    }

    #[test]
    fn test_detect_rejects_board_of_other_size() {
        let frame = render_board(8, 6, 30, 40);
        let detection = detect(
            &frame,
            PatternSize::new(6, 9),
            &DetectorParams::default(),
            &SubPixParams::default(),
        );
        assert!(!detection.found);
        assert!(detection.image_points.is_empty());
    }
}
