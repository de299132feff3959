//! Harris corner response with threshold markers.
//!
//! The response follows the usual structure-tensor recipe: Sobel gradients,
//! a `block_size` box sum of their products and
//! `R = det(M) - k * trace(M)^2`. The map is min-max normalized to `0..=255`
//! and every pixel whose truncated normalized response exceeds the threshold
//! gets a ring. Rings are drawn at `(x, y) = (row, column)`, which mirrors
//! them across the diagonal relative to the response map.

use image::{GrayImage, ImageBuffer, Luma};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::overlay::draw::draw_ring;

/// Single-channel floating point response map.
pub type ResponseImage = ImageBuffer<Luma<f32>, Vec<f32>>;

const MARKER_RADIUS: i32 = 5;
const MARKER_THICKNESS: u32 = 2;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum HarrisError {
    #[error("Sobel aperture must be 1, 3, 5 or 7, got {0}")]
    InvalidAperture(usize),
    #[error("Block size must be at least 1, got {0}")]
    InvalidBlockSize(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarrisParams {
    pub block_size: usize,
    pub aperture_size: usize,
    pub k: f64,
    /// Markers go on pixels whose normalized response exceeds this value.
    pub threshold: i32,
}

impl Default for HarrisParams {
    fn default() -> Self {
        HarrisParams {
            block_size: 2,
            aperture_size: 3,
            k: 0.04,
            threshold: 150,
        }
    }
}

/// A response-map pixel above the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker {
    pub row: u32,
    pub col: u32,
    /// Where the ring is drawn: `(row, col)` used as `(x, y)`.
    pub center: (i32, i32),
}

/// Normalized response rendered as 8-bit gray with rings at every marker.
#[derive(Debug, Clone)]
pub struct HarrisOutput {
    pub image: GrayImage,
    pub markers: Vec<Marker>,
}

/// Scores `gray` and draws the markers onto the normalized response.
pub fn score(gray: &GrayImage, params: &HarrisParams) -> Result<HarrisOutput, HarrisError> {
    let response = harris_response(gray, params.block_size, params.aperture_size, params.k)?;
    let normalized = normalize_min_max(&response);
    let markers = select_markers(&normalized, params.threshold);
    debug!("{} Harris markers above {}", markers.len(), params.threshold);

    let mut image = GrayImage::from_fn(normalized.width(), normalized.height(), |x, y| {
        Luma([normalized.get_pixel(x, y)[0].abs().round().min(255.0) as u8])
    });
    for marker in &markers {
        draw_ring(&mut image, marker.center, MARKER_RADIUS, Luma([0]), MARKER_THICKNESS);
    }
    Ok(HarrisOutput { image, markers })
}

/// Raw Harris response for every pixel.
pub fn harris_response(
    gray: &GrayImage,
    block_size: usize,
    aperture_size: usize,
    k: f64,
) -> Result<ResponseImage, HarrisError> {
    let (deriv, smooth) = sobel_kernels(aperture_size)?;
    if block_size == 0 {
        return Err(HarrisError::InvalidBlockSize(block_size));
    }

    let width = gray.width() as usize;
    let height = gray.height() as usize;
    if width == 0 || height == 0 {
        return Ok(ResponseImage::new(gray.width(), gray.height()));
    }
    let src: Vec<f64> = gray.as_raw().iter().map(|v| *v as f64).collect();

    let scale = 1.0 / ((1usize << (aperture_size - 1)) as f64 * block_size as f64 * 255.0);
    let gx = separable(&src, width, height, &deriv, &smooth, scale);
    let gy = separable(&src, width, height, &smooth, &deriv, scale);

    let xx: Vec<f64> = gx.iter().map(|g| g * g).collect();
    let xy: Vec<f64> = gx.iter().zip(gy.iter()).map(|(a, b)| a * b).collect();
    let yy: Vec<f64> = gy.iter().map(|g| g * g).collect();

    let a = box_sum(&xx, width, height, block_size);
    let b = box_sum(&xy, width, height, block_size);
    let c = box_sum(&yy, width, height, block_size);

    let mut out = ResponseImage::new(gray.width(), gray.height());
    for (idx, pixel) in out.pixels_mut().enumerate() {
        let det = a[idx] * c[idx] - b[idx] * b[idx];
        let trace = a[idx] + c[idx];
        pixel[0] = (det - k * trace * trace) as f32;
    }
    Ok(out)
}

/// Rescales the map linearly so its minimum is 0 and its maximum 255.
/// A constant map becomes all zeros.
pub fn normalize_min_max(response: &ResponseImage) -> ResponseImage {
    let (min, max) = response
        .pixels()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
    let range = max - min;
    let scale = if range > f32::EPSILON { 255.0 / range } else { 0.0 };
    ResponseImage::from_fn(response.width(), response.height(), |x, y| {
        Luma([(response.get_pixel(x, y)[0] - min) * scale])
    })
}

/// Every pixel whose truncated normalized value exceeds `threshold`, in
/// row-major order.
pub fn select_markers(normalized: &ResponseImage, threshold: i32) -> Vec<Marker> {
    let mut markers = Vec::new();
    for row in 0..normalized.height() {
        for col in 0..normalized.width() {
            if (normalized.get_pixel(col, row)[0] as i32) > threshold {
                markers.push(Marker {
                    row,
                    col,
                    center: (row as i32, col as i32),
                });
            }
        }
    }
    markers
}

/// Derivative and smoothing kernels of the Sobel operator.
fn sobel_kernels(aperture: usize) -> Result<(Vec<f64>, Vec<f64>), HarrisError> {
    match aperture {
        1 => Ok((vec![-1.0, 0.0, 1.0], vec![1.0])),
        3 | 5 | 7 => {
            let smooth = binomial(aperture - 1);
            let base = binomial(aperture - 3);
            let mut deriv = vec![0.0; aperture];
            for (i, w) in base.iter().enumerate() {
                deriv[i] -= w;
                deriv[i + 2] += w;
            }
            Ok((deriv, smooth))
        }
        other => Err(HarrisError::InvalidAperture(other)),
    }
}

fn binomial(order: usize) -> Vec<f64> {
    let mut row = vec![1.0];
    for _ in 0..order {
        let mut next = vec![1.0; row.len() + 1];
        for i in 1..row.len() {
            next[i] = row[i - 1] + row[i];
        }
        row = next;
    }
    row
}

/// Mirror index without repeating the edge pixel (`dcb|abcd|cba`).
fn reflect101(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let n = n as isize;
    let mut i = i;
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * n - 2 - i;
        } else {
            return i as usize;
        }
    }
}

/// Correlates with `kx` along rows and `ky` along columns, then scales.
fn separable(
    src: &[f64],
    width: usize,
    height: usize,
    kx: &[f64],
    ky: &[f64],
    scale: f64,
) -> Vec<f64> {
    let rx = (kx.len() / 2) as isize;
    let ry = (ky.len() / 2) as isize;

    let mut horizontal = vec![0.0; src.len()];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (i, w) in kx.iter().enumerate() {
                let sx = reflect101(x as isize + i as isize - rx, width);
                acc += w * src[y * width + sx];
            }
            horizontal[y * width + x] = acc;
        }
    }

    let mut out = vec![0.0; src.len()];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for (i, w) in ky.iter().enumerate() {
                let sy = reflect101(y as isize + i as isize - ry, height);
                acc += w * horizontal[sy * width + x];
            }
            out[y * width + x] = acc * scale;
        }
    }
    out
}

/// Unnormalized `block x block` sum anchored at `block / 2`.
fn box_sum(src: &[f64], width: usize, height: usize, block: usize) -> Vec<f64> {
    let anchor = (block / 2) as isize;
    let mut out = vec![0.0; src.len()];
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0;
            for dy in 0..block as isize {
                let sy = reflect101(y as isize + dy - anchor, height);
                for dx in 0..block as isize {
                    let sx = reflect101(x as isize + dx - anchor, width);
                    acc += src[sy * width + sx];
                }
            }
            out[y * width + x] = acc;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sobel_kernels_match_binomial_construction() {
        let (d3, s3) = sobel_kernels(3).unwrap();
        assert_eq!(d3, vec![-1.0, 0.0, 1.0]);
        assert_eq!(s3, vec![1.0, 2.0, 1.0]);
        let (d5, s5) = sobel_kernels(5).unwrap();
        assert_eq!(d5, vec![-1.0, -2.0, 0.0, 2.0, 1.0]);
        assert_eq!(s5, vec![1.0, 4.0, 6.0, 4.0, 1.0]);
        assert_eq!(sobel_kernels(4), Err(HarrisError::InvalidAperture(4)));
    }

    #[test]
    fn test_reflect101_border() {
        assert_eq!(reflect101(-1, 5), 1);
        assert_eq!(reflect101(-2, 5), 2);
        assert_eq!(reflect101(5, 5), 3);
        assert_eq!(reflect101(2, 5), 2);
        assert_eq!(reflect101(-3, 1), 0);
    }

    #[test]
    fn test_single_peak_marker_uses_row_as_x() {
        // Response map 64 wide, 48 tall with one peak at row 10, column 20.
        let mut response = ResponseImage::new(64, 48);
        response.put_pixel(20, 10, Luma([5.0]));
        let normalized = normalize_min_max(&response);
        let markers = select_markers(&normalized, 150);

        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].row, 10);
        assert_eq!(markers[0].col, 20);
        assert_eq!(markers[0].center, (10, 20));
    }

    #[test]
    fn test_constant_map_normalizes_to_zero() {
        let response = ResponseImage::from_pixel(8, 8, Luma([3.0]));
        let normalized = normalize_min_max(&response);
        assert!(normalized.pixels().all(|p| p[0] == 0.0));
        assert!(select_markers(&normalized, 150).is_empty());
    }

    #[test]
    fn test_flat_image_has_no_corners() {
        let gray = GrayImage::from_pixel(32, 24, Luma([77]));
        let output = score(&gray, &HarrisParams::default()).unwrap();
        assert!(output.markers.is_empty());
        assert_eq!(output.image.dimensions(), (32, 24));
    }

    #[test]
    fn test_bright_dot_marks_near_swapped_coordinate() {
        let mut gray = GrayImage::new(64, 48);
        gray.put_pixel(20, 10, Luma([255]));
        let output = score(&gray, &HarrisParams::default()).unwrap();

        assert!(!output.markers.is_empty());
        assert_eq!(output.markers[0].center, (10, 20));
        for marker in &output.markers {
            assert!((10..=11).contains(&marker.row), "{marker:?}");
            assert!((20..=21).contains(&marker.col), "{marker:?}");
            assert_eq!(marker.center, (marker.row as i32, marker.col as i32));
        }
        // Ring around the swapped coordinate (x = 10, y = 20).
        assert_eq!(output.image.get_pixel(15, 20)[0], 0);
    }

    #[test]
    fn test_invalid_parameters_are_rejected() {
        let gray = GrayImage::new(8, 8);
        let params = HarrisParams {
            block_size: 0,
            ..HarrisParams::default()
        };
        assert_eq!(
            score(&gray, &params).unwrap_err(),
            HarrisError::InvalidBlockSize(0)
        );
        let params = HarrisParams {
            aperture_size: 2,
            ..HarrisParams::default()
        };
        assert_eq!(
            score(&gray, &params).unwrap_err(),
            HarrisError::InvalidAperture(2)
        );
    }
}
