//! Iterative sub-pixel corner refinement.
//!
//! Every image gradient inside the search window is orthogonal to the vector
//! from the true corner to that pixel. Each iteration solves the weighted
//! least-squares system built from that constraint and moves the estimate,
//! stopping on an iteration cap or once the update is shorter than epsilon.

use image::GrayImage;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Termination and window settings for corner refinement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubPixParams {
    /// Half side of the search window; 5 gives an 11x11 window.
    pub half_window: usize,
    pub max_iterations: usize,
    /// Stop once the squared update falls below `epsilon^2`.
    pub epsilon: f64,
}

impl Default for SubPixParams {
    fn default() -> Self {
        SubPixParams {
            half_window: 5,
            max_iterations: 50,
            epsilon: 0.1,
        }
    }
}

/// Refines every corner in place.
pub fn refine_corners(gray: &GrayImage, corners: &mut [Vector2<f64>], params: &SubPixParams) {
    let mask = gaussian_mask(params.half_window);
    for corner in corners.iter_mut() {
        *corner = refine_corner(gray, *corner, params, &mask);
    }
}

fn gaussian_mask(half_window: usize) -> Vec<f64> {
    let hw = half_window as i32;
    let side = (2 * hw + 1) as usize;
    let denom = (half_window.max(1)) as f64;
    let mut mask = Vec::with_capacity(side * side);
    for dy in -hw..=hw {
        let wy = (-(dy as f64 / denom).powi(2)).exp();
        for dx in -hw..=hw {
            let wx = (-(dx as f64 / denom).powi(2)).exp();
            mask.push(wx * wy);
        }
    }
    mask
}

fn refine_corner(
    gray: &GrayImage,
    initial: Vector2<f64>,
    params: &SubPixParams,
    mask: &[f64],
) -> Vector2<f64> {
    let hw = params.half_window as i32;
    let eps2 = params.epsilon * params.epsilon;
    let mut estimate = initial;

    for _ in 0..params.max_iterations {
        let (mut a, mut b, mut c) = (0.0, 0.0, 0.0);
        let (mut bb1, mut bb2) = (0.0, 0.0);

        let mut k = 0;
        for dy in -hw..=hw {
            for dx in -hw..=hw {
                let px = estimate.x + dx as f64;
                let py = estimate.y + dy as f64;
                let gx = sample_bilinear(gray, px + 1.0, py) - sample_bilinear(gray, px - 1.0, py);
                let gy = sample_bilinear(gray, px, py + 1.0) - sample_bilinear(gray, px, py - 1.0);
                let m = mask[k];
                k += 1;

                let gxx = gx * gx * m;
                let gxy = gx * gy * m;
                let gyy = gy * gy * m;

                a += gxx;
                b += gxy;
                c += gyy;

                bb1 += gxx * dx as f64 + gxy * dy as f64;
                bb2 += gxy * dx as f64 + gyy * dy as f64;
            }
        }

        let det = a * c - b * b;
        if det.abs() <= f64::EPSILON {
            break;
        }
        let scale = 1.0 / det;
        let shift = Vector2::new(
            scale * (c * bb1 - b * bb2),
            scale * (a * bb2 - b * bb1),
        );
        estimate += shift;

        if shift.norm_squared() <= eps2 {
            break;
        }
    }

    let drift = estimate - initial;
    if drift.x.abs() > hw as f64
        || drift.y.abs() > hw as f64
        || !estimate.iter().all(|v| v.is_finite())
    {
        return initial;
    }
    estimate
}

/// Bilinear sample with coordinates clamped to the image; pixel centers
/// sit on integer coordinates.
pub(crate) fn sample_bilinear(gray: &GrayImage, x: f64, y: f64) -> f64 {
    let max_x = gray.width().saturating_sub(1) as f64;
    let max_y = gray.height().saturating_sub(1) as f64;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let x0 = x0 as u32;
    let y0 = y0 as u32;
    let x1 = (x0 + 1).min(max_x as u32);
    let y1 = (y0 + 1).min(max_y as u32);

    let p = |xx: u32, yy: u32| gray.get_pixel(xx, yy)[0] as f64;
    let top = p(x0, y0) * (1.0 - fx) + p(x1, y0) * fx;
    let bottom = p(x0, y1) * (1.0 - fx) + p(x1, y1) * fx;
    top * (1.0 - fy) + bottom * fy
}
