//! The `optimization` module refines camera parameters and poses by
//! minimizing pixel reprojection error.
//!
//! Two problems are solved here, both with the `tiny_solver`
//! Levenberg-Marquardt optimizer and automatically differentiated residuals:
//!
//! 1. [`PlanarCalibrationCost`]: intrinsics, distortion and one pose per view,
//!    estimated jointly over every captured view of the planar target.
//! 2. [`PoseOptimizationCost`]: a single view's pose with the camera fixed.
//!
//! Each implements [`Optimizer`]: a closed-form `linear_estimation` seeds the
//! parameters, then `optimize` refines them.

use nalgebra::{DVector, RealField, Vector3};
use serde::{Deserialize, Serialize};

pub mod calibration;
pub mod pose;

pub use calibration::PlanarCalibrationCost;
pub use pose::PoseOptimizationCost;

use crate::camera::{CameraModelError, Intrinsics};

/// Summary statistics of per-point reprojection distances, in pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionError {
    pub rmse: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub median: f64,
}

impl ProjectionError {
    /// Aggregates per-point distances. Returns `None` for an empty slice.
    pub fn from_distances(errors: &[f64]) -> Option<Self> {
        if errors.is_empty() {
            return None;
        }
        let n = errors.len() as f64;
        let mean = errors.iter().sum::<f64>() / n;
        let variance = errors.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        let rmse = (errors.iter().map(|x| x * x).sum::<f64>() / n).sqrt();
        let min = errors.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        let max = errors.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));

        let mut sorted = errors.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        Some(ProjectionError {
            rmse,
            min,
            max,
            mean,
            stddev: variance.sqrt(),
            median,
        })
    }
}

/// A trait for camera parameter and pose refinement tasks.
pub trait Optimizer {
    /// Runs Levenberg-Marquardt from the current parameters and stores the
    /// refined values.
    ///
    /// # Errors
    ///
    /// [`CameraModelError::NumericalError`] when the solver gives up, and
    /// [`CameraModelError::InvalidParams`] for inconsistent inputs or a
    /// refined camera that fails validation.
    fn optimize(&mut self, verbose: bool) -> Result<(), CameraModelError>;

    /// Closed-form initial estimate of the parameters `optimize` refines.
    fn linear_estimation(&mut self) -> Result<(), CameraModelError>
    where
        Self: Sized;

    fn get_intrinsics(&self) -> Intrinsics;

    /// Distortion coefficients `[k1, k2, p1, p2, k3]`.
    fn get_distortion(&self) -> Vec<f64>;
}

/// Pinhole plus radial-tangential projection over any differentiable scalar.
#[derive(Debug, Clone)]
pub(crate) struct GenericRadTan<T> {
    pub fx: T,
    pub fy: T,
    pub cx: T,
    pub cy: T,
    pub k1: T,
    pub k2: T,
    pub p1: T,
    pub p2: T,
    pub k3: T,
}

impl<T: RealField> GenericRadTan<T> {
    /// Camera-frame point to pixel `(u, v)`.
    pub fn project(&self, point: &Vector3<T>) -> (T, T) {
        let x = point.x.clone() / point.z.clone();
        let y = point.y.clone() / point.z.clone();

        let r2 = x.clone() * x.clone() + y.clone() * y.clone();
        let r4 = r2.clone() * r2.clone();
        let r6 = r4.clone() * r2.clone();
        let radial = T::one()
            + self.k1.clone() * r2.clone()
            + self.k2.clone() * r4
            + self.k3.clone() * r6;
        let two = T::one() + T::one();
        let xy = x.clone() * y.clone();

        let xd = x.clone() * radial.clone()
            + two.clone() * self.p1.clone() * xy.clone()
            + self.p2.clone() * (r2.clone() + two.clone() * x.clone() * x);
        let yd = y.clone() * radial
            + self.p1.clone() * (r2 + two.clone() * y.clone() * y)
            + two * self.p2.clone() * xy;

        (
            self.fx.clone() * xd + self.cx.clone(),
            self.fy.clone() * yd + self.cy.clone(),
        )
    }
}

/// Applies a `[rx, ry, rz, tx, ty, tz]` pose block to a world point.
///
/// Rotation uses the Rodrigues formula; near zero angle it falls back to the
/// first-order form `p + r x p` so derivatives stay finite.
pub(crate) fn transform_point<T: RealField>(pose: &DVector<T>, point: &Vector3<f64>) -> Vector3<T> {
    let r = Vector3::new(pose[0].clone(), pose[1].clone(), pose[2].clone());
    let t = Vector3::new(pose[3].clone(), pose[4].clone(), pose[5].clone());
    let p: Vector3<T> = Vector3::new(
        nalgebra::convert(point.x),
        nalgebra::convert(point.y),
        nalgebra::convert(point.z),
    );

    let small_angle: T = nalgebra::convert(1e-12);
    let theta2 = r.dot(&r);
    let rotated = if theta2 > small_angle {
        let theta = theta2.sqrt();
        let k = r / theta.clone();
        let (sin, cos) = (theta.clone().sin(), theta.cos());
        let k_cross_p = k.cross(&p);
        let k_dot_p = k.dot(&p);
        p.clone() * cos.clone() + k_cross_p * sin + k * (k_dot_p * (T::one() - cos))
    } else {
        p.clone() + r.cross(&p)
    };
    rotated + t
}
