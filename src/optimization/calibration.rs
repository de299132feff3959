//! Joint refinement of intrinsics, distortion and per-view poses over every
//! captured view of the planar target.
//!
//! The focal length is shared between both axes (`fx == fy`), so the camera
//! block is `[f, cx, cy, k1, k2, p1, p2, k3]` and each view adds a
//! `[rx, ry, rz, tx, ty, tz]` pose block.

use std::collections::HashMap;

use log::{debug, info, warn};
use nalgebra::{DVector, Matrix3, Vector2, Vector3};
use tiny_solver::factors::Factor;
use tiny_solver::optimizer::OptimizerOptions;
use tiny_solver::{LevenbergMarquardtOptimizer, Optimizer as TinySolverOptimizer};

use super::{transform_point, GenericRadTan, Optimizer};
use crate::camera::{CameraModelError, Intrinsics, RadTanModel, Resolution};
use crate::correspondence::CorrespondenceSet;
use crate::geometry::{estimate_homography, pose_from_homography, Pose};

const CAMERA_KEY: &str = "camera";

fn pose_key(view: usize) -> String {
    format!("pose{view}")
}

/// Reprojection residuals of one view against the shared camera block.
#[derive(Debug, Clone)]
struct PlanarViewFactor {
    world: Vec<Vector3<f64>>,
    image: Vec<Vector2<f64>>,
}

impl<T: nalgebra::RealField> Factor<T> for PlanarViewFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let cam = &params[0];
        let pose = &params[1];
        let camera = GenericRadTan {
            fx: cam[0].clone(),
            fy: cam[0].clone(),
            cx: cam[1].clone(),
            cy: cam[2].clone(),
            k1: cam[3].clone(),
            k2: cam[4].clone(),
            p1: cam[5].clone(),
            p2: cam[6].clone(),
            k3: cam[7].clone(),
        };

        let mut residuals = DVector::zeros(self.image.len() * 2);
        for (i, (world, observed)) in self.world.iter().zip(self.image.iter()).enumerate() {
            let (u, v) = camera.project(&transform_point(pose, world));
            let gt_u: T = nalgebra::convert(observed.x);
            let gt_v: T = nalgebra::convert(observed.y);
            residuals[i * 2] = u - gt_u;
            residuals[i * 2 + 1] = v - gt_v;
        }
        residuals
    }
}

/// Calibration problem over a set of planar views.
#[derive(Debug, Clone)]
pub struct PlanarCalibrationCost {
    model: RadTanModel,
    views: Vec<CorrespondenceSet>,
    poses: Vec<Pose>,
}

impl PlanarCalibrationCost {
    /// Starts from unit focal length, the principal point at the image
    /// center and zero distortion.
    pub fn new(resolution: Resolution, views: &[CorrespondenceSet]) -> Self {
        let (cx, cy) = resolution.center();
        PlanarCalibrationCost {
            model: RadTanModel {
                intrinsics: Intrinsics {
                    fx: 1.0,
                    fy: 1.0,
                    cx,
                    cy,
                },
                resolution,
                distortions: [0.0; 5],
            },
            views: views.to_vec(),
            poses: Vec::new(),
        }
    }

    pub fn model(&self) -> &RadTanModel {
        &self.model
    }

    /// Per-view extrinsics, in archive order.
    pub fn poses(&self) -> &[Pose] {
        &self.poses
    }

    /// Pixel distance between every observed corner and its reprojection.
    pub fn reprojection_distances(&self) -> Vec<f64> {
        self.views
            .iter()
            .zip(self.poses.iter())
            .flat_map(|(view, pose)| {
                view.world_points
                    .iter()
                    .zip(view.image_points.iter())
                    .map(move |(w, observed)| {
                        let projected = self.model.project_camera_point(&pose.transform(w));
                        (projected - observed).norm()
                    })
            })
            .collect()
    }

    fn homographies(&self) -> Result<Vec<Matrix3<f64>>, CameraModelError> {
        self.views
            .iter()
            .enumerate()
            .map(|(idx, view)| {
                let plane: Vec<Vector2<f64>> =
                    view.world_points.iter().map(|p| Vector2::new(p.x, p.y)).collect();
                estimate_homography(&plane, &view.image_points).map_err(|e| {
                    CameraModelError::NumericalError(format!("view {}: {e}", idx + 1))
                })
            })
            .collect()
    }

    /// Shared focal length from the orthogonality constraints of every
    /// homography with the principal point held at the current estimate.
    fn focal_from_homographies(&self, homographies: &[Matrix3<f64>]) -> Option<f64> {
        let (cx, cy) = (self.model.intrinsics.cx, self.model.intrinsics.cy);
        let shift = Matrix3::new(1.0, 0.0, -cx, 0.0, 1.0, -cy, 0.0, 0.0, 1.0);

        let (mut ab, mut aa) = (0.0, 0.0);
        for h in homographies {
            let hc = shift * h;
            let (h11, h12) = (hc[(0, 0)], hc[(0, 1)]);
            let (h21, h22) = (hc[(1, 0)], hc[(1, 1)]);
            let (h31, h32) = (hc[(2, 0)], hc[(2, 1)]);

            // h1^T W h2 = 0 and h1^T W h1 = h2^T W h2 with W = diag(w, w, 1).
            let a1 = h11 * h12 + h21 * h22;
            let b1 = -h31 * h32;
            let a2 = h11 * h11 + h21 * h21 - h12 * h12 - h22 * h22;
            let b2 = -(h31 * h31 - h32 * h32);

            ab += a1 * b1 + a2 * b2;
            aa += a1 * a1 + a2 * a2;
        }

        if aa <= f64::EPSILON {
            return None;
        }
        let w = ab / aa;
        (w > 0.0).then(|| (1.0 / w).sqrt())
    }
}

impl Optimizer for PlanarCalibrationCost {
    fn optimize(&mut self, verbose: bool) -> Result<(), CameraModelError> {
        if self.views.is_empty() {
            return Err(CameraModelError::InvalidParams(
                "No views to calibrate from".to_string(),
            ));
        }
        if self.poses.len() != self.views.len() {
            self.linear_estimation()?;
        }

        let mut problem = tiny_solver::Problem::new();
        let mut initial_values = HashMap::new();
        initial_values.insert(
            CAMERA_KEY.to_string(),
            DVector::from_vec(vec![
                self.model.intrinsics.fx,
                self.model.intrinsics.cx,
                self.model.intrinsics.cy,
                self.model.distortions[0],
                self.model.distortions[1],
                self.model.distortions[2],
                self.model.distortions[3],
                self.model.distortions[4],
            ]),
        );

        for (idx, (view, pose)) in self.views.iter().zip(self.poses.iter()).enumerate() {
            let key = pose_key(idx);
            let factor = PlanarViewFactor {
                world: view.world_points.clone(),
                image: view.image_points.clone(),
            };
            problem.add_residual_block(
                view.image_points.len() * 2,
                &[CAMERA_KEY, key.as_str()],
                Box::new(factor),
                None,
            );
            initial_values.insert(key, pose.to_params());
        }

        if verbose {
            info!(
                "Starting calibration with tiny-solver Levenberg-Marquardt over {} views...",
                self.views.len()
            );
        }

        let options = OptimizerOptions {
            max_iteration: 200,
            min_abs_error_decrease_threshold: 1e-12,
            min_rel_error_decrease_threshold: 1e-12,
            min_error_threshold: 1e-14,
            ..OptimizerOptions::default()
        };
        let optimizer = LevenbergMarquardtOptimizer::default();
        let result = optimizer
            .optimize(&problem, &initial_values, Some(options))
            .ok_or_else(|| CameraModelError::NumericalError("Optimization failed".to_string()))?;

        let camera = result.get(CAMERA_KEY).ok_or_else(|| {
            CameraModelError::NumericalError("camera block missing from solution".to_string())
        })?;
        let mut poses = Vec::with_capacity(self.views.len());
        for idx in 0..self.views.len() {
            let params = result.get(&pose_key(idx)).ok_or_else(|| {
                CameraModelError::NumericalError(format!("pose block {idx} missing from solution"))
            })?;
            poses.push(Pose::from_params(params));
        }

        let mut model = self.model.clone();
        model.intrinsics.fx = camera[0];
        model.intrinsics.fy = camera[0];
        model.intrinsics.cx = camera[1];
        model.intrinsics.cy = camera[2];
        model.distortions = [camera[3], camera[4], camera[5], camera[6], camera[7]];
        model.validate_params()?;

        self.model = model;
        self.poses = poses;

        if verbose {
            info!("Optimization finished: {:?}", self.model);
        }
        Ok(())
    }

    /// Closed-form focal length and per-view poses from the view
    /// homographies, principal point at its current value and no distortion.
    fn linear_estimation(&mut self) -> Result<(), CameraModelError>
    where
        Self: Sized,
    {
        let homographies = self.homographies()?;

        let focal = match self.focal_from_homographies(&homographies) {
            Some(f) if f.is_finite() => f,
            _ => {
                let fallback = self.model.resolution.width.max(self.model.resolution.height) as f64;
                warn!("Views do not constrain the focal length, starting from {fallback}");
                fallback.max(1.0)
            }
        };
        debug!("Initial focal length {focal:.4}");
        self.model.intrinsics.fx = focal;
        self.model.intrinsics.fy = focal;

        let k_inv = self.model.intrinsics.matrix().try_inverse().ok_or_else(|| {
            CameraModelError::NumericalError("camera matrix is singular".to_string())
        })?;
        self.poses = homographies
            .iter()
            .map(|h| {
                pose_from_homography(&(k_inv * h))
                    .map_err(|e| CameraModelError::NumericalError(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.model.validate_params()
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.model.intrinsics.clone()
    }

    fn get_distortion(&self) -> Vec<f64> {
        self.model.distortions.to_vec()
    }
}
