//! Single-view pose refinement against a fixed, calibrated camera.

use std::collections::HashMap;

use log::info;
use nalgebra::{DVector, Vector2, Vector3};
use tiny_solver::factors::Factor;
use tiny_solver::{LevenbergMarquardtOptimizer, Optimizer as TinySolverOptimizer};

use super::{transform_point, GenericRadTan, Optimizer};
use crate::camera::{CameraModelError, Intrinsics, RadTanModel};
use crate::geometry::{estimate_homography, pose_from_homography, Pose};

#[derive(Debug, Clone)]
struct PoseFactor {
    camera: GenericRadTan<f64>,
    world: Vec<Vector3<f64>>,
    image: Vec<Vector2<f64>>,
}

impl<T: nalgebra::RealField> Factor<T> for PoseFactor {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let pose = &params[0];
        let c = &self.camera;
        let camera: GenericRadTan<T> = GenericRadTan {
            fx: nalgebra::convert(c.fx),
            fy: nalgebra::convert(c.fy),
            cx: nalgebra::convert(c.cx),
            cy: nalgebra::convert(c.cy),
            k1: nalgebra::convert(c.k1),
            k2: nalgebra::convert(c.k2),
            p1: nalgebra::convert(c.p1),
            p2: nalgebra::convert(c.p2),
            k3: nalgebra::convert(c.k3),
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

/// Perspective-n-point problem for planar world points.
#[derive(Debug, Clone)]
pub struct PoseOptimizationCost {
    model: RadTanModel,
    world: Vec<Vector3<f64>>,
    image: Vec<Vector2<f64>>,
    pose: Option<Pose>,
}

impl PoseOptimizationCost {
    pub fn new(model: RadTanModel, world: Vec<Vector3<f64>>, image: Vec<Vector2<f64>>) -> Self {
        PoseOptimizationCost {
            model,
            world,
            image,
            pose: None,
        }
    }

    /// The current estimate, if any step has run.
    pub fn pose(&self) -> Option<&Pose> {
        self.pose.as_ref()
    }

    fn check_points(&self) -> Result<(), CameraModelError> {
        if self.world.len() != self.image.len() {
            return Err(CameraModelError::InvalidParams(
                "Number of 2D and 3D points must match".to_string(),
            ));
        }
        if self.world.len() < 4 {
            return Err(CameraModelError::InvalidParams(
                "Pose estimation needs at least 4 points".to_string(),
            ));
        }
        Ok(())
    }
}

impl Optimizer for PoseOptimizationCost {
    fn optimize(&mut self, verbose: bool) -> Result<(), CameraModelError> {
        self.check_points()?;
        let initial = match &self.pose {
            Some(pose) => pose.clone(),
            None => {
                self.linear_estimation()?;
                self.pose.clone().ok_or_else(|| {
                    CameraModelError::NumericalError("no initial pose".to_string())
                })?
            }
        };

        let [k1, k2, p1, p2, k3] = self.model.distortions;
        let intrinsics = &self.model.intrinsics;
        let factor = PoseFactor {
            camera: GenericRadTan {
                fx: intrinsics.fx,
                fy: intrinsics.fy,
                cx: intrinsics.cx,
                cy: intrinsics.cy,
                k1,
                k2,
                p1,
                p2,
                k3,
            },
            world: self.world.clone(),
            image: self.image.clone(),
        };

        let mut problem = tiny_solver::Problem::new();
        problem.add_residual_block(self.image.len() * 2, &["pose"], Box::new(factor), None);

        let mut initial_values = HashMap::new();
        initial_values.insert("pose".to_string(), initial.to_params());

        if verbose {
            info!("Refining pose with tiny-solver Levenberg-Marquardt...");
        }

        let optimizer = LevenbergMarquardtOptimizer::default();
        let result = optimizer
            .optimize(&problem, &initial_values, None)
            .ok_or_else(|| CameraModelError::NumericalError("Optimization failed".to_string()))?;
        let params = result.get("pose").ok_or_else(|| {
            CameraModelError::NumericalError("pose block missing from solution".to_string())
        })?;
        if params.iter().any(|v| !v.is_finite()) {
            return Err(CameraModelError::NumericalError(
                "refined pose is not finite".to_string(),
            ));
        }

        self.pose = Some(Pose::from_params(params));
        Ok(())
    }

    /// Undistorts the observations and decomposes the plane-to-image
    /// homography into an initial pose.
    fn linear_estimation(&mut self) -> Result<(), CameraModelError>
    where
        Self: Sized,
    {
        self.check_points()?;
        if self.world.iter().any(|p| p.z.abs() > 1e-9) {
            return Err(CameraModelError::InvalidParams(
                "Homography initialization needs planar points at Z = 0".to_string(),
            ));
        }

        let normalized = self
            .image
            .iter()
            .map(|p| self.model.undistort_normalized(p))
            .collect::<Result<Vec<_>, _>>()?;
        let plane: Vec<Vector2<f64>> = self.world.iter().map(|p| Vector2::new(p.x, p.y)).collect();

        let h = estimate_homography(&plane, &normalized)
            .map_err(|e| CameraModelError::NumericalError(e.to_string()))?;
        let pose =
            pose_from_homography(&h).map_err(|e| CameraModelError::NumericalError(e.to_string()))?;
        self.pose = Some(pose);
        Ok(())
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.model.intrinsics.clone()
    }

    fn get_distortion(&self) -> Vec<f64> {
        self.model.distortions.to_vec()
    }
}
