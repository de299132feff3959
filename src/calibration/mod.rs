//! Camera calibration from the archived views of the planar target.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::camera::{CameraModelError, RadTanModel, Resolution};
use crate::correspondence::CorrespondenceArchive;
use crate::geometry::Pose;
use crate::optimization::{Optimizer, PlanarCalibrationCost, ProjectionError};
use crate::store::{ParameterStore, StoreError};

/// Fewest captured views a calibration will run on.
pub const MIN_CALIBRATION_VIEWS: usize = 5;

#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("Calibration needs at least {required} captured views, have {actual}")]
    InsufficientViews { required: usize, actual: usize },
    #[error("View {view} has {actual} points, expected {expected}")]
    MismatchedPoints {
        view: usize,
        expected: usize,
        actual: usize,
    },
    #[error("Degenerate views: {0}")]
    Degenerate(String),
    #[error("Optimization failed: {0}")]
    OptimizationFailure(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Output of one calibration run.
#[derive(Debug, Clone)]
pub struct CalibrationResult {
    /// Camera with `fx == fy`.
    pub model: RadTanModel,
    /// Root mean square reprojection error over every point of every view.
    pub rms: f64,
    pub errors: ProjectionError,
    /// Per-view extrinsics; only used to report the residual.
    pub poses: Vec<Pose>,
}

impl CalibrationResult {
    pub fn report(&self) -> CalibrationReport {
        let k = self.model.intrinsics.matrix();
        CalibrationReport {
            rms: self.rms,
            camera_matrix: [
                [k[(0, 0)], k[(0, 1)], k[(0, 2)]],
                [k[(1, 0)], k[(1, 1)], k[(1, 2)]],
                [k[(2, 0)], k[(2, 1)], k[(2, 2)]],
            ],
            distortion: self.model.distortions,
            views: self.poses.len(),
            errors: self.errors.clone(),
        }
    }
}

/// Serializable summary for logs and JSON export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub rms: f64,
    pub camera_matrix: [[f64; 3]; 3],
    pub distortion: [f64; 5],
    pub views: usize,
    pub errors: ProjectionError,
}

/// Calibrates from every view in `archive`.
///
/// # Errors
///
/// * [`CalibrationError::InsufficientViews`] below [`MIN_CALIBRATION_VIEWS`].
/// * [`CalibrationError::MismatchedPoints`] if a view's point lists differ.
/// * [`CalibrationError::Degenerate`] when the views cannot seed the solver.
/// * [`CalibrationError::OptimizationFailure`] when the solver gives up.
pub fn calibrate(
    archive: &CorrespondenceArchive,
    resolution: Resolution,
) -> Result<CalibrationResult, CalibrationError> {
    if archive.len() < MIN_CALIBRATION_VIEWS {
        return Err(CalibrationError::InsufficientViews {
            required: MIN_CALIBRATION_VIEWS,
            actual: archive.len(),
        });
    }
    for (idx, view) in archive.views().iter().enumerate() {
        if view.world_points.len() != view.image_points.len() {
            return Err(CalibrationError::MismatchedPoints {
                view: idx + 1,
                expected: view.world_points.len(),
                actual: view.image_points.len(),
            });
        }
    }

    let mut cost = PlanarCalibrationCost::new(resolution, archive.views());
    cost.linear_estimation().map_err(|e| CalibrationError::Degenerate(e.to_string()))?;
    debug!("Linear estimate: {:?}", cost.model());

    cost.optimize(log::log_enabled!(log::Level::Debug))
        .map_err(|e| match e {
            CameraModelError::InvalidParams(msg) => CalibrationError::Degenerate(msg),
            other => CalibrationError::OptimizationFailure(other.to_string()),
        })?;

    let errors = ProjectionError::from_distances(&cost.reprojection_distances())
        .ok_or_else(|| CalibrationError::Degenerate("no points to evaluate".to_string()))?;
    let result = CalibrationResult {
        model: cost.model().clone(),
        rms: errors.rmse,
        errors,
        poses: cost.poses().to_vec(),
    };

    let k = result.model.intrinsics.matrix();
    info!("RMS re-projection error: {:.6}", result.rms);
    info!("Camera matrix:");
    for r in 0..3 {
        info!("  [{:.4}, {:.4}, {:.4}]", k[(r, 0)], k[(r, 1)], k[(r, 2)]);
    }
    info!("Distortion coefficients: {:?}", result.model.distortions);

    Ok(result)
}

/// Calibrates, then rewrites `store` with the camera matrix followed by the
/// distortion coefficients.
pub fn calibrate_and_store(
    archive: &CorrespondenceArchive,
    resolution: Resolution,
    store: &ParameterStore,
) -> Result<CalibrationResult, CalibrationError> {
    let result = calibrate(archive, resolution)?;
    store.save_model(&result.model)?;
    info!("Parameters written to {}", store.path().display());
    Ok(result)
}
