//! Per-frame camera pose relative to the planar target.
//!
//! Every call is independent: the pose is solved from scratch from one
//! frame's corners and the stored camera, never seeded from an earlier frame.

use log::info;
use nalgebra::Vector2;

use crate::camera::{CameraModelError, RadTanModel};
use crate::geometry::{planar_grid, PatternSize, Pose};
use crate::optimization::{Optimizer, PoseOptimizationCost};

#[derive(thiserror::Error, Debug)]
pub enum PoseError {
    #[error("Expected {expected} image points, got {actual}")]
    PointCountMismatch { expected: usize, actual: usize },
    #[error("Degenerate point configuration: {0}")]
    Degenerate(String),
    #[error("Pose optimization failed: {0}")]
    OptimizationFailure(String),
}

/// Solves the pose of the target in the camera frame from one detection.
///
/// # Errors
///
/// [`PoseError::PointCountMismatch`] unless exactly `rows x cols` points are
/// given, [`PoseError::Degenerate`] when no initial pose can be formed and
/// [`PoseError::OptimizationFailure`] when refinement fails.
pub fn estimate_pose(
    image_points: &[Vector2<f64>],
    pattern: PatternSize,
    model: &RadTanModel,
) -> Result<Pose, PoseError> {
    let expected = pattern.corner_count();
    if image_points.len() != expected {
        return Err(PoseError::PointCountMismatch {
            expected,
            actual: image_points.len(),
        });
    }

    let mut cost =
        PoseOptimizationCost::new(model.clone(), planar_grid(pattern), image_points.to_vec());
    cost.linear_estimation().map_err(|e| PoseError::Degenerate(e.to_string()))?;
    cost.optimize(false).map_err(|e| match e {
        CameraModelError::InvalidParams(msg) => PoseError::Degenerate(msg),
        other => PoseError::OptimizationFailure(other.to_string()),
    })?;

    let pose = cost
        .pose()
        .cloned()
        .ok_or_else(|| PoseError::OptimizationFailure("no pose produced".to_string()))?;
    info!("Rotation vector: {:?}", pose.rotation.as_slice());
    info!("Translation vector: {:?}", pose.translation.as_slice());
    Ok(pose)
}
