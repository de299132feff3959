//! Shared geometry: the pattern layout, the canonical world grid, camera
//! poses in Rodrigues form and planar homographies.

use nalgebra::{DMatrix, DVector, Matrix3, Rotation3, UnitQuaternion, Vector2, Vector3};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum GeometryError {
    #[error("Homography estimation needs at least 4 paired points, got {0}")]
    NotEnoughPoints(usize),
    #[error("Mismatched point counts: {0} source vs {1} destination")]
    MismatchedPoints(usize, usize),
    #[error("Degenerate configuration: {0}")]
    Degenerate(String),
}

/// Inner-corner layout of the planar target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternSize {
    pub rows: usize,
    pub cols: usize,
}

impl PatternSize {
    pub fn new(rows: usize, cols: usize) -> Self {
        PatternSize { rows, cols }
    }

    /// Number of inner corners, the exact point count every correspondence
    /// set must carry.
    pub fn corner_count(&self) -> usize {
        self.rows * self.cols
    }
}

impl Default for PatternSize {
    fn default() -> Self {
        PatternSize { rows: 6, cols: 9 }
    }
}

/// Generates the canonical world grid for a pattern.
///
/// Row-major: row `i` sits at `Y = -i`, column `j` at `X = j`, all on the
/// `Z = 0` plane, one unit per square.
pub fn planar_grid(pattern: PatternSize) -> Vec<Vector3<f64>> {
    let mut points = Vec::with_capacity(pattern.corner_count());
    for i in 0..pattern.rows {
        for j in 0..pattern.cols {
            points.push(Vector3::new(j as f64, -(i as f64), 0.0));
        }
    }
    points
}

/// Extrinsic pose mapping world coordinates into the camera frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Rodrigues rotation vector (axis scaled by angle in radians).
    pub rotation: Vector3<f64>,
    pub translation: Vector3<f64>,
}

impl Pose {
    pub fn new(rotation: Vector3<f64>, translation: Vector3<f64>) -> Self {
        Pose {
            rotation,
            translation,
        }
    }

    /// Builds a pose from an orthonormal rotation matrix.
    ///
    /// Goes through a quaternion: the axis of a half-turn cannot be read from
    /// the matrix's skew part.
    pub fn from_rotation_matrix(rotation: &Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let rotation = Rotation3::from_matrix_unchecked(*rotation);
        let rotation = UnitQuaternion::from_rotation_matrix(&rotation).scaled_axis();
        Pose {
            rotation,
            translation,
        }
    }

    pub fn rotation_matrix(&self) -> Rotation3<f64> {
        Rotation3::new(self.rotation)
    }

    /// World point to camera frame.
    pub fn transform(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation_matrix() * point + self.translation
    }

    /// `[rx, ry, rz, tx, ty, tz]`, the solver's parameter block layout.
    pub fn to_params(&self) -> DVector<f64> {
        DVector::from_vec(vec![
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
            self.translation.x,
            self.translation.y,
            self.translation.z,
        ])
    }

    pub fn from_params(params: &DVector<f64>) -> Self {
        Pose {
            rotation: Vector3::new(params[0], params[1], params[2]),
            translation: Vector3::new(params[3], params[4], params[5]),
        }
    }
}

/// Estimates the homography `dst ~ H * src` with the normalized DLT.
///
/// # Errors
///
/// * [`GeometryError::MismatchedPoints`] if the slices differ in length.
/// * [`GeometryError::NotEnoughPoints`] below four correspondences.
/// * [`GeometryError::Degenerate`] if the SVD fails or the points collapse.
pub fn estimate_homography(
    src: &[Vector2<f64>],
    dst: &[Vector2<f64>],
) -> Result<Matrix3<f64>, GeometryError> {
    if src.len() != dst.len() {
        return Err(GeometryError::MismatchedPoints(src.len(), dst.len()));
    }
    if src.len() < 4 {
        return Err(GeometryError::NotEnoughPoints(src.len()));
    }

    let (src_n, ts) = normalize_points_hartley(src)?;
    let (dst_n, td) = normalize_points_hartley(dst)?;

    let n = src.len();
    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for i in 0..n {
        let x = src_n[i].x;
        let y = src_n[i].y;
        let u = dst_n[i].x;
        let v = dst_n[i].y;
        let r0 = 2 * i;
        let r1 = r0 + 1;
        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    // Square system for the nullspace: A^T A keeps the SVD at 9x9 whatever
    // the number of points.
    let ata = a.transpose() * &a;
    let svd = ata.svd(false, true);
    let vt = svd
        .v_t
        .ok_or_else(|| GeometryError::Degenerate("SVD failed in homography".to_string()))?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |acc, (i, &s)| if s < acc.1 { (i, s) } else { acc });
    let h = vt.row(min_idx);
    let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let td_inv = td
        .try_inverse()
        .ok_or_else(|| GeometryError::Degenerate("normalization not invertible".to_string()))?;
    let mut denormalized = td_inv * hn * ts;
    if denormalized[(2, 2)].abs() > 1e-12 {
        denormalized /= denormalized[(2, 2)];
    }
    Ok(denormalized)
}

/// Recovers a pose from a homography mapping plane coordinates `(X, Y, 1)`
/// to normalized camera coordinates `(x, y, 1)`.
///
/// The sign is chosen so the target lies in front of the camera and the
/// rotation is projected back onto SO(3).
pub fn pose_from_homography(h: &Matrix3<f64>) -> Result<Pose, GeometryError> {
    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();

    let norm = (h1.norm() + h2.norm()) / 2.0;
    if norm < 1e-12 {
        return Err(GeometryError::Degenerate(
            "homography has vanishing plane axes".to_string(),
        ));
    }
    let mut scale = 1.0 / norm;
    if h3.z * scale < 0.0 {
        scale = -scale;
    }

    let r1 = h1 * scale;
    let r2 = h2 * scale;
    let r3 = r1.cross(&r2);
    let t = h3 * scale;

    let r = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = r.svd(true, true);
    let u = svd
        .u
        .ok_or_else(|| GeometryError::Degenerate("SVD U missing".to_string()))?;
    let vt = svd
        .v_t
        .ok_or_else(|| GeometryError::Degenerate("SVD V^T missing".to_string()))?;
    let mut rotation = u * vt;
    if rotation.determinant() < 0.0 {
        let flip = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, -1.0));
        rotation = u * flip * vt;
    }

    Ok(Pose::from_rotation_matrix(&rotation, t))
}

/// Hartley normalization: centroid at the origin, mean distance sqrt(2).
fn normalize_points_hartley(
    points: &[Vector2<f64>],
) -> Result<(Vec<Vector2<f64>>, Matrix3<f64>), GeometryError> {
    if points.is_empty() {
        return Err(GeometryError::NotEnoughPoints(0));
    }

    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.x).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.y).sum::<f64>() / n;

    let mean_dist = points
        .iter()
        .map(|p| ((p.x - mean_x).powi(2) + (p.y - mean_y).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    if mean_dist < 1e-15 {
        return Err(GeometryError::Degenerate(
            "all points coincide".to_string(),
        ));
    }
    let scale = std::f64::consts::SQRT_2 / mean_dist;

    let normalized = points
        .iter()
        .map(|p| Vector2::new((p.x - mean_x) * scale, (p.y - mean_y) * scale))
        .collect();

    let t = Matrix3::new(
        scale,
        0.0,
        -mean_x * scale,
        0.0,
        scale,
        -mean_y * scale,
        0.0,
        0.0,
        1.0,
    );

    Ok((normalized, t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_planar_grid_is_row_major_with_descending_rows() {
        let grid = planar_grid(PatternSize::new(6, 9));
        assert_eq!(grid.len(), 54);
        assert_eq!(grid[0], Vector3::new(0.0, 0.0, 0.0));
        assert_eq!(grid[8], Vector3::new(8.0, 0.0, 0.0));
        assert_eq!(grid[9], Vector3::new(0.0, -1.0, 0.0));
        assert_eq!(grid[53], Vector3::new(8.0, -5.0, 0.0));
        for (idx, p) in grid.iter().enumerate() {
            assert_eq!(p.x, (idx % 9) as f64);
            assert_eq!(p.y, -((idx / 9) as f64));
            assert_eq!(p.z, 0.0);
        }
        // Deterministic across calls.
        assert_eq!(grid, planar_grid(PatternSize::new(6, 9)));
    }

    #[test]
    fn test_pose_params_round_trip() {
        let pose = Pose::new(Vector3::new(0.1, -0.2, 0.3), Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(Pose::from_params(&pose.to_params()), pose);
    }

    #[test]
    fn test_pose_serializes_as_flat_vectors() {
        let pose = Pose::new(Vector3::new(0.1, -0.2, 0.3), Vector3::new(1.0, 2.0, 3.0));
        let json = serde_json::to_value(&pose).unwrap();
        assert_eq!(json["rotation"][2], 0.3);
        assert_eq!(json["translation"][0], 1.0);
        assert_eq!(serde_json::from_value::<Pose>(json).unwrap(), pose);

        let yaml = serde_yaml::to_string(&pose).unwrap();
        assert_eq!(serde_yaml::from_str::<Pose>(&yaml).unwrap(), pose);
    }

    #[test]
    fn test_pose_rotation_matrix_round_trip() {
        let pose = Pose::new(Vector3::new(0.4, 0.1, -0.7), Vector3::new(0.0, 0.0, 5.0));
        let r = pose.rotation_matrix().into_inner();
        let back = Pose::from_rotation_matrix(&r, pose.translation);
        assert_relative_eq!(back.rotation, pose.rotation, epsilon = 1e-12);
    }

    #[test]
    fn test_half_turn_keeps_its_axis() {
        // Board facing the camera: world Y up, camera Y down.
        let flip = Matrix3::from_diagonal(&Vector3::new(1.0, -1.0, -1.0));
        let pose = Pose::from_rotation_matrix(&flip, Vector3::zeros());
        assert_relative_eq!(pose.rotation.norm(), std::f64::consts::PI, epsilon = 1e-12);
        assert_relative_eq!(pose.rotation_matrix().into_inner(), flip, epsilon = 1e-12);
    }

    #[test]
    fn test_homography_recovers_pose() {
        let pose = Pose::new(Vector3::new(0.2, -0.3, 0.1), Vector3::new(-3.0, 2.0, 15.0));
        let grid = planar_grid(PatternSize::new(6, 9));
        let src: Vec<Vector2<f64>> = grid.iter().map(|p| Vector2::new(p.x, p.y)).collect();
        let dst: Vec<Vector2<f64>> = grid
            .iter()
            .map(|p| {
                let pc = pose.transform(p);
                Vector2::new(pc.x / pc.z, pc.y / pc.z)
            })
            .collect();

        let h = estimate_homography(&src, &dst).unwrap();
        let recovered = pose_from_homography(&h).unwrap();
        assert_relative_eq!(recovered.rotation, pose.rotation, epsilon = 1e-8);
        assert_relative_eq!(recovered.translation, pose.translation, epsilon = 1e-6);
    }

    #[test]
    fn test_homography_needs_four_points() {
        let pts = vec![Vector2::new(0.0, 0.0); 3];
        assert!(matches!(
            estimate_homography(&pts, &pts),
            Err(GeometryError::NotEnoughPoints(3))
        ));
    }
}
