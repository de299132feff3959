//! Implements the Radial-Tangential (RadTan) camera model.
//!
//! This is the lens model the calibration estimates and the overlay path
//! projects through: a pinhole camera whose normalized image coordinates are
//! bent by two radial terms, two tangential terms and one extra radial term.

use crate::camera::{validation, CameraModelError, Intrinsics, Resolution};
use nalgebra::{DMatrix, DVector, Matrix2, Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;

/// Number of distortion coefficients carried by the model.
pub const DISTORTION_LEN: usize = 5;

/// Represents a Radial-Tangential (RadTan) camera model.
///
/// The distortion coefficients are stored as `[k1, k2, p1, p2, k3]`:
/// *   `k1`, `k2`, `k3`: Radial distortion coefficients.
/// *   `p1`, `p2`: Tangential distortion coefficients.
///
/// # Examples
///
/// ```rust
/// use nalgebra::DVector;
/// use calib_ar::camera::rad_tan::RadTanModel;
/// use calib_ar::camera::Resolution;
///
/// // Parameters: fx, fy, cx, cy, k1, k2, p1, p2, k3
/// let params = DVector::from_vec(vec![
///     500.0, 500.0, 320.0, 240.0, // Intrinsics
///     0.1, -0.05, 0.001, 0.001, 0.02 // Distortion (k1, k2, p1, p2, k3)
/// ]);
/// let mut rad_tan_model = RadTanModel::new(&params).unwrap();
/// rad_tan_model.resolution = Resolution { width: 640, height: 480 };
///
/// assert_eq!(rad_tan_model.intrinsics.fx, 500.0);
/// assert_eq!(rad_tan_model.distortions[0], 0.1); // k1
/// ```
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct RadTanModel {
    /// The intrinsic parameters of the camera, [`Intrinsics`] (fx, fy, cx, cy).
    pub intrinsics: Intrinsics,
    /// The resolution of the images the model was calibrated on.
    pub resolution: Resolution,
    /// Distortion coefficients `[k1, k2, p1, p2, k3]`.
    pub distortions: [f64; DISTORTION_LEN],
}

impl RadTanModel {
    /// Creates a new [`RadTanModel`] from a vector of parameters.
    ///
    /// The resolution is initialized to 0x0 and should be set manually.
    ///
    /// # Arguments
    ///
    /// * `parameters` - A `&DVector<f64>` containing the camera parameters in the order:
    ///   `fx`, `fy`, `cx`, `cy`, `k1`, `k2`, `p1`, `p2`, `k3`.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::InvalidParams`] if fewer than nine values are given.
    /// * [`CameraModelError::FocalLengthMustBePositive`]
    /// * [`CameraModelError::PrincipalPointMustBeFinite`]
    pub fn new(parameters: &DVector<f64>) -> Result<Self, CameraModelError> {
        if parameters.len() < 4 + DISTORTION_LEN {
            return Err(CameraModelError::InvalidParams(format!(
                "RadTan model requires 9 parameters, got {}",
                parameters.len()
            )));
        }
        let model = RadTanModel {
            intrinsics: Intrinsics {
                fx: parameters[0],
                fy: parameters[1],
                cx: parameters[2],
                cy: parameters[3],
            },
            resolution: Resolution {
                width: 0,
                height: 0,
            },
            distortions: [
                parameters[4], // k1
                parameters[5], // k2
                parameters[6], // p1
                parameters[7], // p2
                parameters[8], // k3
            ],
        };

        model.validate_params()?;
        Ok(model)
    }

    /// Builds a model from a flattened camera matrix and a distortion vector,
    /// the shape in which parameters are persisted.
    ///
    /// # Errors
    ///
    /// [`CameraModelError::InvalidParams`] when the matrix does not have nine
    /// values or the distortion vector does not have five, plus the usual
    /// intrinsic validation errors.
    pub fn from_parameters(
        camera_matrix: &[f64],
        distortion: &[f64],
        resolution: Resolution,
    ) -> Result<Self, CameraModelError> {
        if camera_matrix.len() != 9 {
            return Err(CameraModelError::InvalidParams(format!(
                "camera matrix requires 9 values, got {}",
                camera_matrix.len()
            )));
        }
        if distortion.len() != DISTORTION_LEN {
            return Err(CameraModelError::InvalidParams(format!(
                "RadTan model requires 5 distortion parameters, got {}",
                distortion.len()
            )));
        }
        let k = Matrix3::from_row_slice(camera_matrix);
        let mut distortions = [0.0; DISTORTION_LEN];
        distortions.copy_from_slice(distortion);

        let model = RadTanModel {
            intrinsics: Intrinsics::from_matrix(&k),
            resolution,
            distortions,
        };
        model.validate_params()?;
        Ok(model)
    }

    /// The 3x3 intrinsic matrix as a dynamically sized matrix, ready for the
    /// parameter store.
    pub fn camera_matrix(&self) -> DMatrix<f64> {
        let k = self.intrinsics.matrix();
        DMatrix::from_fn(3, 3, |r, c| k[(r, c)])
    }

    /// The distortion coefficients as a 1x5 row matrix.
    pub fn distortion_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_row_slice(1, DISTORTION_LEN, &self.distortions)
    }

    /// Applies radial and tangential distortion to a normalized image point.
    pub fn distort(&self, x_prime: f64, y_prime: f64) -> Vector2<f64> {
        let [k1, k2, p1, p2, k3] = self.distortions;

        let r2 = x_prime * x_prime + y_prime * y_prime;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + k1 * r2 + k2 * r4 + k3 * r6;

        let x_distorted =
            x_prime * radial + 2.0 * p1 * x_prime * y_prime + p2 * (r2 + 2.0 * x_prime * x_prime);
        let y_distorted =
            y_prime * radial + p1 * (r2 + 2.0 * y_prime * y_prime) + 2.0 * p2 * x_prime * y_prime;

        Vector2::new(x_distorted, y_distorted)
    }

    /// Projects a point given in the camera frame to pixel coordinates.
    ///
    /// Points are never rejected: overlays must keep one output per input, so
    /// a point on the camera plane is projected with unit depth and points
    /// outside the image are returned as-is.
    pub fn project_camera_point(&self, point_3d: &Vector3<f64>) -> Vector2<f64> {
        let inv_z = if point_3d.z.abs() > f64::EPSILON {
            1.0 / point_3d.z
        } else {
            1.0
        };
        let distorted = self.distort(point_3d.x * inv_z, point_3d.y * inv_z);

        Vector2::new(
            self.intrinsics.fx * distorted.x + self.intrinsics.cx,
            self.intrinsics.fy * distorted.y + self.intrinsics.cy,
        )
    }

    /// Maps a distorted pixel back to undistorted normalized coordinates.
    ///
    /// Newton iterations on the distortion Jacobian, starting from the
    /// distorted normalized point.
    ///
    /// # Errors
    ///
    /// [`CameraModelError::NumericalError`] if the Jacobian becomes singular or
    /// the iteration does not converge.
    pub fn undistort_normalized(
        &self,
        point_2d: &Vector2<f64>,
    ) -> Result<Vector2<f64>, CameraModelError> {
        let [k1, k2, p1, p2, k3] = self.distortions;

        let target = Vector2::new(
            (point_2d.x - self.intrinsics.cx) / self.intrinsics.fx,
            (point_2d.y - self.intrinsics.cy) / self.intrinsics.fy,
        );

        if self.distortions.iter().all(|d| *d == 0.0) {
            return Ok(target);
        }

        let mut point = target;

        const EPS: f64 = 1e-6;
        const MAX_ITERATIONS: u32 = 100;

        for iteration in 0..MAX_ITERATIONS {
            let x = point.x;
            let y = point.y;
            let r2 = x * x + y * y;
            let r4 = r2 * r2;

            let radial_distortion = 1.0 + k1 * r2 + k2 * r4 + k3 * r4 * r2;
            let error = self.distort(x, y) - target;

            if error.norm() < EPS {
                break;
            }

            // d(radial)/dx = (k1 + 2 k2 r^2 + 3 k3 r^4) * 2x
            let dr_dx = 2.0 * x;
            let dr_dy = 2.0 * y;
            let d_radial_term_dx = (k1 + 2.0 * k2 * r2 + 3.0 * k3 * r4) * dr_dx;
            let d_radial_term_dy = (k1 + 2.0 * k2 * r2 + 3.0 * k3 * r4) * dr_dy;

            let j00 =
                radial_distortion + x * d_radial_term_dx + 2.0 * p1 * y + p2 * (dr_dx + 4.0 * x);
            let j01 = x * d_radial_term_dy + 2.0 * p1 * x + p2 * dr_dy;
            let j10 = y * d_radial_term_dx + p1 * dr_dx + 2.0 * p2 * y;
            let j11 =
                radial_distortion + y * d_radial_term_dy + p1 * (dr_dy + 4.0 * y) + 2.0 * p2 * x;

            let jacobian = Matrix2::new(j00, j01, j10, j11);

            let Some(inv_jacobian) = jacobian.try_inverse() else {
                return Err(CameraModelError::NumericalError(
                    "Jacobian is singular".to_string(),
                ));
            };
            let delta = inv_jacobian * error;
            point -= delta;

            if delta.norm() < EPS {
                break;
            }

            if iteration == MAX_ITERATIONS - 1 {
                return Err(CameraModelError::NumericalError(format!(
                    "Undistortion did not converge after {} iterations.",
                    MAX_ITERATIONS
                )));
            }
        }

        Ok(point)
    }

    /// Loads a model from a Kalibr-style `cam0` YAML document.
    pub fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        let contents = fs::read_to_string(path)?;
        let doc: KalibrDocument = serde_yaml::from_str(&contents)?;
        let cam = doc.cam0;

        if cam.intrinsics.len() != 4 {
            return Err(CameraModelError::InvalidParams("Invalid intrinsics".to_string()));
        }
        if cam.resolution.len() != 2 {
            return Err(CameraModelError::InvalidParams("Invalid resolution".to_string()));
        }
        let mut params = cam.intrinsics.clone();
        params.extend_from_slice(&cam.distortion);
        if params.len() != 4 + DISTORTION_LEN {
            return Err(CameraModelError::InvalidParams(
                "Missing distortion parameters".to_string(),
            ));
        }

        let mut model = RadTanModel::new(&DVector::from_vec(params))?;
        model.resolution = Resolution {
            width: cam.resolution[0],
            height: cam.resolution[1],
        };
        Ok(model)
    }

    /// Writes the model as a Kalibr-style `cam0` YAML document.
    pub fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError> {
        let doc = KalibrDocument {
            cam0: KalibrCamera {
                camera_model: "pinhole".to_string(),
                distortion_model: "radtan".to_string(),
                intrinsics: vec![
                    self.intrinsics.fx,
                    self.intrinsics.fy,
                    self.intrinsics.cx,
                    self.intrinsics.cy,
                ],
                distortion: self.distortions.to_vec(),
                resolution: vec![self.resolution.width, self.resolution.height],
            },
        };
        let yaml = serde_yaml::to_string(&doc)?;
        fs::write(path, yaml)?;
        Ok(())
    }

    /// Validates the intrinsic parameters and that every coefficient is finite.
    pub fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_intrinsics(&self.intrinsics)?;
        if self.distortions.iter().any(|d| !d.is_finite()) {
            return Err(CameraModelError::InvalidParams(
                "distortion coefficients must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct KalibrDocument {
    cam0: KalibrCamera,
}

#[derive(Serialize, Deserialize)]
struct KalibrCamera {
    camera_model: String,
    distortion_model: String,
    intrinsics: Vec<f64>,
    #[serde(alias = "distortion_coeffs")]
    distortion: Vec<f64>,
    resolution: Vec<u32>,
}

/// Provides a debug string representation for [`RadTanModel`].
impl fmt::Debug for RadTanModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RadTanModel [fx: {} fy: {} cx: {} cy: {} distortions: {:?}]",
            self.intrinsics.fx,
            self.intrinsics.fy,
            self.intrinsics.cx,
            self.intrinsics.cy,
            self.distortions,
        )
    }
}
