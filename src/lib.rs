//! Calibration and augmented-reality overlays for a planar chessboard target.
//!
//! The pipeline runs in three steps:
//! - detect the target in frames and archive correspondences
//!   ([`detection`], [`correspondence`])
//! - calibrate a radial-tangential pinhole camera from the archive and
//!   persist it ([`calibration`], [`store`])
//! - estimate the pose of every frame and draw axes, a pyramid or a mesh on
//!   top of the target ([`pose`], [`overlay`], [`mesh`])
//!
//! [`harris`] is an independent corner-response visualization and
//! [`session`] ties everything to a frame loop driven by key commands.
//! Nonlinear fits use the tiny-solver Levenberg-Marquardt optimizer.

pub mod calibration;
pub mod camera;
pub mod config;
pub mod correspondence;
pub mod detection;
pub mod geometry;
pub mod harris;
pub mod mesh;
pub mod optimization;
pub mod overlay;
pub mod pose;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use calibration::{calibrate, calibrate_and_store, CalibrationError, CalibrationResult};
pub use camera::{CameraModelError, Intrinsics, RadTanModel, Resolution};
pub use config::SessionConfig;
pub use correspondence::{CorrespondenceArchive, CorrespondenceSet};
pub use geometry::{PatternSize, Pose};
pub use mesh::Mesh;
pub use pose::estimate_pose;
pub use session::{Command, Session, Stage, Status};
pub use store::ParameterStore;
