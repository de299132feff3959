//! Explicit pipeline state for an interactive calibration and AR session.
//!
//! A [`Session`] owns everything the frame loop needs between frames: the
//! correspondence archive, the latest detection, the pipeline [`Stage`] and
//! the active overlays. The caller feeds frames through
//! [`Session::process_frame`] and user commands through [`Session::handle`].
//! Recoverable failures come back as a [`Status`]; only files that cannot be
//! opened surface as [`SessionError`].

use std::fmt;

use image::{GrayImage, RgbImage};
use log::{info, warn};

use crate::calibration::{calibrate_and_store, CalibrationError, MIN_CALIBRATION_VIEWS};
use crate::camera::{RadTanModel, Resolution};
use crate::config::SessionConfig;
use crate::correspondence::CorrespondenceArchive;
use crate::detection::{detect, Detection};
use crate::geometry::Pose;
use crate::harris::{self, HarrisError};
use crate::mesh::{Mesh, MeshError};
use crate::overlay::{draw_axes, draw_mesh, draw_wireframe};
use crate::pose::{estimate_pose, PoseError};
use crate::store::{ParameterStore, StoreError};

/// Errors that end the session: a required file could not be opened, or the
/// configured Harris parameters are unusable.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Mesh(MeshError),
    #[error(transparent)]
    Harris(#[from] HarrisError),
}

/// Where the pipeline is. Stages only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Idle,
    Calibrated,
    PoseReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlay {
    Axes,
    Wireframe,
    Mesh,
    Harris,
}

impl fmt::Display for Overlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Overlay::Axes => "3D axes",
            Overlay::Wireframe => "virtual object",
            Overlay::Mesh => "mesh object",
            Overlay::Harris => "Harris corners",
        };
        f.write_str(name)
    }
}

/// Independently toggled overlays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlaySet {
    pub axes: bool,
    pub wireframe: bool,
    pub mesh: bool,
    pub harris: bool,
}

impl OverlaySet {
    pub fn is_active(&self, overlay: Overlay) -> bool {
        match overlay {
            Overlay::Axes => self.axes,
            Overlay::Wireframe => self.wireframe,
            Overlay::Mesh => self.mesh,
            Overlay::Harris => self.harris,
        }
    }

    fn flip(&mut self, overlay: Overlay) -> bool {
        let slot = match overlay {
            Overlay::Axes => &mut self.axes,
            Overlay::Wireframe => &mut self.wireframe,
            Overlay::Mesh => &mut self.mesh,
            Overlay::Harris => &mut self.harris,
        };
        *slot = !*slot;
        *slot
    }

    /// Whether any overlay needs a per-frame pose.
    pub fn needs_pose(&self) -> bool {
        self.axes || self.wireframe || self.mesh
    }
}

/// Discrete user commands, one per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Capture,
    Calibrate,
    ComputePose,
    ToggleAxes,
    ToggleWireframe,
    ToggleMesh,
    ToggleHarris,
    Quit,
}

impl Command {
    pub const ALL: [Command; 8] = [
        Command::Capture,
        Command::Calibrate,
        Command::ComputePose,
        Command::ToggleAxes,
        Command::ToggleWireframe,
        Command::ToggleMesh,
        Command::ToggleHarris,
        Command::Quit,
    ];

    pub fn from_key(key: char) -> Option<Command> {
        Command::ALL.into_iter().find(|c| c.key() == key)
    }

    pub fn key(&self) -> char {
        match self {
            Command::Capture => 's',
            Command::Calibrate => 'c',
            Command::ComputePose => 'p',
            Command::ToggleAxes => 'a',
            Command::ToggleWireframe => 'v',
            Command::ToggleMesh => 'o',
            Command::ToggleHarris => 'h',
            Command::Quit => 'q',
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Command::Capture => "store the current frame as a calibration view",
            Command::Calibrate => "calibrate the camera (needs at least 5 views)",
            Command::ComputePose => "compute the camera pose (needs calibration)",
            Command::ToggleAxes => "toggle the 3D axes",
            Command::ToggleWireframe => "toggle the virtual object",
            Command::ToggleMesh => "toggle the mesh object",
            Command::ToggleHarris => "toggle Harris corners",
            Command::Quit => "quit",
        }
    }
}

/// User-facing outcome of a command. None of these stop the frame loop
/// except [`Status::Quit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    Captured { index: usize },
    /// The current frame has no complete pattern.
    DetectionMiss,
    InsufficientData { required: usize, actual: usize },
    Calibrated { rms: f64 },
    NotCalibrated,
    PoseReady { pose: Option<Pose> },
    PoseRequired,
    OverlayToggled { overlay: Overlay, active: bool },
    InvalidParameters(String),
    OptimizationFailure(String),
    MalformedInput(String),
    Quit,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Captured { index } => write!(f, "Frame {index} captured"),
            Status::DetectionMiss => write!(f, "No complete pattern in the current frame"),
            Status::InsufficientData { required, actual } => write!(
                f,
                "Not enough calibration images, at least {required} needed. \
                 Current # of images: {actual}"
            ),
            Status::Calibrated { rms } => write!(f, "Calibrated, RMS re-projection error {rms:.6}"),
            Status::NotCalibrated => {
                write!(f, "Camera is not calibrated, press 'c' to calibrate the camera")
            }
            Status::PoseReady { pose: Some(pose) } => write!(
                f,
                "Pose computed: rotation {:?}, translation {:?}",
                pose.rotation.as_slice(),
                pose.translation.as_slice()
            ),
            Status::PoseReady { pose: None } => {
                write!(f, "Parameters loaded, pose follows the next detection")
            }
            Status::PoseRequired => write!(f, "Pose is not calculated, press 'p' to calculate"),
            Status::OverlayToggled { overlay, active } => {
                write!(f, "{overlay} {}", if *active { "on" } else { "off" })
            }
            Status::InvalidParameters(msg) => write!(f, "Unusable parameter file: {msg}"),
            Status::OptimizationFailure(msg) => write!(f, "Optimization failed: {msg}"),
            Status::MalformedInput(msg) => write!(f, "Malformed mesh: {msg}"),
            Status::Quit => write!(f, "Bye"),
        }
    }
}

/// Everything rendered for one frame. Each overlay gets its own copy of the
/// frame; absent overlays were inactive or skipped for this frame.
#[derive(Debug, Clone)]
pub struct FrameOutput {
    pub detection: RgbImage,
    pub found: bool,
    pub pose: Option<Pose>,
    pub axes: Option<RgbImage>,
    pub wireframe: Option<RgbImage>,
    pub mesh: Option<RgbImage>,
    pub harris: Option<GrayImage>,
}

pub struct Session {
    config: SessionConfig,
    store: ParameterStore,
    archive: CorrespondenceArchive,
    latest: Option<Detection>,
    resolution: Option<Resolution>,
    stage: Stage,
    overlays: OverlaySet,
    mesh: Option<Mesh>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Session {
            store: ParameterStore::new(&config.parameters_path),
            archive: CorrespondenceArchive::new(config.pattern),
            latest: None,
            resolution: None,
            stage: Stage::Idle,
            overlays: OverlaySet::default(),
            mesh: None,
            config,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn overlays(&self) -> OverlaySet {
        self.overlays
    }

    pub fn archive(&self) -> &CorrespondenceArchive {
        &self.archive
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Detects the pattern in `frame` and renders every active overlay.
    ///
    /// Pose overlays reload the parameter file and solve the pose from this
    /// frame alone; they are skipped when the frame lacks a complete pattern.
    pub fn process_frame(&mut self, frame: &RgbImage) -> Result<FrameOutput, SessionError> {
        let resolution = Resolution {
            width: frame.width(),
            height: frame.height(),
        };
        self.resolution = Some(resolution);

        let detection = detect(
            frame,
            self.config.pattern,
            &self.config.detector,
            &self.config.subpix,
        );
        let mut output = FrameOutput {
            detection: detection.overlay.clone(),
            found: detection.found,
            pose: None,
            axes: None,
            wireframe: None,
            mesh: None,
            harris: None,
        };

        if self.overlays.harris {
            let gray = image::imageops::grayscale(frame);
            output.harris = Some(harris::score(&gray, &self.config.harris)?.image);
        }

        let complete = detection.image_points.len() == self.config.pattern.corner_count();
        if self.stage == Stage::PoseReady && self.overlays.needs_pose() && complete {
            if let Some(model) = self.load_model(resolution)? {
                match estimate_pose(&detection.image_points, self.config.pattern, &model) {
                    Ok(pose) => {
                        self.draw_pose_overlays(frame, &pose, &model, &mut output);
                        output.pose = Some(pose);
                    }
                    Err(e) => warn!("Skipping overlays for this frame: {e}"),
                }
            }
        }

        self.latest = Some(detection);
        Ok(output)
    }

    fn draw_pose_overlays(
        &self,
        frame: &RgbImage,
        pose: &Pose,
        model: &RadTanModel,
        output: &mut FrameOutput,
    ) {
        if self.overlays.axes {
            let mut image = frame.clone();
            draw_axes(&mut image, pose, model);
            output.axes = Some(image);
        }
        if self.overlays.wireframe {
            let mut image = frame.clone();
            draw_wireframe(&mut image, pose, model);
            output.wireframe = Some(image);
        }
        if let (true, Some(mesh)) = (self.overlays.mesh, &self.mesh) {
            let mut image = frame.clone();
            draw_mesh(&mut image, mesh, pose, model);
            output.mesh = Some(image);
        }
    }

    /// Applies one user command.
    pub fn handle(&mut self, command: Command) -> Result<Status, SessionError> {
        let status = match command {
            Command::Capture => self.capture(),
            Command::Calibrate => self.calibrate()?,
            Command::ComputePose => self.compute_pose()?,
            Command::ToggleAxes => self.toggle_pose_overlay(Overlay::Axes),
            Command::ToggleWireframe => self.toggle_pose_overlay(Overlay::Wireframe),
            Command::ToggleMesh => self.toggle_mesh()?,
            Command::ToggleHarris => Status::OverlayToggled {
                overlay: Overlay::Harris,
                active: self.overlays.flip(Overlay::Harris),
            },
            Command::Quit => Status::Quit,
        };
        match &status {
            Status::Captured { .. } | Status::Calibrated { .. } | Status::PoseReady { .. } => {
                info!("{status}")
            }
            Status::OverlayToggled { .. } | Status::Quit => {}
            _ => warn!("{status}"),
        }
        Ok(status)
    }

    /// Only the current frame's detection is archived; a frame without the
    /// full pattern leaves the archive untouched.
    fn capture(&mut self) -> Status {
        let Some(detection) = self.latest.as_ref().filter(|d| d.found) else {
            return Status::DetectionMiss;
        };
        match self.archive.capture(&detection.image_points) {
            Some(index) => Status::Captured { index },
            None => Status::DetectionMiss,
        }
    }

    fn calibrate(&mut self) -> Result<Status, SessionError> {
        let insufficient = Status::InsufficientData {
            required: MIN_CALIBRATION_VIEWS,
            actual: self.archive.len(),
        };
        if self.archive.len() < MIN_CALIBRATION_VIEWS {
            return Ok(insufficient);
        }
        let Some(resolution) = self.resolution else {
            return Ok(insufficient);
        };

        match calibrate_and_store(&self.archive, resolution, &self.store) {
            Ok(result) => {
                self.stage = self.stage.max(Stage::Calibrated);
                Ok(Status::Calibrated { rms: result.rms })
            }
            Err(CalibrationError::Store(e)) => store_status(e),
            Err(CalibrationError::InsufficientViews { required, actual }) => {
                Ok(Status::InsufficientData { required, actual })
            }
            Err(e) => Ok(Status::OptimizationFailure(e.to_string())),
        }
    }

    fn compute_pose(&mut self) -> Result<Status, SessionError> {
        if self.stage < Stage::Calibrated {
            return Ok(Status::NotCalibrated);
        }
        let Some(resolution) = self.resolution else {
            return Ok(Status::DetectionMiss);
        };
        let model = match self.store.load_model(resolution) {
            Ok(model) => model,
            Err(e) => return store_status(e),
        };
        info!("Camera matrix read: {:?}", model.intrinsics.matrix());
        info!("Distortion coefficients read: {:?}", model.distortions);

        let pattern = self.config.pattern;
        let pose = match self.latest.as_ref().filter(|d| d.found) {
            Some(detection) => match estimate_pose(&detection.image_points, pattern, &model) {
                Ok(pose) => Some(pose),
                Err(PoseError::PointCountMismatch { .. }) => None,
                Err(e) => return Ok(Status::OptimizationFailure(e.to_string())),
            },
            None => None,
        };
        self.stage = Stage::PoseReady;
        Ok(Status::PoseReady { pose })
    }

    fn toggle_pose_overlay(&mut self, overlay: Overlay) -> Status {
        if self.stage < Stage::PoseReady {
            return Status::PoseRequired;
        }
        Status::OverlayToggled {
            overlay,
            active: self.overlays.flip(overlay),
        }
    }

    /// Loads and recenters the mesh the first time the overlay is switched on.
    fn toggle_mesh(&mut self) -> Result<Status, SessionError> {
        if self.stage < Stage::PoseReady {
            return Ok(Status::PoseRequired);
        }
        if !self.overlays.mesh && self.mesh.is_none() {
            match Mesh::load(&self.config.mesh_path) {
                Ok(mesh) => self.mesh = Some(mesh),
                Err(e @ MeshError::Io(_)) => return Err(SessionError::Mesh(e)),
                Err(e) => return Ok(Status::MalformedInput(e.to_string())),
            }
        }
        Ok(self.toggle_pose_overlay(Overlay::Mesh))
    }

    /// `None` when the parameter file opened but is unusable; the frame's
    /// pose overlays are then skipped.
    fn load_model(&self, resolution: Resolution) -> Result<Option<RadTanModel>, SessionError> {
        match self.store.load_model(resolution) {
            Ok(model) => Ok(Some(model)),
            Err(e @ StoreError::Io { .. }) => Err(SessionError::Store(e)),
            Err(e) => {
                warn!("Skipping overlays for this frame: {e}");
                Ok(None)
            }
        }
    }
}

fn store_status(error: StoreError) -> Result<Status, SessionError> {
    match error {
        e @ StoreError::Io { .. } => Err(SessionError::Store(e)),
        e => Ok(Status::InvalidParameters(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::tests::render_board;
    use crate::optimization::calibration::tests::{ground_truth, synthetic_views};
    use image::Rgb;
    use std::path::PathBuf;

    fn config_in_temp(tag: &str) -> SessionConfig {
        let dir = std::env::temp_dir();
        SessionConfig {
            parameters_path: dir.join(format!("calib_ar_session_{tag}.csv")),
            mesh_path: dir.join(format!("calib_ar_session_{tag}.obj")),
            ..SessionConfig::default()
        }
    }

    fn cleanup(config: &SessionConfig) {
        let _ = std::fs::remove_file(&config.parameters_path);
        let _ = std::fs::remove_file(&config.mesh_path);
    }

    /// Archives noise-free synthetic views so calibration can run.
    fn with_synthetic_views(session: &mut Session) {
        let truth = ground_truth([0.0; 5]);
        for view in synthetic_views(&truth) {
            session.archive.capture(&view.image_points).unwrap();
        }
        session.resolution = Some(truth.resolution);
    }

    #[test]
    fn test_keys_map_to_commands() {
        assert_eq!(Command::from_key('s'), Some(Command::Capture));
        assert_eq!(Command::from_key('c'), Some(Command::Calibrate));
        assert_eq!(Command::from_key('p'), Some(Command::ComputePose));
        assert_eq!(Command::from_key('o'), Some(Command::ToggleMesh));
        assert_eq!(Command::from_key('x'), None);
        for command in Command::ALL {
            assert_eq!(Command::from_key(command.key()), Some(command));
        }
    }

    #[test]
    fn test_capture_requires_current_detection() {
        let mut session = Session::new(config_in_temp("capture"));
        assert_eq!(session.handle(Command::Capture).unwrap(), Status::DetectionMiss);

        let board = render_board(10, 7, 30, 40);
        let output = session.process_frame(&board).unwrap();
        assert!(output.found);
        assert_eq!(
            session.handle(Command::Capture).unwrap(),
            Status::Captured { index: 1 }
        );

        // A later frame without the board makes the old points stale.
        let blank = RgbImage::from_pixel(380, 290, Rgb([128, 128, 128]));
        assert!(!session.process_frame(&blank).unwrap().found);
        assert_eq!(session.handle(Command::Capture).unwrap(), Status::DetectionMiss);
        assert_eq!(session.archive().len(), 1);
    }

    #[test]
    fn test_calibrate_reports_insufficient_data() {
        let mut session = Session::new(config_in_temp("insufficient"));
        session.process_frame(&render_board(10, 7, 30, 40)).unwrap();
        session.handle(Command::Capture).unwrap();
        let status = session.handle(Command::Calibrate).unwrap();
        assert_eq!(
            status,
            Status::InsufficientData {
                required: 5,
                actual: 1
            }
        );
        assert_eq!(
            status.to_string(),
            "Not enough calibration images, at least 5 needed. Current # of images: 1"
        );
        assert_eq!(session.stage(), Stage::Idle);
    }

    #[test]
    fn test_commands_are_gated_by_stage() {
        let mut session = Session::new(config_in_temp("gates"));
        assert_eq!(session.handle(Command::ComputePose).unwrap(), Status::NotCalibrated);
        assert_eq!(session.handle(Command::ToggleAxes).unwrap(), Status::PoseRequired);
        assert_eq!(session.handle(Command::ToggleMesh).unwrap(), Status::PoseRequired);
        assert!(!session.overlays().axes);

        // Harris is independent of the pipeline.
        assert_eq!(
            session.handle(Command::ToggleHarris).unwrap(),
            Status::OverlayToggled {
                overlay: Overlay::Harris,
                active: true
            }
        );
        let output = session.process_frame(&render_board(10, 7, 30, 40)).unwrap();
        assert!(output.harris.is_some());
        assert!(output.axes.is_none());
        assert_eq!(session.handle(Command::Quit).unwrap(), Status::Quit);
    }

    #[test]
    fn test_full_pipeline_draws_axes_per_frame() {
        let config = config_in_temp("pipeline");
        let mut session = Session::new(config.clone());
        with_synthetic_views(&mut session);

        let status = session.handle(Command::Calibrate).unwrap();
        assert!(matches!(status, Status::Calibrated { rms } if rms < 1e-4));
        assert_eq!(session.stage(), Stage::Calibrated);
        assert!(config.parameters_path.exists());

        let board = render_board(10, 7, 30, 40);
        session.process_frame(&board).unwrap();
        let status = session.handle(Command::ComputePose).unwrap();
        assert!(matches!(status, Status::PoseReady { pose: Some(_) }));
        assert_eq!(session.stage(), Stage::PoseReady);

        session.handle(Command::ToggleAxes).unwrap();
        session.handle(Command::ToggleWireframe).unwrap();
        let output = session.process_frame(&board).unwrap();
        let pose = output.pose.unwrap();
        // The board faces the camera, so it lies in front of it.
        assert!(pose.translation.z > 0.0);
        assert!(output.axes.is_some());
        assert!(output.wireframe.is_some());
        assert!(output.mesh.is_none());

        // Frames without the full pattern skip the overlays.
        let blank = RgbImage::from_pixel(380, 290, Rgb([128, 128, 128]));
        let output = session.process_frame(&blank).unwrap();
        assert!(output.pose.is_none());
        assert!(output.axes.is_none());

        cleanup(&config);
    }

    #[test]
    fn test_mesh_toggle_loads_once_and_reports_bad_files() {
        let config = config_in_temp("mesh");
        let mut session = Session::new(config.clone());
        session.stage = Stage::PoseReady;

        assert!(matches!(
            session.handle(Command::ToggleMesh),
            Err(SessionError::Mesh(MeshError::Io(_)))
        ));

        std::fs::write(&config.mesh_path, "v 0 0 0\nv 1 0 0\nf 1 2\n").unwrap();
        assert!(matches!(
            session.handle(Command::ToggleMesh).unwrap(),
            Status::MalformedInput(_)
        ));
        assert!(!session.overlays().mesh);

        std::fs::write(&config.mesh_path, "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n").unwrap();
        assert_eq!(
            session.handle(Command::ToggleMesh).unwrap(),
            Status::OverlayToggled {
                overlay: Overlay::Mesh,
                active: true
            }
        );
        assert_eq!(session.mesh.as_ref().map(|m| m.triangles().len()), Some(1));
        assert_eq!(
            session.handle(Command::ToggleMesh).unwrap(),
            Status::OverlayToggled {
                overlay: Overlay::Mesh,
                active: false
            }
        );
        cleanup(&config);
    }

    #[test]
    fn test_missing_parameter_file_is_fatal_for_pose_overlays() {
        let mut config = config_in_temp("missing_params");
        config.parameters_path = PathBuf::from("/nonexistent/calib_ar/data.csv");
        let mut session = Session::new(config);
        session.stage = Stage::PoseReady;
        session.handle(Command::ToggleAxes).unwrap();

        let result = session.process_frame(&render_board(10, 7, 30, 40));
        assert!(matches!(
            result,
            Err(SessionError::Store(StoreError::Io { .. }))
        ));
    }
}
