//! Command-line front end working on still images.
//!
//! Usage:
//! ```bash
//! calib-ar calibrate views/*.png --report calibration.json
//! calib-ar pose frame.png --axes axes.png --mesh cow.obj --mesh-out cow.png
//! calib-ar replay frames/*.png --keys "s.s.s.s.scpa" --out-dir out
//! ```

use std::path::{Path, PathBuf};

use calib_ar::calibration::calibrate_and_store;
use calib_ar::camera::Resolution;
use calib_ar::config::SessionConfig;
use calib_ar::correspondence::CorrespondenceArchive;
use calib_ar::detection::detect;
use calib_ar::geometry::PatternSize;
use calib_ar::harris;
use calib_ar::mesh::Mesh;
use calib_ar::overlay::{draw_axes, draw_mesh, draw_wireframe};
use calib_ar::pose::estimate_pose;
use calib_ar::session::{Command, Session, Status};
use calib_ar::store::ParameterStore;
use clap::{Parser, Subcommand};
use image::RgbImage;
use log::{info, warn};

/// Planar-target camera calibration and AR overlays
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Session config YAML; every field has a default
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Inner-corner rows of the target (overrides the config)
    #[arg(long, global = true)]
    rows: Option<usize>,

    /// Inner-corner columns of the target (overrides the config)
    #[arg(long, global = true)]
    cols: Option<usize>,

    /// Parameter file (overrides the config)
    #[arg(long, global = true)]
    params: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Detect the target in one image
    Detect {
        image: PathBuf,
        /// Where to write the annotated image
        #[arg(long)]
        overlay: Option<PathBuf>,
    },
    /// Calibrate from every image with a complete detection
    Calibrate {
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// JSON report output
        #[arg(long)]
        report: Option<PathBuf>,
        /// Also export the camera as a Kalibr-style YAML file
        #[arg(long)]
        model_yaml: Option<PathBuf>,
    },
    /// Estimate the pose in one image and draw overlays
    Pose {
        image: PathBuf,
        /// Rotation and translation as JSON
        #[arg(long)]
        pose_json: Option<PathBuf>,
        #[arg(long)]
        axes: Option<PathBuf>,
        #[arg(long)]
        wireframe: Option<PathBuf>,
        /// OBJ mesh to draw on the target
        #[arg(long, requires = "mesh_out")]
        mesh: Option<PathBuf>,
        #[arg(long, requires = "mesh")]
        mesh_out: Option<PathBuf>,
    },
    /// Draw Harris corner markers on the normalized response
    Harris {
        image: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Feed images through an interactive session, pressing one key per frame
    Replay {
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Key pressed after each frame; '.' presses nothing
        #[arg(long, default_value = "")]
        keys: String,
        /// Directory for the per-frame overlays
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// List the session key bindings
    Keys,
}

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

fn load_config(cli: &Cli) -> CliResult<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading config from {}", path.display());
            SessionConfig::load_from_yaml(path)?
        }
        None => SessionConfig::default(),
    };
    if cli.rows.is_some() || cli.cols.is_some() {
        config.pattern = PatternSize::new(
            cli.rows.unwrap_or(config.pattern.rows),
            cli.cols.unwrap_or(config.pattern.cols),
        );
    }
    if let Some(params) = &cli.params {
        config.parameters_path = params.clone();
    }
    config.validate()?;
    Ok(config)
}

fn open_frame(path: &Path) -> CliResult<RgbImage> {
    let frame = image::open(path)
        .map_err(|e| format!("Unable to open image {}: {e}", path.display()))?
        .to_rgb8();
    Ok(frame)
}

fn save<P, C>(image: &image::ImageBuffer<P, C>, path: &Path) -> CliResult
where
    P: image::PixelWithColorType,
    [P::Subpixel]: image::EncodableLayout,
    C: std::ops::Deref<Target = [P::Subpixel]>,
{
    image.save(path)?;
    info!("Wrote {}", path.display());
    Ok(())
}

fn resolution_of(frame: &RgbImage) -> Resolution {
    Resolution {
        width: frame.width(),
        height: frame.height(),
    }
}

fn run_detect(config: &SessionConfig, image: &Path, overlay: Option<&Path>) -> CliResult {
    let frame = open_frame(image)?;
    let detection = detect(&frame, config.pattern, &config.detector, &config.subpix);
    println!(
        "{}: {} of {} corners",
        image.display(),
        detection.image_points.len(),
        config.pattern.corner_count()
    );
    if let Some(out) = overlay {
        save(&detection.overlay, out)?;
    }
    Ok(())
}

fn run_calibrate(
    config: &SessionConfig,
    images: &[PathBuf],
    report: Option<&Path>,
    model_yaml: Option<&Path>,
) -> CliResult {
    let mut archive = CorrespondenceArchive::new(config.pattern);
    let mut resolution = None;
    for path in images {
        let frame = open_frame(path)?;
        let detection = detect(&frame, config.pattern, &config.detector, &config.subpix);
        if !detection.found {
            warn!("No complete pattern in {}", path.display());
            continue;
        }
        resolution.get_or_insert_with(|| resolution_of(&frame));
        archive.capture(&detection.image_points);
    }

    let Some(resolution) = resolution else {
        println!("No image contained the pattern, nothing to calibrate");
        return Ok(());
    };
    if archive.len() < calib_ar::calibration::MIN_CALIBRATION_VIEWS {
        println!(
            "{}",
            Status::InsufficientData {
                required: calib_ar::calibration::MIN_CALIBRATION_VIEWS,
                actual: archive.len(),
            }
        );
        return Ok(());
    }

    let store = ParameterStore::new(&config.parameters_path);
    let result = calibrate_and_store(&archive, resolution, &store)?;
    println!("RMS re-projection error: {:.6}", result.rms);
    println!("{:?}", result.model);

    if let Some(path) = report {
        std::fs::write(path, serde_json::to_string_pretty(&result.report())?)?;
        info!("Report written to {}", path.display());
    }
    if let Some(path) = model_yaml {
        result.model.save_to_yaml(&path.to_string_lossy())?;
        info!("Camera written to {}", path.display());
    }
    Ok(())
}

struct PoseOutputs<'a> {
    pose_json: Option<&'a Path>,
    axes: Option<&'a Path>,
    wireframe: Option<&'a Path>,
    mesh: Option<(&'a Path, &'a Path)>,
}

fn run_pose(config: &SessionConfig, image: &Path, outputs: PoseOutputs<'_>) -> CliResult {
    let frame = open_frame(image)?;
    let store = ParameterStore::new(&config.parameters_path);
    let model = store.load_model(resolution_of(&frame))?;
    info!("Camera read: {:?}", model);

    let detection = detect(&frame, config.pattern, &config.detector, &config.subpix);
    if !detection.found {
        println!("No complete pattern in {}", image.display());
        return Ok(());
    }
    let pose = estimate_pose(&detection.image_points, config.pattern, &model)?;
    println!("Rotation vector: {:?}", pose.rotation.as_slice());
    println!("Translation vector: {:?}", pose.translation.as_slice());
    if let Some(out) = outputs.pose_json {
        std::fs::write(out, serde_json::to_string_pretty(&pose)?)?;
        info!("Pose written to {}", out.display());
    }

    if let Some(out) = outputs.axes {
        let mut canvas = frame.clone();
        draw_axes(&mut canvas, &pose, &model);
        save(&canvas, out)?;
    }
    if let Some(out) = outputs.wireframe {
        let mut canvas = frame.clone();
        draw_wireframe(&mut canvas, &pose, &model);
        save(&canvas, out)?;
    }
    if let Some((obj, out)) = outputs.mesh {
        let mesh = Mesh::load(obj)?;
        let mut canvas = frame.clone();
        draw_mesh(&mut canvas, &mesh, &pose, &model);
        save(&canvas, out)?;
    }
    Ok(())
}

fn run_harris(config: &SessionConfig, image: &Path, out: &Path) -> CliResult {
    let gray = image::open(image)
        .map_err(|e| format!("Unable to open image {}: {e}", image.display()))?
        .to_luma8();
    let output = harris::score(&gray, &config.harris)?;
    println!("{} markers above {}", output.markers.len(), config.harris.threshold);
    save(&output.image, out)
}

fn run_replay(
    config: SessionConfig,
    images: &[PathBuf],
    keys: &str,
    out_dir: Option<&Path>,
) -> CliResult {
    if let Some(dir) = out_dir {
        std::fs::create_dir_all(dir)?;
    }
    let mut keys = keys.chars();
    let mut session = Session::new(config);

    for (idx, path) in images.iter().enumerate() {
        let frame = open_frame(path)?;
        let output = session.process_frame(&frame)?;

        if let Some(dir) = out_dir {
            let name = |kind: &str| dir.join(format!("frame_{idx:04}_{kind}.png"));
            save(&output.detection, &name("corners"))?;
            for (kind, image) in [
                ("axes", &output.axes),
                ("wireframe", &output.wireframe),
                ("mesh", &output.mesh),
            ] {
                if let Some(image) = image {
                    save(image, &name(kind))?;
                }
            }
            if let Some(image) = &output.harris {
                save(image, &name("harris"))?;
            }
        }

        let Some(command) = keys.next().and_then(Command::from_key) else {
            continue;
        };
        let status = session.handle(command)?;
        println!("[{}] {status}", command.key());
        if status == Status::Quit {
            break;
        }
    }
    Ok(())
}

fn print_keys() {
    for command in Command::ALL {
        println!("  '{}'  {}", command.key(), command.description());
    }
}

fn main() -> CliResult {
    env_logger::init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match &cli.command {
        Cmd::Detect { image, overlay } => run_detect(&config, image, overlay.as_deref()),
        Cmd::Calibrate {
            images,
            report,
            model_yaml,
        } => run_calibrate(&config, images, report.as_deref(), model_yaml.as_deref()),
        Cmd::Pose {
            image,
            pose_json,
            axes,
            wireframe,
            mesh,
            mesh_out,
        } => run_pose(
            &config,
            image,
            PoseOutputs {
                pose_json: pose_json.as_deref(),
                axes: axes.as_deref(),
                wireframe: wireframe.as_deref(),
                mesh: mesh.as_deref().zip(mesh_out.as_deref()),
            },
        ),
        Cmd::Harris { image, out } => run_harris(&config, image, out),
        Cmd::Replay {
            images,
            keys,
            out_dir,
        } => run_replay(config.clone(), images, keys, out_dir.as_deref()),
        Cmd::Keys => {
            print_keys();
            Ok(())
        }
    }
}
