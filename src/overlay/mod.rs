//! Projects world geometry through a pose and draws it as line overlays.

pub mod draw;

use image::{Rgb, RgbImage};
use nalgebra::{Vector2, Vector3};

use crate::camera::RadTanModel;
use crate::geometry::Pose;
use crate::mesh::Mesh;
use draw::draw_thick_line;

/// Origin, then the tips of the -Y, +X and +Z axes, three squares long.
pub const AXIS_POINTS: [[f64; 3]; 4] = [
    [0.0, 0.0, 0.0],
    [0.0, -3.0, 0.0],
    [3.0, 0.0, 0.0],
    [0.0, 0.0, 3.0],
];

/// Square base on the board plus an apex four squares above it.
pub const PYRAMID_POINTS: [[f64; 3]; 5] = [
    [1.0, -1.0, 0.0],
    [1.0, -5.0, 0.0],
    [5.0, -1.0, 0.0],
    [5.0, -5.0, 0.0],
    [3.0, -3.0, 4.0],
];

const RED: Rgb<u8> = Rgb([255, 0, 0]);
const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const BLUE: Rgb<u8> = Rgb([0, 0, 255]);

const AXIS_COLORS: [Rgb<u8>; 3] = [RED, GREEN, BLUE];
const AXIS_THICKNESS: u32 = 2;
const WIREFRAME_THICKNESS: u32 = 2;
const MESH_THICKNESS: u32 = 1;

/// Projects world points to pixels. The output has the same length and order
/// as the input; nothing is culled.
pub fn project_points(
    points: &[Vector3<f64>],
    pose: &Pose,
    model: &RadTanModel,
) -> Vec<Vector2<f64>> {
    let rotation = pose.rotation_matrix();
    points
        .iter()
        .map(|p| model.project_camera_point(&(rotation * p + pose.translation)))
        .collect()
}

fn to_points<const N: usize>(raw: &[[f64; 3]; N]) -> Vec<Vector3<f64>> {
    raw.iter().map(|p| Vector3::new(p[0], p[1], p[2])).collect()
}

/// Draws the three target axes from the origin: -Y red, +X green, +Z blue.
pub fn draw_axes(image: &mut RgbImage, pose: &Pose, model: &RadTanModel) {
    let projected = project_points(&to_points(&AXIS_POINTS), pose, model);
    let origin = projected[0];
    for (tip, color) in projected[1..].iter().zip(AXIS_COLORS) {
        draw_thick_line(image, &origin, tip, color, AXIS_THICKNESS);
    }
}

/// Draws the pyramid by joining every ordered pair of its projected corners,
/// self pairs and reversed duplicates included.
pub fn draw_wireframe(image: &mut RgbImage, pose: &Pose, model: &RadTanModel) {
    let projected = project_points(&to_points(&PYRAMID_POINTS), pose, model);
    for a in &projected {
        for b in &projected {
            draw_thick_line(image, a, b, RED, WIREFRAME_THICKNESS);
        }
    }
}

/// Draws every triangle of `mesh` as a closed outline.
pub fn draw_mesh(image: &mut RgbImage, mesh: &Mesh, pose: &Pose, model: &RadTanModel) {
    let projected = project_points(mesh.vertices(), pose, model);
    for triangle in mesh.triangles() {
        for k in 0..3 {
            let a = &projected[triangle[k]];
            let b = &projected[triangle[(k + 1) % 3]];
            draw_thick_line(image, a, b, RED, MESH_THICKNESS);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::calibration::tests::ground_truth;
    use approx::assert_relative_eq;

    fn facing_pose() -> Pose {
        // Board origin three squares left of and above the optical axis.
        Pose::new(Vector3::zeros(), Vector3::new(-3.0, 3.0, 20.0))
    }

    #[test]
    fn test_project_preserves_length_and_order() {
        let model = ground_truth([0.0; 5]);
        let pose = facing_pose();
        let points = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(3.0, 0.0, 0.0),
            Vector3::new(100.0, 0.0, 0.0),
            Vector3::new(0.0, 0.0, -20.0),
        ];
        let projected = project_points(&points, &pose, &model);
        assert_eq!(projected.len(), points.len());
        assert_relative_eq!(projected[0], Vector2::new(320.0 - 120.0, 240.0 + 120.0));
        assert_relative_eq!(projected[1], Vector2::new(320.0, 360.0));
        // Far outside the image and on the camera plane: still one output each.
        assert!(projected[2].x > 640.0);
        assert!(projected[3].iter().all(|v| v.is_finite()));
        assert!(project_points(&[], &pose, &model).is_empty());
    }

    #[test]
    fn test_draw_axes_colors_each_axis() {
        let model = ground_truth([0.0; 5]);
        let pose = facing_pose();
        let mut image = RgbImage::new(640, 480);
        draw_axes(&mut image, &pose, &model);

        // Origin (200, 360); +X tip (320, 360); -Y tip (200, 240).
        assert_eq!(*image.get_pixel(260, 360), GREEN);
        assert_eq!(*image.get_pixel(200, 300), RED);
        assert!(image.pixels().any(|p| *p == BLUE));
    }

    #[test]
    fn test_draw_wireframe_stays_red() {
        let model = ground_truth([0.0; 5]);
        let pose = facing_pose();
        let mut image = RgbImage::new(640, 480);
        draw_wireframe(&mut image, &pose, &model);

        assert!(image.pixels().any(|p| *p == RED));
        assert!(image.pixels().all(|p| *p == RED || *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn test_draw_wireframe_joins_every_pair() {
        let model = ground_truth([0.0; 5]);
        // Base corners land on (360, 320), (360, 160), (520, 320) and
        // (520, 160); the apex lands on (420, 240), off the base diagonals.
        let pose = Pose::new(Vector3::zeros(), Vector3::new(0.0, 3.0, 20.0));
        let mut image = RgbImage::new(640, 480);
        draw_wireframe(&mut image, &pose, &model);

        let red_near = |x: u32, y: u32| {
            (x - 1..=x + 1).any(|u| (y - 1..=y + 1).any(|v| *image.get_pixel(u, v) == RED))
        };
        // Base diagonals cross at (440, 240), at least 12 px from any apex edge.
        assert!(red_near(440, 240));
        assert!(red_near(400, 280));
        assert!(red_near(480, 280));
        // Base side and apex edge.
        assert!(red_near(360, 240));
        assert!(red_near(390, 280));
        // Inside a face, away from every segment.
        assert!(!red_near(440, 200));
    }

    #[test]
    fn test_draw_mesh_outlines_triangles() {
        let model = ground_truth([0.0; 5]);
        let pose = facing_pose();
        let mesh = Mesh::parse("v 0 0 0\nv 3 0 0\nv 0 0 -3\nf 1 2 3\n".as_bytes()).unwrap();
        let mut image = RgbImage::new(640, 480);
        draw_mesh(&mut image, &mesh, &pose, &model);
        assert_eq!(*image.get_pixel(260, 360), RED);
    }
}
