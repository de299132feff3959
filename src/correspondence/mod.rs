//! Image/world point pairs accumulated for calibration.

use log::info;
use nalgebra::{Vector2, Vector3};

use crate::geometry::{planar_grid, PatternSize};

/// One captured view: detected image corners paired with the canonical
/// world grid, in the same row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrespondenceSet {
    pub image_points: Vec<Vector2<f64>>,
    pub world_points: Vec<Vector3<f64>>,
}

impl CorrespondenceSet {
    /// Pairs `image_points` with the world grid of `pattern`.
    ///
    /// Returns `None` unless exactly `rows x cols` image points are given.
    pub fn new(image_points: &[Vector2<f64>], pattern: PatternSize) -> Option<Self> {
        if image_points.len() != pattern.corner_count() {
            return None;
        }
        Some(CorrespondenceSet {
            image_points: image_points.to_vec(),
            world_points: planar_grid(pattern),
        })
    }

    pub fn len(&self) -> usize {
        self.image_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_points.is_empty()
    }
}

/// Append-only list of captured views for one session.
#[derive(Debug, Clone)]
pub struct CorrespondenceArchive {
    pattern: PatternSize,
    views: Vec<CorrespondenceSet>,
}

impl CorrespondenceArchive {
    pub fn new(pattern: PatternSize) -> Self {
        CorrespondenceArchive {
            pattern,
            views: Vec::new(),
        }
    }

    pub fn pattern(&self) -> PatternSize {
        self.pattern
    }

    /// Archives the given detection. Point sets of the wrong size are
    /// refused and leave the archive untouched.
    ///
    /// Returns the one-based index of the new view.
    pub fn capture(&mut self, image_points: &[Vector2<f64>]) -> Option<usize> {
        let set = CorrespondenceSet::new(image_points, self.pattern)?;

        let index = self.views.len() + 1;
        info!("Frame {index} captured");
        log_points(
            "world",
            set.world_points.iter().map(|p| format!("({}, {}, {})", p.x, p.y, p.z)),
        );
        log_points(
            "image",
            set.image_points.iter().map(|p| format!("({:.2}, {:.2})", p.x, p.y)),
        );

        self.views.push(set);
        Some(index)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn views(&self) -> &[CorrespondenceSet] {
        &self.views
    }
}

fn log_points(label: &str, points: impl Iterator<Item = String>) {
    let points: Vec<String> = points.collect();
    info!("{label} points:");
    for line in points.chunks(9) {
        info!("  {}", line.join(" "));
    }
}
