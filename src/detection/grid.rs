//! Assembles unordered corner candidates into the row-major pattern grid.
//!
//! Starting from the candidate closest to the centroid, the grid is grown
//! breadth-first: each accepted corner predicts its four neighbors from the
//! local lattice vectors and claims the nearest candidate within tolerance.
//! The result is accepted only when it covers exactly `rows x cols` corners.

use std::collections::{HashMap, VecDeque};

use nalgebra::Vector2;

use crate::geometry::PatternSize;

/// Fraction of the local step a candidate may sit away from its prediction.
const MATCH_TOLERANCE: f64 = 0.35;
/// Seed axes must be closer to orthogonal than this absolute cosine.
const MAX_AXIS_COSINE: f64 = 0.5;

struct Node {
    candidate: usize,
    coord: (i32, i32),
    u: Vector2<f64>,
    v: Vector2<f64>,
}

/// Orders `corners` into a row-major `rows x cols` grid.
///
/// Columns run left to right and rows top to bottom in the image. Returns
/// `None` when the candidates do not form a complete grid of that size.
pub fn assemble_grid(corners: &[Vector2<f64>], pattern: PatternSize) -> Option<Vec<Vector2<f64>>> {
    let expected = pattern.corner_count();
    if expected == 0 || corners.len() < expected {
        return None;
    }
    if expected == 1 {
        return corners.first().map(|c| vec![*c]);
    }

    let seed = seed_index(corners)?;
    let (u, v) = seed_axes(corners, seed)?;

    let mut used = vec![false; corners.len()];
    let mut by_coord: HashMap<(i32, i32), usize> = HashMap::new();
    let mut nodes = vec![Node {
        candidate: seed,
        coord: (0, 0),
        u,
        v,
    }];
    used[seed] = true;
    by_coord.insert((0, 0), 0);

    let mut queue = VecDeque::from([0usize]);
    while let Some(node_idx) = queue.pop_front() {
        let (pos, coord, u, v) = {
            let node = &nodes[node_idx];
            (corners[node.candidate], node.coord, node.u, node.v)
        };
        for (di, dj) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
            let next = (coord.0 + di, coord.1 + dj);
            if by_coord.contains_key(&next) {
                continue;
            }
            let step = u * di as f64 + v * dj as f64;
            let predicted = pos + step;
            let tolerance = MATCH_TOLERANCE * step.norm();
            let Some(found) = nearest_unused(corners, &used, &predicted, tolerance) else {
                continue;
            };

            let actual = corners[found] - pos;
            let (nu, nv) = if di != 0 {
                (actual * di as f64, v)
            } else {
                (u, actual * dj as f64)
            };
            used[found] = true;
            by_coord.insert(next, nodes.len());
            queue.push_back(nodes.len());
            nodes.push(Node {
                candidate: found,
                coord: next,
                u: nu,
                v: nv,
            });
        }
    }

    if nodes.len() != expected {
        return None;
    }

    let min_i = nodes.iter().map(|n| n.coord.0).min()?;
    let max_i = nodes.iter().map(|n| n.coord.0).max()?;
    let min_j = nodes.iter().map(|n| n.coord.1).min()?;
    let max_j = nodes.iter().map(|n| n.coord.1).max()?;
    let span_i = (max_i - min_i + 1) as usize;
    let span_j = (max_j - min_j + 1) as usize;

    let (rows, cols) = (pattern.rows, pattern.cols);
    let transposed = if span_i == cols && span_j == rows {
        false
    } else if span_i == rows && span_j == cols {
        true
    } else {
        return None;
    };

    let mut ordered = Vec::with_capacity(expected);
    for r in 0..rows {
        for c in 0..cols {
            let coord = if transposed {
                (min_i + r as i32, min_j + c as i32)
            } else {
                (min_i + c as i32, min_j + r as i32)
            };
            let node = by_coord.get(&coord)?;
            ordered.push(corners[nodes[*node].candidate]);
        }
    }

    orient(&mut ordered, pattern);
    Some(ordered)
}

/// Candidate closest to the centroid of all candidates.
fn seed_index(corners: &[Vector2<f64>]) -> Option<usize> {
    let centroid = corners.iter().fold(Vector2::zeros(), |acc, c| acc + c) / corners.len() as f64;
    corners
        .iter()
        .enumerate()
        .map(|(i, c)| (i, (c - centroid).norm_squared()))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

/// Two lattice vectors at the seed: its nearest neighbor, then the nearest
/// neighbor roughly orthogonal to it.
fn seed_axes(corners: &[Vector2<f64>], seed: usize) -> Option<(Vector2<f64>, Vector2<f64>)> {
    let origin = corners[seed];
    let mut offsets: Vec<Vector2<f64>> = corners
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != seed)
        .map(|(_, c)| c - origin)
        .filter(|d| d.norm_squared() > f64::EPSILON)
        .collect();
    offsets.sort_by(|a, b| a.norm_squared().total_cmp(&b.norm_squared()));

    let u = *offsets.first()?;
    let v = offsets
        .iter()
        .skip(1)
        .take(8)
        .find(|d| (u.dot(d) / (u.norm() * d.norm())).abs() < MAX_AXIS_COSINE)?;
    Some((u, *v))
}

fn nearest_unused(
    corners: &[Vector2<f64>],
    used: &[bool],
    target: &Vector2<f64>,
    radius: f64,
) -> Option<usize> {
    let radius2 = radius * radius;
    corners
        .iter()
        .enumerate()
        .filter(|(i, _)| !used[*i])
        .map(|(i, c)| (i, (c - target).norm_squared()))
        .filter(|(_, d2)| *d2 <= radius2)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

/// Makes rows advance downward and columns advance rightward in the image.
fn orient(ordered: &mut [Vector2<f64>], pattern: PatternSize) {
    let (rows, cols) = (pattern.rows, pattern.cols);
    let col_dir = ordered[cols - 1] - ordered[0];
    let row_dir = ordered[(rows - 1) * cols] - ordered[0];
    let cross = col_dir.x * row_dir.y - col_dir.y * row_dir.x;

    if cross < 0.0 {
        for r in 0..rows / 2 {
            for c in 0..cols {
                ordered.swap(r * cols + c, (rows - 1 - r) * cols + c);
            }
        }
    }

    let col_dir = ordered[cols - 1] - ordered[0];
    let row_dir = ordered[(rows - 1) * cols] - ordered[0];
    let points_left = if cols > 1 { col_dir.x < 0.0 } else { row_dir.y < 0.0 };
    if points_left {
        ordered.reverse();
    }
}
