//! Minimal Wavefront OBJ loader for the mesh overlay.
//!
//! Only `v x y z` and `f i j k` lines are read; every other line is ignored.
//! Vertices are stored with their second and third fields swapped, so a
//! Y-up model stands on the target plane with its height along `Z`.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::info;
use nalgebra::Vector3;

#[derive(thiserror::Error, Debug)]
pub enum MeshError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Line {line}: face needs exactly three vertex indices: '{content}'")]
    MalformedFace { line: usize, content: String },
    #[error("Line {line}: vertex needs three coordinates: '{content}'")]
    MalformedVertex { line: usize, content: String },
    #[error("Face on line {line} references vertex {index}, mesh has {count}")]
    IndexOutOfRange {
        line: usize,
        index: usize,
        count: usize,
    },
}

/// Triangle mesh with zero-based vertex indices.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    vertices: Vec<Vector3<f64>>,
    triangles: Vec<[usize; 3]>,
}

impl Mesh {
    /// Reads an OBJ file and recenters it above the target origin.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MeshError> {
        let file = File::open(path.as_ref())?;
        let mut mesh = Mesh::parse(BufReader::new(file))?;
        mesh.recenter();
        info!(
            "Loaded {} with {} vertices and {} triangles",
            path.as_ref().display(),
            mesh.vertices.len(),
            mesh.triangles.len()
        );
        Ok(mesh)
    }

    /// Parses OBJ text without recentering.
    ///
    /// A `v` line needs at least three numbers and an `f` line exactly three
    /// indices; anything else aborts the whole parse.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self, MeshError> {
        let mut vertices = Vec::new();
        let mut faces: Vec<(usize, [usize; 3])> = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let number = idx + 1;
            let mut tokens = line.split_whitespace();
            match tokens.next() {
                Some("v") => {
                    // Extra fields such as `w` or vertex colors are ignored.
                    let values: Vec<f64> = tokens
                        .take(3)
                        .map(str::parse::<f64>)
                        .collect::<Result<_, _>>()
                        .map_err(|_| MeshError::MalformedVertex {
                            line: number,
                            content: line.clone(),
                        })?;
                    let [x, a, b] = values[..] else {
                        return Err(MeshError::MalformedVertex {
                            line: number,
                            content: line.clone(),
                        });
                    };
                    vertices.push(Vector3::new(x, b, a));
                }
                Some("f") => {
                    let indices: Vec<usize> = tokens
                        .map(str::parse::<usize>)
                        .collect::<Result<_, _>>()
                        .map_err(|_| MeshError::MalformedFace {
                            line: number,
                            content: line.clone(),
                        })?;
                    let [i, j, k] = indices[..] else {
                        return Err(MeshError::MalformedFace {
                            line: number,
                            content: line.clone(),
                        });
                    };
                    faces.push((number, [i, j, k]));
                }
                _ => {}
            }
        }

        let count = vertices.len();
        let triangles = faces
            .into_iter()
            .map(|(line, face)| {
                let mut triangle = [0usize; 3];
                for (slot, index) in triangle.iter_mut().zip(face) {
                    if index == 0 || index > count {
                        return Err(MeshError::IndexOutOfRange { line, index, count });
                    }
                    *slot = index - 1;
                }
                Ok(triangle)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Mesh {
            vertices,
            triangles,
        })
    }

    /// Shifts the mesh by `(|min x|, -max y, |min z|)` so its top sits at
    /// `Y = 0` above the target origin.
    pub fn recenter(&mut self) {
        let Some(first) = self.vertices.first() else {
            return;
        };
        let (mut min_x, mut max_y, mut min_z) = (first.x, first.y, first.z);
        for v in &self.vertices {
            min_x = min_x.min(v.x);
            max_y = max_y.max(v.y);
            min_z = min_z.min(v.z);
        }

        let offset = Vector3::new(min_x.abs(), -max_y, min_z.abs());
        for v in &mut self.vertices {
            *v += offset;
        }
    }

    pub fn vertices(&self) -> &[Vector3<f64>] {
        &self.vertices
    }

    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_swaps_second_and_third_fields() {
        let obj = "# cow\nv 1.0 2.0 3.0\nvn 0 0 1\nv 4 5 6\nv 7 8 9\nf 1 2 3\n";
        let mesh = Mesh::parse(obj.as_bytes()).unwrap();
        assert_eq!(mesh.vertices()[0], Vector3::new(1.0, 3.0, 2.0));
        assert_eq!(mesh.vertices()[2], Vector3::new(7.0, 9.0, 8.0));
        assert_eq!(mesh.triangles(), &[[0, 1, 2]]);
    }

    #[test]
    fn test_vertex_extra_fields_are_ignored() {
        let obj = "v 1 2 3 1.0\nv 0 0 0\nv 1 1 1 0.5 0.2 0.9\nf 1 2 3\n";
        let mesh = Mesh::parse(obj.as_bytes()).unwrap();
        assert_eq!(mesh.vertices().len(), 3);
        assert_eq!(mesh.vertices()[0], Vector3::new(1.0, 3.0, 2.0));
        assert_eq!(mesh.triangles(), &[[0, 1, 2]]);
    }

    #[test]
    fn test_vertex_with_two_values_aborts() {
        let err = Mesh::parse("v 0 0 0\nv 1 2\n".as_bytes()).unwrap_err();
        assert!(matches!(err, MeshError::MalformedVertex { line: 2, .. }));
    }

    #[test]
    fn test_recenter_shifts_by_extrema() {
        // Stored vertices (2, 5, -1) and (-3, 8, 4).
        let mut mesh = Mesh::parse("v 2 -1 5\nv -3 4 8\n".as_bytes()).unwrap();
        assert_eq!(mesh.vertices()[0], Vector3::new(2.0, 5.0, -1.0));
        mesh.recenter();
        assert_eq!(mesh.vertices()[0], Vector3::new(5.0, -3.0, 0.0));
        assert_eq!(mesh.vertices()[1], Vector3::new(0.0, 0.0, 5.0));
    }

    #[test]
    fn test_face_with_two_indices_aborts() {
        let err = Mesh::parse("v 0 0 0\nv 1 0 0\nf 1 2\n".as_bytes()).unwrap_err();
        assert!(matches!(err, MeshError::MalformedFace { line: 3, .. }));
    }

    #[test]
    fn test_composite_face_tokens_are_rejected() {
        let err = Mesh::parse("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1/1 2/2 3/3\n".as_bytes()).unwrap_err();
        assert!(matches!(err, MeshError::MalformedFace { .. }));
    }

    #[test]
    fn test_face_index_out_of_range() {
        let err = Mesh::parse("v 0 0 0\nf 1 2 3\n".as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            MeshError::IndexOutOfRange {
                line: 2,
                index: 2,
                count: 1
            }
        ));
    }

    #[test]
    fn test_load_recenters_and_reports_missing_file() {
        let path = std::env::temp_dir().join("calib_ar_mesh_load.obj");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "v 2 -1 5\nv -3 4 8\nv 0 0 0\nf 1 2 3").unwrap();
        drop(file);

        let mesh = Mesh::load(&path).unwrap();
        assert_eq!(mesh.vertices().len(), 3);
        assert!(mesh.vertices().iter().all(|v| v.y <= 0.0));
        let _ = std::fs::remove_file(&path);

        assert!(matches!(
            Mesh::load("/nonexistent/calib_ar/cow.obj"),
            Err(MeshError::Io(_))
        ));
    }
}
