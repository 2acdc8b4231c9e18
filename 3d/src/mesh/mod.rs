//! Triangle mesh produced by surface extraction.

use std::io::Write;
use std::path::Path;

use nalgebra::{Point3, Vector3};

use crate::Result;

/// Triangle mesh with vertices, face indices and optional per-vertex attributes.
///
/// Colors are RGB in `[0, 1]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleMesh {
    pub vertices: Vec<Point3<f32>>,
    pub faces: Vec<[usize; 3]>,
    pub normals: Option<Vec<Vector3<f32>>>,
    pub colors: Option<Vec<Point3<f32>>>,
}

impl TriangleMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vertices_and_faces(vertices: Vec<Point3<f32>>, faces: Vec<[usize; 3]>) -> Self {
        Self {
            vertices,
            faces,
            normals: None,
            colors: None,
        }
    }

    /// Mesh from a triangle soup: every three consecutive vertices form a face.
    pub fn from_triangle_soup(vertices: Vec<Point3<f32>>, colors: Option<Vec<Point3<f32>>>) -> Self {
        let faces = (0..vertices.len() / 3)
            .map(|t| [3 * t, 3 * t + 1, 3 * t + 2])
            .collect();
        Self {
            vertices,
            faces,
            normals: None,
            colors,
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Face indices as one flat list.
    pub fn flat_indices(&self) -> Vec<u32> {
        self.faces
            .iter()
            .flat_map(|f| f.iter().map(|&i| i as u32))
            .collect()
    }

    /// Unit face normals; degenerate faces get a zero vector.
    pub fn compute_face_normals(&self) -> Vec<Vector3<f32>> {
        self.faces
            .iter()
            .map(|face| {
                let v0 = self.vertices[face[0]];
                let e1 = self.vertices[face[1]] - v0;
                let e2 = self.vertices[face[2]] - v0;
                e1.cross(&e2).try_normalize(f32::EPSILON).unwrap_or_else(Vector3::zeros)
            })
            .collect()
    }

    /// Vertex normals as the normalized sum of adjacent face normals.
    pub fn compute_vertex_normals(&mut self) {
        let mut vertex_normals: Vec<Vector3<f32>> = vec![Vector3::zeros(); self.vertices.len()];
        let face_normals = self.compute_face_normals();

        for (face, normal) in self.faces.iter().zip(&face_normals) {
            for &vertex_idx in face {
                vertex_normals[vertex_idx] += normal;
            }
        }

        for normal in vertex_normals.iter_mut() {
            *normal = normal.try_normalize(f32::EPSILON).unwrap_or_else(Vector3::zeros);
        }

        self.normals = Some(vertex_normals);
    }

    /// Axis-aligned bounds `(min, max)`; the origin twice for an empty mesh.
    pub fn bounds(&self) -> (Point3<f32>, Point3<f32>) {
        let Some(&first) = self.vertices.first() else {
            return (Point3::origin(), Point3::origin());
        };

        self.vertices.iter().fold((first, first), |(min, max), v| {
            (
                Point3::new(min.x.min(v.x), min.y.min(v.y), min.z.min(v.z)),
                Point3::new(max.x.max(v.x), max.y.max(v.y), max.z.max(v.z)),
            )
        })
    }

    pub fn surface_area(&self) -> f32 {
        self.faces
            .iter()
            .map(|face| {
                let v0 = self.vertices[face[0]];
                let e1 = self.vertices[face[1]] - v0;
                let e2 = self.vertices[face[2]] - v0;
                e1.cross(&e2).norm() * 0.5
            })
            .sum()
    }

    pub fn to_obj(&self) -> cv_io::ObjMesh {
        cv_io::ObjMesh {
            vertices: self.vertices.clone(),
            colors: self.colors.clone(),
            faces: self.faces.iter().map(|f| f.to_vec()).collect(),
        }
    }

    pub fn write_obj<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.to_obj().write(writer)?;
        Ok(())
    }

    pub fn write_ply<W: Write>(&self, writer: &mut W) -> Result<()> {
        cv_io::write_ply_mesh(
            writer,
            &self.vertices,
            self.normals.as_deref(),
            self.colors.as_deref(),
            &self.faces,
        )?;
        Ok(())
    }

    /// Write to `path` as OBJ or PLY depending on the extension.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let mut writer = cv_io::create_writer(path)?;
        match ext.as_deref() {
            Some("obj") => self.write_obj(&mut writer)?,
            Some("ply") => self.write_ply(&mut writer)?,
            _ => {
                return Err(cv_core::Error::InvalidInput(format!(
                    "unsupported mesh extension: {}",
                    path.display()
                ))
                .into())
            }
        }
        writer.flush().map_err(cv_core::Error::from)?;
        Ok(())
    }
}
