//! OBJ (Wavefront Object) I/O
//!
//! Vertices may carry a trailing RGB triple in `[0, 1]` (`v x y z r g b`), the
//! common extension understood by MeshLab and Open3D.

use crate::Result;
use cv_core::Error;
use nalgebra::Point3;
use std::io::{BufRead, Write};

/// Polygon mesh as stored in an OBJ file. Face indices are 0-based.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjMesh {
    pub vertices: Vec<Point3<f32>>,
    pub colors: Option<Vec<Point3<f32>>>,
    pub faces: Vec<Vec<usize>>,
}

fn parse_f32(s: &str, what: &str) -> Result<f32> {
    s.parse()
        .map_err(|_| Error::ParseError(format!("Invalid {what}: {s}")))
}

impl ObjMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of triangles after fan triangulation of every face.
    pub fn triangle_count(&self) -> usize {
        self.faces.iter().map(|f| f.len().saturating_sub(2)).sum()
    }

    /// Fan-triangulate all faces.
    pub fn triangles(&self) -> Vec<[usize; 3]> {
        let mut triangles = Vec::with_capacity(self.triangle_count());
        for face in &self.faces {
            for i in 1..face.len().saturating_sub(1) {
                triangles.push([face[0], face[i], face[i + 1]]);
            }
        }
        triangles
    }

    pub fn read<R: BufRead>(reader: R) -> Result<Self> {
        let mut mesh = Self::new();
        let mut colors = Vec::new();

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts[0] {
                "v" if parts.len() >= 4 => {
                    let x = parse_f32(parts[1], "x")?;
                    let y = parse_f32(parts[2], "y")?;
                    let z = parse_f32(parts[3], "z")?;
                    mesh.vertices.push(Point3::new(x, y, z));
                    if parts.len() >= 7 {
                        colors.push(Point3::new(
                            parse_f32(parts[4], "red")?,
                            parse_f32(parts[5], "green")?,
                            parse_f32(parts[6], "blue")?,
                        ));
                    }
                }
                "f" if parts.len() >= 4 => {
                    // v, v/vt, v/vt/vn and v//vn all start with the position index
                    let face = parts[1..]
                        .iter()
                        .map(|p| {
                            let idx_str = p.split('/').next().unwrap_or(p);
                            match idx_str.parse::<usize>() {
                                Ok(i) if i > 0 => Ok(i - 1),
                                _ => Err(Error::ParseError(format!("Invalid face index: {p}"))),
                            }
                        })
                        .collect::<Result<Vec<_>>>()?;
                    mesh.faces.push(face);
                }
                _ => {}
            }
        }

        let n = mesh.vertices.len();
        if let Some(&idx) = mesh.faces.iter().flatten().find(|&&i| i >= n) {
            return Err(Error::ParseError(format!(
                "face index {} exceeds vertex count {n}",
                idx + 1
            )));
        }

        if !colors.is_empty() {
            if colors.len() != mesh.vertices.len() {
                return Err(Error::ParseError(format!(
                    "{} of {} vertices carry colors",
                    colors.len(),
                    mesh.vertices.len()
                )));
            }
            mesh.colors = Some(colors);
        }

        Ok(mesh)
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        let colors = self
            .colors
            .as_ref()
            .filter(|c| c.len() == self.vertices.len());

        for (i, v) in self.vertices.iter().enumerate() {
            match colors {
                Some(c) => writeln!(
                    writer,
                    "v {} {} {} {} {} {}",
                    v.x, v.y, v.z, c[i].x, c[i].y, c[i].z
                )?,
                None => writeln!(writer, "v {} {} {}", v.x, v.y, v.z)?,
            }
        }

        for face in &self.faces {
            write!(writer, "f")?;
            for &idx in face {
                write!(writer, " {}", idx + 1)?;
            }
            writeln!(writer)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_write_then_read_quad() {
        let mesh = ObjMesh {
            vertices: vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(1.0, 1.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            colors: None,
            faces: vec![vec![0, 1, 2, 3]],
        };
        let mut buf = Vec::new();
        mesh.write(&mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.contains("f 1 2 3 4"));

        let back = ObjMesh::read(Cursor::new(buf)).unwrap();
        assert_eq!(back, mesh);
        assert_eq!(back.triangles(), vec![[0, 1, 2], [0, 2, 3]]);
    }

    #[test]
    fn test_vertex_colors() {
        let src = "# colored\nv 0 0 0 1 0 0\nv 1 0 0 0 1 0\nv 0 1 0 0 0 1\nf 1/1/1 2/2/2 3/3/3\n";
        let mesh = ObjMesh::read(Cursor::new(src)).unwrap();
        let colors = mesh.colors.as_ref().unwrap();
        assert_eq!(colors[1], Point3::new(0.0, 1.0, 0.0));
        assert_eq!(mesh.faces, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_bad_index_rejected() {
        let src = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 0 1 2\n";
        assert!(ObjMesh::read(Cursor::new(src)).is_err());
    }

    #[test]
    fn test_index_past_vertex_count_rejected() {
        let src = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 4\n";
        let err = ObjMesh::read(Cursor::new(src)).unwrap_err();
        assert!(matches!(err, Error::ParseError(_)));

        // forward references to vertices defined later are fine
        let src = "f 1 2 3\nv 0 0 0\nv 1 0 0\nv 0 1 0\n";
        assert_eq!(ObjMesh::read(Cursor::new(src)).unwrap().faces, vec![vec![0, 1, 2]]);
    }
}
