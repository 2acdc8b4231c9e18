//! PLY (Polygon File Format) I/O
//!
//! ASCII only. Vertex colors are stored as `uchar` channels and exposed as
//! floats in `[0, 1]`.

use crate::Result;
use cv_core::Error;
use nalgebra::{Point3, Vector3};
use std::io::{BufRead, Write};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlyMesh {
    pub vertices: Vec<Point3<f32>>,
    pub normals: Option<Vec<Vector3<f32>>>,
    pub colors: Option<Vec<Point3<f32>>>,
    pub faces: Vec<[usize; 3]>,
}

fn to_u8(c: f32) -> u8 {
    (c.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Write a triangle mesh in ASCII PLY.
pub fn write_ply_mesh<W: Write>(
    writer: &mut W,
    vertices: &[Point3<f32>],
    normals: Option<&[Vector3<f32>]>,
    colors: Option<&[Point3<f32>]>,
    faces: &[[usize; 3]],
) -> Result<()> {
    let normals = normals.filter(|n| n.len() == vertices.len());
    let colors = colors.filter(|c| c.len() == vertices.len());

    writeln!(writer, "ply")?;
    writeln!(writer, "format ascii 1.0")?;
    writeln!(writer, "element vertex {}", vertices.len())?;
    writeln!(writer, "property float x")?;
    writeln!(writer, "property float y")?;
    writeln!(writer, "property float z")?;
    if normals.is_some() {
        writeln!(writer, "property float nx")?;
        writeln!(writer, "property float ny")?;
        writeln!(writer, "property float nz")?;
    }
    if colors.is_some() {
        writeln!(writer, "property uchar red")?;
        writeln!(writer, "property uchar green")?;
        writeln!(writer, "property uchar blue")?;
    }
    writeln!(writer, "element face {}", faces.len())?;
    writeln!(writer, "property list uchar int vertex_indices")?;
    writeln!(writer, "end_header")?;

    for (i, p) in vertices.iter().enumerate() {
        write!(writer, "{} {} {}", p.x, p.y, p.z)?;
        if let Some(n) = normals {
            write!(writer, " {} {} {}", n[i].x, n[i].y, n[i].z)?;
        }
        if let Some(c) = colors {
            write!(writer, " {} {} {}", to_u8(c[i].x), to_u8(c[i].y), to_u8(c[i].z))?;
        }
        writeln!(writer)?;
    }

    for f in faces {
        writeln!(writer, "3 {} {} {}", f[0], f[1], f[2])?;
    }

    Ok(())
}

/// Read an ASCII PLY triangle mesh written by [`write_ply_mesh`] or a compatible tool.
pub fn read_ply_mesh<R: BufRead>(reader: R) -> Result<PlyMesh> {
    let mut lines = reader.lines();

    let mut format = String::new();
    let mut num_vertices = 0usize;
    let mut num_faces = 0usize;
    let mut has_colors = false;
    let mut has_normals = false;

    loop {
        let line = lines
            .next()
            .ok_or_else(|| Error::ParseError("Unexpected EOF in header".to_string()))??;
        let line = line.trim();

        if let Some(rest) = line.strip_prefix("format ") {
            format = rest.split_whitespace().next().unwrap_or_default().to_string();
        } else if let Some(rest) = line.strip_prefix("element vertex ") {
            num_vertices = rest
                .trim()
                .parse()
                .map_err(|_| Error::ParseError(format!("Invalid vertex count: {rest}")))?;
        } else if let Some(rest) = line.strip_prefix("element face ") {
            num_faces = rest
                .trim()
                .parse()
                .map_err(|_| Error::ParseError(format!("Invalid face count: {rest}")))?;
        } else if line.starts_with("property") && line.ends_with(" red") {
            has_colors = true;
        } else if line.starts_with("property") && line.ends_with(" nx") {
            has_normals = true;
        } else if line == "end_header" {
            break;
        }
    }

    if format != "ascii" {
        return Err(Error::ParseError(format!(
            "PLY format '{format}' not supported, only ASCII"
        )));
    }

    let mut mesh = PlyMesh {
        vertices: Vec::with_capacity(num_vertices),
        ..Default::default()
    };
    let mut normals = Vec::new();
    let mut colors = Vec::new();

    for _ in 0..num_vertices {
        let line = lines
            .next()
            .ok_or_else(|| Error::ParseError("Unexpected EOF in vertex data".to_string()))??;
        let values: Vec<f32> = line
            .split_whitespace()
            .map(|s| {
                s.parse()
                    .map_err(|_| Error::ParseError(format!("Invalid number: {s}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let needed = 3 + if has_normals { 3 } else { 0 } + if has_colors { 3 } else { 0 };
        if values.len() < needed {
            return Err(Error::ParseError(format!(
                "vertex has {} values, expected {needed}",
                values.len()
            )));
        }

        mesh.vertices.push(Point3::new(values[0], values[1], values[2]));
        let mut idx = 3;
        if has_normals {
            normals.push(Vector3::new(values[idx], values[idx + 1], values[idx + 2]));
            idx += 3;
        }
        if has_colors {
            colors.push(Point3::new(
                values[idx] / 255.0,
                values[idx + 1] / 255.0,
                values[idx + 2] / 255.0,
            ));
        }
    }

    for _ in 0..num_faces {
        let line = lines
            .next()
            .ok_or_else(|| Error::ParseError("Unexpected EOF in face data".to_string()))??;
        let idx: Vec<usize> = line
            .split_whitespace()
            .map(|s| {
                s.parse()
                    .map_err(|_| Error::ParseError(format!("Invalid index: {s}")))
            })
            .collect::<Result<Vec<_>>>()?;
        if idx.len() != 4 || idx[0] != 3 {
            return Err(Error::ParseError(format!("Only triangles supported: {line}")));
        }
        if idx[1..].iter().any(|&i| i >= num_vertices) {
            return Err(Error::ParseError(format!("Face index out of range: {line}")));
        }
        mesh.faces.push([idx[1], idx[2], idx[3]]);
    }

    if has_normals {
        mesh.normals = Some(normals);
    }
    if has_colors {
        mesh.colors = Some(colors);
    }

    Ok(mesh)
}
