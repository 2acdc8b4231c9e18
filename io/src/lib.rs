//! Mesh file I/O
//!
//! - OBJ (Wavefront Object), polygon faces with optional per-vertex colors
//! - PLY (Polygon File Format), ASCII triangle meshes with optional colors and normals

pub mod obj;
pub mod ply;

pub use obj::ObjMesh;
pub use ply::{read_ply_mesh, write_ply_mesh, PlyMesh};

pub use cv_core::{Error, Result};

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Create `path` for buffered writing, creating missing parent directories.
pub fn create_writer<P: AsRef<Path>>(path: P) -> Result<BufWriter<File>> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(BufWriter::new(File::create(path)?))
}
