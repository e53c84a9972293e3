//! Triangle mesh container for multi-view stereo reconstruction output.
//!
//! This crate holds the surface produced by the graph-cut reconstructor in
//! `fuse-cut`, and the cleanup passes usually applied right after extraction.
//!
//! # Features
//!
//! - **Container**: vertices with optional color, normal and camera visibility
//! - **File I/O**: OBJ (positions, colors) and binary PLY (plus normals and visibility)
//! - **Cleanup**: Laplacian smoothing, long-edge filtering, hexahedron clipping,
//!   unreferenced vertex removal, orientation inversion
//! - **Analysis**: connected components, average edge length
//!
//! Faces are wound counter-clockwise when viewed from the empty side of the
//! reconstructed surface, so normals point into free space.
//!
//! # Quick Start
//!
//! ```no_run
//! use mvs_mesh::{Mesh, cleanup};
//!
//! let mut mesh = Mesh::load("dense.ply").unwrap();
//! cleanup::filter_large_edge_triangles(&mut mesh, 60.0);
//! cleanup::laplacian_smooth(&mut mesh, 2, 0.5);
//! mesh.save("dense_clean.obj").unwrap();
//! ```

pub mod cleanup;
pub mod components;
mod error;
mod hexahedron;
pub mod io;
mod types;

pub use error::{ErrorCode, MeshError, MeshResult};
pub use hexahedron::Hexahedron;
pub use types::{Mesh, Triangle, Vertex, VertexColor};

// Re-export commonly used operations
pub use components::{ComponentAnalysis, find_connected_components, keep_largest_component};
pub use io::{MeshFormat, load_mesh, save_mesh};

use std::path::Path;

impl Mesh {
    /// Load a mesh, picking the format from the file extension.
    pub fn load(path: impl AsRef<Path>) -> MeshResult<Self> {
        load_mesh(path.as_ref())
    }

    /// Save the mesh, picking the format from the file extension.
    pub fn save(&self, path: impl AsRef<Path>) -> MeshResult<()> {
        save_mesh(self, path.as_ref())
    }
}
