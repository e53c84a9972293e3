//! Connected component analysis for meshes.
//!
//! Two faces belong to the same component when they share an edge.

use std::cmp::Reverse;

use hashbrown::HashMap;
use tracing::{debug, info};

use crate::cleanup::remove_unreferenced_vertices;
use crate::types::Mesh;

/// Result of connected component analysis.
#[derive(Debug, Clone)]
pub struct ComponentAnalysis {
    /// Number of connected components found.
    pub component_count: usize,
    /// Face indices for each component, sorted by component size (largest first).
    pub components: Vec<Vec<u32>>,
    /// Size of the largest component (number of faces).
    pub largest_component_size: usize,
    /// Size of the smallest component (number of faces).
    pub smallest_component_size: usize,
}

impl ComponentAnalysis {
    /// Check if the mesh is fully connected (single component).
    pub fn is_connected(&self) -> bool {
        self.component_count == 1
    }

    /// Face indices of the largest component.
    pub fn largest_component(&self) -> &[u32] {
        self.components.first().map(|v| v.as_slice()).unwrap_or(&[])
    }
}

impl std::fmt::Display for ComponentAnalysis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Component Analysis:")?;
        writeln!(f, "  Connected components: {}", self.component_count)?;
        if self.component_count > 0 {
            writeln!(f, "  Largest component: {} faces", self.largest_component_size)?;
            writeln!(f, "  Smallest component: {} faces", self.smallest_component_size)?;
        }
        Ok(())
    }
}

/// Face-to-face adjacency through shared (undirected) edges.
fn face_neighbors(faces: &[[u32; 3]]) -> Vec<Vec<u32>> {
    let mut edge_to_faces: HashMap<(u32, u32), Vec<u32>> = HashMap::with_capacity(faces.len() * 2);
    for (fi, face) in faces.iter().enumerate() {
        for k in 0..3 {
            let (a, b) = (face[k], face[(k + 1) % 3]);
            edge_to_faces
                .entry((a.min(b), a.max(b)))
                .or_default()
                .push(fi as u32);
        }
    }

    let mut neighbors: Vec<Vec<u32>> = vec![Vec::new(); faces.len()];
    for shared in edge_to_faces.values() {
        for w in shared.windows(2) {
            neighbors[w[0] as usize].push(w[1]);
            neighbors[w[1] as usize].push(w[0]);
        }
    }
    neighbors
}

/// Find all connected components of a mesh by flood fill over shared edges.
///
/// # Example
/// ```
/// use mvs_mesh::{Mesh, Vertex};
/// use mvs_mesh::components::find_connected_components;
///
/// let mut mesh = Mesh::new();
/// for (x, y) in [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (10.0, 0.0), (11.0, 0.0), (10.0, 1.0)] {
///     mesh.vertices.push(Vertex::from_coords(x, y, 0.0));
/// }
/// mesh.faces.push([0, 1, 2]);
/// mesh.faces.push([3, 4, 5]);
///
/// let analysis = find_connected_components(&mesh);
/// assert_eq!(analysis.component_count, 2);
/// ```
pub fn find_connected_components(mesh: &Mesh) -> ComponentAnalysis {
    let face_count = mesh.faces.len();
    let neighbors = face_neighbors(&mesh.faces);

    let mut visited = vec![false; face_count];
    let mut components: Vec<Vec<u32>> = Vec::new();

    for start_face in 0..face_count {
        if visited[start_face] {
            continue;
        }

        let mut component = Vec::new();
        let mut queue = vec![start_face as u32];
        visited[start_face] = true;

        while let Some(face_idx) = queue.pop() {
            component.push(face_idx);
            for &neighbor in &neighbors[face_idx as usize] {
                if !visited[neighbor as usize] {
                    visited[neighbor as usize] = true;
                    queue.push(neighbor);
                }
            }
        }

        components.push(component);
    }

    components.sort_by_key(|c| Reverse(c.len()));

    let component_count = components.len();
    let largest_component_size = components.first().map(|c| c.len()).unwrap_or(0);
    let smallest_component_size = components.last().map(|c| c.len()).unwrap_or(0);

    debug!(
        "Found {} connected component(s) in mesh with {} faces",
        component_count, face_count
    );

    ComponentAnalysis {
        component_count,
        components,
        largest_component_size,
        smallest_component_size,
    }
}

/// Keep only the largest connected component. Returns the number of faces removed.
///
/// Vertices that are no longer referenced are dropped as well.
pub fn keep_largest_component(mesh: &mut Mesh) -> usize {
    let analysis = find_connected_components(mesh);
    if analysis.component_count <= 1 {
        return 0;
    }

    let mut keep = vec![false; mesh.faces.len()];
    for &fi in analysis.largest_component() {
        keep[fi as usize] = true;
    }

    let before = mesh.faces.len();
    let mut index = 0;
    mesh.faces.retain(|_| {
        let k = keep[index];
        index += 1;
        k
    });
    let removed = before - mesh.faces.len();
    remove_unreferenced_vertices(mesh);

    info!(
        "Kept largest component ({} faces), removed {} faces in {} other component(s)",
        analysis.largest_component_size,
        removed,
        analysis.component_count - 1
    );
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Vertex;

    /// A two-triangle quad plus one separate triangle.
    fn create_two_components() -> Mesh {
        let mut mesh = Mesh::new();
        for (x, y) in [
            (0.0, 0.0),
            (1.0, 0.0),
            (1.0, 1.0),
            (0.0, 1.0),
            (5.0, 0.0),
            (6.0, 0.0),
            (5.0, 1.0),
        ] {
            mesh.vertices.push(Vertex::from_coords(x, y, 0.0));
        }
        mesh.faces = vec![[0, 1, 2], [0, 2, 3], [4, 5, 6]];
        mesh
    }

    #[test]
    fn test_find_components() {
        let analysis = find_connected_components(&create_two_components());
        assert_eq!(analysis.component_count, 2);
        assert_eq!(analysis.largest_component_size, 2);
        assert_eq!(analysis.smallest_component_size, 1);
        assert!(!analysis.is_connected());
    }

    #[test]
    fn test_keep_largest_component() {
        let mut mesh = create_two_components();
        let removed = keep_largest_component(&mut mesh);
        assert_eq!(removed, 1);
        assert_eq!(mesh.face_count(), 2);
        assert_eq!(mesh.vertex_count(), 4);
    }

    #[test]
    fn test_empty_mesh() {
        let analysis = find_connected_components(&Mesh::new());
        assert_eq!(analysis.component_count, 0);
        assert!(analysis.largest_component().is_empty());
    }
}
