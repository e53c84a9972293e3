//! Post-extraction cleanup: smoothing, long-edge filtering, clipping.

use hashbrown::HashSet;
use nalgebra::Vector3;
use tracing::{debug, info};

use crate::hexahedron::Hexahedron;
use crate::types::Mesh;

/// Average length over all unique edges, `None` for a mesh without faces.
pub fn average_edge_length(mesh: &Mesh) -> Option<f64> {
    let mut seen: HashSet<(u32, u32)> = HashSet::with_capacity(mesh.faces.len() * 2);
    let mut total = 0.0;
    for face in &mesh.faces {
        for k in 0..3 {
            let (a, b) = (face[k], face[(k + 1) % 3]);
            if seen.insert((a.min(b), a.max(b))) {
                total += (mesh.vertices[a as usize].position - mesh.vertices[b as usize].position)
                    .norm();
            }
        }
    }
    (!seen.is_empty()).then(|| total / seen.len() as f64)
}

/// Laplacian smoothing: each iteration moves every vertex by `lambda` toward the
/// centroid of its edge neighbors. Vertices without neighbors do not move.
pub fn laplacian_smooth(mesh: &mut Mesh, iterations: usize, lambda: f64) {
    if iterations == 0 || mesh.faces.is_empty() {
        return;
    }

    let mut neighbors: Vec<Vec<u32>> = vec![Vec::new(); mesh.vertices.len()];
    for face in &mesh.faces {
        for k in 0..3 {
            let (a, b) = (face[k], face[(k + 1) % 3]);
            neighbors[a as usize].push(b);
            neighbors[b as usize].push(a);
        }
    }
    for list in &mut neighbors {
        list.sort_unstable();
        list.dedup();
    }

    for _ in 0..iterations {
        let displacements: Vec<Vector3<f64>> = neighbors
            .iter()
            .enumerate()
            .map(|(vi, list)| {
                if list.is_empty() {
                    return Vector3::zeros();
                }
                let sum = list
                    .iter()
                    .fold(Vector3::zeros(), |acc, &n| acc + mesh.vertices[n as usize].position.coords);
                (sum / list.len() as f64 - mesh.vertices[vi].position.coords) * lambda
            })
            .collect();
        for (vertex, d) in mesh.vertices.iter_mut().zip(displacements) {
            vertex.position += d;
        }
    }

    debug!("Laplacian smoothing: {} iterations, lambda={}", iterations, lambda);
}

/// Remove triangles whose longest edge exceeds `ratio` times the average edge
/// length. Returns the number of triangles removed.
pub fn filter_large_edge_triangles(mesh: &mut Mesh, ratio: f64) -> usize {
    let Some(avg) = average_edge_length(mesh) else {
        return 0;
    };
    let limit = avg * ratio;
    let vertices = &mesh.vertices;
    let before = mesh.faces.len();
    mesh.faces.retain(|face| {
        let [a, b, c] = face.map(|i| vertices[i as usize].position);
        let longest = (b - a).norm().max((c - b).norm()).max((a - c).norm());
        longest <= limit
    });
    let removed = before - mesh.faces.len();
    if removed > 0 {
        info!(
            "Removed {} triangles with an edge longer than {:.4} ({}x average)",
            removed, limit, ratio
        );
    }
    removed
}

/// Remove triangles with at least one vertex outside `hexahedron`.
pub fn remove_triangles_outside_hexahedron(mesh: &mut Mesh, hexahedron: &Hexahedron) -> usize {
    let inside: Vec<bool> = mesh
        .vertices
        .iter()
        .map(|v| hexahedron.contains(&v.position))
        .collect();
    let before = mesh.faces.len();
    mesh.faces
        .retain(|face| face.iter().all(|&vi| inside[vi as usize]));
    before - mesh.faces.len()
}

/// Drop vertices no face references and reindex faces. Returns the number removed.
pub fn remove_unreferenced_vertices(mesh: &mut Mesh) -> usize {
    let mut remap = vec![u32::MAX; mesh.vertices.len()];
    for face in &mesh.faces {
        for &vi in face {
            remap[vi as usize] = 0;
        }
    }

    let mut next = 0u32;
    for slot in remap.iter_mut() {
        if *slot == 0 {
            *slot = next;
            next += 1;
        }
    }

    let before = mesh.vertices.len();
    let mut index = 0;
    mesh.vertices.retain(|_| {
        let keep = remap[index] != u32::MAX;
        index += 1;
        keep
    });
    for face in &mut mesh.faces {
        for vi in face.iter_mut() {
            *vi = remap[*vi as usize];
        }
    }
    before - mesh.vertices.len()
}

/// Flip the winding of every face.
pub fn invert_orientation(mesh: &mut Mesh) {
    for face in &mut mesh.faces {
        face.swap(1, 2);
    }
    for vertex in &mut mesh.vertices {
        if let Some(n) = vertex.normal.as_mut() {
            *n = -*n;
        }
    }
}
