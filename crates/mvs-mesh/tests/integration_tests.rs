//! Integration tests for the mesh container: file round trips and cleanup chains.

use mvs_mesh::{Hexahedron, Mesh, Vertex, VertexColor, cleanup, keep_largest_component};
use nalgebra::Point3;

// =============================================================================
// Fixtures
// =============================================================================

/// Regular octahedron centered on `center`, outward winding.
fn octahedron(center: Point3<f64>, radius: f64) -> Mesh {
    let mut mesh = Mesh::new();
    let offsets = [
        (1.0, 0.0, 0.0),
        (-1.0, 0.0, 0.0),
        (0.0, 1.0, 0.0),
        (0.0, -1.0, 0.0),
        (0.0, 0.0, 1.0),
        (0.0, 0.0, -1.0),
    ];
    for (i, (x, y, z)) in offsets.into_iter().enumerate() {
        mesh.vertices.push(
            Vertex::from_coords(center.x + x * radius, center.y + y * radius, center.z + z * radius)
                .with_color(VertexColor::new(40 * i as u8, 0, 0))
                .with_visibility(vec![i as u32, 7]),
        );
    }
    mesh.faces = vec![
        [0, 2, 4],
        [2, 1, 4],
        [1, 3, 4],
        [3, 0, 4],
        [2, 0, 5],
        [1, 2, 5],
        [3, 1, 5],
        [0, 3, 5],
    ];
    mesh
}

// =============================================================================
// Round trips
// =============================================================================

#[test]
fn test_ply_round_trip_preserves_attributes() {
    let mesh = octahedron(Point3::origin(), 1.0);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("octa.ply");

    mesh.save(&path).unwrap();
    let loaded = Mesh::load(&path).unwrap();

    assert_eq!(loaded.faces, mesh.faces);
    for (a, b) in loaded.vertices.iter().zip(&mesh.vertices) {
        assert!((a.position - b.position).norm() < 1e-6);
        assert_eq!(a.color, b.color);
        assert_eq!(a.visibility, b.visibility);
    }
    assert!(loaded.signed_volume() > 0.0);
}

#[test]
fn test_obj_round_trip_keeps_geometry() {
    let mesh = octahedron(Point3::new(1.0, 2.0, 3.0), 0.5);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("octa.obj");

    mesh.save(&path).unwrap();
    let loaded = Mesh::load(&path).unwrap();

    assert_eq!(loaded.face_count(), 8);
    approx::assert_relative_eq!(loaded.surface_area(), mesh.surface_area(), epsilon = 1e-4);
}

// =============================================================================
// Cleanup chains
// =============================================================================

#[test]
fn test_largest_component_then_clip() {
    let mut mesh = octahedron(Point3::origin(), 1.0);
    let other = octahedron(Point3::new(10.0, 0.0, 0.0), 0.5);
    let offset = mesh.vertices.len() as u32;
    mesh.vertices.extend(other.vertices);
    mesh.faces
        .extend(other.faces.iter().map(|f| f.map(|v| v + offset)));

    assert_eq!(keep_largest_component(&mut mesh), 8);
    assert_eq!(mesh.vertex_count(), 6);

    let hex = Hexahedron::from_bounds(Point3::new(-2.0, -2.0, 0.0), Point3::new(2.0, 2.0, 2.0));
    // Only the four faces around the top apex stay inside
    assert_eq!(cleanup::remove_triangles_outside_hexahedron(&mut mesh, &hex), 4);
    assert_eq!(cleanup::remove_unreferenced_vertices(&mut mesh), 1);
}

#[test]
fn test_invert_then_volume_sign() {
    let mut mesh = octahedron(Point3::origin(), 2.0);
    let volume = mesh.signed_volume();
    cleanup::invert_orientation(&mut mesh);
    approx::assert_relative_eq!(mesh.signed_volume(), -volume);
}
