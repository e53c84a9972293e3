//! Surface and tetrahedral mesh extraction.

use mvs_mesh::{Mesh, Vertex};
use tracing::debug;

use crate::graph::{DelaunayGraphCut, Facet};
use crate::observer::{Stage, StageSummary};

/// Output of [`DelaunayGraphCut::create_mesh`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedMesh {
    pub mesh: Mesh,
    /// Surface facets found on the labeled triangulation.
    pub surface_facets: usize,
    /// Surface facets dropped for touching a camera center or helper point.
    pub filtered_triangles: usize,
}

impl DelaunayGraphCut {
    /// Vertices of `f` ordered so the triangle normal points away from `f.cell`.
    fn outward_facet_vertices(&self, f: Facet) -> [u32; 3] {
        let [a, b, c] = self.facet_vertices(f);
        let (pa, pb, pc) = (self.point(a), self.point(b), self.point(c));
        let normal = (pb - pa).cross(&(pc - pa));
        let inside = self.tet.point(self.opposite_vertex(f)) - pa;
        if normal.dot(&inside) > 0.0 { [a, c, b] } else { [a, b, c] }
    }

    /// One triangle per surface facet, wound counter-clockwise seen from the
    /// empty side. Vertices are renumbered in increasing original index.
    ///
    /// With `filter_helper_points_triangles`, facets touching a camera center
    /// or helper vertex are skipped.
    pub fn create_mesh(&self, filter_helper_points_triangles: bool) -> ExtractedMesh {
        let timer = self.begin_stage(Stage::Extraction);

        let mut triangles: Vec<[u32; 3]> = Vec::new();
        let mut surface_facets = 0;
        let mut filtered_triangles = 0;
        for c in 0..self.nb_cells() as u32 {
            if !self.cell_is_full[c as usize] {
                continue;
            }
            for k in 0..4 {
                let f = Facet::new(c, k);
                if !self.is_surface_facet(f) {
                    continue;
                }
                surface_facets += 1;
                let tri = self.outward_facet_vertices(f);
                if filter_helper_points_triangles
                    && tri.iter().any(|&v| self.vertices_attr[v as usize].is_virtual())
                {
                    filtered_triangles += 1;
                    continue;
                }
                triangles.push(tri);
            }
        }

        let mut remap = vec![u32::MAX; self.nb_vertices()];
        for tri in &triangles {
            for &v in tri {
                remap[v as usize] = 0;
            }
        }
        let mut mesh = Mesh::with_capacity(remap.iter().filter(|&&r| r == 0).count(), triangles.len());
        for (vi, slot) in remap.iter_mut().enumerate() {
            if *slot == u32::MAX {
                continue;
            }
            *slot = mesh.vertices.len() as u32;
            let attr = &self.vertices_attr[vi];
            mesh.vertices.push(
                Vertex::new(self.vertices_coords[vi])
                    .with_visibility(attr.cams.clone())
                    .with_color(attr.color),
            );
        }
        mesh.faces = triangles
            .iter()
            .map(|tri| tri.map(|v| remap[v as usize]))
            .collect();

        debug!(
            "Extracted {} triangles over {} vertices ({} filtered)",
            mesh.face_count(),
            mesh.vertex_count(),
            filtered_triangles
        );
        let summary = StageSummary::new()
            .with("surface_facets", surface_facets)
            .with("triangles", mesh.face_count())
            .with("vertices", mesh.vertex_count())
            .with("filtered_triangles", filtered_triangles);
        self.end_stage(Stage::Extraction, timer, summary);

        ExtractedMesh {
            mesh,
            surface_facets,
            filtered_triangles,
        }
    }

    /// Every face of every finite cell, each wound outward from its cell,
    /// regardless of labels. Vertex indices are those of the triangulation.
    pub fn create_tetrahedral_mesh(&self) -> Mesh {
        let finite = (0..self.nb_cells() as u32)
            .filter(|&c| !self.is_infinite_cell(c))
            .collect::<Vec<_>>();
        let mut mesh = Mesh::with_capacity(self.nb_vertices(), 4 * finite.len());
        mesh.vertices = self
            .vertices_coords
            .iter()
            .map(|&p| Vertex::new(p))
            .collect();
        for c in finite {
            for k in 0..4 {
                mesh.faces.push(self.outward_facet_vertices(Facet::new(c, k)));
            }
        }
        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::graph::tests::small_graph;
    use crate::graph::{GcVertexInfo, VertexKind};

    #[test]
    fn test_empty_labels_give_empty_mesh() {
        let gc = small_graph();
        let out = gc.create_mesh(true);
        assert!(out.mesh.is_empty());
        assert_eq!(out.surface_facets, 0);
    }

    #[test]
    fn test_closed_surface_of_full_star() {
        let mut gc = small_graph();
        for c in gc.neighboring_cells_by_vertex_index(4).to_vec() {
            gc.set_cell_full(c, true);
        }
        let out = gc.create_mesh(true);
        // The hull of the unit tetrahedron: 4 outer faces, interior vertex unused
        assert_eq!(out.mesh.face_count(), 4);
        assert_eq!(out.mesh.vertex_count(), 4);
        assert_eq!(out.filtered_triangles, 0);
        // Outward winding gives a positive enclosed volume
        assert!(out.mesh.signed_volume() > 0.0);
        assert_relative_eq!(out.mesh.signed_volume(), 1.0 / 6.0, epsilon = 1e-9);
    }

    #[test]
    fn test_helper_triangles_filtered() {
        let mut gc = small_graph();
        gc.vertices_attr[0].kind = VertexKind::Helper;
        for c in gc.neighboring_cells_by_vertex_index(4).to_vec() {
            gc.set_cell_full(c, true);
        }
        let kept = gc.create_mesh(true);
        // Three of the hull faces touch vertex 0
        assert_eq!(kept.mesh.face_count(), 1);
        assert_eq!(kept.filtered_triangles, 3);
        assert_eq!(kept.surface_facets, 4);
        assert_eq!(gc.create_mesh(false).mesh.face_count(), 4);
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let mut gc = small_graph();
        let c = gc.neighboring_cells_by_vertex_index(4)[1];
        gc.set_cell_full(c, true);
        assert_eq!(gc.create_mesh(true), gc.create_mesh(true));
    }

    #[test]
    fn test_vertex_attributes_carried() {
        let mut gc = small_graph();
        gc.vertices_attr[1] = GcVertexInfo::observed(0.01, vec![3, 7]);
        for c in gc.neighboring_cells_by_vertex_index(4).to_vec() {
            gc.set_cell_full(c, true);
        }
        let mesh = gc.create_mesh(true).mesh;
        // Ascending remap keeps vertex 1 at index 1
        assert_eq!(mesh.vertices[1].visibility, vec![3, 7]);
        assert_eq!(mesh.vertices[1].position, *gc.point(1));
    }

    #[test]
    fn test_tetrahedral_mesh_covers_finite_cells() {
        let gc = small_graph();
        let mesh = gc.create_tetrahedral_mesh();
        assert_eq!(mesh.vertex_count(), 5);
        assert_eq!(mesh.face_count(), 16);
        // Outward faces of a partition of the unit tetrahedron add up to its volume
        assert_relative_eq!(mesh.signed_volume(), 1.0 / 6.0, epsilon = 1e-9);
    }
}
