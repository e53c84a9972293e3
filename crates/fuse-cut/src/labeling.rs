//! Minimum cut and cell labeling.

use mvs_mesh::Hexahedron;
use rayon::prelude::*;
use tracing::debug;

use crate::delaunay::NO_CELL;
use crate::graph::{DelaunayGraphCut, Facet};
use crate::maxflow::MaxFlow;
use crate::observer::{Stage, StageSummary};
use crate::params::{PostProcessParams, VotingParams};
use crate::segments::PostProcessReport;

/// Outcome of [`DelaunayGraphCut::reconstruct_gc`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CutReport {
    /// Value of the maximum flow.
    pub flow: f64,
    /// Full cells right after the cut.
    pub full_cells: usize,
    /// Full cells freed for touching a camera or lying outside the region.
    pub freed_cells: usize,
    pub post_processing: PostProcessReport,
    /// Surface facets after post-processing.
    pub surface_facets: usize,
}

impl DelaunayGraphCut {
    /// Cut, bound to `hexah`, clean the labels and mark the surface.
    pub fn reconstruct_gc(
        &mut self,
        hexah: &Hexahedron,
        voting: &VotingParams,
        post: &PostProcessParams,
    ) -> CutReport {
        let timer = self.begin_stage(Stage::MinCut);
        let (flow, full_cells) = self.max_flow(voting);
        self.end_stage(
            Stage::MinCut,
            timer,
            StageSummary::new().with("full_cells", full_cells),
        );

        let timer = self.begin_stage(Stage::PostProcessing);
        let freed_cells = self.free_unwanted_full_cells(hexah);
        let post_processing = self.graph_cut_post_processing(post);
        let surface_facets = self.set_is_on_surface();
        let summary = StageSummary::new()
            .with("freed_cells", freed_cells)
            .with("inverted_small_labels", post_processing.inverted_small_labels)
            .with("inverted_isolated_cells", post_processing.inverted_isolated_cells)
            .with("filled_bubbles", post_processing.filled_bubbles)
            .with("dust_cells", post_processing.dust_cells)
            .with("removed_segment_cells", post_processing.removed_segment_cells)
            .with("surface_facets", surface_facets);
        self.end_stage(Stage::PostProcessing, timer, summary);

        CutReport {
            flow,
            full_cells,
            freed_cells,
            post_processing,
            surface_facets,
        }
    }

    /// Solve the s-t cut over the cell graph and label cells. Sink-side cells
    /// are full; infinite cells are always empty.
    ///
    /// Returns the flow value and the number of full cells.
    pub fn max_flow(&mut self, params: &VotingParams) -> (f64, usize) {
        let n = self.nb_cells();
        let max_edge_length = if params.normalize_by_edge_length {
            self.max_edge_length()
        } else {
            0.0
        };
        let capacities: Vec<[f64; 4]> = (0..n as u32)
            .into_par_iter()
            .map(|c| {
                let mut caps = [0.0; 4];
                for (k, cap) in caps.iter_mut().enumerate() {
                    *cap = self.facet_capacity(Facet::new(c, k), params, max_edge_length);
                }
                caps
            })
            .collect();

        let mut graph = MaxFlow::with_capacity(n, 2 * n);
        for c in 0..n as u32 {
            let attr = &self.cells_attr[c as usize];
            graph.add_tedge(c as usize, attr.source_weight as f64, attr.sink_weight as f64);
            for k in 0..4 {
                let neighbor = self.adjacent(c, k);
                if neighbor == NO_CELL || neighbor < c {
                    continue;
                }
                let Some(mirror) = self.mirror_facet(Facet::new(c, k)) else {
                    continue;
                };
                graph.add_edge(
                    c as usize,
                    neighbor as usize,
                    capacities[c as usize][k],
                    capacities[neighbor as usize][mirror.local],
                );
            }
        }

        let flow = graph.compute();
        for c in 0..n as u32 {
            self.cell_is_full[c as usize] = graph.is_sink_side(c as usize) && !self.is_infinite_cell(c);
        }
        let full = self.cell_is_full.iter().filter(|&&f| f).count();
        debug!("Max flow {:.3}: {} of {} cells full", flow, full, n);
        (flow, full)
    }

    /// Mark vertices of surface facets and return the number of surface facets:
    /// faces of full cells whose other side is empty, infinite or outside.
    pub fn set_is_on_surface(&mut self) -> usize {
        for attr in &mut self.vertices_attr {
            attr.is_on_surface = false;
        }
        let mut count = 0;
        for c in 0..self.nb_cells() as u32 {
            if !self.cell_is_full[c as usize] {
                continue;
            }
            for k in 0..4 {
                if !self.is_surface_facet(Facet::new(c, k)) {
                    continue;
                }
                count += 1;
                for v in self.facet_vertices(Facet::new(c, k)) {
                    if self.is_finite_vertex(v) {
                        self.vertices_attr[v as usize].is_on_surface = true;
                    }
                }
            }
        }
        count
    }

    /// Whether `f` separates a full cell from an empty, infinite or missing one.
    pub fn is_surface_facet(&self, f: Facet) -> bool {
        if !self.cell_is_full[f.cell as usize] {
            return false;
        }
        let neighbor = self.adjacent(f.cell, f.local);
        self.is_invalid_or_infinite_cell(neighbor) || !self.cell_is_full[neighbor as usize]
    }

    /// Empty every full cell incident to a camera center or with its barycenter
    /// outside `hexah`. Returns the number of cells freed.
    pub fn free_unwanted_full_cells(&mut self, hexah: &Hexahedron) -> usize {
        let mut freed = 0;
        for &cv in &self.cams_vertexes {
            if !self.is_finite_vertex(cv) {
                continue;
            }
            for &c in &self.neighbour_cells[cv as usize] {
                if self.cell_is_full[c as usize] {
                    self.cell_is_full[c as usize] = false;
                    freed += 1;
                }
            }
        }
        for c in 0..self.nb_cells() as u32 {
            if self.cell_is_full[c as usize] && !hexah.contains(&self.cell_barycenter(c)) {
                self.cell_is_full[c as usize] = false;
                freed += 1;
            }
        }
        debug!("Freed {} unwanted full cells", freed);
        freed
    }

    /// Flip full segments with fewer than `threshold` cells to empty.
    /// Returns the number of cells flipped.
    pub fn invert_full_status_for_small_labels(&mut self, threshold: usize) -> usize {
        let segmentation = self.segment_full_or_free(true);
        let mut flipped = 0;
        for c in 0..self.nb_cells() {
            if let Some(seg) = segmentation.segment_of(c as u32) {
                if segmentation.sizes[seg as usize] < threshold {
                    self.cell_is_full[c] = false;
                    flipped += 1;
                }
            }
        }
        flipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::graph::tests::small_graph;
    use nalgebra::Point3;

    #[test]
    fn test_surface_of_single_full_cell() {
        let mut gc = small_graph();
        let c = gc.neighboring_cells_by_vertex_index(4)[0];
        gc.set_cell_full(c, true);
        assert_eq!(gc.set_is_on_surface(), 4);
        for k in 0..4 {
            let f = Facet::new(c, k);
            assert!(gc.is_surface_facet(f));
            for v in gc.facet_vertices(f) {
                assert!(gc.vertex_info(v).is_on_surface);
            }
        }
    }

    #[test]
    fn test_max_flow_follows_terminal_weights() {
        let mut gc = small_graph();
        let params = VotingParams::default();
        let inner = gc.neighboring_cells_by_vertex_index(4).to_vec();
        for &c in &inner {
            gc.cells_attr[c as usize].sink_weight = 10.0;
        }
        gc.add_to_infinite_sw(params.infinite_cells_source_weight);
        let (_, full) = gc.max_flow(&params);
        assert_eq!(full, inner.len());
        for c in 0..gc.nb_cells() as u32 {
            assert_eq!(gc.is_cell_full(c), inner.contains(&c));
        }
    }

    #[test]
    fn test_visibility_keeps_cell_empty() {
        let mut gc = small_graph();
        let params = VotingParams::default();
        let inner = gc.neighboring_cells_by_vertex_index(4).to_vec();
        let (a, b) = (inner[0], inner[1]);
        gc.cells_attr[a as usize].sink_weight = 1.0;
        gc.cells_attr[b as usize].source_weight = 100.0;
        // Strong visibility from b into a: cutting between them is expensive
        let k = (0..4).find(|&k| gc.adjacent(b, k) == a).unwrap();
        gc.cells_attr[b as usize].vis_weight[k] = 50.0;
        let (flow, _) = gc.max_flow(&params);
        assert!(!gc.is_cell_full(a));
        assert_relative_eq!(flow, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_free_unwanted_outside_region() {
        let mut gc = small_graph();
        for c in 0..gc.nb_cells() as u32 {
            gc.set_cell_full(c, true);
        }
        let inside = Hexahedron::from_bounds(Point3::new(-1.0, -1.0, -1.0), Point3::new(2.0, 2.0, 2.0));
        assert_eq!(gc.free_unwanted_full_cells(&inside), 0);
        let tiny = Hexahedron::from_bounds(Point3::new(5.0, 5.0, 5.0), Point3::new(6.0, 6.0, 6.0));
        assert_eq!(gc.free_unwanted_full_cells(&tiny), 4);
        assert!(gc.cell_is_full().iter().all(|&f| !f));
    }

    #[test]
    fn test_invert_small_labels() {
        let mut gc = small_graph();
        let c = gc.neighboring_cells_by_vertex_index(4)[0];
        gc.set_cell_full(c, true);
        assert_eq!(gc.invert_full_status_for_small_labels(1), 0);
        assert_eq!(gc.invert_full_status_for_small_labels(2), 1);
        assert!(!gc.is_cell_full(c));
    }
}
