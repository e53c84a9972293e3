//! Connected segments of cells and vertices, and the label clean-up passes
//! built on them.
//!
//! A segment is a maximal set of cells with the same label connected through
//! shared facets. Infinite cells are always empty, so they only ever belong to
//! empty segments.

use tracing::debug;

use crate::delaunay::NO_CELL;
use crate::graph::{DelaunayGraphCut, GcVertexInfo, VertexKind};
use crate::params::PostProcessParams;

/// Segment id of cells that do not carry the segmented label.
pub const NO_SEGMENT: u32 = u32::MAX;

/// Result of [`DelaunayGraphCut::segment_full_or_free`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segmentation {
    /// Segment of each cell, [`NO_SEGMENT`] for cells with the other label.
    pub cell_segment: Vec<u32>,
    /// Number of cells in each segment.
    pub sizes: Vec<usize>,
    /// Whether each segment contains an infinite cell.
    pub has_infinite: Vec<bool>,
    /// Whether each segment contains a cell incident to a camera center.
    pub touches_camera: Vec<bool>,
}

impl Segmentation {
    #[inline]
    pub fn segment_of(&self, ci: u32) -> Option<u32> {
        match self.cell_segment.get(ci as usize) {
            Some(&s) if s != NO_SEGMENT => Some(s),
            _ => None,
        }
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    /// Largest segment; the lowest id wins ties.
    pub fn largest(&self) -> Option<u32> {
        self.sizes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
            .map(|(i, _)| i as u32)
    }
}

/// Cells changed by each pass of [`DelaunayGraphCut::graph_cut_post_processing`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostProcessReport {
    pub inverted_small_labels: usize,
    pub inverted_isolated_cells: usize,
    pub filled_bubbles: usize,
    pub dust_cells: usize,
    pub removed_segment_cells: usize,
}

impl PostProcessReport {
    /// Total number of label changes.
    pub fn total(&self) -> usize {
        self.inverted_small_labels
            + self.inverted_isolated_cells
            + self.filled_bubbles
            + self.dust_cells
            + self.removed_segment_cells
    }
}

/// Union-find over vertex indices.
#[derive(Debug, Clone)]
struct DisjointSet {
    parent: Vec<usize>,
    size: Vec<u32>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut x = x;
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) -> bool {
        let mut a = self.find(a);
        let mut b = self.find(b);
        if a == b {
            return false;
        }
        if self.size[a] < self.size[b] {
            std::mem::swap(&mut a, &mut b);
        }
        self.parent[b] = a;
        self.size[a] += self.size[b];
        true
    }
}

/// Local vertex pairs of the six edges of a cell.
const CELL_EDGES: [(usize, usize); 6] = [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

impl DelaunayGraphCut {
    /// Label of a cell as seen by the segmentation: infinite cells are empty.
    #[inline]
    fn label(&self, ci: u32) -> bool {
        self.cell_is_full[ci as usize] && !self.is_infinite_cell(ci)
    }

    /// Cells incident to any camera-center vertex.
    fn camera_cells(&self) -> Vec<bool> {
        let mut marked = vec![false; self.nb_cells()];
        for &cv in &self.cams_vertexes {
            if !self.is_finite_vertex(cv) {
                continue;
            }
            for &c in &self.neighbour_cells[cv as usize] {
                marked[c as usize] = true;
            }
        }
        marked
    }

    /// Flood-fill the cells labeled `full` into connected segments.
    pub fn segment_full_or_free(&self, full: bool) -> Segmentation {
        let n = self.nb_cells();
        let camera_cells = self.camera_cells();
        let mut seg = Segmentation {
            cell_segment: vec![NO_SEGMENT; n],
            ..Segmentation::default()
        };
        let mut stack = Vec::new();

        for start in 0..n as u32 {
            if seg.cell_segment[start as usize] != NO_SEGMENT || self.label(start) != full {
                continue;
            }
            let id = seg.sizes.len() as u32;
            let (mut size, mut infinite, mut camera) = (0usize, false, false);
            seg.cell_segment[start as usize] = id;
            stack.push(start);
            while let Some(c) = stack.pop() {
                size += 1;
                infinite |= self.is_infinite_cell(c);
                camera |= camera_cells[c as usize];
                for k in 0..4 {
                    let nc = self.adjacent(c, k);
                    if nc == NO_CELL || seg.cell_segment[nc as usize] != NO_SEGMENT || self.label(nc) != full {
                        continue;
                    }
                    seg.cell_segment[nc as usize] = id;
                    stack.push(nc);
                }
            }
            seg.sizes.push(size);
            seg.has_infinite.push(infinite);
            seg.touches_camera.push(camera);
        }
        seg
    }

    /// Fill empty segments enclosed by full cells: no infinite cell and no
    /// camera-center cell. Returns the number of cells filled.
    pub fn remove_bubbles(&mut self) -> usize {
        let seg = self.segment_full_or_free(false);
        let mut filled = 0;
        for c in 0..self.nb_cells() {
            let Some(s) = seg.segment_of(c as u32) else {
                continue;
            };
            if !seg.has_infinite[s as usize] && !seg.touches_camera[s as usize] {
                self.cell_is_full[c] = true;
                filled += 1;
            }
        }
        debug!("Filled {} bubble cells", filled);
        filled
    }

    /// Relabel segments with fewer than `min_seg_size` cells.
    ///
    /// Small full segments become empty first. Small empty segments then become
    /// full, except those that reach an infinite cell or a camera center.
    /// Returns the number of cells relabeled.
    pub fn remove_dust(&mut self, min_seg_size: usize) -> usize {
        let mut changed = 0;

        let full = self.segment_full_or_free(true);
        for c in 0..self.nb_cells() {
            if let Some(s) = full.segment_of(c as u32) {
                if full.sizes[s as usize] < min_seg_size {
                    self.cell_is_full[c] = false;
                    changed += 1;
                }
            }
        }

        let empty = self.segment_full_or_free(false);
        for c in 0..self.nb_cells() {
            let Some(s) = empty.segment_of(c as u32) else {
                continue;
            };
            let s = s as usize;
            if empty.sizes[s] < min_seg_size && !empty.has_infinite[s] && !empty.touches_camera[s] {
                self.cell_is_full[c] = true;
                changed += 1;
            }
        }
        debug!("Removed {} dust cells (min segment size {})", changed, min_seg_size);
        changed
    }

    /// Empty every full segment except the largest. Returns the number of cells emptied.
    pub fn leave_largest_full_segment_only(&mut self) -> usize {
        let seg = self.segment_full_or_free(true);
        let Some(largest) = seg.largest() else {
            return 0;
        };
        let mut emptied = 0;
        for c in 0..self.nb_cells() {
            if matches!(seg.segment_of(c as u32), Some(s) if s != largest) {
                self.cell_is_full[c] = false;
                emptied += 1;
            }
        }
        debug!(
            "Kept the largest of {} full segments ({} cells), emptied {}",
            seg.len(),
            seg.sizes[largest as usize],
            emptied
        );
        emptied
    }

    /// Give each finite cell with at least three neighbours of the opposite
    /// label that label. Labels are read before any change is applied.
    pub fn invert_isolated_cells(&mut self) -> usize {
        let flips: Vec<u32> = (0..self.nb_cells() as u32)
            .filter(|&c| !self.is_infinite_cell(c))
            .filter(|&c| {
                let own = self.label(c);
                let opposite = (0..4)
                    .map(|k| self.adjacent(c, k))
                    .filter(|&nc| nc != NO_CELL && self.label(nc) != own)
                    .count();
                opposite >= 3
            })
            .collect();
        for &c in &flips {
            let full = &mut self.cell_is_full[c as usize];
            *full = !*full;
        }
        flips.len()
    }

    /// Run the enabled clean-up passes in order: small full labels, isolated
    /// cells, bubbles, dust, then the largest-segment filter.
    pub fn graph_cut_post_processing(&mut self, params: &PostProcessParams) -> PostProcessReport {
        let mut report = PostProcessReport::default();
        if params.invert_small_labels {
            report.inverted_small_labels = self.invert_full_status_for_small_labels(params.small_label_threshold);
        }
        if params.invert_isolated_cells {
            report.inverted_isolated_cells = self.invert_isolated_cells();
        }
        if params.remove_bubbles {
            report.filled_bubbles = self.remove_bubbles();
        }
        if params.remove_dust {
            report.dust_cells = self.remove_dust(params.min_segment_size);
        }
        if params.leave_largest_full_segment_only {
            report.removed_segment_cells = self.leave_largest_full_segment_only();
        }
        report
    }

    /// Group observed vertices into point-cloud segments joined by Delaunay
    /// edges and store each vertex's segment id and size.
    ///
    /// With `all_points` camera centers and helpers join segments too. A
    /// positive `alpha` keeps only edges shorter than `alpha` times the larger
    /// pixel size of their endpoints. Returns the number of segments.
    pub fn compute_vertices_seg_size(&mut self, all_points: bool, alpha: f32) -> usize {
        let n = self.nb_vertices();
        let eligible = |attr: &GcVertexInfo| all_points || attr.kind == VertexKind::Observed;
        let mut dsu = DisjointSet::new(n);

        for c in 0..self.nb_cells() as u32 {
            let cell = *self.tet.cell(c);
            for &(i, j) in &CELL_EDGES {
                let (a, b) = (cell[i], cell[j]);
                if !self.is_finite_vertex(a) || !self.is_finite_vertex(b) {
                    continue;
                }
                let (va, vb) = (&self.vertices_attr[a as usize], &self.vertices_attr[b as usize]);
                if !eligible(va) || !eligible(vb) {
                    continue;
                }
                if alpha > 0.0 {
                    let limit = alpha as f64 * va.pix_size.max(vb.pix_size) as f64;
                    if (self.point(a) - self.point(b)).norm() >= limit {
                        continue;
                    }
                }
                dsu.union(a as usize, b as usize);
            }
        }

        let mut root_to_segment = vec![NO_SEGMENT; n];
        let mut segments = 0u32;
        for vi in 0..n {
            if !eligible(&self.vertices_attr[vi]) || self.neighbour_cells[vi].is_empty() {
                self.vertices_attr[vi].seg_id = None;
                self.vertices_attr[vi].seg_size = 0;
                continue;
            }
            let root = dsu.find(vi);
            if root_to_segment[root] == NO_SEGMENT {
                root_to_segment[root] = segments;
                segments += 1;
            }
            self.vertices_attr[vi].seg_id = Some(root_to_segment[root]);
            self.vertices_attr[vi].seg_size = dsu.size[root];
        }
        debug!("{} point-cloud segments over {} vertices", segments, n);
        segments as usize
    }

    /// Clear the observations of observed vertices in segments smaller than
    /// `min_seg_size` so they cast no votes. Run after
    /// [`compute_vertices_seg_size`](Self::compute_vertices_seg_size).
    pub fn remove_small_segs(&mut self, min_seg_size: u32) -> usize {
        let mut removed = 0;
        for attr in &mut self.vertices_attr {
            if attr.kind == VertexKind::Observed && attr.seg_id.is_some() && attr.seg_size < min_seg_size {
                attr.cams.clear();
                attr.nrc = 0;
                removed += 1;
            }
        }
        debug!("Silenced {} vertices in segments below {} points", removed, min_seg_size);
        removed
    }
}
