//! Graph-cut state over a Delaunay tetrahedralization.
//!
//! [`DelaunayGraphCut`] owns the point cloud, the tetrahedralization built over
//! it and the attribute arrays the later stages write into. Vertices, cells and
//! facets are addressed by plain indices; a [`Facet`] is a cell plus the local
//! index of the vertex opposite the face.
//!
//! After [`DelaunayGraphCut::compute_delaunay`]:
//! - `cells_attr.len() == cell_is_full.len() == nb_cells()`
//! - `vertices_attr.len() == nb_vertices()`
//! - every vertex has an entry in the incident-cells cache (empty for skipped
//!   duplicates)

use std::sync::Arc;

use mvs_mesh::VertexColor;
use nalgebra::{Point3, Vector3};

use crate::camera::MultiViewParams;
use crate::delaunay::{NO_CELL, NO_VERTEX, Tetrahedralization, index_of};
use crate::error::FuseCutResult;
use crate::observer::{ReconstructionObserver, Stage, StageSummary, TracingObserver};
use crate::tracing_ext::StageTimer;

/// Origin of a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexKind {
    /// Fused from depth maps or taken from SfM landmarks.
    Observed,
    /// A camera optical center.
    CameraCenter,
    /// Inserted only to stabilize the triangulation.
    Helper,
}

/// Per-vertex attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct GcVertexInfo {
    pub kind: VertexKind,
    /// World size of one pixel at this point, in its closest observing camera.
    pub pix_size: f32,
    /// Photo-consistency cost of the point; lower is better.
    pub sim_score: f32,
    /// Number of cameras supporting the point.
    pub nrc: u32,
    /// Ids of the cameras that observed the point.
    pub cams: Vec<u32>,
    /// Size of the point-cloud segment containing the vertex.
    pub seg_size: u32,
    pub seg_id: Option<u32>,
    pub is_on_surface: bool,
    pub color: VertexColor,
    /// Surface evidence deposited by observations ending at this vertex.
    pub surface_votes: f32,
}

impl GcVertexInfo {
    pub fn observed(pix_size: f32, cams: Vec<u32>) -> Self {
        Self {
            kind: VertexKind::Observed,
            pix_size,
            sim_score: 0.0,
            nrc: cams.len() as u32,
            cams,
            seg_size: 0,
            seg_id: None,
            is_on_surface: false,
            color: VertexColor::default(),
            surface_votes: 0.0,
        }
    }

    pub fn camera_center(cam: u32) -> Self {
        Self {
            kind: VertexKind::CameraCenter,
            cams: vec![cam],
            nrc: 0,
            ..Self::observed(0.0, Vec::new())
        }
    }

    pub fn helper() -> Self {
        Self {
            kind: VertexKind::Helper,
            ..Self::observed(0.0, Vec::new())
        }
    }

    /// Camera centers and helper points.
    #[inline]
    pub fn is_virtual(&self) -> bool {
        self.kind != VertexKind::Observed
    }
}

/// Per-cell attributes written by voting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GcCellInfo {
    /// Terminal weight toward "empty".
    pub source_weight: f32,
    /// Terminal weight toward "full".
    pub sink_weight: f32,
    /// Surface evidence of observations whose point lies on this cell.
    pub on: f32,
    pub emptiness_score: f32,
    pub fullness_score: f32,
    /// Visibility weight of each facet, indexed by the local opposite vertex.
    pub vis_weight: [f32; 4],
}

/// A cell face, identified by the cell and the local index of the opposite vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Facet {
    pub cell: u32,
    pub local: usize,
}

impl Facet {
    #[inline]
    pub fn new(cell: u32, local: usize) -> Self {
        Self { cell, local }
    }
}

/// Reconstruction state: point cloud, tetrahedralization and graph attributes.
pub struct DelaunayGraphCut {
    pub(crate) mp: MultiViewParams,
    pub(crate) vertices_coords: Vec<Point3<f64>>,
    pub(crate) vertices_attr: Vec<GcVertexInfo>,
    pub(crate) tet: Tetrahedralization,
    pub(crate) cells_attr: Vec<GcCellInfo>,
    pub(crate) cell_is_full: Vec<bool>,
    /// Vertex of each camera center, indexed by camera id.
    pub(crate) cams_vertexes: Vec<u32>,
    pub(crate) neighbour_cells: Vec<Vec<u32>>,
    pub(crate) observer: Arc<dyn ReconstructionObserver>,
}

impl std::fmt::Debug for DelaunayGraphCut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelaunayGraphCut")
            .field("cameras", &self.mp.len())
            .field("vertices", &self.nb_vertices())
            .field("cells", &self.nb_cells())
            .finish()
    }
}

impl DelaunayGraphCut {
    pub fn new(mp: MultiViewParams) -> Self {
        let cams_vertexes = vec![NO_VERTEX; mp.len()];
        Self {
            mp,
            vertices_coords: Vec::new(),
            vertices_attr: Vec::new(),
            tet: Tetrahedralization::default(),
            cells_attr: Vec::new(),
            cell_is_full: Vec::new(),
            cams_vertexes,
            neighbour_cells: Vec::new(),
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ReconstructionObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn observer(&self) -> &Arc<dyn ReconstructionObserver> {
        &self.observer
    }

    pub fn multi_view_params(&self) -> &MultiViewParams {
        &self.mp
    }

    pub(crate) fn begin_stage(&self, stage: Stage) -> StageTimer {
        self.observer.stage_started(stage);
        StageTimer::with_context(stage, self.nb_vertices(), self.nb_cells())
    }

    pub(crate) fn end_stage(&self, stage: Stage, timer: StageTimer, mut summary: StageSummary) {
        summary.elapsed_ms = timer.elapsed_ms();
        drop(timer);
        self.observer.stage_completed(stage, &summary);
    }

    /// Append a vertex. Only valid before [`Self::compute_delaunay`].
    pub(crate) fn push_vertex(&mut self, p: Point3<f64>, info: GcVertexInfo) -> u32 {
        self.vertices_coords.push(p);
        self.vertices_attr.push(info);
        (self.vertices_coords.len() - 1) as u32
    }

    /// Tetrahedralize the current point cloud and reset all graph attributes.
    pub fn compute_delaunay(&mut self) -> FuseCutResult<()> {
        let timer = self.begin_stage(Stage::Tetrahedralization);
        self.tet = Tetrahedralization::new(self.vertices_coords.clone())?;
        self.init_vertices();
        self.init_cells();
        self.update_vertex_to_cells_cache();

        let duplicates = self.tet.duplicates().len();
        if duplicates > 0 {
            self.observer.warning(
                Stage::Tetrahedralization,
                &format!("{} duplicate points were not inserted", duplicates),
            );
        }
        let infinite = (0..self.nb_cells() as u32)
            .filter(|&c| self.is_infinite_cell(c))
            .count();
        let summary = StageSummary::new()
            .with("vertices", self.nb_vertices())
            .with("cells", self.nb_cells())
            .with("infinite_cells", infinite)
            .with("duplicates", duplicates);
        self.end_stage(Stage::Tetrahedralization, timer, summary);
        Ok(())
    }

    /// Clear everything the voting and labeling stages write on vertices.
    pub fn init_vertices(&mut self) {
        for attr in &mut self.vertices_attr {
            attr.seg_id = None;
            attr.seg_size = 0;
            attr.is_on_surface = false;
            attr.surface_votes = 0.0;
        }
    }

    /// Zero the cell attributes and mark every cell empty.
    pub fn init_cells(&mut self) {
        self.cells_attr = vec![GcCellInfo::default(); self.nb_cells()];
        self.cell_is_full = vec![false; self.nb_cells()];
    }

    /// One pass over all cells, recording the incident cells of every vertex.
    pub fn update_vertex_to_cells_cache(&mut self) {
        let mut cache: Vec<Vec<u32>> = vec![Vec::new(); self.nb_vertices()];
        for c in 0..self.nb_cells() as u32 {
            for &v in self.tet.cell(c) {
                if self.tet.is_finite_vertex(v) {
                    cache[v as usize].push(c);
                }
            }
        }
        for cells in &mut cache {
            cells.sort_unstable();
            cells.dedup();
        }
        self.neighbour_cells = cache;
    }

    /// Cells incident to vertex `vi`, from the cache.
    #[inline]
    pub fn neighboring_cells_by_vertex_index(&self, vi: u32) -> &[u32] {
        &self.neighbour_cells[vi as usize]
    }

    /// The `i`-th cell incident to `vi`, `NO_CELL` past the end.
    pub fn vertex_to_cells(&self, vi: u32, i: usize) -> u32 {
        self.neighbour_cells[vi as usize]
            .get(i)
            .copied()
            .unwrap_or(NO_CELL)
    }

    #[inline]
    pub fn nb_vertices(&self) -> usize {
        self.vertices_coords.len()
    }

    #[inline]
    pub fn nb_cells(&self) -> usize {
        self.tet.nb_cells()
    }

    pub fn tetrahedralization(&self) -> &Tetrahedralization {
        &self.tet
    }

    #[inline]
    pub fn point(&self, vi: u32) -> &Point3<f64> {
        &self.vertices_coords[vi as usize]
    }

    pub fn points(&self) -> &[Point3<f64>] {
        &self.vertices_coords
    }

    #[inline]
    pub fn vertex_info(&self, vi: u32) -> &GcVertexInfo {
        &self.vertices_attr[vi as usize]
    }

    pub fn vertices_attr(&self) -> &[GcVertexInfo] {
        &self.vertices_attr
    }

    #[inline]
    pub fn cell_info(&self, ci: u32) -> &GcCellInfo {
        &self.cells_attr[ci as usize]
    }

    pub fn cells_attr(&self) -> &[GcCellInfo] {
        &self.cells_attr
    }

    /// Vertex inserted for camera `cam`, if any.
    pub fn camera_vertex(&self, cam: u32) -> Option<u32> {
        self.cams_vertexes
            .get(cam as usize)
            .copied()
            .filter(|&v| v != NO_VERTEX)
    }

    #[inline]
    pub fn is_cell_full(&self, ci: u32) -> bool {
        self.cell_is_full[ci as usize]
    }

    pub fn cell_is_full(&self) -> &[bool] {
        &self.cell_is_full
    }

    /// Set the label of one cell. Infinite cells cannot be made full.
    pub fn set_cell_full(&mut self, ci: u32, full: bool) {
        self.cell_is_full[ci as usize] = full && !self.is_infinite_cell(ci);
    }

    #[inline]
    pub fn cell_vertex(&self, ci: u32, i: usize) -> u32 {
        self.tet.cell_vertex(ci, i)
    }

    /// Neighbor of `ci` across the facet opposite local vertex `i`.
    #[inline]
    pub fn adjacent(&self, ci: u32, i: usize) -> u32 {
        self.tet.adjacent(ci, i)
    }

    #[inline]
    pub fn is_infinite_cell(&self, ci: u32) -> bool {
        self.tet.is_infinite_cell(ci)
    }

    #[inline]
    pub fn is_invalid_or_infinite_cell(&self, ci: u32) -> bool {
        ci == NO_CELL || self.tet.is_infinite_cell(ci)
    }

    /// Whether `vi` is an input vertex (not an enclosing one).
    #[inline]
    pub fn is_finite_vertex(&self, vi: u32) -> bool {
        (vi as usize) < self.nb_vertices()
    }

    /// Vertex `i` (0..3) of facet `f`, in the order that keeps the cell orientation.
    #[inline]
    pub fn facet_vertex(&self, f: Facet, i: usize) -> u32 {
        self.cell_vertex(f.cell, (f.local + i + 1) % 4)
    }

    pub fn facet_vertices(&self, f: Facet) -> [u32; 3] {
        [
            self.facet_vertex(f, 0),
            self.facet_vertex(f, 1),
            self.facet_vertex(f, 2),
        ]
    }

    #[inline]
    pub fn opposite_vertex(&self, f: Facet) -> u32 {
        self.cell_vertex(f.cell, f.local)
    }

    pub fn facet_points(&self, f: Facet) -> [Point3<f64>; 3] {
        self.facet_vertices(f).map(|v| *self.tet.point(v))
    }

    /// The same face seen from the adjacent cell, `None` on the outer boundary.
    pub fn mirror_facet(&self, f: Facet) -> Option<Facet> {
        let neighbor = self.adjacent(f.cell, f.local);
        if neighbor == NO_CELL {
            return None;
        }
        let local = (0..4).find(|&k| self.adjacent(neighbor, k) == f.cell)?;
        Some(Facet::new(neighbor, local))
    }

    /// Closest input vertex of cell `ci` to `p`, `NO_VERTEX` if it has none.
    pub fn nearest_vertex_in_cell(&self, ci: u32, p: &Point3<f64>) -> u32 {
        self.tet
            .cell(ci)
            .iter()
            .copied()
            .filter(|&v| self.is_finite_vertex(v))
            .min_by(|&a, &b| {
                (self.point(a) - p)
                    .norm_squared()
                    .total_cmp(&(self.point(b) - p).norm_squared())
            })
            .unwrap_or(NO_VERTEX)
    }

    /// Closest input vertex to `p`.
    pub fn locate_nearest_vertex(&self, p: &Point3<f64>) -> Option<u32> {
        if self.nb_cells() == 0 {
            return None;
        }
        self.tet.nearest_vertex(p, 0)
    }

    pub fn cell_barycenter(&self, ci: u32) -> Point3<f64> {
        let c = self.tet.cell(ci);
        let sum = c
            .iter()
            .fold(Vector3::zeros(), |acc, &v| acc + self.tet.point(v).coords);
        Point3::from(sum / 4.0)
    }

    /// Center of the sphere through the four vertices of `ci`.
    pub fn cell_circumscribed_sphere_centre(&self, ci: u32) -> Point3<f64> {
        let c = self.tet.cell(ci);
        let a = self.tet.point(c[0]);
        let (ab, ac, ad) = (
            self.tet.point(c[1]) - a,
            self.tet.point(c[2]) - a,
            self.tet.point(c[3]) - a,
        );
        let denom = 2.0 * ab.dot(&ac.cross(&ad));
        let num = ac.cross(&ad) * ab.norm_squared()
            + ad.cross(&ab) * ac.norm_squared()
            + ab.cross(&ac) * ad.norm_squared();
        a + num / denom
    }

    pub fn facet_max_edge_length(&self, f: Facet) -> f64 {
        let [a, b, c] = self.facet_points(f);
        (b - a).norm().max((c - b).norm()).max((a - c).norm())
    }

    /// Longest edge over all finite cells.
    pub fn max_edge_length(&self) -> f64 {
        let mut longest: f64 = 0.0;
        for ci in 0..self.nb_cells() as u32 {
            if self.is_infinite_cell(ci) {
                continue;
            }
            let c = self.tet.cell(ci);
            for i in 0..4 {
                for j in (i + 1)..4 {
                    longest = longest.max((self.tet.point(c[i]) - self.tet.point(c[j])).norm());
                }
            }
        }
        longest
    }

    /// Labatut facet quality: `1 - min(cos a1, cos a2)`, where `a1`, `a2` are the
    /// angles between the facet normal and the directions from the two adjacent
    /// circumcenters to a facet vertex. Flat, well-centered facets score high.
    pub fn face_weight(&self, f: Facet) -> f32 {
        let Some(mirror) = self.mirror_facet(f) else {
            return 1.0;
        };
        if self.is_infinite_cell(f.cell) || self.is_infinite_cell(mirror.cell) {
            return 1.0;
        }
        let [a, b, c] = self.facet_points(f);
        let Some(normal) = (b - a).cross(&(c - a)).try_normalize(0.0) else {
            return 1.0;
        };
        let cos_to = |ci: u32| {
            let centre = self.cell_circumscribed_sphere_centre(ci);
            (a - centre)
                .try_normalize(0.0)
                .map_or(f64::NAN, |d| normal.dot(&d).abs())
        };
        let w = 1.0 - cos_to(f.cell).min(cos_to(mirror.cell));
        if w.is_finite() && (0.0..=1.0).contains(&w) {
            w as f32
        } else {
            1.0
        }
    }

    /// Local index of vertex `vi` in cell `ci`. Panics when absent.
    #[inline]
    pub(crate) fn local_index(&self, ci: u32, vi: u32) -> usize {
        let k = index_of(self.tet.cell(ci), vi);
        assert!(k < 4, "vertex {} is not in cell {}", vi, ci);
        k
    }
}
