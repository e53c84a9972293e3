//! Incremental 3D Delaunay tetrahedralization.
//!
//! Points are inserted in Morton order with Bowyer-Watson cavity
//! re-triangulation inside an enclosing tetrahedron whose four vertices sit far
//! outside the input. Cells touching one of those four vertices play the role
//! of infinite cells: they cover the space outside the convex hull of the input.
//!
//! Cells are stored as four vertex indices plus four neighbor indices, where
//! neighbor `k` lies across the facet opposite local vertex `k`. Every cell is
//! positively oriented (see [`orient`]).

use hashbrown::HashMap;
use nalgebra::Point3;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::{FuseCutError, FuseCutResult};

/// Missing neighbor (outside the enclosing tetrahedron) or unset cell.
pub const NO_CELL: u32 = u32::MAX;
/// Unset vertex.
pub const NO_VERTEX: u32 = u32::MAX;

/// Enclosing tetrahedron size relative to the input extent.
const ENCLOSING_SCALE: f64 = 1.0e3;

/// Six times the signed volume of `(a, b, c, d)`; positive when `d` sees
/// `(a, b, c)` counter-clockwise.
#[inline]
pub fn orient(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>, d: &Point3<f64>) -> f64 {
    (b - a).dot(&(c - a).cross(&(d - a)))
}

/// Positive when `e` lies strictly inside the circumsphere of the positively
/// oriented tetrahedron `(a, b, c, d)`, zero on it.
pub fn in_sphere(
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
    d: &Point3<f64>,
    e: &Point3<f64>,
) -> f64 {
    let (ae, be, ce, de) = (a - e, b - e, c - e, d - e);
    let (la, lb, lc, ld) = (
        ae.norm_squared(),
        be.norm_squared(),
        ce.norm_squared(),
        de.norm_squared(),
    );
    let det = -la * be.dot(&ce.cross(&de)) + lb * ae.dot(&ce.cross(&de))
        - lc * ae.dot(&be.cross(&de))
        + ld * ae.dot(&be.cross(&ce));
    -det
}

/// Position of `value` in `slots`, or 4 when absent (indexing with it panics).
#[inline]
pub(crate) fn index_of(slots: &[u32; 4], value: u32) -> usize {
    let mut k = 0;
    while k < 4 && slots[k] != value {
        k += 1;
    }
    k
}

/// A cavity facet that becomes the base of a new cell.
struct BoundaryFacet {
    cell: u32,
    local: usize,
    outer: u32,
    back: usize,
    vertices: [u32; 4],
}

#[derive(Default)]
struct Scratch {
    stamp: u32,
    marks: Vec<u32>,
    cavity: Vec<u32>,
    boundary: Vec<BoundaryFacet>,
    new_cells: Vec<(u32, usize)>,
    facets: HashMap<(u32, u32), (u32, usize)>,
    free: Vec<u32>,
}

/// Delaunay tetrahedralization of a point set. The default value is empty.
#[derive(Debug, Clone, Default)]
pub struct Tetrahedralization {
    /// Input points followed by the four enclosing vertices.
    points: Vec<Point3<f64>>,
    nb_finite: u32,
    cells: Vec<[u32; 4]>,
    neighbors: Vec<[u32; 4]>,
    vertex_cell: Vec<u32>,
    duplicates: Vec<u32>,
    orient_eps: f64,
    duplicate_dist2: f64,
}

impl Tetrahedralization {
    /// Tetrahedralize `points`. Vertex `i` of the result is `points[i]`.
    ///
    /// Fails with `InsufficientGeometry` below 4 points and with
    /// `DegenerateGeometry` when the points do not span a volume. Points that
    /// coincide with an already inserted one are skipped and keep no incident
    /// cell (see [`Self::duplicates`]).
    pub fn new(points: Vec<Point3<f64>>) -> FuseCutResult<Self> {
        let n = points.len();
        if n < 4 {
            return Err(FuseCutError::insufficient_geometry(
                n,
                "a tetrahedralization needs at least 4 points",
            ));
        }
        if n >= (NO_VERTEX - 4) as usize {
            return Err(FuseCutError::invalid_parameter(
                "points",
                n,
                "too many points for 32-bit vertex indices",
            ));
        }
        if let Some(i) = points.iter().position(|p| !p.coords.iter().all(|c| c.is_finite())) {
            return Err(FuseCutError::degenerate_geometry(format!(
                "point {} has a non-finite coordinate",
                i
            )));
        }

        let (min, max) = bounds(&points);
        let extent = (max - min).max();
        if extent <= 0.0 {
            return Err(FuseCutError::degenerate_geometry("all points coincide"));
        }
        check_spans_volume(&points, extent)?;

        let mut tet = Self {
            points,
            nb_finite: n as u32,
            cells: Vec::with_capacity(n * 7),
            neighbors: Vec::with_capacity(n * 7),
            vertex_cell: vec![NO_CELL; n + 4],
            duplicates: Vec::new(),
            orient_eps: 1e-14 * extent.powi(3),
            duplicate_dist2: (1e-10 * extent).powi(2),
        };
        tet.init_enclosing(&min, &max, extent);

        let order = morton_order(&tet.points[..n], &min, extent);
        let mut scratch = Scratch::default();
        scratch.marks.resize(tet.cells.len(), 0);
        let mut hint = 0;
        for vi in order {
            hint = tet.insert(vi, hint, &mut scratch)?;
        }
        tet.compact(&scratch.free);
        tet.rebuild_vertex_cells();
        let lost = (0..n as u32)
            .filter(|&v| tet.vertex_cell[v as usize] == NO_CELL && !tet.duplicates.contains(&v))
            .count();
        if lost > 0 {
            warn!("{} vertices lost their cells during insertion", lost);
        }

        if !tet.duplicates.is_empty() {
            warn!("Skipped {} duplicate points", tet.duplicates.len());
        }
        debug!(
            "Tetrahedralization: {} vertices, {} cells ({} infinite)",
            n,
            tet.cells.len(),
            (0..tet.nb_cells() as u32).filter(|&c| tet.is_infinite_cell(c)).count()
        );
        Ok(tet)
    }

    fn init_enclosing(&mut self, min: &Point3<f64>, max: &Point3<f64>, extent: f64) {
        let c = nalgebra::center(min, max);
        let s = extent * ENCLOSING_SCALE;
        let mut corners = [
            Point3::new(c.x + s, c.y + s, c.z + s),
            Point3::new(c.x + s, c.y - s, c.z - s),
            Point3::new(c.x - s, c.y + s, c.z - s),
            Point3::new(c.x - s, c.y - s, c.z + s),
        ];
        if orient(&corners[0], &corners[1], &corners[2], &corners[3]) < 0.0 {
            corners.swap(2, 3);
        }
        let base = self.nb_finite;
        self.points.extend_from_slice(&corners);
        self.cells.push([base, base + 1, base + 2, base + 3]);
        self.neighbors.push([NO_CELL; 4]);
        for k in 0..4 {
            self.vertex_cell[(base + k) as usize] = 0;
        }
    }

    /// Insert vertex `vi`, returning a cell to start the next walk from.
    fn insert(&mut self, vi: u32, hint: u32, s: &mut Scratch) -> FuseCutResult<u32> {
        let p = self.points[vi as usize];
        let start = self.locate(&p, hint).ok_or_else(|| {
            FuseCutError::degenerate_geometry(format!("point {} could not be located", vi))
        })?;

        if self.cells[start as usize]
            .iter()
            .any(|&v| v < self.nb_finite && (self.points[v as usize] - p).norm_squared() <= self.duplicate_dist2)
        {
            self.duplicates.push(vi);
            return Ok(start);
        }

        // Cells whose circumsphere contains p
        s.stamp += 1;
        let stamp = s.stamp;
        s.cavity.clear();
        s.cavity.push(start);
        s.marks[start as usize] = stamp;
        let mut i = 0;
        while i < s.cavity.len() {
            let c = s.cavity[i] as usize;
            i += 1;
            for k in 0..4 {
                let n = self.neighbors[c][k];
                if n != NO_CELL && s.marks[n as usize] != stamp && self.cell_in_sphere(n, &p) > 0.0 {
                    s.marks[n as usize] = stamp;
                    s.cavity.push(n);
                }
            }
        }

        // Grow the cavity until p sees every boundary facet
        loop {
            s.boundary.clear();
            let mut grown = false;
            for idx in 0..s.cavity.len() {
                let c = s.cavity[idx];
                for k in 0..4 {
                    let n = self.neighbors[c as usize][k];
                    if n != NO_CELL && s.marks[n as usize] == stamp {
                        continue;
                    }
                    let mut vertices = self.cells[c as usize];
                    vertices[k] = vi;
                    if self.cell_orient(&vertices) > self.orient_eps {
                        s.boundary.push(BoundaryFacet {
                            cell: c,
                            local: k,
                            outer: n,
                            back: 0,
                            vertices,
                        });
                    } else if n == NO_CELL {
                        return Err(FuseCutError::degenerate_geometry(format!(
                            "point {} lies outside the enclosing tetrahedron",
                            vi
                        )));
                    } else if s.marks[n as usize] != stamp {
                        s.marks[n as usize] = stamp;
                        s.cavity.push(n);
                        grown = true;
                    }
                }
            }
            if !grown {
                break;
            }
        }

        for bf in s.boundary.iter_mut() {
            if bf.outer != NO_CELL {
                bf.back = index_of(&self.neighbors[bf.outer as usize], bf.cell);
            }
        }

        // Re-triangulate: one new cell per boundary facet, reusing cavity slots
        s.new_cells.clear();
        let mut reuse = 0;
        for bf in &s.boundary {
            let nc = if reuse < s.cavity.len() {
                reuse += 1;
                s.cavity[reuse - 1]
            } else if let Some(c) = s.free.pop() {
                c
            } else {
                self.cells.push([NO_VERTEX; 4]);
                self.neighbors.push([NO_CELL; 4]);
                s.marks.push(0);
                (self.cells.len() - 1) as u32
            };
            self.cells[nc as usize] = bf.vertices;
            self.neighbors[nc as usize] = [NO_CELL; 4];
            self.neighbors[nc as usize][bf.local] = bf.outer;
            if bf.outer != NO_CELL {
                self.neighbors[bf.outer as usize][bf.back] = nc;
            }
            s.new_cells.push((nc, bf.local));
        }
        for &c in &s.cavity[reuse..] {
            self.cells[c as usize] = [NO_VERTEX; 4];
            self.neighbors[c as usize] = [NO_CELL; 4];
            s.free.push(c);
        }

        // Link new cells through the facets containing p
        s.facets.clear();
        for &(nc, k) in &s.new_cells {
            let vertices = self.cells[nc as usize];
            for i in (0..4).filter(|&i| i != k) {
                let mut others = (0..4).filter(|&j| j != i && j != k).map(|j| vertices[j]);
                let (a, b) = match (others.next(), others.next()) {
                    (Some(a), Some(b)) => (a.min(b), a.max(b)),
                    _ => continue,
                };
                match s.facets.remove(&(a, b)) {
                    Some((oc, oi)) => {
                        self.neighbors[nc as usize][i] = oc;
                        self.neighbors[oc as usize][oi] = nc;
                    }
                    None => {
                        s.facets.insert((a, b), (nc, i));
                    }
                }
            }
            for &v in &vertices {
                self.vertex_cell[v as usize] = nc;
            }
        }
        if !s.facets.is_empty() {
            warn!("{} unmatched cavity facets while inserting point {}", s.facets.len(), vi);
        }

        Ok(s.new_cells.last().map_or(start, |&(c, _)| c))
    }

    /// Drop freed cell slots and renumber.
    fn compact(&mut self, free: &[u32]) {
        if free.is_empty() {
            return;
        }
        let mut remap = vec![NO_CELL; self.cells.len()];
        let mut next = 0u32;
        for (c, cell) in self.cells.iter().enumerate() {
            if cell[0] != NO_VERTEX {
                remap[c] = next;
                next += 1;
            }
        }
        let mut write = 0;
        for c in 0..self.cells.len() {
            if remap[c] == NO_CELL {
                continue;
            }
            self.cells[write] = self.cells[c];
            self.neighbors[write] = self.neighbors[c].map(|n| if n == NO_CELL { NO_CELL } else { remap[n as usize] });
            write += 1;
        }
        self.cells.truncate(write);
        self.neighbors.truncate(write);
    }

    /// Point every vertex at one of its cells; vertices without cells get `NO_CELL`.
    fn rebuild_vertex_cells(&mut self) {
        self.vertex_cell.fill(NO_CELL);
        for (c, cell) in self.cells.iter().enumerate() {
            for &v in cell {
                self.vertex_cell[v as usize] = c as u32;
            }
        }
    }

    #[inline]
    fn cell_orient(&self, v: &[u32; 4]) -> f64 {
        let p = |i: usize| &self.points[v[i] as usize];
        orient(p(0), p(1), p(2), p(3))
    }

    #[inline]
    fn cell_in_sphere(&self, c: u32, e: &Point3<f64>) -> f64 {
        let v = &self.cells[c as usize];
        let p = |i: usize| &self.points[v[i] as usize];
        in_sphere(p(0), p(1), p(2), p(3), e)
    }

    /// Cell containing `p`, walking from `hint`. `None` outside the enclosing tetrahedron.
    pub fn locate(&self, p: &Point3<f64>, hint: u32) -> Option<u32> {
        let alive = |c: u32| (c as usize) < self.cells.len() && self.cells[c as usize][0] != NO_VERTEX;
        let mut c = if alive(hint) {
            hint
        } else {
            (0..self.cells.len() as u32).find(|&c| alive(c))?
        };

        let mut rotation = 0usize;
        'walk: for _ in 0..self.cells.len() + 16 {
            let vertices = self.cells[c as usize];
            for j in 0..4 {
                let k = (j + rotation) % 4;
                let mut q = vertices.map(|v| self.points[v as usize]);
                q[k] = *p;
                if orient(&q[0], &q[1], &q[2], &q[3]) < 0.0 {
                    let n = self.neighbors[c as usize][k];
                    if n == NO_CELL {
                        return None;
                    }
                    c = n;
                    rotation = rotation.wrapping_add(1);
                    continue 'walk;
                }
            }
            return Some(c);
        }

        debug!("Walk did not converge, scanning all cells");
        (0..self.cells.len() as u32).filter(|&c| alive(c)).find(|&c| {
            let vertices = self.cells[c as usize];
            (0..4).all(|k| {
                let mut q = vertices.map(|v| self.points[v as usize]);
                q[k] = *p;
                orient(&q[0], &q[1], &q[2], &q[3]) >= -self.orient_eps
            })
        })
    }

    /// Finite vertex closest to `p`: locate, then greedy descent over vertex stars.
    pub fn nearest_vertex(&self, p: &Point3<f64>, hint: u32) -> Option<u32> {
        let dist2 = |v: u32| (self.points[v as usize] - p).norm_squared();
        let located = self.locate(p, hint).and_then(|c| {
            self.cells[c as usize]
                .iter()
                .copied()
                .filter(|&v| self.is_finite_vertex(v))
                .min_by(|&a, &b| dist2(a).total_cmp(&dist2(b)))
        });
        let Some(mut best) = located else {
            return (0..self.nb_finite).min_by(|&a, &b| dist2(a).total_cmp(&dist2(b)));
        };

        loop {
            let current = dist2(best);
            let closer = self
                .incident_cells(best)
                .into_iter()
                .flat_map(|c| self.cells[c as usize])
                .filter(|&v| self.is_finite_vertex(v))
                .min_by(|&a, &b| dist2(a).total_cmp(&dist2(b)));
            match closer {
                Some(v) if dist2(v) < current => best = v,
                _ => return Some(best),
            }
        }
    }

    /// All cells incident to `v`, empty for a skipped duplicate.
    pub fn incident_cells(&self, v: u32) -> Vec<u32> {
        let start = self.vertex_cell[v as usize];
        if start == NO_CELL {
            return Vec::new();
        }
        let mut cells = vec![start];
        let mut i = 0;
        while i < cells.len() {
            let c = cells[i] as usize;
            i += 1;
            let local = index_of(&self.cells[c], v);
            for k in (0..4).filter(|&k| k != local) {
                let n = self.neighbors[c][k];
                if n != NO_CELL && !cells.contains(&n) {
                    cells.push(n);
                }
            }
        }
        cells
    }

    /// Number of input vertices.
    #[inline]
    pub fn nb_vertices(&self) -> usize {
        self.nb_finite as usize
    }

    #[inline]
    pub fn nb_cells(&self) -> usize {
        self.cells.len()
    }

    /// Input points.
    pub fn points(&self) -> &[Point3<f64>] {
        &self.points[..self.nb_finite as usize]
    }

    /// Position of any vertex, enclosing vertices included.
    #[inline]
    pub fn point(&self, v: u32) -> &Point3<f64> {
        &self.points[v as usize]
    }

    #[inline]
    pub fn cell(&self, c: u32) -> &[u32; 4] {
        &self.cells[c as usize]
    }

    #[inline]
    pub fn cell_vertex(&self, c: u32, i: usize) -> u32 {
        self.cells[c as usize][i]
    }

    /// Neighbor of `c` across the facet opposite local vertex `i`.
    #[inline]
    pub fn adjacent(&self, c: u32, i: usize) -> u32 {
        self.neighbors[c as usize][i]
    }

    #[inline]
    pub fn is_finite_vertex(&self, v: u32) -> bool {
        v < self.nb_finite
    }

    /// Whether `c` touches one of the enclosing vertices.
    #[inline]
    pub fn is_infinite_cell(&self, c: u32) -> bool {
        self.cells[c as usize].iter().any(|&v| v >= self.nb_finite)
    }

    /// One cell incident to finite vertex `v`, `NO_CELL` for a skipped duplicate.
    #[inline]
    pub fn vertex_cell(&self, v: u32) -> u32 {
        self.vertex_cell[v as usize]
    }

    /// Input indices skipped because they coincide with an earlier point.
    pub fn duplicates(&self) -> &[u32] {
        &self.duplicates
    }
}

fn bounds(points: &[Point3<f64>]) -> (Point3<f64>, Point3<f64>) {
    points.iter().fold(
        (
            Point3::new(f64::MAX, f64::MAX, f64::MAX),
            Point3::new(f64::MIN, f64::MIN, f64::MIN),
        ),
        |(lo, hi), p| (lo.inf(p), hi.sup(p)),
    )
}

/// Reject collinear and coplanar point sets.
fn check_spans_volume(points: &[Point3<f64>], extent: f64) -> FuseCutResult<()> {
    let a = points[0];
    let farthest = |score: &dyn Fn(&Point3<f64>) -> f64| {
        points
            .iter()
            .map(|p| (score(p), *p))
            .fold((0.0, a), |best, cur| if cur.0 > best.0 { cur } else { best })
    };
    let (_, b) = farthest(&|p| (p - a).norm_squared());
    let (area, c) = farthest(&|p| (b - a).cross(&(p - a)).norm());
    if area <= 1e-12 * extent * extent {
        return Err(FuseCutError::degenerate_geometry("all points are collinear"));
    }
    let (volume, _) = farthest(&|p| orient(&a, &b, &c, p).abs());
    if volume <= 1e-12 * extent.powi(3) {
        return Err(FuseCutError::degenerate_geometry("all points are coplanar"));
    }
    Ok(())
}

/// Insertion order along a Z-order curve.
fn morton_order(points: &[Point3<f64>], min: &Point3<f64>, extent: f64) -> Vec<u32> {
    let scale = ((1u64 << 21) - 1) as f64 / extent;
    let mut keyed: Vec<(u64, u32)> = points
        .par_iter()
        .enumerate()
        .map(|(i, p)| {
            let q = (p - min) * scale;
            let key = spread_bits(q.x as u64) | spread_bits(q.y as u64) << 1 | spread_bits(q.z as u64) << 2;
            (key, i as u32)
        })
        .collect();
    keyed.par_sort_unstable();
    keyed.into_iter().map(|(_, i)| i).collect()
}

/// Spread the low 21 bits of `x` to every third bit.
fn spread_bits(x: u64) -> u64 {
    let mut x = x & 0x1f_ffff;
    x = (x | x << 32) & 0x001f_0000_0000_ffff;
    x = (x | x << 16) & 0x001f_0000_ff00_00ff;
    x = (x | x << 8) & 0x100f_00f0_0f00_f00f;
    x = (x | x << 4) & 0x10c3_0c30_c30c_30c3;
    x = (x | x << 2) & 0x1249_2492_4924_9249;
    x
}
