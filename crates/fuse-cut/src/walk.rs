//! Ray walks through the tetrahedralization.
//!
//! A walk starts at a vertex, leaves it through the incident cell whose corner
//! contains the ray direction, and then hops from cell to cell across the exit
//! facet of each. It ends on the outer boundary, before entering an infinite
//! cell, or after `nb_cells` steps.

use nalgebra::{Point3, Unit, Vector3};

use crate::delaunay::NO_CELL;
use crate::graph::{DelaunayGraphCut, Facet};

/// Cosine slack for directions lying on a facet plane through the start vertex.
const CORNER_TOLERANCE: f64 = 1e-9;

/// One cell crossed by a ray. Distances are measured from the ray origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayStep {
    pub cell: u32,
    /// Facet of `cell` the ray leaves through.
    pub exit: Facet,
    pub entry_dist: f64,
    pub exit_dist: f64,
}

/// Iterator over the cells crossed by a ray.
pub struct RayWalk<'a> {
    gc: &'a DelaunayGraphCut,
    origin: Point3<f64>,
    dir: Unit<Vector3<f64>>,
    current: u32,
    /// Local index of the facet the ray entered `current` through.
    entry: Option<usize>,
    /// Exit forced for the first cell of a walk starting at a vertex.
    forced_exit: Option<usize>,
    entry_dist: f64,
    steps_left: usize,
}

impl Iterator for RayWalk<'_> {
    type Item = RayStep;

    fn next(&mut self) -> Option<RayStep> {
        if self.current == NO_CELL || self.steps_left == 0 {
            return None;
        }
        let cell = self.current;
        if self.gc.is_infinite_cell(cell) {
            self.current = NO_CELL;
            return None;
        }
        self.steps_left -= 1;

        let (local, t) = match self.forced_exit.take() {
            Some(k) => (k, self.gc.facet_ray_distance(Facet::new(cell, k), &self.origin, &self.dir)?),
            None => self
                .gc
                .ray_cell_intersection(&self.origin, &self.dir, cell, self.entry)?,
        };
        let exit = Facet::new(cell, local);
        let step = RayStep {
            cell,
            exit,
            entry_dist: self.entry_dist,
            exit_dist: t.max(self.entry_dist),
        };

        match self.gc.mirror_facet(exit) {
            Some(m) => {
                self.current = m.cell;
                self.entry = Some(m.local);
            }
            None => self.current = NO_CELL,
        }
        self.entry_dist = step.exit_dist;
        Some(step)
    }
}

impl DelaunayGraphCut {
    /// Facet through which the ray `origin + t * dir` leaves `cell`, and its `t`.
    ///
    /// Only facets whose outward normal faces along `dir` are candidates; the
    /// exit is the closest of their planes. `entry` excludes the facet the ray
    /// came in through.
    pub fn ray_cell_intersection(
        &self,
        origin: &Point3<f64>,
        dir: &Unit<Vector3<f64>>,
        cell: u32,
        entry: Option<usize>,
    ) -> Option<(usize, f64)> {
        (0..4)
            .filter(|&k| Some(k) != entry)
            .filter_map(|k| {
                self.facet_ray_distance(Facet::new(cell, k), origin, dir)
                    .map(|t| (k, t))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Ray parameter where the ray crosses the plane of `f` going outward,
    /// `None` when the ray runs parallel to or into the cell through it.
    pub(crate) fn facet_ray_distance(
        &self,
        f: Facet,
        origin: &Point3<f64>,
        dir: &Unit<Vector3<f64>>,
    ) -> Option<f64> {
        let [a, b, c] = self.facet_points(f);
        let opposite = self.tet.point(self.opposite_vertex(f));
        let mut n = (b - a).cross(&(c - a));
        if n.dot(&(opposite - a)) > 0.0 {
            n = -n;
        }
        let along = n.dot(dir);
        if along <= 0.0 {
            return None;
        }
        let t = n.dot(&(a - origin)) / along;
        t.is_finite().then_some(t)
    }

    /// Facet of a finite cell incident to `vi` through which a ray leaving `vi`
    /// along `dir` exits that cell. The facet is opposite `vi`.
    ///
    /// The cell is the one whose corner at `vi` best contains `dir`: the largest
    /// minimum inward margin over its three facets through `vi`. `None` when no
    /// finite cell contains the direction, i.e. the ray leaves the convex hull.
    pub fn facet_from_vertex_on_the_ray(&self, vi: u32, dir: &Unit<Vector3<f64>>) -> Option<Facet> {
        let mut best: Option<(Facet, f64)> = None;
        for &ci in self.neighboring_cells_by_vertex_index(vi) {
            if self.is_infinite_cell(ci) {
                continue;
            }
            let local = self.local_index(ci, vi);
            let margin = (0..4)
                .filter(|&k| k != local)
                .map(|k| {
                    let [a, b, c] = self.facet_points(Facet::new(ci, k));
                    let opposite = self.tet.point(self.cell_vertex(ci, k));
                    let n = (b - a).cross(&(c - a));
                    let inward = if n.dot(&(opposite - a)) < 0.0 { -n } else { n };
                    inward.try_normalize(0.0).map_or(f64::MIN, |u| u.dot(dir))
                })
                .fold(f64::MAX, f64::min);
            if best.is_none_or(|(_, m)| margin > m) {
                best = Some((Facet::new(ci, local), margin));
            }
        }
        best.filter(|&(_, m)| m > -CORNER_TOLERANCE).map(|(f, _)| f)
    }

    /// First facet crossed by the ray from `vi` toward camera `cam`.
    pub fn facet_from_vertex_on_the_ray_to_the_cam(&self, vi: u32, cam: u32) -> Option<Facet> {
        let center = self.mp.cameras.get(cam as usize)?.center;
        let dir = Unit::try_new(center - self.point(vi), 0.0)?;
        self.facet_from_vertex_on_the_ray(vi, &dir)
    }

    /// First facet crossed by the ray from the vertex of camera `cam` toward vertex `vi`.
    pub fn first_facet_on_the_ray_from_cam_to_the_point(&self, cam: u32, vi: u32) -> Option<Facet> {
        let cam_vertex = self.camera_vertex(cam)?;
        let dir = Unit::try_new(self.point(vi) - self.point(cam_vertex), 0.0)?;
        self.facet_from_vertex_on_the_ray(cam_vertex, &dir)
    }

    /// Walk from vertex `vi` along `dir`.
    pub fn walk_from_vertex(&self, vi: u32, dir: Unit<Vector3<f64>>) -> RayWalk<'_> {
        let first = self.facet_from_vertex_on_the_ray(vi, &dir);
        RayWalk {
            gc: self,
            origin: *self.point(vi),
            dir,
            current: first.map_or(NO_CELL, |f| f.cell),
            entry: None,
            forced_exit: first.map(|f| f.local),
            entry_dist: 0.0,
            steps_left: self.nb_cells(),
        }
    }

    /// Walk along `dir` from `origin`, which must lie in `cell`.
    pub fn walk_from_cell(&self, cell: u32, origin: Point3<f64>, dir: Unit<Vector3<f64>>) -> RayWalk<'_> {
        RayWalk {
            gc: self,
            origin,
            dir,
            current: cell,
            entry: None,
            forced_exit: None,
            entry_dist: 0.0,
            steps_left: self.nb_cells(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::MultiViewParams;
    use crate::graph::GcVertexInfo;

    /// Points on a jittered 4x4x4 lattice.
    fn lattice_graph() -> DelaunayGraphCut {
        let mut gc = DelaunayGraphCut::new(MultiViewParams::default());
        for i in 0..4 {
            for j in 0..4 {
                for k in 0..4 {
                    let jitter = ((i * 16 + j * 4 + k) as f64 * 0.618).fract() * 0.1;
                    gc.push_vertex(
                        Point3::new(i as f64 + jitter, j as f64 - jitter * 0.5, k as f64 + jitter * 0.3),
                        GcVertexInfo::observed(0.01, vec![0]),
                    );
                }
            }
        }
        gc.compute_delaunay().unwrap();
        gc
    }

    #[test]
    fn test_walk_reaches_target_vertex() {
        let gc = lattice_graph();
        let (from, to) = (21u32, 42u32);
        let target = *gc.point(to);
        let dir = Unit::new_normalize(target - gc.point(from));
        let length = (target - gc.point(from)).norm();

        let mut reached = false;
        let mut last_exit = 0.0;
        for step in gc.walk_from_vertex(from, dir) {
            assert!(step.exit_dist >= step.entry_dist);
            assert!(step.entry_dist >= last_exit - 1e-12);
            last_exit = step.exit_dist;
            if gc.tetrahedralization().cell(step.cell).contains(&to) {
                reached = true;
                assert!(step.entry_dist < length);
                break;
            }
        }
        assert!(reached);
    }

    #[test]
    fn test_walk_leaves_hull() {
        let gc = lattice_graph();
        // From a corner vertex straight outward: no finite cell contains the direction
        let dir = Unit::new_normalize(Vector3::new(-1.0, -1.0, -1.0));
        assert_eq!(gc.walk_from_vertex(0, dir).count(), 0);

        // From an interior vertex the walk runs until the hull, then stops
        let dir = Unit::new_normalize(Vector3::new(1.0, 0.2, 0.1));
        let steps: Vec<RayStep> = gc.walk_from_vertex(21, dir).collect();
        assert!(!steps.is_empty());
        assert!(steps.iter().all(|s| !gc.is_infinite_cell(s.cell)));
        assert!(steps.len() < gc.nb_cells());
    }

    #[test]
    fn test_first_facet_is_opposite_vertex() {
        let gc = lattice_graph();
        let dir = Unit::new_normalize(Vector3::new(0.3, 0.5, 0.8));
        let f = gc.facet_from_vertex_on_the_ray(21, &dir).unwrap();
        assert_eq!(gc.opposite_vertex(f), 21);
        let t = gc.facet_ray_distance(f, gc.point(21), &dir).unwrap();
        assert!(t > 0.0);
    }

    #[test]
    fn test_ray_cell_intersection_exit() {
        let gc = lattice_graph();
        let ci = gc.neighboring_cells_by_vertex_index(21)[0];
        let origin = gc.cell_barycenter(ci);
        let dir = Unit::new_normalize(Vector3::new(0.0, 0.0, 1.0));
        let (k, t) = gc.ray_cell_intersection(&origin, &dir, ci, None).unwrap();
        assert!(t > 0.0);
        // The exit point lies on the exit facet plane
        let exit = origin + dir.into_inner() * t;
        let [a, b, c] = gc.facet_points(Facet::new(ci, k));
        let n = (b - a).cross(&(c - a)).normalize();
        assert!(n.dot(&(exit - a)).abs() < 1e-9);
    }
}
