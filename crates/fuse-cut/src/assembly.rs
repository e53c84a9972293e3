//! Point-cloud assembly: SfM landmarks, camera centers and helper points.
//!
//! All insertions append vertices and are only valid before the
//! tetrahedralization is built.

use kiddo::{ImmutableKdTree, SquaredEuclidean};
use mvs_mesh::Hexahedron;
use nalgebra::{Point3, Vector3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::camera::SfmData;
use crate::graph::{DelaunayGraphCut, GcVertexInfo};

/// Fraction of a lattice cell the helper points may be jittered by.
const HELPER_JITTER: f64 = 0.25;

/// Nearest-vertex queries over the vertices present when the index was
/// built, plus a short list of the points added since.
///
/// The immutable tree copes with any number of vertices sharing a coordinate,
/// which grid-aligned landmarks produce.
struct VertexIndex {
    tree: Option<ImmutableKdTree<f64, 3>>,
    added: Vec<(Point3<f64>, u32)>,
}

impl VertexIndex {
    fn new(points: &[Point3<f64>]) -> Self {
        let tree = (!points.is_empty()).then(|| {
            let entries: Vec<[f64; 3]> = points.iter().map(|p| [p.x, p.y, p.z]).collect();
            ImmutableKdTree::new_from_slice(&entries)
        });
        Self {
            tree,
            added: Vec::new(),
        }
    }

    fn add(&mut self, p: &Point3<f64>, vi: u32) {
        self.added.push((*p, vi));
    }

    /// Closest indexed vertex within `radius` of `p`.
    fn nearest_within(&self, p: &Point3<f64>, radius: f64) -> Option<u32> {
        let from_tree = self.tree.as_ref().map(|tree| {
            let nn = tree.nearest_one::<SquaredEuclidean>(&[p.x, p.y, p.z]);
            (nn.distance, nn.item as u32)
        });
        let from_added = self
            .added
            .iter()
            .map(|(q, vi)| ((q - p).norm_squared(), *vi))
            .min_by(|a, b| a.0.total_cmp(&b.0));
        [from_tree, from_added]
            .into_iter()
            .flatten()
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .filter(|&(d2, _)| d2 < radius * radius)
            .map(|(_, vi)| vi)
    }
}

impl DelaunayGraphCut {
    /// Insert the landmarks inside `hexah` seen by at least one camera of
    /// `cams`. Observations from other cameras are dropped. Returns the number
    /// of points inserted.
    pub fn add_points_from_sfm(&mut self, hexah: &Hexahedron, cams: &[u32], sfm: &SfmData) -> usize {
        let selected = self.camera_mask(cams);
        let mut added = 0;
        for landmark in &sfm.landmarks {
            if !hexah.contains(&landmark.position) {
                continue;
            }
            let mut observations: Vec<u32> = landmark
                .observations
                .iter()
                .copied()
                .filter(|&c| selected.get(c as usize).copied().unwrap_or(false))
                .collect();
            observations.sort_unstable();
            observations.dedup();
            let Some(pix_size) = observations
                .iter()
                .map(|&c| self.mp.cameras[c as usize].pixel_size_at(&landmark.position))
                .min_by(f64::total_cmp)
            else {
                continue;
            };
            let mut info = GcVertexInfo::observed(pix_size as f32, observations);
            info.color = landmark.color;
            self.push_vertex(landmark.position, info);
            added += 1;
        }
        debug!("Added {} of {} SfM landmarks", added, sfm.landmarks.len());
        added
    }

    /// Give every camera of `cams` a vertex at its optical center.
    ///
    /// A camera whose center lies within `min_dist` of an existing vertex
    /// reuses that vertex, which keeps its kind and observations. Returns the
    /// number of vertices inserted.
    pub fn add_points_from_camera_centers(&mut self, cams: &[u32], min_dist: f64) -> usize {
        let mut index = VertexIndex::new(&self.vertices_coords);
        let mut added = 0;
        for &cam in cams {
            let Some(camera) = self.mp.cameras.get(cam as usize) else {
                continue;
            };
            let center = camera.center;
            let vi = match index.nearest_within(&center, min_dist) {
                Some(existing) => existing,
                None => {
                    let vi = self.push_vertex(center, GcVertexInfo::camera_center(cam));
                    index.add(&center, vi);
                    added += 1;
                    vi
                }
            };
            self.cams_vertexes[cam as usize] = vi;
        }
        debug!("Added {} camera center vertices for {} cameras", added, cams.len());
        added
    }

    /// Insert one helper point beyond each face of `hexah`, a tenth of the
    /// center-to-face distance out. Points within `min_dist` of an existing
    /// vertex are skipped.
    pub fn add_points_to_prevent_singularities(&mut self, hexah: &Hexahedron, min_dist: f64) -> usize {
        let center = hexah.center();
        let mut index = VertexIndex::new(&self.vertices_coords);
        let mut added = 0;
        for fc in hexah.face_centers() {
            let p = fc + (fc - center) / 10.0;
            if index.nearest_within(&p, min_dist).is_some() {
                continue;
            }
            let vi = self.push_vertex(p, GcVertexInfo::helper());
            index.add(&p, vi);
            added += 1;
        }
        added
    }

    /// Insert a `grid_dim`³ lattice of jittered helper points inside `hexah`.
    ///
    /// The jitter is drawn from a generator seeded with `seed`, so the lattice
    /// is reproducible. Points within `min_dist` of an existing vertex are skipped.
    pub fn add_helper_points(&mut self, grid_dim: usize, hexah: &Hexahedron, min_dist: f64, seed: u64) -> usize {
        if grid_dim == 0 {
            return 0;
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut index = VertexIndex::new(&self.vertices_coords);
        let step = 1.0 / grid_dim as f64;
        let mut added = 0;
        for i in 0..grid_dim {
            for j in 0..grid_dim {
                for k in 0..grid_dim {
                    let jitter = Vector3::new(
                        rng.gen_range(-HELPER_JITTER..HELPER_JITTER),
                        rng.gen_range(-HELPER_JITTER..HELPER_JITTER),
                        rng.gen_range(-HELPER_JITTER..HELPER_JITTER),
                    );
                    let p = hexah.point_at(
                        (i as f64 + 0.5 + jitter.x) * step,
                        (j as f64 + 0.5 + jitter.y) * step,
                        (k as f64 + 0.5 + jitter.z) * step,
                    );
                    if index.nearest_within(&p, min_dist).is_some() {
                        continue;
                    }
                    let vi = self.push_vertex(p, GcVertexInfo::helper());
                    index.add(&p, vi);
                    added += 1;
                }
            }
        }
        debug!("Added {} of {} helper points", added, grid_dim.pow(3));
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::camera::{Camera, Landmark, MultiViewParams};
    use crate::graph::VertexKind;

    fn unit_box() -> Hexahedron {
        Hexahedron::from_bounds(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0))
    }

    fn two_cameras() -> MultiViewParams {
        let target = Point3::new(0.5, 0.5, 0.5);
        MultiViewParams::new(vec![
            Camera::look_at(Point3::new(0.5, 0.5, 4.0), target, Vector3::y(), 500.0, 640, 480),
            Camera::look_at(Point3::new(4.0, 0.5, 0.5), target, Vector3::y(), 500.0, 640, 480),
        ])
    }

    #[test]
    fn test_sfm_points_filtered_by_region_and_cameras() {
        let mut gc = DelaunayGraphCut::new(two_cameras());
        let sfm = SfmData::new(vec![
            Landmark::new(Point3::new(0.5, 0.5, 0.5), vec![0, 1]),
            Landmark::new(Point3::new(0.2, 0.3, 0.4), vec![1, 1, 5]),
            Landmark::new(Point3::new(2.0, 0.5, 0.5), vec![0]),
            Landmark::new(Point3::new(0.6, 0.6, 0.6), vec![0]),
        ]);
        assert_eq!(gc.add_points_from_sfm(&unit_box(), &[1], &sfm), 2);
        assert_eq!(gc.vertex_info(0).cams, vec![1]);
        assert_eq!(gc.vertex_info(1).cams, vec![1]);
        assert_eq!(gc.vertex_info(1).nrc, 1);
        // Pixel size of the closest camera: distance over focal length
        let expected = (Point3::new(4.0, 0.5, 0.5) - Point3::new(0.5, 0.5, 0.5)).norm() / 500.0;
        assert_relative_eq!(gc.vertex_info(0).pix_size as f64, expected, epsilon = 1e-6);
    }

    #[test]
    fn test_camera_centers_get_vertices() {
        let mut gc = DelaunayGraphCut::new(two_cameras());
        assert_eq!(gc.add_points_from_camera_centers(&[0, 1], 0.01), 2);
        assert_eq!(gc.camera_vertex(0), Some(0));
        assert_eq!(gc.camera_vertex(1), Some(1));
        assert_eq!(gc.vertex_info(0).kind, VertexKind::CameraCenter);
        assert_eq!(*gc.point(1), Point3::new(4.0, 0.5, 0.5));

        // A camera sharing a center with an existing vertex reuses it
        let mut gc = DelaunayGraphCut::new(two_cameras());
        gc.push_vertex(Point3::new(0.5, 0.5, 4.001), GcVertexInfo::observed(0.01, vec![1]));
        assert_eq!(gc.add_points_from_camera_centers(&[0], 0.01), 0);
        assert_eq!(gc.camera_vertex(0), Some(0));
        assert_eq!(gc.vertex_info(0).kind, VertexKind::Observed);
        assert_eq!(gc.vertex_info(0).cams, vec![1]);
    }

    #[test]
    fn test_grid_aligned_landmarks() {
        // 7x7x7 lattice: 49 landmarks share each coordinate plane
        let n = 7;
        let landmarks = (0..n * n * n)
            .map(|i| {
                let (x, y, z) = (i % n, (i / n) % n, i / (n * n));
                let p = Point3::new(x as f64, y as f64, z as f64) / (n - 1) as f64;
                Landmark::new(p, vec![0])
            })
            .collect();
        let sfm = SfmData::new(landmarks);

        let mut gc = DelaunayGraphCut::new(two_cameras());
        assert_eq!(gc.add_points_from_sfm(&unit_box(), &[0, 1], &sfm), 343);
        assert_eq!(gc.add_points_from_camera_centers(&[0, 1], 0.01), 2);
        assert_eq!(gc.add_points_to_prevent_singularities(&unit_box(), 0.01), 6);
        assert_eq!(gc.add_helper_points(2, &unit_box(), 1e-4, 3), 8);
        assert_eq!(gc.nb_vertices(), 343 + 2 + 6 + 8);

        // Points added during the same call are found too
        assert_eq!(gc.add_points_to_prevent_singularities(&unit_box(), 0.01), 0);
    }

    #[test]
    fn test_singularity_points_outside_region() {
        let mut gc = DelaunayGraphCut::new(MultiViewParams::default());
        let hexah = unit_box();
        assert_eq!(gc.add_points_to_prevent_singularities(&hexah, 1e-3), 6);
        assert!(gc.points().iter().all(|p| !hexah.contains(p)));
        assert!(gc.vertices_attr().iter().all(|a| a.kind == VertexKind::Helper));
        assert_eq!(gc.points()[0], Point3::new(0.5, 0.5, -0.05));
        // A second call finds every point already present
        assert_eq!(gc.add_points_to_prevent_singularities(&hexah, 1e-3), 0);
    }

    #[test]
    fn test_helper_lattice_is_reproducible() {
        let hexah = unit_box();
        let mut a = DelaunayGraphCut::new(MultiViewParams::default());
        let mut b = DelaunayGraphCut::new(MultiViewParams::default());
        assert_eq!(a.add_helper_points(3, &hexah, 1e-3, 7), 27);
        assert_eq!(b.add_helper_points(3, &hexah, 1e-3, 7), 27);
        assert_eq!(a.points(), b.points());
        assert!(a.points().iter().all(|p| hexah.contains(p)));
        assert_eq!(a.add_helper_points(0, &hexah, 1e-3, 7), 0);
    }
}
