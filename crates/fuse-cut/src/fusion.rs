//! Depth-map fusion and dense point-cloud assembly.
//!
//! Each selected camera's depth map is subsampled on a square pixel grid: per
//! tile the valid pixel with the best similarity is back-projected. Samples
//! from all cameras are then merged greedily within a radius proportional to
//! their pixel size, and optionally refined against the merged points with
//! tighter margins. A fused point keeps the cameras supporting it, and is
//! dropped when too few cameras support it or when they see it under too
//! small an angle.

use kiddo::{ImmutableKdTree, SquaredEuclidean};
use mvs_mesh::Hexahedron;
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::camera::{Camera, DepthMap, DepthMapSource, SfmData};
use crate::error::{FuseCutError, FuseCutResult};
use crate::graph::{DelaunayGraphCut, GcVertexInfo, VertexKind};
use crate::observer::{Stage, StageSummary};
use crate::params::{AssemblyParams, FuseParams};

/// Counts gathered by [`DelaunayGraphCut::fuse_from_depth_maps`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FusionReport {
    /// Pixel step used to subsample the depth maps.
    pub step: usize,
    pub cameras_used: usize,
    /// Selected cameras without a depth map.
    pub cameras_missing: usize,
    pub input_points: usize,
    pub fused_points: usize,
    pub rejected_min_vis: usize,
    pub rejected_angle: usize,
    /// Fused points inserted after the `max_points` cap.
    pub kept_points: usize,
}

/// Counts gathered by [`DelaunayGraphCut::create_dense_point_cloud`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloudReport {
    pub sfm_points: usize,
    pub fusion: Option<FusionReport>,
    pub camera_centers: usize,
    pub helper_points: usize,
}

/// One back-projected depth sample.
#[derive(Debug, Clone, Copy)]
struct Sample {
    position: Point3<f64>,
    cam: u32,
    sim: f32,
    pix_size: f64,
}

/// Running weighted mean of the samples merged into one point.
#[derive(Debug, Clone)]
struct FusedPoint {
    seed: Point3<f64>,
    weighted: Vector3<f64>,
    weight: f64,
    cams: Vec<u32>,
    pix_size: f64,
    best_sim: f32,
}

impl FusedPoint {
    fn new(seed: Point3<f64>) -> Self {
        Self {
            seed,
            weighted: Vector3::zeros(),
            weight: 0.0,
            cams: Vec::new(),
            pix_size: f64::MAX,
            best_sim: f32::MAX,
        }
    }

    fn support(&mut self, s: &Sample) {
        self.cams.push(s.cam);
        self.pix_size = self.pix_size.min(s.pix_size);
        self.best_sim = self.best_sim.min(s.sim);
    }

    fn contribute(&mut self, s: &Sample, w: f64) {
        self.weighted += s.position.coords * w;
        self.weight += w;
    }

    fn position(&self) -> Point3<f64> {
        if self.weight > 0.0 {
            Point3::from(self.weighted / self.weight)
        } else {
            self.seed
        }
    }
}

/// Pixel step so that all depth maps together yield about `max_input_points`
/// samples, never below `min_step`.
pub fn fuse_step(total_pixels: usize, max_input_points: usize, min_step: usize) -> usize {
    let ratio = total_pixels as f64 / max_input_points.max(1) as f64;
    (ratio.sqrt().floor() as usize).max(min_step).max(1)
}

/// Weight of a sample of similarity `sim` in [-1, 1] (lower is better).
fn sim_weight(sim: f32, gaussian_size: f32) -> f64 {
    let x = (1.0 + sim as f64).max(0.0);
    (-(gaussian_size as f64) * x * x / 2.0).exp().max(f64::MIN_POSITIVE)
}

/// Largest angle, in degrees, between the rays from `p` to the centers of `cams`.
fn max_triangulation_angle(p: &Point3<f64>, cams: &[u32], cameras: &[Camera]) -> f64 {
    let dirs: Vec<Vector3<f64>> = cams
        .iter()
        .filter_map(|&c| (cameras[c as usize].center - p).try_normalize(0.0))
        .collect();
    let mut max_cos = 1.0f64;
    for (i, a) in dirs.iter().enumerate() {
        for b in &dirs[i + 1..] {
            max_cos = max_cos.min(a.dot(b));
        }
    }
    max_cos.clamp(-1.0, 1.0).acos().to_degrees()
}

fn sample_depth_map(camera: &Camera, cam: u32, map: &DepthMap, step: usize, hexah: &Hexahedron) -> Vec<Sample> {
    let scale_x = camera.width as f64 / map.width.max(1) as f64;
    let scale_y = camera.height as f64 / map.height.max(1) as f64;
    let mut samples = Vec::new();
    for ty in (0..map.height).step_by(step) {
        for tx in (0..map.width).step_by(step) {
            let mut best: Option<(u32, u32, f32, f32)> = None;
            for y in ty..(ty + step as u32).min(map.height) {
                for x in tx..(tx + step as u32).min(map.width) {
                    let depth = map.depth(x, y);
                    if depth.is_nan() || depth <= 0.0 {
                        continue;
                    }
                    let sim = map.sim(x, y);
                    if best.is_none_or(|(_, _, _, s)| sim < s) {
                        best = Some((x, y, depth, sim));
                    }
                }
            }
            let Some((x, y, depth, sim)) = best else {
                continue;
            };
            let position = camera.back_project(x as f64 * scale_x, y as f64 * scale_y, depth as f64);
            if !hexah.contains(&position) {
                continue;
            }
            samples.push(Sample {
                position,
                cam,
                sim,
                pix_size: camera.pixel_size_at(&position) * scale_x,
            });
        }
    }
    samples
}

fn build_tree(points: impl Iterator<Item = Point3<f64>>) -> ImmutableKdTree<f64, 3> {
    let entries: Vec<[f64; 3]> = points.map(|p| [p.x, p.y, p.z]).collect();
    ImmutableKdTree::new_from_slice(&entries)
}

/// Greedy merge: each unassigned sample, in order, seeds a point that takes
/// every unassigned sample within its merge radius.
fn merge_samples(samples: &[Sample], params: &FuseParams) -> Vec<FusedPoint> {
    if samples.is_empty() {
        return Vec::new();
    }
    let tree = build_tree(samples.iter().map(|s| s.position));
    let mut assigned = vec![false; samples.len()];
    let mut fused = Vec::new();
    for (i, seed) in samples.iter().enumerate() {
        if assigned[i] {
            continue;
        }
        let radius = params.pix_size_margin_init_coef * seed.pix_size;
        let mut neighbours: Vec<usize> = tree
            .within_unsorted::<SquaredEuclidean>(&[seed.position.x, seed.position.y, seed.position.z], radius * radius)
            .into_iter()
            .map(|n| n.item as usize)
            .filter(|&j| !assigned[j])
            .collect();
        neighbours.sort_unstable();
        if !neighbours.contains(&i) {
            neighbours.insert(0, i);
        }

        let mut point = FusedPoint::new(seed.position);
        for j in neighbours {
            assigned[j] = true;
            let s = &samples[j];
            point.support(s);
            point.contribute(s, sim_weight(s.sim, params.sim_gaussian_size_init));
        }
        fused.push(point);
    }
    fused
}

/// Second pass: every sample supports its nearest merged point within
/// `vote_margin_factor` final margins, and moves it within
/// `contribute_margin_factor` final margins.
fn refine_points(samples: &[Sample], merged: &[FusedPoint], params: &FuseParams) -> Vec<FusedPoint> {
    if merged.is_empty() {
        return Vec::new();
    }
    let tree = build_tree(merged.iter().map(FusedPoint::position));
    let mut refined: Vec<FusedPoint> = merged.iter().map(|p| FusedPoint::new(p.position())).collect();
    for s in samples {
        let nn = tree.nearest_one::<SquaredEuclidean>(&[s.position.x, s.position.y, s.position.z]);
        let dist = nn.distance.sqrt();
        let margin = params.pix_size_margin_final_coef * s.pix_size;
        let point = &mut refined[nn.item as usize];
        if dist < params.vote_margin_factor as f64 * margin {
            point.support(s);
        }
        if dist < params.contribute_margin_factor as f64 * margin {
            point.contribute(s, sim_weight(s.sim, params.sim_gaussian_size));
        }
    }
    refined
}

impl DelaunayGraphCut {
    /// Fuse the depth maps of `cams` into observed vertices inside `hexah`.
    ///
    /// Fails with [`FuseCutError::InsufficientGeometry`] when fewer than four
    /// observed vertices exist afterwards, and with
    /// [`FuseCutError::UnknownCamera`] for ids outside the camera set.
    pub fn fuse_from_depth_maps(
        &mut self,
        cams: &[u32],
        hexah: &Hexahedron,
        source: &dyn DepthMapSource,
        params: &FuseParams,
    ) -> FuseCutResult<FusionReport> {
        params.validate()?;
        self.mp.check_ids(cams)?;

        let total_pixels: usize = cams
            .iter()
            .map(|&c| {
                let cam = &self.mp.cameras[c as usize];
                cam.width as usize * cam.height as usize
            })
            .sum();
        let step = fuse_step(total_pixels, params.max_input_points, params.min_step);

        let per_camera: Vec<Option<Vec<Sample>>> = cams
            .par_iter()
            .map(|&c| -> FuseCutResult<Option<Vec<Sample>>> {
                let map = source.depth_map(c)?;
                Ok(map.map(|m| sample_depth_map(&self.mp.cameras[c as usize], c, &m, step, hexah)))
            })
            .collect::<FuseCutResult<_>>()?;

        let mut report = FusionReport {
            step,
            ..FusionReport::default()
        };
        let mut samples = Vec::new();
        for (&c, cam_samples) in cams.iter().zip(per_camera) {
            match cam_samples {
                Some(s) => {
                    report.cameras_used += 1;
                    samples.extend(s);
                }
                None => {
                    report.cameras_missing += 1;
                    self.observer
                        .warning(Stage::PointCloud, &format!("camera {} has no depth map", c));
                }
            }
        }
        report.input_points = samples.len();

        let mut fused = merge_samples(&samples, params);
        if params.refine_fuse {
            fused = refine_points(&samples, &fused, params);
        }
        report.fused_points = fused.len();

        let mut kept = Vec::with_capacity(fused.len());
        for mut point in fused {
            point.cams.sort_unstable();
            point.cams.dedup();
            if (point.cams.len() as u32) < params.min_vis.max(1) {
                report.rejected_min_vis += 1;
                continue;
            }
            let position = point.position();
            let angle = if point.cams.len() >= 2 {
                let angle = max_triangulation_angle(&position, &point.cams, &self.mp.cameras);
                if angle < params.min_angle_threshold {
                    report.rejected_angle += 1;
                    continue;
                }
                angle
            } else {
                0.0
            };
            // Lower is better: good similarity and a wide baseline
            let score = params.sim_factor * point.best_sim + params.angle_factor * (1.0 - (angle / 90.0).min(1.0)) as f32;
            kept.push((position, point, score));
        }

        let n = kept.len();
        let limit = params.max_points.min(n);
        for i in 0..limit {
            let (position, point, score) = &kept[i * n / limit];
            let mut info = GcVertexInfo::observed(point.pix_size as f32, point.cams.clone());
            info.sim_score = *score;
            self.push_vertex(*position, info);
        }
        report.kept_points = limit;

        let observed = self
            .vertices_attr
            .iter()
            .filter(|a| a.kind == VertexKind::Observed)
            .count();
        info!(
            "Fused {} samples (step {}) into {} points, kept {}",
            report.input_points, step, report.fused_points, report.kept_points
        );
        if observed < 4 {
            return Err(FuseCutError::insufficient_geometry(
                observed,
                "after depth-map fusion",
            ));
        }
        Ok(report)
    }

    /// Build the full point cloud: SfM landmarks, fused depth maps, camera
    /// centers and helper points, as enabled.
    pub fn create_dense_point_cloud(
        &mut self,
        hexah: &Hexahedron,
        cams: &[u32],
        sfm: Option<&SfmData>,
        depth_maps: Option<&dyn DepthMapSource>,
        fuse: &FuseParams,
        assembly: &AssemblyParams,
    ) -> FuseCutResult<PointCloudReport> {
        let timer = self.begin_stage(Stage::PointCloud);
        let mut report = PointCloudReport::default();

        if let Some(sfm) = sfm {
            report.sfm_points = self.add_points_from_sfm(hexah, cams, sfm);
        }
        if let Some(source) = depth_maps {
            report.fusion = Some(self.fuse_from_depth_maps(cams, hexah, source, fuse)?);
        }
        let observed = self.nb_vertices();
        if observed < 4 {
            return Err(FuseCutError::insufficient_geometry(
                observed,
                "no SfM landmarks or depth samples inside the region",
            ));
        }

        let min_dist = assembly.helper_min_dist_ratio * hexah.diagonal();
        if assembly.add_camera_centers {
            report.camera_centers = self.add_points_from_camera_centers(cams, min_dist);
        }
        if assembly.add_singularity_points {
            report.helper_points += self.add_points_to_prevent_singularities(hexah, min_dist);
        }
        report.helper_points += self.add_helper_points(
            assembly.helper_grid_dim,
            hexah,
            min_dist,
            assembly.helper_jitter_seed,
        );
        debug!("Point cloud: {:?}", report);

        let summary = StageSummary::new()
            .with("sfm_points", report.sfm_points)
            .with("fused_points", report.fusion.as_ref().map_or(0, |f| f.kept_points))
            .with("camera_centers", report.camera_centers)
            .with("helper_points", report.helper_points)
            .with("vertices", self.nb_vertices());
        self.end_stage(Stage::PointCloud, timer, summary);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use crate::camera::{InMemoryDepthMaps, MultiViewParams};

    /// Six cameras on the axes looking at the origin.
    fn ring_of_cameras() -> MultiViewParams {
        let origin = Point3::origin();
        let positions = [
            (Point3::new(3.0, 0.0, 0.0), Vector3::z()),
            (Point3::new(-3.0, 0.0, 0.0), Vector3::z()),
            (Point3::new(0.0, 3.0, 0.0), Vector3::z()),
            (Point3::new(0.0, -3.0, 0.0), Vector3::z()),
            (Point3::new(0.0, 0.0, 3.0), Vector3::y()),
            (Point3::new(0.0, 0.0, -3.0), Vector3::y()),
        ];
        MultiViewParams::new(
            positions
                .iter()
                .map(|&(c, up)| Camera::look_at(c, origin, up, 60.0, 64, 48))
                .collect(),
        )
    }

    /// Depth maps of the unit sphere seen by every camera.
    fn sphere_depth_maps(mp: &MultiViewParams) -> InMemoryDepthMaps {
        let mut maps = InMemoryDepthMaps::new();
        for (id, cam) in mp.cameras.iter().enumerate() {
            let mut map = DepthMap::new(cam.width, cam.height);
            for y in 0..cam.height {
                for x in 0..cam.width {
                    let dir = cam.pixel_ray(x as f64, y as f64).into_inner();
                    let b = cam.center.coords.dot(&dir);
                    let disc = b * b - (cam.center.coords.norm_squared() - 1.0);
                    if disc > 0.0 {
                        map.set(x, y, (-b - disc.sqrt()) as f32, -0.8);
                    }
                }
            }
            maps.insert(id as u32, map);
        }
        maps
    }

    fn region() -> Hexahedron {
        Hexahedron::from_bounds(Point3::new(-2.0, -2.0, -2.0), Point3::new(2.0, 2.0, 2.0))
    }

    #[test]
    fn test_fuse_step() {
        assert_eq!(fuse_step(6 * 64 * 48, 1000, 2), 4);
        assert_eq!(fuse_step(100, 1000, 2), 2);
        assert_eq!(fuse_step(100, 1000, 0), 1);
    }

    #[test]
    fn test_sim_weight_prefers_low_cost() {
        assert_relative_eq!(sim_weight(-1.0, 10.0), 1.0, epsilon = 1e-12);
        assert!(sim_weight(-0.5, 10.0) > sim_weight(0.5, 10.0));
        assert!(sim_weight(1.0, 10.0) > 0.0);
    }

    #[test]
    fn test_triangulation_angle() {
        let cams = vec![
            Camera::look_at(Point3::new(1.0, 0.0, 0.0), Point3::origin(), Vector3::z(), 10.0, 8, 8),
            Camera::look_at(Point3::new(0.0, 1.0, 0.0), Point3::origin(), Vector3::z(), 10.0, 8, 8),
        ];
        let angle = max_triangulation_angle(&Point3::origin(), &[0, 1], &cams);
        assert_relative_eq!(angle, 90.0, epsilon = 1e-9);
        assert_eq!(max_triangulation_angle(&Point3::origin(), &[0], &cams), 0.0);
    }

    #[test]
    fn test_fused_sphere_points_lie_on_surface() {
        let mp = ring_of_cameras();
        let maps = sphere_depth_maps(&mp);
        let mut gc = DelaunayGraphCut::new(mp);
        let params = FuseParams {
            min_step: 1,
            ..FuseParams::default()
        };
        let report = gc
            .fuse_from_depth_maps(&[0, 1, 2, 3, 4, 5], &region(), &maps, &params)
            .unwrap();
        assert_eq!(report.step, 1);
        assert_eq!(report.cameras_used, 6);
        assert!(report.input_points > report.fused_points);
        assert!(report.kept_points >= 4);
        assert_eq!(gc.nb_vertices(), report.kept_points);
        for (p, attr) in gc.points().iter().zip(gc.vertices_attr()) {
            assert!((p.coords.norm() - 1.0).abs() < 0.05, "point {:?} off the sphere", p);
            assert!(attr.nrc >= 2);
            assert_eq!(attr.nrc as usize, attr.cams.len());
        }
    }

    #[test]
    fn test_max_points_caps_output() {
        let mp = ring_of_cameras();
        let maps = sphere_depth_maps(&mp);
        let mut gc = DelaunayGraphCut::new(mp);
        let params = FuseParams {
            min_step: 1,
            max_points: 10,
            ..FuseParams::default()
        };
        let report = gc
            .fuse_from_depth_maps(&[0, 1, 2, 3, 4, 5], &region(), &maps, &params)
            .unwrap();
        assert_eq!(report.kept_points, 10);
        assert_eq!(gc.nb_vertices(), 10);
    }

    #[test]
    fn test_empty_depth_maps_are_insufficient() {
        let mp = ring_of_cameras();
        let mut maps = InMemoryDepthMaps::new();
        for id in 0..6 {
            maps.insert(id, DepthMap::new(64, 48));
        }
        let mut gc = DelaunayGraphCut::new(mp);
        let err = gc
            .fuse_from_depth_maps(&[0, 1, 2, 3, 4, 5], &region(), &maps, &FuseParams::default())
            .unwrap_err();
        assert!(matches!(err, FuseCutError::InsufficientGeometry { points: 0, .. }));
        assert_eq!(gc.nb_vertices(), 0);
    }

    #[test]
    fn test_missing_maps_are_reported() {
        let mp = ring_of_cameras();
        let all = sphere_depth_maps(&mp);
        let mut maps = InMemoryDepthMaps::new();
        for id in [0, 2] {
            maps.insert(id, all.depth_map(id).unwrap().unwrap());
        }
        let mut gc = DelaunayGraphCut::new(mp);
        let params = FuseParams {
            min_step: 1,
            min_vis: 1,
            ..FuseParams::default()
        };
        let report = gc
            .fuse_from_depth_maps(&[0, 1, 2, 3, 4, 5], &region(), &maps, &params)
            .unwrap();
        assert_eq!(report.cameras_used, 2);
        assert_eq!(report.cameras_missing, 4);
    }

    #[test]
    fn test_unknown_camera_rejected() {
        let mut gc = DelaunayGraphCut::new(ring_of_cameras());
        let err = gc
            .fuse_from_depth_maps(&[9], &region(), &InMemoryDepthMaps::new(), &FuseParams::default())
            .unwrap_err();
        assert!(matches!(err, FuseCutError::UnknownCamera { camera: 9, .. }));
    }

    #[test]
    fn test_dense_point_cloud_adds_cameras_and_helpers() {
        let mp = ring_of_cameras();
        let maps = sphere_depth_maps(&mp);
        let mut gc = DelaunayGraphCut::new(mp);
        let fuse = FuseParams {
            min_step: 2,
            ..FuseParams::default()
        };
        let assembly = AssemblyParams::default();
        let report = gc
            .create_dense_point_cloud(&region(), &[0, 1, 2, 3, 4, 5], None, Some(&maps as &dyn DepthMapSource), &fuse, &assembly)
            .unwrap();
        assert_eq!(report.camera_centers, 6);
        assert_eq!(report.helper_points, 6);
        for cam in 0..6 {
            assert!(gc.camera_vertex(cam).is_some());
        }
        let kept = report.fusion.unwrap().kept_points;
        assert_eq!(gc.nb_vertices(), kept + 12);
    }

    #[test]
    fn test_dense_point_cloud_without_input_fails() {
        let mut gc = DelaunayGraphCut::new(ring_of_cameras());
        let err = gc
            .create_dense_point_cloud(
                &region(),
                &[0, 1],
                Some(&SfmData::default()),
                None,
                &FuseParams::default(),
                &AssemblyParams::default(),
            )
            .unwrap_err();
        assert!(matches!(err, FuseCutError::InsufficientGeometry { .. }));
    }
}
