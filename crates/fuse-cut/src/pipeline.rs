//! End-to-end reconstruction.
//!
//! [`Reconstruction`] chains point-cloud assembly, tetrahedralization, voting,
//! the cut, label cleanup, extraction and mesh cleanup. Mesh cleanup steps are
//! queued and run in the order they were added.
//!
//! # Example
//!
//! ```no_run
//! use fuse_cut::{Camera, Hexahedron, MultiViewParams, Reconstruction, SfmData};
//! use nalgebra::{Point3, Vector3};
//!
//! let cameras = vec![Camera::look_at(
//!     Point3::new(0.0, 0.0, 5.0),
//!     Point3::origin(),
//!     Vector3::y(),
//!     1000.0,
//!     1920,
//!     1080,
//! )];
//! let sfm = SfmData::new(Vec::new());
//! let region = Hexahedron::from_bounds(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0));
//!
//! let result = Reconstruction::new(MultiViewParams::new(cameras))
//!     .single_object()
//!     .region(region)
//!     .sfm(&sfm)
//!     .smooth(2, 0.5)
//!     .run()
//!     .unwrap();
//!
//! result.mesh.save("dense.ply").unwrap();
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use mvs_mesh::cleanup::{
    filter_large_edge_triangles, laplacian_smooth, remove_triangles_outside_hexahedron,
    remove_unreferenced_vertices,
};
use mvs_mesh::{Hexahedron, Mesh, keep_largest_component};
use nalgebra::Point3;
use tracing::info;

use crate::camera::{DepthMapSource, MultiViewParams, SfmData};
use crate::error::{FuseCutError, FuseCutResult};
use crate::fusion::PointCloudReport;
use crate::graph::DelaunayGraphCut;
use crate::labeling::CutReport;
use crate::observer::{ReconstructionObserver, Stage};
use crate::params::{MeshCleanupParams, PostProcessParams, ReconstructionConfig, VotingParams};
use crate::stats::GraphStatistics;
use crate::tracing_ext::log_graph_state;
use crate::voting::VotingReport;

/// Margin added around the SfM landmarks when no region is given.
const DEFAULT_REGION_MARGIN: f64 = 1.1;

/// Outcome of [`DelaunayGraphCut::create_graph_cut`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphCutReport {
    /// Vertices silenced for belonging to a small point-cloud segment.
    pub small_segment_vertices: usize,
    pub voting: VotingReport,
    pub cut: CutReport,
}

/// Changes made by the mesh cleanup steps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupReport {
    pub smoothing_iterations: usize,
    pub long_edge_triangles_removed: usize,
    pub outside_triangles_removed: usize,
    pub component_faces_removed: usize,
    pub unreferenced_vertices_removed: usize,
}

/// Everything counted during a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconstructionStats {
    pub point_cloud: PointCloudReport,
    pub graph_cut: GraphCutReport,
    /// Graph counts after labeling.
    pub graph: GraphStatistics,
    pub surface_facets: usize,
    /// Surface triangles dropped for touching camera centers or helper points.
    pub filtered_triangles: usize,
    pub cleanup: CleanupReport,
}

/// Mesh and statistics returned by [`Reconstruction::run`].
#[derive(Debug, Clone)]
pub struct ReconstructionResult {
    pub mesh: Mesh,
    pub stats: ReconstructionStats,
}

impl DelaunayGraphCut {
    /// Report the position of `stage` in the run to the observer.
    fn report_progress(&self, stage: Stage) {
        let index = Stage::ALL.iter().position(|&s| s == stage).unwrap_or(0);
        self.observer.progress(stage, index as u64, Stage::ALL.len() as u64);
    }

    /// Tetrahedralize the assembled point cloud, optionally silence small
    /// segments, vote and cut.
    pub fn create_graph_cut(
        &mut self,
        hexah: &Hexahedron,
        cams: &[u32],
        config: &ReconstructionConfig,
    ) -> FuseCutResult<GraphCutReport> {
        config.voting.validate()?;
        self.mp.check_ids(cams)?;

        self.report_progress(Stage::Tetrahedralization);
        self.compute_delaunay()?;

        let mut small_segment_vertices = 0;
        if config.assembly.remove_small_segments {
            let segments = self.compute_vertices_seg_size(true, config.assembly.segment_alpha);
            small_segment_vertices = self.remove_small_segs(config.assembly.small_segment_size);
            info!(
                "{} point-cloud segments, {} vertices in segments under {} silenced",
                segments, small_segment_vertices, config.assembly.small_segment_size
            );
        }

        self.report_progress(Stage::Voting);
        let voting = self.vote_full_empty_score(cams, &config.voting);

        self.report_progress(Stage::MinCut);
        let cut = self.reconstruct_gc(hexah, &config.voting, &config.post_process);

        Ok(GraphCutReport {
            small_segment_vertices,
            voting,
            cut,
        })
    }
}

/// Queued mesh cleanup step.
#[derive(Debug, Clone, Copy, PartialEq)]
enum CleanupOp {
    Smooth { iterations: usize, lambda: f64 },
    FilterLargeEdges(f64),
    ClipToRegion,
    KeepLargestComponent,
}

fn cleanup_ops(params: &MeshCleanupParams) -> Vec<CleanupOp> {
    let mut ops = Vec::new();
    if let Some(ratio) = params.max_edge_ratio {
        ops.push(CleanupOp::FilterLargeEdges(ratio));
    }
    if params.keep_largest_component {
        ops.push(CleanupOp::KeepLargestComponent);
    }
    if params.smoothing_iterations > 0 {
        ops.push(CleanupOp::Smooth {
            iterations: params.smoothing_iterations,
            lambda: params.smoothing_lambda,
        });
    }
    ops
}

fn apply_cleanup(mesh: &mut Mesh, ops: &[CleanupOp], region: &Hexahedron) -> CleanupReport {
    let mut report = CleanupReport::default();
    for op in ops {
        match *op {
            CleanupOp::Smooth { iterations, lambda } => {
                laplacian_smooth(mesh, iterations, lambda);
                report.smoothing_iterations += iterations;
            }
            CleanupOp::FilterLargeEdges(ratio) => {
                report.long_edge_triangles_removed += filter_large_edge_triangles(mesh, ratio);
            }
            CleanupOp::ClipToRegion => {
                report.outside_triangles_removed += remove_triangles_outside_hexahedron(mesh, region);
            }
            CleanupOp::KeepLargestComponent => {
                report.component_faces_removed += keep_largest_component(mesh);
            }
        }
    }
    report.unreferenced_vertices_removed = remove_unreferenced_vertices(mesh);
    report
}

/// Box around the SfM landmarks, enlarged by [`DEFAULT_REGION_MARGIN`].
fn region_from_landmarks(sfm: Option<&SfmData>) -> FuseCutResult<Hexahedron> {
    let bounds = sfm
        .into_iter()
        .flat_map(|s| s.landmarks.iter().map(|l| l.position))
        .fold(None, |acc: Option<(Point3<f64>, Point3<f64>)>, p| match acc {
            None => Some((p, p)),
            Some((lo, hi)) => Some((lo.inf(&p), hi.sup(&p))),
        });
    match bounds {
        Some((min, max)) if min != max => {
            Ok(Hexahedron::from_bounds(min, max).enlarged(DEFAULT_REGION_MARGIN))
        }
        _ => Err(FuseCutError::invalid_parameter(
            "region",
            "none",
            "a region is required unless SfM landmarks span a volume",
        )),
    }
}

/// Fluent builder for a full reconstruction.
///
/// Inputs are borrowed until [`run`](Self::run). Without [`cameras`](Self::cameras)
/// every camera is used; without [`region`](Self::region) the region is the
/// bounding box of the SfM landmarks, slightly enlarged.
///
/// Setting a configuration (directly or through a preset) replaces the queued
/// cleanup steps with the ones its [`MeshCleanupParams`] describe. Steps added
/// afterwards are appended.
pub struct Reconstruction<'a> {
    mp: MultiViewParams,
    region: Option<Hexahedron>,
    cameras: Option<Vec<u32>>,
    sfm: Option<&'a SfmData>,
    depth_maps: Option<&'a dyn DepthMapSource>,
    config: ReconstructionConfig,
    cleanup: Vec<CleanupOp>,
    observer: Option<Arc<dyn ReconstructionObserver>>,
    dump: Option<(PathBuf, PathBuf)>,
}

impl<'a> Reconstruction<'a> {
    pub fn new(mp: MultiViewParams) -> Self {
        let config = ReconstructionConfig::default();
        Self {
            mp,
            region: None,
            cameras: None,
            sfm: None,
            depth_maps: None,
            cleanup: cleanup_ops(&config.cleanup),
            config,
            observer: None,
            dump: None,
        }
    }

    /// Replace the configuration and the queued cleanup steps.
    pub fn config(mut self, config: ReconstructionConfig) -> Self {
        self.cleanup = cleanup_ops(&config.cleanup);
        self.config = config;
        self
    }

    /// Preset for quick previews.
    pub fn fast(self) -> Self {
        self.config(ReconstructionConfig::fast())
    }

    /// Preset keeping a single connected object.
    pub fn single_object(self) -> Self {
        self.config(ReconstructionConfig::single_object())
    }

    /// Preset with the emptiness-gradient correction.
    pub fn ijcv(self) -> Self {
        self.config(ReconstructionConfig::ijcv())
    }

    pub fn voting(mut self, voting: VotingParams) -> Self {
        self.config.voting = voting;
        self
    }

    pub fn post_process(mut self, post_process: PostProcessParams) -> Self {
        self.config.post_process = post_process;
        self
    }

    /// Keep surface triangles touching camera centers or helper points.
    pub fn keep_helper_triangles(mut self) -> Self {
        self.config.filter_helper_points_triangles = false;
        self
    }

    pub fn region(mut self, region: Hexahedron) -> Self {
        self.region = Some(region);
        self
    }

    pub fn cameras(mut self, cams: Vec<u32>) -> Self {
        self.cameras = Some(cams);
        self
    }

    pub fn sfm(mut self, sfm: &'a SfmData) -> Self {
        self.sfm = Some(sfm);
        self
    }

    pub fn depth_maps(mut self, source: &'a dyn DepthMapSource) -> Self {
        self.depth_maps = Some(source);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn ReconstructionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Write the labeled triangulation to `dh_path` and its summary to
    /// `info_path` once the cut is done.
    pub fn save_dump(mut self, dh_path: impl Into<PathBuf>, info_path: impl Into<PathBuf>) -> Self {
        self.dump = Some((dh_path.into(), info_path.into()));
        self
    }

    /// Laplacian smoothing of the extracted mesh.
    pub fn smooth(mut self, iterations: usize, lambda: f64) -> Self {
        self.cleanup.push(CleanupOp::Smooth { iterations, lambda });
        self
    }

    /// Drop triangles with an edge longer than `ratio` average edge lengths.
    pub fn filter_large_edges(mut self, ratio: f64) -> Self {
        self.cleanup.push(CleanupOp::FilterLargeEdges(ratio));
        self
    }

    /// Drop triangles with a vertex outside the region.
    pub fn clip_to_region(mut self) -> Self {
        self.cleanup.push(CleanupOp::ClipToRegion);
        self
    }

    pub fn keep_largest_component(mut self) -> Self {
        self.cleanup.push(CleanupOp::KeepLargestComponent);
        self
    }

    /// Run every stage and the queued cleanup steps.
    pub fn run(self) -> FuseCutResult<ReconstructionResult> {
        let Reconstruction {
            mp,
            region,
            cameras,
            sfm,
            depth_maps,
            config,
            cleanup,
            observer,
            dump,
        } = self;

        config.validate()?;
        let region = match region {
            Some(region) => region,
            None => region_from_landmarks(sfm)?,
        };
        let cams = cameras.unwrap_or_else(|| (0..mp.len() as u32).collect());
        mp.check_ids(&cams)?;

        let mut gc = DelaunayGraphCut::new(mp);
        if let Some(observer) = observer {
            gc = gc.with_observer(observer);
        }

        gc.report_progress(Stage::PointCloud);
        let point_cloud =
            gc.create_dense_point_cloud(&region, &cams, sfm, depth_maps, &config.fuse, &config.assembly)?;
        let graph_cut = gc.create_graph_cut(&region, &cams, &config)?;
        log_graph_state(&gc, "after cut");
        if let Some((dh_path, info_path)) = &dump {
            gc.save_dh(dh_path, info_path)?;
        }

        gc.report_progress(Stage::Extraction);
        let extracted = gc.create_mesh(config.filter_helper_points_triangles);
        let graph = gc.display_statistics();

        let mut mesh = extracted.mesh;
        let cleanup = apply_cleanup(&mut mesh, &cleanup, &region);
        info!(
            "Reconstruction done: {} vertices, {} triangles",
            mesh.vertex_count(),
            mesh.face_count()
        );

        Ok(ReconstructionResult {
            mesh,
            stats: ReconstructionStats {
                point_cloud,
                graph_cut,
                graph,
                surface_facets: extracted.surface_facets,
                filtered_triangles: extracted.filtered_triangles,
                cleanup,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Camera, Landmark};
    use crate::observer::{CallbackObserver, ObserverEvent, RecordingObserver};
    use std::sync::Mutex;
    use nalgebra::Vector3;

    /// Eight cameras on the corners of a cube, and six landmarks near six of
    /// the corner directions, each seen by the camera on its corner.
    fn corner_scene() -> (MultiViewParams, SfmData) {
        let signs = [
            (1.0, 1.0, 1.0),
            (1.0, 1.0, -1.0),
            (1.0, -1.0, 1.0),
            (1.0, -1.0, -1.0),
            (-1.0, 1.0, 1.0),
            (-1.0, 1.0, -1.0),
            (-1.0, -1.0, 1.0),
            (-1.0, -1.0, -1.0),
        ];
        let cameras = signs
            .iter()
            .map(|&(x, y, z)| {
                Camera::look_at(Point3::new(3.0 * x, 3.0 * y, 3.0 * z), Point3::origin(), Vector3::z(), 100.0, 64, 64)
            })
            .collect();
        let offsets = [
            Vector3::new(0.07, -0.04, 0.02),
            Vector3::new(-0.03, 0.06, -0.05),
            Vector3::new(0.05, 0.02, -0.06),
            Vector3::new(-0.06, -0.03, 0.04),
            Vector3::new(0.02, 0.05, 0.07),
            Vector3::new(-0.04, -0.07, -0.02),
        ];
        let landmarks = (1..7)
            .zip(offsets)
            .map(|(cam, offset)| {
                let (x, y, z) = signs[cam];
                Landmark::new(Point3::new(x, y, z) + offset, vec![cam as u32])
            })
            .collect();
        (MultiViewParams::new(cameras), SfmData::new(landmarks))
    }

    fn region() -> Hexahedron {
        Hexahedron::from_bounds(Point3::new(-2.0, -2.0, -2.0), Point3::new(2.0, 2.0, 2.0))
    }

    #[test]
    fn test_stages_reported_in_order() {
        let (mp, sfm) = corner_scene();
        let observer = Arc::new(RecordingObserver::new());
        Reconstruction::new(mp)
            .region(region())
            .sfm(&sfm)
            .observer(observer.clone())
            .run()
            .unwrap();

        let completed: Vec<Stage> = observer
            .events()
            .into_iter()
            .filter_map(|e| match e {
                ObserverEvent::Completed(stage, _) => Some(stage),
                _ => None,
            })
            .collect();
        assert_eq!(completed, Stage::ALL.to_vec());
    }

    #[test]
    fn test_progress_reported_before_each_stage() {
        let (mp, sfm) = corner_scene();
        let progress = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&progress);
        let observer = CallbackObserver::new(move |event| {
            if let ObserverEvent::Progress(stage, current, total) = event {
                if let Ok(mut seen) = seen.lock() {
                    seen.push((*stage, *current, *total));
                }
            }
        });
        let result = Reconstruction::new(mp)
            .region(region())
            .sfm(&sfm)
            .observer(Arc::new(observer))
            .run()
            .unwrap();
        assert!(result.mesh.face_count() > 0);

        let progress = progress.lock().unwrap().clone();
        let expected: Vec<(Stage, u64, u64)> = Stage::ALL
            .iter()
            .enumerate()
            .filter(|(_, s)| **s != Stage::PostProcessing)
            .map(|(i, &s)| (s, i as u64, 6))
            .collect();
        assert_eq!(progress, expected);
    }

    #[test]
    fn test_region_from_landmarks() {
        let (_, sfm) = corner_scene();
        let region = region_from_landmarks(Some(&sfm)).unwrap();
        assert!(sfm.landmarks.iter().all(|l| region.contains(&l.position)));

        let err = region_from_landmarks(None).unwrap_err();
        assert!(matches!(err, FuseCutError::InvalidParameter { name: "region", .. }));
    }

    #[test]
    fn test_unknown_camera_rejected() {
        let (mp, sfm) = corner_scene();
        let err = Reconstruction::new(mp)
            .region(region())
            .sfm(&sfm)
            .cameras(vec![0, 12])
            .run()
            .unwrap_err();
        assert!(matches!(err, FuseCutError::UnknownCamera { camera: 12, .. }));
    }

    #[test]
    fn test_presets_queue_cleanup_steps() {
        let builder = Reconstruction::new(MultiViewParams::default());
        assert!(builder.cleanup.is_empty());

        let builder = builder.single_object().smooth(3, 0.4);
        assert_eq!(
            builder.cleanup,
            vec![
                CleanupOp::KeepLargestComponent,
                CleanupOp::Smooth {
                    iterations: 3,
                    lambda: 0.4
                }
            ]
        );
        assert!(builder.config.post_process.leave_largest_full_segment_only);

        // A new configuration replaces the queue
        let builder = builder.fast();
        assert!(builder.cleanup.is_empty());
    }

    #[test]
    fn test_cleanup_drops_unreferenced_vertices() {
        let mut mesh = Mesh::new();
        for p in [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(5.0, 5.0, 5.0),
        ] {
            mesh.vertices.push(mvs_mesh::Vertex::new(p));
        }
        mesh.faces.push([0, 1, 2]);
        let report = apply_cleanup(&mut mesh, &[CleanupOp::ClipToRegion], &region());
        assert_eq!(report.outside_triangles_removed, 0);
        assert_eq!(report.unreferenced_vertices_removed, 1);
        assert_eq!(mesh.vertex_count(), 3);
    }
}
