//! Surface reconstruction from multi-view depth maps by a graph cut over a
//! Delaunay tetrahedralization.
//!
//! The point cloud (SfM landmarks, fused depth-map samples, camera centers and
//! helper points) is tetrahedralized. Every observation then votes along its
//! line of sight: cells between a point and its camera collect empty-space
//! evidence, cells just behind the point collect full-space evidence. A
//! minimum s-t cut labels each cell full or empty, label cleanup removes
//! small pieces and pockets, and the surface is the set of facets between a
//! full cell and an empty one.
//!
//! # Features
//!
//! - **Point cloud**: SfM landmarks, depth-map fusion, camera centers, singularity and helper points
//! - **Triangulation**: incremental Delaunay with enclosing vertices, cell adjacency and ray walks
//! - **Voting**: parallel, deterministic per-vertex evidence, optional emptiness-gradient correction
//! - **Cut**: max flow over the cell graph, label cleanup (dust, bubbles, isolated cells)
//! - **Output**: [`Mesh`] with per-vertex camera visibility, tetrahedral mesh, diagnostics dump
//!
//! # Coordinate System
//!
//! Cameras are pinhole models with a world-to-camera rotation and a center in
//! world coordinates. Depths are measured along the normalized pixel ray.
//! Output faces are wound counter-clockwise seen from the empty side, so
//! normals point toward the cameras.
//!
//! # Quick Start
//!
//! ```no_run
//! use fuse_cut::{Hexahedron, InMemoryDepthMaps, MultiViewParams, Reconstruction, SfmData};
//! use nalgebra::Point3;
//!
//! # fn cameras() -> MultiViewParams { MultiViewParams::default() }
//! # fn depth_maps() -> InMemoryDepthMaps { InMemoryDepthMaps::new() }
//! let mp = cameras();
//! let maps = depth_maps();
//! let region = Hexahedron::from_bounds(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0));
//!
//! let result = Reconstruction::new(mp)
//!     .region(region)
//!     .depth_maps(&maps)
//!     .filter_large_edges(60.0)
//!     .run()
//!     .unwrap();
//! println!("{}", result.stats.graph);
//! result.mesh.save("dense.obj").unwrap();
//! ```
//!
//! # Step by Step
//!
//! The stages are also available individually on [`DelaunayGraphCut`]:
//!
//! ```no_run
//! use fuse_cut::{DelaunayGraphCut, Hexahedron, MultiViewParams, ReconstructionConfig, SfmData};
//! use nalgebra::Point3;
//!
//! # let mp = MultiViewParams::default();
//! # let sfm = SfmData::default();
//! let config = ReconstructionConfig::default();
//! let region = Hexahedron::from_bounds(Point3::new(-1.0, -1.0, -1.0), Point3::new(1.0, 1.0, 1.0));
//! let cams: Vec<u32> = (0..mp.len() as u32).collect();
//!
//! let mut gc = DelaunayGraphCut::new(mp);
//! gc.create_dense_point_cloud(&region, &cams, Some(&sfm), None, &config.fuse, &config.assembly)
//!     .unwrap();
//! gc.create_graph_cut(&region, &cams, &config).unwrap();
//! gc.save_dh("tetra.bin", "tetra.json").unwrap();
//! let mesh = gc.create_mesh(true).mesh;
//! ```

mod assembly;
mod camera;
mod dump;
mod error;
mod extract;
mod fusion;
mod graph;
mod labeling;
mod pipeline;
mod segments;
mod stats;
mod voting;
mod walk;

pub mod delaunay;
pub mod maxflow;
pub mod observer;
pub mod params;
pub mod tracing_ext;

pub use mvs_mesh::{Hexahedron, Mesh, Vertex, VertexColor};

pub use error::{FuseCutError, FuseCutErrorCode, FuseCutRecoverySuggestion, FuseCutResult};

pub use camera::{
    Camera, DepthMap, DepthMapSource, InMemoryDepthMaps, Landmark, MultiViewParams, SfmData,
};
pub use delaunay::{NO_CELL, NO_VERTEX, Tetrahedralization};
pub use graph::{DelaunayGraphCut, Facet, GcCellInfo, GcVertexInfo, VertexKind};
pub use walk::{RayStep, RayWalk};

pub use dump::{DumpInfo, TriangulationDump, load_dh};
pub use extract::ExtractedMesh;
pub use fusion::{FusionReport, PointCloudReport, fuse_step};
pub use labeling::CutReport;
pub use segments::{NO_SEGMENT, PostProcessReport, Segmentation};
pub use stats::GraphStatistics;
pub use voting::{VotingReport, dist_fcn, weight_fcn};

pub use observer::{
    CallbackObserver, NoOpObserver, ObserverEvent, ReconstructionObserver, RecordingObserver,
    Stage, StageSummary, TracingObserver,
};
pub use params::{
    AssemblyParams, FillGraphVariant, FuseParams, IjcvParams, MeshCleanupParams,
    PostProcessParams, ReconstructionConfig, VotingParams,
};
pub use pipeline::{
    CleanupReport, GraphCutReport, Reconstruction, ReconstructionResult, ReconstructionStats,
};
pub use tracing_ext::{StageTimer, log_graph_state};
