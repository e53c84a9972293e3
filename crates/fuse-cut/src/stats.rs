//! Point-cloud and triangulation statistics.

use std::fmt;

use serde::Serialize;
use tracing::info;

use crate::graph::{DelaunayGraphCut, VertexKind};

/// Counts over the graph-cut state, returned by
/// [`DelaunayGraphCut::display_statistics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphStatistics {
    pub vertices: usize,
    pub observed_vertices: usize,
    pub camera_center_vertices: usize,
    pub helper_vertices: usize,
    pub cells: usize,
    pub infinite_cells: usize,
    pub full_cells: usize,
    pub surface_vertices: usize,
}

impl fmt::Display for GraphStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Vertices: {} ({} observed, {} camera centers, {} helpers)",
            self.vertices, self.observed_vertices, self.camera_center_vertices, self.helper_vertices
        )?;
        writeln!(f, "Cells: {} ({} infinite, {} full)", self.cells, self.infinite_cells, self.full_cells)?;
        write!(f, "Surface vertices: {}", self.surface_vertices)
    }
}

impl DelaunayGraphCut {
    /// Gather and log the vertex and cell counts.
    pub fn display_statistics(&self) -> GraphStatistics {
        let mut stats = GraphStatistics {
            vertices: self.nb_vertices(),
            cells: self.nb_cells(),
            ..GraphStatistics::default()
        };
        for attr in &self.vertices_attr {
            match attr.kind {
                VertexKind::Observed => stats.observed_vertices += 1,
                VertexKind::CameraCenter => stats.camera_center_vertices += 1,
                VertexKind::Helper => stats.helper_vertices += 1,
            }
            if attr.is_on_surface {
                stats.surface_vertices += 1;
            }
        }
        for c in 0..self.nb_cells() as u32 {
            if self.is_infinite_cell(c) {
                stats.infinite_cells += 1;
            }
            if self.cell_is_full[c as usize] {
                stats.full_cells += 1;
            }
        }
        info!("Graph statistics:\n{}", stats);
        stats
    }

    /// For each camera, the observed vertices it sees.
    pub fn create_pts_cams(&self) -> Vec<Vec<u32>> {
        let mut pts_cams = vec![Vec::new(); self.mp.len()];
        for (vi, attr) in self.vertices_attr.iter().enumerate() {
            if attr.kind != VertexKind::Observed {
                continue;
            }
            for &cam in &attr.cams {
                if let Some(list) = pts_cams.get_mut(cam as usize) {
                    list.push(vi as u32);
                }
            }
        }
        pts_cams
    }

    /// Histogram of observed vertices by number of observing cameras.
    pub fn pts_cams_hist(&self) -> Vec<usize> {
        histogram(self.observed().map(|a| a.cams.len()))
    }

    /// Histogram of observed vertices by supporting-camera count.
    pub fn pts_nrc_hist(&self) -> Vec<usize> {
        histogram(self.observed().map(|a| a.nrc as usize))
    }

    /// Whether each camera observes at least one vertex.
    pub fn is_used_per_camera(&self) -> Vec<bool> {
        let mut used = vec![false; self.mp.len()];
        for attr in self.observed() {
            for &cam in &attr.cams {
                if let Some(u) = used.get_mut(cam as usize) {
                    *u = true;
                }
            }
        }
        used
    }

    /// Ids of the cameras observing at least one vertex, ascending.
    pub fn sorted_used_cams(&self) -> Vec<u32> {
        self.is_used_per_camera()
            .iter()
            .enumerate()
            .filter(|&(_, &used)| used)
            .map(|(cam, _)| cam as u32)
            .collect()
    }

    fn observed(&self) -> impl Iterator<Item = &crate::graph::GcVertexInfo> + '_ {
        self.vertices_attr
            .iter()
            .filter(|a| a.kind == VertexKind::Observed)
    }
}

/// Counts per value, sized to the largest value plus one.
fn histogram(values: impl Iterator<Item = usize>) -> Vec<usize> {
    let mut hist = Vec::new();
    for v in values {
        if v >= hist.len() {
            hist.resize(v + 1, 0);
        }
        hist[v] += 1;
    }
    hist
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Camera, MultiViewParams};
    use crate::graph::GcVertexInfo;
    use nalgebra::{Point3, Vector3};

    fn graph_with_cameras() -> DelaunayGraphCut {
        let cams = (0..4)
            .map(|i| {
                let c = Point3::new(5.0, i as f64, 0.0);
                Camera::look_at(c, Point3::origin(), Vector3::z(), 100.0, 32, 32)
            })
            .collect();
        let mut gc = DelaunayGraphCut::new(MultiViewParams::new(cams));
        let points = [
            (Point3::new(0.0, 0.0, 0.0), vec![0, 1]),
            (Point3::new(1.0, 0.0, 0.0), vec![0]),
            (Point3::new(0.0, 1.0, 0.0), vec![0, 1, 3]),
            (Point3::new(0.0, 0.0, 1.0), vec![1]),
        ];
        for (p, cams) in points {
            gc.push_vertex(p, GcVertexInfo::observed(0.01, cams));
        }
        gc.push_vertex(Point3::new(0.3, 0.3, 0.3), GcVertexInfo::helper());
        gc.compute_delaunay().unwrap();
        gc
    }

    #[test]
    fn test_statistics_counts() {
        let mut gc = graph_with_cameras();
        let c = gc.neighboring_cells_by_vertex_index(4)[0];
        gc.set_cell_full(c, true);
        gc.set_is_on_surface();
        let stats = gc.display_statistics();
        assert_eq!(stats.vertices, 5);
        assert_eq!(stats.observed_vertices, 4);
        assert_eq!(stats.helper_vertices, 1);
        assert_eq!(stats.full_cells, 1);
        assert_eq!(stats.surface_vertices, 4);
        assert_eq!(stats.cells - stats.infinite_cells, 4);
        assert!(stats.to_string().contains("1 full"));
    }

    #[test]
    fn test_points_per_camera() {
        let gc = graph_with_cameras();
        let pts_cams = gc.create_pts_cams();
        assert_eq!(pts_cams, vec![vec![0, 1, 2], vec![0, 2, 3], vec![], vec![2]]);
        assert_eq!(gc.pts_cams_hist(), vec![0, 2, 1, 1]);
        assert_eq!(gc.pts_nrc_hist(), vec![0, 2, 1, 1]);
        assert_eq!(gc.is_used_per_camera(), vec![true, true, false, true]);
        assert_eq!(gc.sorted_used_cams(), vec![0, 1, 3]);
    }
}
