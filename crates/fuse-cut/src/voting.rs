//! Visibility voting: turns observations into graph weights.
//!
//! Every (vertex, camera) observation is walked through the tetrahedralization
//! twice. Toward the camera, each crossed cell is evidence of empty space and
//! each crossed facet gets a visibility weight that penalizes cutting it. Away
//! from the camera, the first cells behind the point are evidence of matter and
//! get sink weight.
//!
//! Rays are walked in parallel over blocks of vertices. Each walk records its
//! deposits in a private buffer; buffers are applied in vertex order, so the
//! resulting weights do not depend on thread scheduling.

use nalgebra::Unit;
use rayon::prelude::*;
use tracing::debug;

use crate::delaunay::NO_CELL;
use crate::graph::{DelaunayGraphCut, Facet, VertexKind};
use crate::observer::{Stage, StageSummary};
use crate::params::{FillGraphVariant, VotingParams};

/// Source weight given to the cell holding a camera center.
const CAMERA_CELL_SOURCE_WEIGHT: f32 = 1.0e6;

/// Vertices walked per parallel block.
const VOTE_BLOCK_SIZE: usize = 1 << 16;

/// Counts produced by [`DelaunayGraphCut::vote_full_empty_score`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VotingReport {
    /// Observations that deposited evidence.
    pub observations: usize,
    /// Observations dropped: unknown camera, point on the camera, or a ray
    /// leaving the triangulation immediately.
    pub skipped_observations: usize,
    /// Cells crossed by all front walks.
    pub cells_crossed: usize,
    /// Cells whose sink weight was raised by the emptiness-gradient correction.
    pub forced_t_edges: usize,
}

#[derive(Debug, Clone, Copy)]
enum Deposit {
    Emptiness(f32),
    Fullness(f32),
    Source(f32),
    Sink(f32),
    On(f32),
    Vis(usize, f32),
}

#[derive(Debug, Default)]
struct VertexVotes {
    deposits: Vec<(u32, Deposit)>,
    surface: f32,
    observations: usize,
    skipped: usize,
    cells_crossed: usize,
}

/// Observation weight: constant under Labatut weighting, otherwise the number
/// of supporting cameras.
#[inline]
pub fn weight_fcn(nrc: u32, labatut_weights: bool) -> f32 {
    if labatut_weights { 32.0 } else { nrc as f32 }
}

/// Attenuation of a vote at `dist` from the point: `1 - height * exp(-dist^2 / (2 * max_dist))`.
///
/// `height = 0` gives a flat plateau; `height = 1` silences votes at the point.
#[inline]
pub fn dist_fcn(max_dist: f64, dist: f64, height: f32) -> f32 {
    if max_dist <= 0.0 {
        return 1.0;
    }
    (1.0 - height as f64 * (-(dist * dist) / (2.0 * max_dist)).exp()) as f32
}

impl DelaunayGraphCut {
    /// Run the voting stage for the observations of `cams`.
    ///
    /// Cell weights are reset first, so re-voting replaces earlier results.
    pub fn vote_full_empty_score(&mut self, cams: &[u32], params: &VotingParams) -> VotingReport {
        let timer = self.begin_stage(Stage::Voting);
        self.init_cells();
        for attr in &mut self.vertices_attr {
            attr.surface_votes = 0.0;
        }

        let mut report = self.fill_graph(cams, params);
        if params.variant == FillGraphVariant::GradientIjcv {
            report.forced_t_edges = self.force_tedges_by_gradient_ijcv(cams, params);
        }
        self.add_to_infinite_sw(params.infinite_cells_source_weight);

        if report.skipped_observations > 0 {
            self.observer.warning(
                Stage::Voting,
                &format!(
                    "{} of {} observations skipped",
                    report.skipped_observations,
                    report.skipped_observations + report.observations
                ),
            );
        }
        let summary = StageSummary::new()
            .with("observations", report.observations)
            .with("skipped_observations", report.skipped_observations)
            .with("cells_crossed", report.cells_crossed)
            .with("forced_t_edges", report.forced_t_edges);
        self.end_stage(Stage::Voting, timer, summary);
        report
    }

    /// Walk every observation of `cams` and accumulate cell and facet weights.
    pub fn fill_graph(&mut self, cams: &[u32], params: &VotingParams) -> VotingReport {
        let selected = self.camera_mask(cams);
        let mut report = VotingReport::default();
        let n = self.nb_vertices();

        for start in (0..n).step_by(VOTE_BLOCK_SIZE) {
            let end = (start + VOTE_BLOCK_SIZE).min(n);
            let votes: Vec<VertexVotes> = (start..end)
                .into_par_iter()
                .map(|vi| self.vertex_votes(vi as u32, &selected, params))
                .collect();
            for (offset, v) in votes.into_iter().enumerate() {
                self.vertices_attr[start + offset].surface_votes += v.surface;
                report.observations += v.observations;
                report.skipped_observations += v.skipped;
                report.cells_crossed += v.cells_crossed;
                self.apply_deposits(&v.deposits);
            }
        }
        debug!(
            "Voting: {} observations, {} skipped, {} cells crossed",
            report.observations, report.skipped_observations, report.cells_crossed
        );
        report
    }

    pub(crate) fn camera_mask(&self, cams: &[u32]) -> Vec<bool> {
        let mut mask = vec![false; self.mp.len()];
        for &c in cams {
            if let Some(m) = mask.get_mut(c as usize) {
                *m = true;
            }
        }
        mask
    }

    fn vertex_votes(&self, vi: u32, selected: &[bool], params: &VotingParams) -> VertexVotes {
        let mut votes = VertexVotes::default();
        let attr = &self.vertices_attr[vi as usize];
        if attr.kind != VertexKind::Observed || self.neighbour_cells[vi as usize].is_empty() {
            return votes;
        }
        let weight = weight_fcn(attr.nrc, params.labatut_weights);
        for &cam in &attr.cams {
            if !selected.get(cam as usize).copied().unwrap_or(false) {
                continue;
            }
            if self.fill_graph_part_pt_rc(vi, cam, weight, params, &mut votes) {
                votes.observations += 1;
                votes.surface += weight;
            } else {
                votes.skipped += 1;
            }
        }
        votes
    }

    /// Deposit the evidence of one observation. Returns `false` when it is skipped.
    fn fill_graph_part_pt_rc(
        &self,
        vi: u32,
        cam: u32,
        weight: f32,
        params: &VotingParams,
        votes: &mut VertexVotes,
    ) -> bool {
        let Some(camera) = self.mp.cameras.get(cam as usize) else {
            return false;
        };
        let p = self.point(vi);
        let to_cam = camera.center - p;
        let cam_dist = to_cam.norm();
        let Some(dir) = Unit::try_new(to_cam, 0.0) else {
            return false;
        };
        let max_dist = params.n_pixel_size_behind * self.footprint(vi, params);
        let cam_vertex = self.camera_vertex(cam);

        if params.fill_out {
            let mut crossed = 0;
            for step in self.walk_from_vertex(vi, dir) {
                crossed += 1;
                votes.deposits.push((step.cell, Deposit::Emptiness(weight)));
                if let Some(m) = self.mirror_facet(step.exit) {
                    let w = weight * dist_fcn(max_dist, step.exit_dist, params.dist_fcn_height);
                    votes.deposits.push((m.cell, Deposit::Vis(m.local, w)));
                }
                let at_camera = cam_vertex.is_some_and(|cv| self.tet.cell(step.cell).contains(&cv));
                if at_camera || step.exit_dist >= cam_dist {
                    votes.deposits.push((step.cell, Deposit::Source(CAMERA_CELL_SOURCE_WEIGHT)));
                    break;
                }
            }
            if crossed == 0 {
                return false;
            }
            votes.cells_crossed += crossed;
        }

        if max_dist > 0.0 {
            let mut first = true;
            for step in self.walk_from_vertex(vi, -dir) {
                if step.entry_dist > max_dist {
                    break;
                }
                let w = weight * dist_fcn(max_dist, step.entry_dist, params.dist_fcn_height);
                votes.deposits.push((step.cell, Deposit::Fullness(weight)));
                votes.deposits.push((step.cell, Deposit::Sink(w)));
                if first {
                    votes.deposits.push((step.cell, Deposit::On(weight)));
                    first = false;
                }
            }
        }
        true
    }

    /// Footprint used to scale walk lengths around a vertex.
    fn footprint(&self, vi: u32, params: &VotingParams) -> f64 {
        if params.fixes_sigma {
            params.sigma
        } else {
            self.vertices_attr[vi as usize].pix_size as f64
        }
    }

    fn apply_deposits(&mut self, deposits: &[(u32, Deposit)]) {
        for &(cell, deposit) in deposits {
            let c = &mut self.cells_attr[cell as usize];
            match deposit {
                Deposit::Emptiness(w) => c.emptiness_score += w,
                Deposit::Fullness(w) => c.fullness_score += w,
                Deposit::Source(w) => c.source_weight += w,
                Deposit::Sink(w) => c.sink_weight += w,
                Deposit::On(w) => c.on += w,
                Deposit::Vis(k, w) => c.vis_weight[k] += w,
            }
        }
    }

    /// Hidden-surface correction: where the emptiness seen just behind a point
    /// drops below `force_t_edge_delta` times the emptiness in front of it, the
    /// cell behind gets surface evidence, and capped evidence becomes sink weight.
    ///
    /// Reads the emptiness written by [`Self::fill_graph`]. Returns the number of
    /// cells whose sink weight was raised.
    pub fn force_tedges_by_gradient_ijcv(&mut self, cams: &[u32], params: &VotingParams) -> usize {
        let selected = self.camera_mask(cams);
        let ijcv = &params.ijcv;
        let n = self.nb_vertices();

        let forced: Vec<(u32, f32)> = (0..n as u32)
            .into_par_iter()
            .flat_map_iter(|vi| {
                let mut out = Vec::new();
                let attr = &self.vertices_attr[vi as usize];
                if attr.kind != VertexKind::Observed || self.neighbour_cells[vi as usize].is_empty() {
                    return out;
                }
                let weight = weight_fcn(attr.nrc, params.labatut_weights);
                let pix = self.footprint(vi, params);
                let front_len = ijcv.nsigma_front_silent_part as f64 * pix;
                let jump_len = ijcv.nsigma_jump_part as f64 * pix;

                for &cam in &attr.cams {
                    if !selected.get(cam as usize).copied().unwrap_or(false) {
                        continue;
                    }
                    let Some(camera) = self.mp.cameras.get(cam as usize) else {
                        continue;
                    };
                    let Some(dir) = Unit::try_new(camera.center - self.point(vi), 0.0) else {
                        continue;
                    };

                    let e_front = self
                        .walk_from_vertex(vi, dir)
                        .take_while(|s| s.entry_dist < front_len)
                        .map(|s| self.cells_attr[s.cell as usize].emptiness_score)
                        .fold(0.0f32, f32::max);
                    let behind = self
                        .walk_from_vertex(vi, -dir)
                        .take_while(|s| s.entry_dist < jump_len)
                        .map(|s| (s.cell, self.cells_attr[s.cell as usize].emptiness_score))
                        .min_by(|a, b| a.1.total_cmp(&b.1));

                    if let Some((cell, e_behind)) = behind {
                        if e_front > 0.0 && e_behind < ijcv.force_t_edge_delta * e_front {
                            out.push((cell, weight));
                        }
                    }
                }
                out
            })
            .collect();

        let mut extra = vec![0.0f32; self.nb_cells()];
        for (cell, w) in forced {
            extra[cell as usize] += w;
        }
        let mut count = 0;
        for (c, on) in self.cells_attr.iter_mut().zip(extra) {
            if on > 0.0 {
                c.on += on;
                c.sink_weight += on.min(params.full_weight_cap);
                count += 1;
            }
        }
        debug!("Emptiness-gradient correction raised {} sink weights", count);
        count
    }

    /// Add `w` to the source weight of every infinite cell.
    pub fn add_to_infinite_sw(&mut self, w: f32) {
        for ci in 0..self.nb_cells() as u32 {
            if self.is_infinite_cell(ci) {
                self.cells_attr[ci as usize].source_weight += w;
            }
        }
    }

    /// Capacity of the graph edge from `f.cell` to the cell across `f`:
    /// visibility weight plus the weighted facet quality term.
    pub fn facet_capacity(&self, f: Facet, params: &VotingParams, max_edge_length: f64) -> f64 {
        let vis = self.cells_attr[f.cell as usize].vis_weight[f.local] as f64;
        if params.surface_quality_weight <= 0.0 || self.adjacent(f.cell, f.local) == NO_CELL {
            return vis;
        }
        let mut quality = params.surface_quality_weight as f64 * self.face_weight(f) as f64;
        if params.normalize_by_edge_length && max_edge_length > 0.0 {
            quality *= self.facet_max_edge_length(f) / max_edge_length;
        }
        vis + quality
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_fcn() {
        assert_eq!(weight_fcn(3, false), 3.0);
        assert_eq!(weight_fcn(3, true), 32.0);
        assert_eq!(weight_fcn(0, false), 0.0);
    }

    #[test]
    fn test_dist_fcn() {
        assert_eq!(dist_fcn(1.0, 0.5, 0.0), 1.0);
        assert!((dist_fcn(1.0, 0.0, 1.0)).abs() < 1e-6);
        let near = dist_fcn(1.0, 0.1, 0.5);
        let far = dist_fcn(1.0, 2.0, 0.5);
        assert!(near < far);
        assert!(far <= 1.0);
        assert_eq!(dist_fcn(0.0, 1.0, 0.7), 1.0);
    }
}
