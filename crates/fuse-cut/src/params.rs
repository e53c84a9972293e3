//! Reconstruction parameters.
//!
//! Every bundle implements `Default` with the values the reconstruction is tuned
//! for, `#[serde(default)]` so partial configuration files work, and a
//! `validate()` that rejects out-of-range values before any work starts.
//!
//! # Example
//!
//! ```
//! use fuse_cut::ReconstructionConfig;
//!
//! let json = r#"{ "fuse": { "min_vis": 3 }, "post_process": { "leave_largest_full_segment_only": true } }"#;
//! let config = ReconstructionConfig::from_json(json).unwrap();
//! assert_eq!(config.fuse.min_vis, 3);
//! assert_eq!(config.fuse.min_step, 2);
//! config.validate().unwrap();
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{FuseCutError, FuseCutResult};

/// Depth-map fusion parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FuseParams {
    /// Max input points loaded from all depth maps together.
    pub max_input_points: usize,
    /// Max points kept after fusion.
    pub max_points: usize,
    /// Lower bound of the pixel step used to subsample depth maps.
    pub min_step: usize,
    /// Minimum number of cameras supporting a fused point.
    pub min_vis: u32,
    /// Weight of the similarity term in the fused point score.
    pub sim_factor: f32,
    /// Weight of the triangulation-angle term in the fused point score.
    pub angle_factor: f32,
    /// Merge radius of the first pass, in pixel sizes.
    pub pix_size_margin_init_coef: f64,
    /// Merge radius of the refinement pass, in pixel sizes.
    pub pix_size_margin_final_coef: f64,
    /// Support radius of the refinement pass, in final margins.
    pub vote_margin_factor: f32,
    /// Position-contribution radius of the refinement pass, in final margins.
    pub contribute_margin_factor: f32,
    /// Gaussian falloff of the similarity weight in the first pass.
    pub sim_gaussian_size_init: f32,
    /// Gaussian falloff of the similarity weight in the refinement pass.
    pub sim_gaussian_size: f32,
    /// Minimum triangulation angle (degrees) between two supporting cameras.
    pub min_angle_threshold: f64,
    /// Run the refinement pass.
    pub refine_fuse: bool,
}

impl Default for FuseParams {
    fn default() -> Self {
        Self {
            max_input_points: 50_000_000,
            max_points: 5_000_000,
            min_step: 2,
            min_vis: 2,
            sim_factor: 15.0,
            angle_factor: 15.0,
            pix_size_margin_init_coef: 2.0,
            pix_size_margin_final_coef: 1.0,
            vote_margin_factor: 4.0,
            contribute_margin_factor: 2.0,
            sim_gaussian_size_init: 10.0,
            sim_gaussian_size: 10.0,
            min_angle_threshold: 0.1,
            refine_fuse: true,
        }
    }
}

impl FuseParams {
    pub fn validate(&self) -> FuseCutResult<()> {
        if self.max_input_points == 0 {
            return Err(FuseCutError::invalid_parameter(
                "max_input_points",
                self.max_input_points,
                "must be positive",
            ));
        }
        if self.max_points < 4 {
            return Err(FuseCutError::invalid_parameter(
                "max_points",
                self.max_points,
                "a tetrahedralization needs at least 4 points",
            ));
        }
        if self.min_step == 0 {
            return Err(FuseCutError::invalid_parameter(
                "min_step",
                self.min_step,
                "must be at least 1",
            ));
        }
        positive("pix_size_margin_init_coef", self.pix_size_margin_init_coef)?;
        positive("pix_size_margin_final_coef", self.pix_size_margin_final_coef)?;
        positive("vote_margin_factor", self.vote_margin_factor as f64)?;
        positive("contribute_margin_factor", self.contribute_margin_factor as f64)?;
        positive("sim_gaussian_size_init", self.sim_gaussian_size_init as f64)?;
        positive("sim_gaussian_size", self.sim_gaussian_size as f64)?;
        if !(0.0..90.0).contains(&self.min_angle_threshold) {
            return Err(FuseCutError::invalid_parameter(
                "min_angle_threshold",
                self.min_angle_threshold,
                "must be in [0, 90) degrees",
            ));
        }
        Ok(())
    }
}

/// Weighting scheme of the visibility vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillGraphVariant {
    /// Ray votes only.
    #[default]
    Standard,
    /// Ray votes plus sink weights forced where emptiness drops sharply
    /// behind a point (hidden-surface correction).
    GradientIjcv,
}

/// Parameters of the emptiness-gradient correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IjcvParams {
    /// A behind-point emptiness below `delta * front emptiness` counts as a jump.
    pub force_t_edge_delta: f32,
    /// Length of the in-front window, in pixel sizes.
    pub nsigma_front_silent_part: f32,
    /// Length of the behind window searched for the jump, in pixel sizes.
    pub nsigma_jump_part: f32,
}

impl Default for IjcvParams {
    fn default() -> Self {
        Self {
            force_t_edge_delta: 0.1,
            nsigma_front_silent_part: 2.0,
            nsigma_jump_part: 4.0,
        }
    }
}

/// Visibility voting parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VotingParams {
    /// Use `sigma` for every point instead of its pixel size.
    pub fixes_sigma: bool,
    /// Fixed footprint used when `fixes_sigma` is set.
    pub sigma: f64,
    /// Length of the behind-the-point walk, in pixel sizes.
    pub n_pixel_size_behind: f64,
    /// Constant vote weight instead of the visibility count.
    pub labatut_weights: bool,
    /// Walk toward the camera and deposit empty-space evidence.
    pub fill_out: bool,
    /// Strength of the distance falloff; 0 gives a flat plateau.
    pub dist_fcn_height: f32,
    pub variant: FillGraphVariant,
    pub ijcv: IjcvParams,
    /// Source weight added to every infinite cell.
    pub infinite_cells_source_weight: f32,
    /// Upper bound of the sink weight the emptiness-gradient correction adds to one cell.
    pub full_weight_cap: f32,
    /// Weight of the facet quality term in the cut capacities.
    pub surface_quality_weight: f32,
    /// Scale the quality term by facet size relative to the longest edge.
    pub normalize_by_edge_length: bool,
}

impl Default for VotingParams {
    fn default() -> Self {
        Self {
            fixes_sigma: false,
            sigma: 0.0,
            n_pixel_size_behind: 4.0,
            labatut_weights: false,
            fill_out: true,
            dist_fcn_height: 0.0,
            variant: FillGraphVariant::Standard,
            ijcv: IjcvParams::default(),
            infinite_cells_source_weight: 1.0e6,
            full_weight_cap: 1000.0,
            surface_quality_weight: 0.0,
            normalize_by_edge_length: false,
        }
    }
}

impl VotingParams {
    pub fn validate(&self) -> FuseCutResult<()> {
        if self.fixes_sigma {
            positive("sigma", self.sigma)?;
        }
        non_negative("n_pixel_size_behind", self.n_pixel_size_behind)?;
        if !(0.0..=1.0).contains(&self.dist_fcn_height) {
            return Err(FuseCutError::invalid_parameter(
                "dist_fcn_height",
                self.dist_fcn_height,
                "must be in [0, 1]",
            ));
        }
        non_negative(
            "infinite_cells_source_weight",
            self.infinite_cells_source_weight as f64,
        )?;
        non_negative("surface_quality_weight", self.surface_quality_weight as f64)?;
        if self.variant == FillGraphVariant::GradientIjcv {
            positive("full_weight_cap", self.full_weight_cap as f64)?;
            non_negative("force_t_edge_delta", self.ijcv.force_t_edge_delta as f64)?;
            positive("nsigma_jump_part", self.ijcv.nsigma_jump_part as f64)?;
            positive("nsigma_front_silent_part", self.ijcv.nsigma_front_silent_part as f64)?;
        }
        Ok(())
    }
}

/// Label clean-up passes run after the cut.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessParams {
    /// Flip full segments smaller than `small_label_threshold` to empty.
    pub invert_small_labels: bool,
    pub small_label_threshold: usize,
    /// Give a cell the label of its neighbors when at least 3 of them disagree with it.
    pub invert_isolated_cells: bool,
    /// Fill empty pockets enclosed by full cells.
    pub remove_bubbles: bool,
    /// Remove segments of either label smaller than `min_segment_size`.
    pub remove_dust: bool,
    pub min_segment_size: usize,
    /// Keep a single connected object.
    pub leave_largest_full_segment_only: bool,
}

impl Default for PostProcessParams {
    fn default() -> Self {
        Self {
            invert_small_labels: true,
            small_label_threshold: 2,
            invert_isolated_cells: true,
            remove_bubbles: true,
            remove_dust: true,
            min_segment_size: 10,
            leave_largest_full_segment_only: false,
        }
    }
}

/// Point insertion options besides depth-map fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyParams {
    /// Insert one vertex per camera center.
    pub add_camera_centers: bool,
    /// Insert six points beyond the faces of the region.
    pub add_singularity_points: bool,
    /// Helper lattice resolution per axis; 0 disables it.
    pub helper_grid_dim: usize,
    /// Minimum spacing of inserted helper points, as a fraction of the region diagonal.
    pub helper_min_dist_ratio: f64,
    /// Seed of the helper lattice jitter.
    pub helper_jitter_seed: u64,
    /// Silence vertices in small point-cloud segments before voting.
    pub remove_small_segments: bool,
    pub small_segment_size: u32,
    /// Segment edges must be shorter than `segment_alpha` pixel sizes; 0 keeps every edge.
    pub segment_alpha: f32,
}

impl Default for AssemblyParams {
    fn default() -> Self {
        Self {
            add_camera_centers: true,
            add_singularity_points: true,
            helper_grid_dim: 0,
            helper_min_dist_ratio: 1e-3,
            helper_jitter_seed: 42,
            remove_small_segments: false,
            small_segment_size: 100,
            segment_alpha: 0.0,
        }
    }
}

/// Cleanup applied to the extracted mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshCleanupParams {
    pub smoothing_iterations: usize,
    pub smoothing_lambda: f64,
    /// Drop triangles with an edge longer than this many average edge lengths.
    pub max_edge_ratio: Option<f64>,
    pub keep_largest_component: bool,
}

impl Default for MeshCleanupParams {
    fn default() -> Self {
        Self {
            smoothing_iterations: 0,
            smoothing_lambda: 0.5,
            max_edge_ratio: None,
            keep_largest_component: false,
        }
    }
}

/// All parameters of a reconstruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    pub fuse: FuseParams,
    pub assembly: AssemblyParams,
    pub voting: VotingParams,
    pub post_process: PostProcessParams,
    pub cleanup: MeshCleanupParams,
    /// Drop triangles touching camera-center or helper vertices.
    pub filter_helper_points_triangles: bool,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            fuse: FuseParams::default(),
            assembly: AssemblyParams::default(),
            voting: VotingParams::default(),
            post_process: PostProcessParams::default(),
            cleanup: MeshCleanupParams::default(),
            filter_helper_points_triangles: true,
        }
    }
}

impl ReconstructionConfig {
    /// Lighter settings for previews: fewer points, no refinement pass.
    pub fn fast() -> Self {
        let mut config = Self::default();
        config.fuse.max_input_points = 5_000_000;
        config.fuse.max_points = 500_000;
        config.fuse.refine_fuse = false;
        config
    }

    /// Settings for a single connected object.
    pub fn single_object() -> Self {
        let mut config = Self::default();
        config.post_process.leave_largest_full_segment_only = true;
        config.cleanup.keep_largest_component = true;
        config
    }

    /// Default settings with the emptiness-gradient correction enabled.
    pub fn ijcv() -> Self {
        let mut config = Self::default();
        config.voting.variant = FillGraphVariant::GradientIjcv;
        config
    }

    pub fn validate(&self) -> FuseCutResult<()> {
        self.fuse.validate()?;
        self.voting.validate()?;
        positive("helper_min_dist_ratio", self.assembly.helper_min_dist_ratio)?;
        if let Some(ratio) = self.cleanup.max_edge_ratio {
            positive("max_edge_ratio", ratio)?;
        }
        if !(0.0..=1.0).contains(&self.cleanup.smoothing_lambda) {
            return Err(FuseCutError::invalid_parameter(
                "smoothing_lambda",
                self.cleanup.smoothing_lambda,
                "must be in [0, 1]",
            ));
        }
        Ok(())
    }

    /// Load configuration from a JSON string.
    pub fn from_json(json: &str) -> FuseCutResult<Self> {
        serde_json::from_str(json).map_err(|e| FuseCutError::config_parse(e.to_string()))
    }

    /// Serialize to a pretty JSON string.
    pub fn to_json(&self) -> FuseCutResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| FuseCutError::config_parse(e.to_string()))
    }

    /// Load configuration from a TOML string.
    #[cfg(feature = "config-file")]
    pub fn from_toml(toml_str: &str) -> FuseCutResult<Self> {
        toml::from_str(toml_str).map_err(|e| FuseCutError::config_parse(e.to_string()))
    }

    /// Load configuration from a TOML file.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> FuseCutResult<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| FuseCutError::io_read(path, e))?;
        Self::from_toml(&content)
    }

    /// Serialize to a TOML string.
    #[cfg(feature = "config-file")]
    pub fn to_toml(&self) -> FuseCutResult<String> {
        toml::to_string_pretty(self).map_err(|e| FuseCutError::config_parse(e.to_string()))
    }
}

fn positive(name: &'static str, value: f64) -> FuseCutResult<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(FuseCutError::invalid_parameter(name, value, "must be positive"))
    }
}

fn non_negative(name: &'static str, value: f64) -> FuseCutResult<()> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(FuseCutError::invalid_parameter(name, value, "must not be negative"))
    }
}
