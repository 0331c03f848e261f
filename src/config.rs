//! Pipeline Configuration
//!
//! [`TexturingOptions`] collects every tunable the pipeline recognizes,
//! with implementation-chosen defaults. Options are validated once at
//! pipeline startup; contradictory combinations are fatal
//! ([`RegolithError::Config`]).

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::errors::{RegolithError, Result};

/// Candidate enumeration policy for backproject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObsSelectionStrategy {
    /// Score every candidate observation, take the argmax.
    Exhaustive,
    /// Coarse spatial grid; the first candidate scoring above the
    /// quality-scaled threshold wins.
    Spatial,
}

/// Color tie-break policy for backproject scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreferColor {
    /// Score only; band count is ignored.
    Never,
    /// A color candidate always outranks a mono candidate in its category.
    Always,
    /// Prefer color only when scores are equivalent.
    EquivalentScores,
}

/// Per-image contrast stretch mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StretchMode {
    /// No stretch; the `stretched` derived product is left unset.
    None,
    /// Clip at mean ± k·σ of valid luminance, rescale to [0,1].
    StandardDeviation(f32),
    /// Clip the given percent of mass from each histogram tail.
    HistogramPercent(f32),
}

/// Boundary handling for the gradient-domain solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeBehavior {
    /// Missing neighbors drop out of the equation (zero-flux).
    Neumann,
    /// Missing neighbors are pinned to the initial value.
    Dirichlet,
}

/// Every tunable recognized by the texturing pipeline.
///
/// Names and semantics are fixed; defaults are implementation-chosen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TexturingOptions {
    // ========================================================================
    // Backproject
    // ========================================================================
    /// Strategy-specific quality/compute tradeoff, in [0,1].
    pub backproject_quality: f64,
    /// Reject candidates with grazing incidence; 90 disables the test.
    pub max_glancing_angle_degrees: f64,
    /// Minimum self-intersection distance for occlusion rays, meters.
    pub raycast_tolerance: f64,
    /// Candidate enumeration policy.
    pub obs_selection_strategy: ObsSelectionStrategy,
    /// Color tie-break policy.
    pub prefer_color: PreferColor,
    /// Among equal candidates, a non-linear product beats its linear variant.
    pub prefer_nonlinear: bool,
    /// Inpaint unmapped texels after backproject; 0 disables, < 0 unlimited.
    pub backproject_inpaint_missing: i32,
    /// Inpaint UV-island fringe texels after backproject; 0 disables.
    pub backproject_inpaint_gutter: i32,
    /// Output atlas resolution (atlas is square).
    pub atlas_resolution: u32,
    /// Disable the orbital fallback candidate entirely.
    pub no_orbital: bool,
    /// Up direction in the mesh frame, used to orient surface normals.
    pub sky_direction: DVec3,

    // ========================================================================
    // Observation preparation
    // ========================================================================
    /// Gaussian blur radius for source images, pixels.
    pub observation_blur_radius: f32,
    /// Contrast stretch applied to masked source images.
    pub stretch_mode: StretchMode,
    /// Mission policy: synthesize a mask when no rover mask is available.
    pub allow_synthesized_masks: bool,
    /// Fix the scene median hue instead of aggregating per-image stats,
    /// degrees in [0,360].
    pub override_median_hue: Option<f32>,

    // ========================================================================
    // Stitch (LimberDMG)
    // ========================================================================
    /// Value-fidelity weight λ of the gradient-domain energy.
    pub blend_lambda: f32,
    /// Stop when the residual ∞-norm drops below this.
    pub residual_epsilon: f32,
    /// Gauss–Seidel red-black sweeps per multigrid level.
    pub num_relaxation_steps: u32,
    /// Maximum V-cycles.
    pub num_multigrid_iterations: u32,
    /// Boundary handling.
    pub edge_behavior: EdgeBehavior,

    // ========================================================================
    // Diff propagation
    // ========================================================================
    /// Pull each observation's luminance toward the scene median with this
    /// weight in [0,1]; 0 disables.
    pub preadjust_luminance: f32,
    /// Map mono observations to the scene median hue.
    pub colorize: bool,
    /// Barycentrically interpolate the sparse diff across small triangles.
    pub barycentric_interpolate_winners: bool,
    /// Triangles with any source-space side longer than this are skipped.
    pub barycentric_max_triangle_side_length_pixels: f64,
    /// Inpaint the sparse diff up to this many pixels; 0 disables.
    pub inpaint_diff: i32,
    /// Gaussian-blur the diff with this radius; 0 disables.
    pub blur_diff: f32,
    /// Leave invalid-diff pixels at the source value instead of applying
    /// the average diff.
    pub no_fill_blend_with_average_diff: bool,

    // ========================================================================
    // Leaf re-render & scheduling
    // ========================================================================
    /// Serialize leaf re-rendering.
    pub no_blend_leaves_in_parallel: bool,
    /// Keep a `<leaf>_unblended` backup before the first overwrite.
    pub debug_keep_unblended: bool,
    /// Bypass the LRU image cache.
    pub disable_image_cache: bool,
    /// Cap worker threads; 0 means the number of physical cores.
    pub max_threads: usize,

    // ========================================================================
    // Geometry
    // ========================================================================
    /// Frustum hull truncation distance, meters.
    pub texture_far_clip: f64,
    /// Use prior transforms instead of adjusted ones.
    pub use_priors: bool,
    /// Restrict to observations whose frames have adjusted transforms.
    pub only_aligned: bool,
}

impl Default for TexturingOptions {
    fn default() -> Self {
        Self {
            backproject_quality: 0.05,
            max_glancing_angle_degrees: 75.0,
            raycast_tolerance: 1e-3,
            obs_selection_strategy: ObsSelectionStrategy::Exhaustive,
            prefer_color: PreferColor::EquivalentScores,
            prefer_nonlinear: true,
            backproject_inpaint_missing: 4,
            backproject_inpaint_gutter: 2,
            atlas_resolution: 2048,
            no_orbital: false,
            sky_direction: DVec3::Z,

            observation_blur_radius: 3.0,
            stretch_mode: StretchMode::StandardDeviation(2.5),
            allow_synthesized_masks: true,
            override_median_hue: None,

            blend_lambda: 0.1,
            residual_epsilon: 1e-4,
            num_relaxation_steps: 2,
            num_multigrid_iterations: 10,
            edge_behavior: EdgeBehavior::Neumann,

            preadjust_luminance: 0.0,
            colorize: false,
            barycentric_interpolate_winners: true,
            barycentric_max_triangle_side_length_pixels: 32.0,
            inpaint_diff: 2,
            blur_diff: 2.0,
            no_fill_blend_with_average_diff: false,

            no_blend_leaves_in_parallel: false,
            debug_keep_unblended: false,
            disable_image_cache: false,
            max_threads: 0,

            texture_far_clip: 64.0,
            use_priors: false,
            only_aligned: false,
        }
    }
}

impl TexturingOptions {
    /// Validate option ranges and reject contradictory combinations.
    ///
    /// Called once at pipeline startup; any error here is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.use_priors && self.only_aligned {
            return Err(RegolithError::Config(
                "UsePriors and OnlyAligned are mutually exclusive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.backproject_quality) {
            return Err(RegolithError::Config(format!(
                "BackprojectQuality must be in [0,1], got {}",
                self.backproject_quality
            )));
        }
        if !(0.0..=90.0).contains(&self.max_glancing_angle_degrees) {
            return Err(RegolithError::Config(format!(
                "MaxGlancingAngleDegrees must be in [0,90], got {}",
                self.max_glancing_angle_degrees
            )));
        }
        if let Some(hue) = self.override_median_hue
            && !(0.0..=360.0).contains(&hue)
        {
            return Err(RegolithError::Config(format!(
                "OverrideMedianHue must be in [0,360], got {hue}"
            )));
        }
        if self.atlas_resolution == 0 {
            return Err(RegolithError::Config("atlas resolution must be nonzero".into()));
        }
        if self.texture_far_clip <= 0.0 {
            return Err(RegolithError::Config(format!(
                "TextureFarClip must be positive, got {}",
                self.texture_far_clip
            )));
        }
        if self.sky_direction.length_squared() < 1e-12 {
            return Err(RegolithError::Config("sky direction must be nonzero".into()));
        }
        if !(0.0..=1.0).contains(&self.preadjust_luminance) {
            return Err(RegolithError::Config(format!(
                "preadjustLuminance must be in [0,1], got {}",
                self.preadjust_luminance
            )));
        }
        if let StretchMode::HistogramPercent(p) = self.stretch_mode
            && !(0.0..50.0).contains(&p)
        {
            return Err(RegolithError::Config(format!(
                "HistogramPercent must be in [0,50), got {p}"
            )));
        }
        Ok(())
    }

    /// Whether the glancing-angle rejection is active.
    #[must_use]
    pub fn glancing_angle_enabled(&self) -> bool {
        self.max_glancing_angle_degrees < 90.0
    }
}
