//! Stitch (LimberDMG)
//!
//! Gradient-domain blending of the backproject-colored atlas into a
//! seamless image. Per channel (in CIE-LAB) the solver minimizes
//!
//! ```text
//! Σ_pixels ‖∇u − ∇f‖²  +  λ · Σ_value_pixels (u − f)²
//! ```
//!
//! where `f` is the initial piecewise-observation image and
//! `λ = BlendLambda`. Per-pixel, per-channel flags control participation:
//!
//! - `NoData` — contributes neither value nor gradient constraints.
//! - `GradientOnly` — gradient constraints only (orbital seeding, so
//!   surface content wins wherever present).
//! - `None` — value and gradient constraints.

pub mod multigrid;

use glam::Vec3;

use crate::config::TexturingOptions;
use crate::errors::{RegolithError, Result};
use crate::observation::MIN_INDEX;
use crate::backproject::index::IndexImage;
use crate::pipeline::pool::WorkPool;
use crate::raster::{Raster, color};
use multigrid::MultigridSolver;

/// Per-channel participation flag, two bits each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelFlag {
    /// Value + gradient constraints.
    None = 0,
    /// Excluded from the solve.
    NoData = 1,
    /// Gradient constraints only.
    GradientOnly = 2,
}

impl ChannelFlag {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            1 => Self::NoData,
            2 => Self::GradientOnly,
            _ => Self::None,
        }
    }
}

/// Three channel flags per pixel, packed two bits per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl FlagImage {
    /// All channels `NoData`.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        let nodata =
            ChannelFlag::NoData as u8 | (ChannelFlag::NoData as u8) << 2 | (ChannelFlag::NoData as u8) << 4;
        Self {
            width,
            height,
            data: vec![nodata; (width * height) as usize],
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    #[must_use]
    pub fn get(&self, row: u32, col: u32, channel: u32) -> ChannelFlag {
        let byte = self.data[(row * self.width + col) as usize];
        ChannelFlag::from_bits(byte >> (2 * channel))
    }

    #[inline]
    pub fn set(&mut self, row: u32, col: u32, channel: u32, flag: ChannelFlag) {
        let i = (row * self.width + col) as usize;
        let shift = 2 * channel;
        self.data[i] = (self.data[i] & !(0b11 << shift)) | ((flag as u8) << shift);
    }

    /// Set all three channels of a pixel.
    #[inline]
    pub fn set_pixel(&mut self, row: u32, col: u32, flag: ChannelFlag) {
        let bits = flag as u8;
        self.data[(row * self.width + col) as usize] = bits | bits << 2 | bits << 4;
    }
}

/// Derive the stitch flags from a backproject index: surface winners
/// contribute value + gradient, orbital texels seed gradients only, and
/// sentinel texels are excluded.
#[must_use]
pub fn flags_from_index(index: &IndexImage) -> FlagImage {
    let mut flags = FlagImage::new(index.width(), index.height());
    for row in 0..index.height() {
        for col in 0..index.width() {
            if let Some(source) = index.get(row, col) {
                let flag = if source.obs_id >= MIN_INDEX {
                    ChannelFlag::None
                } else {
                    ChannelFlag::GradientOnly
                };
                flags.set_pixel(row, col, flag);
            }
        }
    }
    flags
}

/// Per-texel owner ids for the solver's gradient targets: the target
/// gradient between texels drawn from different observations is zero.
#[must_use]
pub fn owners_from_index(index: &IndexImage) -> Vec<i32> {
    let mut owners = vec![crate::observation::NO_OBSERVATION; (index.width() * index.height()) as usize];
    for row in 0..index.height() {
        for col in 0..index.width() {
            if let Some(source) = index.get(row, col) {
                owners[(row * index.width() + col) as usize] = source.obs_id;
            }
        }
    }
    owners
}

/// Solve the gradient-domain system and return the seamless atlas.
///
/// `owners` marks which observation each texel was drawn from (see
/// [`owners_from_index`]); seam gradients between owners are solved to
/// zero while intra-observation gradients are preserved.
///
/// Non-convergence within `NumMultigridIterations` V-cycles is logged and
/// the best iterate returned. Pixels with all channels `NoData` stay
/// masked invalid in the output.
pub fn stitch(
    pool: &WorkPool,
    options: &TexturingOptions,
    initial: &Raster,
    flags: &FlagImage,
    owners: &[i32],
) -> Result<Raster> {
    let (w, h) = (initial.width(), initial.height());
    if flags.width() != w || flags.height() != h {
        return Err(RegolithError::Raster(format!(
            "flag image {}x{} does not match atlas {w}x{h}",
            flags.width(),
            flags.height()
        )));
    }
    let n = (w * h) as usize;
    if owners.len() != n {
        return Err(RegolithError::Raster(format!(
            "owner map length {} does not match atlas {w}x{h}",
            owners.len()
        )));
    }

    // RGB → LAB over participating pixels.
    let mut lab = vec![Vec3::ZERO; n];
    for row in 0..h {
        for col in 0..w {
            let i = (row * w + col) as usize;
            if (0..3).any(|ch| flags.get(row, col, ch) != ChannelFlag::NoData) {
                lab[i] = color::rgb_to_lab(initial.rgb(row, col));
            }
        }
    }

    let mut solved = lab.clone();
    for channel in 0..3u32 {
        let mut valid = vec![false; n];
        let mut has_value = vec![false; n];
        let mut f = vec![0.0f32; n];
        let mut any = false;
        for row in 0..h {
            for col in 0..w {
                let i = (row * w + col) as usize;
                let flag = flags.get(row, col, channel);
                if flag != ChannelFlag::NoData {
                    valid[i] = true;
                    has_value[i] = flag == ChannelFlag::None;
                    f[i] = lab[i][channel as usize];
                    any = true;
                }
            }
        }
        if !any {
            continue;
        }
        let solver = MultigridSolver::new(
            w,
            h,
            valid,
            has_value,
            options.blend_lambda,
            options.edge_behavior,
            options.num_relaxation_steps,
        );
        let outcome = pool.install(|| {
            solver.solve(
                &f,
                owners,
                options.num_multigrid_iterations,
                options.residual_epsilon,
            )
        });
        if !outcome.converged {
            log::warn!(
                "stitch channel {channel}: residual {} after {} cycles (epsilon {})",
                outcome.residual,
                outcome.cycles,
                options.residual_epsilon
            );
        }
        for (dst, src) in solved.iter_mut().zip(outcome.solution.iter()) {
            dst[channel as usize] = *src;
        }
    }

    // LAB → RGB; untouched pixels stay invalid.
    let mut out = Raster::new(w, h, 3)?;
    out.invalidate_all();
    for row in 0..h {
        for col in 0..w {
            let i = (row * w + col) as usize;
            if (0..3).any(|ch| flags.get(row, col, ch) != ChannelFlag::NoData) {
                out.set_rgb(row, col, color::lab_to_rgb(solved[i]));
                out.set_valid(row, col, true);
            }
        }
    }
    Ok(out)
}
