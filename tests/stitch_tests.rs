//! Stitch (LimberDMG) Tests
//!
//! Tests for:
//! - S2: two-observation seam reduction under the documented solver knobs
//! - Flag semantics: NoData exclusion and GradientOnly orbital seeding
//! - Solver convergence reporting

use regolith::backproject::IndexImage;
use regolith::backproject::index::TexelSource;
use regolith::pipeline::pool::WorkPool;
use regolith::stitch::{self, ChannelFlag, FlagImage};
use regolith::{ORBITAL_IMAGE_INDEX, Raster, TexturingOptions};

use glam::Vec3;

/// A split atlas: left half from obs 1000 at `left`, right half from obs
/// 1001 at `right`, every texel mapped to a distinct source pixel.
fn split_scene(n: u32, left: f32, right: f32) -> (Raster, IndexImage) {
    let mut atlas = Raster::new(n, n, 3).unwrap();
    let mut index = IndexImage::new(n, n);
    for row in 0..n {
        for col in 0..n {
            let (obs, value) = if col < n / 2 {
                (1000, left)
            } else {
                (1001, right)
            };
            atlas.set_rgb(row, col, Vec3::splat(value));
            index.set(row, col, TexelSource { obs_id: obs, row, col });
        }
    }
    (atlas, index)
}

fn solver_options() -> TexturingOptions {
    TexturingOptions {
        blend_lambda: 0.1,
        num_multigrid_iterations: 10,
        residual_epsilon: 1e-4,
        max_threads: 2,
        ..Default::default()
    }
}

/// Max luminance jump across the column seam.
fn seam_step(image: &Raster, seam_col: u32) -> f32 {
    let mut worst = 0.0f32;
    for row in 0..image.height() {
        let jump = (image.luminance(row, seam_col) - image.luminance(row, seam_col - 1)).abs();
        worst = worst.max(jump);
    }
    worst
}

// ============================================================================
// S2: two-observation seam
// ============================================================================

#[test]
fn s2_seam_is_flattened() {
    let n = 64;
    let (atlas, index) = split_scene(n, 0.3, 0.6);
    let flags = stitch::flags_from_index(&index);
    let owners = stitch::owners_from_index(&index);
    let pool = WorkPool::new(2).unwrap();

    let before = seam_step(&atlas, n / 2);
    let stitched = stitch::stitch(&pool, &solver_options(), &atlas, &flags, &owners).unwrap();
    let after = seam_step(&stitched, n / 2);

    assert!(before > 0.29, "setup: seam step was {before}");
    assert!(
        after < 0.25 * before,
        "seam step {before} only reduced to {after}"
    );
    // Pixels far from the seam keep their observation's value.
    assert!((stitched.luminance(10, 2) - 0.3).abs() < 0.1);
    assert!((stitched.luminance(10, n - 3) - 0.6).abs() < 0.1);
}

#[test]
fn stitch_preserves_intra_observation_content() {
    // One owner with a hard internal edge: content, not a seam.
    let n = 32;
    let mut atlas = Raster::new(n, n, 3).unwrap();
    let mut index = IndexImage::new(n, n);
    for row in 0..n {
        for col in 0..n {
            let value = if col < n / 2 { 0.2 } else { 0.8 };
            atlas.set_rgb(row, col, Vec3::splat(value));
            index.set(row, col, TexelSource { obs_id: 1000, row, col });
        }
    }
    let pool = WorkPool::new(2).unwrap();
    let stitched = stitch::stitch(
        &pool,
        &solver_options(),
        &atlas,
        &stitch::flags_from_index(&index),
        &stitch::owners_from_index(&index),
    )
    .unwrap();
    assert!(
        seam_step(&stitched, n / 2) > 0.4,
        "internal step must survive stitching"
    );
}

// ============================================================================
// Flags
// ============================================================================

#[test]
fn no_data_texels_stay_invalid() {
    let n = 16;
    let (atlas, mut index) = split_scene(n, 0.4, 0.5);
    // Punch a hole.
    for row in 4..8 {
        for col in 4..8 {
            index.clear(row, col);
        }
    }
    let pool = WorkPool::new(1).unwrap();
    let stitched = stitch::stitch(
        &pool,
        &solver_options(),
        &atlas,
        &stitch::flags_from_index(&index),
        &stitch::owners_from_index(&index),
    )
    .unwrap();
    assert!(!stitched.is_valid(5, 5));
    assert!(stitched.is_valid(0, 0));
}

#[test]
fn gradient_only_orbital_is_pulled_to_surface_values() {
    // Left half surface at 0.6, right half orbital at 0.1: the orbital
    // side contributes gradients only (flat), so it relaxes toward the
    // surface brightness instead of pulling the surface toward 0.1.
    let n = 32;
    let mut atlas = Raster::new(n, n, 3).unwrap();
    let mut index = IndexImage::new(n, n);
    for row in 0..n {
        for col in 0..n {
            let (obs, value) = if col < n / 2 {
                (1000, 0.6)
            } else {
                (ORBITAL_IMAGE_INDEX, 0.1)
            };
            atlas.set_rgb(row, col, Vec3::splat(value));
            index.set(row, col, TexelSource { obs_id: obs, row, col });
        }
    }
    let flags = stitch::flags_from_index(&index);
    assert_eq!(flags.get(0, 0, 0), ChannelFlag::None);
    assert_eq!(flags.get(0, n - 1, 0), ChannelFlag::GradientOnly);

    let pool = WorkPool::new(2).unwrap();
    let options = TexturingOptions {
        num_multigrid_iterations: 20,
        ..solver_options()
    };
    let stitched = stitch::stitch(
        &pool,
        &options,
        &atlas,
        &flags,
        &stitch::owners_from_index(&index),
    )
    .unwrap();

    // Surface half holds its value.
    assert!((stitched.luminance(16, 4) - 0.6).abs() < 0.1);
    // Orbital half follows the surface, not its own seed value.
    let orbital_lum = stitched.luminance(16, n - 4);
    assert!(
        (orbital_lum - 0.6).abs() < 0.15,
        "orbital half settled at {orbital_lum}"
    );
}

#[test]
fn flag_image_dimensions_are_enforced() {
    let atlas = Raster::new(8, 8, 3).unwrap();
    let flags = FlagImage::new(4, 4);
    let owners = vec![1000; 64];
    let pool = WorkPool::new(1).unwrap();
    assert!(stitch::stitch(&pool, &solver_options(), &atlas, &flags, &owners).is_err());
}
