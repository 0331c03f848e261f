//! Raster and Color Tests
//!
//! Tests for:
//! - Mask-aware gaussian blur and contrast stretch
//! - Iterative inpaint limits
//! - RGB ↔ CIE-LAB round trips and hue extraction
//! - Statistics over valid pixels and scene aggregation

use glam::Vec3;
use proptest::prelude::*;

use regolith::config::StretchMode;
use regolith::raster::stats::{ImageStats, SceneStats};
use regolith::raster::{Raster, color, ops};

const EPSILON: f32 = 1e-4;

fn ramp(n: u32, bands: u32) -> Raster {
    let mut r = Raster::new(n, n, bands).unwrap();
    for row in 0..n {
        for col in 0..n {
            let v = (row * n + col) as f32 / (n * n) as f32;
            for b in 0..bands {
                r.set(row, col, b, v);
            }
        }
    }
    r
}

// ============================================================================
// Blur
// ============================================================================

#[test]
fn blur_preserves_constant_image() {
    let mut src = Raster::new(8, 8, 3).unwrap();
    for row in 0..8 {
        for col in 0..8 {
            src.set_rgb(row, col, Vec3::splat(0.6));
        }
    }
    let blurred = ops::gaussian_blur(&src, 3.0);
    for row in 0..8 {
        for col in 0..8 {
            assert!((blurred.get(row, col, 0) - 0.6).abs() < EPSILON);
        }
    }
}

#[test]
fn blur_never_reads_masked_pixels() {
    let mut src = ramp(8, 1);
    // A poison value behind the mask must not leak into any output.
    src.set(4, 4, 0, 1000.0);
    src.set_valid(4, 4, false);
    let blurred = ops::gaussian_blur(&src, 2.0);
    for row in 0..8 {
        for col in 0..8 {
            if blurred.is_valid(row, col) {
                assert!(
                    blurred.get(row, col, 0) <= 1.0 + EPSILON,
                    "poison leaked to ({row},{col})"
                );
            }
        }
    }
    // The masked pixel itself stays masked.
    assert!(!blurred.is_valid(4, 4));
}

#[test]
fn blur_radius_zero_is_identity() {
    let src = ramp(8, 3);
    assert_eq!(ops::gaussian_blur(&src, 0.0), src);
}

// ============================================================================
// Stretch
// ============================================================================

#[test]
fn histogram_stretch_uses_valid_pixels_only() {
    let mut src = ramp(8, 1);
    src.set(0, 0, 0, 0.0);
    src.set(7, 7, 0, 1.0);
    // Mask the extremes; the window must come from the remaining pixels.
    src.set_valid(0, 0, false);
    src.set_valid(7, 7, false);
    let out = ops::stretch(&src, StretchMode::HistogramPercent(0.0));
    let mut hi = f32::MIN;
    for row in 0..8 {
        for col in 0..8 {
            if out.is_valid(row, col) {
                hi = hi.max(out.get(row, col, 0));
            }
        }
    }
    assert!((hi - 1.0).abs() < EPSILON, "valid max should stretch to 1");
}

#[test]
fn stddev_stretch_is_monotone() {
    let src = ramp(8, 1);
    let out = ops::stretch(&src, StretchMode::StandardDeviation(2.0));
    let mut last = -1.0f32;
    for row in 0..8 {
        for col in 0..8 {
            let v = out.get(row, col, 0);
            assert!(v >= last - EPSILON);
            last = v;
        }
    }
}

// ============================================================================
// Inpaint
// ============================================================================

#[test]
fn inpaint_round_limit_bounds_growth() {
    let mut r = Raster::new(16, 16, 1).unwrap();
    r.invalidate_all();
    r.set(8, 8, 0, 1.0);
    r.set_valid(8, 8, true);
    ops::inpaint(&mut r, 2).unwrap();
    // Two rounds of 8-neighborhood growth reach Chebyshev distance 2.
    assert!(r.is_valid(6, 6));
    assert!(r.is_valid(10, 10));
    assert!(!r.is_valid(8, 11));
    assert!(!r.is_valid(3, 8));
}

// ============================================================================
// Statistics
// ============================================================================

#[test]
fn scene_stats_aggregate_hue_from_color_images() {
    let mut red = Raster::new(4, 4, 3).unwrap();
    for row in 0..4 {
        for col in 0..4 {
            red.set_rgb(row, col, Vec3::new(0.9, 0.2, 0.2));
        }
    }
    let red_stats = ImageStats::compute(&red).unwrap();
    let mono_stats = ImageStats::compute(&ramp(4, 1)).unwrap();
    assert!(mono_stats.hue_median.is_none());

    let scene = SceneStats::aggregate(&[red_stats, mono_stats], None).unwrap();
    assert!(scene.hue_median.unwrap().abs() < 1.0, "red scene hue near 0");

    let overridden = SceneStats::aggregate(&[red_stats, mono_stats], Some(200.0)).unwrap();
    assert_eq!(overridden.hue_median, Some(200.0));
}

// ============================================================================
// Color properties
// ============================================================================

proptest! {
    #[test]
    fn lab_round_trip_is_lossless_in_gamut(
        r in 0.0f32..1.0,
        g in 0.0f32..1.0,
        b in 0.0f32..1.0,
    ) {
        let rgb = Vec3::new(r, g, b);
        let back = color::lab_to_rgb(color::rgb_to_lab(rgb));
        prop_assert!((back - rgb).abs().max_element() < 1e-3);
    }

    #[test]
    fn colorize_respects_requested_hue(
        l in 0.05f32..0.95,
        hue in 0.0f32..360.0,
    ) {
        let rgb = color::colorize(l, hue, 0.5);
        if let Some(measured) = color::hue_degrees(rgb, 0.005) {
            let delta = (measured - hue).abs();
            let wrapped = delta.min(360.0 - delta);
            prop_assert!(wrapped < 1.5, "hue {hue} -> {measured}");
        }
    }

    #[test]
    fn luminance_is_bounded_by_extremes(
        r in 0.0f32..1.0,
        g in 0.0f32..1.0,
        b in 0.0f32..1.0,
    ) {
        let rgb = Vec3::new(r, g, b);
        let y = color::luminance(rgb);
        prop_assert!(y >= rgb.min_element() - 1e-6);
        prop_assert!(y <= rgb.max_element() + 1e-6);
    }
}
