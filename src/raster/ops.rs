//! Raster Operations
//!
//! Mask-aware filtering used by observation preparation and diff
//! propagation: gaussian blur, contrast stretch, and iterative inpaint.
//! Every operation renormalizes by the valid-weight sum so masked pixels
//! contribute nothing.

use glam::Vec3;

use super::Raster;
use super::color;
use crate::config::StretchMode;
use crate::errors::Result;

/// Build a normalized 1D gaussian kernel for the given radius.
///
/// σ = radius / 2; the kernel extends to ±radius.
fn gaussian_kernel(radius: f32) -> Vec<f32> {
    let half = radius.ceil().max(1.0) as i32;
    let sigma = (radius * 0.5).max(0.5);
    let mut kernel = Vec::with_capacity((2 * half + 1) as usize);
    let mut sum = 0.0;
    for i in -half..=half {
        let w = (-0.5 * (i as f32 / sigma).powi(2)).exp();
        kernel.push(w);
        sum += w;
    }
    for w in &mut kernel {
        *w /= sum;
    }
    kernel
}

/// Separable mask-aware gaussian blur.
///
/// Invalid pixels neither contribute nor receive; a valid pixel whose
/// entire neighborhood is invalid keeps its value.
#[must_use]
pub fn gaussian_blur(src: &Raster, radius: f32) -> Raster {
    if radius <= 0.0 {
        return src.clone();
    }
    let kernel = gaussian_kernel(radius);
    let half = (kernel.len() / 2) as i64;

    let horizontal = convolve_pass(src, &kernel, half, true);
    convolve_pass(&horizontal, &kernel, half, false)
}

fn convolve_pass(src: &Raster, kernel: &[f32], half: i64, horizontal: bool) -> Raster {
    let mut out = src.clone();
    let (w, h, bands) = (src.width(), src.height(), src.bands());
    for row in 0..h {
        for col in 0..w {
            if !src.is_valid(row, col) {
                continue;
            }
            let mut acc = [0.0_f32; 3];
            let mut weight = 0.0_f32;
            for (k, kw) in kernel.iter().enumerate() {
                let offset = k as i64 - half;
                let (r, c) = if horizontal {
                    (row as i64, col as i64 + offset)
                } else {
                    (row as i64 + offset, col as i64)
                };
                if !src.in_bounds(r, c) || !src.is_valid(r as u32, c as u32) {
                    continue;
                }
                for b in 0..bands {
                    acc[b as usize] += kw * src.get(r as u32, c as u32, b);
                }
                weight += kw;
            }
            if weight > 0.0 {
                for b in 0..bands {
                    out.set(row, col, b, acc[b as usize] / weight);
                }
            }
        }
    }
    out
}

/// Apply a contrast stretch over the valid pixels.
///
/// The clip window is computed from the luminance distribution and applied
/// linearly to every band, so color ratios are preserved.
#[must_use]
pub fn stretch(src: &Raster, mode: StretchMode) -> Raster {
    let window = match mode {
        StretchMode::None => return src.clone(),
        StretchMode::StandardDeviation(k) => std_window(src, k),
        StretchMode::HistogramPercent(p) => percentile_window(src, p),
    };
    let Some((lo, hi)) = window else {
        return src.clone();
    };
    if hi - lo < 1e-6 {
        // Degenerate window (constant image): nothing to stretch.
        return src.clone();
    }
    let scale = 1.0 / (hi - lo);
    let mut out = src.clone();
    for row in 0..src.height() {
        for col in 0..src.width() {
            if !src.is_valid(row, col) {
                continue;
            }
            for b in 0..src.bands() {
                let v = (src.get(row, col, b) - lo) * scale;
                out.set(row, col, b, v.clamp(0.0, 1.0));
            }
        }
    }
    out
}

fn valid_luminances(src: &Raster) -> Vec<f32> {
    let mut values = Vec::with_capacity((src.width() * src.height()) as usize);
    for row in 0..src.height() {
        for col in 0..src.width() {
            if src.is_valid(row, col) {
                values.push(src.luminance(row, col));
            }
        }
    }
    values
}

fn std_window(src: &Raster, k: f32) -> Option<(f32, f32)> {
    let values = valid_luminances(src);
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
    let sd = var.sqrt();
    Some((mean - k * sd, mean + k * sd))
}

fn percentile_window(src: &Raster, percent: f32) -> Option<(f32, f32)> {
    let mut values = valid_luminances(src);
    if values.is_empty() {
        return None;
    }
    values.sort_by(f32::total_cmp);
    let frac = (percent / 100.0).clamp(0.0, 0.499);
    let lo = values[((values.len() - 1) as f32 * frac) as usize];
    let hi = values[((values.len() - 1) as f32 * (1.0 - frac)) as usize];
    Some((lo, hi))
}

/// Iteratively fill invalid pixels from the average of their valid
/// 8-neighbors.
///
/// `limit` bounds the number of rounds: 0 disables, negative is unlimited.
/// Each round converts the current fringe of invalid pixels that touch at
/// least one valid neighbor.
pub fn inpaint(raster: &mut Raster, limit: i32) -> Result<()> {
    if limit == 0 || !raster.has_mask() {
        return Ok(());
    }
    let (w, h) = (raster.width(), raster.height());
    let mut round = 0;
    loop {
        if limit > 0 && round >= limit {
            break;
        }
        let snapshot = raster.clone();
        let mut filled = 0usize;
        for row in 0..h {
            for col in 0..w {
                if snapshot.is_valid(row, col) {
                    continue;
                }
                let mut acc = Vec3::ZERO;
                let mut count = 0u32;
                for dr in -1i64..=1 {
                    for dc in -1i64..=1 {
                        if dr == 0 && dc == 0 {
                            continue;
                        }
                        let (r, c) = (row as i64 + dr, col as i64 + dc);
                        if snapshot.in_bounds(r, c) && snapshot.is_valid(r as u32, c as u32) {
                            acc += snapshot.rgb(r as u32, c as u32);
                            count += 1;
                        }
                    }
                }
                if count > 0 {
                    raster.set_rgb(row, col, acc / count as f32);
                    raster.set_valid(row, col, true);
                    filled += 1;
                }
            }
        }
        if filled == 0 {
            break;
        }
        round += 1;
    }
    Ok(())
}

/// Bilinear sample at fractional (row, col); invalid taps are dropped and
/// the remainder renormalized. Returns `None` when all four taps are
/// invalid or out of bounds.
#[must_use]
pub fn sample_bilinear(src: &Raster, row: f64, col: f64) -> Option<Vec3> {
    let r0 = row.floor();
    let c0 = col.floor();
    let fr = (row - r0) as f32;
    let fc = (col - c0) as f32;
    let mut acc = Vec3::ZERO;
    let mut weight = 0.0_f32;
    for (dr, dc, w) in [
        (0i64, 0i64, (1.0 - fr) * (1.0 - fc)),
        (0, 1, (1.0 - fr) * fc),
        (1, 0, fr * (1.0 - fc)),
        (1, 1, fr * fc),
    ] {
        let (r, c) = (r0 as i64 + dr, c0 as i64 + dc);
        if src.in_bounds(r, c) && src.is_valid(r as u32, c as u32) {
            acc += src.rgb(r as u32, c as u32) * w;
            weight += w;
        }
    }
    (weight > 1e-6).then(|| acc / weight)
}

/// Shift the luminance of every valid pixel by `delta` (in normalized
/// [0,1] units), preserving chroma. Used by the diff stage's
/// pre-adjustment toward the scene median.
pub fn shift_luminance(raster: &mut Raster, delta: f32) {
    if delta == 0.0 {
        return;
    }
    for row in 0..raster.height() {
        for col in 0..raster.width() {
            if !raster.is_valid(row, col) {
                continue;
            }
            if raster.bands() == 1 {
                let v = raster.get(row, col, 0);
                raster.set(row, col, 0, (v + delta).clamp(0.0, 1.0));
            } else {
                let mut lab = color::rgb_to_lab(raster.rgb(row, col));
                lab.x = (lab.x + delta * 100.0).clamp(0.0, 100.0);
                raster.set_rgb(row, col, color::lab_to_rgb(lab));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard(n: u32) -> Raster {
        let mut r = Raster::new(n, n, 1).unwrap();
        for row in 0..n {
            for col in 0..n {
                r.set(row, col, 0, ((row + col) % 2) as f32);
            }
        }
        r
    }

    #[test]
    fn blur_smooths_checkerboard() {
        let src = checkerboard(8);
        let blurred = gaussian_blur(&src, 2.0);
        // Interior pixels move toward the 0.5 mean.
        let v = blurred.get(4, 4, 0);
        assert!((v - 0.5).abs() < 0.2, "v = {v}");
    }

    #[test]
    fn blur_ignores_masked_pixels() {
        let mut src = checkerboard(8);
        src.set(3, 3, 0, 100.0);
        src.set_valid(3, 3, false);
        let blurred = gaussian_blur(&src, 2.0);
        for row in 0..8 {
            for col in 0..8 {
                if blurred.is_valid(row, col) {
                    assert!(blurred.get(row, col, 0) <= 1.0);
                }
            }
        }
    }

    #[test]
    fn stretch_none_is_identity() {
        let src = checkerboard(4);
        assert_eq!(stretch(&src, StretchMode::None), src);
    }

    #[test]
    fn stretch_expands_range() {
        let mut src = Raster::new(4, 4, 1).unwrap();
        for row in 0..4 {
            for col in 0..4 {
                src.set(row, col, 0, 0.4 + 0.05 * (row as f32));
            }
        }
        let out = stretch(&src, StretchMode::HistogramPercent(0.0));
        let mut lo = f32::MAX;
        let mut hi = f32::MIN;
        for row in 0..4 {
            for col in 0..4 {
                lo = lo.min(out.get(row, col, 0));
                hi = hi.max(out.get(row, col, 0));
            }
        }
        assert!(lo.abs() < 1e-6);
        assert!((hi - 1.0).abs() < 1e-6);
    }

    #[test]
    fn inpaint_limit_zero_is_noop() {
        let mut r = checkerboard(4);
        r.set_valid(2, 2, false);
        inpaint(&mut r, 0).unwrap();
        assert!(!r.is_valid(2, 2));
    }

    #[test]
    fn inpaint_unlimited_fills_everything() {
        let mut r = Raster::new(8, 8, 1).unwrap();
        r.invalidate_all();
        r.set(0, 0, 0, 0.75);
        r.set_valid(0, 0, true);
        inpaint(&mut r, -1).unwrap();
        assert_eq!(r.valid_count(), 64);
        assert!((r.get(7, 7, 0) - 0.75).abs() < 1e-5);
    }

    #[test]
    fn bilinear_center_of_four() {
        let mut r = Raster::new(2, 2, 1).unwrap();
        r.set(0, 0, 0, 0.0);
        r.set(0, 1, 0, 1.0);
        r.set(1, 0, 0, 1.0);
        r.set(1, 1, 0, 0.0);
        let v = sample_bilinear(&r, 0.5, 0.5).unwrap();
        assert!((v.x - 0.5).abs() < 1e-6);
    }
}
