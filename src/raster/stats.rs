//! Image Statistics
//!
//! Per-observation luminance and hue statistics, and their aggregation
//! into scene-wide medians. Statistics are computed over valid pixels
//! only and persisted as a JSON data product.

use serde::{Deserialize, Serialize};

use super::Raster;
use super::color;

/// Chroma below which a pixel is treated as achromatic for hue stats.
const MIN_HUE_CHROMA: f32 = 0.02;

/// Per-image statistics over valid pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageStats {
    /// Median of the luminance distribution.
    pub luminance_median: f32,
    /// Median absolute deviation of the luminance distribution.
    pub luminance_mad: f32,
    /// Median hue in degrees, `None` for mono or fully achromatic images.
    pub hue_median: Option<f32>,
    /// Number of valid pixels the statistics were computed from.
    pub valid_count: usize,
}

impl ImageStats {
    /// Compute statistics for a raster. Returns `None` when no pixel is
    /// valid.
    #[must_use]
    pub fn compute(raster: &Raster) -> Option<Self> {
        let mut luminances = Vec::with_capacity((raster.width() * raster.height()) as usize);
        let mut hues = Vec::new();
        for row in 0..raster.height() {
            for col in 0..raster.width() {
                if !raster.is_valid(row, col) {
                    continue;
                }
                luminances.push(raster.luminance(row, col));
                if raster.is_color()
                    && let Some(h) = color::hue_degrees(raster.rgb(row, col), MIN_HUE_CHROMA)
                {
                    hues.push(h);
                }
            }
        }
        if luminances.is_empty() {
            return None;
        }
        let valid_count = luminances.len();
        let luminance_median = median(&mut luminances);
        let mut deviations: Vec<f32> = luminances
            .iter()
            .map(|v| (v - luminance_median).abs())
            .collect();
        let luminance_mad = median(&mut deviations);
        let hue_median = (!hues.is_empty()).then(|| median(&mut hues));
        Some(Self {
            luminance_median,
            luminance_mad,
            hue_median,
            valid_count,
        })
    }
}

/// Scene-wide aggregation of per-image statistics.
///
/// Color images contribute to the hue aggregate; the median hue may be
/// overridden by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SceneStats {
    /// Median of the per-image luminance medians.
    pub luminance_median: f32,
    /// Median of the per-image hue medians, or the configured override.
    pub hue_median: Option<f32>,
}

impl SceneStats {
    /// Aggregate per-image statistics. `override_hue` wins when set.
    #[must_use]
    pub fn aggregate(stats: &[ImageStats], override_hue: Option<f32>) -> Option<Self> {
        if stats.is_empty() {
            return override_hue.map(|h| Self {
                luminance_median: 0.5,
                hue_median: Some(h),
            });
        }
        let mut luminances: Vec<f32> = stats.iter().map(|s| s.luminance_median).collect();
        let mut hues: Vec<f32> = stats.iter().filter_map(|s| s.hue_median).collect();
        let hue_median = match override_hue {
            Some(h) => Some(h),
            None => (!hues.is_empty()).then(|| median(&mut hues)),
        };
        Some(Self {
            luminance_median: median(&mut luminances),
            hue_median,
        })
    }
}

/// Median of a non-empty slice; sorts in place.
fn median(values: &mut [f32]) -> f32 {
    values.sort_by(f32::total_cmp);
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn median_odd_even() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), 2.5);
    }

    #[test]
    fn stats_skip_masked_pixels() {
        let mut r = Raster::new(2, 2, 1).unwrap();
        r.set(0, 0, 0, 1.0);
        r.set_valid(0, 0, false);
        let stats = ImageStats::compute(&r).unwrap();
        assert_eq!(stats.valid_count, 3);
        assert_eq!(stats.luminance_median, 0.0);
    }

    #[test]
    fn mono_has_no_hue() {
        let r = Raster::new(2, 2, 1).unwrap();
        assert!(ImageStats::compute(&r).unwrap().hue_median.is_none());
    }

    #[test]
    fn hue_median_of_red_image() {
        let mut r = Raster::new(2, 2, 3).unwrap();
        for row in 0..2 {
            for col in 0..2 {
                r.set_rgb(row, col, Vec3::new(0.8, 0.1, 0.1));
            }
        }
        let stats = ImageStats::compute(&r).unwrap();
        assert!(stats.hue_median.unwrap().abs() < 1e-3);
    }

    #[test]
    fn override_hue_wins() {
        let stats = [ImageStats {
            luminance_median: 0.4,
            luminance_mad: 0.1,
            hue_median: Some(120.0),
            valid_count: 4,
        }];
        let scene = SceneStats::aggregate(&stats, Some(33.0)).unwrap();
        assert_eq!(scene.hue_median, Some(33.0));
    }
}
