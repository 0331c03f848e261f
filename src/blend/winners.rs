//! Winners Table
//!
//! For diff propagation: every valid atlas texel names the observation
//! pixel it was drawn from; the table buckets the stitched atlas colors
//! by (obs-id, src-row, src-col) with a running count, sharded by obs-id
//! so each observation's diff pass owns its shard outright (single-writer
//! sharding, no global lock).

use glam::DVec3;
use rustc_hash::FxHashMap;

use crate::backproject::index::IndexImage;
use crate::observation::MIN_INDEX;
use crate::raster::Raster;

/// Accumulated stitched color for one source pixel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WinnerAccum {
    /// Sum of stitched RGB contributions (f64 so large counts stay exact).
    pub sum: DVec3,
    pub count: u32,
}

impl WinnerAccum {
    /// Mean stitched color.
    #[must_use]
    pub fn mean(&self) -> DVec3 {
        if self.count == 0 {
            DVec3::ZERO
        } else {
            self.sum / f64::from(self.count)
        }
    }
}

/// Per-observation buckets of stitched texel colors.
#[derive(Debug, Default)]
pub struct WinnersTable {
    shards: FxHashMap<i32, FxHashMap<(u32, u32), WinnerAccum>>,
}

impl WinnersTable {
    /// Bucket every valid surface texel of the index by its source pixel.
    ///
    /// Orbital texels are gradient seeds, not diff targets, and are
    /// skipped; so are texels the stitch left invalid.
    #[must_use]
    pub fn build(index: &IndexImage, stitched: &Raster) -> Self {
        let mut shards: FxHashMap<i32, FxHashMap<(u32, u32), WinnerAccum>> = FxHashMap::default();
        for row in 0..index.height() {
            for col in 0..index.width() {
                let Some(source) = index.get(row, col) else {
                    continue;
                };
                if source.obs_id < MIN_INDEX || !stitched.is_valid(row, col) {
                    continue;
                }
                let rgb = stitched.rgb(row, col);
                let accum = shards
                    .entry(source.obs_id)
                    .or_default()
                    .entry((source.row, source.col))
                    .or_default();
                accum.sum += DVec3::new(f64::from(rgb.x), f64::from(rgb.y), f64::from(rgb.z));
                accum.count += 1;
            }
        }
        Self { shards }
    }

    /// Observation ids with at least one winning texel.
    pub fn observations(&self) -> impl Iterator<Item = i32> + '_ {
        self.shards.keys().copied()
    }

    /// One observation's buckets.
    #[must_use]
    pub fn shard(&self, obs_id: i32) -> Option<&FxHashMap<(u32, u32), WinnerAccum>> {
        self.shards.get(&obs_id)
    }

    /// Σ count over one observation's buckets.
    #[must_use]
    pub fn count_for(&self, obs_id: i32) -> usize {
        self.shards
            .get(&obs_id)
            .map_or(0, |s| s.values().map(|a| a.count as usize).sum())
    }

    /// Σ count over every bucket: equals the number of valid surface
    /// texels in the index.
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.shards
            .values()
            .flat_map(|s| s.values())
            .map(|a| a.count as usize)
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}
