//! Backproject Index Image
//!
//! A square three-band integer raster recording, for every atlas texel,
//! which observation pixel it was drawn from: (obs-id, src-row, src-col).
//! An obs-id below [`MIN_INDEX`] that is not a reserved orbital id means
//! "no source".
//!
//! The index is persisted as a three-band float TIFF (band 0 = obs-id,
//! band 1 = src-row, band 2 = src-col; integers are exact in f32 up to
//! 2²⁴) and reused by the stitch, diff-propagation, and leaf re-render
//! stages.

use crate::errors::{RegolithError, Result};
use crate::geometry::FaceMap;
use crate::observation::{MIN_INDEX, NO_OBSERVATION, ORBITAL_DEM_INDEX, ORBITAL_IMAGE_INDEX};
use crate::raster::Raster;

/// One texel's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TexelSource {
    pub obs_id: i32,
    pub row: u32,
    pub col: u32,
}

/// Whether an obs-id names a real source (surface or reserved orbital).
#[inline]
#[must_use]
pub fn is_source_id(obs_id: i32) -> bool {
    obs_id >= MIN_INDEX || obs_id == ORBITAL_IMAGE_INDEX || obs_id == ORBITAL_DEM_INDEX
}

/// Per-texel (obs-id, src-row, src-col) over a square atlas.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexImage {
    width: u32,
    height: u32,
    obs: Vec<i32>,
    rows: Vec<i32>,
    cols: Vec<i32>,
}

impl IndexImage {
    /// An index with every texel at "no source".
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        let n = (width * height) as usize;
        Self {
            width,
            height,
            obs: vec![NO_OBSERVATION; n],
            rows: vec![-1; n],
            cols: vec![-1; n],
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
    fn at(&self, row: u32, col: u32) -> usize {
        (row * self.width + col) as usize
    }

    /// The source of a texel, or `None` for sentinel texels.
    #[inline]
    #[must_use]
    pub fn get(&self, row: u32, col: u32) -> Option<TexelSource> {
        let i = self.at(row, col);
        let obs_id = self.obs[i];
        is_source_id(obs_id).then(|| TexelSource {
            obs_id,
            row: self.rows[i] as u32,
            col: self.cols[i] as u32,
        })
    }

    #[inline]
    pub fn set(&mut self, row: u32, col: u32, source: TexelSource) {
        let i = self.at(row, col);
        self.obs[i] = source.obs_id;
        self.rows[i] = source.row as i32;
        self.cols[i] = source.col as i32;
    }

    #[inline]
    pub fn clear(&mut self, row: u32, col: u32) {
        let i = self.at(row, col);
        self.obs[i] = NO_OBSERVATION;
        self.rows[i] = -1;
        self.cols[i] = -1;
    }

    /// Overwrite one full row of texels (the per-row parallel writeback).
    pub fn set_row(&mut self, row: u32, sources: &[Option<TexelSource>]) {
        debug_assert_eq!(sources.len(), self.width as usize);
        for (col, source) in sources.iter().enumerate() {
            match source {
                Some(s) => self.set(row, col as u32, *s),
                None => self.clear(row, col as u32),
            }
        }
    }

    /// Number of texels with a source.
    #[must_use]
    pub fn valid_count(&self) -> usize {
        self.obs.iter().filter(|id| is_source_id(**id)).count()
    }

    /// Iteratively copy valid neighbors into sentinel texels.
    ///
    /// `limit` bounds the number of rounds: 0 disables, negative is
    /// unlimited. When `gutter_only` is set, only texels left unmapped by
    /// the face map (UV-island fringe) are filled; otherwise every
    /// sentinel texel is a candidate.
    ///
    /// Each round works from a snapshot with a fixed neighbor order, so
    /// repeated runs over identical inputs are byte-identical.
    pub fn inpaint(&mut self, limit: i32, gutter_only: Option<&FaceMap>) {
        if limit == 0 {
            return;
        }
        // Nearest neighbors first so orthogonal sources win over diagonal.
        const NEIGHBORS: [(i64, i64); 8] = [
            (0, -1),
            (0, 1),
            (-1, 0),
            (1, 0),
            (-1, -1),
            (-1, 1),
            (1, -1),
            (1, 1),
        ];
        let mut round = 0;
        loop {
            if limit > 0 && round >= limit {
                break;
            }
            let snapshot = self.clone();
            let mut filled = 0usize;
            for row in 0..self.height {
                for col in 0..self.width {
                    if snapshot.get(row, col).is_some() {
                        continue;
                    }
                    if let Some(map) = gutter_only
                        && map.face_at(row, col).is_some()
                    {
                        continue;
                    }
                    let neighbor = NEIGHBORS.iter().find_map(|(dr, dc)| {
                        let (r, c) = (row as i64 + dr, col as i64 + dc);
                        if r >= 0 && c >= 0 && (r as u32) < self.height && (c as u32) < self.width {
                            snapshot.get(r as u32, c as u32)
                        } else {
                            None
                        }
                    });
                    if let Some(source) = neighbor {
                        self.set(row, col, source);
                        filled += 1;
                    }
                }
            }
            if filled == 0 {
                break;
            }
            round += 1;
        }
    }

    /// Encode as the persistable three-band float raster.
    #[must_use]
    pub fn to_raster(&self) -> Raster {
        let mut samples = Vec::with_capacity(self.obs.len() * 3);
        for i in 0..self.obs.len() {
            samples.push(self.obs[i] as f32);
            samples.push(self.rows[i] as f32);
            samples.push(self.cols[i] as f32);
        }
        Raster::from_samples(self.width, self.height, 3, samples)
            .expect("index raster dimensions are consistent")
    }

    /// Decode from a persisted three-band float raster.
    pub fn from_raster(raster: &Raster) -> Result<Self> {
        if raster.bands() != 3 {
            return Err(RegolithError::Raster(format!(
                "index image must have 3 bands, got {}",
                raster.bands()
            )));
        }
        let mut index = Self::new(raster.width(), raster.height());
        for row in 0..raster.height() {
            for col in 0..raster.width() {
                let obs_id = raster.get(row, col, 0) as i32;
                if is_source_id(obs_id) {
                    index.set(
                        row,
                        col,
                        TexelSource {
                            obs_id,
                            row: raster.get(row, col, 1).max(0.0) as u32,
                            col: raster.get(row, col, 2).max(0.0) as u32,
                        },
                    );
                }
            }
        }
        Ok(index)
    }
}
