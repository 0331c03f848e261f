//! Raster Images
//!
//! CPU-side float rasters with an optional per-pixel validity mask. All
//! pipeline imagery (source observations, derived products, the atlas and
//! sparse diff images) flows through [`Raster`].
//!
//! Samples are band-interleaved, row-major `f32` in `[0,1]`. A masked
//! (invalid) pixel never contributes to blurs, statistics, or
//! backprojection scoring.

pub mod color;
pub mod ops;
pub mod stats;

use glam::Vec3;

use crate::errors::{RegolithError, Result};

/// A float raster with `bands` ∈ {1, 3} and an optional validity mask.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    width: u32,
    height: u32,
    bands: u32,
    samples: Vec<f32>,
    /// `true` = valid. `None` means every pixel is valid.
    mask: Option<Vec<bool>>,
}

impl Raster {
    /// Create a zero-filled raster with every pixel valid.
    pub fn new(width: u32, height: u32, bands: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(RegolithError::Raster(format!(
                "raster dimensions must be nonzero, got {width}x{height}"
            )));
        }
        if bands != 1 && bands != 3 {
            return Err(RegolithError::Raster(format!(
                "band count must be 1 or 3, got {bands}"
            )));
        }
        Ok(Self {
            width,
            height,
            bands,
            samples: vec![0.0; (width * height * bands) as usize],
            mask: None,
        })
    }

    /// Wrap an existing band-interleaved sample buffer.
    pub fn from_samples(width: u32, height: u32, bands: u32, samples: Vec<f32>) -> Result<Self> {
        let mut raster = Self::new(width, height, bands)?;
        if samples.len() != raster.samples.len() {
            return Err(RegolithError::Raster(format!(
                "sample buffer length {} does not match {width}x{height}x{bands}",
                samples.len()
            )));
        }
        raster.samples = samples;
        Ok(raster)
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }
    #[must_use]
    pub fn bands(&self) -> u32 {
        self.bands
    }
    #[must_use]
    pub fn is_color(&self) -> bool {
        self.bands == 3
    }

    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[must_use]
    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    #[inline]
    #[must_use]
    pub fn in_bounds(&self, row: i64, col: i64) -> bool {
        row >= 0 && col >= 0 && (row as u32) < self.height && (col as u32) < self.width
    }

    #[inline]
    fn sample_index(&self, row: u32, col: u32, band: u32) -> usize {
        ((row * self.width + col) * self.bands + band) as usize
    }

    #[inline]
    #[must_use]
    pub fn get(&self, row: u32, col: u32, band: u32) -> f32 {
        self.samples[self.sample_index(row, col, band)]
    }

    #[inline]
    pub fn set(&mut self, row: u32, col: u32, band: u32, value: f32) {
        let i = self.sample_index(row, col, band);
        self.samples[i] = value;
    }

    /// Read a pixel as RGB; mono pixels are replicated across channels.
    #[inline]
    #[must_use]
    pub fn rgb(&self, row: u32, col: u32) -> Vec3 {
        if self.bands == 3 {
            Vec3::new(
                self.get(row, col, 0),
                self.get(row, col, 1),
                self.get(row, col, 2),
            )
        } else {
            Vec3::splat(self.get(row, col, 0))
        }
    }

    /// Write a pixel from RGB; mono rasters store the luminance.
    #[inline]
    pub fn set_rgb(&mut self, row: u32, col: u32, value: Vec3) {
        if self.bands == 3 {
            self.set(row, col, 0, value.x);
            self.set(row, col, 1, value.y);
            self.set(row, col, 2, value.z);
        } else {
            self.set(row, col, 0, color::luminance(value));
        }
    }

    /// Photometric luminance of a pixel.
    #[inline]
    #[must_use]
    pub fn luminance(&self, row: u32, col: u32) -> f32 {
        if self.bands == 3 {
            color::luminance(self.rgb(row, col))
        } else {
            self.get(row, col, 0)
        }
    }

    // ========================================================================
    // Validity mask
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn is_valid(&self, row: u32, col: u32) -> bool {
        match &self.mask {
            Some(mask) => mask[(row * self.width + col) as usize],
            None => true,
        }
    }

    /// Whether any pixel is masked off.
    #[must_use]
    pub fn has_mask(&self) -> bool {
        self.mask.is_some()
    }

    pub fn set_valid(&mut self, row: u32, col: u32, valid: bool) {
        let i = (row * self.width + col) as usize;
        match &mut self.mask {
            Some(mask) => mask[i] = valid,
            None => {
                if !valid {
                    let mut mask = vec![true; (self.width * self.height) as usize];
                    mask[i] = false;
                    self.mask = Some(mask);
                }
            }
        }
    }

    /// Mark every pixel invalid (used to seed sparse images).
    pub fn invalidate_all(&mut self) {
        self.mask = Some(vec![false; (self.width * self.height) as usize]);
    }

    /// Intersect this raster's validity with another mask raster of the
    /// same dimensions. In a mask raster, 0 marks a bad pixel.
    pub fn apply_mask(&mut self, mask: &Raster) -> Result<()> {
        if mask.width != self.width || mask.height != self.height {
            return Err(RegolithError::Raster(format!(
                "mask dimensions {}x{} do not match raster {}x{}",
                mask.width, mask.height, self.width, self.height
            )));
        }
        for row in 0..self.height {
            for col in 0..self.width {
                if mask.get(row, col, 0) == 0.0 || !mask.is_valid(row, col) {
                    self.set_valid(row, col, false);
                }
            }
        }
        Ok(())
    }

    /// Number of valid pixels.
    #[must_use]
    pub fn valid_count(&self) -> usize {
        match &self.mask {
            Some(mask) => mask.iter().filter(|v| **v).count(),
            None => (self.width * self.height) as usize,
        }
    }

    /// Clamp every sample into [0,1].
    pub fn clamp01(&mut self) {
        for s in &mut self.samples {
            *s = s.clamp(0.0, 1.0);
        }
    }

    /// Expand a mono raster to three identical bands; no-op on color.
    #[must_use]
    pub fn to_color(&self) -> Raster {
        if self.bands == 3 {
            return self.clone();
        }
        let mut out = Raster {
            width: self.width,
            height: self.height,
            bands: 3,
            samples: Vec::with_capacity((self.width * self.height * 3) as usize),
            mask: self.mask.clone(),
        };
        for s in &self.samples {
            out.samples.extend_from_slice(&[*s, *s, *s]);
        }
        out
    }
}
