//! Frame Transform Cache
//!
//! The pipeline requires one capability of the mission frame library: the
//! best available transform between a named frame and the mesh frame.
//! "Best" prefers an adjusted (aligned) transform and falls back to the
//! prior; `use_priors` inverts the preference and `only_aligned`
//! restricts to frames with adjusted transforms.
//!
//! Frame names include the reserved meta `"root"` and site-drive strings
//! `SSSSSDDDDD` (five digits of site, five of drive).

use glam::DMat4;
use rustc_hash::FxHashMap;

use crate::errors::{RegolithError, Result};

/// The reserved root frame name: identity with the mesh frame.
pub const ROOT_FRAME: &str = "root";

/// Parse a site-drive frame name `SSSSSDDDDD` into (site, drive).
#[must_use]
pub fn parse_site_drive(name: &str) -> Option<(u32, u32)> {
    if name.len() != 10 || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let site = name[..5].parse().ok()?;
    let drive = name[5..].parse().ok()?;
    Some((site, drive))
}

/// Cache of frame → mesh-frame transforms.
///
/// Read-only across workers once populated; transforms are rigid 4×4
/// matrices in the mesh-frame basis.
#[derive(Debug, Default)]
pub struct FrameCache {
    adjusted: FxHashMap<String, DMat4>,
    priors: FxHashMap<String, DMat4>,
}

impl FrameCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adjusted (aligned) transform for a frame.
    pub fn set_adjusted(&mut self, frame: impl Into<String>, transform: DMat4) {
        self.adjusted.insert(frame.into(), transform);
    }

    /// Register a prior transform for a frame.
    pub fn set_prior(&mut self, frame: impl Into<String>, transform: DMat4) {
        self.priors.insert(frame.into(), transform);
    }

    #[must_use]
    pub fn contains_frame(&self, frame: &str) -> bool {
        frame == ROOT_FRAME || self.adjusted.contains_key(frame) || self.priors.contains_key(frame)
    }

    /// Whether the frame has an adjusted transform (is aligned).
    #[must_use]
    pub fn is_aligned(&self, frame: &str) -> bool {
        frame == ROOT_FRAME || self.adjusted.contains_key(frame)
    }

    /// Best transform: adjusted when present, else prior.
    pub fn best_transform(&self, frame: &str) -> Result<DMat4> {
        if frame == ROOT_FRAME {
            return Ok(DMat4::IDENTITY);
        }
        self.adjusted
            .get(frame)
            .or_else(|| self.priors.get(frame))
            .copied()
            .ok_or_else(|| RegolithError::UnknownFrame(frame.into()))
    }

    /// Best prior: the prior when present, else the adjusted transform.
    pub fn best_prior(&self, frame: &str) -> Result<DMat4> {
        if frame == ROOT_FRAME {
            return Ok(DMat4::IDENTITY);
        }
        self.priors
            .get(frame)
            .or_else(|| self.adjusted.get(frame))
            .copied()
            .ok_or_else(|| RegolithError::UnknownFrame(frame.into()))
    }

    /// The transform a pipeline configured with `use_priors` should use.
    pub fn transform_for(&self, frame: &str, use_priors: bool) -> Result<DMat4> {
        if use_priors {
            self.best_prior(frame)
        } else {
            self.best_transform(frame)
        }
    }
}
