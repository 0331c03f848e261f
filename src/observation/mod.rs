//! Observations
//!
//! A single calibrated image plus its camera model and pose. Surface and
//! orbital observations expose the same capability set (id, bands, size,
//! camera model, frame name, derived ids); the kind enum is the only
//! discriminator, there is no class hierarchy.

pub mod prep;

use std::sync::Arc;

use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::errors::{RegolithError, Result};
use crate::geometry::CameraModel;

/// Sentinel obs-id for "no source" texels.
pub const NO_OBSERVATION: i32 = -1;

/// Reserved id of the orbital basemap image.
pub const ORBITAL_IMAGE_INDEX: i32 = 1;

/// Reserved id of the orbital DEM.
pub const ORBITAL_DEM_INDEX: i32 = 2;

/// Smallest valid surface-observation id. Ids below this threshold are
/// either reserved orbital ids or the "no source" sentinel.
pub const MIN_INDEX: i32 = 1000;

/// What an observation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationKind {
    SurfaceImage,
    SurfaceMask,
    OrbitalImage,
    OrbitalDem,
}

/// The texture variants an observation can carry, in blending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureVariant {
    Original,
    Stretched,
    Blurred,
    Blended,
}

/// Derived-product ids attached to an observation as pre-passes complete.
#[derive(Debug, Clone, Copy, Default)]
pub struct DerivedIds {
    pub mask: Option<Uuid>,
    pub stretched: Option<Uuid>,
    pub stats: Option<Uuid>,
    pub blurred: Option<Uuid>,
    pub blended: Option<Uuid>,
}

/// A calibrated observation.
#[derive(Debug, Clone)]
pub struct Observation {
    pub id: i32,
    pub name: String,
    pub kind: ObservationKind,
    pub width: u32,
    pub height: u32,
    /// Band count, 1 or 3; immutable for the observation's lifetime.
    pub bands: u32,
    pub camera: Arc<dyn CameraModel>,
    pub frame_name: String,
    /// Whether the image is radiometrically linear (masks must match the
    /// linearity of the image they cover).
    pub is_linear: bool,
    /// The source image product.
    pub original_id: Uuid,
    /// Derived products, attached as pre-passes complete.
    pub derived: DerivedIds,
}

impl Observation {
    #[must_use]
    pub fn is_surface(&self) -> bool {
        matches!(
            self.kind,
            ObservationKind::SurfaceImage | ObservationKind::SurfaceMask
        )
    }

    #[must_use]
    pub fn is_orbital(&self) -> bool {
        !self.is_surface()
    }

    #[must_use]
    pub fn is_color(&self) -> bool {
        self.bands == 3
    }

    #[must_use]
    pub fn in_bounds(&self, row: i64, col: i64) -> bool {
        row >= 0 && col >= 0 && (row as u32) < self.height && (col as u32) < self.width
    }

    /// The exact product id for a variant, if present.
    #[must_use]
    pub fn texture_id(&self, variant: TextureVariant) -> Option<Uuid> {
        match variant {
            TextureVariant::Original => Some(self.original_id),
            TextureVariant::Stretched => self.derived.stretched,
            TextureVariant::Blurred => self.derived.blurred,
            TextureVariant::Blended => self.derived.blended,
        }
    }

    /// The best available product for a variant, walking the fallback
    /// chain (blended → stretched → original; blurred → stretched →
    /// original).
    #[must_use]
    pub fn best_texture_id(&self, variant: TextureVariant) -> (TextureVariant, Uuid) {
        let chain: &[TextureVariant] = match variant {
            TextureVariant::Blended => &[
                TextureVariant::Blended,
                TextureVariant::Stretched,
                TextureVariant::Original,
            ],
            TextureVariant::Blurred => &[
                TextureVariant::Blurred,
                TextureVariant::Stretched,
                TextureVariant::Original,
            ],
            TextureVariant::Stretched => &[TextureVariant::Stretched, TextureVariant::Original],
            TextureVariant::Original => &[TextureVariant::Original],
        };
        for v in chain {
            if let Some(id) = self.texture_id(*v) {
                return (*v, id);
            }
        }
        (TextureVariant::Original, self.original_id)
    }
}

/// The observation set of one scene.
///
/// Shared read-only across worker tasks; mutation is confined to
/// attaching derived-product ids between stages.
#[derive(Debug, Default)]
pub struct ObservationSet {
    observations: Vec<Observation>,
    by_id: FxHashMap<i32, usize>,
}

impl ObservationSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observation, enforcing the id invariants: surface ids are
    /// ≥ [`MIN_INDEX`], orbital observations use their reserved ids, and
    /// ids are unique.
    pub fn add(&mut self, obs: Observation) -> Result<()> {
        match obs.kind {
            ObservationKind::SurfaceImage | ObservationKind::SurfaceMask => {
                if obs.id < MIN_INDEX {
                    return Err(RegolithError::Config(format!(
                        "surface observation id {} below MIN_INDEX {MIN_INDEX}",
                        obs.id
                    )));
                }
            }
            ObservationKind::OrbitalImage => {
                if obs.id != ORBITAL_IMAGE_INDEX {
                    return Err(RegolithError::Config(format!(
                        "orbital image must use reserved id {ORBITAL_IMAGE_INDEX}, got {}",
                        obs.id
                    )));
                }
            }
            ObservationKind::OrbitalDem => {
                if obs.id != ORBITAL_DEM_INDEX {
                    return Err(RegolithError::Config(format!(
                        "orbital DEM must use reserved id {ORBITAL_DEM_INDEX}, got {}",
                        obs.id
                    )));
                }
            }
        }
        if obs.bands != 1 && obs.bands != 3 {
            return Err(RegolithError::Config(format!(
                "observation {} band count must be 1 or 3, got {}",
                obs.id, obs.bands
            )));
        }
        if self.by_id.contains_key(&obs.id) {
            return Err(RegolithError::Config(format!(
                "duplicate observation id {}",
                obs.id
            )));
        }
        self.by_id.insert(obs.id, self.observations.len());
        self.observations.push(obs);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: i32) -> Option<&Observation> {
        self.by_id.get(&id).map(|i| &self.observations[*i])
    }

    pub fn get_mut(&mut self, id: i32) -> Option<&mut Observation> {
        self.by_id.get(&id).map(|i| &mut self.observations[*i])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Observation> {
        self.observations.iter_mut()
    }

    /// Surface image observations (the backproject candidates).
    pub fn surface_images(&self) -> impl Iterator<Item = &Observation> {
        self.observations
            .iter()
            .filter(|o| o.kind == ObservationKind::SurfaceImage)
    }

    /// The orbital basemap image, if ingested.
    #[must_use]
    pub fn orbital_image(&self) -> Option<&Observation> {
        self.get(ORBITAL_IMAGE_INDEX)
    }

    /// Mask candidates covering a surface image: same dimensions, and
    /// preferring matching linearity, then lowest id.
    #[must_use]
    pub fn select_mask_for(&self, image: &Observation) -> Option<&Observation> {
        self.observations
            .iter()
            .filter(|o| {
                o.kind == ObservationKind::SurfaceMask
                    && o.width == image.width
                    && o.height == image.height
            })
            .min_by_key(|o| (o.is_linear != image.is_linear, o.id))
    }
}
