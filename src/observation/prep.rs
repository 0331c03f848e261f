//! Observation Preparation
//!
//! The four pre-passes that turn raw surface images into the derived
//! products backproject consumes: masking, contrast stretching, per-image
//! statistics, and blurring.
//!
//! All passes run in parallel across observations with the pool's
//! direction-flipped iteration. Each pass is short-circuited per
//! observation when the derived product already exists and redo is not
//! requested. Per-observation failures are logged and counted; the pass
//! continues, and the failed observation's derived id for that variant is
//! cleared so downstream stages fall back.

use bitflags::bitflags;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use uuid::Uuid;

use super::{Observation, ObservationSet, TextureVariant};
use crate::config::{StretchMode, TexturingOptions};
use crate::errors::{RegolithError, Result};
use crate::pipeline::pool::WorkPool;
use crate::raster::stats::{ImageStats, SceneStats};
use crate::raster::{Raster, ops};
use crate::store::cache::LruImageCache;
use crate::store::{self, DataProduct, ProductStore};

bitflags! {
    /// Which pre-passes to run.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PrepPasses: u32 {
        const MASK = 1 << 0;
        const STRETCH = 1 << 1;
        const STATS = 1 << 2;
        const BLUR = 1 << 3;
    }
}

/// Outcome of the preparation stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrepSummary {
    pub masked: usize,
    pub stretched: usize,
    pub stats_computed: usize,
    pub blurred: usize,
    pub failures: usize,
}

type PassFn = fn(
    &dyn ProductStore,
    &LruImageCache,
    &TexturingOptions,
    &ObservationSet,
    &Observation,
) -> Result<Option<Uuid>>;

/// Run the requested pre-passes over every surface image observation.
pub fn prepare_observations(
    pool: &WorkPool,
    store: &dyn ProductStore,
    cache: &LruImageCache,
    options: &TexturingOptions,
    set: &mut ObservationSet,
    passes: PrepPasses,
    redo: bool,
) -> Result<PrepSummary> {
    let mut summary = PrepSummary::default();
    let order: [(PrepPasses, &str, PassFn); 4] = [
        (PrepPasses::MASK, "mask", mask_one),
        (PrepPasses::STRETCH, "stretch", stretch_one),
        (PrepPasses::STATS, "stats", stats_one),
        (PrepPasses::BLUR, "blur", blur_one),
    ];
    for (flag, label, pass) in order {
        if !passes.contains(flag) {
            continue;
        }
        let (processed, failures) = run_pass(pool, store, cache, options, set, label, redo, pass);
        summary.failures += failures;
        match label {
            "mask" => summary.masked = processed,
            "stretch" => summary.stretched = processed,
            "stats" => summary.stats_computed = processed,
            _ => summary.blurred = processed,
        }
    }
    Ok(summary)
}

/// Shared pass driver: parallel over surface images, collect new derived
/// ids, apply them serially afterwards. Returns (processed, failures).
fn run_pass(
    pool: &WorkPool,
    store: &dyn ProductStore,
    cache: &LruImageCache,
    options: &TexturingOptions,
    set: &mut ObservationSet,
    label: &str,
    redo: bool,
    pass: PassFn,
) -> (usize, usize) {
    let ids: Vec<i32> = set
        .surface_images()
        .filter(|obs| redo || !pass_complete(label, obs, store))
        .map(|obs| obs.id)
        .collect();
    let produced: Mutex<FxHashMap<i32, Option<Uuid>>> = Mutex::new(FxHashMap::default());
    let failed: Mutex<Vec<i32>> = Mutex::new(Vec::new());
    let failures = pool.run_flipped(label, &ids, |_, id| {
        let obs = set
            .get(*id)
            .ok_or_else(|| RegolithError::MissingPrerequisite(format!("observation {id}")))?;
        match pass(store, cache, options, set, obs) {
            Ok(result) => {
                produced.lock().insert(*id, result);
                Ok(())
            }
            Err(err) => {
                failed.lock().push(*id);
                Err(err)
            }
        }
    });
    let produced = produced.into_inner();
    let processed = produced.len();
    for (id, derived) in produced {
        if let Some(obs) = set.get_mut(id) {
            set_derived(obs, label, derived);
        }
    }
    for id in failed.into_inner() {
        if let Some(obs) = set.get_mut(id) {
            set_derived(obs, label, None);
        }
    }
    log::info!("{label}: {processed} observations processed, {failures} failed");
    (processed, failures)
}

fn set_derived(obs: &mut Observation, label: &str, id: Option<Uuid>) {
    match label {
        "mask" => obs.derived.mask = id,
        "stretch" => obs.derived.stretched = id,
        "stats" => obs.derived.stats = id,
        "blur" => obs.derived.blurred = id,
        _ => unreachable!("unknown pass label {label}"),
    }
}

fn pass_complete(label: &str, obs: &Observation, store: &dyn ProductStore) -> bool {
    let id = match label {
        "mask" => obs.derived.mask,
        "stretch" => obs.derived.stretched,
        "stats" => obs.derived.stats,
        "blur" => obs.derived.blurred,
        _ => None,
    };
    id.is_some_and(|id| store.contains(id))
}

/// Load the observation's source image with its mask applied.
fn masked_source(
    store: &dyn ProductStore,
    cache: &LruImageCache,
    options: &TexturingOptions,
    obs: &Observation,
) -> Result<Raster> {
    let mut raster =
        (*store::fetch_raster(store, cache, obs.original_id, options.disable_image_cache)?).clone();
    if let Some(mask_id) = obs.derived.mask {
        let mask = store::fetch_raster(store, cache, mask_id, options.disable_image_cache)?;
        raster.apply_mask(&mask)?;
    }
    Ok(raster)
}

/// Masking: adopt the best rover-mask candidate, or synthesize one when
/// mission policy allows. A valid mask marks bad pixels as 0.
fn mask_one(
    store: &dyn ProductStore,
    cache: &LruImageCache,
    options: &TexturingOptions,
    set: &ObservationSet,
    obs: &Observation,
) -> Result<Option<Uuid>> {
    if let Some(mask_obs) = set.select_mask_for(obs) {
        let mask =
            store::fetch_raster(store, cache, mask_obs.original_id, options.disable_image_cache)?;
        validate_mask(obs, &mask)?;
        let id = store.save(DataProduct::Png((*mask).clone()))?;
        return Ok(Some(id));
    }
    if !options.allow_synthesized_masks {
        return Err(RegolithError::MissingPrerequisite(format!(
            "no rover mask for observation {} and synthesis is disallowed",
            obs.id
        )));
    }
    let source = store::fetch_raster(store, cache, obs.original_id, options.disable_image_cache)?;
    let mut mask = Raster::new(obs.width, obs.height, 1)?;
    for row in 0..obs.height {
        for col in 0..obs.width {
            let good = (0..source.bands()).all(|b| source.get(row, col, b).is_finite());
            mask.set(row, col, 0, if good { 1.0 } else { 0.0 });
        }
    }
    Ok(Some(store.save(DataProduct::Png(mask))?))
}

fn validate_mask(obs: &Observation, mask: &Raster) -> Result<()> {
    if mask.width() != obs.width || mask.height() != obs.height {
        return Err(RegolithError::Raster(format!(
            "mask {}x{} does not cover observation {} ({}x{})",
            mask.width(),
            mask.height(),
            obs.id,
            obs.width,
            obs.height
        )));
    }
    Ok(())
}

/// Stretching: configurable contrast stretch of the mask-unioned image.
/// Mode `None` leaves the derived id unset.
fn stretch_one(
    store: &dyn ProductStore,
    cache: &LruImageCache,
    options: &TexturingOptions,
    _set: &ObservationSet,
    obs: &Observation,
) -> Result<Option<Uuid>> {
    if options.stretch_mode == StretchMode::None {
        return Ok(None);
    }
    let source = masked_source(store, cache, options, obs)?;
    let stretched = ops::stretch(&source, options.stretch_mode);
    Ok(Some(store.save(DataProduct::Png(stretched))?))
}

/// Stats: luminance median / MAD and hue median over valid pixels of the
/// stretched (or original) image.
fn stats_one(
    store: &dyn ProductStore,
    cache: &LruImageCache,
    options: &TexturingOptions,
    _set: &ObservationSet,
    obs: &Observation,
) -> Result<Option<Uuid>> {
    let input = match obs.derived.stretched {
        Some(id) => (*store::fetch_raster(store, cache, id, options.disable_image_cache)?).clone(),
        None => masked_source(store, cache, options, obs)?,
    };
    let stats = ImageStats::compute(&input).ok_or_else(|| {
        RegolithError::Raster(format!("observation {} has no valid pixels", obs.id))
    })?;
    Ok(Some(store.save(DataProduct::Stats(stats))?))
}

/// Blurring: gaussian blur of the stretched (or original) image.
fn blur_one(
    store: &dyn ProductStore,
    cache: &LruImageCache,
    options: &TexturingOptions,
    _set: &ObservationSet,
    obs: &Observation,
) -> Result<Option<Uuid>> {
    let input = match obs.derived.stretched {
        Some(id) => (*store::fetch_raster(store, cache, id, options.disable_image_cache)?).clone(),
        None => masked_source(store, cache, options, obs)?,
    };
    let blurred = ops::gaussian_blur(&input, options.observation_blur_radius);
    Ok(Some(store.save(DataProduct::Png(blurred))?))
}

/// Aggregate per-image statistics into scene medians.
///
/// Color images contribute to the hue aggregate; `OverrideMedianHue`
/// wins when configured.
pub fn aggregate_scene_stats(
    store: &dyn ProductStore,
    set: &ObservationSet,
    options: &TexturingOptions,
) -> Result<SceneStats> {
    let mut all = Vec::new();
    for obs in set.surface_images() {
        if let Some(id) = obs.derived.stats {
            all.push(store::get_stats(store, id)?);
        }
    }
    SceneStats::aggregate(&all, options.override_median_hue).ok_or_else(|| {
        RegolithError::MissingPrerequisite("no observation statistics to aggregate".into())
    })
}

/// The texture variant backproject should sample for an observation.
#[must_use]
pub fn backproject_variant(obs: &Observation) -> TextureVariant {
    if obs.derived.blurred.is_some() {
        TextureVariant::Blurred
    } else if obs.derived.stretched.is_some() {
        TextureVariant::Stretched
    } else {
        TextureVariant::Original
    }
}
