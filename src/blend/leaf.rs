//! Leaf Tile Re-Render
//!
//! Each leaf tile of the scene carries a persisted per-texel index image
//! (`<leaf>_index.tif`, same schema as the atlas index) produced by an
//! earlier tiling stage. After diff propagation the leaf textures are
//! re-filled from the now-blended observations so tile texturing matches
//! the seamless atlas.
//!
//! Leaves are processed in reverse-lexical order (deeper tiles first) to
//! improve observation-image cache hit rate; parallelism across leaves is
//! on by default.

use std::path::Path;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::backproject::index::IndexImage;
use crate::config::TexturingOptions;
use crate::errors::{RegolithError, Result};
use crate::observation::{ObservationSet, TextureVariant};
use crate::pipeline::pool::WorkPool;
use crate::raster::Raster;
use crate::store::cache::LruImageCache;
use crate::store::{self, ProductStore};

/// Outcome of the leaf re-render stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeafSummary {
    pub rendered: usize,
    pub failures: usize,
}

/// Re-render every leaf texture from the blended observations.
pub fn render_leaves(
    pool: &WorkPool,
    options: &TexturingOptions,
    store: &dyn ProductStore,
    cache: &LruImageCache,
    set: &ObservationSet,
    tiles_dir: &Path,
    leaves: &[String],
) -> Result<LeafSummary> {
    if leaves.is_empty() {
        return Err(RegolithError::MissingPrerequisite(
            "leaf re-render requires a tile list".into(),
        ));
    }
    // Deeper-first: reverse lexical order groups sibling tiles, which
    // share observations, onto nearby work items.
    let mut ordered: Vec<&String> = leaves.iter().collect();
    ordered.sort_unstable_by(|a, b| b.cmp(a));

    let failures = if options.no_blend_leaves_in_parallel {
        let mut failed = 0usize;
        for leaf in &ordered {
            if let Err(err) = render_leaf(options, store, cache, set, tiles_dir, leaf) {
                log::warn!("leaf {leaf}: {err}");
                failed += 1;
            }
        }
        failed
    } else {
        pool.run_flipped("leaf re-render", &ordered, |_, leaf| {
            render_leaf(options, store, cache, set, tiles_dir, leaf)
        })
    };
    let rendered = ordered.len() - failures;
    log::info!("leaf re-render: {rendered} leaves written, {failures} failed");
    Ok(LeafSummary { rendered, failures })
}

/// Re-render one leaf: decode its index, fill from blended observations
/// (falling back blended → stretched → original), inpaint, overwrite the
/// texture (keeping an `_unblended` backup on the first overwrite when
/// debug is enabled).
fn render_leaf(
    options: &TexturingOptions,
    store: &dyn ProductStore,
    cache: &LruImageCache,
    set: &ObservationSet,
    tiles_dir: &Path,
    leaf: &str,
) -> Result<()> {
    let index_path = tiles_dir.join(format!("{leaf}_index.tif"));
    let bytes = std::fs::read(&index_path)
        .map_err(|e| RegolithError::io(index_path.display().to_string(), e))?;
    let mut index = IndexImage::from_raster(&store::decode_float_tiff(&bytes)?)?;

    index.inpaint(options.backproject_inpaint_missing, None);
    index.inpaint(options.backproject_inpaint_gutter, None);

    // Fetch each referenced observation image once.
    let mut images: FxHashMap<i32, Arc<Raster>> = FxHashMap::default();
    for row in 0..index.height() {
        for col in 0..index.width() {
            let Some(source) = index.get(row, col) else {
                continue;
            };
            if images.contains_key(&source.obs_id) {
                continue;
            }
            let Some(obs) = set.get(source.obs_id) else {
                continue;
            };
            let (_, id) = obs.best_texture_id(TextureVariant::Blended);
            let image = store::fetch_raster(store, cache, id, options.disable_image_cache)?;
            images.insert(source.obs_id, image);
        }
    }

    let mut texture = Raster::new(index.width(), index.height(), 3)?;
    texture.invalidate_all();
    for row in 0..index.height() {
        for col in 0..index.width() {
            let Some(source) = index.get(row, col) else {
                continue;
            };
            let Some(image) = images.get(&source.obs_id) else {
                continue;
            };
            if source.row < image.height() && source.col < image.width() {
                texture.set_rgb(row, col, image.rgb(source.row, source.col));
                texture.set_valid(row, col, true);
            }
        }
    }

    let texture_path = tiles_dir.join(format!("{leaf}.png"));
    if options.debug_keep_unblended {
        backup_unblended(tiles_dir, leaf, &texture_path)?;
    }
    let encoded = store::encode_png(&texture)?;
    std::fs::write(&texture_path, encoded)
        .map_err(|e| RegolithError::io(texture_path.display().to_string(), e))?;
    Ok(())
}

/// Copy the pre-blend texture aside once, before the first overwrite.
fn backup_unblended(tiles_dir: &Path, leaf: &str, texture_path: &Path) -> Result<()> {
    let backup = tiles_dir.join(format!("{leaf}_unblended.png"));
    if backup.exists() || !texture_path.exists() {
        return Ok(());
    }
    std::fs::copy(texture_path, &backup)
        .map_err(|e| RegolithError::io(backup.display().to_string(), e))?;
    Ok(())
}
