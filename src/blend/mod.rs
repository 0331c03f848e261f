//! Diff Propagation
//!
//! The stitched atlas is seamless, but leaf tiles are re-rendered
//! per-observation from their own index images; using the atlas directly
//! would break tile-level texturing. This stage pushes the stitched
//! correction *back* to each source observation: at every contributing
//! source pixel the diff between the stitched result and the blurred
//! source is collected, smoothed and inpainted in source-image space, and
//! added to the source image to produce a *blended observation*.

pub mod leaf;
pub mod winners;

use glam::{DVec2, Vec3};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::backproject::index::IndexImage;
use crate::config::TexturingOptions;
use crate::errors::{RegolithError, Result};
use crate::frames::FrameCache;
use crate::geometry::TriMesh;
use crate::observation::{Observation, ObservationKind, ObservationSet, TextureVariant, prep};
use crate::pipeline::pool::WorkPool;
use crate::raster::stats::SceneStats;
use crate::raster::{Raster, color, ops};
use crate::store::cache::LruImageCache;
use crate::store::{self, DataProduct, ProductStore};
use winners::WinnersTable;

/// Saturation used when colorizing mono observations at the scene hue.
const COLORIZE_SATURATION: f32 = 0.3;

/// Outcome of the diff-propagation stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlendSummary {
    /// Observations that received a blended product.
    pub blended: usize,
    pub failures: usize,
}

/// Propagate the stitched correction back to every contributing
/// observation, attaching `blended` derived ids.
///
/// Observations no backproject texel selected get an empty blended id so
/// downstream falls back to stretched/original.
pub fn propagate_diffs(
    pool: &WorkPool,
    options: &TexturingOptions,
    store: &dyn ProductStore,
    cache: &LruImageCache,
    frames: &FrameCache,
    set: &mut ObservationSet,
    mesh: &TriMesh,
    index: &IndexImage,
    stitched: &Raster,
) -> Result<BlendSummary> {
    let scene = prep::aggregate_scene_stats(store, set, options)?;
    let table = WinnersTable::build(index, stitched);

    let ids: Vec<i32> = table
        .observations()
        .filter(|id| set.get(*id).is_some())
        .collect();
    let produced: Mutex<FxHashMap<i32, Uuid>> = Mutex::new(FxHashMap::default());
    let failures = pool.run_flipped("blend", &ids, |_, id| {
        let obs = set
            .get(*id)
            .ok_or_else(|| RegolithError::MissingPrerequisite(format!("observation {id}")))?;
        let blended_id = blend_one(store, cache, frames, options, mesh, &table, &scene, obs)?;
        produced.lock().insert(*id, blended_id);
        Ok(())
    });

    let produced = produced.into_inner();
    let blended = produced.len();
    let selected: Vec<i32> = ids;
    for obs in set.iter_mut() {
        if obs.kind != ObservationKind::SurfaceImage {
            continue;
        }
        obs.derived.blended = produced.get(&obs.id).copied();
        if !selected.contains(&obs.id) {
            log::debug!("observation {} selected by no texel, no blended product", obs.id);
        }
    }
    log::info!("diff propagation: {blended} observations blended, {failures} failed");
    Ok(BlendSummary { blended, failures })
}

/// Build one observation's blended image.
fn blend_one(
    store: &dyn ProductStore,
    cache: &LruImageCache,
    frames: &FrameCache,
    options: &TexturingOptions,
    mesh: &TriMesh,
    table: &WinnersTable,
    scene: &SceneStats,
    obs: &Observation,
) -> Result<Uuid> {
    let shard = table.shard(obs.id).ok_or_else(|| {
        RegolithError::MissingPrerequisite(format!("no winners for observation {}", obs.id))
    })?;

    // Source and its blurred variant.
    let mut source =
        (*store::fetch_raster(store, cache, obs.original_id, options.disable_image_cache)?).clone();
    if let Some(mask_id) = obs.derived.mask {
        let mask = store::fetch_raster(store, cache, mask_id, options.disable_image_cache)?;
        source.apply_mask(&mask)?;
    }
    let (_, blurred_id) = obs.best_texture_id(TextureVariant::Blurred);
    let blurred = store::fetch_raster(store, cache, blurred_id, options.disable_image_cache)?;

    // Optional luminance pre-adjustment toward the scene median.
    if options.preadjust_luminance > 0.0
        && let Some(stats_id) = obs.derived.stats
    {
        let stats = store::get_stats(store, stats_id)?;
        let delta = (scene.luminance_median - stats.luminance_median) * options.preadjust_luminance;
        ops::shift_luminance(&mut source, delta);
    }

    // Optional mono → color at the scene median hue.
    if options.colorize
        && !source.is_color()
        && let Some(hue) = scene.hue_median
    {
        source = colorize_raster(&source, hue);
    }
    let color_output = source.is_color();

    // Sparse diff at contributing source pixels.
    let mut diff = Raster::new(obs.width, obs.height, source.bands())?;
    diff.invalidate_all();
    for ((row, col), accum) in shard {
        if *row >= obs.height || *col >= obs.width {
            continue;
        }
        let mean = accum.mean();
        let mean = Vec3::new(mean.x as f32, mean.y as f32, mean.z as f32);
        if color_output {
            diff.set_rgb(*row, *col, mean - blurred.rgb(*row, *col));
        } else {
            // Mono: reduce the stitched RGB to normalized L*.
            let l = color::rgb_to_lab(mean).x / 100.0;
            diff.set(*row, *col, 0, l - blurred.get(*row, *col, 0));
        }
        diff.set_valid(*row, *col, true);
    }

    if options.barycentric_interpolate_winners {
        let cam_to_mesh = frames.transform_for(&obs.frame_name, options.use_priors)?;
        interpolate_diff(
            &mut diff,
            mesh,
            obs,
            cam_to_mesh.inverse(),
            options.barycentric_max_triangle_side_length_pixels,
        );
    }

    if options.inpaint_diff != 0 {
        ops::inpaint(&mut diff, options.inpaint_diff)?;
    }
    if options.blur_diff > 0.0 {
        diff = ops::gaussian_blur(&diff, options.blur_diff);
    }

    // Compose: diff where valid, average diff (or nothing) elsewhere.
    let avg = average_diff(&diff);
    let mut blended = source.clone();
    for row in 0..blended.height() {
        for col in 0..blended.width() {
            if !source.is_valid(row, col) {
                continue;
            }
            let base = source.rgb(row, col);
            let value = if diff.is_valid(row, col) {
                Some(base + diff.rgb(row, col))
            } else if options.no_fill_blend_with_average_diff {
                None
            } else {
                Some(base + avg)
            };
            if let Some(v) = value {
                blended.set_rgb(row, col, v.clamp(Vec3::ZERO, Vec3::ONE));
            }
        }
    }

    store.save(DataProduct::Png(blended))
}

/// Colorize a mono raster at the given hue via HSL, keeping luminance.
#[must_use]
fn colorize_raster(source: &Raster, hue: f32) -> Raster {
    let mut out = source.to_color();
    for row in 0..source.height() {
        for col in 0..source.width() {
            if source.is_valid(row, col) {
                let l = source.get(row, col, 0);
                out.set_rgb(row, col, color::colorize(l, hue, COLORIZE_SATURATION));
            }
        }
    }
    out
}

/// Mean of the valid diff samples, per band.
fn average_diff(diff: &Raster) -> Vec3 {
    let mut sum = Vec3::ZERO;
    let mut count = 0u32;
    for row in 0..diff.height() {
        for col in 0..diff.width() {
            if diff.is_valid(row, col) {
                sum += diff.rgb(row, col);
                count += 1;
            }
        }
    }
    if count == 0 { Vec3::ZERO } else { sum / count as f32 }
}

/// Barycentrically spread the sparse diff across mesh faces whose three
/// vertices all landed on valid winner pixels close together in source
/// space. Larger triangles are skipped, preserving invalidity.
fn interpolate_diff(
    diff: &mut Raster,
    mesh: &TriMesh,
    obs: &Observation,
    mesh_to_cam: glam::DMat4,
    max_side_px: f64,
) {
    let snapshot = diff.clone();
    for face in 0..mesh.faces.len() as u32 {
        let corners = mesh.face_positions(face);
        let mut pixels = [DVec2::ZERO; 3];
        let mut corner_diff = [Vec3::ZERO; 3];
        let mut usable = true;
        for i in 0..3 {
            let Some(pixel) = obs.camera.project(mesh_to_cam.transform_point3(corners[i])) else {
                usable = false;
                break;
            };
            let (row, col) = (pixel.y.round(), pixel.x.round());
            if !obs.in_bounds(row as i64, col as i64)
                || !snapshot.is_valid(row as u32, col as u32)
            {
                usable = false;
                break;
            }
            pixels[i] = pixel;
            corner_diff[i] = snapshot.rgb(row as u32, col as u32);
        }
        if !usable {
            continue;
        }
        let sides_ok = (0..3).all(|i| pixels[i].distance(pixels[(i + 1) % 3]) <= max_side_px);
        if !sides_ok {
            continue;
        }
        rasterize_triangle(diff, &snapshot, &pixels, &corner_diff);
    }
}

/// Fill invalid diff pixels inside the source-space triangle with the
/// barycentric mix of the corner diffs.
fn rasterize_triangle(
    diff: &mut Raster,
    snapshot: &Raster,
    pixels: &[DVec2; 3],
    corner_diff: &[Vec3; 3],
) {
    let min_c = pixels.iter().map(|p| p.x).fold(f64::INFINITY, f64::min).floor().max(0.0) as u32;
    let max_c = pixels
        .iter()
        .map(|p| p.x)
        .fold(f64::NEG_INFINITY, f64::max)
        .ceil()
        .min(f64::from(diff.width() - 1)) as u32;
    let min_r = pixels.iter().map(|p| p.y).fold(f64::INFINITY, f64::min).floor().max(0.0) as u32;
    let max_r = pixels
        .iter()
        .map(|p| p.y)
        .fold(f64::NEG_INFINITY, f64::max)
        .ceil()
        .min(f64::from(diff.height() - 1)) as u32;
    let v0 = pixels[1] - pixels[0];
    let v1 = pixels[2] - pixels[0];
    let denom = v0.x * v1.y - v1.x * v0.y;
    if denom.abs() < 1e-12 {
        return;
    }
    for row in min_r..=max_r {
        for col in min_c..=max_c {
            if snapshot.is_valid(row, col) || diff.is_valid(row, col) {
                continue;
            }
            let p = DVec2::new(f64::from(col), f64::from(row)) - pixels[0];
            let b1 = (p.x * v1.y - v1.x * p.y) / denom;
            let b2 = (v0.x * p.y - p.x * v0.y) / denom;
            let b0 = 1.0 - b1 - b2;
            if b0 < 0.0 || b1 < 0.0 || b2 < 0.0 {
                continue;
            }
            let value = corner_diff[0] * b0 as f32
                + corner_diff[1] * b1 as f32
                + corner_diff[2] * b2 as f32;
            diff.set_rgb(row, col, value);
            diff.set_valid(row, col, true);
        }
    }
}
