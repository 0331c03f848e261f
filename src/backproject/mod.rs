//! Backproject (Observation Selection)
//!
//! The pipeline's critical path: for every texel of the scene atlas,
//! raycast to the mesh, enumerate candidate observations whose frustum
//! hull contains the hit point, score them, and record the winner in the
//! backproject index. The index drives every downstream stage.
//!
//! Per-texel failures are silent (the texel stays at "no source");
//! missing prerequisites are fatal.

pub mod index;
pub mod strategy;

pub use index::{IndexImage, TexelSource};
pub use strategy::{Candidate, CandidateContext, ScoringParams, Strategy};

use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::config::TexturingOptions;
use crate::errors::{RegolithError, Result};
use crate::geometry::{FaceMap, SceneCaster, TriMesh};
use crate::observation::TextureVariant;
use crate::pipeline::pool::WorkPool;
use crate::raster::Raster;

/// Output of the backproject stage.
#[derive(Debug)]
pub struct BackprojectResult {
    /// Per-texel winners.
    pub index: IndexImage,
    /// The backproject-colored atlas: each texel filled from its winner's
    /// texture variant. Sentinel texels are masked invalid.
    pub initial: Raster,
    /// Which texture variant each observation was sampled from.
    pub variants: FxHashMap<i32, TextureVariant>,
}

/// Run backproject over the full atlas.
///
/// `mesh` is the finest LOD (with UVs); `caster` covers the occlusion
/// mesh. The strategy holds the per-observation contexts and is shared
/// read-only by all workers; parallelism is per atlas row.
pub fn backproject(
    pool: &WorkPool,
    options: &TexturingOptions,
    mesh: &TriMesh,
    facemap: &FaceMap,
    caster: &SceneCaster,
    strategy: &Strategy,
) -> Result<BackprojectResult> {
    if !mesh.has_uvs() {
        return Err(RegolithError::MissingPrerequisite(
            "backproject requires a mesh with UVs".into(),
        ));
    }
    let resolution = facemap.resolution();
    if resolution != options.atlas_resolution {
        return Err(RegolithError::Config(format!(
            "face map resolution {resolution} != atlas resolution {}",
            options.atlas_resolution
        )));
    }
    let params = ScoringParams::from_options(options, &mesh.bounds());
    let sky = options.sky_direction.normalize();

    let rows: Vec<Vec<Option<TexelSource>>> = pool.install(|| {
        (0..resolution)
            .into_par_iter()
            .map(|row| {
                let mut out = vec![None; resolution as usize];
                for (col, slot) in out.iter_mut().enumerate() {
                    let Some((face, bary)) = facemap.lookup(mesh, row, col as u32) else {
                        continue;
                    };
                    let (point, normal) = mesh.surface_point(face, bary, sky);
                    *slot = strategy
                        .select(point, normal, caster, &params)
                        .map(|winner| TexelSource {
                            obs_id: winner.obs_id,
                            row: winner.row,
                            col: winner.col,
                        });
                }
                out
            })
            .collect()
    });

    let mut index = IndexImage::new(resolution, resolution);
    for (row, sources) in rows.iter().enumerate() {
        index.set_row(row as u32, sources);
    }
    log::info!(
        "backproject: {}/{} texels sourced",
        index.valid_count(),
        (resolution as usize).pow(2)
    );

    // Post-processing: fill unmapped texels, then the UV-island fringe.
    index.inpaint(options.backproject_inpaint_missing, None);
    index.inpaint(options.backproject_inpaint_gutter, Some(facemap));

    let variants = strategy
        .contexts()
        .iter()
        .map(|ctx| (ctx.obs_id, ctx.variant))
        .collect();
    let initial = fill_atlas(&index, strategy.contexts());

    Ok(BackprojectResult {
        index,
        initial,
        variants,
    })
}

/// Color an atlas raster from an index: each texel samples its winner's
/// texture at (src-row, src-col). Sentinel texels are masked invalid.
#[must_use]
pub fn fill_atlas(index: &IndexImage, contexts: &[CandidateContext]) -> Raster {
    let by_id: FxHashMap<i32, &CandidateContext> =
        contexts.iter().map(|ctx| (ctx.obs_id, ctx)).collect();
    let mut atlas = Raster::new(index.width(), index.height(), 3)
        .expect("atlas dimensions come from a validated index");
    atlas.invalidate_all();
    for row in 0..index.height() {
        for col in 0..index.width() {
            let Some(source) = index.get(row, col) else {
                continue;
            };
            let Some(ctx) = by_id.get(&source.obs_id) else {
                continue;
            };
            if source.row < ctx.image.height() && source.col < ctx.image.width() {
                atlas.set_rgb(row, col, ctx.image.rgb(source.row, source.col));
                atlas.set_valid(row, col, true);
            }
        }
    }
    atlas
}
