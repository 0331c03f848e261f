//! Observation Selection Strategies
//!
//! Candidate enumeration and scoring for backproject. Both strategies
//! share one shape: initialize once over the mesh, hulls, and
//! per-observation contexts; then answer `select(point, normal)` for
//! every texel. One strategy instance is shared read-only by all
//! backproject workers.
//!
//! Scores are monotone in image-plane resolution at the hit point and
//! monotone-decreasing in glancing angle. A surface candidate always
//! dominates an orbital one regardless of score.

use std::sync::Arc;

use glam::{DMat4, DVec3};
use smallvec::SmallVec;

use crate::config::{ObsSelectionStrategy, PreferColor, TexturingOptions};
use crate::errors::{RegolithError, Result};
use crate::frames::FrameCache;
use crate::geometry::mesh::Aabb;
use crate::geometry::{CameraModel, ConvexHull, SceneCaster, hull};
use crate::observation::prep::backproject_variant;
use crate::observation::{ObservationKind, ObservationSet, TextureVariant};
use crate::raster::Raster;
use crate::store::cache::LruImageCache;
use crate::store::{self, ProductStore};

/// Scores closer than this are equivalent for tie-breaking.
const SCORE_EPSILON: f64 = 1e-3;

/// Spatial-strategy grid resolution per axis.
const GRID_CELLS: u32 = 32;

/// Per-observation data shared by all backproject workers.
#[derive(Debug, Clone)]
pub struct CandidateContext {
    pub obs_id: i32,
    pub camera: Arc<dyn CameraModel>,
    pub cam_to_mesh: DMat4,
    pub mesh_to_cam: DMat4,
    pub hull: ConvexHull,
    pub image: Arc<Raster>,
    pub variant: TextureVariant,
    pub width: u32,
    pub height: u32,
    pub is_color: bool,
    pub is_linear: bool,
    pub is_orbital: bool,
}

/// A scored candidate for one texel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub obs_id: i32,
    pub row: u32,
    pub col: u32,
    pub score: f64,
    pub variant: TextureVariant,
    pub is_color: bool,
    pub is_linear: bool,
    pub is_orbital: bool,
}

/// Fixed scoring inputs derived from the options and scene.
#[derive(Debug, Clone, Copy)]
pub struct ScoringParams {
    /// Strategy quality/compute knob in [0,1].
    pub quality: f64,
    /// cos of the maximum glancing angle; candidates below are rejected.
    pub min_cos_angle: f64,
    /// Minimum self-intersection distance for occlusion rays.
    pub raycast_tolerance: f64,
    pub prefer_color: PreferColor,
    pub prefer_nonlinear: bool,
    /// Atlas texel density, pixels per meter.
    pub atlas_pixels_per_meter: f64,
}

impl ScoringParams {
    #[must_use]
    pub fn from_options(options: &TexturingOptions, scene_bounds: &Aabb) -> Self {
        let diagonal = scene_bounds.size().length().max(1e-6);
        Self {
            quality: options.backproject_quality,
            min_cos_angle: if options.glancing_angle_enabled() {
                options.max_glancing_angle_degrees.to_radians().cos()
            } else {
                0.0
            },
            raycast_tolerance: options.raycast_tolerance,
            prefer_color: options.prefer_color,
            prefer_nonlinear: options.prefer_nonlinear,
            atlas_pixels_per_meter: f64::from(options.atlas_resolution) / diagonal,
        }
    }
}

/// Score and validate one candidate observation for a surface point.
///
/// Rejections are silent: outside the image, masked, grazing incidence,
/// or occluded between the point and the camera.
#[must_use]
pub fn evaluate(
    ctx: &CandidateContext,
    point: DVec3,
    normal: DVec3,
    caster: &SceneCaster,
    params: &ScoringParams,
) -> Option<Candidate> {
    let p_cam = ctx.mesh_to_cam.transform_point3(point);
    let pixel = ctx.camera.project(p_cam)?;
    let col = pixel.x.round();
    let row = pixel.y.round();
    if row < 0.0 || col < 0.0 || row >= f64::from(ctx.height) || col >= f64::from(ctx.width) {
        return None;
    }
    let (row, col) = (row as u32, col as u32);
    if !ctx.image.is_valid(row, col) {
        return None;
    }

    // View ray through the chosen pixel, in the mesh frame.
    let ray_cam = ctx.camera.unproject(pixel);
    let eye = ctx.cam_to_mesh.transform_point3(ray_cam.origin);
    let view_dir = ctx.cam_to_mesh.transform_vector3(ray_cam.dir).normalize();

    let cos_angle = normal.dot(-view_dir);
    if cos_angle <= params.min_cos_angle.max(0.0) {
        return None;
    }

    // Reject when the nearest non-self occluder lies before the camera.
    if caster.occluded(point, eye, params.raycast_tolerance) {
        return None;
    }

    let resolution_ratio =
        (ctx.camera.pixels_per_meter(p_cam) / params.atlas_pixels_per_meter).min(1.0);
    Some(Candidate {
        obs_id: ctx.obs_id,
        row,
        col,
        score: cos_angle * resolution_ratio,
        variant: ctx.variant,
        is_color: ctx.is_color,
        is_linear: ctx.is_linear,
        is_orbital: ctx.is_orbital,
    })
}

/// Whether `a` beats `b` under the selection tie-break rules.
#[must_use]
pub fn better(a: &Candidate, b: &Candidate, params: &ScoringParams) -> bool {
    // Surface strictly beats orbital.
    if a.is_orbital != b.is_orbital {
        return b.is_orbital;
    }
    if params.prefer_color == PreferColor::Always && a.is_color != b.is_color {
        return a.is_color;
    }
    if (a.score - b.score).abs() < SCORE_EPSILON {
        if params.prefer_color == PreferColor::EquivalentScores && a.is_color != b.is_color {
            return a.is_color;
        }
        if params.prefer_nonlinear && a.is_linear != b.is_linear {
            return b.is_linear;
        }
    }
    a.score > b.score
}

/// A selection strategy, initialized once and shared by all workers.
#[derive(Debug)]
pub enum Strategy {
    /// Score every candidate, take the argmax.
    Exhaustive { contexts: Vec<CandidateContext> },
    /// Coarse spatial grid; the first candidate scoring at or above
    /// `quality` wins, trading optimality for compute.
    Spatial {
        contexts: Vec<CandidateContext>,
        bounds: Aabb,
        cell_size: DVec3,
        /// Per-cell candidate context indices, row-major x→y→z.
        cells: Vec<SmallVec<[u16; 8]>>,
    },
}

impl Strategy {
    /// Build a strategy over per-observation contexts.
    pub fn initialize(
        kind: ObsSelectionStrategy,
        contexts: Vec<CandidateContext>,
        scene_bounds: &Aabb,
    ) -> Result<Self> {
        if contexts.is_empty() {
            return Err(RegolithError::MissingPrerequisite(
                "no candidate observations for backproject".into(),
            ));
        }
        match kind {
            ObsSelectionStrategy::Exhaustive => Ok(Self::Exhaustive { contexts }),
            ObsSelectionStrategy::Spatial => {
                let bounds = scene_bounds.inflate(1e-3);
                let cell_size = bounds.size() / f64::from(GRID_CELLS);
                let n = (GRID_CELLS * GRID_CELLS * GRID_CELLS) as usize;
                let mut cells = vec![SmallVec::<[u16; 8]>::new(); n];
                for (ctx_idx, ctx) in contexts.iter().enumerate() {
                    for (cell_idx, cell_bounds) in CellIter::new(&bounds, cell_size) {
                        if ctx.hull.intersects_aabb(&cell_bounds) {
                            cells[cell_idx].push(ctx_idx as u16);
                        }
                    }
                }
                Ok(Self::Spatial {
                    contexts,
                    bounds,
                    cell_size,
                    cells,
                })
            }
        }
    }

    #[must_use]
    pub fn contexts(&self) -> &[CandidateContext] {
        match self {
            Self::Exhaustive { contexts } | Self::Spatial { contexts, .. } => contexts,
        }
    }

    /// Pick the winning candidate for a surface point, or `None`.
    #[must_use]
    pub fn select(
        &self,
        point: DVec3,
        normal: DVec3,
        caster: &SceneCaster,
        params: &ScoringParams,
    ) -> Option<Candidate> {
        match self {
            Self::Exhaustive { contexts } => {
                let mut best: Option<Candidate> = None;
                for ctx in contexts {
                    if !ctx.hull.contains(point) {
                        continue;
                    }
                    if let Some(candidate) = evaluate(ctx, point, normal, caster, params)
                        && best.as_ref().is_none_or(|b| better(&candidate, b, params))
                    {
                        best = Some(candidate);
                    }
                }
                best
            }
            Self::Spatial {
                contexts,
                bounds,
                cell_size,
                cells,
            } => {
                let cell = cell_of(bounds, *cell_size, point)?;
                let mut best: Option<Candidate> = None;
                for ctx_idx in &cells[cell] {
                    let ctx = &contexts[*ctx_idx as usize];
                    if !ctx.hull.contains(point) {
                        continue;
                    }
                    if let Some(candidate) = evaluate(ctx, point, normal, caster, params) {
                        // Early accept: good-enough surface candidates end
                        // the cell scan.
                        if !candidate.is_orbital && candidate.score >= params.quality {
                            return Some(candidate);
                        }
                        if best.as_ref().is_none_or(|b| better(&candidate, b, params)) {
                            best = Some(candidate);
                        }
                    }
                }
                best
            }
        }
    }
}

fn cell_of(bounds: &Aabb, cell_size: DVec3, point: DVec3) -> Option<usize> {
    if !bounds.contains(point) {
        return None;
    }
    let rel = point - bounds.min;
    let clamp = |v: f64, size: f64| ((v / size.max(1e-12)) as u32).min(GRID_CELLS - 1);
    let (x, y, z) = (
        clamp(rel.x, cell_size.x),
        clamp(rel.y, cell_size.y),
        clamp(rel.z, cell_size.z),
    );
    Some(((z * GRID_CELLS + y) * GRID_CELLS + x) as usize)
}

/// Iterate every grid cell with its bounds.
struct CellIter {
    min: DVec3,
    cell_size: DVec3,
    next: u32,
}

impl CellIter {
    fn new(bounds: &Aabb, cell_size: DVec3) -> Self {
        Self {
            min: bounds.min,
            cell_size,
            next: 0,
        }
    }
}

impl Iterator for CellIter {
    type Item = (usize, Aabb);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= GRID_CELLS * GRID_CELLS * GRID_CELLS {
            return None;
        }
        let i = self.next;
        self.next += 1;
        let x = i % GRID_CELLS;
        let y = (i / GRID_CELLS) % GRID_CELLS;
        let z = i / (GRID_CELLS * GRID_CELLS);
        let lo = self.min
            + DVec3::new(
                f64::from(x) * self.cell_size.x,
                f64::from(y) * self.cell_size.y,
                f64::from(z) * self.cell_size.z,
            );
        Some((
            i as usize,
            Aabb {
                min: lo,
                max: lo + self.cell_size,
            },
        ))
    }
}

/// Build candidate contexts for every eligible observation.
///
/// Surface images need a mask-carrying texture variant and a known frame;
/// the orbital basemap joins unless disabled. `only_aligned` drops
/// observations whose frames have no adjusted transform.
pub fn build_contexts(
    set: &ObservationSet,
    frames: &FrameCache,
    store: &dyn ProductStore,
    cache: &LruImageCache,
    options: &TexturingOptions,
    scene_bounds: &Aabb,
) -> Result<Vec<CandidateContext>> {
    let mut contexts = Vec::new();
    for obs in set.iter() {
        let eligible = match obs.kind {
            ObservationKind::SurfaceImage => true,
            ObservationKind::OrbitalImage => !options.no_orbital,
            ObservationKind::SurfaceMask | ObservationKind::OrbitalDem => false,
        };
        if !eligible {
            continue;
        }
        if options.only_aligned && !frames.is_aligned(&obs.frame_name) {
            log::debug!("skipping unaligned observation {}", obs.id);
            continue;
        }
        let cam_to_mesh = frames.transform_for(&obs.frame_name, options.use_priors)?;
        let variant = backproject_variant(obs);
        let (variant, image_id) = match obs.texture_id(variant) {
            Some(id) => (variant, id),
            None => obs.best_texture_id(variant),
        };
        let image = store::fetch_raster(store, cache, image_id, options.disable_image_cache)?;
        let hull = if obs.is_orbital() {
            // The basemap sees the whole scene from above.
            ConvexHull::from_aabb(&scene_bounds.inflate(1.0))
        } else {
            hull::frustum_hull(
                obs.camera.as_ref(),
                obs.width,
                obs.height,
                cam_to_mesh,
                options.texture_far_clip,
                scene_bounds,
            )?
        };
        contexts.push(CandidateContext {
            obs_id: obs.id,
            camera: Arc::clone(&obs.camera),
            cam_to_mesh,
            mesh_to_cam: cam_to_mesh.inverse(),
            hull,
            image,
            variant,
            width: obs.width,
            height: obs.height,
            is_color: obs.is_color(),
            is_linear: obs.is_linear,
            is_orbital: obs.is_orbital(),
        });
    }
    Ok(contexts)
}
