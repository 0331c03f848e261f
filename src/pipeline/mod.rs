//! Pipeline Orchestration
//!
//! Sequences the texturing stages in strict order — observation
//! preparation → frustum hulls → backproject → stitch → diff propagation
//! → leaf re-render — persisting stage outputs through the product store
//! before the next stage begins. Per-item failures are recovered inside
//! stages; configuration errors and missing prerequisites abort the run.
//!
//! The pipeline is non-cancelable inside a stage; a cancellation request
//! takes effect between stages.

pub mod pool;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backproject::{self, strategy};
use crate::blend::{self, leaf};
use crate::config::TexturingOptions;
use crate::errors::{RegolithError, Result};
use crate::frames::FrameCache;
use crate::geometry::{ConvexHull, FaceMap, LodPyramid, SceneCaster};
use crate::observation::ObservationSet;
use crate::observation::prep::{self, PrepPasses, PrepSummary};
use crate::stitch;
use crate::store::cache::LruImageCache;
use crate::store::{DataProduct, ProductStore};
use pool::WorkPool;

/// Default LRU image cache budget, bytes.
const DEFAULT_CACHE_BYTES: usize = 512 << 20;

/// Memory-pressure hooks.
pub mod memory {
    /// Hint that a large allocation was just released or is about to be
    /// made. Buffers are freed deterministically when dropped; the hook
    /// marks the pressure points for allocation tracing.
    pub fn check_garbage(label: &str) {
        log::trace!("check garbage: {label}");
    }
}

/// Cooperative cancellation, honored between stages only.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    fn gate(&self, stage: &'static str) -> Result<()> {
        if self.is_cancelled() {
            Err(RegolithError::Cancelled(stage))
        } else {
            Ok(())
        }
    }
}

/// Per-variant atlas texture ids.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtlasTextureIds {
    pub original: Option<Uuid>,
    pub stretched: Option<Uuid>,
    pub blurred: Option<Uuid>,
    pub blended: Option<Uuid>,
}

/// The persisted scene-mesh record rewritten between stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneRecord {
    pub mesh_id: Option<Uuid>,
    pub tile_list_id: Option<Uuid>,
    /// Extent of the textured surface, meters.
    pub surface_extent: f64,
    pub texture_ids: AtlasTextureIds,
    pub backproject_index_id: Option<Uuid>,
}

/// Aggregate outcome of a full run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub prep: PrepSummary,
    /// Texels with a source after backproject post-processing.
    pub backproject_texels: usize,
    pub blend: blend::BlendSummary,
    pub leaves: Option<leaf::LeafSummary>,
}

impl PipelineSummary {
    /// Total per-item failures across stages.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.prep.failures
            + self.blend.failures
            + self.leaves.map_or(0, |l| l.failures)
    }
}

/// The texturing pipeline.
///
/// Owns the shared resources every stage reads: the product store, frame
/// cache, LRU image cache, and the worker pool.
pub struct TexturingPipeline {
    options: TexturingOptions,
    store: Arc<dyn ProductStore>,
    frames: FrameCache,
    cache: LruImageCache,
    pool: WorkPool,
    cancel: CancelFlag,
    hulls: RwLock<FxHashMap<String, ConvexHull>>,
}

impl TexturingPipeline {
    /// Validate options and build the shared resources.
    pub fn new(options: TexturingOptions, store: Arc<dyn ProductStore>) -> Result<Self> {
        options.validate()?;
        let pool = WorkPool::new(options.max_threads)?;
        Ok(Self {
            options,
            store,
            frames: FrameCache::new(),
            cache: LruImageCache::new(DEFAULT_CACHE_BYTES),
            pool,
            cancel: CancelFlag::new(),
            hulls: RwLock::new(FxHashMap::default()),
        })
    }

    #[must_use]
    pub fn options(&self) -> &TexturingOptions {
        &self.options
    }

    #[must_use]
    pub fn frames(&self) -> &FrameCache {
        &self.frames
    }

    /// Mutable frame registration before a run.
    pub fn frames_mut(&mut self) -> &mut FrameCache {
        &mut self.frames
    }

    /// A handle for requesting cancellation between stages.
    #[must_use]
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// The frustum hull built for an observation, by name.
    #[must_use]
    pub fn hull_for(&self, name: &str) -> Option<ConvexHull> {
        self.hulls.read().get(name).cloned()
    }

    /// Run the full pipeline.
    ///
    /// `tiles` supplies the leaf directory and tile list for the final
    /// stage; without it the run ends after diff propagation.
    pub fn run(
        &self,
        scene: &mut SceneRecord,
        set: &mut ObservationSet,
        meshes: &LodPyramid,
        tiles: Option<(&Path, &[String])>,
    ) -> Result<PipelineSummary> {
        if set.is_empty() {
            return Err(RegolithError::MissingPrerequisite(
                "no observations ingested".into(),
            ));
        }
        let mut summary = PipelineSummary::default();

        // Stage 1: observation preparation.
        self.cancel.gate("preparation")?;
        summary.prep = prep::prepare_observations(
            &self.pool,
            self.store.as_ref(),
            &self.cache,
            &self.options,
            set,
            PrepPasses::all(),
            false,
        )?;
        memory::check_garbage("after preparation");

        // Stage 2: frustum hulls (built into the candidate contexts,
        // persisted by observation name).
        self.cancel.gate("hulls")?;
        let mesh = meshes.finest();
        let bounds = mesh.bounds();
        scene.surface_extent = bounds.size().length();
        let contexts = strategy::build_contexts(
            set,
            &self.frames,
            self.store.as_ref(),
            &self.cache,
            &self.options,
            &bounds,
        )?;
        {
            let mut hulls = self.hulls.write();
            hulls.clear();
            for ctx in &contexts {
                if let Some(obs) = set.get(ctx.obs_id) {
                    hulls.insert(obs.name.clone(), ctx.hull.clone());
                }
            }
        }

        // Stage 3: backproject.
        self.cancel.gate("backproject")?;
        let caster = SceneCaster::build(mesh)?;
        let facemap = FaceMap::build(mesh, self.options.atlas_resolution)?;
        let strat = strategy::Strategy::initialize(
            self.options.obs_selection_strategy,
            contexts,
            &bounds,
        )?;
        let result = backproject::backproject(
            &self.pool,
            &self.options,
            mesh,
            &facemap,
            &caster,
            &strat,
        )?;
        summary.backproject_texels = result.index.valid_count();
        scene.backproject_index_id = Some(
            self.store
                .save(DataProduct::FloatTiff(result.index.to_raster()))?,
        );
        scene.texture_ids.original = Some(
            self.store
                .save(DataProduct::Png(result.initial.clone()))?,
        );
        memory::check_garbage("after backproject");

        // Stage 4: stitch.
        self.cancel.gate("stitch")?;
        let flags = stitch::flags_from_index(&result.index);
        let owners = stitch::owners_from_index(&result.index);
        let stitched = stitch::stitch(&self.pool, &self.options, &result.initial, &flags, &owners)?;
        scene.texture_ids.blended = Some(self.store.save(DataProduct::Png(stitched.clone()))?);
        memory::check_garbage("after stitch");

        // Stage 5: diff propagation.
        self.cancel.gate("diff propagation")?;
        summary.blend = blend::propagate_diffs(
            &self.pool,
            &self.options,
            self.store.as_ref(),
            &self.cache,
            &self.frames,
            set,
            mesh,
            &result.index,
            &stitched,
        )?;
        memory::check_garbage("after diff propagation");

        // Stage 6: leaf re-render.
        if let Some((tiles_dir, leaves)) = tiles {
            self.cancel.gate("leaf re-render")?;
            summary.leaves = Some(leaf::render_leaves(
                &self.pool,
                &self.options,
                self.store.as_ref(),
                &self.cache,
                set,
                tiles_dir,
                leaves,
            )?);
        }

        log::info!(
            "pipeline complete: {} texels, {} item failures",
            summary.backproject_texels,
            summary.failures()
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryProductStore;

    #[test]
    fn invalid_options_rejected_at_construction() {
        let options = TexturingOptions {
            use_priors: true,
            only_aligned: true,
            ..Default::default()
        };
        let store = Arc::new(MemoryProductStore::new());
        assert!(TexturingPipeline::new(options, store).is_err());
    }

    #[test]
    fn cancelled_flag_stops_before_first_stage() {
        let store = Arc::new(MemoryProductStore::new());
        let pipeline = TexturingPipeline::new(TexturingOptions::default(), store).unwrap();
        pipeline.cancel_flag().cancel();
        let mut scene = SceneRecord::default();
        let mut set = ObservationSet::new();
        // Empty set errors first; cancellation is checked per stage on a
        // populated run, exercised in the integration tests.
        assert!(pipeline.run(&mut scene, &mut set, &dummy_pyramid(), None).is_err());
    }

    fn dummy_pyramid() -> LodPyramid {
        LodPyramid::new(vec![crate::geometry::TriMesh::uv_quad(1.0)]).unwrap()
    }
}
