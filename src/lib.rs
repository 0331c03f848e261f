#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

//! Seamless texture atlas generation for planetary surface mesh
//! reconstructions.
//!
//! Given a scene mesh (or LOD pyramid), a set of calibrated camera
//! observations, and optionally an orbital basemap, the pipeline:
//!
//! 1. prepares each observation (mask, stretch, stats, blur),
//! 2. builds per-observation frustum hulls in mesh space,
//! 3. backprojects every atlas texel to its best source observation,
//! 4. stitches the piecewise atlas seamlessly with a multigrid
//!    gradient-domain solver,
//! 5. propagates the stitched corrections back to per-observation
//!    blended images, and
//! 6. re-renders leaf tile textures from the blended observations.

pub mod backproject;
pub mod blend;
pub mod config;
pub mod errors;
pub mod frames;
pub mod geometry;
pub mod observation;
pub mod pipeline;
pub mod raster;
pub mod stitch;
pub mod store;

pub use backproject::index::IndexImage;
pub use config::{EdgeBehavior, ObsSelectionStrategy, PreferColor, StretchMode, TexturingOptions};
pub use errors::{RegolithError, Result};
pub use frames::FrameCache;
pub use geometry::{
    Aabb, CameraModel, ConvexHull, FaceMap, LodPyramid, OrthographicCamera, PinholeCamera,
    SceneCaster, TriMesh,
};
pub use observation::{
    MIN_INDEX, NO_OBSERVATION, ORBITAL_DEM_INDEX, ORBITAL_IMAGE_INDEX, Observation,
    ObservationKind, ObservationSet, TextureVariant,
};
pub use pipeline::{CancelFlag, PipelineSummary, SceneRecord, TexturingPipeline};
pub use raster::Raster;
pub use store::{DataProduct, MemoryProductStore, ProductStore};
