//! Scene Geometry
//!
//! Mesh-frame geometry for the texturing pipeline: triangle meshes and
//! LOD pyramids, camera models, frustum hulls, the scene raycaster, and
//! the atlas UV face map. All mesh-frame math is `f64` (`glam` D-types);
//! color math stays `f32`.

pub mod camera;
pub mod facemap;
pub mod hull;
pub mod mesh;
pub mod raycast;

pub use camera::{CameraModel, OrthographicCamera, PinholeCamera, Ray};
pub use facemap::FaceMap;
pub use hull::ConvexHull;
pub use mesh::{Aabb, LodPyramid, TriMesh};
pub use raycast::{RayHit, SceneCaster};
