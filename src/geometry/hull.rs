//! Frustum Hulls
//!
//! Convex hulls describing the textured sub-frustum of each observation in
//! mesh-space coordinates. Represented as a list of inward half-spaces;
//! the containment test carries an epsilon slack so it is conservative:
//! a point a ray lands on inside the true frustum never tests negative.

use glam::{DMat4, DVec2, DVec3};

use super::camera::CameraModel;
use super::mesh::Aabb;
use crate::errors::{RegolithError, Result};

/// Slack applied to every half-space test, meters.
const CONTAINS_EPSILON: f64 = 1e-6;

/// An inward-facing half-space: inside ⇔ `normal · x ≥ offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalfSpace {
    pub normal: DVec3,
    pub offset: f64,
}

impl HalfSpace {
    /// Half-space through `point` with inward normal `normal`.
    #[must_use]
    pub fn through(point: DVec3, normal: DVec3) -> Self {
        let normal = normal.normalize();
        Self {
            normal,
            offset: normal.dot(point),
        }
    }

    #[inline]
    #[must_use]
    pub fn signed_distance(&self, p: DVec3) -> f64 {
        self.normal.dot(p) - self.offset
    }
}

/// Convex polyhedron as an intersection of half-spaces.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvexHull {
    planes: Vec<HalfSpace>,
}

impl ConvexHull {
    #[must_use]
    pub fn from_planes(planes: Vec<HalfSpace>) -> Self {
        Self { planes }
    }

    /// The six inward faces of an axis-aligned box.
    #[must_use]
    pub fn from_aabb(aabb: &Aabb) -> Self {
        Self {
            planes: vec![
                HalfSpace::through(aabb.min, DVec3::X),
                HalfSpace::through(aabb.min, DVec3::Y),
                HalfSpace::through(aabb.min, DVec3::Z),
                HalfSpace::through(aabb.max, -DVec3::X),
                HalfSpace::through(aabb.max, -DVec3::Y),
                HalfSpace::through(aabb.max, -DVec3::Z),
            ],
        }
    }

    /// Conservative containment: no false negatives for points inside.
    #[must_use]
    pub fn contains(&self, p: DVec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.signed_distance(p) >= -CONTAINS_EPSILON)
    }

    /// Conservative hull/AABB overlap: `false` only when some plane has
    /// the whole box strictly outside.
    #[must_use]
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        let corners = aabb.corners();
        for plane in &self.planes {
            if corners
                .iter()
                .all(|c| plane.signed_distance(*c) < -CONTAINS_EPSILON)
            {
                return false;
            }
        }
        true
    }

    #[must_use]
    pub fn planes(&self) -> &[HalfSpace] {
        &self.planes
    }
}

/// Build the hull of a camera's textured sub-frustum in the mesh frame.
///
/// The frustum apex sits at the camera center; side planes pass through
/// the apex and adjacent sensor-corner rays; a far cap truncates at
/// `far_clip` meters; the (inflated) scene bounds close the hull.
pub fn frustum_hull(
    camera: &dyn CameraModel,
    width: u32,
    height: u32,
    cam_to_mesh: DMat4,
    far_clip: f64,
    scene_bounds: &Aabb,
) -> Result<ConvexHull> {
    if far_clip <= 0.0 {
        return Err(RegolithError::Config(format!(
            "far clip must be positive, got {far_clip}"
        )));
    }
    let apex = cam_to_mesh.transform_point3(DVec3::ZERO);
    let corners = [
        DVec2::new(0.0, 0.0),
        DVec2::new(f64::from(width) - 1.0, 0.0),
        DVec2::new(f64::from(width) - 1.0, f64::from(height) - 1.0),
        DVec2::new(0.0, f64::from(height) - 1.0),
    ];
    let dirs: Vec<DVec3> = corners
        .iter()
        .map(|c| {
            cam_to_mesh
                .transform_vector3(camera.unproject(*c).dir)
                .normalize()
        })
        .collect();
    let center_dir = (dirs.iter().copied().sum::<DVec3>()).normalize();

    let mut planes = Vec::with_capacity(11);
    for i in 0..4 {
        let a = dirs[i];
        let b = dirs[(i + 1) % 4];
        let mut normal = a.cross(b);
        if normal.length_squared() < 1e-18 {
            continue; // Degenerate edge.
        }
        if normal.dot(center_dir) < 0.0 {
            normal = -normal;
        }
        planes.push(HalfSpace::through(apex, normal));
    }
    // Far cap.
    planes.push(HalfSpace::through(apex + center_dir * far_clip, -center_dir));
    // Truncate to scene bounds, inflated so boundary hits stay inside.
    let bounds = scene_bounds.inflate(CONTAINS_EPSILON.max(1e-3));
    planes.extend_from_slice(ConvexHull::from_aabb(&bounds).planes());

    Ok(ConvexHull::from_planes(planes))
}
