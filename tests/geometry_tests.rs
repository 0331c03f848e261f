//! Geometry and BoundingBox Tests
//!
//! Tests for:
//! - Aabb center, size, union, inflate
//! - TriMesh validation, bounds, normal orientation
//! - LOD pyramid ordering invariants
//! - Scene caster ray queries and occlusion with tolerance
//! - Frustum hull conservative containment
//! - Atlas face map coverage and barycentric lookup

use glam::{DMat4, DVec2, DVec3};

use regolith::geometry::camera::Ray;
use regolith::geometry::hull::frustum_hull;
use regolith::{
    Aabb, CameraModel, ConvexHull, FaceMap, LodPyramid, PinholeCamera, SceneCaster, TriMesh,
};

const EPSILON: f64 = 1e-9;

fn vec3_approx(a: DVec3, b: DVec3) -> bool {
    (a - b).length() < 1e-6
}

// ============================================================================
// Aabb
// ============================================================================

#[test]
fn bbox_center_and_size() {
    let bb = Aabb {
        min: DVec3::new(-1.0, -2.0, -3.0),
        max: DVec3::new(1.0, 2.0, 3.0),
    };
    assert!(vec3_approx(bb.center(), DVec3::ZERO));
    assert!(vec3_approx(bb.size(), DVec3::new(2.0, 4.0, 6.0)));
}

#[test]
fn bbox_union() {
    let a = Aabb {
        min: DVec3::splat(-1.0),
        max: DVec3::splat(1.0),
    };
    let b = Aabb {
        min: DVec3::ZERO,
        max: DVec3::splat(3.0),
    };
    let u = a.union(&b);
    assert!(vec3_approx(u.min, DVec3::splat(-1.0)));
    assert!(vec3_approx(u.max, DVec3::splat(3.0)));
}

#[test]
fn bbox_inflate_and_contains() {
    let bb = Aabb {
        min: DVec3::ZERO,
        max: DVec3::ONE,
    };
    let grown = bb.inflate(0.5);
    assert!(grown.contains(DVec3::splat(-0.25)));
    assert!(!grown.contains(DVec3::splat(2.0)));
    assert!(Aabb::empty().is_empty());
}

// ============================================================================
// TriMesh / LodPyramid
// ============================================================================

#[test]
fn mesh_bounds_cover_vertices() {
    let mesh = TriMesh::uv_quad(4.0);
    let bounds = mesh.bounds();
    assert!(vec3_approx(bounds.min, DVec3::new(-2.0, -2.0, 0.0)));
    assert!(vec3_approx(bounds.max, DVec3::new(2.0, 2.0, 0.0)));
}

#[test]
fn surface_normal_follows_sky() {
    let mesh = TriMesh::uv_quad(2.0);
    let bary = DVec3::new(0.4, 0.3, 0.3);
    let (_, up) = mesh.surface_point(0, bary, DVec3::Z);
    let (_, down) = mesh.surface_point(0, bary, -DVec3::Z);
    assert!(up.z > 0.99);
    assert!(down.z < -0.99);
}

#[test]
fn lod_pyramid_orders_finest_first() {
    let fine = TriMesh::uv_quad(1.0);
    let coarse = TriMesh {
        faces: vec![[0, 1, 2]],
        ..fine.clone()
    };
    let pyramid = LodPyramid::new(vec![fine.clone(), coarse.clone()]).unwrap();
    assert_eq!(pyramid.finest().faces.len(), 2);
    // Coarse-first is rejected.
    assert!(LodPyramid::new(vec![coarse, fine]).is_err());
    assert!(LodPyramid::new(vec![]).is_err());
}

// ============================================================================
// Scene caster
// ============================================================================

#[test]
fn caster_returns_nearest_hit() {
    // Two stacked quads; a downward ray must report the upper one.
    let mut mesh = TriMesh::uv_quad(2.0);
    let upper = TriMesh::uv_quad(2.0);
    let base = mesh.positions.len() as u32;
    for p in &upper.positions {
        mesh.positions.push(DVec3::new(p.x, p.y, 1.0));
    }
    for f in &upper.faces {
        mesh.faces.push([f[0] + base, f[1] + base, f[2] + base]);
    }
    mesh.uvs = None;
    let caster = SceneCaster::build(&mesh).unwrap();
    let hit = caster
        .raycast(&Ray::new(DVec3::new(0.2, 0.2, 5.0), -DVec3::Z), 0.0)
        .unwrap();
    assert!((hit.t - 4.0).abs() < EPSILON, "t = {}", hit.t);
    assert!((hit.point.z - 1.0).abs() < EPSILON);
}

#[test]
fn raycast_tolerance_ignores_near_crossings() {
    let caster = SceneCaster::build(&TriMesh::uv_quad(2.0)).unwrap();
    let ray = Ray::new(DVec3::new(0.1, 0.1, 1e-5), -DVec3::Z);
    // The surface 1e-5 below the origin is within tolerance.
    assert!(caster.raycast(&ray, 1e-3).is_none());
    assert!(caster.raycast(&ray, 0.0).is_some());
}

#[test]
fn occlusion_respects_segment_ends() {
    let mut blocker = TriMesh::uv_quad(4.0);
    for p in &mut blocker.positions {
        p.z = 2.0;
    }
    let caster = SceneCaster::build(&blocker).unwrap();
    let ground = DVec3::new(0.0, 0.0, 0.0);
    // Segment crossing the blocker plane is occluded.
    assert!(caster.occluded(ground, DVec3::new(0.0, 0.0, 6.0), 1e-3));
    // Segment ending exactly on the blocker is not (self hit at the end).
    assert!(!caster.occluded(ground, DVec3::new(0.0, 0.0, 2.0), 1e-3));
}

// ============================================================================
// Frustum hull
// ============================================================================

#[test]
fn frustum_hull_is_conservative_for_visible_points() {
    let cam = PinholeCamera::centered(128, 128, 64.0);
    let bounds = Aabb {
        min: DVec3::splat(-50.0),
        max: DVec3::splat(50.0),
    };
    let hull = frustum_hull(&cam, 128, 128, DMat4::IDENTITY, 40.0, &bounds).unwrap();
    // Every point the camera actually images within the far clip must be
    // inside the hull (no false negatives).
    for row in (4..124).step_by(20) {
        for col in (4..124).step_by(20) {
            for t in [0.5, 5.0, 20.0, 39.0] {
                let ray = cam.unproject(DVec2::new(f64::from(col), f64::from(row)));
                let p = ray.at(t);
                assert!(hull.contains(p), "pixel ({row},{col}) t={t}");
            }
        }
    }
    assert!(!hull.contains(DVec3::new(0.0, 0.0, 60.0)), "beyond far clip");
    assert!(!hull.contains(DVec3::new(0.0, 0.0, -1.0)), "behind apex");
}

#[test]
fn aabb_hull_matches_box() {
    let bb = Aabb {
        min: DVec3::ZERO,
        max: DVec3::new(4.0, 2.0, 1.0),
    };
    let hull = ConvexHull::from_aabb(&bb);
    assert!(hull.contains(DVec3::new(2.0, 1.0, 0.5)));
    assert!(!hull.contains(DVec3::new(5.0, 1.0, 0.5)));
    assert!(hull.intersects_aabb(&bb));
}

// ============================================================================
// Face map
// ============================================================================

#[test]
fn facemap_positions_span_quad() {
    let mesh = TriMesh::uv_quad(2.0);
    let map = FaceMap::build(&mesh, 32).unwrap();
    assert_eq!(map.mapped_count(), 32 * 32);

    let (face_a, bary_a) = map.lookup(&mesh, 0, 0).unwrap();
    let (pa, _) = mesh.surface_point(face_a, bary_a, DVec3::Z);
    let (face_b, bary_b) = map.lookup(&mesh, 31, 31).unwrap();
    let (pb, _) = mesh.surface_point(face_b, bary_b, DVec3::Z);
    // Texel (0,0) sits near uv (0,0) → (-1,-1); texel (31,31) near (1,1).
    assert!((pa - DVec3::new(-0.96875, -0.96875, 0.0)).length() < 1e-6);
    assert!((pb - DVec3::new(0.96875, 0.96875, 0.0)).length() < 1e-6);
}

#[test]
fn facemap_leaves_uncovered_texels_unmapped() {
    let mut mesh = TriMesh::uv_quad(2.0);
    // Shrink UVs to the lower-left quadrant.
    if let Some(uvs) = &mut mesh.uvs {
        for uv in uvs.iter_mut() {
            *uv *= 0.5;
        }
    }
    let map = FaceMap::build(&mesh, 32).unwrap();
    assert!(map.mapped_count() <= 16 * 16 + 32);
    assert!(map.face_at(31, 31).is_none());
    assert!(map.face_at(4, 4).is_some());
}
