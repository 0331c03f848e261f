//! Scene Raycaster
//!
//! Ray/triangle acceleration structure over the occlusion mesh. Built
//! once after mesh load and immutable thereafter; shared read-only by all
//! backproject workers.
//!
//! Queries return the nearest face crossing at parametric distance
//! ≥ `min_t`, which implements the pipeline's self-intersection tolerance.

use glam::DVec3;

use super::camera::Ray;
use super::mesh::{Aabb, TriMesh};
use crate::errors::{RegolithError, Result};

const LEAF_SIZE: usize = 8;

/// A ray/mesh intersection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// Parametric distance along the (unit) ray.
    pub t: f64,
    /// Face index in the occlusion mesh.
    pub face: u32,
    /// The hit point.
    pub point: DVec3,
}

#[derive(Debug, Clone)]
struct Node {
    bounds: Aabb,
    /// Leaf: range into `order`. Interior: `children` is set.
    start: u32,
    count: u32,
    children: Option<(u32, u32)>,
}

#[derive(Debug, Clone, Copy)]
struct Tri {
    a: DVec3,
    b: DVec3,
    c: DVec3,
    face: u32,
}

/// Median-split AABB tree over the triangles of one mesh.
#[derive(Debug)]
pub struct SceneCaster {
    nodes: Vec<Node>,
    tris: Vec<Tri>,
    order: Vec<u32>,
}

impl SceneCaster {
    /// Build the caster over an occlusion mesh (usually the finest LOD).
    pub fn build(mesh: &TriMesh) -> Result<Self> {
        mesh.validate()?;
        let tris: Vec<Tri> = (0..mesh.faces.len() as u32)
            .map(|face| {
                let [a, b, c] = mesh.face_positions(face);
                Tri { a, b, c, face }
            })
            .collect();
        if tris.is_empty() {
            return Err(RegolithError::Mesh("cannot build caster on empty mesh".into()));
        }
        let mut order: Vec<u32> = (0..tris.len() as u32).collect();
        let mut nodes = Vec::with_capacity(2 * tris.len() / LEAF_SIZE + 1);
        build_node(&tris, &mut order, 0, tris.len(), &mut nodes);
        Ok(Self { nodes, tris, order })
    }

    /// Nearest intersection with `hit.t ≥ min_t`.
    #[must_use]
    pub fn raycast(&self, ray: &Ray, min_t: f64) -> Option<RayHit> {
        let inv_dir = DVec3::new(1.0 / ray.dir.x, 1.0 / ray.dir.y, 1.0 / ray.dir.z);
        let mut best: Option<RayHit> = None;
        let mut stack = vec![0u32];
        while let Some(node_idx) = stack.pop() {
            let node = &self.nodes[node_idx as usize];
            let limit = best.map_or(f64::INFINITY, |h| h.t);
            if !slab_test(&node.bounds, ray.origin, inv_dir, limit) {
                continue;
            }
            if let Some((left, right)) = node.children {
                stack.push(left);
                stack.push(right);
                continue;
            }
            for i in node.start..node.start + node.count {
                let tri = &self.tris[self.order[i as usize] as usize];
                if let Some(t) = intersect_triangle(ray, tri)
                    && t >= min_t
                    && best.is_none_or(|h| t < h.t)
                {
                    best = Some(RayHit {
                        t,
                        face: tri.face,
                        point: ray.at(t),
                    });
                }
            }
        }
        best
    }

    /// Whether anything blocks the segment from `from` toward `to`,
    /// ignoring crossings within `tolerance` of either endpoint.
    #[must_use]
    pub fn occluded(&self, from: DVec3, to: DVec3, tolerance: f64) -> bool {
        let dist = from.distance(to);
        if dist <= 2.0 * tolerance {
            return false;
        }
        let ray = Ray::new(from, to - from);
        match self.raycast(&ray, tolerance) {
            Some(hit) => hit.t < dist - tolerance,
            None => false,
        }
    }

    #[must_use]
    pub fn bounds(&self) -> Aabb {
        self.nodes[0].bounds
    }
}

fn tri_bounds(tri: &Tri) -> Aabb {
    Aabb::from_points([tri.a, tri.b, tri.c])
}

fn tri_centroid(tri: &Tri) -> DVec3 {
    (tri.a + tri.b + tri.c) / 3.0
}

fn build_node(
    tris: &[Tri],
    order: &mut [u32],
    start: usize,
    count: usize,
    nodes: &mut Vec<Node>,
) -> u32 {
    let mut bounds = Aabb::empty();
    for i in &order[start..start + count] {
        bounds = bounds.union(&tri_bounds(&tris[*i as usize]));
    }
    let index = nodes.len() as u32;
    nodes.push(Node {
        bounds,
        start: start as u32,
        count: count as u32,
        children: None,
    });
    if count <= LEAF_SIZE {
        return index;
    }
    // Median split on the longest axis of the centroid extents.
    let size = bounds.size();
    let axis = if size.x >= size.y && size.x >= size.z {
        0
    } else if size.y >= size.z {
        1
    } else {
        2
    };
    let mid = start + count / 2;
    order[start..start + count].select_nth_unstable_by(count / 2, |l, r| {
        let cl = tri_centroid(&tris[*l as usize])[axis];
        let cr = tri_centroid(&tris[*r as usize])[axis];
        cl.total_cmp(&cr)
    });
    let left = build_node(tris, order, start, mid - start, nodes);
    let right = build_node(tris, order, mid, start + count - mid, nodes);
    nodes[index as usize].children = Some((left, right));
    index
}

/// Slab test against an AABB; `true` when the ray enters before `t_max`.
fn slab_test(bounds: &Aabb, origin: DVec3, inv_dir: DVec3, t_max: f64) -> bool {
    let t0 = (bounds.min - origin) * inv_dir;
    let t1 = (bounds.max - origin) * inv_dir;
    let t_near = t0.min(t1).max_element().max(0.0);
    let t_far = t0.max(t1).min_element();
    t_near <= t_far && t_near <= t_max
}

/// Möller–Trumbore, double precision, culling nothing.
fn intersect_triangle(ray: &Ray, tri: &Tri) -> Option<f64> {
    let e1 = tri.b - tri.a;
    let e2 = tri.c - tri.a;
    let p = ray.dir.cross(e2);
    let det = e1.dot(p);
    if det.abs() < 1e-14 {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = ray.origin - tri.a;
    let u = s.dot(p) * inv_det;
    if !(-1e-9..=1.0 + 1e-9).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = ray.dir.dot(q) * inv_det;
    if v < -1e-9 || u + v > 1.0 + 1e-9 {
        return None;
    }
    let t = e2.dot(q) * inv_det;
    (t > 0.0).then_some(t)
}
