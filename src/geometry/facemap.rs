//! Atlas UV Face Map
//!
//! Maps every texel of the scene atlas to the mesh face whose UV triangle
//! covers it, with barycentric coordinates for interpolating positions
//! and normals. Built once from the finest LOD by rasterizing its UV
//! triangles at atlas resolution.

use glam::{DVec2, DVec3};

use super::mesh::TriMesh;
use crate::errors::{RegolithError, Result};

/// No face covers this texel.
const NO_FACE: i32 = -1;

/// Barycentric tolerance for texel-center coverage.
const COVERAGE_EPSILON: f64 = 1e-7;

/// Per-texel face index over a square atlas.
#[derive(Debug, Clone)]
pub struct FaceMap {
    resolution: u32,
    faces: Vec<i32>,
}

impl FaceMap {
    /// Rasterize the mesh's UV triangles at the given atlas resolution.
    ///
    /// Texel (row, col) samples UV ((col+0.5)/res, (row+0.5)/res). Where
    /// UV islands overlap, the lowest face index wins.
    pub fn build(mesh: &TriMesh, resolution: u32) -> Result<Self> {
        let Some(uvs) = &mesh.uvs else {
            return Err(RegolithError::Mesh(
                "face map requires a mesh with UVs".into(),
            ));
        };
        if resolution == 0 {
            return Err(RegolithError::Mesh("atlas resolution must be nonzero".into()));
        }
        let res = f64::from(resolution);
        let mut faces = vec![NO_FACE; (resolution * resolution) as usize];
        for (face_idx, face) in mesh.faces.iter().enumerate() {
            let tri = [
                uvs[face[0] as usize],
                uvs[face[1] as usize],
                uvs[face[2] as usize],
            ];
            // Texel bounding box of the UV triangle.
            let min_u = tri.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
            let max_u = tri.iter().map(|p| p.x).fold(f64::NEG_INFINITY, f64::max);
            let min_v = tri.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
            let max_v = tri.iter().map(|p| p.y).fold(f64::NEG_INFINITY, f64::max);
            let c0 = ((min_u * res - 0.5).floor().max(0.0)) as u32;
            let c1 = ((max_u * res + 0.5).ceil().min(res - 1.0)).max(0.0) as u32;
            let r0 = ((min_v * res - 0.5).floor().max(0.0)) as u32;
            let r1 = ((max_v * res + 0.5).ceil().min(res - 1.0)).max(0.0) as u32;
            for row in r0..=r1 {
                for col in c0..=c1 {
                    let i = (row * resolution + col) as usize;
                    if faces[i] != NO_FACE {
                        continue;
                    }
                    let uv = DVec2::new(
                        (f64::from(col) + 0.5) / res,
                        (f64::from(row) + 0.5) / res,
                    );
                    if barycentric(&tri, uv).is_some() {
                        faces[i] = face_idx as i32;
                    }
                }
            }
        }
        Ok(Self { resolution, faces })
    }

    #[must_use]
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// The face covering a texel, or `None` for unmapped texels.
    #[must_use]
    pub fn face_at(&self, row: u32, col: u32) -> Option<u32> {
        let f = self.faces[(row * self.resolution + col) as usize];
        (f != NO_FACE).then_some(f as u32)
    }

    /// Face and barycentric coordinates at a texel center.
    #[must_use]
    pub fn lookup(&self, mesh: &TriMesh, row: u32, col: u32) -> Option<(u32, DVec3)> {
        let face = self.face_at(row, col)?;
        let uvs = mesh.uvs.as_ref()?;
        let idx = mesh.faces[face as usize];
        let tri = [
            uvs[idx[0] as usize],
            uvs[idx[1] as usize],
            uvs[idx[2] as usize],
        ];
        let res = f64::from(self.resolution);
        let uv = DVec2::new(
            (f64::from(col) + 0.5) / res,
            (f64::from(row) + 0.5) / res,
        );
        // Clamp tiny negatives from the conservative rasterization.
        let bary = barycentric_unclamped(&tri, uv)?;
        let clamped = bary.max(DVec3::ZERO);
        let sum = clamped.x + clamped.y + clamped.z;
        (sum > 0.0).then(|| clamped / sum).map(|b| (face, b))
    }

    /// Number of mapped texels.
    #[must_use]
    pub fn mapped_count(&self) -> usize {
        self.faces.iter().filter(|f| **f != NO_FACE).count()
    }
}

/// Barycentric coordinates of `p` in the 2D triangle, if inside.
fn barycentric(tri: &[DVec2; 3], p: DVec2) -> Option<DVec3> {
    let bary = barycentric_unclamped(tri, p)?;
    (bary.x >= -COVERAGE_EPSILON && bary.y >= -COVERAGE_EPSILON && bary.z >= -COVERAGE_EPSILON)
        .then_some(bary)
}

fn barycentric_unclamped(tri: &[DVec2; 3], p: DVec2) -> Option<DVec3> {
    let v0 = tri[1] - tri[0];
    let v1 = tri[2] - tri[0];
    let v2 = p - tri[0];
    let denom = v0.x * v1.y - v1.x * v0.y;
    if denom.abs() < 1e-16 {
        return None; // Degenerate UV triangle.
    }
    let v = (v2.x * v1.y - v1.x * v2.y) / denom;
    let w = (v0.x * v2.y - v2.x * v0.y) / denom;
    Some(DVec3::new(1.0 - v - w, v, w))
}
