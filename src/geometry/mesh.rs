//! Triangle Meshes and LOD Pyramids

use glam::{DVec2, DVec3};

use crate::errors::{RegolithError, Result};

/// Axis-aligned bounding box in the mesh frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    /// An empty box that unions to identity.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            min: DVec3::splat(f64::INFINITY),
            max: DVec3::splat(f64::NEG_INFINITY),
        }
    }

    #[must_use]
    pub fn from_points(points: impl IntoIterator<Item = DVec3>) -> Self {
        let mut out = Self::empty();
        for p in points {
            out.expand(p);
        }
        out
    }

    pub fn expand(&mut self, p: DVec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    #[must_use]
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    #[must_use]
    pub fn center(&self) -> DVec3 {
        0.5 * (self.min + self.max)
    }

    #[must_use]
    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    /// Grow symmetrically by `amount` on every axis.
    #[must_use]
    pub fn inflate(&self, amount: f64) -> Aabb {
        Aabb {
            min: self.min - DVec3::splat(amount),
            max: self.max + DVec3::splat(amount),
        }
    }

    #[must_use]
    pub fn contains(&self, p: DVec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    /// The eight corner points.
    #[must_use]
    pub fn corners(&self) -> [DVec3; 8] {
        let (lo, hi) = (self.min, self.max);
        [
            DVec3::new(lo.x, lo.y, lo.z),
            DVec3::new(hi.x, lo.y, lo.z),
            DVec3::new(lo.x, hi.y, lo.z),
            DVec3::new(hi.x, hi.y, lo.z),
            DVec3::new(lo.x, lo.y, hi.z),
            DVec3::new(hi.x, lo.y, hi.z),
            DVec3::new(lo.x, hi.y, hi.z),
            DVec3::new(hi.x, hi.y, hi.z),
        ]
    }
}

/// An indexed triangle mesh in the mesh frame.
///
/// Normals and UVs are optional; backproject requires UVs on the finest
/// LOD (meshes without UVs must go through camera-projection UV
/// generation upstream).
#[derive(Debug, Clone, PartialEq)]
pub struct TriMesh {
    pub positions: Vec<DVec3>,
    pub faces: Vec<[u32; 3]>,
    pub normals: Option<Vec<DVec3>>,
    pub uvs: Option<Vec<DVec2>>,
}

impl TriMesh {
    pub fn new(positions: Vec<DVec3>, faces: Vec<[u32; 3]>) -> Result<Self> {
        let mesh = Self {
            positions,
            faces,
            normals: None,
            uvs: None,
        };
        mesh.validate()?;
        Ok(mesh)
    }

    pub fn validate(&self) -> Result<()> {
        if self.positions.is_empty() || self.faces.is_empty() {
            return Err(RegolithError::Mesh("mesh is empty".into()));
        }
        let n = self.positions.len() as u32;
        for face in &self.faces {
            if face.iter().any(|i| *i >= n) {
                return Err(RegolithError::Mesh(format!(
                    "face index out of bounds: {face:?} with {n} vertices"
                )));
            }
        }
        if let Some(normals) = &self.normals
            && normals.len() != self.positions.len()
        {
            return Err(RegolithError::Mesh("normal count != vertex count".into()));
        }
        if let Some(uvs) = &self.uvs
            && uvs.len() != self.positions.len()
        {
            return Err(RegolithError::Mesh("uv count != vertex count".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn has_uvs(&self) -> bool {
        self.uvs.is_some()
    }

    #[must_use]
    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(self.positions.iter().copied())
    }

    /// The three vertex positions of a face.
    #[must_use]
    pub fn face_positions(&self, face: u32) -> [DVec3; 3] {
        let [a, b, c] = self.faces[face as usize];
        [
            self.positions[a as usize],
            self.positions[b as usize],
            self.positions[c as usize],
        ]
    }

    /// Unit geometric normal of a face. Degenerate faces yield zero.
    #[must_use]
    pub fn face_normal(&self, face: u32) -> DVec3 {
        let [a, b, c] = self.face_positions(face);
        let n = (b - a).cross(c - a);
        let len = n.length();
        if len > 1e-12 { n / len } else { DVec3::ZERO }
    }

    /// Surface point and normal at a barycentric location on a face.
    ///
    /// Vertex normals are interpolated when present; the result is
    /// oriented toward `sky` (face-winding sign is not trusted).
    #[must_use]
    pub fn surface_point(&self, face: u32, bary: DVec3, sky: DVec3) -> (DVec3, DVec3) {
        let [pa, pb, pc] = self.face_positions(face);
        let point = pa * bary.x + pb * bary.y + pc * bary.z;
        let mut normal = if let Some(normals) = &self.normals {
            let [a, b, c] = self.faces[face as usize];
            (normals[a as usize] * bary.x
                + normals[b as usize] * bary.y
                + normals[c as usize] * bary.z)
                .normalize_or_zero()
        } else {
            self.face_normal(face)
        };
        if normal.dot(sky) < 0.0 {
            normal = -normal;
        }
        (point, normal)
    }

    /// A unit quad in the XY plane at z = 0 with UVs spanning [0,1]².
    ///
    /// Scaled to `size` meters on each side, centered at the origin.
    /// Primarily synthetic-scene scaffolding for tests and benches.
    #[must_use]
    pub fn uv_quad(size: f64) -> TriMesh {
        let h = size * 0.5;
        TriMesh {
            positions: vec![
                DVec3::new(-h, -h, 0.0),
                DVec3::new(h, -h, 0.0),
                DVec3::new(h, h, 0.0),
                DVec3::new(-h, h, 0.0),
            ],
            faces: vec![[0, 1, 2], [0, 2, 3]],
            normals: None,
            uvs: Some(vec![
                DVec2::new(0.0, 0.0),
                DVec2::new(1.0, 0.0),
                DVec2::new(1.0, 1.0),
                DVec2::new(0.0, 1.0),
            ]),
        }
    }
}

/// An ordered sequence of LODs, finest first, strictly decreasing in face
/// count. Immutable after the scene caster is built on it.
#[derive(Debug, Clone)]
pub struct LodPyramid {
    lods: Vec<TriMesh>,
}

impl LodPyramid {
    pub fn new(lods: Vec<TriMesh>) -> Result<Self> {
        if lods.is_empty() {
            return Err(RegolithError::Mesh("LOD pyramid is empty".into()));
        }
        for lod in &lods {
            lod.validate()?;
        }
        for pair in lods.windows(2) {
            if pair[1].faces.len() >= pair[0].faces.len() {
                return Err(RegolithError::Mesh(
                    "LOD face counts must be strictly decreasing".into(),
                ));
            }
        }
        Ok(Self { lods })
    }

    /// The finest LOD (index 0).
    #[must_use]
    pub fn finest(&self) -> &TriMesh {
        &self.lods[0]
    }

    #[must_use]
    pub fn levels(&self) -> &[TriMesh] {
        &self.lods
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_validates() {
        TriMesh::uv_quad(2.0).validate().unwrap();
    }

    #[test]
    fn bad_face_index_rejected() {
        let mesh = TriMesh::new(vec![DVec3::ZERO, DVec3::X, DVec3::Y], vec![[0, 1, 3]]);
        assert!(mesh.is_err());
    }

    #[test]
    fn normal_oriented_toward_sky() {
        let mesh = TriMesh::uv_quad(1.0);
        let (_, n) = mesh.surface_point(0, DVec3::new(1.0, 0.0, 0.0), DVec3::Z);
        assert!(n.z > 0.99);
        let (_, n) = mesh.surface_point(0, DVec3::new(1.0, 0.0, 0.0), -DVec3::Z);
        assert!(n.z < -0.99);
    }

    #[test]
    fn pyramid_requires_decreasing_faces() {
        let fine = TriMesh::uv_quad(1.0);
        let coarse = TriMesh {
            faces: vec![[0, 1, 2]],
            ..fine.clone()
        };
        assert!(LodPyramid::new(vec![fine.clone(), coarse]).is_ok());
        assert!(LodPyramid::new(vec![fine.clone(), fine]).is_err());
    }
}
