//! Camera Models
//!
//! The pipeline requires two operations of a camera-model library:
//! unproject a pixel to a ray, and project a 3D point to a pixel. Both
//! work in the observation's own frame; the frame cache supplies the
//! transform into the mesh frame.
//!
//! Pixel coordinates are (col, row) with the origin at the top-left pixel
//! center, +col right, +row down. The camera looks along +Z.

use glam::{DVec2, DVec3};
use std::fmt;

/// A ray with unit direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: DVec3,
    pub dir: DVec3,
}

impl Ray {
    #[must_use]
    pub fn new(origin: DVec3, dir: DVec3) -> Self {
        Self {
            origin,
            dir: dir.normalize(),
        }
    }

    #[must_use]
    pub fn at(&self, t: f64) -> DVec3 {
        self.origin + self.dir * t
    }
}

/// The camera-model contract required by the pipeline.
pub trait CameraModel: fmt::Debug + Send + Sync {
    /// Ray through a pixel center, in the observation frame.
    fn unproject(&self, pixel: DVec2) -> Ray;

    /// Pixel of a 3D point in the observation frame, or `None` when the
    /// point does not image (e.g. behind a perspective camera). The
    /// result may lie outside the sensor bounds.
    fn project(&self, point: DVec3) -> Option<DVec2>;

    /// Approximate pixels-per-meter at a point in the observation frame.
    /// Feeds the backproject resolution score.
    fn pixels_per_meter(&self, point: DVec3) -> f64;
}

/// Ideal pinhole camera at the origin of its frame, looking along +Z.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinholeCamera {
    pub width: u32,
    pub height: u32,
    /// Focal length in pixels.
    pub focal_px: f64,
    /// Principal point (col, row).
    pub principal: DVec2,
}

impl PinholeCamera {
    /// A camera with the principal point at the sensor center.
    #[must_use]
    pub fn centered(width: u32, height: u32, focal_px: f64) -> Self {
        Self {
            width,
            height,
            focal_px,
            principal: DVec2::new(f64::from(width) * 0.5 - 0.5, f64::from(height) * 0.5 - 0.5),
        }
    }
}

impl CameraModel for PinholeCamera {
    fn unproject(&self, pixel: DVec2) -> Ray {
        let dir = DVec3::new(
            (pixel.x - self.principal.x) / self.focal_px,
            (pixel.y - self.principal.y) / self.focal_px,
            1.0,
        );
        Ray::new(DVec3::ZERO, dir)
    }

    fn project(&self, point: DVec3) -> Option<DVec2> {
        if point.z <= 1e-9 {
            return None;
        }
        Some(DVec2::new(
            self.focal_px * point.x / point.z + self.principal.x,
            self.focal_px * point.y / point.z + self.principal.y,
        ))
    }

    fn pixels_per_meter(&self, point: DVec3) -> f64 {
        let range = point.length().max(1e-9);
        self.focal_px / range
    }
}

/// Orthographic nadir camera for the orbital basemap.
///
/// The observation frame equals the mesh frame; pixel (0,0) maps to
/// `origin`, +col along +X, +row along +Y, looking straight down from
/// above the scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrthographicCamera {
    pub width: u32,
    pub height: u32,
    pub meters_per_pixel: f64,
    /// Mesh-frame (x, y) of pixel (col 0, row 0).
    pub origin: DVec2,
    /// Height of the virtual eye above the scene.
    pub eye_height: f64,
}

impl CameraModel for OrthographicCamera {
    fn unproject(&self, pixel: DVec2) -> Ray {
        let x = self.origin.x + pixel.x * self.meters_per_pixel;
        let y = self.origin.y + pixel.y * self.meters_per_pixel;
        Ray::new(DVec3::new(x, y, self.eye_height), -DVec3::Z)
    }

    fn project(&self, point: DVec3) -> Option<DVec2> {
        Some(DVec2::new(
            (point.x - self.origin.x) / self.meters_per_pixel,
            (point.y - self.origin.y) / self.meters_per_pixel,
        ))
    }

    fn pixels_per_meter(&self, _point: DVec3) -> f64 {
        1.0 / self.meters_per_pixel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinhole_project_unproject() {
        let cam = PinholeCamera::centered(128, 128, 100.0);
        let pixel = DVec2::new(40.0, 90.0);
        let ray = cam.unproject(pixel);
        let point = ray.at(5.0);
        let back = cam.project(point).unwrap();
        assert!((back - pixel).length() < 1e-9);
    }

    #[test]
    fn pinhole_rejects_behind() {
        let cam = PinholeCamera::centered(64, 64, 50.0);
        assert!(cam.project(DVec3::new(0.0, 0.0, -1.0)).is_none());
    }

    #[test]
    fn ortho_maps_origin() {
        let cam = OrthographicCamera {
            width: 32,
            height: 32,
            meters_per_pixel: 0.5,
            origin: DVec2::new(-8.0, -8.0),
            eye_height: 100.0,
        };
        let px = cam.project(DVec3::new(-8.0, -8.0, 0.0)).unwrap();
        assert!(px.length() < 1e-9);
        let ray = cam.unproject(DVec2::new(16.0, 16.0));
        assert!((ray.origin.x - 0.0).abs() < 1e-9);
        assert!(ray.dir.z < 0.0);
    }
}
