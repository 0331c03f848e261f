//! Color Conversions
//!
//! RGB ↔ CIE-LAB used by the gradient-domain solver and the diff stage,
//! plus hue extraction for statistics and mono colorization.
//!
//! L* spans [0,100], the CIE-LAB domain; dividing by 100 yields the
//! normalized luminance used when diffing mono observations.

use glam::Vec3;

// D65 reference white.
const XN: f32 = 0.950_47;
const YN: f32 = 1.0;
const ZN: f32 = 1.088_83;

const LAB_DELTA: f32 = 6.0 / 29.0;

/// Rec. 709 luma of a linear RGB pixel.
#[inline]
#[must_use]
pub fn luminance(rgb: Vec3) -> f32 {
    0.2126 * rgb.x + 0.7152 * rgb.y + 0.0722 * rgb.z
}

#[inline]
fn lab_f(t: f32) -> f32 {
    if t > LAB_DELTA.powi(3) {
        t.cbrt()
    } else {
        t / (3.0 * LAB_DELTA * LAB_DELTA) + 4.0 / 29.0
    }
}

#[inline]
fn lab_f_inv(t: f32) -> f32 {
    if t > LAB_DELTA {
        t * t * t
    } else {
        3.0 * LAB_DELTA * LAB_DELTA * (t - 4.0 / 29.0)
    }
}

/// Linear RGB → CIE-LAB. Returns (L*, a*, b*) with L* in [0,100].
#[must_use]
pub fn rgb_to_lab(rgb: Vec3) -> Vec3 {
    let x = 0.4124 * rgb.x + 0.3576 * rgb.y + 0.1805 * rgb.z;
    let y = 0.2126 * rgb.x + 0.7152 * rgb.y + 0.0722 * rgb.z;
    let z = 0.0193 * rgb.x + 0.1192 * rgb.y + 0.9505 * rgb.z;

    let fx = lab_f(x / XN);
    let fy = lab_f(y / YN);
    let fz = lab_f(z / ZN);

    Vec3::new(116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz))
}

/// CIE-LAB → linear RGB. Out-of-gamut results are clamped to [0,1].
#[must_use]
pub fn lab_to_rgb(lab: Vec3) -> Vec3 {
    let fy = (lab.x + 16.0) / 116.0;
    let fx = fy + lab.y / 500.0;
    let fz = fy - lab.z / 200.0;

    let x = XN * lab_f_inv(fx);
    let y = YN * lab_f_inv(fy);
    let z = ZN * lab_f_inv(fz);

    let r = 3.2406 * x - 1.5372 * y - 0.4986 * z;
    let g = -0.9689 * x + 1.8758 * y + 0.0415 * z;
    let b = 0.0557 * x - 0.2040 * y + 1.0570 * z;

    Vec3::new(r.clamp(0.0, 1.0), g.clamp(0.0, 1.0), b.clamp(0.0, 1.0))
}

/// Hue angle of an RGB pixel in degrees [0,360), or `None` for achromatic
/// pixels (chroma below `min_chroma`).
#[must_use]
pub fn hue_degrees(rgb: Vec3, min_chroma: f32) -> Option<f32> {
    let max = rgb.max_element();
    let min = rgb.min_element();
    let chroma = max - min;
    if chroma < min_chroma {
        return None;
    }
    let hue = if max == rgb.x {
        60.0 * (((rgb.y - rgb.z) / chroma) % 6.0)
    } else if max == rgb.y {
        60.0 * ((rgb.z - rgb.x) / chroma + 2.0)
    } else {
        60.0 * ((rgb.x - rgb.y) / chroma + 4.0)
    };
    Some(if hue < 0.0 { hue + 360.0 } else { hue })
}

/// Colorize a luminance sample at the given hue (degrees) and saturation,
/// via HSL. Used to map mono observations to the scene median hue.
#[must_use]
pub fn colorize(luminance: f32, hue_degrees: f32, saturation: f32) -> Vec3 {
    let l = luminance.clamp(0.0, 1.0);
    let c = (1.0 - (2.0 * l - 1.0).abs()) * saturation.clamp(0.0, 1.0);
    let hp = (hue_degrees.rem_euclid(360.0)) / 60.0;
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r1, g1, b1) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = l - c / 2.0;
    Vec3::new(r1 + m, g1 + m, b1 + m)
}
