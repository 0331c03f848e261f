//! Data-Product Store
//!
//! Content store for everything the pipeline persists between stages,
//! addressed by opaque 128-bit ids ([`uuid::Uuid`]). The store contract
//! is `save(product) → id` / `get(id) → product`; stages never pass large
//! buffers directly, they hand off ids.
//!
//! Product encodings match the external formats: 8-bit PNG for masks and
//! derived images (validity carried in the alpha channel), three-band
//! float TIFF for the backproject index, JSON for statistics.

pub mod cache;

use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::errors::{RegolithError, Result};
use crate::geometry::TriMesh;
use crate::raster::Raster;
use crate::raster::stats::ImageStats;

/// A persistable pipeline product.
#[derive(Debug, Clone)]
pub enum DataProduct {
    /// 8-bit raster (masks, stretched, blurred, blended observations).
    Png(Raster),
    /// Three-band float raster (the backproject index).
    FloatTiff(Raster),
    /// Per-observation statistics.
    Stats(ImageStats),
    /// Compressed binary mesh.
    MeshBin(TriMesh),
}

/// The store contract used by the pipeline core.
pub trait ProductStore: Send + Sync {
    /// Persist a product, returning its opaque id.
    fn save(&self, product: DataProduct) -> Result<Uuid>;

    /// Fetch a product by id.
    fn get(&self, id: Uuid) -> Result<Arc<DataProduct>>;

    /// Whether the id resolves. Used to short-circuit completed passes.
    fn contains(&self, id: Uuid) -> bool;
}

/// Fetch a product and require it to be a raster kind.
pub fn get_raster(store: &dyn ProductStore, id: Uuid) -> Result<Arc<Raster>> {
    match &*store.get(id)? {
        DataProduct::Png(raster) | DataProduct::FloatTiff(raster) => {
            Ok(Arc::new(raster.clone()))
        }
        _ => Err(RegolithError::ProductKindMismatch {
            id,
            expected: "raster",
        }),
    }
}

/// Fetch a raster through the shared LRU cache.
pub fn fetch_raster(
    store: &dyn ProductStore,
    cache: &cache::LruImageCache,
    id: Uuid,
    no_cache: bool,
) -> Result<Arc<Raster>> {
    cache.get_or_load(id, no_cache, || match &*store.get(id)? {
        DataProduct::Png(raster) | DataProduct::FloatTiff(raster) => Ok(raster.clone()),
        _ => Err(RegolithError::ProductKindMismatch {
            id,
            expected: "raster",
        }),
    })
}

/// Fetch a product and require it to be statistics.
pub fn get_stats(store: &dyn ProductStore, id: Uuid) -> Result<ImageStats> {
    match &*store.get(id)? {
        DataProduct::Stats(stats) => Ok(*stats),
        _ => Err(RegolithError::ProductKindMismatch {
            id,
            expected: "stats",
        }),
    }
}

/// In-memory product store.
///
/// Products are kept behind `Arc` so concurrent readers share one copy.
#[derive(Debug, Default)]
pub struct MemoryProductStore {
    products: RwLock<FxHashMap<Uuid, Arc<DataProduct>>>,
}

impl MemoryProductStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.products.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProductStore for MemoryProductStore {
    fn save(&self, product: DataProduct) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.products.write().insert(id, Arc::new(product));
        Ok(id)
    }

    fn get(&self, id: Uuid) -> Result<Arc<DataProduct>> {
        self.products
            .read()
            .get(&id)
            .cloned()
            .ok_or(RegolithError::ProductNotFound(id))
    }

    fn contains(&self, id: Uuid) -> bool {
        self.products.read().contains_key(&id)
    }
}

// ============================================================================
// Codecs
// ============================================================================

/// Encode a [0,1] raster as 8-bit PNG bytes. Validity rides in the alpha
/// channel when the raster is masked.
pub fn encode_png(raster: &Raster) -> Result<Vec<u8>> {
    let (w, h) = (raster.width(), raster.height());
    let to8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    let dynamic = if raster.has_mask() {
        let mut buf = Vec::with_capacity((w * h * 4) as usize);
        for row in 0..h {
            for col in 0..w {
                let rgb = raster.rgb(row, col);
                buf.extend_from_slice(&[
                    to8(rgb.x),
                    to8(rgb.y),
                    to8(rgb.z),
                    if raster.is_valid(row, col) { 255 } else { 0 },
                ]);
            }
        }
        let img = image::RgbaImage::from_raw(w, h, buf)
            .ok_or_else(|| RegolithError::ImageCodec("rgba buffer mismatch".into()))?;
        DynamicImage::ImageRgba8(img)
    } else if raster.is_color() {
        let mut buf = Vec::with_capacity((w * h * 3) as usize);
        for row in 0..h {
            for col in 0..w {
                let rgb = raster.rgb(row, col);
                buf.extend_from_slice(&[to8(rgb.x), to8(rgb.y), to8(rgb.z)]);
            }
        }
        let img = image::RgbImage::from_raw(w, h, buf)
            .ok_or_else(|| RegolithError::ImageCodec("rgb buffer mismatch".into()))?;
        DynamicImage::ImageRgb8(img)
    } else {
        let buf: Vec<u8> = raster.samples().iter().map(|v| to8(*v)).collect();
        let img = image::GrayImage::from_raw(w, h, buf)
            .ok_or_else(|| RegolithError::ImageCodec("gray buffer mismatch".into()))?;
        DynamicImage::ImageLuma8(img)
    };
    let mut bytes = Vec::new();
    dynamic.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Decode PNG bytes into a [0,1] raster; alpha < 128 marks invalid pixels.
pub fn decode_png(bytes: &[u8]) -> Result<Raster> {
    let dynamic = image::load_from_memory_with_format(bytes, ImageFormat::Png)?;
    let (w, h) = (dynamic.width(), dynamic.height());
    let bands = match dynamic.color().channel_count() {
        1 | 2 => 1,
        _ => 3,
    };
    let mut raster = Raster::new(w, h, bands)?;
    let rgba = dynamic.to_rgba8();
    for row in 0..h {
        for col in 0..w {
            let px = rgba.get_pixel(col, row);
            if bands == 3 {
                raster.set(row, col, 0, f32::from(px[0]) / 255.0);
                raster.set(row, col, 1, f32::from(px[1]) / 255.0);
                raster.set(row, col, 2, f32::from(px[2]) / 255.0);
            } else {
                raster.set(row, col, 0, f32::from(px[0]) / 255.0);
            }
            if px[3] < 128 {
                raster.set_valid(row, col, false);
            }
        }
    }
    Ok(raster)
}

/// Encode a three-band raster as float TIFF bytes (no quantization).
pub fn encode_float_tiff(raster: &Raster) -> Result<Vec<u8>> {
    let color = raster.to_color();
    let img = image::Rgb32FImage::from_raw(color.width(), color.height(), color.samples().to_vec())
        .ok_or_else(|| RegolithError::ImageCodec("float buffer mismatch".into()))?;
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb32F(img).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Tiff)?;
    Ok(bytes)
}

/// Decode float TIFF bytes into a three-band raster.
pub fn decode_float_tiff(bytes: &[u8]) -> Result<Raster> {
    let dynamic = image::load_from_memory_with_format(bytes, ImageFormat::Tiff)?;
    let img = dynamic.to_rgb32f();
    Raster::from_samples(img.width(), img.height(), 3, img.into_raw())
}
