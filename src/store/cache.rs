//! LRU Image Cache
//!
//! Shared, thread-safe, byte-bounded cache of decoded rasters keyed by
//! product id. Large one-off products can bypass it per-request
//! (`no_cache`) to trade runtime for footprint.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use uuid::Uuid;

use crate::errors::Result;
use crate::raster::Raster;

fn raster_bytes(raster: &Raster) -> usize {
    raster.samples().len() * size_of::<f32>()
        + if raster.has_mask() {
            (raster.width() * raster.height()) as usize
        } else {
            0
        }
}

#[derive(Debug)]
struct Entry {
    raster: Arc<Raster>,
    bytes: usize,
    last_used: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: FxHashMap<Uuid, Entry>,
    current_bytes: usize,
    tick: u64,
}

/// Byte-bounded LRU cache of decoded rasters.
#[derive(Debug)]
pub struct LruImageCache {
    inner: Mutex<Inner>,
    max_bytes: usize,
}

impl LruImageCache {
    /// Create a cache holding at most `max_bytes` of raster data.
    #[must_use]
    pub fn new(max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_bytes,
        }
    }

    /// Fetch a raster, loading and caching on miss.
    ///
    /// With `no_cache` the loader always runs and the result is not
    /// retained (nor is an existing entry evicted).
    pub fn get_or_load<F>(&self, id: Uuid, no_cache: bool, load: F) -> Result<Arc<Raster>>
    where
        F: FnOnce() -> Result<Raster>,
    {
        if no_cache {
            return Ok(Arc::new(load()?));
        }
        {
            let mut inner = self.inner.lock();
            inner.tick += 1;
            let tick = inner.tick;
            if let Some(entry) = inner.entries.get_mut(&id) {
                entry.last_used = tick;
                return Ok(Arc::clone(&entry.raster));
            }
        }
        // Load outside the lock; a racing duplicate load is harmless.
        let raster = Arc::new(load()?);
        self.insert(id, Arc::clone(&raster));
        Ok(raster)
    }

    /// Insert a raster, evicting least-recently-used entries over budget.
    pub fn insert(&self, id: Uuid, raster: Arc<Raster>) {
        let bytes = raster_bytes(&raster);
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;
        if let Some(old) = inner.entries.insert(
            id,
            Entry {
                raster,
                bytes,
                last_used: tick,
            },
        ) {
            inner.current_bytes -= old.bytes;
        }
        inner.current_bytes += bytes;
        while inner.current_bytes > self.max_bytes && inner.entries.len() > 1 {
            let Some(oldest) = inner
                .entries
                .iter()
                .filter(|(k, _)| **k != id)
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| *k)
            else {
                break;
            };
            if let Some(evicted) = inner.entries.remove(&oldest) {
                inner.current_bytes -= evicted.bytes;
            }
        }
    }

    /// Drop a cached entry (used when a product is superseded).
    pub fn invalidate(&self, id: Uuid) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.remove(&id) {
            inner.current_bytes -= entry.bytes;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn current_bytes(&self) -> usize {
        self.inner.lock().current_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raster(n: u32) -> Raster {
        Raster::new(n, n, 1).unwrap()
    }

    #[test]
    fn load_once_then_hit() {
        let cache = LruImageCache::new(1 << 20);
        let id = Uuid::new_v4();
        let mut loads = 0;
        for _ in 0..3 {
            cache
                .get_or_load(id, false, || {
                    loads += 1;
                    Ok(raster(4))
                })
                .unwrap();
        }
        assert_eq!(loads, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn no_cache_bypasses() {
        let cache = LruImageCache::new(1 << 20);
        let id = Uuid::new_v4();
        cache.get_or_load(id, true, || Ok(raster(4))).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn evicts_least_recently_used() {
        // Each 4x4x1 raster is 64 bytes; room for two.
        let cache = LruImageCache::new(128);
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        cache.insert(a, Arc::new(raster(4)));
        cache.insert(b, Arc::new(raster(4)));
        // Touch a so b is the LRU entry.
        cache.get_or_load(a, false, || unreachable!()).unwrap();
        cache.insert(c, Arc::new(raster(4)));
        assert_eq!(cache.len(), 2);
        assert!(cache.get_or_load(a, false, || Ok(raster(4))).is_ok());
        let mut b_loaded = false;
        cache
            .get_or_load(b, false, || {
                b_loaded = true;
                Ok(raster(4))
            })
            .unwrap();
        assert!(b_loaded, "b should have been evicted");
    }
}
