use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use image::RgbaImage;
use log::debug;
use lru::LruCache;
use parking_lot::Mutex;

use crate::picture::{PictureId, PictureIdentity, Size};

/// A thumbnail is cached per picture and per bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub picture: PictureId,
    pub size: Size,
}

impl CacheKey {
    pub fn new(picture: PictureId, size: Size) -> Self {
        Self { picture, size }
    }
}

#[derive(Debug)]
struct CacheEntry {
    bitmap: Arc<RgbaImage>,
    identity: PictureIdentity,
    /// Source modification time when the bitmap was built
    modified: Option<SystemTime>,
    last_access: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, identity: &PictureIdentity, modified: Option<SystemTime>) -> bool {
        if self.identity != *identity {
            return false;
        }
        match (self.modified, modified) {
            (Some(built), Some(current)) => current <= built,
            (None, Some(_)) => false,
            (_, None) => true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub entries: usize,
    pub capacity: usize,
}

#[derive(Debug)]
struct Inner {
    entries: LruCache<CacheKey, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
    invalidations: u64,
}

impl Inner {
    fn hit(&mut self) {
        self.hits += 1;
    }

    fn miss(&mut self) {
        self.misses += 1;
    }
}

/// In-memory LRU of finished thumbnails, shared by every worker.
#[derive(Debug)]
pub struct ThumbnailCache {
    inner: Mutex<Inner>,
}

impl ThumbnailCache {
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
                invalidations: 0,
            }),
        }
    }

    /// Look up a thumbnail without any freshness check.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<RgbaImage>> {
        let mut inner = self.inner.lock();
        let found = inner.entries.get_mut(key).map(|entry| {
            entry.last_access = Instant::now();
            Arc::clone(&entry.bitmap)
        });
        if found.is_some() {
            inner.hit();
        } else {
            inner.miss();
        }
        found
    }

    /// Look up a thumbnail that was built from `identity` and is not older
    /// than the source file. A stale entry is dropped and counts as a miss.
    pub fn get_fresh(
        &self,
        key: &CacheKey,
        identity: &PictureIdentity,
        modified: Option<SystemTime>,
    ) -> Option<Arc<RgbaImage>> {
        let mut inner = self.inner.lock();
        let is_fresh = inner
            .entries
            .peek(key)
            .map(|entry| entry.is_fresh(identity, modified));
        let fresh = match is_fresh {
            Some(true) => inner.entries.get_mut(key).map(|entry| {
                entry.last_access = Instant::now();
                Arc::clone(&entry.bitmap)
            }),
            Some(false) => {
                debug!("Dropping stale thumbnail for {} at {}", key.picture, key.size);
                inner.entries.pop(key);
                inner.invalidations += 1;
                None
            }
            None => None,
        };
        if fresh.is_some() {
            inner.hit();
        } else {
            inner.miss();
        }
        fresh
    }

    pub fn put(
        &self,
        key: CacheKey,
        bitmap: Arc<RgbaImage>,
        identity: PictureIdentity,
        modified: Option<SystemTime>,
    ) {
        self.put_if(key, bitmap, identity, modified, || true);
    }

    /// Store a thumbnail only if `keep` still holds once the cache is locked.
    ///
    /// `keep` runs under the cache lock, so an [`invalidate`](Self::invalidate)
    /// that follows whatever `keep` observes cannot be overtaken by this put.
    pub fn put_if(
        &self,
        key: CacheKey,
        bitmap: Arc<RgbaImage>,
        identity: PictureIdentity,
        modified: Option<SystemTime>,
        keep: impl FnOnce() -> bool,
    ) -> bool {
        let mut inner = self.inner.lock();
        if !keep() {
            debug!("Not caching thumbnail for {} at {}", key.picture, key.size);
            return false;
        }
        let entry = CacheEntry {
            bitmap,
            identity,
            modified,
            last_access: Instant::now(),
        };
        if let Some((evicted, old)) = inner.entries.push(key, entry) {
            // push hands back the old value when the key was already present
            if evicted != key {
                inner.evictions += 1;
                debug!(
                    "Evicted thumbnail for {} at {} (idle {:?})",
                    evicted.picture,
                    evicted.size,
                    old.last_access.elapsed()
                );
            }
        }
        true
    }

    /// Drop every cached size of `picture`. Returns how many were removed.
    pub fn invalidate(&self, picture: PictureId) -> usize {
        let mut inner = self.inner.lock();
        let stale: Vec<CacheKey> = inner
            .entries
            .iter()
            .map(|(key, _)| *key)
            .filter(|key| key.picture == picture)
            .collect();
        for key in &stale {
            inner.entries.pop(key);
        }
        inner.invalidations += stale.len() as u64;
        if !stale.is_empty() {
            debug!("Invalidated {} thumbnail(s) of {}", stale.len(), picture);
        }
        stale.len()
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            invalidations: inner.invalidations,
            entries: inner.entries.len(),
            capacity: inner.entries.cap().get(),
        }
    }
}
