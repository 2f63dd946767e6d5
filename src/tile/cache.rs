//! Shared cache for decoded tiles.
//!
//! One [`TileCache`] is shared by every image layer of a viewer. Layers never
//! hold resources directly: they acquire and release references to cache
//! records, and the cache decides when a record may be freed.
//!
//! # Reference Counting
//!
//! Each record carries a count of live tile references. A record whose count
//! drops to zero stays cached and becomes *eligible* for eviction; it is only
//! freed when [`TileCache::enforce_capacity`] needs room.
//!
//! # Pinning
//!
//! Keys in the current wanted set are pinned. Pinned records are never
//! evicted, even at refcount zero, so capacity is a soft ceiling: if every
//! excess record is pinned the cache stays over `max_entries` and reports
//! [`CapacityStatus::CapacityPinned`].
//!
//! # Resident Levels
//!
//! A tile installed with a [`CacheTier`] at or below its image's
//! [`resident_cutoff`] is never evicted. Those low levels fit in one tile
//! each, so keeping them costs a handful of records and guarantees a coarse
//! placeholder when zooming out.
//!
//! # Eviction Order
//!
//! `last_touched` is the frame time set by [`TileCache::advance_to`]. The
//! victim is the eligible record with the oldest touch; among records touched
//! in the same frame the higher (more detailed) level goes first, then the
//! least recently used.

use std::collections::HashSet;
use std::fmt;

use lru::LruCache;
use tracing::{debug, trace};

use super::decoder::{DecodedTile, TileResource};
use super::CacheKey;

/// Default maximum number of cached tiles
pub const DEFAULT_MAX_CACHE_ENTRIES: usize = 200;

/// Highest level kept resident for a pyramid with `tile_size` tiles:
/// `ceil(log2(tile_size))`. Every level up to it fits in a single tile.
pub fn resident_cutoff(tile_size: u32) -> u32 {
    match tile_size {
        0 | 1 => 0,
        n => u32::BITS - (n - 1).leading_zeros(),
    }
}

/// Pyramid position of a cached tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheTier {
    pub level: u32,

    /// Never evicted
    pub resident: bool,
}

impl CacheTier {
    /// Tier of a tile at `level`, resident when `level <= cutoff`.
    pub fn new(level: u32, cutoff: u32) -> Self {
        Self {
            level,
            resident: level <= cutoff,
        }
    }

    /// Tier of an evictable tile at `level`.
    pub fn evictable(level: u32) -> Self {
        Self {
            level,
            resident: false,
        }
    }
}

// =============================================================================
// Dispose Hook
// =============================================================================

/// Called for every resource the cache frees.
///
/// Renderers use this to release GPU textures or decoder handles tied to a
/// tile before the record is dropped.
pub trait ResourceDisposer: Send {
    fn dispose(&mut self, key: &CacheKey, resource: &DecodedTile);
}

/// Disposer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDisposer;

impl ResourceDisposer for NoopDisposer {
    fn dispose(&mut self, _key: &CacheKey, _resource: &DecodedTile) {}
}

impl<F> ResourceDisposer for F
where
    F: FnMut(&CacheKey, &DecodedTile) + Send,
{
    fn dispose(&mut self, key: &CacheKey, resource: &DecodedTile) {
        self(key, resource)
    }
}

// =============================================================================
// Records and Status
// =============================================================================

struct CacheRecord {
    resource: TileResource,
    ref_count: usize,
    last_touched: u64,
    tier: CacheTier,
}

impl CacheRecord {
    fn is_evictable(&self) -> bool {
        self.ref_count == 0 && !self.tier.resident
    }
}

/// Outcome of [`TileCache::enforce_capacity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityStatus {
    /// Size is at or below `max_entries`
    WithinCapacity,

    /// This many records were evicted to get back under capacity
    Evicted(usize),

    /// Still over capacity because every excess record is referenced, pinned
    /// or resident.
    /// Informational, not an error.
    CapacityPinned { excess: usize },
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub referenced: usize,
    pub pinned: usize,
    pub resident: usize,
    pub evictions: u64,
}

// =============================================================================
// Tile Cache
// =============================================================================

/// Capacity-bounded, reference-counted store of decoded tiles.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use deepzoom::tile::{CacheKey, DecodedTile, TileCache};
///
/// let mut cache = TileCache::new(1);
/// let k1 = CacheKey::from_address("k1", None);
/// let k2 = CacheKey::from_address("k2", None);
///
/// cache.install(k1.clone(), Arc::new(DecodedTile::solid(1, 1, [0; 4])));
/// cache.release(&k1);
/// cache.install(k2.clone(), Arc::new(DecodedTile::solid(1, 1, [0; 4])));
///
/// assert!(!cache.contains(&k1));
/// assert_eq!(cache.len(), 1);
/// ```
pub struct TileCache {
    /// Records in touch order (front = most recent)
    records: LruCache<CacheKey, CacheRecord>,

    /// Soft capacity
    max_entries: usize,

    /// Keys in the current wanted set
    pinned: HashSet<CacheKey>,

    /// Frame time stamped on every touch
    now: u64,

    evictions: u64,

    disposer: Box<dyn ResourceDisposer>,
}

impl TileCache {
    /// Create a cache holding up to `max_entries` records.
    pub fn new(max_entries: usize) -> Self {
        Self::with_disposer(max_entries, NoopDisposer)
    }

    /// Create a cache that calls `disposer` for every freed resource.
    pub fn with_disposer(max_entries: usize, disposer: impl ResourceDisposer + 'static) -> Self {
        Self {
            records: LruCache::unbounded(),
            max_entries,
            pinned: HashSet::new(),
            now: 0,
            evictions: 0,
            disposer: Box::new(disposer),
        }
    }

    /// Take a reference to an existing record.
    ///
    /// Returns the resource and increments its refcount, or `None` if the
    /// key is not cached.
    pub fn acquire(&mut self, key: &CacheKey) -> Option<TileResource> {
        let now = self.now;
        let record = self.records.get_mut(key)?;
        record.ref_count += 1;
        record.last_touched = now;
        trace!(key = %key, refs = record.ref_count, "acquired cache record");
        Some(record.resource.clone())
    }

    /// Install a freshly decoded resource at level 0, evictable.
    ///
    /// See [`TileCache::install_with_tier`].
    pub fn install(&mut self, key: CacheKey, resource: TileResource) -> TileResource {
        self.install_with_tier(key, resource, CacheTier::default())
    }

    /// Install a freshly decoded resource and take a reference to it.
    ///
    /// Idempotent per key: if a record already exists (a duplicate
    /// completion raced this one), the existing resource is returned with
    /// the caller's own reference added, and `resource` and `tier` are
    /// dropped.
    pub fn install_with_tier(
        &mut self,
        key: CacheKey,
        resource: TileResource,
        tier: CacheTier,
    ) -> TileResource {
        if let Some(existing) = self.acquire(&key) {
            debug!(key = %key, "install hit existing record");
            return existing;
        }

        self.records.put(
            key.clone(),
            CacheRecord {
                resource: resource.clone(),
                ref_count: 1,
                last_touched: self.now,
                tier,
            },
        );
        trace!(
            key = %key,
            level = tier.level,
            resident = tier.resident,
            entries = self.records.len(),
            "installed cache record"
        );

        self.enforce_capacity();
        resource
    }

    /// Drop one reference to a record.
    ///
    /// At zero the record becomes eligible for eviction but stays cached.
    /// Returns the remaining refcount, or `None` if the key is not cached.
    pub fn release(&mut self, key: &CacheKey) -> Option<usize> {
        let record = self.records.peek_mut(key)?;
        debug_assert!(record.ref_count > 0, "release of unreferenced record {key}");
        record.ref_count = record.ref_count.saturating_sub(1);
        trace!(key = %key, refs = record.ref_count, "released cache record");
        Some(record.ref_count)
    }

    /// Mark a record as recently used without changing its refcount.
    pub fn touch(&mut self, key: &CacheKey) -> bool {
        let now = self.now;
        match self.records.get_mut(key) {
            Some(record) => {
                record.last_touched = now;
                true
            }
            None => false,
        }
    }

    /// Set the frame time stamped on subsequent touches. Time never goes
    /// backwards.
    pub fn advance_to(&mut self, now: u64) {
        self.now = self.now.max(now);
    }

    /// Replace the pinned set with the keys of the current wanted set.
    pub fn set_pinned<I>(&mut self, keys: I)
    where
        I: IntoIterator<Item = CacheKey>,
    {
        self.pinned.clear();
        self.pinned.extend(keys);
    }

    /// Evict eligible records, oldest touch first, until size fits
    /// `max_entries` or nothing else may be evicted.
    pub fn enforce_capacity(&mut self) -> CapacityStatus {
        let mut evicted = 0;

        while self.records.len() > self.max_entries {
            let victim = self.pick_victim();

            let Some(key) = victim else {
                let excess = self.records.len() - self.max_entries;
                debug!(
                    excess,
                    entries = self.records.len(),
                    max_entries = self.max_entries,
                    "cache over capacity, remaining records are pinned or resident"
                );
                return CapacityStatus::CapacityPinned { excess };
            };

            if let Some(record) = self.records.pop(&key) {
                self.disposer.dispose(&key, &record.resource);
                self.evictions += 1;
                evicted += 1;
                trace!(key = %key, "evicted cache record");
            }
        }

        if evicted > 0 {
            CapacityStatus::Evicted(evicted)
        } else {
            CapacityStatus::WithinCapacity
        }
    }

    /// Dispose and remove every record.
    ///
    /// Layers must drop their tile references first; this is meant for a
    /// full viewer reset.
    pub fn clear(&mut self) {
        while let Some((key, record)) = self.records.pop_lru() {
            self.disposer.dispose(&key, &record.resource);
        }
        self.pinned.clear();
    }

    /// Whether a record exists for `key`.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.records.contains(key)
    }

    /// Live references to `key`.
    pub fn ref_count(&self, key: &CacheKey) -> Option<usize> {
        self.records.peek(key).map(|r| r.ref_count)
    }

    /// Frame time of the last touch of `key`.
    pub fn last_touched(&self, key: &CacheKey) -> Option<u64> {
        self.records.peek(key).map(|r| r.last_touched)
    }

    /// Whether `key` is pinned by the current wanted set.
    pub fn is_pinned(&self, key: &CacheKey) -> bool {
        self.pinned.contains(key)
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Soft capacity.
    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.records.len(),
            max_entries: self.max_entries,
            referenced: self.records.iter().filter(|(_, r)| r.ref_count > 0).count(),
            pinned: self.pinned.len(),
            resident: self.records.iter().filter(|(_, r)| r.tier.resident).count(),
            evictions: self.evictions,
        }
    }

    /// Oldest touch first, then highest level, then least recently used.
    fn pick_victim(&self) -> Option<CacheKey> {
        let mut best: Option<(&CacheKey, &CacheRecord)> = None;
        for (key, record) in self.records.iter().rev() {
            if !record.is_evictable() || self.pinned.contains(key) {
                continue;
            }
            let better = match best {
                None => true,
                Some((_, current)) => {
                    record.last_touched < current.last_touched
                        || (record.last_touched == current.last_touched
                            && record.tier.level > current.tier.level)
                }
            };
            if better {
                best = Some((key, record));
            }
        }
        best.map(|(key, _)| key.clone())
    }
}

impl fmt::Debug for TileCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileCache")
            .field("entries", &self.records.len())
            .field("max_entries", &self.max_entries)
            .field("pinned", &self.pinned.len())
            .finish()
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CACHE_ENTRIES)
    }
}

// =============================================================================
// Tests
// =============================================================================
