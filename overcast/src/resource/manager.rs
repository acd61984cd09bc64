//! Budgeted resource pool.
//!
//! [`ResourcePool`] owns the pooled textures and the tagged cache and keeps
//! both under one memory budget. All state sits behind a single mutex so
//! the per-frame path and the maintenance timer never interleave partial
//! updates.
//!
//! # Eviction Order
//!
//! ```text
//! 1. unprotected cache entries, lowest priority first, oldest first
//! 2. idle pooled textures, least recently used first
//! (protected entries and in-use textures are never evicted)
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::backend::{ResourceAllocator, ResourceHandle, TextureDescriptor, TextureFormat};
use super::cache::{CacheEntry, CachedResource, ResourceCache};
use super::pool::{PooledTexture, TexturePool, DEFAULT_POOL_CAPACITY};
use super::stats::{CleanupKind, CleanupReport, MemoryStats};
use crate::clock::{system_clock, SharedClock};
use crate::error::ResourceError;
use crate::geo::{GeoBounds, GeoPoint};

/// Resource pool tuning.
#[derive(Debug, Clone)]
pub struct ResourcePoolConfig {
    /// Memory ceiling for pooled textures and cache entries combined.
    pub memory_budget_bytes: u64,
    /// Maximum pooled texture slots.
    pub pool_capacity: usize,
    /// Pressure (0.0-1.0) above which emergency cleanup kicks in.
    pub pressure_threshold: f64,
    /// Cache entries at or above this priority are never evicted by cleanup.
    pub protected_priority: u8,
    /// Fraction of the allocation an emergency cleanup frees at minimum.
    pub emergency_free_fraction: f64,
    /// Idle textures and unprotected entries unused for longer are removed
    /// by scheduled cleanup.
    pub max_unused_time: Duration,
    /// Spatial maintenance only evicts entries farther than this from the
    /// camera.
    pub spatial_distance_meters: f64,
    /// Spatial maintenance only evicts entries not accessed for this long.
    pub spatial_stale_after: Duration,
    /// Interval between scheduled cleanups.
    pub cleanup_interval: Duration,
}

impl Default for ResourcePoolConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: 128 * 1024 * 1024,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            pressure_threshold: 0.8,
            protected_priority: 7,
            emergency_free_fraction: 0.3,
            max_unused_time: Duration::from_secs(60),
            spatial_distance_meters: 50_000.0,
            spatial_stale_after: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(30),
        }
    }
}

impl ResourcePoolConfig {
    /// Default tuning with the given budget in MB.
    pub fn with_budget_mb(memory_budget_mb: u32) -> Self {
        Self {
            memory_budget_bytes: memory_budget_mb as u64 * 1024 * 1024,
            ..Self::default()
        }
    }
}

struct PoolState {
    textures: TexturePool,
    cache: ResourceCache,
    budget: u64,
    last_cleanup: Instant,
    disposed: bool,
}

impl PoolState {
    fn total_allocated(&self) -> u64 {
        self.textures.total_bytes() + self.cache.total_bytes()
    }

    fn pressure(&self) -> f64 {
        if self.budget == 0 {
            return 1.0;
        }
        self.total_allocated() as f64 / self.budget as f64
    }
}

/// Pooled textures and cached resources under one memory budget.
pub struct ResourcePool {
    config: ResourcePoolConfig,
    allocator: Arc<dyn ResourceAllocator>,
    clock: SharedClock,
    state: Mutex<PoolState>,
}

impl ResourcePool {
    /// Create a pool using the system clock.
    pub fn new(config: ResourcePoolConfig, allocator: Arc<dyn ResourceAllocator>) -> Self {
        Self::with_clock(config, allocator, system_clock())
    }

    /// Create a pool with an injected clock.
    pub fn with_clock(
        config: ResourcePoolConfig,
        allocator: Arc<dyn ResourceAllocator>,
        clock: SharedClock,
    ) -> Self {
        let now = clock.now();
        let state = PoolState {
            textures: TexturePool::new(config.pool_capacity),
            cache: ResourceCache::new(),
            budget: config.memory_budget_bytes,
            last_cleanup: now,
            disposed: false,
        };
        Self {
            config,
            allocator,
            clock,
            state: Mutex::new(state),
        }
    }

    /// Acquire a square texture for `id`.
    ///
    /// Returns the existing handle when the slot for `id` already has this
    /// resolution and format. Otherwise allocates, reclaiming the least
    /// recently used idle slot if the pool is full. Returns `None` when
    /// nothing can be freed, or when `id` is held in use at another shape;
    /// the caller retries on a later tick. A superseded slot is kept if its
    /// replacement cannot be allocated.
    pub fn acquire(
        &self,
        id: &str,
        resolution: u32,
        format: TextureFormat,
    ) -> Option<ResourceHandle> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if state.disposed {
            return None;
        }

        if let Some(handle) = state.textures.try_reuse(id, resolution, format, now) {
            return Some(handle);
        }

        let desc = TextureDescriptor::square(resolution, format);

        // Same id, different shape: the old slot is superseded, but only
        // destroyed once its replacement exists.
        if state.textures.get(id).is_some_and(|slot| slot.in_use) {
            debug!(id, "Texture still in use, reshape deferred");
            return None;
        }
        let superseded = state.textures.take(id);

        let handle = self.allocate_slot(&mut state, id, &desc, now);
        match (handle, superseded) {
            (Some(_), Some(old)) => self.allocator.destroy(old.handle),
            (None, Some(old)) => state.textures.insert(old),
            _ => {}
        }
        handle
    }

    fn allocate_slot(
        &self,
        state: &mut PoolState,
        id: &str,
        desc: &TextureDescriptor,
        now: Instant,
    ) -> Option<ResourceHandle> {
        let size = desc.size_bytes();

        if state.textures.is_full() {
            let Some(victim) = state.textures.pop_lru_idle() else {
                debug!(id, capacity = state.textures.capacity(), "Texture pool exhausted");
                return None;
            };
            debug!(id = %victim.id, "Reclaiming idle pooled texture");
            self.allocator.destroy(victim.handle);
        }

        if state.total_allocated() + size > state.budget {
            let target = state.budget.saturating_sub(size);
            self.evict_until(state, target, CleanupKind::Emergency);
            if state.total_allocated() + size > state.budget {
                warn!(
                    id,
                    size_bytes = size,
                    allocated = state.total_allocated(),
                    budget = state.budget,
                    "Texture does not fit the memory budget"
                );
                return None;
            }
        }

        match self.allocator.allocate_texture(desc) {
            Ok(handle) => {
                state.textures.insert(PooledTexture::new(
                    id,
                    handle,
                    size,
                    desc.width,
                    desc.format,
                    now,
                ));
                Some(handle)
            }
            Err(e) => {
                warn!(id, error = %e, "Texture allocation failed");
                None
            }
        }
    }

    /// Return a texture to the pool without freeing it.
    pub fn release(&self, id: &str) -> bool {
        let now = self.clock.now();
        self.state.lock().textures.release(id, now)
    }

    /// Cache a resource.
    ///
    /// On success the cache owns the handle; on error it stays with the
    /// caller. Under pressure an emergency cleanup runs first; if the entry
    /// still does not fit, unprotected entries and idle textures are evicted
    /// until it does.
    pub fn put(&self, entry: CacheEntry) -> Result<(), ResourceError> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if state.disposed {
            return Err(ResourceError::Disposed);
        }

        if entry.size_bytes > state.budget {
            return Err(ResourceError::ExceedsBudget {
                id: entry.id,
                size: entry.size_bytes,
                budget: state.budget,
            });
        }

        // Held aside so its bytes count as reclaimable; restored on failure.
        let previous = state.cache.remove(&entry.id);

        if state.pressure() > self.config.pressure_threshold {
            self.emergency_locked(&mut state);
        }

        let target = state.budget - entry.size_bytes;
        if state.total_allocated() > target {
            self.evict_until(&mut state, target, CleanupKind::Emergency);
        }
        if state.total_allocated() > target {
            let available = state.budget.saturating_sub(state.total_allocated());
            if let Some(previous) = previous {
                state.cache.restore(previous);
            }
            return Err(ResourceError::BudgetExhausted {
                needed: entry.size_bytes,
                available,
            });
        }

        if let Some(old) = previous {
            if old.handle != entry.handle {
                self.allocator.destroy(old.handle);
            }
        }
        state.cache.insert(entry, now);
        Ok(())
    }

    /// Look up a cached resource, marking it accessed.
    pub fn get(&self, id: &str) -> Option<ResourceHandle> {
        let now = self.clock.now();
        self.state.lock().cache.get(id, now).map(|e| e.handle)
    }

    /// Copy of a cached entry without touching its access time.
    pub fn peek(&self, id: &str) -> Option<CachedResource> {
        self.state.lock().cache.peek(id).cloned()
    }

    /// Whether `id` is cached.
    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().cache.peek(id).is_some()
    }

    /// Evict a cached resource and destroy it.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.state.lock().cache.remove(id);
        match removed {
            Some(entry) => {
                self.allocator.destroy(entry.handle);
                true
            }
            None => false,
        }
    }

    /// Evict cached entries that are outside the viewport, farther than the
    /// spatial distance from the camera and not accessed recently.
    pub fn update_spatial_cache(
        &self,
        viewport_bounds: &GeoBounds,
        camera: &GeoPoint,
    ) -> CleanupReport {
        let now = self.clock.now();
        let max_distance = self.config.spatial_distance_meters;
        let stale_after = self.config.spatial_stale_after;

        let mut state = self.state.lock();
        let removed = state.cache.remove_where(|e| {
            let Some(bounds) = e.bounds else {
                return false;
            };
            !bounds.intersects(viewport_bounds)
                && bounds.center().distance_to(camera) > max_distance
                && now.saturating_duration_since(e.last_accessed_at) > stale_after
        });

        let mut report = CleanupReport::new(CleanupKind::Spatial);
        for entry in removed {
            report.entries_removed += 1;
            report.bytes_freed += entry.size_bytes;
            self.allocator.destroy(entry.handle);
        }
        report.pressure_after = state.pressure();

        if report.freed_anything() {
            debug!(
                entries = report.entries_removed,
                bytes = report.bytes_freed,
                "Spatial cache maintenance"
            );
        }
        report
    }

    /// Remove idle textures and unprotected entries unused for longer than
    /// the configured maximum.
    pub fn perform_cleanup(&self) -> CleanupReport {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.last_cleanup = now;

        let mut report = CleanupReport::new(CleanupKind::Scheduled);
        for slot in state
            .textures
            .take_idle_older_than(now, self.config.max_unused_time)
        {
            report.textures_removed += 1;
            report.bytes_freed += slot.size_bytes;
            self.allocator.destroy(slot.handle);
        }
        for entry in state.cache.remove_stale(
            now,
            self.config.max_unused_time,
            self.config.protected_priority,
        ) {
            report.entries_removed += 1;
            report.bytes_freed += entry.size_bytes;
            self.allocator.destroy(entry.handle);
        }
        report.pressure_after = state.pressure();

        debug!(
            entries = report.entries_removed,
            textures = report.textures_removed,
            bytes = report.bytes_freed,
            "Scheduled cleanup complete"
        );
        report
    }

    /// Run [`perform_cleanup`](Self::perform_cleanup) if the cleanup
    /// interval has passed since the last one.
    pub fn run_cleanup_if_due(&self) -> Option<CleanupReport> {
        let now = self.clock.now();
        let due = {
            let state = self.state.lock();
            !state.disposed
                && now.saturating_duration_since(state.last_cleanup) >= self.config.cleanup_interval
        };
        due.then(|| self.perform_cleanup())
    }

    /// Evict until at least the configured fraction of the current
    /// allocation is freed and pressure is at or below the threshold, or
    /// nothing evictable remains.
    pub fn perform_emergency_cleanup(&self) -> CleanupReport {
        let mut state = self.state.lock();
        self.emergency_locked(&mut state)
    }

    fn emergency_locked(&self, state: &mut PoolState) -> CleanupReport {
        let allocated = state.total_allocated();
        let keep_fraction = (1.0 - self.config.emergency_free_fraction).clamp(0.0, 1.0);
        let by_fraction = (allocated as f64 * keep_fraction) as u64;
        let by_threshold = (state.budget as f64 * self.config.pressure_threshold) as u64;
        let target = by_fraction.min(by_threshold);

        let report = self.evict_until(state, target, CleanupKind::Emergency);
        info!(
            entries = report.entries_removed,
            textures = report.textures_removed,
            bytes_freed = report.bytes_freed,
            pressure = format!("{:.2}", report.pressure_after),
            "Emergency cleanup complete"
        );
        report
    }

    /// Evict in eviction order until the allocation is at or below `target`.
    fn evict_until(&self, state: &mut PoolState, target: u64, kind: CleanupKind) -> CleanupReport {
        let mut report = CleanupReport::new(kind);
        let protected = self.config.protected_priority;

        while state.total_allocated() > target {
            if let Some(entry) = state.cache.pop_evictable(protected) {
                report.entries_removed += 1;
                report.bytes_freed += entry.size_bytes;
                self.allocator.destroy(entry.handle);
                continue;
            }
            if let Some(slot) = state.textures.pop_lru_idle() {
                report.textures_removed += 1;
                report.bytes_freed += slot.size_bytes;
                self.allocator.destroy(slot.handle);
                continue;
            }
            break;
        }

        report.pressure_after = state.pressure();
        report
    }

    /// `total_allocated / budget`.
    pub fn memory_pressure(&self) -> f64 {
        self.state.lock().pressure()
    }

    /// Whether pressure is above the emergency threshold.
    pub fn is_under_pressure(&self) -> bool {
        self.memory_pressure() > self.config.pressure_threshold
    }

    /// Bytes held by pooled textures and cache entries.
    pub fn total_allocated(&self) -> u64 {
        self.state.lock().total_allocated()
    }

    /// Whether anything can still be evicted.
    pub fn has_evictable(&self) -> bool {
        let state = self.state.lock();
        state.cache.has_evictable(self.config.protected_priority) || state.textures.idle_count() > 0
    }

    /// Current memory budget.
    pub fn memory_budget(&self) -> u64 {
        self.state.lock().budget
    }

    /// Change the memory budget. Shrinking it below the current allocation
    /// runs an emergency cleanup.
    pub fn set_memory_budget(&self, budget_bytes: u64) {
        let mut state = self.state.lock();
        state.budget = budget_bytes;
        if state.pressure() > self.config.pressure_threshold {
            self.emergency_locked(&mut state);
        }
    }

    /// Accounting snapshot, derived from the live maps.
    pub fn stats(&self) -> MemoryStats {
        let state = self.state.lock();
        let pooled_bytes = state.textures.total_bytes();
        let cached_bytes = state.cache.total_bytes();
        MemoryStats {
            total_allocated: pooled_bytes + cached_bytes,
            budget: state.budget,
            pressure: state.pressure(),
            pooled_textures: state.textures.len(),
            pooled_in_use: state.textures.in_use_count(),
            pooled_bytes,
            cached_entries: state.cache.len(),
            cached_bytes,
            bytes_by_kind: state.cache.bytes_by_kind(),
            pool_hits: state.textures.hits(),
            pool_misses: state.textures.misses(),
            cache_hits: state.cache.hits(),
            cache_misses: state.cache.misses(),
        }
    }

    /// Destroy every resource and refuse further use.
    pub fn dispose(&self) {
        let mut state = self.state.lock();
        if state.disposed {
            return;
        }
        state.disposed = true;

        let textures = state.textures.drain();
        let entries = state.cache.drain();
        let count = textures.len() + entries.len();
        for slot in textures {
            self.allocator.destroy(slot.handle);
        }
        for entry in entries {
            self.allocator.destroy(entry.handle);
        }
        info!(resources = count, "Resource pool disposed");
    }

    /// Whether [`dispose`](Self::dispose) was called.
    pub fn is_disposed(&self) -> bool {
        self.state.lock().disposed
    }

    /// Active tuning.
    pub fn config(&self) -> &ResourcePoolConfig {
        &self.config
    }
}

impl std::fmt::Debug for ResourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ResourcePool")
            .field("budget", &state.budget)
            .field("allocated", &state.total_allocated())
            .field("textures", &state.textures.len())
            .field("entries", &state.cache.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::resource::backend::HeadlessAllocator;
    use crate::resource::cache::ResourceKind;

    const KB: u64 = 1024;

    fn pool_with(
        config: ResourcePoolConfig,
    ) -> (ResourcePool, Arc<HeadlessAllocator>, Arc<ManualClock>) {
        let alloc = Arc::new(HeadlessAllocator::new());
        let clock = Arc::new(ManualClock::new());
        let pool = ResourcePool::with_clock(config, alloc.clone(), clock.clone());
        (pool, alloc, clock)
    }

    fn small_config() -> ResourcePoolConfig {
        ResourcePoolConfig {
            memory_budget_bytes: 1000 * KB,
            pool_capacity: 4,
            ..Default::default()
        }
    }

    fn entry(alloc: &HeadlessAllocator, id: &str, size: u64, priority: u8) -> CacheEntry {
        let handle = alloc.register(size);
        CacheEntry::new(id, handle, ResourceKind::Texture, size).with_priority(priority)
    }

    #[test]
    fn test_acquire_twice_hits() {
        let (pool, alloc, _) = pool_with(small_config());
        let a = pool.acquire("x", 64, TextureFormat::Rgba8);
        let b = pool.acquire("x", 64, TextureFormat::Rgba8);

        assert!(a.is_some());
        assert_eq!(a, b);
        assert_eq!(alloc.live_count(), 1);
        let stats = pool.stats();
        assert_eq!(stats.pooled_textures, 1);
        assert_eq!(stats.pool_hits, 1);
        assert_eq!(stats.pool_misses, 1);
    }

    #[test]
    fn test_shape_change_replaces_idle_slot() {
        let (pool, alloc, _) = pool_with(small_config());
        let a = pool.acquire("x", 64, TextureFormat::Rgba8).unwrap();
        pool.release("x");
        let b = pool.acquire("x", 32, TextureFormat::Rgba8).unwrap();
        assert_ne!(a, b);
        assert!(!alloc.is_live(a));
        assert_eq!(pool.stats().pooled_textures, 1);
    }

    #[test]
    fn test_shape_change_waits_for_release() {
        let (pool, alloc, _) = pool_with(small_config());
        let a = pool.acquire("x", 64, TextureFormat::Rgba8).unwrap();

        assert!(pool.acquire("x", 32, TextureFormat::Rgba8).is_none());
        assert!(alloc.is_live(a));
        assert_eq!(alloc.live_count(), 1);
        assert_eq!(pool.acquire("x", 64, TextureFormat::Rgba8), Some(a));
    }

    #[test]
    fn test_failed_reshape_keeps_old_slot() {
        let (pool, alloc, _) = pool_with(small_config());
        let a = pool.acquire("x", 64, TextureFormat::Rgba8).unwrap();
        pool.release("x");

        // 1024*1024*4 bytes cannot fit the budget
        assert!(pool.acquire("x", 1024, TextureFormat::Rgba8).is_none());
        assert!(alloc.is_live(a));
        assert_eq!(pool.total_allocated(), 64 * 64 * 4);
        assert_eq!(pool.acquire("x", 64, TextureFormat::Rgba8), Some(a));
    }

    #[test]
    fn test_full_pool_reclaims_idle_lru() {
        let (pool, alloc, _) = pool_with(small_config());
        for i in 0..4 {
            pool.acquire(&format!("t{i}"), 16, TextureFormat::Rgba8).unwrap();
        }
        assert!(pool.acquire("t4", 16, TextureFormat::Rgba8).is_none());

        pool.release("t2");
        pool.release("t1");
        let h = pool.acquire("t4", 16, TextureFormat::Rgba8);
        assert!(h.is_some());
        assert_eq!(alloc.live_count(), 4);
        // t2 was the least recently released
        assert!(pool.acquire("t1", 16, TextureFormat::Rgba8).is_some());
        assert_eq!(pool.stats().pool_hits, 1);
    }

    #[test]
    fn test_acquire_over_budget_returns_none() {
        let (pool, _, _) = pool_with(ResourcePoolConfig {
            memory_budget_bytes: 10 * KB,
            ..small_config()
        });
        // 64*64*4 = 16 KiB
        assert!(pool.acquire("big", 64, TextureFormat::Rgba8).is_none());
        assert_eq!(pool.total_allocated(), 0);
    }

    #[test]
    fn test_acquire_after_dispose() {
        let (pool, alloc, _) = pool_with(small_config());
        pool.acquire("x", 16, TextureFormat::Rgba8);
        pool.dispose();
        assert!(pool.is_disposed());
        assert_eq!(alloc.live_count(), 0);
        assert!(pool.acquire("x", 16, TextureFormat::Rgba8).is_none());
    }

    #[test]
    fn test_put_get_remove() {
        let (pool, alloc, _) = pool_with(small_config());
        let e = entry(&alloc, "noise", 100 * KB, 5);
        let handle = e.handle;
        pool.put(e).unwrap();

        assert_eq!(pool.get("noise"), Some(handle));
        assert_eq!(pool.get("missing"), None);
        assert!(pool.remove("noise"));
        assert!(!alloc.is_live(handle));
        assert!(!pool.contains("noise"));
    }

    #[test]
    fn test_put_replaces_same_id() {
        let (pool, alloc, _) = pool_with(small_config());
        let first = entry(&alloc, "a", 100 * KB, 5);
        let first_handle = first.handle;
        pool.put(first).unwrap();
        pool.put(entry(&alloc, "a", 300 * KB, 5)).unwrap();

        assert!(!alloc.is_live(first_handle));
        assert_eq!(pool.stats().cached_bytes, 300 * KB);
        assert_eq!(pool.stats().cached_entries, 1);
    }

    #[test]
    fn test_put_larger_than_budget() {
        let (pool, alloc, _) = pool_with(small_config());
        let err = pool.put(entry(&alloc, "huge", 2000 * KB, 5)).unwrap_err();
        assert!(matches!(err, ResourceError::ExceedsBudget { .. }));
    }

    #[test]
    fn test_put_evicts_low_priority_to_fit() {
        let (pool, alloc, _) = pool_with(small_config());
        pool.put(entry(&alloc, "low", 400 * KB, 1)).unwrap();
        pool.put(entry(&alloc, "keep", 400 * KB, 9)).unwrap();
        pool.put(entry(&alloc, "new", 300 * KB, 5)).unwrap();

        assert!(!pool.contains("low"));
        assert!(pool.contains("keep"));
        assert!(pool.contains("new"));
        assert!(pool.total_allocated() <= pool.memory_budget());
    }

    #[test]
    fn test_put_budget_exhausted_when_all_protected() {
        let (pool, alloc, _) = pool_with(small_config());
        pool.put(entry(&alloc, "a", 450 * KB, 8)).unwrap();
        pool.put(entry(&alloc, "b", 450 * KB, 8)).unwrap();
        let err = pool.put(entry(&alloc, "c", 200 * KB, 5)).unwrap_err();
        assert!(matches!(err, ResourceError::BudgetExhausted { .. }));
        assert!(pool.contains("a") && pool.contains("b"));
    }

    #[test]
    fn test_failed_replacement_keeps_previous_entry() {
        let (pool, alloc, _) = pool_with(small_config());
        let a = entry(&alloc, "a", 450 * KB, 8);
        let a_handle = a.handle;
        pool.put(a).unwrap();
        pool.put(entry(&alloc, "b", 450 * KB, 8)).unwrap();

        let err = pool.put(entry(&alloc, "a", 600 * KB, 5)).unwrap_err();
        assert!(matches!(err, ResourceError::BudgetExhausted { .. }));
        assert_eq!(pool.get("a"), Some(a_handle));
        assert!(alloc.is_live(a_handle));
        assert_eq!(pool.total_allocated(), 900 * KB);
    }

    #[test]
    fn test_pressure_at_threshold_is_not_high() {
        let (pool, alloc, _) = pool_with(small_config());
        let budget = pool.memory_budget();
        let at_threshold = (budget as f64 * pool.config().pressure_threshold) as u64;
        pool.put(entry(&alloc, "a", at_threshold, 1)).unwrap();
        assert!(!pool.is_under_pressure());

        pool.put(entry(&alloc, "b", 1, 1)).unwrap();
        assert!(pool.is_under_pressure());
    }

    #[test]
    fn test_emergency_cleanup_postcondition() {
        let (pool, alloc, _) = pool_with(small_config());
        for i in 0..7 {
            pool.put(entry(&alloc, &format!("e{i}"), 100 * KB, (i % 5) as u8))
                .unwrap();
        }
        let before = pool.total_allocated();
        let report = pool.perform_emergency_cleanup();

        assert!(report.bytes_freed as f64 >= before as f64 * 0.3);
        assert!(pool.memory_pressure() <= 0.8);
        // Lowest priorities went first
        assert!(!pool.contains("e0"));
        assert!(!pool.contains("e5"));
        assert!(pool.contains("e4"));
    }

    #[test]
    fn test_emergency_spares_in_use_and_protected() {
        let (pool, alloc, _) = pool_with(small_config());
        pool.put(entry(&alloc, "p", 600 * KB, 9)).unwrap();
        pool.acquire("busy", 128, TextureFormat::Rgba8).unwrap(); // 64 KiB

        let report = pool.perform_emergency_cleanup();
        assert!(!report.freed_anything());
        assert!(pool.contains("p"));
        assert!(!pool.has_evictable());
    }

    #[test]
    fn test_scheduled_cleanup() {
        let (pool, alloc, clock) = pool_with(small_config());
        pool.acquire("idle", 16, TextureFormat::Rgba8).unwrap();
        pool.release("idle");
        pool.acquire("busy", 16, TextureFormat::Rgba8).unwrap();
        pool.put(entry(&alloc, "stale", 10 * KB, 3)).unwrap();
        pool.put(entry(&alloc, "protected", 10 * KB, 7)).unwrap();

        clock.advance(Duration::from_secs(61));
        let report = pool.perform_cleanup();

        assert_eq!(report.textures_removed, 1);
        assert_eq!(report.entries_removed, 1);
        assert!(pool.contains("protected"));
        assert_eq!(pool.stats().pooled_textures, 1);
    }

    #[test]
    fn test_cleanup_if_due() {
        let (pool, _, clock) = pool_with(small_config());
        assert!(pool.run_cleanup_if_due().is_none());
        clock.advance(Duration::from_secs(30));
        assert!(pool.run_cleanup_if_due().is_some());
        assert!(pool.run_cleanup_if_due().is_none());
    }

    #[test]
    fn test_spatial_maintenance() {
        let (pool, alloc, clock) = pool_with(small_config());
        let camera = GeoPoint::new(47.0, 8.0);
        let viewport = GeoBounds::around(camera, 10_000.0, 10_000.0);

        let far = GeoBounds::around(camera.offset_meters(200_000.0, 0.0), 1_000.0, 1_000.0);
        let near = GeoBounds::around(camera.offset_meters(20_000.0, 0.0), 1_000.0, 1_000.0);
        pool.put(entry(&alloc, "far", 10 * KB, 9).with_bounds(far)).unwrap();
        pool.put(entry(&alloc, "near", 10 * KB, 1).with_bounds(near)).unwrap();
        pool.put(entry(&alloc, "unbounded", 10 * KB, 1)).unwrap();

        // Not stale yet
        assert!(!pool.update_spatial_cache(&viewport, &camera).freed_anything());

        clock.advance(Duration::from_secs(31));
        let report = pool.update_spatial_cache(&viewport, &camera);
        assert_eq!(report.entries_removed, 1);
        assert!(!pool.contains("far"));
        assert!(pool.contains("near"));
        assert!(pool.contains("unbounded"));
    }

    #[test]
    fn test_shrinking_budget_triggers_cleanup() {
        let (pool, alloc, _) = pool_with(small_config());
        pool.put(entry(&alloc, "a", 300 * KB, 1)).unwrap();
        pool.put(entry(&alloc, "b", 300 * KB, 2)).unwrap();
        pool.set_memory_budget(500 * KB);
        assert!(pool.memory_pressure() <= 0.8);
    }

    #[test]
    fn test_stats_by_kind() {
        let (pool, alloc, _) = pool_with(small_config());
        let h = alloc.register(10 * KB);
        pool.put(CacheEntry::new("prog", h, ResourceKind::Program, 10 * KB))
            .unwrap();
        pool.acquire("tex", 16, TextureFormat::Rgba8).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.bytes_by_kind.get(&ResourceKind::Program), Some(&(10 * KB)));
        assert_eq!(stats.total_allocated, 10 * KB + 16 * 16 * 4);
    }
}
