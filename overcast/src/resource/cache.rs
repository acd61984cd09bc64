//! Tagged resource cache with priority-aware eviction.
//!
//! Entries are indexed by id and, for eviction, by `(priority, stamp, id)`
//! in a `BTreeSet`: the first element is always the lowest-priority,
//! least-recently-accessed entry.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::backend::ResourceHandle;
use crate::geo::GeoBounds;

/// Highest cache priority.
pub const MAX_PRIORITY: u8 = 10;

/// What a cached resource is.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Sampled texture (noise, density, gradient).
    Texture,
    /// Render target.
    Framebuffer,
    /// Vertex or index data.
    Buffer,
    /// Compiled shader program.
    Program,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Texture => write!(f, "texture"),
            ResourceKind::Framebuffer => write!(f, "framebuffer"),
            ResourceKind::Buffer => write!(f, "buffer"),
            ResourceKind::Program => write!(f, "program"),
        }
    }
}

/// Default priority for new entries.
pub const DEFAULT_PRIORITY: u8 = 5;

/// A resource to be cached.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Cache key.
    pub id: String,
    /// GPU handle, owned by the cache from now on.
    pub handle: ResourceHandle,
    /// Resource kind.
    pub kind: ResourceKind,
    /// GPU memory used.
    pub size_bytes: u64,
    /// 0 (first to go) to 10; clamped.
    pub priority: u8,
    /// Geographic extent, for spatial maintenance.
    pub bounds: Option<GeoBounds>,
}

impl CacheEntry {
    /// An entry with [`DEFAULT_PRIORITY`] and no bounds.
    pub fn new(
        id: impl Into<String>,
        handle: ResourceHandle,
        kind: ResourceKind,
        size_bytes: u64,
    ) -> Self {
        Self {
            id: id.into(),
            handle,
            kind,
            size_bytes,
            priority: DEFAULT_PRIORITY,
            bounds: None,
        }
    }

    /// Set the eviction priority.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Attach a geographic extent.
    pub fn with_bounds(mut self, bounds: GeoBounds) -> Self {
        self.bounds = Some(bounds);
        self
    }
}

/// A cached resource.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResource {
    /// Cache key.
    pub id: String,
    /// GPU handle.
    pub handle: ResourceHandle,
    /// Resource kind.
    pub kind: ResourceKind,
    /// GPU memory used.
    pub size_bytes: u64,
    /// 0 (first to go) to 10.
    pub priority: u8,
    /// Last insert or lookup.
    pub last_accessed_at: Instant,
    /// Lookups since insertion.
    pub access_count: u64,
    /// Geographic extent, for spatial maintenance.
    pub bounds: Option<GeoBounds>,
    stamp: u64,
}

/// Entries plus the eviction index.
#[derive(Debug, Default)]
pub struct ResourceCache {
    entries: HashMap<String, CachedResource>,
    eviction: BTreeSet<(u8, u64, String)>,
    next_stamp: u64,
    hits: u64,
    misses: u64,
}

impl ResourceCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, returning the one it replaced.
    pub fn insert(&mut self, entry: CacheEntry, now: Instant) -> Option<CachedResource> {
        let replaced = self.remove(&entry.id);
        let stamp = self.bump();
        let priority = entry.priority.min(MAX_PRIORITY);

        self.eviction.insert((priority, stamp, entry.id.clone()));
        self.entries.insert(
            entry.id.clone(),
            CachedResource {
                id: entry.id,
                handle: entry.handle,
                kind: entry.kind,
                size_bytes: entry.size_bytes,
                priority,
                last_accessed_at: now,
                access_count: 0,
                bounds: entry.bounds,
                stamp,
            },
        );
        replaced
    }

    /// Look up an entry and mark it accessed.
    pub fn get(&mut self, id: &str, now: Instant) -> Option<&CachedResource> {
        let stamp = self.bump();
        let Some(entry) = self.entries.get_mut(id) else {
            self.misses += 1;
            return None;
        };

        self.eviction
            .remove(&(entry.priority, entry.stamp, entry.id.clone()));
        entry.stamp = stamp;
        entry.last_accessed_at = now;
        entry.access_count += 1;
        self.eviction
            .insert((entry.priority, entry.stamp, entry.id.clone()));
        self.hits += 1;
        Some(entry)
    }

    /// Look at an entry without touching its access time.
    pub fn peek(&self, id: &str) -> Option<&CachedResource> {
        self.entries.get(id)
    }

    /// Remove an entry.
    pub fn remove(&mut self, id: &str) -> Option<CachedResource> {
        let entry = self.entries.remove(id)?;
        self.eviction
            .remove(&(entry.priority, entry.stamp, entry.id.clone()));
        Some(entry)
    }

    /// Put back an entry taken out with [`remove`](Self::remove), keeping its
    /// place in eviction order.
    pub fn restore(&mut self, entry: CachedResource) {
        self.eviction
            .insert((entry.priority, entry.stamp, entry.id.clone()));
        if let Some(displaced) = self.entries.insert(entry.id.clone(), entry) {
            self.eviction
                .remove(&(displaced.priority, displaced.stamp, displaced.id));
        }
    }

    /// Remove the lowest-priority, least-recently-accessed entry whose
    /// priority is below `protected_priority`.
    pub fn pop_evictable(&mut self, protected_priority: u8) -> Option<CachedResource> {
        let (priority, _, id) = self.eviction.first()?.clone();
        if priority >= protected_priority {
            return None;
        }
        self.remove(&id)
    }

    /// Whether any entry below `protected_priority` remains.
    pub fn has_evictable(&self, protected_priority: u8) -> bool {
        self.eviction
            .first()
            .is_some_and(|(p, _, _)| *p < protected_priority)
    }

    /// Remove entries matching `predicate`.
    pub fn remove_where<F>(&mut self, mut predicate: F) -> Vec<CachedResource>
    where
        F: FnMut(&CachedResource) -> bool,
    {
        let ids: Vec<String> = self
            .entries
            .values()
            .filter(|e| predicate(e))
            .map(|e| e.id.clone())
            .collect();
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Remove entries below `protected_priority` unused for longer than
    /// `max_unused`.
    pub fn remove_stale(
        &mut self,
        now: Instant,
        max_unused: Duration,
        protected_priority: u8,
    ) -> Vec<CachedResource> {
        self.remove_where(|e| {
            e.priority < protected_priority
                && now.saturating_duration_since(e.last_accessed_at) > max_unused
        })
    }

    /// Remove every entry.
    pub fn drain(&mut self) -> Vec<CachedResource> {
        self.eviction.clear();
        self.entries.drain().map(|(_, e)| e).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// GPU memory held by all entries.
    pub fn total_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size_bytes).sum()
    }

    /// GPU memory per kind.
    pub fn bytes_by_kind(&self) -> BTreeMap<ResourceKind, u64> {
        let mut totals = BTreeMap::new();
        for e in self.entries.values() {
            *totals.entry(e.kind).or_insert(0) += e.size_bytes;
        }
        totals
    }

    /// Successful lookups.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Failed lookups.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    fn bump(&mut self) -> u64 {
        self.next_stamp += 1;
        self.next_stamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(cache: &mut ResourceCache, id: &str, priority: u8, now: Instant) {
        cache.insert(
            CacheEntry::new(id, ResourceHandle(1), ResourceKind::Texture, 100).with_priority(priority),
            now,
        );
    }

    #[test]
    fn test_eviction_order_priority_then_age() {
        let now = Instant::now();
        let mut cache = ResourceCache::new();
        put(&mut cache, "p5-old", 5, now);
        put(&mut cache, "p2", 2, now);
        put(&mut cache, "p5-new", 5, now);
        put(&mut cache, "p9", 9, now);

        assert_eq!(cache.pop_evictable(7).map(|e| e.id), Some("p2".into()));
        assert_eq!(cache.pop_evictable(7).map(|e| e.id), Some("p5-old".into()));
        assert_eq!(cache.pop_evictable(7).map(|e| e.id), Some("p5-new".into()));
        assert!(cache.pop_evictable(7).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let now = Instant::now();
        let mut cache = ResourceCache::new();
        put(&mut cache, "a", 3, now);
        put(&mut cache, "b", 3, now);

        assert!(cache.get("a", now).is_some());
        assert_eq!(cache.pop_evictable(7).map(|e| e.id), Some("b".into()));
        assert_eq!(cache.peek("a").map(|e| e.access_count), Some(1));
    }

    #[test]
    fn test_replace_same_id() {
        let now = Instant::now();
        let mut cache = ResourceCache::new();
        put(&mut cache, "a", 3, now);
        let replaced = cache.insert(
            CacheEntry::new("a", ResourceHandle(2), ResourceKind::Buffer, 500).with_priority(4),
            now,
        );

        assert_eq!(replaced.map(|e| e.size_bytes), Some(100));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), 500);
        assert_eq!(cache.bytes_by_kind().get(&ResourceKind::Buffer), Some(&500));
        assert!(cache.bytes_by_kind().get(&ResourceKind::Texture).is_none());
    }

    #[test]
    fn test_priority_is_clamped() {
        let now = Instant::now();
        let mut cache = ResourceCache::new();
        put(&mut cache, "a", 200, now);
        assert_eq!(cache.peek("a").map(|e| e.priority), Some(MAX_PRIORITY));
    }

    #[test]
    fn test_remove_stale_spares_protected() {
        let t0 = Instant::now();
        let mut cache = ResourceCache::new();
        put(&mut cache, "stale", 3, t0);
        put(&mut cache, "protected", 8, t0);
        put(&mut cache, "fresh", 3, t0 + Duration::from_secs(100));

        let removed = cache.remove_stale(t0 + Duration::from_secs(120), Duration::from_secs(60), 7);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, "stale");
    }

    #[test]
    fn test_hit_miss_counters() {
        let now = Instant::now();
        let mut cache = ResourceCache::new();
        put(&mut cache, "a", 3, now);
        cache.get("a", now);
        cache.get("missing", now);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }
}
