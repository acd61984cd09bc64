//! Pooled textures with LRU reuse.
//!
//! Slots are keyed by id. A slot is reused when a caller asks for the same
//! id, resolution and format again. Released slots stay allocated and are
//! kept in an idle index ordered by a monotonic access stamp, so the least
//! recently used idle slot is always the first entry of a `BTreeMap`.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use super::backend::{ResourceHandle, TextureFormat};

/// Default number of pooled texture slots.
pub const DEFAULT_POOL_CAPACITY: usize = 32;

/// One pooled texture.
#[derive(Debug, Clone, PartialEq)]
pub struct PooledTexture {
    /// Caller-chosen slot id.
    pub id: String,
    /// GPU handle.
    pub handle: ResourceHandle,
    /// GPU memory used.
    pub size_bytes: u64,
    /// Edge length in texels.
    pub resolution: u32,
    /// Texel format.
    pub format: TextureFormat,
    /// Last acquire or release.
    pub last_used_at: Instant,
    /// Whether a caller currently holds the slot.
    pub in_use: bool,
    stamp: u64,
}

impl PooledTexture {
    /// A freshly allocated, in-use slot.
    pub fn new(
        id: impl Into<String>,
        handle: ResourceHandle,
        size_bytes: u64,
        resolution: u32,
        format: TextureFormat,
        now: Instant,
    ) -> Self {
        Self {
            id: id.into(),
            handle,
            size_bytes,
            resolution,
            format,
            last_used_at: now,
            in_use: true,
            stamp: 0,
        }
    }

    fn matches(&self, resolution: u32, format: TextureFormat) -> bool {
        self.resolution == resolution && self.format == format
    }
}

/// Texture slots plus the idle LRU index.
#[derive(Debug)]
pub struct TexturePool {
    slots: HashMap<String, PooledTexture>,
    idle: BTreeMap<u64, String>,
    capacity: usize,
    next_stamp: u64,
    hits: u64,
    misses: u64,
}

impl TexturePool {
    /// Create a pool holding at most `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: HashMap::new(),
            idle: BTreeMap::new(),
            capacity: capacity.max(1),
            next_stamp: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Reuse the slot for `id` if it has the requested shape.
    ///
    /// Counts a hit or a miss and marks a hit in use.
    pub fn try_reuse(
        &mut self,
        id: &str,
        resolution: u32,
        format: TextureFormat,
        now: Instant,
    ) -> Option<ResourceHandle> {
        let stamp = self.bump();
        let Some(slot) = self.slots.get_mut(id) else {
            self.misses += 1;
            return None;
        };
        if !slot.matches(resolution, format) {
            self.misses += 1;
            return None;
        }

        if !slot.in_use {
            self.idle.remove(&slot.stamp);
        }
        slot.in_use = true;
        slot.last_used_at = now;
        slot.stamp = stamp;
        self.hits += 1;
        Some(slot.handle)
    }

    /// Add a slot. The caller must have made room first.
    pub fn insert(&mut self, mut slot: PooledTexture) {
        slot.stamp = self.bump();
        if !slot.in_use {
            self.idle.insert(slot.stamp, slot.id.clone());
        }
        if let Some(old) = self.slots.insert(slot.id.clone(), slot) {
            if !old.in_use {
                self.idle.remove(&old.stamp);
            }
        }
    }

    /// Mark `id` idle. Returns `false` if it is unknown or already idle.
    pub fn release(&mut self, id: &str, now: Instant) -> bool {
        let stamp = self.bump();
        let Some(slot) = self.slots.get_mut(id) else {
            return false;
        };
        if !slot.in_use {
            return false;
        }
        slot.in_use = false;
        slot.last_used_at = now;
        slot.stamp = stamp;
        self.idle.insert(stamp, slot.id.clone());
        true
    }

    /// Remove `id` regardless of state.
    pub fn take(&mut self, id: &str) -> Option<PooledTexture> {
        let slot = self.slots.remove(id)?;
        if !slot.in_use {
            self.idle.remove(&slot.stamp);
        }
        Some(slot)
    }

    /// Remove the least recently used idle slot.
    pub fn pop_lru_idle(&mut self) -> Option<PooledTexture> {
        let (_, id) = self.idle.pop_first()?;
        self.slots.remove(&id)
    }

    /// Remove every idle slot unused for longer than `max_unused`.
    pub fn take_idle_older_than(&mut self, now: Instant, max_unused: Duration) -> Vec<PooledTexture> {
        let expired: Vec<String> = self
            .idle
            .values()
            .filter(|id| {
                self.slots
                    .get(*id)
                    .is_some_and(|s| now.saturating_duration_since(s.last_used_at) > max_unused)
            })
            .cloned()
            .collect();

        expired.iter().filter_map(|id| self.take(id)).collect()
    }

    /// Remove every slot.
    pub fn drain(&mut self) -> Vec<PooledTexture> {
        self.idle.clear();
        self.slots.drain().map(|(_, s)| s).collect()
    }

    /// Look at a slot.
    pub fn get(&self, id: &str) -> Option<&PooledTexture> {
        self.slots.get(id)
    }

    /// Allocated slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slot is allocated.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots currently held by callers.
    pub fn in_use_count(&self) -> usize {
        self.slots.len() - self.idle.len()
    }

    /// Idle slots.
    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    /// Whether the pool is at capacity.
    pub fn is_full(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    /// Maximum number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// GPU memory held by all slots.
    pub fn total_bytes(&self) -> u64 {
        self.slots.values().map(|s| s.size_bytes).sum()
    }

    /// GPU memory held by idle slots.
    pub fn idle_bytes(&self) -> u64 {
        self.idle
            .values()
            .filter_map(|id| self.slots.get(id))
            .map(|s| s.size_bytes)
            .sum()
    }

    /// Reuse count.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Requests that needed a new allocation.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    fn bump(&mut self) -> u64 {
        self.next_stamp += 1;
        self.next_stamp
    }
}

impl Default for TexturePool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}
