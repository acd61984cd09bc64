//! Memory statistics and cleanup reports.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::cache::ResourceKind;

/// What triggered a cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupKind {
    /// Periodic removal of long-unused resources.
    Scheduled,
    /// Pressure-driven eviction.
    Emergency,
    /// Viewport-driven eviction of far, stale entries.
    Spatial,
}

impl fmt::Display for CleanupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupKind::Scheduled => write!(f, "scheduled"),
            CleanupKind::Emergency => write!(f, "emergency"),
            CleanupKind::Spatial => write!(f, "spatial"),
        }
    }
}

/// Result of a cleanup pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupReport {
    /// What triggered the pass.
    pub kind: CleanupKind,
    /// Cache entries evicted.
    pub entries_removed: usize,
    /// Pooled textures destroyed.
    pub textures_removed: usize,
    /// Total bytes freed.
    pub bytes_freed: u64,
    /// Pressure after the pass.
    pub pressure_after: f64,
}

impl CleanupReport {
    pub(crate) fn new(kind: CleanupKind) -> Self {
        Self {
            kind,
            entries_removed: 0,
            textures_removed: 0,
            bytes_freed: 0,
            pressure_after: 0.0,
        }
    }

    /// Whether anything was freed.
    pub fn freed_anything(&self) -> bool {
        self.entries_removed > 0 || self.textures_removed > 0
    }
}

impl fmt::Display for CleanupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} cleanup: removed {} entries and {} textures, freed {} bytes (pressure {:.0}%)",
            self.kind,
            self.entries_removed,
            self.textures_removed,
            self.bytes_freed,
            self.pressure_after * 100.0
        )
    }
}

/// Snapshot of pool and cache accounting.
///
/// Every figure is computed from the live maps at the time of the call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryStats {
    /// Bytes held by pooled textures and cache entries.
    pub total_allocated: u64,
    /// Configured budget.
    pub budget: u64,
    /// `total_allocated / budget`.
    pub pressure: f64,
    /// Allocated texture slots.
    pub pooled_textures: usize,
    /// Slots held by callers.
    pub pooled_in_use: usize,
    /// Bytes held by pooled textures.
    pub pooled_bytes: u64,
    /// Cache entries.
    pub cached_entries: usize,
    /// Bytes held by cache entries.
    pub cached_bytes: u64,
    /// Cache bytes per kind.
    pub bytes_by_kind: BTreeMap<ResourceKind, u64>,
    /// Texture reuses.
    pub pool_hits: u64,
    /// Texture requests that needed a new allocation.
    pub pool_misses: u64,
    /// Successful cache lookups.
    pub cache_hits: u64,
    /// Failed cache lookups.
    pub cache_misses: u64,
}

impl MemoryStats {
    /// Fraction of texture requests served from the pool.
    pub fn pool_hit_rate(&self) -> f64 {
        hit_rate(self.pool_hits, self.pool_misses)
    }

    /// Fraction of cache lookups that hit.
    pub fn cache_hit_rate(&self) -> f64 {
        hit_rate(self.cache_hits, self.cache_misses)
    }
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_display() {
        let mut r = CleanupReport::new(CleanupKind::Emergency);
        r.entries_removed = 3;
        r.bytes_freed = 4096;
        r.pressure_after = 0.5;
        let s = r.to_string();
        assert!(s.starts_with("emergency cleanup"));
        assert!(s.contains("4096"));
        assert!(s.contains("50%"));
        assert!(r.freed_anything());
    }

    #[test]
    fn test_hit_rate() {
        assert_eq!(hit_rate(0, 0), 0.0);
        assert_eq!(hit_rate(3, 1), 0.75);
    }
}
