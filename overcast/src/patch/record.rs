//! Per-patch bookkeeping.

use std::time::Instant;

use serde::Serialize;

use super::grid::PatchId;
use crate::geo::GeoBounds;

/// Default number of visibility passes an errored patch waits before it
/// becomes loadable again.
pub const DEFAULT_RETRY_AFTER_PASSES: u32 = 3;

/// Load state of a patch.
///
/// ```text
///            queued & started         success
/// Unloaded ------------------> Loading -------> Loaded
///    ^                            |               |
///    |          retry policy      | failure       | out of range / over capacity
///    +------------------------- Error             |
///    +--------------------------------------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchState {
    /// Known but not loaded.
    #[default]
    Unloaded,
    /// A load is in flight.
    Loading,
    /// Payload available.
    Loaded,
    /// The last load failed.
    Error,
}

impl std::fmt::Display for PatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchState::Unloaded => write!(f, "unloaded"),
            PatchState::Loading => write!(f, "loading"),
            PatchState::Loaded => write!(f, "loaded"),
            PatchState::Error => write!(f, "error"),
        }
    }
}

/// When a failed patch may be loaded again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorRetryPolicy {
    /// Failed patches stay in `Error` until a forced reload.
    Never,
    /// A failed patch becomes loadable again once it has been required by
    /// this many visibility passes since the failure.
    AfterPasses(u32),
}

impl Default for ErrorRetryPolicy {
    fn default() -> Self {
        ErrorRetryPolicy::AfterPasses(DEFAULT_RETRY_AFTER_PASSES)
    }
}

/// A patch the scheduler knows about.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatchRecord {
    /// Grid id.
    pub id: PatchId,
    /// Geographic extent.
    pub bounds: GeoBounds,
    /// Load state.
    pub state: PatchState,
    /// `1 / (1 + distance)` from the viewport center; higher loads first.
    pub priority: f64,
    /// Last visibility pass that required this patch.
    #[serde(skip)]
    pub last_accessed_at: Instant,
    /// Failed loads over the record's lifetime.
    pub failure_count: u32,
    /// Visibility passes since the last failure.
    pub error_passes: u32,
}

impl PatchRecord {
    /// A fresh, unloaded record.
    pub fn new(id: PatchId, bounds: GeoBounds, now: Instant) -> Self {
        Self {
            id,
            bounds,
            state: PatchState::Unloaded,
            priority: 0.0,
            last_accessed_at: now,
            failure_count: 0,
            error_passes: 0,
        }
    }

    /// Count a visibility pass for an errored record and, if the policy
    /// allows, make it loadable again. Returns whether it became loadable.
    pub fn note_error_pass(&mut self, policy: ErrorRetryPolicy) -> bool {
        if self.state != PatchState::Error {
            return false;
        }
        self.error_passes = self.error_passes.saturating_add(1);
        match policy {
            ErrorRetryPolicy::Never => false,
            ErrorRetryPolicy::AfterPasses(n) if self.error_passes >= n => {
                self.state = PatchState::Unloaded;
                self.error_passes = 0;
                true
            }
            ErrorRetryPolicy::AfterPasses(_) => false,
        }
    }
}

/// Priority for a patch whose center is `distance_m` from the viewport center.
pub fn priority_for_distance(distance_m: f64) -> f64 {
    1.0 / (1.0 + distance_m.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn errored() -> PatchRecord {
        let mut r = PatchRecord::new(
            PatchId::new(0, 0),
            GeoBounds::new(0.0, 1.0, 0.0, 1.0),
            Instant::now(),
        );
        r.state = PatchState::Error;
        r
    }

    #[test]
    fn test_retry_after_passes() {
        let mut r = errored();
        let policy = ErrorRetryPolicy::AfterPasses(3);
        assert!(!r.note_error_pass(policy));
        assert!(!r.note_error_pass(policy));
        assert!(r.note_error_pass(policy));
        assert_eq!(r.state, PatchState::Unloaded);
        assert_eq!(r.error_passes, 0);
    }

    #[test]
    fn test_retry_never() {
        let mut r = errored();
        for _ in 0..10 {
            assert!(!r.note_error_pass(ErrorRetryPolicy::Never));
        }
        assert_eq!(r.state, PatchState::Error);
    }

    #[test]
    fn test_non_error_records_ignore_passes() {
        let mut r = errored();
        r.state = PatchState::Loaded;
        assert!(!r.note_error_pass(ErrorRetryPolicy::AfterPasses(1)));
        assert_eq!(r.error_passes, 0);
    }

    #[test]
    fn test_priority_decreases_with_distance() {
        assert_eq!(priority_for_distance(0.0), 1.0);
        assert!(priority_for_distance(100.0) > priority_for_distance(1000.0));
        assert_eq!(priority_for_distance(-5.0), 1.0);
    }
}
