//! Hysteresis window between automatic adaptation decisions.
//!
//! Both the performance-mode controller and the LOD selector must not act
//! again until a dwell window has passed since their last change. The window
//! is measured either in control-loop ticks or in elapsed time.
//!
//! # State Machine
//!
//! ```text
//!          trigger()                 window elapsed
//!   Ready ----------> Cooling -----------------------> Ready
//!     ^                  |
//!     |    reset()       |
//!     +------------------+
//! ```

use std::time::{Duration, Instant};

/// Default dwell window: 60 control-loop ticks.
pub const DEFAULT_COOLDOWN_TICKS: u32 = 60;

/// How the dwell window is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownPolicy {
    /// Window of N calls to [`Cooldown::tick`] after the last trigger.
    Ticks(u32),
    /// Window of wall (or injected) clock time after the last trigger.
    Duration(Duration),
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        CooldownPolicy::Ticks(DEFAULT_COOLDOWN_TICKS)
    }
}

#[derive(Debug, Clone, Copy)]
enum CooldownState {
    Ready,
    Cooling {
        started_at: Instant,
        ticks_elapsed: u32,
    },
}

/// Rate limiter for adaptation decisions.
#[derive(Debug, Clone)]
pub struct Cooldown {
    policy: CooldownPolicy,
    state: CooldownState,
}

impl Cooldown {
    /// Create a cooldown that starts out ready.
    pub fn new(policy: CooldownPolicy) -> Self {
        Self {
            policy,
            state: CooldownState::Ready,
        }
    }

    /// Count one control-loop tick.
    pub fn tick(&mut self) {
        if let CooldownState::Cooling { ticks_elapsed, .. } = &mut self.state {
            *ticks_elapsed = ticks_elapsed.saturating_add(1);
        }
    }

    /// Whether a new change may be applied at `now`.
    pub fn is_ready(&self, now: Instant) -> bool {
        match self.state {
            CooldownState::Ready => true,
            CooldownState::Cooling {
                started_at,
                ticks_elapsed,
            } => match self.policy {
                CooldownPolicy::Ticks(window) => ticks_elapsed >= window,
                CooldownPolicy::Duration(window) => now.saturating_duration_since(started_at) >= window,
            },
        }
    }

    /// Start a new window at `now`.
    pub fn trigger(&mut self, now: Instant) {
        self.state = CooldownState::Cooling {
            started_at: now,
            ticks_elapsed: 0,
        };
    }

    /// Drop any running window.
    pub fn reset(&mut self) {
        self.state = CooldownState::Ready;
    }

    /// Whether a window is currently running.
    pub fn is_cooling(&self, now: Instant) -> bool {
        !self.is_ready(now)
    }

    /// The configured policy.
    pub fn policy(&self) -> CooldownPolicy {
        self.policy
    }
}

impl Default for Cooldown {
    fn default() -> Self {
        Self::new(CooldownPolicy::default())
    }
}
