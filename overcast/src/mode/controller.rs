//! Performance mode control loop.
//!
//! Each [`ModeController::tick`] derives a ceiling from the device
//! capability, then refines the current mode from the live frame rate:
//!
//! ```text
//! mode > ceiling                         -> drop to ceiling
//! rate < target * downgrade_ratio        -> one step down
//! rate > target * upgrade_ratio & stable -> one step up (if ceiling allows)
//! ```
//!
//! Automatic transitions are rate limited by a [`Cooldown`]. A manual
//! [`set_mode`](ModeController::set_mode) suspends adaptation until
//! [`enable_adaptation`](ModeController::enable_adaptation) is called.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::capability::CapabilityProfile;
use crate::clock::{system_clock, SharedClock};
use crate::cooldown::{Cooldown, CooldownPolicy};
use crate::frame::FrameMetrics;
use crate::tier::{is_mode_supported, recommended_mode, PerformanceMode};

/// Rate below `target * ratio` that triggers a downgrade.
pub const DEFAULT_DOWNGRADE_RATIO: f64 = 0.8;

/// Rate above `target * ratio` (with stable frames) that allows an upgrade.
pub const DEFAULT_UPGRADE_RATIO: f64 = 0.95;

/// Mode controller tuning.
#[derive(Debug, Clone)]
pub struct ModeControllerConfig {
    /// Mode before the first tick.
    pub initial_mode: PerformanceMode,
    /// Frame rate the controller steers towards.
    pub target_frame_rate: f64,
    /// Dwell window between automatic transitions.
    pub cooldown: CooldownPolicy,
    /// Downgrade below this fraction of the target (0.0-1.0).
    pub downgrade_ratio: f64,
    /// Upgrade above this fraction of the target (0.0-1.0).
    pub upgrade_ratio: f64,
}

impl Default for ModeControllerConfig {
    fn default() -> Self {
        Self {
            initial_mode: PerformanceMode::Medium,
            target_frame_rate: 60.0,
            cooldown: CooldownPolicy::default(),
            downgrade_ratio: DEFAULT_DOWNGRADE_RATIO,
            upgrade_ratio: DEFAULT_UPGRADE_RATIO,
        }
    }
}

/// Why the mode changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeChangeReason {
    /// The capability ceiling is below the current mode.
    Ceiling,
    /// Frame rate fell below the downgrade threshold.
    LowFrameRate,
    /// Frame rate recovered and is stable.
    Recovered,
    /// Host override via `set_mode`.
    Manual,
    /// Emergency override via `force_mode`.
    Forced,
}

impl std::fmt::Display for ModeChangeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModeChangeReason::Ceiling => write!(f, "capability ceiling"),
            ModeChangeReason::LowFrameRate => write!(f, "low frame rate"),
            ModeChangeReason::Recovered => write!(f, "frame rate recovered"),
            ModeChangeReason::Manual => write!(f, "manual override"),
            ModeChangeReason::Forced => write!(f, "forced"),
        }
    }
}

/// A recorded mode change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeTransition {
    /// Mode before the change.
    pub from: PerformanceMode,
    /// Mode after the change.
    pub to: PerformanceMode,
    /// Why it changed.
    pub reason: ModeChangeReason,
    /// When it changed.
    pub at: Instant,
}

/// Selects the active performance mode.
pub struct ModeController {
    config: ModeControllerConfig,
    mode: PerformanceMode,
    cooldown: Cooldown,
    manual: bool,
    degraded: bool,
    ceiling: PerformanceMode,
    last_transition: Option<ModeTransition>,
    clock: SharedClock,
}

impl ModeController {
    /// Create a controller using the system clock.
    pub fn new(config: ModeControllerConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Create a controller with an injected clock.
    pub fn with_clock(config: ModeControllerConfig, clock: SharedClock) -> Self {
        Self {
            mode: config.initial_mode,
            cooldown: Cooldown::new(config.cooldown),
            manual: false,
            degraded: false,
            ceiling: PerformanceMode::High,
            last_transition: None,
            clock,
            config,
        }
    }

    /// Create a controller with default tuning.
    pub fn with_defaults() -> Self {
        Self::new(ModeControllerConfig::default())
    }

    /// Run one control-loop iteration and return the resulting mode.
    ///
    /// `capability == None` is treated as an unknown device: the ceiling is
    /// `Low` and the controller reports itself degraded.
    pub fn tick(
        &mut self,
        capability: Option<&CapabilityProfile>,
        metrics: &FrameMetrics,
    ) -> PerformanceMode {
        self.cooldown.tick();
        self.evaluate(capability, metrics)
    }

    /// Same decision as [`tick`](Self::tick), but does not count as a tick
    /// of the cooldown window. Used by timers running beside the per-frame
    /// loop.
    pub fn reevaluate(
        &mut self,
        capability: Option<&CapabilityProfile>,
        metrics: &FrameMetrics,
    ) -> PerformanceMode {
        self.evaluate(capability, metrics)
    }

    fn evaluate(
        &mut self,
        capability: Option<&CapabilityProfile>,
        metrics: &FrameMetrics,
    ) -> PerformanceMode {
        let (ceiling, degraded) = match capability {
            Some(cap) => (recommended_mode(cap), cap.is_degraded()),
            None => (PerformanceMode::Low, true),
        };
        self.ceiling = ceiling;
        self.degraded = degraded;

        if self.manual {
            return self.mode;
        }

        let Some((candidate, reason)) = self.candidate(ceiling, metrics) else {
            return self.mode;
        };

        let now = self.clock.now();
        if !self.cooldown.is_ready(now) {
            debug!(
                current = %self.mode,
                candidate = %candidate,
                reason = %reason,
                "Mode change deferred by cooldown"
            );
            return self.mode;
        }

        self.apply(candidate, reason, now);
        self.cooldown.trigger(now);
        self.mode
    }

    fn candidate(
        &self,
        ceiling: PerformanceMode,
        metrics: &FrameMetrics,
    ) -> Option<(PerformanceMode, ModeChangeReason)> {
        if self.mode > ceiling {
            return Some((ceiling, ModeChangeReason::Ceiling));
        }

        if metrics.sample_count == 0 {
            return None;
        }

        let rate = metrics.average_rate;
        let target = self.config.target_frame_rate.max(1.0);

        if rate < target * self.config.downgrade_ratio {
            let next = self.mode.downgrade();
            return (next != self.mode).then_some((next, ModeChangeReason::LowFrameRate));
        }

        if rate > target * self.config.upgrade_ratio && metrics.is_stable {
            let next = self.mode.upgrade();
            if next != self.mode && next <= ceiling {
                return Some((next, ModeChangeReason::Recovered));
            }
        }

        None
    }

    fn apply(&mut self, to: PerformanceMode, reason: ModeChangeReason, now: Instant) {
        let from = self.mode;
        if from == to {
            return;
        }
        self.mode = to;
        self.last_transition = Some(ModeTransition {
            from,
            to,
            reason,
            at: now,
        });
        info!(from = %from, to = %to, reason = %reason, "Performance mode transition");
    }

    /// Current mode.
    pub fn mode(&self) -> PerformanceMode {
        self.mode
    }

    /// Ceiling computed on the last tick.
    pub fn ceiling(&self) -> PerformanceMode {
        self.ceiling
    }

    /// Most recent transition, if any.
    pub fn last_transition(&self) -> Option<ModeTransition> {
        self.last_transition
    }

    /// Set the mode explicitly and suspend automatic adaptation.
    pub fn set_mode(&mut self, mode: PerformanceMode) {
        self.manual = true;
        let now = self.clock.now();
        self.apply(mode, ModeChangeReason::Manual, now);
    }

    /// Resume automatic adaptation after [`set_mode`](Self::set_mode).
    pub fn enable_adaptation(&mut self) {
        if self.manual {
            info!(mode = %self.mode, "Automatic mode adaptation resumed");
        }
        self.manual = false;
    }

    /// Set the mode immediately, bypassing the cooldown, and restart the
    /// cooldown window.
    pub fn force_mode(&mut self, mode: PerformanceMode) {
        let now = self.clock.now();
        if mode != self.mode {
            warn!(from = %self.mode, to = %mode, "Forcing performance mode");
        }
        self.apply(mode, ModeChangeReason::Forced, now);
        self.cooldown.trigger(now);
    }

    /// Whether adaptation is suspended by a manual override.
    pub fn is_manual(&self) -> bool {
        self.manual
    }

    /// Whether the last tick ran without a usable capability profile.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Whether the device can afford `mode`.
    pub fn is_mode_supported(&self, mode: PerformanceMode, capability: &CapabilityProfile) -> bool {
        is_mode_supported(mode, capability)
    }

    /// Whether an automatic transition is currently blocked by the cooldown.
    pub fn is_cooling_down(&self) -> bool {
        self.cooldown.is_cooling(self.clock.now())
    }

    /// Frame rate being steered towards.
    pub fn target_frame_rate(&self) -> f64 {
        self.config.target_frame_rate
    }

    /// Change the frame-rate target.
    pub fn set_target_frame_rate(&mut self, rate: f64) {
        self.config.target_frame_rate = rate.max(1.0);
    }

    /// Active tuning.
    pub fn config(&self) -> &ModeControllerConfig {
        &self.config
    }
}

impl std::fmt::Debug for ModeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeController")
            .field("mode", &self.mode)
            .field("ceiling", &self.ceiling)
            .field("manual", &self.manual)
            .field("degraded", &self.degraded)
            .finish()
    }
}
