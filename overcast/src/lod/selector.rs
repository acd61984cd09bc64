//! Zoom-driven LOD selection with frame-rate adaptation.

use std::sync::Arc;

use tracing::{debug, info};

use super::ladder::{default_ladder, LodLevel};
use crate::capability::CapabilityProfile;
use crate::clock::{system_clock, SharedClock};
use crate::cooldown::{Cooldown, CooldownPolicy};
use crate::tier::{tier_for, PerformanceMode};

/// Consecutive below-target checks before stepping down.
pub const DEFAULT_DEGRADE_AFTER: u32 = 3;

/// Headroom (fps) above target required before stepping up.
pub const DEFAULT_UPGRADE_MARGIN_FPS: f64 = 10.0;

/// LOD selector tuning.
#[derive(Debug, Clone)]
pub struct LodSelectorConfig {
    /// Consecutive below-target checks before stepping down.
    pub degrade_after: u32,
    /// Achieved rate must exceed `target + margin` to step up.
    pub upgrade_margin_fps: f64,
    /// Dwell window between adaptation steps.
    pub cooldown: CooldownPolicy,
}

impl Default for LodSelectorConfig {
    fn default() -> Self {
        Self {
            degrade_after: DEFAULT_DEGRADE_AFTER,
            upgrade_margin_fps: DEFAULT_UPGRADE_MARGIN_FPS,
            cooldown: CooldownPolicy::default(),
        }
    }
}

/// Picks LOD levels for a zoom, mode and device.
pub struct LodSelector {
    levels: Vec<Arc<LodLevel>>,
    config: LodSelectorConfig,
    below_target: u32,
    cooldown: Cooldown,
    clock: SharedClock,
}

impl LodSelector {
    /// Create a selector over the default ladder.
    pub fn new(config: LodSelectorConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Create a selector with an injected clock.
    pub fn with_clock(config: LodSelectorConfig, clock: SharedClock) -> Self {
        Self {
            levels: default_ladder(),
            cooldown: Cooldown::new(config.cooldown),
            below_target: 0,
            config,
            clock,
        }
    }

    /// Create a selector with default tuning.
    pub fn with_defaults() -> Self {
        Self::new(LodSelectorConfig::default())
    }

    /// The ladder, lowest complexity first.
    pub fn levels(&self) -> &[Arc<LodLevel>] {
        &self.levels
    }

    /// The lowest-complexity level.
    pub fn lowest(&self) -> Arc<LodLevel> {
        Arc::clone(&self.levels[0])
    }

    /// Look up a level by name.
    pub fn level(&self, name: &str) -> Option<Arc<LodLevel>> {
        self.levels.iter().find(|l| l.name == name).cloned()
    }

    /// Position of `level` on the ladder.
    pub fn index_of(&self, level: &LodLevel) -> Option<usize> {
        self.levels.iter().position(|l| l.name == level.name)
    }

    /// Select the level for `zoom`.
    ///
    /// Candidates are the levels whose zoom range contains `zoom`, or the
    /// level with the nearest range midpoint when none does. The most
    /// complex candidate the device and mode can handle wins; if none can,
    /// the least complex candidate is returned.
    pub fn select(
        &self,
        zoom: f64,
        mode: PerformanceMode,
        capability: &CapabilityProfile,
    ) -> Arc<LodLevel> {
        let zoom = if zoom.is_finite() { zoom } else { 0.0 };

        let mut candidates: Vec<&Arc<LodLevel>> = self
            .levels
            .iter()
            .filter(|l| l.zoom_range.contains(zoom))
            .collect();

        if candidates.is_empty() {
            let nearest = self.levels.iter().min_by(|a, b| {
                let da = (a.zoom_range.midpoint() - zoom).abs();
                let db = (b.zoom_range.midpoint() - zoom).abs();
                da.total_cmp(&db)
            });
            candidates.extend(nearest);
        }

        candidates
            .iter()
            .rev()
            .find(|l| can_handle(l, capability, mode))
            .or_else(|| candidates.first())
            .map(|l| Arc::clone(l))
            .unwrap_or_else(|| self.lowest())
    }

    /// Step the current level down after repeated misses or up after
    /// sustained headroom.
    ///
    /// Returns the (possibly unchanged) level to use.
    pub fn adapt(
        &mut self,
        current: &Arc<LodLevel>,
        achieved_rate: f64,
        target_rate: f64,
        is_stable: bool,
    ) -> Arc<LodLevel> {
        self.cooldown.tick();
        let Some(index) = self.index_of(current) else {
            return Arc::clone(current);
        };
        let now = self.clock.now();

        if achieved_rate < target_rate {
            self.below_target = self.below_target.saturating_add(1);
            if self.below_target >= self.config.degrade_after
                && index > 0
                && self.cooldown.is_ready(now)
            {
                let next = Arc::clone(&self.levels[index - 1]);
                info!(
                    from = current.name,
                    to = next.name,
                    achieved_fps = format!("{:.1}", achieved_rate),
                    "LOD stepped down"
                );
                self.below_target = 0;
                self.cooldown.trigger(now);
                return next;
            }
            return Arc::clone(current);
        }

        self.below_target = 0;
        if achieved_rate > target_rate + self.config.upgrade_margin_fps
            && is_stable
            && index + 1 < self.levels.len()
        {
            if !self.cooldown.is_ready(now) {
                debug!(level = current.name, "LOD step up deferred by cooldown");
                return Arc::clone(current);
            }
            let next = Arc::clone(&self.levels[index + 1]);
            info!(
                from = current.name,
                to = next.name,
                achieved_fps = format!("{:.1}", achieved_rate),
                "LOD stepped up"
            );
            self.cooldown.trigger(now);
            return next;
        }

        Arc::clone(current)
    }

    /// Consecutive below-target checks seen so far.
    pub fn below_target_count(&self) -> u32 {
        self.below_target
    }

    /// Forget adaptation state.
    pub fn reset(&mut self) {
        self.below_target = 0;
        self.cooldown.reset();
    }
}

impl std::fmt::Debug for LodSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LodSelector")
            .field("levels", &self.levels.len())
            .field("below_target", &self.below_target)
            .field("config", &self.config)
            .finish()
    }
}

/// Whether `level` fits the device and the active mode.
///
/// Texture resolution may be at most twice the device tier's resolution and
/// must fit the maximum texture size; the cell budget may be at most twice
/// the tier's; the animation quality must be allowed in `mode`.
pub fn can_handle(level: &LodLevel, capability: &CapabilityProfile, mode: PerformanceMode) -> bool {
    let tier = tier_for(PerformanceMode::for_gpu_tier(capability.gpu_tier));

    level.texture_resolution <= tier.texture_resolution.saturating_mul(2)
        && level.texture_resolution <= capability.max_texture_size
        && level.max_visible_cells <= tier.max_visible_cells.saturating_mul(2)
        && mode.allows_animation(level.animation_quality)
}
