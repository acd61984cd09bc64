//! Configuration.
//!
//! Two layers:
//!
//! - [`OverlaySettings`] is the small user-facing snapshot the host persists
//!   (as JSON) between sessions.
//! - [`OptimizerConfig`] is the full tuning for every component, derived
//!   from the settings with [`OptimizerConfig::from_settings`] and otherwise
//!   left at its defaults.
//!
//! # Example settings snapshot
//!
//! ```json
//! {
//!   "target_frame_rate": 60.0,
//!   "memory_budget_mb": 128,
//!   "aggressive_optimization": false
//! }
//! ```
//!
//! Missing fields take their defaults. Out-of-range values are rejected on
//! import and merge; [`OverlaySettings::clamped`] is available for callers
//! that prefer to coerce instead.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::lod::LodSelectorConfig;
use crate::mode::ModeControllerConfig;
use crate::patch::PatchSchedulerConfig;
use crate::resource::ResourcePoolConfig;

/// Accepted target frame rates.
pub const MIN_TARGET_FRAME_RATE: f64 = 15.0;
/// Accepted target frame rates.
pub const MAX_TARGET_FRAME_RATE: f64 = 240.0;
/// Default target frame rate.
pub const DEFAULT_TARGET_FRAME_RATE: f64 = 60.0;

/// Accepted memory budgets (MB).
pub const MIN_MEMORY_BUDGET_MB: u32 = 16;
/// Accepted memory budgets (MB).
pub const MAX_MEMORY_BUDGET_MB: u32 = 4096;
/// Default memory budget (MB).
pub const DEFAULT_MEMORY_BUDGET_MB: u32 = 128;

/// Fraction of the target rate below which the escape hatch fires.
pub const DEFAULT_ESCAPE_HATCH_RATIO: f64 = 0.6;

/// Default interval between background mode re-evaluations.
pub const DEFAULT_MODE_REEVALUATION_INTERVAL: Duration = Duration::from_secs(1);

/// Persisted user settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    /// Frame rate to steer towards.
    /// Range: 15 - 240
    pub target_frame_rate: f64,
    /// Memory ceiling for overlay GPU resources (MB).
    /// Range: 16 - 4096
    pub memory_budget_mb: u32,
    /// Allow the emergency escape hatch (forced low mode, lowest LOD,
    /// immediate cleanup) when frame rate collapses.
    pub aggressive_optimization: bool,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            target_frame_rate: DEFAULT_TARGET_FRAME_RATE,
            memory_budget_mb: DEFAULT_MEMORY_BUDGET_MB,
            aggressive_optimization: false,
        }
    }
}

impl OverlaySettings {
    /// Check every field against its accepted range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range(
            "target_frame_rate",
            self.target_frame_rate,
            MIN_TARGET_FRAME_RATE,
            MAX_TARGET_FRAME_RATE,
        )?;
        check_range(
            "memory_budget_mb",
            self.memory_budget_mb as f64,
            MIN_MEMORY_BUDGET_MB as f64,
            MAX_MEMORY_BUDGET_MB as f64,
        )?;
        Ok(())
    }

    /// Copy with every field forced into its accepted range.
    pub fn clamped(&self) -> Self {
        let target_frame_rate = if self.target_frame_rate.is_finite() {
            self.target_frame_rate
                .clamp(MIN_TARGET_FRAME_RATE, MAX_TARGET_FRAME_RATE)
        } else {
            DEFAULT_TARGET_FRAME_RATE
        };
        Self {
            target_frame_rate,
            memory_budget_mb: self
                .memory_budget_mb
                .clamp(MIN_MEMORY_BUDGET_MB, MAX_MEMORY_BUDGET_MB),
            aggressive_optimization: self.aggressive_optimization,
        }
    }

    /// Apply `overrides` on top of these settings.
    ///
    /// Fails without partial application if any overridden value is out of
    /// range.
    pub fn merge(&self, overrides: &SettingsOverrides) -> Result<Self, ConfigError> {
        let merged = Self {
            target_frame_rate: overrides
                .target_frame_rate
                .unwrap_or(self.target_frame_rate),
            memory_budget_mb: overrides.memory_budget_mb.unwrap_or(self.memory_budget_mb),
            aggressive_optimization: overrides
                .aggressive_optimization
                .unwrap_or(self.aggressive_optimization),
        };
        merged.validate()?;
        Ok(merged)
    }

    /// Serialize to a JSON snapshot.
    pub fn export(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse and validate a JSON snapshot.
    pub fn import(json: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Memory budget in bytes.
    pub fn memory_budget_bytes(&self) -> u64 {
        self.memory_budget_mb as u64 * 1024 * 1024
    }
}

/// Partial settings update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsOverrides {
    pub target_frame_rate: Option<f64>,
    pub memory_budget_mb: Option<u32>,
    pub aggressive_optimization: Option<bool>,
}

impl SettingsOverrides {
    /// Whether no field is overridden.
    pub fn is_empty(&self) -> bool {
        self.target_frame_rate.is_none()
            && self.memory_budget_mb.is_none()
            && self.aggressive_optimization.is_none()
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

/// Tuning for the whole optimizer.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Frame rate to steer towards.
    pub target_frame_rate: f64,
    /// Enable the escape hatch.
    pub aggressive_optimization: bool,
    /// Escape hatch fires below `target * ratio`.
    pub escape_hatch_ratio: f64,
    /// Frames kept in the rolling window.
    pub frame_window: usize,
    /// Mode controller tuning.
    pub mode: ModeControllerConfig,
    /// LOD selector tuning.
    pub lod: LodSelectorConfig,
    /// Resource pool tuning.
    pub resources: ResourcePoolConfig,
    /// Patch scheduler tuning.
    pub patches: PatchSchedulerConfig,
    /// Period of background mode re-evaluation.
    pub mode_reevaluation_interval: Duration,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::from_settings(&OverlaySettings::default())
    }
}

impl OptimizerConfig {
    /// Derive component tuning from user settings. Out-of-range settings are
    /// clamped.
    pub fn from_settings(settings: &OverlaySettings) -> Self {
        let settings = settings.clamped();
        let resources = ResourcePoolConfig::with_budget_mb(settings.memory_budget_mb);
        Self {
            target_frame_rate: settings.target_frame_rate,
            aggressive_optimization: settings.aggressive_optimization,
            escape_hatch_ratio: DEFAULT_ESCAPE_HATCH_RATIO,
            frame_window: crate::frame::DEFAULT_WINDOW_SIZE,
            mode: ModeControllerConfig {
                target_frame_rate: settings.target_frame_rate,
                ..ModeControllerConfig::default()
            },
            lod: LodSelectorConfig::default(),
            resources,
            patches: PatchSchedulerConfig::default(),
            mode_reevaluation_interval: DEFAULT_MODE_REEVALUATION_INTERVAL,
        }
    }

    /// Memory cleanup period, taken from the resource tuning.
    pub fn cleanup_interval(&self) -> Duration {
        self.resources.cleanup_interval
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_valid_settings_round_trip(
            rate in (15u32..=240).prop_map(f64::from),
            budget in MIN_MEMORY_BUDGET_MB..=MAX_MEMORY_BUDGET_MB,
            aggressive in any::<bool>(),
        ) {
            let settings = OverlaySettings {
                target_frame_rate: rate,
                memory_budget_mb: budget,
                aggressive_optimization: aggressive,
            };
            let json = settings.export().unwrap();
            prop_assert_eq!(OverlaySettings::import(&json).unwrap(), settings);
        }

        #[test]
        fn prop_clamped_is_always_valid(rate in any::<f64>(), budget in any::<u32>()) {
            let settings = OverlaySettings {
                target_frame_rate: rate,
                memory_budget_mb: budget,
                aggressive_optimization: false,
            };
            prop_assert!(settings.clamped().validate().is_ok());
        }
    }
}
