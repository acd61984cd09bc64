//! Per-tick outputs and quality notifications.

use serde::Serialize;

use crate::mode::ModeChangeReason;
use crate::tier::PerformanceMode;

/// One adjustment made during an optimization tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Optimization {
    /// The performance mode changed.
    ModeChanged {
        from: PerformanceMode,
        to: PerformanceMode,
    },
    /// Frame-rate feedback held the LOD below what the zoom selects.
    LodReduced {
        selected: &'static str,
        applied: &'static str,
    },
    /// Frame rate collapsed: forced low mode and the lowest LOD.
    EscapeHatch { frame_rate: f64 },
    /// Patches dropped as out of range or over capacity.
    PatchesUnloaded { count: usize },
    /// Patches queued for loading.
    PatchesQueued { count: usize },
    /// Far, stale cache entries evicted.
    SpatialEviction { entries: usize, bytes_freed: u64 },
    /// Pressure-driven cleanup ran.
    EmergencyCleanup { bytes_freed: u64 },
}

impl std::fmt::Display for Optimization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Optimization::ModeChanged { from, to } => write!(f, "mode {} -> {}", from, to),
            Optimization::LodReduced { selected, applied } => {
                write!(f, "lod {} held at {}", selected, applied)
            }
            Optimization::EscapeHatch { frame_rate } => {
                write!(f, "escape hatch at {:.1} fps", frame_rate)
            }
            Optimization::PatchesUnloaded { count } => write!(f, "{} patches unloaded", count),
            Optimization::PatchesQueued { count } => write!(f, "{} patches queued", count),
            Optimization::SpatialEviction {
                entries,
                bytes_freed,
            } => write!(f, "{} far entries evicted ({} bytes)", entries, bytes_freed),
            Optimization::EmergencyCleanup { bytes_freed } => {
                write!(f, "emergency cleanup freed {} bytes", bytes_freed)
            }
        }
    }
}

/// What the renderer should use for the next frames.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OptimizationResult {
    /// Active performance mode.
    pub mode: PerformanceMode,
    /// Name of the active LOD level.
    pub lod_level: &'static str,
    /// Texture edge for new overlay textures.
    pub texture_resolution: u32,
    /// Cell budget, the LOD's capped by the mode's tier.
    pub max_visible_cells: u32,
    /// Bytes held by the resource pool after this tick.
    pub memory_usage_bytes: u64,
    /// Rolling average frame rate.
    pub frame_rate: f64,
    /// Adjustments made during this tick.
    pub optimizations: Vec<Optimization>,
}

impl OptimizationResult {
    /// Whether the escape hatch fired during this tick.
    pub fn escape_hatch_fired(&self) -> bool {
        self.optimizations
            .iter()
            .any(|o| matches!(o, Optimization::EscapeHatch { .. }))
    }
}

/// Quality changes reported to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum QualityEvent {
    /// Performance mode changed.
    ModeChanged {
        from: PerformanceMode,
        to: PerformanceMode,
        reason: ModeChangeReason,
    },
    /// Active LOD level changed.
    LodChanged {
        from: Option<&'static str>,
        to: &'static str,
    },
}
