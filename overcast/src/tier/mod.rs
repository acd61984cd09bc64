//! Performance modes and their rendering tunables.

mod catalog;

pub use catalog::{
    is_mode_supported, recommended_mode, tier_for, AnimationQuality, PerformanceMode,
    PerformanceTier, ShaderComplexity, BYTES_PER_CELL, POOLED_TEXTURES_PER_TIER,
};
