//! Static performance tier table.
//!
//! Each [`PerformanceMode`] maps to one [`PerformanceTier`], a bundle of
//! rendering tunables. The table is fixed at compile time.
//!
//! | Mode   | Cells | Texture | Animation | Shader   | Update |
//! |--------|-------|---------|-----------|----------|--------|
//! | low    |  50   |  256    | low       | simple   | 15 Hz  |
//! | medium | 150   |  512    | medium    | standard | 30 Hz  |
//! | high   | 300   | 1024    | high      | complex  | 60 Hz  |

use serde::{Deserialize, Serialize};

use crate::capability::{CapabilityProfile, GpuTier};

/// Textures the overlay keeps pooled at the tier's resolution when
/// estimating memory usage.
pub const POOLED_TEXTURES_PER_TIER: u64 = 8;

/// Per-cell working memory (geometry and uniforms) assumed when estimating.
pub const BYTES_PER_CELL: u64 = 100 * 1024;

/// Bytes per texel of the RGBA8 textures used for estimation.
const BYTES_PER_TEXEL: u64 = 4;

/// Active quality mode.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceMode {
    /// Minimal quality for weak devices or severe frame drops.
    Low,
    /// Balanced quality.
    #[default]
    Medium,
    /// Full quality.
    High,
}

impl PerformanceMode {
    /// All modes, lowest first.
    pub const ALL: [PerformanceMode; 3] = [
        PerformanceMode::Low,
        PerformanceMode::Medium,
        PerformanceMode::High,
    ];

    /// One step down, saturating at `Low`.
    pub fn downgrade(&self) -> Self {
        match self {
            PerformanceMode::High => PerformanceMode::Medium,
            PerformanceMode::Medium => PerformanceMode::Low,
            PerformanceMode::Low => PerformanceMode::Low,
        }
    }

    /// One step up, saturating at `High`.
    pub fn upgrade(&self) -> Self {
        match self {
            PerformanceMode::Low => PerformanceMode::Medium,
            PerformanceMode::Medium => PerformanceMode::High,
            PerformanceMode::High => PerformanceMode::High,
        }
    }

    /// The mode a device of the given class is expected to sustain.
    pub fn for_gpu_tier(tier: GpuTier) -> Self {
        match tier {
            GpuTier::Low => PerformanceMode::Low,
            GpuTier::Medium => PerformanceMode::Medium,
            GpuTier::High => PerformanceMode::High,
        }
    }

    /// Tunables for this mode.
    pub fn tier(&self) -> &'static PerformanceTier {
        tier_for(*self)
    }

    /// Whether LOD levels animating at `quality` may be used in this mode.
    pub fn allows_animation(&self, quality: AnimationQuality) -> bool {
        quality <= self.tier().animation_quality
    }
}

impl std::fmt::Display for PerformanceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PerformanceMode::Low => write!(f, "low"),
            PerformanceMode::Medium => write!(f, "medium"),
            PerformanceMode::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for PerformanceMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            _ => Self::Medium,
        })
    }
}

/// Animation detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnimationQuality {
    /// Slow single-layer drift.
    Low,
    /// Two layers.
    Medium,
    /// Full multi-layer animation.
    High,
}

impl std::fmt::Display for AnimationQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnimationQuality::Low => write!(f, "low"),
            AnimationQuality::Medium => write!(f, "medium"),
            AnimationQuality::High => write!(f, "high"),
        }
    }
}

/// Shader variant the renderer should compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderComplexity {
    /// Single noise octave, no lighting.
    Simple,
    /// Multiple octaves.
    Standard,
    /// Multiple octaves with lighting.
    Complex,
}

impl std::fmt::Display for ShaderComplexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShaderComplexity::Simple => write!(f, "simple"),
            ShaderComplexity::Standard => write!(f, "standard"),
            ShaderComplexity::Complex => write!(f, "complex"),
        }
    }
}

/// Rendering tunables for one mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PerformanceTier {
    /// Tier name, matching the mode.
    pub name: &'static str,
    /// Maximum cells drawn per frame.
    pub max_visible_cells: u32,
    /// Edge length of effect textures.
    pub texture_resolution: u32,
    /// Animation detail.
    pub animation_quality: AnimationQuality,
    /// Shader variant.
    pub shader_complexity: ShaderComplexity,
    /// How often the effect state is updated.
    pub update_frequency_hz: u32,
}

impl PerformanceTier {
    /// Estimated GPU memory for running at this tier, in bytes.
    ///
    /// Counts a full set of pooled RGBA8 textures at the tier's resolution
    /// plus per-cell working memory for the visible-cell budget.
    pub fn estimated_memory_bytes(&self) -> u64 {
        let res = self.texture_resolution as u64;
        let textures = res * res * BYTES_PER_TEXEL * POOLED_TEXTURES_PER_TIER;
        let cells = self.max_visible_cells as u64 * BYTES_PER_CELL;
        textures + cells
    }

    /// Estimated memory in (fractional) MB.
    pub fn estimated_memory_mb(&self) -> f64 {
        self.estimated_memory_bytes() as f64 / (1024.0 * 1024.0)
    }
}

static LOW: PerformanceTier = PerformanceTier {
    name: "low",
    max_visible_cells: 50,
    texture_resolution: 256,
    animation_quality: AnimationQuality::Low,
    shader_complexity: ShaderComplexity::Simple,
    update_frequency_hz: 15,
};

static MEDIUM: PerformanceTier = PerformanceTier {
    name: "medium",
    max_visible_cells: 150,
    texture_resolution: 512,
    animation_quality: AnimationQuality::Medium,
    shader_complexity: ShaderComplexity::Standard,
    update_frequency_hz: 30,
};

static HIGH: PerformanceTier = PerformanceTier {
    name: "high",
    max_visible_cells: 300,
    texture_resolution: 1024,
    animation_quality: AnimationQuality::High,
    shader_complexity: ShaderComplexity::Complex,
    update_frequency_hz: 60,
};

/// Tunables for `mode`.
pub fn tier_for(mode: PerformanceMode) -> &'static PerformanceTier {
    match mode {
        PerformanceMode::Low => &LOW,
        PerformanceMode::Medium => &MEDIUM,
        PerformanceMode::High => &HIGH,
    }
}

/// Whether the device described by `capability` can afford `mode`.
///
/// The tier's estimated memory must fit the memory budget and its texture
/// resolution must fit the maximum texture size.
pub fn is_mode_supported(mode: PerformanceMode, capability: &CapabilityProfile) -> bool {
    let tier = tier_for(mode);
    tier.estimated_memory_bytes() <= capability.memory_budget_bytes()
        && tier.texture_resolution <= capability.max_texture_size
}

/// Highest mode the device can afford, further capped by its GPU tier.
///
/// Never returns anything above `Low` for a device that cannot even afford
/// `Low`; `Low` is the floor.
pub fn recommended_mode(capability: &CapabilityProfile) -> PerformanceMode {
    let affordable = PerformanceMode::ALL
        .iter()
        .rev()
        .copied()
        .find(|mode| is_mode_supported(*mode, capability))
        .unwrap_or(PerformanceMode::Low);

    affordable.min(PerformanceMode::for_gpu_tier(capability.gpu_tier))
}
