//! Capability profile produced by probing.

use serde::{Deserialize, Serialize};

/// Coarse device class.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum GpuTier {
    /// Integrated, mobile or software rendering.
    #[default]
    Low,
    /// Mainstream discrete or recent integrated GPUs.
    Medium,
    /// High-end discrete GPUs.
    High,
}

impl GpuTier {
    /// Default memory budget for the overlay on this class of device (MB).
    pub fn default_memory_budget_mb(&self) -> u32 {
        match self {
            GpuTier::Low => 64,
            GpuTier::Medium => 128,
            GpuTier::High => 256,
        }
    }

    /// Conservative maximum texture size assumed when it cannot be queried.
    pub fn assumed_max_texture_size(&self) -> u32 {
        match self {
            GpuTier::Low => 1024,
            GpuTier::Medium => 2048,
            GpuTier::High => 4096,
        }
    }
}

impl std::fmt::Display for GpuTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuTier::Low => write!(f, "low"),
            GpuTier::Medium => write!(f, "medium"),
            GpuTier::High => write!(f, "high"),
        }
    }
}

/// Rendering API generation exposed by the drawing context.
///
/// Ordered so that `max()` picks the newer version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ApiVersion {
    /// First-generation API (no float render targets by default).
    V1,
    /// Second-generation API.
    V2,
}

impl ApiVersion {
    /// Numeric version.
    pub fn as_u8(&self) -> u8 {
        match self {
            ApiVersion::V1 => 1,
            ApiVersion::V2 => 2,
        }
    }
}

/// How a profile was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionSource {
    /// Context queries plus the micro-benchmark succeeded.
    Benchmark,
    /// Classified from platform/renderer identification strings.
    Heuristic,
    /// Nothing could be detected; pessimistic defaults.
    Fallback,
    /// Supplied directly by the host.
    Declared,
}

/// What the device can afford. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityProfile {
    /// Device class.
    pub gpu_tier: GpuTier,
    /// Memory the overlay may use (MB).
    pub memory_budget_mb: u32,
    /// Largest texture edge the context supports.
    pub max_texture_size: u32,
    /// Whether float textures can be sampled and rendered to.
    pub supports_float_textures: bool,
    /// Newest API version available.
    pub api_version: ApiVersion,
    /// How this profile was obtained.
    pub source: DetectionSource,
    /// Benchmark score (0-100) when the benchmark ran.
    pub benchmark_score: Option<f64>,
}

impl CapabilityProfile {
    /// Create a host-declared profile.
    pub fn new(
        gpu_tier: GpuTier,
        memory_budget_mb: u32,
        max_texture_size: u32,
        api_version: ApiVersion,
    ) -> Self {
        Self {
            gpu_tier,
            memory_budget_mb,
            max_texture_size,
            supports_float_textures: api_version == ApiVersion::V2,
            api_version,
            source: DetectionSource::Declared,
            benchmark_score: None,
        }
    }

    /// Pessimistic profile used when nothing can be detected.
    pub fn fallback() -> Self {
        Self {
            gpu_tier: GpuTier::Low,
            memory_budget_mb: GpuTier::Low.default_memory_budget_mb(),
            max_texture_size: GpuTier::Low.assumed_max_texture_size(),
            supports_float_textures: false,
            api_version: ApiVersion::V1,
            source: DetectionSource::Fallback,
            benchmark_score: None,
        }
    }

    /// Override float texture support.
    pub fn with_float_textures(mut self, supported: bool) -> Self {
        self.supports_float_textures = supported;
        self
    }

    /// Memory budget in bytes.
    pub fn memory_budget_bytes(&self) -> u64 {
        self.memory_budget_mb as u64 * 1024 * 1024
    }

    /// Whether the profile is the pessimistic fallback.
    pub fn is_degraded(&self) -> bool {
        self.source == DetectionSource::Fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(GpuTier::Low < GpuTier::Medium);
        assert!(GpuTier::Medium < GpuTier::High);
        assert!(ApiVersion::V2 > ApiVersion::V1);
    }

    #[test]
    fn test_fallback_is_degraded_low() {
        let p = CapabilityProfile::fallback();
        assert_eq!(p.gpu_tier, GpuTier::Low);
        assert!(p.is_degraded());
        assert!(!p.supports_float_textures);
    }

    #[test]
    fn test_declared_profile() {
        let p = CapabilityProfile::new(GpuTier::Low, 50, 512, ApiVersion::V1);
        assert_eq!(p.memory_budget_bytes(), 50 * 1024 * 1024);
        assert!(!p.is_degraded());
        assert_eq!(p.api_version.as_u8(), 1);
    }

    #[test]
    fn test_gpu_tier_serde_lowercase() {
        let json = serde_json::to_string(&GpuTier::Medium).unwrap();
        assert_eq!(json, "\"medium\"");
    }
}
