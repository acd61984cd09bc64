//! Heuristic GPU classification from identification strings.
//!
//! Used when the drawing context cannot be queried or the benchmark fails.
//! Renderer strings are matched against families of known GPUs, checked
//! from most to least capable. Mobile platforms are capped at `Medium`.

use std::sync::OnceLock;

use regex::Regex;

use super::profile::GpuTier;

/// Identification strings reported by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RendererInfo {
    /// GPU vendor (e.g., "NVIDIA Corporation").
    pub vendor: String,
    /// Renderer description (e.g., "NVIDIA GeForce RTX 3070/PCIe/SSE2").
    pub renderer: String,
    /// Platform / user-agent string.
    pub platform: String,
}

impl RendererInfo {
    /// Create renderer info from its three strings.
    pub fn new(
        vendor: impl Into<String>,
        renderer: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            vendor: vendor.into(),
            renderer: renderer.into(),
            platform: platform.into(),
        }
    }
}

fn software_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)swiftshader|llvmpipe|softpipe|software|basic render")
            .expect("software renderer pattern is valid")
    })
}

fn high_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)geforce\s+(rtx|gtx\s*(10[6-8]0|16[5-6]0))|radeon\s+(rx\s*[5-7]\d{3}|pro\s+w)|apple\s+m[1-9]|quadro|nvidia\s+a\d{3,4}",
        )
        .expect("high-end GPU pattern is valid")
    })
}

fn medium_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)geforce|radeon|iris|arc\s+a\d{3}|adreno\s*[6-7]\d{2}|mali-g[7-9]\d|apple\s+(a1[4-9]|gpu)")
            .expect("mid-range GPU pattern is valid")
    })
}

fn low_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)intel|mali|adreno|powervr|videocore|tegra|apple\s+a\d")
            .expect("low-end GPU pattern is valid")
    })
}

fn mobile_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)android|iphone|ipad|mobile").expect("mobile platform pattern is valid")
    })
}

/// Classify a device from its identification strings.
///
/// Returns `None` when nothing recognizable is present.
pub fn classify(info: &RendererInfo) -> Option<GpuTier> {
    let gpu = format!("{} {}", info.vendor, info.renderer);
    let mobile = mobile_pattern().is_match(&info.platform);

    let tier = if software_pattern().is_match(&gpu) {
        Some(GpuTier::Low)
    } else if high_pattern().is_match(&gpu) {
        Some(GpuTier::High)
    } else if medium_pattern().is_match(&gpu) {
        Some(GpuTier::Medium)
    } else if low_pattern().is_match(&gpu) {
        Some(GpuTier::Low)
    } else if mobile {
        Some(GpuTier::Low)
    } else {
        None
    };

    match tier {
        Some(GpuTier::High) if mobile => Some(GpuTier::Medium),
        other => other,
    }
}
