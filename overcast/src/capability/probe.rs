//! One-shot capability probing.
//!
//! The probe queries the host's drawing context for its API version,
//! texture limits and float support, then renders a fixed fragment workload
//! for a fixed number of frames and converts the achieved frame rate into a
//! 0-100 score.
//!
//! # Fallback Chain
//!
//! ```text
//! context queries + benchmark ──ok──► Benchmark profile
//!          │ error / no context
//!          ▼
//! identification strings ──match──► Heuristic profile
//!          │ nothing recognizable
//!          ▼
//! CapabilityProfile::fallback() (low tier)
//! ```
//!
//! Probing never fails. The result is cached by the probe instance until
//! [`CapabilityProbe::reset`] is called.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::heuristic::{classify, RendererInfo};
use super::profile::{ApiVersion, CapabilityProfile, DetectionSource, GpuTier};
use crate::error::ProbeError;

/// Score above which a device is classified `High`.
pub const HIGH_SCORE_THRESHOLD: f64 = 80.0;

/// Score above which a device is classified `Medium`.
pub const MEDIUM_SCORE_THRESHOLD: f64 = 40.0;

/// The fragment workload rendered each benchmark frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchmarkWorkload {
    /// Render target width in pixels.
    pub width: u32,
    /// Render target height in pixels.
    pub height: u32,
    /// Noise octaves evaluated per fragment.
    pub octaves: u32,
}

impl Default for BenchmarkWorkload {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            octaves: 4,
        }
    }
}

/// Drawing context supplied by the host renderer.
///
/// Only the queries needed for probing are part of this trait; allocation
/// lives on [`ResourceAllocator`](crate::resource::ResourceAllocator).
pub trait GraphicsContext: Send + Sync {
    /// API versions the context can create, in any order.
    fn api_versions(&self) -> Vec<ApiVersion>;

    /// Largest texture edge for the given API version.
    fn max_texture_size(&self, api: ApiVersion) -> Option<u32>;

    /// Whether float textures are usable with the given API version.
    fn supports_float_textures(&self, api: ApiVersion) -> bool;

    /// Vendor/renderer/platform identification, if exposed.
    fn renderer_info(&self) -> Option<RendererInfo>;

    /// Device memory in MB, if the platform reports it.
    fn device_memory_mb(&self) -> Option<u32> {
        None
    }

    /// Render one frame of `workload` and return how long it took.
    fn run_benchmark_frame(&self, workload: &BenchmarkWorkload) -> Result<Duration, ProbeError>;
}

/// Probe tuning.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Number of benchmark frames to render.
    pub benchmark_frames: u32,
    /// Frame rate that scores 100.
    pub reference_frame_rate: f64,
    /// Workload rendered each frame.
    pub workload: BenchmarkWorkload,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            benchmark_frames: 30,
            reference_frame_rate: 60.0,
            workload: BenchmarkWorkload::default(),
        }
    }
}

/// Maps a benchmark score to a device tier.
pub fn tier_from_score(score: f64) -> GpuTier {
    if score > HIGH_SCORE_THRESHOLD {
        GpuTier::High
    } else if score > MEDIUM_SCORE_THRESHOLD {
        GpuTier::Medium
    } else {
        GpuTier::Low
    }
}

/// Memory budget for the overlay: an eighth of device memory when known
/// (32-1024 MB), otherwise the tier default.
pub fn memory_budget_for(tier: GpuTier, device_memory_mb: Option<u32>) -> u32 {
    match device_memory_mb {
        Some(mb) if mb > 0 => (mb / 8).clamp(32, 1024),
        _ => tier.default_memory_budget_mb(),
    }
}

/// Detects device capabilities once and caches the result.
pub struct CapabilityProbe {
    context: Option<Arc<dyn GraphicsContext>>,
    platform_info: Option<RendererInfo>,
    config: ProbeConfig,
    cached: Mutex<Option<CapabilityProfile>>,
}

impl CapabilityProbe {
    /// Create a probe over an optional drawing context.
    pub fn new(context: Option<Arc<dyn GraphicsContext>>) -> Self {
        Self::with_config(context, ProbeConfig::default())
    }

    /// Create a probe with explicit tuning.
    pub fn with_config(context: Option<Arc<dyn GraphicsContext>>, config: ProbeConfig) -> Self {
        Self {
            context,
            platform_info: None,
            config,
            cached: Mutex::new(None),
        }
    }

    /// Identification strings to use when the context cannot provide them.
    pub fn with_platform_info(mut self, info: RendererInfo) -> Self {
        self.platform_info = Some(info);
        self
    }

    /// Detect (first call) or return the cached profile.
    pub fn probe(&self) -> CapabilityProfile {
        let mut cached = self.cached.lock();
        if let Some(profile) = cached.as_ref() {
            return profile.clone();
        }

        let profile = self.detect();
        info!(
            gpu_tier = %profile.gpu_tier,
            memory_budget_mb = profile.memory_budget_mb,
            max_texture_size = profile.max_texture_size,
            api_version = profile.api_version.as_u8(),
            source = ?profile.source,
            "Capability probe complete"
        );
        *cached = Some(profile.clone());
        profile
    }

    /// The cached profile, if probing already happened.
    pub fn cached(&self) -> Option<CapabilityProfile> {
        self.cached.lock().clone()
    }

    /// Forget the cached profile so the next [`probe`](Self::probe) re-detects.
    pub fn reset(&self) {
        *self.cached.lock() = None;
    }

    fn detect(&self) -> CapabilityProfile {
        let Some(context) = self.context.as_ref() else {
            warn!("No rendering context, classifying from platform strings");
            return self.heuristic_profile(None);
        };

        match self.detect_with_context(context.as_ref()) {
            Ok(profile) => profile,
            Err(e) => {
                warn!(error = %e, "Capability detection failed, classifying from platform strings");
                self.heuristic_profile(Some(context.as_ref()))
            }
        }
    }

    fn detect_with_context(
        &self,
        context: &dyn GraphicsContext,
    ) -> Result<CapabilityProfile, ProbeError> {
        let api_version = context
            .api_versions()
            .into_iter()
            .max()
            .ok_or(ProbeError::NoContext)?;
        let max_texture_size = context
            .max_texture_size(api_version)
            .ok_or(ProbeError::NoContext)?;
        let supports_float_textures = context.supports_float_textures(api_version);

        let score = self.run_benchmark(context)?;
        let gpu_tier = tier_from_score(score);
        debug!(score = format!("{:.1}", score), tier = %gpu_tier, "Benchmark scored");

        Ok(CapabilityProfile {
            gpu_tier,
            memory_budget_mb: memory_budget_for(gpu_tier, context.device_memory_mb()),
            max_texture_size,
            supports_float_textures,
            api_version,
            source: DetectionSource::Benchmark,
            benchmark_score: Some(score),
        })
    }

    /// Render the workload and convert the achieved rate into a 0-100 score.
    fn run_benchmark(&self, context: &dyn GraphicsContext) -> Result<f64, ProbeError> {
        let frames = self.config.benchmark_frames.max(1);
        let mut total = Duration::ZERO;
        for _ in 0..frames {
            total += context.run_benchmark_frame(&self.config.workload)?;
        }

        let secs = total.as_secs_f64();
        if secs <= 0.0 {
            return Ok(100.0);
        }
        let achieved = frames as f64 / secs;
        let reference = self.config.reference_frame_rate.max(1.0);
        Ok((achieved / reference * 100.0).clamp(0.0, 100.0))
    }

    fn heuristic_profile(&self, context: Option<&dyn GraphicsContext>) -> CapabilityProfile {
        let info = context
            .and_then(|c| c.renderer_info())
            .or_else(|| self.platform_info.clone());

        let Some(gpu_tier) = info.as_ref().and_then(classify) else {
            warn!("Device not recognized, using low-tier fallback profile");
            return CapabilityProfile::fallback();
        };

        let device_memory = context.and_then(|c| c.device_memory_mb());
        CapabilityProfile {
            gpu_tier,
            memory_budget_mb: memory_budget_for(gpu_tier, device_memory),
            max_texture_size: gpu_tier.assumed_max_texture_size(),
            supports_float_textures: false,
            api_version: ApiVersion::V1,
            source: DetectionSource::Heuristic,
            benchmark_score: None,
        }
    }
}

impl std::fmt::Debug for CapabilityProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityProbe")
            .field("has_context", &self.context.is_some())
            .field("config", &self.config)
            .field("cached", &self.cached.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeContext {
        versions: Vec<ApiVersion>,
        frame_time: Result<Duration, ProbeError>,
        renderer: Option<RendererInfo>,
        memory_mb: Option<u32>,
        frames_rendered: AtomicU32,
    }

    impl FakeContext {
        fn with_frame_time(frame_time: Duration) -> Self {
            Self {
                versions: vec![ApiVersion::V1, ApiVersion::V2],
                frame_time: Ok(frame_time),
                renderer: None,
                memory_mb: None,
                frames_rendered: AtomicU32::new(0),
            }
        }
    }

    impl GraphicsContext for FakeContext {
        fn api_versions(&self) -> Vec<ApiVersion> {
            self.versions.clone()
        }

        fn max_texture_size(&self, api: ApiVersion) -> Option<u32> {
            Some(match api {
                ApiVersion::V1 => 4096,
                ApiVersion::V2 => 8192,
            })
        }

        fn supports_float_textures(&self, api: ApiVersion) -> bool {
            api == ApiVersion::V2
        }

        fn renderer_info(&self) -> Option<RendererInfo> {
            self.renderer.clone()
        }

        fn device_memory_mb(&self) -> Option<u32> {
            self.memory_mb
        }

        fn run_benchmark_frame(&self, _: &BenchmarkWorkload) -> Result<Duration, ProbeError> {
            self.frames_rendered.fetch_add(1, Ordering::SeqCst);
            self.frame_time.clone()
        }
    }

    #[test]
    fn test_score_thresholds() {
        assert_eq!(tier_from_score(95.0), GpuTier::High);
        assert_eq!(tier_from_score(80.0), GpuTier::Medium);
        assert_eq!(tier_from_score(41.0), GpuTier::Medium);
        assert_eq!(tier_from_score(40.0), GpuTier::Low);
        assert_eq!(tier_from_score(0.0), GpuTier::Low);
    }

    #[test]
    fn test_memory_budget_from_device_memory() {
        assert_eq!(memory_budget_for(GpuTier::Low, Some(4096)), 512);
        assert_eq!(memory_budget_for(GpuTier::Low, Some(128)), 32);
        assert_eq!(memory_budget_for(GpuTier::High, Some(64_000)), 1024);
        assert_eq!(memory_budget_for(GpuTier::Medium, None), 128);
    }

    #[test]
    fn test_fast_device_is_high_and_prefers_newer_api() {
        // 60 fps reference, 8ms frames -> 125 fps -> score clamps to 100
        let ctx = Arc::new(FakeContext::with_frame_time(Duration::from_millis(8)));
        let probe = CapabilityProbe::new(Some(ctx));
        let profile = probe.probe();

        assert_eq!(profile.gpu_tier, GpuTier::High);
        assert_eq!(profile.api_version, ApiVersion::V2);
        assert_eq!(profile.max_texture_size, 8192);
        assert!(profile.supports_float_textures);
        assert_eq!(profile.source, DetectionSource::Benchmark);
        assert_eq!(profile.benchmark_score, Some(100.0));
    }

    #[test]
    fn test_slow_device_is_medium_or_low() {
        // 25ms frames -> 40 fps -> score 66.7 -> medium
        let ctx = Arc::new(FakeContext::with_frame_time(Duration::from_millis(25)));
        let profile = CapabilityProbe::new(Some(ctx)).probe();
        assert_eq!(profile.gpu_tier, GpuTier::Medium);

        // 50ms frames -> 20 fps -> score 33.3 -> low
        let ctx = Arc::new(FakeContext::with_frame_time(Duration::from_millis(50)));
        let profile = CapabilityProbe::new(Some(ctx)).probe();
        assert_eq!(profile.gpu_tier, GpuTier::Low);
    }

    #[test]
    fn test_probe_is_cached() {
        let ctx = Arc::new(FakeContext::with_frame_time(Duration::from_millis(10)));
        let probe = CapabilityProbe::new(Some(Arc::clone(&ctx) as Arc<dyn GraphicsContext>));

        let first = probe.probe();
        let rendered = ctx.frames_rendered.load(Ordering::SeqCst);
        let second = probe.probe();

        assert_eq!(first, second);
        assert_eq!(ctx.frames_rendered.load(Ordering::SeqCst), rendered);
        assert_eq!(rendered, ProbeConfig::default().benchmark_frames);
    }

    #[test]
    fn test_reset_forces_reprobe() {
        let ctx = Arc::new(FakeContext::with_frame_time(Duration::from_millis(10)));
        let probe = CapabilityProbe::new(Some(Arc::clone(&ctx) as Arc<dyn GraphicsContext>));

        probe.probe();
        probe.reset();
        assert!(probe.cached().is_none());
        probe.probe();

        assert_eq!(
            ctx.frames_rendered.load(Ordering::SeqCst),
            2 * ProbeConfig::default().benchmark_frames
        );
    }

    #[test]
    fn test_benchmark_failure_uses_renderer_strings() {
        let mut ctx = FakeContext::with_frame_time(Duration::ZERO);
        ctx.frame_time = Err(ProbeError::Benchmark("shader compile".to_string()));
        ctx.renderer = Some(RendererInfo::new(
            "NVIDIA Corporation",
            "NVIDIA GeForce RTX 4080",
            "Windows",
        ));

        let profile = CapabilityProbe::new(Some(Arc::new(ctx))).probe();
        assert_eq!(profile.gpu_tier, GpuTier::High);
        assert_eq!(profile.source, DetectionSource::Heuristic);
    }

    #[test]
    fn test_no_api_version_uses_heuristic() {
        let mut ctx = FakeContext::with_frame_time(Duration::from_millis(10));
        ctx.versions.clear();
        ctx.renderer = Some(RendererInfo::new("", "Intel(R) UHD Graphics 620", ""));

        let profile = CapabilityProbe::new(Some(Arc::new(ctx))).probe();
        assert_eq!(profile.gpu_tier, GpuTier::Low);
        assert_eq!(profile.source, DetectionSource::Heuristic);
    }

    #[test]
    fn test_no_context_uses_platform_info() {
        let probe = CapabilityProbe::new(None).with_platform_info(RendererInfo::new(
            "",
            "Mali-G78",
            "Android 14",
        ));
        let profile = probe.probe();
        assert_eq!(profile.gpu_tier, GpuTier::Medium);
    }

    #[test]
    fn test_nothing_available_falls_back_to_low() {
        let profile = CapabilityProbe::new(None).probe();
        assert_eq!(profile, CapabilityProfile::fallback());
        assert!(profile.is_degraded());
    }
}
