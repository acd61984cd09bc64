//! Overcast - adaptive rendering resources for procedural map overlays
//!
//! This library keeps a procedural cloud/fog overlay on a slippy map running
//! smoothly on whatever device it lands on. It probes the device once, watches
//! frame timing, and adjusts the performance mode, level of detail, loaded
//! patches and GPU memory use to hold a target frame rate under a fixed
//! memory ceiling.
//!
//! # Architecture
//!
//! ```text
//! viewport + frame timing
//!         │
//!         ▼
//! ModeController / LodSelector ──► PatchScheduler ──► ResourcePool
//!         │                              │                 │
//!         └──────────────► Optimizer ◄───┴─────────────────┘
//!                              │
//!                              ▼
//!                   OptimizationResult ──► renderer
//! ```
//!
//! The renderer owns drawing. It supplies a [`capability::GraphicsContext`]
//! for probing, a [`resource::ResourceAllocator`] for textures and a
//! [`patch::PatchLoader`] for patch content, and consumes the
//! [`optimizer::OptimizationResult`] each tick.
//!
//! # Example
//!
//! ```ignore
//! let profile = CapabilityProbe::new(Some(context)).probe();
//! let config = OptimizerConfig::from_settings(&OverlaySettings::import(&saved)?);
//! let optimizer = Arc::new(Optimizer::new(config, Some(profile), allocator, loader));
//! optimizer.start_maintenance();
//!
//! // every frame
//! optimizer.record_frame(Instant::now());
//! let result = optimizer.optimize_viewport(&viewport);
//! ```

pub mod capability;
pub mod clock;
pub mod config;
pub mod cooldown;
pub mod error;
pub mod events;
pub mod frame;
pub mod geo;
pub mod lod;
pub mod logging;
pub mod maintenance;
pub mod mode;
pub mod optimizer;
pub mod patch;
pub mod resource;
pub mod tier;

pub use capability::{CapabilityProbe, CapabilityProfile, GpuTier};
pub use config::{OptimizerConfig, OverlaySettings, SettingsOverrides};
pub use error::{ConfigError, LoggingError, PatchLoadError, ProbeError, ResourceError};
pub use geo::{GeoBounds, GeoPoint, Viewport};
pub use optimizer::{Optimization, OptimizationResult, Optimizer, QualityEvent};
pub use tier::PerformanceMode;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
