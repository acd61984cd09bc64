//! Device capability detection.
//!
//! Produces a [`CapabilityProfile`] describing what the device can afford:
//! GPU tier, memory budget, texture limits and API generation. Detection
//! degrades through benchmark, identification-string heuristics and a
//! pessimistic fallback, and never errors.

mod heuristic;
mod probe;
mod profile;

pub use heuristic::{classify as classify_renderer, RendererInfo};
pub use probe::{
    memory_budget_for, tier_from_score, BenchmarkWorkload, CapabilityProbe, GraphicsContext,
    ProbeConfig, HIGH_SCORE_THRESHOLD, MEDIUM_SCORE_THRESHOLD,
};
pub use profile::{ApiVersion, CapabilityProfile, DetectionSource, GpuTier};
