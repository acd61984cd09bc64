//! Viewport-driven patch loading.
//!
//! The overlay is split into grid-aligned patches. [`PatchScheduler`] decides
//! which patches the current view needs, loads them nearest first through a
//! host-supplied [`PatchLoader`], and drops those that fall out of range.

mod grid;
mod loader;
mod record;
mod scheduler;

pub use grid::{PatchGrid, PatchId, DEFAULT_PATCH_SIZE_METERS, MAX_COVERING_PATCHES};
pub use loader::{BoxFuture, PatchLoader, PatchPayload};
pub use record::{
    priority_for_distance, ErrorRetryPolicy, PatchRecord, PatchState, DEFAULT_RETRY_AFTER_PASSES,
};
pub use scheduler::{
    PatchEvent, PatchScheduler, PatchSchedulerConfig, ProcessReport, SchedulerStats,
    VisibilityUpdate, DEFAULT_BATCH_DELAY, DEFAULT_BATCH_SIZE, DEFAULT_LOAD_DISTANCE_METERS,
    DEFAULT_MAX_LOADED_PATCHES, DEFAULT_UNLOAD_DISTANCE_METERS,
};
