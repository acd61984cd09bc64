//! Level-of-detail selection and culling.
//!
//! The [`LodSelector`] maps a zoom level, performance mode and device
//! capability onto one rung of a fixed five-level ladder and nudges it
//! up or down from frame-rate feedback. [`cull`] then trims the candidate
//! cells for that level to what is visible, near enough and within budget.

mod culling;
mod ladder;
mod selector;

pub use culling::{cull, CullCandidate, CullReason, CullResult};
pub use ladder::{default_ladder, LodLevel, ZoomRange};
pub use selector::{
    can_handle, LodSelector, LodSelectorConfig, DEFAULT_DEGRADE_AFTER,
    DEFAULT_UPGRADE_MARGIN_FPS,
};
