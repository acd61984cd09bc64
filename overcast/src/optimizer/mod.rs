//! Per-tick quality and resource optimization.
//!
//! [`Optimizer`] is the entry point a renderer talks to: feed it frame
//! timings, call [`Optimizer::optimize`] with the current view, and draw
//! with the returned [`OptimizationResult`].

mod coordinator;
mod result;

pub use coordinator::{MaintenanceReport, Optimizer};
pub use result::{Optimization, OptimizationResult, QualityEvent};
