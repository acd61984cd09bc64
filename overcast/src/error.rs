//! Error types.
//!
//! Most failure paths in this crate degrade instead of erroring: probing
//! falls back to a pessimistic profile, texture acquisition returns `None`
//! and patch loads end in the `Error` state. The types here cover the
//! remaining fallible boundaries.

use thiserror::Error;

/// Errors raised while merging or importing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field is outside its accepted range.
    #[error("{field} out of range: {value} (expected {min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// A settings snapshot could not be parsed or produced.
    #[error("Invalid settings snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}

/// Errors raised by the resource pool and cache.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// The entry alone is larger than the whole memory budget.
    #[error("Resource {id} of {size} bytes exceeds the memory budget of {budget} bytes")]
    ExceedsBudget { id: String, size: u64, budget: u64 },

    /// Nothing evictable remains and the entry still does not fit.
    #[error("Memory budget exhausted: {needed} bytes needed, {available} bytes available")]
    BudgetExhausted { needed: u64, available: u64 },

    /// The drawing context refused to allocate.
    #[error("Allocation failed: {0}")]
    AllocationFailed(String),

    /// The pool has been disposed.
    #[error("Resource pool is disposed")]
    Disposed,
}

/// Errors reported by a [`PatchLoader`](crate::patch::PatchLoader).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatchLoadError {
    /// The loader could not produce the patch payload.
    #[error("Patch generation failed: {0}")]
    Generation(String),

    /// The load was abandoned because the scheduler was disposed or reloaded.
    #[error("Patch load cancelled")]
    Cancelled,
}

/// Errors reported by a [`GraphicsContext`](crate::capability::GraphicsContext)
/// while probing. Never surfaced from [`CapabilityProbe::probe`](crate::capability::CapabilityProbe::probe).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// No rendering context could be created.
    #[error("No rendering context available")]
    NoContext,

    /// The benchmark workload failed to run.
    #[error("Benchmark failed: {0}")]
    Benchmark(String),
}

/// Errors raised while installing the tracing subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The filter directive could not be parsed.
    #[error("Invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    /// A global subscriber is already installed.
    #[error("Failed to install subscriber: {0}")]
    Install(String),

    /// The log directory could not be created.
    #[error("Failed to create log directory: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::OutOfRange {
            field: "target_frame_rate",
            value: 500.0,
            min: 15.0,
            max: 240.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("target_frame_rate"));
        assert!(msg.contains("500"));
    }

    #[test]
    fn test_resource_error_display() {
        let err = ResourceError::ExceedsBudget {
            id: "noise".to_string(),
            size: 10,
            budget: 5,
        };
        assert!(err.to_string().contains("noise"));
    }

    #[test]
    fn test_config_error_from_json() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: ConfigError = json_err.into();
        assert!(matches!(err, ConfigError::Snapshot(_)));
    }
}
