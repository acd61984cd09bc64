//! Adaptive performance mode selection.

mod controller;

pub use controller::{
    ModeChangeReason, ModeController, ModeControllerConfig, ModeTransition,
    DEFAULT_DOWNGRADE_RATIO, DEFAULT_UPGRADE_RATIO,
};
