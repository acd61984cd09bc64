//! Frame-rate monitoring.

mod timer;

pub use timer::{
    FrameMetrics, FrameTimer, FrameTrend, DEFAULT_WINDOW_SIZE, STABILITY_SAMPLES,
    STABILITY_STDDEV_FPS, TREND_MIN_SAMPLES, TREND_THRESHOLD_FPS,
};
