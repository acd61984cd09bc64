//! Rolling frame-rate statistics.
//!
//! Keeps the durations of the most recent frames in a bounded ring buffer
//! and derives instantaneous, average, minimum and maximum frame rate from
//! them, plus a stability flag and a trend.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Frames kept in the rolling window.
pub const DEFAULT_WINDOW_SIZE: usize = 60;

/// Samples inspected by the stability check.
pub const STABILITY_SAMPLES: usize = 10;

/// Standard deviation (fps) below which the rate counts as stable.
pub const STABILITY_STDDEV_FPS: f64 = 5.0;

/// Minimum samples needed before a trend is reported.
pub const TREND_MIN_SAMPLES: usize = 4;

/// Difference (fps) between half-window means that counts as a trend.
pub const TREND_THRESHOLD_FPS: f64 = 2.0;

/// Direction the frame rate is moving in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameTrend {
    /// Recent frames are faster than older ones.
    Improving,
    /// No meaningful change.
    #[default]
    Stable,
    /// Recent frames are slower than older ones.
    Degrading,
}

impl std::fmt::Display for FrameTrend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameTrend::Improving => write!(f, "improving"),
            FrameTrend::Stable => write!(f, "stable"),
            FrameTrend::Degrading => write!(f, "degrading"),
        }
    }
}

/// Point-in-time snapshot of frame statistics.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FrameMetrics {
    /// Rate implied by the most recent frame.
    pub current_rate: f64,
    /// Rate over the whole window.
    pub average_rate: f64,
    /// Slowest frame in the window, as a rate.
    pub min_rate: f64,
    /// Fastest frame in the window, as a rate.
    pub max_rate: f64,
    /// Frames longer than twice the target frame time since the last reset.
    pub dropped_frames: u64,
    /// Whether the last few frames had a consistent rate.
    pub is_stable: bool,
    /// Direction of the rate across the window.
    pub trend: FrameTrend,
    /// Samples currently in the window.
    pub sample_count: usize,
    /// Frames recorded since the last reset.
    pub total_frames: u64,
}

/// Rolling frame timer.
#[derive(Debug, Clone)]
pub struct FrameTimer {
    durations: VecDeque<Duration>,
    capacity: usize,
    last_timestamp: Option<Instant>,
    target_frame_rate: f64,
    dropped_frames: u64,
    total_frames: u64,
}

impl FrameTimer {
    /// Create a timer for the given target frame rate.
    pub fn new(target_frame_rate: f64) -> Self {
        Self::with_capacity(target_frame_rate, DEFAULT_WINDOW_SIZE)
    }

    /// Create a timer with a custom window size.
    pub fn with_capacity(target_frame_rate: f64, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            durations: VecDeque::with_capacity(capacity),
            capacity,
            last_timestamp: None,
            target_frame_rate: target_frame_rate.max(1.0),
            dropped_frames: 0,
            total_frames: 0,
        }
    }

    /// Record a frame boundary at `now`.
    ///
    /// The first call only establishes the reference timestamp.
    pub fn record_frame(&mut self, now: Instant) {
        if let Some(last) = self.last_timestamp {
            let duration = now.saturating_duration_since(last);
            self.record_frame_duration(duration);
        }
        self.last_timestamp = Some(now);
    }

    /// Record a frame of known duration.
    ///
    /// Zero-length frames are ignored.
    pub fn record_frame_duration(&mut self, duration: Duration) {
        if duration.is_zero() {
            return;
        }

        if self.durations.len() == self.capacity {
            self.durations.pop_front();
        }
        self.durations.push_back(duration);
        self.total_frames += 1;

        if duration.as_secs_f64() > 2.0 * self.target_frame_time().as_secs_f64() {
            self.dropped_frames += 1;
        }
    }

    /// Target frame rate.
    pub fn target_frame_rate(&self) -> f64 {
        self.target_frame_rate
    }

    /// Change the target frame rate.
    pub fn set_target_frame_rate(&mut self, rate: f64) {
        self.target_frame_rate = rate.max(1.0);
    }

    /// Frame time implied by the target rate.
    pub fn target_frame_time(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_frame_rate)
    }

    /// Rate implied by the most recent frame, 0 when empty.
    pub fn current_rate(&self) -> f64 {
        self.durations.back().map(|d| rate_of(*d)).unwrap_or(0.0)
    }

    /// Frames divided by total elapsed time over the window, 0 when empty.
    pub fn average_rate(&self) -> f64 {
        let total: Duration = self.durations.iter().sum();
        if total.is_zero() {
            return 0.0;
        }
        self.durations.len() as f64 / total.as_secs_f64()
    }

    /// Rate of the slowest frame in the window.
    pub fn min_rate(&self) -> f64 {
        self.durations
            .iter()
            .max()
            .map(|d| rate_of(*d))
            .unwrap_or(0.0)
    }

    /// Rate of the fastest frame in the window.
    pub fn max_rate(&self) -> f64 {
        self.durations
            .iter()
            .min()
            .map(|d| rate_of(*d))
            .unwrap_or(0.0)
    }

    /// Whether the last [`STABILITY_SAMPLES`] frames have a consistent rate.
    pub fn is_stable(&self) -> bool {
        if self.durations.len() < STABILITY_SAMPLES {
            return false;
        }

        let rates: Vec<f64> = self
            .durations
            .iter()
            .rev()
            .take(STABILITY_SAMPLES)
            .map(|d| rate_of(*d))
            .collect();

        let mean = rates.iter().sum::<f64>() / rates.len() as f64;
        let variance = rates.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / rates.len() as f64;
        variance.sqrt() < STABILITY_STDDEV_FPS
    }

    /// Compare the mean rate of the older half of the window to the newer half.
    pub fn trend(&self) -> FrameTrend {
        let n = self.durations.len();
        if n < TREND_MIN_SAMPLES {
            return FrameTrend::Stable;
        }

        let half = n / 2;
        let mean = |range: std::ops::Range<usize>| {
            let len = range.len() as f64;
            range.map(|i| rate_of(self.durations[i])).sum::<f64>() / len
        };

        let older = mean(0..half);
        let newer = mean(half..n);
        let delta = newer - older;

        if delta > TREND_THRESHOLD_FPS {
            FrameTrend::Improving
        } else if delta < -TREND_THRESHOLD_FPS {
            FrameTrend::Degrading
        } else {
            FrameTrend::Stable
        }
    }

    /// Snapshot of all derived statistics.
    pub fn metrics(&self) -> FrameMetrics {
        FrameMetrics {
            current_rate: self.current_rate(),
            average_rate: self.average_rate(),
            min_rate: self.min_rate(),
            max_rate: self.max_rate(),
            dropped_frames: self.dropped_frames,
            is_stable: self.is_stable(),
            trend: self.trend(),
            sample_count: self.durations.len(),
            total_frames: self.total_frames,
        }
    }

    /// Samples currently in the window.
    pub fn sample_count(&self) -> usize {
        self.durations.len()
    }

    /// Clear all samples and counters.
    pub fn reset(&mut self) {
        self.durations.clear();
        self.last_timestamp = None;
        self.dropped_frames = 0;
        self.total_frames = 0;
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new(60.0)
    }
}

fn rate_of(duration: Duration) -> f64 {
    let secs = duration.as_secs_f64();
    if secs > 0.0 {
        1.0 / secs
    } else {
        0.0
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_window_never_exceeds_capacity(
            durations in prop::collection::vec(1u64..200, 0..300),
            capacity in 1usize..100,
        ) {
            let mut t = FrameTimer::with_capacity(60.0, capacity);
            for d in &durations {
                t.record_frame_duration(Duration::from_millis(*d));
            }
            prop_assert!(t.sample_count() <= capacity);
            prop_assert!(t.min_rate() <= t.max_rate());
            if t.sample_count() > 0 {
                prop_assert!(t.average_rate() >= t.min_rate() - 1e-9);
                prop_assert!(t.average_rate() <= t.max_rate() + 1e-9);
            }
        }
    }
}
