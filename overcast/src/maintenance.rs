//! Periodic background work.
//!
//! A [`RepeatingTask`] runs a closure on a fixed period in a tokio task until
//! it is cancelled, either through the task itself, a [`CancelHandle`], or by
//! dropping the task.
//!
//! ```text
//! spawn ──► wait(period) ──► body() ──► wait(period) ──► ...
//!                │
//!                └── cancel ──► exit
//! ```
//!
//! The first run happens one full period after spawning. Missed periods are
//! not replayed; a slow body delays the next run instead.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Shortest accepted period.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Cancels a [`RepeatingTask`] from elsewhere. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    /// Stop the task. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the task has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// A closure run on a fixed period until cancelled.
///
/// Dropping the task cancels it.
#[derive(Debug)]
pub struct RepeatingTask {
    name: &'static str,
    period: Duration,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl RepeatingTask {
    /// Spawn `body` to run every `period` on the current tokio runtime.
    ///
    /// Must be called from within a runtime.
    pub fn spawn<F>(name: &'static str, period: Duration, body: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self::spawn_with_token(name, period, CancellationToken::new(), body)
    }

    /// Like [`spawn`](Self::spawn), stopping when `parent` is cancelled too.
    pub fn spawn_child<F>(
        name: &'static str,
        period: Duration,
        parent: &CancellationToken,
        body: F,
    ) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self::spawn_with_token(name, period, parent.child_token(), body)
    }

    fn spawn_with_token<F>(
        name: &'static str,
        period: Duration,
        token: CancellationToken,
        mut body: F,
    ) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        let shutdown = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(task = name, period_ms = period.as_millis() as u64, "Repeating task started");

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => {
                        debug!(task = name, "Repeating task cancelled");
                        break;
                    }

                    _ = ticker.tick() => {
                        body();
                    }
                }
            }
        });

        info!(task = name, period_ms = period.as_millis() as u64, "Scheduled repeating task");

        Self {
            name,
            period,
            token,
            handle: Some(handle),
        }
    }

    /// Task name, for logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Period between runs.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// A handle that can cancel this task from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.token.clone(),
        }
    }

    /// Stop the task. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the task has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel and wait for the task to exit.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for RepeatingTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(counter: &Arc<AtomicUsize>) -> impl FnMut() + Send + 'static {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_once_per_period() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = RepeatingTask::spawn("test", Duration::from_secs(1), counting(&runs));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(3_000)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        task.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_handle_stops_runs() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = RepeatingTask::spawn("test", Duration::from_secs(1), counting(&runs));
        let handle = task.cancel_handle();

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        handle.cancel();
        assert!(task.is_cancelled());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = RepeatingTask::spawn("test", Duration::from_secs(1), counting(&runs));
        let handle = task.cancel_handle();
        drop(task);

        assert!(handle.is_cancelled());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_token_cancels_child() {
        let parent = CancellationToken::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let task = RepeatingTask::spawn_child(
            "child",
            Duration::from_secs(1),
            &parent,
            counting(&runs),
        );

        parent.cancel();
        assert!(task.is_cancelled());
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_is_clamped() {
        let task = RepeatingTask::spawn("fast", Duration::ZERO, || {});
        assert_eq!(task.period(), MIN_PERIOD);
        task.shutdown().await;
    }
}
