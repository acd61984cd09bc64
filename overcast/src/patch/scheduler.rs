//! Viewport-driven patch scheduler.
//!
//! Each visibility pass maps the viewport onto grid patches, refreshes their
//! priorities and rebuilds the load queue from the eligible records. Loading
//! happens in bounded batches, either driven by the caller through
//! [`PatchScheduler::process_queue`] or by a background worker.
//!
//! ```text
//! update_patch_visibility ──► records + queue ──notify──► worker
//!                                    ▲                      │
//!                                    │  Loaded / Failed     │ batch of N
//!                                    └──────────────────── loader.load()
//! ```
//!
//! Completions are only applied while the scheduler is live and the load's
//! generation matches the current one; `force_reload` and `dispose` both
//! invalidate loads that are still in flight.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::grid::{PatchGrid, PatchId, DEFAULT_PATCH_SIZE_METERS};
use super::loader::{PatchLoader, PatchPayload};
use super::record::{priority_for_distance, ErrorRetryPolicy, PatchRecord, PatchState};
use crate::clock::{system_clock, SharedClock};
use crate::error::PatchLoadError;
use crate::events::{Listeners, Subscription};
use crate::geo::{GeoBounds, GeoPoint};
use crate::lod::CullCandidate;

/// Default radius within which patches are loaded.
pub const DEFAULT_LOAD_DISTANCE_METERS: f64 = 30_000.0;

/// Default radius beyond which loaded patches are dropped.
pub const DEFAULT_UNLOAD_DISTANCE_METERS: f64 = 45_000.0;

/// Default cap on simultaneously loaded patches.
pub const DEFAULT_MAX_LOADED_PATCHES: usize = 64;

/// Default number of loads started per batch.
pub const DEFAULT_BATCH_SIZE: usize = 3;

/// Default pause between batches.
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(16);

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchSchedulerConfig {
    /// Patch edge in projected meters.
    pub patch_size_meters: f64,
    /// Extra rings of patches around the viewport.
    pub buffer_patches: u32,
    /// Patches farther than this from the camera are not queued.
    pub load_distance_meters: f64,
    /// Loaded patches farther than this from the camera are dropped.
    /// Always treated as greater than the load distance.
    pub unload_distance_meters: f64,
    /// Cap on loaded patches; least recently required go first.
    pub max_loaded_patches: usize,
    /// Loads started concurrently per batch (at least 1).
    pub batch_size: usize,
    /// Pause between batches.
    pub batch_delay: Duration,
    /// When failed patches may be retried.
    pub retry_policy: ErrorRetryPolicy,
}

impl Default for PatchSchedulerConfig {
    fn default() -> Self {
        Self {
            patch_size_meters: DEFAULT_PATCH_SIZE_METERS,
            buffer_patches: 1,
            load_distance_meters: DEFAULT_LOAD_DISTANCE_METERS,
            unload_distance_meters: DEFAULT_UNLOAD_DISTANCE_METERS,
            max_loaded_patches: DEFAULT_MAX_LOADED_PATCHES,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
            retry_policy: ErrorRetryPolicy::default(),
        }
    }
}

impl PatchSchedulerConfig {
    /// Unload distance actually applied: at least one patch beyond the
    /// load distance.
    pub fn effective_unload_distance(&self) -> f64 {
        if self.unload_distance_meters > self.load_distance_meters {
            self.unload_distance_meters
        } else {
            self.load_distance_meters + self.patch_size_meters.max(1.0)
        }
    }
}

/// Notifications fired by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum PatchEvent {
    /// A payload became available.
    Loaded { id: PatchId, bounds: GeoBounds },
    /// A loaded payload was dropped.
    Unloaded { id: PatchId },
    /// A load failed; the patch is now in `Error`.
    Failed { id: PatchId, error: PatchLoadError },
}

/// Outcome of one visibility pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisibilityUpdate {
    /// Patches covering the viewport and buffer.
    pub required: usize,
    /// Records created during this pass.
    pub created: usize,
    /// Queue length after the pass.
    pub queued: usize,
    /// Patches unloaded during this pass.
    pub unloaded: Vec<PatchId>,
}

/// Outcome of one [`PatchScheduler::process_queue`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessReport {
    /// Batches started.
    pub batches: usize,
    /// Loads that completed and were applied.
    pub loaded: usize,
    /// Loads that failed and were applied.
    pub failed: usize,
    /// Completions dropped because they were invalidated.
    pub discarded: usize,
}

/// Snapshot of scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Known records.
    pub records: usize,
    /// Records in `Loaded`.
    pub loaded: usize,
    /// Records in `Loading`.
    pub loading: usize,
    /// Records in `Error`.
    pub errored: usize,
    /// Queue length.
    pub queued: usize,
    /// Loads started since creation.
    pub loads_started: u64,
    /// Loads applied as successes.
    pub loads_completed: u64,
    /// Loads applied as failures.
    pub loads_failed: u64,
    /// Unload notifications fired.
    pub unloads: u64,
}

/// Heap entry: highest priority first, then first queued.
#[derive(Debug, Clone, Copy)]
struct QueueItem {
    priority: f64,
    seq: u64,
    id: PatchId,
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueItem {}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct SchedulerState {
    records: HashMap<PatchId, PatchRecord>,
    queue: BinaryHeap<QueueItem>,
    payloads: HashMap<PatchId, PatchPayload>,
    generation: u64,
    next_seq: u64,
    loads_started: u64,
    loads_completed: u64,
    loads_failed: u64,
    unloads: u64,
}

impl SchedulerState {
    fn enqueue(&mut self, id: PatchId, priority: f64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(QueueItem { priority, seq, id });
    }

    /// Patches holding or about to hold a payload.
    fn occupied(&self) -> usize {
        self.records
            .values()
            .filter(|r| matches!(r.state, PatchState::Loaded | PatchState::Loading))
            .count()
    }

    /// Drop a loaded patch. Returns `true` only for the transition out of
    /// `Loaded`, so each unload is reported once.
    fn unload(&mut self, id: PatchId) -> bool {
        let Some(record) = self.records.get_mut(&id) else {
            return false;
        };
        if record.state != PatchState::Loaded {
            return false;
        }
        record.state = PatchState::Unloaded;
        self.payloads.remove(&id);
        self.unloads += 1;
        true
    }
}

struct Inner {
    config: PatchSchedulerConfig,
    grid: PatchGrid,
    loader: Arc<dyn PatchLoader>,
    clock: SharedClock,
    state: Mutex<SchedulerState>,
    processing: AtomicBool,
    disposed: AtomicBool,
    shutdown: CancellationToken,
    wake: Notify,
    listeners: Listeners<PatchEvent>,
}

/// Resets the processing flag when a `process_queue` call ends, including
/// when its future is dropped mid-batch.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, AtomicOrdering::Release);
    }
}

/// Decides which patches to load and unload, and runs the loads.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct PatchScheduler {
    inner: Arc<Inner>,
}

impl PatchScheduler {
    /// Create a scheduler using the system clock.
    pub fn new(config: PatchSchedulerConfig, loader: Arc<dyn PatchLoader>) -> Self {
        Self::with_clock(config, loader, system_clock())
    }

    /// Create a scheduler with an injected clock.
    pub fn with_clock(
        mut config: PatchSchedulerConfig,
        loader: Arc<dyn PatchLoader>,
        clock: SharedClock,
    ) -> Self {
        config.batch_size = config.batch_size.max(1);
        let grid = PatchGrid::new(config.patch_size_meters);
        Self {
            inner: Arc::new(Inner {
                config,
                grid,
                loader,
                clock,
                state: Mutex::new(SchedulerState::default()),
                processing: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                wake: Notify::new(),
                listeners: Listeners::new(),
            }),
        }
    }

    /// Settings in effect.
    pub fn config(&self) -> &PatchSchedulerConfig {
        &self.inner.config
    }

    /// The grid patches are laid out on.
    pub fn grid(&self) -> &PatchGrid {
        &self.inner.grid
    }

    /// Register a listener for load and unload notifications.
    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&PatchEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(listener)
    }

    /// Recompute required patches for a viewport, queue the eligible ones and
    /// unload those out of range or over capacity.
    pub fn update_patch_visibility(
        &self,
        viewport_bounds: &GeoBounds,
        camera: &GeoPoint,
    ) -> VisibilityUpdate {
        if self.is_disposed() {
            return VisibilityUpdate::default();
        }

        let inner = &self.inner;
        let config = &inner.config;
        let now = inner.clock.now();
        let center = viewport_bounds.center();
        let unload_distance = config.effective_unload_distance();
        let required = inner
            .grid
            .patches_covering(viewport_bounds, config.buffer_patches);
        let required_set: HashSet<PatchId> = required.iter().copied().collect();

        let mut update = VisibilityUpdate {
            required: required.len(),
            ..Default::default()
        };
        let mut events = Vec::new();

        {
            let mut state = inner.state.lock();

            // Rebuilt from scratch so priorities follow the viewport.
            state.queue.clear();

            let mut eligible = Vec::new();
            for &id in &required {
                let patch_center = inner.grid.center_of(id);
                let priority = priority_for_distance(patch_center.distance_to(&center));
                let in_range = patch_center.distance_to(camera) <= config.load_distance_meters;

                let record = state.records.entry(id).or_insert_with(|| {
                    update.created += 1;
                    PatchRecord::new(id, inner.grid.bounds_of(id), now)
                });
                record.priority = priority;
                record.last_accessed_at = now;

                if record.state == PatchState::Error {
                    record.note_error_pass(config.retry_policy);
                }
                if record.state == PatchState::Unloaded && in_range {
                    eligible.push((id, priority));
                }
            }

            // Out-of-range loaded patches, plus idle records nobody needs.
            let mut out_of_range = Vec::new();
            let mut forgotten = Vec::new();
            for (id, record) in &state.records {
                let distance = inner.grid.center_of(*id).distance_to(camera);
                if distance <= unload_distance {
                    continue;
                }
                match record.state {
                    PatchState::Loaded => out_of_range.push(*id),
                    PatchState::Unloaded | PatchState::Error if !required_set.contains(id) => {
                        forgotten.push(*id)
                    }
                    _ => {}
                }
            }
            for id in out_of_range {
                if state.unload(id) {
                    update.unloaded.push(id);
                }
            }
            for id in forgotten {
                state.records.remove(&id);
            }

            // Capacity: patches not required by this pass go first, least
            // recently required first, lower priority breaking ties. Patches
            // required by this pass are never displaced.
            let occupied = state.occupied();
            let wanted = occupied + eligible.len();
            if wanted > config.max_loaded_patches {
                let mut stale: Vec<(std::time::Instant, f64, PatchId)> = state
                    .records
                    .values()
                    .filter(|r| r.state == PatchState::Loaded && !required_set.contains(&r.id))
                    .map(|r| (r.last_accessed_at, r.priority, r.id))
                    .collect();
                stale.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));
                let excess = wanted - config.max_loaded_patches;
                for &(_, _, id) in stale.iter().take(excess) {
                    if state.unload(id) {
                        update.unloaded.push(id);
                    }
                }
            }

            // Only queue what fits next to loaded and in-flight patches.
            let room = config.max_loaded_patches.saturating_sub(state.occupied());
            eligible.sort_by(|a, b| b.1.total_cmp(&a.1));
            for &(id, priority) in eligible.iter().take(room) {
                state.enqueue(id, priority);
            }

            update.queued = state.queue.len();
            events.extend(
                update
                    .unloaded
                    .iter()
                    .map(|&id| PatchEvent::Unloaded { id }),
            );
        }

        if !update.unloaded.is_empty() {
            debug!(
                unloaded = update.unloaded.len(),
                "Unloaded patches out of range or over capacity"
            );
        }
        for event in &events {
            inner.listeners.notify(event);
        }
        if update.queued > 0 {
            inner.wake.notify_one();
        }

        update
    }

    /// Drain the load queue in batches.
    ///
    /// Returns immediately with an empty report if another call is already
    /// running or the scheduler is disposed.
    pub async fn process_queue(&self) -> ProcessReport {
        let inner = &self.inner;
        let mut report = ProcessReport::default();

        if self.is_disposed()
            || inner
                .processing
                .compare_exchange(false, true, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
                .is_err()
        {
            return report;
        }
        let _guard = ProcessingGuard(&inner.processing);

        loop {
            if self.is_disposed() || inner.shutdown.is_cancelled() {
                break;
            }

            let (batch, generation) = self.start_batch();
            if batch.is_empty() {
                break;
            }
            report.batches += 1;

            let loads = batch.iter().map(|&(id, bounds)| {
                let loader = Arc::clone(&inner.loader);
                async move { (id, bounds, loader.load(id, bounds).await) }
            });
            let results = join_all(loads).await;

            self.finish_batch(results, generation, &mut report);

            let more = !inner.state.lock().queue.is_empty();
            if !more {
                break;
            }
            if !inner.config.batch_delay.is_zero() {
                tokio::time::sleep(inner.config.batch_delay).await;
            }
        }

        report
    }

    /// Pop up to `batch_size` startable ids and mark them `Loading`, never
    /// exceeding the loaded-patch cap.
    fn start_batch(&self) -> (Vec<(PatchId, GeoBounds)>, u64) {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        let generation = state.generation;
        let mut batch = Vec::with_capacity(inner.config.batch_size);
        let room = inner
            .config
            .max_loaded_patches
            .saturating_sub(state.occupied());
        let limit = inner.config.batch_size.min(room);

        while batch.len() < limit {
            let Some(item) = state.queue.pop() else {
                break;
            };
            let Some(record) = state.records.get_mut(&item.id) else {
                continue;
            };
            // One load per id: anything not Unloaded is already handled.
            if record.state != PatchState::Unloaded {
                continue;
            }
            record.state = PatchState::Loading;
            batch.push((item.id, record.bounds));
        }
        state.loads_started += batch.len() as u64;

        (batch, generation)
    }

    fn finish_batch(
        &self,
        results: Vec<(PatchId, GeoBounds, Result<bytes::Bytes, PatchLoadError>)>,
        generation: u64,
        report: &mut ProcessReport,
    ) {
        let inner = &self.inner;
        let mut events = Vec::with_capacity(results.len());

        {
            let mut state = inner.state.lock();
            let stale = self.is_disposed() || state.generation != generation;

            for (id, bounds, result) in results {
                let applicable = !stale
                    && state
                        .records
                        .get(&id)
                        .is_some_and(|r| r.state == PatchState::Loading);
                if !applicable {
                    report.discarded += 1;
                    continue;
                }

                match result {
                    Ok(data) => {
                        if let Some(record) = state.records.get_mut(&id) {
                            record.state = PatchState::Loaded;
                        }
                        state
                            .payloads
                            .insert(id, PatchPayload { id, bounds, data });
                        state.loads_completed += 1;
                        report.loaded += 1;
                        events.push(PatchEvent::Loaded { id, bounds });
                    }
                    Err(error) => {
                        if let Some(record) = state.records.get_mut(&id) {
                            record.state = PatchState::Error;
                            record.failure_count += 1;
                            record.error_passes = 0;
                        }
                        state.loads_failed += 1;
                        report.failed += 1;
                        warn!(patch = %id, error = %error, "Patch load failed");
                        events.push(PatchEvent::Failed { id, error });
                    }
                }
            }
        }

        for event in &events {
            inner.listeners.notify(event);
        }
    }

    /// Spawn a background task that drains the queue whenever a visibility
    /// pass queues work. Stops on [`dispose`](Self::dispose).
    pub fn spawn_worker(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            info!("Patch worker started");
            loop {
                tokio::select! {
                    biased;

                    _ = scheduler.inner.shutdown.cancelled() => {
                        info!("Patch worker shutting down");
                        break;
                    }

                    _ = scheduler.inner.wake.notified() => {
                        let report = scheduler.process_queue().await;
                        if report.batches > 0 {
                            debug!(
                                batches = report.batches,
                                loaded = report.loaded,
                                failed = report.failed,
                                discarded = report.discarded,
                                "Processed patch queue"
                            );
                        }
                    }
                }
            }
        })
    }

    /// Drop every loaded patch and the queue, invalidate in-flight loads,
    /// then run a fresh visibility pass.
    pub fn force_reload(&self, viewport_bounds: &GeoBounds, camera: &GeoPoint) -> VisibilityUpdate {
        if self.is_disposed() {
            return VisibilityUpdate::default();
        }

        let mut dropped = Vec::new();
        {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            state.queue.clear();

            let ids: Vec<PatchId> = state.records.keys().copied().collect();
            for id in ids {
                if state.unload(id) {
                    dropped.push(id);
                }
                if let Some(record) = state.records.get_mut(&id) {
                    // In-flight and failed patches start over too.
                    record.state = PatchState::Unloaded;
                    record.error_passes = 0;
                }
            }
            state.payloads.clear();
        }

        info!(dropped = dropped.len(), "Forced patch reload");
        for id in &dropped {
            self.inner.listeners.notify(&PatchEvent::Unloaded { id: *id });
        }

        let mut update = self.update_patch_visibility(viewport_bounds, camera);
        dropped.extend(update.unloaded);
        update.unloaded = dropped;
        update
    }

    /// Stop the worker, empty the queue and drop every record and payload.
    /// In-flight loads are not awaited; their results are discarded.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, AtomicOrdering::AcqRel) {
            return;
        }
        self.inner.shutdown.cancel();
        {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            state.queue.clear();
            state.payloads.clear();
            state.records.clear();
        }
        self.inner.listeners.clear();
        info!("Patch scheduler disposed");
    }

    /// Whether [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(AtomicOrdering::Acquire)
    }

    /// Whether a `process_queue` call is running.
    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(AtomicOrdering::Acquire)
    }

    /// State of a known patch.
    pub fn state_of(&self, id: PatchId) -> Option<PatchState> {
        self.inner.state.lock().records.get(&id).map(|r| r.state)
    }

    /// Copy of a record.
    pub fn record(&self, id: PatchId) -> Option<PatchRecord> {
        self.inner.state.lock().records.get(&id).cloned()
    }

    /// Payload of a loaded patch.
    pub fn payload(&self, id: PatchId) -> Option<PatchPayload> {
        self.inner.state.lock().payloads.get(&id).cloned()
    }

    /// Ids of loaded patches, sorted.
    pub fn loaded_patches(&self) -> Vec<PatchId> {
        let state = self.inner.state.lock();
        let mut ids: Vec<PatchId> = state.payloads.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Loaded patches as culling candidates, weighted by their priority.
    pub fn cull_candidates(&self) -> Vec<CullCandidate<PatchId>> {
        let state = self.inner.state.lock();
        state
            .records
            .values()
            .filter(|r| r.state == PatchState::Loaded)
            .map(|r| CullCandidate::new(r.id, r.bounds, r.priority))
            .collect()
    }

    /// Queue length.
    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Counters snapshot.
    pub fn stats(&self) -> SchedulerStats {
        let state = self.inner.state.lock();
        let mut stats = SchedulerStats {
            records: state.records.len(),
            queued: state.queue.len(),
            loads_started: state.loads_started,
            loads_completed: state.loads_completed,
            loads_failed: state.loads_failed,
            unloads: state.unloads,
            ..Default::default()
        };
        for record in state.records.values() {
            match record.state {
                PatchState::Loaded => stats.loaded += 1,
                PatchState::Loading => stats.loading += 1,
                PatchState::Error => stats.errored += 1,
                PatchState::Unloaded => {}
            }
        }
        stats
    }
}

impl std::fmt::Debug for PatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchScheduler")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::patch::loader::BoxFuture;
    use bytes::Bytes;
    use std::sync::atomic::AtomicUsize;

    /// Loader returning the id as text; fails for ids listed in `failing`.
    #[derive(Default)]
    struct TextLoader {
        calls: AtomicUsize,
        failing: Mutex<HashSet<PatchId>>,
    }

    impl PatchLoader for TextLoader {
        fn load(
            &self,
            id: PatchId,
            _bounds: GeoBounds,
        ) -> BoxFuture<'_, Result<Bytes, PatchLoadError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, AtomicOrdering::SeqCst);
                if self.failing.lock().contains(&id) {
                    Err(PatchLoadError::Generation(format!("no data for {}", id)))
                } else {
                    Ok(Bytes::from(id.to_string()))
                }
            })
        }
    }

    fn small_config() -> PatchSchedulerConfig {
        PatchSchedulerConfig {
            patch_size_meters: 1_000.0,
            buffer_patches: 0,
            load_distance_meters: 8_000.0,
            unload_distance_meters: 10_000.0,
            batch_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    fn scheduler(config: PatchSchedulerConfig) -> (PatchScheduler, Arc<TextLoader>) {
        let loader = Arc::new(TextLoader::default());
        let clock = Arc::new(ManualClock::new());
        (
            PatchScheduler::with_clock(config, loader.clone(), clock),
            loader,
        )
    }

    fn camera() -> GeoPoint {
        GeoPoint::new(47.0, 8.0)
    }

    #[test]
    fn test_effective_unload_distance() {
        let mut config = small_config();
        assert_eq!(config.effective_unload_distance(), 10_000.0);
        config.unload_distance_meters = 5_000.0;
        assert_eq!(config.effective_unload_distance(), 9_000.0);
    }

    #[test]
    fn test_queue_orders_by_priority_then_fifo() {
        let mut heap = BinaryHeap::new();
        let id = |x| PatchId::new(x, 0);
        heap.push(QueueItem { priority: 0.5, seq: 0, id: id(0) });
        heap.push(QueueItem { priority: 0.9, seq: 1, id: id(1) });
        heap.push(QueueItem { priority: 0.5, seq: 2, id: id(2) });

        let order: Vec<i64> = std::iter::from_fn(|| heap.pop()).map(|i| i.id.x).collect();
        assert_eq!(order, vec![1, 0, 2]);
    }

    #[test]
    fn test_visibility_creates_and_queues() {
        let (scheduler, _) = scheduler(small_config());
        let bounds = GeoBounds::around(camera(), 1_500.0, 1_500.0);

        let update = scheduler.update_patch_visibility(&bounds, &camera());
        assert!(update.required > 0);
        assert_eq!(update.created, update.required);
        assert_eq!(update.queued, update.required);

        let again = scheduler.update_patch_visibility(&bounds, &camera());
        assert_eq!(again.created, 0);
    }

    #[test]
    fn test_patches_beyond_load_distance_are_not_queued() {
        let mut config = small_config();
        config.load_distance_meters = 500.0;
        config.unload_distance_meters = 2_000.0;
        let (scheduler, _) = scheduler(config);
        let bounds = GeoBounds::around(camera(), 5_000.0, 5_000.0);

        let update = scheduler.update_patch_visibility(&bounds, &camera());
        assert!(update.queued < update.required);
        assert!(update.queued >= 1);
    }

    #[tokio::test]
    async fn test_process_queue_loads_everything() {
        let (scheduler, loader) = scheduler(small_config());
        let bounds = GeoBounds::around(camera(), 1_500.0, 1_500.0);
        let update = scheduler.update_patch_visibility(&bounds, &camera());

        let report = scheduler.process_queue().await;
        assert_eq!(report.loaded, update.queued);
        assert_eq!(
            report.batches,
            update.queued.div_ceil(DEFAULT_BATCH_SIZE)
        );
        assert_eq!(loader.calls.load(AtomicOrdering::SeqCst), update.queued);

        let stats = scheduler.stats();
        assert_eq!(stats.loaded, update.queued);
        assert_eq!(stats.queued, 0);

        let id = scheduler.grid().patch_at(camera());
        assert_eq!(scheduler.state_of(id), Some(PatchState::Loaded));
        assert_eq!(
            scheduler.payload(id).map(|p| p.data),
            Some(Bytes::from(id.to_string()))
        );
    }

    #[tokio::test]
    async fn test_loaded_patches_are_not_requeued() {
        let (scheduler, loader) = scheduler(small_config());
        let bounds = GeoBounds::around(camera(), 500.0, 500.0);

        scheduler.update_patch_visibility(&bounds, &camera());
        scheduler.process_queue().await;
        let calls = loader.calls.load(AtomicOrdering::SeqCst);

        let update = scheduler.update_patch_visibility(&bounds, &camera());
        assert_eq!(update.queued, 0);
        scheduler.process_queue().await;
        assert_eq!(loader.calls.load(AtomicOrdering::SeqCst), calls);
    }

    #[tokio::test]
    async fn test_failure_fires_event_and_retries_after_passes() {
        let mut config = small_config();
        config.retry_policy = ErrorRetryPolicy::AfterPasses(2);
        let (scheduler, loader) = scheduler(config);
        let id = scheduler.grid().patch_at(camera());
        loader.failing.lock().insert(id);

        let failures = Arc::new(AtomicUsize::new(0));
        let seen = failures.clone();
        let _sub = scheduler.subscribe(move |event| {
            if matches!(event, PatchEvent::Failed { .. }) {
                seen.fetch_add(1, AtomicOrdering::SeqCst);
            }
        });

        let bounds = GeoBounds::around(scheduler.grid().center_of(id), 10.0, 10.0);
        scheduler.update_patch_visibility(&bounds, &camera());
        let report = scheduler.process_queue().await;
        assert_eq!(report.failed, 1);
        assert_eq!(failures.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(scheduler.state_of(id), Some(PatchState::Error));

        // First pass after the failure: still errored, not queued.
        assert_eq!(scheduler.update_patch_visibility(&bounds, &camera()).queued, 0);
        loader.failing.lock().clear();
        // Second pass: eligible again.
        assert_eq!(scheduler.update_patch_visibility(&bounds, &camera()).queued, 1);
        scheduler.process_queue().await;
        assert_eq!(scheduler.state_of(id), Some(PatchState::Loaded));
        assert_eq!(scheduler.record(id).map(|r| r.failure_count), Some(1));
    }

    #[tokio::test]
    async fn test_never_retry_keeps_error() {
        let mut config = small_config();
        config.retry_policy = ErrorRetryPolicy::Never;
        let (scheduler, loader) = scheduler(config);
        let id = scheduler.grid().patch_at(camera());
        loader.failing.lock().insert(id);

        let bounds = GeoBounds::around(scheduler.grid().center_of(id), 10.0, 10.0);
        scheduler.update_patch_visibility(&bounds, &camera());
        scheduler.process_queue().await;
        for _ in 0..5 {
            assert_eq!(scheduler.update_patch_visibility(&bounds, &camera()).queued, 0);
        }
        assert_eq!(scheduler.state_of(id), Some(PatchState::Error));
    }

    #[tokio::test]
    async fn test_capacity_unloads_least_recent() {
        let mut config = small_config();
        config.max_loaded_patches = 1;
        let loader = Arc::new(TextLoader::default());
        let clock = Arc::new(ManualClock::new());
        let scheduler = PatchScheduler::with_clock(config, loader, clock.clone());

        let first = scheduler.grid().patch_at(camera());
        let second = PatchId::new(first.x + 1, first.y);
        let at = |id| GeoBounds::around(scheduler.grid().center_of(id), 10.0, 10.0);

        scheduler.update_patch_visibility(&at(first), &camera());
        scheduler.process_queue().await;
        clock.advance(Duration::from_secs(1));

        // A new requirement displaces the patch no longer in view.
        let update = scheduler.update_patch_visibility(&at(second), &camera());
        assert_eq!(update.unloaded, vec![first]);
        assert_eq!(update.queued, 1);
        scheduler.process_queue().await;
        assert_eq!(scheduler.loaded_patches(), vec![second]);
    }

    #[tokio::test]
    async fn test_capacity_holds_steady_for_fixed_view() {
        let mut config = small_config();
        config.max_loaded_patches = 6;
        let (scheduler, loader) = scheduler(config);
        let bounds = GeoBounds::around(camera(), 3_000.0, 3_000.0);

        let first = scheduler.update_patch_visibility(&bounds, &camera());
        assert!(first.required > 6);
        assert_eq!(first.queued, 6);
        scheduler.process_queue().await;
        assert_eq!(scheduler.loaded_patches().len(), 6);
        let calls = loader.calls.load(AtomicOrdering::SeqCst);
        assert_eq!(calls, 6);

        // The nearest patches stay; nothing is reloaded or dropped.
        let nearest = scheduler.grid().patch_at(camera());
        for _ in 0..8 {
            let update = scheduler.update_patch_visibility(&bounds, &camera());
            assert!(update.unloaded.is_empty());
            assert_eq!(update.queued, 0);
            scheduler.process_queue().await;
            assert!(scheduler.loaded_patches().len() <= 6);
        }
        assert_eq!(loader.calls.load(AtomicOrdering::SeqCst), calls);
        assert_eq!(scheduler.state_of(nearest), Some(PatchState::Loaded));
        assert_eq!(scheduler.stats().unloads, 0);
    }

    #[tokio::test]
    async fn test_force_reload_invalidates_everything() {
        let (scheduler, _) = scheduler(small_config());
        let bounds = GeoBounds::around(camera(), 500.0, 500.0);
        scheduler.update_patch_visibility(&bounds, &camera());
        scheduler.process_queue().await;
        let loaded = scheduler.loaded_patches();
        assert!(!loaded.is_empty());

        let update = scheduler.force_reload(&bounds, &camera());
        assert_eq!(update.unloaded.len(), loaded.len());
        assert_eq!(update.queued, loaded.len());
        assert!(scheduler.loaded_patches().is_empty());
    }

    #[tokio::test]
    async fn test_dispose_stops_everything() {
        let (scheduler, loader) = scheduler(small_config());
        let bounds = GeoBounds::around(camera(), 500.0, 500.0);
        scheduler.update_patch_visibility(&bounds, &camera());

        scheduler.dispose();
        assert!(scheduler.is_disposed());
        assert_eq!(scheduler.process_queue().await, ProcessReport::default());
        assert_eq!(loader.calls.load(AtomicOrdering::SeqCst), 0);
        assert_eq!(
            scheduler.update_patch_visibility(&bounds, &camera()),
            VisibilityUpdate::default()
        );
        assert_eq!(scheduler.stats().records, 0);
    }

    #[tokio::test]
    async fn test_worker_loads_and_shuts_down() {
        let (scheduler, _) = scheduler(small_config());
        let handle = scheduler.spawn_worker();

        let bounds = GeoBounds::around(camera(), 500.0, 500.0);
        let update = scheduler.update_patch_visibility(&bounds, &camera());

        for _ in 0..100 {
            if scheduler.stats().loaded == update.queued {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(scheduler.stats().loaded, update.queued);

        scheduler.dispose();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop")
            .expect("worker should not panic");
    }
}
