//! Per-tick optimizer.
//!
//! Ties the adaptive components together behind one call the renderer makes
//! every frame or every few frames.
//!
//! ```text
//!                   ┌──────────────────────┐
//!   record_frame ──►│      Optimizer       │◄── optimize(zoom, bounds, camera)
//!                   └──────────┬───────────┘
//!                              │
//!      ┌────────────┬──────────┼───────────┬──────────────┐
//!      ▼            ▼          ▼           ▼              ▼
//! ┌─────────┐ ┌──────────┐ ┌────────┐ ┌──────────┐ ┌────────────┐
//! │ Frame   │ │  Mode    │ │  LOD   │ │  Patch   │ │  Resource  │
//! │ Timer   │ │Controller│ │Selector│ │Scheduler │ │    Pool    │
//! └─────────┘ └──────────┘ └────────┘ └──────────┘ └────────────┘
//! ```
//!
//! # Escape hatch
//!
//! With aggressive optimization enabled, a rolling frame rate below
//! `target * escape_hatch_ratio` forces `Low` mode and the lowest LOD and
//! runs an emergency cleanup in the same tick, ignoring every cooldown. The
//! LOD then climbs back one rung at a time as frame rate recovers.
//!
//! # Background work
//!
//! [`Optimizer::start_maintenance`] spawns the slower timers (mode
//! re-evaluation, memory cleanup) and the patch worker. They hold only a
//! weak reference, so dropping the last `Arc<Optimizer>` stops them too.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::result::{Optimization, OptimizationResult, QualityEvent};
use crate::capability::CapabilityProfile;
use crate::clock::{system_clock, SharedClock};
use crate::config::{OptimizerConfig, OverlaySettings};
use crate::events::{Listeners, Subscription};
use crate::frame::{FrameMetrics, FrameTimer};
use crate::geo::{GeoBounds, GeoPoint, Viewport};
use crate::lod::{LodLevel, LodSelector};
use crate::maintenance::RepeatingTask;
use crate::mode::{ModeChangeReason, ModeController};
use crate::patch::{PatchLoader, PatchScheduler};
use crate::resource::{CleanupReport, ResourceAllocator, ResourcePool};
use crate::tier::PerformanceMode;

struct OptimizerState {
    frames: FrameTimer,
    mode: ModeController,
    lod: LodSelector,
    /// Rungs the applied LOD sits below the zoom selection.
    lod_offset: usize,
    current_lod: Option<Arc<LodLevel>>,
    target_frame_rate: f64,
    aggressive: bool,
}

impl OptimizerState {
    /// Record a mode change made since `previous`, if any.
    fn note_mode_change(
        &self,
        previous: PerformanceMode,
        optimizations: &mut Vec<Optimization>,
        events: &mut Vec<QualityEvent>,
    ) {
        let to = self.mode.mode();
        if to == previous {
            return;
        }
        let reason = self
            .mode
            .last_transition()
            .map(|t| t.reason)
            .unwrap_or(ModeChangeReason::Forced);
        optimizations.push(Optimization::ModeChanged { from: previous, to });
        events.push(QualityEvent::ModeChanged {
            from: previous,
            to,
            reason,
        });
    }
}

#[derive(Default)]
struct Background {
    tasks: Vec<RepeatingTask>,
    worker: Option<JoinHandle<()>>,
}

/// Outcome of one [`Optimizer::run_maintenance`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct MaintenanceReport {
    /// Mode after re-evaluation.
    pub mode: PerformanceMode,
    /// Scheduled cleanup, when one was due.
    pub cleanup: Option<CleanupReport>,
}

/// Adaptive quality and resource manager for the overlay.
pub struct Optimizer {
    config: OptimizerConfig,
    capability: Option<CapabilityProfile>,
    /// Profile used for LOD decisions; the pessimistic fallback when the
    /// device is unknown.
    lod_capability: CapabilityProfile,
    state: Mutex<OptimizerState>,
    resources: Arc<ResourcePool>,
    patches: PatchScheduler,
    listeners: Listeners<QualityEvent>,
    background: Mutex<Background>,
    shutdown: CancellationToken,
    disposed: AtomicBool,
}

impl Optimizer {
    /// Create an optimizer using the system clock.
    ///
    /// `capability` is the probed device profile; `None` runs the device as
    /// unknown (low ceiling, degraded).
    pub fn new(
        config: OptimizerConfig,
        capability: Option<CapabilityProfile>,
        allocator: Arc<dyn ResourceAllocator>,
        loader: Arc<dyn PatchLoader>,
    ) -> Self {
        Self::with_clock(config, capability, allocator, loader, system_clock())
    }

    /// Create an optimizer with an injected clock shared by every component.
    pub fn with_clock(
        config: OptimizerConfig,
        capability: Option<CapabilityProfile>,
        allocator: Arc<dyn ResourceAllocator>,
        loader: Arc<dyn PatchLoader>,
        clock: SharedClock,
    ) -> Self {
        let mut resources_config = config.resources.clone();
        if let Some(cap) = &capability {
            resources_config.memory_budget_bytes = resources_config
                .memory_budget_bytes
                .min(cap.memory_budget_bytes());
        }

        let resources = Arc::new(ResourcePool::with_clock(
            resources_config,
            allocator,
            Arc::clone(&clock),
        ));
        let patches = PatchScheduler::with_clock(config.patches.clone(), loader, Arc::clone(&clock));

        let mut mode_config = config.mode.clone();
        mode_config.target_frame_rate = config.target_frame_rate;

        let state = OptimizerState {
            frames: FrameTimer::with_capacity(config.target_frame_rate, config.frame_window),
            mode: ModeController::with_clock(mode_config, Arc::clone(&clock)),
            lod: LodSelector::with_clock(config.lod.clone(), clock),
            lod_offset: 0,
            current_lod: None,
            target_frame_rate: config.target_frame_rate,
            aggressive: config.aggressive_optimization,
        };

        info!(
            gpu_tier = ?capability.as_ref().map(|c| c.gpu_tier),
            budget_mb = resources.memory_budget() / (1024 * 1024),
            target_fps = config.target_frame_rate,
            aggressive = config.aggressive_optimization,
            "Optimizer created"
        );

        Self {
            lod_capability: capability.clone().unwrap_or_else(CapabilityProfile::fallback),
            capability,
            config,
            state: Mutex::new(state),
            resources,
            patches,
            listeners: Listeners::new(),
            background: Mutex::new(Background::default()),
            shutdown: CancellationToken::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Record a rendered frame at `now`.
    pub fn record_frame(&self, now: Instant) {
        self.state.lock().frames.record_frame(now);
    }

    /// Record a rendered frame by its duration.
    pub fn record_frame_duration(&self, duration: Duration) {
        self.state.lock().frames.record_frame_duration(duration);
    }

    /// Run one optimization tick for the given view.
    pub fn optimize(
        &self,
        zoom: f64,
        viewport_bounds: &GeoBounds,
        camera: &GeoPoint,
    ) -> OptimizationResult {
        if self.is_disposed() {
            return OptimizationResult::default();
        }

        let mut optimizations = Vec::new();
        let mut events = Vec::new();

        let (mode, lod, frame_rate, escape) = {
            let mut state = self.state.lock();
            let metrics = state.frames.metrics();
            let target = state.target_frame_rate;
            let previous_mode = state.mode.mode();
            let previous_lod = state.current_lod.as_ref().map(|l| l.name);

            let escape = state.aggressive
                && metrics.sample_count > 0
                && metrics.average_rate < target * self.config.escape_hatch_ratio;

            let lod = if escape {
                warn!(
                    fps = format!("{:.1}", metrics.average_rate),
                    target_fps = target,
                    "Frame rate collapsed, forcing minimum quality"
                );
                state.mode.force_mode(PerformanceMode::Low);
                state.lod_offset = state.lod.levels().len();
                optimizations.push(Optimization::EscapeHatch {
                    frame_rate: metrics.average_rate,
                });
                state.lod.lowest()
            } else {
                let mode = state.mode.tick(self.capability.as_ref(), &metrics);
                self.adapt_lod(&mut state, zoom, mode, &metrics, &mut optimizations)
            };

            state.note_mode_change(previous_mode, &mut optimizations, &mut events);
            if previous_lod != Some(lod.name) {
                events.push(QualityEvent::LodChanged {
                    from: previous_lod,
                    to: lod.name,
                });
            }
            state.current_lod = Some(Arc::clone(&lod));

            (state.mode.mode(), lod, metrics.average_rate, escape)
        };

        let visibility = self.patches.update_patch_visibility(viewport_bounds, camera);
        if !visibility.unloaded.is_empty() {
            optimizations.push(Optimization::PatchesUnloaded {
                count: visibility.unloaded.len(),
            });
        }
        if visibility.queued > 0 {
            optimizations.push(Optimization::PatchesQueued {
                count: visibility.queued,
            });
        }

        let spatial = self.resources.update_spatial_cache(viewport_bounds, camera);
        if spatial.freed_anything() {
            optimizations.push(Optimization::SpatialEviction {
                entries: spatial.entries_removed,
                bytes_freed: spatial.bytes_freed,
            });
        }

        if escape || self.resources.is_under_pressure() {
            let report = self.resources.perform_emergency_cleanup();
            optimizations.push(Optimization::EmergencyCleanup {
                bytes_freed: report.bytes_freed,
            });
        }

        for event in &events {
            self.listeners.notify(event);
        }

        let result = OptimizationResult {
            mode,
            lod_level: lod.name,
            texture_resolution: lod.texture_resolution,
            max_visible_cells: lod.max_visible_cells.min(mode.tier().max_visible_cells),
            memory_usage_bytes: self.resources.total_allocated(),
            frame_rate,
            optimizations,
        };

        if !result.optimizations.is_empty() {
            debug!(
                mode = %result.mode,
                lod = result.lod_level,
                fps = format!("{:.1}", result.frame_rate),
                memory_bytes = result.memory_usage_bytes,
                adjustments = result.optimizations.len(),
                "Optimization tick"
            );
        }

        result
    }

    /// Pick the zoom's level, then apply frame-rate adaptation without ever
    /// going above the zoom's level.
    fn adapt_lod(
        &self,
        state: &mut OptimizerState,
        zoom: f64,
        mode: PerformanceMode,
        metrics: &FrameMetrics,
        optimizations: &mut Vec<Optimization>,
    ) -> Arc<LodLevel> {
        let selected = state.lod.select(zoom, mode, &self.lod_capability);
        let selected_index = state.lod.index_of(&selected).unwrap_or(0);
        let current_index = selected_index.saturating_sub(state.lod_offset);
        let current = Arc::clone(&state.lod.levels()[current_index]);

        let adapted = if metrics.sample_count > 0 {
            state.lod.adapt(
                &current,
                metrics.average_rate,
                state.target_frame_rate,
                metrics.is_stable,
            )
        } else {
            current
        };

        let applied_index = state
            .lod
            .index_of(&adapted)
            .unwrap_or(current_index)
            .min(selected_index);
        state.lod_offset = selected_index - applied_index;

        let applied = Arc::clone(&state.lod.levels()[applied_index]);
        if applied_index < selected_index {
            optimizations.push(Optimization::LodReduced {
                selected: selected.name,
                applied: applied.name,
            });
        }
        applied
    }

    /// [`optimize`](Self::optimize) for a full viewport description.
    pub fn optimize_viewport(&self, viewport: &Viewport) -> OptimizationResult {
        self.optimize(viewport.zoom, &viewport.bounds(), &viewport.center)
    }

    /// Re-run the mode controller outside the per-frame path. Does not
    /// advance a tick-based cooldown; only frames do.
    pub fn reevaluate_mode(&self) -> PerformanceMode {
        if self.is_disposed() {
            return self.mode();
        }
        let mut events = Vec::new();
        let mode = {
            let mut state = self.state.lock();
            let metrics = state.frames.metrics();
            let previous = state.mode.mode();
            state.mode.reevaluate(self.capability.as_ref(), &metrics);
            state.note_mode_change(previous, &mut Vec::new(), &mut events);
            state.mode.mode()
        };
        for event in &events {
            self.listeners.notify(event);
        }
        mode
    }

    /// Mode re-evaluation plus a scheduled memory cleanup when one is due.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let mode = self.reevaluate_mode();
        let cleanup = if self.is_disposed() {
            None
        } else {
            self.resources.run_cleanup_if_due()
        };
        MaintenanceReport { mode, cleanup }
    }

    /// Spawn the periodic timers and the patch worker on the current tokio
    /// runtime. Does nothing if already started or disposed.
    pub fn start_maintenance(self: &Arc<Self>) {
        if self.is_disposed() {
            return;
        }
        let mut background = self.background.lock();
        if !background.tasks.is_empty() {
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        background.tasks.push(RepeatingTask::spawn_child(
            "mode-reevaluation",
            self.config.mode_reevaluation_interval,
            &self.shutdown,
            move || {
                if let Some(optimizer) = weak.upgrade() {
                    optimizer.reevaluate_mode();
                }
            },
        ));

        let weak: Weak<Self> = Arc::downgrade(self);
        background.tasks.push(RepeatingTask::spawn_child(
            "memory-cleanup",
            self.config.cleanup_interval(),
            &self.shutdown,
            move || {
                if let Some(optimizer) = weak.upgrade() {
                    if !optimizer.is_disposed() {
                        optimizer.resources.perform_cleanup();
                    }
                }
            },
        ));

        background.worker = Some(self.patches.spawn_worker());
        info!("Optimizer maintenance started");
    }

    /// Whether [`start_maintenance`](Self::start_maintenance) is active.
    pub fn is_maintenance_running(&self) -> bool {
        !self.background.lock().tasks.is_empty()
    }

    /// Apply new user settings. Out-of-range values are clamped.
    pub fn apply_settings(&self, settings: &OverlaySettings) {
        let settings = settings.clamped();
        {
            let mut state = self.state.lock();
            state.target_frame_rate = settings.target_frame_rate;
            state.aggressive = settings.aggressive_optimization;
            state.frames.set_target_frame_rate(settings.target_frame_rate);
            state.mode.set_target_frame_rate(settings.target_frame_rate);
        }

        let mut budget = settings.memory_budget_bytes();
        if let Some(cap) = &self.capability {
            budget = budget.min(cap.memory_budget_bytes());
        }
        self.resources.set_memory_budget(budget);
        info!(
            target_fps = settings.target_frame_rate,
            budget_mb = budget / (1024 * 1024),
            aggressive = settings.aggressive_optimization,
            "Overlay settings applied"
        );
    }

    /// Pin the mode and suspend automatic adaptation.
    pub fn set_mode(&self, mode: PerformanceMode) {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            let previous = state.mode.mode();
            state.mode.set_mode(mode);
            state.note_mode_change(previous, &mut Vec::new(), &mut events);
        }
        for event in &events {
            self.listeners.notify(event);
        }
    }

    /// Resume automatic mode adaptation.
    pub fn enable_adaptation(&self) {
        self.state.lock().mode.enable_adaptation();
    }

    /// Register a listener for mode and LOD changes.
    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&QualityEvent) + Send + Sync + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Cancel background work, drop all patches and release all resources.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.cancel();
        {
            let mut background = self.background.lock();
            background.tasks.clear();
            background.worker = None;
        }
        self.patches.dispose();
        self.resources.dispose();
        self.listeners.clear();
        info!("Optimizer disposed");
    }

    /// Whether [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Active performance mode.
    pub fn mode(&self) -> PerformanceMode {
        self.state.lock().mode.mode()
    }

    /// LOD level applied on the last tick.
    pub fn current_lod(&self) -> Option<Arc<LodLevel>> {
        self.state.lock().current_lod.clone()
    }

    /// Frame statistics snapshot.
    pub fn frame_metrics(&self) -> FrameMetrics {
        self.state.lock().frames.metrics()
    }

    /// Whether the controller is running without a usable capability profile.
    pub fn is_degraded(&self) -> bool {
        self.capability.as_ref().map_or(true, |c| c.is_degraded())
    }

    /// Device profile, if one was supplied.
    pub fn capability(&self) -> Option<&CapabilityProfile> {
        self.capability.as_ref()
    }

    /// The shared resource pool.
    pub fn resources(&self) -> &Arc<ResourcePool> {
        &self.resources
    }

    /// The patch scheduler.
    pub fn patches(&self) -> &PatchScheduler {
        &self.patches
    }

    /// Tuning in effect at construction.
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }
}

impl std::fmt::Debug for Optimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Optimizer")
            .field("mode", &self.mode())
            .field("capability", &self.capability)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
