//! GC Core Module - Collection Cycle Management
//!
//! Implements the stop-the-world mark-sweep cycle.
//!
//! One cycle walks `Idle → Marking → WeakFixpoint → Sweeping → Idle`:
//!
//! 1. **Marking**: explicit roots, pinned symbols and (optionally) the
//!    machine stack are marked. Unreached finalizers are then moved to the
//!    doomed ring and marked again so their functions survive.
//! 2. **WeakFixpoint**: weak hash table entries are settled.
//! 3. **Sweeping**: strings (with compaction), conses, floats, intervals,
//!    symbols, then vector-likes with per-kind teardown.
//!
//! Back in `Idle`, doomed finalizers and post-GC hooks run with collection
//! inhibited. A request that arrives while a cycle is active or collection
//! is inhibited is deferred and honored as soon as the blocker ends.
//!
//! Allocation never collects. Hosts call [`GarbageCollector::maybe_gc`] at
//! safe points.

use crate::allocator::Allocator;
use crate::config::{GcConfig, MIN_GC_CONS_THRESHOLD};
use crate::dump::{DumpImage, NoDumpImage};
use crate::error::{GcError, Result};
use crate::logging::{log_event, GcEvent};
use crate::marker::{weak, MarkStack, Marker, RootSet, StackScanner};
use crate::runtime::{FinalizerRings, FinalizerRunner, Teardown, TeardownHook};
use crate::stats::{CollectionStats, ConsingCounters, GcStats, GcTimer};
use crate::object::PvecType;
use crate::value::{Tag, Value};
use indexmap::IndexMap;
use std::fmt;

/// GC cycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcState {
    /// Idle - no cycle in progress
    Idle,
    /// Marking phase - tracing from roots
    Marking,
    /// Settling weak table entries
    WeakFixpoint,
    /// Sweeping phase - reclaiming unmarked objects
    Sweeping,
}

/// Reason for a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcReason {
    /// Explicit request from the host
    Explicit,
    /// Bytes allocated since the last cycle passed the threshold
    Threshold { allocated: usize, threshold: usize },
    /// A request that was deferred earlier
    Deferred,
}

impl fmt::Display for GcReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcReason::Explicit => write!(f, "explicit"),
            GcReason::Threshold {
                allocated,
                threshold,
            } => write!(f, "threshold ({} > {})", allocated, threshold),
            GcReason::Deferred => write!(f, "deferred"),
        }
    }
}

/// What a collection request did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectOutcome {
    /// A cycle ran; heap usage right after its sweep
    Collected(CollectionStats),
    /// A cycle was active or collection inhibited; the request is queued
    Deferred,
}

impl CollectOutcome {
    pub fn stats(&self) -> Option<&CollectionStats> {
        match self {
            CollectOutcome::Collected(stats) => Some(stats),
            CollectOutcome::Deferred => None,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, CollectOutcome::Deferred)
    }
}

/// Callback run after every cycle, with collection inhibited
pub type PostGcHook = Box<dyn FnMut(&mut GarbageCollector) -> anyhow::Result<()>>;

fn phase_start(phase: &str, cycle: u64) {
    log::debug!("gc {}: {} phase", cycle, phase);
    log_event(GcEvent::PhaseStart {
        phase: phase.to_string(),
        cycle,
    });
}

fn phase_end(phase: &str, cycle: u64, timer: &mut GcTimer) {
    log_event(GcEvent::PhaseEnd {
        phase: phase.to_string(),
        duration_ms: timer.lap_ms(),
        cycle,
    });
}

fn sweep_event(kind: &str, live: usize, free: usize) {
    log::trace!("swept {}: {} live, {} free", kind, live, free);
    log_event(GcEvent::SweepStats {
        kind: kind.to_string(),
        live,
        free,
    });
}

/// GarbageCollector - owns the heap and runs collection cycles
///
/// Coordinates all GC components:
/// - [`Allocator`] for every object kind
/// - [`RootSet`] and the conservative [`StackScanner`]
/// - finalizer rings and per-kind teardown
/// - thresholds, inhibition and deferred requests
///
/// ## Thread Safety
///
/// Single-threaded. Hosts with several threads wrap it in
/// [`SharedCollector`](crate::sync::SharedCollector).
pub struct GarbageCollector {
    /// Every allocator the sweep visits
    pub(crate) heap: Allocator,

    /// Explicit roots
    pub(crate) roots: RootSet,

    config: GcConfig,

    /// Reused across cycles
    mark_stack: MarkStack,

    /// Loader of the persisted image, if any
    pub(crate) dump: Box<dyn DumpImage>,

    /// None when conservative scanning is off
    scanner: Option<StackScanner>,

    pub(crate) finalizers: FinalizerRings,
    finalizer_runner: Option<FinalizerRunner>,
    pub(crate) teardown: Teardown,
    post_gc_hooks: Vec<PostGcHook>,

    state: GcState,

    /// Floor of the effective threshold
    gc_cons_threshold: usize,
    gc_cons_percentage: f64,

    /// Effective threshold for the current interval
    bytes_between_gc: usize,

    /// Nesting depth of `inhibit_collection`
    inhibit_depth: usize,

    /// A request arrived while collection was impossible
    pending: bool,

    cycle_count: u64,
    stats: GcStats,
    last_stats: CollectionStats,

    /// Shared empty strings
    pub(crate) empty_unibyte: Value,
    pub(crate) empty_multibyte: Value,
}

impl GarbageCollector {
    /// Create a new GarbageCollector with specified configuration
    ///
    /// # Arguments
    /// * `config` - GC configuration parameters
    ///
    /// # Returns
    /// Result with GC instance or error if initialization fails
    ///
    /// # Examples
    /// ```rust
    /// use lgc::{GarbageCollector, GcConfig};
    ///
    /// let gc = GarbageCollector::new(GcConfig::default()).unwrap();
    /// assert_eq!(gc.cycle_count(), 0);
    /// ```
    pub fn new(config: GcConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| GcError::Configuration(format!("Invalid configuration: {}", e)))?;

        let heap = Allocator::new(&config)?;
        let scanner = config
            .conservative_stack_scan
            .then(StackScanner::for_current_thread);

        let mut gc = Self {
            heap,
            roots: RootSet::new(),
            mark_stack: MarkStack::with_capacity(config.mark_stack_initial),
            dump: Box::new(NoDumpImage),
            scanner,
            finalizers: FinalizerRings::new(),
            finalizer_runner: None,
            teardown: Teardown::new(),
            post_gc_hooks: Vec::new(),
            state: GcState::Idle,
            gc_cons_threshold: config.gc_cons_threshold.max(MIN_GC_CONS_THRESHOLD),
            gc_cons_percentage: config.gc_cons_percentage,
            bytes_between_gc: config.gc_cons_threshold.max(MIN_GC_CONS_THRESHOLD),
            inhibit_depth: 0,
            pending: false,
            cycle_count: 0,
            stats: GcStats::new(),
            last_stats: CollectionStats::default(),
            empty_unibyte: Value::NIL,
            empty_multibyte: Value::NIL,
            config,
        };

        gc.empty_unibyte = gc.pure_string(b"", 0, false)?;
        gc.empty_multibyte = gc.pure_string(b"", 0, true)?;
        gc.last_stats = gc.heap.collection_stats();
        Ok(gc)
    }

    /// Attach the loader of a persisted image
    pub fn with_dump_image(mut self, dump: Box<dyn DumpImage>) -> Self {
        self.dump = dump;
        self
    }

    /// Use `base` as the highest stack address to scan
    ///
    /// Needed on platforms where the base cannot be queried, or when the
    /// collector is driven from a thread other than the one that made it.
    pub fn set_stack_base(&mut self, base: usize) {
        if self.config.conservative_stack_scan {
            self.scanner = Some(StackScanner::with_base(base));
        } else {
            log::debug!("stack base ignored: conservative scanning is off");
        }
    }

    /// Scan the calling thread's stack from now on
    pub fn attach_current_thread(&mut self) {
        if self.config.conservative_stack_scan {
            self.scanner = Some(StackScanner::for_current_thread());
        }
    }

    /// Run a full cycle now, or defer it if that is impossible
    ///
    /// # Errors
    /// `Callback` when a root provider fails; nothing has been marked or
    /// freed in that case.
    pub fn garbage_collect(&mut self) -> Result<CollectOutcome> {
        self.collect(GcReason::Explicit)
    }

    /// Ask for a cycle without caring about its statistics
    pub fn request_collection(&mut self) -> Result<()> {
        self.collect(GcReason::Explicit).map(|_| ())
    }

    /// Threshold check for safe points
    pub fn maybe_gc(&mut self) -> Result<Option<CollectOutcome>> {
        self.maybe_collect(1.0)
    }

    /// Collect if `bytes_since_gc > bytes_between_gc / factor`
    ///
    /// Larger factors collect sooner. A factor below 1 (or NaN) never
    /// collects.
    pub fn maybe_collect(&mut self, factor: f64) -> Result<Option<CollectOutcome>> {
        if !(factor >= 1.0) {
            return Ok(None);
        }
        let threshold = (self.bytes_between_gc as f64 / factor) as usize;
        let allocated = self.heap.bytes_since_gc;
        if allocated <= threshold {
            return Ok(None);
        }
        self.collect(GcReason::Threshold {
            allocated,
            threshold,
        })
        .map(Some)
    }

    fn collect(&mut self, reason: GcReason) -> Result<CollectOutcome> {
        if self.state != GcState::Idle || self.inhibit_depth > 0 {
            let why = if self.state != GcState::Idle {
                "cycle active"
            } else {
                "collection inhibited"
            };
            self.pending = true;
            log::debug!("collection deferred: {}", why);
            log_event(GcEvent::CollectionDeferred {
                reason: why.to_string(),
            });
            return Ok(CollectOutcome::Deferred);
        }

        // Roots are gathered before anything is marked
        let mut roots = Vec::new();
        if let Err(err) = self.roots.collect(&mut roots) {
            log::error!("collection aborted before marking: {:#}", err);
            return Err(GcError::Callback(format!("{:#}", err)));
        }
        self.heap.symbols.for_each_live(|cell, sym| {
            if sym.pinned {
                roots.push(Value::from_ptr(cell.as_ptr(), Tag::Symbol));
            }
        });

        self.cycle_count += 1;
        let cycle = self.cycle_count;
        let timer = GcTimer::new();
        let mut phase_timer = GcTimer::new();

        log::info!("gc {} started ({})", cycle, reason);
        log_event(GcEvent::CycleStart {
            reason: reason.to_string(),
            cycle,
        });
        if self.config.verbose {
            println!("[GC] Cycle {} started, reason: {}", cycle, reason);
        }

        self.state = GcState::Marking;
        phase_start("mark", cycle);
        let (weak_stats, queued) = {
            let mut marker = Marker::new(&self.heap, &mut *self.dump, &mut self.mark_stack);
            for root in &roots {
                marker.mark(*root);
            }
            if let Some(scanner) = &self.scanner {
                scanner.scan(&mut |word| {
                    marker.mark_conservative_word(word);
                });
            }
            let queued = self.finalizers.queue_doomed(&mut marker);
            log_event(GcEvent::MarkStats {
                marked_count: marker.marked_count() as u64,
                conservative_hits: marker.conservative_hits() as u64,
            });
            phase_end("mark", cycle, &mut phase_timer);

            self.state = GcState::WeakFixpoint;
            phase_start("weak", cycle);
            let weak_stats = weak::weak_fixpoint(&mut marker);
            log_event(GcEvent::WeakStats {
                tables: weak_stats.tables,
                passes: weak_stats.passes,
                entries_removed: weak_stats.entries_removed,
            });
            phase_end("weak", cycle, &mut phase_timer);
            (weak_stats, queued)
        };

        self.state = GcState::Sweeping;
        phase_start("sweep", cycle);
        self.sweep();
        self.dump.clear_marks();
        phase_end("sweep", cycle, &mut phase_timer);

        let stats = self.heap.collection_stats();
        self.heap.bytes_since_gc = 0;
        self.bytes_between_gc = self.threshold_for(stats.live_bytes());
        self.state = GcState::Idle;

        if self.heap.sys.memory_full() && self.heap.sys.refill_reserve() {
            log::info!("emergency memory reserve refilled");
        }

        self.inhibit_depth += 1;
        phase_start("finalize", cycle);
        let failed = self.run_finalizers();
        log_event(GcEvent::FinalizerStats { queued, failed });
        self.run_post_gc_hooks();
        phase_end("finalize", cycle, &mut phase_timer);
        self.inhibit_depth -= 1;

        let pause = timer.elapsed();
        self.stats.record_cycle(pause);
        self.last_stats = stats.clone();

        let duration_ms = pause.as_secs_f64() * 1000.0;
        log::info!(
            "gc {} finished in {:.2}ms: {} live bytes, {} weak entries removed",
            cycle,
            duration_ms,
            stats.live_bytes(),
            weak_stats.entries_removed
        );
        log_event(GcEvent::CycleEnd {
            cycle,
            duration_ms,
            live_bytes: stats.live_bytes(),
        });
        if self.config.verbose {
            println!("[GC] Collection complete in {:.2}ms", duration_ms);
        }

        self.run_pending();
        Ok(CollectOutcome::Collected(stats))
    }

    fn sweep(&mut self) {
        let retained = self.config.retained_free_blocks;
        let heap = &mut self.heap;

        let strings = heap
            .strings
            .sweep(retained, &mut heap.sys, &mut heap.registry);
        sweep_event("strings", strings.headers.live, strings.headers.free);

        let conses = heap
            .conses
            .sweep(retained, &mut heap.sys, &mut heap.registry, |_| {});
        sweep_event("conses", conses.live, conses.free);

        let floats = heap
            .floats
            .sweep(retained, &mut heap.sys, &mut heap.registry, |_| {});
        sweep_event("floats", floats.live, floats.free);

        let intervals = heap
            .intervals
            .sweep(retained, &mut heap.sys, &mut heap.registry, |_| {});
        sweep_event("intervals", intervals.live, intervals.free);

        let symbols = heap
            .symbols
            .sweep(retained, &mut heap.sys, &mut heap.registry, |_| {});
        sweep_event("symbols", symbols.live, symbols.free);

        let teardown = &mut self.teardown;
        let vectors = heap
            .vectors
            .sweep(&mut heap.sys, &mut heap.registry, |v| teardown.free_by_pvtype(v));
        sweep_event("vectors", vectors.vectors, vectors.free_slots);
    }

    fn threshold_for(&self, live_bytes: usize) -> usize {
        let by_percentage = (self.gc_cons_percentage * live_bytes as f64) as usize;
        self.gc_cons_threshold.max(by_percentage)
    }

    /// Call every doomed finalizer's function once; returns the failures
    fn run_finalizers(&mut self) -> usize {
        let mut runner = self.finalizer_runner.take();
        let mut failed = 0;
        while let Some(function) = self.finalizers.pop_doomed() {
            match runner.as_mut() {
                Some(run) => {
                    if let Err(err) = run(self, function) {
                        failed += 1;
                        let message = format!("{:#}", err);
                        log::warn!("finalizer failed: {}", message);
                        log_event(GcEvent::FinalizerFailed { message });
                    }
                },
                None => log::warn!("no finalizer runner installed; dropped {:?}", function),
            }
        }
        // A runner installed by a finalizer wins
        if self.finalizer_runner.is_none() {
            self.finalizer_runner = runner;
        }
        failed
    }

    fn run_post_gc_hooks(&mut self) {
        let mut hooks = std::mem::take(&mut self.post_gc_hooks);
        for hook in hooks.iter_mut() {
            if let Err(err) = hook(self) {
                log::warn!("post-gc hook failed: {:#}", err);
            }
        }
        hooks.append(&mut self.post_gc_hooks);
        self.post_gc_hooks = hooks;
    }

    /// Honor a deferred request if nothing blocks it any more
    fn run_pending(&mut self) -> Option<CollectOutcome> {
        if !self.pending || self.inhibit_depth > 0 || self.state != GcState::Idle {
            return None;
        }
        self.pending = false;
        match self.collect(GcReason::Deferred) {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                log::warn!("deferred collection failed: {}", err);
                None
            },
        }
    }

    /// Refuse collection until the matching [`allow_collection`](Self::allow_collection)
    pub fn inhibit_collection(&mut self) {
        self.inhibit_depth += 1;
    }

    /// Undo one [`inhibit_collection`](Self::inhibit_collection)
    ///
    /// Runs a deferred request when the last inhibition ends.
    pub fn allow_collection(&mut self) -> Option<CollectOutcome> {
        if self.inhibit_depth == 0 {
            log::warn!("allow_collection without matching inhibit_collection");
            return None;
        }
        self.inhibit_depth -= 1;
        self.run_pending()
    }

    pub fn is_collection_inhibited(&self) -> bool {
        self.inhibit_depth > 0
    }

    /// Whether a deferred request is waiting
    pub fn collection_pending(&self) -> bool {
        self.pending
    }

    /// Install the host's finalizer runner
    pub fn set_finalizer_runner(&mut self, runner: FinalizerRunner) {
        self.finalizer_runner = Some(runner);
    }

    pub fn add_post_gc_hook(&mut self, hook: PostGcHook) {
        self.post_gc_hooks.push(hook);
    }

    /// Install the teardown hook for one pseudo-vector kind
    pub fn register_teardown(&mut self, kind: PvecType, hook: TeardownHook) {
        self.teardown.register(kind, hook);
    }

    /// Set the threshold floor, clamped to [`MIN_GC_CONS_THRESHOLD`]
    pub fn set_gc_cons_threshold(&mut self, bytes: usize) {
        self.gc_cons_threshold = bytes.max(MIN_GC_CONS_THRESHOLD);
        self.bytes_between_gc = self.threshold_for(self.last_stats.live_bytes());
    }

    pub fn set_gc_cons_percentage(&mut self, pct: f64) -> Result<()> {
        if !pct.is_finite() || pct < 0.0 {
            return Err(GcError::invalid_argument(
                "gc_cons_percentage",
                pct,
                "must be a finite, non-negative fraction",
            ));
        }
        self.gc_cons_percentage = pct;
        self.bytes_between_gc = self.threshold_for(self.last_stats.live_bytes());
        Ok(())
    }

    pub fn gc_cons_threshold(&self) -> usize {
        self.gc_cons_threshold
    }

    pub fn gc_cons_percentage(&self) -> f64 {
        self.gc_cons_percentage
    }

    /// Effective threshold until the next cycle
    pub fn bytes_between_gc(&self) -> usize {
        self.bytes_between_gc
    }

    /// Bytes allocated since the last cycle
    pub fn bytes_since_gc(&self) -> usize {
        self.heap.bytes_since_gc
    }

    /// Try to take the emergency reserve again
    pub fn refill_memory_reserve(&mut self) -> bool {
        self.heap.sys.refill_reserve()
    }

    /// Whether the reserve was spent and has not been refilled
    pub fn memory_full(&self) -> bool {
        self.heap.sys.memory_full()
    }

    /// Current per-kind usage
    pub fn collection_stats(&self) -> CollectionStats {
        self.heap.collection_stats()
    }

    /// Usage right after the last sweep
    pub fn last_collection_stats(&self) -> &CollectionStats {
        &self.last_stats
    }

    /// Blocks held by a fixed-size arena, by statistics name
    ///
    /// `None` for kinds that are not cell arenas.
    pub fn cell_blocks(&self, kind: &str) -> Option<usize> {
        let heap = &self.heap;
        match kind {
            "conses" => Some(heap.conses.block_count()),
            "floats" => Some(heap.floats.block_count()),
            "symbols" => Some(heap.symbols.block_count()),
            "intervals" => Some(heap.intervals.block_count()),
            "strings" => Some(heap.strings.headers.block_count()),
            _ => None,
        }
    }

    /// Cumulative allocation counters
    pub fn memory_use_counts(&self) -> ConsingCounters {
        self.heap.counters
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn state(&self) -> GcState {
        self.state
    }

    pub fn is_collecting(&self) -> bool {
        self.state != GcState::Idle
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Get detailed diagnostic information
    ///
    /// # Returns
    /// A map containing detailed diagnostic information
    pub fn diagnostics(&self) -> IndexMap<String, String> {
        let mut diagnostics = IndexMap::new();

        diagnostics.insert("state".to_string(), format!("{:?}", self.state));
        diagnostics.insert("cycle_count".to_string(), self.cycle_count.to_string());

        // Thresholds
        diagnostics.insert(
            "bytes_since_gc".to_string(),
            self.heap.bytes_since_gc.to_string(),
        );
        diagnostics.insert(
            "bytes_between_gc".to_string(),
            self.bytes_between_gc.to_string(),
        );
        diagnostics.insert(
            "gc_cons_percentage".to_string(),
            format!("{:.2}", self.gc_cons_percentage),
        );
        diagnostics.insert("inhibit_depth".to_string(), self.inhibit_depth.to_string());
        diagnostics.insert("collection_pending".to_string(), self.pending.to_string());

        // System memory
        diagnostics.insert("heap_in_use".to_string(), self.heap.sys.in_use().to_string());
        diagnostics.insert("heap_peak".to_string(), self.heap.sys.peak().to_string());
        diagnostics.insert(
            "heap_blocks".to_string(),
            self.heap.registry.len().to_string(),
        );
        diagnostics.insert("memory_full".to_string(), self.memory_full().to_string());

        // Pure space
        diagnostics.insert(
            "pure_bytes_used".to_string(),
            self.heap.pure.bytes_used().to_string(),
        );
        diagnostics.insert(
            "pure_overflow_bytes".to_string(),
            self.heap.pure.overflow_bytes().to_string(),
        );

        // Roots and finalizers
        let roots = self.roots.stats();
        diagnostics.insert(
            "roots".to_string(),
            format!(
                "{} static, {} owned, {} pinned, {} providers",
                roots.statics, roots.owned, roots.pinned, roots.providers
            ),
        );
        diagnostics.insert(
            "finalizers".to_string(),
            self.finalizers.live_count().to_string(),
        );
        diagnostics.insert(
            "conservative_scan".to_string(),
            self.scanner.is_some().to_string(),
        );

        let summary = self.stats.summary();
        diagnostics.insert(
            "avg_pause_ms".to_string(),
            format!("{:.3}", summary.avg_pause_ms),
        );
        diagnostics.insert(
            "max_pause_ms".to_string(),
            format!("{:.3}", summary.max_pause_ms),
        );

        diagnostics
    }
}

impl Drop for GarbageCollector {
    fn drop(&mut self) {
        let heap = &mut self.heap;
        heap.strings.release_all(&mut heap.sys, &mut heap.registry);
        heap.conses.release_all(&mut heap.sys, &mut heap.registry);
        heap.floats.release_all(&mut heap.sys, &mut heap.registry);
        heap.intervals.release_all(&mut heap.sys, &mut heap.registry);
        heap.symbols.release_all(&mut heap.sys, &mut heap.registry);

        let teardown = &mut self.teardown;
        heap.vectors
            .release_all(&mut heap.sys, &mut heap.registry, |v| teardown.free_by_pvtype(v));

        if self.config.verbose {
            println!("[GC] Shutdown after {} cycles", self.cycle_count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn collector() -> GarbageCollector {
        GarbageCollector::new(GcConfig::default().with_conservative_scan(false)).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = GcConfig {
            gc_cons_percentage: -1.0,
            ..Default::default()
        };
        let err = GarbageCollector::new(config).err().unwrap();
        assert!(matches!(err, GcError::Configuration(_)));
    }

    #[test]
    fn test_cycle_returns_to_idle() {
        let mut gc = collector();
        let outcome = gc.garbage_collect().unwrap();
        assert!(!outcome.is_deferred());
        assert_eq!(gc.state(), GcState::Idle);
        assert_eq!(gc.cycle_count(), 1);
        assert_eq!(gc.bytes_since_gc(), 0);
        assert_eq!(gc.stats().cycles(), 1);
    }

    #[test]
    fn test_threshold_floor() {
        let mut gc = collector();
        gc.set_gc_cons_threshold(1);
        assert_eq!(gc.gc_cons_threshold(), MIN_GC_CONS_THRESHOLD);
        assert!(gc.bytes_between_gc() >= MIN_GC_CONS_THRESHOLD);
        assert!(gc.set_gc_cons_percentage(f64::NAN).is_err());
    }

    #[test]
    fn test_maybe_collect_factor_below_one_never_collects() {
        let mut gc = collector();
        gc.set_gc_cons_threshold(0);
        for _ in 0..20_000 {
            gc.cons(Value::NIL, Value::NIL).unwrap();
        }
        assert!(gc.maybe_collect(0.5).unwrap().is_none());
        assert!(gc.maybe_collect(f64::NAN).unwrap().is_none());
        assert_eq!(gc.cycle_count(), 0);

        assert!(gc.maybe_gc().unwrap().is_some());
        assert_eq!(gc.cycle_count(), 1);
    }

    #[test]
    fn test_inhibited_request_runs_on_allow() {
        let mut gc = collector();
        gc.inhibit_collection();
        assert!(gc.garbage_collect().unwrap().is_deferred());
        assert!(gc.collection_pending());
        assert_eq!(gc.cycle_count(), 0);

        let outcome = gc.allow_collection();
        assert!(matches!(outcome, Some(CollectOutcome::Collected(_))));
        assert_eq!(gc.cycle_count(), 1);
        assert!(!gc.collection_pending());
        assert!(gc.allow_collection().is_none());
    }

    #[test]
    fn test_post_gc_hook_sees_inhibited_collector() {
        let mut gc = collector();
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        gc.add_post_gc_hook(Box::new(move |gc: &mut GarbageCollector| -> anyhow::Result<()> {
            seen.set(seen.get() + 1);
            assert!(gc.is_collection_inhibited());
            anyhow::bail!("hook failure is logged only")
        }));

        gc.garbage_collect().unwrap();
        gc.garbage_collect().unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_diagnostics_keys_in_order() {
        let gc = collector();
        let diag = gc.diagnostics();
        let keys: Vec<_> = diag.keys().take(2).cloned().collect();
        assert_eq!(keys, ["state", "cycle_count"]);
        assert_eq!(diag["conservative_scan"], "false");
    }

    #[test]
    fn test_cell_blocks_by_kind() {
        let mut gc = collector();
        assert_eq!(gc.cell_blocks("conses"), Some(0));
        gc.cons(Value::NIL, Value::NIL).unwrap();
        assert_eq!(gc.cell_blocks("conses"), Some(1));
        assert_eq!(gc.cell_blocks("vectors"), None);
    }
}
