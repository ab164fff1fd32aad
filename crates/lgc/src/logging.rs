//! GC Logging and Tracing
//!
//! Structured events for collection cycles. Hosts read them back to tune
//! thresholds or to find out why a cycle was slow.
//!
//! Log Levels:
//! - ERROR: Allocation failures, heap corruption
//! - WARN: Pure region overflow, failed finalizers
//! - INFO: GC cycles
//! - DEBUG: Phases, deferred collections
//! - TRACE: Per-kind sweep results, mark counters
//!
//! Fine-grained diagnostics go through the `log` facade; the events here
//! are the stable, machine-readable record of what each cycle did.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Events kept in memory before the oldest are dropped
pub const MAX_RETAINED_EVENTS: usize = 4096;

/// Log level for GC operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

/// GC event types
#[derive(Debug, Clone)]
pub enum GcEvent {
    /// GC cycle started
    CycleStart { reason: String, cycle: u64 },

    /// GC phase started
    PhaseStart { phase: String, cycle: u64 },

    /// GC phase completed
    PhaseEnd {
        phase: String,
        duration_ms: f64,
        cycle: u64,
    },

    /// GC cycle completed
    CycleEnd {
        cycle: u64,
        duration_ms: f64,
        live_bytes: usize,
    },

    /// Sweep result for one object kind
    SweepStats {
        kind: String,
        live: usize,
        free: usize,
    },

    /// Marking statistics
    MarkStats {
        marked_count: u64,
        conservative_hits: u64,
    },

    /// Weak table fixpoint statistics
    WeakStats {
        tables: usize,
        passes: usize,
        entries_removed: usize,
    },

    /// Finalizer statistics
    FinalizerStats { queued: usize, failed: usize },

    /// A finalizer callback returned an error
    FinalizerFailed { message: String },

    /// Allocation failure
    AllocationFailure {
        size: usize,
        reserve_released: bool,
    },

    /// Pure region exhausted, object placed on the ordinary heap
    PureOverflow { requested: usize, pure_size: usize },

    /// Collection request deferred
    CollectionDeferred { reason: String },

    /// Heap corruption detected (process is about to abort)
    HeapCorruption { detail: String },
}

/// GC Logger configuration
#[derive(Debug, Clone)]
pub struct GcLoggerConfig {
    /// Minimum log level
    pub level: LogLevel,

    /// Enable console output
    pub console: bool,

    /// Enable JSON format
    pub json: bool,

    /// Enable timestamps
    pub timestamps: bool,

    /// Keep the most recent events in memory for later inspection
    pub retain: bool,
}

impl Default for GcLoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            console: false,
            json: false,
            timestamps: true,
            retain: true,
        }
    }
}

/// GC Logger - centralized event log for collection cycles
pub struct GcLogger {
    config: GcLoggerConfig,
    events: Mutex<VecDeque<(Instant, GcEvent)>>,
    enabled: AtomicBool,
}

impl GcLogger {
    pub fn new(config: GcLoggerConfig) -> Self {
        Self {
            config,
            events: Mutex::new(VecDeque::new()),
            enabled: AtomicBool::new(true),
        }
    }

    /// Enable logging
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    /// Disable logging
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Log a GC event
    pub fn log(&self, event: GcEvent) {
        if !self.is_enabled() {
            return;
        }

        let event_level = Self::event_level(&event);
        if event_level > self.config.level {
            return;
        }

        if self.config.console {
            self.output_console(&event);
        }

        if self.config.retain {
            let mut events = self.events.lock();
            if events.len() == MAX_RETAINED_EVENTS {
                events.pop_front();
            }
            events.push_back((Instant::now(), event));
        }
    }

    fn event_level(event: &GcEvent) -> LogLevel {
        match event {
            GcEvent::AllocationFailure { .. } | GcEvent::HeapCorruption { .. } => LogLevel::Error,
            GcEvent::PureOverflow { .. } | GcEvent::FinalizerFailed { .. } => LogLevel::Warn,
            GcEvent::CycleStart { .. } | GcEvent::CycleEnd { .. } => LogLevel::Info,
            GcEvent::PhaseStart { .. }
            | GcEvent::PhaseEnd { .. }
            | GcEvent::CollectionDeferred { .. }
            | GcEvent::FinalizerStats { .. }
            | GcEvent::WeakStats { .. } => LogLevel::Debug,
            GcEvent::SweepStats { .. } | GcEvent::MarkStats { .. } => LogLevel::Trace,
        }
    }

    /// Write one line to stderr
    fn output_console(&self, event: &GcEvent) {
        let prefix = if self.config.timestamps {
            format!("[{}] ", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
        } else {
            String::new()
        };

        if self.config.json {
            eprintln!("{}{}", prefix, Self::to_json(event));
        } else {
            eprintln!("{}{}", prefix, Self::to_human(event));
        }
    }

    /// Render in human-readable format
    fn to_human(event: &GcEvent) -> String {
        match event {
            GcEvent::CycleStart { reason, cycle } => {
                format!("[GC] Cycle {} started (reason: {})", cycle, reason)
            },
            GcEvent::PhaseStart { phase, cycle } => {
                format!("[GC] Cycle {}: {} phase started", cycle, phase)
            },
            GcEvent::PhaseEnd {
                phase,
                duration_ms,
                cycle,
            } => format!(
                "[GC] Cycle {}: {} phase completed ({:.2}ms)",
                cycle, phase, duration_ms
            ),
            GcEvent::CycleEnd {
                cycle,
                duration_ms,
                live_bytes,
            } => format!(
                "[GC] Cycle {} completed ({:.2}ms, {} live bytes)",
                cycle, duration_ms, live_bytes
            ),
            GcEvent::SweepStats { kind, live, free } => {
                format!("[GC] Swept {}: {} live, {} free", kind, live, free)
            },
            GcEvent::MarkStats {
                marked_count,
                conservative_hits,
            } => format!(
                "[GC] Marked: {} objects, {} found conservatively",
                marked_count, conservative_hits
            ),
            GcEvent::WeakStats {
                tables,
                passes,
                entries_removed,
            } => format!(
                "[GC] Weak tables: {} tables, {} passes, {} entries removed",
                tables, passes, entries_removed
            ),
            GcEvent::FinalizerStats { queued, failed } => {
                format!("[GC] Finalizers: {} queued, {} failed", queued, failed)
            },
            GcEvent::FinalizerFailed { message } => {
                format!("[GC] finalizer failed: {}", message)
            },
            GcEvent::AllocationFailure {
                size,
                reserve_released,
            } => format!(
                "[GC] Allocation failure: {} bytes (reserve released: {})",
                size, reserve_released
            ),
            GcEvent::PureOverflow {
                requested,
                pure_size,
            } => format!(
                "[GC] Pure region of {} bytes exhausted; {} bytes placed on the heap",
                pure_size, requested
            ),
            GcEvent::CollectionDeferred { reason } => {
                format!("[GC] Collection deferred: {}", reason)
            },
            GcEvent::HeapCorruption { detail } => format!("[GC] Heap corruption: {}", detail),
        }
    }

    /// Render in JSON format
    fn to_json(event: &GcEvent) -> serde_json::Value {
        match event {
            GcEvent::CycleStart { reason, cycle } => serde_json::json!({
                "type": "cycle_start",
                "cycle": cycle,
                "reason": reason
            }),
            GcEvent::PhaseStart { phase, cycle } => serde_json::json!({
                "type": "phase_start",
                "cycle": cycle,
                "phase": phase
            }),
            GcEvent::PhaseEnd {
                phase,
                duration_ms,
                cycle,
            } => serde_json::json!({
                "type": "phase_end",
                "cycle": cycle,
                "phase": phase,
                "duration_ms": duration_ms
            }),
            GcEvent::CycleEnd {
                cycle,
                duration_ms,
                live_bytes,
            } => serde_json::json!({
                "type": "cycle_end",
                "cycle": cycle,
                "duration_ms": duration_ms,
                "live_bytes": live_bytes
            }),
            GcEvent::SweepStats { kind, live, free } => serde_json::json!({
                "type": "sweep",
                "kind": kind,
                "live": live,
                "free": free
            }),
            GcEvent::MarkStats {
                marked_count,
                conservative_hits,
            } => serde_json::json!({
                "type": "mark",
                "marked": marked_count,
                "conservative_hits": conservative_hits
            }),
            GcEvent::WeakStats {
                tables,
                passes,
                entries_removed,
            } => serde_json::json!({
                "type": "weak",
                "tables": tables,
                "passes": passes,
                "entries_removed": entries_removed
            }),
            GcEvent::FinalizerStats { queued, failed } => serde_json::json!({
                "type": "finalizers",
                "queued": queued,
                "failed": failed
            }),
            GcEvent::FinalizerFailed { message } => serde_json::json!({
                "type": "finalizer_failed",
                "message": message
            }),
            GcEvent::AllocationFailure {
                size,
                reserve_released,
            } => serde_json::json!({
                "type": "allocation_failure",
                "size": size,
                "reserve_released": reserve_released
            }),
            GcEvent::PureOverflow {
                requested,
                pure_size,
            } => serde_json::json!({
                "type": "pure_overflow",
                "requested": requested,
                "pure_size": pure_size
            }),
            GcEvent::CollectionDeferred { reason } => serde_json::json!({
                "type": "deferred",
                "reason": reason
            }),
            GcEvent::HeapCorruption { detail } => serde_json::json!({
                "type": "heap_corruption",
                "detail": detail
            }),
        }
    }

    /// Retained events, oldest first
    pub fn get_events(&self) -> Vec<(Instant, GcEvent)> {
        self.events.lock().iter().cloned().collect()
    }

    /// Drop every retained event
    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    /// Number of retained events
    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for GcLogger {
    fn default() -> Self {
        Self::new(GcLoggerConfig::default())
    }
}

lazy_static::lazy_static! {
    /// Global GC logger
    static ref GLOBAL_LOGGER: Mutex<GcLogger> = Mutex::new(GcLogger::default());
}

/// Log a GC event to global logger
pub fn log_event(event: GcEvent) {
    GLOBAL_LOGGER.lock().log(event);
}

/// Configure global logger
pub fn configure_logger(config: GcLoggerConfig) {
    *GLOBAL_LOGGER.lock() = GcLogger::new(config);
}

/// Events retained by the global logger
pub fn get_event_count() -> usize {
    GLOBAL_LOGGER.lock().event_count()
}

/// Snapshot of events retained by the global logger
pub fn get_events() -> Vec<GcEvent> {
    GLOBAL_LOGGER
        .lock()
        .get_events()
        .into_iter()
        .map(|(_, event)| event)
        .collect()
}
