//! Stats Module - Heap and Collector Statistics
//!
//! Module ini mengumpulkan statistik untuk:
//! - `collection_stats()`: per-kind cell size, used and free counts
//! - consing counters (total objects ever allocated per kind)
//! - pause time per cycle
//!
//! Everything here is plain data; the collector fills it in at the end of
//! each sweep.

pub mod histogram;
pub mod timer;

pub use histogram::Histogram;
pub use timer::GcTimer;

use serde::Serialize;
use std::time::Duration;

/// One kind's line in [`CollectionStats`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindStats {
    pub name: &'static str,
    /// Bytes per unit (cell size, 1 for bytes, word size for slots)
    pub cell_size: usize,
    pub used: usize,
    pub free: usize,
}

impl KindStats {
    pub fn new(name: &'static str, cell_size: usize, used: usize, free: usize) -> Self {
        Self {
            name,
            cell_size,
            used,
            free,
        }
    }

    /// Bytes held by live units
    pub fn used_bytes(&self) -> usize {
        self.cell_size * self.used
    }
}

/// Result of `collection_stats()`
///
/// Kinds appear in a fixed order: conses, symbols, strings, string-bytes,
/// vectors, vector-slots, floats, intervals, buffers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionStats {
    pub kinds: Vec<KindStats>,
}

impl CollectionStats {
    /// Look up one kind by name
    pub fn get(&self, name: &str) -> Option<&KindStats> {
        self.kinds.iter().find(|k| k.name == name)
    }

    pub fn used(&self, name: &str) -> usize {
        self.get(name).map_or(0, |k| k.used)
    }

    pub fn free(&self, name: &str) -> usize {
        self.get(name).map_or(0, |k| k.free)
    }

    /// Bytes held by all live objects
    pub fn live_bytes(&self) -> usize {
        self.kinds.iter().map(KindStats::used_bytes).sum()
    }

    /// JSON rendering
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Cumulative allocation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsingCounters {
    pub conses: u64,
    pub floats: u64,
    pub vector_cells: u64,
    pub symbols: u64,
    pub string_chars: u64,
    pub intervals: u64,
    pub strings: u64,
}

/// Pause and cycle bookkeeping
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    cycles: u64,
    total_time: Duration,
    last_pause: Duration,
    pauses: Histogram,
}

impl GcStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed cycle
    pub fn record_cycle(&mut self, pause: Duration) {
        self.cycles += 1;
        self.total_time += pause;
        self.last_pause = pause;
        self.pauses.record(pause.as_nanos() as u64);
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn total_time(&self) -> Duration {
        self.total_time
    }

    pub fn last_pause(&self) -> Duration {
        self.last_pause
    }

    pub fn pause_histogram(&self) -> &Histogram {
        &self.pauses
    }

    pub fn summary(&self) -> GcSummary {
        GcSummary {
            total_cycles: self.cycles,
            total_ms: self.total_time.as_secs_f64() * 1000.0,
            avg_pause_ms: self.pauses.mean() as f64 / 1_000_000.0,
            max_pause_ms: self.pauses.max() as f64 / 1_000_000.0,
            p99_pause_ms: self.pauses.p99() as f64 / 1_000_000.0,
        }
    }
}

/// Summary statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct GcSummary {
    pub total_cycles: u64,
    pub total_ms: f64,
    pub avg_pause_ms: f64,
    pub max_pause_ms: f64,
    pub p99_pause_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CollectionStats {
        CollectionStats {
            kinds: vec![
                KindStats::new("conses", 16, 10, 5),
                KindStats::new("strings", 48, 2, 0),
                KindStats::new("string-bytes", 1, 30, 0),
                KindStats::new("buffers", 0, 1, 0),
            ],
        }
    }

    #[test]
    fn test_lookup_by_name() {
        let stats = sample();
        assert_eq!(stats.used("conses"), 10);
        assert_eq!(stats.free("conses"), 5);
        assert_eq!(stats.used("missing"), 0);
        assert_eq!(stats.live_bytes(), 160 + 96 + 30);
    }

    #[test]
    fn test_json_keeps_kind_order() {
        let json = sample().to_json();
        let conses = json.find("conses").unwrap();
        let strings = json.find("\"strings\"").unwrap();
        assert!(conses < strings);
    }

    #[test]
    fn test_record_cycle() {
        let mut stats = GcStats::new();
        stats.record_cycle(Duration::from_millis(2));
        stats.record_cycle(Duration::from_millis(4));
        assert_eq!(stats.cycles(), 2);
        assert_eq!(stats.total_time(), Duration::from_millis(6));
        assert_eq!(stats.last_pause(), Duration::from_millis(4));
        assert_eq!(stats.summary().total_cycles, 2);
    }
}
