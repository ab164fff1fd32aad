//! Configuration Module - Collector Tuning Parameters
//!
//! Manages the parameters that decide when a collection cycle runs and how
//! much memory the allocators keep around between cycles.

/// Main configuration for the Lisp garbage collector
///
/// # Examples
///
/// ```rust
/// use lgc::GcConfig;
///
/// // Use default configuration
/// let config = GcConfig::default();
///
/// // Precise roots only, small pure region
/// let config = GcConfig {
///     conservative_stack_scan: false,
///     pure_size: 64 * 1024,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Bytes allocated between automatic collections
    ///
    /// The effective threshold is the larger of this value and
    /// `gc_cons_percentage` of the live heap. Runtime updates are clamped to
    /// [`MIN_GC_CONS_THRESHOLD`].
    /// Default: 128K words (1 MiB on 64-bit hosts)
    pub gc_cons_threshold: usize,

    /// Portion of the live heap allocated between automatic collections
    ///
    /// Default: 0.1
    pub gc_cons_percentage: f64,

    /// Size of the pure region in bytes
    ///
    /// Rounded up to the system page size. Zero disables the region:
    /// `purecopy` then falls back to ordinary heap copies.
    /// Default: 2 MiB
    pub pure_size: usize,

    /// Fully free blocks kept per kind across a sweep
    ///
    /// A block whose cells are all free is returned to the system only after
    /// this many blocks' worth of free cells has been kept.
    /// Default: 2
    pub retained_free_blocks: usize,

    /// Scan the native stack and saved registers for heap pointers
    ///
    /// When false, only registered roots and root providers keep objects
    /// alive.
    /// Default: true
    pub conservative_stack_scan: bool,

    /// Size of the emergency memory reserve in bytes
    ///
    /// Released when the system allocator fails so that the out-of-memory
    /// path can still allocate.
    /// Default: 16 KiB
    pub memory_reserve: usize,

    /// Hard cap on bytes obtained from the system allocator
    ///
    /// `None` means no cap beyond what the system allocator grants.
    /// Default: None
    pub heap_limit: Option<usize>,

    /// Initial capacity of the mark stack (entries)
    ///
    /// Default: 8192
    pub mark_stack_initial: usize,

    /// Enable verbose collection output
    ///
    /// Default: false
    pub verbose: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            // Thresholds
            gc_cons_threshold: GC_DEFAULT_THRESHOLD,
            gc_cons_percentage: 0.1,

            // Regions
            pure_size: 2 * MB,
            retained_free_blocks: 2,
            memory_reserve: 16 * KB,
            heap_limit: None,

            // Marking
            conservative_stack_scan: true,
            mark_stack_initial: 8192,

            verbose: false,
        }
    }
}

impl GcConfig {
    /// Validate configuration
    ///
    /// # Returns
    /// `Ok(())` if valid, `Err(ConfigError)` describing the first problem
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.gc_cons_percentage.is_finite() || self.gc_cons_percentage < 0.0 {
            return Err(ConfigError::InvalidPercentage(self.gc_cons_percentage));
        }

        if self.retained_free_blocks == 0 {
            return Err(ConfigError::InvalidRetention);
        }

        if self.mark_stack_initial == 0 {
            return Err(ConfigError::InvalidMarkStack);
        }

        if let Some(limit) = self.heap_limit {
            if limit < self.memory_reserve {
                return Err(ConfigError::HeapLimitTooSmall {
                    limit,
                    reserve: self.memory_reserve,
                });
            }
        }

        Ok(())
    }

    /// Create config from environment variables
    ///
    /// Recognized: `LGC_CONS_THRESHOLD`, `LGC_CONS_PERCENTAGE`,
    /// `LGC_PURE_SIZE`, `LGC_HEAP_LIMIT`, `LGC_CONSERVATIVE`, `LGC_VERBOSE`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("LGC_CONS_THRESHOLD") {
            if let Ok(bytes) = val.parse::<usize>() {
                config.gc_cons_threshold = bytes.max(MIN_GC_CONS_THRESHOLD);
            }
        }

        if let Ok(val) = std::env::var("LGC_CONS_PERCENTAGE") {
            if let Ok(pct) = val.parse::<f64>() {
                config.gc_cons_percentage = pct;
            }
        }

        if let Ok(val) = std::env::var("LGC_PURE_SIZE") {
            if let Ok(size) = val.parse::<usize>() {
                config.pure_size = size;
            }
        }

        if let Ok(val) = std::env::var("LGC_HEAP_LIMIT") {
            if let Ok(limit) = val.parse::<usize>() {
                config.heap_limit = Some(limit);
            }
        }

        if let Ok(val) = std::env::var("LGC_CONSERVATIVE") {
            config.conservative_stack_scan = val == "1" || val.eq_ignore_ascii_case("true");
        }

        if let Ok(val) = std::env::var("LGC_VERBOSE") {
            config.verbose = val == "1" || val.eq_ignore_ascii_case("true");
        }

        config
    }

    /// Builder: set the cons threshold
    pub fn with_cons_threshold(mut self, bytes: usize) -> Self {
        self.gc_cons_threshold = bytes;
        self
    }

    /// Builder: set the cons percentage
    pub fn with_cons_percentage(mut self, pct: f64) -> Self {
        self.gc_cons_percentage = pct;
        self
    }

    /// Builder: enable or disable conservative stack scanning
    pub fn with_conservative_scan(mut self, enabled: bool) -> Self {
        self.conservative_stack_scan = enabled;
        self
    }

    /// Builder: cap bytes obtained from the system allocator
    pub fn with_heap_limit(mut self, limit: usize) -> Self {
        self.heap_limit = Some(limit);
        self
    }

    /// Builder: set pure region size
    pub fn with_pure_size(mut self, bytes: usize) -> Self {
        self.pure_size = bytes;
        self
    }

    /// Builder: set number of fully free blocks retained per kind
    pub fn with_retained_free_blocks(mut self, blocks: usize) -> Self {
        self.retained_free_blocks = blocks;
        self
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("gc_cons_percentage must be a finite non-negative number, got {0}")]
    InvalidPercentage(f64),

    #[error("retained_free_blocks must be at least 1")]
    InvalidRetention,

    #[error("mark_stack_initial must be at least 1")]
    InvalidMarkStack,

    #[error("heap_limit ({limit}) must not be smaller than memory_reserve ({reserve})")]
    HeapLimitTooSmall { limit: usize, reserve: usize },
}

// ============================================================================
// CONSTANTS & HELPERS
// ============================================================================

const KB: usize = 1024;
const MB: usize = 1024 * KB;

/// Machine word size in bytes
pub const WORD_SIZE: usize = std::mem::size_of::<usize>();

/// Default bytes allocated between collections
pub const GC_DEFAULT_THRESHOLD: usize = (1 << 17) * WORD_SIZE;

/// Lowest value the cons threshold may be set to at runtime
pub const MIN_GC_CONS_THRESHOLD: usize = GC_DEFAULT_THRESHOLD >> 3;
