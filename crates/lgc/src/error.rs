//! Error Module - LGC Error Types
//!
//! Defines the recoverable error types returned by the allocator and collector.
//!
//! # Error Categories
//!
//! ## Memory Errors
//! - `OutOfMemory` - System allocator refused a block, or the configured heap limit was hit
//! - `StringTooLarge` / `VectorTooLarge` - Requested object exceeds a representable size
//!
//! ## Mutator Errors
//! - `WrongType` - Accessor applied to a value of another kind
//! - `InvalidArgument` - Argument out of range (index, slot count, ...)
//! - `Callback` - Host callback failed in a context that must report it
//!
//! ## Configuration Errors
//! - `Configuration` - Invalid configuration
//!
//! Heap corruption is deliberately absent from this enum. A heap that
//! disagrees with itself cannot be trusted to build an error value, so it is
//! reported through [`heap_corruption!`](crate::heap_corruption), which logs a
//! diagnostic and aborts the process.

use thiserror::Error;

/// Main error type for all LGC operations
///
/// # Examples
///
/// ```rust
/// use lgc::error::GcError;
///
/// fn handle_error(err: GcError) {
///     match err {
///         GcError::OutOfMemory { requested, reserve_released } => {
///             eprintln!("OOM: requested {}, reserve released: {}", requested, reserve_released);
///         }
///         _ => {
///             eprintln!("Other error: {}", err);
///         }
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum GcError {
    /// Out of memory - system allocator failure
    ///
    /// **When returned:** A block, large vector, string slab or large
    /// string payload could not be obtained from the system allocator, or the
    /// configured `heap_limit` would be exceeded.
    ///
    /// **Recovery strategy:** The emergency reserve has already been freed when
    /// `reserve_released` is true, so reporting the error is safe. Drop
    /// references, run a collection and call
    /// [`refill_memory_reserve`](crate::GarbageCollector::refill_memory_reserve).
    ///
    /// **Example scenario:**
    /// ```ignore
    /// let v = gc.make_vector(1 << 20, Value::NIL)?;
    /// // Returns OOM if the system allocator refuses the large vector
    /// ```
    #[error("Memory exhausted: requested {requested} bytes (emergency reserve released: {reserve_released})")]
    OutOfMemory {
        requested: usize,
        reserve_released: bool,
    },

    /// String too large
    ///
    /// **When returned:** Byte length of a string would exceed the maximum
    /// representable string size.
    ///
    /// **Recovery strategy:** Split the data; the heap is unchanged.
    #[error("Maximum string size exceeded: requested {requested} bytes, max {max}")]
    StringTooLarge { requested: usize, max: usize },

    /// Vector or record too large
    ///
    /// **When returned:** Slot count exceeds what a vector header can encode,
    /// or a record has more slots than a pseudo-vector may carry.
    ///
    /// **Recovery strategy:** Use a smaller object; the heap is unchanged.
    #[error("Attempt to allocate a vector of {requested} slots; max is {max}")]
    VectorTooLarge { requested: usize, max: usize },

    /// Value of the wrong kind
    ///
    /// **When returned:** An accessor (car, aref, string_bytes, ...) is given a
    /// value of a different kind.
    ///
    /// **Recovery strategy:** Caller bug; report and continue.
    #[error("Wrong type argument: expected {expected}, got {actual}")]
    WrongType {
        expected: &'static str,
        actual: &'static str,
    },

    /// Invalid function argument
    ///
    /// **When returned:** Index out of range, non-positive factor where one is
    /// required, null finalizer callback, ...
    ///
    /// **Recovery strategy:** Fix argument and retry
    #[error("Invalid argument '{name}': {value} ({reason})")]
    InvalidArgument {
        name: String,
        value: String,
        reason: String,
    },

    /// Configuration error
    ///
    /// **When returned:** `GcConfig::validate` rejects the configuration
    ///
    /// **Recovery strategy:** Fix configuration and restart
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Host callback failure that must be surfaced
    ///
    /// **When returned:** A root provider fails while the collector is not
    /// yet committed to a cycle.
    ///
    /// **Recovery strategy:** Inspect the message; the heap is consistent.
    #[error("Callback failed: {0}")]
    Callback(String),
}

impl GcError {
    /// Check if error is recoverable
    ///
    /// Every variant of this enum leaves the heap consistent. Only
    /// `Configuration` requires a restart with different parameters.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, GcError::Configuration(_))
    }

    /// Check if this error is an out-of-memory condition
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, GcError::OutOfMemory { .. })
    }

    /// Shorthand for `InvalidArgument`
    pub fn invalid_argument(
        name: impl Into<String>,
        value: impl std::fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        GcError::InvalidArgument {
            name: name.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<crate::config::ConfigError> for GcError {
    fn from(err: crate::config::ConfigError) -> Self {
        GcError::Configuration(err.to_string())
    }
}

/// Result type alias for LGC operations
pub type Result<T> = std::result::Result<T, GcError>;

/// Report heap corruption and abort.
///
/// Used when an object's kind disagrees with the heap registry, a free cell
/// is reached as live data, or block bookkeeping is inconsistent.
#[macro_export]
macro_rules! heap_corruption {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        log::error!("heap corruption: {}", message);
        $crate::logging::log_event($crate::logging::GcEvent::HeapCorruption {
            detail: message.clone(),
        });
        eprintln!("lgc: heap corruption: {}", message);
        std::process::abort()
    }};
}

/// Ensure condition is true, otherwise return error
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !$cond {
            return Err($err);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_memory_message() {
        let err = GcError::OutOfMemory {
            requested: 4096,
            reserve_released: true,
        };
        let msg = err.to_string();
        assert!(msg.contains("4096"));
        assert!(msg.contains("true"));
        assert!(err.is_out_of_memory());
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_configuration_not_recoverable() {
        let err = GcError::Configuration("bad".into());
        assert!(!err.is_recoverable());
        assert!(!err.is_out_of_memory());
    }

    #[test]
    fn test_invalid_argument_helper() {
        let err = GcError::invalid_argument("index", 12, "out of range");
        assert_eq!(
            err.to_string(),
            "Invalid argument 'index': 12 (out of range)"
        );
    }

    fn checked(n: usize) -> Result<usize> {
        ensure!(n < 10, GcError::invalid_argument("n", n, "too big"));
        Ok(n)
    }

    #[test]
    fn test_ensure_macro() {
        assert!(checked(3).is_ok());
        assert!(checked(30).is_err());
    }
}
