//! Normalization engine error types

use crate::messages::RequestId;
use std::fmt;
use std::time::Duration;

/// Errors surfaced by the normalization engines.
///
/// Expected misses (unknown correlation id, no gap found, empty queue) are
/// not errors; engines report those as `None` or empty results. An error
/// here means the caller passed an argument the engine cannot accept, a
/// configured capacity was exceeded, or an internal invariant broke.
#[derive(Debug)]
#[non_exhaustive]
pub enum NormalizeError {
    /// A concrete instrument is required but the all-instruments sentinel
    /// was given
    AllInstrumentsSentinel {
        /// The operation that rejected the sentinel
        operation: &'static str,
    },

    /// Requested truncation depth must be at least one level
    InvalidDepth {
        /// The request that carried the zero depth
        request_id: RequestId,
    },

    /// Lookup timeout is zero or too large to track in millisecond ticks
    InvalidTimeout {
        /// The request that carried the timeout
        request_id: RequestId,
        /// The rejected value
        timeout: Duration,
    },

    /// A request id was registered while already tracked
    DuplicateRequest {
        /// The already-tracked id
        request_id: RequestId,
    },

    /// Remaining-time subtraction overflowed; the stored timeout is corrupt
    TimeoutOverflow {
        /// The lookup whose countdown overflowed
        request_id: RequestId,
    },

    /// The by-id and by-key subscription indexes no longer agree
    IndexDesync {
        /// Which lookup exposed the divergence
        detail: String,
    },

    /// The offline buffer reached its configured capacity
    BufferFull {
        /// The configured maximum number of buffered messages
        limit: usize,
    },

    /// An engine lock was poisoned by a panicking thread
    MutexPoisoned {
        /// The engine whose lock is poisoned
        engine: &'static str,
    },
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizeError::AllInstrumentsSentinel { operation } => {
                write!(
                    f,
                    "all-instruments sentinel not allowed: {operation} requires a concrete instrument"
                )
            }
            NormalizeError::InvalidDepth { request_id } => {
                write!(f, "invalid depth: request {request_id} asked for zero levels")
            }
            NormalizeError::InvalidTimeout {
                request_id,
                timeout,
            } => {
                write!(
                    f,
                    "invalid timeout: request {request_id} asked for {timeout:?}"
                )
            }
            NormalizeError::DuplicateRequest { request_id } => {
                write!(f, "duplicate request: id {request_id} is already tracked")
            }
            NormalizeError::TimeoutOverflow { request_id } => {
                write!(
                    f,
                    "timeout arithmetic overflow for request {request_id}: stored value is corrupt"
                )
            }
            NormalizeError::IndexDesync { detail } => {
                write!(f, "subscription index desync: {detail}")
            }
            NormalizeError::BufferFull { limit } => {
                write!(f, "offline buffer full: limit of {limit} messages reached")
            }
            NormalizeError::MutexPoisoned { engine } => {
                write!(f, "{engine} lock poisoned")
            }
        }
    }
}

impl std::error::Error for NormalizeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = NormalizeError::InvalidDepth {
            request_id: RequestId(9),
        };
        assert_eq!(
            err.to_string(),
            "invalid depth: request 9 asked for zero levels"
        );

        let err = NormalizeError::BufferFull { limit: 100 };
        assert_eq!(
            err.to_string(),
            "offline buffer full: limit of 100 messages reached"
        );

        let err = NormalizeError::MutexPoisoned { engine: "lookup scheduler" };
        assert_eq!(err.to_string(), "lookup scheduler lock poisoned");
    }

    #[test]
    fn test_error_trait_object() {
        let err: Box<dyn std::error::Error> = Box::new(NormalizeError::IndexDesync {
            detail: "request 3 points at a freed slot".to_string(),
        });
        assert!(err.to_string().contains("desync"));
    }
}
