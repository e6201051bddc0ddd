//! Unified error types for pagewise
//!
//! Provides `PaginateError` for driver/finder failures and `OracleError` for
//! measurement probes, plus `From` impls so `?` works across module
//! boundaries.

use core::fmt;

/// Top-level error type for pagination operations
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PaginateError {
    /// Layout parameters cannot be measured (non-finite, non-positive, empty family)
    InvalidLayout(String),
    /// Requested start offset lies past the end of the document
    StartOutOfRange {
        /// Requested start offset (chars).
        start: usize,
        /// Document length (chars).
        len: usize,
    },
    /// Chapter markup could not be scanned
    Markup(String),
    /// Boundary list violates its ordering or range invariants
    InvalidBoundaries(String),
    /// Run was cancelled before it completed
    Cancelled,
}

impl fmt::Display for PaginateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaginateError::InvalidLayout(msg) => write!(f, "Invalid layout: {}", msg),
            PaginateError::StartOutOfRange { start, len } => write!(
                f,
                "Start offset {} out of range (document length: {})",
                start, len
            ),
            PaginateError::Markup(msg) => write!(f, "Markup error: {}", msg),
            PaginateError::InvalidBoundaries(msg) => write!(f, "Invalid boundaries: {}", msg),
            PaginateError::Cancelled => write!(f, "Pagination cancelled"),
        }
    }
}

impl std::error::Error for PaginateError {}

/// Failure reported by a measurement oracle for a single probe.
///
/// The engine never propagates this; a failed probe counts as "does not fit".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleError(pub String);

impl OracleError {
    /// Build an oracle error from any displayable message.
    pub fn new(msg: impl fmt::Display) -> Self {
        Self(msg.to_string())
    }
}

impl fmt::Display for OracleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oracle error: {}", self.0)
    }
}

impl std::error::Error for OracleError {}
