use core::fmt;

use pagewise::PaginateError;

/// Boundary cache failure.
///
/// Sessions never surface these; they log them and treat the lookup as a miss.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum CacheError {
    /// Storage could not be read or written.
    Io(String),
    /// An entry exists but cannot be trusted.
    Corrupt(String),
    /// An entry exceeds the configured size cap.
    TooLarge {
        /// Size in bytes.
        actual: usize,
        /// Cap in bytes.
        limit: usize,
    },
    /// An entry could not be encoded.
    Serialize(String),
    /// The store is not usable (for example a poisoned lock).
    Unavailable(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Io(msg) => write!(f, "Cache I/O error: {}", msg),
            CacheError::Corrupt(msg) => write!(f, "Corrupt cache entry: {}", msg),
            CacheError::TooLarge { actual, limit } => write!(
                f,
                "Cache entry too large: {} bytes (limit: {})",
                actual, limit
            ),
            CacheError::Serialize(msg) => write!(f, "Cache serialize error: {}", msg),
            CacheError::Unavailable(msg) => write!(f, "Cache unavailable: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err.to_string())
    }
}

/// Chapter session failure.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionError {
    /// Pagination itself failed or was cancelled.
    Paginate(PaginateError),
}

impl SessionError {
    /// Check if the run was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SessionError::Paginate(PaginateError::Cancelled))
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Paginate(err) => write!(f, "Session error: {}", err),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Paginate(err) => Some(err),
        }
    }
}

impl From<PaginateError> for SessionError {
    fn from(err: PaginateError) -> Self {
        SessionError::Paginate(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_error_display() {
        let err = CacheError::TooLarge {
            actual: 900,
            limit: 64,
        };
        assert_eq!(
            err.to_string(),
            "Cache entry too large: 900 bytes (limit: 64)"
        );
    }

    #[test]
    fn test_session_error_cancelled() {
        let err = SessionError::from(PaginateError::Cancelled);
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "Session error: Pagination cancelled");
    }
}
