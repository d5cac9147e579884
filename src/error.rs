//! Error types for `SpiderDB`.
//!
//! A single, unified error type for every failure surfaced across the
//! engine boundary. Each variant carries a stable `SPDR-XXX` code for
//! easy cross-referencing in logs and host-side error handling.

use thiserror::Error;

/// Result type alias for `SpiderDB` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in `SpiderDB` operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Node id is unknown or has been vacuumed (SPDR-001).
    #[error("[SPDR-001] Node '{0}' not found")]
    NotFound(u64),

    /// Embedding length does not match the dimension fixed at first insert (SPDR-002).
    #[error("[SPDR-002] Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension fixed by the first insert.
        expected: usize,
        /// Dimension of the offending vector.
        actual: usize,
    },

    /// Embedding has zero norm; direction is undefined (SPDR-003).
    #[error("[SPDR-003] Zero-norm vector has no direction")]
    ZeroVector,

    /// A caller-supplied parameter is out of its valid range (SPDR-004).
    #[error("[SPDR-004] Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Search was attempted against an index with no live nodes (SPDR-005).
    #[error("[SPDR-005] Index is empty")]
    EmptyIndex,

    /// Snapshot I/O failed (SPDR-006).
    #[error("[SPDR-006] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot header, lengths, or checksum did not validate (SPDR-007).
    #[error("[SPDR-007] Corrupt snapshot: {0}")]
    Corrupt(String),
}

impl Error {
    /// Returns the stable error code (e.g. `"SPDR-001"`).
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "SPDR-001",
            Self::DimensionMismatch { .. } => "SPDR-002",
            Self::ZeroVector => "SPDR-003",
            Self::InvalidParameter(_) => "SPDR-004",
            Self::EmptyIndex => "SPDR-005",
            Self::Io(_) => "SPDR-006",
            Self::Corrupt(_) => "SPDR-007",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_matches_variant() {
        assert_eq!(Error::NotFound(7).code(), "SPDR-001");
        assert_eq!(
            Error::DimensionMismatch {
                expected: 3,
                actual: 4
            }
            .code(),
            "SPDR-002"
        );
        assert_eq!(Error::ZeroVector.code(), "SPDR-003");
        assert_eq!(Error::EmptyIndex.code(), "SPDR-005");
    }

    #[test]
    fn display_includes_code() {
        let err = Error::NotFound(42);
        assert!(err.to_string().contains("SPDR-001"));
        assert!(err.to_string().contains("42"));
    }
}
