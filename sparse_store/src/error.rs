// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed errors for snapshot persistence.
//!
//! Only save/load surfaces recoverable errors: disk and format problems are
//! environment conditions a caller may retry or alert on. Structural
//! precondition violations (dimension mismatches, double handle assignment,
//! unknown handles) panic instead; see the crate docs.

use thiserror::Error;

/// Errors surfaced by snapshot save/load.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying file I/O failed (missing path, disk full, truncation).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot body could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// The file does not start with the snapshot magic bytes.
    #[error("invalid snapshot magic bytes")]
    InvalidMagic,

    /// The file was written by an unknown format version.
    #[error("unsupported snapshot version: {0}")]
    UnsupportedVersion(u32),

    /// The snapshot was written by a different optimizer family.
    #[error("snapshot optimizer family `{found}` does not match kernel family `{expected}`")]
    FamilyMismatch {
        /// Family of the kernel performing the load.
        expected: String,
        /// Family recorded in the snapshot header.
        found: String,
    },

    /// The snapshot was written for a different table dimension.
    #[error("snapshot dimension {found} does not match kernel dimension {expected}")]
    DimensionMismatch {
        /// Dimension of the kernel performing the load.
        expected: usize,
        /// Dimension recorded in the snapshot header.
        found: usize,
    },
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StoreError::InvalidMagic;
        assert!(err.to_string().contains("magic"));

        let err = StoreError::UnsupportedVersion(9);
        assert!(err.to_string().contains('9'));

        let err = StoreError::FamilyMismatch {
            expected: "adam".to_string(),
            found: "ada_grad".to_string(),
        };
        assert!(err.to_string().contains("adam"));
        assert!(err.to_string().contains("ada_grad"));

        let err = StoreError::DimensionMismatch {
            expected: 8,
            found: 4,
        };
        assert!(err.to_string().contains('8'));
        assert!(err.to_string().contains('4'));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: StoreError = io.into();
        assert!(matches!(err, StoreError::Io(_)));
    }
}
