//! Error types for KiteDB.

use thiserror::Error;

/// Result type alias using KiteError.
pub type Result<T> = std::result::Result<T, KiteError>;

/// Errors that can occur in KiteDB operations.
#[derive(Debug, Error)]
pub enum KiteError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Record array errors
    #[error("record index {index} out of range, array contains {size} elements")]
    IndexOutOfBounds { index: usize, size: usize },

    #[error("null record pointers cannot be inserted")]
    NullRecordPointer,

    // Allocator errors
    #[error("allocation of {requested} bytes exceeds the maximum of {max}")]
    AllocationTooLarge { requested: usize, max: usize },

    #[error("database full: chunk limit {max_chunks} reached")]
    DatabaseFull { max_chunks: usize },

    // Storage errors
    #[error("address {address:#x} out of bounds")]
    AddressOutOfBounds { address: u64 },

    #[error("database corrupted: {reason}")]
    Corrupted { reason: String },

    #[error("format version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },
}
