//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The storage file is corrupted.
    #[error("storage corrupted at offset {offset}: {message}")]
    Corrupted {
        /// Byte offset of the damaged frame.
        offset: u64,
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected while replaying the log.
    #[error("checksum mismatch at offset {offset}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Byte offset of the frame.
        offset: u64,
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// An append failed and truncating the partial frame failed too, so the
    /// file may end in a torn frame until the next open.
    #[error("write failed ({cause}); truncating the partial frame also failed: {rollback}")]
    WriteRollback {
        /// The error that interrupted the append.
        cause: io::Error,
        /// The error raised while truncating the partial frame.
        rollback: io::Error,
    },

    /// A key or value exceeds the maximum encodable size.
    #[error("entry too large: {len} bytes")]
    EntryTooLarge {
        /// Offending length.
        len: usize,
    },
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(offset: u64, message: impl Into<String>) -> Self {
        Self::Corrupted {
            offset,
            message: message.into(),
        }
    }
}
