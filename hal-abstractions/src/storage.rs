//! Persisted file store capability

use core::future::Future;

/// File store errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// No file at the requested path
    NotFound,
    /// File exists but is larger than the caller's buffer
    TooLarge,
    /// Underlying medium failed
    ReadFailed,
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "file not found"),
            Self::TooLarge => write!(f, "file too large"),
            Self::ReadFailed => write!(f, "read failed"),
        }
    }
}

impl core::error::Error for StorageError {}

/// Read-only access to small persisted files
pub trait FileStore {
    /// Read the whole file at `path` into `buf`, returning its length
    fn read(
        &mut self,
        path: &str,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<usize, StorageError>>;
}
