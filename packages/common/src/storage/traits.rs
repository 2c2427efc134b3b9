use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;

use super::error::StorageError;

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Length and last-modified attributes of a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub length: u64,
    pub modified: DateTime<Utc>,
}

/// Path-addressed binary file storage.
///
/// Writes are published atomically: a reader concurrent with `put_stream`
/// observes either the previous content of the path or the new content in
/// full, never a partially written file.
#[async_trait]
pub trait FileVault: Send + Sync {
    /// Stream data to the given vault path, replacing any previous content.
    /// Returns the number of bytes written.
    async fn put_stream(&self, path: &str, reader: BoxReader) -> Result<u64, StorageError>;

    /// Retrieve a file as a streaming async reader.
    async fn get_stream(&self, path: &str) -> Result<BoxReader, StorageError>;

    /// Retrieve `len` bytes starting at `start` as a streaming async reader.
    async fn get_range(
        &self,
        path: &str,
        start: u64,
        len: u64,
    ) -> Result<BoxReader, StorageError>;

    /// Length and last-modified attributes of a stored file.
    async fn meta(&self, path: &str) -> Result<FileMeta, StorageError>;

    /// Check whether a file exists at the path.
    async fn exists(&self, path: &str) -> Result<bool, StorageError>;
}
