pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use common::storage::{EntityKind, IterationKey};

/// The persisted record of one stored file (a binary resource).
///
/// Created with length 0 when an upload reserves the path, finalized with the
/// true byte count once the content is fully written. Re-uploading the same
/// path overwrites the record; versioning lives one level up, in the
/// iteration number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryRecord {
    /// Canonical vault path, unique per stored file.
    pub path: String,
    /// Byte length; 0 only while reserved.
    pub length: u64,
    /// Last finalize (or reserve) timestamp.
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("iteration not found: {0}")]
    IterationNotFound(String),
    #[error("binary resource not found: {0}")]
    ResourceNotFound(String),
    #[error("iteration is frozen: {0}")]
    IterationFrozen(String),
    #[error("{0}")]
    AlreadyExists(String),
    #[error("creation failure: {0}")]
    Creation(String),
}

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("unknown or expired share token")]
    NotFound,
}

/// Registers binary resources against iterations owned by the surrounding
/// PLM domain.
///
/// `save_file` / `save_native_cad` implement the two-phase write protocol:
/// a call with length 0 reserves the record, a second call with the counted
/// length finalizes it. Both refresh the record's last-modified stamp.
#[async_trait]
pub trait IterationRegistry: Send + Sync {
    async fn save_file(
        &self,
        key: &IterationKey,
        sub_type: Option<&str>,
        file_name: &str,
        length: u64,
    ) -> Result<BinaryRecord, DomainError>;

    /// Like `save_file`, but registers the file as the iteration's native CAD
    /// content.
    async fn save_native_cad(
        &self,
        key: &IterationKey,
        sub_type: &str,
        file_name: &str,
        length: u64,
    ) -> Result<BinaryRecord, DomainError>;

    /// Look up the record stored at a canonical vault path.
    async fn binary_resource(&self, path: &str) -> Result<BinaryRecord, DomainError>;
}

/// Answers whether a principal may read or write files on an iteration.
#[async_trait]
pub trait AccessGate: Send + Sync {
    async fn can_read(&self, login: &str, key: &IterationKey) -> bool;
    async fn can_write(&self, login: &str, key: &IterationKey) -> bool;
}

/// The entity a share token is pinned to. Resolution never consults the
/// requesting principal; the token itself is the credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedTarget {
    pub kind: EntityKind,
    pub workspace: String,
    pub entity_id: String,
    pub version: String,
}

/// Resolves opaque share tokens minted by the surrounding sharing service.
#[async_trait]
pub trait ShareResolver: Send + Sync {
    async fn resolve(&self, token: Uuid) -> Result<SharedTarget, ShareError>;
}
