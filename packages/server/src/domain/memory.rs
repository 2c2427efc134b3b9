//! In-process stand-ins for the PLM domain services that own iterations,
//! access rights and share tokens. The real implementations live in the
//! surrounding product; these keep the file subsystem bootable and testable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use common::storage::{IterationKey, resolve};

use super::{
    AccessGate, BinaryRecord, DomainError, IterationRegistry, ShareError, ShareResolver,
    SharedTarget,
};

#[derive(Debug, Default)]
struct IterationState {
    frozen: bool,
    /// Vault path of the iteration's current native CAD file, if any.
    native_cad: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Rights {
    read: bool,
    write: bool,
}

/// DashMap-backed iteration registry and access gate.
#[derive(Default)]
pub struct MemoryRegistry {
    iterations: DashMap<IterationKey, IterationState>,
    resources: DashMap<String, BinaryRecord>,
    /// (workspace, login) → rights.
    rights: DashMap<(String, String), Rights>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an iteration so files can be attached to it.
    pub fn create_iteration(&self, key: IterationKey) {
        self.iterations.entry(key).or_default();
    }

    /// Freeze an iteration; subsequent saves are rejected.
    pub fn freeze_iteration(&self, key: &IterationKey) {
        if let Some(mut state) = self.iterations.get_mut(key) {
            state.frozen = true;
        }
    }

    pub fn grant_read(&self, workspace: &str, login: &str) {
        self.rights
            .entry((workspace.to_string(), login.to_string()))
            .or_default()
            .read = true;
    }

    pub fn grant_write(&self, workspace: &str, login: &str) {
        let mut rights = self
            .rights
            .entry((workspace.to_string(), login.to_string()))
            .or_default();
        rights.read = true;
        rights.write = true;
    }

    fn save(
        &self,
        key: &IterationKey,
        sub_type: Option<&str>,
        file_name: &str,
        length: u64,
        native_cad: bool,
    ) -> Result<BinaryRecord, DomainError> {
        let mut state = self
            .iterations
            .get_mut(key)
            .ok_or_else(|| DomainError::IterationNotFound(key.to_string()))?;
        if state.frozen {
            return Err(DomainError::IterationFrozen(key.to_string()));
        }

        let path = resolve(key, sub_type, file_name)
            .map_err(|e| DomainError::Creation(e.to_string()))?;

        if native_cad {
            // A new native CAD file supersedes the previous one.
            if let Some(prev) = state.native_cad.take()
                && prev != path
            {
                self.resources.remove(&prev);
            }
            state.native_cad = Some(path.clone());
        } else if state.native_cad.as_deref() == Some(path.as_str()) {
            return Err(DomainError::AlreadyExists(format!(
                "{path} is registered as native CAD content"
            )));
        }

        let record = BinaryRecord {
            path: path.clone(),
            length,
            modified: Utc::now(),
        };
        self.resources.insert(path, record.clone());
        Ok(record)
    }
}

#[async_trait]
impl IterationRegistry for MemoryRegistry {
    async fn save_file(
        &self,
        key: &IterationKey,
        sub_type: Option<&str>,
        file_name: &str,
        length: u64,
    ) -> Result<BinaryRecord, DomainError> {
        self.save(key, sub_type, file_name, length, false)
    }

    async fn save_native_cad(
        &self,
        key: &IterationKey,
        sub_type: &str,
        file_name: &str,
        length: u64,
    ) -> Result<BinaryRecord, DomainError> {
        self.save(key, Some(sub_type), file_name, length, true)
    }

    async fn binary_resource(&self, path: &str) -> Result<BinaryRecord, DomainError> {
        self.resources
            .get(path)
            .map(|r| r.clone())
            .ok_or_else(|| DomainError::ResourceNotFound(path.to_string()))
    }
}

#[async_trait]
impl AccessGate for MemoryRegistry {
    async fn can_read(&self, login: &str, key: &IterationKey) -> bool {
        self.rights
            .get(&(key.workspace.clone(), login.to_string()))
            .map(|r| r.read)
            .unwrap_or(false)
    }

    async fn can_write(&self, login: &str, key: &IterationKey) -> bool {
        self.rights
            .get(&(key.workspace.clone(), login.to_string()))
            .map(|r| r.write)
            .unwrap_or(false)
    }
}

/// DashMap-backed share token store.
#[derive(Default)]
pub struct MemoryShareStore {
    shares: DashMap<Uuid, (SharedTarget, Option<DateTime<Utc>>)>,
}

impl MemoryShareStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a token pinned to the given target.
    pub fn create_share(&self, target: SharedTarget, expires_at: Option<DateTime<Utc>>) -> Uuid {
        let token = Uuid::new_v4();
        self.shares.insert(token, (target, expires_at));
        token
    }
}

#[async_trait]
impl ShareResolver for MemoryShareStore {
    async fn resolve(&self, token: Uuid) -> Result<SharedTarget, ShareError> {
        let entry = self.shares.get(&token).ok_or(ShareError::NotFound)?;
        let (target, expires_at) = entry.value();
        if let Some(expiry) = expires_at
            && *expiry <= Utc::now()
        {
            return Err(ShareError::NotFound);
        }
        Ok(target.clone())
    }
}
