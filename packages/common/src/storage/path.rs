use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of iterated artifact a file is attached to.
///
/// Serialized as the plural URL/path segment (`parts`, `documents`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Parts,
    Documents,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parts => "parts",
            Self::Documents => "documents",
        }
    }

    /// Parse the plural path segment. Returns `None` for unknown kinds.
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "parts" => Some(Self::Parts),
            "documents" => Some(Self::Documents),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one iteration of an artifact within a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IterationKey {
    pub workspace: String,
    pub kind: EntityKind,
    pub entity_id: String,
    pub version: String,
    pub iteration: u32,
}

impl IterationKey {
    pub fn new(
        workspace: impl Into<String>,
        kind: EntityKind,
        entity_id: impl Into<String>,
        version: impl Into<String>,
        iteration: u32,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            kind,
            entity_id: entity_id.into(),
            version: version.into(),
            iteration,
        }
    }

    /// Vault path prefix for every file attached to this iteration,
    /// with a trailing slash.
    pub fn path_prefix(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}/",
            self.workspace, self.kind, self.entity_id, self.version, self.iteration
        )
    }
}

impl fmt::Display for IterationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.workspace, self.kind, self.entity_id, self.version, self.iteration
        )
    }
}

/// Resolve the canonical vault path of one stored file:
/// `{workspace}/{kind}/{entityId}/{version}/{iteration}/[{subType}/]{fileName}`.
///
/// The sub type, when present, opens a distinct namespace of derived files
/// next to the iteration's native ones. Empty workspace, entity id, version or
/// file name is a caller contract violation and yields an error rather than a
/// malformed path.
pub fn resolve(
    key: &IterationKey,
    sub_type: Option<&str>,
    file_name: &str,
) -> Result<String, super::StorageError> {
    for (label, value) in [
        ("workspace", key.workspace.as_str()),
        ("entity id", key.entity_id.as_str()),
        ("version", key.version.as_str()),
        ("file name", file_name),
    ] {
        if value.trim().is_empty() {
            return Err(super::StorageError::InvalidPath(format!(
                "{label} must not be empty"
            )));
        }
    }

    let mut path = key.path_prefix();
    if let Some(sub) = sub_type.filter(|s| !s.is_empty()) {
        path.push_str(sub);
        path.push('/');
    }
    path.push_str(file_name);
    Ok(path)
}
