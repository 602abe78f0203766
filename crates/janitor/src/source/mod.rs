//! Source-control access: project resolution, tree listing and raw file reads,
//! plus the flattening of a repository tree into a [`ConfigTree`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::util::errors::Result;

pub mod flatten;
pub mod gitlab;

pub use flatten::{flatten, ConfigTree, FileMap, ROOT_GROUP};
pub use gitlab::GitLabClient;

/// Identifier of a project in the source-control system.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ProjectId(pub u64);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Blob,
    Tree,
    #[serde(other)]
    Other,
}

/// One entry of a repository tree listing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Base name
    pub name: String,
    /// Path from the repository root
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
}

impl TreeEntry {
    pub fn blob(path: &str) -> Self {
        Self::new(path, EntryKind::Blob)
    }

    pub fn tree(path: &str) -> Self {
        Self::new(path, EntryKind::Tree)
    }

    fn new(path: &str, kind: EntryKind) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        Self {
            name,
            path: path.to_string(),
            kind,
        }
    }
}

#[async_trait]
pub trait SourceTree: Send + Sync {
    /// Map a tenant domain and instance uid to the project holding its configuration.
    async fn resolve_project(&self, domain: &str, uid: &str) -> Result<ProjectId>;

    /// List the entries under `path` (the repository root when `None`) as of `revision`.
    async fn list_tree(
        &self,
        project: ProjectId,
        path: Option<&str>,
        recursive: bool,
        revision: &str,
    ) -> Result<Vec<TreeEntry>>;

    async fn read_file(&self, project: ProjectId, path: &str, revision: &str) -> Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_entry_name_is_the_base_name() {
        let entry = TreeEntry::blob("cfg/nested/b.yaml");
        assert_eq!(entry.name, "b.yaml");
        assert_eq!(entry.path, "cfg/nested/b.yaml");
        assert_eq!(TreeEntry::tree("cfg").name, "cfg");
    }

    #[test]
    fn unknown_entry_kinds_deserialize_as_other() {
        let entry: TreeEntry =
            serde_json::from_str(r#"{"id":"1","name":"sub","path":"sub","type":"commit","mode":"160000"}"#).unwrap();
        assert_eq!(entry.kind, EntryKind::Other);
    }
}
