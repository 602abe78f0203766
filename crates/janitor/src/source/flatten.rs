use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::{EntryKind, ProjectId, SourceTree, TreeEntry};
use crate::util::errors::{Error, Result, StdError};

/// Group holding the blobs at the repository root.
pub const ROOT_GROUP: &str = "";

/// File base name to raw content.
pub type FileMap = BTreeMap<String, Vec<u8>>;

/// A repository flattened into one file map per group: the root group plus one
/// group per top-level directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigTree {
    groups: BTreeMap<String, FileMap>,
}

impl Default for ConfigTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigTree {
    /// A tree with an empty root group.
    pub fn new() -> Self {
        Self {
            groups: BTreeMap::from([(ROOT_GROUP.to_string(), FileMap::new())]),
        }
    }

    pub fn group(&self, name: &str) -> Option<&FileMap> {
        self.groups.get(name)
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &FileMap)> {
        self.groups.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.values().all(BTreeMap::is_empty)
    }

    /// Make sure `group` exists, even if no file ends up in it.
    pub fn add_group(&mut self, group: &str) -> &mut FileMap {
        self.groups.entry(group.to_string()).or_default()
    }

    /// Insert a file, returning the content it replaced.
    pub fn insert(&mut self, group: &str, file: &str, content: Vec<u8>) -> Option<Vec<u8>> {
        self.add_group(group).insert(file.to_string(), content)
    }
}

/// Blobs of a listing, in lexicographic path order.
fn sorted_blobs(entries: &[TreeEntry]) -> Vec<&TreeEntry> {
    let mut blobs: Vec<&TreeEntry> = entries.iter().filter(|e| e.kind == EntryKind::Blob).collect();
    blobs.sort_by(|a, b| a.path.cmp(&b.path));
    blobs
}

async fn read_blob(source: &dyn SourceTree, project: ProjectId, entry: &TreeEntry, revision: &str) -> Result<Vec<u8>> {
    debug!("Reading file '{}' at '{}'", entry.path, revision);
    source.read_file(project, &entry.path, revision).await.map_err(|e| {
        Error::StdError(StdError::IoError(format!(
            "failed to read '{}' from project {}: {}",
            entry.path, project, e
        )))
    })
}

/// Read the whole configuration tree of `project` at `revision`.
///
/// Blobs at the root land in [`ROOT_GROUP`]. Every top-level directory becomes
/// one group holding all blobs found beneath it at any depth, keyed by base
/// name. Within a group the lexicographically last path wins when two blobs
/// share a base name. A failed read aborts the whole pass.
pub async fn flatten(source: &dyn SourceTree, project: ProjectId, revision: &str) -> Result<ConfigTree> {
    let mut tree = ConfigTree::new();

    info!("Processing files in root directory of project {}", project);
    let root = source.list_tree(project, None, false, revision).await?;

    for blob in sorted_blobs(&root) {
        let content = read_blob(source, project, blob, revision).await?;
        tree.insert(ROOT_GROUP, &blob.name, content);
    }

    let mut directories: Vec<&TreeEntry> = root.iter().filter(|e| e.kind == EntryKind::Tree).collect();
    directories.sort_by(|a, b| a.path.cmp(&b.path));

    for directory in directories {
        info!("Processing directory '{}' of project {}", directory.path, project);
        let listing = source
            .list_tree(project, Some(&directory.path), true, revision)
            .await?;
        tree.add_group(&directory.name);

        for blob in sorted_blobs(&listing) {
            let content = read_blob(source, project, blob, revision).await?;
            if tree.insert(&directory.name, &blob.name, content).is_some() {
                warn!(
                    "File name '{}' appears more than once under '{}'; keeping '{}'",
                    blob.name, directory.path, blob.path
                );
            }
        }
    }

    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::MemorySource;

    const PROJECT: ProjectId = ProjectId(7);

    #[tokio::test]
    async fn one_group_per_top_level_directory_plus_root() {
        let source = MemorySource::new(PROJECT)
            .with_file("a.yaml", "x")
            .with_file("cfg/b.yaml", "y")
            .with_file("other/c.conf", "z");

        let tree = flatten(&source, PROJECT, "master").await.unwrap();

        assert_eq!(tree.len(), 3);
        assert_eq!(tree.group(ROOT_GROUP).unwrap().get("a.yaml"), Some(&b"x".to_vec()));
        assert_eq!(tree.group("cfg").unwrap().get("b.yaml"), Some(&b"y".to_vec()));
        assert_eq!(tree.group("other").unwrap().get("c.conf"), Some(&b"z".to_vec()));
    }

    #[tokio::test]
    async fn nested_directories_collapse_into_their_top_level_group() {
        let source = MemorySource::new(PROJECT)
            .with_file("cfg/b.yaml", "y")
            .with_file("cfg/deep/er/c.yaml", "w");

        let tree = flatten(&source, PROJECT, "master").await.unwrap();

        assert_eq!(tree.len(), 2);
        assert!(tree.group("deep").is_none());
        let cfg = tree.group("cfg").unwrap();
        assert_eq!(cfg.len(), 2);
        assert_eq!(cfg.get("c.yaml"), Some(&b"w".to_vec()));
    }

    #[tokio::test]
    async fn base_name_collision_keeps_lexicographically_last_path() {
        let source = MemorySource::new(PROJECT)
            .with_file("cfg/z/app.conf", "from z")
            .with_file("cfg/app.conf", "from top")
            .with_file("cfg/a/app.conf", "from a");

        let tree = flatten(&source, PROJECT, "master").await.unwrap();

        assert_eq!(tree.group("cfg").unwrap().get("app.conf"), Some(&b"from z".to_vec()));
    }

    #[tokio::test]
    async fn empty_repository_yields_empty_root_group() {
        let source = MemorySource::new(PROJECT);

        let tree = flatten(&source, PROJECT, "master").await.unwrap();

        assert_eq!(tree, ConfigTree::new());
        assert!(tree.is_empty());
        assert_eq!(tree.group(ROOT_GROUP).map(BTreeMap::len), Some(0));
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let source = MemorySource::new(PROJECT).with_file("a.yaml", "x");

        let err = flatten(&source, ProjectId(99), "master").await.unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn failed_read_aborts_with_io_error() {
        let source = MemorySource::new(PROJECT)
            .with_file("a.yaml", "x")
            .with_file("cfg/b.yaml", "y")
            .with_unreadable("cfg/b.yaml");

        let err = flatten(&source, PROJECT, "master").await.unwrap_err();

        assert!(matches!(err.root(), StdError::IoError(_)));
    }

    #[tokio::test]
    async fn files_are_read_at_the_requested_revision() {
        let source = MemorySource::new(PROJECT).with_file("a.yaml", "x");

        flatten(&source, PROJECT, "release-1").await.unwrap();

        assert_eq!(source.revisions_read(), vec!["release-1".to_string()]);
    }

    #[tokio::test]
    async fn every_listing_is_pinned_to_the_requested_revision() {
        let source = MemorySource::new(PROJECT)
            .with_file("a.yaml", "x")
            .with_file("cfg/b.yaml", "y");

        flatten(&source, PROJECT, "release-1").await.unwrap();

        assert_eq!(source.revisions_listed(), vec!["release-1".to_string(); 2]);
    }

    #[tokio::test]
    async fn missing_revision_is_not_found() {
        let source = MemorySource::new(PROJECT).with_file("a.yaml", "x").with_revision("main");

        let err = flatten(&source, PROJECT, "release-1").await.unwrap_err();

        assert!(err.is_not_found());
        assert!(source.revisions_read().is_empty());
    }
}
