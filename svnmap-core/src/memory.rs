//! In-memory repository history
//!
//! Keeps a replayable change log together with the tree of live paths after
//! every revision, and serves it through [`RepositoryAccess`]. Used to drive the
//! file id engine from a recorded log and in tests.

use crate::access::RepositoryAccess;
use crate::changes::{project_onto_branch, ChangeAction, ChangeRecord};
use crate::fileid::FileId;
use crate::scheme::{join_path, normalize_path, strip_path_prefix};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// One committed revision
#[derive(Debug, Clone, Default)]
struct RevisionEntry {
    /// Changed paths as committed
    changes: Vec<ChangeRecord>,
    /// Live paths after the revision (the root is implicit)
    tree: BTreeSet<String>,
}

/// In-memory repository history
pub struct MemoryRepository {
    /// Revisions indexed by revision number; revision 0 is empty
    revisions: Arc<RwLock<Vec<RevisionEntry>>>,

    /// Recorded file ids per (branch, revision)
    overrides: Arc<RwLock<HashMap<(String, u64), BTreeMap<String, FileId>>>>,

    /// Repository UUID
    uuid: String,
}

impl MemoryRepository {
    /// Create an empty repository with a random UUID
    pub fn new() -> Self {
        Self::with_uuid(uuid::Uuid::new_v4().to_string())
    }

    /// Create an empty repository with a fixed UUID
    pub fn with_uuid(uuid: impl Into<String>) -> Self {
        Self {
            revisions: Arc::new(RwLock::new(vec![RevisionEntry::default()])),
            overrides: Arc::new(RwLock::new(HashMap::new())),
            uuid: uuid.into(),
        }
    }

    /// Get current revision
    pub async fn current_rev(&self) -> u64 {
        (self.revisions.read().await.len() - 1) as u64
    }

    /// Commit a revision, checking every change against the current tree
    pub async fn commit(&self, changes: Vec<ChangeRecord>) -> Result<u64> {
        self.commit_inner(changes, true).await
    }

    /// Commit a revision without consistency checks.
    ///
    /// Used to replay logs with gaps; changes that do not apply to the tree are
    /// recorded but leave the tree untouched.
    pub async fn commit_unchecked(&self, changes: Vec<ChangeRecord>) -> Result<u64> {
        self.commit_inner(changes, false).await
    }

    /// Record explicit file ids for paths added to `branch` in `revnum`
    pub async fn set_file_id_overrides(
        &self,
        branch: &str,
        revnum: u64,
        ids: BTreeMap<String, FileId>,
    ) {
        let mut overrides = self.overrides.write().await;
        overrides.insert((normalize_path(branch), revnum), ids);
    }

    async fn commit_inner(&self, changes: Vec<ChangeRecord>, checked: bool) -> Result<u64> {
        let mut revisions = self.revisions.write().await;
        let new_rev = revisions.len() as u64;
        let mut tree = revisions[revisions.len() - 1].tree.clone();

        for change in &changes {
            let path = normalize_path(&change.path);
            if let Err(e) = apply_change(&revisions, &mut tree, &path, change, new_rev) {
                if checked {
                    return Err(e);
                }
                tracing::warn!("r{}: ignoring {:?} of {}: {}", new_rev, change.action, path, e);
            }
        }

        revisions.push(RevisionEntry { changes, tree });
        Ok(new_rev)
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn revision_entry(revisions: &[RevisionEntry], revnum: u64) -> Result<&RevisionEntry> {
    revisions
        .get(revnum as usize)
        .ok_or_else(|| anyhow!("Revision {} not found", revnum))
}

fn descendants<'a>(tree: &'a BTreeSet<String>, path: &'a str) -> impl Iterator<Item = &'a String> {
    tree.iter()
        .filter(move |p| matches!(strip_path_prefix(p, path), Some(rel) if !rel.is_empty()))
}

fn remove_subtree(tree: &mut BTreeSet<String>, path: &str) {
    tree.retain(|p| strip_path_prefix(p, path).is_none());
}

fn apply_change(
    revisions: &[RevisionEntry],
    tree: &mut BTreeSet<String>,
    path: &str,
    change: &ChangeRecord,
    new_rev: u64,
) -> Result<()> {
    let exists = path.is_empty() || tree.contains(path);

    match change.action {
        ChangeAction::Modify => {
            if !exists {
                bail!("Path not found: {}", path);
            }
            return Ok(());
        }
        ChangeAction::Delete => {
            if path.is_empty() || !exists {
                bail!("Cannot delete {:?}", path);
            }
            remove_subtree(tree, path);
            return Ok(());
        }
        ChangeAction::Replace => {
            if path.is_empty() || !exists {
                bail!("Cannot replace {:?}", path);
            }
            remove_subtree(tree, path);
        }
        ChangeAction::Add => {
            if exists {
                bail!("Path already exists: {}", path);
            }
        }
    }

    let parent = path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("");
    if !parent.is_empty() && !tree.contains(parent) {
        bail!("Parent directory not found: {}", parent);
    }

    let mut added = vec![path.to_string()];
    if let Some(source) = &change.copy_from {
        if source.revnum >= new_rev {
            bail!("Copy source r{} is not older than r{}", source.revnum, new_rev);
        }
        let source_tree = &revision_entry(revisions, source.revnum)?.tree;
        let source_path = normalize_path(&source.path);
        if !source_path.is_empty() && !source_tree.contains(&source_path) {
            bail!("Copy source not found: {}@{}", source_path, source.revnum);
        }
        for child in descendants(source_tree, &source_path) {
            if let Some(rel) = strip_path_prefix(child, &source_path) {
                added.push(join_path(path, rel));
            }
        }
    }
    tree.extend(added);
    Ok(())
}

#[async_trait]
impl RepositoryAccess for MemoryRepository {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    async fn latest_revnum(&self) -> Result<u64> {
        Ok(self.current_rev().await)
    }

    async fn changed_paths(&self, revnum: u64) -> Result<Vec<ChangeRecord>> {
        let revisions = self.revisions.read().await;
        Ok(revision_entry(&revisions, revnum)?.changes.clone())
    }

    async fn branch_history(&self, branch: &str, revnum: u64) -> Result<Vec<u64>> {
        let revisions = self.revisions.read().await;
        revision_entry(&revisions, revnum)?;
        Ok(revisions
            .iter()
            .enumerate()
            .take(revnum as usize + 1)
            .filter(|(_, entry)| !project_onto_branch(&entry.changes, branch).is_empty())
            .map(|(rev, _)| rev as u64)
            .collect())
    }

    async fn exists(&self, path: &str, revnum: u64) -> Result<bool> {
        let revisions = self.revisions.read().await;
        let entry = revision_entry(&revisions, revnum)?;
        let path = normalize_path(path);
        Ok(path.is_empty() || entry.tree.contains(&path))
    }

    async fn find_children(&self, path: &str, revnum: u64) -> Result<Vec<String>> {
        let revisions = self.revisions.read().await;
        let entry = revision_entry(&revisions, revnum)?;
        let path = normalize_path(path);
        if !path.is_empty() && !entry.tree.contains(&path) {
            bail!("Path not found: {}@{}", path, revnum);
        }
        Ok(descendants(&entry.tree, &path).cloned().collect())
    }

    async fn file_id_overrides(&self, branch: &str, revnum: u64) -> Result<BTreeMap<String, FileId>> {
        let overrides = self.overrides.read().await;
        Ok(overrides
            .get(&(normalize_path(branch), revnum))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn trunk_repo() -> MemoryRepository {
        let repo = MemoryRepository::with_uuid("uuid");
        repo.commit(vec![
            ChangeRecord::add("trunk"),
            ChangeRecord::add("trunk/dir"),
            ChangeRecord::add("trunk/dir/file"),
            ChangeRecord::add("branches"),
        ])
        .await
        .unwrap();
        repo
    }

    #[tokio::test]
    async fn test_commit_tracks_tree() {
        let repo = trunk_repo().await;
        assert_eq!(repo.current_rev().await, 1);
        assert!(repo.exists("/trunk/dir/file", 1).await.unwrap());
        assert!(!repo.exists("/trunk/dir/file", 0).await.unwrap());
        assert!(repo.exists("", 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_brings_subtree() {
        let repo = trunk_repo().await;
        let rev = repo
            .commit(vec![ChangeRecord::add("branches/b1").copied_from("trunk", 1)])
            .await
            .unwrap();
        assert_eq!(rev, 2);
        let children = repo.find_children("branches/b1", 2).await.unwrap();
        assert_eq!(children, vec!["branches/b1/dir", "branches/b1/dir/file"]);
        assert!(repo.find_children("branches/b1", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_removes_subtree() {
        let repo = trunk_repo().await;
        repo.commit(vec![ChangeRecord::delete("/trunk/dir")]).await.unwrap();
        assert!(!repo.exists("trunk/dir/file", 2).await.unwrap());
        assert!(repo.exists("trunk", 2).await.unwrap());
    }

    #[tokio::test]
    async fn test_checked_commit_rejects_inconsistent_changes() {
        let repo = trunk_repo().await;
        assert!(repo.commit(vec![ChangeRecord::modify("nope")]).await.is_err());
        assert!(repo.commit(vec![ChangeRecord::add("trunk")]).await.is_err());
        assert!(repo.commit(vec![ChangeRecord::add("x/y")]).await.is_err());
        assert!(repo
            .commit(vec![ChangeRecord::add("copy").copied_from("trunk", 5)])
            .await
            .is_err());
        assert_eq!(repo.current_rev().await, 1);

        let rev = repo
            .commit_unchecked(vec![ChangeRecord::modify("nope")])
            .await
            .unwrap();
        assert_eq!(rev, 2);
        assert_eq!(repo.changed_paths(2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_branch_history() {
        let repo = trunk_repo().await;
        repo.commit(vec![ChangeRecord::add("branches/b1").copied_from("trunk", 1)])
            .await
            .unwrap();
        repo.commit(vec![ChangeRecord::modify("trunk/dir/file")])
            .await
            .unwrap();
        repo.commit(vec![ChangeRecord::delete("branches")]).await.unwrap();

        assert_eq!(repo.branch_history("trunk", 4).await.unwrap(), vec![1, 3]);
        assert_eq!(repo.branch_history("branches/b1", 4).await.unwrap(), vec![2, 4]);
        assert_eq!(repo.branch_history("", 2).await.unwrap(), vec![1, 2]);
        assert_eq!(repo.latest_revision_number("trunk").await.unwrap(), 3);
        assert_eq!(repo.latest_revision_number("tags/none").await.unwrap(), 0);
        assert!(repo.branch_history("trunk", 9).await.is_err());
    }

    #[tokio::test]
    async fn test_file_id_overrides() {
        let repo = trunk_repo().await;
        let mut ids = BTreeMap::new();
        ids.insert("dir".to_string(), FileId::new("myid"));
        repo.set_file_id_overrides("/trunk/", 1, ids.clone()).await;
        assert_eq!(repo.file_id_overrides("trunk", 1).await.unwrap(), ids);
        assert!(repo.file_id_overrides("trunk", 2).await.unwrap().is_empty());
    }
}
