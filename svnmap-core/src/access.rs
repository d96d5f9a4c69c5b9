//! Repository access interface
//!
//! The file id engine never talks to a Subversion repository directly. Everything
//! it needs about the history is fetched through [`RepositoryAccess`].

use crate::changes::ChangeRecord;
use crate::fileid::FileId;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Read access to a Subversion history
///
/// Results must be stable: asking twice for the same revision returns the same
/// data. Implementations may retry or block internally.
#[async_trait]
pub trait RepositoryAccess: Send + Sync {
    /// Repository UUID
    fn uuid(&self) -> &str;

    /// Youngest revision in the repository
    async fn latest_revnum(&self) -> Result<u64>;

    /// Changed paths of a revision, repository-wide, in reporting order
    async fn changed_paths(&self, revnum: u64) -> Result<Vec<ChangeRecord>>;

    /// Revisions up to and including `revnum` that changed `branch`, one of its
    /// parent directories, or anything below it
    async fn branch_history(&self, branch: &str, revnum: u64) -> Result<Vec<u64>>;

    /// Whether `path` exists as of `revnum`
    async fn exists(&self, path: &str, revnum: u64) -> Result<bool>;

    /// Repository paths of all descendants of `path` as of `revnum`
    async fn find_children(&self, path: &str, revnum: u64) -> Result<Vec<String>>;

    /// File ids explicitly recorded for paths added to `branch` in `revnum`
    async fn file_id_overrides(
        &self,
        _branch: &str,
        _revnum: u64,
    ) -> Result<BTreeMap<String, FileId>> {
        Ok(BTreeMap::new())
    }

    /// Last revision that changed `branch`, or 0 if it was never changed
    async fn latest_revision_number(&self, branch: &str) -> Result<u64> {
        let head = self.latest_revnum().await?;
        let history = self.branch_history(branch, head).await?;
        Ok(history.into_iter().max().unwrap_or(0))
    }
}
