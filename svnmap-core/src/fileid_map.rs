//! File id map
//!
//! Derives, for every branch and revision, the mapping from paths inside the
//! branch to their file id and the revision key that introduced that id. The
//! mapping of a revision is the mapping of the branch's previous revision with
//! the revision's changes applied:
//!
//! - delete and replace drop the path and everything below it
//! - a copy brings the ids of the copied subtree along, together with the
//!   revision keys they were introduced in, even across branches
//! - copying a parent directory that did not contain the branch leaves the
//!   branch absent
//! - an add without history allocates a new id
//! - a modify leaves the id and its revision key alone
//!
//! Computed mappings are cached per `(branch, revision)`. Each entry is computed
//! at most once at a time; concurrent requests for the same entry wait for the
//! first one. A failed computation leaves nothing in the cache.

use crate::access::RepositoryAccess;
use crate::changes::{fuse_replacements, project_onto_branch, ChangeAction, ChangeRecord, CopySource};
use crate::config::MapperConfig;
use crate::error::{MapError, Result};
use crate::fileid::{generate_file_id, FileId};
use crate::revid::{RevisionKey, MAPPING_VERSION};
use crate::scheme::{join_path, normalize_path, strip_path_prefix, BranchingScheme};
use futures::future::{BoxFuture, FutureExt};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

/// File id of a path together with the revision that introduced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIdEntry {
    pub file_id: FileId,
    pub revision: RevisionKey,
}

/// Path to file id mapping of one branch at one revision
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIdMapping {
    entries: BTreeMap<String, FileIdEntry>,
}

impl FileIdMapping {
    /// Create an empty mapping
    pub fn new() -> Self {
        Self::default()
    }

    /// Mapping of the repository root at revision 0
    pub fn origin(uuid: &str, version: u32) -> Self {
        let mut mapping = Self::new();
        mapping.insert(
            "",
            FileIdEntry {
                file_id: FileId::root(),
                revision: RevisionKey::with_version(version, 0, "", uuid),
            },
        );
        mapping
    }

    pub fn get(&self, path: &str) -> Option<&FileIdEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(path, entry)` pairs in path order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileIdEntry)> {
        self.entries.iter().map(|(path, entry)| (path.as_str(), entry))
    }

    /// Iterate over `path` and its descendants as `(path relative to it, entry)`
    pub fn subtree<'a>(&'a self, path: &'a str) -> impl Iterator<Item = (&'a str, &'a FileIdEntry)> {
        self.entries
            .range::<str, _>((Bound::Included(path), Bound::Unbounded))
            .take_while(move |(p, _)| p.starts_with(path))
            .filter_map(move |(p, entry)| strip_path_prefix(p, path).map(|rel| (rel, entry)))
    }

    /// SHA-256 over all entries, hex encoded
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, entry) in &self.entries {
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update(entry.file_id.as_str().as_bytes());
            hasher.update([0u8]);
            hasher.update(entry.revision.encode().as_bytes());
            hasher.update([b'\n']);
        }
        hex::encode(hasher.finalize())
    }

    fn insert(&mut self, path: impl Into<String>, entry: FileIdEntry) {
        self.entries.insert(path.into(), entry);
    }

    /// Remove `path` and everything below it
    fn remove_subtree(&mut self, path: &str) {
        let doomed: Vec<String> = self.subtree(path).map(|(rel, _)| join_path(path, rel)).collect();
        for p in doomed {
            self.entries.remove(&p);
        }
    }
}

type CacheKey = (String, u64);
type MappingCell = Arc<OnceCell<Arc<FileIdMapping>>>;

/// Per-revision file id derivation with a shared cache
pub struct FileIdMap {
    /// History source
    repo: Arc<dyn RepositoryAccess>,

    /// Layout used to resolve copy sources
    scheme: BranchingScheme,

    /// Mapping version embedded in revision keys
    version: u32,

    /// Computed mappings
    cache: Mutex<LruCache<CacheKey, MappingCell>>,
}

impl FileIdMap {
    /// Create a map with an unbounded cache and the current mapping version
    pub fn new(repo: Arc<dyn RepositoryAccess>, scheme: BranchingScheme) -> Self {
        Self {
            repo,
            scheme,
            version: MAPPING_VERSION,
            cache: Mutex::new(LruCache::unbounded()),
        }
    }

    /// Create a map from configuration
    pub fn with_config(repo: Arc<dyn RepositoryAccess>, config: &MapperConfig) -> Result<Self> {
        let scheme = config.branching_scheme()?;
        let cache = match config.cache_capacity.and_then(NonZeroUsize::new) {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };
        Ok(Self {
            repo,
            scheme,
            version: config.mapping_version,
            cache: Mutex::new(cache),
        })
    }

    /// Active branching scheme
    pub fn scheme(&self) -> &BranchingScheme {
        &self.scheme
    }

    /// Revision key of `branch` at `revnum`
    pub fn revision_key(&self, revnum: u64, branch: &str) -> RevisionKey {
        RevisionKey::with_version(self.version, revnum, normalize_path(branch), self.repo.uuid())
    }

    /// Changes of `revnum` relative to `branch`, with delete+add pairs fused into replaces.
    ///
    /// Property-only changes show up here as modifies even though they never
    /// affect the file id mapping.
    pub async fn changes(&self, branch: &str, revnum: u64) -> Result<Vec<ChangeRecord>> {
        let changes = self
            .repo
            .changed_paths(revnum)
            .await
            .map_err(|e| MapError::source_unavailable(format!("changes of r{}", revnum), e))?;
        Ok(fuse_replacements(project_onto_branch(&changes, branch)))
    }

    /// Last revision that changed `branch`
    pub async fn latest_revision_number(&self, branch: &str) -> Result<u64> {
        self.repo
            .latest_revision_number(&normalize_path(branch))
            .await
            .map_err(|e| MapError::source_unavailable(format!("history of {:?}", branch), e))
    }

    /// File id and introducing revision of `path` in `branch` at `revnum`
    pub async fn resolve(&self, branch: &str, revnum: u64, path: &str) -> Result<FileIdEntry> {
        let branch = normalize_path(branch);
        let path = normalize_path(path);
        let mapping = self.full_mapping(&branch, revnum).await?;
        mapping.get(&path).cloned().ok_or(MapError::PathNotLive {
            path,
            container: branch,
            revision: revnum,
        })
    }

    /// File id and introducing revision of a repository path at `revnum`
    pub async fn resolve_path(&self, path: &str, revnum: u64) -> Result<FileIdEntry> {
        let (branch, rel) = self.scheme.unprefix(path)?;
        self.resolve(&branch, revnum, &rel).await
    }

    /// Check whether the mapping of `branch` at exactly `revnum` is cached
    pub async fn is_cached(&self, branch: &str, revnum: u64) -> bool {
        let cache = self.cache.lock().await;
        cache
            .peek(&(normalize_path(branch), revnum))
            .is_some_and(|cell| cell.initialized())
    }

    /// Drop every cached mapping
    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
    }

    /// Complete mapping of `branch` at `revnum`
    pub fn full_mapping<'a>(
        &'a self,
        branch: &'a str,
        revnum: u64,
    ) -> BoxFuture<'a, Result<Arc<FileIdMapping>>> {
        async move {
            let branch = normalize_path(branch);
            if !self.scheme.is_branch(&branch) {
                return Err(MapError::NotAContainer(branch));
            }

            let mut history = self
                .repo
                .branch_history(&branch, revnum)
                .await
                .map_err(|e| MapError::source_unavailable(format!("history of {:?}", branch), e))?;
            history.retain(|rev| *rev > 0 && *rev <= revnum);
            history.sort_unstable();
            history.dedup();

            let (start, mut current) = self.nearest_cached(&branch, &history).await;
            if !history.is_empty() && start == history.len() {
                tracing::debug!("file id map of {:?}@{} served from cache", branch, revnum);
            }

            for &rev in &history[start..] {
                let cell = self.cell(&branch, rev).await;
                let previous = current;
                current = cell
                    .get_or_try_init(|| self.fold_revision(&branch, rev, previous))
                    .await?
                    .clone();
            }

            Ok(current)
        }
        .boxed()
    }

    /// Find the newest cached mapping along `history`.
    ///
    /// Returns the index of the first revision still to fold and the mapping to
    /// fold onto.
    async fn nearest_cached(&self, branch: &str, history: &[u64]) -> (usize, Arc<FileIdMapping>) {
        let mut cache = self.cache.lock().await;
        for (i, rev) in history.iter().enumerate().rev() {
            let cached = cache
                .get(&(branch.to_string(), *rev))
                .and_then(|cell| cell.get().cloned());
            if let Some(mapping) = cached {
                return (i + 1, mapping);
            }
        }
        (0, Arc::new(self.base_mapping(branch)))
    }

    /// Mapping before the first revision of `branch`
    fn base_mapping(&self, branch: &str) -> FileIdMapping {
        if branch.is_empty() {
            FileIdMapping::origin(self.repo.uuid(), self.version)
        } else {
            FileIdMapping::new()
        }
    }

    async fn cell(&self, branch: &str, revnum: u64) -> MappingCell {
        let mut cache = self.cache.lock().await;
        cache
            .get_or_insert((branch.to_string(), revnum), || Arc::new(OnceCell::new()))
            .clone()
    }

    /// Apply the changes of `revnum` to the previous mapping of `branch`
    async fn fold_revision(
        &self,
        branch: &str,
        revnum: u64,
        previous: Arc<FileIdMapping>,
    ) -> Result<Arc<FileIdMapping>> {
        let changes = self.changes(branch, revnum).await?;
        let overrides: BTreeMap<String, FileId> = self
            .repo
            .file_id_overrides(branch, revnum)
            .await
            .map_err(|e| MapError::source_unavailable(format!("file ids of {:?}@{}", branch, revnum), e))?
            .into_iter()
            .map(|(path, id)| (normalize_path(&path), id))
            .collect();

        tracing::debug!(
            "computing file id map of {:?}@{} ({} changes)",
            branch,
            revnum,
            changes.len()
        );

        let allocator = Allocator {
            revision: self.revision_key(revnum, branch),
            overrides,
        };
        let mut mapping = (*previous).clone();

        for change in &changes {
            let path = change.path.as_str();
            if change.action.removes_node() {
                mapping.remove_subtree(path);
            }

            match change.action {
                ChangeAction::Delete => {}
                ChangeAction::Add | ChangeAction::Replace => {
                    if let Some(source) = &change.copy_from {
                        if source.revnum >= revnum {
                            return Err(MapError::InvalidCopySource {
                                path: join_path(branch, path),
                                revision: revnum,
                                source_revision: source.revnum,
                            });
                        }
                        match self.copied_entries(path, source, &allocator).await? {
                            Some(entries) => {
                                mapping.remove_subtree(path);
                                for (dest, entry) in entries {
                                    mapping.insert(dest, entry);
                                }
                            }
                            // Copying a parent that did not contain this branch
                            None if path.is_empty() => {
                                tracing::debug!(
                                    "r{}: {:?} is absent from copy source {:?}@{}",
                                    revnum,
                                    branch,
                                    source.path,
                                    source.revnum
                                );
                            }
                            None => {
                                tracing::warn!(
                                    "r{}: copy source {:?}@{} of {:?} does not exist, assigning a new file id",
                                    revnum,
                                    source.path,
                                    source.revnum,
                                    join_path(branch, path)
                                );
                                mapping.remove_subtree(path);
                                mapping.insert(path, allocator.allocate(path));
                            }
                        }
                    } else if !mapping.contains(path) {
                        mapping.insert(path, allocator.allocate(path));
                    }
                }
                ChangeAction::Modify => {
                    if !mapping.contains(path) {
                        tracing::warn!(
                            "r{}: {:?} modified in {:?} without being added, assigning a new file id",
                            revnum,
                            path,
                            branch
                        );
                        mapping.insert(path, allocator.allocate(path));
                    }
                }
            }
        }

        Ok(Arc::new(mapping))
    }

    /// Entries the copy of `source` to `path` brings along, keyed by their new path.
    ///
    /// Returns `None` when the source does not exist at its revision.
    async fn copied_entries(
        &self,
        path: &str,
        source: &CopySource,
        allocator: &Allocator,
    ) -> Result<Option<Vec<(String, FileIdEntry)>>> {
        let source_path = normalize_path(&source.path);

        match self.scheme.unprefix(&source_path) {
            Ok((source_branch, source_rel)) => {
                let source_map = self.full_mapping(&source_branch, source.revnum).await?;
                if source_map.contains(&source_rel) {
                    let entries = source_map
                        .subtree(&source_rel)
                        .map(|(rel, entry)| {
                            let dest = join_path(path, rel);
                            let entry = if dest.is_empty() {
                                FileIdEntry {
                                    file_id: FileId::root(),
                                    revision: entry.revision.clone(),
                                }
                            } else if entry.file_id.is_root() {
                                allocator.allocate(&dest)
                            } else {
                                entry.clone()
                            };
                            (dest, entry)
                        })
                        .collect();
                    return Ok(Some(entries));
                }
                if !self.source_exists(&source_path, source.revnum).await? {
                    return Ok(None);
                }
                tracing::warn!(
                    "copy source {:?}@{} has no file id in {:?}, assigning new file ids",
                    source_path,
                    source.revnum,
                    source_branch
                );
            }
            Err(MapError::NotAContainer(_)) => {
                if !self.source_exists(&source_path, source.revnum).await? {
                    return Ok(None);
                }
                tracing::debug!(
                    "copy source {:?}@{} is outside any branch, assigning new file ids",
                    source_path,
                    source.revnum
                );
            }
            Err(e) => return Err(e),
        }

        let children = self
            .repo
            .find_children(&source_path, source.revnum)
            .await
            .map_err(|e| {
                MapError::source_unavailable(format!("children of {:?}@{}", source_path, source.revnum), e)
            })?;

        let mut entries = vec![(path.to_string(), allocator.allocate(path))];
        for child in children {
            let child = normalize_path(&child);
            if let Some(rel) = strip_path_prefix(&child, &source_path).filter(|rel| !rel.is_empty()) {
                let dest = join_path(path, rel);
                let entry = allocator.allocate(&dest);
                entries.push((dest, entry));
            }
        }
        Ok(Some(entries))
    }

    async fn source_exists(&self, path: &str, revnum: u64) -> Result<bool> {
        self.repo
            .exists(path, revnum)
            .await
            .map_err(|e| MapError::source_unavailable(format!("{:?}@{}", path, revnum), e))
    }
}

/// Hands out new file ids for one revision of one branch
struct Allocator {
    revision: RevisionKey,
    overrides: BTreeMap<String, FileId>,
}

impl Allocator {
    fn allocate(&self, path: &str) -> FileIdEntry {
        let file_id = match self.overrides.get(path) {
            Some(id) if !path.is_empty() => id.clone(),
            _ => generate_file_id(&self.revision.encode(), path),
        };
        FileIdEntry {
            file_id,
            revision: self.revision.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRepository;

    fn key(revnum: u64, branch: &str) -> RevisionKey {
        RevisionKey::new(revnum, branch, "uuid")
    }

    fn entry(id: &str, revnum: u64, branch: &str) -> FileIdEntry {
        FileIdEntry {
            file_id: FileId::new(id),
            revision: key(revnum, branch),
        }
    }

    #[test]
    fn test_mapping_subtree_and_remove() {
        let mut mapping = FileIdMapping::new();
        for path in ["foo", "foo-bar", "foo/a", "foo/a/b", "foobar"] {
            mapping.insert(path, entry(path, 1, ""));
        }

        let rels: Vec<&str> = mapping.subtree("foo").map(|(rel, _)| rel).collect();
        assert_eq!(rels, vec!["", "a", "a/b"]);
        assert_eq!(mapping.subtree("").count(), 5);

        mapping.remove_subtree("foo");
        let remaining: Vec<&str> = mapping.iter().map(|(p, _)| p).collect();
        assert_eq!(remaining, vec!["foo-bar", "foobar"]);

        mapping.remove_subtree("");
        assert!(mapping.is_empty());
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let mut a = FileIdMapping::origin("uuid", MAPPING_VERSION);
        let b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
        a.insert("foo", entry("x", 1, ""));
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_allocator_overrides() {
        let mut overrides = BTreeMap::new();
        overrides.insert("foo".to_string(), FileId::new("myid"));
        overrides.insert("".to_string(), FileId::new("notroot"));
        let allocator = Allocator {
            revision: key(1, "trunk"),
            overrides,
        };
        assert_eq!(allocator.allocate("foo").file_id.as_str(), "myid");
        assert!(allocator.allocate("").file_id.is_root());
        assert_eq!(
            allocator.allocate("bar").file_id.as_str(),
            "svn-v3:1@uuid-trunk-bar"
        );
        assert_eq!(allocator.allocate("bar").revision, key(1, "trunk"));
    }

    #[tokio::test]
    async fn test_empty_repository() {
        let repo = Arc::new(MemoryRepository::with_uuid("uuid"));
        let map = FileIdMap::new(repo, BranchingScheme::None);
        let mapping = map.full_mapping("", 0).await.unwrap();
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.get(""), Some(&entry("TREE_ROOT", 0, "")));
    }

    #[tokio::test]
    async fn test_simple_add() {
        let repo = Arc::new(MemoryRepository::with_uuid("uuid"));
        repo.commit(vec![ChangeRecord::add("foo")]).await.unwrap();
        let map = FileIdMap::new(repo, BranchingScheme::None);

        assert_eq!(
            map.resolve("", 1, "foo").await.unwrap(),
            entry("svn-v3:1@uuid--foo", 1, "")
        );
        assert_eq!(map.resolve("", 1, "").await.unwrap(), entry("TREE_ROOT", 0, ""));
    }

    #[tokio::test]
    async fn test_touch_parent_keeps_revision() {
        let repo = Arc::new(MemoryRepository::with_uuid("uuid"));
        repo.commit(vec![ChangeRecord::add("foo"), ChangeRecord::add("foo/bla")])
            .await
            .unwrap();
        repo.commit(vec![ChangeRecord::modify("foo/bla")]).await.unwrap();
        let map = FileIdMap::new(repo, BranchingScheme::None);

        let mapping = map.full_mapping("", 2).await.unwrap();
        assert_eq!(mapping.get("foo").unwrap().revision, key(1, ""));
        assert_eq!(mapping.get("foo/bla").unwrap().revision, key(1, ""));
    }

    #[tokio::test]
    async fn test_not_a_branch() {
        let repo = Arc::new(MemoryRepository::with_uuid("uuid"));
        let map = FileIdMap::new(repo, BranchingScheme::trunk(0));
        assert_eq!(
            map.full_mapping("branches", 0).await.unwrap_err(),
            MapError::NotAContainer("branches".to_string())
        );
        assert!(matches!(
            map.resolve_path("foo/bar", 0).await,
            Err(MapError::NotAContainer(_))
        ));
    }
}
