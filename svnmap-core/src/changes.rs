//! Changed-path records
//!
//! The repository access layer reports, per revision, the ordered list of changed
//! paths. Before a branch's file ids are derived from them, the records are
//! projected onto the branch (paths made relative, changes to parent directories
//! translated) and a delete followed by an add of the same path is fused into a
//! single replace.

use crate::scheme::{join_path, normalize_path, strip_path_prefix};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What happened to a path in a revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeAction {
    Add,
    Modify,
    Delete,
    Replace,
}

impl ChangeAction {
    /// Whether the previous node at the path goes away
    pub fn removes_node(&self) -> bool {
        matches!(self, ChangeAction::Delete | ChangeAction::Replace)
    }
}

/// Node kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    File,
    Dir,
}

/// Origin of a copied path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CopySource {
    /// Repository path of the copy source
    pub path: String,
    /// Revision the copy was made from
    pub revnum: u64,
}

/// A single changed path in a revision
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Changed path
    pub path: String,
    /// Change action
    pub action: ChangeAction,
    /// Node kind, if known
    pub kind: Option<NodeKind>,
    /// Copy source for copied adds and replaces
    pub copy_from: Option<CopySource>,
}

impl ChangeRecord {
    /// Create a record without copy information
    pub fn new(path: impl Into<String>, action: ChangeAction) -> Self {
        Self {
            path: path.into(),
            action,
            kind: None,
            copy_from: None,
        }
    }

    pub fn add(path: impl Into<String>) -> Self {
        Self::new(path, ChangeAction::Add)
    }

    pub fn modify(path: impl Into<String>) -> Self {
        Self::new(path, ChangeAction::Modify)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(path, ChangeAction::Delete)
    }

    pub fn replace(path: impl Into<String>) -> Self {
        Self::new(path, ChangeAction::Replace)
    }

    /// Set the copy source
    pub fn copied_from(mut self, path: impl Into<String>, revnum: u64) -> Self {
        self.copy_from = Some(CopySource {
            path: path.into(),
            revnum,
        });
        self
    }

    /// Set the node kind
    pub fn with_kind(mut self, kind: NodeKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// Project repository-wide changes onto `branch`.
///
/// Returned records carry paths relative to the branch root. Changes outside the
/// branch are dropped. A change to a parent directory of the branch becomes a
/// change to the branch root:
/// - deleting the parent (or replacing it without history) deletes the root
/// - copying the parent re-creates the root as a copy of the matching source path
pub fn project_onto_branch(changes: &[ChangeRecord], branch: &str) -> Vec<ChangeRecord> {
    let branch = normalize_path(branch);
    let mut projected = Vec::new();

    for change in changes {
        let path = normalize_path(&change.path);

        if let Some(rel) = strip_path_prefix(&path, &branch) {
            projected.push(ChangeRecord {
                path: rel.to_string(),
                ..change.clone()
            });
            continue;
        }

        let Some(suffix) = strip_path_prefix(&branch, &path) else {
            continue;
        };

        let root_change = match (change.action, &change.copy_from) {
            (ChangeAction::Delete, _) | (ChangeAction::Replace, None) => {
                Some(ChangeRecord::delete(""))
            }
            (ChangeAction::Add | ChangeAction::Replace, Some(source)) => Some(
                ChangeRecord::new("", change.action)
                    .copied_from(join_path(&normalize_path(&source.path), suffix), source.revnum),
            ),
            _ => None,
        };
        if let Some(root_change) = root_change {
            projected.push(root_change.with_kind(NodeKind::Dir));
        }
    }

    projected
}

/// Fuse a delete followed by an add of the same path into one replace.
///
/// The replace takes the position and copy source of the add.
pub fn fuse_replacements(changes: Vec<ChangeRecord>) -> Vec<ChangeRecord> {
    let mut fused: Vec<Option<ChangeRecord>> = Vec::with_capacity(changes.len());
    let mut pending_deletes: HashMap<String, usize> = HashMap::new();

    for mut change in changes {
        match change.action {
            ChangeAction::Delete => {
                pending_deletes.insert(change.path.clone(), fused.len());
            }
            ChangeAction::Add | ChangeAction::Replace => {
                if let Some(index) = pending_deletes.remove(&change.path) {
                    fused[index] = None;
                    change.action = ChangeAction::Replace;
                }
            }
            ChangeAction::Modify => {}
        }
        fused.push(Some(change));
    }

    fused.into_iter().flatten().collect()
}
