//! Branching schemes
//!
//! A branching scheme decides which directories of a Subversion repository are
//! independent lines of history (branches and tags) and splits a repository path
//! into the branch path and the path inside that branch.
//!
//! Supported layouts:
//! - `none`: the whole repository is a single branch rooted at `""`
//! - `trunk-N`: `N` arbitrary leading segments followed by `trunk`,
//!   `branches/<name>` or `tags/<name>`
//! - `list`: an explicit set of branch paths

use crate::error::{MapError, Result};
use std::fmt;
use std::str::FromStr;

/// Strip leading, trailing and repeated slashes from a path
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Join a branch-relative path onto a base path
pub fn join_path(base: &str, rel: &str) -> String {
    match (base.is_empty(), rel.is_empty()) {
        (true, _) => rel.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{}/{}", base, rel),
    }
}

/// Return the part of `path` below `prefix`, if `path` is `prefix` or lies inside it.
///
/// Both arguments must already be normalized.
pub fn strip_path_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(path);
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('/')
    }
}

/// Repository layout used to find branches
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BranchingScheme {
    /// The repository root is the only branch
    #[default]
    None,
    /// `trunk`, `branches/*` and `tags/*` below `level` leading directories
    Trunk { level: usize },
    /// Explicitly listed branch paths
    List { branches: Vec<String> },
}

impl BranchingScheme {
    /// Create a trunk scheme
    pub fn trunk(level: usize) -> Self {
        BranchingScheme::Trunk { level }
    }

    /// Create a list scheme from branch paths.
    ///
    /// Paths are normalized. Empty entries and entries nested inside another
    /// entry are rejected since they would make the split ambiguous.
    pub fn list<I, S>(branches: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for branch in branches {
            let branch = normalize_path(branch.as_ref());
            if branch.is_empty() {
                return Err(MapError::InvalidSchemeSpec(
                    "list scheme contains the repository root".to_string(),
                ));
            }
            if normalized.contains(&branch) {
                continue;
            }
            normalized.push(branch);
        }

        for a in &normalized {
            for b in &normalized {
                if a != b && strip_path_prefix(b, a).is_some() {
                    return Err(MapError::InvalidSchemeSpec(format!(
                        "branch {:?} is nested inside branch {:?}",
                        b, a
                    )));
                }
            }
        }

        Ok(BranchingScheme::List {
            branches: normalized,
        })
    }

    /// Split a repository path into `(branch path, path inside branch)`
    pub fn unprefix(&self, path: &str) -> Result<(String, String)> {
        let path = normalize_path(path);
        match self {
            BranchingScheme::None => Ok((String::new(), path)),
            BranchingScheme::Trunk { level } => {
                let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
                let level = *level;
                if parts.len() <= level {
                    return Err(MapError::NotAContainer(path));
                }
                let depth = match parts[level] {
                    "trunk" => level + 1,
                    "branches" | "tags" if parts.len() > level + 1 => level + 2,
                    _ => return Err(MapError::NotAContainer(path)),
                };
                Ok((parts[..depth].join("/"), parts[depth..].join("/")))
            }
            BranchingScheme::List { branches } => branches
                .iter()
                .find_map(|branch| {
                    strip_path_prefix(&path, branch).map(|rel| (branch.clone(), rel.to_string()))
                })
                .ok_or(MapError::NotAContainer(path)),
        }
    }

    /// Check whether a path is itself a branch
    pub fn is_branch(&self, path: &str) -> bool {
        matches!(self.unprefix(path), Ok((_, rel)) if rel.is_empty())
    }

    /// Guess the scheme from a single path that is known to be a branch.
    ///
    /// The first `trunk` or `branches` segment determines the nesting level.
    pub fn guess_scheme(path: &str) -> Self {
        let normalized = normalize_path(path);
        normalized
            .split('/')
            .position(|segment| segment == "trunk" || segment == "branches")
            .map(BranchingScheme::trunk)
            .unwrap_or(BranchingScheme::None)
    }
}

impl fmt::Display for BranchingScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchingScheme::None => write!(f, "none"),
            BranchingScheme::Trunk { level } => write!(f, "trunk-{}", level),
            BranchingScheme::List { .. } => write!(f, "list"),
        }
    }
}

/// Parse a scheme name such as `none`, `trunk` or `trunk-2`.
///
/// `list` schemes carry their branch paths separately and cannot be parsed from
/// a name alone; use [`BranchingScheme::list`].
impl FromStr for BranchingScheme {
    type Err = MapError;

    fn from_str(spec: &str) -> Result<Self> {
        match spec {
            "none" => Ok(BranchingScheme::None),
            "trunk" => Ok(BranchingScheme::trunk(0)),
            _ => {
                let level = spec
                    .strip_prefix("trunk-")
                    .filter(|l| !l.is_empty() && l.bytes().all(|b| b.is_ascii_digit()))
                    .ok_or_else(|| MapError::InvalidSchemeSpec(spec.to_string()))?;
                level
                    .parse::<usize>()
                    .map(BranchingScheme::trunk)
                    .map_err(|_| MapError::InvalidSchemeSpec(spec.to_string()))
            }
        }
    }
}
