//! Revision keys
//!
//! A revision key names one Subversion revision of one branch in the mapped
//! history. Its string form is the join handle used by the destination history:
//!
//! ```text
//! svn-v{mapping version}:{revnum}@{repository uuid}-{escaped branch path}
//! ```
//!
//! The branch path escapes `%`, `/` and `-`, so the last `-` in a key always
//! separates the uuid from the branch path.

use crate::error::{MapError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Current file id mapping version
pub const MAPPING_VERSION: u32 = 3;

const KEY_PREFIX: &str = "svn-v";

/// Escape a branch path for embedding in a revision key
pub fn escape_branch_path(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '/' => escaped.push_str("%2f"),
            '-' => escaped.push_str("%2d"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Reverse [`escape_branch_path`]. Only the escapes it emits are accepted.
pub fn unescape_branch_path(escaped: &str) -> Option<String> {
    let mut path = String::with_capacity(escaped.len());
    let mut rest = escaped;
    while let Some(pos) = rest.find(['%', '-']) {
        path.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let decoded = if tail.starts_with("%25") {
            '%'
        } else if tail.starts_with("%2f") {
            '/'
        } else if tail.starts_with("%2d") {
            '-'
        } else {
            return None;
        };
        path.push(decoded);
        rest = &tail[3..];
    }
    path.push_str(rest);
    Some(path)
}

/// Identifies one revision of one branch
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RevisionKey {
    /// Mapping version that produced this key
    pub version: u32,
    /// Subversion revision number
    pub revnum: u64,
    /// Branch path, normalized
    pub branch: String,
    /// Repository UUID
    pub uuid: String,
}

impl RevisionKey {
    /// Create a key with the current mapping version
    pub fn new(revnum: u64, branch: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self::with_version(MAPPING_VERSION, revnum, branch, uuid)
    }

    /// Create a key with an explicit mapping version
    pub fn with_version(
        version: u32,
        revnum: u64,
        branch: impl Into<String>,
        uuid: impl Into<String>,
    ) -> Self {
        Self {
            version,
            revnum,
            branch: branch.into(),
            uuid: uuid.into(),
        }
    }

    /// The key of revision 0 of the repository root, which has no parent
    pub fn origin(uuid: impl Into<String>) -> Self {
        Self::new(0, "", uuid)
    }

    /// Check if this is the origin key
    pub fn is_origin(&self) -> bool {
        self.revnum == 0 && self.branch.is_empty()
    }

    /// Encode to the external string form
    pub fn encode(&self) -> String {
        format!(
            "{}{}:{}@{}-{}",
            KEY_PREFIX,
            self.version,
            self.revnum,
            self.uuid,
            escape_branch_path(&self.branch)
        )
    }

    /// Decode from the external string form
    pub fn decode(key: &str) -> Result<Self> {
        let invalid = || MapError::InvalidRevisionKey(key.to_string());

        let rest = key.strip_prefix(KEY_PREFIX).ok_or_else(invalid)?;
        let (version, rest) = rest.split_once(':').ok_or_else(invalid)?;
        let (revnum, rest) = rest.split_once('@').ok_or_else(invalid)?;
        let (uuid, branch) = rest.rsplit_once('-').ok_or_else(invalid)?;

        Ok(Self {
            version: parse_decimal(version).ok_or_else(invalid)?,
            revnum: parse_decimal(revnum).ok_or_else(invalid)?,
            branch: unescape_branch_path(branch).ok_or_else(invalid)?,
            uuid: uuid.to_string(),
        })
    }
}

/// Parse a canonical decimal number: digits only, no sign, no leading zeros
fn parse_decimal<T: FromStr>(s: &str) -> Option<T> {
    let canonical = !s.is_empty()
        && s.bytes().all(|b| b.is_ascii_digit())
        && (s == "0" || !s.starts_with('0'));
    if canonical { s.parse().ok() } else { None }
}

impl fmt::Display for RevisionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl FromStr for RevisionKey {
    type Err = MapError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}
