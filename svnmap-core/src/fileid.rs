//! File ids
//!
//! Every versioned path gets a stable file id. Branch roots share [`ROOT_ID`];
//! any other path gets an id derived from the revision key that introduced it
//! and its path inside the branch.

use crate::revid::RevisionKey;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;

/// File id shared by every branch root
pub const ROOT_ID: &str = "TREE_ROOT";

/// Directory prefixes longer than this are replaced by their SHA-1 digest
pub const MAX_DIRNAME_LEN: usize = 150;

/// Stable identifier of a versioned path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    /// Wrap an existing id, e.g. one recorded in a file id property
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The branch root id
    pub fn root() -> Self {
        Self(ROOT_ID.to_string())
    }

    /// Check if this is the branch root id
    pub fn is_root(&self) -> bool {
        self.0 == ROOT_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Generate the file id for `path` introduced under the encoded revision key `introduced_in`.
///
/// The result only depends on the arguments.
pub fn generate_file_id(introduced_in: &str, path: &str) -> FileId {
    if path.is_empty() {
        return FileId::root();
    }

    let (dirname, basename) = match path.rfind('/') {
        Some(pos) => path.split_at(pos + 1),
        None => ("", path),
    };

    if dirname.len() > MAX_DIRNAME_LEN {
        let digest = hex::encode(Sha1::digest(dirname.as_bytes()));
        FileId(format!("{}-{}-{}", introduced_in, digest, basename))
    } else {
        FileId(format!("{}-{}", introduced_in, path))
    }
}

/// Generate the file id for `path` inside `branch`, introduced in `revnum`
pub fn generate_svn_file_id(uuid: &str, revnum: u64, branch: &str, path: &str) -> FileId {
    generate_file_id(&RevisionKey::new(revnum, branch, uuid).encode(), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sha1_hex(data: &str) -> String {
        hex::encode(Sha1::digest(data.as_bytes()))
    }

    #[test]
    fn test_generate_file_id_root() {
        assert_eq!(generate_file_id("svn-v2:2@uuid-bp", ""), FileId::root());
        assert!(generate_file_id("svn-v2:2@uuid-bp", "").is_root());
    }

    #[test]
    fn test_generate_file_id_path() {
        assert_eq!(
            generate_file_id("svn-v2:2@uuid-bp", "mypath").as_str(),
            "svn-v2:2@uuid-bp-mypath"
        );
        assert_eq!(
            generate_file_id("svn-v2:2@uuid-bp", "dir/mypath").as_str(),
            "svn-v2:2@uuid-bp-dir/mypath"
        );
    }

    #[test]
    fn test_generate_file_id_long() {
        let dir = format!("this/is/a{}/long/path/", "/very".repeat(40));
        let id = generate_file_id("svn-v2:2@uuid-bp", &format!("{}filename", dir));
        assert_eq!(
            id.as_str(),
            format!("svn-v2:2@uuid-bp-{}-filename", sha1_hex(&dir))
        );
    }

    #[test]
    fn test_generate_file_id_long_prefixes_differ() {
        let a = format!("a{}/filename", "/very".repeat(40));
        let b = format!("b{}/filename", "/very".repeat(40));
        let id_a = generate_file_id("svn-v2:2@uuid-bp", &a);
        let id_b = generate_file_id("svn-v2:2@uuid-bp", &b);
        assert_ne!(id_a, id_b);
        assert!(id_a.as_str().ends_with("-filename"));
        assert_eq!(id_a.as_str().len(), id_b.as_str().len());
    }

    #[test]
    fn test_generate_file_id_special_char() {
        assert_eq!(
            generate_file_id("svn-v2:2@uuid-bp", "mypath\u{2c}").as_str(),
            "svn-v2:2@uuid-bp-mypath\u{2c}"
        );
    }

    #[test]
    fn test_generate_svn_file_id() {
        assert_eq!(
            generate_svn_file_id("uuid", 2, "trunk", "file").as_str(),
            "svn-v3:2@uuid-trunk-file"
        );
        assert_ne!(
            generate_svn_file_id("uuid", 2, "trunk", "file"),
            generate_svn_file_id("uuid", 3, "trunk", "file")
        );
    }
}
