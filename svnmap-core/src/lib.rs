//! SvnMap Core Library
//!
//! Maps Subversion history onto a model where every versioned path has a
//! stable file id:
//! - Branching schemes (which directories are branches, tags and trunk)
//! - Revision keys naming one revision of one branch
//! - File id generation
//! - File id map derived from changed paths, following copies across branches
//! - In-memory repository history for replaying change logs

pub mod access;
pub mod changes;
pub mod config;
pub mod error;
pub mod fileid;
pub mod fileid_map;
pub mod memory;
pub mod revid;
pub mod scheme;

pub use access::RepositoryAccess;
pub use changes::{ChangeAction, ChangeRecord, CopySource, NodeKind};
pub use config::MapperConfig;
pub use error::{MapError, Result};
pub use fileid::{generate_file_id, generate_svn_file_id, FileId, ROOT_ID};
pub use fileid_map::{FileIdEntry, FileIdMap, FileIdMapping};
pub use memory::MemoryRepository;
pub use revid::{RevisionKey, MAPPING_VERSION};
pub use scheme::BranchingScheme;
