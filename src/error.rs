use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use crate::db::Table;

pub type Result<T> = std::result::Result<T, MergeError>;

/// Everything that can abort a read, a merge or a write.
///
/// All variants are fatal. Non-fatal gid conflicts are reported through
/// [`crate::merge::MergeReport`] instead.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("{}:{line}: invalid {table} line, expected {expected} fields but found {found}", .path.display())]
    FieldCount {
        table: Table,
        path: PathBuf,
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("{}:{line}: invalid {field} `{value}` in {table}", .path.display())]
    InvalidId {
        table: Table,
        path: PathBuf,
        line: usize,
        field: &'static str,
        value: String,
    },

    #[error("user {user} has primary gid {gid} but no group with that gid exists")]
    DanglingGroup { user: String, gid: u32 },

    #[error(
        "user {name} exists in destination with uid/gid {dest_uid}/{dest_gid}, source has {src_uid}/{src_gid}"
    )]
    UserCollision {
        name: String,
        src_uid: u32,
        src_gid: u32,
        dest_uid: u32,
        dest_gid: u32,
    },

    #[error("group {name} exists in destination with gid {dest_gid}, source has {src_gid}")]
    GroupCollision {
        name: String,
        src_gid: u32,
        dest_gid: u32,
    },

    #[error("{kind} {id} is shared by {first} and {second}")]
    DuplicateId {
        kind: IdKind,
        id: u32,
        first: String,
        second: String,
    },

    #[error("invalid {rule} regex: {source}")]
    Pattern {
        rule: &'static str,
        #[source]
        source: regex::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl MergeError {
    /// Malformed input: wrong field count or unparsable id.
    pub fn is_format(&self) -> bool {
        matches!(self, Self::FieldCount { .. } | Self::InvalidId { .. })
    }

    /// Conflicting identities between source and destination, or in the merged result.
    pub fn is_collision(&self) -> bool {
        matches!(
            self,
            Self::UserCollision { .. } | Self::GroupCollision { .. } | Self::DuplicateId { .. }
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdKind {
    Uid,
    Gid,
}

impl Display for IdKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            IdKind::Uid => write!(f, "uid"),
            IdKind::Gid => write!(f, "gid"),
        }
    }
}

/// Attach a path-bearing context to I/O failures.
pub trait Context<T> {
    fn with_ctx<F: FnOnce() -> String>(self, f: F) -> Result<T>;

    fn with_path(self, action: &str, path: &Path) -> Result<T>
    where
        Self: Sized,
    {
        self.with_ctx(|| format!("{action} {}", path.display()))
    }
}

impl<T> Context<T> for std::result::Result<T, std::io::Error> {
    fn with_ctx<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|source| MergeError::Io {
            context: f(),
            source,
        })
    }
}
