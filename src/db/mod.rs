//! In-memory model of one account directory.
//!
//! A [`Database`] holds the passwd/shadow records as [`UserRecord`]s and the
//! group/gshadow records as [`GroupRecord`]s, both keyed by name and kept in
//! file order so that writing them back out is deterministic.

pub mod reader;
pub mod writer;

use std::fmt::{Display, Formatter};

use indexmap::{IndexMap, IndexSet};

pub use reader::{parse_tables, read_dir, read_dir_with};
pub use writer::{REMOTE_AUTH_PASSWORD, Tables, render, write_dir};

/// Password placed in shadow/gshadow records when the directory has no such file.
pub const DEFAULT_PASSWORD: &str = "*";

/// The four tables of an account directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Table {
    Passwd,
    Group,
    Shadow,
    Gshadow,
}

impl Table {
    pub const ALL: [Table; 4] = [Table::Passwd, Table::Group, Table::Shadow, Table::Gshadow];

    pub fn file_name(self) -> &'static str {
        match self {
            Table::Passwd => "passwd",
            Table::Group => "group",
            Table::Shadow => "shadow",
            Table::Gshadow => "gshadow",
        }
    }

    /// Number of colon-delimited fields every line of this table must have.
    pub fn field_count(self) -> usize {
        match self {
            Table::Passwd => 7,
            Table::Group => 4,
            Table::Shadow => 9,
            Table::Gshadow => 4,
        }
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Inclusive id range that separates regular accounts from system ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdRange {
    pub min: u32,
    pub max: u32,
}

impl IdRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.min <= id && id <= self.max
    }
}

impl Default for IdRange {
    fn default() -> Self {
        Self::new(1000, 60000)
    }
}

/// User and group id ranges; anything outside them is a system account.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IdBounds {
    pub uid: IdRange,
    pub gid: IdRange,
}

/// Password aging fields from shadow, kept verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShadowFields {
    pub password: String,
    pub last_change: String,
    pub min: String,
    pub max: String,
    pub warn: String,
    pub inactive: String,
    pub expire: String,
    pub flag: String,
}

impl ShadowFields {
    /// Values used when a directory has no readable shadow file.
    pub fn defaults(last_change: i64) -> Self {
        Self {
            password: DEFAULT_PASSWORD.to_string(),
            last_change: last_change.to_string(),
            min: "0".to_string(),
            max: "99999".to_string(),
            warn: "7".to_string(),
            inactive: String::new(),
            expire: String::new(),
            flag: String::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    pub name: String,
    pub password: String,
    pub uid: u32,
    pub gid: u32,
    pub gecos: String,
    pub home: String,
    pub shell: String,
    pub shadow: ShadowFields,
    /// Name of the group whose gid is `gid`, resolved when the directory is read.
    pub primary_group: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupRecord {
    pub name: String,
    pub password: String,
    pub gid: u32,
    pub members: IndexSet<String>,
    /// gshadow password.
    pub shadow_password: String,
    /// gshadow administrator list, copied as a plain string.
    pub admins: String,
}

impl GroupRecord {
    pub fn has_member(&self, name: &str) -> bool {
        self.members.contains(name)
    }
}

/// Users and groups of one account directory, keyed by name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Database {
    pub users: IndexMap<String, UserRecord>,
    pub groups: IndexMap<String, GroupRecord>,
}

impl Database {
    pub fn user(&self, name: &str) -> Option<&UserRecord> {
        self.users.get(name)
    }

    pub fn group(&self, name: &str) -> Option<&GroupRecord> {
        self.groups.get(name)
    }
}
