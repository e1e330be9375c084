use std::fmt::{Display, Formatter};

use indexmap::IndexSet;

/// Which gid a conflicting group ended up with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GidResolution {
    /// The destination gid was a regular one and was replaced by the source gid.
    Source,
    /// The destination gid is a system gid and was kept.
    Destination,
}

impl Display for GidResolution {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            GidResolution::Source => write!(f, "keeping sgid"),
            GidResolution::Destination => write!(f, "keeping dgid"),
        }
    }
}

/// A transferred group that exists on both sides with different gids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GidConflict {
    pub group: String,
    pub source_gid: u32,
    pub dest_gid: u32,
    pub resolution: GidResolution,
}

/// What a merge did, phase by phase.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub marked_destination: Vec<String>,
    pub removed_users: Vec<String>,
    pub removed_groups: Vec<String>,
    pub marked_source: Vec<String>,
    pub transferred_users: Vec<String>,
    pub transferred_groups: Vec<String>,
    pub gid_conflicts: Vec<GidConflict>,
    /// Non-system groups deleted because reconciliation left them without members.
    pub emptied_groups: Vec<String>,
    /// Member names dropped during reconciliation, either unknown or implicit.
    pub removed_members: IndexSet<String>,
    /// Users whose primary gid no longer belongs to any group.
    pub missing_primary_groups: Vec<String>,
}

impl MergeReport {
    pub fn has_warnings(&self) -> bool {
        !self.gid_conflicts.is_empty() || !self.missing_primary_groups.is_empty()
    }
}
