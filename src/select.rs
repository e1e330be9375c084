//! Regex selection of users to keep or import.
//!
//! A group rule marks every member of each matching group; a user rule marks
//! matching regular users directly. System groups are matched with a leading
//! `:` so that `:sudo` selects the system `sudo` group and nothing else.

use indexmap::IndexSet;
use regex::Regex;

use crate::db::{Database, IdBounds};
use crate::error::{MergeError, Result};

/// Pattern that selects every regular user.
pub const MATCH_ALL: &str = ".*";

/// Compiled, fully anchored user and group patterns. An empty pattern matches nothing.
#[derive(Clone, Debug, Default)]
pub struct Rules {
    user: Option<Regex>,
    group: Option<Regex>,
}

impl Rules {
    pub fn new(user: &str, group: &str) -> Result<Self> {
        Ok(Self {
            user: compile("user", user)?,
            group: compile("group", group)?,
        })
    }

    /// Source-side rules: with no patterns at all, every regular user is imported.
    pub fn for_source(user: &str, group: &str) -> Result<Self> {
        if user.is_empty() && group.is_empty() {
            Self::new(MATCH_ALL, group)
        } else {
            Self::new(user, group)
        }
    }

    pub fn user_pattern(&self) -> &str {
        self.user.as_ref().map(pattern_of).unwrap_or("")
    }

    pub fn group_pattern(&self) -> &str {
        self.group.as_ref().map(pattern_of).unwrap_or("")
    }
}

fn compile(rule: &'static str, pattern: &str) -> Result<Option<Regex>> {
    if pattern.is_empty() {
        return Ok(None);
    }
    // "a)|(b" is invalid alone but would compile once wrapped
    Regex::new(pattern).map_err(|source| MergeError::Pattern { rule, source })?;
    Regex::new(&format!("^(?:{pattern})$"))
        .map(Some)
        .map_err(|source| MergeError::Pattern { rule, source })
}

fn pattern_of(re: &Regex) -> &str {
    let s = re.as_str();
    &s[4..s.len() - 2]
}

/// Names of the users selected during one merge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Marks {
    names: IndexSet<String>,
}

impl Marks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&mut self, name: &str) {
        if !self.names.contains(name) {
            self.names.insert(name.to_string());
        }
    }

    pub fn is_marked(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// Name used when matching a group rule: system groups get a `:` prefix.
pub fn group_match_name(name: &str, gid: u32, bounds: &IdBounds) -> String {
    if bounds.gid.contains(gid) {
        name.to_string()
    } else {
        format!(":{name}")
    }
}

/// Add to `marks` every user of `db` selected by `rules`. Existing marks are kept.
pub fn mark_users(db: &Database, rules: &Rules, bounds: &IdBounds, marks: &mut Marks) {
    if let Some(re) = &rules.group {
        for group in db.groups.values() {
            if !re.is_match(&group_match_name(&group.name, group.gid, bounds)) {
                continue;
            }
            for member in &group.members {
                if db.users.contains_key(member) {
                    marks.mark(member);
                } else {
                    tracing::debug!(group = %group.name, member = %member, "skipping unknown member");
                }
            }
        }
    }

    if let Some(re) = &rules.user {
        for user in db.users.values() {
            if bounds.uid.contains(user.uid) && re.is_match(&user.name) {
                marks.mark(&user.name);
            }
        }
    }
}

/// Marked users of `db`, in directory order.
pub fn marked_names<'a>(db: &'a Database, marks: &Marks) -> Vec<&'a str> {
    db.users
        .keys()
        .filter(|name| marks.is_marked(name))
        .map(String::as_str)
        .collect()
}
