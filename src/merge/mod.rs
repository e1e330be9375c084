//! Merge selected source accounts into a destination account directory.
//!
//! [`Merger::merge`] runs the phases below in order; each one relies on what the
//! previous ones left behind:
//!
//! 1. mark destination users selected by the destination rules
//! 2. drop unmarked regular destination users
//! 3. drop regular destination groups that no longer have any member, which
//!    frees their gid for a source group
//! 4. mark source users selected by the source rules
//! 5. copy marked source users and their primary groups; any uid/gid
//!    disagreement with an existing destination entry is fatal
//! 6. copy or merge every other source group that has a marked member
//! 7. drop unknown and implicit members, then empty regular groups
//! 8. verify that no uid or gid is used twice
//!
//! The merger owns both databases and works on them in place. A fatal error
//! consumes it, so a failed merge never yields a partially merged database.

mod report;

use std::collections::{HashMap, HashSet};
use std::path::Path;

use indexmap::IndexSet;

pub use report::{GidConflict, GidResolution, MergeReport};

use crate::db::{self, Database, IdBounds, Tables};
use crate::error::{IdKind, MergeError, Result};
use crate::select::{Marks, Rules, mark_users, marked_names};

/// Selection patterns and id ranges for one merge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// Source users to import (`--sur`).
    pub source_users: String,
    /// Source groups whose members are imported (`--sgr`).
    pub source_groups: String,
    /// Destination users to preserve (`--dur`).
    pub dest_users: String,
    /// Destination groups whose members are preserved (`--dgr`).
    pub dest_groups: String,
    pub bounds: IdBounds,
}

/// Result of a successful merge.
#[derive(Clone, Debug)]
pub struct MergeOutcome {
    pub database: Database,
    /// Users that were selected on either side and survive in `database`.
    pub marked: IndexSet<String>,
    pub report: MergeReport,
}

impl MergeOutcome {
    pub fn tables(&self) -> Tables {
        db::render(&self.database, &self.marked)
    }
}

#[derive(Debug)]
pub struct Merger {
    source: Database,
    dest: Database,
    source_rules: Rules,
    dest_rules: Rules,
    bounds: IdBounds,
    source_marks: Marks,
    dest_marks: Marks,
    transferred: IndexSet<String>,
    report: MergeReport,
}

impl Merger {
    /// Compile the rules up front so that a bad pattern fails before anything is touched.
    pub fn new(source: Database, dest: Database, opts: &MergeOptions) -> Result<Self> {
        Ok(Self {
            source,
            dest,
            source_rules: Rules::for_source(&opts.source_users, &opts.source_groups)?,
            dest_rules: Rules::new(&opts.dest_users, &opts.dest_groups)?,
            bounds: opts.bounds,
            source_marks: Marks::new(),
            dest_marks: Marks::new(),
            transferred: IndexSet::new(),
            report: MergeReport::default(),
        })
    }

    pub fn merge(mut self) -> Result<MergeOutcome> {
        self.mark_destination();
        self.prune_destination_users();
        self.prune_empty_destination_groups();
        self.mark_source();
        self.transfer_users()?;
        self.transfer_groups();
        self.reconcile_members();
        self.verify_ids()?;

        let marked = self
            .dest
            .users
            .keys()
            .filter(|name| self.transferred.contains(*name) || self.dest_marks.is_marked(name))
            .cloned()
            .collect();
        Ok(MergeOutcome {
            database: self.dest,
            marked,
            report: self.report,
        })
    }

    fn mark_destination(&mut self) {
        mark_users(&self.dest, &self.dest_rules, &self.bounds, &mut self.dest_marks);
        let names = owned(marked_names(&self.dest, &self.dest_marks));
        tracing::info!(
            "marked destination users for regexes '{}', '{}': {}",
            self.dest_rules.user_pattern(),
            self.dest_rules.group_pattern(),
            names.join(" ")
        );
        self.report.marked_destination = names;
    }

    /// Regular destination users survive only if marked; system users always do.
    fn prune_destination_users(&mut self) {
        let bounds = self.bounds;
        let marks = &self.dest_marks;
        let mut removed = Vec::new();
        self.dest.users.retain(|name, user| {
            let keep = !bounds.uid.contains(user.uid) || marks.is_marked(name);
            if !keep {
                removed.push(name.clone());
            }
            keep
        });
        tracing::info!("removed destination users: {}", removed.join(" "));
        self.report.removed_users = removed;
    }

    fn prune_empty_destination_groups(&mut self) {
        let bounds = self.bounds;
        let users = &self.dest.users;
        let mut removed = Vec::new();
        self.dest.groups.retain(|name, group| {
            let keep = !bounds.gid.contains(group.gid)
                || group.members.iter().any(|m| users.contains_key(m));
            if !keep {
                removed.push(name.clone());
            }
            keep
        });
        tracing::info!("removed destination groups: {}", removed.join(" "));
        self.report.removed_groups = removed;
    }

    fn mark_source(&mut self) {
        mark_users(&self.source, &self.source_rules, &self.bounds, &mut self.source_marks);
        let names = owned(marked_names(&self.source, &self.source_marks));
        tracing::info!(
            "marked source users for regexes '{}', '{}': {}",
            self.source_rules.user_pattern(),
            self.source_rules.group_pattern(),
            names.join(" ")
        );
        self.report.marked_source = names;
    }

    /// Copy marked users and their primary groups. Identity mismatches abort the merge.
    fn transfer_users(&mut self) -> Result<()> {
        for user in self.source.users.values() {
            if !self.source_marks.is_marked(&user.name) {
                continue;
            }
            if let Some(existing) = self.dest.users.get(&user.name) {
                if existing.uid != user.uid || existing.gid != user.gid {
                    return Err(MergeError::UserCollision {
                        name: user.name.clone(),
                        src_uid: user.uid,
                        src_gid: user.gid,
                        dest_uid: existing.uid,
                        dest_gid: existing.gid,
                    });
                }
                tracing::debug!(user = %user.name, "overwriting destination user with same uid/gid");
            }
            self.dest.users.insert(user.name.clone(), user.clone());

            if let Some(existing) = self.dest.groups.get(&user.primary_group) {
                if existing.gid != user.gid {
                    return Err(MergeError::GroupCollision {
                        name: user.primary_group.clone(),
                        src_gid: user.gid,
                        dest_gid: existing.gid,
                    });
                }
            }
            if let Some(group) = self.source.groups.get(&user.primary_group) {
                self.dest.groups.insert(group.name.clone(), group.clone());
            }
            self.transferred.insert(user.name.clone());
            self.report.transferred_users.push(user.name.clone());
        }
        tracing::info!("transferred users: {}", self.report.transferred_users.join(" "));
        Ok(())
    }

    /// Copy every source group with a marked member. Gid mismatches are resolved, not fatal.
    fn transfer_groups(&mut self) {
        for group in self.source.groups.values() {
            if !group.members.iter().any(|m| self.source_marks.is_marked(m)) {
                continue;
            }
            match self.dest.groups.get_mut(&group.name) {
                None => {
                    self.dest.groups.insert(group.name.clone(), group.clone());
                }
                Some(existing) => {
                    if existing.gid == group.gid {
                        existing.members.extend(group.members.iter().cloned());
                    } else {
                        let dest_gid = existing.gid;
                        let resolution = if self.bounds.gid.contains(dest_gid) {
                            existing.gid = group.gid;
                            GidResolution::Source
                        } else {
                            GidResolution::Destination
                        };
                        tracing::warn!(
                            "group {} has sgid={}, dgid={}; {}",
                            group.name,
                            group.gid,
                            dest_gid,
                            resolution
                        );
                        self.report.gid_conflicts.push(GidConflict {
                            group: group.name.clone(),
                            source_gid: group.gid,
                            dest_gid,
                            resolution,
                        });
                    }
                    existing.password = group.password.clone();
                }
            }
            self.report.transferred_groups.push(group.name.clone());
        }
        tracing::info!("transferred groups: {}", self.report.transferred_groups.join(" "));
    }

    /// Drop members that are unknown or whose primary group this is, then
    /// delete regular groups left empty unless a user still points at them.
    fn reconcile_members(&mut self) {
        let users = &self.dest.users;
        let mut removed_members = IndexSet::new();
        for group in self.dest.groups.values_mut() {
            let gid = group.gid;
            group.members.retain(|m| {
                let keep = users.get(m).is_some_and(|u| u.gid != gid);
                if !keep {
                    removed_members.insert(m.clone());
                }
                keep
            });
        }

        let primary_gids: HashSet<u32> = users.values().map(|u| u.gid).collect();
        let bounds = self.bounds;
        let mut emptied = Vec::new();
        self.dest.groups.retain(|name, group| {
            let keep = !group.members.is_empty()
                || !bounds.gid.contains(group.gid)
                || primary_gids.contains(&group.gid);
            if !keep {
                emptied.push(name.clone());
            }
            keep
        });

        tracing::info!("removed empty groups: {}", emptied.join(" "));
        tracing::info!(
            "removed unknown members: {}",
            removed_members.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
        );
        self.report.emptied_groups = emptied;
        self.report.removed_members = removed_members;
    }

    /// Fails on a uid or gid used twice. Users whose primary group vanished
    /// through a gid rewrite are only reported.
    fn verify_ids(&mut self) -> Result<()> {
        let mut uids: HashMap<u32, &str> = HashMap::new();
        for user in self.dest.users.values() {
            if let Some(first) = uids.insert(user.uid, &user.name) {
                return Err(MergeError::DuplicateId {
                    kind: IdKind::Uid,
                    id: user.uid,
                    first: first.to_string(),
                    second: user.name.clone(),
                });
            }
        }
        let mut gids: HashMap<u32, &str> = HashMap::new();
        for group in self.dest.groups.values() {
            if let Some(first) = gids.insert(group.gid, &group.name) {
                return Err(MergeError::DuplicateId {
                    kind: IdKind::Gid,
                    id: group.gid,
                    first: first.to_string(),
                    second: group.name.clone(),
                });
            }
        }
        for user in self.dest.users.values() {
            if !gids.contains_key(&user.gid) {
                tracing::warn!(
                    "user {} has primary gid {} but no such group is left",
                    user.name,
                    user.gid
                );
                self.report.missing_primary_groups.push(user.name.clone());
            }
        }
        Ok(())
    }
}

/// Merge `source` into `dest` with `opts`.
pub fn merge(source: Database, dest: Database, opts: &MergeOptions) -> Result<MergeOutcome> {
    Merger::new(source, dest, opts)?.merge()
}

/// Read both directories, merge them and write the result to `output`.
///
/// `output` is only touched once the merge has succeeded.
pub fn merge_dirs(
    source: &Path,
    dest: &Path,
    output: &Path,
    opts: &MergeOptions,
) -> Result<MergeOutcome> {
    let source_db = db::read_dir(source)?;
    let dest_db = db::read_dir(dest)?;
    let outcome = merge(source_db, dest_db, opts)?;
    db::write_dir(output, &outcome.tables())?;
    Ok(outcome)
}

fn owned(names: Vec<&str>) -> Vec<String> {
    names.into_iter().map(String::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::parse_tables;

    const DEST_PASSWD: &str = "\
root:x:0:0:root:/root:/bin/bash
admin:x:1000:1000:Local Admin:/home/admin:/bin/bash
carol:x:1003:1003::/home/carol:/bin/bash
";
    const DEST_GROUP: &str = "\
root:x:0:
sudo:x:27:admin
audio:x:29:
admin:x:1000:
carol:x:1003:
old:x:1005:carol
";

    fn dest() -> Database {
        parse_tables(DEST_PASSWD, DEST_GROUP, None, None, 0).unwrap()
    }

    fn db(passwd: &str, group: &str) -> Database {
        parse_tables(passwd, group, None, None, 0).unwrap()
    }

    fn opts(sur: &str, sgr: &str, dur: &str, dgr: &str) -> MergeOptions {
        MergeOptions {
            source_users: sur.into(),
            source_groups: sgr.into(),
            dest_users: dur.into(),
            dest_groups: dgr.into(),
            bounds: IdBounds::default(),
        }
    }

    fn members(db: &Database, group: &str) -> Vec<String> {
        db.groups[group].members.iter().cloned().collect()
    }

    #[test]
    fn unmarked_regular_users_are_pruned_and_system_users_kept() {
        let source = db("", "");
        let out = merge(source, dest(), &opts("", "", "", ":sudo")).unwrap();
        let names: Vec<&str> = out.database.users.keys().map(String::as_str).collect();
        assert_eq!(names, ["root", "admin"]);
        assert_eq!(out.report.removed_users, ["carol"]);
        assert_eq!(out.report.removed_groups, ["carol", "old"]);
        assert!(out.marked.contains("admin"));
    }

    #[test]
    fn system_groups_survive_without_members() {
        let out = merge(db("", ""), dest(), &opts("", "", "", "")).unwrap();
        assert!(out.database.group("audio").is_some());
        assert!(out.database.group("sudo").is_some());
        assert!(out.database.group("admin").is_none());
        assert!(out.database.groups["audio"].members.is_empty());
    }

    #[test]
    fn fresh_user_is_transferred_with_primary_group() {
        let source = db(
            "alice:x:1001:1001::/home/alice:/bin/bash\nbob:x:1002:1002::/home/bob:/bin/bash\n",
            "alice:x:1001:\nbob:x:1002:\n",
        );
        let out = merge(source, dest(), &opts("a.*", "", "", "")).unwrap();
        let alice = out.database.user("alice").unwrap();
        assert_eq!((alice.uid, alice.gid), (1001, 1001));
        assert!(out.database.user("bob").is_none());
        assert_eq!(out.database.groups["alice"].gid, 1001);
        assert_eq!(out.report.transferred_users, ["alice"]);
        assert!(out.marked.contains("alice"));

        let tables = out.tables();
        assert!(tables.passwd.contains("alice:ssh:1001:1001::/home/alice:/bin/bash\n"));
        assert!(tables.group.contains("alice:x:1001:\n"));
    }

    #[test]
    fn emptied_group_makes_room_for_source_group() {
        let source = db(
            "dave:x:1004:1004::/home/dave:/bin/bash\n",
            "dave:x:1004:\nold:x:1005:dave\n",
        );
        let out = merge(source, dest(), &opts("", "", "", "")).unwrap();
        assert!(out.report.removed_groups.contains(&"old".to_string()));
        assert!(out.report.gid_conflicts.is_empty());
        assert_eq!(out.database.groups["old"].gid, 1005);
        assert_eq!(members(&out.database, "old"), ["dave"]);
        assert!(out.tables().group.contains("old:x:1005:dave\n"));
    }

    #[test]
    fn empty_source_rules_import_every_regular_user() {
        let passwd = "alice:x:1001:1001::/home/alice:/bin/bash\nbob:x:1002:1002::/home/bob:/bin/bash\nsvc:x:200:200::/:/bin/false\n";
        let group = "alice:x:1001:\nbob:x:1002:\nsvc:x:200:\n";
        let implicit = merge(db(passwd, group), dest(), &opts("", "", "", "")).unwrap();
        let explicit = merge(db(passwd, group), dest(), &opts(".*", "", "", "")).unwrap();
        assert_eq!(implicit.database, explicit.database);
        assert_eq!(implicit.marked, explicit.marked);
        assert!(implicit.database.user("svc").is_none());
    }

    #[test]
    fn source_group_rule_disables_the_import_all_default() {
        let source = db(
            "alice:x:1001:1001::/home/alice:/bin/bash\nbob:x:1002:1002::/home/bob:/bin/bash\n",
            "alice:x:1001:\nbob:x:1002:\nteachers:x:3000:bob\n",
        );
        let out = merge(source, dest(), &opts("", "teachers", "", "")).unwrap();
        assert!(out.database.user("alice").is_none());
        assert!(out.database.user("bob").is_some());
        assert_eq!(members(&out.database, "teachers"), ["bob"]);
    }

    #[test]
    fn same_identity_overwrites_destination_user() {
        let source = db(
            "admin:x:1000:1000:Imported Admin:/home/admin:/bin/zsh\n",
            "admin:x:1000:\n",
        );
        let out = merge(source, dest(), &opts("admin", "", "admin", "")).unwrap();
        let admin = out.database.user("admin").unwrap();
        assert_eq!(admin.gecos, "Imported Admin");
        assert_eq!(admin.shell, "/bin/zsh");
    }

    #[test]
    fn user_uid_mismatch_is_fatal() {
        let source = db("admin:x:2000:2000::/home/admin:/bin/bash\n", "admin:x:2000:\n");
        let err = merge(source, dest(), &opts("admin", "", "admin", "")).unwrap_err();
        assert!(err.is_collision());
        assert!(matches!(
            err,
            MergeError::UserCollision { src_uid: 2000, dest_uid: 1000, .. }
        ));
    }

    #[test]
    fn primary_group_gid_mismatch_is_fatal() {
        let source = db(
            "alice:x:1001:1600::/home/alice:/bin/bash\n",
            "staff:x:1600:\n",
        );
        let dest = db(
            "bob:x:1002:1500::/home/bob:/bin/bash\n",
            "staff:x:1500:\n",
        );
        let err = merge(source, dest, &opts("alice", "", "bob", "")).unwrap_err();
        assert!(matches!(
            err,
            MergeError::GroupCollision { src_gid: 1600, dest_gid: 1500, .. }
        ));
    }

    #[test]
    fn secondary_gid_conflicts_are_resolved_by_range() {
        let source = db(
            "alice:x:1001:1001::/home/alice:/bin/bash\n",
            "alice:x:1001:\nlpadmin:s:120:alice\ndevs:s:2000:alice\n",
        );
        let dest = db(
            "root:x:0:0:root:/root:/bin/bash\nbob:x:1002:1002::/home/bob:/bin/bash\n",
            "root:x:0:\nbob:x:1002:\nlpadmin:x:116:root\ndevs:x:1500:bob\n",
        );
        let out = merge(source, dest, &opts("alice", "", "bob", "")).unwrap();

        let lpadmin = &out.database.groups["lpadmin"];
        assert_eq!(lpadmin.gid, 116);
        assert_eq!(lpadmin.password, "s");
        let devs = &out.database.groups["devs"];
        assert_eq!(devs.gid, 2000);
        assert_eq!(devs.password, "s");

        assert!(out.report.has_warnings());
        assert_eq!(
            out.report.gid_conflicts,
            [
                GidConflict {
                    group: "lpadmin".into(),
                    source_gid: 120,
                    dest_gid: 116,
                    resolution: GidResolution::Destination,
                },
                GidConflict {
                    group: "devs".into(),
                    source_gid: 2000,
                    dest_gid: 1500,
                    resolution: GidResolution::Source,
                },
            ]
        );
    }

    #[test]
    fn matching_gids_union_members() {
        let source = db(
            "alice:x:1001:1001::/home/alice:/bin/bash\n",
            "alice:x:1001:\nsudo:x:27:alice\n",
        );
        let out = merge(source, dest(), &opts("alice", "", "admin", "")).unwrap();
        assert_eq!(members(&out.database, "sudo"), ["admin", "alice"]);
    }

    #[test]
    fn reconciliation_drops_unknown_and_implicit_members() {
        let source = db(
            "alice:x:1001:1001::/home/alice:/bin/bash\n",
            "alice:x:1001:\nsudo:x:27:alice,ghost\n",
        );
        let out = merge(source, dest(), &opts("alice", "", "admin", "")).unwrap();
        assert!(!out.database.groups["sudo"].has_member("ghost"));
        assert!(!out.database.groups["alice"].has_member("alice"));
        assert!(!out.database.groups["admin"].has_member("admin"));
        assert!(out.report.removed_members.contains("ghost"));
        assert!(out.report.removed_members.contains("alice"));
        // primary groups stay even though they list nobody
        assert!(out.database.group("alice").is_some());
        assert!(out.database.group("admin").is_some());
    }

    #[test]
    fn implicit_members_are_dropped_from_shared_groups() {
        let source = db(
            "alice:x:1001:1001::/home/alice:/bin/bash\nbob:x:1002:1002::/home/bob:/bin/bash\n",
            "alice:x:1001:\nbob:x:1002:\nproject:x:4000:alice,bob\n",
        );
        let dest = db(
            "root:x:0:0:root:/root:/bin/bash\nbob:x:1002:4000::/home/bob:/bin/bash\n",
            "root:x:0:\nproject:x:4000:\n",
        );
        // project is bob's primary group in the destination
        let out = merge(source, dest, &opts("alice", "", "bob", "")).unwrap();
        assert_eq!(members(&out.database, "project"), ["alice"]);
        assert!(out.report.emptied_groups.is_empty());
    }

    #[test]
    fn gid_rewrite_can_orphan_a_destination_user() {
        let source = db(
            "alice:x:1001:1001::/home/alice:/bin/bash\n",
            "alice:x:1001:\ndevs:x:2000:alice\n",
        );
        let dest = db(
            "bob:x:1002:1500::/home/bob:/bin/bash\n",
            "devs:x:1500:\n",
        );
        let out = merge(source, dest, &opts("alice", "", "bob", "")).unwrap();
        assert_eq!(out.database.groups["devs"].gid, 2000);
        assert_eq!(members(&out.database, "devs"), ["bob"]);
        assert_eq!(out.report.missing_primary_groups, ["bob"]);
    }

    #[test]
    fn duplicate_uid_in_result_is_fatal() {
        let source = db(
            "alice:x:1000:1001::/home/alice:/bin/bash\n",
            "alice:x:1001:\n",
        );
        let err = merge(source, dest(), &opts("alice", "", "admin", "")).unwrap_err();
        assert!(matches!(
            err,
            MergeError::DuplicateId { kind: IdKind::Uid, id: 1000, .. }
        ));
    }

    #[test]
    fn duplicate_gid_in_result_is_fatal() {
        let source = db(
            "alice:x:1001:1001::/home/alice:/bin/bash\n",
            "alice:x:1001:\nscanner:x:27:alice\n",
        );
        let err = merge(source, dest(), &opts("alice", "", "", ":sudo")).unwrap_err();
        assert!(matches!(
            err,
            MergeError::DuplicateId { kind: IdKind::Gid, id: 27, .. }
        ));
    }

    #[test]
    fn invalid_rule_fails_before_merging() {
        let err = Merger::new(db("", ""), dest(), &opts("", "", "[", "")).unwrap_err();
        assert!(matches!(err, MergeError::Pattern { rule: "user", .. }));
    }
}
