use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use indexmap::{IndexMap, IndexSet};

use super::{DEFAULT_PASSWORD, Database, GroupRecord, ShadowFields, Table, UserRecord};
use crate::error::{Context, MergeError, Result};

/// Read `dir/{passwd,group,shadow,gshadow}`.
///
/// shadow and gshadow are optional; missing entries get the defaults of
/// [`ShadowFields::defaults`] with today's day count as last change.
pub fn read_dir<P: AsRef<Path>>(dir: P) -> Result<Database> {
    read_dir_with(dir, days_since_epoch())
}

/// Like [`read_dir`], with an explicit default for the shadow last-change field.
pub fn read_dir_with<P: AsRef<Path>>(dir: P, last_change: i64) -> Result<Database> {
    let dir = dir.as_ref();

    let path = dir.join(Table::Passwd.file_name());
    let passwd = fs::read_to_string(&path).with_path("read", &path)?;
    let path = dir.join(Table::Group.file_name());
    let group = fs::read_to_string(&path).with_path("read", &path)?;
    let shadow = read_optional(&dir.join(Table::Shadow.file_name()))?;
    let gshadow = read_optional(&dir.join(Table::Gshadow.file_name()))?;

    let db = assemble(
        dir,
        &passwd,
        &group,
        shadow.as_deref(),
        gshadow.as_deref(),
        last_change,
    )?;
    tracing::debug!(
        dir = %dir.display(),
        users = db.users.len(),
        groups = db.groups.len(),
        "read account directory"
    );
    Ok(db)
}

/// Build a database from in-memory table texts. `None` means the optional table is absent.
pub fn parse_tables(
    passwd: &str,
    group: &str,
    shadow: Option<&str>,
    gshadow: Option<&str>,
    last_change: i64,
) -> Result<Database> {
    assemble(Path::new(""), passwd, group, shadow, gshadow, last_change)
}

fn assemble(
    dir: &Path,
    passwd: &str,
    group: &str,
    shadow: Option<&str>,
    gshadow: Option<&str>,
    last_change: i64,
) -> Result<Database> {
    let defaults = ShadowFields::defaults(last_change);
    let mut users = parse_passwd(&dir.join(Table::Passwd.file_name()), passwd, &defaults)?;
    let mut groups = parse_group(&dir.join(Table::Group.file_name()), group)?;

    link_primary_groups(&mut users, &mut groups)?;

    if let Some(contents) = shadow {
        apply_shadow(&dir.join(Table::Shadow.file_name()), contents, &mut users)?;
    }
    if let Some(contents) = gshadow {
        apply_gshadow(&dir.join(Table::Gshadow.file_name()), contents, &mut groups)?;
    }
    Ok(Database { users, groups })
}

/// Whole days elapsed since 1970-01-01 UTC.
pub fn days_since_epoch() -> i64 {
    chrono::Utc::now().timestamp().div_euclid(86_400)
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
            tracing::debug!(path = %path.display(), "optional table unavailable: {e}");
            Ok(None)
        }
        Err(e) => Err(e).with_path("read", path),
    }
}

/// Non-blank lines split on ':', checked against the table's field count.
fn records<'a>(
    table: Table,
    path: &'a Path,
    contents: &'a str,
) -> impl Iterator<Item = Result<(usize, Vec<&'a str>)>> + 'a {
    contents
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
        .map(move |(line_no, line)| {
            let parts: Vec<&str> = line.split(':').collect();
            if parts.len() != table.field_count() {
                return Err(MergeError::FieldCount {
                    table,
                    path: path.to_path_buf(),
                    line: line_no,
                    expected: table.field_count(),
                    found: parts.len(),
                });
            }
            Ok((line_no, parts))
        })
}

fn parse_id(table: Table, path: &Path, line: usize, field: &'static str, value: &str) -> Result<u32> {
    value.parse::<u32>().map_err(|_| MergeError::InvalidId {
        table,
        path: path.to_path_buf(),
        line,
        field,
        value: value.to_string(),
    })
}

fn parse_passwd(
    path: &Path,
    contents: &str,
    defaults: &ShadowFields,
) -> Result<IndexMap<String, UserRecord>> {
    let mut users = IndexMap::new();
    for record in records(Table::Passwd, path, contents) {
        let (line, parts) = record?;
        let uid = parse_id(Table::Passwd, path, line, "uid", parts[2])?;
        let gid = parse_id(Table::Passwd, path, line, "gid", parts[3])?;
        let user = UserRecord {
            name: parts[0].to_string(),
            password: parts[1].to_string(),
            uid,
            gid,
            gecos: parts[4].to_string(),
            home: parts[5].to_string(),
            shell: parts[6].to_string(),
            shadow: defaults.clone(),
            primary_group: String::new(),
        };
        users.insert(user.name.clone(), user);
    }
    Ok(users)
}

fn parse_group(path: &Path, contents: &str) -> Result<IndexMap<String, GroupRecord>> {
    let mut groups = IndexMap::new();
    for record in records(Table::Group, path, contents) {
        let (line, parts) = record?;
        let gid = parse_id(Table::Group, path, line, "gid", parts[2])?;
        let members: IndexSet<String> = parts[3]
            .split(',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let group = GroupRecord {
            name: parts[0].to_string(),
            password: parts[1].to_string(),
            gid,
            members,
            shadow_password: DEFAULT_PASSWORD.to_string(),
            admins: String::new(),
        };
        groups.insert(group.name.clone(), group);
    }
    Ok(groups)
}

/// Resolve each user's primary group name and list the user as an explicit member of it.
fn link_primary_groups(
    users: &mut IndexMap<String, UserRecord>,
    groups: &mut IndexMap<String, GroupRecord>,
) -> Result<()> {
    let gid_to_name: HashMap<u32, String> = groups
        .values()
        .map(|g| (g.gid, g.name.clone()))
        .collect();

    for user in users.values_mut() {
        let Some(group_name) = gid_to_name.get(&user.gid) else {
            return Err(MergeError::DanglingGroup {
                user: user.name.clone(),
                gid: user.gid,
            });
        };
        user.primary_group = group_name.clone();
        if let Some(group) = groups.get_mut(group_name) {
            group.members.insert(user.name.clone());
        }
    }
    Ok(())
}

fn apply_shadow(path: &Path, contents: &str, users: &mut IndexMap<String, UserRecord>) -> Result<()> {
    for record in records(Table::Shadow, path, contents) {
        let (_, parts) = record?;
        let Some(user) = users.get_mut(parts[0]) else {
            continue;
        };
        user.shadow = ShadowFields {
            password: parts[1].to_string(),
            last_change: parts[2].to_string(),
            min: parts[3].to_string(),
            max: parts[4].to_string(),
            warn: parts[5].to_string(),
            inactive: parts[6].to_string(),
            expire: parts[7].to_string(),
            flag: parts[8].to_string(),
        };
    }
    Ok(())
}

fn apply_gshadow(
    path: &Path,
    contents: &str,
    groups: &mut IndexMap<String, GroupRecord>,
) -> Result<()> {
    for record in records(Table::Gshadow, path, contents) {
        let (_, parts) = record?;
        if let Some(group) = groups.get_mut(parts[0]) {
            group.shadow_password = parts[1].to_string();
            group.admins = parts[2].to_string();
        }
    }
    Ok(())
}
