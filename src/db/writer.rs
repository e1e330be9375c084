use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use indexmap::IndexSet;

use super::{Database, Table};
use crate::error::{Context, Result};

/// Password written to passwd for marked users; remote authentication keys on it.
pub const REMOTE_AUTH_PASSWORD: &str = "ssh";

/// The rendered text of the four tables.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tables {
    pub passwd: String,
    pub group: String,
    pub shadow: String,
    pub gshadow: String,
}

impl Tables {
    pub fn get(&self, table: Table) -> &str {
        match table {
            Table::Passwd => &self.passwd,
            Table::Group => &self.group,
            Table::Shadow => &self.shadow,
            Table::Gshadow => &self.gshadow,
        }
    }
}

/// Serialize `db` in map order. Users listed in `marked` get [`REMOTE_AUTH_PASSWORD`]
/// in passwd; their shadow entry is left untouched.
pub fn render(db: &Database, marked: &IndexSet<String>) -> Tables {
    let mut out = Tables::default();

    for u in db.users.values() {
        let password = if marked.contains(&u.name) {
            REMOTE_AUTH_PASSWORD
        } else {
            u.password.as_str()
        };
        let _ = writeln!(
            out.passwd,
            "{}:{}:{}:{}:{}:{}:{}",
            u.name, password, u.uid, u.gid, u.gecos, u.home, u.shell
        );
        let s = &u.shadow;
        let _ = writeln!(
            out.shadow,
            "{}:{}:{}:{}:{}:{}:{}:{}:{}",
            u.name, s.password, s.last_change, s.min, s.max, s.warn, s.inactive, s.expire, s.flag
        );
    }

    for g in db.groups.values() {
        let members = g
            .members
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let _ = writeln!(out.group, "{}:{}:{}:{}", g.name, g.password, g.gid, members);
        let _ = writeln!(
            out.gshadow,
            "{}:{}:{}:{}",
            g.name, g.shadow_password, g.admins, members
        );
    }

    out
}

/// Write the tables into `dir`, creating it if needed.
///
/// Every table goes to a `.tmp` sibling first; the renames only start once all
/// four temporary files are on disk.
pub fn write_dir<P: AsRef<Path>>(dir: P, tables: &Tables) -> Result<()> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).with_path("create", dir)?;

    let mut staged = Vec::with_capacity(Table::ALL.len());
    for table in Table::ALL {
        let tmp = dir.join(format!("{}.tmp", table.file_name()));
        if let Err(e) = fs::write(&tmp, tables.get(table)).with_path("write", &tmp) {
            for (path, _) in &staged {
                let _ = fs::remove_file(path);
            }
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        staged.push((tmp, dir.join(table.file_name())));
    }

    for (i, (tmp, dest)) in staged.iter().enumerate() {
        if let Err(e) = fs::rename(tmp, dest).with_path("rename", tmp) {
            for (path, _) in &staged[i..] {
                let _ = fs::remove_file(path);
            }
            return Err(e);
        }
    }
    tracing::debug!(dir = %dir.display(), "wrote merged tables");
    Ok(())
}
