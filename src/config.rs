//! Merge configuration: parse a `mergepw.conf` file and combine it with command-line values.
//!
//! The file uses `<key> = <value>` lines. Comments (lines starting with '#')
//! and empty lines are ignored; unknown keys are collected so the caller can warn about them.
//! Values given on the command line always win over the file.

use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::db::{IdBounds, IdRange};
use crate::merge::MergeOptions;

/// Settings read from a configuration file. `None` means "not set in the file".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileConfig {
    pub sur: Option<String>,
    pub sgr: Option<String>,
    pub dur: Option<String>,
    pub dgr: Option<String>,
    pub uid_min: Option<u32>,
    pub uid_max: Option<u32>,
    pub gid_min: Option<u32>,
    pub gid_max: Option<u32>,
    pub quiet: Option<bool>,
    /// Keys that were present but not understood.
    pub unknown_keys: Vec<String>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let mut cfg = Self::default();
        for (idx, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((lhs, rhs)) = line.split_once('=') else {
                bail!("line {}: expected `key = value`", idx + 1);
            };
            let (key, value) = (lhs.trim(), rhs.trim());
            let value = unquote(value);

            match key {
                "sur" => cfg.sur = Some(value.to_string()),
                "sgr" => cfg.sgr = Some(value.to_string()),
                "dur" => cfg.dur = Some(value.to_string()),
                "dgr" => cfg.dgr = Some(value.to_string()),
                "uid_min" => cfg.uid_min = Some(parse_id(idx, key, value)?),
                "uid_max" => cfg.uid_max = Some(parse_id(idx, key, value)?),
                "gid_min" => cfg.gid_min = Some(parse_id(idx, key, value)?),
                "gid_max" => cfg.gid_max = Some(parse_id(idx, key, value)?),
                "quiet" => cfg.quiet = Some(parse_bool(value)),
                _ => cfg.unknown_keys.push(key.to_string()),
            }
        }
        Ok(cfg)
    }
}

/// Values given on the command line, before the config file is consulted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Overrides {
    pub sur: Option<String>,
    pub sgr: Option<String>,
    pub dur: Option<String>,
    pub dgr: Option<String>,
    pub uid_min: Option<u32>,
    pub uid_max: Option<u32>,
    pub gid_min: Option<u32>,
    pub gid_max: Option<u32>,
    pub quiet: bool,
}

/// Fully resolved settings for one run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Settings {
    pub options: MergeOptions,
    pub quiet: bool,
}

impl Settings {
    pub fn resolve(cli: Overrides, file: FileConfig) -> Result<Self> {
        let defaults = IdBounds::default();
        let uid = IdRange::new(
            cli.uid_min.or(file.uid_min).unwrap_or(defaults.uid.min),
            cli.uid_max.or(file.uid_max).unwrap_or(defaults.uid.max),
        );
        let gid = IdRange::new(
            cli.gid_min.or(file.gid_min).unwrap_or(defaults.gid.min),
            cli.gid_max.or(file.gid_max).unwrap_or(defaults.gid.max),
        );
        if uid.min > uid.max {
            bail!("uid range is empty: {} > {}", uid.min, uid.max);
        }
        if gid.min > gid.max {
            bail!("gid range is empty: {} > {}", gid.min, gid.max);
        }

        Ok(Self {
            options: MergeOptions {
                source_users: cli.sur.or(file.sur).unwrap_or_default(),
                source_groups: cli.sgr.or(file.sgr).unwrap_or_default(),
                dest_users: cli.dur.or(file.dur).unwrap_or_default(),
                dest_groups: cli.dgr.or(file.dgr).unwrap_or_default(),
                bounds: IdBounds { uid, gid },
            },
            quiet: cli.quiet || file.quiet.unwrap_or(false),
        })
    }
}

fn unquote(s: &str) -> &str {
    for q in ['"', '\''] {
        if let Some(inner) = s.strip_prefix(q).and_then(|s| s.strip_suffix(q)) {
            return inner;
        }
    }
    s
}

fn parse_id(idx: usize, key: &str, value: &str) -> Result<u32> {
    value.parse::<u32>().with_context(|| {
        format!(
            "line {}: {key} must be an unsigned integer, got `{value}`",
            idx + 1
        )
    })
}

fn parse_bool(s: &str) -> bool {
    matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
