//! Standby configuration inside a replica data directory.
//!
//! A bootstrapped replica carries:
//! - `PG_VERSION`, written by the base backup
//! - `primary_conninfo` and `primary_slot_name` in `postgresql.auto.conf`
//! - an empty `standby.signal`, written last
//!
//! The signal file is the standby marker: it only appears after the
//! connection settings are durable, so its presence together with a
//! readable configuration means the directory is a valid standby.

use std::fs;
use std::io;
use std::path::Path;

use super::errors::{BootstrapError, BootstrapResult};
use crate::topology::write_atomic;

pub const STANDBY_SIGNAL_FILE: &str = "standby.signal";
pub const AUTO_CONF_FILE: &str = "postgresql.auto.conf";
pub const VERSION_FILE: &str = "PG_VERSION";

const CONNINFO_KEY: &str = "primary_conninfo";
const SLOT_KEY: &str = "primary_slot_name";

/// Upstream settings a standby streams with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandbyConfig {
    pub primary_conninfo: String,
    pub primary_slot_name: String,
}

/// Write the connection settings, then the standby marker.
pub fn write_standby_config(data_dir: &Path, config: &StandbyConfig) -> io::Result<()> {
    let conf_path = data_dir.join(AUTO_CONF_FILE);
    let existing = match fs::read_to_string(&conf_path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    let mut content: String = existing
        .lines()
        .filter(|line| {
            !matches!(parse_setting(line), Some((key, _)) if key == CONNINFO_KEY || key == SLOT_KEY)
        })
        .map(|line| format!("{}\n", line))
        .collect();
    content.push_str(&format!(
        "{} = {}\n",
        CONNINFO_KEY,
        quote_conf_value(&config.primary_conninfo)
    ));
    content.push_str(&format!(
        "{} = {}\n",
        SLOT_KEY,
        quote_conf_value(&config.primary_slot_name)
    ));

    write_atomic(&conf_path, content.as_bytes())?;
    write_atomic(&data_dir.join(STANDBY_SIGNAL_FILE), b"")
}

/// Read the standby settings; `None` when either is missing.
pub fn read_standby_config(data_dir: &Path) -> BootstrapResult<Option<StandbyConfig>> {
    let content = match fs::read_to_string(data_dir.join(AUTO_CONF_FILE)) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(BootstrapError::Io(e.to_string())),
    };

    let mut conninfo = None;
    let mut slot = None;
    for line in content.lines() {
        match parse_setting(line) {
            Some((key, value)) if key == CONNINFO_KEY => conninfo = Some(value),
            Some((key, value)) if key == SLOT_KEY => slot = Some(value),
            _ => {}
        }
    }

    Ok(match (conninfo, slot) {
        (Some(primary_conninfo), Some(primary_slot_name))
            if !primary_conninfo.is_empty() && !primary_slot_name.is_empty() =>
        {
            Some(StandbyConfig {
                primary_conninfo,
                primary_slot_name,
            })
        }
        _ => None,
    })
}

/// Whether `data_dir` holds a complete standby.
pub fn is_valid_standby(data_dir: &Path) -> bool {
    data_dir.join(STANDBY_SIGNAL_FILE).is_file()
        && data_dir.join(VERSION_FILE).is_file()
        && matches!(read_standby_config(data_dir), Ok(Some(_)))
}

/// Whether `data_dir` exists and has any entries.
pub fn has_entries(data_dir: &Path) -> io::Result<bool> {
    match fs::read_dir(data_dir) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove everything inside `data_dir`, keeping (or creating) the directory.
pub fn wipe_data_dir(data_dir: &Path) -> io::Result<()> {
    fs::create_dir_all(data_dir)?;
    for entry in fs::read_dir(data_dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

fn quote_conf_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Parse `key = 'value'` (or an unquoted value); comments are ignored.
fn parse_setting(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (key, rest) = line.split_once('=')?;
    let key = key.trim().to_string();
    let rest = rest.trim();

    let Some(quoted) = rest.strip_prefix('\'') else {
        let value = rest.split('#').next().unwrap_or("").trim();
        return Some((key, value.to_string()));
    };

    let mut value = String::new();
    let mut chars = quoted.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    value.push(escaped);
                }
            }
            '\'' if chars.peek() == Some(&'\'') => {
                chars.next();
                value.push('\'');
            }
            '\'' => return Some((key, value)),
            c => value.push(c),
        }
    }
    // Unterminated quote
    None
}
