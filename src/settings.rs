//! Per-collection settings, cloned into every bred or derived collection.
//!
//! Settings can be built in code or read from a configuration file, in which
//! case any value may be overridden through `NESTDB_` prefixed environment
//! variables (`NESTDB_UPDATE__SORT=true`, `NESTDB_DEFAULT_FORMAT=sqlite`).

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;

/// What is refreshed automatically after a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UpdatePolicy {
    /// Maintain indexes, hashes and views.
    pub indexes: bool,
    /// Re-sort by the last sort criterion.
    pub sort: bool,
    /// Move the pointer to the last inserted record.
    pub pointer: bool,
}
impl Default for UpdatePolicy {
    fn default() -> Self {
        Self {
            indexes: true,
            sort: false,
            pointer: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub update: UpdatePolicy,
    /// Keep the query conditions after they were executed.
    pub retain_query: bool,
    /// Format used when a file name has no registered extension.
    pub default_format: Option<String>,
    /// Field under which joined records are nested.
    pub join_field: String,
}
impl Default for Settings {
    fn default() -> Self {
        Self {
            update: UpdatePolicy::default(),
            retain_query: false,
            default_format: None,
            join_field: String::from("joined"),
        }
    }
}

fn overrides() -> Environment {
    Environment::with_prefix("NESTDB")
        .prefix_separator("_")
        .separator("__")
}

impl Settings {
    /// Reads settings from `path` (any format the config crate recognizes by
    /// extension), then applies environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(path))
            .add_source(overrides())
            .build()?;
        Ok(settings.try_deserialize::<Settings>()?)
    }
    /// Environment overrides on top of the defaults, for hosts without a file.
    pub fn from_env() -> Result<Self> {
        let settings = Config::builder()
            .add_source(overrides())
            .build()?;
        Ok(settings.try_deserialize::<Settings>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_maintain_indexes_only() {
        let settings = Settings::default();
        assert!(settings.update.indexes);
        assert!(!settings.update.sort);
        assert!(!settings.update.pointer);
        assert_eq!(settings.join_field, "joined");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(file, "retain_query = true\n[update]\npointer = true").expect("write");
        let path = file.path().to_str().expect("utf8 path").to_string();
        let settings = Settings::load(&path).expect("settings load");
        assert!(settings.retain_query);
        assert!(settings.update.pointer);
        assert!(settings.update.indexes);
        assert_eq!(settings.join_field, "joined");
    }
}
