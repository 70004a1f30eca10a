//! Settings for the `famledger` binary.
//!
//! Read from an optional `famledger.toml` and then from environment variables
//! prefixed with `FAMLEDGER`, nested keys separated by `__`
//! (`FAMLEDGER__UNDO__CAPACITY=5`).

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct App {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// Where the ledger lives.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Database {
    /// Gone when the process exits.
    #[default]
    Memory,
    Sqlite(String),
    /// In-memory store loaded from and written back to one sealed file.
    Sealed(PathBuf),
}

#[derive(Debug, Deserialize)]
pub struct Undo {
    /// Keep checkpoints as files here; in memory when unset.
    pub dir: Option<PathBuf>,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
}

impl Default for Undo {
    fn default() -> Self {
        Self {
            dir: None,
            capacity: default_capacity(),
            retention_hours: default_retention_hours(),
        }
    }
}

fn default_capacity() -> usize {
    engine::DEFAULT_CAPACITY
}

fn default_retention_hours() -> u64 {
    24
}

#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub app: App,
    #[serde(default)]
    pub database: Database,
    #[serde(default)]
    pub undo: Undo,
}

impl Settings {
    /// `path` must exist when given; `famledger.toml` is optional.
    pub fn new(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name("famledger").required(false),
        };
        let settings = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix("FAMLEDGER").separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_sources() {
        let settings: Settings = Config::builder()
            .build()
            .and_then(Config::try_deserialize)
            .unwrap();
        assert_eq!(settings.app.level, "info");
        assert!(matches!(settings.database, Database::Memory));
        assert_eq!(settings.undo.capacity, 10);
        assert_eq!(settings.undo.retention_hours, 24);
        assert!(settings.undo.dir.is_none());
    }

    #[test]
    fn reads_toml() {
        let toml = r#"
            database = { sealed = "/tmp/ledger.sealed" }

            [app]
            level = "debug"

            [undo]
            dir = "/tmp/undo"
            capacity = 3
        "#;
        let settings: Settings = Config::builder()
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()
            .and_then(Config::try_deserialize)
            .unwrap();
        assert_eq!(settings.app.level, "debug");
        let Database::Sealed(path) = &settings.database else {
            panic!("expected sealed storage, got {:?}", settings.database);
        };
        assert_eq!(path, Path::new("/tmp/ledger.sealed"));
        assert_eq!(settings.undo.capacity, 3);
        assert_eq!(settings.undo.dir.as_deref(), Some(Path::new("/tmp/undo")));
    }
}
