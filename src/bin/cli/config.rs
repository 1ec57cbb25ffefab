use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use quadstore::{DatabaseConfig, StoreError};

/// File written by `init` inside the database directory.
pub const DATABASE_CONFIG_FILE: &str = "quadstore.toml";

/// Per-user CLI settings, read from `--cli-config` or the platform config directory.
///
/// ```toml
/// [database]
/// default = "/var/lib/quadstore"
/// ```
#[derive(Debug, Default)]
pub struct CliConfig {
    source: Option<PathBuf>,
    settings: CliSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CliSettings {
    #[serde(default)]
    database: DatabaseDefaults,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatabaseDefaults {
    default: Option<PathBuf>,
}

impl CliConfig {
    /// Reads `explicit`, or the platform default location. A missing file means defaults.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let source = explicit.or_else(platform_config_path);
        let settings = match &source {
            Some(path) if path.is_file() => parse_settings(path)?,
            _ => CliSettings::default(),
        };
        Ok(Self { source, settings })
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Database directory used when `--db` is not given.
    pub fn default_directory(&self) -> Option<&Path> {
        self.settings.database.default.as_deref()
    }

    /// Picks the database configuration for a command.
    ///
    /// An explicit `--config` file wins; otherwise the directory comes from `--db` or the
    /// CLI default, and its `quadstore.toml` is used when present. `--db` always overrides
    /// the directory.
    pub fn resolve(
        &self,
        config_file: Option<&Path>,
        db: Option<&Path>,
    ) -> Result<DatabaseConfig, ConfigError> {
        if let Some(file) = config_file {
            let mut config = database_config(file)?;
            if let Some(dir) = db {
                config.directory = dir.to_path_buf();
            }
            return Ok(config);
        }
        let dir = db
            .or_else(|| self.default_directory())
            .ok_or(ConfigError::NoDatabase)?
            .to_path_buf();
        let file = dir.join(DATABASE_CONFIG_FILE);
        if !file.is_file() {
            return Ok(DatabaseConfig::new(dir));
        }
        let mut config = database_config(&file)?;
        config.directory = dir;
        Ok(config)
    }
}

fn parse_settings(path: &Path) -> Result<CliSettings, ConfigError> {
    let text = fs::read_to_string(path).map_err(|err| ConfigError::CliRead(path.into(), err))?;
    toml::from_str(&text).map_err(|err| ConfigError::CliParse(path.into(), err))
}

fn database_config(path: &Path) -> Result<DatabaseConfig, ConfigError> {
    DatabaseConfig::load(path).map_err(|err| ConfigError::Database(path.into(), err))
}

/// `<config dir>/quadstore/cli.toml`, when the platform has a config directory.
pub fn platform_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("quadstore").join("cli.toml"))
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read CLI settings {}: {1}", .0.display())]
    CliRead(PathBuf, #[source] io::Error),
    #[error("invalid CLI settings {}: {1}", .0.display())]
    CliParse(PathBuf, #[source] toml::de::Error),
    #[error("cannot load database config {}: {1}", .0.display())]
    Database(PathBuf, #[source] StoreError),
    #[error("no database given; pass --db or set [database] default in the CLI settings")]
    NoDatabase,
}
