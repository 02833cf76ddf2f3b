use crate::core::db::connection::check_journal_mode;
use crate::core::db::{ConnectionOptions, TransactionMode};
use crate::core::{Result, SqlBaseError};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration structure parsed from a TOML file.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
}

/// Database connection settings.
#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    /// Connection descriptor, as accepted by `ConnectionManager::connect`
    pub descriptor: String,
    pub busy_timeout_ms: Option<u64>,
    #[serde(default = "default_foreign_keys")]
    pub foreign_keys: bool,
    pub journal_mode: Option<String>,
    #[serde(default)]
    pub transaction_behavior: TransactionMode,
}

fn default_foreign_keys() -> bool {
    true
}

impl Config {
    /// Parses configuration from TOML text and validates it.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| SqlBaseError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.database.descriptor.trim().is_empty() {
            return Err(SqlBaseError::Config(
                "database.descriptor must not be empty".to_string(),
            ));
        }
        if let Some(mode) = &self.database.journal_mode {
            check_journal_mode(mode)?;
        }
        Ok(())
    }

    /// Connection options described by this configuration
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            foreign_keys: self.database.foreign_keys,
            busy_timeout: self.database.busy_timeout_ms.map(Duration::from_millis),
            journal_mode: self
                .database
                .journal_mode
                .as_ref()
                .map(|m| m.to_ascii_uppercase()),
            transaction_mode: self.database.transaction_behavior,
        }
    }
}

/// Loads configuration from a TOML file at the given path.
///
/// # Arguments
///
/// * `path` - The file path to the TOML configuration file.
///
/// # Example
///
/// ```no_run
/// let config = sqlbase::config::load_config("sqlbase.toml").expect("Failed to load config");
/// println!("{:?}", config);
/// ```
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    Config::from_toml_str(&content)
}

/// Default location of the configuration file, `<config dir>/sqlbase/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sqlbase").join("config.toml"))
}
