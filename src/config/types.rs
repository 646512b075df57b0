//! Core configuration types and loading.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::limits::StorageLimits;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Backing store location.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Account and character capacity limits.
    #[serde(default)]
    pub limits: StorageLimits,
    /// Chat channel persistence settings.
    #[serde(default)]
    pub chat: ChatConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file, or `:memory:`.
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "manaserv.db".to_string()
}

/// Chat channel persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Seconds between periodic flushes of accounts and public channels
    /// (default: 300). Zero disables the periodic flush.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

impl ChatConfig {
    pub fn flush_interval(&self) -> Option<Duration> {
        (self.flush_interval_secs > 0).then(|| Duration::from_secs(self.flush_interval_secs))
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

fn default_flush_interval_secs() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.database.path, "manaserv.db");
        assert_eq!(config.limits.max_characters_per_account, 3);
        assert_eq!(config.chat.flush_interval(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn zero_interval_disables_flush() {
        let config: Config = toml::from_str("[chat]\nflush_interval_secs = 0").unwrap();
        assert_eq!(config.chat.flush_interval(), None);
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[database]\npath = \":memory:\"\n\n[limits]\nmax_characters_per_account = 4"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.database.path, ":memory:");
        assert_eq!(config.limits.max_characters_per_account, 4);
    }

    #[test]
    fn load_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[database\npath = 1").unwrap();

        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
