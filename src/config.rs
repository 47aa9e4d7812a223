use serde::Deserialize;
use std::path::PathBuf;

use crate::server::{DEFAULT_CACHE_TTL, DEFAULT_MAX_AGE_SECS};

const DEFAULT_PORT: u16 = 8080;

/// Settings read from the YAML config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    port: Option<u16>,
    secret_key: Option<String>,
    cache_ttl_secs: u64,
    max_age_secs: u64,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            database_path: None,
            port: None,
            secret_key: None,
            cache_ttl_secs: DEFAULT_CACHE_TTL.as_secs(),
            max_age_secs: DEFAULT_MAX_AGE_SECS,
        }
    }
}

/// Producer configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Path to the content database
    pub database_path: PathBuf,
    /// Shared secret Replicas must send as `key`; open when unset
    pub secret_key: Option<String>,
    /// Lifetime of cached result sets between invalidations
    pub cache_ttl_secs: u64,
    /// `max-age` advertised in `Cache-Control`
    pub max_age_secs: u64,
    /// Path the configuration was read from
    pub config_path: PathBuf,
}

impl ServerConfig {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config_path = config_path
            .or_else(|| std::env::var("SYNDIC_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(Self::default_config_path);

        let file = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::ReadError(config_path.clone(), e))?;
            serde_yaml::from_str::<Option<ConfigFile>>(&contents)
                .map_err(|e| ConfigError::ParseError(config_path.clone(), e))?
                .unwrap_or_default()
        } else {
            ConfigFile::default()
        };

        let port = match std::env::var("SYNDIC_PORT") {
            Ok(port) => port
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SYNDIC_PORT", port))?,
            Err(_) => file.port.unwrap_or(DEFAULT_PORT),
        };

        let database_path = std::env::var("SYNDIC_DATABASE_PATH")
            .map(PathBuf::from)
            .ok()
            .or(file.database_path)
            .unwrap_or_else(Self::default_database_path);

        Ok(Self {
            port,
            database_path,
            secret_key: file.secret_key.filter(|k| !k.is_empty()),
            cache_ttl_secs: file.cache_ttl_secs,
            max_age_secs: file.max_age_secs,
            config_path,
        })
    }

    /// Default config file path: ~/.config/syndic/config.yaml
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("syndic")
            .join("config.yaml")
    }

    /// Default database path: ~/.local/share/syndic/content.db
    pub fn default_database_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("syndic")
            .join("content.db")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidValue(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(
                    f,
                    "Failed to parse config file '{}': {}",
                    path.display(),
                    e
                )
            }
            ConfigError::InvalidValue(name, value) => {
                write!(f, "Invalid value for {}: '{}'", name, value)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_load_no_file_uses_defaults() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nonexistent.yaml");

        let config = ServerConfig::load(Some(config_path.clone())).unwrap();
        assert_eq!(config.secret_key, None);
        assert_eq!(config.cache_ttl_secs, 300);
        assert_eq!(config.max_age_secs, 300);
        assert_eq!(config.config_path, config_path);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "database_path: /custom/path/content.db").unwrap();
        writeln!(file, "secret_key: hunter2").unwrap();
        writeln!(file, "cache_ttl_secs: 60").unwrap();
        writeln!(file, "max_age_secs: 30").unwrap();

        let config = ServerConfig::load(Some(config_path)).unwrap();
        assert_eq!(config.secret_key.as_deref(), Some("hunter2"));
        assert_eq!(config.cache_ttl_secs, 60);
        assert_eq!(config.max_age_secs, 30);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        std::fs::File::create(&config_path).unwrap();

        let config = ServerConfig::load(Some(config_path)).unwrap();
        assert_eq!(config.max_age_secs, DEFAULT_MAX_AGE_SECS);
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = ServerConfig::load(Some(config_path));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
