use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_INTERVAL_SECS: u64 = 600;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_CYCLE_DEADLINE_SECS: u64 = 300;
pub const DEFAULT_PER_PAGE: u32 = 100;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// A replicated content category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub category: String,
    /// Mirror items of this category into local entities
    #[serde(default)]
    pub local_content: bool,
}

impl ResourceConfig {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            local_content: false,
        }
    }

    pub fn with_local_content(mut self) -> Self {
        self.local_content = true;
        self
    }
}

/// Timing and paging of sync cycles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub interval_secs: u64,
    pub request_timeout_secs: u64,
    pub cycle_deadline_secs: u64,
    pub per_page: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            cycle_deadline_secs: DEFAULT_CYCLE_DEADLINE_SECS,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl SyncSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cycle_deadline(&self) -> Duration {
        Duration::from_secs(self.cycle_deadline_secs)
    }
}

/// Replica configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Producer base URL
    pub producer_url: ConfigValue<Option<String>>,
    /// Shared secret sent as `key`
    #[serde(skip_serializing)]
    pub producer_key: ConfigValue<Option<String>>,
    /// Path to the SQLite database
    pub database_path: ConfigValue<PathBuf>,
    /// Directory for mirrored media files
    pub media_dir: ConfigValue<PathBuf>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    pub resources: Vec<ResourceConfig>,
    pub include_global_presentation: bool,
    pub sync: SyncSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ProducerSection {
    url: Option<String>,
    key: Option<String>,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    producer: Option<ProducerSection>,
    database_path: Option<PathBuf>,
    media_dir: Option<PathBuf>,
    resources: Vec<ResourceConfig>,
    include_global_presentation: Option<bool>,
    sync: Option<SyncSettings>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut producer_url = ConfigValue::new(None, ConfigSource::Default);
        let mut producer_key = ConfigValue::new(None, ConfigSource::Default);
        let mut database_path = ConfigValue::new(
            Self::default_data_dir().join("replica.db"),
            ConfigSource::Default,
        );
        let mut media_dir =
            ConfigValue::new(Self::default_data_dir().join("media"), ConfigSource::Default);
        let mut config_file = None;
        let mut resources = Vec::new();
        let mut include_global_presentation = true;
        let mut sync = SyncSettings::default();

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str::<Option<ConfigFile>>(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?
                .unwrap_or_default();

            config_file = Some(path.clone());

            if let Some(producer) = file_config.producer {
                if let Some(url) = producer.url {
                    producer_url = ConfigValue::new(Some(url), ConfigSource::File);
                }
                if let Some(key) = producer.key {
                    producer_key = ConfigValue::new(Some(key), ConfigSource::File);
                }
            }
            if let Some(db_path) = file_config.database_path {
                database_path = ConfigValue::new(resolve_relative(&path, db_path), ConfigSource::File);
            }
            if let Some(dir) = file_config.media_dir {
                media_dir = ConfigValue::new(resolve_relative(&path, dir), ConfigSource::File);
            }
            resources = file_config.resources;
            if let Some(include) = file_config.include_global_presentation {
                include_global_presentation = include;
            }
            if let Some(settings) = file_config.sync {
                sync = settings;
            }
        }

        // Apply environment variable overrides
        if let Ok(db_path) = std::env::var("SYNDIC_REPLICA_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Ok(url) = std::env::var("SYNDIC_PRODUCER_URL") {
            producer_url = ConfigValue::new(Some(url), ConfigSource::Environment);
        }
        if let Ok(key) = std::env::var("SYNDIC_PRODUCER_KEY") {
            producer_key = ConfigValue::new(Some(key), ConfigSource::Environment);
        }

        let config = Self {
            producer_url,
            producer_key,
            database_path,
            media_dir,
            config_file,
            resources,
            include_global_presentation,
            sync,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for resource in &self.resources {
            syndic_core::resource::validate_category(&resource.category)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        let durations = [
            ("sync.interval_secs", self.sync.interval_secs),
            ("sync.request_timeout_secs", self.sync.request_timeout_secs),
            ("sync.cycle_deadline_secs", self.sync.cycle_deadline_secs),
        ];
        for (name, secs) in durations {
            if secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Default config directory (platform-specific)
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("syndic-replica")
    }

    /// Default data directory (platform-specific)
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("syndic-replica")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

/// Resolves relative paths against the config file's directory.
fn resolve_relative(config_path: &Path, path: PathBuf) -> PathBuf {
    if path.is_relative() {
        config_path
            .parent()
            .map(|p| p.join(&path))
            .unwrap_or(path)
    } else {
        path
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
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
    fn test_default_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nonexistent.yaml");

        let config = Config::load(Some(config_path)).unwrap();
        assert!(config
            .database_path
            .value
            .to_string_lossy()
            .contains("replica.db"));
        assert_eq!(config.media_dir.source, ConfigSource::Default);
        assert!(config.resources.is_empty());
        assert!(config.include_global_presentation);
        assert_eq!(config.sync, SyncSettings::default());
        assert_eq!(config.config_file, None);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "producer:").unwrap();
        writeln!(file, "  url: http://producer.example").unwrap();
        writeln!(file, "  key: s3cret").unwrap();
        writeln!(file, "database_path: data/replica.db").unwrap();
        writeln!(file, "media_dir: /var/media").unwrap();
        writeln!(file, "include_global_presentation: false").unwrap();
        writeln!(file, "resources:").unwrap();
        writeln!(file, "  - category: articles").unwrap();
        writeln!(file, "    local_content: true").unwrap();
        writeln!(file, "  - category: events").unwrap();
        writeln!(file, "sync:").unwrap();
        writeln!(file, "  interval_secs: 60").unwrap();

        let config = Config::load(Some(config_path.clone())).unwrap();
        assert_eq!(config.config_file, Some(config_path));
        assert_eq!(config.media_dir.value, PathBuf::from("/var/media"));
        assert_eq!(config.media_dir.source, ConfigSource::File);
        assert_eq!(
            config.database_path.value,
            temp_dir.path().join("data/replica.db")
        );
        assert_eq!(
            config.resources,
            vec![
                ResourceConfig::new("articles").with_local_content(),
                ResourceConfig::new("events"),
            ]
        );
        assert_eq!(config.sync.interval_secs, 60);
        assert_eq!(config.sync.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
    }

    #[test]
    fn test_invalid_category_rejected() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "resources:").unwrap();
        writeln!(file, "  - category: \"bad category\"").unwrap();

        let err = Config::load(Some(config_path)).unwrap_err();
        assert!(err.to_string().contains("Invalid configuration"));
    }

    #[test]
    fn test_zero_durations_rejected() {
        let temp_dir = tempdir().unwrap();

        for setting in ["interval_secs", "request_timeout_secs", "cycle_deadline_secs"] {
            let config_path = temp_dir.path().join(format!("{}.yaml", setting));
            let mut file = std::fs::File::create(&config_path).unwrap();
            writeln!(file, "sync:").unwrap();
            writeln!(file, "  {}: 0", setting).unwrap();

            let err = Config::load(Some(config_path)).unwrap_err();
            assert!(err.to_string().contains(setting), "{}", err);
        }
    }

    #[test]
    #[ignore] // Run with --ignored; env vars can pollute parallel tests
    fn test_env_var_overrides_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "producer:").unwrap();
        writeln!(file, "  url: http://from-file").unwrap();

        std::env::set_var("SYNDIC_PRODUCER_URL", "http://from-env");

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.producer_url.value.as_deref(), Some("http://from-env"));
        assert_eq!(config.producer_url.source, ConfigSource::Environment);

        std::env::remove_var("SYNDIC_PRODUCER_URL");
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load(Some(config_path));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
