//! Configuration management.
//!
//! Settings come from defaults, then a TOML file, then `BLOCKCACHE_*`
//! environment variables. Malformed values are logged and ignored.

use crate::models::ObjectKind;
use crate::observability::LogFormat;
use crate::storage::{DEFAULT_EVICTION_BATCH_SIZE, DEFAULT_MAX_SIZE_BYTES};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Application directory name under the platform data and config dirs.
const APP_DIR: &str = "blockcache";

/// One day, the default TTL for documents.
const DOCUMENT_TTL_SECS: u64 = 86_400;

/// One hour, the default TTL for listings.
const LISTING_TTL_SECS: u64 = 3_600;

/// Main configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding the snapshot files.
    pub data_dir: PathBuf,
    /// Alias index snapshot file name, relative to `data_dir`.
    pub alias_db_file: String,
    /// Block cache snapshot file name, relative to `data_dir`.
    pub cache_db_file: String,
    /// Storage and flushing settings.
    pub storage: StorageSettings,
    /// Default TTL per object kind.
    pub ttl: TtlSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Storage and flushing settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    /// Block cache size budget in bytes.
    pub max_cache_bytes: u64,
    /// Rows evicted per batch when over budget.
    pub eviction_batch_size: usize,
    /// Seconds between background flush checks.
    pub flush_interval_secs: u64,
    /// Minimum seconds between two flushes of the same store.
    pub min_flush_interval_secs: u64,
    /// Store lock timeout in milliseconds.
    pub lock_timeout_ms: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            max_cache_bytes: DEFAULT_MAX_SIZE_BYTES,
            eviction_batch_size: DEFAULT_EVICTION_BATCH_SIZE,
            flush_interval_secs: 30,
            min_flush_interval_secs: 5,
            lock_timeout_ms: 5_000,
        }
    }
}

impl StorageSettings {
    /// Store lock timeout.
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Period of the background flush task.
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    /// Minimum time between flushes of one store.
    #[must_use]
    pub const fn min_flush_interval(&self) -> Duration {
        Duration::from_secs(self.min_flush_interval_secs)
    }
}

/// Default TTL in seconds per object kind. Zero disables expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlSettings {
    /// Pages.
    pub page: u64,
    /// Databases.
    pub database: u64,
    /// Blocks.
    pub block: u64,
    /// Search result listings.
    pub search_results: u64,
    /// Database query listings.
    pub database_query_results: u64,
}

impl Default for TtlSettings {
    fn default() -> Self {
        Self {
            page: DOCUMENT_TTL_SECS,
            database: DOCUMENT_TTL_SECS,
            block: DOCUMENT_TTL_SECS,
            search_results: LISTING_TTL_SECS,
            database_query_results: LISTING_TTL_SECS,
        }
    }
}

impl TtlSettings {
    /// TTL for `kind`, `None` when expiry is disabled.
    #[must_use]
    pub const fn for_kind(&self, kind: ObjectKind) -> Option<u64> {
        let secs = match kind {
            ObjectKind::Page => self.page,
            ObjectKind::Database => self.database,
            ObjectKind::Block => self.block,
            ObjectKind::SearchResults => self.search_results,
            ObjectKind::DatabaseQueryResults => self.database_query_results,
        };
        if secs == 0 { None } else { Some(secs) }
    }

    /// No expiry for any kind.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            page: 0,
            database: 0,
            block: 0,
            search_results: 0,
            database_query_results: 0,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoggingSettings {
    /// Output format.
    pub format: LogFormat,
    /// Default filter directive (for example `info` or `blockcache=debug`).
    pub level: Option<String>,
    /// Optional log file; logs go to stderr otherwise.
    pub file: Option<PathBuf>,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Data directory.
    pub data_dir: Option<String>,
    /// Alias index file name.
    pub alias_db_file: Option<String>,
    /// Block cache file name.
    pub cache_db_file: Option<String>,
    /// Storage section.
    pub storage: Option<ConfigFileStorage>,
    /// TTL section.
    pub ttl: Option<ConfigFileTtl>,
    /// Logging section.
    pub logging: Option<ConfigFileLogging>,
}

/// Storage section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileStorage {
    /// Cache size budget in bytes.
    pub max_cache_bytes: Option<u64>,
    /// Eviction batch size.
    pub eviction_batch_size: Option<usize>,
    /// Flush check period in seconds.
    pub flush_interval_secs: Option<u64>,
    /// Minimum flush spacing in seconds.
    pub min_flush_interval_secs: Option<u64>,
    /// Lock timeout in milliseconds.
    pub lock_timeout_ms: Option<u64>,
}

/// TTL section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileTtl {
    /// Pages.
    pub page: Option<u64>,
    /// Databases.
    pub database: Option<u64>,
    /// Blocks.
    pub block: Option<u64>,
    /// Search listings.
    pub search_results: Option<u64>,
    /// Database query listings.
    pub database_query_results: Option<u64>,
}

/// Logging section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileLogging {
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Filter directive.
    pub level: Option<String>,
    /// Log file path.
    pub file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = directories::BaseDirs::new().map_or_else(
            || PathBuf::from(".blockcache"),
            |dirs| dirs.data_local_dir().join(APP_DIR),
        );
        Self {
            data_dir,
            alias_db_file: "aliases.db".to_string(),
            cache_db_file: "block_cache.db".to_string(),
            storage: StorageSettings::default(),
            ttl: TtlSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> crate::Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| crate::Error::OperationFailed {
                operation: "read_config_file".to_string(),
                cause: format!("{}: {e}", path.display()),
            })?;

        Self::from_toml(&contents)
    }

    /// Parses configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for [`ConfigFile`].
    pub fn from_toml(contents: &str) -> crate::Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| crate::Error::OperationFailed {
                operation: "parse_config_file".to_string(),
                cause: e.to_string(),
            })?;

        Ok(Self::from_config_file(file))
    }

    /// Loads configuration from the default location.
    ///
    /// Checks the platform config dir, then `~/.config/blockcache/`.
    /// Returns default configuration if no config file is found or the file
    /// is unreadable.
    #[must_use]
    pub fn load_default() -> Self {
        let Some(base_dirs) = directories::BaseDirs::new() else {
            return Self::default();
        };

        let candidates = [
            base_dirs.config_dir().join(APP_DIR).join("config.toml"),
            base_dirs
                .home_dir()
                .join(".config")
                .join(APP_DIR)
                .join("config.toml"),
        ];

        for candidate in candidates.iter().filter(|path| path.exists()) {
            match Self::load_from_file(candidate) {
                Ok(config) => return config,
                Err(e) => tracing::warn!(
                    path = %candidate.display(),
                    error = %e,
                    "Ignoring unreadable config file"
                ),
            }
        }

        Self::default()
    }

    /// Converts a `ConfigFile` to `Config`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(data_dir) = file.data_dir {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Some(name) = file.alias_db_file {
            config.alias_db_file = name;
        }
        if let Some(name) = file.cache_db_file {
            config.cache_db_file = name;
        }
        if let Some(storage) = file.storage {
            let s = &mut config.storage;
            s.max_cache_bytes = storage.max_cache_bytes.unwrap_or(s.max_cache_bytes);
            s.eviction_batch_size = storage.eviction_batch_size.unwrap_or(s.eviction_batch_size);
            s.flush_interval_secs = storage.flush_interval_secs.unwrap_or(s.flush_interval_secs);
            s.min_flush_interval_secs = storage
                .min_flush_interval_secs
                .unwrap_or(s.min_flush_interval_secs);
            s.lock_timeout_ms = storage.lock_timeout_ms.unwrap_or(s.lock_timeout_ms);
        }
        if let Some(ttl) = file.ttl {
            let t = &mut config.ttl;
            t.page = ttl.page.unwrap_or(t.page);
            t.database = ttl.database.unwrap_or(t.database);
            t.block = ttl.block.unwrap_or(t.block);
            t.search_results = ttl.search_results.unwrap_or(t.search_results);
            t.database_query_results = ttl
                .database_query_results
                .unwrap_or(t.database_query_results);
        }
        if let Some(logging) = file.logging {
            if let Some(format) = logging.format {
                config.set_log_format(&format);
            }
            config.logging.level = logging.level;
            config.logging.file = logging.file.map(PathBuf::from);
        }

        config
    }

    /// Applies `BLOCKCACHE_*` environment overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Applies overrides from `lookup`, which maps variable names to values.
    #[must_use]
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("BLOCKCACHE_DATA_DIR").filter(|v| !v.trim().is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        override_parsed(&lookup, "BLOCKCACHE_MAX_CACHE_BYTES", &mut self.storage.max_cache_bytes);
        override_parsed(
            &lookup,
            "BLOCKCACHE_FLUSH_INTERVAL_SECS",
            &mut self.storage.flush_interval_secs,
        );
        override_parsed(&lookup, "BLOCKCACHE_LOCK_TIMEOUT_MS", &mut self.storage.lock_timeout_ms);
        if let Some(format) = lookup("BLOCKCACHE_LOG_FORMAT") {
            self.set_log_format(&format);
        }
        self
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Full path of the alias index snapshot.
    #[must_use]
    pub fn alias_db_path(&self) -> PathBuf {
        self.data_dir.join(&self.alias_db_file)
    }

    /// Full path of the block cache snapshot.
    #[must_use]
    pub fn cache_db_path(&self) -> PathBuf {
        self.data_dir.join(&self.cache_db_file)
    }

    fn set_log_format(&mut self, raw: &str) {
        match LogFormat::parse(raw) {
            Some(format) => self.logging.format = format,
            None => tracing::warn!(value = raw, "Unknown log format, keeping default"),
        }
    }
}

fn override_parsed<F, T>(lookup: &F, name: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(name) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(variable = name, value = %raw, "Ignoring malformed value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.storage.max_cache_bytes, 100 * 1024 * 1024);
        assert_eq!(config.storage.eviction_batch_size, 1000);
        assert_eq!(config.storage.flush_interval(), Duration::from_secs(30));
        assert_eq!(config.storage.min_flush_interval(), Duration::from_secs(5));
        assert_eq!(config.storage.lock_timeout(), Duration::from_millis(5000));
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.alias_db_path().ends_with("aliases.db"));
    }

    #[test]
    fn test_ttl_for_kind() {
        let ttl = TtlSettings::default();
        assert_eq!(ttl.for_kind(ObjectKind::Page), Some(86_400));
        assert_eq!(ttl.for_kind(ObjectKind::SearchResults), Some(3_600));

        let ttl = TtlSettings {
            block: 0,
            ..TtlSettings::default()
        };
        assert_eq!(ttl.for_kind(ObjectKind::Block), None);
        assert_eq!(TtlSettings::disabled().for_kind(ObjectKind::Page), None);
    }

    #[test]
    fn test_from_toml() {
        let config = Config::from_toml(
            r#"
            data_dir = "/tmp/blockcache"
            cache_db_file = "cache.sqlite"

            [storage]
            max_cache_bytes = 2048
            lock_timeout_ms = 250

            [ttl]
            page = 60
            search_results = 0

            [logging]
            format = "json"
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.cache_db_path(), PathBuf::from("/tmp/blockcache/cache.sqlite"));
        assert_eq!(config.alias_db_file, "aliases.db");
        assert_eq!(config.storage.max_cache_bytes, 2048);
        assert_eq!(config.storage.eviction_batch_size, 1000);
        assert_eq!(config.storage.lock_timeout(), Duration::from_millis(250));
        assert_eq!(config.ttl.for_kind(ObjectKind::Page), Some(60));
        assert_eq!(config.ttl.for_kind(ObjectKind::SearchResults), None);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_invalid_toml() {
        let result = Config::from_toml("storage = [");
        assert!(matches!(
            result,
            Err(crate::Error::OperationFailed { ref operation, .. }) if operation == "parse_config_file"
        ));
    }

    #[test]
    fn test_unknown_log_format_keeps_default() {
        let config = Config::from_toml("[logging]\nformat = \"xml\"").unwrap();
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[storage]\nflush_interval_secs = 7\n").unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.storage.flush_interval_secs, 7);
        assert!(Config::load_from_file(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("BLOCKCACHE_DATA_DIR", "/var/lib/blockcache"),
            ("BLOCKCACHE_MAX_CACHE_BYTES", "4096"),
            ("BLOCKCACHE_FLUSH_INTERVAL_SECS", "not-a-number"),
            ("BLOCKCACHE_LOCK_TIMEOUT_MS", " 100 "),
            ("BLOCKCACHE_LOG_FORMAT", "JSON"),
        ]);
        let config = Config::default()
            .with_overrides_from(|name| env.get(name).map(ToString::to_string));

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/blockcache"));
        assert_eq!(config.storage.max_cache_bytes, 4096);
        assert_eq!(config.storage.flush_interval_secs, 30);
        assert_eq!(config.storage.lock_timeout_ms, 100);
        assert_eq!(config.logging.format, LogFormat::Json);
    }
}
