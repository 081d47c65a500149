//! Configuration module for Depot.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::upload::{parse_size, SizePolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_VERSION_MARKER};
use crate::{DepotError, Result};

/// A size given either as a byte count or as a literal like `"40k"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SizeLiteral {
    /// Plain byte count.
    Bytes(u64),
    /// Size literal with an optional `k`/`m`/`g` suffix.
    Text(String),
}

impl SizeLiteral {
    /// Resolve to a byte count.
    pub fn bytes(&self) -> Result<u64> {
        match self {
            SizeLiteral::Bytes(n) => Ok(*n),
            SizeLiteral::Text(s) => parse_size(s),
        }
    }
}

/// Maximum file size setting: one size for everything, or per selector.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MaxFileSize {
    /// A single limit, applied as the wildcard.
    Scalar(SizeLiteral),
    /// Selector (`txt`, `[image]`, `*`) to limit.
    Table(BTreeMap<String, SizeLiteral>),
}

/// Upload configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Process-wide default size policy.
    #[serde(default = "default_max_file_size")]
    pub default_max_file_size: MaxFileSize,
    /// Allowed extensions (empty = unrestricted).
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
    /// Trust the transport's "really uploaded" flag.
    #[serde(default = "default_true")]
    pub use_native_upload_check: bool,
    /// Replace existing records instead of creating new versions.
    #[serde(default)]
    pub replace_file: bool,
    /// Folder path used when a request names none.
    #[serde(default = "default_folder")]
    pub default_folder: String,
}

fn default_max_file_size() -> MaxFileSize {
    MaxFileSize::Scalar(SizeLiteral::Text("10m".to_string()))
}

fn default_true() -> bool {
    true
}

fn default_folder() -> String {
    "Uploads".to_string()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            default_max_file_size: default_max_file_size(),
            allowed_extensions: Vec::new(),
            use_native_upload_check: default_true(),
            replace_file: false,
            default_folder: default_folder(),
        }
    }
}

impl UploadConfig {
    /// Build the default size policy.
    pub fn size_policy(&self) -> Result<SizePolicy> {
        match &self.default_max_file_size {
            MaxFileSize::Scalar(size) => Ok(SizePolicy::wildcard(size.bytes()?)),
            MaxFileSize::Table(table) => {
                let mut policy = SizePolicy::new();
                for (selector, size) in table {
                    policy.set(selector, size.bytes()?);
                }
                Ok(policy)
            }
        }
    }
}

/// Naming configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NamingConfig {
    /// Marker placed before the version counter ("" = zero-padded numbers).
    #[serde(default = "default_version_marker")]
    pub version_marker: String,
    /// Candidate names tried before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Clean declared names before resolving them.
    #[serde(default = "default_true")]
    pub filter_names: bool,
}

fn default_version_marker() -> String {
    DEFAULT_VERSION_MARKER.to_string()
}

fn default_max_attempts() -> usize {
    DEFAULT_MAX_ATTEMPTS
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            version_marker: default_version_marker(),
            max_attempts: default_max_attempts(),
            filter_names: default_true(),
        }
    }
}

/// Content storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the content store.
    #[serde(default = "default_storage_path")]
    pub path: String,
}

fn default_storage_path() -> String {
    "data/assets".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/depot.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file (console only when unset).
    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Upload configuration.
    #[serde(default)]
    pub upload: UploadConfig,
    /// Naming configuration.
    #[serde(default)]
    pub naming: NamingConfig,
    /// Content storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(DepotError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| DepotError::Validation(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `DEPOT_STORAGE_PATH`: Override the content store root
    /// - `DEPOT_DATABASE_PATH`: Override the database file
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("DEPOT_STORAGE_PATH") {
            if !path.is_empty() {
                self.storage.path = path;
            }
        }
        if let Ok(path) = std::env::var("DEPOT_DATABASE_PATH") {
            if !path.is_empty() {
                self.database.path = path;
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Returns an error if:
    /// - A size literal does not parse
    /// - `naming.max_attempts` is zero
    /// - `upload.default_folder` is empty
    pub fn validate(&self) -> Result<()> {
        self.upload.size_policy()?;

        if self.naming.max_attempts == 0 {
            return Err(DepotError::Validation(
                "naming.max_attempts must be greater than zero".to_string(),
            ));
        }
        if self.upload.default_folder.trim().trim_matches('/').trim().is_empty() {
            return Err(DepotError::Validation(
                "upload.default_folder must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::MimeCategories;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(
            config.upload.size_policy().unwrap(),
            SizePolicy::wildcard(10 * 1024 * 1024)
        );
        assert!(config.upload.allowed_extensions.is_empty());
        assert!(config.upload.use_native_upload_check);
        assert!(!config.upload.replace_file);
        assert_eq!(config.upload.default_folder, "Uploads");

        assert_eq!(config.naming.version_marker, "-v");
        assert_eq!(config.naming.max_attempts, 10_000);
        assert!(config.naming.filter_names);

        assert_eq!(config.storage.path, "data/assets");
        assert_eq!(config.database.path, "data/depot.db");

        assert_eq!(config.logging.level, "info");
        assert!(config.logging.file.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[upload]
allowed_extensions = ["jpg", "png", "pdf", "tar.gz"]
use_native_upload_check = false
replace_file = true
default_folder = "Assets/Incoming"

[upload.default_max_file_size]
"*" = "5m"
"[image]" = "1m"
"txt" = 4096

[naming]
version_marker = ""
max_attempts = 50
filter_names = false

[storage]
path = "custom/assets"

[database]
path = "custom/db.sqlite"

[logging]
level = "debug"
file = "custom/logs/depot.log"
"#;

        let config = Config::parse(toml).unwrap();

        let c = MimeCategories::new();
        let policy = config.upload.size_policy().unwrap();
        assert_eq!(policy.max_size_for("zip", &c), Some(5 * 1024 * 1024));
        assert_eq!(policy.max_size_for("jpg", &c), Some(1024 * 1024));
        assert_eq!(policy.max_size_for("txt", &c), Some(4096));
        assert_eq!(config.upload.allowed_extensions.len(), 4);
        assert!(!config.upload.use_native_upload_check);
        assert!(config.upload.replace_file);
        assert_eq!(config.upload.default_folder, "Assets/Incoming");

        assert_eq!(config.naming.version_marker, "");
        assert_eq!(config.naming.max_attempts, 50);
        assert!(!config.naming.filter_names);

        assert_eq!(config.storage.path, "custom/assets");
        assert_eq!(config.database.path, "custom/db.sqlite");

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.file.as_deref(), Some("custom/logs/depot.log"));
    }

    #[test]
    fn test_scalar_max_file_size() {
        let config = Config::parse("[upload]\ndefault_max_file_size = 2048\n").unwrap();
        assert_eq!(
            config.upload.size_policy().unwrap(),
            SizePolicy::wildcard(2048)
        );

        let config = Config::parse("[upload]\ndefault_max_file_size = \"40k\"\n").unwrap();
        assert_eq!(
            config.upload.size_policy().unwrap(),
            SizePolicy::wildcard(40 * 1024)
        );
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[naming]
version_marker = "_rev"
"#;

        let config = Config::parse(toml).unwrap();

        // Specified values
        assert_eq!(config.naming.version_marker, "_rev");

        // Default values
        assert_eq!(config.naming.max_attempts, 10_000);
        assert_eq!(config.database.path, "data/depot.db");
        assert_eq!(config.upload.default_folder, "Uploads");
    }

    #[test]
    fn test_parse_empty_config() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.storage.path, "data/assets");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_invalid_config() {
        let toml = "this is not valid toml [[[";
        let result = Config::parse(toml);

        assert!(result.is_err());
        if let Err(DepotError::Validation(msg)) = result {
            assert!(msg.contains("config parse error"));
        } else {
            panic!("Expected Validation error");
        }
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load("nonexistent.toml");
        assert!(matches!(result, Err(DepotError::Io(_))));
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[storage]\npath = \"/srv/assets\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.storage.path, "/srv/assets");
    }

    #[test]
    fn test_apply_env_overrides_storage_path() {
        let original = std::env::var("DEPOT_STORAGE_PATH").ok();

        std::env::set_var("DEPOT_STORAGE_PATH", "/tmp/depot-assets");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.storage.path, "/tmp/depot-assets");

        if let Some(val) = original {
            std::env::set_var("DEPOT_STORAGE_PATH", val);
        } else {
            std::env::remove_var("DEPOT_STORAGE_PATH");
        }
    }

    #[test]
    fn test_apply_env_overrides_empty_value() {
        let original = std::env::var("DEPOT_DATABASE_PATH").ok();

        // Empty values are ignored
        std::env::set_var("DEPOT_DATABASE_PATH", "");

        let mut config = Config::default();
        config.database.path = "original.db".to_string();
        config.apply_env_overrides();

        assert_eq!(config.database.path, "original.db");

        if let Some(val) = original {
            std::env::set_var("DEPOT_DATABASE_PATH", val);
        } else {
            std::env::remove_var("DEPOT_DATABASE_PATH");
        }
    }

    #[test]
    fn test_validate_bad_size_literal() {
        let config = Config::parse("[upload]\ndefault_max_file_size = \"huge\"\n").unwrap();
        let result = config.validate();
        assert!(matches!(result, Err(DepotError::Validation(_))));
    }

    #[test]
    fn test_validate_zero_attempts() {
        let mut config = Config::default();
        config.naming.max_attempts = 0;
        if let Err(DepotError::Validation(msg)) = config.validate() {
            assert!(msg.contains("max_attempts"));
        } else {
            panic!("Expected Validation error");
        }
    }

    #[test]
    fn test_validate_empty_default_folder() {
        let mut config = Config::default();
        config.upload.default_folder = " / ".to_string();
        assert!(config.validate().is_err());
    }
}
