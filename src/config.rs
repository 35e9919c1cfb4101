//! 配置管理
//!
//! Layered configuration: built-in defaults, then an optional TOML file, then
//! `CONTENT_VAULT_*` environment variables (`__` separates nested keys, e.g.
//! `CONTENT_VAULT_SWEEP__MAX_CONCURRENT_FILES=4`).

use crate::error::{AppError, Result};
use crate::storage::sweep::SweepOptions;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use validator::{Validate, ValidationError};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "CONTENT_VAULT";

/// 全局配置根结构
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct VaultConfig {
    #[validate(nested)]
    pub storage: StorageConfig,

    #[validate(nested)]
    pub sweep: SweepConfig,

    #[validate(nested)]
    pub logging: LoggingConfig,
}

/// 存储配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the blobs
    #[validate(custom(function = "validate_non_empty_path"))]
    pub root: PathBuf,

    /// SQLite database file
    #[validate(custom(function = "validate_non_empty_path"))]
    pub database: PathBuf,

    /// Default output directory for `compress`
    #[validate(custom(function = "validate_non_empty_path"))]
    pub compressed_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("storage"),
            database: PathBuf::from("file_manager.db"),
            compressed_dir: PathBuf::from("compressed"),
        }
    }
}

/// 去重扫描配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SweepConfig {
    #[validate(range(min = 1, max = 1024))]
    pub max_concurrent_files: usize,

    #[validate(range(min = 1, max = 65536))]
    pub walk_buffer: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        let options = SweepOptions::default();
        Self {
            max_concurrent_files: options.max_concurrent_files,
            walk_buffer: options.walk_buffer,
        }
    }
}

impl From<&SweepConfig> for SweepOptions {
    fn from(config: &SweepConfig) -> Self {
        Self {
            max_concurrent_files: config.max_concurrent_files,
            walk_buffer: config.walk_buffer,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[validate(custom(function = "validate_filter_directive"))]
    pub level: String,

    /// Emit JSON lines instead of human readable output
    pub json: bool,

    /// Also write daily-rolling log files here
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}

impl VaultConfig {
    /// Load defaults, then `path` (if given and present), then the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`VaultConfig::load`] but reads environment overrides from
    /// `env` instead of the process environment when provided.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: VaultConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| AppError::config_error(format!("Failed to load configuration: {}", e)))?;

        config.validate_config()?;

        if let Some(path) = path {
            tracing::debug!(path = %path.display(), "Loaded configuration");
        }
        Ok(config)
    }

    /// Run the validator rules, mapping failures to `AppError::Config`.
    pub fn validate_config(&self) -> Result<()> {
        self.validate()
            .map_err(|e| AppError::config_error(format!("Invalid configuration: {}", e)))
    }

    /// 保存配置到 TOML 文件
    pub fn save_to_toml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(|e| {
            AppError::config_error(format!("Failed to serialize config to TOML: {}", e))
        })?;

        std::fs::write(path, content).map_err(|e| {
            AppError::io_error(format!("Failed to write config file: {}", e), path)
        })?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }
}

fn validate_non_empty_path(path: &PathBuf) -> std::result::Result<(), ValidationError> {
    if path.as_os_str().is_empty() {
        return Err(ValidationError::new("empty_path"));
    }
    Ok(())
}

fn validate_filter_directive(level: &str) -> std::result::Result<(), ValidationError> {
    tracing_subscriber::EnvFilter::try_new(level)
        .map(|_| ())
        .map_err(|_| ValidationError::new("invalid_log_filter"))
}
