//! Application configuration
//!
//! Loaded from an optional file plus `PLATE_WATCH_*` environment overrides,
//! then validated before anything is wired up.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::session::CrawlParams;
use crate::infrastructure::http_source::HttpSourceConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {source}")]
    Load {
        #[from]
        source: config::ConfigError,
    },

    #[error("invalid configuration: {message}")]
    Validation { message: String },
}

/// Crawl loop settings, mapped 1:1 onto `CrawlParams`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    pub page_size: u32,
    pub batch_size: u32,
    pub max_iterations: u32,
    pub request_delay_ms: u64,
    pub min_price: u64,
    pub max_price: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        let p = CrawlParams::default();
        Self {
            page_size: p.page_size,
            batch_size: p.batch_size,
            max_iterations: p.max_iterations,
            request_delay_ms: p.request_delay_ms,
            min_price: p.min_price,
            max_price: p.max_price,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://plate_watch.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// "error" | "warn" | "info" | "debug" | "trace"
    pub level: String,
    pub file_output: bool,
    pub log_dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_output: false,
            log_dir: "logs".to_string(),
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub source: HttpSourceConfig,
    pub crawl: CrawlConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load from a config file (any format the `config` crate recognizes)
    /// with `PLATE_WATCH_*` environment overrides layered on top.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("PLATE_WATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.crawl.page_size == 0 {
            return Err(ConfigError::Validation {
                message: "crawl.page_size must be greater than 0".to_string(),
            });
        }
        if self.crawl.batch_size == 0 {
            return Err(ConfigError::Validation {
                message: "crawl.batch_size must be greater than 0".to_string(),
            });
        }
        if self.crawl.min_price > self.crawl.max_price {
            return Err(ConfigError::Validation {
                message: "crawl.min_price cannot exceed crawl.max_price".to_string(),
            });
        }
        if self.source.timeout_ms == 0 {
            return Err(ConfigError::Validation {
                message: "source.timeout_ms must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn crawl_params(&self) -> CrawlParams {
        CrawlParams {
            page_size: self.crawl.page_size,
            batch_size: self.crawl.batch_size,
            max_iterations: self.crawl.max_iterations,
            request_delay_ms: self.crawl.request_delay_ms,
            min_price: self.crawl.min_price,
            max_price: self.crawl.max_price,
        }
    }
}
