use crate::core::{AppError, Result};
use serde::Deserialize;
use std::env;
use std::str::FromStr;

pub mod allocation;
pub mod database;
pub mod server;

pub use allocation::AllocationConfig;
pub use database::DatabaseConfig;
pub use server::ServerConfig;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub allocation: AllocationConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub log_level: String,
    pub log_format: String,
    /// "database" writes `audit_logs`, "log" only emits tracing events
    pub audit_sink: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub rate_limit_per_minute: u32,
}

/// Reads an optional variable, falling back to `default` and failing on garbage
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Configuration(format!("Invalid {}", key))),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let config = Config {
            app: AppConfig {
                env: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
                log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
                audit_sink: env::var("AUDIT_SINK").unwrap_or_else(|_| "database".to_string()),
            },
            database: DatabaseConfig::from_env()?,
            server: ServerConfig::from_env()?,
            allocation: AllocationConfig::from_env()?,
            security: SecurityConfig {
                rate_limit_per_minute: env_or("RATE_LIMIT_PER_MINUTE", 1000)?,
            },
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.security.rate_limit_per_minute == 0 {
            return Err(AppError::Configuration(
                "Rate limit must be greater than 0".to_string(),
            ));
        }

        if !matches!(self.app.log_format.as_str(), "pretty" | "json") {
            return Err(AppError::Configuration(format!(
                "LOG_FORMAT must be 'pretty' or 'json', got '{}'",
                self.app.log_format
            )));
        }

        if !matches!(self.app.audit_sink.as_str(), "database" | "log") {
            return Err(AppError::Configuration(format!(
                "AUDIT_SINK must be 'database' or 'log', got '{}'",
                self.app.audit_sink
            )));
        }

        self.allocation.validate()
    }
}
