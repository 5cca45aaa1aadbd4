use super::env_or;
use crate::core::{AppError, Result};
use serde::Deserialize;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
    pub max_connections: u32,
    /// Session `innodb_lock_wait_timeout`; expiry surfaces as a retryable conflict
    pub lock_wait_timeout_secs: u32,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| AppError::Configuration("DATABASE_URL not set".to_string()))?,
            pool_size: env_or("DATABASE_POOL_SIZE", 10)?,
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", 20)?,
            lock_wait_timeout_secs: env_or("DATABASE_LOCK_WAIT_TIMEOUT_SECS", 10)?,
        })
    }

    /// Create a MySQL connection pool
    pub async fn create_pool(&self) -> Result<MySqlPool> {
        let lock_wait = format!(
            "SET SESSION innodb_lock_wait_timeout = {}",
            self.lock_wait_timeout_secs
        );
        MySqlPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.pool_size)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600)) // 10 minutes
            .max_lifetime(Duration::from_secs(1800)) // 30 minutes
            .test_before_acquire(true)
            .after_connect(move |conn, _meta| {
                let lock_wait = lock_wait.clone();
                Box::pin(async move {
                    sqlx::query(&lock_wait).execute(conn).await?;
                    Ok(())
                })
            })
            .connect(&self.url)
            .await
            .map_err(AppError::Database)
    }
}
