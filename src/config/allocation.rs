use super::env_or;
use crate::core::{AppError, Result};
use serde::Deserialize;
use std::time::Duration;

/// Allocation engine tunables
#[derive(Debug, Clone, Deserialize)]
pub struct AllocationConfig {
    /// Allocations older than this many days can no longer be reversed
    pub reversal_max_age_days: i64,
    /// Extra attempts after a deadlock or lock-wait timeout
    pub conflict_retry_attempts: u32,
    pub customer_balance_cache_ttl_secs: u64,
    pub company_overview_cache_ttl_secs: u64,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            reversal_max_age_days: 365,
            conflict_retry_attempts: 2,
            customer_balance_cache_ttl_secs: 300,
            company_overview_cache_ttl_secs: 600,
        }
    }
}

impl AllocationConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            reversal_max_age_days: env_or("REVERSAL_MAX_AGE_DAYS", defaults.reversal_max_age_days)?,
            conflict_retry_attempts: env_or(
                "CONFLICT_RETRY_ATTEMPTS",
                defaults.conflict_retry_attempts,
            )?,
            customer_balance_cache_ttl_secs: env_or(
                "CUSTOMER_BALANCE_CACHE_TTL_SECS",
                defaults.customer_balance_cache_ttl_secs,
            )?,
            company_overview_cache_ttl_secs: env_or(
                "COMPANY_OVERVIEW_CACHE_TTL_SECS",
                defaults.company_overview_cache_ttl_secs,
            )?,
        })
    }

    pub fn customer_balance_ttl(&self) -> Duration {
        Duration::from_secs(self.customer_balance_cache_ttl_secs)
    }

    pub fn company_overview_ttl(&self) -> Duration {
        Duration::from_secs(self.company_overview_cache_ttl_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.reversal_max_age_days <= 0 {
            return Err(AppError::Configuration(
                "REVERSAL_MAX_AGE_DAYS must be greater than 0".to_string(),
            ));
        }

        if self.conflict_retry_attempts > 10 {
            return Err(AppError::Configuration(
                "CONFLICT_RETRY_ATTEMPTS must be at most 10".to_string(),
            ));
        }

        Ok(())
    }
}
