mod balance_cache;
mod balance_service;

pub use balance_cache::BalanceCache;
pub use balance_service::BalanceTrackingService;
pub(crate) use balance_service::{percentage, strategy_usage};
