// Balances module: read models derived from active allocations

pub mod controllers;
pub mod models;
pub mod services;

pub use services::{BalanceCache, BalanceTrackingService};
