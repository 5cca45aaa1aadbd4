//! Payment allocation engine
//!
//! Distributes customer payments across open invoices, reverses allocations,
//! and reports on balances and allocation activity for each company.

pub mod config;
pub mod core;
pub mod middleware;
pub mod modules;

// Re-export commonly used types
pub use modules::allocations;
pub use modules::audit;
pub use modules::balances;
pub use modules::invoices;
pub use modules::payments;
pub use modules::reports;
