// Allocations module: the engine, its strategies and reversals

pub mod controllers;
pub mod models;
pub mod repositories;
pub mod services;

pub use models::{AllocationMethod, AllocationStrategy, PaymentAllocation};
pub use repositories::{AllocationRepository, InMemoryAllocationRepository, MySqlAllocationRepository};
pub use services::{PaymentAllocationReversalService, PaymentAllocationService};
