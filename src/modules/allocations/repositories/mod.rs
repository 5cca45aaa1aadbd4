mod allocation_repository;
mod memory;
mod mysql;

pub use allocation_repository::{AllocationRepository, AllocationUnitOfWork, Lookup};
pub use memory::{InMemoryAllocationRepository, InMemoryUnitOfWork};
pub use mysql::{MySqlAllocationRepository, MySqlUnitOfWork};
