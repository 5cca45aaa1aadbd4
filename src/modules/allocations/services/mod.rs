pub mod allocation_service;
pub mod reversal_service;
pub mod strategies;

pub use allocation_service::{PaymentAllocationService, StrategyPreview};
pub use reversal_service::PaymentAllocationReversalService;
