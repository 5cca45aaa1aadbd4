mod allocation;
mod reversal;
mod strategy;
mod summary;

pub use allocation::{
    AllocationFilter, AllocationInstruction, AllocationMethod, AllocationResult, NewAllocation,
    PaymentAllocation,
};
pub use reversal::{
    check_reversible, BatchReversalResult, InvoiceReversalImpact, PaymentReversalImpact,
    ReversalBlock, ReversalHistoryEntry, ReversalImpact, ReversalIssue, ReversalItem,
    ReversalItemStatus, ReversalReceipt, ReversalValidation, ReversibleAllocation,
};
pub use strategy::{
    AllocationProposal, AllocationStrategy, InvoiceOrdering, StrategyDescription, StrategyOptions,
    StrategyParams, StrategyPlan,
};
pub use summary::{AllocationLine, PaymentAllocationSummary};
