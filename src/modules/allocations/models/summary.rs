use rust_decimal::Decimal;
use serde::Serialize;

use super::allocation::PaymentAllocation;
use crate::core::Currency;
use crate::modules::payments::PaymentStatus;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentAllocationSummary {
    pub payment_id: i64,
    pub payment_number: String,
    pub currency: Currency,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub total_allocated: Decimal,
    pub remaining_amount: Decimal,
    pub is_fully_allocated: bool,
    pub allocation_count: usize,
    pub reversed_count: usize,
    pub allocations: Vec<AllocationLine>,
}

/// An allocation joined with its invoice number
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationLine {
    #[serde(flatten)]
    pub allocation: PaymentAllocation,
    pub invoice_number: String,
    pub is_active: bool,
}
