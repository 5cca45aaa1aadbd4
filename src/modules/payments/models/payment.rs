// A customer payment that is distributed across that customer's invoices.
// The allocated total is never stored on the row; it is summed from the
// active allocations whenever the payment is read.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::Currency;

/// Payment lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Received, not yet fully allocated
    Pending,
    /// Fully allocated to invoices
    Completed,
    /// Rejected by the bank; never allocatable
    Failed,
}

impl Default for PaymentStatus {
    fn default() -> Self {
        PaymentStatus::Pending
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Completed => write!(f, "completed"),
            PaymentStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            _ => Err(format!("Invalid payment status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub company_id: i64,
    pub customer_id: i64,
    pub payment_number: String,
    pub currency: Currency,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub payment_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    /// Sum of active allocations at read time
    pub total_allocated: Decimal,
}

impl Payment {
    pub fn remaining_amount(&self) -> Decimal {
        self.amount - self.total_allocated
    }

    pub fn is_fully_allocated(&self) -> bool {
        self.remaining_amount() <= Decimal::ZERO
    }

    /// Status the payment should hold given its current allocations.
    ///
    /// Only pending <-> completed moves; failed payments stay failed.
    pub fn settled_status(&self) -> PaymentStatus {
        match self.status {
            PaymentStatus::Failed => PaymentStatus::Failed,
            _ if self.is_fully_allocated() => PaymentStatus::Completed,
            _ => PaymentStatus::Pending,
        }
    }
}
