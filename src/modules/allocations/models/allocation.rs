use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::strategy::AllocationStrategy;

/// How an allocation was decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationMethod {
    Manual,
    Automatic,
}

impl std::fmt::Display for AllocationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocationMethod::Manual => write!(f, "manual"),
            AllocationMethod::Automatic => write!(f, "automatic"),
        }
    }
}

impl std::str::FromStr for AllocationMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "manual" => Ok(AllocationMethod::Manual),
            "automatic" => Ok(AllocationMethod::Automatic),
            _ => Err(format!("Invalid allocation method: {}", s)),
        }
    }
}

/// A slice of a payment applied to one invoice.
///
/// Rows are append-only. Reversal stamps `reversed_at`, `reversal_reason`
/// and `reversed_by` once; the row itself is never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAllocation {
    pub id: i64,
    pub company_id: i64,
    pub payment_id: i64,
    pub invoice_id: i64,
    pub allocated_amount: Decimal,
    pub allocation_date: NaiveDate,
    pub allocation_method: AllocationMethod,
    /// Present only for automatic allocations
    pub allocation_strategy: Option<AllocationStrategy>,
    pub notes: Option<String>,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub reversed_at: Option<DateTime<Utc>>,
    pub reversal_reason: Option<String>,
    pub reversed_by: Option<i64>,
}

impl PaymentAllocation {
    pub fn is_active(&self) -> bool {
        self.reversed_at.is_none()
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed_at.is_some()
    }

    /// Label used by read models: the strategy name, or "manual"
    pub fn strategy_label(&self) -> String {
        match self.allocation_strategy {
            Some(strategy) => strategy.to_string(),
            None => AllocationMethod::Manual.to_string(),
        }
    }
}

/// Values for a row about to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewAllocation {
    pub company_id: i64,
    pub payment_id: i64,
    pub invoice_id: i64,
    pub allocated_amount: Decimal,
    pub allocation_date: NaiveDate,
    pub allocation_method: AllocationMethod,
    pub allocation_strategy: Option<AllocationStrategy>,
    pub notes: Option<String>,
    pub created_by: i64,
}

/// One requested line of a batch allocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationInstruction {
    pub invoice_id: i64,
    pub amount: Decimal,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Outcome of one instruction, with the invoice balance around it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationResult {
    pub allocation_id: i64,
    pub invoice_id: i64,
    pub invoice_number: String,
    pub allocated_amount: Decimal,
    pub previous_balance: Decimal,
    pub new_balance: Decimal,
}

/// Read-side filter for allocation listings
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AllocationFilter {
    pub payment_id: Option<i64>,
    pub invoice_id: Option<i64>,
    pub customer_id: Option<i64>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    /// Include reversed rows as well as active ones
    #[serde(default)]
    pub include_reversed: bool,
    #[serde(default)]
    pub reversed_only: bool,
}

impl AllocationFilter {
    pub fn for_payment(payment_id: i64) -> Self {
        Self {
            payment_id: Some(payment_id),
            ..Default::default()
        }
    }

    pub fn for_invoice(invoice_id: i64) -> Self {
        Self {
            invoice_id: Some(invoice_id),
            ..Default::default()
        }
    }

    pub fn all() -> Self {
        Self {
            include_reversed: true,
            ..Default::default()
        }
    }

    /// Row-level predicate shared by every adapter; `customer_id` needs a
    /// join and is applied by the adapter itself
    pub fn matches(&self, allocation: &PaymentAllocation) -> bool {
        if self.reversed_only && allocation.is_active() {
            return false;
        }
        if !self.include_reversed && !self.reversed_only && allocation.is_reversed() {
            return false;
        }
        if self.payment_id.is_some_and(|id| id != allocation.payment_id) {
            return false;
        }
        if self.invoice_id.is_some_and(|id| id != allocation.invoice_id) {
            return false;
        }
        if self.from.is_some_and(|from| allocation.allocation_date < from) {
            return false;
        }
        if self.to.is_some_and(|to| allocation.allocation_date > to) {
            return false;
        }
        true
    }
}
