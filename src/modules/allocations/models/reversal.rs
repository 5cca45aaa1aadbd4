use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::allocation::PaymentAllocation;
use crate::core::AppError;
use crate::modules::invoices::{Invoice, InvoicePaymentStatus};
use crate::modules::payments::PaymentStatus;

/// Business rule that forbids reversing an allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReversalBlock {
    AlreadyReversed,
    TooOld,
    InvoiceCancelled,
}

impl ReversalBlock {
    pub fn code(&self) -> &'static str {
        match self {
            ReversalBlock::AlreadyReversed => "already_reversed",
            ReversalBlock::TooOld => "too_old",
            ReversalBlock::InvoiceCancelled => "invoice_cancelled",
        }
    }

    pub fn message(&self, max_age_days: i64) -> String {
        match self {
            ReversalBlock::AlreadyReversed => "Allocation is already reversed".to_string(),
            ReversalBlock::TooOld => format!(
                "Allocation is too old to reverse (over {} days)",
                max_age_days
            ),
            ReversalBlock::InvoiceCancelled => "Associated invoice is cancelled".to_string(),
        }
    }

    pub fn into_error(self, max_age_days: i64) -> AppError {
        AppError::business_rule(self.code(), self.message(max_age_days))
    }
}

/// Gating rules, checked in order: tombstone, age, invoice state
pub fn check_reversible(
    allocation: &PaymentAllocation,
    invoice: &Invoice,
    today: NaiveDate,
    max_age_days: i64,
) -> Option<ReversalBlock> {
    if allocation.is_reversed() {
        return Some(ReversalBlock::AlreadyReversed);
    }

    if (today - allocation.allocation_date).num_days() > max_age_days {
        return Some(ReversalBlock::TooOld);
    }

    if invoice.is_cancelled() {
        return Some(ReversalBlock::InvoiceCancelled);
    }

    None
}

/// State of the allocation, its invoice and its payment after a reversal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReversalReceipt {
    pub allocation: PaymentAllocation,
    pub invoice_balance_due: Decimal,
    pub invoice_payment_status: InvoicePaymentStatus,
    pub payment_status: PaymentStatus,
    pub payment_remaining_amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReversalItemStatus {
    Reversed,
    AlreadyReversed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReversalItem {
    pub allocation_id: i64,
    pub status: ReversalItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReversalResult {
    pub total: usize,
    pub reversed_count: usize,
    /// Items not reversed, including ones that were already reversed
    pub error_count: usize,
    pub reversed_amount: Decimal,
    pub results: Vec<ReversalItem>,
    /// Set by invoice reversals capped with `max_amount`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_amount_limit: Option<Decimal>,
}

impl BatchReversalResult {
    pub fn from_items(results: Vec<ReversalItem>) -> Self {
        let reversed_count = results
            .iter()
            .filter(|r| r.status == ReversalItemStatus::Reversed)
            .count();
        let reversed_amount = results
            .iter()
            .filter(|r| r.status == ReversalItemStatus::Reversed)
            .filter_map(|r| r.amount)
            .sum();
        Self {
            total: results.len(),
            reversed_count,
            error_count: results.len() - reversed_count,
            reversed_amount,
            results,
            max_amount_limit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReversalIssue {
    pub allocation_id: i64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReversibleAllocation {
    pub allocation_id: i64,
    pub allocated_amount: Decimal,
    pub allocation_date: NaiveDate,
    pub invoice_number: String,
    pub payment_number: String,
}

/// Dry-run verdict for a set of allocation ids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReversalValidation {
    pub valid: bool,
    pub errors: Vec<ReversalIssue>,
    pub warnings: Vec<ReversalIssue>,
    pub allocations: Vec<ReversibleAllocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceReversalImpact {
    pub invoice_id: i64,
    pub invoice_number: String,
    pub current_balance_due: Decimal,
    pub current_payment_status: InvoicePaymentStatus,
    pub reversal_amount: Decimal,
    pub projected_balance_due: Decimal,
    pub projected_payment_status: InvoicePaymentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReversalImpact {
    pub payment_id: i64,
    pub payment_number: String,
    pub current_total_allocated: Decimal,
    pub current_remaining_amount: Decimal,
    pub reversal_amount: Decimal,
    pub projected_total_allocated: Decimal,
    pub projected_remaining_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReversalImpact {
    pub total_reversal_amount: Decimal,
    pub affected_invoices: usize,
    pub affected_payments: usize,
    pub invoice_impacts: Vec<InvoiceReversalImpact>,
    pub payment_impacts: Vec<PaymentReversalImpact>,
}

impl ReversalImpact {
    pub fn empty() -> Self {
        Self {
            total_reversal_amount: Decimal::ZERO,
            affected_invoices: 0,
            affected_payments: 0,
            invoice_impacts: Vec::new(),
            payment_impacts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReversalHistoryEntry {
    pub allocation_id: i64,
    pub reversed_at: DateTime<Utc>,
    pub reversal_reason: Option<String>,
    pub reversed_by: Option<i64>,
    pub allocated_amount: Decimal,
    pub allocation_date: NaiveDate,
    pub invoice_number: String,
    pub payment_number: String,
}
