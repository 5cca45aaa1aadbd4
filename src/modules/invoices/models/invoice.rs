// An invoice owed by a customer. Allocations reduce its balance; the
// engine never writes the document status, it only derives the payment
// status from the active allocations.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::Currency;

/// Document lifecycle, owned by the invoicing side of the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Posted,
    Paid,
    Cancelled,
}

impl Default for InvoiceStatus {
    fn default() -> Self {
        InvoiceStatus::Draft
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvoiceStatus::Draft => write!(f, "draft"),
            InvoiceStatus::Sent => write!(f, "sent"),
            InvoiceStatus::Posted => write!(f, "posted"),
            InvoiceStatus::Paid => write!(f, "paid"),
            InvoiceStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "draft" => Ok(InvoiceStatus::Draft),
            "sent" => Ok(InvoiceStatus::Sent),
            "posted" => Ok(InvoiceStatus::Posted),
            "paid" => Ok(InvoiceStatus::Paid),
            "cancelled" => Ok(InvoiceStatus::Cancelled),
            _ => Err(format!("Invalid invoice status: {}", s)),
        }
    }
}

/// Settlement state derived from allocations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoicePaymentStatus {
    Unpaid,
    PartiallyPaid,
    Paid,
}

impl InvoicePaymentStatus {
    /// Nothing allocated is unpaid, an open balance is partial, otherwise paid
    pub fn derive(total_allocated: Decimal, balance_due: Decimal) -> Self {
        if total_allocated <= Decimal::ZERO {
            InvoicePaymentStatus::Unpaid
        } else if balance_due > Decimal::ZERO {
            InvoicePaymentStatus::PartiallyPaid
        } else {
            InvoicePaymentStatus::Paid
        }
    }
}

impl std::fmt::Display for InvoicePaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvoicePaymentStatus::Unpaid => write!(f, "unpaid"),
            InvoicePaymentStatus::PartiallyPaid => write!(f, "partially_paid"),
            InvoicePaymentStatus::Paid => write!(f, "paid"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: i64,
    pub company_id: i64,
    pub customer_id: i64,
    pub invoice_number: String,
    pub currency: Currency,
    pub total_amount: Decimal,
    pub status: InvoiceStatus,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    /// Sum of active allocations at read time
    pub total_allocated: Decimal,
}

impl Invoice {
    /// Outstanding amount, floored at zero
    pub fn balance_due(&self) -> Decimal {
        (self.total_amount - self.total_allocated).max(Decimal::ZERO)
    }

    pub fn payment_status(&self) -> InvoicePaymentStatus {
        InvoicePaymentStatus::derive(self.total_allocated, self.balance_due())
    }

    /// Days past due as of `as_of`; negative while the invoice is not yet due
    pub fn days_overdue(&self, as_of: NaiveDate) -> i64 {
        (as_of - self.due_date).num_days()
    }

    pub fn is_overdue(&self, as_of: NaiveDate) -> bool {
        self.due_date < as_of && self.balance_due() > Decimal::ZERO
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == InvoiceStatus::Cancelled
    }

    /// Candidate for automatic allocation
    pub fn is_open(&self) -> bool {
        !matches!(self.status, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
            && self.balance_due() > Decimal::ZERO
    }
}
