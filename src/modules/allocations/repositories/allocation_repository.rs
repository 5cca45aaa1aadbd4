use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::Result;
use crate::modules::allocations::models::{
    AllocationFilter, InvoiceOrdering, NewAllocation, PaymentAllocation,
};
use crate::modules::invoices::Invoice;
use crate::modules::payments::{Payment, PaymentStatus};

/// Result of locking a row that may belong to another tenant
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    /// The row exists but is owned by a different company
    ForeignTenant,
    Missing,
}

/// Read side of allocation persistence.
///
/// Every call is scoped by an explicit `company_id`. Payment and invoice
/// aggregates (`total_allocated`) are summed from active allocations on
/// each read.
#[async_trait]
pub trait AllocationRepository: Send + Sync {
    /// Open a unit of work; row locks are held until commit or rollback
    async fn begin(&self) -> Result<Box<dyn AllocationUnitOfWork>>;

    async fn find_payment(&self, company_id: i64, payment_id: i64) -> Result<Option<Payment>>;

    async fn find_invoice(&self, company_id: i64, invoice_id: i64) -> Result<Option<Invoice>>;

    async fn find_allocation(
        &self,
        company_id: i64,
        allocation_id: i64,
    ) -> Result<Option<PaymentAllocation>>;

    /// Allocations with the given ids, active or reversed, ordered by id
    async fn find_allocations(
        &self,
        company_id: i64,
        allocation_ids: &[i64],
    ) -> Result<Vec<PaymentAllocation>>;

    /// Allocations matching the filter, ordered by id
    async fn list_allocations(
        &self,
        company_id: i64,
        filter: &AllocationFilter,
    ) -> Result<Vec<PaymentAllocation>>;

    /// Non-paid, non-cancelled invoices of a customer with balance_due > 0
    async fn list_open_invoices(
        &self,
        company_id: i64,
        customer_id: i64,
        ordering: InvoiceOrdering,
    ) -> Result<Vec<Invoice>>;

    /// Every invoice of the company (optionally one customer), by due date
    async fn list_invoices(&self, company_id: i64, customer_id: Option<i64>)
        -> Result<Vec<Invoice>>;

    /// Every payment of the company (optionally one customer), by payment date
    async fn list_payments(&self, company_id: i64, customer_id: Option<i64>)
        -> Result<Vec<Payment>>;
}

/// Write side: one transaction holding row locks.
///
/// Callers lock the payment first, then invoices in ascending id order,
/// then allocations. Reads through the unit of work see its own writes.
#[async_trait]
pub trait AllocationUnitOfWork: Send {
    /// Lock a payment of `company_id`; rows of other tenants are invisible
    async fn lock_payment(&mut self, company_id: i64, payment_id: i64) -> Result<Option<Payment>>;

    async fn lock_invoice(&mut self, company_id: i64, invoice_id: i64) -> Result<Lookup<Invoice>>;

    async fn lock_allocation(
        &mut self,
        company_id: i64,
        allocation_id: i64,
    ) -> Result<Option<PaymentAllocation>>;

    async fn insert_allocation(&mut self, allocation: &NewAllocation) -> Result<PaymentAllocation>;

    /// Stamp the reversal tombstone; false if it was already set
    async fn mark_allocation_reversed(
        &mut self,
        company_id: i64,
        allocation_id: i64,
        reason: &str,
        reversed_by: i64,
        reversed_at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn update_payment_status(
        &mut self,
        company_id: i64,
        payment_id: i64,
        status: PaymentStatus,
    ) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
