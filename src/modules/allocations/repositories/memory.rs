// In-memory adapter of the allocation port.
//
// Units of work are serialised through one owned async mutex and operate on
// a staged copy of the store, so rollback simply discards the copy. Reads
// outside a unit of work wait until the open one finishes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::allocation_repository::{AllocationRepository, AllocationUnitOfWork, Lookup};
use crate::core::{AppError, Result};
use crate::modules::allocations::models::{
    AllocationFilter, InvoiceOrdering, NewAllocation, PaymentAllocation,
};
use crate::modules::invoices::Invoice;
use crate::modules::payments::{Payment, PaymentStatus};

#[derive(Debug, Clone, Default)]
struct Store {
    payments: BTreeMap<i64, Payment>,
    invoices: BTreeMap<i64, Invoice>,
    allocations: BTreeMap<i64, PaymentAllocation>,
    next_allocation_id: i64,
}

impl Store {
    fn allocated_to_payment(&self, payment_id: i64) -> Decimal {
        self.allocations
            .values()
            .filter(|a| a.is_active() && a.payment_id == payment_id)
            .map(|a| a.allocated_amount)
            .sum()
    }

    fn allocated_to_invoice(&self, invoice_id: i64) -> Decimal {
        self.allocations
            .values()
            .filter(|a| a.is_active() && a.invoice_id == invoice_id)
            .map(|a| a.allocated_amount)
            .sum()
    }

    fn payment(&self, company_id: i64, payment_id: i64) -> Option<Payment> {
        self.payments
            .get(&payment_id)
            .filter(|p| p.company_id == company_id)
            .map(|p| Payment {
                total_allocated: self.allocated_to_payment(p.id),
                ..p.clone()
            })
    }

    fn invoice_any_tenant(&self, invoice_id: i64) -> Option<Invoice> {
        self.invoices.get(&invoice_id).map(|i| Invoice {
            total_allocated: self.allocated_to_invoice(i.id),
            ..i.clone()
        })
    }

    fn invoice(&self, company_id: i64, invoice_id: i64) -> Option<Invoice> {
        self.invoice_any_tenant(invoice_id)
            .filter(|i| i.company_id == company_id)
    }

    fn allocation(&self, company_id: i64, allocation_id: i64) -> Option<PaymentAllocation> {
        self.allocations
            .get(&allocation_id)
            .filter(|a| a.company_id == company_id)
            .cloned()
    }

    fn invoices_for(&self, company_id: i64, customer_id: Option<i64>) -> Vec<Invoice> {
        let mut invoices: Vec<Invoice> = self
            .invoices
            .values()
            .filter(|i| i.company_id == company_id)
            .filter(|i| customer_id.map_or(true, |c| i.customer_id == c))
            .filter_map(|i| self.invoice(company_id, i.id))
            .collect();
        invoices.sort_by_key(|i| (i.due_date, i.id));
        invoices
    }
}

/// Allocation repository backed by process memory
#[derive(Clone, Default)]
pub struct InMemoryAllocationRepository {
    store: Arc<Mutex<Store>>,
    pending_conflicts: Arc<AtomicU32>,
}

impl InMemoryAllocationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or replace a payment; `total_allocated` is ignored
    pub async fn insert_payment(&self, payment: Payment) {
        self.store.lock().await.payments.insert(payment.id, payment);
    }

    /// Seed or replace an invoice; `total_allocated` is ignored
    pub async fn insert_invoice(&self, invoice: Invoice) {
        self.store.lock().await.invoices.insert(invoice.id, invoice);
    }

    /// Seed an allocation row as-is (historic or already reversed rows)
    pub async fn insert_allocation_row(&self, allocation: PaymentAllocation) {
        let mut store = self.store.lock().await;
        store.next_allocation_id = store.next_allocation_id.max(allocation.id);
        store.allocations.insert(allocation.id, allocation);
    }

    /// Make the next `count` commits fail with a retryable conflict
    pub fn inject_commit_conflicts(&self, count: u32) {
        self.pending_conflicts.store(count, Ordering::SeqCst);
    }

    /// Total allocation rows, active and reversed
    pub async fn allocation_count(&self) -> usize {
        self.store.lock().await.allocations.len()
    }
}

#[async_trait]
impl AllocationRepository for InMemoryAllocationRepository {
    async fn begin(&self) -> Result<Box<dyn AllocationUnitOfWork>> {
        let guard = self.store.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(InMemoryUnitOfWork {
            guard,
            staged,
            pending_conflicts: self.pending_conflicts.clone(),
        }))
    }

    async fn find_payment(&self, company_id: i64, payment_id: i64) -> Result<Option<Payment>> {
        Ok(self.store.lock().await.payment(company_id, payment_id))
    }

    async fn find_invoice(&self, company_id: i64, invoice_id: i64) -> Result<Option<Invoice>> {
        Ok(self.store.lock().await.invoice(company_id, invoice_id))
    }

    async fn find_allocation(
        &self,
        company_id: i64,
        allocation_id: i64,
    ) -> Result<Option<PaymentAllocation>> {
        Ok(self.store.lock().await.allocation(company_id, allocation_id))
    }

    async fn find_allocations(
        &self,
        company_id: i64,
        allocation_ids: &[i64],
    ) -> Result<Vec<PaymentAllocation>> {
        let store = self.store.lock().await;
        Ok(store
            .allocations
            .values()
            .filter(|a| a.company_id == company_id && allocation_ids.contains(&a.id))
            .cloned()
            .collect())
    }

    async fn list_allocations(
        &self,
        company_id: i64,
        filter: &AllocationFilter,
    ) -> Result<Vec<PaymentAllocation>> {
        let store = self.store.lock().await;
        Ok(store
            .allocations
            .values()
            .filter(|a| a.company_id == company_id && filter.matches(a))
            .filter(|a| match filter.customer_id {
                Some(customer_id) => store
                    .invoices
                    .get(&a.invoice_id)
                    .is_some_and(|i| i.customer_id == customer_id),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn list_open_invoices(
        &self,
        company_id: i64,
        customer_id: i64,
        ordering: InvoiceOrdering,
    ) -> Result<Vec<Invoice>> {
        let store = self.store.lock().await;
        let mut invoices: Vec<Invoice> = store
            .invoices_for(company_id, Some(customer_id))
            .into_iter()
            .filter(Invoice::is_open)
            .collect();

        match ordering {
            InvoiceOrdering::DueDateAsc => invoices.sort_by_key(|i| (i.due_date, i.id)),
            InvoiceOrdering::BalanceDesc => {
                invoices.sort_by(|a, b| b.balance_due().cmp(&a.balance_due()).then(a.id.cmp(&b.id)))
            }
        }

        Ok(invoices)
    }

    async fn list_invoices(
        &self,
        company_id: i64,
        customer_id: Option<i64>,
    ) -> Result<Vec<Invoice>> {
        Ok(self.store.lock().await.invoices_for(company_id, customer_id))
    }

    async fn list_payments(
        &self,
        company_id: i64,
        customer_id: Option<i64>,
    ) -> Result<Vec<Payment>> {
        let store = self.store.lock().await;
        let mut payments: Vec<Payment> = store
            .payments
            .values()
            .filter(|p| p.company_id == company_id)
            .filter(|p| customer_id.map_or(true, |c| p.customer_id == c))
            .filter_map(|p| store.payment(company_id, p.id))
            .collect();
        payments.sort_by_key(|p| (p.payment_date, p.id));
        Ok(payments)
    }
}

pub struct InMemoryUnitOfWork {
    guard: OwnedMutexGuard<Store>,
    staged: Store,
    pending_conflicts: Arc<AtomicU32>,
}

#[async_trait]
impl AllocationUnitOfWork for InMemoryUnitOfWork {
    async fn lock_payment(&mut self, company_id: i64, payment_id: i64) -> Result<Option<Payment>> {
        Ok(self.staged.payment(company_id, payment_id))
    }

    async fn lock_invoice(&mut self, company_id: i64, invoice_id: i64) -> Result<Lookup<Invoice>> {
        Ok(match self.staged.invoice_any_tenant(invoice_id) {
            Some(invoice) if invoice.company_id == company_id => Lookup::Found(invoice),
            Some(_) => Lookup::ForeignTenant,
            None => Lookup::Missing,
        })
    }

    async fn lock_allocation(
        &mut self,
        company_id: i64,
        allocation_id: i64,
    ) -> Result<Option<PaymentAllocation>> {
        Ok(self.staged.allocation(company_id, allocation_id))
    }

    async fn insert_allocation(&mut self, allocation: &NewAllocation) -> Result<PaymentAllocation> {
        self.staged.next_allocation_id += 1;
        let row = PaymentAllocation {
            id: self.staged.next_allocation_id,
            company_id: allocation.company_id,
            payment_id: allocation.payment_id,
            invoice_id: allocation.invoice_id,
            allocated_amount: allocation.allocated_amount,
            allocation_date: allocation.allocation_date,
            allocation_method: allocation.allocation_method,
            allocation_strategy: allocation.allocation_strategy,
            notes: allocation.notes.clone(),
            created_by: allocation.created_by,
            created_at: Utc::now(),
            reversed_at: None,
            reversal_reason: None,
            reversed_by: None,
        };
        self.staged.allocations.insert(row.id, row.clone());
        Ok(row)
    }

    async fn mark_allocation_reversed(
        &mut self,
        company_id: i64,
        allocation_id: i64,
        reason: &str,
        reversed_by: i64,
        reversed_at: DateTime<Utc>,
    ) -> Result<bool> {
        match self.staged.allocations.get_mut(&allocation_id) {
            Some(row) if row.company_id == company_id && row.is_active() => {
                row.reversed_at = Some(reversed_at);
                row.reversal_reason = Some(reason.to_string());
                row.reversed_by = Some(reversed_by);
                Ok(true)
            }
            Some(row) if row.company_id == company_id => Ok(false),
            _ => Err(AppError::not_found(format!("Allocation {}", allocation_id))),
        }
    }

    async fn update_payment_status(
        &mut self,
        company_id: i64,
        payment_id: i64,
        status: PaymentStatus,
    ) -> Result<()> {
        match self.staged.payments.get_mut(&payment_id) {
            Some(payment) if payment.company_id == company_id => {
                payment.status = status;
                Ok(())
            }
            _ => Err(AppError::not_found(format!("Payment {}", payment_id))),
        }
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let injected = self
            .pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(AppError::conflict("Deadlock found when trying to get lock"));
        }

        let staged = std::mem::take(&mut self.staged);
        *self.guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
