// Shared fixtures for the unit, integration and contract test targets.
//
// Everything runs against the in-memory allocation repository and the
// in-memory audit sink, so no database is needed.
//
// Usage:
//   #[path = "../helpers/mod.rs"]
//   mod helpers;
//
//   let h = helpers::Harness::new();
//   h.seed_payment(helpers::payment(1, 10, dec!(500))).await;

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;

use payalloc::allocations::models::{AllocationMethod, AllocationStrategy, PaymentAllocation};
use payalloc::allocations::{
    AllocationRepository, InMemoryAllocationRepository, PaymentAllocationReversalService,
    PaymentAllocationService,
};
use payalloc::audit::{AuditSink, MemoryAuditSink};
use payalloc::balances::{BalanceCache, BalanceTrackingService};
use payalloc::config::AllocationConfig;
use payalloc::core::{Actor, Currency, Permission, Role};
use payalloc::invoices::{Invoice, InvoiceStatus};
use payalloc::payments::{Payment, PaymentStatus};
use payalloc::reports::PaymentAllocationReportService;

pub const COMPANY: i64 = 1;
pub const OTHER_COMPANY: i64 = 2;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Pending USD payment of `COMPANY` received today
pub fn payment(id: i64, customer_id: i64, amount: Decimal) -> Payment {
    Payment {
        id,
        company_id: COMPANY,
        customer_id,
        payment_number: format!("PAY-{:04}", id),
        currency: Currency::USD,
        amount,
        status: PaymentStatus::Pending,
        payment_date: today(),
        created_at: Utc::now(),
        total_allocated: Decimal::ZERO,
    }
}

/// Posted USD invoice of `COMPANY`
pub fn invoice(id: i64, customer_id: i64, total: Decimal, due_date: NaiveDate) -> Invoice {
    Invoice {
        id,
        company_id: COMPANY,
        customer_id,
        invoice_number: format!("INV-{:04}", id),
        currency: Currency::USD,
        total_amount: total,
        status: InvoiceStatus::Posted,
        issue_date: due_date - chrono::Duration::days(30),
        due_date,
        created_at: Utc::now(),
        total_allocated: Decimal::ZERO,
    }
}

/// Historic allocation row, for seeding state the engine did not create
pub fn allocation_row(
    id: i64,
    payment_id: i64,
    invoice_id: i64,
    amount: Decimal,
    allocation_date: NaiveDate,
) -> PaymentAllocation {
    PaymentAllocation {
        id,
        company_id: COMPANY,
        payment_id,
        invoice_id,
        allocated_amount: amount,
        allocation_date,
        allocation_method: AllocationMethod::Manual,
        allocation_strategy: None,
        notes: None,
        created_by: 100,
        created_at: Utc::now(),
        reversed_at: None,
        reversal_reason: None,
        reversed_by: None,
    }
}

pub fn automatic_row(
    id: i64,
    payment_id: i64,
    invoice_id: i64,
    amount: Decimal,
    allocation_date: NaiveDate,
    strategy: AllocationStrategy,
) -> PaymentAllocation {
    PaymentAllocation {
        allocation_method: AllocationMethod::Automatic,
        allocation_strategy: Some(strategy),
        ..allocation_row(id, payment_id, invoice_id, amount, allocation_date)
    }
}

pub fn accountant() -> Actor {
    Actor::new(
        100,
        COMPANY,
        Role::Accountant,
        vec![
            Permission::AllocationsCreate,
            Permission::AllocationsReverse,
            Permission::AllocationsView,
            Permission::ReportsView,
        ],
    )
}

pub fn viewer() -> Actor {
    Actor::new(
        200,
        COMPANY,
        Role::Viewer,
        vec![Permission::AllocationsView, Permission::ReportsView],
    )
}

pub fn outsider() -> Actor {
    Actor::new(300, OTHER_COMPANY, Role::Owner, vec![])
}

/// All services wired to one in-memory store
pub struct Harness {
    pub repo: Arc<InMemoryAllocationRepository>,
    pub audit: Arc<MemoryAuditSink>,
    pub cache: Arc<BalanceCache>,
    pub allocations: Arc<PaymentAllocationService>,
    pub reversals: Arc<PaymentAllocationReversalService>,
    pub balances: Arc<BalanceTrackingService>,
    pub reports: Arc<PaymentAllocationReportService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(AllocationConfig::default())
    }

    pub fn with_config(config: AllocationConfig) -> Self {
        let repo = Arc::new(InMemoryAllocationRepository::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let cache = Arc::new(BalanceCache::new(
            Duration::from_secs(300),
            Duration::from_secs(600),
        ));

        let port: Arc<dyn AllocationRepository> = repo.clone();
        let sink: Arc<dyn AuditSink> = audit.clone();

        Self {
            allocations: Arc::new(PaymentAllocationService::new(
                port.clone(),
                sink.clone(),
                cache.clone(),
                config.clone(),
            )),
            reversals: Arc::new(PaymentAllocationReversalService::new(
                port.clone(),
                sink,
                cache.clone(),
                config,
            )),
            balances: Arc::new(BalanceTrackingService::new(port.clone(), cache.clone())),
            reports: Arc::new(PaymentAllocationReportService::new(port)),
            repo,
            audit,
            cache,
        }
    }

    pub async fn seed_payment(&self, payment: Payment) {
        self.repo.insert_payment(payment).await;
    }

    pub async fn seed_invoice(&self, invoice: Invoice) {
        self.repo.insert_invoice(invoice).await;
    }

    pub async fn seed_allocation(&self, allocation: PaymentAllocation) {
        self.repo.insert_allocation_row(allocation).await;
    }

    pub async fn payment(&self, id: i64) -> Payment {
        self.repo.find_payment(COMPANY, id).await.unwrap().unwrap()
    }

    pub async fn invoice(&self, id: i64) -> Invoice {
        self.repo.find_invoice(COMPANY, id).await.unwrap().unwrap()
    }
}
