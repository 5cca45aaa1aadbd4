// The MySQL adapters against a real database: lock races, the allocate and
// reverse round trip, tenant checks, the audit table and API key lookup.
// Every test returns early when DATABASE_URL is unset.

#[path = "../helpers/test_database.rs"]
mod test_database;

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures_util::future::join_all;
use payalloc::allocations::models::{AllocationInstruction, AllocationMethod};
use payalloc::allocations::repositories::{AllocationUnitOfWork, Lookup};
use payalloc::allocations::{
    AllocationRepository, MySqlAllocationRepository, PaymentAllocationReversalService,
    PaymentAllocationService,
};
use payalloc::audit::{AuditSink, MySqlAuditSink};
use payalloc::balances::BalanceCache;
use payalloc::config::AllocationConfig;
use payalloc::core::{Actor, AppError, Permission, Role};
use payalloc::middleware::{hash_api_key, ApiKeyStore, MySqlApiKeyStore};
use payalloc::payments::PaymentStatus;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::MySqlPool;
use test_database::{connect, insert_invoice, insert_payment, invoice_allocated, unique_company};
use uuid::Uuid;

struct Engine {
    repo: Arc<MySqlAllocationRepository>,
    allocations: PaymentAllocationService,
    reversals: PaymentAllocationReversalService,
}

fn engine(pool: &MySqlPool) -> Engine {
    let repo = Arc::new(MySqlAllocationRepository::new(pool.clone()));
    let port: Arc<dyn AllocationRepository> = repo.clone();
    let sink: Arc<dyn AuditSink> = Arc::new(MySqlAuditSink::new(pool.clone()));
    let cache = Arc::new(BalanceCache::new(
        Duration::from_secs(300),
        Duration::from_secs(600),
    ));

    Engine {
        allocations: PaymentAllocationService::new(
            port.clone(),
            sink.clone(),
            cache.clone(),
            AllocationConfig::default(),
        ),
        reversals: PaymentAllocationReversalService::new(
            port,
            sink,
            cache,
            AllocationConfig::default(),
        ),
        repo,
    }
}

fn accountant(company_id: i64) -> Actor {
    Actor::new(
        100,
        company_id,
        Role::Accountant,
        vec![
            Permission::AllocationsCreate,
            Permission::AllocationsReverse,
            Permission::AllocationsView,
            Permission::ReportsView,
        ],
    )
}

fn due() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 31).unwrap()
}

fn line(invoice_id: i64, amount: Decimal) -> Vec<AllocationInstruction> {
    vec![AllocationInstruction {
        invoice_id,
        amount,
        notes: None,
    }]
}

#[tokio::test]
async fn test_concurrent_payments_cannot_over_allocate_invoice() {
    let Some(pool) = connect().await else { return };
    let company = unique_company();
    let actor = accountant(company);
    let engine = engine(&pool);

    for round in 0..3 {
        let invoice_id =
            insert_invoice(&pool, company, 10, &format!("INV-{}", round), dec!(50.00), due()).await;
        let mut payments = Vec::new();
        for n in 0..2 {
            let number = format!("PAY-{}-{}", round, n);
            payments.push(insert_payment(&pool, company, 10, &number, dec!(40.00)).await);
        }
        let lines = line(invoice_id, dec!(40.00));

        let outcomes = join_all(payments.iter().map(|&payment_id| {
            engine.allocations.allocate_across_invoices(
                company,
                payment_id,
                &lines,
                &actor,
                AllocationMethod::Manual,
                None,
            )
        }))
        .await;

        let succeeded = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
        assert_eq!(succeeded, 1, "round {}", round);

        let invoice = engine
            .repo
            .find_invoice(company, invoice_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(invoice.total_allocated, dec!(40.00));
        assert!(invoice.balance_due() >= Decimal::ZERO);
        assert_eq!(invoice_allocated(&pool, invoice_id).await, dec!(40.00));
    }
}

#[tokio::test]
async fn test_allocate_and_reverse_round_trip() {
    let Some(pool) = connect().await else { return };
    let company = unique_company();
    let actor = accountant(company);
    let engine = engine(&pool);

    let payment_id = insert_payment(&pool, company, 10, "PAY-1", dec!(100.00)).await;
    let first = insert_invoice(&pool, company, 10, "INV-1", dec!(60.00), due()).await;
    let second = insert_invoice(&pool, company, 10, "INV-2", dec!(70.00), due()).await;

    let results = engine
        .allocations
        .allocate_across_invoices(
            company,
            payment_id,
            &[
                AllocationInstruction {
                    invoice_id: first,
                    amount: dec!(60.00),
                    notes: Some("Wire".to_string()),
                },
                AllocationInstruction {
                    invoice_id: second,
                    amount: dec!(40.00),
                    notes: None,
                },
            ],
            &actor,
            AllocationMethod::Manual,
            None,
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].new_balance, Decimal::ZERO);
    assert_eq!(results[1].previous_balance, dec!(70.00));
    assert_eq!(results[1].new_balance, dec!(30.00));

    let payment = engine.repo.find_payment(company, payment_id).await.unwrap().unwrap();
    assert_eq!(payment.total_allocated, dec!(100.00));
    assert_eq!(payment.status, PaymentStatus::Completed);

    let stored = engine
        .repo
        .find_allocation(company, results[0].allocation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.allocated_amount, dec!(60.00));
    assert_eq!(stored.notes.as_deref(), Some("Wire"));
    assert!(stored.reversed_at.is_none());

    let receipt = engine
        .reversals
        .reverse_single(company, results[0].allocation_id, "Wrong invoice", &actor)
        .await
        .unwrap();
    assert_eq!(receipt.invoice_balance_due, dec!(60.00));
    assert_eq!(receipt.payment_status, PaymentStatus::Pending);
    assert_eq!(receipt.payment_remaining_amount, dec!(60.00));

    let reversed = engine
        .repo
        .find_allocation(company, results[0].allocation_id)
        .await
        .unwrap()
        .unwrap();
    assert!(reversed.reversed_at.is_some());
    assert_eq!(reversed.reversal_reason.as_deref(), Some("Wrong invoice"));
    assert_eq!(reversed.reversed_by, Some(100));

    let again = engine
        .reversals
        .reverse_single(company, results[0].allocation_id, "Wrong invoice", &actor)
        .await
        .unwrap_err();
    assert_eq!(again.rule_code(), Some("already_reversed"));

    let invoice = engine.repo.find_invoice(company, first).await.unwrap().unwrap();
    assert_eq!(invoice.balance_due(), dec!(60.00));
    let payment = engine.repo.find_payment(company, payment_id).await.unwrap().unwrap();
    assert_eq!(payment.total_allocated, dec!(40.00));
    assert_eq!(payment.status, PaymentStatus::Pending);

    let audit_kinds: Vec<String> = sqlx::query_scalar(
        "SELECT kind FROM audit_logs WHERE company_id = ? ORDER BY occurred_at, kind",
    )
    .bind(company)
    .fetch_all(&pool)
    .await
    .unwrap();
    assert!(audit_kinds.iter().any(|kind| kind == "payment.allocated"));
    assert_eq!(
        audit_kinds
            .iter()
            .filter(|kind| kind.as_str() == "allocation.reversed")
            .count(),
        1
    );
}

#[tokio::test]
async fn test_foreign_invoice_is_reported_without_locking() {
    let Some(pool) = connect().await else { return };
    let company = unique_company();
    let other = unique_company();
    let repo = MySqlAllocationRepository::new(pool.clone());
    let foreign = insert_invoice(&pool, other, 10, "INV-1", dec!(80.00), due()).await;

    let mut lookup_tx = repo.begin().await.unwrap();
    assert!(matches!(
        lookup_tx.lock_invoice(company, foreign).await.unwrap(),
        Lookup::ForeignTenant
    ));
    assert!(matches!(
        lookup_tx.lock_invoice(company, i64::MAX).await.unwrap(),
        Lookup::Missing
    ));

    // the owner still gets the row lock while the first transaction is open
    let mut owner_tx = repo.begin().await.unwrap();
    let owned = tokio::time::timeout(
        Duration::from_secs(2),
        owner_tx.lock_invoice(other, foreign),
    )
    .await
    .expect("owner blocked by a foreign tenant's lookup")
    .unwrap();
    match owned {
        Lookup::Found(invoice) => assert_eq!(invoice.total_allocated, Decimal::ZERO),
        _ => panic!("owner could not see its own invoice"),
    }

    owner_tx.rollback().await.unwrap();
    lookup_tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_api_key_store_resolves_active_keys() {
    let Some(pool) = connect().await else { return };
    let company = unique_company();
    let store = MySqlApiKeyStore::new(pool.clone());

    let active = format!("live_{}", Uuid::new_v4().simple());
    let revoked = format!("live_{}", Uuid::new_v4().simple());
    for (key, is_active) in [(&active, true), (&revoked, false)] {
        sqlx::query(
            r#"
            INSERT INTO api_keys (key_hash, company_id, user_id, role, permissions, is_active)
            VALUES (?, ?, 42, 'accountant', 'allocations.create, reports.view', ?)
            "#,
        )
        .bind(hash_api_key(key))
        .bind(company)
        .bind(is_active)
        .execute(&pool)
        .await
        .unwrap();
    }

    let actor = store.resolve(&hash_api_key(&active)).await.unwrap().unwrap();
    assert_eq!(actor.company_id, company);
    assert_eq!(actor.user_id, 42);
    assert_eq!(
        actor.permissions,
        vec![Permission::AllocationsCreate, Permission::ReportsView]
    );

    let last_used: Option<chrono::DateTime<chrono::Utc>> =
        sqlx::query_scalar("SELECT last_used_at FROM api_keys WHERE key_hash = ?")
            .bind(hash_api_key(&active))
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(last_used.is_some());

    assert!(store.resolve(&hash_api_key(&revoked)).await.unwrap().is_none());
    assert!(store.resolve(&hash_api_key("unknown")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_tenant_scope_on_reads() {
    let Some(pool) = connect().await else { return };
    let company = unique_company();
    let other = unique_company();
    let engine = engine(&pool);

    let payment_id = insert_payment(&pool, company, 10, "PAY-1", dec!(25.00)).await;
    assert!(engine.repo.find_payment(other, payment_id).await.unwrap().is_none());

    let err = engine
        .allocations
        .allocate_across_invoices(
            other,
            payment_id,
            &line(i64::MAX, dec!(10.00)),
            &accountant(other),
            AllocationMethod::Manual,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
