// Manual and strategy-driven allocation through PaymentAllocationService

#[path = "../helpers/mod.rs"]
mod helpers;

use helpers::{accountant, date, invoice, outsider, payment, viewer, Harness, COMPANY, OTHER_COMPANY};
use payalloc::allocations::models::{
    AllocationInstruction, AllocationMethod, AllocationStrategy, StrategyOptions,
};
use payalloc::audit::AuditEventKind;
use payalloc::core::{AppError, Currency};
use payalloc::invoices::{InvoicePaymentStatus, InvoiceStatus};
use payalloc::payments::PaymentStatus;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn line(invoice_id: i64, amount: Decimal) -> AllocationInstruction {
    AllocationInstruction {
        invoice_id,
        amount,
        notes: None,
    }
}

async fn seeded() -> Harness {
    let h = Harness::new();
    h.seed_payment(payment(1, 10, dec!(500.00))).await;
    h.seed_invoice(invoice(1, 10, dec!(200.00), date(2024, 1, 10))).await;
    h.seed_invoice(invoice(2, 10, dec!(300.00), date(2024, 2, 10))).await;
    h.seed_invoice(invoice(3, 10, dec!(400.00), date(2024, 3, 10))).await;
    h
}

#[tokio::test]
async fn test_manual_batch_reports_balances_in_order() {
    let h = seeded().await;

    let results = h
        .allocations
        .allocate_across_invoices(
            COMPANY,
            1,
            &[line(2, dec!(100.00)), line(1, dec!(200.00)), line(2, dec!(50.00))],
            &accountant(),
            AllocationMethod::Manual,
            None,
        )
        .await
        .expect("batch should be accepted");

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].invoice_id, 2);
    assert_eq!(results[0].previous_balance, dec!(300.00));
    assert_eq!(results[0].new_balance, dec!(200.00));
    assert_eq!(results[2].previous_balance, dec!(200.00));
    assert_eq!(results[2].new_balance, dec!(150.00));
    assert_eq!(results[1].invoice_number, "INV-0001");

    let payment = h.payment(1).await;
    assert_eq!(payment.total_allocated, dec!(350.00));
    assert_eq!(payment.remaining_amount(), dec!(150.00));
    assert_eq!(payment.status, PaymentStatus::Pending);

    assert_eq!(h.invoice(1).await.payment_status(), InvoicePaymentStatus::Paid);
    assert_eq!(
        h.invoice(2).await.payment_status(),
        InvoicePaymentStatus::PartiallyPaid
    );

    let allocated = h.audit.events_of(AuditEventKind::PaymentAllocated);
    assert_eq!(allocated.len(), 1);
    assert_eq!(allocated[0].payload["allocations"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_full_allocation_completes_payment() {
    let h = seeded().await;

    h.allocations
        .allocate_across_invoices(
            COMPANY,
            1,
            &[line(1, dec!(200.00)), line(2, dec!(300.00))],
            &accountant(),
            AllocationMethod::Manual,
            None,
        )
        .await
        .unwrap();

    assert_eq!(h.payment(1).await.status, PaymentStatus::Completed);

    let changes = h.audit.events_of(AuditEventKind::PaymentStatusChanged);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].payload["from"], "pending");
    assert_eq!(changes[0].payload["to"], "completed");
}

#[tokio::test]
async fn test_batch_is_all_or_nothing() {
    let h = seeded().await;

    // second line over-allocates invoice 1 cumulatively
    let err = h
        .allocations
        .allocate_across_invoices(
            COMPANY,
            1,
            &[line(1, dec!(150.00)), line(1, dec!(60.00))],
            &accountant(),
            AllocationMethod::Manual,
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(h.repo.allocation_count().await, 0);
    assert_eq!(h.payment(1).await.total_allocated, Decimal::ZERO);
    assert!(h.audit.events_of(AuditEventKind::PaymentAllocated).is_empty());
}

#[tokio::test]
async fn test_rejects_more_than_remaining_payment() {
    let h = seeded().await;

    let err = h
        .allocations
        .allocate_across_invoices(
            COMPANY,
            1,
            &[line(3, dec!(400.00)), line(2, dec!(150.00))],
            &accountant(),
            AllocationMethod::Manual,
            None,
        )
        .await
        .unwrap_err();

    assert!(err.to_string().contains("exceeds remaining payment amount"));
}

#[tokio::test]
async fn test_rejects_invalid_amounts() {
    let h = seeded().await;

    for amount in [Decimal::ZERO, dec!(-5.00), dec!(10.001)] {
        let err = h
            .allocations
            .allocate_across_invoices(
                COMPANY,
                1,
                &[line(1, amount)],
                &accountant(),
                AllocationMethod::Manual,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)), "{} accepted", amount);
    }

    let err = h
        .allocations
        .allocate_across_invoices(
            COMPANY,
            1,
            &[],
            &accountant(),
            AllocationMethod::Manual,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn test_rejects_cancelled_foreign_currency_and_failed_payment() {
    let h = seeded().await;

    let mut cancelled = invoice(4, 10, dec!(100.00), date(2024, 1, 1));
    cancelled.status = InvoiceStatus::Cancelled;
    h.seed_invoice(cancelled).await;

    let mut euro = invoice(5, 10, dec!(100.00), date(2024, 1, 1));
    euro.currency = Currency::EUR;
    h.seed_invoice(euro).await;

    let mut failed = payment(2, 10, dec!(100.00));
    failed.status = PaymentStatus::Failed;
    h.seed_payment(failed).await;

    let attempt = |payment_id: i64, invoice_id: i64| {
        let h = &h;
        async move {
            h.allocations
                .allocate_across_invoices(
                    COMPANY,
                    payment_id,
                    &[line(invoice_id, dec!(10.00))],
                    &accountant(),
                    AllocationMethod::Manual,
                    None,
                )
                .await
        }
    };

    assert!(attempt(1, 4).await.unwrap_err().to_string().contains("cancelled"));
    assert!(attempt(1, 5).await.unwrap_err().to_string().contains("EUR"));
    assert!(attempt(2, 1).await.unwrap_err().to_string().contains("failed"));
    assert!(matches!(attempt(1, 99).await, Err(AppError::NotFound(_))));
    assert!(matches!(attempt(99, 1).await, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_cross_tenant_invoice_is_rejected() {
    let h = seeded().await;

    let mut foreign = invoice(7, 10, dec!(100.00), date(2024, 1, 1));
    foreign.company_id = OTHER_COMPANY;
    h.seed_invoice(foreign).await;

    let err = h
        .allocations
        .allocate_across_invoices(
            COMPANY,
            1,
            &[line(7, dec!(10.00))],
            &accountant(),
            AllocationMethod::Manual,
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Validation(_)));
    assert!(err.to_string().contains("cross-tenant"));
    assert_eq!(h.repo.allocation_count().await, 0);
    assert_eq!(h.payment(1).await.total_allocated, Decimal::ZERO);

    // a valid line alongside the foreign one is not written either
    let err = h
        .allocations
        .allocate_across_invoices(
            COMPANY,
            1,
            &[line(1, dec!(50.00)), line(7, dec!(10.00))],
            &accountant(),
            AllocationMethod::Manual,
            None,
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cross-tenant"));
    assert_eq!(h.repo.allocation_count().await, 0);
    assert_eq!(h.invoice(1).await.balance_due(), dec!(200.00));
}

#[tokio::test]
async fn test_permissions_are_enforced() {
    let h = seeded().await;

    let err = h
        .allocations
        .allocate_across_invoices(
            COMPANY,
            1,
            &[line(1, dec!(10.00))],
            &viewer(),
            AllocationMethod::Manual,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Permission(_)));

    let err = h
        .allocations
        .get_payment_allocation_summary(COMPANY, 1, &outsider())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Permission(_)));

    // viewers may read
    assert!(h
        .allocations
        .get_payment_allocation_summary(COMPANY, 1, &viewer())
        .await
        .is_ok());
}

#[tokio::test]
async fn test_method_and_strategy_must_agree() {
    let h = seeded().await;

    let automatic_without_strategy = h
        .allocations
        .allocate_across_invoices(
            COMPANY,
            1,
            &[line(1, dec!(10.00))],
            &accountant(),
            AllocationMethod::Automatic,
            None,
        )
        .await;
    assert!(matches!(automatic_without_strategy, Err(AppError::Validation(_))));

    let manual_with_strategy = h
        .allocations
        .allocate_across_invoices(
            COMPANY,
            1,
            &[line(1, dec!(10.00))],
            &accountant(),
            AllocationMethod::Manual,
            Some(AllocationStrategy::Fifo),
        )
        .await;
    assert!(matches!(manual_with_strategy, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn test_apply_fifo_strategy() {
    let h = seeded().await;

    let results = h
        .allocations
        .apply_strategy(
            COMPANY,
            1,
            AllocationStrategy::Fifo,
            &accountant(),
            &StrategyOptions::default(),
        )
        .await
        .unwrap();

    let split: Vec<(i64, Decimal)> = results
        .iter()
        .map(|r| (r.invoice_id, r.allocated_amount))
        .collect();
    assert_eq!(split, vec![(1, dec!(200.00)), (2, dec!(300.00))]);
    assert_eq!(h.payment(1).await.status, PaymentStatus::Completed);

    let summary = h
        .allocations
        .get_payment_allocation_summary(COMPANY, 1, &accountant())
        .await
        .unwrap();
    assert!(summary.is_fully_allocated);
    assert_eq!(summary.allocation_count, 2);
    assert!(summary.allocations.iter().all(|line| {
        line.allocation.allocation_method == AllocationMethod::Automatic
            && line.allocation.allocation_strategy == Some(AllocationStrategy::Fifo)
    }));

    let applied = h.audit.events_of(AuditEventKind::StrategyApplied);
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].payload["strategy"], "fifo");
}

#[tokio::test]
async fn test_strategy_skips_other_currencies_and_customers() {
    let h = seeded().await;

    let mut euro = invoice(4, 10, dec!(50.00), date(2023, 1, 1));
    euro.currency = Currency::EUR;
    h.seed_invoice(euro).await;
    h.seed_invoice(invoice(5, 11, dec!(50.00), date(2023, 1, 1))).await;

    let preview = h
        .allocations
        .preview_strategy(
            COMPANY,
            1,
            AllocationStrategy::Fifo,
            &accountant(),
            &StrategyOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(preview.candidate_count, 3);
    assert!(preview
        .plan
        .proposals
        .iter()
        .all(|p| p.invoice_id != 4 && p.invoice_id != 5));
}

#[tokio::test]
async fn test_strategy_without_candidates_returns_empty() {
    let h = Harness::new();
    h.seed_payment(payment(1, 10, dec!(100.00))).await;

    let results = h
        .allocations
        .apply_strategy(
            COMPANY,
            1,
            AllocationStrategy::Proportional,
            &accountant(),
            &StrategyOptions::default(),
        )
        .await
        .unwrap();

    assert!(results.is_empty());
    let failed = h.audit.events_of(AuditEventKind::PaymentAllocationFailed);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].payload["reason"], "no candidates");
}

#[tokio::test]
async fn test_preview_does_not_write() {
    let h = seeded().await;
    let options = StrategyOptions {
        percentages: vec![dec!(50), dec!(50)],
        ..Default::default()
    };

    let preview = h
        .allocations
        .preview_strategy(
            COMPANY,
            1,
            AllocationStrategy::PercentageBased,
            &viewer(),
            &options,
        )
        .await
        .unwrap();

    assert_eq!(preview.available_amount, dec!(500.00));
    assert_eq!(preview.plan.total_proposed, dec!(450.00));
    assert_eq!(preview.plan.residue, dec!(50.00));
    assert_eq!(h.repo.allocation_count().await, 0);
}

#[tokio::test]
async fn test_conflicts_are_retried() {
    let h = seeded().await;
    h.repo.inject_commit_conflicts(2);

    let results = h
        .allocations
        .allocate_across_invoices(
            COMPANY,
            1,
            &[line(1, dec!(100.00))],
            &accountant(),
            AllocationMethod::Manual,
            None,
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(h.repo.allocation_count().await, 1);
    assert_eq!(h.payment(1).await.total_allocated, dec!(100.00));
}

#[tokio::test]
async fn test_conflicts_beyond_retry_budget_surface() {
    let h = seeded().await;
    h.repo.inject_commit_conflicts(10);

    let err = h
        .allocations
        .allocate_across_invoices(
            COMPANY,
            1,
            &[line(1, dec!(100.00))],
            &accountant(),
            AllocationMethod::Manual,
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Conflict(_)));
    assert!(err.is_retryable());
    assert_eq!(h.repo.allocation_count().await, 0);
}
