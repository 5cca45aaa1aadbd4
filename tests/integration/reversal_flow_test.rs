// Reversal gating, batch and bulk reversals, impact analysis and history

#[path = "../helpers/mod.rs"]
mod helpers;

use chrono::{Duration, Utc};
use helpers::{
    accountant, allocation_row, date, invoice, payment, today, viewer, Harness, COMPANY,
};
use payalloc::allocations::models::{
    AllocationInstruction, AllocationMethod, PaymentAllocation, ReversalItemStatus,
};
use payalloc::allocations::AllocationRepository;
use payalloc::audit::AuditEventKind;
use payalloc::core::AppError;
use payalloc::invoices::{InvoicePaymentStatus, InvoiceStatus};
use payalloc::payments::PaymentStatus;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Payment 1 (300.00) fully spread over invoices 1..=3, oldest row first
async fn allocated() -> Harness {
    let h = Harness::new();
    let mut completed = payment(1, 10, dec!(300.00));
    completed.status = PaymentStatus::Completed;
    h.seed_payment(completed).await;
    for id in 1..=3 {
        h.seed_invoice(invoice(id, 10, dec!(100.00), date(2024, 1, 1))).await;
    }

    let base = Utc::now() - Duration::hours(3);
    for id in 1..=3 {
        h.seed_allocation(PaymentAllocation {
            created_at: base + Duration::minutes(id),
            ..allocation_row(id, 1, id, dec!(100.00), today())
        })
        .await;
    }
    h
}

#[tokio::test]
async fn test_reverse_single_restores_balances() {
    let h = allocated().await;

    let receipt = h
        .reversals
        .reverse_single(COMPANY, 2, "Customer disputed the charge", &accountant())
        .await
        .unwrap();

    assert!(receipt.allocation.is_reversed());
    assert_eq!(receipt.allocation.reversed_by, Some(accountant().user_id));
    assert_eq!(
        receipt.allocation.reversal_reason.as_deref(),
        Some("Customer disputed the charge")
    );
    assert_eq!(receipt.invoice_balance_due, dec!(100.00));
    assert_eq!(receipt.invoice_payment_status, InvoicePaymentStatus::Unpaid);
    assert_eq!(receipt.payment_status, PaymentStatus::Pending);
    assert_eq!(receipt.payment_remaining_amount, dec!(100.00));

    // tombstoned, not deleted
    assert_eq!(h.repo.allocation_count().await, 3);
    assert_eq!(h.payment(1).await.status, PaymentStatus::Pending);

    let reversed = h.audit.events_of(AuditEventKind::AllocationReversed);
    assert_eq!(reversed.len(), 1);
    assert_eq!(reversed[0].payload["allocation_id"], 2);
    assert_eq!(h.audit.events_of(AuditEventKind::PaymentStatusChanged).len(), 1);
}

#[tokio::test]
async fn test_second_reversal_is_rejected() {
    let h = allocated().await;
    h.reversals
        .reverse_single(COMPANY, 1, "Wrong invoice", &accountant())
        .await
        .unwrap();

    let err = h
        .reversals
        .reverse_single(COMPANY, 1, "Wrong invoice", &accountant())
        .await
        .unwrap_err();

    assert_eq!(err.rule_code(), Some("already_reversed"));
}

#[tokio::test]
async fn test_reversal_gating_rules() {
    let h = allocated().await;

    let old = today() - Duration::days(400);
    h.seed_invoice(invoice(4, 10, dec!(50.00), old)).await;
    h.seed_payment(payment(2, 10, dec!(100.00))).await;
    h.seed_allocation(allocation_row(10, 2, 4, dec!(50.00), old)).await;

    let mut cancelled = invoice(5, 10, dec!(50.00), date(2024, 1, 1));
    h.seed_invoice(cancelled.clone()).await;
    h.seed_allocation(allocation_row(11, 2, 5, dec!(50.00), today())).await;
    cancelled.status = InvoiceStatus::Cancelled;
    h.seed_invoice(cancelled).await;

    let too_old = h
        .reversals
        .reverse_single(COMPANY, 10, "Late correction", &accountant())
        .await
        .unwrap_err();
    assert_eq!(too_old.rule_code(), Some("too_old"));

    let on_cancelled = h
        .reversals
        .reverse_single(COMPANY, 11, "Late correction", &accountant())
        .await
        .unwrap_err();
    assert_eq!(on_cancelled.rule_code(), Some("invoice_cancelled"));

    let blank = h
        .reversals
        .reverse_single(COMPANY, 1, "   ", &accountant())
        .await
        .unwrap_err();
    assert!(matches!(blank, AppError::Validation(_)));

    let missing = h
        .reversals
        .reverse_single(COMPANY, 999, "Cleanup", &accountant())
        .await
        .unwrap_err();
    assert!(matches!(missing, AppError::NotFound(_)));

    let denied = h
        .reversals
        .reverse_single(COMPANY, 1, "Cleanup", &viewer())
        .await
        .unwrap_err();
    assert!(matches!(denied, AppError::Permission(_)));
}

#[tokio::test]
async fn test_batch_reports_each_item_in_order() {
    let h = allocated().await;
    h.reversals
        .reverse_single(COMPANY, 3, "Duplicate", &accountant())
        .await
        .unwrap();

    let result = h
        .reversals
        .reverse_batch(COMPANY, &[1, 3, 404], "Month-end cleanup", &accountant())
        .await
        .unwrap();

    assert_eq!(result.total, 3);
    assert_eq!(result.reversed_count, 1);
    assert_eq!(result.error_count, 2);
    assert_eq!(result.reversed_amount, dec!(100.00));

    let statuses: Vec<ReversalItemStatus> = result.results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            ReversalItemStatus::Reversed,
            ReversalItemStatus::AlreadyReversed,
            ReversalItemStatus::Error,
        ]
    );

    let batch = h.audit.events_of(AuditEventKind::BatchReversed);
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].payload["reversed_count"], 1);
}

#[tokio::test]
async fn test_batch_leaves_already_reversed_row_untouched() {
    let h = allocated().await;
    h.reversals
        .reverse_single(COMPANY, 2, "Duplicate", &accountant())
        .await
        .unwrap();
    let before = h.repo.find_allocation(COMPANY, 2).await.unwrap().unwrap();

    let result = h
        .reversals
        .reverse_batch(COMPANY, &[1, 2, 3], "Month-end cleanup", &accountant())
        .await
        .unwrap();

    assert_eq!(result.total, 3);
    assert_eq!(result.reversed_count, 2);
    assert_eq!(result.error_count, 1);
    assert_eq!(result.reversed_amount, dec!(200.00));
    let statuses: Vec<ReversalItemStatus> = result.results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            ReversalItemStatus::Reversed,
            ReversalItemStatus::AlreadyReversed,
            ReversalItemStatus::Reversed,
        ]
    );

    let after = h.repo.find_allocation(COMPANY, 2).await.unwrap().unwrap();
    assert_eq!(after.reversed_at, before.reversed_at);
    assert_eq!(after.reversal_reason.as_deref(), Some("Duplicate"));
    assert_eq!(after.reversed_by, before.reversed_by);
    assert_eq!(h.payment(1).await.total_allocated, Decimal::ZERO);
}

#[tokio::test]
async fn test_reverse_all_for_payment() {
    let h = allocated().await;

    let result = h
        .reversals
        .reverse_all_for_payment(COMPANY, 1, "Payment bounced", &accountant())
        .await
        .unwrap();

    let order: Vec<i64> = result.results.iter().map(|r| r.allocation_id).collect();
    assert_eq!(order, vec![3, 2, 1]);
    assert_eq!(result.reversed_amount, dec!(300.00));

    let payment = h.payment(1).await;
    assert_eq!(payment.total_allocated, Decimal::ZERO);
    assert_eq!(payment.status, PaymentStatus::Pending);

    let again = h
        .reversals
        .reverse_all_for_payment(COMPANY, 1, "Payment bounced", &accountant())
        .await
        .unwrap();
    assert_eq!(again.total, 0);
}

#[tokio::test]
async fn test_reverse_for_invoice_respects_cap() {
    let h = Harness::new();
    h.seed_invoice(invoice(1, 10, dec!(500.00), date(2024, 1, 1))).await;
    let base = Utc::now() - Duration::hours(1);
    for (id, amount) in [(1, dec!(100.00)), (2, dec!(50.00)), (3, dec!(80.00))] {
        h.seed_payment(payment(id, 10, dec!(200.00))).await;
        h.seed_allocation(PaymentAllocation {
            created_at: base + Duration::minutes(id),
            ..allocation_row(id, id, 1, amount, today())
        })
        .await;
    }

    // newest first: 80.00, then 50.00 (130.00), then 100.00 would exceed
    let result = h
        .reversals
        .reverse_for_invoice(COMPANY, 1, "Invoice reissued", &accountant(), Some(dec!(150.00)))
        .await
        .unwrap();

    let reversed: Vec<i64> = result.results.iter().map(|r| r.allocation_id).collect();
    assert_eq!(reversed, vec![3, 2]);
    assert_eq!(result.reversed_amount, dec!(130.00));
    assert_eq!(result.max_amount_limit, Some(dec!(150.00)));
    assert_eq!(h.invoice(1).await.total_allocated, dec!(100.00));

    let negative = h
        .reversals
        .reverse_for_invoice(COMPANY, 1, "Invoice reissued", &accountant(), Some(dec!(-1)))
        .await;
    assert!(matches!(negative, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn test_validate_reversal_sorts_issues() {
    let h = allocated().await;
    h.reversals
        .reverse_single(COMPANY, 2, "Duplicate", &accountant())
        .await
        .unwrap();

    let validation = h
        .reversals
        .validate_reversal(COMPANY, &[1, 2, 77], &accountant())
        .await
        .unwrap();

    assert!(!validation.valid);
    assert_eq!(validation.allocations.len(), 1);
    assert_eq!(validation.allocations[0].allocation_id, 1);
    assert_eq!(validation.allocations[0].invoice_number, "INV-0001");
    assert_eq!(validation.warnings.len(), 1);
    assert_eq!(validation.warnings[0].allocation_id, 2);
    assert_eq!(validation.errors.len(), 1);
    assert_eq!(validation.errors[0].allocation_id, 77);

    // a viewer can ask, but every active allocation is an error for them
    let as_viewer = h
        .reversals
        .validate_reversal(COMPANY, &[1], &viewer())
        .await
        .unwrap();
    assert!(!as_viewer.valid);
    assert!(as_viewer.allocations.is_empty());
}

#[tokio::test]
async fn test_reversal_impact_projects_without_writing() {
    let h = allocated().await;

    let impact = h
        .reversals
        .get_reversal_impact(COMPANY, &[1, 2], &viewer())
        .await
        .unwrap();

    assert_eq!(impact.total_reversal_amount, dec!(200.00));
    assert_eq!(impact.affected_invoices, 2);
    assert_eq!(impact.affected_payments, 1);
    assert_eq!(
        impact.invoice_impacts[0].projected_payment_status,
        InvoicePaymentStatus::Unpaid
    );
    assert_eq!(impact.payment_impacts[0].projected_remaining_amount, dec!(200.00));

    assert_eq!(h.payment(1).await.total_allocated, dec!(300.00));

    let empty = h
        .reversals
        .get_reversal_impact(COMPANY, &[404], &viewer())
        .await
        .unwrap();
    assert_eq!(empty.total_reversal_amount, Decimal::ZERO);
}

#[tokio::test]
async fn test_reversal_history_lists_reversed_only() {
    let h = allocated().await;
    h.reversals
        .reverse_single(COMPANY, 1, "First mistake", &accountant())
        .await
        .unwrap();
    h.reversals
        .reverse_single(COMPANY, 3, "Second mistake", &accountant())
        .await
        .unwrap();

    let history = h
        .reversals
        .get_reversal_history(COMPANY, &[1, 2, 3], &viewer())
        .await
        .unwrap();

    let ids: Vec<i64> = history.iter().map(|e| e.allocation_id).collect();
    assert_eq!(ids, vec![3, 1]);
    assert_eq!(history[0].reversal_reason.as_deref(), Some("Second mistake"));
    assert_eq!(history[0].payment_number, "PAY-0001");
}

#[tokio::test]
async fn test_allocate_again_after_reversal() {
    let h = allocated().await;
    h.reversals
        .reverse_single(COMPANY, 1, "Applied to wrong invoice", &accountant())
        .await
        .unwrap();

    h.seed_invoice(invoice(9, 10, dec!(100.00), date(2024, 2, 1))).await;
    h.allocations
        .allocate_across_invoices(
            COMPANY,
            1,
            &[AllocationInstruction {
                invoice_id: 9,
                amount: dec!(100.00),
                notes: Some("Reapplied".to_string()),
            }],
            &accountant(),
            AllocationMethod::Manual,
            None,
        )
        .await
        .unwrap();

    assert_eq!(h.payment(1).await.status, PaymentStatus::Completed);
}
