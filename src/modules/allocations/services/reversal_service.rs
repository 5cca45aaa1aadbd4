use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, warn};

use super::allocation_service::audit_failure;
use crate::config::AllocationConfig;
use crate::core::{retry_on_conflict, Actor, AppError, Permission, Result};
use crate::modules::allocations::models::{
    check_reversible, AllocationFilter, BatchReversalResult, InvoiceReversalImpact,
    PaymentAllocation, PaymentReversalImpact, ReversalBlock, ReversalHistoryEntry, ReversalImpact,
    ReversalIssue, ReversalItem, ReversalItemStatus, ReversalReceipt, ReversalValidation,
    ReversibleAllocation,
};
use crate::modules::allocations::repositories::{
    AllocationRepository, AllocationUnitOfWork, Lookup,
};
use crate::modules::audit::{record, AuditEvent, AuditEventKind, AuditSink};
use crate::modules::balances::services::BalanceCache;
use crate::modules::invoices::{Invoice, InvoicePaymentStatus};
use crate::modules::payments::{Payment, PaymentStatus};

struct ReversalOutcome {
    receipt: ReversalReceipt,
    previous_status: PaymentStatus,
    customer_ids: BTreeSet<i64>,
}

/// Service undoing allocations through the reversal tombstone
pub struct PaymentAllocationReversalService {
    repo: Arc<dyn AllocationRepository>,
    audit: Arc<dyn AuditSink>,
    balance_cache: Arc<BalanceCache>,
    config: AllocationConfig,
}

impl PaymentAllocationReversalService {
    pub fn new(
        repo: Arc<dyn AllocationRepository>,
        audit: Arc<dyn AuditSink>,
        balance_cache: Arc<BalanceCache>,
        config: AllocationConfig,
    ) -> Self {
        Self {
            repo,
            audit,
            balance_cache,
            config,
        }
    }

    /// Reverse one allocation. A second call fails with `already_reversed`.
    pub async fn reverse_single(
        &self,
        company_id: i64,
        allocation_id: i64,
        reason: &str,
        actor: &Actor,
    ) -> Result<ReversalReceipt> {
        actor.authorize(company_id, Permission::AllocationsReverse)?;
        validate_reason(reason)?;

        self.reverse_authorized(company_id, allocation_id, reason, actor)
            .await
    }

    /// Reverse each allocation in its own unit of work; per-item failures
    /// are reported in the result, in caller order.
    pub async fn reverse_batch(
        &self,
        company_id: i64,
        allocation_ids: &[i64],
        reason: &str,
        actor: &Actor,
    ) -> Result<BatchReversalResult> {
        actor.authorize(company_id, Permission::AllocationsReverse)?;
        validate_reason(reason)?;

        let result = self
            .reverse_each(company_id, allocation_ids, reason, actor)
            .await;

        record(
            self.audit.as_ref(),
            AuditEvent::new(
                AuditEventKind::BatchReversed,
                company_id,
                actor.user_id,
                json!({
                    "allocation_ids": allocation_ids,
                    "reason": reason,
                    "total": result.total,
                    "reversed_count": result.reversed_count,
                    "error_count": result.error_count,
                    "reversed_amount": result.reversed_amount,
                }),
            ),
        )
        .await;

        Ok(result)
    }

    /// Reverse every active allocation of a payment, newest first
    pub async fn reverse_all_for_payment(
        &self,
        company_id: i64,
        payment_id: i64,
        reason: &str,
        actor: &Actor,
    ) -> Result<BatchReversalResult> {
        actor.authorize(company_id, Permission::AllocationsReverse)?;
        validate_reason(reason)?;

        self.repo
            .find_payment(company_id, payment_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Payment {}", payment_id)))?;

        let mut allocations = self
            .repo
            .list_allocations(company_id, &AllocationFilter::for_payment(payment_id))
            .await?;
        newest_first(&mut allocations);

        let ids: Vec<i64> = allocations.iter().map(|a| a.id).collect();
        info!(
            company_id = company_id,
            payment_id = payment_id,
            allocations = ids.len(),
            "Reversing all allocations of payment"
        );

        self.reverse_batch(company_id, &ids, reason, actor).await
    }

    /// Reverse an invoice's active allocations, newest first.
    ///
    /// With `max_amount`, only the longest newest-first prefix whose
    /// cumulative amount stays within the cap is reversed.
    pub async fn reverse_for_invoice(
        &self,
        company_id: i64,
        invoice_id: i64,
        reason: &str,
        actor: &Actor,
        max_amount: Option<Decimal>,
    ) -> Result<BatchReversalResult> {
        actor.authorize(company_id, Permission::AllocationsReverse)?;
        validate_reason(reason)?;

        if max_amount.is_some_and(|max| max < Decimal::ZERO) {
            return Err(AppError::validation("max_amount cannot be negative"));
        }

        self.repo
            .find_invoice(company_id, invoice_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Invoice {}", invoice_id)))?;

        let mut allocations = self
            .repo
            .list_allocations(company_id, &AllocationFilter::for_invoice(invoice_id))
            .await?;
        newest_first(&mut allocations);

        let ids = select_within_cap(&allocations, max_amount);

        let mut result = self.reverse_batch(company_id, &ids, reason, actor).await?;
        result.max_amount_limit = max_amount;
        Ok(result)
    }

    /// Dry run: which of these allocations could the actor reverse right now
    pub async fn validate_reversal(
        &self,
        company_id: i64,
        allocation_ids: &[i64],
        actor: &Actor,
    ) -> Result<ReversalValidation> {
        actor.authorize(company_id, Permission::AllocationsView)?;

        let today = Utc::now().date_naive();
        let max_age = self.config.reversal_max_age_days;
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut reversible = Vec::new();

        for &allocation_id in allocation_ids {
            let issue = |message: String| ReversalIssue {
                allocation_id,
                message,
            };

            let Some(allocation) = self.repo.find_allocation(company_id, allocation_id).await?
            else {
                errors.push(issue(format!("Allocation {} not found", allocation_id)));
                continue;
            };

            if allocation.is_reversed() {
                warnings.push(issue(ReversalBlock::AlreadyReversed.message(max_age)));
                continue;
            }

            if let Err(e) = actor.authorize(company_id, Permission::AllocationsReverse) {
                errors.push(issue(e.to_string()));
                continue;
            }

            let (Some(invoice), Some(payment)) = (
                self.repo.find_invoice(company_id, allocation.invoice_id).await?,
                self.repo.find_payment(company_id, allocation.payment_id).await?,
            ) else {
                errors.push(issue("Allocation references a missing invoice or payment".to_string()));
                continue;
            };

            if let Some(block) = check_reversible(&allocation, &invoice, today, max_age) {
                errors.push(issue(block.message(max_age)));
                continue;
            }

            reversible.push(ReversibleAllocation {
                allocation_id,
                allocated_amount: allocation.allocated_amount,
                allocation_date: allocation.allocation_date,
                invoice_number: invoice.invoice_number,
                payment_number: payment.payment_number,
            });
        }

        Ok(ReversalValidation {
            valid: errors.is_empty(),
            errors,
            warnings,
            allocations: reversible,
        })
    }

    /// Projected balances if the active allocations among `allocation_ids`
    /// were reversed
    pub async fn get_reversal_impact(
        &self,
        company_id: i64,
        allocation_ids: &[i64],
        actor: &Actor,
    ) -> Result<ReversalImpact> {
        actor.authorize(company_id, Permission::AllocationsView)?;

        let allocations: Vec<PaymentAllocation> = self
            .repo
            .find_allocations(company_id, allocation_ids)
            .await?
            .into_iter()
            .filter(PaymentAllocation::is_active)
            .collect();

        if allocations.is_empty() {
            return Ok(ReversalImpact::empty());
        }

        let mut by_invoice: BTreeMap<i64, Decimal> = BTreeMap::new();
        let mut by_payment: BTreeMap<i64, Decimal> = BTreeMap::new();
        for allocation in &allocations {
            *by_invoice.entry(allocation.invoice_id).or_default() += allocation.allocated_amount;
            *by_payment.entry(allocation.payment_id).or_default() += allocation.allocated_amount;
        }

        let mut invoice_impacts = Vec::with_capacity(by_invoice.len());
        for (&invoice_id, &amount) in &by_invoice {
            if let Some(invoice) = self.repo.find_invoice(company_id, invoice_id).await? {
                invoice_impacts.push(project_invoice(&invoice, amount));
            }
        }

        let mut payment_impacts = Vec::with_capacity(by_payment.len());
        for (&payment_id, &amount) in &by_payment {
            if let Some(payment) = self.repo.find_payment(company_id, payment_id).await? {
                payment_impacts.push(project_payment(&payment, amount));
            }
        }

        Ok(ReversalImpact {
            total_reversal_amount: allocations.iter().map(|a| a.allocated_amount).sum(),
            affected_invoices: by_invoice.len(),
            affected_payments: by_payment.len(),
            invoice_impacts,
            payment_impacts,
        })
    }

    /// Reversed allocations among `allocation_ids`, most recent reversal first
    pub async fn get_reversal_history(
        &self,
        company_id: i64,
        allocation_ids: &[i64],
        actor: &Actor,
    ) -> Result<Vec<ReversalHistoryEntry>> {
        actor.authorize(company_id, Permission::AllocationsView)?;

        let mut reversed: Vec<PaymentAllocation> = self
            .repo
            .find_allocations(company_id, allocation_ids)
            .await?
            .into_iter()
            .filter(PaymentAllocation::is_reversed)
            .collect();
        reversed.sort_by(|a, b| b.reversed_at.cmp(&a.reversed_at).then(b.id.cmp(&a.id)));

        let mut history = Vec::with_capacity(reversed.len());
        for allocation in reversed {
            let Some(reversed_at) = allocation.reversed_at else {
                continue;
            };
            let invoice_number = self
                .repo
                .find_invoice(company_id, allocation.invoice_id)
                .await?
                .map(|i| i.invoice_number)
                .unwrap_or_default();
            let payment_number = self
                .repo
                .find_payment(company_id, allocation.payment_id)
                .await?
                .map(|p| p.payment_number)
                .unwrap_or_default();

            history.push(ReversalHistoryEntry {
                allocation_id: allocation.id,
                reversed_at,
                reversal_reason: allocation.reversal_reason,
                reversed_by: allocation.reversed_by,
                allocated_amount: allocation.allocated_amount,
                allocation_date: allocation.allocation_date,
                invoice_number,
                payment_number,
            });
        }

        Ok(history)
    }

    async fn reverse_each(
        &self,
        company_id: i64,
        allocation_ids: &[i64],
        reason: &str,
        actor: &Actor,
    ) -> BatchReversalResult {
        let mut items = Vec::with_capacity(allocation_ids.len());

        for &allocation_id in allocation_ids {
            let item = match self
                .reverse_authorized(company_id, allocation_id, reason, actor)
                .await
            {
                Ok(receipt) => ReversalItem {
                    allocation_id,
                    status: ReversalItemStatus::Reversed,
                    amount: Some(receipt.allocation.allocated_amount),
                    message: None,
                },
                Err(e) if e.rule_code() == Some(ReversalBlock::AlreadyReversed.code()) => {
                    ReversalItem {
                        allocation_id,
                        status: ReversalItemStatus::AlreadyReversed,
                        amount: None,
                        message: Some(e.to_string()),
                    }
                }
                Err(e) => ReversalItem {
                    allocation_id,
                    status: ReversalItemStatus::Error,
                    amount: None,
                    message: Some(e.to_string()),
                },
            };
            items.push(item);
        }

        BatchReversalResult::from_items(items)
    }

    async fn reverse_authorized(
        &self,
        company_id: i64,
        allocation_id: i64,
        reason: &str,
        actor: &Actor,
    ) -> Result<ReversalReceipt> {
        let outcome = retry_on_conflict(
            self.config.conflict_retry_attempts,
            "reverse_allocation",
            move || self.reverse_once(company_id, allocation_id, reason, actor),
        )
        .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    company_id = company_id,
                    allocation_id = allocation_id,
                    actor_id = actor.user_id,
                    error = %e,
                    "Allocation reversal rejected"
                );
                audit_failure(
                    self.audit.as_ref(),
                    "reverse_allocation",
                    company_id,
                    actor,
                    json!({ "allocation_id": allocation_id }),
                    &e,
                )
                .await;
                return Err(e);
            }
        };

        for customer_id in &outcome.customer_ids {
            self.balance_cache.invalidate(company_id, Some(*customer_id));
        }

        let receipt = outcome.receipt;
        info!(
            company_id = company_id,
            allocation_id = allocation_id,
            payment_id = receipt.allocation.payment_id,
            invoice_id = receipt.allocation.invoice_id,
            amount = %receipt.allocation.allocated_amount,
            "Allocation reversed"
        );

        record(
            self.audit.as_ref(),
            AuditEvent::new(
                AuditEventKind::AllocationReversed,
                company_id,
                actor.user_id,
                json!({
                    "allocation_id": allocation_id,
                    "payment_id": receipt.allocation.payment_id,
                    "invoice_id": receipt.allocation.invoice_id,
                    "amount": receipt.allocation.allocated_amount,
                    "reason": reason,
                    "invoice_balance_due": receipt.invoice_balance_due,
                }),
            ),
        )
        .await;

        if receipt.payment_status != outcome.previous_status {
            record(
                self.audit.as_ref(),
                AuditEvent::new(
                    AuditEventKind::PaymentStatusChanged,
                    company_id,
                    actor.user_id,
                    json!({
                        "payment_id": receipt.allocation.payment_id,
                        "from": outcome.previous_status,
                        "to": receipt.payment_status,
                    }),
                ),
            )
            .await;
        }

        Ok(receipt)
    }

    async fn reverse_once(
        &self,
        company_id: i64,
        allocation_id: i64,
        reason: &str,
        actor: &Actor,
    ) -> Result<ReversalOutcome> {
        // unlocked read to learn which payment and invoice to lock first
        let snapshot = self
            .repo
            .find_allocation(company_id, allocation_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Allocation {}", allocation_id)))?;

        let mut uow = self.repo.begin().await?;
        let outcome = self
            .reverse_in(uow.as_mut(), company_id, &snapshot, reason, actor)
            .await;

        match outcome {
            Ok(outcome) => {
                uow.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback_err) = uow.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn reverse_in(
        &self,
        uow: &mut dyn AllocationUnitOfWork,
        company_id: i64,
        snapshot: &PaymentAllocation,
        reason: &str,
        actor: &Actor,
    ) -> Result<ReversalOutcome> {
        let max_age = self.config.reversal_max_age_days;

        let payment = uow
            .lock_payment(company_id, snapshot.payment_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Payment {}", snapshot.payment_id)))?;
        let invoice = match uow.lock_invoice(company_id, snapshot.invoice_id).await? {
            Lookup::Found(invoice) => invoice,
            _ => return Err(AppError::not_found(format!("Invoice {}", snapshot.invoice_id))),
        };
        let allocation = uow
            .lock_allocation(company_id, snapshot.id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Allocation {}", snapshot.id)))?;

        if let Some(block) =
            check_reversible(&allocation, &invoice, Utc::now().date_naive(), max_age)
        {
            return Err(block.into_error(max_age));
        }

        let reversed_at = Utc::now();
        if !uow
            .mark_allocation_reversed(company_id, allocation.id, reason, actor.user_id, reversed_at)
            .await?
        {
            return Err(ReversalBlock::AlreadyReversed.into_error(max_age));
        }

        let mut payment_after = uow
            .lock_payment(company_id, payment.id)
            .await?
            .ok_or_else(|| AppError::conflict(format!("payment {} vanished", payment.id)))?;
        let invoice_after = match uow.lock_invoice(company_id, invoice.id).await? {
            Lookup::Found(invoice) => invoice,
            _ => return Err(AppError::conflict(format!("invoice {} vanished", invoice.id))),
        };

        if payment_after.total_allocated != payment.total_allocated - allocation.allocated_amount {
            return Err(AppError::conflict(format!(
                "payment {} allocations changed concurrently",
                payment.payment_number
            )));
        }

        let previous_status = payment_after.status;
        let settled = payment_after.settled_status();
        if settled != previous_status {
            uow.update_payment_status(company_id, payment.id, settled)
                .await?;
            payment_after.status = settled;
        }

        let receipt = ReversalReceipt {
            allocation: PaymentAllocation {
                reversed_at: Some(reversed_at),
                reversal_reason: Some(reason.to_string()),
                reversed_by: Some(actor.user_id),
                ..allocation
            },
            invoice_balance_due: invoice_after.balance_due(),
            invoice_payment_status: invoice_after.payment_status(),
            payment_status: payment_after.status,
            payment_remaining_amount: payment_after.remaining_amount(),
        };

        Ok(ReversalOutcome {
            receipt,
            previous_status,
            customer_ids: [payment.customer_id, invoice.customer_id].into_iter().collect(),
        })
    }
}

fn validate_reason(reason: &str) -> Result<()> {
    if reason.trim().is_empty() {
        return Err(AppError::validation("a reversal reason is required"));
    }
    Ok(())
}

fn newest_first(allocations: &mut [PaymentAllocation]) {
    allocations.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

/// Longest prefix whose running total stays within `max_amount`
pub fn select_within_cap(allocations: &[PaymentAllocation], max_amount: Option<Decimal>) -> Vec<i64> {
    let Some(max_amount) = max_amount else {
        return allocations.iter().map(|a| a.id).collect();
    };

    let mut cumulative = Decimal::ZERO;
    allocations
        .iter()
        .take_while(|a| {
            cumulative += a.allocated_amount;
            cumulative <= max_amount
        })
        .map(|a| a.id)
        .collect()
}

fn project_invoice(invoice: &Invoice, reversal_amount: Decimal) -> InvoiceReversalImpact {
    let projected_allocated = invoice.total_allocated - reversal_amount;
    let projected_balance = invoice.balance_due() + reversal_amount;

    InvoiceReversalImpact {
        invoice_id: invoice.id,
        invoice_number: invoice.invoice_number.clone(),
        current_balance_due: invoice.balance_due(),
        current_payment_status: invoice.payment_status(),
        reversal_amount,
        projected_balance_due: projected_balance,
        projected_payment_status: InvoicePaymentStatus::derive(
            projected_allocated,
            projected_balance,
        ),
    }
}

fn project_payment(payment: &Payment, reversal_amount: Decimal) -> PaymentReversalImpact {
    PaymentReversalImpact {
        payment_id: payment.id,
        payment_number: payment.payment_number.clone(),
        current_total_allocated: payment.total_allocated,
        current_remaining_amount: payment.remaining_amount(),
        reversal_amount,
        projected_total_allocated: payment.total_allocated - reversal_amount,
        projected_remaining_amount: payment.remaining_amount() + reversal_amount,
    }
}
