use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::strategies;
use crate::config::AllocationConfig;
use crate::core::{retry_on_conflict, Actor, AppError, Permission, Result};
use crate::modules::allocations::models::{
    AllocationFilter, AllocationInstruction, AllocationLine, AllocationMethod, AllocationResult,
    AllocationStrategy, NewAllocation, PaymentAllocationSummary, StrategyDescription,
    StrategyOptions, StrategyParams, StrategyPlan,
};
use crate::modules::allocations::repositories::{
    AllocationRepository, AllocationUnitOfWork, Lookup,
};
use crate::modules::audit::{record, AuditEvent, AuditEventKind, AuditSink};
use crate::modules::balances::services::BalanceCache;
use crate::modules::invoices::Invoice;
use crate::modules::payments::{Payment, PaymentStatus};

/// Dry run of a strategy against a payment's current open invoices
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyPreview {
    pub payment_id: i64,
    pub available_amount: Decimal,
    pub candidate_count: usize,
    pub plan: StrategyPlan,
}

/// What a committed allocation batch changed
struct AllocationOutcome {
    results: Vec<AllocationResult>,
    payment: Payment,
    previous_status: PaymentStatus,
    customer_ids: BTreeSet<i64>,
}

/// Service distributing payments across invoices
pub struct PaymentAllocationService {
    repo: Arc<dyn AllocationRepository>,
    audit: Arc<dyn AuditSink>,
    balance_cache: Arc<BalanceCache>,
    config: AllocationConfig,
}

impl PaymentAllocationService {
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

    /// Apply a batch of allocations from one payment, all or nothing.
    ///
    /// Every instruction is validated against balances read under row locks
    /// before anything is written. Results come back in instruction order.
    pub async fn allocate_across_invoices(
        &self,
        company_id: i64,
        payment_id: i64,
        instructions: &[AllocationInstruction],
        actor: &Actor,
        method: AllocationMethod,
        strategy: Option<AllocationStrategy>,
    ) -> Result<Vec<AllocationResult>> {
        actor.authorize(company_id, Permission::AllocationsCreate)?;

        match (method, strategy) {
            (AllocationMethod::Automatic, None) => {
                return Err(AppError::validation(
                    "automatic allocations require a strategy",
                ))
            }
            (AllocationMethod::Manual, Some(_)) => {
                return Err(AppError::validation(
                    "manual allocations cannot carry a strategy",
                ))
            }
            _ => {}
        }

        if instructions.is_empty() {
            return Err(AppError::validation("at least one allocation is required"));
        }

        let outcome = retry_on_conflict(
            self.config.conflict_retry_attempts,
            "allocate_across_invoices",
            move || {
                self.allocate_once(company_id, payment_id, instructions, actor, method, strategy)
            },
        )
        .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    company_id = company_id,
                    payment_id = payment_id,
                    actor_id = actor.user_id,
                    error = %e,
                    "Payment allocation rejected"
                );
                audit_failure(
                    self.audit.as_ref(),
                    "allocate_across_invoices",
                    company_id,
                    actor,
                    json!({ "payment_id": payment_id, "instructions": instructions.len() }),
                    &e,
                )
                .await;
                return Err(e);
            }
        };

        for customer_id in &outcome.customer_ids {
            self.balance_cache.invalidate(company_id, Some(*customer_id));
        }

        let total: Decimal = outcome.results.iter().map(|r| r.allocated_amount).sum();
        info!(
            company_id = company_id,
            payment_id = payment_id,
            method = %method,
            strategy = ?strategy,
            allocations = outcome.results.len(),
            total_allocated = %total,
            "Payment allocated"
        );

        record(
            self.audit.as_ref(),
            AuditEvent::new(
                AuditEventKind::PaymentAllocated,
                company_id,
                actor.user_id,
                json!({
                    "payment_id": payment_id,
                    "payment_number": outcome.payment.payment_number,
                    "method": method,
                    "strategy": strategy,
                    "total_allocated": total,
                    "remaining_amount": outcome.payment.remaining_amount(),
                    "allocations": outcome.results.iter().map(|r| json!({
                        "allocation_id": r.allocation_id,
                        "invoice_id": r.invoice_id,
                        "amount": r.allocated_amount,
                    })).collect::<Vec<_>>(),
                }),
            ),
        )
        .await;

        if outcome.payment.status != outcome.previous_status {
            record(
                self.audit.as_ref(),
                AuditEvent::new(
                    AuditEventKind::PaymentStatusChanged,
                    company_id,
                    actor.user_id,
                    json!({
                        "payment_id": payment_id,
                        "from": outcome.previous_status,
                        "to": outcome.payment.status,
                    }),
                ),
            )
            .await;
        }

        Ok(outcome.results)
    }

    async fn allocate_once(
        &self,
        company_id: i64,
        payment_id: i64,
        instructions: &[AllocationInstruction],
        actor: &Actor,
        method: AllocationMethod,
        strategy: Option<AllocationStrategy>,
    ) -> Result<AllocationOutcome> {
        let mut uow = self.repo.begin().await?;

        let outcome = self
            .allocate_in(
                uow.as_mut(),
                company_id,
                payment_id,
                instructions,
                actor,
                method,
                strategy,
            )
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

    #[allow(clippy::too_many_arguments)]
    async fn allocate_in(
        &self,
        uow: &mut dyn AllocationUnitOfWork,
        company_id: i64,
        payment_id: i64,
        instructions: &[AllocationInstruction],
        actor: &Actor,
        method: AllocationMethod,
        strategy: Option<AllocationStrategy>,
    ) -> Result<AllocationOutcome> {
        let payment = uow
            .lock_payment(company_id, payment_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Payment {}", payment_id)))?;

        if payment.status == PaymentStatus::Failed {
            return Err(AppError::validation(format!(
                "payment {} has failed and cannot be allocated",
                payment.payment_number
            )));
        }

        for instruction in instructions {
            payment
                .currency
                .validate_amount(instruction.amount)
                .map_err(AppError::Validation)?;
        }

        let requested: Decimal = instructions.iter().map(|i| i.amount).sum();
        if requested > payment.remaining_amount() {
            return Err(AppError::validation(
                "allocation exceeds remaining payment amount",
            ));
        }

        // ascending id order keeps lock acquisition deadlock-free
        let invoice_ids: BTreeSet<i64> = instructions.iter().map(|i| i.invoice_id).collect();
        let mut invoices: HashMap<i64, Invoice> = HashMap::with_capacity(invoice_ids.len());
        for &invoice_id in &invoice_ids {
            let invoice = match uow.lock_invoice(company_id, invoice_id).await? {
                Lookup::Found(invoice) => invoice,
                Lookup::ForeignTenant => {
                    return Err(AppError::validation(format!(
                        "cross-tenant invoice {}",
                        invoice_id
                    )))
                }
                Lookup::Missing => {
                    return Err(AppError::not_found(format!("Invoice {}", invoice_id)))
                }
            };

            if invoice.is_cancelled() {
                return Err(AppError::validation(format!(
                    "invoice {} is cancelled",
                    invoice.invoice_number
                )));
            }
            if invoice.currency != payment.currency {
                return Err(AppError::validation(format!(
                    "invoice {} is in {} but payment is in {}",
                    invoice.invoice_number, invoice.currency, payment.currency
                )));
            }

            invoices.insert(invoice_id, invoice);
        }

        // cumulative per-invoice check across the batch
        let mut running: HashMap<i64, Decimal> = invoices
            .iter()
            .map(|(id, invoice)| (*id, invoice.balance_due()))
            .collect();
        for instruction in instructions {
            let balance = running.entry(instruction.invoice_id).or_default();
            if instruction.amount > *balance {
                return Err(AppError::validation(format!(
                    "allocation of {} exceeds balance due {} on invoice {}",
                    instruction.amount, *balance, instruction.invoice_id
                )));
            }
            *balance -= instruction.amount;
        }

        let allocation_date = Utc::now().date_naive();
        let mut balances: HashMap<i64, Decimal> = invoices
            .iter()
            .map(|(id, invoice)| (*id, invoice.balance_due()))
            .collect();
        let mut results = Vec::with_capacity(instructions.len());

        for instruction in instructions {
            let row = uow
                .insert_allocation(&NewAllocation {
                    company_id,
                    payment_id,
                    invoice_id: instruction.invoice_id,
                    allocated_amount: instruction.amount,
                    allocation_date,
                    allocation_method: method,
                    allocation_strategy: strategy,
                    notes: instruction.notes.clone(),
                    created_by: actor.user_id,
                })
                .await?;

            let balance = balances.entry(instruction.invoice_id).or_default();
            let previous_balance = *balance;
            *balance -= instruction.amount;

            let invoice_number = invoices
                .get(&instruction.invoice_id)
                .map(|invoice| invoice.invoice_number.clone())
                .unwrap_or_default();

            results.push(AllocationResult {
                allocation_id: row.id,
                invoice_id: instruction.invoice_id,
                invoice_number,
                allocated_amount: instruction.amount,
                previous_balance,
                new_balance: *balance,
            });
        }

        // re-derive under the locks; anything unexpected means a concurrent writer
        let mut payment_after = uow
            .lock_payment(company_id, payment_id)
            .await?
            .ok_or_else(|| AppError::conflict(format!("payment {} vanished", payment_id)))?;
        if payment_after.total_allocated != payment.total_allocated + requested
            || payment_after.total_allocated > payment_after.amount
        {
            return Err(AppError::conflict(format!(
                "payment {} allocations changed concurrently",
                payment.payment_number
            )));
        }

        for (&invoice_id, expected) in &balances {
            match uow.lock_invoice(company_id, invoice_id).await? {
                Lookup::Found(invoice)
                    if invoice.total_allocated <= invoice.total_amount
                        && invoice.balance_due() == *expected => {}
                _ => {
                    return Err(AppError::conflict(format!(
                        "invoice {} balance changed concurrently",
                        invoice_id
                    )))
                }
            }
        }

        let previous_status = payment_after.status;
        let settled = payment_after.settled_status();
        if settled != previous_status {
            uow.update_payment_status(company_id, payment_id, settled)
                .await?;
            payment_after.status = settled;
        }

        let mut customer_ids: BTreeSet<i64> =
            invoices.values().map(|invoice| invoice.customer_id).collect();
        customer_ids.insert(payment.customer_id);

        Ok(AllocationOutcome {
            results,
            payment: payment_after,
            previous_status,
            customer_ids,
        })
    }

    /// Allocate the payment's remaining amount with a strategy.
    ///
    /// Returns an empty list (and records why) when there is nothing to
    /// allocate.
    pub async fn apply_strategy(
        &self,
        company_id: i64,
        payment_id: i64,
        strategy: AllocationStrategy,
        actor: &Actor,
        options: &StrategyOptions,
    ) -> Result<Vec<AllocationResult>> {
        actor.authorize(company_id, Permission::AllocationsCreate)?;

        let (payment, candidates) = self.load_candidates(company_id, payment_id, strategy).await?;

        if candidates.is_empty() {
            self.record_strategy_failure(company_id, actor, &payment, strategy, "no candidates")
                .await;
            return Ok(Vec::new());
        }

        let params =
            StrategyParams::from_options(options, payment.currency, Utc::now().date_naive());
        let plan = strategies::apply(strategy, &candidates, payment.remaining_amount(), &params);

        if plan.is_empty() {
            self.record_strategy_failure(
                company_id,
                actor,
                &payment,
                strategy,
                "strategy returned no allocations",
            )
            .await;
            return Ok(Vec::new());
        }

        let instructions: Vec<AllocationInstruction> = plan
            .proposals
            .iter()
            .map(|proposal| AllocationInstruction {
                invoice_id: proposal.invoice_id,
                amount: proposal.amount,
                notes: Some(proposal.notes.clone()),
            })
            .collect();

        let results = self
            .allocate_across_invoices(
                company_id,
                payment_id,
                &instructions,
                actor,
                AllocationMethod::Automatic,
                Some(strategy),
            )
            .await?;

        if plan.residue > Decimal::ZERO {
            info!(
                company_id = company_id,
                payment_id = payment_id,
                strategy = %strategy,
                residue = %plan.residue,
                "Strategy left part of the payment unallocated"
            );
        }

        record(
            self.audit.as_ref(),
            AuditEvent::new(
                AuditEventKind::StrategyApplied,
                company_id,
                actor.user_id,
                json!({
                    "payment_id": payment_id,
                    "strategy": strategy,
                    "allocations": results.len(),
                    "total_allocated": plan.total_proposed,
                    "residue": plan.residue,
                }),
            ),
        )
        .await;

        Ok(results)
    }

    /// Run a strategy without writing anything
    pub async fn preview_strategy(
        &self,
        company_id: i64,
        payment_id: i64,
        strategy: AllocationStrategy,
        actor: &Actor,
        options: &StrategyOptions,
    ) -> Result<StrategyPreview> {
        actor.authorize(company_id, Permission::AllocationsView)?;

        let (payment, candidates) = self.load_candidates(company_id, payment_id, strategy).await?;
        let params =
            StrategyParams::from_options(options, payment.currency, Utc::now().date_naive());
        let available = payment.remaining_amount();

        Ok(StrategyPreview {
            payment_id,
            available_amount: available,
            candidate_count: candidates.len(),
            plan: strategies::apply(strategy, &candidates, available, &params),
        })
    }

    async fn load_candidates(
        &self,
        company_id: i64,
        payment_id: i64,
        strategy: AllocationStrategy,
    ) -> Result<(Payment, Vec<Invoice>)> {
        let payment = self
            .repo
            .find_payment(company_id, payment_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Payment {}", payment_id)))?;

        let candidates: Vec<Invoice> = self
            .repo
            .list_open_invoices(company_id, payment.customer_id, strategy.invoice_ordering())
            .await?
            .into_iter()
            .filter(|invoice| invoice.currency == payment.currency)
            .collect();

        Ok((payment, candidates))
    }

    async fn record_strategy_failure(
        &self,
        company_id: i64,
        actor: &Actor,
        payment: &Payment,
        strategy: AllocationStrategy,
        reason: &str,
    ) {
        info!(
            company_id = company_id,
            payment_id = payment.id,
            strategy = %strategy,
            reason = reason,
            "Strategy produced no allocations"
        );
        record(
            self.audit.as_ref(),
            AuditEvent::new(
                AuditEventKind::PaymentAllocationFailed,
                company_id,
                actor.user_id,
                json!({
                    "payment_id": payment.id,
                    "strategy": strategy,
                    "reason": reason,
                    "remaining_amount": payment.remaining_amount(),
                }),
            ),
        )
        .await;
    }

    pub async fn get_payment_allocation_summary(
        &self,
        company_id: i64,
        payment_id: i64,
        actor: &Actor,
    ) -> Result<PaymentAllocationSummary> {
        actor.authorize(company_id, Permission::AllocationsView)?;

        let payment = self
            .repo
            .find_payment(company_id, payment_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Payment {}", payment_id)))?;

        let mut filter = AllocationFilter::for_payment(payment_id);
        filter.include_reversed = true;
        let allocations = self.repo.list_allocations(company_id, &filter).await?;

        let mut invoice_numbers: HashMap<i64, String> = HashMap::new();
        for allocation in &allocations {
            if !invoice_numbers.contains_key(&allocation.invoice_id) {
                let number = self
                    .repo
                    .find_invoice(company_id, allocation.invoice_id)
                    .await?
                    .map(|invoice| invoice.invoice_number)
                    .unwrap_or_default();
                invoice_numbers.insert(allocation.invoice_id, number);
            }
        }

        let allocation_count = allocations.iter().filter(|a| a.is_active()).count();
        let reversed_count = allocations.len() - allocation_count;
        let lines = allocations
            .into_iter()
            .map(|allocation| AllocationLine {
                invoice_number: invoice_numbers
                    .get(&allocation.invoice_id)
                    .cloned()
                    .unwrap_or_default(),
                is_active: allocation.is_active(),
                allocation,
            })
            .collect();

        Ok(PaymentAllocationSummary {
            payment_id: payment.id,
            payment_number: payment.payment_number.clone(),
            currency: payment.currency,
            amount: payment.amount,
            status: payment.status,
            total_allocated: payment.total_allocated,
            remaining_amount: payment.remaining_amount(),
            is_fully_allocated: payment.is_fully_allocated(),
            allocation_count,
            reversed_count,
            allocations: lines,
        })
    }

    pub fn get_available_strategies(&self) -> Vec<StrategyDescription> {
        strategies::available_strategies()
    }
}

/// Record failures that are not the caller's fault (database, internal)
pub(crate) async fn audit_failure(
    sink: &dyn AuditSink,
    operation: &str,
    company_id: i64,
    actor: &Actor,
    payload: serde_json::Value,
    err: &AppError,
) {
    if !err.is_unclassified() {
        return;
    }

    record(
        sink,
        AuditEvent::new(
            AuditEventKind::OperationFailed,
            company_id,
            actor.user_id,
            json!({
                "operation": operation,
                "error": err.to_string(),
                "kind": err.kind(),
                "context": payload,
            }),
        ),
    )
    .await;
}
