use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};

use super::balance_cache::BalanceCache;
use crate::core::{Actor, AppError, Permission, Result};
use crate::modules::allocations::models::{AllocationFilter, PaymentAllocation};
use crate::modules::allocations::repositories::AllocationRepository;
use crate::modules::balances::models::{
    AgingBucket, AgingBucketSummary, AgingInvoice, AgingReport, AgingSummary,
    AllocationDistribution, AllocationEfficiencyMetrics, BalanceHistoryPoint,
    CompanyBalanceOverview, CustomerBalanceSummary, CustomerInvoiceLine, HistoryPeriod,
    InvoiceStatistics, PaymentStatistics, PaymentUtilisation, ReportPeriod, StrategyUsage,
};
use crate::modules::invoices::{Invoice, InvoiceStatus};
use crate::modules::payments::{Payment, PaymentStatus};

/// Upper bound on the number of points one history request may produce
const MAX_HISTORY_POINTS: usize = 731;

/// Derived balance views over invoices, payments and active allocations
pub struct BalanceTrackingService {
    repo: Arc<dyn AllocationRepository>,
    cache: Arc<BalanceCache>,
}

impl BalanceTrackingService {
    pub fn new(repo: Arc<dyn AllocationRepository>, cache: Arc<BalanceCache>) -> Self {
        Self { repo, cache }
    }

    /// Outstanding invoices of a customer against their unapplied payments
    pub async fn get_customer_balance_summary(
        &self,
        company_id: i64,
        customer_id: i64,
        actor: &Actor,
        use_cache: bool,
    ) -> Result<CustomerBalanceSummary> {
        actor.authorize(company_id, Permission::ReportsView)?;

        if use_cache {
            if let Some(summary) = self.cache.customer(company_id, customer_id) {
                debug!(company_id = company_id, customer_id = customer_id, "Customer balance cache hit");
                return Ok(summary);
            }
        }

        let invoices = self.repo.list_invoices(company_id, Some(customer_id)).await?;
        let payments = self.repo.list_payments(company_id, Some(customer_id)).await?;
        let today = Utc::now().date_naive();

        let unpaid: Vec<&Invoice> = invoices.iter().filter(|i| is_unsettled(i)).collect();
        let total_balance_due: Decimal = unpaid.iter().map(|i| i.balance_due()).sum();
        let total_allocated: Decimal = unpaid.iter().map(|i| i.total_allocated).sum();
        let unallocated_payments = unallocated_amount(&payments);

        let summary = CustomerBalanceSummary {
            company_id,
            customer_id,
            total_invoices: unpaid.len(),
            total_balance_due,
            total_allocated,
            unallocated_payments,
            net_balance: total_balance_due - unallocated_payments,
            invoices: unpaid
                .iter()
                .map(|invoice| CustomerInvoiceLine {
                    id: invoice.id,
                    invoice_number: invoice.invoice_number.clone(),
                    issue_date: invoice.issue_date,
                    due_date: invoice.due_date,
                    total_amount: invoice.total_amount,
                    balance_due: invoice.balance_due(),
                    total_allocated: invoice.total_allocated,
                    payment_status: invoice.payment_status(),
                    is_overdue: invoice.is_overdue(today),
                    days_overdue: invoice.days_overdue(today).max(0),
                })
                .collect(),
            updated_at: Utc::now(),
        };

        self.cache.store_customer(summary.clone());
        Ok(summary)
    }

    /// Open invoices grouped by how far past due they are
    pub async fn get_aging_report(
        &self,
        company_id: i64,
        customer_id: Option<i64>,
        as_of: Option<NaiveDate>,
        actor: &Actor,
    ) -> Result<AgingReport> {
        actor.authorize(company_id, Permission::ReportsView)?;

        let invoices = self.repo.list_invoices(company_id, customer_id).await?;
        let as_of = as_of.unwrap_or_else(|| Utc::now().date_naive());

        Ok(build_aging_report(company_id, customer_id, as_of, &invoices))
    }

    /// How much of the period's payments ended up allocated, and by which strategy
    pub async fn get_allocation_efficiency_metrics(
        &self,
        company_id: i64,
        start_date: NaiveDate,
        end_date: NaiveDate,
        actor: &Actor,
    ) -> Result<AllocationEfficiencyMetrics> {
        actor.authorize(company_id, Permission::ReportsView)?;
        validate_period(start_date, end_date)?;

        let payments: Vec<Payment> = self
            .repo
            .list_payments(company_id, None)
            .await?
            .into_iter()
            .filter(|p| p.status != PaymentStatus::Failed)
            .filter(|p| p.payment_date >= start_date && p.payment_date <= end_date)
            .collect();

        let payment_ids: BTreeSet<i64> = payments.iter().map(|p| p.id).collect();
        let allocations: Vec<PaymentAllocation> = self
            .repo
            .list_allocations(company_id, &AllocationFilter::default())
            .await?
            .into_iter()
            .filter(|a| payment_ids.contains(&a.payment_id))
            .collect();

        let mut distribution = AllocationDistribution::default();
        for payment in &payments {
            if payment.is_fully_allocated() {
                distribution.fully_allocated += 1;
            } else if payment.total_allocated > Decimal::ZERO {
                distribution.partially_allocated += 1;
            } else {
                distribution.unallocated += 1;
            }
        }

        Ok(AllocationEfficiencyMetrics {
            company_id,
            period: ReportPeriod {
                start_date,
                end_date,
            },
            payment_summary: payment_utilisation(&payments),
            allocation_distribution: distribution,
            strategy_usage: strategy_usage(&allocations),
            generated_at: Utc::now(),
        })
    }

    /// Company-wide totals, statistics and aging, cached per company
    pub async fn get_company_balance_overview(
        &self,
        company_id: i64,
        actor: &Actor,
    ) -> Result<CompanyBalanceOverview> {
        actor.authorize(company_id, Permission::ReportsView)?;

        if let Some(overview) = self.cache.overview(company_id) {
            debug!(company_id = company_id, "Company overview cache hit");
            return Ok(overview);
        }

        let invoices = self.repo.list_invoices(company_id, None).await?;
        let payments = self.repo.list_payments(company_id, None).await?;
        let today = Utc::now().date_naive();

        let unsettled: Vec<&Invoice> = invoices.iter().filter(|i| is_unsettled(i)).collect();
        let total_balance_due: Decimal = unsettled.iter().map(|i| i.balance_due()).sum();
        let total_allocated: Decimal = unsettled.iter().map(|i| i.total_allocated).sum();
        let unallocated = unallocated_amount(&payments);

        let customers: BTreeSet<i64> = invoices
            .iter()
            .map(|i| i.customer_id)
            .chain(payments.iter().map(|p| p.customer_id))
            .collect();

        let aging = build_aging_report(company_id, None, today, &invoices);

        let overview = CompanyBalanceOverview {
            company_id,
            total_balance_due,
            total_allocated,
            unallocated_amount: unallocated,
            net_balance: total_balance_due - unallocated,
            customer_count: customers.len(),
            invoice_statistics: invoice_statistics(&invoices, today),
            payment_statistics: payment_statistics(&payments),
            aging_summary: AgingSummary::from(&aging),
            updated_at: Utc::now(),
        };

        self.cache.store_overview(overview.clone());
        Ok(overview)
    }

    /// The customer's position at the end of each period between the two dates
    pub async fn get_customer_balance_history(
        &self,
        company_id: i64,
        customer_id: i64,
        start_date: NaiveDate,
        end_date: NaiveDate,
        period: HistoryPeriod,
        actor: &Actor,
    ) -> Result<Vec<BalanceHistoryPoint>> {
        actor.authorize(company_id, Permission::ReportsView)?;
        validate_period(start_date, end_date)?;

        if period_count(start_date, end_date, period) > MAX_HISTORY_POINTS as i64 {
            return Err(AppError::validation(format!(
                "balance history is limited to {} periods",
                MAX_HISTORY_POINTS
            )));
        }
        let periods = date_periods(start_date, end_date, period);

        let invoices = self.repo.list_invoices(company_id, Some(customer_id)).await?;
        let payments = self.repo.list_payments(company_id, Some(customer_id)).await?;
        let filter = AllocationFilter {
            customer_id: Some(customer_id),
            ..AllocationFilter::all()
        };
        let allocations = self.repo.list_allocations(company_id, &filter).await?;

        Ok(periods
            .into_iter()
            .map(|(start, end)| balance_at(&invoices, &payments, &allocations, start, end))
            .collect())
    }

    /// Drop cached views for one customer, or for the whole company
    pub fn clear_cache(
        &self,
        company_id: i64,
        customer_id: Option<i64>,
        actor: &Actor,
    ) -> Result<()> {
        actor.authorize(company_id, Permission::ReportsView)?;
        self.cache.invalidate(company_id, customer_id);
        info!(
            company_id = company_id,
            customer_id = ?customer_id,
            user_id = actor.user_id,
            "Balance cache cleared"
        );
        Ok(())
    }
}

fn is_unsettled(invoice: &Invoice) -> bool {
    !matches!(invoice.status, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
}

/// Unapplied cash: remaining amounts of payments that did not fail
fn unallocated_amount(payments: &[Payment]) -> Decimal {
    payments
        .iter()
        .filter(|p| p.status != PaymentStatus::Failed)
        .map(|p| p.remaining_amount().max(Decimal::ZERO))
        .sum()
}

fn validate_period(start_date: NaiveDate, end_date: NaiveDate) -> Result<()> {
    if start_date > end_date {
        return Err(AppError::validation(format!(
            "start_date {} is after end_date {}",
            start_date, end_date
        )));
    }
    Ok(())
}

fn build_aging_report(
    company_id: i64,
    customer_id: Option<i64>,
    as_of: NaiveDate,
    invoices: &[Invoice],
) -> AgingReport {
    let mut buckets: Vec<AgingBucketSummary> = AgingBucket::ALL
        .iter()
        .map(|&bucket| AgingBucketSummary {
            bucket,
            amount: Decimal::ZERO,
            count: 0,
            invoices: Vec::new(),
        })
        .collect();

    for invoice in invoices.iter().filter(|i| i.is_open()) {
        if customer_id.is_some_and(|id| id != invoice.customer_id) {
            continue;
        }

        let days_overdue = invoice.days_overdue(as_of).max(0);
        let bucket = AgingBucket::for_days_overdue(days_overdue);
        let Some(summary) = buckets.iter_mut().find(|b| b.bucket == bucket) else {
            continue;
        };

        summary.amount += invoice.balance_due();
        summary.count += 1;
        summary.invoices.push(AgingInvoice {
            id: invoice.id,
            invoice_number: invoice.invoice_number.clone(),
            customer_id: invoice.customer_id,
            due_date: invoice.due_date,
            days_overdue,
            balance_due: invoice.balance_due(),
        });
    }

    AgingReport {
        company_id,
        customer_id,
        as_of,
        generated_at: Utc::now(),
        total_amount_due: buckets.iter().map(|b| b.amount).sum(),
        total_invoices: buckets.iter().map(|b| b.count).sum(),
        buckets,
    }
}

fn payment_utilisation(payments: &[Payment]) -> PaymentUtilisation {
    let total_amount: Decimal = payments.iter().map(|p| p.amount).sum();
    let total_allocated: Decimal = payments.iter().map(|p| p.total_allocated).sum();

    PaymentUtilisation {
        total_payments: payments.len(),
        total_amount,
        total_allocated,
        total_unallocated: payments
            .iter()
            .map(|p| p.remaining_amount().max(Decimal::ZERO))
            .sum(),
        allocation_rate: percentage(total_allocated, total_amount),
    }
}

/// `part / whole` as a percentage with two decimal places; zero when `whole` is zero
pub(crate) fn percentage(part: Decimal, whole: Decimal) -> Decimal {
    if whole <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (part / whole * Decimal::ONE_HUNDRED).round_dp(2)
}

/// Per-strategy statistics over active allocations, "manual" included
pub(crate) fn strategy_usage(allocations: &[PaymentAllocation]) -> Vec<StrategyUsage> {
    let mut groups: BTreeMap<String, Vec<Decimal>> = BTreeMap::new();
    for allocation in allocations.iter().filter(|a| a.is_active()) {
        groups
            .entry(allocation.strategy_label())
            .or_default()
            .push(allocation.allocated_amount);
    }

    groups
        .into_iter()
        .map(|(strategy, amounts)| {
            let total: Decimal = amounts.iter().sum();
            let count = amounts.len();
            StrategyUsage {
                strategy,
                usage_count: count,
                total_amount: total,
                average_amount: (total / Decimal::from(count)).round_dp(2),
                min_amount: amounts.iter().copied().min().unwrap_or_default(),
                max_amount: amounts.iter().copied().max().unwrap_or_default(),
            }
        })
        .collect()
}

fn invoice_statistics(invoices: &[Invoice], today: NaiveDate) -> InvoiceStatistics {
    let mut stats = InvoiceStatistics {
        total: invoices.len(),
        ..Default::default()
    };
    for invoice in invoices {
        match invoice.status {
            InvoiceStatus::Draft => stats.draft += 1,
            InvoiceStatus::Sent => stats.sent += 1,
            InvoiceStatus::Posted => stats.posted += 1,
            InvoiceStatus::Paid => stats.paid += 1,
            InvoiceStatus::Cancelled => stats.cancelled += 1,
        }
        if is_unsettled(invoice) && invoice.is_overdue(today) {
            stats.overdue += 1;
        }
    }
    stats
}

fn payment_statistics(payments: &[Payment]) -> PaymentStatistics {
    let mut stats = PaymentStatistics {
        total: payments.len(),
        total_amount: payments.iter().map(|p| p.amount).sum(),
        ..Default::default()
    };
    for payment in payments {
        match payment.status {
            PaymentStatus::Pending => stats.pending += 1,
            PaymentStatus::Completed => stats.completed += 1,
            PaymentStatus::Failed => stats.failed += 1,
        }
    }
    stats
}

/// Number of periods `date_periods` yields for the range, without building them
fn period_count(start: NaiveDate, end: NaiveDate, period: HistoryPeriod) -> i64 {
    if end < start {
        return 0;
    }
    match period {
        HistoryPeriod::Daily => (end - start).num_days() + 1,
        HistoryPeriod::Weekly => ((end - start).num_days() + 7) / 7,
        HistoryPeriod::Monthly => {
            let months = |d: NaiveDate| i64::from(d.year()) * 12 + i64::from(d.month0());
            months(end) - months(start) + 1
        }
    }
}

/// (start, end) pairs covering `start..=end`; weeks are seven days from
/// `start`, months follow the calendar; the last period is clipped
pub(crate) fn date_periods(
    start: NaiveDate,
    end: NaiveDate,
    period: HistoryPeriod,
) -> Vec<(NaiveDate, NaiveDate)> {
    let mut periods = Vec::new();
    let mut current = start;

    while current <= end {
        let period_end = match period {
            HistoryPeriod::Daily => Some(current),
            HistoryPeriod::Weekly => current.checked_add_signed(Duration::days(6)),
            HistoryPeriod::Monthly => Some(last_day_of_month(current)),
        }
        .map_or(end, |date| date.min(end));

        periods.push((current, period_end));
        match period_end.succ_opt() {
            Some(next) => current = next,
            None => break,
        }
    }

    periods
}

fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    if date.month() == 12 {
        return NaiveDate::from_ymd_opt(date.year(), 12, 31).unwrap_or(date);
    }
    NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
        .and_then(|first| first.pred_opt())
        .unwrap_or(date)
}

/// Whether an allocation counted towards balances at the end of `date`
fn active_on(allocation: &PaymentAllocation, date: NaiveDate) -> bool {
    allocation.allocation_date <= date
        && allocation
            .reversed_at
            .map_or(true, |reversed_at| reversed_at.date_naive() > date)
}

fn balance_at(
    invoices: &[Invoice],
    payments: &[Payment],
    allocations: &[PaymentAllocation],
    period_start: NaiveDate,
    date: NaiveDate,
) -> BalanceHistoryPoint {
    let mut by_invoice: HashMap<i64, Decimal> = HashMap::new();
    let mut by_payment: HashMap<i64, Decimal> = HashMap::new();
    for allocation in allocations.iter().filter(|a| active_on(a, date)) {
        *by_invoice.entry(allocation.invoice_id).or_default() += allocation.allocated_amount;
        *by_payment.entry(allocation.payment_id).or_default() += allocation.allocated_amount;
    }

    let mut total_balance_due = Decimal::ZERO;
    let mut total_allocated = Decimal::ZERO;
    let mut invoice_count = 0;
    for invoice in invoices
        .iter()
        .filter(|i| !i.is_cancelled() && i.created_at.date_naive() <= date)
    {
        let allocated = by_invoice.get(&invoice.id).copied().unwrap_or_default();
        let balance = (invoice.total_amount - allocated).max(Decimal::ZERO);
        total_allocated += allocated;
        total_balance_due += balance;
        if balance > Decimal::ZERO {
            invoice_count += 1;
        }
    }

    let mut unallocated = Decimal::ZERO;
    let mut payment_count = 0;
    for payment in payments
        .iter()
        .filter(|p| p.status != PaymentStatus::Failed && p.payment_date <= date)
    {
        let allocated = by_payment.get(&payment.id).copied().unwrap_or_default();
        unallocated += (payment.amount - allocated).max(Decimal::ZERO);
        payment_count += 1;
    }

    BalanceHistoryPoint {
        period_start,
        period_end: date,
        total_balance_due,
        total_allocated,
        unallocated_amount: unallocated,
        net_balance: total_balance_due - unallocated,
        invoice_count,
        payment_count,
    }
}
