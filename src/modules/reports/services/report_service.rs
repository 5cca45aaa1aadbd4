use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::info;

use crate::core::{Actor, AppError, Permission, Result};
use crate::modules::allocations::models::{AllocationFilter, PaymentAllocation};
use crate::modules::allocations::repositories::AllocationRepository;
use crate::modules::balances::models::ReportPeriod;
use crate::modules::balances::services::{percentage, strategy_usage};
use crate::modules::invoices::Invoice;
use crate::modules::payments::{Payment, PaymentStatus};
use crate::modules::reports::models::{
    AllocationExport, AmountGroup, ComprehensiveReport, CustomerAllocationSummary,
    CustomerAllocationTotal, CustomerBreakdown, CustomerReport, DailySummary, DailySummaryReport,
    ExportFilters, ExportFormat, ExportRow, PaymentUtilisationLine, PaymentUtilisationSummary,
    Recommendation, RecommendationPriority, ReportEfficiency, StrategyAnalysis, StrategyShare,
    SummaryMetrics, TimelineEntry,
};

const EXPORT_HEADER: [&str; 10] = [
    "allocation_id",
    "allocation_date",
    "payment_number",
    "invoice_number",
    "customer_id",
    "currency",
    "allocated_amount",
    "allocation_method",
    "allocation_strategy",
    "notes",
];

/// Allocation rate (percent) under which a report recommends automation
const LOW_ALLOCATION_RATE: Decimal = Decimal::from_parts(80, 0, 0, false, 0);
/// Reversal rate (percent) above which a report recommends a process review
const HIGH_REVERSAL_RATE: Decimal = Decimal::from_parts(10, 0, 0, false, 0);

/// Invoices and payments of a company, indexed by id
struct Ledger {
    invoices: HashMap<i64, Invoice>,
    payments: HashMap<i64, Payment>,
}

impl Ledger {
    fn customer_of(&self, allocation: &PaymentAllocation) -> Option<i64> {
        self.invoices
            .get(&allocation.invoice_id)
            .map(|invoice| invoice.customer_id)
    }
}

/// Reports and exports over allocation history
pub struct PaymentAllocationReportService {
    repo: Arc<dyn AllocationRepository>,
}

impl PaymentAllocationReportService {
    pub fn new(repo: Arc<dyn AllocationRepository>) -> Self {
        Self { repo }
    }

    /// Active allocations dated `date`
    pub async fn generate_daily_summary(
        &self,
        company_id: i64,
        date: NaiveDate,
        actor: &Actor,
    ) -> Result<DailySummaryReport> {
        actor.authorize(company_id, Permission::ReportsView)?;

        let ledger = self.load_ledger(company_id).await?;
        let filter = AllocationFilter {
            from: Some(date),
            to: Some(date),
            ..Default::default()
        };
        let allocations = self.repo.list_allocations(company_id, &filter).await?;

        let total: Decimal = allocations.iter().map(|a| a.allocated_amount).sum();
        let mut by_method: BTreeMap<String, AmountGroup> = BTreeMap::new();
        let mut by_strategy: BTreeMap<String, AmountGroup> = BTreeMap::new();
        for allocation in &allocations {
            by_method
                .entry(allocation.allocation_method.to_string())
                .or_default()
                .add(allocation.allocated_amount);
            if let Some(strategy) = allocation.allocation_strategy {
                by_strategy
                    .entry(strategy.to_string())
                    .or_default()
                    .add(allocation.allocated_amount);
            }
        }

        info!(
            company_id = company_id,
            date = %date,
            allocations = allocations.len(),
            "Daily allocation summary generated"
        );

        Ok(DailySummaryReport {
            company_id,
            report_date: date,
            generated_at: Utc::now(),
            summary: DailySummary {
                total_allocations: allocations.len(),
                total_amount_allocated: total,
                unique_invoices: distinct(allocations.iter().map(|a| a.invoice_id)),
                unique_payments: distinct(allocations.iter().map(|a| a.payment_id)),
                average_allocation_amount: average(total, allocations.len()),
            },
            allocations_by_method: by_method,
            allocations_by_strategy: by_strategy,
            top_customers: customer_totals(&ledger, &allocations)
                .into_iter()
                .take(10)
                .collect(),
            payment_utilisation: payment_utilisation(&ledger, &allocations),
        })
    }

    /// One customer's active allocations in a period, with a monthly timeline
    pub async fn generate_customer_report(
        &self,
        company_id: i64,
        customer_id: i64,
        start_date: NaiveDate,
        end_date: NaiveDate,
        actor: &Actor,
    ) -> Result<CustomerReport> {
        actor.authorize(company_id, Permission::ReportsView)?;
        validate_date_range(start_date, end_date)?;

        let filter = AllocationFilter {
            customer_id: Some(customer_id),
            from: Some(start_date),
            to: Some(end_date),
            ..Default::default()
        };
        let allocations = self.repo.list_allocations(company_id, &filter).await?;
        let total: Decimal = allocations.iter().map(|a| a.allocated_amount).sum();

        let mut months: BTreeMap<String, AmountGroup> = BTreeMap::new();
        for allocation in &allocations {
            months
                .entry(allocation.allocation_date.format("%Y-%m").to_string())
                .or_default()
                .add(allocation.allocated_amount);
        }

        Ok(CustomerReport {
            company_id,
            customer_id,
            period: ReportPeriod {
                start_date,
                end_date,
            },
            generated_at: Utc::now(),
            customer_summary: CustomerAllocationSummary {
                total_allocations: allocations.len(),
                total_amount_allocated: total,
                unique_payments: distinct(allocations.iter().map(|a| a.payment_id)),
                unique_invoices: distinct(allocations.iter().map(|a| a.invoice_id)),
                average_allocation_size: average(total, allocations.len()),
            },
            allocation_timeline: months
                .into_iter()
                .map(|(month, group)| TimelineEntry {
                    month,
                    allocations_count: group.count,
                    total_amount: group.total_amount,
                })
                .collect(),
        })
    }

    /// Summary, strategy and customer analysis for a period, with recommendations
    pub async fn generate_comprehensive_report(
        &self,
        company_id: i64,
        start_date: NaiveDate,
        end_date: NaiveDate,
        actor: &Actor,
    ) -> Result<ComprehensiveReport> {
        actor.authorize(company_id, Permission::ReportsView)?;
        validate_date_range(start_date, end_date)?;

        let ledger = self.load_ledger(company_id).await?;
        let filter = AllocationFilter {
            from: Some(start_date),
            to: Some(end_date),
            ..AllocationFilter::all()
        };
        let all = self.repo.list_allocations(company_id, &filter).await?;
        let (active, reversed): (Vec<PaymentAllocation>, Vec<PaymentAllocation>) =
            all.into_iter().partition(PaymentAllocation::is_active);

        let period_payments: Vec<&Payment> = ledger
            .payments
            .values()
            .filter(|p| p.status != PaymentStatus::Failed)
            .filter(|p| p.payment_date >= start_date && p.payment_date <= end_date)
            .collect();
        let received: Decimal = period_payments.iter().map(|p| p.amount).sum();
        let allocated: Decimal = active.iter().map(|a| a.allocated_amount).sum();

        let summary = SummaryMetrics {
            total_allocations: active.len(),
            total_amount_allocated: allocated,
            total_payments_received: received,
            allocation_rate: percentage(allocated, received),
            unique_invoices: distinct(active.iter().map(|a| a.invoice_id)),
            unique_customers: distinct(active.iter().filter_map(|a| ledger.customer_of(a))),
            average_allocation_size: average(allocated, active.len()),
        };

        let fully_allocated = period_payments
            .iter()
            .filter(|p| p.is_fully_allocated())
            .count();
        let efficiency = ReportEfficiency {
            allocation_completion_rate: percentage(
                Decimal::from(fully_allocated),
                Decimal::from(period_payments.len()),
            ),
            reversal_rate: percentage(
                Decimal::from(reversed.len()),
                Decimal::from(active.len() + reversed.len()),
            ),
        };

        let recommendations = recommendations(summary.allocation_rate, efficiency.reversal_rate);

        info!(
            company_id = company_id,
            start_date = %start_date,
            end_date = %end_date,
            allocations = active.len(),
            recommendations = recommendations.len(),
            "Comprehensive allocation report generated"
        );

        Ok(ComprehensiveReport {
            company_id,
            period: ReportPeriod {
                start_date,
                end_date,
            },
            generated_at: Utc::now(),
            summary_metrics: summary,
            strategy_analysis: strategy_analysis(&active),
            customer_breakdown: customer_breakdown(&ledger, &active),
            efficiency_metrics: efficiency,
            recommendations,
        })
    }

    /// Active allocations of a period as CSV or JSON
    pub async fn export_allocations(
        &self,
        company_id: i64,
        start_date: NaiveDate,
        end_date: NaiveDate,
        format: ExportFormat,
        filters: &ExportFilters,
        actor: &Actor,
    ) -> Result<AllocationExport> {
        actor.authorize(company_id, Permission::ReportsView)?;
        validate_date_range(start_date, end_date)?;

        let ledger = self.load_ledger(company_id).await?;
        let filter = AllocationFilter {
            customer_id: filters.customer_id,
            from: Some(start_date),
            to: Some(end_date),
            ..Default::default()
        };
        let rows: Vec<ExportRow> = self
            .repo
            .list_allocations(company_id, &filter)
            .await?
            .into_iter()
            .filter(|a| {
                filters
                    .allocation_strategy
                    .map_or(true, |s| a.allocation_strategy == Some(s))
            })
            .filter(|a| {
                filters
                    .allocation_method
                    .map_or(true, |m| a.allocation_method == m)
            })
            .map(|a| export_row(&ledger, a))
            .collect();

        let body = match format {
            ExportFormat::Csv => render_csv(&rows)?,
            ExportFormat::Json => serde_json::to_string(&rows)?,
        };

        info!(
            company_id = company_id,
            format = ?format,
            rows = rows.len(),
            "Allocations exported"
        );

        Ok(AllocationExport {
            format,
            row_count: rows.len(),
            body,
        })
    }

    async fn load_ledger(&self, company_id: i64) -> Result<Ledger> {
        let invoices = self.repo.list_invoices(company_id, None).await?;
        let payments = self.repo.list_payments(company_id, None).await?;
        Ok(Ledger {
            invoices: invoices.into_iter().map(|i| (i.id, i)).collect(),
            payments: payments.into_iter().map(|p| (p.id, p)).collect(),
        })
    }
}

fn validate_date_range(start_date: NaiveDate, end_date: NaiveDate) -> Result<()> {
    if start_date > end_date {
        return Err(AppError::validation(format!(
            "start_date ({}) must be before or equal to end_date ({})",
            start_date, end_date
        )));
    }
    Ok(())
}

fn distinct(ids: impl Iterator<Item = i64>) -> usize {
    ids.collect::<BTreeSet<_>>().len()
}

fn average(total: Decimal, count: usize) -> Decimal {
    if count == 0 {
        return Decimal::ZERO;
    }
    (total / Decimal::from(count)).round_dp(2)
}

/// Customers by allocated amount, largest first; ties by customer id
fn customer_totals(ledger: &Ledger, allocations: &[PaymentAllocation]) -> Vec<CustomerAllocationTotal> {
    let mut groups: BTreeMap<i64, (AmountGroup, BTreeSet<i64>)> = BTreeMap::new();
    for allocation in allocations {
        let Some(customer_id) = ledger.customer_of(allocation) else {
            continue;
        };
        let (group, invoices) = groups.entry(customer_id).or_default();
        group.add(allocation.allocated_amount);
        invoices.insert(allocation.invoice_id);
    }

    let mut totals: Vec<CustomerAllocationTotal> = groups
        .into_iter()
        .map(|(customer_id, (group, invoices))| CustomerAllocationTotal {
            customer_id,
            total_allocated: group.total_amount,
            allocation_count: group.count,
            unique_invoices: invoices.len(),
        })
        .collect();
    totals.sort_by(|a, b| {
        b.total_allocated
            .cmp(&a.total_allocated)
            .then(a.customer_id.cmp(&b.customer_id))
    });
    totals
}

fn payment_utilisation(ledger: &Ledger, allocations: &[PaymentAllocation]) -> PaymentUtilisationSummary {
    let mut by_payment: BTreeMap<i64, Decimal> = BTreeMap::new();
    for allocation in allocations {
        *by_payment.entry(allocation.payment_id).or_default() += allocation.allocated_amount;
    }

    let lines: Vec<PaymentUtilisationLine> = by_payment
        .into_iter()
        .filter_map(|(payment_id, allocated)| {
            let payment = ledger.payments.get(&payment_id)?;
            Some(PaymentUtilisationLine {
                payment_id,
                payment_number: payment.payment_number.clone(),
                payment_amount: payment.amount,
                allocated_amount: allocated,
                utilisation_rate: percentage(allocated, payment.amount),
            })
        })
        .collect();

    let rate_sum: Decimal = lines.iter().map(|l| l.utilisation_rate).sum();
    PaymentUtilisationSummary {
        average_utilisation: average(rate_sum, lines.len()),
        fully_utilised_payments: lines
            .iter()
            .filter(|l| l.utilisation_rate >= Decimal::from(99))
            .count(),
        underutilised_payments: lines
            .iter()
            .filter(|l| l.utilisation_rate < LOW_ALLOCATION_RATE)
            .count(),
        payments: lines,
    }
}

fn strategy_analysis(active: &[PaymentAllocation]) -> StrategyAnalysis {
    let (automatic, manual): (Vec<PaymentAllocation>, Vec<PaymentAllocation>) = active
        .iter()
        .cloned()
        .partition(|a| a.allocation_strategy.is_some());

    let mut manual_group = AmountGroup::default();
    for allocation in &manual {
        manual_group.add(allocation.allocated_amount);
    }

    let usage = strategy_usage(&automatic);
    let automatic_total: Decimal = usage.iter().map(|u| u.total_amount).sum();
    let shares = usage
        .iter()
        .map(|u| StrategyShare {
            strategy: u.strategy.clone(),
            percentage_of_total: percentage(u.total_amount, automatic_total),
        })
        .collect();

    StrategyAnalysis {
        automatic_strategies: usage,
        manual_average_amount: manual_group.average(),
        manual_allocations: manual_group,
        strategy_share: shares,
    }
}

fn customer_breakdown(ledger: &Ledger, active: &[PaymentAllocation]) -> CustomerBreakdown {
    let totals = customer_totals(ledger, active);
    let grand_total: Decimal = totals.iter().map(|t| t.total_allocated).sum();
    let top_share = |n: usize| {
        let top: Decimal = totals.iter().take(n).map(|t| t.total_allocated).sum();
        percentage(top, grand_total)
    };

    CustomerBreakdown {
        total_customers: totals.len(),
        top_10_customers_percentage: top_share(10),
        top_20_customers_percentage: top_share(20),
        top_customers: totals.iter().take(10).cloned().collect(),
    }
}

fn recommendations(allocation_rate: Decimal, reversal_rate: Decimal) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();

    if allocation_rate < LOW_ALLOCATION_RATE {
        recommendations.push(Recommendation {
            kind: "efficiency".to_string(),
            priority: RecommendationPriority::High,
            title: "Improve Allocation Rate".to_string(),
            description: format!(
                "Current allocation rate is {}%. Consider implementing automatic allocation strategies to improve efficiency.",
                allocation_rate
            ),
        });
    }

    if reversal_rate > HIGH_REVERSAL_RATE {
        recommendations.push(Recommendation {
            kind: "quality".to_string(),
            priority: RecommendationPriority::Medium,
            title: "Review Allocation Process".to_string(),
            description: format!(
                "High reversal rate of {}% detected. Review allocation validation and approval processes.",
                reversal_rate
            ),
        });
    }

    recommendations
}

fn export_row(ledger: &Ledger, allocation: PaymentAllocation) -> ExportRow {
    let invoice = ledger.invoices.get(&allocation.invoice_id);
    let payment = ledger.payments.get(&allocation.payment_id);

    ExportRow {
        allocation_id: allocation.id,
        allocation_date: allocation.allocation_date,
        payment_number: payment.map(|p| p.payment_number.clone()).unwrap_or_default(),
        invoice_number: invoice.map(|i| i.invoice_number.clone()).unwrap_or_default(),
        customer_id: invoice.map(|i| i.customer_id).unwrap_or_default(),
        currency: payment.map(|p| p.currency.to_string()).unwrap_or_default(),
        allocated_amount: allocation.allocated_amount,
        allocation_method: allocation.allocation_method,
        allocation_strategy: allocation.allocation_strategy,
        notes: allocation.notes,
    }
}

pub(crate) fn render_csv(rows: &[ExportRow]) -> Result<String> {
    let mut csv = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    let csv_error = |e: csv::Error| AppError::internal(format!("CSV write error: {}", e));

    csv.write_record(EXPORT_HEADER).map_err(csv_error)?;
    for row in rows {
        csv.write_record(&[
            row.allocation_id.to_string(),
            row.allocation_date.format("%Y-%m-%d").to_string(),
            row.payment_number.clone(),
            row.invoice_number.clone(),
            row.customer_id.to_string(),
            row.currency.clone(),
            row.allocated_amount.to_string(),
            row.allocation_method.to_string(),
            row.allocation_strategy
                .map(|s| s.to_string())
                .unwrap_or_default(),
            row.notes.clone().unwrap_or_default(),
        ])
        .map_err(csv_error)?;
    }

    let bytes = csv
        .into_inner()
        .map_err(|e| AppError::internal(format!("CSV flush error: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| AppError::internal(format!("CSV encoding error: {}", e)))
}
