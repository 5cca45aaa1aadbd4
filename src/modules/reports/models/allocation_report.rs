use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::modules::allocations::models::{AllocationMethod, AllocationStrategy};
use crate::modules::balances::models::{ReportPeriod, StrategyUsage};

/// Count and sum of a group of allocations
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AmountGroup {
    pub count: usize,
    pub total_amount: Decimal,
}

impl AmountGroup {
    pub fn add(&mut self, amount: Decimal) {
        self.count += 1;
        self.total_amount += amount;
    }

    pub fn average(&self) -> Decimal {
        if self.count == 0 {
            return Decimal::ZERO;
        }
        (self.total_amount / Decimal::from(self.count)).round_dp(2)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerAllocationTotal {
    pub customer_id: i64,
    pub total_allocated: Decimal,
    pub allocation_count: usize,
    pub unique_invoices: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentUtilisationLine {
    pub payment_id: i64,
    pub payment_number: String,
    pub payment_amount: Decimal,
    /// Allocated within the report window
    pub allocated_amount: Decimal,
    pub utilisation_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentUtilisationSummary {
    pub average_utilisation: Decimal,
    /// utilisation_rate >= 99
    pub fully_utilised_payments: usize,
    /// utilisation_rate < 80
    pub underutilised_payments: usize,
    pub payments: Vec<PaymentUtilisationLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummary {
    pub total_allocations: usize,
    pub total_amount_allocated: Decimal,
    pub unique_invoices: usize,
    pub unique_payments: usize,
    pub average_allocation_amount: Decimal,
}

/// What was allocated on one day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummaryReport {
    pub company_id: i64,
    pub report_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub summary: DailySummary,
    pub allocations_by_method: BTreeMap<String, AmountGroup>,
    /// Automatic allocations only
    pub allocations_by_strategy: BTreeMap<String, AmountGroup>,
    /// Ten largest customers by allocated amount
    pub top_customers: Vec<CustomerAllocationTotal>,
    pub payment_utilisation: PaymentUtilisationSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerAllocationSummary {
    pub total_allocations: usize,
    pub total_amount_allocated: Decimal,
    pub unique_payments: usize,
    pub unique_invoices: usize,
    pub average_allocation_size: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEntry {
    /// YYYY-MM
    pub month: String,
    pub allocations_count: usize,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerReport {
    pub company_id: i64,
    pub customer_id: i64,
    pub period: ReportPeriod,
    pub generated_at: DateTime<Utc>,
    pub customer_summary: CustomerAllocationSummary,
    /// Ascending by month
    pub allocation_timeline: Vec<TimelineEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryMetrics {
    pub total_allocations: usize,
    pub total_amount_allocated: Decimal,
    pub total_payments_received: Decimal,
    pub allocation_rate: Decimal,
    pub unique_invoices: usize,
    pub unique_customers: usize,
    pub average_allocation_size: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyShare {
    pub strategy: String,
    pub percentage_of_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyAnalysis {
    pub automatic_strategies: Vec<StrategyUsage>,
    pub manual_allocations: AmountGroup,
    pub manual_average_amount: Decimal,
    /// Share of the automatic total per strategy
    pub strategy_share: Vec<StrategyShare>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerBreakdown {
    pub total_customers: usize,
    pub top_customers: Vec<CustomerAllocationTotal>,
    pub top_10_customers_percentage: Decimal,
    pub top_20_customers_percentage: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportEfficiency {
    /// Share of the period's payments that are fully allocated
    pub allocation_completion_rate: Decimal,
    /// Share of the period's allocations that were later reversed
    pub reversal_rate: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationPriority {
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: String,
    pub priority: RecommendationPriority,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComprehensiveReport {
    pub company_id: i64,
    pub period: ReportPeriod,
    pub generated_at: DateTime<Utc>,
    pub summary_metrics: SummaryMetrics,
    pub strategy_analysis: StrategyAnalysis,
    pub customer_breakdown: CustomerBreakdown,
    pub efficiency_metrics: ReportEfficiency,
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            _ => Err(format!("Unsupported export format: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExportFilters {
    #[serde(default)]
    pub customer_id: Option<i64>,
    #[serde(default)]
    pub allocation_strategy: Option<AllocationStrategy>,
    #[serde(default)]
    pub allocation_method: Option<AllocationMethod>,
}

/// One exported allocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportRow {
    pub allocation_id: i64,
    pub allocation_date: NaiveDate,
    pub payment_number: String,
    pub invoice_number: String,
    pub customer_id: i64,
    pub currency: String,
    pub allocated_amount: Decimal,
    pub allocation_method: AllocationMethod,
    pub allocation_strategy: Option<AllocationStrategy>,
    pub notes: Option<String>,
}

/// Rendered export body
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationExport {
    pub format: ExportFormat,
    pub row_count: usize,
    pub body: String,
}
