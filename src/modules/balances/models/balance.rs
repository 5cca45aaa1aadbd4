use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::modules::invoices::InvoicePaymentStatus;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerInvoiceLine {
    pub id: i64,
    pub invoice_number: String,
    pub issue_date: NaiveDate,
    pub due_date: NaiveDate,
    pub total_amount: Decimal,
    pub balance_due: Decimal,
    pub total_allocated: Decimal,
    pub payment_status: InvoicePaymentStatus,
    pub is_overdue: bool,
    pub days_overdue: i64,
}

/// Open receivables of one customer against their unapplied cash
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerBalanceSummary {
    pub company_id: i64,
    pub customer_id: i64,
    pub total_invoices: usize,
    pub total_balance_due: Decimal,
    pub total_allocated: Decimal,
    pub unallocated_payments: Decimal,
    /// balance due minus unallocated payments
    pub net_balance: Decimal,
    pub invoices: Vec<CustomerInvoiceLine>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgingBucket {
    #[serde(rename = "current")]
    Current,
    #[serde(rename = "1_30_days")]
    Days1To30,
    #[serde(rename = "31_60_days")]
    Days31To60,
    #[serde(rename = "61_90_days")]
    Days61To90,
    #[serde(rename = "over_90_days")]
    Over90Days,
}

impl AgingBucket {
    pub const ALL: [AgingBucket; 5] = [
        AgingBucket::Current,
        AgingBucket::Days1To30,
        AgingBucket::Days31To60,
        AgingBucket::Days61To90,
        AgingBucket::Over90Days,
    ];

    /// Bucket for a days-overdue figure; negative counts as current
    pub fn for_days_overdue(days: i64) -> Self {
        match days.max(0) {
            0 => AgingBucket::Current,
            1..=30 => AgingBucket::Days1To30,
            31..=60 => AgingBucket::Days31To60,
            61..=90 => AgingBucket::Days61To90,
            _ => AgingBucket::Over90Days,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            AgingBucket::Current => "current",
            AgingBucket::Days1To30 => "1_30_days",
            AgingBucket::Days31To60 => "31_60_days",
            AgingBucket::Days61To90 => "61_90_days",
            AgingBucket::Over90Days => "over_90_days",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgingInvoice {
    pub id: i64,
    pub invoice_number: String,
    pub customer_id: i64,
    pub due_date: NaiveDate,
    pub days_overdue: i64,
    pub balance_due: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgingBucketSummary {
    pub bucket: AgingBucket,
    pub amount: Decimal,
    pub count: usize,
    pub invoices: Vec<AgingInvoice>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgingReport {
    pub company_id: i64,
    pub customer_id: Option<i64>,
    pub as_of: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub total_amount_due: Decimal,
    pub total_invoices: usize,
    /// Always all five buckets, in ascending age
    pub buckets: Vec<AgingBucketSummary>,
}

impl AgingReport {
    pub fn bucket(&self, bucket: AgingBucket) -> Option<&AgingBucketSummary> {
        self.buckets.iter().find(|b| b.bucket == bucket)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgingSummary {
    pub current: Decimal,
    #[serde(rename = "1_30_days")]
    pub days_1_30: Decimal,
    #[serde(rename = "31_60_days")]
    pub days_31_60: Decimal,
    #[serde(rename = "61_90_days")]
    pub days_61_90: Decimal,
    #[serde(rename = "over_90_days")]
    pub over_90_days: Decimal,
}

impl From<&AgingReport> for AgingSummary {
    fn from(report: &AgingReport) -> Self {
        let amount = |bucket| {
            report
                .bucket(bucket)
                .map(|b| b.amount)
                .unwrap_or(Decimal::ZERO)
        };
        Self {
            current: amount(AgingBucket::Current),
            days_1_30: amount(AgingBucket::Days1To30),
            days_31_60: amount(AgingBucket::Days31To60),
            days_61_90: amount(AgingBucket::Days61To90),
            over_90_days: amount(AgingBucket::Over90Days),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportPeriod {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentUtilisation {
    pub total_payments: usize,
    pub total_amount: Decimal,
    pub total_allocated: Decimal,
    pub total_unallocated: Decimal,
    /// Percentage, two decimal places
    pub allocation_rate: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AllocationDistribution {
    pub fully_allocated: usize,
    pub partially_allocated: usize,
    pub unallocated: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyUsage {
    /// Strategy name, or "manual"
    pub strategy: String,
    pub usage_count: usize,
    pub total_amount: Decimal,
    pub average_amount: Decimal,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationEfficiencyMetrics {
    pub company_id: i64,
    pub period: ReportPeriod,
    pub payment_summary: PaymentUtilisation,
    pub allocation_distribution: AllocationDistribution,
    pub strategy_usage: Vec<StrategyUsage>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InvoiceStatistics {
    pub total: usize,
    pub draft: usize,
    pub sent: usize,
    pub posted: usize,
    pub paid: usize,
    pub cancelled: usize,
    pub overdue: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PaymentStatistics {
    pub total: usize,
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompanyBalanceOverview {
    pub company_id: i64,
    pub total_balance_due: Decimal,
    pub total_allocated: Decimal,
    pub unallocated_amount: Decimal,
    pub net_balance: Decimal,
    pub customer_count: usize,
    pub invoice_statistics: InvoiceStatistics,
    pub payment_statistics: PaymentStatistics,
    pub aging_summary: AgingSummary,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryPeriod {
    Daily,
    Weekly,
    Monthly,
}

impl Default for HistoryPeriod {
    fn default() -> Self {
        HistoryPeriod::Daily
    }
}

impl std::str::FromStr for HistoryPeriod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "daily" => Ok(HistoryPeriod::Daily),
            "weekly" => Ok(HistoryPeriod::Weekly),
            "monthly" => Ok(HistoryPeriod::Monthly),
            _ => Err(format!("Invalid history period: {}", s)),
        }
    }
}

/// Customer position at the end of one period
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceHistoryPoint {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub total_balance_due: Decimal,
    pub total_allocated: Decimal,
    pub unallocated_amount: Decimal,
    pub net_balance: Decimal,
    pub invoice_count: usize,
    pub payment_count: usize,
}
