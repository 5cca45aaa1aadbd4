use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::Currency;

/// The closed set of automatic allocation strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStrategy {
    Fifo,
    Proportional,
    OverdueFirst,
    LargestFirst,
    PercentageBased,
    EqualDistribution,
    CustomPriority,
}

impl AllocationStrategy {
    pub const ALL: [AllocationStrategy; 7] = [
        AllocationStrategy::Fifo,
        AllocationStrategy::Proportional,
        AllocationStrategy::OverdueFirst,
        AllocationStrategy::LargestFirst,
        AllocationStrategy::PercentageBased,
        AllocationStrategy::EqualDistribution,
        AllocationStrategy::CustomPriority,
    ];

    /// Order in which open invoices are handed to the strategy
    pub fn invoice_ordering(&self) -> InvoiceOrdering {
        match self {
            AllocationStrategy::LargestFirst => InvoiceOrdering::BalanceDesc,
            _ => InvoiceOrdering::DueDateAsc,
        }
    }
}

impl std::fmt::Display for AllocationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocationStrategy::Fifo => write!(f, "fifo"),
            AllocationStrategy::Proportional => write!(f, "proportional"),
            AllocationStrategy::OverdueFirst => write!(f, "overdue_first"),
            AllocationStrategy::LargestFirst => write!(f, "largest_first"),
            AllocationStrategy::PercentageBased => write!(f, "percentage_based"),
            AllocationStrategy::EqualDistribution => write!(f, "equal_distribution"),
            AllocationStrategy::CustomPriority => write!(f, "custom_priority"),
        }
    }
}

impl std::str::FromStr for AllocationStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "fifo" => Ok(AllocationStrategy::Fifo),
            "proportional" => Ok(AllocationStrategy::Proportional),
            "overdue_first" => Ok(AllocationStrategy::OverdueFirst),
            "largest_first" => Ok(AllocationStrategy::LargestFirst),
            "percentage_based" => Ok(AllocationStrategy::PercentageBased),
            "equal_distribution" => Ok(AllocationStrategy::EqualDistribution),
            "custom_priority" => Ok(AllocationStrategy::CustomPriority),
            _ => Err(format!("Invalid allocation strategy: {}", s)),
        }
    }
}

/// Ordering applied when listing open invoices; ties break on invoice id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceOrdering {
    DueDateAsc,
    BalanceDesc,
}

/// Caller-supplied knobs for `apply_strategy` / `preview_strategy`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyOptions {
    /// Reference date for overdue checks; defaults to today
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
    /// percentage_based: one entry per invoice, aligned with the invoice order
    #[serde(default)]
    pub percentages: Vec<Decimal>,
    /// custom_priority: invoice ids in the order they should be paid
    #[serde(default)]
    pub priority_order: Vec<i64>,
}

/// Everything a strategy needs besides the invoices and the amount
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyParams {
    pub as_of: NaiveDate,
    pub currency: Currency,
    pub percentages: Vec<Decimal>,
    pub priority_order: Vec<i64>,
}

impl StrategyParams {
    pub fn new(as_of: NaiveDate, currency: Currency) -> Self {
        Self {
            as_of,
            currency,
            percentages: Vec::new(),
            priority_order: Vec::new(),
        }
    }

    pub fn from_options(options: &StrategyOptions, currency: Currency, today: NaiveDate) -> Self {
        Self {
            as_of: options.as_of.unwrap_or(today),
            currency,
            percentages: options.percentages.clone(),
            priority_order: options.priority_order.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationProposal {
    pub invoice_id: i64,
    pub amount: Decimal,
    pub notes: String,
}

/// Output of a strategy run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyPlan {
    pub strategy: AllocationStrategy,
    pub proposals: Vec<AllocationProposal>,
    pub total_proposed: Decimal,
    /// Part of the available amount the strategy left unallocated
    pub residue: Decimal,
}

impl StrategyPlan {
    pub fn new(
        strategy: AllocationStrategy,
        proposals: Vec<AllocationProposal>,
        available: Decimal,
    ) -> Self {
        let total_proposed: Decimal = proposals.iter().map(|p| p.amount).sum();
        Self {
            strategy,
            proposals,
            total_proposed,
            residue: (available - total_proposed).max(Decimal::ZERO),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyDescription {
    pub strategy: AllocationStrategy,
    pub name: &'static str,
    pub description: &'static str,
    pub best_for: &'static str,
}
