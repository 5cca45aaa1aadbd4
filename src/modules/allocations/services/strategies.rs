// Automatic allocation strategies.
//
// Every strategy is a pure function of (invoices, available amount, params):
// no I/O, no clock, no randomness. Proposals never exceed an invoice's
// balance_due and their sum never exceeds the available amount. Whatever a
// strategy cannot place is reported as the plan's residue.

use rust_decimal::Decimal;

use crate::modules::allocations::models::{
    AllocationProposal, AllocationStrategy, StrategyDescription, StrategyParams, StrategyPlan,
};
use crate::modules::invoices::Invoice;

pub trait Strategy: Send + Sync {
    fn allocate(
        &self,
        invoices: &[Invoice],
        available: Decimal,
        params: &StrategyParams,
    ) -> Vec<AllocationProposal>;
}

pub struct Fifo;
pub struct Proportional;
pub struct OverdueFirst;
pub struct LargestFirst;
pub struct PercentageBased;
pub struct EqualDistribution;
pub struct CustomPriority;

/// Resolve the implementation behind a strategy name
pub fn strategy_for(strategy: AllocationStrategy) -> &'static dyn Strategy {
    match strategy {
        AllocationStrategy::Fifo => &Fifo,
        AllocationStrategy::Proportional => &Proportional,
        AllocationStrategy::OverdueFirst => &OverdueFirst,
        AllocationStrategy::LargestFirst => &LargestFirst,
        AllocationStrategy::PercentageBased => &PercentageBased,
        AllocationStrategy::EqualDistribution => &EqualDistribution,
        AllocationStrategy::CustomPriority => &CustomPriority,
    }
}

/// Run a strategy and package its proposals with the residue
pub fn apply(
    strategy: AllocationStrategy,
    invoices: &[Invoice],
    available: Decimal,
    params: &StrategyParams,
) -> StrategyPlan {
    if invoices.is_empty() || available <= Decimal::ZERO {
        return StrategyPlan::new(strategy, Vec::new(), available.max(Decimal::ZERO));
    }

    let proposals = strategy_for(strategy).allocate(invoices, available, params);
    StrategyPlan::new(strategy, proposals, available)
}

pub fn available_strategies() -> Vec<StrategyDescription> {
    AllocationStrategy::ALL
        .iter()
        .map(|&strategy| describe(strategy))
        .collect()
}

pub fn describe(strategy: AllocationStrategy) -> StrategyDescription {
    let (name, description, best_for) = match strategy {
        AllocationStrategy::Fifo => (
            "First In, First Out (FIFO)",
            "Pays oldest invoices first based on due date",
            "Standard accounts receivable management",
        ),
        AllocationStrategy::Proportional => (
            "Proportional",
            "Distributes payment proportionally based on invoice balances",
            "Fair distribution across multiple invoices",
        ),
        AllocationStrategy::OverdueFirst => (
            "Overdue Priority",
            "Prioritizes overdue invoices, sorted by days overdue",
            "Collections and cash flow optimization",
        ),
        AllocationStrategy::LargestFirst => (
            "Largest Balance First",
            "Pays invoices with largest balances first",
            "Reducing the number of outstanding invoices",
        ),
        AllocationStrategy::PercentageBased => (
            "Percentage-Based",
            "Allocates based on specified percentages per invoice",
            "Strategic payment distribution",
        ),
        AllocationStrategy::EqualDistribution => (
            "Equal Distribution",
            "Splits payment equally across all invoices",
            "Simple, fair allocation method",
        ),
        AllocationStrategy::CustomPriority => (
            "Custom Priority",
            "Uses custom priority order for invoice selection",
            "Specific business requirements",
        ),
    };

    StrategyDescription {
        strategy,
        name,
        description,
        best_for,
    }
}

/// Pay each invoice in turn as far as the remaining amount goes
fn greedy<'a, I>(invoices: I, available: Decimal, notes: impl Fn(&Invoice) -> String) -> Vec<AllocationProposal>
where
    I: IntoIterator<Item = &'a Invoice>,
{
    let mut remaining = available;
    let mut proposals = Vec::new();

    for invoice in invoices {
        if remaining <= Decimal::ZERO {
            break;
        }

        let amount = remaining.min(invoice.balance_due());
        if amount > Decimal::ZERO {
            proposals.push(AllocationProposal {
                invoice_id: invoice.id,
                amount,
                notes: notes(invoice),
            });
            remaining -= amount;
        }
    }

    proposals
}

impl Strategy for Fifo {
    fn allocate(
        &self,
        invoices: &[Invoice],
        available: Decimal,
        _params: &StrategyParams,
    ) -> Vec<AllocationProposal> {
        let mut ordered: Vec<&Invoice> = invoices.iter().collect();
        ordered.sort_by_key(|invoice| invoice.due_date);

        greedy(ordered, available, |_| {
            "FIFO allocation - oldest invoice paid first".to_string()
        })
    }
}

impl Strategy for Proportional {
    fn allocate(
        &self,
        invoices: &[Invoice],
        available: Decimal,
        params: &StrategyParams,
    ) -> Vec<AllocationProposal> {
        let total: Decimal = invoices.iter().map(|invoice| invoice.balance_due()).sum();
        if total <= Decimal::ZERO {
            return Vec::new();
        }

        let mut remaining = available;
        let mut proposals = Vec::new();

        for invoice in invoices {
            if remaining <= Decimal::ZERO {
                break;
            }

            let balance = invoice.balance_due();
            let share = params.currency.round_half_up(available * balance / total);
            // half-up rounding can overshoot by one minor unit in aggregate
            let amount = share.min(balance).min(remaining);

            if amount > Decimal::ZERO {
                proposals.push(AllocationProposal {
                    invoice_id: invoice.id,
                    amount,
                    notes: "Proportional allocation - distributed by balance ratio".to_string(),
                });
                remaining -= amount;
            }
        }

        proposals
    }
}

impl Strategy for OverdueFirst {
    fn allocate(
        &self,
        invoices: &[Invoice],
        available: Decimal,
        params: &StrategyParams,
    ) -> Vec<AllocationProposal> {
        let (mut overdue, mut current): (Vec<&Invoice>, Vec<&Invoice>) = invoices
            .iter()
            .partition(|invoice| invoice.due_date < params.as_of);

        overdue.sort_by_key(|invoice| std::cmp::Reverse(invoice.days_overdue(params.as_of)));
        current.sort_by_key(|invoice| invoice.due_date);

        let as_of = params.as_of;
        greedy(overdue.into_iter().chain(current), available, |invoice| {
            if invoice.due_date < as_of {
                "Priority allocation - overdue invoice paid first".to_string()
            } else {
                "Priority allocation - non-overdue invoice".to_string()
            }
        })
    }
}

impl Strategy for LargestFirst {
    fn allocate(
        &self,
        invoices: &[Invoice],
        available: Decimal,
        _params: &StrategyParams,
    ) -> Vec<AllocationProposal> {
        let mut ordered: Vec<&Invoice> = invoices.iter().collect();
        ordered.sort_by_key(|invoice| std::cmp::Reverse(invoice.balance_due()));

        greedy(ordered, available, |_| {
            "Amount-based allocation - largest balance paid first".to_string()
        })
    }
}

impl Strategy for PercentageBased {
    fn allocate(
        &self,
        invoices: &[Invoice],
        available: Decimal,
        params: &StrategyParams,
    ) -> Vec<AllocationProposal> {
        let hundred = Decimal::ONE_HUNDRED;
        let mut remaining = available;
        let mut proposals = Vec::new();

        for (invoice, &pct) in invoices.iter().zip(params.percentages.iter()) {
            if remaining <= Decimal::ZERO {
                break;
            }
            if pct <= Decimal::ZERO {
                continue;
            }

            let share = params.currency.round_down(available * pct / hundred);
            let amount = share.min(invoice.balance_due()).min(remaining);

            if amount > Decimal::ZERO {
                proposals.push(AllocationProposal {
                    invoice_id: invoice.id,
                    amount,
                    notes: format!(
                        "Percentage-based allocation - {}% of payment",
                        pct.normalize()
                    ),
                });
                remaining -= amount;
            }
        }

        proposals
    }
}

impl Strategy for EqualDistribution {
    fn allocate(
        &self,
        invoices: &[Invoice],
        available: Decimal,
        params: &StrategyParams,
    ) -> Vec<AllocationProposal> {
        let eligible: Vec<&Invoice> = invoices
            .iter()
            .filter(|invoice| invoice.balance_due() > Decimal::ZERO)
            .collect();
        if eligible.is_empty() {
            return Vec::new();
        }

        let share = params
            .currency
            .round_down(available / Decimal::from(eligible.len()));

        let mut remaining = available;
        let mut proposals = Vec::new();

        for invoice in eligible {
            if remaining <= Decimal::ZERO {
                break;
            }

            let amount = share.min(invoice.balance_due()).min(remaining);
            if amount > Decimal::ZERO {
                proposals.push(AllocationProposal {
                    invoice_id: invoice.id,
                    amount,
                    notes: "Equal distribution allocation - payment split equally".to_string(),
                });
                remaining -= amount;
            }
        }

        proposals
    }
}

impl Strategy for CustomPriority {
    fn allocate(
        &self,
        invoices: &[Invoice],
        available: Decimal,
        params: &StrategyParams,
    ) -> Vec<AllocationProposal> {
        let rank = |invoice: &Invoice| {
            params
                .priority_order
                .iter()
                .position(|&id| id == invoice.id)
        };

        let mut ordered: Vec<&Invoice> = invoices.iter().collect();
        // listed ids first in listed order, the rest keep their natural order
        ordered.sort_by_key(|invoice| rank(invoice).unwrap_or(usize::MAX));

        greedy(ordered, available, |invoice| match rank(invoice) {
            Some(index) => format!("Custom priority allocation - priority #{}", index + 1),
            None => "Custom priority allocation - priority #unspecified".to_string(),
        })
    }
}
