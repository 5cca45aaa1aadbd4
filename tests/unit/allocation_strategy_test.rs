// Expected distributions for each automatic allocation strategy

#[path = "../helpers/mod.rs"]
mod helpers;

use helpers::{date, invoice};
use payalloc::allocations::models::{AllocationStrategy, StrategyParams, StrategyPlan};
use payalloc::allocations::services::strategies::{apply, available_strategies};
use payalloc::core::Currency;
use payalloc::invoices::Invoice;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn params() -> StrategyParams {
    StrategyParams::new(date(2024, 3, 15), Currency::USD)
}

fn split(plan: &StrategyPlan) -> Vec<(i64, Decimal)> {
    plan.proposals
        .iter()
        .map(|p| (p.invoice_id, p.amount))
        .collect()
}

fn open_invoices() -> Vec<Invoice> {
    vec![
        invoice(1, 10, dec!(100.00), date(2024, 3, 1)),
        invoice(2, 10, dec!(300.00), date(2024, 1, 1)),
        invoice(3, 10, dec!(200.00), date(2024, 4, 1)),
    ]
}

#[test]
fn test_fifo_pays_earliest_due_first() {
    let plan = apply(
        AllocationStrategy::Fifo,
        &open_invoices(),
        dec!(350.00),
        &params(),
    );

    assert_eq!(split(&plan), vec![(2, dec!(300.00)), (1, dec!(50.00))]);
    assert_eq!(plan.total_proposed, dec!(350.00));
    assert_eq!(plan.residue, Decimal::ZERO);
}

#[test]
fn test_fifo_leaves_residue_when_invoices_run_out() {
    let plan = apply(
        AllocationStrategy::Fifo,
        &open_invoices(),
        dec!(1000.00),
        &params(),
    );

    assert_eq!(plan.total_proposed, dec!(600.00));
    assert_eq!(plan.residue, dec!(400.00));
}

#[test]
fn test_proportional_rounds_half_up_per_invoice() {
    let invoices = vec![
        invoice(1, 10, dec!(100.00), date(2024, 3, 1)),
        invoice(2, 10, dec!(200.00), date(2024, 3, 2)),
    ];

    let plan = apply(AllocationStrategy::Proportional, &invoices, dec!(100.00), &params());

    assert_eq!(split(&plan), vec![(1, dec!(33.33)), (2, dec!(66.67))]);
    assert_eq!(plan.total_proposed, dec!(100.00));
}

#[test]
fn test_overdue_first_orders_by_days_overdue() {
    let plan = apply(
        AllocationStrategy::OverdueFirst,
        &open_invoices(),
        dec!(600.00),
        &params(),
    );

    let order: Vec<i64> = plan.proposals.iter().map(|p| p.invoice_id).collect();
    assert_eq!(order, vec![2, 1, 3]);
    assert!(plan.proposals[0].notes.contains("overdue invoice paid first"));
    assert!(plan.proposals[2].notes.contains("non-overdue"));
}

#[test]
fn test_largest_first() {
    let plan = apply(
        AllocationStrategy::LargestFirst,
        &open_invoices(),
        dec!(450.00),
        &params(),
    );

    assert_eq!(split(&plan), vec![(2, dec!(300.00)), (3, dec!(150.00))]);
}

#[test]
fn test_percentage_based_caps_at_balance() {
    let invoices = vec![
        invoice(1, 10, dec!(50.00), date(2024, 3, 1)),
        invoice(2, 10, dec!(100.00), date(2024, 3, 2)),
    ];
    let mut params = params();
    params.percentages = vec![dec!(60), dec!(40)];

    let plan = apply(AllocationStrategy::PercentageBased, &invoices, dec!(100.00), &params);

    assert_eq!(split(&plan), vec![(1, dec!(50.00)), (2, dec!(40.00))]);
    assert_eq!(plan.residue, dec!(10.00));
    assert!(plan.proposals[0].notes.contains("60%"));
}

#[test]
fn test_percentage_based_without_percentages_proposes_nothing() {
    let plan = apply(
        AllocationStrategy::PercentageBased,
        &open_invoices(),
        dec!(100.00),
        &params(),
    );

    assert!(plan.is_empty());
    assert_eq!(plan.residue, dec!(100.00));
}

#[test]
fn test_equal_distribution_rounds_down() {
    let invoices = vec![
        invoice(1, 10, dec!(1000.00), date(2024, 3, 1)),
        invoice(2, 10, dec!(1000.00), date(2024, 3, 2)),
        invoice(3, 10, dec!(1000.00), date(2024, 3, 3)),
    ];

    let plan = apply(
        AllocationStrategy::EqualDistribution,
        &invoices,
        dec!(100.00),
        &params(),
    );

    assert!(plan.proposals.iter().all(|p| p.amount == dec!(33.33)));
    assert_eq!(plan.residue, dec!(0.01));
}

#[test]
fn test_equal_distribution_in_zero_decimal_currency() {
    let mut inv = invoice(1, 10, dec!(100000), date(2024, 3, 1));
    inv.currency = Currency::IDR;
    let mut other = invoice(2, 10, dec!(100000), date(2024, 3, 2));
    other.currency = Currency::IDR;

    let params = StrategyParams::new(date(2024, 3, 15), Currency::IDR);
    let plan = apply(
        AllocationStrategy::EqualDistribution,
        &[inv, other],
        dec!(10001),
        &params,
    );

    assert_eq!(split(&plan), vec![(1, dec!(5000)), (2, dec!(5000))]);
    assert_eq!(plan.residue, dec!(1));
}

#[test]
fn test_custom_priority_then_natural_order() {
    let invoices = vec![
        invoice(1, 10, dec!(50.00), date(2024, 3, 1)),
        invoice(2, 10, dec!(50.00), date(2024, 3, 2)),
        invoice(3, 10, dec!(50.00), date(2024, 3, 3)),
    ];
    let mut params = params();
    params.priority_order = vec![3, 1];

    let plan = apply(AllocationStrategy::CustomPriority, &invoices, dec!(120.00), &params);

    assert_eq!(
        split(&plan),
        vec![(3, dec!(50.00)), (1, dec!(50.00)), (2, dec!(20.00))]
    );
    assert!(plan.proposals[0].notes.ends_with("#1"));
    assert!(plan.proposals[2].notes.ends_with("#unspecified"));
}

#[test]
fn test_nothing_to_allocate() {
    for strategy in AllocationStrategy::ALL {
        let plan = apply(strategy, &[], dec!(100.00), &params());
        assert!(plan.is_empty(), "{} should not propose without invoices", strategy);

        let plan = apply(strategy, &open_invoices(), Decimal::ZERO, &params());
        assert!(plan.is_empty(), "{} should not propose without funds", strategy);
    }
}

#[test]
fn test_catalogue_describes_every_strategy() {
    let catalogue = available_strategies();

    assert_eq!(catalogue.len(), AllocationStrategy::ALL.len());
    for (entry, strategy) in catalogue.iter().zip(AllocationStrategy::ALL) {
        assert_eq!(entry.strategy, strategy);
        assert!(!entry.name.is_empty());
        assert!(!entry.description.is_empty());
    }
}
