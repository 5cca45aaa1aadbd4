mod balance;

pub use balance::{
    AgingBucket, AgingBucketSummary, AgingInvoice, AgingReport, AgingSummary,
    AllocationDistribution, AllocationEfficiencyMetrics, BalanceHistoryPoint,
    CompanyBalanceOverview, CustomerBalanceSummary, CustomerInvoiceLine, HistoryPeriod,
    InvoiceStatistics, PaymentStatistics, PaymentUtilisation, ReportPeriod, StrategyUsage,
};
