mod allocation_report;

pub use allocation_report::{
    AllocationExport, AmountGroup, ComprehensiveReport, CustomerAllocationSummary,
    CustomerAllocationTotal, CustomerBreakdown, CustomerReport, DailySummary, DailySummaryReport,
    ExportFilters, ExportFormat, ExportRow, PaymentUtilisationLine, PaymentUtilisationSummary,
    Recommendation, RecommendationPriority, ReportEfficiency, StrategyAnalysis, StrategyShare,
    SummaryMetrics, TimelineEntry,
};
