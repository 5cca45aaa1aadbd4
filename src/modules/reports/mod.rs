pub mod controllers;
pub mod models;
pub mod services;

pub use models::{ComprehensiveReport, CustomerReport, DailySummaryReport, ExportFormat};
pub use services::PaymentAllocationReportService;
