// Invoices module

pub mod models;

pub use models::{Invoice, InvoicePaymentStatus, InvoiceStatus};
