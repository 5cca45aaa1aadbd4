mod invoice;

pub use invoice::{Invoice, InvoicePaymentStatus, InvoiceStatus};
