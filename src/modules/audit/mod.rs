// Audit module

pub mod models;
pub mod services;

pub use models::{AuditEvent, AuditEventKind};
pub use services::{record, AuditSink, MemoryAuditSink, MySqlAuditSink, TracingAuditSink};
