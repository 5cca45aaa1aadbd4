mod audit_sink;

pub use audit_sink::{record, AuditSink, MemoryAuditSink, MySqlAuditSink, TracingAuditSink};
