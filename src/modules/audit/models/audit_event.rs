use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Kinds of events the allocation engine emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditEventKind {
    #[serde(rename = "payment.allocated")]
    PaymentAllocated,
    #[serde(rename = "payment.status_changed")]
    PaymentStatusChanged,
    #[serde(rename = "payment.allocation_failed")]
    PaymentAllocationFailed,
    #[serde(rename = "allocation.strategy_applied")]
    StrategyApplied,
    #[serde(rename = "allocation.reversed")]
    AllocationReversed,
    #[serde(rename = "allocation.batch_reversed")]
    BatchReversed,
    #[serde(rename = "allocation.operation_failed")]
    OperationFailed,
}

impl std::fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AuditEventKind::PaymentAllocated => "payment.allocated",
            AuditEventKind::PaymentStatusChanged => "payment.status_changed",
            AuditEventKind::PaymentAllocationFailed => "payment.allocation_failed",
            AuditEventKind::StrategyApplied => "allocation.strategy_applied",
            AuditEventKind::AllocationReversed => "allocation.reversed",
            AuditEventKind::BatchReversed => "allocation.batch_reversed",
            AuditEventKind::OperationFailed => "allocation.operation_failed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub kind: AuditEventKind,
    pub company_id: i64,
    pub actor_id: i64,
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(kind: AuditEventKind, company_id: i64, actor_id: i64, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            company_id,
            actor_id,
            payload,
            occurred_at: Utc::now(),
        }
    }
}
