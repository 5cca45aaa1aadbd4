use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::MySqlPool;
use tracing::{error, info};

use crate::core::{AppError, Result};
use crate::modules::audit::models::{AuditEvent, AuditEventKind};

/// Destination for audit events
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn emit(&self, event: AuditEvent) -> Result<()>;
}

/// Emit an event; a failing sink is logged and never fails the caller
pub async fn record(sink: &dyn AuditSink, event: AuditEvent) {
    let kind = event.kind;
    let company_id = event.company_id;
    if let Err(e) = sink.emit(event).await {
        error!(
            kind = %kind,
            company_id = company_id,
            error = %e,
            "Failed to record audit event"
        );
    }
}

/// Writes events to the structured log
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn emit(&self, event: AuditEvent) -> Result<()> {
        info!(
            target: "audit",
            event_id = %event.id,
            kind = %event.kind,
            company_id = event.company_id,
            actor_id = event.actor_id,
            payload = %event.payload,
            "audit event"
        );
        Ok(())
    }
}

/// Keeps events in memory for assertions
#[derive(Debug, Default, Clone)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn events_of(&self, kind: AuditEventKind) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.kind == kind)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn emit(&self, event: AuditEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| AppError::internal("audit buffer poisoned"))?
            .push(event);
        Ok(())
    }
}

/// Persists events to the `audit_logs` table
pub struct MySqlAuditSink {
    pool: MySqlPool,
}

impl MySqlAuditSink {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for MySqlAuditSink {
    async fn emit(&self, event: AuditEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, kind, company_id, actor_id, payload, occurred_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.id.to_string())
        .bind(event.kind.to_string())
        .bind(event.company_id)
        .bind(event.actor_id)
        .bind(event.payload.to_string())
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
