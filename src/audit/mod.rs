//! # Audit Records
//!
//! Immutable, structured records of every mutation. Records are append-only
//! and flow two ways: straight to the dedicated `titan::audit` log target,
//! and in batches through the micro-batch writer's auxiliary sink so a
//! durable audit trail can hang off the event stream without slowing the
//! write path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::error::TitanResult;
use crate::events::batch::BatchSink;
use crate::events::schema::{AnyEvent, EventType};

/// Kind of audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Read,
    Update,
    Delete,
    OperationInvoke,
    AccessDenied,
    Startup,
    Shutdown,
}

impl AuditAction {
    fn from_event_type(event_type: EventType) -> AuditAction {
        match event_type {
            EventType::Created => AuditAction::Create,
            EventType::Updated => AuditAction::Update,
            EventType::Deleted => AuditAction::Delete,
        }
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub record_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    /// Entity discriminator (`aas`, `submodel`, `submodel_element`, ...)
    pub resource: String,
    pub resource_id: String,
    /// Authenticated principal, when known
    pub actor: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl AuditRecord {
    pub fn new(
        action: AuditAction,
        resource: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action,
            resource: resource.into(),
            resource_id: resource_id.into(),
            actor: None,
            success: true,
            detail: None,
            correlation_id: None,
        }
    }

    /// Derive the record describing a bus event.
    pub fn from_event(event: &AnyEvent) -> AuditRecord {
        let action = match event {
            AnyEvent::OperationInvocation(_) => AuditAction::OperationInvoke,
            other => other
                .event_type()
                .map(AuditAction::from_event_type)
                .unwrap_or(AuditAction::Update),
        };
        let mut record = AuditRecord::new(action, event.entity(), event.identifier());
        record.correlation_id = Some(event.event_id().to_string());
        if let AnyEvent::SubmodelElement(e) = event {
            record.detail = Some(e.id_short_path.clone());
        }
        record
    }

    /// Append the record to the dedicated audit log target.
    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(json) => {
                tracing::info!(target: "titan::audit", record = %json);
            }
            Err(e) => {
                tracing::error!(target: "titan::audit", error = %e, "audit record serialization failed");
            }
        }
    }
}

/// Auxiliary sink turning batched events into audit records.
pub struct AuditSink;

#[async_trait]
impl BatchSink for AuditSink {
    async fn write_batch(&self, events: &[AnyEvent]) -> TitanResult<()> {
        for event in events {
            AuditRecord::from_event(event).emit();
        }
        tracing::debug!(count = events.len(), "audit batch appended");
        Ok(())
    }

    fn name(&self) -> &str {
        "audit"
    }
}
