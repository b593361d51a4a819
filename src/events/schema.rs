//! Event kinds and the broadcast wire format.
//!
//! Every event carries its own identity (UUID and timestamp), the mutation
//! type, the entity discriminator, the identifier in both raw and Base64URL
//! form, and, for non-delete events, the new byte image and ETag. Document
//! bytes are shared behind an `Arc` so fanning an event out to many
//! subscribers never copies the payload.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::core::model::EntityKind;

/// Mutation type of a CRUD event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Created,
    Updated,
    Deleted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Created => "created",
            EventType::Updated => "updated",
            EventType::Deleted => "deleted",
        }
    }
}

/// Lifecycle phase of an operation invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationPhase {
    Invoked,
    Completed,
    Failed,
}

impl InvocationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationPhase::Invoked => "invoked",
            InvocationPhase::Completed => "completed",
            InvocationPhase::Failed => "failed",
        }
    }
}

/// CRUD event for a top-level entity (shell, submodel, concept description,
/// or a registry descriptor).
#[derive(Debug, Clone)]
pub struct EntityEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub kind: EntityKind,
    pub identifier: String,
    pub identifier_b64: String,
    /// Canonical byte image after the mutation; `None` for deletes
    pub doc_bytes: Option<Arc<Vec<u8>>>,
    /// ETag after the mutation; `None` for deletes
    pub etag: Option<String>,
    /// Extracted semantic id, carried for submodel filtering
    pub semantic_id: Option<String>,
}

/// CRUD event for a SubmodelElement.
#[derive(Debug, Clone)]
pub struct ElementEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub submodel_identifier: String,
    pub submodel_identifier_b64: String,
    pub id_short_path: String,
    /// Serialized element value; `None` for deletes
    pub value_bytes: Option<Arc<Vec<u8>>>,
}

/// Operation invocation event consumed by downstream field connectors.
#[derive(Debug, Clone)]
pub struct OperationEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub phase: InvocationPhase,
    pub invocation_id: String,
    pub submodel_identifier: String,
    pub submodel_identifier_b64: String,
    pub id_short_path: String,
    pub input_arguments: Option<Value>,
    pub output_arguments: Option<Value>,
    pub error_message: Option<String>,
}

/// Any event carried on the bus.
#[derive(Debug, Clone)]
pub enum AnyEvent {
    Aas(EntityEvent),
    Submodel(EntityEvent),
    ConceptDescription(EntityEvent),
    SubmodelElement(ElementEvent),
    OperationInvocation(OperationEvent),
}

impl AnyEvent {
    /// Wrap an entity event in the variant matching its entity class.
    pub fn from_entity(event: EntityEvent) -> AnyEvent {
        match event.kind {
            EntityKind::Aas | EntityKind::AasDescriptor => AnyEvent::Aas(event),
            EntityKind::Submodel | EntityKind::SubmodelDescriptor => AnyEvent::Submodel(event),
            EntityKind::ConceptDescription => AnyEvent::ConceptDescription(event),
        }
    }

    pub fn event_id(&self) -> Uuid {
        match self {
            AnyEvent::Aas(e) | AnyEvent::Submodel(e) | AnyEvent::ConceptDescription(e) => {
                e.event_id
            }
            AnyEvent::SubmodelElement(e) => e.event_id,
            AnyEvent::OperationInvocation(e) => e.event_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            AnyEvent::Aas(e) | AnyEvent::Submodel(e) | AnyEvent::ConceptDescription(e) => {
                e.timestamp
            }
            AnyEvent::SubmodelElement(e) => e.timestamp,
            AnyEvent::OperationInvocation(e) => e.timestamp,
        }
    }

    /// Mutation type; `None` for operation invocation events.
    pub fn event_type(&self) -> Option<EventType> {
        match self {
            AnyEvent::Aas(e) | AnyEvent::Submodel(e) | AnyEvent::ConceptDescription(e) => {
                Some(e.event_type)
            }
            AnyEvent::SubmodelElement(e) => Some(e.event_type),
            AnyEvent::OperationInvocation(_) => None,
        }
    }

    /// Entity discriminator used on the wire and in topics.
    pub fn entity(&self) -> &'static str {
        match self {
            AnyEvent::Aas(e) | AnyEvent::Submodel(e) | AnyEvent::ConceptDescription(e) => {
                e.kind.as_str()
            }
            AnyEvent::SubmodelElement(_) => "submodel_element",
            AnyEvent::OperationInvocation(_) => "operation_invocation",
        }
    }

    /// Raw identifier of the affected entity (the parent submodel for
    /// element and operation events).
    pub fn identifier(&self) -> &str {
        match self {
            AnyEvent::Aas(e) | AnyEvent::Submodel(e) | AnyEvent::ConceptDescription(e) => {
                &e.identifier
            }
            AnyEvent::SubmodelElement(e) => &e.submodel_identifier,
            AnyEvent::OperationInvocation(e) => &e.submodel_identifier,
        }
    }

    /// Base64URL identifier of the affected entity.
    pub fn identifier_b64(&self) -> &str {
        match self {
            AnyEvent::Aas(e) | AnyEvent::Submodel(e) | AnyEvent::ConceptDescription(e) => {
                &e.identifier_b64
            }
            AnyEvent::SubmodelElement(e) => &e.submodel_identifier_b64,
            AnyEvent::OperationInvocation(e) => &e.submodel_identifier_b64,
        }
    }

    /// ETag after the mutation, when one exists.
    pub fn etag(&self) -> Option<&str> {
        match self {
            AnyEvent::Aas(e) | AnyEvent::Submodel(e) | AnyEvent::ConceptDescription(e) => {
                e.etag.as_deref()
            }
            _ => None,
        }
    }

    /// Partitioning key: events for one identifier always hash to the same
    /// bus partition, which preserves their order.
    pub fn partition_key(&self) -> &str {
        self.identifier()
    }

    /// JSON object broadcast to real-time subscribers.
    pub fn wire_json(&self) -> Value {
        let event_type = match self {
            AnyEvent::OperationInvocation(e) => e.phase.as_str(),
            other => other
                .event_type()
                .map(|t| t.as_str())
                .unwrap_or("unknown"),
        };
        let mut wire = json!({
            "eventId": self.event_id().to_string(),
            "eventType": event_type,
            "entity": self.entity(),
            "identifier": self.identifier(),
            "identifierB64": self.identifier_b64(),
            "timestamp": self.timestamp().to_rfc3339(),
        });
        if let Some(etag) = self.etag() {
            wire["etag"] = json!(etag);
        }
        if let AnyEvent::SubmodelElement(e) = self {
            wire["idShortPath"] = json!(e.id_short_path);
        }
        if let AnyEvent::OperationInvocation(e) = self {
            wire["invocationId"] = json!(e.invocation_id);
            wire["idShortPath"] = json!(e.id_short_path);
            if let Some(error) = &e.error_message {
                wire["errorMessage"] = json!(error);
            }
        }
        wire
    }

    /// MQTT-style topic: `titan/{entity}/{identifierB64}/{eventType}`.
    pub fn topic(&self) -> String {
        let event_type = match self {
            AnyEvent::OperationInvocation(e) => e.phase.as_str(),
            other => other
                .event_type()
                .map(|t| t.as_str())
                .unwrap_or("unknown"),
        };
        format!("titan/{}/{}/{}", self.entity(), self.identifier_b64(), event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ids::encode_id;

    fn sample_entity_event() -> EntityEvent {
        EntityEvent {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type: EventType::Created,
            kind: EntityKind::Aas,
            identifier: "urn:x:1".to_string(),
            identifier_b64: encode_id("urn:x:1"),
            doc_bytes: Some(Arc::new(br#"{"id":"urn:x:1"}"#.to_vec())),
            etag: Some("e".repeat(64)),
            semantic_id: None,
        }
    }

    #[test]
    fn test_wire_json_shape() {
        let event = AnyEvent::from_entity(sample_entity_event());
        let wire = event.wire_json();
        assert_eq!(wire["eventType"], "created");
        assert_eq!(wire["entity"], "aas");
        assert_eq!(wire["identifier"], "urn:x:1");
        assert_eq!(wire["identifierB64"], "dXJuOng6MQ");
        assert!(wire.get("etag").is_some());
        assert!(wire.get("eventId").is_some());
        assert!(wire.get("timestamp").is_some());
    }

    #[test]
    fn test_delete_event_has_no_etag() {
        let mut inner = sample_entity_event();
        inner.event_type = EventType::Deleted;
        inner.doc_bytes = None;
        inner.etag = None;
        let event = AnyEvent::from_entity(inner);
        assert!(event.wire_json().get("etag").is_none());
    }

    #[test]
    fn test_topic_naming() {
        let event = AnyEvent::from_entity(sample_entity_event());
        assert_eq!(event.topic(), "titan/aas/dXJuOng6MQ/created");
    }

    #[test]
    fn test_descriptor_events_use_descriptor_entity() {
        let mut inner = sample_entity_event();
        inner.kind = EntityKind::AasDescriptor;
        let event = AnyEvent::from_entity(inner);
        assert_eq!(event.entity(), "aas_descriptor");
        assert!(matches!(event, AnyEvent::Aas(_)));
    }

    #[test]
    fn test_element_event_partition_key_is_parent() {
        let event = AnyEvent::SubmodelElement(ElementEvent {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type: EventType::Updated,
            submodel_identifier: "urn:x:sm".to_string(),
            submodel_identifier_b64: encode_id("urn:x:sm"),
            id_short_path: "Outer.P".to_string(),
            value_bytes: Some(Arc::new(b"\"v\"".to_vec())),
        });
        assert_eq!(event.partition_key(), "urn:x:sm");
        assert_eq!(event.wire_json()["idShortPath"], "Outer.P");
    }
}
