//! Publish helpers used by the write handlers.
//!
//! All helpers construct the event, enqueue it, and hand it back so the
//! caller can reuse the generated identity. Publication happens strictly
//! after the authoritative write has committed; a saturated bus at this
//! point is logged by the caller rather than surfaced, since the request
//! has already succeeded.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::core::error::TitanResult;
use crate::core::model::EntityKind;
use crate::events::bus::InMemoryEventBus;
use crate::events::schema::{
    AnyEvent, ElementEvent, EntityEvent, EventType, InvocationPhase, OperationEvent,
};

/// Publish a created or updated event for a top-level entity.
#[allow(clippy::too_many_arguments)]
pub fn publish_entity_event(
    bus: &InMemoryEventBus,
    kind: EntityKind,
    event_type: EventType,
    identifier: &str,
    identifier_b64: &str,
    doc_bytes: Arc<Vec<u8>>,
    etag: &str,
    semantic_id: Option<String>,
) -> TitanResult<AnyEvent> {
    let event = AnyEvent::from_entity(EntityEvent {
        event_id: Uuid::new_v4(),
        timestamp: Utc::now(),
        event_type,
        kind,
        identifier: identifier.to_string(),
        identifier_b64: identifier_b64.to_string(),
        doc_bytes: Some(doc_bytes),
        etag: Some(etag.to_string()),
        semantic_id,
    });
    bus.publish(event.clone())?;
    Ok(event)
}

/// Publish a deleted event for a top-level entity.
pub fn publish_entity_deleted(
    bus: &InMemoryEventBus,
    kind: EntityKind,
    identifier: &str,
    identifier_b64: &str,
) -> TitanResult<AnyEvent> {
    let event = AnyEvent::from_entity(EntityEvent {
        event_id: Uuid::new_v4(),
        timestamp: Utc::now(),
        event_type: EventType::Deleted,
        kind,
        identifier: identifier.to_string(),
        identifier_b64: identifier_b64.to_string(),
        doc_bytes: None,
        etag: None,
        semantic_id: None,
    });
    bus.publish(event.clone())?;
    Ok(event)
}

/// Publish a SubmodelElement event. `value_bytes` is `None` for deletes.
pub fn publish_element_event(
    bus: &InMemoryEventBus,
    event_type: EventType,
    submodel_identifier: &str,
    submodel_identifier_b64: &str,
    id_short_path: &str,
    value_bytes: Option<Arc<Vec<u8>>>,
) -> TitanResult<AnyEvent> {
    let event = AnyEvent::SubmodelElement(ElementEvent {
        event_id: Uuid::new_v4(),
        timestamp: Utc::now(),
        event_type,
        submodel_identifier: submodel_identifier.to_string(),
        submodel_identifier_b64: submodel_identifier_b64.to_string(),
        id_short_path: id_short_path.to_string(),
        value_bytes,
    });
    bus.publish(event.clone())?;
    Ok(event)
}

/// Publish an operation invocation event. Downstream field connectors pick
/// it up and execute the operation.
pub fn publish_operation_invoked(
    bus: &InMemoryEventBus,
    invocation_id: &str,
    submodel_identifier: &str,
    submodel_identifier_b64: &str,
    id_short_path: &str,
    input_arguments: Option<Value>,
) -> TitanResult<AnyEvent> {
    let event = AnyEvent::OperationInvocation(OperationEvent {
        event_id: Uuid::new_v4(),
        timestamp: Utc::now(),
        phase: InvocationPhase::Invoked,
        invocation_id: invocation_id.to_string(),
        submodel_identifier: submodel_identifier.to_string(),
        submodel_identifier_b64: submodel_identifier_b64.to_string(),
        id_short_path: id_short_path.to_string(),
        input_arguments,
        output_arguments: None,
        error_message: None,
    });
    bus.publish(event.clone())?;
    Ok(event)
}

/// Publish a successful operation completion.
pub fn publish_operation_completed(
    bus: &InMemoryEventBus,
    invocation_id: &str,
    submodel_identifier: &str,
    submodel_identifier_b64: &str,
    id_short_path: &str,
    output_arguments: Option<Value>,
) -> TitanResult<AnyEvent> {
    let event = AnyEvent::OperationInvocation(OperationEvent {
        event_id: Uuid::new_v4(),
        timestamp: Utc::now(),
        phase: InvocationPhase::Completed,
        invocation_id: invocation_id.to_string(),
        submodel_identifier: submodel_identifier.to_string(),
        submodel_identifier_b64: submodel_identifier_b64.to_string(),
        id_short_path: id_short_path.to_string(),
        input_arguments: None,
        output_arguments,
        error_message: None,
    });
    bus.publish(event.clone())?;
    Ok(event)
}

/// Publish a failed operation.
pub fn publish_operation_failed(
    bus: &InMemoryEventBus,
    invocation_id: &str,
    submodel_identifier: &str,
    submodel_identifier_b64: &str,
    id_short_path: &str,
    error_message: &str,
) -> TitanResult<AnyEvent> {
    let event = AnyEvent::OperationInvocation(OperationEvent {
        event_id: Uuid::new_v4(),
        timestamp: Utc::now(),
        phase: InvocationPhase::Failed,
        invocation_id: invocation_id.to_string(),
        submodel_identifier: submodel_identifier.to_string(),
        submodel_identifier_b64: submodel_identifier_b64.to_string(),
        id_short_path: id_short_path.to_string(),
        input_arguments: None,
        output_arguments: None,
        error_message: Some(error_message.to_string()),
    });
    bus.publish(event.clone())?;
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventBusConfig;
    use crate::core::ids::encode_id;

    #[test]
    fn test_publish_entity_event_enqueues() {
        let bus = InMemoryEventBus::new(&EventBusConfig::default());
        let event = publish_entity_event(
            &bus,
            EntityKind::Aas,
            EventType::Created,
            "urn:x:1",
            &encode_id("urn:x:1"),
            Arc::new(b"{}".to_vec()),
            &"e".repeat(64),
            None,
        )
        .unwrap();

        assert_eq!(bus.pending_count(), 1);
        assert_eq!(event.entity(), "aas");
        assert_eq!(event.event_type(), Some(EventType::Created));
    }

    #[test]
    fn test_publish_deleted_carries_no_bytes() {
        let bus = InMemoryEventBus::new(&EventBusConfig::default());
        let event =
            publish_entity_deleted(&bus, EntityKind::Submodel, "urn:x:sm", &encode_id("urn:x:sm"))
                .unwrap();
        assert!(event.etag().is_none());
        assert_eq!(event.event_type(), Some(EventType::Deleted));
    }

    #[test]
    fn test_operation_lifecycle_events() {
        let bus = InMemoryEventBus::new(&EventBusConfig::default());
        let invoked = publish_operation_invoked(
            &bus,
            "inv-1",
            "urn:x:sm",
            &encode_id("urn:x:sm"),
            "Pump.Start",
            Some(serde_json::json!([{"value": "1"}])),
        )
        .unwrap();
        assert_eq!(invoked.wire_json()["eventType"], "invoked");

        let failed = publish_operation_failed(
            &bus,
            "inv-1",
            "urn:x:sm",
            &encode_id("urn:x:sm"),
            "Pump.Start",
            "device offline",
        )
        .unwrap();
        assert_eq!(failed.wire_json()["eventType"], "failed");
        assert_eq!(failed.wire_json()["errorMessage"], "device offline");
    }
}
