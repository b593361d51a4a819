//! WebSocket endpoint for real-time events.
//!
//! `GET /ws/events?entity=aas&eventTypes=created,updated&identifier=...`
//! upgrades to a WebSocket that streams matching events as JSON objects in
//! the broadcast wire format. Closing the socket removes the subscription
//! and drains its queue.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;

use crate::api::state::SharedCore;
use crate::events::schema::EventType;
use crate::realtime::subscriptions::SubscriptionFilter;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Entity discriminator; defaults to `aas`
    pub entity: Option<String>,
    /// Comma-separated mutation types; defaults to all
    #[serde(rename = "eventTypes")]
    pub event_types: Option<String>,
    /// Optional specific identifier
    pub identifier: Option<String>,
}

fn parse_event_types(raw: Option<&str>) -> Vec<EventType> {
    let Some(raw) = raw else {
        return vec![EventType::Created, EventType::Updated, EventType::Deleted];
    };
    let mut types = Vec::new();
    for token in raw.split(',') {
        match token.trim() {
            "created" => types.push(EventType::Created),
            "updated" => types.push(EventType::Updated),
            "deleted" => types.push(EventType::Deleted),
            _ => {}
        }
    }
    if types.is_empty() {
        vec![EventType::Created, EventType::Updated, EventType::Deleted]
    } else {
        types
    }
}

pub async fn ws_events(
    State(core): State<SharedCore>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let filter = SubscriptionFilter {
        entity_type: query.entity.unwrap_or_else(|| "aas".to_string()),
        event_types: parse_event_types(query.event_types.as_deref()),
        identifier: query.identifier,
    };
    ws.on_upgrade(move |socket| serve_subscription(socket, core, filter))
}

async fn serve_subscription(mut socket: WebSocket, core: SharedCore, filter: SubscriptionFilter) {
    let subscription = core.subscriptions.subscribe(filter);
    tracing::debug!(subscription_id = %subscription.id(), "websocket subscriber connected");

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let payload = event.wire_json().to_string();
                if socket.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Pings are answered by axum; other frames are ignored
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::debug!(subscription_id = %subscription.id(), "websocket subscriber disconnected");
}
