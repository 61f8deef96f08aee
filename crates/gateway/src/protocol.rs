//! WebSocket protocol message types.
//!
//! Subscribers receive normalized batches as JSON text frames. Inbound text
//! is not interpreted: heartbeat words are echoed verbatim and anything else
//! comes back with a fixed prefix.

use normalizer::RawEvent;
use serde::Serialize;
use serde_json::Value;

/// Heartbeat words echoed back unchanged.
pub const PING: &str = "ping";
pub const PONG: &str = "pong";

/// Prefix for echoes of any other inbound text.
pub const ECHO_PREFIX: &str = "Server received: ";

/// Whether `text` is a heartbeat word.
pub fn is_heartbeat(text: &str) -> bool {
    text == PING || text == PONG
}

/// Reply for an inbound text frame.
pub fn echo_reply(text: &str) -> String {
    if is_heartbeat(text) {
        text.to_string()
    } else {
        format!("{}{}", ECHO_PREFIX, text)
    }
}

/// Per-event notice pushed by the legacy Event Grid endpoint.
///
/// Both fields are copied as posted; absent ones are left out.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventNotice<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<&'a Value>,
}

impl<'a> EventNotice<'a> {
    pub fn of(event: &'a RawEvent) -> Self {
        Self {
            event_type: event.get("eventType"),
            data: event.data(),
        }
    }
}
