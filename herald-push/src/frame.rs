//! Wire frames for the text/event-stream contract.
//!
//! Each frame carries a server-generated id (the client's replay cursor),
//! an event name and a JSON payload. Keep-alive pings are frames with no
//! id - they advance nothing.

use serde::{Deserialize, Serialize};

use herald_core::types::EventId;

use crate::event::PushEvent;

/// One server-to-client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushFrame {
    /// Event id echoed back by reconnecting clients; absent on pings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EventId>,
    /// Event name.
    pub name: String,
    /// JSON payload.
    pub data: serde_json::Value,
}

impl PushFrame {
    /// Builds the frame for a stored push event.
    ///
    /// The stored event's id is reused, so replayed frames keep the
    /// client's last-seen cursor consistent with the log.
    #[must_use]
    pub fn from_event(event: &PushEvent) -> Self {
        Self {
            id: Some(event.id),
            name: event.name.clone(),
            data: event.payload.clone(),
        }
    }

    /// Builds a keep-alive ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Self {
            id: None,
            name: "ping".to_string(),
            data: serde_json::Value::Null,
        }
    }

    /// Returns true if this is a keep-alive ping.
    #[must_use]
    pub fn is_ping(&self) -> bool {
        self.id.is_none() && self.name == "ping"
    }

    /// Encodes the frame as one text/event-stream block.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut out = String::new();
        if let Some(id) = &self.id {
            out.push_str("id: ");
            out.push_str(&id.to_string());
            out.push('\n');
        }
        out.push_str("event: ");
        out.push_str(&self.name);
        out.push('\n');
        out.push_str("data: ");
        out.push_str(&self.data.to_string());
        out.push_str("\n\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::types::UserId;
    use serde_json::json;

    #[test]
    fn test_frame_from_event_reuses_id() {
        let event = PushEvent::to_recipient(UserId::generate(), "notifications", json!({"id": 42}));
        let frame = PushFrame::from_event(&event);

        assert_eq!(frame.id, Some(event.id));
        assert_eq!(frame.name, "notifications");
        assert_eq!(frame.data, json!({"id": 42}));
    }

    #[test]
    fn test_encode_event_stream_block() {
        let event = PushEvent::to_recipient(UserId::generate(), "notifications", json!({"id": 42}));
        let frame = PushFrame::from_event(&event);
        let encoded = frame.encode();

        assert!(encoded.starts_with(&format!("id: {}\n", event.id)));
        assert!(encoded.contains("event: notifications\n"));
        assert!(encoded.contains("data: {\"id\":42}\n"));
        assert!(encoded.ends_with("\n\n"));
    }

    #[test]
    fn test_ping_has_no_id() {
        let ping = PushFrame::ping();
        assert!(ping.is_ping());

        let encoded = ping.encode();
        assert!(!encoded.contains("id:"));
        assert!(encoded.contains("event: ping\n"));
    }
}
