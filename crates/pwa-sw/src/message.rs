//! Update handshake sent from a page to a waiting worker.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Messages a page may post to the worker agent.
///
/// Wire format: `{ "action": "activate" }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum HandshakeMessage {
    /// Apply the waiting update now.
    Activate,
}

impl HandshakeMessage {
    /// Parse a posted payload. Anything unrecognised yields `None`.
    pub fn parse(data: &JsonValue) -> Option<Self> {
        serde_json::from_value(data.clone()).ok()
    }

    pub fn to_value(self) -> JsonValue {
        // A unit variant with a string tag always serializes.
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        assert_eq!(HandshakeMessage::Activate.to_value(), json!({ "action": "activate" }));
    }

    #[test]
    fn test_parse_activate() {
        assert_eq!(
            HandshakeMessage::parse(&json!({ "action": "activate" })),
            Some(HandshakeMessage::Activate)
        );
    }

    #[test]
    fn test_unrecognised_payloads_are_ignored() {
        assert_eq!(HandshakeMessage::parse(&json!({ "action": "reload" })), None);
        assert_eq!(HandshakeMessage::parse(&json!({ "type": "activate" })), None);
        assert_eq!(HandshakeMessage::parse(&json!("activate")), None);
        assert_eq!(HandshakeMessage::parse(&JsonValue::Null), None);
    }
}
