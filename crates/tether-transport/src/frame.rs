//! JSON event framing
//!
//! Every WebSocket text frame carries `{"event": <name>, "data": <payload>}`.
//! The event name lets several logical channels share one connection; the
//! adapter only surfaces frames whose name matches its configured event.

use serde::{Deserialize, Serialize};
use tether_core::Payload;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default)]
    pub data: Payload,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, data: Payload) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let frame = EventFrame::new("message", json!({"payload": 2}));
        let text = frame.encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"event": "message", "data": {"payload": 2}}));
    }

    #[test]
    fn test_missing_data_is_null() {
        let frame = EventFrame::decode(br#"{"event":"ping"}"#).unwrap();
        assert_eq!(frame.event, "ping");
        assert!(frame.data.is_null());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(EventFrame::decode(b"not json").is_err());
        assert!(EventFrame::decode(br#"{"data":1}"#).is_err());
    }
}
