//! The `{type, data}` message envelope
//!
//! Inbound frames keep their `data` member as a raw JSON slice so relayed
//! frames survive untouched, and so the dispatcher can defer payload parsing
//! until it knows the tag.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::Result;

/// Recognized message type tags
pub mod tags {
    pub const CHAT: &str = "chat";
    pub const JOIN: &str = "join";
    pub const LEAVE: &str = "leave";
    pub const KICK: &str = "kick";

    // WebRTC signaling, relayed opaquely
    pub const OFFER: &str = "offer";
    pub const ANSWER: &str = "answer";
    pub const ICE_CANDIDATE: &str = "ice-candidate";
}

/// Generic message wrapper for room traffic
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type tag (`chat`, `join`, `leave`, `kick`, ...)
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload, kept raw until the tag is known
    #[serde(default = "null_data")]
    pub data: Box<RawValue>,
}

fn null_data() -> Box<RawValue> {
    RawValue::from_string("null".to_owned()).expect("null is valid JSON")
}

impl Envelope {
    /// Decode an envelope from raw frame bytes
    pub fn decode(raw: &[u8]) -> Result<Envelope> {
        serde_json::from_slice(raw).map_err(Into::into)
    }

    /// Encode a tagged payload into a complete envelope string
    pub fn encode<T: Serialize>(kind: &str, data: &T) -> Result<String> {
        let envelope = Envelope {
            kind: kind.to_owned(),
            data: serde_json::value::to_raw_value(data)?,
        };
        serde_json::to_string(&envelope).map_err(Into::into)
    }

    /// Parse the payload into a concrete message type
    pub fn data<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(self.data.get()).map_err(Into::into)
    }
}
