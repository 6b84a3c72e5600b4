//! Wire protocol for room traffic
//!
//! Every frame on the wire is a UTF-8 JSON envelope `{"type": tag, "data":
//! object}`. The `data` member is opaque to the room itself; only the
//! dispatcher interprets it, and only for the `chat` and `kick` tags.
//! Everything else - including the WebRTC signaling tags - is relayed
//! byte-for-byte.

pub mod envelope;
pub mod messages;

pub use envelope::{tags, Envelope};
pub use messages::{
    ChatMessage, JoinNotification, KickNotification, KickRequest, LeaveNotification,
};
