//! Typed message payloads and input validation

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum chat text length in bytes
pub const MAX_TEXT_LENGTH: usize = 1000;

/// Username length bounds
pub const MIN_USERNAME_LENGTH: usize = 4;
pub const MAX_USERNAME_LENGTH: usize = 50;

/// Username assigned when the client does not supply one
pub const DEFAULT_USERNAME: &str = "Anonymous";

/// Characters rejected in usernames to keep them markup-safe
const FORBIDDEN_USERNAME_CHARS: &[char] = &['<', '>', '"', '\'', '&'];

/// Chat message payload.
///
/// Inbound frames carry only `text`; the dispatcher stamps `username` from
/// the sending client before fan-out, so the self-asserted field on the wire
/// is never trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
    #[serde(default)]
    pub username: String,
}

/// Payload of a host's kick request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KickRequest {
    pub target_username: String,
}

/// Broadcast to the room when a user is kicked
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KickNotification {
    pub target_username: String,
    pub kicked_by: String,
}

/// Broadcast to the room when a user joins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinNotification {
    pub username: String,
    #[serde(rename = "onlineCount")]
    pub online_count: usize,
}

/// Broadcast to the room when a user leaves
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveNotification {
    pub username: String,
    #[serde(rename = "onlineCount")]
    pub online_count: usize,
}

/// Validate a self-asserted username.
///
/// Usernames are 4-50 bytes, non-blank, and must not contain markup
/// characters. They are not unique; two participants may share a name.
pub fn validate_username(username: &str) -> Result<()> {
    if username.trim().len() < MIN_USERNAME_LENGTH {
        return Err(Error::bad_input("username is too short"));
    }
    if username.len() > MAX_USERNAME_LENGTH {
        return Err(Error::bad_input("username is too long"));
    }
    if username.contains(FORBIDDEN_USERNAME_CHARS) {
        return Err(Error::bad_input("username contains invalid characters"));
    }
    Ok(())
}
