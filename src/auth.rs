//! Password hashing and host-token verification
//!
//! Rooms may be gated by a bcrypt-hashed password, and the room creator
//! receives a signed host token asserting `{room_id, host_id, host, exp}`.
//! A token is only honored when the signature verifies, it has not expired,
//! it targets the right room, and its host id matches the room's host id.

use jsonwebtoken::{decode, encode, get_current_timestamp, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::server::room::RoomId;

/// bcrypt cost factor. The default cost is too expensive under load; cost 4
/// keeps admission latency acceptable for interactive use.
const BCRYPT_COST: u32 = 4;

/// Host tokens expire a day after room creation.
const HOST_TOKEN_TTL_SECS: u64 = 24 * 60 * 60;

/// Claims carried by a host token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostClaims {
    /// Room the token grants host rights on
    pub room_id: RoomId,
    /// Opaque id of the room's host
    pub host_id: String,
    /// Host assertion; must be true for the token to be honored
    pub host: bool,
    /// Expiry as seconds since the UNIX epoch
    pub exp: u64,
}

/// Hash a room password with bcrypt
pub fn hash_password(password: &str) -> Result<String> {
    bcrypt::hash(password, BCRYPT_COST).map_err(Into::into)
}

/// Compare a candidate password against a stored bcrypt hash.
///
/// An unparseable hash counts as a mismatch rather than an error so the
/// admission path stays uniform.
pub fn verify_password(password: &str, hashed: &str) -> bool {
    bcrypt::verify(password, hashed).unwrap_or(false)
}

/// Issue a host token for a freshly created room
pub fn issue_host_token(secret: &str, room_id: RoomId, host_id: &str) -> Result<String> {
    let claims = HostClaims {
        room_id,
        host_id: host_id.to_owned(),
        host: true,
        exp: get_current_timestamp() + HOST_TOKEN_TTL_SECS,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| Error::internal(format!("failed to sign host token: {}", e)))
}

/// Verify a host token against a target room.
///
/// `room_host_id` is the room's recorded host id; a room created without a
/// host never matches any token.
pub fn verify_host_token(
    token: &str,
    secret: &str,
    room_id: RoomId,
    room_host_id: Option<&str>,
) -> Result<HostClaims> {
    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<HostClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    let claims = data.claims;

    if !claims.host {
        return Err(Error::unauthorized("not a host token"));
    }
    if claims.room_id != room_id {
        return Err(Error::unauthorized("token room_id mismatch"));
    }
    match room_host_id {
        Some(host_id) if host_id == claims.host_id => Ok(claims),
        Some(_) => Err(Error::unauthorized("token host_id mismatch")),
        None => Err(Error::unauthorized("room has no host")),
    }
}
