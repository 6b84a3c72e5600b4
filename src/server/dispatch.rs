//! Inbound frame dispatch
//!
//! Classifies each inbound frame by its `type` tag and applies the trust
//! rules: chat text is length-capped and stamped with the sender's username,
//! `kick` is honored only from hosts, signaling tags are relayed to everyone
//! but the sender, and anything else is relayed to the whole room. Frames
//! that do not parse are dropped without closing the connection.
//!
//! The dispatcher never mutates room membership directly; removal always
//! goes through the room's unregister inbox.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::protocol::envelope::{tags, Envelope};
use crate::protocol::messages::{ChatMessage, KickNotification, KickRequest, MAX_TEXT_LENGTH};
use crate::server::client::Client;
use crate::server::room::Room;

/// Route one inbound frame from `client`
pub async fn dispatch(client: &Arc<Client>, raw: Bytes) {
    let Some(room) = client.room() else {
        return;
    };
    let Ok(envelope) = Envelope::decode(&raw) else {
        debug!(username = client.username(), "dropping malformed frame");
        return;
    };

    match envelope.kind.as_str() {
        tags::CHAT => handle_chat(client, &room, &envelope).await,
        tags::KICK => {
            if !client.is_host() {
                warn!(
                    username = client.username(),
                    room_id = room.id(),
                    "non-host attempted kick"
                );
                return;
            }
            handle_kick(client, &room, &envelope).await;
        }
        tags::OFFER | tags::ANSWER | tags::ICE_CANDIDATE => {
            room.send_except(client.id(), raw).await;
        }
        _ => room.broadcast(raw).await,
    }
}

async fn handle_chat(client: &Arc<Client>, room: &Arc<Room>, envelope: &Envelope) {
    let Ok(mut chat) = envelope.data::<ChatMessage>() else {
        debug!(username = client.username(), "dropping malformed chat frame");
        return;
    };
    if chat.text.len() > MAX_TEXT_LENGTH {
        warn!(
            username = client.username(),
            length = chat.text.len(),
            "dropping over-length chat message"
        );
        return;
    }

    // The username on the wire is never trusted.
    chat.username = client.username().to_owned();

    let Ok(message) = Envelope::encode(tags::CHAT, &chat) else {
        return;
    };
    room.broadcast(Bytes::from(message)).await;
}

async fn handle_kick(client: &Arc<Client>, room: &Arc<Room>, envelope: &Envelope) {
    let Ok(kick) = envelope.data::<KickRequest>() else {
        debug!(username = client.username(), "dropping malformed kick frame");
        return;
    };
    if kick.target_username == client.username() {
        return;
    }
    let Some(target) = room.find_member(&kick.target_username).await else {
        debug!(
            room_id = room.id(),
            target = %kick.target_username,
            "kick target not found"
        );
        return;
    };

    // Latch first so the target sees neither the kick broadcast nor anything
    // after it; the broadcast goes out before the unregister so remaining
    // members observe the kick, then the leave.
    target.close();

    let notification = KickNotification {
        target_username: kick.target_username.clone(),
        kicked_by: client.username().to_owned(),
    };
    if let Ok(message) = Envelope::encode(tags::KICK, &notification) {
        room.broadcast(Bytes::from(message)).await;
    }
    room.unregister(target).await;

    info!(
        room_id = room.id(),
        target = %kick.target_username,
        kicked_by = client.username(),
        "user kicked"
    );
}
