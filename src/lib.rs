//! Parley - realtime chat rooms over WebSocket
//!
//! This library implements a room-based broadcast server: many persistent
//! WebSocket connections are multiplexed into isolated rooms, each driven by a
//! single serializing actor. Hosts hold a signed token that grants
//! administrative rights (kicking participants, changing the room password,
//! deleting the room), rooms can be gated by a bcrypt-hashed password, and
//! WebRTC signaling frames are relayed opaquely between peers.
//!
//! ## Architecture
//!
//! - **Hub**: process-wide registry of rooms keyed by a numeric id.
//! - **Room**: a single-writer actor owning the membership set and four
//!   inboxes (register, unregister, broadcast, stop). Fan-out never blocks;
//!   slow consumers are evicted.
//! - **Client**: one per connection, with a bounded outbound queue, an
//!   idempotent close latch, and reader / writer / ping loops running on a
//!   fixed-capacity task pool.
//! - **Dispatcher**: classifies inbound frames (`chat`, `kick`, signaling
//!   relay, opaque relay) and enforces the host trust rules.
//! - **Admission**: validates room id, username, password, and host token
//!   before the upgrade; rejected connections never touch room state.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use parley::server::hub::Hub;
//! use parley::server::room::RoomOptions;
//!
//! #[tokio::main]
//! async fn main() {
//!     let hub = Arc::new(Hub::new());
//!     let room = hub.create_room(42, None, RoomOptions::new()).await.unwrap();
//!     room.stop();
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod server;
pub mod transport;

// Re-export the common types
pub use config::Config;
pub use error::{Error, Result};
pub use server::client::{Client, ClientId};
pub use server::hub::Hub;
pub use server::room::{MetricsNotifier, Room, RoomId, RoomOptions};
pub use transport::task_pool::TaskPool;
