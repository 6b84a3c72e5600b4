//! The room hub core
//!
//! ## Control flow
//!
//! An upgraded connection enters through [`admission`], which resolves the
//! target room in the [`hub::Hub`], gates on password and host token, builds
//! a [`client::Client`], and submits the reader and writer loops to the task
//! pool. The reader hands every inbound frame to [`dispatch`], which feeds
//! the room's broadcast inbox; the [`room::Room`] actor serializes all
//! membership changes and fan-out. The REST control plane in [`api`] drives
//! the same hub operations from HTTP.

pub mod admission;
pub mod api;
pub mod client;
pub mod dispatch;
pub mod hub;
pub mod room;

pub use client::{Client, ClientId};
pub use hub::Hub;
pub use room::{MetricsNotifier, Room, RoomId, RoomOptions};
