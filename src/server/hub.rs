//! Process-wide room registry
//!
//! The hub is the sole authority for room lifetime in the registry: creation
//! is load-or-store (a colliding id never starts a second actor), reads do
//! not block writers, and deletion is atomic. Deleting a room does not stop
//! its actor; shutdown stops all actors explicitly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::server::room::{MetricsNotifier, Room, RoomId, RoomOptions, MAX_ROOM_ID, MIN_ROOM_ID};

/// Concurrent mapping of room id to running room
pub struct Hub {
    rooms: RwLock<HashMap<RoomId, Arc<Room>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a new room and spawn its actor. Returns `None` when the id is
    /// already taken; the existing room is untouched and no second actor
    /// starts.
    pub async fn create_room(
        &self,
        id: RoomId,
        metrics: Option<Arc<dyn MetricsNotifier>>,
        options: RoomOptions,
    ) -> Option<Arc<Room>> {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(&id) {
            return None;
        }
        let room = Room::new(id, metrics, options);
        rooms.insert(id, room.clone());
        tokio::spawn(room.clone().run());
        Some(room)
    }

    /// Look up a room without blocking writers
    pub async fn get_room(&self, id: RoomId) -> Option<Arc<Room>> {
        self.rooms.read().await.get(&id).cloned()
    }

    /// Remove a room from the registry, reporting whether it existed. The
    /// actor keeps running; callers stop it separately when appropriate.
    pub async fn delete_room(&self, id: RoomId) -> bool {
        self.rooms.write().await.remove(&id).is_some()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Snapshot of all registered rooms
    pub async fn rooms(&self) -> Vec<Arc<Room>> {
        self.rooms.read().await.values().cloned().collect()
    }

    /// Stop every room and wait for the actors to drain, up to `deadline`.
    /// Rooms still draining past the deadline are abandoned with a warning.
    pub async fn stop_all(&self, deadline: Duration) {
        let rooms = self.rooms().await;
        for room in &rooms {
            room.stop();
        }
        let drained = join_all(rooms.iter().map(|room| room.wait_stopped()));
        match tokio::time::timeout(deadline, drained).await {
            Ok(_) => info!(rooms = rooms.len(), "all rooms stopped"),
            Err(_) => warn!("shutdown deadline exceeded, abandoning remaining rooms"),
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse and range-check a room id from its textual form
pub fn parse_room_id(raw: &str) -> Result<RoomId> {
    let id: RoomId = raw
        .parse()
        .map_err(|_| Error::bad_input("invalid room ID format"))?;
    if !(MIN_ROOM_ID..=MAX_ROOM_ID).contains(&id) {
        return Err(Error::bad_input("room ID out of valid range"));
    }
    Ok(id)
}
