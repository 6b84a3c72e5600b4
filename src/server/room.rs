//! The room actor
//!
//! A room is a single-writer actor: all membership changes and message
//! fan-out are serialized through its inboxes, so iteration and eviction
//! never race. The membership map is additionally behind a reader/writer
//! lock because the dispatcher (kick target lookup, signaling relay) and the
//! REST surface read it from other tasks.
//!
//! Fan-out never blocks. A member whose outbound queue is full, or whose
//! close latch has already fired, is evicted during the same broadcast
//! cycle: one slow consumer cannot head-of-line-block the room.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::envelope::{tags, Envelope};
use crate::protocol::messages::{JoinNotification, LeaveNotification};
use crate::server::client::{Client, ClientId};
use crate::transport::connection::Outbound;

/// Room identifier. Valid ids are confined to [`MIN_ROOM_ID`]..=[`MAX_ROOM_ID`].
pub type RoomId = u32;

pub const MIN_ROOM_ID: RoomId = 1;
pub const MAX_ROOM_ID: RoomId = 999_999_999;

/// Capacity of each room inbox
pub const INBOX_BUFFER: usize = 100;

/// Sink for the room's operational signals.
///
/// Implementations must be cheap and non-blocking; they are invoked from the
/// actor's fan-out path.
pub trait MetricsNotifier: Send + Sync {
    /// A message was dropped because the recipient could not keep up
    fn dropped_message(&self, room_id: RoomId, username: &str);

    fn client_connected(&self) {}

    fn client_disconnected(&self) {}
}

/// Creation-time room options
#[derive(Debug, Clone, Default)]
pub struct RoomOptions {
    host_id: Option<String>,
    hashed_password: Option<String>,
}

impl RoomOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the room's host id. Host tokens are verified against it at
    /// admission; a room without a host id accepts no host token.
    pub fn with_host<T: Into<String>>(mut self, host_id: T) -> Self {
        self.host_id = Some(host_id.into());
        self
    }

    /// Gate the room behind an already-hashed password
    pub fn with_password<T: Into<String>>(mut self, hashed_password: T) -> Self {
        self.hashed_password = Some(hashed_password.into());
        self
    }
}

/// Receiver ends of the room inboxes, taken by the actor loop
struct Inboxes {
    register_rx: mpsc::Receiver<Arc<Client>>,
    unregister_rx: mpsc::Receiver<Arc<Client>>,
    broadcast_rx: mpsc::Receiver<Bytes>,
}

/// A broadcast group with a single serializing actor
pub struct Room {
    id: RoomId,
    host_id: Option<String>,
    hashed_password: RwLock<Option<String>>,
    members: RwLock<HashMap<ClientId, Arc<Client>>>,
    register_tx: mpsc::Sender<Arc<Client>>,
    unregister_tx: mpsc::Sender<Arc<Client>>,
    broadcast_tx: mpsc::Sender<Bytes>,
    inboxes: Mutex<Option<Inboxes>>,
    stop: CancellationToken,
    done: CancellationToken,
    metrics: Option<Arc<dyn MetricsNotifier>>,
}

impl Room {
    /// Create a room. The actor does not run until [`Room::run`] is spawned;
    /// the hub does that on successful registration.
    pub fn new(
        id: RoomId,
        metrics: Option<Arc<dyn MetricsNotifier>>,
        options: RoomOptions,
    ) -> Arc<Self> {
        let (register_tx, register_rx) = mpsc::channel(INBOX_BUFFER);
        let (unregister_tx, unregister_rx) = mpsc::channel(INBOX_BUFFER);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(INBOX_BUFFER);

        Arc::new(Self {
            id,
            host_id: options.host_id,
            hashed_password: RwLock::new(options.hashed_password),
            members: RwLock::new(HashMap::new()),
            register_tx,
            unregister_tx,
            broadcast_tx,
            inboxes: Mutex::new(Some(Inboxes {
                register_rx,
                unregister_rx,
                broadcast_rx,
            })),
            stop: CancellationToken::new(),
            done: CancellationToken::new(),
            metrics,
        })
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn host_id(&self) -> Option<&str> {
        self.host_id.as_deref()
    }

    pub async fn has_password(&self) -> bool {
        self.hashed_password.read().await.is_some()
    }

    pub async fn hashed_password(&self) -> Option<String> {
        self.hashed_password.read().await.clone()
    }

    /// Replace the room password hash; `None` removes the gate
    pub async fn set_password(&self, hashed: Option<String>) {
        *self.hashed_password.write().await = hashed;
    }

    pub async fn client_count(&self) -> usize {
        self.members.read().await.len()
    }

    /// The actor loop. Runs until the stop latch fires, then closes every
    /// remaining member and clears the membership. Terminal and absorbing:
    /// a second call returns immediately.
    pub async fn run(self: Arc<Self>) {
        let Some(Inboxes {
            mut register_rx,
            mut unregister_rx,
            mut broadcast_rx,
        }) = self.inboxes.lock().await.take()
        else {
            warn!(room_id = self.id, "room actor started twice");
            return;
        };

        debug!(room_id = self.id, "room actor started");
        loop {
            // Broadcast ranks above unregister so frames already accepted for
            // fan-out (like a kick notification) reach a departing member's
            // peers before their leave is processed.
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                Some(client) = register_rx.recv() => self.add_client(client).await,
                Some(message) = broadcast_rx.recv() => self.fan_out(message).await,
                Some(client) = unregister_rx.recv() => self.remove_client(&client).await,
            }
        }

        self.shutdown_members().await;
        self.done.cancel();
        debug!(room_id = self.id, "room actor stopped");
    }

    /// Enqueue a client for registration. Fails once the room is stopped.
    pub async fn register(&self, client: Arc<Client>) -> Result<()> {
        self.register_tx
            .send(client)
            .await
            .map_err(|_| Error::internal("room is stopped"))
    }

    /// Enqueue a client for removal. If the actor is already gone, the
    /// client's close latch is fired directly so its loops still unwind.
    pub async fn unregister(&self, client: Arc<Client>) {
        if self.unregister_tx.send(client.clone()).await.is_err() {
            client.close();
        }
    }

    /// Enqueue a message for fan-out to every member. Blocking on a full
    /// inbox is deliberate: it applies per-sender backpressure without
    /// affecting other rooms.
    pub async fn broadcast(&self, message: Bytes) {
        let _ = self.broadcast_tx.send(message).await;
    }

    /// Fire the stop latch. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Resolves when the stop latch fires
    pub async fn stopped(&self) {
        self.stop.cancelled().await;
    }

    /// Resolves when the actor has fully drained and returned
    pub async fn wait_stopped(&self) {
        self.done.cancelled().await;
    }

    /// Find a member by username. Usernames are not unique; the first match
    /// wins.
    pub async fn find_member(&self, username: &str) -> Option<Arc<Client>> {
        self.members
            .read()
            .await
            .values()
            .find(|client| client.username() == username)
            .cloned()
    }

    /// Remove a member by username through the actor's unregister path.
    /// Returns whether a member with that name was found.
    pub async fn kick_by_username(&self, username: &str) -> bool {
        let Some(client) = self.find_member(username).await else {
            return false;
        };
        self.unregister(client).await;
        true
    }

    /// Relay a message to every member except the sender, with the same
    /// non-blocking policy as broadcast fan-out. Used for signaling frames.
    pub async fn send_except(&self, sender: ClientId, message: Bytes) {
        let mut stalled = Vec::new();
        {
            let members = self.members.read().await;
            for client in members.values() {
                if client.id() == sender {
                    continue;
                }
                if client.is_closed() || client.try_enqueue(Outbound::Data(message.clone())).is_err()
                {
                    stalled.push(client.clone());
                }
            }
        }
        for client in stalled {
            client.close();
            if let Some(metrics) = &self.metrics {
                metrics.dropped_message(self.id, client.username());
            }
            self.unregister(client).await;
        }
    }

    async fn add_client(&self, client: Arc<Client>) {
        {
            let mut members = self.members.write().await;
            members.insert(client.id(), client.clone());
        }
        if let Some(metrics) = &self.metrics {
            metrics.client_connected();
        }
        debug!(room_id = self.id, username = client.username(), "client joined");
        self.notify_join(&client).await;
    }

    async fn remove_client(&self, client: &Arc<Client>) {
        let removed = {
            let mut members = self.members.write().await;
            members.remove(&client.id()).is_some()
        };
        // Removed is absorbing; a repeated unregister emits nothing.
        if !removed {
            return;
        }
        client.close();
        if let Some(metrics) = &self.metrics {
            metrics.client_disconnected();
        }
        debug!(room_id = self.id, username = client.username(), "client left");
        self.notify_leave(client).await;
    }

    async fn fan_out(&self, message: Bytes) {
        let mut stalled = Vec::new();
        {
            let members = self.members.read().await;
            for client in members.values() {
                if client.is_closed() {
                    stalled.push(client.clone());
                    continue;
                }
                if client.try_enqueue(Outbound::Data(message.clone())).is_err() {
                    stalled.push(client.clone());
                }
            }
        }

        if stalled.is_empty() {
            return;
        }

        let mut evicted = Vec::new();
        {
            let mut members = self.members.write().await;
            for client in stalled {
                if members.remove(&client.id()).is_some() {
                    client.close();
                    if let Some(metrics) = &self.metrics {
                        metrics.dropped_message(self.id, client.username());
                        metrics.client_disconnected();
                    }
                    evicted.push(client);
                }
            }
        }
        for client in evicted {
            info!(
                room_id = self.id,
                username = client.username(),
                "evicted slow consumer"
            );
            self.notify_leave(&client).await;
        }
    }

    async fn notify_join(&self, client: &Arc<Client>) {
        let notification = JoinNotification {
            username: client.username().to_owned(),
            online_count: self.client_count().await,
        };
        self.broadcast_notification(tags::JOIN, &notification).await;
    }

    async fn notify_leave(&self, client: &Arc<Client>) {
        let notification = LeaveNotification {
            username: client.username().to_owned(),
            online_count: self.client_count().await,
        };
        self.broadcast_notification(tags::LEAVE, &notification).await;
    }

    /// Enqueue a notification to every member. Full queues drop it silently;
    /// notifications never cause eviction.
    async fn broadcast_notification<T: Serialize>(&self, kind: &str, payload: &T) {
        let Ok(message) = Envelope::encode(kind, payload) else {
            return;
        };
        let message = Bytes::from(message);
        let members = self.members.read().await;
        for client in members.values() {
            let _ = client.try_enqueue(Outbound::Data(message.clone()));
        }
    }

    async fn shutdown_members(&self) {
        let drained: Vec<Arc<Client>> = {
            let mut members = self.members.write().await;
            members.drain().map(|(_, client)| client).collect()
        };
        for client in drained {
            client.close();
            if let Some(metrics) = &self.metrics {
                metrics.client_disconnected();
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::time::timeout;

    use crate::protocol::messages::ChatMessage;
    use crate::transport::connection::OUTBOUND_BUFFER;

    /// Notifier recording every dropped-message signal
    #[derive(Default)]
    pub struct RecordingMetrics {
        pub drops: StdMutex<Vec<(RoomId, String)>>,
    }

    impl MetricsNotifier for RecordingMetrics {
        fn dropped_message(&self, room_id: RoomId, username: &str) {
            self.drops
                .lock()
                .unwrap()
                .push((room_id, username.to_owned()));
        }
    }

    pub fn spawn_room(
        id: RoomId,
        metrics: Option<Arc<dyn MetricsNotifier>>,
        options: RoomOptions,
    ) -> Arc<Room> {
        let room = Room::new(id, metrics, options);
        tokio::spawn(room.clone().run());
        room
    }

    pub async fn recv_frame(rx: &mut mpsc::Receiver<Outbound>) -> Envelope {
        let frame = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("outbound queue closed");
        match frame {
            Outbound::Data(raw) => Envelope::decode(&raw).expect("invalid envelope"),
            other => panic!("expected data frame, got {:?}", other),
        }
    }

    pub async fn expect_silence(rx: &mut mpsc::Receiver<Outbound>) {
        let got = timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(got.is_err(), "expected no frame, got {:?}", got.unwrap());
    }

    async fn wait_for_count(room: &Arc<Room>, want: usize) {
        timeout(Duration::from_secs(1), async {
            while room.client_count().await != want {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("member count never reached {}", want));
    }

    #[tokio::test]
    async fn test_register_emits_join_with_counts() {
        let room = spawn_room(42, None, RoomOptions::new());

        let (alice, mut alice_rx) = Client::new("Alice".into(), false, &room);
        room.register(alice).await.unwrap();

        let join = recv_frame(&mut alice_rx).await;
        assert_eq!(join.kind, tags::JOIN);
        let payload: JoinNotification = join.data().unwrap();
        assert_eq!(payload.username, "Alice");
        assert_eq!(payload.online_count, 1);

        let (bob, mut bob_rx) = Client::new("Bob".into(), false, &room);
        room.register(bob).await.unwrap();

        let join = recv_frame(&mut alice_rx).await;
        let payload: JoinNotification = join.data().unwrap();
        assert_eq!(payload.username, "Bob");
        assert_eq!(payload.online_count, 2);

        let join = recv_frame(&mut bob_rx).await;
        assert_eq!(join.data::<JoinNotification>().unwrap().username, "Bob");
    }

    #[tokio::test]
    async fn test_unregister_emits_leave_once() {
        let room = spawn_room(1, None, RoomOptions::new());

        let (alice, mut alice_rx) = Client::new("Alice".into(), false, &room);
        let (bob, _bob_rx) = Client::new("Bob".into(), false, &room);
        room.register(alice.clone()).await.unwrap();
        room.register(bob.clone()).await.unwrap();
        recv_frame(&mut alice_rx).await;
        recv_frame(&mut alice_rx).await;

        room.unregister(bob.clone()).await;
        let leave = recv_frame(&mut alice_rx).await;
        assert_eq!(leave.kind, tags::LEAVE);
        let payload: LeaveNotification = leave.data().unwrap();
        assert_eq!(payload.username, "Bob");
        assert_eq!(payload.online_count, 1);
        assert!(bob.is_closed());

        // Repeated unregister is a no-op: no second leave frame.
        room.unregister(bob).await;
        expect_silence(&mut alice_rx).await;
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_members_in_order() {
        let room = spawn_room(1, None, RoomOptions::new());

        let (alice, mut alice_rx) = Client::new("Alice".into(), false, &room);
        let (bob, mut bob_rx) = Client::new("Bob".into(), false, &room);
        room.register(alice).await.unwrap();
        room.register(bob).await.unwrap();
        recv_frame(&mut alice_rx).await;
        recv_frame(&mut alice_rx).await;
        recv_frame(&mut bob_rx).await;

        let first = Envelope::encode(tags::CHAT, &ChatMessage {
            text: "first".into(),
            username: "Alice".into(),
        })
        .unwrap();
        let second = Envelope::encode(tags::CHAT, &ChatMessage {
            text: "second".into(),
            username: "Alice".into(),
        })
        .unwrap();
        room.broadcast(Bytes::from(first)).await;
        room.broadcast(Bytes::from(second)).await;

        for rx in [&mut alice_rx, &mut bob_rx] {
            let one: ChatMessage = recv_frame(rx).await.data().unwrap();
            let two: ChatMessage = recv_frame(rx).await.data().unwrap();
            assert_eq!(one.text, "first");
            assert_eq!(two.text, "second");
        }
    }

    #[tokio::test]
    async fn test_slow_consumer_evicted_on_broadcast() {
        let metrics = Arc::new(RecordingMetrics::default());
        let room = spawn_room(
            7,
            Some(metrics.clone() as Arc<dyn MetricsNotifier>),
            RoomOptions::new(),
        );

        let (alice, mut alice_rx) = Client::new("Alice".into(), false, &room);
        let (bob, _bob_rx) = Client::new("Bob".into(), false, &room);
        room.register(alice).await.unwrap();
        room.register(bob.clone()).await.unwrap();
        recv_frame(&mut alice_rx).await;
        recv_frame(&mut alice_rx).await;

        // Fill Bob's queue to the brim without draining it.
        let filler = Bytes::from_static(b"{\"type\":\"noise\",\"data\":null}");
        while bob.try_enqueue(Outbound::Data(filler.clone())).is_ok() {}

        room.broadcast(filler.clone()).await;

        wait_for_count(&room, 1).await;
        assert!(bob.is_closed());

        // Alice sees the broadcast, then Bob's leave.
        assert_eq!(recv_frame(&mut alice_rx).await.kind, "noise");
        let leave = recv_frame(&mut alice_rx).await;
        assert_eq!(leave.kind, tags::LEAVE);
        assert_eq!(leave.data::<LeaveNotification>().unwrap().username, "Bob");

        let drops = metrics.drops.lock().unwrap();
        assert_eq!(drops.as_slice(), &[(7, "Bob".to_owned())]);
    }

    #[tokio::test]
    async fn test_notifications_drop_without_evicting() {
        let room = spawn_room(1, None, RoomOptions::new());

        let (alice, _alice_rx) = Client::new("Alice".into(), false, &room);
        room.register(alice.clone()).await.unwrap();
        wait_for_count(&room, 1).await;

        let filler = Bytes::from_static(b"{\"type\":\"noise\",\"data\":null}");
        for _ in 0..OUTBOUND_BUFFER {
            let _ = alice.try_enqueue(Outbound::Data(filler.clone()));
        }

        // A join notification to a full queue is dropped, not fatal.
        let (bob, _bob_rx) = Client::new("Bob".into(), false, &room);
        room.register(bob).await.unwrap();
        wait_for_count(&room, 2).await;
        assert!(!alice.is_closed());
    }

    #[tokio::test]
    async fn test_send_except_skips_sender() {
        let room = spawn_room(1, None, RoomOptions::new());

        let (alice, mut alice_rx) = Client::new("Alice".into(), false, &room);
        let (bob, mut bob_rx) = Client::new("Bob".into(), false, &room);
        room.register(alice.clone()).await.unwrap();
        room.register(bob).await.unwrap();
        recv_frame(&mut alice_rx).await;
        recv_frame(&mut alice_rx).await;
        recv_frame(&mut bob_rx).await;

        let offer = Bytes::from_static(b"{\"type\":\"offer\",\"data\":{\"sdp\":\"v=0\"}}");
        room.send_except(alice.id(), offer).await;

        assert_eq!(recv_frame(&mut bob_rx).await.kind, tags::OFFER);
        expect_silence(&mut alice_rx).await;
    }

    #[tokio::test]
    async fn test_stop_closes_everyone_and_rejects_registration() {
        let room = spawn_room(1, None, RoomOptions::new());

        let (alice, _alice_rx) = Client::new("Alice".into(), false, &room);
        let (bob, _bob_rx) = Client::new("Bob".into(), false, &room);
        room.register(alice.clone()).await.unwrap();
        room.register(bob.clone()).await.unwrap();
        wait_for_count(&room, 2).await;

        room.stop();
        room.stop(); // idempotent
        timeout(Duration::from_secs(1), room.wait_stopped())
            .await
            .expect("actor did not stop");

        assert_eq!(room.client_count().await, 0);
        assert!(alice.is_closed());
        assert!(bob.is_closed());

        let (carol, _carol_rx) = Client::new("Carol".into(), false, &room);
        assert!(room.register(carol).await.is_err());
    }

    #[tokio::test]
    async fn test_kick_by_username() {
        let room = spawn_room(1, None, RoomOptions::new());

        let (alice, mut alice_rx) = Client::new("Alice".into(), false, &room);
        let (bob, _bob_rx) = Client::new("Bob".into(), false, &room);
        room.register(alice).await.unwrap();
        room.register(bob.clone()).await.unwrap();
        recv_frame(&mut alice_rx).await;
        recv_frame(&mut alice_rx).await;

        assert!(!room.kick_by_username("Nobody").await);
        assert!(room.kick_by_username("Bob").await);

        let leave = recv_frame(&mut alice_rx).await;
        assert_eq!(leave.kind, tags::LEAVE);
        wait_for_count(&room, 1).await;
        assert!(bob.is_closed());
    }

    #[tokio::test]
    async fn test_password_is_mutable() {
        let room = Room::new(1, None, RoomOptions::new().with_password("hash-1"));
        assert!(room.has_password().await);
        assert_eq!(room.hashed_password().await.as_deref(), Some("hash-1"));

        room.set_password(Some("hash-2".to_owned())).await;
        assert_eq!(room.hashed_password().await.as_deref(), Some("hash-2"));

        room.set_password(None).await;
        assert!(!room.has_password().await);
    }

    #[tokio::test]
    async fn test_host_id_is_immutable_option() {
        let hosted = Room::new(1, None, RoomOptions::new().with_host("host-1"));
        assert_eq!(hosted.host_id(), Some("host-1"));

        let hostless = Room::new(2, None, RoomOptions::new());
        assert_eq!(hostless.host_id(), None);
    }
}
