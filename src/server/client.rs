//! Per-connection client state and IO loops
//!
//! Each connection gets one [`Client`] and three loops: a reader (socket to
//! dispatcher), a writer (outbound queue to socket), and a ping ticker. The
//! reader and writer run on the shared task pool; the ping loop is spawned
//! by the reader on entry.
//!
//! Three parties may try to tear a client down - the reader, the writer, and
//! the room (stop or kick). All of them go through the close latch, which
//! fires exactly once; the writer observes it, flushes a close frame, and
//! drops the connection.

use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::server::dispatch;
use crate::server::room::Room;
use crate::transport::connection::{
    FrameSink, FrameSource, Incoming, Outbound, OUTBOUND_BUFFER, PING_PERIOD, READ_DEADLINE,
    WRITE_DEADLINE,
};

/// Client identifier, unique per connection
pub type ClientId = Uuid;

/// Reasons an enqueue onto the outbound queue can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The queue is full; the client is a slow consumer
    Full,
    /// The close latch has fired
    Closed,
}

/// A participant bound to exactly one room for its lifetime
pub struct Client {
    id: ClientId,
    username: String,
    is_host: bool,
    room: Weak<Room>,
    outbound_tx: mpsc::Sender<Outbound>,
    closed: CancellationToken,
}

impl Client {
    /// Create a client bound to `room`. Returns the receiving end of the
    /// outbound queue, which the writer loop consumes.
    ///
    /// The room reference is non-owning: it is used only to enqueue onto the
    /// room's inboxes, never to mutate room state directly.
    pub fn new(
        username: String,
        is_host: bool,
        room: &Arc<Room>,
    ) -> (Arc<Client>, mpsc::Receiver<Outbound>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let client = Arc::new(Client {
            id: Uuid::new_v4(),
            username,
            is_host,
            room: Arc::downgrade(room),
            outbound_tx,
            closed: CancellationToken::new(),
        });
        (client, outbound_rx)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    /// The owning room, while it is still alive
    pub fn room(&self) -> Option<Arc<Room>> {
        self.room.upgrade()
    }

    /// Non-blocking enqueue onto the outbound queue
    pub fn try_enqueue(&self, frame: Outbound) -> Result<(), EnqueueError> {
        if self.closed.is_cancelled() {
            return Err(EnqueueError::Closed);
        }
        self.outbound_tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Fire the close latch. Idempotent; safe from any task.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Reader loop: socket frames to the dispatcher.
///
/// Every read is bounded by the read deadline; any inbound traffic
/// (including pongs) re-arms it. On deadline, error, or EOF the client is
/// routed through the room's unregister inbox.
pub async fn read_loop<S: FrameSource>(client: Arc<Client>, mut source: S) {
    tokio::spawn(ping_loop(client.clone()));

    loop {
        tokio::select! {
            _ = client.closed.cancelled() => break,
            frame = timeout(READ_DEADLINE, source.next_frame()) => {
                match frame {
                    Err(_) => {
                        debug!(username = client.username(), "read deadline expired");
                        break;
                    }
                    Ok(Ok(Some(Incoming::Data(raw)))) => dispatch::dispatch(&client, raw).await,
                    Ok(Ok(Some(Incoming::Ping(payload)))) => {
                        let _ = client.try_enqueue(Outbound::Pong(payload));
                    }
                    Ok(Ok(Some(Incoming::Pong))) => {}
                    Ok(Ok(Some(Incoming::Closed))) | Ok(Ok(None)) => break,
                    Ok(Err(e)) => {
                        debug!(username = client.username(), error = %e, "read failed");
                        break;
                    }
                }
            }
        }
    }

    unregister_self(&client).await;
}

/// Writer loop: outbound queue to the socket.
///
/// Exits when the close latch fires or a write fails, then flushes a
/// best-effort close frame; dropping the sink closes the connection.
pub async fn write_loop<W: FrameSink>(
    client: Arc<Client>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    mut sink: W,
) {
    loop {
        tokio::select! {
            _ = client.closed.cancelled() => break,
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else { break };
                let write = async {
                    match frame {
                        Outbound::Data(data) => sink.send_data(data).await,
                        Outbound::Ping => sink.send_ping().await,
                        Outbound::Pong(payload) => sink.send_pong(payload).await,
                    }
                };
                match timeout(WRITE_DEADLINE, write).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(username = client.username(), error = %e, "write failed");
                        unregister_self(&client).await;
                        break;
                    }
                    Err(_) => {
                        debug!(username = client.username(), "write deadline expired");
                        unregister_self(&client).await;
                        break;
                    }
                }
            }
        }
    }

    client.close();
    sink.send_close().await;
}

/// Ping loop: keepalive pings through the outbound queue.
///
/// Stops when the room's stop latch or the client's close latch fires. A
/// full queue skips the ping; that client is already due for eviction on the
/// next fan-out.
pub async fn ping_loop(client: Arc<Client>) {
    let Some(room) = client.room() else {
        return;
    };

    let mut ticker = tokio::time::interval(PING_PERIOD);
    ticker.tick().await; // the first tick completes immediately

    loop {
        tokio::select! {
            _ = room.stopped() => break,
            _ = client.closed.cancelled() => break,
            _ = ticker.tick() => {
                match client.try_enqueue(Outbound::Ping) {
                    Ok(()) | Err(EnqueueError::Full) => {}
                    Err(EnqueueError::Closed) => {
                        unregister_self(&client).await;
                        break;
                    }
                }
            }
        }
    }
}

async fn unregister_self(client: &Arc<Client>) {
    match client.room() {
        Some(room) => room.unregister(client.clone()).await,
        // The room is gone; make sure the latch still fires so the writer
        // unwinds.
        None => client.close(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;

    use crate::error::{Error, Result};
    use crate::protocol::envelope::tags;
    use crate::protocol::messages::ChatMessage;
    use crate::server::room::tests::{recv_frame, spawn_room};
    use crate::server::room::RoomOptions;

    /// Channel-fed frame source; dropping the sender is EOF
    struct FakeSource {
        rx: mpsc::Receiver<Incoming>,
    }

    #[async_trait]
    impl FrameSource for FakeSource {
        async fn next_frame(&mut self) -> Result<Option<Incoming>> {
            Ok(self.rx.recv().await)
        }
    }

    /// Recording sink that can be switched into failure mode
    #[derive(Clone, Default)]
    struct FakeSink {
        written: Arc<StdMutex<Vec<Outbound>>>,
        closed: Arc<StdMutex<bool>>,
        fail: bool,
    }

    #[async_trait]
    impl FrameSink for FakeSink {
        async fn send_data(&mut self, data: Bytes) -> Result<()> {
            if self.fail {
                return Err(Error::peer_gone("sink failure"));
            }
            self.written.lock().unwrap().push(Outbound::Data(data));
            Ok(())
        }

        async fn send_ping(&mut self) -> Result<()> {
            if self.fail {
                return Err(Error::peer_gone("sink failure"));
            }
            self.written.lock().unwrap().push(Outbound::Ping);
            Ok(())
        }

        async fn send_pong(&mut self, payload: Bytes) -> Result<()> {
            if self.fail {
                return Err(Error::peer_gone("sink failure"));
            }
            self.written.lock().unwrap().push(Outbound::Pong(payload));
            Ok(())
        }

        async fn send_close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    async fn wait_for_count(room: &Arc<Room>, want: usize) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while room.client_count().await != want {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("member count never reached {}", want));
    }

    #[tokio::test]
    async fn test_reader_eof_unregisters() {
        let room = spawn_room(1, None, RoomOptions::new());
        let (client, _outbound_rx) = Client::new("Alice".into(), false, &room);
        room.register(client.clone()).await.unwrap();
        wait_for_count(&room, 1).await;

        let (source_tx, source_rx) = mpsc::channel(8);
        tokio::spawn(read_loop(client.clone(), FakeSource { rx: source_rx }));

        drop(source_tx);
        wait_for_count(&room, 0).await;
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_reader_feeds_dispatcher() {
        let room = spawn_room(1, None, RoomOptions::new());
        let (alice, _alice_outbound) = Client::new("Alice".into(), false, &room);
        let (bob, mut bob_rx) = Client::new("Bob".into(), false, &room);
        room.register(alice.clone()).await.unwrap();
        room.register(bob).await.unwrap();
        recv_frame(&mut bob_rx).await; // Bob's own join

        let (source_tx, source_rx) = mpsc::channel(8);
        tokio::spawn(read_loop(alice, FakeSource { rx: source_rx }));

        source_tx
            .send(Incoming::Data(Bytes::from_static(
                br#"{"type":"chat","data":{"text":"hi"}}"#,
            )))
            .await
            .unwrap();

        let chat = recv_frame(&mut bob_rx).await;
        assert_eq!(chat.kind, tags::CHAT);
        let payload: ChatMessage = chat.data().unwrap();
        assert_eq!(payload.text, "hi");
        assert_eq!(payload.username, "Alice");
    }

    #[tokio::test]
    async fn test_reader_answers_transport_ping() {
        let room = spawn_room(1, None, RoomOptions::new());
        let (client, mut outbound_rx) = Client::new("Alice".into(), false, &room);
        room.register(client.clone()).await.unwrap();
        wait_for_count(&room, 1).await;
        let _ = outbound_rx.recv().await; // join notification

        let (source_tx, source_rx) = mpsc::channel(8);
        tokio::spawn(read_loop(client, FakeSource { rx: source_rx }));

        source_tx
            .send(Incoming::Ping(Bytes::from_static(b"mark")))
            .await
            .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(1), outbound_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, Outbound::Pong(Bytes::from_static(b"mark")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_deadline_unregisters() {
        let room = spawn_room(1, None, RoomOptions::new());
        let (client, _outbound_rx) = Client::new("Alice".into(), false, &room);
        room.register(client.clone()).await.unwrap();
        wait_for_count(&room, 1).await;

        // A source that stays silent forever; the sender is kept alive.
        let (_source_tx, source_rx) = mpsc::channel::<Incoming>(1);
        tokio::spawn(read_loop(client.clone(), FakeSource { rx: source_rx }));

        // Paused time fast-forwards through the read deadline.
        wait_for_count(&room, 0).await;
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn test_writer_flushes_frames() {
        let room = spawn_room(1, None, RoomOptions::new());
        let (client, outbound_rx) = Client::new("Alice".into(), false, &room);

        let sink = FakeSink::default();
        let written = sink.written.clone();
        tokio::spawn(write_loop(client.clone(), outbound_rx, sink));

        client
            .try_enqueue(Outbound::Data(Bytes::from_static(b"{}")))
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while written.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("frame never written");
    }

    #[tokio::test]
    async fn test_writer_failure_unregisters() {
        let room = spawn_room(1, None, RoomOptions::new());
        let (client, outbound_rx) = Client::new("Alice".into(), false, &room);
        room.register(client.clone()).await.unwrap();
        wait_for_count(&room, 1).await;

        let sink = FakeSink {
            fail: true,
            ..FakeSink::default()
        };
        let closed = sink.closed.clone();
        tokio::spawn(write_loop(client.clone(), outbound_rx, sink));

        client
            .try_enqueue(Outbound::Data(Bytes::from_static(b"{}")))
            .unwrap();

        wait_for_count(&room, 0).await;
        assert!(client.is_closed());
        tokio::time::timeout(Duration::from_secs(1), async {
            while !*closed.lock().unwrap() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("close frame never sent");
    }

    #[tokio::test]
    async fn test_writer_stops_on_close_latch() {
        let room = spawn_room(1, None, RoomOptions::new());
        let (client, outbound_rx) = Client::new("Alice".into(), false, &room);

        let sink = FakeSink::default();
        let closed = sink.closed.clone();
        let handle = tokio::spawn(write_loop(client.clone(), outbound_rx, sink));

        client.close();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("writer did not stop")
            .unwrap();
        assert!(*closed.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_loop_enqueues_on_schedule() {
        let room = spawn_room(1, None, RoomOptions::new());
        let (client, mut outbound_rx) = Client::new("Alice".into(), false, &room);

        tokio::spawn(ping_loop(client.clone()));

        let frame = tokio::time::timeout(PING_PERIOD + Duration::from_secs(1), outbound_rx.recv())
            .await
            .expect("no ping before deadline")
            .unwrap();
        assert_eq!(frame, Outbound::Ping);
    }

    #[tokio::test]
    async fn test_ping_loop_stops_with_room() {
        let room = spawn_room(1, None, RoomOptions::new());
        let (client, _outbound_rx) = Client::new("Alice".into(), false, &room);

        let handle = tokio::spawn(ping_loop(client));
        room.stop();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("ping loop did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_enqueue_after_close_is_rejected() {
        let room = spawn_room(1, None, RoomOptions::new());
        let (client, _outbound_rx) = Client::new("Alice".into(), false, &room);

        client.close();
        client.close(); // latch is idempotent
        assert_eq!(
            client.try_enqueue(Outbound::Ping),
            Err(EnqueueError::Closed)
        );
    }
}
