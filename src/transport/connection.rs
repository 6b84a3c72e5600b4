//! Frame transport over an upgraded WebSocket
//!
//! The reader and writer loops run in separate tasks, so the upgraded socket
//! is split into a source half and a sink half. Both halves are behind small
//! traits: production code adapts an `axum` WebSocket, tests substitute
//! channel-backed fakes.

use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};

use crate::error::{Error, Result};

/// How long a connection may stay silent before the reader gives up
pub const READ_DEADLINE: Duration = Duration::from_secs(60);

/// Ping interval, 9/10 of the read deadline so a live peer always answers in
/// time to re-arm it
pub const PING_PERIOD: Duration = Duration::from_secs(54);

/// Per-frame write deadline
pub const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// Inbound frame size ceiling; larger frames drop the connection
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Capacity of each client's outbound queue
pub const OUTBOUND_BUFFER: usize = 256;

/// A frame read off the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// Application data (a JSON envelope)
    Data(Bytes),
    /// Transport ping; must be answered with a pong
    Ping(Bytes),
    /// Transport pong; re-arms the read deadline
    Pong,
    /// Peer sent a close frame
    Closed,
}

/// A frame queued for the writer loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Application data (a JSON envelope)
    Data(Bytes),
    /// Keepalive ping
    Ping,
    /// Pong answering a peer ping
    Pong(Bytes),
}

/// Read half of an upgraded connection
#[async_trait]
pub trait FrameSource: Send {
    /// Next inbound frame. `Ok(None)` means the stream ended cleanly.
    async fn next_frame(&mut self) -> Result<Option<Incoming>>;
}

/// Write half of an upgraded connection
#[async_trait]
pub trait FrameSink: Send {
    async fn send_data(&mut self, data: Bytes) -> Result<()>;
    async fn send_ping(&mut self) -> Result<()>;
    async fn send_pong(&mut self, payload: Bytes) -> Result<()>;
    /// Best-effort close frame; errors are not interesting at this point
    async fn send_close(&mut self);
}

/// Split an upgraded axum WebSocket into transport halves
pub fn split_socket(socket: WebSocket) -> (WsSource, WsSink) {
    let (sink, stream) = socket.split();
    (WsSource { stream }, WsSink { sink })
}

/// Source half of an axum WebSocket
pub struct WsSource {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_frame(&mut self) -> Result<Option<Incoming>> {
        match self.stream.next().await {
            None => Ok(None),
            Some(Err(e)) => Err(Error::peer_gone(e.to_string())),
            Some(Ok(message)) => Ok(Some(match message {
                Message::Text(text) => Incoming::Data(Bytes::from(text.into_bytes())),
                Message::Binary(data) => Incoming::Data(Bytes::from(data)),
                Message::Ping(payload) => Incoming::Ping(Bytes::from(payload)),
                Message::Pong(_) => Incoming::Pong,
                Message::Close(_) => Incoming::Closed,
            })),
        }
    }
}

/// Sink half of an axum WebSocket
pub struct WsSink {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_data(&mut self, data: Bytes) -> Result<()> {
        let text = String::from_utf8(data.to_vec())
            .map_err(|_| Error::malformed("outbound frame is not UTF-8"))?;
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(Into::into)
    }

    async fn send_ping(&mut self) -> Result<()> {
        self.sink
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(Into::into)
    }

    async fn send_pong(&mut self, payload: Bytes) -> Result<()> {
        self.sink
            .send(Message::Pong(payload.to_vec()))
            .await
            .map_err(Into::into)
    }

    async fn send_close(&mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
    }
}
