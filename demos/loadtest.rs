//! Load generator for a running parley server
//!
//! Creates a room over the REST API, connects a swarm of WebSocket clients,
//! and has each of them chat at a fixed interval while counting everything
//! the swarm receives back.
//!
//! Usage (server already listening):
//!   cargo run --example loadtest -- [clients] [duration-secs]
//!
//! Environment: `TARGET` overrides the default `127.0.0.1:8080`.

use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::time::{interval, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    errors: AtomicU64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let clients: usize = args.get(1).map(|s| s.parse()).transpose()?.unwrap_or(50);
    let duration = Duration::from_secs(args.get(2).map(|s| s.parse()).transpose()?.unwrap_or(30));
    let target = env::var("TARGET").unwrap_or_else(|_| "127.0.0.1:8080".to_owned());

    let room_id = create_room(&target).await?;
    println!("target {target}, room {room_id}, {clients} clients, {}s", duration.as_secs());

    let counters = Arc::new(Counters::default());
    let deadline = Instant::now() + duration;

    let mut handles = Vec::with_capacity(clients);
    for i in 0..clients {
        let target = target.clone();
        let counters = counters.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = run_client(i, &target, room_id, deadline, &counters).await {
                counters.errors.fetch_add(1, Ordering::Relaxed);
                eprintln!("client {i}: {e}");
            }
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }

    let sent = counters.sent.load(Ordering::Relaxed);
    let received = counters.received.load(Ordering::Relaxed);
    let errors = counters.errors.load(Ordering::Relaxed);
    let secs = duration.as_secs_f64();
    println!("--- summary ---");
    println!("sent      {sent} ({:.1}/s)", sent as f64 / secs);
    println!("received  {received} ({:.1}/s)", received as f64 / secs);
    println!("errors    {errors}");
    // Every chat fans out to every client, so the expected ratio is ~clients.
    if sent > 0 {
        println!("fan-out   {:.1}x", received as f64 / sent as f64);
    }
    Ok(())
}

/// Create a room through the REST API with a raw HTTP/1.1 exchange; the
/// loadtest deliberately has no HTTP client dependency.
async fn create_room(target: &str) -> Result<u32, Box<dyn std::error::Error>> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = tokio::net::TcpStream::connect(target).await?;
    let request = format!(
        "POST /api/rooms HTTP/1.1\r\nHost: {target}\r\nContent-Length: 2\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n{{}}"
    );
    stream.write_all(request.as_bytes()).await?;

    let mut response = String::new();
    stream.read_to_string(&mut response).await?;
    let body = response
        .split("\r\n\r\n")
        .nth(1)
        .ok_or("malformed HTTP response")?;
    let parsed: serde_json::Value = serde_json::from_str(body.trim())?;
    parsed["room_id"]
        .as_u64()
        .map(|id| id as u32)
        .ok_or_else(|| format!("unexpected create response: {body}").into())
}

async fn run_client(
    index: usize,
    target: &str,
    room_id: u32,
    deadline: Instant,
    counters: &Counters,
) -> Result<(), Box<dyn std::error::Error>> {
    let url = format!("ws://{target}/ws/{room_id}?username=loadtester{index:04}");
    let (socket, _) = connect_async(url).await?;
    let (mut sink, mut stream) = socket.split();

    let mut ticker = interval(Duration::from_millis(500));
    let mut seq = 0u64;

    while Instant::now() < deadline {
        tokio::select! {
            _ = ticker.tick() => {
                seq += 1;
                let frame = format!(
                    r#"{{"type":"chat","data":{{"text":"msg {seq} from {index}"}}}}"#
                );
                sink.send(Message::Text(frame)).await?;
                counters.sent.fetch_add(1, Ordering::Relaxed);
            }
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(_))) => {
                        counters.received.fetch_add(1, Ordering::Relaxed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err("connection closed early".into()),
                }
            }
        }
    }

    let _ = timeout(Duration::from_secs(1), sink.send(Message::Close(None))).await;
    Ok(())
}
