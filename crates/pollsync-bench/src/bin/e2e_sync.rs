//! End-to-end sync throughput for pollsync.
//!
//! Starts an in-process Socket.IO server that pushes `vote_added` events over
//! a real WebSocket and measures how fast the adapter and engine apply them.
//!
//! Usage: `e2e_sync [events]`

use futures_util::{SinkExt, StreamExt};
use pollsync_bench::{frame, poll, vote_added, NullNavigator};
use pollsync_core::{CacheEntry, CacheKey, CacheStore, InMemoryCache, SyncEngine};
use pollsync_transport::{ChannelAdapter, ReconnectConfig, WebSocketConfig, WebSocketConnector};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const OPEN: &str = r#"0{"sid":"bench","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let events: u64 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(100_000);

    println!("pollsync end-to-end sync: {events} vote_added events");

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server = tokio::spawn(serve(listener, events));

    let cache = Arc::new(InMemoryCache::new());
    cache.set(CacheKey::poll("poll-0"), CacheEntry::Poll(Arc::new(poll("poll-0", 4))));

    let connector = WebSocketConnector::new(WebSocketConfig {
        url: format!("http://{addr}"),
        ..WebSocketConfig::default()
    })?;
    let (adapter, signals) = ChannelAdapter::open(Arc::new(connector), ReconnectConfig::default());
    let engine = SyncEngine::new(adapter.sink(), cache.clone(), Arc::new(NullNavigator));
    let (handle, _engine_task) = engine.spawn(signals);
    handle.mount_detail("poll-0").await?;

    let start = Instant::now();
    loop {
        let stats = handle.stats().await?;
        if stats.events >= events {
            break;
        }
        if start.elapsed() > Duration::from_secs(120) {
            return Err(format!("only {} of {events} events applied", stats.events).into());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let elapsed = start.elapsed();

    let total_votes = cache.poll("poll-0").map_or(0, |p| p.total_votes);
    println!("  Duration:    {:>10.2}s", elapsed.as_secs_f64());
    println!(
        "  Throughput:  {:>10.0} events/s",
        events as f64 / elapsed.as_secs_f64()
    );
    println!("  totalVotes:  {total_votes:>10}");

    adapter.close().await?;
    server.await??;
    Ok(())
}

async fn serve(listener: TcpListener, events: u64) -> Result<(), BoxError> {
    let (tcp, _) = listener.accept().await?;
    let ws = accept_async(tcp).await?;
    let (mut tx, mut rx) = ws.split();

    tx.send(Message::Text(OPEN.to_string())).await?;
    // Namespace connect, then wait for the room join.
    while let Some(message) = rx.next().await {
        match message? {
            Message::Text(text) if text == "40" => {
                tx.send(Message::Text(r#"40{"sid":"bench"}"#.to_string()))
                    .await?;
            }
            Message::Text(text) if text.starts_with(r#"42["join_poll""#) => break,
            _ => {}
        }
    }

    let event = Message::Text(frame(vote_added("poll-0"))?);
    for _ in 0..events {
        tx.feed(event.clone()).await?;
    }
    tx.flush().await?;

    // Drain until the client disconnects.
    while let Some(Ok(_)) = rx.next().await {}
    Ok(())
}
