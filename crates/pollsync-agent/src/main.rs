//! # pollsync
//!
//! Keeps a local cache of polls in sync with a poll server's realtime events.
//!
//! ## Usage
//!
//! ```bash
//! # Watch two polls and the poll list
//! pollsync --url https://polls.example.com --poll p1 --poll p2 --list
//!
//! # Run with a config file
//! pollsync --config /path/to/pollsync.toml
//!
//! # Run with environment variables
//! POLLSYNC_SERVER__URL=http://localhost:3000 POLLSYNC_SYNC__POLLS=p1,p2 pollsync
//! ```

mod config;
mod metrics;
mod seed;
mod status;

use anyhow::{Context, Result};
use clap::Parser;
use pollsync_core::{CacheChange, CacheStore, InMemoryCache, Navigator, SyncEngine};
use pollsync_transport::{ChannelAdapter, WebSocketConnector};
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "pollsync", version, about = "Realtime poll cache synchronization")]
struct Cli {
    /// Config file path
    #[arg(short, long, env = "POLLSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Poll server base URL
    #[arg(long)]
    url: Option<String>,

    /// Poll to keep in sync (repeatable)
    #[arg(long = "poll", value_name = "POLL_ID")]
    polls: Vec<String>,

    /// Keep the poll list in sync
    #[arg(long)]
    list: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    fn apply(&self, config: &mut config::Config) {
        if let Some(url) = &self.url {
            config.server.url = url.clone();
        }
        if !self.polls.is_empty() {
            config.sync.polls = self.polls.clone();
        }
        if self.list {
            config.sync.list = true;
        }
    }
}

/// Logs where a consumer would be sent after its poll is deleted.
struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&self, location: &str) {
        info!(location = %location, "Watched poll deleted, navigating home");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pollsync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = config::Config::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    info!(
        url = %config.server.url,
        polls = config.sync.polls.len(),
        list = config.sync.list,
        "Starting pollsync"
    );

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
    }
    metrics::init_metrics();

    let cache = Arc::new(InMemoryCache::new());
    if let Some(path) = config.snapshot_path() {
        let seeded = seed::Snapshot::from_file(&path)?.seed(cache.as_ref());
        info!(keys = seeded, path = %path.display(), "Seeded cache from snapshot");
    }
    tokio::spawn(watch_cache(cache.subscribe(), Arc::downgrade(&cache)));

    let connector = WebSocketConnector::new(config.websocket())
        .with_context(|| format!("Invalid server URL: {}", config.server.url))?;
    info!(endpoint = %connector.endpoint(), "Connecting");
    let (adapter, signals) = ChannelAdapter::open(Arc::new(connector), config.reconnect());

    let engine = SyncEngine::with_config(
        adapter.sink(),
        cache.clone(),
        Arc::new(LogNavigator),
        config.engine(),
    );
    let (handle, mut engine_task) = engine.spawn(signals);

    for poll_id in &config.sync.polls {
        handle
            .mount_detail(poll_id.as_str())
            .await
            .with_context(|| format!("Cannot watch poll {poll_id:?}"))?;
    }
    if config.sync.list {
        handle.mount_list().await?;
    }

    if config.status.enabled {
        let addr = config.status_addr()?;
        let state = status::StatusState {
            engine: handle.clone(),
            channel: adapter.handle(),
            cache: cache.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = status::serve(addr, state).await {
                error!("{:#}", e);
            }
        });
    }

    let engine_stopped = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutting down");
            false
        }
        _ = &mut engine_task => {
            warn!("Sync engine stopped");
            true
        }
    };

    if !engine_stopped {
        // Leave rooms while the session is still up.
        if let Ok(stats) = handle.stats().await {
            for view in stats.views {
                let _ = handle.unmount(view.id).await;
            }
        }
    }
    adapter.close().await?;
    if !engine_stopped {
        engine_task.await.context("Sync engine task failed")?;
    }

    Ok(())
}

/// Log every cache change until the cache is dropped.
async fn watch_cache(mut changes: broadcast::Receiver<CacheChange>, cache: Weak<InMemoryCache>) {
    loop {
        match changes.recv().await {
            Ok(CacheChange::Updated(key)) => {
                let Some(cache) = cache.upgrade() else { break };
                match cache.get(&key) {
                    Some(entry) => match entry.as_poll() {
                        Some(poll) => info!(
                            key = %key,
                            total_votes = poll.total_votes,
                            total_likes = poll.total_likes,
                            "Poll updated"
                        ),
                        None => info!(key = %key, "Poll list updated"),
                    },
                    None => info!(key = %key, "Cache updated"),
                }
            }
            Ok(CacheChange::Removed(key)) => info!(key = %key, "Cache entry removed"),
            Ok(CacheChange::Invalidated(key)) => {
                info!(key = %key, "Cache entry stale, refetch needed");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Cache watcher lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
