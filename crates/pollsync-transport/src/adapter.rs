//! The channel adapter: one reconnecting session shared by the sync engine.
//!
//! [`ChannelAdapter::open`] spawns a task that owns the connection. The task
//! reconnects with exponential backoff, answers heartbeats, forwards server
//! events as [`ChannelSignal`]s and writes whatever the engine emits through
//! a [`ChannelHandle`].

use crate::traits::{Connection, Connector, TransportError};
use pollsync_core::{ChannelError, ChannelSignal, ChannelState, EventSink};
use pollsync_protocol::{ClientEvent, Packet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, trace, warn};

/// Upper bound for the heartbeat deadline, whatever the server announces.
pub const MAX_HEARTBEAT: Duration = Duration::from_secs(600);

/// Time allowed between server pings: `pingInterval + pingTimeout`, capped
/// at [`MAX_HEARTBEAT`].
#[must_use]
pub fn heartbeat_timeout(ping_interval_ms: u64, ping_timeout_ms: u64) -> Duration {
    Duration::from_millis(ping_interval_ms.saturating_add(ping_timeout_ms)).min(MAX_HEARTBEAT)
}

/// Reconnection policy with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Growth factor per failed attempt.
    pub multiplier: f64,
    /// Consecutive failed attempts before giving up; `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Delay before retry number `attempt` (0-indexed).
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(64) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }

    /// Check if another attempt is allowed after `attempt` consecutive failures.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<ChannelState>,
    session: Mutex<Option<String>>,
}

impl Shared {
    fn state(&self) -> ChannelState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ChannelState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn set_session(&self, session: Option<String>) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }
}

/// Cloneable emit capability of a [`ChannelAdapter`].
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedSender<ClientEvent>,
}

impl ChannelHandle {
    /// Id of the current session, if connected.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.shared
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventSink for ChannelHandle {
    fn emit(&self, event: ClientEvent) -> Result<(), ChannelError> {
        match self.shared.state() {
            ChannelState::Connected => self
                .outbound
                .send(event)
                .map_err(|_| ChannelError::Closed),
            ChannelState::Closed => Err(ChannelError::Closed),
            ChannelState::Connecting | ChannelState::Disconnected => {
                Err(ChannelError::NotConnected)
            }
        }
    }

    fn state(&self) -> ChannelState {
        self.shared.state()
    }
}

/// Owner of the connection task.
pub struct ChannelAdapter {
    handle: ChannelHandle,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ChannelAdapter {
    /// Start connecting and return the adapter with its signal stream.
    ///
    /// The stream yields `Connected` for every established session,
    /// `Disconnected` when one is lost, and every decoded server event in
    /// between. It ends once the adapter is closed or gives up reconnecting.
    pub fn open(
        connector: Arc<dyn Connector>,
        config: ReconnectConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelSignal>) {
        let shared = Arc::new(Shared {
            state: Mutex::new(ChannelState::Connecting),
            session: Mutex::new(None),
        });
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (signals, signals_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        info!(connector = connector.name(), "Opening channel");
        let driver = Driver {
            connector,
            config,
            shared: Arc::clone(&shared),
            outbound: outbound_rx,
            signals,
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(driver.run());

        let adapter = Self {
            handle: ChannelHandle { shared, outbound },
            shutdown,
            task,
        };
        (adapter, signals_rx)
    }

    /// Get a handle for emitting events.
    #[must_use]
    pub fn handle(&self) -> ChannelHandle {
        self.handle.clone()
    }

    /// Get the handle as a shared [`EventSink`].
    #[must_use]
    pub fn sink(&self) -> Arc<dyn EventSink> {
        Arc::new(self.handle.clone())
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.handle.state()
    }

    /// Disconnect and stop reconnecting.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection task panicked.
    pub async fn close(self) -> Result<(), TransportError> {
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| TransportError::ReceiveFailed(format!("channel task failed: {e}")))
    }
}

enum SessionEnd {
    Shutdown,
    Lost(String),
}

struct Driver {
    connector: Arc<dyn Connector>,
    config: ReconnectConfig,
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedReceiver<ClientEvent>,
    signals: mpsc::UnboundedSender<ChannelSignal>,
    shutdown: watch::Receiver<bool>,
}

impl Driver {
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        loop {
            self.shared.set_state(ChannelState::Connecting);
            let connected = tokio::select! {
                result = self.connector.connect() => result,
                _ = self.shutdown.changed() => break,
            };

            match connected {
                Ok(connection) => {
                    attempt = 0;
                    match self.session(connection).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(reason) => {
                            self.shared.set_state(ChannelState::Disconnected);
                            self.shared.set_session(None);
                            warn!(reason = %reason, "Connection lost");
                            if self
                                .signals
                                .send(ChannelSignal::Disconnected { reason })
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    self.shared.set_state(ChannelState::Disconnected);
                    attempt += 1;
                    warn!(attempt, error = %e, "Connection attempt failed");
                    if !self.config.should_retry(attempt) {
                        warn!(attempts = attempt, "Giving up reconnecting");
                        break;
                    }
                }
            }

            let delay = self.config.delay_for_attempt(attempt.saturating_sub(1));
            debug!(delay_ms = delay.as_millis() as u64, "Reconnecting after delay");
            tokio::select! {
                () = sleep(delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }

        self.shared.set_state(ChannelState::Closed);
        self.shared.set_session(None);
        info!("Channel closed");
    }

    async fn session(&mut self, connection: Connection) -> SessionEnd {
        let Connection {
            id,
            handshake,
            mut sink,
            mut stream,
        } = connection;

        // Anything queued during the previous session is stale.
        let mut stale = 0usize;
        while self.outbound.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            debug!(discarded = stale, "Discarded events queued before reconnect");
        }

        self.shared.set_session(Some(id.to_string()));
        self.shared.set_state(ChannelState::Connected);
        if self
            .signals
            .send(ChannelSignal::Connected {
                session_id: id.to_string(),
            })
            .is_err()
        {
            let _ = sink.close().await;
            return SessionEnd::Shutdown;
        }

        let heartbeat = heartbeat_timeout(handshake.ping_interval, handshake.ping_timeout);
        let mut deadline = Instant::now() + heartbeat;

        let end = loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    let _ = sink.send(Packet::Disconnect).await;
                    break SessionEnd::Shutdown;
                }
                () = sleep_until(deadline) => {
                    break SessionEnd::Lost("ping timeout".to_string());
                }
                event = self.outbound.recv() => {
                    let Some(event) = event else {
                        break SessionEnd::Shutdown;
                    };
                    trace!(event = %event.kind(), poll = %event.poll_id(), "Emitting");
                    if let Err(e) = sink.send(Packet::Emit(event)).await {
                        break SessionEnd::Lost(e.to_string());
                    }
                }
                packet = stream.recv() => match packet {
                    Ok(Some(Packet::Ping)) => {
                        deadline = Instant::now() + heartbeat;
                        if let Err(e) = sink.send(Packet::Pong).await {
                            break SessionEnd::Lost(e.to_string());
                        }
                    }
                    Ok(Some(Packet::Event(event))) => {
                        trace!(event = %event.kind(), "Received");
                        if self.signals.send(ChannelSignal::Event(event)).is_err() {
                            break SessionEnd::Shutdown;
                        }
                    }
                    Ok(Some(Packet::Disconnect)) => {
                        break SessionEnd::Lost("server disconnect".to_string());
                    }
                    Ok(Some(Packet::Close)) => {
                        break SessionEnd::Lost("server close".to_string());
                    }
                    Ok(Some(Packet::ConnectError { message })) => {
                        break SessionEnd::Lost(message);
                    }
                    Ok(Some(other)) => trace!(packet = ?other, "Ignoring packet"),
                    Ok(None) => break SessionEnd::Lost("transport close".to_string()),
                    Err(e) if e.is_frame_error() => debug!(error = %e, "Dropped malformed frame"),
                    Err(e) => break SessionEnd::Lost(e.to_string()),
                },
            }
        };

        if let Err(e) = sink.close().await {
            debug!(error = %e, "Close failed");
        }
        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{next_text, TestServer};
    use crate::websocket::WebSocketConnector;
    use async_trait::async_trait;
    use futures_util::SinkExt;
    use pollsync_core::{InMemoryCache, SyncEngine};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message;

    const WAIT: Duration = Duration::from_secs(5);

    fn fast_reconnect() -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            ..ReconnectConfig::default()
        }
    }

    async fn next_signal(rx: &mut mpsc::UnboundedReceiver<ChannelSignal>) -> Option<ChannelSignal> {
        timeout(WAIT, rx.recv()).await.expect("timed out waiting for signal")
    }

    struct FailingConnector {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl Connector for FailingConnector {
        async fn connect(&self) -> Result<Connection, TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Refused("down".into()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[test]
    fn test_backoff() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_attempts: Some(3),
        };

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(1));

        assert!(config.should_retry(2));
        assert!(!config.should_retry(3));
        assert!(ReconnectConfig::default().should_retry(u32::MAX));
    }

    #[test]
    fn test_heartbeat_timeout() {
        assert_eq!(heartbeat_timeout(25_000, 20_000), Duration::from_secs(45));
        assert_eq!(heartbeat_timeout(u64::MAX, 1), MAX_HEARTBEAT);
        assert_eq!(heartbeat_timeout(u64::MAX, u64::MAX), MAX_HEARTBEAT);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let connector = Arc::new(FailingConnector {
            attempts: AtomicU32::new(0),
        });
        let (adapter, mut signals) = ChannelAdapter::open(
            connector.clone(),
            ReconnectConfig {
                max_attempts: Some(3),
                ..fast_reconnect()
            },
        );

        assert_eq!(
            adapter.handle().emit(ClientEvent::JoinPoll("p1".into())),
            Err(ChannelError::NotConnected)
        );

        // The signal stream ends without ever connecting.
        assert_eq!(next_signal(&mut signals).await, None);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(adapter.state(), ChannelState::Closed);
        assert_eq!(
            adapter.handle().emit(ClientEvent::JoinPoll("p1".into())),
            Err(ChannelError::Closed)
        );
        adapter.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_session_events_and_reconnect() {
        let server = TestServer::bind().await;
        let connector = Arc::new(WebSocketConnector::new(server.config()).unwrap());
        let (adapter, mut signals) = ChannelAdapter::open(connector, fast_reconnect());
        let handle = adapter.handle();

        let mut ws = server.accept_session().await;
        assert_eq!(
            next_signal(&mut signals).await,
            Some(ChannelSignal::Connected {
                session_id: "sio-1".into()
            })
        );
        assert_eq!(handle.session_id().as_deref(), Some("sio-1"));

        // Heartbeat.
        ws.send(Message::Text("2".into())).await.unwrap();
        assert_eq!(next_text(&mut ws).await, "3");

        // Emit.
        handle.emit(ClientEvent::JoinPoll("p1".into())).unwrap();
        assert_eq!(next_text(&mut ws).await, r#"42["join_poll","p1"]"#);

        // Malformed frames are dropped; valid events flow.
        ws.send(Message::Text("42[oops".into())).await.unwrap();
        ws.send(Message::Text(r#"42["mystery",{}]"#.into())).await.unwrap();
        ws.send(Message::Text(
            r#"42["like_added",{"pollId":"p1","like":{"id":"l1"},"totalLikes":4}]"#.into(),
        ))
        .await
        .unwrap();
        match next_signal(&mut signals).await {
            Some(ChannelSignal::Event(event)) => assert_eq!(event.poll_id(), Some("p1")),
            other => panic!("expected event, got {other:?}"),
        }

        // Server drops the connection; the adapter comes back.
        drop(ws);
        assert!(matches!(
            next_signal(&mut signals).await,
            Some(ChannelSignal::Disconnected { .. })
        ));
        let mut ws = server.accept_session_with("sio-2", 25_000, 20_000).await;
        assert_eq!(
            next_signal(&mut signals).await,
            Some(ChannelSignal::Connected {
                session_id: "sio-2".into()
            })
        );

        // Closing sends a namespace disconnect.
        adapter.close().await.unwrap();
        assert_eq!(next_text(&mut ws).await, "41");
        assert_eq!(next_signal(&mut signals).await, None);
        assert_eq!(
            handle.emit(ClientEvent::LeavePoll("p1".into())),
            Err(ChannelError::Closed)
        );
    }

    #[tokio::test]
    async fn test_ping_timeout() {
        let server = TestServer::bind().await;
        let connector = Arc::new(WebSocketConnector::new(server.config()).unwrap());
        let (adapter, mut signals) = ChannelAdapter::open(connector, fast_reconnect());

        // The server never pings within 20ms + 20ms.
        let _ws = server.accept_session_with("sio-1", 20, 20).await;
        assert!(matches!(
            next_signal(&mut signals).await,
            Some(ChannelSignal::Connected { .. })
        ));
        assert_eq!(
            next_signal(&mut signals).await,
            Some(ChannelSignal::Disconnected {
                reason: "ping timeout".into()
            })
        );

        adapter.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_heartbeat_is_capped() {
        let server = TestServer::bind().await;
        let connector = Arc::new(WebSocketConnector::new(server.config()).unwrap());
        let (adapter, mut signals) = ChannelAdapter::open(connector, fast_reconnect());

        let mut ws = server.accept_session_with("sio-1", u64::MAX, 1).await;
        assert!(matches!(
            next_signal(&mut signals).await,
            Some(ChannelSignal::Connected { .. })
        ));

        // The session stays usable.
        ws.send(Message::Text("2".into())).await.unwrap();
        assert_eq!(next_text(&mut ws).await, "3");
        adapter
            .handle()
            .emit(ClientEvent::JoinPoll("p1".into()))
            .unwrap();
        assert_eq!(next_text(&mut ws).await, r#"42["join_poll","p1"]"#);
        assert_eq!(adapter.state(), ChannelState::Connected);

        adapter.close().await.unwrap();
        assert_eq!(next_text(&mut ws).await, "41");
        assert_eq!(next_signal(&mut signals).await, None);
    }

    struct Stay;

    impl pollsync_core::Navigator for Stay {
        fn navigate(&self, _location: &str) {}
    }

    #[tokio::test]
    async fn test_engine_rejoins_after_reconnect() {
        let server = TestServer::bind().await;
        let connector = Arc::new(WebSocketConnector::new(server.config()).unwrap());
        let (adapter, signals) = ChannelAdapter::open(connector, fast_reconnect());
        let engine = SyncEngine::new(
            adapter.sink(),
            Arc::new(InMemoryCache::new()),
            Arc::new(Stay),
        );
        let (engine, task) = engine.spawn(signals);

        let mut ws = server.accept_session().await;
        engine.mount_detail("p1").await.unwrap();
        assert_eq!(next_text(&mut ws).await, r#"42["join_poll","p1"]"#);

        // Server drops the session; the room is joined again on the new one.
        drop(ws);
        let mut ws = server.accept_session_with("sio-2", 25_000, 20_000).await;
        assert_eq!(next_text(&mut ws).await, r#"42["join_poll","p1"]"#);

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.sessions, 2);
        assert_eq!(stats.active_rooms, vec!["p1".to_string()]);

        adapter.close().await.unwrap();
        assert_eq!(next_text(&mut ws).await, "41");
        timeout(WAIT, task).await.unwrap().unwrap();
    }
}
