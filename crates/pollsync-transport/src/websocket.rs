//! WebSocket connector.
//!
//! Dials `<url>/socket.io/?EIO=4&transport=websocket` with tokio-tungstenite
//! and completes the Engine.IO open and Socket.IO connect exchange.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use pollsync_protocol::{
    codec, websocket_url, Handshake, Packet, ProtocolError, DEFAULT_SOCKET_PATH,
};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, trace};

use crate::traits::{Connection, ConnectionId, Connector, PacketSink, PacketStream, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Server base URL (`http`, `https`, `ws` or `wss`).
    pub url: String,
    /// Socket.IO endpoint path.
    pub path: String,
    /// Limit for connecting plus the handshake.
    pub handshake_timeout: Duration,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000".to_string(),
            path: DEFAULT_SOCKET_PATH.to_string(),
            handshake_timeout: Duration::from_secs(10),
            max_message_size: codec::MAX_FRAME_SIZE,
        }
    }
}

/// Connects to a Socket.IO server over WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    endpoint: String,
    config: WebSocketConfig,
}

impl WebSocketConnector {
    /// Create a connector.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL has an unsupported scheme.
    pub fn new(config: WebSocketConfig) -> Result<Self, TransportError> {
        let endpoint = websocket_url(&config.url, &config.path)?;
        Ok(Self { endpoint, config })
    }

    /// The WebSocket URL this connector dials.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn handshake(&self) -> Result<Connection, TransportError> {
        let (ws, _) = connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;
        debug!(endpoint = %self.endpoint, "WebSocket connected");

        let (write, read) = ws.split();
        let mut sink = WebSocketSink { write };
        let mut stream = WebSocketPacketStream {
            read,
            max_message_size: self.config.max_message_size,
        };

        let handshake: Handshake = match stream.recv().await? {
            Some(Packet::Open(handshake)) => handshake,
            Some(other) => {
                return Err(TransportError::Handshake(format!(
                    "expected open packet, got {other:?}"
                )))
            }
            None => return Err(TransportError::ConnectionClosed),
        };
        trace!(sid = %handshake.sid, ping_interval = handshake.ping_interval, "Engine.IO open");

        sink.send(Packet::connect()).await?;
        let sid = loop {
            match stream.recv().await? {
                Some(Packet::Connect { sid }) => break sid,
                Some(Packet::ConnectError { message }) => {
                    return Err(TransportError::Refused(message))
                }
                Some(Packet::Ping) => sink.send(Packet::Pong).await?,
                Some(other) => trace!(packet = ?other, "Ignoring packet before connect ack"),
                None => return Err(TransportError::ConnectionClosed),
            }
        };

        let id = ConnectionId::new(sid.unwrap_or_else(|| handshake.sid.clone()));
        info!(session = %id, endpoint = %self.endpoint, "Socket.IO session established");

        Ok(Connection {
            id,
            handshake,
            sink: Box::new(sink),
            stream: Box::new(stream),
        })
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Connection, TransportError> {
        tokio::time::timeout(self.config.handshake_timeout, self.handshake())
            .await
            .map_err(|_| TransportError::Timeout)?
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

struct WebSocketSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl PacketSink for WebSocketSink {
    async fn send(&mut self, packet: Packet) -> Result<(), TransportError> {
        let frame = codec::encode(&packet)?;
        self.write
            .send(Message::Text(frame))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.write.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::SendFailed(e.to_string())),
        }
    }
}

struct WebSocketPacketStream {
    read: SplitStream<WsStream>,
    max_message_size: usize,
}

#[async_trait]
impl PacketStream for WebSocketPacketStream {
    async fn recv(&mut self) -> Result<Option<Packet>, TransportError> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => {
                    if text.len() > self.max_message_size {
                        return Err(ProtocolError::FrameTooLarge(text.len()).into());
                    }
                    return codec::decode(&text).map(Some).map_err(Into::into);
                }
                Some(Ok(Message::Binary(data))) => {
                    return Err(ProtocolError::Invalid(format!(
                        "unexpected binary message of {} bytes",
                        data.len()
                    ))
                    .into());
                }
                // Control frames are answered by tungstenite itself.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!(frame = ?frame, "Received close frame");
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    return Ok(None)
                }
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{next_text, open_frame, TestServer};

    #[test]
    fn test_websocket_config_default() {
        let config = WebSocketConfig::default();
        assert_eq!(config.path, "/socket.io/");
        assert_eq!(config.max_message_size, 1024 * 1024);
    }

    #[test]
    fn test_endpoint() {
        let connector = WebSocketConnector::new(WebSocketConfig {
            url: "https://polls.example.com".into(),
            ..WebSocketConfig::default()
        })
        .unwrap();
        assert_eq!(
            connector.endpoint(),
            "wss://polls.example.com/socket.io/?EIO=4&transport=websocket"
        );

        assert!(WebSocketConnector::new(WebSocketConfig {
            url: "ftp://polls.example.com".into(),
            ..WebSocketConfig::default()
        })
        .is_err());
    }

    #[tokio::test]
    async fn test_handshake() {
        let server = TestServer::bind().await;
        let connector = WebSocketConnector::new(server.config()).unwrap();

        let accept = tokio::spawn(async move { server.accept_session().await });
        let connection = connector.connect().await.unwrap();
        let _ws = accept.await.unwrap();

        assert_eq!(connection.id.as_str(), "sio-1");
        assert_eq!(connection.handshake.sid, "eio-1");
        assert_eq!(connection.handshake.ping_interval, 25_000);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let server = TestServer::bind().await;
        let connector = WebSocketConnector::new(server.config()).unwrap();

        let accept = tokio::spawn(async move {
            let mut ws = server.accept_ws().await;
            ws.send(Message::Text(open_frame(25_000, 20_000))).await.unwrap();
            assert_eq!(next_text(&mut ws).await, "40");
            ws.send(Message::Text(r#"44{"message":"unauthorized"}"#.into()))
                .await
                .unwrap();
            ws
        });

        match connector.connect().await {
            Err(TransportError::Refused(message)) => assert_eq!(message, "unauthorized"),
            other => panic!("expected refusal, got {other:?}"),
        }
        let _ws = accept.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let server = TestServer::bind().await;
        let connector = WebSocketConnector::new(WebSocketConfig {
            handshake_timeout: Duration::from_millis(100),
            ..server.config()
        })
        .unwrap();

        // Accept the upgrade but never send the open packet.
        let accept = tokio::spawn(async move { server.accept_ws().await });
        assert!(matches!(
            connector.connect().await,
            Err(TransportError::Timeout)
        ));
        drop(accept);
    }

    #[tokio::test]
    async fn test_stream_reports_bad_frames_and_continues() {
        let server = TestServer::bind().await;
        let connector = WebSocketConnector::new(server.config()).unwrap();

        let accept = tokio::spawn(async move {
            let mut ws = server.accept_session().await;
            ws.send(Message::Text(r#"42["mystery",{}]"#.into())).await.unwrap();
            ws.send(Message::Text(r#"42["poll_deleted",{"pollId":"p1"}]"#.into()))
                .await
                .unwrap();
            ws
        });

        let mut connection = connector.connect().await.unwrap();
        let _ws = accept.await.unwrap();

        let err = connection.stream.recv().await.unwrap_err();
        assert!(err.is_frame_error());
        let packet = connection.stream.recv().await.unwrap().unwrap();
        assert!(matches!(packet, Packet::Event(event) if event.poll_id() == Some("p1")));
    }
}
