//! A scripted Socket.IO server for transport tests.

use crate::websocket::WebSocketConfig;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

pub(crate) type ServerWs = WebSocketStream<TcpStream>;

pub(crate) struct TestServer {
    listener: TcpListener,
    addr: SocketAddr,
}

impl TestServer {
    pub(crate) async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        Self { listener, addr }
    }

    pub(crate) fn config(&self) -> WebSocketConfig {
        WebSocketConfig {
            url: format!("http://{}", self.addr),
            handshake_timeout: Duration::from_secs(5),
            ..WebSocketConfig::default()
        }
    }

    pub(crate) async fn accept_ws(&self) -> ServerWs {
        let (tcp, _) = self.listener.accept().await.unwrap();
        accept_async(tcp).await.unwrap()
    }

    /// Accept a connection and complete the handshake as session `sio-1`.
    pub(crate) async fn accept_session(&self) -> ServerWs {
        self.accept_session_with("sio-1", 25_000, 20_000).await
    }

    pub(crate) async fn accept_session_with(
        &self,
        sid: &str,
        ping_interval: u64,
        ping_timeout: u64,
    ) -> ServerWs {
        let mut ws = self.accept_ws().await;
        ws.send(Message::Text(open_frame(ping_interval, ping_timeout)))
            .await
            .unwrap();
        assert_eq!(next_text(&mut ws).await, "40");
        ws.send(Message::Text(format!(r#"40{{"sid":"{sid}"}}"#)))
            .await
            .unwrap();
        ws
    }
}

pub(crate) fn open_frame(ping_interval: u64, ping_timeout: u64) -> String {
    format!(
        r#"0{{"sid":"eio-1","upgrades":[],"pingInterval":{ping_interval},"pingTimeout":{ping_timeout},"maxPayload":1000000}}"#
    )
}

/// Next text message from the client. Panics if the connection ends first.
pub(crate) async fn next_text(ws: &mut ServerWs) -> String {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return text,
            Some(Ok(_)) => {}
            other => panic!("connection ended: {other:?}"),
        }
    }
}
