//! Protocol versions and endpoint addressing.

use crate::codec::ProtocolError;

/// Engine.IO protocol revision spoken by this client.
pub const ENGINE_IO_VERSION: u8 = 4;

/// Socket.IO protocol revision spoken by this client.
pub const SOCKET_IO_VERSION: u8 = 5;

/// Default mount path of the Socket.IO endpoint on the server.
pub const DEFAULT_SOCKET_PATH: &str = "/socket.io/";

/// Build the WebSocket URL for a server base URL.
///
/// `http` and `https` bases are mapped to `ws` and `wss`; `ws`/`wss` bases are
/// kept as-is.
///
/// # Errors
///
/// Returns an error if the base URL has no supported scheme.
pub fn websocket_url(base: &str, path: &str) -> Result<String, ProtocolError> {
    let base = base.trim_end_matches('/');
    let (scheme, rest) = base
        .split_once("://")
        .ok_or_else(|| ProtocolError::Invalid(format!("missing scheme in {base:?}")))?;

    let scheme = match scheme {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ProtocolError::Invalid(format!(
                "unsupported scheme {other:?}"
            )))
        }
    };

    if rest.is_empty() {
        return Err(ProtocolError::Invalid(format!("missing host in {base:?}")));
    }

    let path = path.trim_matches('/');
    let path = if path.is_empty() {
        "/".to_string()
    } else {
        format!("/{path}/")
    };

    Ok(format!(
        "{scheme}://{rest}{path}?EIO={ENGINE_IO_VERSION}&transport=websocket"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_websocket_url() {
        assert_eq!(
            websocket_url("http://localhost:3001", DEFAULT_SOCKET_PATH).unwrap(),
            "ws://localhost:3001/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            websocket_url("https://polls.example.com/", "socket.io").unwrap(),
            "wss://polls.example.com/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            websocket_url("ws://10.0.0.2:8080/api", "/rt/").unwrap(),
            "ws://10.0.0.2:8080/api/rt/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn test_websocket_url_rejects_bad_base() {
        assert!(websocket_url("localhost:3001", DEFAULT_SOCKET_PATH).is_err());
        assert!(websocket_url("ftp://host", DEFAULT_SOCKET_PATH).is_err());
        assert!(websocket_url("http://", DEFAULT_SOCKET_PATH).is_err());
    }
}
