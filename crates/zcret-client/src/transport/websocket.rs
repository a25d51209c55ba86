//! WebSocket transport over `tokio-tungstenite`.

use std::fmt;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use zcret_core::{TransportError, TransportKind};
use zcret_proto::{EnginePacket, OpenHandshake, ProtocolError};

use super::engine_url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Established WebSocket link.
pub struct WebSocketLink {
    stream: WsStream,
    handshake: OpenHandshake,
    closed: bool,
}

impl fmt::Debug for WebSocketLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketLink")
            .field("sid", &self.handshake.sid)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

/// Connect and wait for the Engine.IO open packet.
pub(crate) async fn dial(endpoint: &str) -> Result<WebSocketLink, TransportError> {
    let url = engine_url(endpoint, TransportKind::WebSocket, None)?;
    let (mut stream, _) = connect_async(url.as_str())
        .await
        .map_err(|e| TransportError::Io(format!("websocket connect: {e}")))?;

    let handshake = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match EnginePacket::decode(text.as_str())? {
                EnginePacket::Open(handshake) => break handshake,
                other => {
                    return Err(TransportError::Handshake(format!(
                        "expected open packet, got {other:?}"
                    )));
                },
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {},
            Some(Ok(other)) => {
                return Err(TransportError::Handshake(format!("unexpected frame {other:?}")));
            },
            Some(Err(e)) => return Err(TransportError::Io(e.to_string())),
            None => return Err(TransportError::Closed),
        }
    };

    Ok(WebSocketLink { stream, handshake, closed: false })
}

impl WebSocketLink {
    /// Handshake received when the link opened.
    pub fn handshake(&self) -> &OpenHandshake {
        &self.handshake
    }

    /// Send one packet as a text frame.
    pub async fn send(&mut self, packet: EnginePacket) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.stream
            .send(Message::Text(packet.encode().into()))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    /// Next packet; `None` once the socket closed. Cancel-safe.
    pub async fn recv(&mut self) -> Option<Result<EnginePacket, TransportError>> {
        if self.closed {
            return None;
        }
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(EnginePacket::decode(text.as_str()).map_err(TransportError::from));
                },
                Ok(Message::Binary(_)) => {
                    return Some(Err(ProtocolError::BinaryUnsupported.into()));
                },
                Ok(Message::Close(frame)) => {
                    tracing::debug!(?frame, "websocket closed by server");
                    self.closed = true;
                    return None;
                },
                // Control frames are answered by tungstenite itself.
                Ok(_) => {},
                Err(e) => return Some(Err(TransportError::Io(e.to_string()))),
            }
        }
    }

    /// Close the socket.
    pub async fn close(&mut self) {
        if std::mem::replace(&mut self.closed, true) {
            return;
        }
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "websocket close failed");
        }
    }
}
