//! Network transports for the chat server.
//!
//! [`NetworkTransport`] implements [`zcret_core::Transport`] with two
//! mechanisms:
//!
//! - [`websocket`]: one Engine.IO packet per WebSocket text frame
//! - [`polling`]: HTTP long-polling with `\x1e`-separated payloads
//!
//! Both derive the Engine.IO URL from the server base URL
//! (`https://host/` becomes `wss://host/socket.io/?EIO=4&transport=websocket`).

pub mod polling;
pub mod websocket;

use async_trait::async_trait;
use url::Url;
use zcret_core::{Transport, TransportError, TransportKind, TransportLink};
use zcret_proto::{EnginePacket, OpenHandshake, engine::PROTOCOL_VERSION};

pub use polling::PollingLink;
pub use websocket::WebSocketLink;

/// Engine.IO request path.
pub const ENGINE_PATH: &str = "/socket.io/";

/// Production transport dialing real sockets.
#[derive(Debug, Clone)]
pub struct NetworkTransport {
    http: reqwest::Client,
}

impl NetworkTransport {
    /// Create a transport with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the HTTP client (TLS backend) cannot be initialized.
    pub fn new() -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportError::Io(format!("http client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for NetworkTransport {
    type Link = NetworkLink;

    async fn dial(
        &self,
        kind: TransportKind,
        endpoint: &str,
    ) -> Result<NetworkLink, TransportError> {
        let link = match kind {
            TransportKind::WebSocket => NetworkLink::WebSocket(Box::new(websocket::dial(endpoint).await?)),
            TransportKind::Polling => {
                NetworkLink::Polling(Box::new(polling::dial(&self.http, endpoint).await?))
            },
        };
        tracing::debug!(%kind, sid = %link.handshake().sid, "transport open");
        Ok(link)
    }
}

/// Link produced by [`NetworkTransport`].
#[derive(Debug)]
pub enum NetworkLink {
    /// WebSocket link
    WebSocket(Box<WebSocketLink>),
    /// Long-poll link
    Polling(Box<PollingLink>),
}

#[async_trait]
impl TransportLink for NetworkLink {
    fn handshake(&self) -> &OpenHandshake {
        match self {
            Self::WebSocket(link) => link.handshake(),
            Self::Polling(link) => link.handshake(),
        }
    }

    async fn send(&mut self, packet: EnginePacket) -> Result<(), TransportError> {
        match self {
            Self::WebSocket(link) => link.send(packet).await,
            Self::Polling(link) => link.send(packet).await,
        }
    }

    async fn recv(&mut self) -> Option<Result<EnginePacket, TransportError>> {
        match self {
            Self::WebSocket(link) => link.recv().await,
            Self::Polling(link) => link.recv().await,
        }
    }

    async fn close(&mut self) {
        match self {
            Self::WebSocket(link) => link.close().await,
            Self::Polling(link) => link.close().await,
        }
    }
}

/// Build the Engine.IO URL for `kind` from the server base URL.
///
/// # Errors
///
/// Returns `Unsupported` for endpoints that are not http(s) or ws(s) URLs.
pub fn engine_url(
    endpoint: &str,
    kind: TransportKind,
    sid: Option<&str>,
) -> Result<Url, TransportError> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| TransportError::Unsupported(format!("invalid endpoint {endpoint:?}: {e}")))?;

    let scheme = match (kind, url.scheme()) {
        (TransportKind::WebSocket, "http" | "ws") => "ws",
        (TransportKind::WebSocket, "https" | "wss") => "wss",
        (TransportKind::Polling, "http" | "ws") => "http",
        (TransportKind::Polling, "https" | "wss") => "https",
        (_, other) => return Err(TransportError::Unsupported(format!("scheme {other:?}"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| TransportError::Unsupported(format!("cannot use scheme {scheme:?}")))?;
    url.set_path(ENGINE_PATH);
    url.set_fragment(None);

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        query.append_pair("EIO", &PROTOCOL_VERSION.to_string());
        query.append_pair("transport", kind.as_str());
        if let Some(sid) = sid {
            query.append_pair("sid", sid);
        }
    }
    Ok(url)
}
