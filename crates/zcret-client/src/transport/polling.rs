//! HTTP long-polling transport over `reqwest`.
//!
//! A background task keeps one `GET` outstanding at all times and forwards
//! every decoded packet to a channel, so [`PollingLink::recv`] is a plain
//! channel receive and stays cancel-safe. Sends are `POST`s of single-packet
//! payloads.

use std::time::Duration;

use reqwest::{Client, header::CONTENT_TYPE};
use tokio::{sync::mpsc, task::JoinHandle};
use url::Url;
use zcret_core::{TransportError, TransportKind};
use zcret_proto::{
    EnginePacket, OpenHandshake,
    engine::{decode_payload, encode_payload},
};

use super::engine_url;

/// Packets buffered between the poller and the reader.
const INBOX_CAPACITY: usize = 256;

/// Established long-poll link.
#[derive(Debug)]
pub struct PollingLink {
    http: Client,
    url: Url,
    handshake: OpenHandshake,
    inbox: mpsc::Receiver<Result<EnginePacket, TransportError>>,
    poller: JoinHandle<()>,
    closed: bool,
}

/// Perform the open request and start polling.
pub(crate) async fn dial(http: &Client, endpoint: &str) -> Result<PollingLink, TransportError> {
    let open_url = engine_url(endpoint, TransportKind::Polling, None)?;
    let body = fetch(http, open_url, None).await?;

    let mut packets = decode_payload(&body)?.into_iter();
    let handshake = match packets.next() {
        Some(EnginePacket::Open(handshake)) => handshake,
        other => {
            return Err(TransportError::Handshake(format!("expected open packet, got {other:?}")));
        },
    };

    let url = engine_url(endpoint, TransportKind::Polling, Some(&handshake.sid))?;
    let (tx, inbox) = mpsc::channel(INBOX_CAPACITY);
    for packet in packets {
        if tx.send(Ok(packet)).await.is_err() {
            break;
        }
    }

    let poll_timeout = Duration::from_millis(
        handshake.ping_interval.saturating_add(handshake.ping_timeout),
    );
    let poller = tokio::spawn(poll_loop(http.clone(), url.clone(), poll_timeout, tx));

    Ok(PollingLink { http: http.clone(), url, handshake, inbox, poller, closed: false })
}

impl PollingLink {
    /// Handshake received when the link opened.
    pub fn handshake(&self) -> &OpenHandshake {
        &self.handshake
    }

    /// Post one packet.
    pub async fn send(&mut self, packet: EnginePacket) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        post(&self.http, self.url.clone(), encode_payload(&[packet])).await
    }

    /// Next packet from the poller; `None` once polling stopped. Cancel-safe.
    pub async fn recv(&mut self) -> Option<Result<EnginePacket, TransportError>> {
        self.inbox.recv().await
    }

    /// Tell the server the session is over and stop polling.
    pub async fn close(&mut self) {
        if std::mem::replace(&mut self.closed, true) {
            return;
        }
        self.poller.abort();
        let close = encode_payload(&[EnginePacket::Close]);
        if let Err(e) = post(&self.http, self.url.clone(), close).await {
            tracing::debug!(error = %e, "polling close failed");
        }
    }
}

impl Drop for PollingLink {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

async fn poll_loop(
    http: Client,
    url: Url,
    timeout: Duration,
    tx: mpsc::Sender<Result<EnginePacket, TransportError>>,
) {
    loop {
        let packets = match fetch(&http, url.clone(), Some(timeout)).await {
            Ok(body) => decode_payload(&body).map_err(TransportError::from),
            Err(e) => Err(e),
        };
        match packets {
            Ok(packets) => {
                for packet in packets {
                    let closing = packet == EnginePacket::Close;
                    if tx.send(Ok(packet)).await.is_err() || closing {
                        return;
                    }
                }
            },
            Err(e) => {
                tracing::debug!(error = %e, "poll request failed");
                let _ = tx.send(Err(e)).await;
                return;
            },
        }
    }
}

async fn fetch(http: &Client, url: Url, timeout: Option<Duration>) -> Result<String, TransportError> {
    let mut request = http.get(url);
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }
    let response = request
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| TransportError::Io(e.to_string()))?;
    response.text().await.map_err(|e| TransportError::Io(e.to_string()))
}

async fn post(http: &Client, url: Url, body: String) -> Result<(), TransportError> {
    http.post(url)
        .header(CONTENT_TYPE, "text/plain;charset=UTF-8")
        .body(body)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map(|_| ())
        .map_err(|e| TransportError::Io(e.to_string()))
}
