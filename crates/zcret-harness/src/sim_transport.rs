//! In-memory transport backed by a [`SimServer`].
//!
//! Each dial asks the server to accept the transport, then attaches a fresh
//! channel the server delivers into. Packets the client sends are handled by
//! the server inline and the replies go back through the same channel, so
//! ordering matches a real single-connection link.
//!
//! [`SimServer`]: crate::SimServer

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use zcret_core::{Transport, TransportError, TransportKind, TransportLink};
use zcret_proto::{EnginePacket, OpenHandshake};

use crate::sim_server::{SharedSimServer, lock_server};

/// Simulated transport.
#[derive(Debug)]
pub struct SimTransport {
    server: SharedSimServer,
    next_link: AtomicU64,
}

impl SimTransport {
    /// Transport dialing `server`.
    pub fn new(server: SharedSimServer) -> Self {
        Self { server, next_link: AtomicU64::new(0) }
    }

    /// The server behind this transport.
    pub fn server(&self) -> &SharedSimServer {
        &self.server
    }
}

#[async_trait]
impl Transport for SimTransport {
    type Link = SimLink;

    async fn dial(&self, kind: TransportKind, endpoint: &str) -> Result<SimLink, TransportError> {
        let id = self.next_link.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, inbox) = mpsc::unbounded_channel();

        let handshake = {
            let mut server = lock_server(&self.server);
            let handshake = server.accept(kind)?;
            server.attach(id, tx);
            handshake
        };
        tracing::debug!(link = id, %kind, endpoint, sid = %handshake.sid, "sim link open");

        Ok(SimLink { id, server: self.server.clone(), handshake, inbox, closed: false })
    }
}

/// One simulated link.
#[derive(Debug)]
pub struct SimLink {
    id: u64,
    server: SharedSimServer,
    handshake: OpenHandshake,
    inbox: mpsc::UnboundedReceiver<EnginePacket>,
    closed: bool,
}

#[async_trait]
impl TransportLink for SimLink {
    fn handshake(&self) -> &OpenHandshake {
        &self.handshake
    }

    async fn send(&mut self, packet: EnginePacket) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let mut server = lock_server(&self.server);
        if !server.is_attached(self.id) {
            return Err(TransportError::Closed);
        }
        let replies = server.receive(packet);
        server.deliver(&replies);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<EnginePacket, TransportError>> {
        if self.closed {
            return None;
        }
        self.inbox.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        lock_server(&self.server).detach(self.id);
    }
}
