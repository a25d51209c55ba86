//! Scripted in-memory chat server.
//!
//! Speaks just enough Engine.IO and Socket.IO to exercise the client: it
//! hands out open handshakes, accepts or refuses the namespace connect,
//! acknowledges events, answers `login` and `fetch_messages`, and echoes
//! `send_message` back as a `new_message` broadcast.
//!
//! Faults are scripted (refuse a transport, fail the next N dials, refuse
//! the namespace) or drawn from a seeded RNG (`dial_failure_rate`), so every
//! run with the same seed fails the same dials.
//!
//! The server is driven two ways. The synchronous scenario runner calls
//! [`SimServer::accept`] and [`SimServer::receive`] directly and feeds the
//! returned packets to the session. [`crate::SimTransport`] attaches a
//! channel per link and the server delivers into it.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, SecondsFormat, TimeDelta, TimeZone, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use tokio::sync::mpsc;
use zcret_core::{TransportError, TransportKind};
use zcret_proto::{
    Ack, ClientCommand, EnginePacket, LoginSuccess, OpenHandshake, Packet, PacketKind,
    ServerEvent, WireMessage,
};

/// Server shared between a [`crate::SimTransport`] and the test body.
pub type SharedSimServer = Arc<Mutex<SimServer>>;

/// Create a server with default behaviour behind a shared handle.
pub fn create_shared_server(seed: u64) -> SharedSimServer {
    Arc::new(Mutex::new(SimServer::new(seed)))
}

/// Lock a shared server, ignoring poisoning from a panicked test thread.
pub fn lock_server(server: &SharedSimServer) -> MutexGuard<'_, SimServer> {
    server.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The link the server currently delivers to.
#[derive(Debug)]
struct AttachedLink {
    id: u64,
    tx: mpsc::UnboundedSender<EnginePacket>,
}

/// Scripted Socket.IO server.
#[derive(Debug)]
pub struct SimServer {
    rng: ChaCha8Rng,
    ping_interval: u64,
    ping_timeout: u64,
    history: Vec<WireMessage>,
    refused: HashSet<TransportKind>,
    failing_dials: u32,
    dial_failure_rate: f64,
    namespace_refusal: Option<String>,
    login_success: bool,
    echo: bool,
    acks: bool,
    links_opened: u64,
    posted: u64,
    link: Option<AttachedLink>,
    dials: Vec<TransportKind>,
    commands: Vec<ClientCommand>,
    namespace_connects: usize,
    client_disconnects: usize,
    pongs: usize,
}

impl SimServer {
    /// Server that accepts every dial and answers every request.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            ping_interval: 25_000,
            ping_timeout: 20_000,
            history: Vec::new(),
            refused: HashSet::new(),
            failing_dials: 0,
            dial_failure_rate: 0.0,
            namespace_refusal: None,
            login_success: true,
            echo: true,
            acks: true,
            links_opened: 0,
            posted: 0,
            link: None,
            dials: Vec::new(),
            commands: Vec::new(),
            namespace_connects: 0,
            client_disconnects: 0,
            pongs: 0,
        }
    }

    /// Seed the history returned by `fetch_messages`.
    pub fn with_history(mut self, history: Vec<WireMessage>) -> Self {
        self.history = history;
        self
    }

    /// Refuse every dial over `kind`.
    pub fn refuse_transport(mut self, kind: TransportKind) -> Self {
        self.refused.insert(kind);
        self
    }

    /// Fail the next `count` dials regardless of transport.
    pub fn fail_next_dials(mut self, count: u32) -> Self {
        self.failing_dials = count;
        self
    }

    /// Fail each dial with probability `rate`, drawn from the seeded RNG.
    pub fn with_dial_failure_rate(mut self, rate: f64) -> Self {
        self.dial_failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Answer the namespace connect with `CONNECT_ERROR`.
    pub fn refuse_namespace(mut self, reason: impl Into<String>) -> Self {
        self.namespace_refusal = Some(reason.into());
        self
    }

    /// Do not send `login_success`; only the login ack confirms the login.
    pub fn without_login_success(mut self) -> Self {
        self.login_success = false;
        self
    }

    /// Do not broadcast sent messages back.
    pub fn without_echo(mut self) -> Self {
        self.echo = false;
        self
    }

    /// Never answer ack requests.
    pub fn without_acks(mut self) -> Self {
        self.acks = false;
        self
    }

    /// Heartbeat parameters announced in the open handshake.
    pub fn with_heartbeat(mut self, ping_interval: u64, ping_timeout: u64) -> Self {
        self.ping_interval = ping_interval;
        self.ping_timeout = ping_timeout;
        self
    }

    /// Accept or refuse a dial over `kind`.
    pub fn accept(&mut self, kind: TransportKind) -> Result<OpenHandshake, TransportError> {
        self.dials.push(kind);

        if self.refused.contains(&kind) {
            tracing::debug!(%kind, "sim server refusing transport");
            return Err(TransportError::Io(format!("{kind} refused")));
        }
        if self.failing_dials > 0 {
            self.failing_dials -= 1;
            return Err(TransportError::Io("connection refused".into()));
        }
        if self.dial_failure_rate > 0.0 && self.rng.gen_bool(self.dial_failure_rate) {
            return Err(TransportError::Io("connection reset".into()));
        }

        self.links_opened += 1;
        Ok(OpenHandshake {
            sid: format!("sim-eio-{}", self.links_opened),
            upgrades: vec![],
            ping_interval: self.ping_interval,
            ping_timeout: self.ping_timeout,
            max_payload: Some(1_000_000),
        })
    }

    /// Process one packet from the client and return the replies.
    pub fn receive(&mut self, packet: EnginePacket) -> Vec<EnginePacket> {
        match packet {
            EnginePacket::Message(text) => match Packet::decode(&text) {
                Ok(packet) => self.receive_socket(&packet),
                Err(e) => {
                    tracing::debug!(error = %e, "sim server ignoring malformed packet");
                    vec![]
                },
            },
            EnginePacket::Pong(_) => {
                self.pongs += 1;
                vec![]
            },
            EnginePacket::Close => {
                self.link = None;
                vec![]
            },
            _ => vec![],
        }
    }

    /// Push a server event to the attached link.
    ///
    /// Returns the packet so synchronous drivers can feed it themselves.
    pub fn emit(&mut self, event: &ServerEvent) -> Option<EnginePacket> {
        let packet = event_packet(event)?;
        self.deliver(std::slice::from_ref(&packet));
        Some(packet)
    }

    /// Broadcast a message from another account, as a `new_message` push.
    pub fn post(&mut self, sender: &str, content: &str) -> Option<EnginePacket> {
        let message = self.record_message(sender, content);
        self.emit(&ServerEvent::NewMessage(message))
    }

    /// Send a heartbeat ping.
    pub fn ping(&mut self) -> EnginePacket {
        let packet = EnginePacket::Ping(String::new());
        self.deliver(std::slice::from_ref(&packet));
        packet
    }

    /// Disconnect the client from the namespace (`io server disconnect`).
    pub fn disconnect_client(&mut self) -> EnginePacket {
        let packet = EnginePacket::Message(Packet::new(PacketKind::Disconnect, None, None).encode());
        self.deliver(std::slice::from_ref(&packet));
        packet
    }

    /// Drop the attached link without a close packet.
    pub fn drop_link(&mut self) {
        if let Some(link) = self.link.take() {
            tracing::debug!(link = link.id, "sim server dropping link");
        }
    }

    /// Attach a delivery channel for a link opened by the async transport.
    pub fn attach(&mut self, id: u64, tx: mpsc::UnboundedSender<EnginePacket>) {
        self.link = Some(AttachedLink { id, tx });
    }

    /// Detach link `id` if it is still the attached one.
    pub fn detach(&mut self, id: u64) {
        if self.is_attached(id) {
            self.link = None;
        }
    }

    /// Whether link `id` is the one receiving deliveries.
    pub fn is_attached(&self, id: u64) -> bool {
        self.link.as_ref().is_some_and(|link| link.id == id)
    }

    /// Deliver packets to the attached link, if any.
    pub fn deliver(&mut self, packets: &[EnginePacket]) {
        let Some(link) = &self.link else {
            return;
        };
        for packet in packets {
            if link.tx.send(packet.clone()).is_err() {
                self.link = None;
                return;
            }
        }
    }

    /// Transports dialed, in order.
    pub fn dials(&self) -> &[TransportKind] {
        &self.dials
    }

    /// Client commands received, in order.
    pub fn commands(&self) -> &[ClientCommand] {
        &self.commands
    }

    /// Contents of every `send_message` received.
    pub fn sent_messages(&self) -> Vec<String> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                ClientCommand::SendMessage(req) => Some(req.content.clone()),
                _ => None,
            })
            .collect()
    }

    /// Messages the server knows about.
    pub fn history(&self) -> &[WireMessage] {
        &self.history
    }

    /// Number of links that completed the open handshake.
    pub fn links_opened(&self) -> u64 {
        self.links_opened
    }

    /// Number of namespace connect requests.
    pub fn namespace_connects(&self) -> usize {
        self.namespace_connects
    }

    /// Number of client-initiated namespace disconnects.
    pub fn client_disconnects(&self) -> usize {
        self.client_disconnects
    }

    /// Number of heartbeat replies.
    pub fn pongs(&self) -> usize {
        self.pongs
    }

    fn receive_socket(&mut self, packet: &Packet) -> Vec<EnginePacket> {
        match packet.kind {
            PacketKind::Connect => {
                self.namespace_connects += 1;
                let reply = match &self.namespace_refusal {
                    Some(reason) => Packet::new(
                        PacketKind::ConnectError,
                        None,
                        Some(json!({ "message": reason })),
                    ),
                    None => Packet::new(
                        PacketKind::Connect,
                        None,
                        Some(json!({ "sid": format!("sim-sock-{}", self.links_opened) })),
                    ),
                };
                vec![EnginePacket::Message(reply.encode())]
            },
            PacketKind::Disconnect => {
                self.client_disconnects += 1;
                vec![]
            },
            PacketKind::Event => match ClientCommand::from_packet(packet) {
                Ok(command) => self.receive_command(command, packet.ack_id),
                Err(e) => {
                    tracing::debug!(error = %e, "sim server ignoring unknown event");
                    vec![]
                },
            },
            PacketKind::Ack | PacketKind::ConnectError => vec![],
        }
    }

    fn receive_command(&mut self, command: ClientCommand, ack_id: Option<u64>) -> Vec<EnginePacket> {
        self.commands.push(command.clone());
        let mut replies: Vec<EnginePacket> =
            ack_id.filter(|_| self.acks).map(ack_ok).into_iter().collect();

        match command {
            ClientCommand::Login(req) => {
                if self.login_success {
                    replies.extend(event_packet(&ServerEvent::LoginSuccess(LoginSuccess {
                        wallet: req.wallet,
                    })));
                }
            },
            ClientCommand::FetchMessages => {
                replies.extend(event_packet(&ServerEvent::Messages(self.history.clone().into())));
            },
            ClientCommand::SendMessage(req) => {
                let message = self.record_message(&req.wallet, &req.content);
                if self.echo {
                    replies.extend(event_packet(&ServerEvent::NewMessage(message)));
                }
            },
        }
        replies
    }

    fn record_message(&mut self, sender: &str, content: &str) -> WireMessage {
        self.posted += 1;
        let message = WireMessage {
            id: Some(format!("sim-msg-{}", self.posted)),
            sender: sender.to_string(),
            content: content.to_string(),
            created_at: message_time(self.posted),
        };
        self.history.push(message.clone());
        message
    }
}

/// Creation time of the `n`th posted message: one minute apart from noon.
fn message_time(n: u64) -> String {
    let base: DateTime<Utc> = Utc
        .with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let at = base + TimeDelta::minutes(n as i64);
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn event_packet(event: &ServerEvent) -> Option<EnginePacket> {
    match event.to_packet() {
        Ok(packet) => Some(EnginePacket::Message(packet.encode())),
        Err(e) => {
            tracing::warn!(error = %e, "sim server could not encode event");
            None
        },
    }
}

fn ack_ok(id: u64) -> EnginePacket {
    let ack = Ack { id, args: vec![json!({ "ok": true })] };
    EnginePacket::Message(ack.to_packet().encode())
}

#[cfg(test)]
mod tests {
    use zcret_proto::{LoginRequest, SendMessageRequest};

    use super::*;

    fn event(command: &ClientCommand, ack: Option<u64>) -> EnginePacket {
        EnginePacket::Message(command.to_packet(ack).unwrap().encode())
    }

    #[test]
    fn connect_is_accepted_with_socket_sid() {
        let mut server = SimServer::new(1);
        server.accept(TransportKind::WebSocket).unwrap();
        let replies = server.receive(EnginePacket::Message("0".into()));
        assert_eq!(replies, vec![EnginePacket::Message(r#"0{"sid":"sim-sock-1"}"#.into())]);
    }

    #[test]
    fn namespace_refusal_answers_connect_error() {
        let mut server = SimServer::new(1).refuse_namespace("unauthorized");
        let replies = server.receive(EnginePacket::Message("0".into()));
        assert_eq!(replies, vec![EnginePacket::Message(r#"4{"message":"unauthorized"}"#.into())]);
    }

    #[test]
    fn login_is_acked_then_confirmed() {
        let mut server = SimServer::new(1);
        let login = ClientCommand::Login(LoginRequest { wallet: "W".into() });
        let replies = server.receive(event(&login, Some(0)));
        assert_eq!(
            replies,
            vec![
                EnginePacket::Message(r#"30[{"ok":true}]"#.into()),
                EnginePacket::Message(r#"2["login_success",{"wallet":"W"}]"#.into()),
            ]
        );
        assert_eq!(server.commands(), &[login]);
    }

    #[test]
    fn send_message_is_recorded_and_echoed() {
        let mut server = SimServer::new(1);
        let send = ClientCommand::SendMessage(SendMessageRequest {
            wallet: "W".into(),
            content: "hi".into(),
        });
        let replies = server.receive(event(&send, Some(2)));
        assert_eq!(replies.len(), 2);
        assert_eq!(server.sent_messages(), vec!["hi".to_string()]);
        assert_eq!(server.history()[0].id.as_deref(), Some("sim-msg-1"));
        assert_eq!(server.history()[0].created_at, "2024-01-01T12:01:00.000Z");
    }

    #[test]
    fn scripted_dial_failures_run_out() {
        let mut server = SimServer::new(1).fail_next_dials(2);
        assert!(server.accept(TransportKind::WebSocket).is_err());
        assert!(server.accept(TransportKind::Polling).is_err());
        assert!(server.accept(TransportKind::WebSocket).is_ok());
        assert_eq!(server.links_opened(), 1);
    }

    #[test]
    fn seeded_failures_are_reproducible() {
        let outcomes = |seed| {
            let mut server = SimServer::new(seed).with_dial_failure_rate(0.5);
            (0..32).map(|_| server.accept(TransportKind::WebSocket).is_ok()).collect::<Vec<_>>()
        };
        assert_eq!(outcomes(42), outcomes(42));
    }

    #[test]
    fn delivery_stops_after_drop() {
        let mut server = SimServer::new(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        server.attach(1, tx);
        server.ping();
        server.drop_link();
        server.ping();

        assert_eq!(rx.try_recv().unwrap(), EnginePacket::Ping(String::new()));
        assert!(rx.try_recv().is_err());
    }
}
