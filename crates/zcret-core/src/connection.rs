//! Transport connection state machine.
//!
//! This module owns the connection lifecycle underneath a chat session:
//! dialing, transport fallback, the Socket.IO namespace handshake, heartbeat
//! supervision, bounded reconnection, and demultiplexing of inbound packets
//! into typed [`TransportEvent`]s.
//!
//! # Architecture: Action-Based State Machine
//!
//! - Methods accept time as parameter (no stored clock)
//! - Methods return `Vec<ConnectionAction>` describing effects
//! - The runtime dials, sends, arms timers and feeds results back in
//!
//! Every connection cycle (each [`Connection::open`]) gets a new cycle
//! number. Actions carry it, and inputs tagged with an older cycle are
//! ignored, so late dial results or timers from an abandoned cycle cannot
//! disturb the current one. This is also what makes [`Connection::close`]
//! safe to call while handling an event the connection itself emitted.
//!
//! # State Machine
//!
//! ```text
//! Closed ──open──> Dialing ──link_opened──> Handshaking ──CONNECT──> Open
//!                    ^  │                         │                    │
//!                    │  │ all transports failed   │ failed             │ link lost
//!                    │  v                         v                    v
//!                  AwaitingRetry <─────────────────────────────────────┘
//!                       │ attempts exhausted
//!                       v
//!                   Exhausted ──open──> Dialing
//! ```
//!
//! # Timeouts
//!
//! - **Connect timeout**: each dial must reach `Open` within
//!   [`ConnectionConfig::connect_timeout`] (checked by [`Connection::tick`])
//! - **Heartbeat**: the server pings every `ping_interval`; the link is
//!   considered dead after `ping_interval + ping_timeout` of silence

use std::{
    fmt,
    str::FromStr,
    time::{Duration, Instant},
};

use zcret_proto::{
    Ack, ClientCommand, ConnectErrorData, EnginePacket, MessageBatch, OpenHandshake, Packet,
    PacketKind, ServerErrorPayload, ServerEvent, WireMessage,
};

use crate::error::ConnectionError;

/// Default chat server.
pub const DEFAULT_ENDPOINT: &str = "https://chat-sol-84af8fdc9c59.herokuapp.com/";

/// Concrete transport mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Full-duplex WebSocket streaming
    WebSocket,
    /// HTTP long-polling
    Polling,
}

impl TransportKind {
    /// Engine.IO transport name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WebSocket => "websocket",
            Self::Polling => "polling",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Ok(Self::WebSocket),
            "polling" | "long-poll" | "longpoll" => Ok(Self::Polling),
            other => Err(format!("unknown transport {other:?} (expected websocket or polling)")),
        }
    }
}

/// Connection configuration, fixed for one connection cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Server base URL
    pub endpoint: String,
    /// Dial attempts per failure streak, the first attempt included
    pub max_reconnect_attempts: u32,
    /// Wait between attempts
    pub reconnect_delay: Duration,
    /// Limit for one dial to reach `Open`
    pub connect_timeout: Duration,
    /// Transports to try within an attempt, in order
    pub preferred_transport_order: Vec<TransportKind>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(1000),
            connect_timeout: Duration::from_millis(20_000),
            preferred_transport_order: vec![TransportKind::WebSocket, TransportKind::Polling],
        }
    }
}

impl ConnectionConfig {
    /// Check the configuration can start a cycle.
    pub fn validate(&self) -> Result<(), ConnectionError> {
        if self.preferred_transport_order.is_empty() {
            return Err(ConnectionError::TransportInit("no transports configured".into()));
        }
        let url = url::Url::parse(&self.endpoint).map_err(|e| {
            ConnectionError::TransportInit(format!("invalid endpoint {:?}: {e}", self.endpoint))
        })?;
        match url.scheme() {
            "http" | "https" | "ws" | "wss" => Ok(()),
            other => Err(ConnectionError::TransportInit(format!(
                "unsupported endpoint scheme {other:?}"
            ))),
        }
    }
}

/// Why an open link went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server disconnected the socket on purpose
    IoServerDisconnect,
    /// This client closed the socket
    IoClientDisconnect,
    /// No heartbeat within `ping_interval + ping_timeout`
    PingTimeout,
    /// The link closed cleanly underneath the socket
    TransportClose,
    /// The link failed
    TransportError(String),
}

impl DisconnectReason {
    /// Socket.IO classification string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IoServerDisconnect => "io server disconnect",
            Self::IoClientDisconnect => "io client disconnect",
            Self::PingTimeout => "ping timeout",
            Self::TransportClose => "transport close",
            Self::TransportError(_) => "transport error",
        }
    }

    /// Whether the connection reconnects on its own after this.
    pub fn should_reconnect(&self) -> bool {
        !matches!(self, Self::IoServerDisconnect | Self::IoClientDisconnect)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransportError(detail) => write!(f, "transport error ({detail})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Events the connection surfaces to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Socket.IO namespace joined
    Connected {
        /// Transport that succeeded
        transport: TransportKind,
        /// Socket id assigned by the server
        sid: Option<String>,
    },
    /// A connection attempt failed
    ConnectError {
        /// Failure description
        reason: String,
        /// No further automatic attempts will follow
        terminal: bool,
    },
    /// An open link went away
    Disconnected(DisconnectReason),
    /// History batch (`messages`)
    MessageBatch(MessageBatch),
    /// Live push (`new_message`)
    MessageIncremental(WireMessage),
    /// Login confirmed (`login_success`)
    LoginSucceeded {
        /// Account the server accepted
        wallet: String,
    },
    /// Server-reported error (`error`)
    ServerError(ServerErrorPayload),
    /// Reply to a command sent with an ack id
    Ack(Ack),
}

/// Actions returned by the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Dial the server with this transport
    Dial {
        /// Cycle to report the result under
        cycle: u64,
        /// Transport to use
        transport: TransportKind,
        /// Server base URL
        endpoint: String,
    },
    /// Send a packet over the current link
    Send {
        /// Cycle the link belongs to
        cycle: u64,
        /// Packet to send
        packet: EnginePacket,
    },
    /// Close the current link (if any)
    CloseLink {
        /// Cycle the link belongs to
        cycle: u64,
    },
    /// Call [`Connection::retry_elapsed`] after `delay`
    ScheduleRetry {
        /// Cycle to report the timer under
        cycle: u64,
        /// Wait before the next attempt
        delay: Duration,
    },
    /// Cancel a scheduled retry
    CancelRetry {
        /// Cycle the timer belongs to
        cycle: u64,
    },
    /// Surface an event to the owner
    Emit(TransportEvent),
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, not trying
    Closed,
    /// Waiting for a transport to open
    Dialing,
    /// Engine.IO open, Socket.IO CONNECT pending
    Handshaking,
    /// Namespace joined, events flowing
    Open,
    /// Waiting out the reconnect delay
    AwaitingRetry,
    /// Gave up after the configured attempts
    Exhausted,
}

/// Connection state machine
///
/// Manages lifecycle, reconnection and heartbeats for one logical connection
/// to the chat server. Pure state: no I/O, time passed in.
#[derive(Debug, Clone)]
pub struct Connection {
    config: ConnectionConfig,
    state: ConnectionState,
    /// Incremented by every `open`
    cycle: u64,
    /// Number of the current dial attempt in this failure streak
    attempt: u32,
    /// Index into `preferred_transport_order` for the current attempt
    transport_index: usize,
    /// When the current dial started
    dial_started: Option<Instant>,
    /// Last packet received on the link
    last_activity: Option<Instant>,
    /// Silence allowed before the link is declared dead
    heartbeat_timeout: Option<Duration>,
    next_ack_id: u64,
}

impl Connection {
    /// Create a closed connection.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Closed,
            cycle: 0,
            attempt: 0,
            transport_index: 0,
            dial_started: None,
            last_activity: None,
            heartbeat_timeout: None,
            next_ack_id: 0,
        }
    }

    /// Create a closed connection whose cycles continue after `cycle`.
    ///
    /// Owners that replace their connection use this so results tagged with
    /// an earlier connection's cycles stay stale.
    pub fn after_cycle(config: ConnectionConfig, cycle: u64) -> Self {
        Self { cycle, ..Self::new(config) }
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current cycle number.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Dial attempt number within the current failure streak.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Configuration of this connection.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Whether events can be sent.
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Transport currently dialed or connected.
    pub fn transport(&self) -> Option<TransportKind> {
        match self.state {
            ConnectionState::Dialing | ConnectionState::Handshaking | ConnectionState::Open => {
                self.config.preferred_transport_order.get(self.transport_index).copied()
            },
            _ => None,
        }
    }

    /// Whether results tagged with `cycle` are still wanted.
    pub fn accepts(&self, cycle: u64) -> bool {
        cycle == self.cycle
            && matches!(
                self.state,
                ConnectionState::Dialing | ConnectionState::Handshaking | ConnectionState::Open
            )
    }

    /// Start a new connection cycle.
    ///
    /// Does nothing if a cycle is already running.
    ///
    /// # Errors
    /// Returns `TransportInit` if the configuration cannot be used
    pub fn open(&mut self, now: Instant) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if !matches!(self.state, ConnectionState::Closed | ConnectionState::Exhausted) {
            tracing::debug!(state = ?self.state, "open ignored, cycle already running");
            return Ok(vec![]);
        }
        self.config.validate()?;

        self.cycle += 1;
        self.attempt = 1;
        self.next_ack_id = 0;
        tracing::debug!(cycle = self.cycle, endpoint = %self.config.endpoint, "opening connection");
        Ok(self.begin_attempt(now))
    }

    /// Close the connection.
    ///
    /// Idempotent: closing a closed connection returns no actions.
    pub fn close(&mut self) -> Vec<ConnectionAction> {
        let cycle = self.cycle;
        let actions = match self.state {
            ConnectionState::Closed => return vec![],
            ConnectionState::Exhausted => vec![],
            ConnectionState::AwaitingRetry => vec![ConnectionAction::CancelRetry { cycle }],
            ConnectionState::Dialing | ConnectionState::Handshaking => {
                vec![ConnectionAction::CloseLink { cycle }]
            },
            ConnectionState::Open => {
                let disconnect = Packet::new(PacketKind::Disconnect, None, None);
                vec![
                    ConnectionAction::Send { cycle, packet: EnginePacket::Message(disconnect.encode()) },
                    ConnectionAction::CloseLink { cycle },
                ]
            },
        };

        tracing::debug!(cycle, from = ?self.state, "connection closed");
        self.reset_link();
        self.state = ConnectionState::Closed;
        actions
    }

    /// The transport for `cycle` completed the Engine.IO handshake.
    pub fn link_opened(
        &mut self,
        cycle: u64,
        handshake: &OpenHandshake,
        now: Instant,
    ) -> Vec<ConnectionAction> {
        if cycle != self.cycle || self.state != ConnectionState::Dialing {
            return vec![];
        }

        self.state = ConnectionState::Handshaking;
        self.last_activity = Some(now);
        self.heartbeat_timeout = Some(Duration::from_millis(
            handshake.ping_interval.saturating_add(handshake.ping_timeout),
        ));
        tracing::debug!(cycle, sid = %handshake.sid, "engine.io link open");

        vec![ConnectionAction::Send {
            cycle,
            packet: EnginePacket::Message(Packet::connect().encode()),
        }]
    }

    /// Dialing or handshaking on `cycle` failed.
    ///
    /// Falls back to the next preferred transport before counting the attempt
    /// as failed.
    pub fn link_failed(&mut self, cycle: u64, reason: &str, now: Instant) -> Vec<ConnectionAction> {
        if cycle != self.cycle
            || !matches!(self.state, ConnectionState::Dialing | ConnectionState::Handshaking)
        {
            return vec![];
        }

        let mut actions = vec![ConnectionAction::CloseLink { cycle }];
        let failed = self.transport().map_or("unknown", TransportKind::as_str);

        if self.transport_index + 1 < self.config.preferred_transport_order.len() {
            self.transport_index += 1;
            tracing::info!(cycle, failed, reason, "transport unavailable, falling back");
            actions.extend(self.dial_current(now));
            return actions;
        }

        tracing::warn!(cycle, attempt = self.attempt, reason, "connection attempt failed");
        actions.extend(self.attempt_failed(reason.to_string()));
        actions
    }

    /// The open link on `cycle` went away.
    pub fn link_lost(
        &mut self,
        cycle: u64,
        reason: DisconnectReason,
        now: Instant,
    ) -> Vec<ConnectionAction> {
        if cycle != self.cycle {
            return vec![];
        }
        match self.state {
            ConnectionState::Dialing | ConnectionState::Handshaking => {
                self.link_failed(cycle, &reason.to_string(), now)
            },
            ConnectionState::Open => self.drop_open_link(reason),
            _ => vec![],
        }
    }

    /// The retry timer for `cycle` fired.
    pub fn retry_elapsed(&mut self, cycle: u64, now: Instant) -> Vec<ConnectionAction> {
        if cycle != self.cycle || self.state != ConnectionState::AwaitingRetry {
            return vec![];
        }
        self.attempt += 1;
        tracing::debug!(cycle, attempt = self.attempt, "reconnecting");
        self.begin_attempt(now)
    }

    /// Handle a packet received on the link for `cycle`.
    ///
    /// # Errors
    /// Returns `Protocol` if the packet cannot be decoded; the link stays up.
    pub fn handle_packet(
        &mut self,
        cycle: u64,
        packet: EnginePacket,
        now: Instant,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if cycle != self.cycle
            || !matches!(self.state, ConnectionState::Handshaking | ConnectionState::Open)
        {
            return Ok(vec![]);
        }
        self.last_activity = Some(now);

        match packet {
            EnginePacket::Ping(data) => {
                Ok(vec![ConnectionAction::Send { cycle, packet: EnginePacket::Pong(data) }])
            },
            EnginePacket::Close => Ok(self.link_lost(cycle, DisconnectReason::TransportClose, now)),
            EnginePacket::Message(text) => self.handle_socket_packet(&Packet::decode(&text)?),
            EnginePacket::Open(_) => {
                tracing::warn!(cycle, "unexpected engine.io open on established link");
                Ok(vec![])
            },
            EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => Ok(vec![]),
        }
    }

    /// Encode a command for the open link.
    ///
    /// # Errors
    /// Returns `NotConnected` unless the connection is `Open`; nothing is
    /// queued.
    pub fn send(&mut self, command: &ClientCommand) -> Result<Vec<ConnectionAction>, ConnectionError> {
        self.emit(command, None)
    }

    /// Encode a command that requests an acknowledgement.
    ///
    /// Returns the actions and the allocated ack id.
    ///
    /// # Errors
    /// Returns `NotConnected` unless the connection is `Open`.
    pub fn send_with_ack(
        &mut self,
        command: &ClientCommand,
    ) -> Result<(Vec<ConnectionAction>, u64), ConnectionError> {
        let ack_id = self.next_ack_id;
        let actions = self.emit(command, Some(ack_id))?;
        self.next_ack_id += 1;
        Ok((actions, ack_id))
    }

    /// Check timeouts.
    ///
    /// Call this periodically (e.g., every 250ms).
    pub fn tick(&mut self, now: Instant) -> Vec<ConnectionAction> {
        let cycle = self.cycle;
        match self.state {
            ConnectionState::Dialing | ConnectionState::Handshaking => {
                let timed_out = self.dial_started.is_some_and(|started| {
                    now.saturating_duration_since(started) > self.config.connect_timeout
                });
                if timed_out { self.link_failed(cycle, "timeout", now) } else { vec![] }
            },
            ConnectionState::Open => {
                let silent = match (self.last_activity, self.heartbeat_timeout) {
                    (Some(last), Some(limit)) => now.saturating_duration_since(last) > limit,
                    _ => false,
                };
                if silent { self.drop_open_link(DisconnectReason::PingTimeout) } else { vec![] }
            },
            _ => vec![],
        }
    }

    fn emit(
        &mut self,
        command: &ClientCommand,
        ack_id: Option<u64>,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.state != ConnectionState::Open {
            return Err(ConnectionError::NotConnected { state: self.state });
        }
        let packet = command.to_packet(ack_id)?;
        tracing::debug!(event = command.name(), ?ack_id, "emitting");
        Ok(vec![ConnectionAction::Send {
            cycle: self.cycle,
            packet: EnginePacket::Message(packet.encode()),
        }])
    }

    fn handle_socket_packet(
        &mut self,
        packet: &Packet,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        let cycle = self.cycle;
        match packet.kind {
            PacketKind::Connect if self.state == ConnectionState::Handshaking => {
                let sid = packet
                    .data
                    .as_ref()
                    .and_then(|d| d.get("sid"))
                    .and_then(|s| s.as_str())
                    .map(str::to_string);
                let transport = self.transport().unwrap_or(TransportKind::WebSocket);

                self.state = ConnectionState::Open;
                self.attempt = 0;
                self.dial_started = None;
                tracing::info!(cycle, %transport, ?sid, "connected");
                Ok(vec![ConnectionAction::Emit(TransportEvent::Connected { transport, sid })])
            },
            PacketKind::Connect => Ok(vec![]),
            PacketKind::ConnectError => {
                // Namespace refused: retrying the same request cannot succeed.
                let reason = ConnectErrorData::from_value(packet.data.as_ref()).message;
                tracing::warn!(cycle, %reason, "namespace connection refused");
                self.reset_link();
                self.state = ConnectionState::Closed;
                Ok(vec![
                    ConnectionAction::CloseLink { cycle },
                    ConnectionAction::Emit(TransportEvent::ConnectError { reason, terminal: true }),
                ])
            },
            PacketKind::Disconnect => {
                Ok(self.drop_open_link(DisconnectReason::IoServerDisconnect))
            },
            PacketKind::Event if self.state == ConnectionState::Open => {
                let event = match ServerEvent::from_packet(packet)? {
                    ServerEvent::Messages(batch) => TransportEvent::MessageBatch(batch),
                    ServerEvent::NewMessage(msg) => TransportEvent::MessageIncremental(msg),
                    ServerEvent::LoginSuccess(ok) => {
                        TransportEvent::LoginSucceeded { wallet: ok.wallet }
                    },
                    ServerEvent::Error(payload) => TransportEvent::ServerError(payload),
                    ServerEvent::Unknown { name } => {
                        tracing::debug!(%name, "ignoring unknown server event");
                        return Ok(vec![]);
                    },
                };
                Ok(vec![ConnectionAction::Emit(event)])
            },
            PacketKind::Ack if self.state == ConnectionState::Open => {
                Ok(vec![ConnectionAction::Emit(TransportEvent::Ack(Ack::from_packet(packet)?))])
            },
            PacketKind::Event | PacketKind::Ack => {
                tracing::warn!(cycle, kind = ?packet.kind, "packet before namespace connect");
                Ok(vec![])
            },
        }
    }

    fn drop_open_link(&mut self, reason: DisconnectReason) -> Vec<ConnectionAction> {
        let cycle = self.cycle;
        let reconnect = reason.should_reconnect();
        tracing::info!(cycle, %reason, reconnect, "disconnected");

        self.reset_link();
        let mut actions = vec![
            ConnectionAction::CloseLink { cycle },
            ConnectionAction::Emit(TransportEvent::Disconnected(reason)),
        ];

        if reconnect && self.config.max_reconnect_attempts > 0 {
            self.attempt = 0;
            self.state = ConnectionState::AwaitingRetry;
            actions.push(ConnectionAction::ScheduleRetry { cycle, delay: self.config.reconnect_delay });
        } else {
            self.state = ConnectionState::Closed;
        }
        actions
    }

    fn attempt_failed(&mut self, reason: String) -> Vec<ConnectionAction> {
        let cycle = self.cycle;
        self.reset_link();

        if self.attempt < self.config.max_reconnect_attempts {
            self.state = ConnectionState::AwaitingRetry;
            vec![
                ConnectionAction::Emit(TransportEvent::ConnectError { reason, terminal: false }),
                ConnectionAction::ScheduleRetry { cycle, delay: self.config.reconnect_delay },
            ]
        } else {
            tracing::warn!(cycle, attempts = self.attempt, "reconnection attempts exhausted");
            self.state = ConnectionState::Exhausted;
            vec![ConnectionAction::Emit(TransportEvent::ConnectError { reason, terminal: true })]
        }
    }

    fn begin_attempt(&mut self, now: Instant) -> Vec<ConnectionAction> {
        self.transport_index = 0;
        self.dial_current(now)
    }

    fn dial_current(&mut self, now: Instant) -> Vec<ConnectionAction> {
        let Some(transport) = self.config.preferred_transport_order.get(self.transport_index).copied()
        else {
            return self.attempt_failed("no transport available".into());
        };
        self.state = ConnectionState::Dialing;
        self.dial_started = Some(now);
        self.last_activity = None;
        self.heartbeat_timeout = None;
        vec![ConnectionAction::Dial {
            cycle: self.cycle,
            transport,
            endpoint: self.config.endpoint.clone(),
        }]
    }

    fn reset_link(&mut self) {
        self.transport_index = 0;
        self.dial_started = None;
        self.last_activity = None;
        self.heartbeat_timeout = None;
    }
}

#[cfg(test)]
mod tests {
    use zcret_proto::LoginRequest;

    use super::*;

    fn handshake() -> OpenHandshake {
        OpenHandshake {
            sid: "eio-1".into(),
            upgrades: vec![],
            ping_interval: 25_000,
            ping_timeout: 20_000,
            max_payload: None,
        }
    }

    fn connect_ack() -> EnginePacket {
        EnginePacket::Message(r#"0{"sid":"sock-1"}"#.into())
    }

    fn dials(actions: &[ConnectionAction]) -> Vec<TransportKind> {
        actions
            .iter()
            .filter_map(|a| match a {
                ConnectionAction::Dial { transport, .. } => Some(*transport),
                _ => None,
            })
            .collect()
    }

    fn events(actions: &[ConnectionAction]) -> Vec<TransportEvent> {
        actions
            .iter()
            .filter_map(|a| match a {
                ConnectionAction::Emit(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    /// Drive a fresh connection to `Open`.
    fn open_connection(config: ConnectionConfig, t0: Instant) -> Connection {
        let mut conn = Connection::new(config);
        conn.open(t0).unwrap();
        conn.link_opened(1, &handshake(), t0);
        conn.handle_packet(1, connect_ack(), t0).unwrap();
        assert_eq!(conn.state(), ConnectionState::Open);
        conn
    }

    #[test]
    fn connection_lifecycle() {
        let t0 = Instant::now();
        let mut conn = Connection::new(ConnectionConfig::default());
        assert_eq!(conn.state(), ConnectionState::Closed);

        let actions = conn.open(t0).unwrap();
        assert_eq!(dials(&actions), vec![TransportKind::WebSocket]);
        assert_eq!(conn.state(), ConnectionState::Dialing);

        let actions = conn.link_opened(1, &handshake(), t0);
        assert_eq!(actions, vec![ConnectionAction::Send {
            cycle: 1,
            packet: EnginePacket::Message("0".into())
        }]);
        assert_eq!(conn.state(), ConnectionState::Handshaking);

        let actions = conn.handle_packet(1, connect_ack(), t0).unwrap();
        assert_eq!(events(&actions), vec![TransportEvent::Connected {
            transport: TransportKind::WebSocket,
            sid: Some("sock-1".into()),
        }]);
        assert!(conn.is_open());

        let actions = conn.close();
        assert!(actions.contains(&ConnectionAction::CloseLink { cycle: 1 }));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn open_rejects_unusable_config() {
        let mut conn = Connection::new(ConnectionConfig {
            preferred_transport_order: vec![],
            ..Default::default()
        });
        assert!(matches!(conn.open(Instant::now()), Err(ConnectionError::TransportInit(_))));

        let mut conn = Connection::new(ConnectionConfig {
            endpoint: "ftp://example.com".into(),
            ..Default::default()
        });
        assert!(matches!(conn.open(Instant::now()), Err(ConnectionError::TransportInit(_))));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn falls_back_to_polling_without_event() {
        let t0 = Instant::now();
        let mut conn = Connection::new(ConnectionConfig::default());
        conn.open(t0).unwrap();

        let actions = conn.link_failed(1, "websocket refused", t0);
        assert_eq!(dials(&actions), vec![TransportKind::Polling]);
        assert!(events(&actions).is_empty());
        assert_eq!(conn.attempt(), 1);

        conn.link_opened(1, &handshake(), t0);
        let actions = conn.handle_packet(1, connect_ack(), t0).unwrap();
        assert!(matches!(
            events(&actions).as_slice(),
            [TransportEvent::Connected { transport: TransportKind::Polling, .. }]
        ));
    }

    #[test]
    fn fallback_order_is_configurable() {
        let t0 = Instant::now();
        let mut conn = Connection::new(ConnectionConfig {
            preferred_transport_order: vec![TransportKind::Polling, TransportKind::WebSocket],
            ..Default::default()
        });
        assert_eq!(dials(&conn.open(t0).unwrap()), vec![TransportKind::Polling]);
        assert_eq!(dials(&conn.link_failed(1, "down", t0)), vec![TransportKind::WebSocket]);
    }

    #[test]
    fn retries_are_bounded() {
        let t0 = Instant::now();
        let config = ConnectionConfig {
            max_reconnect_attempts: 5,
            preferred_transport_order: vec![TransportKind::WebSocket],
            ..Default::default()
        };
        let delay = config.reconnect_delay;
        let mut conn = Connection::new(config);
        conn.open(t0).unwrap();

        let mut connect_errors = 0;
        let mut dial_count = 1;
        for attempt in 1..=5 {
            let actions = conn.link_failed(1, "refused", t0);
            connect_errors += events(&actions)
                .iter()
                .filter(|e| matches!(e, TransportEvent::ConnectError { .. }))
                .count();

            if attempt < 5 {
                assert!(actions.contains(&ConnectionAction::ScheduleRetry { cycle: 1, delay }));
                assert!(events(&actions).contains(&TransportEvent::ConnectError {
                    reason: "refused".into(),
                    terminal: false,
                }));
                dial_count += dials(&conn.retry_elapsed(1, t0)).len();
            } else {
                assert!(events(&actions).contains(&TransportEvent::ConnectError {
                    reason: "refused".into(),
                    terminal: true,
                }));
                assert!(
                    !actions.iter().any(|a| matches!(a, ConnectionAction::ScheduleRetry { .. }))
                );
            }
        }

        assert_eq!(connect_errors, 5);
        assert_eq!(dial_count, 5);
        assert_eq!(conn.state(), ConnectionState::Exhausted);
        assert!(conn.retry_elapsed(1, t0).is_empty());
        assert!(conn.tick(t0 + Duration::from_secs(60)).is_empty());

        // Only an explicit open starts over.
        let actions = conn.open(t0).unwrap();
        assert_eq!(dials(&actions), vec![TransportKind::WebSocket]);
        assert_eq!(conn.cycle(), 2);
    }

    #[test]
    fn close_is_idempotent() {
        let t0 = Instant::now();
        let mut conn = open_connection(ConnectionConfig::default(), t0);

        let first = conn.close();
        assert_eq!(first.len(), 2);
        assert!(conn.close().is_empty());
        assert!(conn.close().is_empty());
    }

    #[test]
    fn close_cancels_pending_retry() {
        let t0 = Instant::now();
        let mut conn = Connection::new(ConnectionConfig {
            preferred_transport_order: vec![TransportKind::WebSocket],
            ..Default::default()
        });
        conn.open(t0).unwrap();
        conn.link_failed(1, "refused", t0);
        assert_eq!(conn.state(), ConnectionState::AwaitingRetry);

        assert_eq!(conn.close(), vec![ConnectionAction::CancelRetry { cycle: 1 }]);
        assert!(conn.retry_elapsed(1, t0).is_empty());
    }

    #[test]
    fn stale_cycle_inputs_are_ignored() {
        let t0 = Instant::now();
        let mut conn = Connection::new(ConnectionConfig::default());
        conn.open(t0).unwrap();
        conn.close();
        conn.open(t0).unwrap();
        assert_eq!(conn.cycle(), 2);

        assert!(conn.link_opened(1, &handshake(), t0).is_empty());
        assert!(conn.link_failed(1, "late", t0).is_empty());
        assert!(!conn.accepts(1));
        assert!(conn.accepts(2));
        assert_eq!(conn.state(), ConnectionState::Dialing);
    }

    #[test]
    fn replacement_connection_continues_cycles() {
        let t0 = Instant::now();
        let mut conn = Connection::after_cycle(ConnectionConfig::default(), 7);
        let actions = conn.open(t0).unwrap();

        assert!(matches!(actions.as_slice(), [ConnectionAction::Dial { cycle: 8, .. }]));
        assert!(!conn.accepts(7));
    }

    #[test]
    fn send_requires_open() {
        let t0 = Instant::now();
        let mut conn = Connection::new(ConnectionConfig::default());
        let login = ClientCommand::Login(LoginRequest { wallet: "W".into() });

        assert!(matches!(
            conn.send_with_ack(&login),
            Err(ConnectionError::NotConnected { state: ConnectionState::Closed })
        ));

        conn.open(t0).unwrap();
        assert!(conn.send(&login).is_err());
    }

    #[test]
    fn ack_ids_increase_per_cycle() {
        let t0 = Instant::now();
        let mut conn = open_connection(ConnectionConfig::default(), t0);

        let (actions, first) = conn.send_with_ack(&ClientCommand::FetchMessages).unwrap();
        let plain = conn.send(&ClientCommand::FetchMessages).unwrap();
        let (_, second) = conn.send_with_ack(&ClientCommand::FetchMessages).unwrap();

        assert_eq!((first, second), (0, 1));
        assert_eq!(actions, vec![ConnectionAction::Send {
            cycle: 1,
            packet: EnginePacket::Message(r#"20["fetch_messages"]"#.into()),
        }]);
        assert_eq!(plain, vec![ConnectionAction::Send {
            cycle: 1,
            packet: EnginePacket::Message(r#"2["fetch_messages"]"#.into()),
        }]);
    }

    #[test]
    fn answers_ping_with_pong() {
        let t0 = Instant::now();
        let mut conn = open_connection(ConnectionConfig::default(), t0);

        let actions = conn.handle_packet(1, EnginePacket::Ping(String::new()), t0).unwrap();
        assert_eq!(actions, vec![ConnectionAction::Send {
            cycle: 1,
            packet: EnginePacket::Pong(String::new())
        }]);
    }

    #[test]
    fn heartbeat_timeout_disconnects_and_retries() {
        let t0 = Instant::now();
        let mut conn = open_connection(ConnectionConfig::default(), t0);

        // Heartbeat limit is 25s + 20s.
        assert!(conn.tick(t0 + Duration::from_secs(40)).is_empty());
        conn.handle_packet(1, EnginePacket::Ping(String::new()), t0 + Duration::from_secs(40))
            .unwrap();
        assert!(conn.tick(t0 + Duration::from_secs(80)).is_empty());

        let actions = conn.tick(t0 + Duration::from_secs(86));
        assert!(events(&actions).contains(&TransportEvent::Disconnected(
            DisconnectReason::PingTimeout
        )));
        assert!(actions.iter().any(|a| matches!(a, ConnectionAction::ScheduleRetry { .. })));
        assert_eq!(conn.state(), ConnectionState::AwaitingRetry);
    }

    #[test]
    fn connect_timeout_fails_the_dial() {
        let t0 = Instant::now();
        let config = ConnectionConfig {
            connect_timeout: Duration::from_secs(20),
            ..Default::default()
        };
        let mut conn = Connection::new(config);
        conn.open(t0).unwrap();

        assert!(conn.tick(t0 + Duration::from_secs(20)).is_empty());
        let actions = conn.tick(t0 + Duration::from_secs(21));
        assert_eq!(dials(&actions), vec![TransportKind::Polling]);

        // The polling dial gets its own timeout window.
        assert!(conn.tick(t0 + Duration::from_secs(30)).is_empty());
        let actions = conn.tick(t0 + Duration::from_secs(42));
        assert!(events(&actions).iter().any(|e| matches!(
            e,
            TransportEvent::ConnectError { reason, terminal: false } if reason == "timeout"
        )));
    }

    #[test]
    fn server_disconnect_does_not_reconnect() {
        let t0 = Instant::now();
        let mut conn = open_connection(ConnectionConfig::default(), t0);

        let actions = conn.handle_packet(1, EnginePacket::Message("1".into()), t0).unwrap();
        assert!(events(&actions).contains(&TransportEvent::Disconnected(
            DisconnectReason::IoServerDisconnect
        )));
        assert!(!actions.iter().any(|a| matches!(a, ConnectionAction::ScheduleRetry { .. })));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn lost_link_reconnects_with_fresh_attempts() {
        let t0 = Instant::now();
        let mut conn = open_connection(ConnectionConfig::default(), t0);

        let actions = conn.link_lost(1, DisconnectReason::TransportClose, t0);
        assert!(events(&actions).contains(&TransportEvent::Disconnected(
            DisconnectReason::TransportClose
        )));
        let actions = conn.retry_elapsed(1, t0 + Duration::from_secs(1));
        assert_eq!(dials(&actions), vec![TransportKind::WebSocket]);
        assert_eq!(conn.attempt(), 1);
    }

    #[test]
    fn namespace_refusal_is_terminal() {
        let t0 = Instant::now();
        let mut conn = Connection::new(ConnectionConfig::default());
        conn.open(t0).unwrap();
        conn.link_opened(1, &handshake(), t0);

        let refusal = EnginePacket::Message(r#"4{"message":"Not authorized"}"#.into());
        let actions = conn.handle_packet(1, refusal, t0).unwrap();
        assert!(events(&actions).contains(&TransportEvent::ConnectError {
            reason: "Not authorized".into(),
            terminal: true,
        }));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn demultiplexes_server_events() {
        let t0 = Instant::now();
        let mut conn = open_connection(ConnectionConfig::default(), t0);
        let mut feed = |text: &str| {
            events(&conn.handle_packet(1, EnginePacket::Message(text.into()), t0).unwrap())
        };

        assert!(matches!(
            feed(r#"2["messages",[]]"#).as_slice(),
            [TransportEvent::MessageBatch(batch)] if batch.entries.is_empty()
        ));
        assert!(matches!(
            feed(r#"2["new_message",{"sender":"A","content":"x","created_at":"2024-01-01T00:00:00Z"}]"#)
                .as_slice(),
            [TransportEvent::MessageIncremental(_)]
        ));
        assert_eq!(feed(r#"2["login_success",{"wallet":"W"}]"#), vec![
            TransportEvent::LoginSucceeded { wallet: "W".into() }
        ]);
        assert_eq!(feed(r#"2["error",{"code":1}]"#), vec![TransportEvent::ServerError(
            ServerErrorPayload::Opaque(r#"{"code":1}"#.into())
        )]);
        assert_eq!(feed(r#"30["ok"]"#), vec![TransportEvent::Ack(Ack {
            id: 0,
            args: vec![serde_json::json!("ok")]
        })]);
        assert!(feed(r#"2["typing"]"#).is_empty());
    }

    #[test]
    fn malformed_packet_is_an_error_but_keeps_link() {
        let t0 = Instant::now();
        let mut conn = open_connection(ConnectionConfig::default(), t0);

        let result = conn.handle_packet(1, EnginePacket::Message("2{oops".into()), t0);
        assert!(matches!(result, Err(ConnectionError::Protocol(_))));
        assert!(conn.is_open());
    }
}
