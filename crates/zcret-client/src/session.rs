//! Session controller state machine.
//!
//! The [`Session`] reacts to identity changes, drives a
//! [`zcret_core::Connection`] for the connected account, and turns transport
//! events into session state, message store updates and diagnostic entries.
//!
//! # Architecture: Action-Based State Machine
//!
//! Like the connection underneath it, the session performs no I/O. Each input
//! (identity change, link result, received packet, tick) returns
//! [`SessionAction`]s for the runtime to execute. Events the connection emits
//! are consumed internally; only I/O and ack routing leave the session.
//!
//! # State Machine
//!
//! ```text
//! Idle ──identity──> Connecting ──connected──> Connected ──login ack──> Authenticated
//!  ^                     │                        │                           │
//!  │                     └── connect error ──> Errored <── server error ──────┤
//!  │                                              │                           │
//!  │                                              └──────── connected ──> Connected
//!  │                                                                          │
//!  └──────────── identity disconnected (from any state) ─── Disconnected <────┘
//! ```

use std::{collections::VecDeque, fmt, time::Duration};

use serde_json::Value;
use zcret_core::{
    ChatMessage, Connection, ConnectionAction, ConnectionConfig, ConnectionState, DiagnosticLog,
    DisconnectReason, Environment, IncomingMessage, MessageStore, StoreConfig, TransportEvent,
    TransportKind, batch_message_id, diagnostics::DEFAULT_CAPACITY,
};
use zcret_proto::{
    ClientCommand, EnginePacket, LoginRequest, OpenHandshake, SendMessageRequest,
    ServerErrorPayload,
};

use crate::{
    error::{SessionError, ValidationError},
    identity::Identity,
};

/// Characters of outgoing text shown in the diagnostic trace.
const SEND_PREVIEW_CHARS: usize = 20;

/// Characters of a sender id shown in the diagnostic trace.
const SENDER_PREVIEW_CHARS: usize = 6;

/// Why the session is errored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    /// Connection attempt failed
    Connect(String),
    /// Server reported an error
    Server(ServerErrorPayload),
    /// Identity or configuration unusable
    Config(String),
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(reason) => write!(f, "connect: {reason}"),
            Self::Server(payload) => write!(f, "server: {payload}"),
            Self::Config(reason) => write!(f, "config: {reason}"),
        }
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No identity connected
    Idle,
    /// Transport connection in progress
    Connecting,
    /// Socket connected, login pending
    Connected,
    /// Login confirmed or history received
    Authenticated,
    /// Link lost, reconnection handled by the connection
    Disconnected,
    /// Last attempt or server interaction failed
    Errored(SessionFailure),
}

impl SessionState {
    /// Whether outgoing messages can be sent.
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Connected | Self::Authenticated)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Authenticated => f.write_str("authenticated"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::Errored(failure) => write!(f, "errored ({failure})"),
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Template for every connection cycle
    pub connection: ConnectionConfig,
    /// Message store limits
    pub store: StoreConfig,
    /// Diagnostic entries retained
    pub diagnostics_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            store: StoreConfig::default(),
            diagnostics_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Actions returned by the session for the runtime to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Dial the server and report back with `cycle`
    Dial {
        /// Connection cycle
        cycle: u64,
        /// Transport to use
        transport: TransportKind,
        /// Server base URL
        endpoint: String,
    },
    /// Send a packet on the link of `cycle`
    Send {
        /// Connection cycle
        cycle: u64,
        /// Packet to send
        packet: EnginePacket,
    },
    /// Close the link of `cycle`
    CloseLink {
        /// Connection cycle
        cycle: u64,
    },
    /// Call [`Session::retry_elapsed`] after `delay`
    ScheduleRetry {
        /// Connection cycle
        cycle: u64,
        /// Wait before retrying
        delay: Duration,
    },
    /// Drop a scheduled retry
    CancelRetry {
        /// Connection cycle
        cycle: u64,
    },
    /// The server acknowledged a command
    Acknowledged {
        /// Ack id returned when the command was sent
        id: u64,
        /// Reply arguments
        args: Vec<Value>,
    },
    /// Outstanding acks will never arrive (link gone)
    ReleaseAcks,
}

/// Chat session controller.
///
/// Owns the message store, the diagnostic log, and the connection for the
/// currently connected identity.
#[derive(Debug)]
pub struct Session<E: Environment> {
    env: E,
    config: SessionConfig,
    state: SessionState,
    connection: Option<Connection>,
    account: Option<String>,
    status: Option<String>,
    transport: Option<TransportKind>,
    store: MessageStore,
    log: DiagnosticLog,
    login_ack: Option<u64>,
    /// Last cycle handed out, carried across replaced connections
    last_cycle: u64,
}

impl<E: Environment> Session<E> {
    /// Create an idle session.
    pub fn new(env: E, config: SessionConfig) -> Self {
        let store = MessageStore::new(config.store);
        let log = DiagnosticLog::new(config.diagnostics_capacity);
        Self {
            env,
            config,
            state: SessionState::Idle,
            connection: None,
            account: None,
            status: None,
            transport: None,
            store,
            log,
            login_ack: None,
            last_cycle: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Last connection or server error, cleared on connect.
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Stored messages in canonical order.
    pub fn messages(&self) -> &[ChatMessage] {
        self.store.query()
    }

    /// The message store.
    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// The diagnostic log.
    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.log
    }

    /// Drop all diagnostic entries.
    pub fn clear_diagnostics(&mut self) {
        self.log.clear();
    }

    /// Connected account, if any.
    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    /// Transport of the current link, if connected.
    pub fn transport(&self) -> Option<TransportKind> {
        self.transport
    }

    /// State of the underlying connection, if one exists.
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.connection.as_ref().map(Connection::state)
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether link results for `cycle` are still wanted.
    pub fn accepts(&self, cycle: u64) -> bool {
        self.connection.as_ref().is_some_and(|c| c.accepts(cycle))
    }

    /// React to the identity provider.
    pub fn identity_changed(&mut self, identity: &Identity) -> Vec<SessionAction> {
        if !identity.connected {
            return self.disconnect_identity();
        }

        let account = match identity.validated_account() {
            Ok(account) => account.to_string(),
            Err(reason) => {
                let actions = self.close_connection();
                self.account = None;
                self.fail_config(reason);
                return actions;
            },
        };

        let running = self.connection.as_ref().is_some_and(|c| {
            !matches!(c.state(), ConnectionState::Closed | ConnectionState::Exhausted)
        });
        if running && self.account.as_deref() == Some(account.as_str()) {
            return vec![];
        }

        if let Some(previous) = &self.account {
            if *previous != account {
                tracing::info!(from = %previous, to = %account, "switching account");
            }
        }
        let mut actions = self.close_connection();
        self.account = Some(account);
        actions.extend(self.start_cycle());
        actions
    }

    /// The transport for `cycle` completed its handshake.
    pub fn link_opened(&mut self, cycle: u64, handshake: &OpenHandshake) -> Vec<SessionAction> {
        let now = self.env.now();
        self.drive(|conn| conn.link_opened(cycle, handshake, now))
    }

    /// Dialing `cycle` failed.
    pub fn link_failed(&mut self, cycle: u64, reason: &str) -> Vec<SessionAction> {
        let now = self.env.now();
        self.drive(|conn| conn.link_failed(cycle, reason, now))
    }

    /// The link of `cycle` went away.
    pub fn link_lost(&mut self, cycle: u64, reason: DisconnectReason) -> Vec<SessionAction> {
        let now = self.env.now();
        self.drive(|conn| conn.link_lost(cycle, reason, now))
    }

    /// The retry timer of `cycle` fired.
    pub fn retry_elapsed(&mut self, cycle: u64) -> Vec<SessionAction> {
        let now = self.env.now();
        let actions = self.drive(|conn| conn.retry_elapsed(cycle, now));
        if let Some(conn) = &self.connection {
            if !actions.is_empty() && conn.state() == ConnectionState::Dialing {
                let attempt = conn.attempt();
                self.trace(format!("Reconnect attempt {attempt}"));
            }
        }
        actions
    }

    /// A packet arrived on the link of `cycle`.
    pub fn handle_packet(&mut self, cycle: u64, packet: EnginePacket) -> Vec<SessionAction> {
        let now = self.env.now();
        let Some(conn) = self.connection.as_mut() else {
            return vec![];
        };
        match conn.handle_packet(cycle, packet, now) {
            Ok(actions) => self.absorb(actions),
            Err(e) => {
                tracing::warn!(cycle, error = %e, "dropping malformed packet");
                self.trace(format!("Dropped malformed packet: {e}"));
                vec![]
            },
        }
    }

    /// Check connection timeouts.
    pub fn tick(&mut self) -> Vec<SessionAction> {
        let now = self.env.now();
        self.drive(|conn| conn.tick(now))
    }

    /// Send chat text.
    ///
    /// Returns the actions and the ack id of the `send_message` event. The
    /// message store is not touched; the message appears once the server
    /// broadcasts it back.
    ///
    /// # Errors
    ///
    /// - `Validation` if the text is blank or no identity is connected
    /// - `NotConnected` unless the session is connected or authenticated
    pub fn submit(&mut self, text: &str) -> Result<(Vec<SessionAction>, u64), SessionError> {
        match self.try_submit(text) {
            Ok(sent) => Ok(sent),
            Err(e) => {
                self.trace(format!("Send rejected: {e}"));
                Err(e)
            },
        }
    }

    /// Full teardown: close the transport and clear the message store.
    pub fn shutdown(&mut self) -> Vec<SessionAction> {
        let actions = self.close_connection();
        self.store.clear();
        self.account = None;
        self.status = None;
        self.set_state(SessionState::Idle);
        actions
    }

    fn try_submit(&mut self, text: &str) -> Result<(Vec<SessionAction>, u64), SessionError> {
        let content = text.trim();
        if content.is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }
        let Some(wallet) = self.account.clone() else {
            return Err(ValidationError::MissingIdentity.into());
        };
        if !self.state.is_online() {
            return Err(SessionError::NotConnected { state: self.state.clone() });
        }
        let Some(conn) = self.connection.as_mut() else {
            return Err(SessionError::NotConnected { state: self.state.clone() });
        };

        let command = ClientCommand::SendMessage(SendMessageRequest {
            wallet,
            content: content.to_string(),
        });
        let (actions, ack_id) = conn.send_with_ack(&command)?;
        self.trace(format!("Sending message: {}", preview(content, SEND_PREVIEW_CHARS)));
        Ok((self.absorb(actions), ack_id))
    }

    fn disconnect_identity(&mut self) -> Vec<SessionAction> {
        if self.state == SessionState::Idle && self.connection.is_none() {
            return vec![];
        }
        let actions = self.close_connection();
        self.account = None;
        self.status = None;
        self.set_state(SessionState::Idle);
        actions
    }

    fn start_cycle(&mut self) -> Vec<SessionAction> {
        let mut conn = Connection::after_cycle(self.config.connection.clone(), self.last_cycle);
        match conn.open(self.env.now()) {
            Ok(actions) => {
                self.last_cycle = conn.cycle();
                self.trace("Attempting to connect...");
                self.connection = Some(conn);
                self.status = None;
                self.set_state(SessionState::Connecting);
                self.absorb(actions)
            },
            Err(e) => {
                self.fail_config(e.to_string());
                vec![]
            },
        }
    }

    /// Close and drop the connection. Runs at most once per connection.
    fn close_connection(&mut self) -> Vec<SessionAction> {
        let Some(mut conn) = self.connection.take() else {
            return vec![];
        };
        self.trace("Disconnecting socket");
        self.transport = None;
        self.login_ack = None;

        let mut actions = self.absorb(conn.close());
        actions.push(SessionAction::ReleaseAcks);
        actions
    }

    fn fail_config(&mut self, reason: String) {
        tracing::warn!(%reason, "session configuration rejected");
        self.trace(format!("Socket initialization error: {reason}"));
        self.status = Some(format!("Failed to initialize socket: {reason}"));
        self.set_state(SessionState::Errored(SessionFailure::Config(reason)));
    }

    fn drive(
        &mut self,
        step: impl FnOnce(&mut Connection) -> Vec<ConnectionAction>,
    ) -> Vec<SessionAction> {
        let Some(conn) = self.connection.as_mut() else {
            return vec![];
        };
        let actions = step(conn);
        self.absorb(actions)
    }

    /// Execute emitted events and translate the rest into session actions.
    fn absorb(&mut self, actions: Vec<ConnectionAction>) -> Vec<SessionAction> {
        let mut pending: VecDeque<ConnectionAction> = actions.into();
        let mut out = Vec::new();

        while let Some(action) = pending.pop_front() {
            match action {
                ConnectionAction::Dial { cycle, transport, endpoint } => {
                    out.push(SessionAction::Dial { cycle, transport, endpoint });
                },
                ConnectionAction::Send { cycle, packet } => {
                    out.push(SessionAction::Send { cycle, packet });
                },
                ConnectionAction::CloseLink { cycle } => {
                    out.push(SessionAction::CloseLink { cycle });
                },
                ConnectionAction::ScheduleRetry { cycle, delay } => {
                    out.push(SessionAction::ScheduleRetry { cycle, delay });
                },
                ConnectionAction::CancelRetry { cycle } => {
                    out.push(SessionAction::CancelRetry { cycle });
                },
                ConnectionAction::Emit(event) => {
                    pending.extend(self.on_event(event, &mut out));
                },
            }
        }
        out
    }

    /// Apply one transport event. Returns follow-up connection actions.
    fn on_event(
        &mut self,
        event: TransportEvent,
        out: &mut Vec<SessionAction>,
    ) -> Vec<ConnectionAction> {
        match event {
            TransportEvent::Connected { transport, sid } => {
                tracing::info!(%transport, ?sid, "session connected");
                self.transport = Some(transport);
                self.status = None;
                self.set_state(SessionState::Connected);
                self.trace("Socket connected");
                return self.request_login_and_history();
            },
            TransportEvent::ConnectError { reason, terminal } => {
                self.transport = None;
                self.trace(format!("Socket connection error: {reason}"));
                self.status = Some(format!("Connection error: {reason}"));
                if terminal {
                    self.login_ack = None;
                    out.push(SessionAction::ReleaseAcks);
                    if self.connection_state() == Some(ConnectionState::Exhausted) {
                        self.trace("Reconnection attempts exhausted");
                    }
                }
                if self.state != SessionState::Idle {
                    self.set_state(SessionState::Errored(SessionFailure::Connect(reason)));
                }
            },
            TransportEvent::Disconnected(reason) => {
                self.transport = None;
                self.login_ack = None;
                self.trace(format!("Socket disconnected: {}", reason.as_str()));
                out.push(SessionAction::ReleaseAcks);
                if matches!(
                    self.state,
                    SessionState::Connecting | SessionState::Connected | SessionState::Authenticated
                ) {
                    self.set_state(SessionState::Disconnected);
                }
            },
            TransportEvent::MessageBatch(batch) => {
                for rejected in &batch.rejected {
                    tracing::warn!(
                        index = rejected.index,
                        reason = %rejected.reason,
                        "skipping malformed history entry"
                    );
                    self.trace(format!(
                        "Skipped malformed message at index {}: {}",
                        rejected.index, rejected.reason
                    ));
                }
                // Positional ids follow the batch as sent, skipped entries included.
                let batch = batch
                    .entries
                    .into_iter()
                    .map(|entry| {
                        let mut message = IncomingMessage::from_wire(entry.message);
                        if message.id.is_none() {
                            message.id = Some(batch_message_id(entry.index));
                        }
                        message
                    })
                    .collect();
                let count = self.store.ingest_batch(batch);
                self.trace(format!("Received {count} messages"));
                self.authenticate();
            },
            TransportEvent::MessageIncremental(wire) => {
                self.trace(format!(
                    "Received new message from {}...",
                    wire.sender.chars().take(SENDER_PREVIEW_CHARS).collect::<String>()
                ));
                let received_at = self.env.wall_clock();
                self.store.ingest_incremental(IncomingMessage::from_wire(wire), received_at);
            },
            TransportEvent::LoginSucceeded { wallet } => {
                self.trace(format!("Login successful for wallet: {wallet}"));
                self.authenticate();
            },
            TransportEvent::ServerError(payload) => {
                tracing::warn!(%payload, "server reported error");
                self.trace(format!("Socket error: {payload}"));
                self.status = Some(format!("Server error: {payload}"));
                if self.state != SessionState::Idle {
                    self.set_state(SessionState::Errored(SessionFailure::Server(payload)));
                }
            },
            TransportEvent::Ack(ack) => {
                if self.login_ack == Some(ack.id) {
                    self.login_ack = None;
                    self.authenticate();
                }
                out.push(SessionAction::Acknowledged { id: ack.id, args: ack.args });
            },
        }
        vec![]
    }

    fn request_login_and_history(&mut self) -> Vec<ConnectionAction> {
        let Some(wallet) = self.account.clone() else {
            return vec![];
        };
        let mut actions = Vec::new();

        self.trace(format!("Emitting login with wallet: {wallet}"));
        let login = ClientCommand::Login(LoginRequest { wallet });
        match self.connection.as_mut().map(|conn| conn.send_with_ack(&login)) {
            Some(Ok((sent, ack_id))) => {
                self.login_ack = Some(ack_id);
                actions.extend(sent);
            },
            Some(Err(e)) => tracing::warn!(error = %e, "login not sent"),
            None => return actions,
        }

        self.trace("Requesting messages");
        match self.connection.as_mut().map(|conn| conn.send_with_ack(&ClientCommand::FetchMessages)) {
            Some(Ok((sent, _))) => actions.extend(sent),
            Some(Err(e)) => tracing::warn!(error = %e, "history request not sent"),
            None => {},
        }
        actions
    }

    fn authenticate(&mut self) {
        if self.state == SessionState::Connected {
            self.set_state(SessionState::Authenticated);
        }
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "session state");
            self.state = state;
        }
    }

    fn trace(&mut self, text: impl Into<String>) {
        self.log.append(self.env.wall_clock(), text);
    }
}

/// First `limit` characters, with an ellipsis when truncated.
fn preview(text: &str, limit: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(limit).collect();
    if chars.next().is_some() { format!("{head}...") } else { head }
}
