//! World state for scenario execution.
//!
//! The World owns one session and the scripted server and executes every
//! session action synchronously: dials are accepted or refused on the spot,
//! sent packets are answered immediately, and scheduled retries fire as soon
//! as the current step settles. Everything observable is recorded for the
//! oracle.

use std::{collections::VecDeque, time::Duration};

use serde_json::Value;
use zcret_client::{Identity, Session, SessionAction, SessionConfig, SessionError};
use zcret_core::{DisconnectReason, TransportKind};
use zcret_proto::{EnginePacket, ServerEvent};

use crate::{sim_env::SimEnv, sim_server::SimServer};

/// Guard against a session that keeps rescheduling forever.
const MAX_RETRIES_PER_STEP: usize = 64;

/// Observable occurrence during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    /// A dial was attempted
    Dialed {
        /// Connection cycle
        cycle: u64,
        /// Transport used
        transport: TransportKind,
        /// Whether the server accepted it
        accepted: bool,
    },
    /// The session asked for a retry after `delay`
    RetryScheduled {
        /// Requested delay
        delay: Duration,
    },
    /// The session cancelled its pending retry
    RetryCancelled,
    /// The session closed a link
    LinkClosed {
        /// Connection cycle
        cycle: u64,
    },
    /// The server acknowledged an event
    Acknowledged {
        /// Ack id
        id: u64,
        /// Reply arguments
        args: Vec<Value>,
    },
    /// Pending acknowledgements were released
    AcksReleased,
}

/// World state containing the session, the server and what happened.
pub struct World {
    env: SimEnv,
    session: Session<SimEnv>,
    server: SimServer,
    /// Cycle whose link is open on the server side
    link: Option<u64>,
    retry: Option<u64>,
    events: Vec<WorldEvent>,
    packets_sent: usize,
    packets_received: usize,
    submissions: Vec<Result<u64, SessionError>>,
}

impl World {
    /// Create a world around a fresh session.
    pub fn new(server: SimServer, config: SessionConfig) -> Self {
        let env = SimEnv::new();
        Self {
            session: Session::new(env.clone(), config),
            env,
            server,
            link: None,
            retry: None,
            events: Vec::new(),
            packets_sent: 0,
            packets_received: 0,
            submissions: Vec::new(),
        }
    }

    /// The session under test.
    pub fn session(&self) -> &Session<SimEnv> {
        &self.session
    }

    /// The scripted server.
    pub fn server(&self) -> &SimServer {
        &self.server
    }

    /// Simulated environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Everything recorded so far.
    pub fn events(&self) -> &[WorldEvent] {
        &self.events
    }

    /// Packets the session sent to the server.
    pub fn packets_sent(&self) -> usize {
        self.packets_sent
    }

    /// Packets the server delivered to the session.
    pub fn packets_received(&self) -> usize {
        self.packets_received
    }

    /// Result of every submission, in order.
    pub fn submissions(&self) -> &[Result<u64, SessionError>] {
        &self.submissions
    }

    /// Diagnostic log text, oldest first.
    pub fn diagnostics(&self) -> Vec<String> {
        self.session.diagnostics().snapshot().into_iter().map(|e| e.text).collect()
    }

    /// Number of dials attempted.
    pub fn dial_count(&self) -> usize {
        self.events.iter().filter(|e| matches!(e, WorldEvent::Dialed { .. })).count()
    }

    /// Delays of every scheduled retry.
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.events
            .iter()
            .filter_map(|e| match e {
                WorldEvent::RetryScheduled { delay } => Some(*delay),
                _ => None,
            })
            .collect()
    }

    /// Ack replies received, in order.
    pub fn acks(&self) -> Vec<(u64, Vec<Value>)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                WorldEvent::Acknowledged { id, args } => Some((*id, args.clone())),
                _ => None,
            })
            .collect()
    }

    /// Feed an identity change.
    pub fn set_identity(&mut self, identity: &Identity) {
        let actions = self.session.identity_changed(identity);
        self.settle(actions);
    }

    /// Submit chat text, recording the outcome.
    pub fn submit(&mut self, text: &str) {
        match self.session.submit(text) {
            Ok((actions, id)) => {
                self.submissions.push(Ok(id));
                self.settle(actions);
            },
            Err(e) => self.submissions.push(Err(e)),
        }
    }

    /// Push an event from the server.
    pub fn push(&mut self, event: &ServerEvent) {
        if let Some(packet) = self.server.emit(event) {
            self.deliver(packet);
        }
    }

    /// Have another account post a message.
    pub fn post(&mut self, sender: &str, content: &str) {
        if let Some(packet) = self.server.post(sender, content) {
            self.deliver(packet);
        }
    }

    /// Server pings the client.
    pub fn ping(&mut self) {
        let packet = self.server.ping();
        self.deliver(packet);
    }

    /// Server disconnects the client from the namespace.
    pub fn server_disconnect(&mut self) {
        let packet = self.server.disconnect_client();
        self.deliver(packet);
    }

    /// The link breaks underneath the session.
    pub fn drop_link(&mut self) {
        self.server.drop_link();
        if let Some(cycle) = self.link.take() {
            let actions = self.session.link_lost(cycle, DisconnectReason::TransportClose);
            self.settle(actions);
        }
    }

    /// Advance simulated time and run the timeout checks.
    pub fn advance(&mut self, by: Duration) {
        self.env.advance(by);
        let actions = self.session.tick();
        self.settle(actions);
    }

    /// Full teardown.
    pub fn shutdown(&mut self) {
        let actions = self.session.shutdown();
        self.settle(actions);
    }

    fn deliver(&mut self, packet: EnginePacket) {
        if let Some(cycle) = self.link {
            self.packets_received += 1;
            let actions = self.session.handle_packet(cycle, packet);
            self.settle(actions);
        }
    }

    /// Execute actions, then fire pending retries until none is left.
    fn settle(&mut self, actions: Vec<SessionAction>) {
        self.execute(actions);
        for _ in 0..MAX_RETRIES_PER_STEP {
            let Some(cycle) = self.retry.take() else {
                return;
            };
            let actions = self.session.retry_elapsed(cycle);
            self.execute(actions);
        }
        tracing::warn!("retry limit reached while settling");
    }

    fn execute(&mut self, actions: Vec<SessionAction>) {
        let mut queue: VecDeque<SessionAction> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                SessionAction::Dial { cycle, transport, .. } => {
                    let next = match self.server.accept(transport) {
                        Ok(handshake) => {
                            self.events.push(WorldEvent::Dialed { cycle, transport, accepted: true });
                            self.link = Some(cycle);
                            self.session.link_opened(cycle, &handshake)
                        },
                        Err(e) => {
                            self.events.push(WorldEvent::Dialed {
                                cycle,
                                transport,
                                accepted: false,
                            });
                            self.session.link_failed(cycle, &e.to_string())
                        },
                    };
                    queue.extend(next);
                },
                SessionAction::Send { cycle, packet } => {
                    if self.link != Some(cycle) {
                        continue;
                    }
                    self.packets_sent += 1;
                    for reply in self.server.receive(packet) {
                        self.packets_received += 1;
                        queue.extend(self.session.handle_packet(cycle, reply));
                    }
                },
                SessionAction::CloseLink { cycle } => {
                    if self.link == Some(cycle) {
                        self.link = None;
                    }
                    self.events.push(WorldEvent::LinkClosed { cycle });
                },
                SessionAction::ScheduleRetry { cycle, delay } => {
                    self.retry = Some(cycle);
                    self.events.push(WorldEvent::RetryScheduled { delay });
                },
                SessionAction::CancelRetry { .. } => {
                    self.retry = None;
                    self.events.push(WorldEvent::RetryCancelled);
                },
                SessionAction::Acknowledged { id, args } => {
                    self.events.push(WorldEvent::Acknowledged { id, args });
                },
                SessionAction::ReleaseAcks => self.events.push(WorldEvent::AcksReleased),
            }
        }
    }
}
