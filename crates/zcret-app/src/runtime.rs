//! Async runtime driving one chat session.
//!
//! The [`Runtime`] owns the [`Session`] and is its only mutator. Everything
//! that can change the session arrives through one ordered inbox:
//!
//! ```text
//! identity watch ──┐
//! SessionHandle ───┤                 ┌─> dial / link pump task ──┐
//! link pump ───────┼──> inbox ──> Runtime ──> retry timer task ──┼──> inbox
//! retry timer ─────┘       (ticker)  └─> ack replies             ┘
//! ```
//!
//! Spawned tasks do the blocking work (dialing, reading and writing the link,
//! sleeping out retry delays) and only ever post results back. Results from
//! a replaced link carry a stale link id and are dropped before they reach
//! the session.

use std::{collections::HashMap, sync::Arc, time::Duration};

use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use zcret_client::{Identity, Session, SessionAction, SessionConfig};
use zcret_core::{
    DisconnectReason, Environment, Transport, TransportError, TransportKind, TransportLink,
};
use zcret_proto::{EnginePacket, OpenHandshake};

use crate::handle::{AckReceiver, Command, SessionHandle, SessionView};

/// Interval for connection timeout checks.
pub const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Messages consumed by the runtime loop.
#[derive(Debug)]
pub(crate) enum Inbound {
    Identity(Identity),
    Command(Command),
    LinkOpened { link: u64, cycle: u64, handshake: OpenHandshake },
    LinkFailed { link: u64, cycle: u64, reason: String },
    Packet { link: u64, cycle: u64, packet: EnginePacket },
    LinkLost { link: u64, cycle: u64, reason: DisconnectReason },
    RetryElapsed { cycle: u64 },
}

impl Inbound {
    /// Link id for messages posted by a link task.
    fn link(&self) -> Option<u64> {
        match self {
            Self::LinkOpened { link, .. }
            | Self::LinkFailed { link, .. }
            | Self::Packet { link, .. }
            | Self::LinkLost { link, .. } => Some(*link),
            _ => None,
        }
    }
}

/// Instructions for a link task.
#[derive(Debug)]
enum LinkCommand {
    Send(EnginePacket),
    Close,
}

/// The dial-then-pump task for one link.
#[derive(Debug)]
struct LinkTask {
    id: u64,
    cycle: u64,
    opened: bool,
    outgoing: mpsc::UnboundedSender<LinkCommand>,
    task: JoinHandle<()>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Generic session runtime.
///
/// Runs until [`SessionHandle::shutdown`] is called.
pub struct Runtime<E: Environment, T: Transport> {
    env: E,
    session: Session<E>,
    transport: Arc<T>,
    identity: Option<watch::Receiver<Identity>>,
    inbox_tx: mpsc::UnboundedSender<Inbound>,
    inbox_rx: mpsc::UnboundedReceiver<Inbound>,
    view: watch::Sender<SessionView>,
    link: Option<LinkTask>,
    next_link_id: u64,
    retry: Option<(u64, JoinHandle<()>)>,
    pending_acks: HashMap<u64, oneshot::Sender<Vec<Value>>>,
}

impl<E: Environment, T: Transport> Runtime<E, T> {
    /// Create a runtime and the handle used to talk to it.
    pub fn new(
        env: E,
        transport: T,
        config: SessionConfig,
        identity: watch::Receiver<Identity>,
    ) -> (Self, SessionHandle) {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (view, view_rx) = watch::channel(SessionView::default());
        let handle = SessionHandle::new(inbox_tx.clone(), view_rx);

        let runtime = Self {
            session: Session::new(env.clone(), config),
            env,
            transport: Arc::new(transport),
            identity: Some(identity),
            inbox_tx,
            inbox_rx,
            view,
            link: None,
            next_link_id: 0,
            retry: None,
            pending_acks: HashMap::new(),
        };
        (runtime, handle)
    }

    /// The session, for inspection.
    pub fn session(&self) -> &Session<E> {
        &self.session
    }

    /// Run the session loop.
    pub async fn run(mut self) {
        let identity = self
            .identity
            .take()
            .map(|rx| tokio::spawn(forward_identity(rx, self.inbox_tx.clone())));

        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let flow = tokio::select! {
                Some(inbound) = self.inbox_rx.recv() => self.handle(inbound),
                _ = ticker.tick() => {
                    let actions = self.session.tick();
                    self.execute(actions);
                    Flow::Continue
                },
            };
            self.publish_view();
            if flow == Flow::Stop {
                break;
            }
        }

        if let Some(identity) = identity {
            identity.abort();
        }
        if let Some((_, retry)) = self.retry.take() {
            retry.abort();
        }
        tracing::debug!("session runtime stopped");
    }

    fn handle(&mut self, inbound: Inbound) -> Flow {
        if let Some(link) = inbound.link() {
            if self.link.as_ref().is_none_or(|current| current.id != link) {
                tracing::trace!(link, "dropping result from replaced link");
                return Flow::Continue;
            }
        }

        let actions = match inbound {
            Inbound::Identity(identity) => self.session.identity_changed(&identity),
            Inbound::Command(command) => return self.handle_command(command),
            Inbound::LinkOpened { cycle, handshake, .. } => {
                if let Some(link) = self.link.as_mut() {
                    link.opened = true;
                }
                self.session.link_opened(cycle, &handshake)
            },
            Inbound::LinkFailed { cycle, reason, .. } => self.session.link_failed(cycle, &reason),
            Inbound::Packet { cycle, packet, .. } => self.session.handle_packet(cycle, packet),
            Inbound::LinkLost { cycle, reason, .. } => {
                self.link = None;
                self.session.link_lost(cycle, reason)
            },
            Inbound::RetryElapsed { cycle } => {
                if self.retry.as_ref().is_some_and(|(c, _)| *c == cycle) {
                    self.retry = None;
                }
                self.session.retry_elapsed(cycle)
            },
        };
        self.execute(actions);
        Flow::Continue
    }

    fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Submit { text, reply } => {
                let result = self.session.submit(&text).map(|(actions, id)| {
                    let (tx, rx) = oneshot::channel();
                    // Drop waiters whose receiver is gone.
                    self.pending_acks.retain(|_, waiter| !waiter.is_closed());
                    self.pending_acks.insert(id, tx);
                    self.execute(actions);
                    AckReceiver::new(id, rx)
                });
                // Caller may have stopped waiting.
                let _ = reply.send(result);
            },
            Command::Messages { reply } => {
                let _ = reply.send(self.session.messages().to_vec());
            },
            Command::Diagnostics { reply } => {
                let _ = reply.send(self.session.diagnostics().snapshot());
            },
            Command::ClearDiagnostics => self.session.clear_diagnostics(),
            Command::Shutdown { reply } => {
                let actions = self.session.shutdown();
                self.execute(actions);
                self.pending_acks.clear();
                let _ = reply.send(());
                return Flow::Stop;
            },
        }
        Flow::Continue
    }

    fn execute(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::Dial { cycle, transport, endpoint } => {
                    self.spawn_link(cycle, transport, endpoint);
                },
                SessionAction::Send { cycle, packet } => match &self.link {
                    Some(link) if link.cycle == cycle => {
                        if link.outgoing.send(LinkCommand::Send(packet)).is_err() {
                            tracing::debug!(cycle, "link task gone, packet dropped");
                        }
                    },
                    _ => tracing::warn!(cycle, "no link for outgoing packet"),
                },
                SessionAction::CloseLink { cycle } => {
                    if self.link.as_ref().is_some_and(|link| link.cycle == cycle) {
                        self.close_link();
                    }
                },
                SessionAction::ScheduleRetry { cycle, delay } => {
                    if let Some((_, previous)) = self.retry.take() {
                        previous.abort();
                    }
                    let env = self.env.clone();
                    let inbox = self.inbox_tx.clone();
                    let task = tokio::spawn(async move {
                        env.sleep(delay).await;
                        let _ = inbox.send(Inbound::RetryElapsed { cycle });
                    });
                    self.retry = Some((cycle, task));
                },
                SessionAction::CancelRetry { cycle } => {
                    if self.retry.as_ref().is_some_and(|(c, _)| *c == cycle) {
                        if let Some((_, task)) = self.retry.take() {
                            task.abort();
                        }
                    }
                },
                SessionAction::Acknowledged { id, args } => {
                    if let Some(reply) = self.pending_acks.remove(&id) {
                        let _ = reply.send(args);
                    }
                },
                SessionAction::ReleaseAcks => self.pending_acks.clear(),
            }
        }
    }

    fn spawn_link(&mut self, cycle: u64, kind: TransportKind, endpoint: String) {
        self.close_link();
        self.next_link_id += 1;
        let id = self.next_link_id;

        let (outgoing, commands) = mpsc::unbounded_channel();
        let task = tokio::spawn(dial_and_pump(
            Arc::clone(&self.transport),
            kind,
            endpoint,
            LinkContext { id, cycle, inbox: self.inbox_tx.clone() },
            commands,
        ));
        tracing::debug!(link = id, cycle, %kind, "dialing");
        self.link = Some(LinkTask { id, cycle, opened: false, outgoing, task });
    }

    /// Let an open link flush and close; abort a dial still in progress.
    fn close_link(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        if link.opened {
            let _ = link.outgoing.send(LinkCommand::Close);
        } else {
            link.task.abort();
        }
    }

    fn publish_view(&self) {
        let next = SessionView {
            state: self.session.state().clone(),
            status: self.session.status().map(str::to_string),
            account: self.session.account().map(str::to_string),
            transport: self.session.transport(),
            message_count: self.session.store().len(),
            loaded: self.session.store().is_loaded(),
            pending_acks: self.pending_acks.len(),
        };
        self.view.send_if_modified(|view| {
            if *view == next {
                return false;
            }
            *view = next;
            true
        });
    }
}

/// Where a link task posts its results.
struct LinkContext {
    id: u64,
    cycle: u64,
    inbox: mpsc::UnboundedSender<Inbound>,
}

impl LinkContext {
    fn post(&self, inbound: Inbound) -> bool {
        self.inbox.send(inbound).is_ok()
    }

    fn lost(&self, reason: DisconnectReason) {
        self.post(Inbound::LinkLost { link: self.id, cycle: self.cycle, reason });
    }
}

async fn dial_and_pump<T: Transport>(
    transport: Arc<T>,
    kind: TransportKind,
    endpoint: String,
    ctx: LinkContext,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
) {
    let mut link = match transport.dial(kind, &endpoint).await {
        Ok(link) => link,
        Err(e) => {
            ctx.post(Inbound::LinkFailed { link: ctx.id, cycle: ctx.cycle, reason: e.to_string() });
            return;
        },
    };
    let handshake = link.handshake().clone();
    if !ctx.post(Inbound::LinkOpened { link: ctx.id, cycle: ctx.cycle, handshake }) {
        link.close().await;
        return;
    }

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(LinkCommand::Send(packet)) => {
                    if let Err(e) = link.send(packet).await {
                        ctx.lost(DisconnectReason::TransportError(e.to_string()));
                        link.close().await;
                        return;
                    }
                },
                Some(LinkCommand::Close) | None => {
                    link.close().await;
                    return;
                },
            },
            received = link.recv() => match received {
                Some(Ok(packet)) => {
                    if !ctx.post(Inbound::Packet { link: ctx.id, cycle: ctx.cycle, packet }) {
                        link.close().await;
                        return;
                    }
                },
                Some(Err(TransportError::Protocol(e))) => {
                    tracing::warn!(link = ctx.id, error = %e, "dropping undecodable engine packet");
                },
                Some(Err(e)) => {
                    ctx.lost(DisconnectReason::TransportError(e.to_string()));
                    link.close().await;
                    return;
                },
                None => {
                    ctx.lost(DisconnectReason::TransportClose);
                    return;
                },
            },
        }
    }
}

async fn forward_identity(
    mut identity: watch::Receiver<Identity>,
    inbox: mpsc::UnboundedSender<Inbound>,
) {
    loop {
        let current = identity.borrow_and_update().clone();
        if inbox.send(Inbound::Identity(current)).is_err() {
            return;
        }
        if identity.changed().await.is_err() {
            return;
        }
    }
}
