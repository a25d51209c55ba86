//! Presentation-layer handle to a running session.

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use zcret_client::{SessionError, SessionState};
use zcret_core::{ChatMessage, DiagnosticEntry, TransportKind};

use crate::{error::RuntimeError, runtime::Inbound};

/// Snapshot of session status, published after every runtime step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    /// Session lifecycle state
    pub state: SessionState,
    /// Last connection or server error
    pub status: Option<String>,
    /// Connected account
    pub account: Option<String>,
    /// Transport of the current link
    pub transport: Option<TransportKind>,
    /// Messages in the store
    pub message_count: usize,
    /// Whether history has been received
    pub loaded: bool,
    /// Submitted messages still waiting for an ack
    pub pending_acks: usize,
}

impl Default for SessionView {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            status: None,
            account: None,
            transport: None,
            message_count: 0,
            loaded: false,
            pending_acks: 0,
        }
    }
}

/// Requests from the presentation layer.
#[derive(Debug)]
pub(crate) enum Command {
    Submit { text: String, reply: oneshot::Sender<Result<AckReceiver, SessionError>> },
    Messages { reply: oneshot::Sender<Vec<ChatMessage>> },
    Diagnostics { reply: oneshot::Sender<Vec<DiagnosticEntry>> },
    ClearDiagnostics,
    Shutdown { reply: oneshot::Sender<()> },
}

/// Pending acknowledgement of a submitted message.
#[derive(Debug)]
pub struct AckReceiver {
    id: u64,
    reply: oneshot::Receiver<Vec<Value>>,
}

impl AckReceiver {
    pub(crate) fn new(id: u64, reply: oneshot::Receiver<Vec<Value>>) -> Self {
        Self { id, reply }
    }

    /// Ack id of the `send_message` event.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the server's reply arguments.
    ///
    /// Fails with `AckReleased` if the link drops first.
    pub async fn wait(self) -> Result<Vec<Value>, RuntimeError> {
        let id = self.id;
        self.reply.await.map_err(|_| RuntimeError::AckReleased { id })
    }
}

/// Cloneable handle to a [`crate::Runtime`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inbox: mpsc::UnboundedSender<Inbound>,
    view: watch::Receiver<SessionView>,
}

impl SessionHandle {
    pub(crate) fn new(
        inbox: mpsc::UnboundedSender<Inbound>,
        view: watch::Receiver<SessionView>,
    ) -> Self {
        Self { inbox, view }
    }

    /// Send chat text.
    ///
    /// Resolves once the session has emitted the event; the returned
    /// receiver resolves when the server acknowledges it.
    pub async fn submit(&self, text: impl Into<String>) -> Result<AckReceiver, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Submit { text: text.into(), reply })?;
        let submitted = rx.await.map_err(|_| RuntimeError::Stopped)?;
        submitted.map_err(RuntimeError::from)
    }

    /// Stored messages in canonical order.
    pub async fn messages(&self) -> Result<Vec<ChatMessage>, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Messages { reply })?;
        rx.await.map_err(|_| RuntimeError::Stopped)
    }

    /// Diagnostic entries, oldest first.
    pub async fn diagnostics(&self) -> Result<Vec<DiagnosticEntry>, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Diagnostics { reply })?;
        rx.await.map_err(|_| RuntimeError::Stopped)
    }

    /// Drop all diagnostic entries.
    pub fn clear_diagnostics(&self) -> Result<(), RuntimeError> {
        self.request(Command::ClearDiagnostics)
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.view.borrow().state.clone()
    }

    /// Last connection or server error.
    pub fn status(&self) -> Option<String> {
        self.view.borrow().status.clone()
    }

    /// Watch session status changes.
    pub fn view(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Tear the session down: close the transport, clear the store, stop the
    /// runtime.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Shutdown { reply })?;
        rx.await.map_err(|_| RuntimeError::Stopped)
    }

    fn request(&self, command: Command) -> Result<(), RuntimeError> {
        self.inbox.send(Inbound::Command(command)).map_err(|_| RuntimeError::Stopped)
    }
}
