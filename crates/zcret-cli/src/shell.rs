//! Line-oriented shell over a [`SessionHandle`].
//!
//! Reads commands from any buffered reader and writes to any writer, so the
//! binary wires it to stdin/stdout and tests wire it to in-memory buffers.
//! The shell also acts as the mock identity provider: `/connect` and
//! `/disconnect` publish on the identity channel the runtime watches.

use std::collections::HashSet;

use thiserror::Error;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::watch,
};
use zcret_app::{Identity, RuntimeError, SessionHandle, SessionView};

use crate::{
    commands::{self, Command, HELP},
    render,
};

/// Shell failures that end the loop.
#[derive(Debug, Error)]
pub enum ShellError {
    /// Writing output or reading input failed
    #[error("terminal i/o: {0}")]
    Io(#[from] std::io::Error),

    /// The session runtime went away
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// What to do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Read the next line
    Continue,
    /// Leave the loop
    Quit,
}

/// Interactive shell state.
pub struct Shell<W> {
    handle: SessionHandle,
    identity: watch::Sender<Identity>,
    wallet: String,
    out: W,
    shown: HashSet<String>,
    last: Option<SessionView>,
}

impl<W: AsyncWrite + Unpin> Shell<W> {
    /// Create a shell. `wallet` is used by `/connect` without an argument.
    pub fn new(
        handle: SessionHandle,
        identity: watch::Sender<Identity>,
        wallet: impl Into<String>,
        out: W,
    ) -> Self {
        Self {
            handle,
            identity,
            wallet: wallet.into(),
            out,
            shown: HashSet::new(),
            last: None,
        }
    }

    /// Output written so far.
    pub fn output(&self) -> &W {
        &self.out
    }

    /// Parse and execute one input line.
    pub async fn handle_line(&mut self, line: &str) -> Result<Flow, ShellError> {
        self.execute(commands::parse(line)).await
    }

    /// Execute one command.
    pub async fn execute(&mut self, command: Command) -> Result<Flow, ShellError> {
        match command {
            Command::Connect { account } => {
                let account = account.unwrap_or_else(|| self.wallet.clone());
                self.write(&format!("connecting as {}", render::short_account(&account))).await?;
                self.identity.send_replace(Identity::connected(account));
            },
            Command::Disconnect => {
                self.identity.send_replace(Identity::disconnected());
                self.write("wallet disconnected").await?;
            },
            Command::History => {
                let own = self.handle.view().borrow().account.clone();
                for message in self.handle.messages().await? {
                    self.shown.insert(message.id.clone());
                    self.write(&render::message_line(&message, own.as_deref())).await?;
                }
            },
            Command::Log => {
                for entry in self.handle.diagnostics().await? {
                    self.write(&render::diagnostic_line(&entry)).await?;
                }
            },
            Command::ClearLog => {
                self.handle.clear_diagnostics()?;
                self.write("diagnostic log cleared").await?;
            },
            Command::Status => {
                let line = render::status_line(&self.handle.view().borrow());
                self.write(&line).await?;
            },
            Command::Help => {
                for line in HELP {
                    self.write(line).await?;
                }
            },
            Command::Quit => return Ok(Flow::Quit),
            Command::Message { content } => self.submit(content).await?,
            Command::Unknown { input } => {
                self.write(&format!("unknown command: {input} (try /help)")).await?;
            },
            Command::InvalidArgs { error, .. } => self.write(&error).await?,
        }
        Ok(Flow::Continue)
    }

    /// Print status changes and messages not shown yet.
    pub async fn refresh(&mut self) -> Result<(), ShellError> {
        let view = self.handle.view().borrow().clone();

        let changed = self
            .last
            .as_ref()
            .is_none_or(|last| last.state != view.state || last.status != view.status);
        if changed {
            self.write(&format!("* {}", render::status_line(&view))).await?;
        }

        let count_changed = self.last.as_ref().is_none_or(|last| {
            last.message_count != view.message_count || last.loaded != view.loaded
        });
        if count_changed && view.message_count > 0 {
            let own = view.account.clone();
            for message in self.handle.messages().await? {
                if self.shown.insert(message.id.clone()) {
                    self.write(&render::message_line(&message, own.as_deref())).await?;
                }
            }
        }

        self.last = Some(view);
        Ok(())
    }

    async fn submit(&mut self, content: String) -> Result<(), ShellError> {
        match self.handle.submit(content).await {
            Ok(ack) => {
                let id = ack.id();
                tokio::spawn(async move {
                    match ack.wait().await {
                        Ok(args) => tracing::debug!(id, ?args, "message acknowledged"),
                        Err(e) => tracing::warn!(id, error = %e, "message not acknowledged"),
                    }
                });
                Ok(())
            },
            Err(RuntimeError::Session(e)) => self.write(&format!("! {e}")).await,
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&mut self, line: &str) -> Result<(), ShellError> {
        self.out.write_all(line.as_bytes()).await?;
        self.out.write_all(b"\n").await?;
        self.out.flush().await?;
        Ok(())
    }
}

/// Run the shell until `/quit`, end of input, or runtime exit, then shut the
/// session down.
pub async fn run<R, W>(mut shell: Shell<W>, input: R) -> Result<(), ShellError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut view = shell.handle.view();
    let mut lines = input.lines();
    shell.refresh().await?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if shell.handle_line(&line).await? == Flow::Quit {
                    break;
                }
            },
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                shell.refresh().await?;
            },
        }
    }

    match shell.handle.shutdown().await {
        Ok(()) | Err(RuntimeError::Stopped) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
