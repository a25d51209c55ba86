//! Command parsing for the line-oriented shell.
//!
//! This module parses input lines into structured [`Command`] values.

/// Parsed command from user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Report a connected identity.
    Connect {
        /// Account to connect as; the configured wallet when absent.
        account: Option<String>,
    },

    /// Report a disconnected identity.
    Disconnect,

    /// Print the stored messages.
    History,

    /// Print the diagnostic log.
    Log,

    /// Empty the diagnostic log.
    ClearLog,

    /// Print the session status.
    Status,

    /// Print the command list.
    Help,

    /// Quit the application.
    Quit,

    /// Send a chat message.
    Message {
        /// Message content.
        content: String,
    },

    /// Unknown or invalid command.
    Unknown {
        /// The original input.
        input: String,
    },

    /// Command with missing or invalid arguments.
    InvalidArgs {
        /// Command name.
        command: String,
        /// Error message.
        error: String,
    },
}

/// One-line summaries printed by `/help`.
pub const HELP: &[&str] = &[
    "/connect [wallet]  connect as the configured or given wallet",
    "/disconnect        disconnect the wallet",
    "/history           show stored messages",
    "/log               show the diagnostic log",
    "/clear             empty the diagnostic log",
    "/status            show the session status",
    "/quit              exit",
    "anything else is sent as a message",
];

/// Parse a user input line into a command.
///
/// Commands start with `/`. Anything else is treated as a message; the
/// message is passed on untrimmed so validation happens in one place.
pub fn parse(input: &str) -> Command {
    let trimmed = input.trim();

    let Some(cmd_str) = trimmed.strip_prefix('/') else {
        return Command::Message { content: input.trim_end_matches(['\r', '\n']).to_string() };
    };

    let parts: Vec<&str> = cmd_str.split_whitespace().collect();
    let command = parts.first().copied().unwrap_or("");

    match command {
        "connect" => match parts.as_slice() {
            [_] => Command::Connect { account: None },
            [_, account] => Command::Connect { account: Some((*account).to_string()) },
            _ => Command::InvalidArgs {
                command: "connect".into(),
                error: "Usage: /connect [wallet]".into(),
            },
        },

        "disconnect" => Command::Disconnect,

        "history" | "messages" => Command::History,

        "log" => Command::Log,

        "clear" => Command::ClearLog,

        "status" => Command::Status,

        "help" | "?" => Command::Help,

        "quit" | "q" => Command::Quit,

        _ => Command::Unknown { input: trimmed.to_string() },
    }
}
