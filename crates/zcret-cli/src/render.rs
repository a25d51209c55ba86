//! Plain-text rendering of session data.

use zcret_app::SessionView;
use zcret_core::{ChatMessage, DiagnosticEntry};

/// Characters of an account id shown before the ellipsis.
const SHORT_ACCOUNT: usize = 6;

/// Abbreviate an account id: `7xKXtg...`.
pub fn short_account(account: &str) -> String {
    match account.char_indices().nth(SHORT_ACCOUNT) {
        Some((end, _)) => format!("{}...", &account[..end]),
        None => account.to_string(),
    }
}

/// One chat line. Messages from `own` are marked `you`.
pub fn message_line(message: &ChatMessage, own: Option<&str>) -> String {
    let who = if own == Some(message.sender.as_str()) {
        "you".to_string()
    } else {
        short_account(&message.sender)
    };
    format!("[{}] {who}: {}", message.created_at.format("%H:%M"), message.content)
}

/// One diagnostic line, `HH:MM:SS - text`.
pub fn diagnostic_line(entry: &DiagnosticEntry) -> String {
    entry.to_string()
}

/// Status summary.
pub fn status_line(view: &SessionView) -> String {
    let mut line = format!("state: {}", view.state);
    if let Some(account) = &view.account {
        line.push_str(&format!(" | wallet: {}", short_account(account)));
    }
    if let Some(transport) = view.transport {
        line.push_str(&format!(" | via {transport}"));
    }
    line.push_str(&format!(" | {} messages", view.message_count));
    if let Some(status) = &view.status {
        line.push_str(&format!(" | {status}"));
    }
    line
}
