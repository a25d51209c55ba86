//! Bounded, timestamped diagnostic trace.
//!
//! The log is what a "debug logs" panel shows: a human-readable history of
//! connection attempts, handshakes, received batches and errors. Entries are
//! also mirrored to `tracing` so they reach the process log.

use std::{collections::VecDeque, fmt};

use chrono::{DateTime, Utc};

/// Entries kept before the oldest is evicted.
pub const DEFAULT_CAPACITY: usize = 500;

/// One diagnostic line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEntry {
    /// When the entry was appended
    pub timestamp: DateTime<Utc>,
    /// Entry text
    pub text: String,
}

impl fmt::Display for DiagnosticEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.timestamp.format("%H:%M:%S"), self.text)
    }
}

/// Append-only diagnostic log.
#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    entries: VecDeque<DiagnosticEntry>,
    capacity: usize,
}

impl DiagnosticLog {
    /// Create a log keeping at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { entries: VecDeque::with_capacity(capacity.min(64)), capacity }
    }

    /// Append an entry.
    pub fn append(&mut self, timestamp: DateTime<Utc>, text: impl Into<String>) {
        let text = text.into();
        tracing::debug!(target: "zcret::diagnostics", "{text}");

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(DiagnosticEntry { timestamp, text });
    }

    /// Entries, oldest first.
    pub fn snapshot(&self) -> Vec<DiagnosticEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Most recent entry.
    pub fn last(&self) -> Option<&DiagnosticEntry> {
        self.entries.back()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
