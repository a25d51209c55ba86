//! Reference model of the message store.
//!
//! A deliberately naive reimplementation of the store's observable
//! behaviour. Model-based tests apply the same [`StoreOperation`] sequence to
//! the model and to [`zcret_core::MessageStore`] and compare the results.
//!
//! The model favours obviousness over speed: every operation rebuilds the
//! message list from scratch.

use arbitrary::Arbitrary;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use zcret_core::{ChatMessage, IncomingMessage};

/// Compact message description for operation generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Arbitrary)]
pub struct ModelMessage {
    /// Server id slot; `None` leaves the id for the store to assign
    pub id: Option<u8>,
    /// Minutes after the model's epoch
    pub minute: u8,
    /// Which of a handful of senders wrote it
    pub sender: u8,
}

impl ModelMessage {
    /// Expand into a store input.
    pub fn to_incoming(self) -> IncomingMessage {
        IncomingMessage {
            id: self.id.map(|slot| format!("m{slot}")),
            sender: format!("sender-{}", self.sender % 4),
            content: format!("minute {} from {}", self.minute, self.sender % 4),
            created_at: model_time(u64::from(self.minute)),
        }
    }
}

/// One store operation.
#[derive(Debug, Clone, PartialEq, Eq, Arbitrary)]
pub enum StoreOperation {
    /// History batch
    Batch(Vec<ModelMessage>),
    /// Live push received `received_at` seconds after the model's epoch
    Push {
        /// The pushed message
        message: ModelMessage,
        /// Receipt time, drives synthetic ids
        received_at: u16,
    },
    /// Session teardown
    Clear,
}

/// Receipt time of a push, as the store sees it.
pub fn received_time(seconds: u16) -> DateTime<Utc> {
    epoch() + TimeDelta::seconds(i64::from(seconds))
}

fn model_time(minutes: u64) -> DateTime<Utc> {
    epoch() + TimeDelta::minutes(minutes as i64)
}

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Reference message store.
#[derive(Debug, Clone)]
pub struct StoreModel {
    messages: Vec<ChatMessage>,
    loaded: bool,
    capacity: usize,
}

impl StoreModel {
    /// Empty model holding at most `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        Self { messages: Vec::new(), loaded: false, capacity: capacity.max(1) }
    }

    /// Apply one operation.
    pub fn apply(&mut self, op: &StoreOperation) {
        match op {
            StoreOperation::Batch(batch) => self.batch(batch),
            StoreOperation::Push { message, received_at } => self.push(*message, *received_at),
            StoreOperation::Clear => {
                self.messages.clear();
                self.loaded = false;
            },
        }
    }

    /// Messages in canonical order.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Whether a batch has arrived since the last clear.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn batch(&mut self, batch: &[ModelMessage]) {
        let incoming: Vec<ChatMessage> = batch
            .iter()
            .enumerate()
            .map(|(index, m)| {
                let id = m.id.map_or_else(|| format!("server-msg-{index}"), |slot| format!("m{slot}"));
                to_message(*m, id)
            })
            .collect();

        let mut merged: Vec<ChatMessage> = Vec::new();
        for message in self.messages.drain(..).chain(incoming) {
            merged.retain(|existing| existing.id != message.id);
            merged.push(message);
        }
        merged.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        self.messages = merged;
        self.loaded = true;
        self.trim();
    }

    fn push(&mut self, message: ModelMessage, received_at: u16) {
        let id = match message.id {
            Some(slot) => format!("m{slot}"),
            None => {
                let base = format!("new-msg-{}", received_time(received_at).timestamp_millis());
                let mut candidate = base.clone();
                let mut n = 0;
                while self.messages.iter().any(|m| m.id == candidate) {
                    n += 1;
                    candidate = format!("{base}-{n}");
                }
                candidate
            },
        };
        let message = to_message(message, id);

        match self.messages.iter().position(|m| m.id == message.id) {
            Some(slot) => self.messages[slot] = message,
            None => {
                self.messages.push(message);
                self.trim();
            },
        }
    }

    fn trim(&mut self) {
        while self.messages.len() > self.capacity {
            self.messages.remove(0);
        }
    }
}

fn to_message(message: ModelMessage, id: String) -> ChatMessage {
    let incoming = message.to_incoming();
    ChatMessage {
        id,
        sender: incoming.sender,
        content: incoming.content,
        created_at: incoming.created_at,
    }
}
