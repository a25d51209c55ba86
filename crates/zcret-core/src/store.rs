//! Ordered, deduplicated message store.
//!
//! # Ordering
//!
//! History batches are merged with what is already stored and stable-sorted
//! by `created_at`, so ties keep arrival order. Incremental pushes are
//! appended as they arrive without re-sorting: the server's push order is
//! trusted even when a pushed message carries an older timestamp. The next
//! history batch restores canonical order.
//!
//! # Identity
//!
//! Ids are unique. Messages without an id get a synthetic one: the position
//! within the batch (`server-msg-<index>`) for history, the receipt time
//! (`new-msg-<millis>`) for pushes. When an id arrives again the newer copy
//! replaces the stored one.
//!
//! # Capacity
//!
//! The store holds at most [`StoreConfig::max_messages`] messages and evicts
//! from the front (oldest) when that is exceeded.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::message::{ChatMessage, IncomingMessage};

/// Synthetic id of the id-less history entry at `index` within its batch.
pub fn batch_message_id(index: usize) -> String {
    format!("server-msg-{index}")
}

/// Message store limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Maximum number of retained messages
    pub max_messages: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { max_messages: 10_000 }
    }
}

/// In-memory chat history for one session.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    messages: Vec<ChatMessage>,
    ids: HashSet<String>,
    loaded: bool,
    config: StoreConfig,
}

impl MessageStore {
    /// Create an empty store.
    pub fn new(config: StoreConfig) -> Self {
        Self { messages: Vec::new(), ids: HashSet::new(), loaded: false, config }
    }

    /// Merge a history batch.
    ///
    /// Returns the number of messages in the batch after id assignment.
    pub fn ingest_batch(&mut self, batch: Vec<IncomingMessage>) -> usize {
        let count = batch.len();
        let incoming = batch.into_iter().enumerate().map(|(index, msg)| {
            let id = msg.id.clone().unwrap_or_else(|| batch_message_id(index));
            msg.into_message(id)
        });

        let mut merged: Vec<ChatMessage> = std::mem::take(&mut self.messages);
        merged.extend(incoming);

        // Keep only the last copy of every id.
        let mut seen = HashSet::with_capacity(merged.len());
        let mut keep = vec![false; merged.len()];
        for (i, msg) in merged.iter().enumerate().rev() {
            keep[i] = seen.insert(msg.id.clone());
        }
        let mut keep = keep.into_iter();
        merged.retain(|_| keep.next().unwrap_or(false));

        merged.sort_by_key(|msg| msg.created_at);

        self.ids = seen;
        self.messages = merged;
        self.loaded = true;
        self.enforce_capacity();

        tracing::debug!(batch = count, stored = self.messages.len(), "ingested history batch");
        count
    }

    /// Append one pushed message.
    ///
    /// Returns the id under which the message was stored.
    pub fn ingest_incremental(
        &mut self,
        message: IncomingMessage,
        received_at: DateTime<Utc>,
    ) -> String {
        let id = match message.id.clone() {
            Some(id) => id,
            None => self.synthetic_incremental_id(received_at),
        };
        let message = message.into_message(id.clone());

        if self.ids.contains(&id) {
            if let Some(slot) = self.messages.iter_mut().find(|m| m.id == id) {
                *slot = message;
            }
            tracing::debug!(%id, "replaced message with duplicate id");
        } else {
            self.ids.insert(id.clone());
            self.messages.push(message);
            self.enforce_capacity();
        }
        id
    }

    /// Current messages in store order.
    pub fn query(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Look up a message by id.
    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        if !self.ids.contains(id) {
            return None;
        }
        self.messages.iter().find(|m| m.id == id)
    }

    /// Whether a history batch has been ingested since the last clear.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Number of stored messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Store limits.
    pub fn config(&self) -> StoreConfig {
        self.config
    }

    /// Drop everything. Only for full session teardown.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.ids.clear();
        self.loaded = false;
    }

    fn synthetic_incremental_id(&self, received_at: DateTime<Utc>) -> String {
        let base = format!("new-msg-{}", received_at.timestamp_millis());
        if !self.ids.contains(&base) {
            return base;
        }
        let mut n = 1u64;
        loop {
            let candidate = format!("{base}-{n}");
            if !self.ids.contains(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn enforce_capacity(&mut self) {
        let max = self.config.max_messages.max(1);
        if self.messages.len() <= max {
            return;
        }
        let excess = self.messages.len() - max;
        for evicted in self.messages.drain(..excess) {
            self.ids.remove(&evicted.id);
        }
        tracing::debug!(evicted = excess, "message store over capacity");
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    fn ts(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
    }

    fn incoming(id: Option<&str>, sender: &str, created_at: DateTime<Utc>) -> IncomingMessage {
        IncomingMessage {
            id: id.map(str::to_string),
            sender: sender.into(),
            content: format!("from {sender}"),
            created_at,
        }
    }

    fn ids(store: &MessageStore) -> Vec<&str> {
        store.query().iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn batch_sorts_oldest_first() {
        let mut store = MessageStore::default();
        store.ingest_batch(vec![incoming(None, "A", ts(10, 0)), incoming(None, "B", ts(9, 0))]);

        let senders: Vec<_> = store.query().iter().map(|m| m.sender.as_str()).collect();
        assert_eq!(senders, vec!["B", "A"]);
        assert!(store.is_loaded());
    }

    #[test]
    fn batch_assigns_positional_ids() {
        let mut store = MessageStore::default();
        store.ingest_batch(vec![
            incoming(None, "A", ts(10, 0)),
            incoming(Some("real"), "B", ts(10, 1)),
            incoming(None, "C", ts(10, 2)),
        ]);
        assert_eq!(ids(&store), vec!["server-msg-0", "real", "server-msg-2"]);
    }

    #[test]
    fn batch_ties_keep_arrival_order() {
        let mut store = MessageStore::default();
        store.ingest_batch(vec![
            incoming(Some("x"), "A", ts(10, 0)),
            incoming(Some("y"), "B", ts(10, 0)),
            incoming(Some("z"), "C", ts(10, 0)),
        ]);
        assert_eq!(ids(&store), vec!["x", "y", "z"]);
    }

    #[test]
    fn batch_merges_and_last_write_wins() {
        let mut store = MessageStore::default();
        store.ingest_incremental(incoming(Some("m1"), "A", ts(9, 0)), ts(9, 0));
        store.ingest_incremental(incoming(Some("m2"), "B", ts(9, 30)), ts(9, 30));

        let mut edited = incoming(Some("m1"), "A", ts(9, 0));
        edited.content = "edited".into();
        store.ingest_batch(vec![edited, incoming(Some("m3"), "C", ts(8, 0))]);

        assert_eq!(ids(&store), vec!["m3", "m1", "m2"]);
        assert_eq!(store.get("m1").unwrap().content, "edited");
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn duplicate_ids_within_batch_keep_last() {
        let mut store = MessageStore::default();
        let mut second = incoming(Some("m1"), "A", ts(11, 0));
        second.content = "second".into();
        store.ingest_batch(vec![incoming(Some("m1"), "A", ts(10, 0)), second]);

        assert_eq!(store.len(), 1);
        assert_eq!(store.query()[0].content, "second");
    }

    #[test]
    fn incremental_appends_without_reordering() {
        let mut store = MessageStore::default();
        store.ingest_batch(vec![incoming(Some("a"), "A", ts(10, 0))]);
        store.ingest_incremental(incoming(Some("late"), "B", ts(8, 0)), ts(10, 5));

        assert_eq!(ids(&store), vec!["a", "late"]);
    }

    #[test]
    fn incremental_synthetic_ids_stay_unique() {
        let mut store = MessageStore::default();
        let at = ts(12, 0);
        let first = store.ingest_incremental(incoming(None, "A", at), at);
        let second = store.ingest_incremental(incoming(None, "B", at), at);
        let third = store.ingest_incremental(incoming(None, "C", at), at);

        let millis = at.timestamp_millis();
        assert_eq!(first, format!("new-msg-{millis}"));
        assert_eq!(second, format!("new-msg-{millis}-1"));
        assert_eq!(third, format!("new-msg-{millis}-2"));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn incremental_duplicate_replaces_in_place() {
        let mut store = MessageStore::default();
        store.ingest_incremental(incoming(Some("a"), "A", ts(10, 0)), ts(10, 0));
        store.ingest_incremental(incoming(Some("b"), "B", ts(10, 1)), ts(10, 1));
        let mut again = incoming(Some("a"), "A", ts(10, 0));
        again.content = "again".into();
        store.ingest_incremental(again, ts(10, 2));

        assert_eq!(ids(&store), vec!["a", "b"]);
        assert_eq!(store.query()[0].content, "again");
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut store = MessageStore::new(StoreConfig { max_messages: 2 });
        store.ingest_batch(vec![
            incoming(Some("c"), "C", ts(10, 2)),
            incoming(Some("a"), "A", ts(10, 0)),
            incoming(Some("b"), "B", ts(10, 1)),
        ]);
        assert_eq!(ids(&store), vec!["b", "c"]);
        assert!(store.get("a").is_none());

        store.ingest_incremental(incoming(Some("d"), "D", ts(10, 3)), ts(10, 3));
        assert_eq!(ids(&store), vec!["c", "d"]);
    }

    #[test]
    fn clear_resets_loaded() {
        let mut store = MessageStore::default();
        store.ingest_batch(vec![incoming(None, "A", ts(10, 0))]);
        store.clear();
        assert!(store.is_empty());
        assert!(!store.is_loaded());
        assert!(store.get("server-msg-0").is_none());
    }

    proptest! {
        #[test]
        fn prop_batch_ids_positional_and_unique(n in 0usize..64) {
            let mut store = MessageStore::default();
            let batch = (0..n).map(|_| incoming(None, "A", ts(10, 0))).collect();
            store.ingest_batch(batch);

            let got: HashSet<_> = store.query().iter().map(|m| m.id.clone()).collect();
            let expected: HashSet<_> = (0..n).map(|i| format!("server-msg-{i}")).collect();
            prop_assert_eq!(got, expected);
        }

        #[test]
        fn prop_any_permutation_sorts(
            minutes in prop::collection::vec(0u32..600, 0..40).prop_shuffle()
        ) {
            let mut store = MessageStore::default();
            let batch = minutes
                .iter()
                .map(|m| incoming(None, "A", ts(m / 60, m % 60)))
                .collect();
            store.ingest_batch(batch);

            let stamps: Vec<_> = store.query().iter().map(|m| m.created_at).collect();
            prop_assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
            prop_assert_eq!(stamps.len(), minutes.len());
        }
    }
}
