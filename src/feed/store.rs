//! Local message store: the ordered list of messages known for one open
//! conversation.
//!
//! Entries are kept non-decreasing by `created_at` at all times and no two
//! entries share an id. Optimistic entries carry their temporary id until
//! [`MessageStore::confirm`] swaps in the server record.

use std::collections::HashSet;

use crate::models::Message;

/// Whether the server has acknowledged an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Optimistic entry keyed by its temporary id
    Pending,
    Confirmed,
}

/// A message as held by the store
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub message: Message,
    pub delivery: Delivery,
}

impl FeedEntry {
    pub fn confirmed(message: Message) -> Self {
        Self {
            message,
            delivery: Delivery::Confirmed,
        }
    }

    pub fn pending(message: Message) -> Self {
        Self {
            message,
            delivery: Delivery::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.delivery == Delivery::Pending
    }

    pub fn id(&self) -> &str {
        &self.message.id
    }
}

/// What [`MessageStore::append`] did with a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// New entry
    Inserted,
    /// An entry with the same id existed and was replaced in place
    Replaced,
    /// The message was the confirmed copy of a pending optimistic entry,
    /// which now carries the server record
    Absorbed { temp_id: String },
}

impl AppendOutcome {
    pub fn is_new(&self) -> bool {
        matches!(self, AppendOutcome::Inserted)
    }
}

pub struct MessageStore {
    conversation_id: String,
    entries: Vec<FeedEntry>,
    echo_window: chrono::Duration,
}

impl MessageStore {
    pub fn new(conversation_id: impl Into<String>, echo_window: chrono::Duration) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            entries: Vec::new(),
            echo_window,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn entries(&self) -> &[FeedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&FeedEntry> {
        self.entries.last()
    }

    pub fn get(&self, id: &str) -> Option<&FeedEntry> {
        self.position(id).map(|i| &self.entries[i])
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_pending()).count()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.message.id == id)
    }

    /// Earliest pending entry that is the same message as `message` by
    /// sender, body and timestamp within the echo window.
    fn pending_match(&self, message: &Message) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.is_pending() && e.message.same_natural_key(message, self.echo_window))
    }

    /// Insert keeping timestamp order. Equal timestamps keep arrival order.
    fn insert_ordered(&mut self, entry: FeedEntry) {
        match self.entries.last() {
            None => self.entries.push(entry),
            Some(last) if last.message.created_at <= entry.message.created_at => {
                self.entries.push(entry)
            }
            Some(_) => {
                tracing::debug!(
                    "Out-of-order message {} in {}, inserting by timestamp",
                    entry.message.id,
                    self.conversation_id
                );
                let at = self
                    .entries
                    .partition_point(|e| e.message.created_at <= entry.message.created_at);
                self.entries.insert(at, entry);
            }
        }
    }

    /// Replace the entry at `index`. Stays in place when the new timestamp
    /// still fits between the neighbours, otherwise moves to keep order.
    fn replace_at(&mut self, index: usize, entry: FeedEntry) {
        let at = entry.message.created_at;
        let fits_before = index == 0 || self.entries[index - 1].message.created_at <= at;
        let fits_after =
            index + 1 >= self.entries.len() || at <= self.entries[index + 1].message.created_at;

        if fits_before && fits_after {
            self.entries[index] = entry;
        } else {
            self.entries.remove(index);
            self.insert_ordered(entry);
        }
    }

    /// Add an optimistic entry at the end. `message.id` must be its
    /// temporary id. A timestamp older than the last entry is raised to it,
    /// since the local clock may lag the server's.
    pub fn push_pending(&mut self, mut message: Message) {
        if let Some(last) = self.entries.last() {
            if message.created_at < last.message.created_at {
                tracing::debug!(
                    "Pending {} stamped {} behind {}, moving to the end",
                    message.id,
                    last.message.created_at - message.created_at,
                    last.message.id
                );
                message.created_at = last.message.created_at;
            }
        }
        self.entries.push(FeedEntry::pending(message));
    }

    /// Add a confirmed message, de-duplicating by id and against pending
    /// optimistic copies.
    pub fn append(&mut self, message: Message) -> AppendOutcome {
        if let Some(i) = self.position(&message.id) {
            let delivery = self.entries[i].delivery;
            if delivery == Delivery::Pending {
                // Same temporary id arriving twice; keep it pending.
                self.replace_at(i, FeedEntry::pending(message));
            } else {
                self.replace_at(i, FeedEntry::confirmed(message));
            }
            return AppendOutcome::Replaced;
        }

        if let Some(i) = self.pending_match(&message) {
            let temp_id = self.entries[i].message.id.clone();
            tracing::debug!(
                "Message {} is the echo of pending {}, absorbing",
                message.id,
                temp_id
            );
            self.replace_at(i, FeedEntry::confirmed(message));
            return AppendOutcome::Absorbed { temp_id };
        }

        self.insert_ordered(FeedEntry::confirmed(message));
        AppendOutcome::Inserted
    }

    /// Swap the pending entry `temp_id` for the server's record.
    ///
    /// Matching is by temporary id only. If the record's id is already in
    /// the store (an echo got there first) that entry is refreshed and the
    /// placeholder, if still present, is dropped.
    pub fn confirm(&mut self, temp_id: &str, record: Message) {
        let temp = self
            .position(temp_id)
            .filter(|&i| self.entries[i].is_pending());

        match (temp, self.position(&record.id)) {
            (Some(t), None) => self.replace_at(t, FeedEntry::confirmed(record)),
            (Some(t), Some(_)) => {
                self.entries.remove(t);
                if let Some(e) = self.position(&record.id) {
                    self.replace_at(e, FeedEntry::confirmed(record));
                }
            }
            (None, Some(e)) => self.replace_at(e, FeedEntry::confirmed(record)),
            (None, None) => self.insert_ordered(FeedEntry::confirmed(record)),
        }
    }

    /// Remove the pending entry `temp_id` after a failed send.
    pub fn rollback(&mut self, temp_id: &str) -> Option<FeedEntry> {
        let i = self
            .position(temp_id)
            .filter(|&i| self.entries[i].is_pending())?;
        Some(self.entries.remove(i))
    }

    /// Apply a remote update to a known message. Unknown ids are ignored.
    pub fn apply_update(&mut self, message: Message) -> bool {
        match self.position(&message.id) {
            Some(i) if !self.entries[i].is_pending() => {
                if self.entries[i].message == message {
                    return false;
                }
                self.replace_at(i, FeedEntry::confirmed(message));
                true
            }
            _ => false,
        }
    }

    /// Number of messages from someone other than `reader_id` not yet read.
    pub fn unread_from_others(&self, reader_id: &str) -> usize {
        self.entries
            .iter()
            .filter(|e| !e.is_pending() && e.message.sender_id != reader_id && !e.message.is_read)
            .count()
    }

    /// Mark every message not authored by `reader_id` as read. Returns how
    /// many entries changed.
    pub fn mark_read(&mut self, reader_id: &str) -> usize {
        let mut changed = 0;
        for entry in &mut self.entries {
            if entry.message.sender_id != reader_id && !entry.message.is_read {
                entry.message.is_read = true;
                changed += 1;
            }
        }
        changed
    }

    /// Install a freshly loaded history.
    ///
    /// The history is authoritative for everything it contains. Entries the
    /// history does not know about survive: confirmed ones that arrived over
    /// the change feed after the query ran, and pending optimistic ones
    /// whose send is still in flight. A pending entry whose confirmed copy
    /// is already in the history is dropped in favour of that copy; the
    /// later [`confirm`](Self::confirm) then finds it by server id.
    pub fn merge_history(&mut self, mut history: Vec<Message>) {
        history.retain(|m| m.conversation_id == self.conversation_id);
        history.sort_by_key(|m| m.created_at);

        let previous = std::mem::take(&mut self.entries);
        let mut claimed: HashSet<String> = previous
            .iter()
            .filter(|e| !e.is_pending())
            .map(|e| e.message.id.clone())
            .collect();

        for message in history {
            match self.position(&message.id) {
                Some(i) => self.entries[i] = FeedEntry::confirmed(message),
                None => self.entries.push(FeedEntry::confirmed(message)),
            }
        }

        for entry in previous {
            if entry.is_pending() {
                let window = self.echo_window;
                let twin = self.entries.iter().find(|e| {
                    !claimed.contains(&e.message.id)
                        && e.message.same_natural_key(&entry.message, window)
                });
                if let Some(twin) = twin {
                    tracing::debug!(
                        "Pending {} already in history as {}",
                        entry.message.id,
                        twin.message.id
                    );
                    claimed.insert(twin.message.id.clone());
                    continue;
                }
                self.insert_ordered(entry);
            } else if self.position(&entry.message.id).is_none() {
                self.insert_ordered(entry);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn is_ordered(&self) -> bool {
        self.entries
            .windows(2)
            .all(|w| w[0].message.created_at <= w[1].message.created_at)
    }

    #[cfg(test)]
    pub(crate) fn has_unique_ids(&self) -> bool {
        let ids: HashSet<&str> = self.entries.iter().map(|e| e.id()).collect();
        ids.len() == self.entries.len()
    }
}
