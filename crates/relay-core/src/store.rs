//! Bounded in-memory message history.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use serde::{Deserialize, Serialize};

use crate::{Message, Notice};

/// Default number of retained messages.
pub const DEFAULT_CAPACITY: usize = 1000;

/// A view of the history with its absolute position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    /// Absolute index of `messages[0]`. Advances on eviction and on clear,
    /// never moves back.
    pub offset: u64,
    /// Number of times the history was cleared.
    #[serde(default)]
    pub epoch: u64,
    /// Retained messages, oldest first.
    pub messages: Vec<Message>,
}

impl HistoryPage {
    /// Absolute end position (`offset + len`).
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.messages.len() as u64
    }
}

/// Initial state handed to a newly connected client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatchUp {
    /// Retained history.
    pub page: HistoryPage,
    /// Set if the history was cleared and nothing was appended since.
    pub notice: Option<Notice>,
}

struct Inner {
    history: VecDeque<Message>,
    offset: u64,
    epoch: u64,
    pending_notice: Option<Notice>,
}

impl Inner {
    fn page(&self) -> HistoryPage {
        HistoryPage {
            offset: self.offset,
            epoch: self.epoch,
            messages: self.history.iter().cloned().collect(),
        }
    }
}

/// Ordered, bounded log of accepted messages.
///
/// Created empty; mutated only by [`append`](Self::append) and
/// [`clear`](Self::clear). When full, the oldest entry is evicted and the
/// offset advances so absolute positions stay stable for polling clients.
/// Positions are never reused: a clear moves the offset to the old end and
/// bumps the epoch.
pub struct MessageStore {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    /// Create a store with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a store retaining at most `capacity` messages (minimum 1).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(capacity.min(64)),
                offset: 0,
                epoch: 0,
                pending_notice: None,
            }),
            capacity: capacity.max(1),
        }
    }

    /// Append a validated message, returning the new absolute length.
    pub fn append(&self, msg: Message) -> u64 {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        while inner.history.len() >= self.capacity {
            if inner.history.pop_front().is_none() {
                break;
            }
            inner.offset += 1;
        }
        inner.history.push_back(msg);
        inner.pending_notice = None;
        inner.offset + inner.history.len() as u64
    }

    /// Empty the log. Idempotent on the contents.
    ///
    /// The offset moves to the old end and the epoch advances. The notice is
    /// kept for catch-up until the next append.
    pub fn clear(&self, notice: Notice) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.offset += inner.history.len() as u64;
        inner.history.clear();
        inner.epoch += 1;
        inner.pending_notice = Some(notice);
    }

    /// Get the full current log.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.read(|inner| inner.history.iter().cloned().collect())
    }

    /// Get the log together with its offset.
    #[must_use]
    pub fn page(&self) -> HistoryPage {
        self.read(Inner::page)
    }

    /// Get the log plus any pending clear notice.
    #[must_use]
    pub fn catch_up(&self) -> CatchUp {
        self.read(|inner| CatchUp {
            page: inner.page(),
            notice: inner.pending_notice.clone(),
        })
    }

    /// Number of retained messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read(|inner| inner.history.len())
    }

    /// Whether no messages are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read<T>(&self, f: impl FnOnce(&Inner) -> T) -> T {
        f(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(body: &str) -> Message {
        Message::new("alice", body, None).unwrap()
    }

    #[test]
    fn test_append_grows_by_one() {
        let store = MessageStore::new();
        for i in 0..5 {
            let before = store.snapshot().len();
            let m = msg(&format!("m{i}"));
            let len = store.append(m.clone());
            let snapshot = store.snapshot();
            assert_eq!(snapshot.len(), before + 1);
            assert_eq!(snapshot.last(), Some(&m));
            assert_eq!(len, snapshot.len() as u64);
        }
    }

    #[test]
    fn test_clear_is_idempotent() {
        let store = MessageStore::new();
        store.append(msg("a"));
        store.clear(Notice::history_cleared());
        store.clear(Notice::history_cleared());
        assert!(store.snapshot().is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_catch_up_carries_notice_until_next_append() {
        let store = MessageStore::new();
        store.append(msg("a"));
        store.clear(Notice::history_cleared());

        let catch_up = store.catch_up();
        assert!(catch_up.page.messages.is_empty());
        assert_eq!(catch_up.notice, Some(Notice::history_cleared()));

        store.append(msg("b"));
        let catch_up = store.catch_up();
        assert_eq!(catch_up.page.messages.len(), 1);
        assert!(catch_up.notice.is_none());
    }

    #[test]
    fn test_eviction_advances_offset() {
        let store = MessageStore::with_capacity(2);
        store.append(msg("a"));
        store.append(msg("b"));
        let end = store.append(msg("c"));

        let page = store.page();
        assert_eq!(page.offset, 1);
        assert_eq!(end, 3);
        assert_eq!(page.end(), 3);
        assert_eq!(page.messages[0].body, "b");

        store.clear(Notice::history_cleared());
        let page = store.page();
        assert!(page.messages.is_empty());
        assert_eq!(page.offset, 3);
        assert_eq!(page.epoch, 1);
    }

    #[test]
    fn test_clear_never_reuses_positions() {
        let store = MessageStore::new();
        for i in 0..3 {
            store.append(msg(&format!("old{i}")));
        }
        store.clear(Notice::history_cleared());
        store.clear(Notice::history_cleared());
        assert_eq!(store.page().epoch, 2);

        let end = store.append(msg("new0"));
        assert_eq!(end, 4);
        let page = store.page();
        assert_eq!(page.offset, 3);
        assert_eq!(page.end(), 4);
        assert_eq!(page.messages[0].body, "new0");
    }
}
