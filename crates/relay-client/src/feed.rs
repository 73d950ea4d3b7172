//! History cursor and echo suppression.
//!
//! The same messages can reach a client twice: in the handshake catch-up and
//! again in the first poll after a fallback, or as its own echo from the
//! pull transport. [`Feed`] keeps the absolute end position already shown and
//! drops anything carrying this client's origin id. The relay never reuses a
//! position, so a purge shows up as a new epoch rather than a shorter log.

use relay_core::{Message, Notice, protocol::RawHistory};
use serde_json::Value;

use crate::session::Output;

/// What this client has already shown.
#[derive(Debug, Clone)]
pub struct Feed {
    origin_id: String,
    cursor: u64,
    epoch: Option<u64>,
}

impl Feed {
    /// Start before the first message.
    #[must_use]
    pub fn new(origin_id: impl Into<String>) -> Self {
        Self {
            origin_id: origin_id.into(),
            cursor: 0,
            epoch: None,
        }
    }

    /// This client's origin id.
    #[must_use]
    pub fn origin_id(&self) -> &str {
        &self.origin_id
    }

    /// Absolute end position of history already observed.
    #[must_use]
    pub const fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Apply a full history view (handshake catch-up or a poll result).
    ///
    /// Entries below the cursor were shown already. A newer epoch means the
    /// history was cleared since the last view and a notice is emitted once.
    /// A view ending below the cursor comes from a restarted relay, so the
    /// cursor restarts. Invalid entries are skipped silently.
    pub fn apply_history(&mut self, history: RawHistory) -> Vec<Output> {
        let RawHistory {
            offset,
            epoch,
            entries,
            notice,
        } = history;
        let end = offset + entries.len() as u64;
        let mut out = Vec::new();

        let cleared = self.epoch.map_or(notice.is_some(), |seen| epoch != seen);
        if end < self.cursor {
            tracing::debug!(cursor = self.cursor, end, "history moved back, restarting cursor");
            self.cursor = 0;
            out.push(Output::Notice(notice.unwrap_or_else(Notice::history_cleared)));
        } else if cleared {
            tracing::debug!(epoch, "history was cleared since the last view");
            out.push(Output::Notice(notice.unwrap_or_else(Notice::history_cleared)));
        }
        self.epoch = Some(epoch);

        let start = self.cursor.max(offset);
        for (index, raw) in (offset..).zip(entries.iter()) {
            if index < start {
                continue;
            }
            if let Some(message) = self.accept(raw) {
                out.push(Output::Chat {
                    message,
                    own: false,
                });
            }
        }

        self.cursor = end;
        out
    }

    /// Apply a live chat frame.
    ///
    /// Frames carrying an index below the cursor are duplicates.
    pub fn apply_chat(&mut self, message: Message, index: Option<u64>) -> Option<Output> {
        match index {
            Some(index) if index < self.cursor => return None,
            Some(index) => self.cursor = index + 1,
            None => self.cursor += 1,
        }
        if message.is_from(&self.origin_id) {
            return None;
        }
        Some(Output::Chat {
            message,
            own: false,
        })
    }

    /// Apply a live notice. The only notice the relay sends announces a
    /// cleared history, one per clear, so the next view will not repeat it.
    pub fn apply_notice(&mut self, notice: Notice) -> Output {
        self.epoch = self.epoch.map(|seen| seen + 1);
        Output::Notice(notice)
    }

    fn accept(&self, raw: &Value) -> Option<Message> {
        let message = Message::validate(raw).ok()?;
        (!message.is_from(&self.origin_id)).then_some(message)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn entry(author: &str, body: &str, origin: &str) -> Value {
        json!({"author": author, "body": body, "originId": origin})
    }

    fn bodies(out: &[Output]) -> Vec<&str> {
        out.iter()
            .filter_map(|o| match o {
                Output::Chat { message, .. } => Some(message.body.as_str()),
                _ => None,
            })
            .collect()
    }

    fn history(offset: u64, entries: Vec<Value>) -> RawHistory {
        RawHistory {
            offset,
            epoch: 0,
            entries,
            notice: None,
        }
    }

    #[test]
    fn test_poll_renders_only_new_entries() {
        let mut feed = Feed::new("me");
        let first = feed.apply_history(history(0, vec![entry("a", "one", "x")]));
        assert_eq!(bodies(&first), ["one"]);
        assert_eq!(feed.cursor(), 1);

        let second = feed.apply_history(history(
            0,
            vec![entry("a", "one", "x"), entry("b", "two", "y")],
        ));
        assert_eq!(bodies(&second), ["two"]);

        assert!(feed.apply_history(history(0, vec![entry("a", "one", "x"), entry("b", "two", "y")])).is_empty());
    }

    #[test]
    fn test_own_and_invalid_entries_are_skipped() {
        let mut feed = Feed::new("me");
        let out = feed.apply_history(history(
            0,
            vec![
                entry("me", "mine", "me"),
                json!({"author": "", "body": "bad"}),
                json!("not an object"),
                entry("b", "theirs", "y"),
            ],
        ));
        assert_eq!(bodies(&out), ["theirs"]);
        assert_eq!(feed.cursor(), 4);
    }

    #[test]
    fn test_restarted_relay_resets_cursor_with_notice() {
        let mut feed = Feed::new("me");
        feed.apply_history(history(0, vec![entry("a", "1", "x"), entry("a", "2", "x")]));

        let out = feed.apply_history(history(0, vec![]));
        assert_eq!(out, vec![Output::Notice(Notice::history_cleared())]);
        assert_eq!(feed.cursor(), 0);

        let out = feed.apply_history(history(0, vec![entry("a", "fresh", "x")]));
        assert_eq!(bodies(&out), ["fresh"]);
    }

    #[test]
    fn test_purge_and_refill_between_polls() {
        let mut feed = Feed::new("me");
        let seen: Vec<Value> = (0..3).map(|i| entry("a", &format!("old{i}"), "x")).collect();
        feed.apply_history(history(0, seen));
        assert_eq!(feed.cursor(), 3);

        // Cleared at position 3, then five more appends before the next poll
        let refill: Vec<Value> = (0..5).map(|i| entry("b", &format!("new{i}"), "y")).collect();
        let out = feed.apply_history(RawHistory {
            offset: 3,
            epoch: 1,
            entries: refill.clone(),
            notice: None,
        });
        assert_eq!(out[0], Output::Notice(Notice::history_cleared()));
        assert_eq!(bodies(&out), ["new0", "new1", "new2", "new3", "new4"]);
        assert_eq!(feed.cursor(), 8);

        let again = feed.apply_history(RawHistory {
            offset: 3,
            epoch: 1,
            entries: refill,
            notice: None,
        });
        assert!(again.is_empty());
    }

    #[test]
    fn test_pending_notice_shown_to_late_joiner_once() {
        let mut feed = Feed::new("me");
        let cleared = RawHistory {
            offset: 4,
            epoch: 1,
            entries: vec![],
            notice: Some(Notice::history_cleared()),
        };
        assert_eq!(
            feed.apply_history(cleared.clone()),
            vec![Output::Notice(Notice::history_cleared())]
        );
        assert!(feed.apply_history(cleared).is_empty());
    }

    #[test]
    fn test_evicted_offset_starts_at_offset() {
        let mut feed = Feed::new("me");
        let out = feed.apply_history(history(5, vec![entry("a", "six", "x")]));
        assert_eq!(bodies(&out), ["six"]);
        assert_eq!(feed.cursor(), 6);
    }

    #[test]
    fn test_push_index_keeps_cursor_exact_for_fallback() {
        let mut feed = Feed::new("me");
        feed.apply_history(history(0, vec![entry("a", "zero", "x")]));

        let live = Message::new("b", "one", Some("y".into())).unwrap();
        assert!(feed.apply_chat(live.clone(), Some(1)).is_some());
        assert!(feed.apply_chat(live, Some(1)).is_none());

        // Own message appended by the relay while we were on push
        let out = feed.apply_history(history(
            0,
            vec![entry("a", "zero", "x"), entry("b", "one", "y"), entry("me", "mine", "me")],
        ));
        assert!(out.is_empty());
        assert_eq!(feed.cursor(), 3);
    }

    #[test]
    fn test_live_notice_is_not_repeated_by_next_poll() {
        let mut feed = Feed::new("me");
        feed.apply_history(history(0, vec![entry("a", "1", "x")]));
        let out = feed.apply_notice(Notice::history_cleared());
        assert_eq!(out, Output::Notice(Notice::history_cleared()));
        assert_eq!(feed.cursor(), 1);

        let out = feed.apply_history(RawHistory {
            offset: 1,
            epoch: 1,
            entries: vec![entry("b", "after", "y")],
            notice: None,
        });
        assert_eq!(out.len(), 1);
        assert_eq!(bodies(&out), ["after"]);
    }
}
