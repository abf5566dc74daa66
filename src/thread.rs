use time::OffsetDateTime;

use crate::message::{sort_messages, Message};
use crate::timekey::ArchiveZone;

/// A root message and its replies. The root never appears among the replies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Thread {
    root: Option<Message>,
    replies: Vec<Message>,
}

impl Thread {
    pub fn with_root(root: Message) -> Self {
        Self {
            root: Some(root),
            replies: Vec::new(),
        }
    }

    /// Files `msg` as the root or as a reply. Replies stay in arrival order
    /// until [`Thread::sort_replies`] runs.
    pub fn put(&mut self, msg: Message) {
        if msg.is_root_of_thread() {
            self.root = Some(msg);
        } else if let Some(existing) = self.replies.iter_mut().find(|r| r.ts == msg.ts) {
            *existing = msg;
        } else {
            self.replies.push(msg);
        }
    }

    pub fn sort_replies(&mut self) {
        sort_messages(&mut self.replies);
    }

    pub fn root(&self) -> Option<&Message> {
        self.root.as_ref()
    }

    pub fn root_text(&self) -> &str {
        self.root.as_ref().map(|m| m.text.as_str()).unwrap_or_default()
    }

    pub fn replies(&self) -> &[Message] {
        &self.replies
    }

    pub fn reply_count(&self) -> usize {
        self.replies.len()
    }

    pub fn last_reply_time(&self, zone: ArchiveZone) -> Option<OffsetDateTime> {
        self.replies.last()?.timestamp_time(zone).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Timestamp;
    use time::macros::datetime;

    fn threaded(ts: &str, thread_ts: &str, text: &str) -> Message {
        Message {
            ts: Timestamp::from(ts),
            thread_ts: Some(Timestamp::from(thread_ts)),
            text: text.to_string(),
            ..Message::default()
        }
    }

    #[test]
    fn reconstructs_root_and_ordered_replies_from_any_order() {
        let root = threaded("1600000000.000100", "1600000000.000100", "root");
        let first = threaded("1600000001.000100", "1600000000.000100", "first");
        let second = threaded("1600000002.000100", "1600000000.000100", "second");

        let mut thread = Thread::default();
        for msg in [second.clone(), root.clone(), first.clone()] {
            thread.put(msg);
        }
        thread.sort_replies();

        assert_eq!(thread.root(), Some(&root));
        assert_eq!(thread.replies(), &[first, second][..]);
        assert_eq!(thread.reply_count(), 2);
        assert_eq!(thread.root_text(), "root");
        assert_eq!(
            thread.last_reply_time(ArchiveZone::default()),
            Some(datetime!(2020-09-13 21:26:42.0001 +09:00))
        );
    }

    #[test]
    fn repeated_reply_replaces_instead_of_duplicating() {
        let mut thread = Thread::default();
        thread.put(threaded("2.0", "1.0", "draft"));
        thread.put(threaded("2.0", "1.0", "final"));
        assert_eq!(thread.reply_count(), 1);
        assert_eq!(thread.replies()[0].text, "final");
        assert!(thread.root().is_none());
        assert_eq!(thread.root_text(), "");
    }
}
