use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ArchiveError, Result};
use crate::message::{mark_trails, sort_messages, Message, MessageMonthKey, Timestamp};
use crate::storage::json::read_json_file;
use crate::storage::tx::SHARD_EXTENSION;
use crate::thread::Thread;

/// Visible messages of one channel, per calendar month, in timestamp order.
pub type MessagesMap = BTreeMap<MessageMonthKey, Vec<Message>>;

// "{year}-{month}-{day}.json"
static DAY_SHARD_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})-(\d{2})-\d{2}\.json$").expect("valid day-shard filename pattern")
});

/// All loaded messages of one channel.
///
/// Day-shard files are read lazily and at most once each; reading the same
/// file or directory again is a no-op.
#[derive(Debug, Default)]
pub struct MessageTable {
    // month of every bucketed message, to find roots for threads seen later
    bucketed: HashMap<Timestamp, MessageMonthKey>,
    threads: HashMap<Timestamp, Thread>,
    months: MessagesMap,
    loaded_files: HashSet<PathBuf>,
}

impl MessageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads every `YYYY-MM-DD.json` in `dir`, in filename (and so date) order.
    pub fn read_log_dir(&mut self, dir: &Path, include_all_subtypes: bool) -> Result<()> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir).map_err(|err| ArchiveError::io(dir, err))? {
            let entry = entry.map_err(|err| ArchiveError::io(dir, err))?;
            names.push(entry.file_name());
        }
        names.sort();
        for name in names {
            self.read_log_file(&dir.join(name), include_all_subtypes)?;
        }
        Ok(())
    }

    pub fn read_log_file(&mut self, path: &Path, include_all_subtypes: bool) -> Result<()> {
        let path = absolute(path)?;
        if self.loaded_files.contains(&path) {
            return Ok(());
        }

        if path.extension().is_some_and(|ext| ext == SHARD_EXTENSION) {
            tracing::debug!(path = %path.display(), "skipping incremental shard");
            return Ok(());
        }
        let Some(key) = month_key_for(&path) else {
            tracing::warn!(path = %path.display(), "skipping file without YYYY-MM-DD.json name");
            return Ok(());
        };

        let msgs: Vec<Message> = read_json_file(&path)?;
        for msg in &msgs {
            if let Some(field) = msg.unknown_fields().into_iter().next() {
                return Err(ArchiveError::UnknownField { path, field });
            }
        }

        let mut touched_threads = BTreeSet::new();
        let mut visible = Vec::new();
        for msg in msgs {
            if let Some(thread_ts) = msg.thread_timestamp().cloned() {
                if !self.threads.contains_key(&thread_ts) {
                    let root = self.find_bucketed(&thread_ts, &visible);
                    let thread = root.map(Thread::with_root).unwrap_or_default();
                    self.threads.insert(thread_ts.clone(), thread);
                }
                if let Some(thread) = self.threads.get_mut(&thread_ts) {
                    thread.put(msg.clone());
                }
                touched_threads.insert(thread_ts);
            }

            if !include_all_subtypes && (!msg.is_visible() || msg.is_thread_child()) {
                continue;
            }
            self.bucketed.insert(msg.ts.clone(), key);
            visible.push(msg);
        }

        for ts in &touched_threads {
            if let Some(thread) = self.threads.get_mut(ts) {
                thread.sort_replies();
            }
        }

        if !visible.is_empty() {
            let bucket = self.months.entry(key).or_default();
            bucket.extend(visible);
            sort_messages(bucket);
            mark_trails(bucket);
        }

        tracing::debug!(path = %path.display(), month = %key, "loaded day-shard");
        self.loaded_files.insert(path);
        Ok(())
    }

    /// A bucketed message with timestamp `ts`, looking at the file being read
    /// (`pending`) before the buckets. The latest copy wins.
    fn find_bucketed(&self, ts: &Timestamp, pending: &[Message]) -> Option<Message> {
        pending
            .iter()
            .rev()
            .find(|m| m.ts == *ts)
            .or_else(|| {
                let key = self.bucketed.get(ts)?;
                self.months.get(key)?.iter().rev().find(|m| m.ts == *ts)
            })
            .cloned()
    }

    pub fn messages_map(&self) -> &MessagesMap {
        &self.months
    }

    pub fn thread(&self, thread_ts: &str) -> Option<&Thread> {
        self.threads.get(&Timestamp::from(thread_ts))
    }

    pub fn threads(&self) -> &HashMap<Timestamp, Thread> {
        &self.threads
    }

    pub fn has_month(&self, key: &MessageMonthKey) -> bool {
        self.months.contains_key(key)
    }

    pub fn is_loaded(&self, path: &Path) -> bool {
        absolute(path)
            .map(|p| self.loaded_files.contains(&p))
            .unwrap_or(false)
    }

    /// Every month-bucket message plus thread replies kept out of the
    /// buckets, once each, in timestamp order.
    pub fn all_messages(&self) -> Vec<Message> {
        let mut seen: HashSet<&Timestamp> = HashSet::new();
        let mut all = Vec::new();
        let bucketed = self.months.values().flatten();
        let replies = self.threads.values().flat_map(|t| t.root().into_iter().chain(t.replies()));
        for msg in bucketed.chain(replies) {
            if seen.insert(&msg.ts) {
                all.push(msg.clone());
            }
        }
        sort_messages(&mut all);
        all
    }
}

fn month_key_for(path: &Path) -> Option<MessageMonthKey> {
    let name = path.file_name()?.to_str()?;
    let caps = DAY_SHARD_NAME.captures(name)?;
    MessageMonthKey::parse(&caps[1], &caps[2])
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = env::current_dir().map_err(|err| ArchiveError::io(path, err))?;
    Ok(cwd.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).expect("write fixture");
        path
    }

    fn fixture() -> TempDir {
        let temp = TempDir::new().expect("temp dir");
        let dir = temp.path();
        write(
            dir,
            "2020-03-09.json",
            r#"[
                {"type":"message","user":"U1","text":"root","ts":"1583700000.000100","thread_ts":"1583700000.000100","client_msg_id":"r"},
                {"type":"message","user":"U2","text":"second reply","ts":"1583700002.000100","thread_ts":"1583700000.000100"},
                {"type":"message","user":"U2","text":"hello","ts":"1583700001.000000"},
                {"type":"message","subtype":"channel_join","user":"U3","text":"joined","ts":"1583700003.000000"}
            ]"#,
        );
        write(
            dir,
            "2020-03-10.json",
            r#"[
                {"type":"message","user":"U3","text":"first reply","ts":"1583700001.500000","thread_ts":"1583700000.000100"},
                {"type":"message","subtype":"thread_broadcast","user":"U3","text":"broadcast","ts":"1583790000.000000","thread_ts":"1583700000.000100"},
                {"type":"message","user":"U3","text":"later","ts":"1583790001.000000"}
            ]"#,
        );
        write(
            dir,
            "2020-04-01.json",
            r#"[{"type":"message","user":"U1","text":"april","ts":"1585666800.000000"}]"#,
        );
        write(dir, "notes.txt", "not a shard");
        write(dir, "2020-03-09.jsonl", "not read by the bulk loader");
        temp
    }

    #[test]
    fn buckets_visible_messages_by_month_in_order() -> anyhow::Result<()> {
        let temp = fixture();
        let mut table = MessageTable::new();
        table.read_log_dir(temp.path(), false)?;

        let march = &table.messages_map()[&MessageMonthKey::new(2020, 3).unwrap()];
        let texts: Vec<_> = march.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["root", "hello", "broadcast", "later"]);
        let trails: Vec<_> = march.iter().map(|m| m.trail).collect();
        assert_eq!(trails, vec![false, false, false, true]);

        assert!(table.has_month(&MessageMonthKey::new(2020, 4).unwrap()));
        assert!(!table.has_month(&MessageMonthKey::new(2020, 5).unwrap()));
        Ok(())
    }

    #[test]
    fn reconstructs_threads_across_files() -> anyhow::Result<()> {
        let temp = fixture();
        let mut table = MessageTable::new();
        table.read_log_dir(temp.path(), false)?;

        let thread = table.thread("1583700000.000100").expect("thread present");
        assert_eq!(thread.root().map(|m| m.text.as_str()), Some("root"));
        let replies: Vec<_> = thread.replies().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(replies, vec!["first reply", "second reply", "broadcast"]);
        Ok(())
    }

    #[test]
    fn rereading_is_a_no_op() -> anyhow::Result<()> {
        let temp = fixture();
        let mut once = MessageTable::new();
        once.read_log_dir(temp.path(), false)?;

        let mut twice = MessageTable::new();
        twice.read_log_dir(temp.path(), false)?;
        twice.read_log_dir(temp.path(), false)?;
        twice.read_log_file(&temp.path().join("2020-03-09.json"), false)?;

        assert_eq!(once.messages_map(), twice.messages_map());
        assert_eq!(once.threads(), twice.threads());
        assert!(twice.is_loaded(&temp.path().join("2020-04-01.json")));
        assert!(!twice.is_loaded(&temp.path().join("notes.txt")));
        assert!(!twice.is_loaded(&temp.path().join("2020-03-09.jsonl")));
        Ok(())
    }

    #[test]
    fn include_all_keeps_hidden_and_replies_in_buckets() -> anyhow::Result<()> {
        let temp = fixture();
        let mut table = MessageTable::new();
        table.read_log_dir(temp.path(), true)?;
        let march = &table.messages_map()[&MessageMonthKey::new(2020, 3).unwrap()];
        assert_eq!(march.len(), 7);
        assert!(march.iter().any(|m| m.subtype == "channel_join"));
        Ok(())
    }

    #[test]
    fn all_messages_includes_hidden_replies_once() -> anyhow::Result<()> {
        let temp = fixture();
        let mut table = MessageTable::new();
        table.read_log_dir(temp.path(), false)?;
        let texts: Vec<_> = table.all_messages().into_iter().map(|m| m.text).collect();
        assert_eq!(
            texts,
            vec!["root", "hello", "first reply", "second reply", "broadcast", "later", "april"]
        );
        Ok(())
    }

    #[test]
    fn attaches_roots_without_thread_ts_from_earlier_files() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        write(
            temp.path(),
            "2020-03-09.json",
            r#"[
                {"type":"message","user":"U1","text":"plain root","ts":"1583700000.000100"},
                {"type":"message","user":"U2","text":"same day","ts":"1583700001.000000","thread_ts":"1583700000.000100"}
            ]"#,
        );
        write(
            temp.path(),
            "2020-03-10.json",
            r#"[
                {"type":"message","user":"U1","text":"second root","ts":"1583790000.000000"}
            ]"#,
        );
        write(
            temp.path(),
            "2020-03-11.json",
            r#"[
                {"type":"message","user":"U3","text":"late reply","ts":"1583880000.000000","thread_ts":"1583790000.000000"}
            ]"#,
        );
        let mut table = MessageTable::new();
        table.read_log_dir(temp.path(), false)?;

        let first = table.thread("1583700000.000100").expect("first thread");
        assert_eq!(first.root_text(), "plain root");
        assert_eq!(first.reply_count(), 1);
        let second = table.thread("1583790000.000000").expect("second thread");
        assert_eq!(second.root_text(), "second root");
        assert_eq!(second.replies()[0].text, "late reply");
        Ok(())
    }

    #[test]
    fn nested_unknown_fields_are_fatal() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        write(
            temp.path(),
            "2020-01-01.json",
            r#"[{"ts":"1.0","edited":{"user":"U","ts":"1.0"},"reactions":[{"name":"a","users":[],"count":0,"drift":1}]}]"#,
        );
        let mut table = MessageTable::new();
        assert_matches!(
            table.read_log_dir(temp.path(), false),
            Err(ArchiveError::UnknownField { ref field, .. }) if field == "reactions[0].drift"
        );

        let temp = TempDir::new()?;
        write(
            temp.path(),
            "2020-01-01.json",
            r#"[{"ts":"1.0","edited":{"user":"U","ts":"1.0","drift":1}}]"#,
        );
        let mut table = MessageTable::new();
        assert_matches!(
            table.read_log_dir(temp.path(), false),
            Err(ArchiveError::UnknownField { ref field, .. }) if field == "edited.drift"
        );
        Ok(())
    }

    #[test]
    fn unknown_fields_are_fatal_with_path() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        write(
            temp.path(),
            "2020-01-01.json",
            r#"[{"type":"message","text":"x","ts":"1.0","mystery":1}]"#,
        );
        let mut table = MessageTable::new();
        let err = table.read_log_dir(temp.path(), false).unwrap_err();
        assert_matches!(err, ArchiveError::UnknownField { ref field, .. } if field == "mystery");
        assert!(err.to_string().contains("2020-01-01.json"));
        Ok(())
    }

    #[test]
    fn malformed_json_is_fatal() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        write(temp.path(), "2020-01-01.json", r#"{"not":"an array"}"#);
        let mut table = MessageTable::new();
        assert_matches!(
            table.read_log_dir(temp.path(), false),
            Err(ArchiveError::Decode { .. })
        );
        Ok(())
    }
}
