use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};

use crate::error::{ArchiveError, Result};
use crate::message::Message;
use crate::storage::json::{read_json_lines, write_json_lines};
use crate::timekey::{ArchiveZone, TimeKey};

pub const SHARD_EXTENSION: &str = "jsonl";

#[derive(Debug, Default)]
struct BucketState {
    msgs: Vec<Message>,
    // client id -> position in `msgs`
    idx: HashMap<String, usize>,
    sorted: bool,
}

impl BucketState {
    fn upsert(&mut self, msg: Message) -> bool {
        self.sorted = false;
        if let Some(&i) = self.idx.get(&msg.client_msg_id) {
            self.msgs[i] = msg;
            return true;
        }
        self.idx.insert(msg.client_msg_id.clone(), self.msgs.len());
        self.msgs.push(msg);
        false
    }

    fn delete(&mut self, id: &str) -> bool {
        let Some(i) = self.idx.remove(id) else {
            return false;
        };
        self.msgs.swap_remove(i);
        if let Some(moved) = self.msgs.get(i) {
            if !moved.client_msg_id.is_empty() {
                self.idx.insert(moved.client_msg_id.clone(), i);
            }
        }
        self.sorted = false;
        true
    }

    fn sort(&mut self) {
        if self.sorted {
            return;
        }
        self.msgs.sort_by(|a, b| a.ts.chronological_cmp(&b.ts));
        self.reindex();
        self.sorted = true;
    }

    fn reindex(&mut self) {
        self.idx.clear();
        for (i, msg) in self.msgs.iter().enumerate() {
            if !msg.client_msg_id.is_empty() {
                self.idx.insert(msg.client_msg_id.clone(), i);
            }
        }
    }
}

/// Messages of one day, addressable by client id.
///
/// Entries live in a plain vector; deletion swaps the last entry into the gap,
/// so order is only meaningful after [`MessageBucket::sort`].
#[derive(Debug, Default)]
pub struct MessageBucket {
    state: RwLock<BucketState>,
}

impl MessageBucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a bucket from a shard as read from disk. Messages without a
    /// client id are kept but cannot be addressed; a repeated id keeps the
    /// later copy.
    pub fn from_messages(msgs: Vec<Message>) -> Self {
        let mut state = BucketState::default();
        for msg in msgs {
            if msg.client_msg_id.is_empty() {
                state.msgs.push(msg);
            } else {
                state.upsert(msg);
            }
        }
        Self {
            state: RwLock::new(state),
        }
    }

    /// Returns `true` when a message with the same client id was replaced.
    pub fn upsert(&self, msg: Message) -> Result<bool> {
        if msg.client_msg_id.is_empty() {
            return Err(ArchiveError::EmptyIdentifier);
        }
        Ok(self.state.write().upsert(msg))
    }

    pub fn delete(&self, id: &str) -> bool {
        self.state.write().delete(id)
    }

    pub fn sort(&self) {
        if self.state.read().sorted {
            return;
        }
        self.state.write().sort();
    }

    pub fn len(&self) -> usize {
        self.state.read().msgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted copy of the contents.
    pub fn snapshot(&self) -> Vec<Message> {
        self.sort();
        self.state.read().msgs.clone()
    }

    /// Merges `other` into `self` by timestamp. On equal timestamps entries of
    /// `self` come first. A client id present in both keeps `other`'s copy.
    ///
    /// Locks are taken in address order so concurrent `a.merge(b)` and
    /// `b.merge(a)` cannot deadlock.
    pub fn merge(&self, other: &MessageBucket) {
        if std::ptr::eq(self, other) {
            self.sort();
            return;
        }

        let (mut mine, theirs) = if (self as *const Self) < (other as *const Self) {
            let mine = self.state.write();
            let theirs = other.state.write();
            (mine, theirs)
        } else {
            let theirs = other.state.write();
            let mine = self.state.write();
            (mine, theirs)
        };
        let theirs = {
            let mut theirs = theirs;
            theirs.sort();
            RwLockWriteGuard::downgrade(theirs)
        };
        mine.sort();

        let replaced: HashSet<&str> = theirs
            .msgs
            .iter()
            .map(|m| m.client_msg_id.as_str())
            .filter(|id| !id.is_empty())
            .collect();

        let existing = std::mem::take(&mut mine.msgs);
        let mut left = existing
            .into_iter()
            .filter(|m| m.client_msg_id.is_empty() || !replaced.contains(m.client_msg_id.as_str()))
            .peekable();
        let mut right = theirs.msgs.iter().peekable();

        let mut merged = Vec::with_capacity(left.size_hint().0 + theirs.msgs.len());
        loop {
            let take_right = match (left.peek(), right.peek()) {
                (Some(a), Some(b)) => b.before(a),
                (Some(_), None) => false,
                (None, Some(_)) => true,
                (None, None) => break,
            };
            if take_right {
                if let Some(b) = right.next() {
                    merged.push(b.clone());
                }
            } else if let Some(a) = left.next() {
                merged.push(a);
            }
        }

        mine.msgs = merged;
        mine.reindex();
        mine.sorted = true;
    }
}

/// Entry point for incremental writes into `<dir>/<channel>/YYYY-MM-DD.jsonl`.
#[derive(Debug, Clone)]
pub struct MessageStore {
    dir: PathBuf,
    zone: ArchiveZone,
}

impl MessageStore {
    pub fn new(dir: impl Into<PathBuf>, zone: ArchiveZone) -> Self {
        Self {
            dir: dir.into(),
            zone,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn begin(&self, channel_id: &str) -> MessageTx {
        MessageTx {
            channel_id: channel_id.to_string(),
            dir: self.dir.join(channel_id),
            zone: self.zone,
            upserts: Mutex::new(BTreeMap::new()),
        }
    }
}

/// Buffered upserts for one channel, grouped by day.
#[derive(Debug)]
pub struct MessageTx {
    channel_id: String,
    dir: PathBuf,
    zone: ArchiveZone,
    upserts: Mutex<BTreeMap<TimeKey, Arc<MessageBucket>>>,
}

impl MessageTx {
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Returns `true` when a buffered message with the same client id was replaced.
    pub fn upsert(&self, msg: Message) -> Result<bool> {
        if msg.client_msg_id.is_empty() {
            return Err(ArchiveError::EmptyIdentifier);
        }
        let key = TimeKey::of_day(msg.timestamp_time(self.zone)?, self.zone);
        let bucket = Arc::clone(self.upserts.lock().entry(key).or_default());
        bucket.upsert(msg)
    }

    pub fn delete(&self, msg: &Message) -> bool {
        let Ok(instant) = msg.timestamp_time(self.zone) else {
            return false;
        };
        let key = TimeKey::of_day(instant, self.zone);
        let bucket = self.upserts.lock().get(&key).cloned();
        bucket.is_some_and(|b| b.delete(&msg.client_msg_id))
    }

    /// Visits buffered messages of every day inside `key`, oldest first.
    /// Fails with [`ArchiveError::IterationAborted`] if `visit` returns `false`.
    pub fn iterate<F>(&self, key: &TimeKey, mut visit: F) -> Result<()>
    where
        F: FnMut(&Message) -> bool,
    {
        for bucket in self.buckets_within(key) {
            for msg in bucket.snapshot() {
                if !visit(&msg) {
                    return Err(ArchiveError::IterationAborted);
                }
            }
        }
        Ok(())
    }

    pub fn count(&self, key: &TimeKey) -> usize {
        self.buckets_within(key).iter().map(|b| b.len()).sum()
    }

    /// Merges every touched day into its shard on disk, then clears the buffer.
    pub fn commit(&self) -> Result<()> {
        let pending: Vec<(TimeKey, Arc<MessageBucket>)> = self
            .upserts
            .lock()
            .iter()
            .map(|(key, bucket)| (*key, Arc::clone(bucket)))
            .collect();

        for (key, bucket) in &pending {
            let path = self.shard_path(key);
            let on_disk = MessageBucket::from_messages(read_json_lines(&path)?);
            on_disk.merge(bucket);
            let merged = on_disk.snapshot();
            write_json_lines(&path, &merged)?;
            tracing::debug!(
                channel = %self.channel_id,
                path = %path.display(),
                messages = merged.len(),
                "committed day-shard"
            );
        }

        self.upserts.lock().clear();
        Ok(())
    }

    pub fn rollback(&self) {
        self.upserts.lock().clear();
    }

    fn shard_path(&self, key: &TimeKey) -> PathBuf {
        self.dir
            .join(format!("{}.{SHARD_EXTENSION}", key.begin_date_string()))
    }

    fn buckets_within(&self, key: &TimeKey) -> Vec<Arc<MessageBucket>> {
        self.upserts
            .lock()
            .iter()
            .filter(|(day, _)| key.contains(day))
            .map(|(_, bucket)| Arc::clone(bucket))
            .collect()
    }
}
