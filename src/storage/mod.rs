use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel::unbounded;
use parking_lot::{Mutex, MutexGuard};

use crate::config::StorageOptions;
use crate::error::{ArchiveError, Result};
use crate::message::{Message, MessageMonthKey};
use crate::thread::Thread;

mod json;
mod table;
mod tables;
mod tx;

pub use self::json::{read_json_file, read_json_lines, write_json_lines};
pub use self::table::{MessageTable, MessagesMap};
pub use self::tables::{
    filter_channels, Channel, ChannelTable, ChannelText, EmojiTable, User, UserProfile, UserTable,
};
pub use self::tx::{MessageBucket, MessageStore, MessageTx, SHARD_EXTENSION};

pub const CHANNELS_FILE: &str = "channels.json";
pub const USERS_FILE: &str = "users.json";

/// Read side of an archive directory:
///
/// ```text
/// <data_dir>/channels.json
/// <data_dir>/users.json
/// <data_dir>/<emoji_json>            (optional)
/// <data_dir>/<channel id>/YYYY-MM-DD.json
/// ```
///
/// Each channel's messages are loaded on first access behind their own lock,
/// so different channels can be read from different threads.
pub struct LogStore {
    data_dir: PathBuf,
    options: StorageOptions,
    channels: ChannelTable,
    users: UserTable,
    emojis: EmojiTable,
    tables: HashMap<String, Mutex<MessageTable>>,
}

impl LogStore {
    pub fn open(options: &StorageOptions) -> Result<Self> {
        let data_dir = &options.data_dir;
        let users = UserTable::load(&data_dir.join(USERS_FILE))?;
        let channels = ChannelTable::load(&data_dir.join(CHANNELS_FILE), &options.channels)?;
        let emojis = EmojiTable::load(&options.emoji_path())?;
        tracing::debug!(
            data_dir = %data_dir.display(),
            channels = channels.len(),
            emojis = emojis.urls().len(),
            "opened log store"
        );
        Ok(Self::from_parts(options.clone(), channels, users, emojis))
    }

    pub fn from_parts(
        options: StorageOptions,
        channels: ChannelTable,
        users: UserTable,
        emojis: EmojiTable,
    ) -> Self {
        let tables = channels
            .iter()
            .map(|c| (c.id.clone(), Mutex::new(MessageTable::new())))
            .collect();
        Self {
            data_dir: options.data_dir.clone(),
            options,
            channels,
            users,
            emojis,
            tables,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    pub fn users(&self) -> &UserTable {
        &self.users
    }

    /// Writer for incremental, per-day JSON Lines shards under the same data directory.
    pub fn message_store(&self) -> MessageStore {
        MessageStore::new(&self.data_dir, self.options.zone)
    }

    pub fn get_messages_per_month(&self, channel_id: &str) -> Result<MessagesMap> {
        Ok(self.load_channel(channel_id)?.messages_map().clone())
    }

    /// Everything worth indexing in a channel: month buckets plus thread replies.
    pub fn get_all_messages(&self, channel_id: &str) -> Result<Vec<Message>> {
        Ok(self.load_channel(channel_id)?.all_messages())
    }

    pub fn get_thread(&self, channel_id: &str, thread_ts: &str) -> Result<Option<Thread>> {
        Ok(self.load_channel(channel_id)?.thread(thread_ts).cloned())
    }

    /// Whether the month after `key` has messages. Only months already loaded
    /// are considered.
    pub fn has_next_month(&self, channel_id: &str, key: MessageMonthKey) -> bool {
        self.has_month(channel_id, key.next())
    }

    pub fn has_prev_month(&self, channel_id: &str, key: MessageMonthKey) -> bool {
        self.has_month(channel_id, key.prev())
    }

    pub fn display_name(&self, user_id: &str) -> String {
        self.users.display_name(user_id)
    }

    pub fn display_name_map(&self) -> HashMap<String, String> {
        self.users.display_name_map()
    }

    pub fn emoji_map(&self) -> &HashMap<String, String> {
        self.emojis.urls()
    }

    /// Loads every channel on `workers` threads. All failures are logged; the
    /// first one (in channel order) is returned.
    pub fn preload(&self, workers: usize) -> Result<()> {
        let ids: Vec<&str> = self.channels.iter().map(|c| c.id.as_str()).collect();
        let (job_tx, job_rx) = unbounded::<(usize, &str)>();
        for job in ids.iter().copied().enumerate() {
            if let Err(err) = job_tx.send(job) {
                let (_, channel_id) = err.into_inner();
                return Err(ArchiveError::Internal(format!(
                    "preload queue closed before channel {channel_id} was queued"
                )));
            }
        }
        drop(job_tx);

        let (err_tx, err_rx) = unbounded::<(usize, ArchiveError)>();
        thread::scope(|scope| {
            for _ in 0..workers.clamp(1, ids.len().max(1)) {
                let job_rx = job_rx.clone();
                let err_tx = err_tx.clone();
                scope.spawn(move || {
                    while let Ok((order, channel_id)) = job_rx.recv() {
                        if let Err(err) = self.load_channel(channel_id) {
                            if let Err(unsent) = err_tx.send((order, err)) {
                                let (_, err) = unsent.into_inner();
                                tracing::error!(channel = channel_id, error = %err, "failed to load channel");
                            }
                        }
                    }
                });
            }
        });
        drop(err_tx);

        let mut failures: Vec<(usize, ArchiveError)> = err_rx.iter().collect();
        failures.sort_by_key(|(order, _)| *order);
        for (order, err) in &failures {
            tracing::error!(channel = ids[*order], error = %err, "failed to load channel");
        }
        match failures.into_iter().next() {
            Some((_, err)) => Err(err),
            None => Ok(()),
        }
    }

    fn has_month(&self, channel_id: &str, key: MessageMonthKey) -> bool {
        self.tables
            .get(channel_id)
            .is_some_and(|table| table.lock().has_month(&key))
    }

    fn load_channel(&self, channel_id: &str) -> Result<MutexGuard<'_, MessageTable>> {
        let table = self
            .tables
            .get(channel_id)
            .ok_or_else(|| ArchiveError::ChannelNotFound(channel_id.to_string()))?;
        let mut table = table.lock();
        let dir = self.data_dir.join(channel_id);
        if dir.is_dir() {
            table.read_log_dir(&dir, self.options.include_all_subtypes)?;
        } else {
            tracing::debug!(channel = channel_id, dir = %dir.display(), "no message directory");
        }
        Ok(table)
    }
}
