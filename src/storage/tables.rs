use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::storage::json::read_json_file;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_general: bool,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub topic: ChannelText,
    #[serde(default)]
    pub purpose: ChannelText,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Topic or purpose of a channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelText {
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub last_set: i64,
}

/// Whitelisted channels sorted by name, addressable by id.
#[derive(Debug, Clone, Default)]
pub struct ChannelTable {
    channels: IndexMap<String, Channel>,
}

impl ChannelTable {
    pub fn load(path: &Path, whitelist: &[String]) -> Result<Self> {
        let channels: Vec<Channel> = read_json_file(path)?;
        Ok(Self::from_channels(channels, whitelist))
    }

    pub fn from_channels(channels: Vec<Channel>, whitelist: &[String]) -> Self {
        let mut channels = filter_channels(channels, whitelist);
        channels.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            channels: channels.into_iter().map(|c| (c.id.clone(), c)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Channel> {
        self.channels.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Keeps channels whose name is whitelisted. `"*"` keeps everything and an
/// empty whitelist keeps nothing.
pub fn filter_channels(channels: Vec<Channel>, whitelist: &[String]) -> Vec<Channel> {
    if whitelist.iter().any(|name| name == "*") {
        return channels;
    }
    channels
        .into_iter()
        .filter(|c| whitelist.contains(&c.name))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub real_name: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub profile: UserProfile,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub real_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub bot_id: String,
    #[serde(default)]
    pub image_48: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct UserTable {
    users: Vec<User>,
    // user id and bot id -> position in `users`
    index: HashMap<String, usize>,
}

impl UserTable {
    pub fn load(path: &Path) -> Result<Self> {
        let users: Vec<User> = read_json_file(path)?;
        Ok(Self::from_users(users))
    }

    pub fn from_users(users: Vec<User>) -> Self {
        let mut index = HashMap::with_capacity(users.len());
        for (i, user) in users.iter().enumerate() {
            index.insert(user.id.clone(), i);
            if !user.profile.bot_id.is_empty() {
                index.insert(user.profile.bot_id.clone(), i);
            }
        }
        Self { users, index }
    }

    pub fn get(&self, id: &str) -> Option<&User> {
        self.index.get(id).and_then(|&i| self.users.get(i))
    }

    /// Profile real name, then display name, else empty.
    pub fn display_name(&self, id: &str) -> String {
        let Some(user) = self.get(id) else {
            return String::new();
        };
        if !user.profile.real_name.is_empty() {
            user.profile.real_name.clone()
        } else {
            user.profile.display_name.clone()
        }
    }

    pub fn display_name_map(&self) -> HashMap<String, String> {
        self.index
            .keys()
            .map(|id| (id.clone(), self.display_name(id)))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &User> {
        self.users.iter()
    }
}

/// Custom emoji name to image URL (or `alias:` target).
#[derive(Debug, Clone, Default)]
pub struct EmojiTable {
    urls: HashMap<String, String>,
}

impl EmojiTable {
    /// A missing file, or a directory at `path`, yields an empty table.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            tracing::debug!(path = %path.display(), "emoji table not found, continuing without");
            return Ok(Self::default());
        }
        let urls: HashMap<String, String> = read_json_file(path)?;
        Ok(Self { urls })
    }

    pub fn url(&self, name: &str) -> Option<&str> {
        self.urls.get(name).map(String::as_str)
    }

    pub fn urls(&self) -> &HashMap<String, String> {
        &self.urls
    }
}
