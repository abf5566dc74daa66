use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Month, OffsetDateTime};

use crate::error::Result;
use crate::timekey::{parse_timestamp, split_timestamp, ArchiveZone, TimeKey};

/// Subtypes rendered inline next to ordinary user messages.
pub const VISIBLE_SUBTYPES: &[&str] = &["bot_message", "slackbot_response", "thread_broadcast"];

const BOT_SUBTYPES: &[&str] = &["bot_message", "slackbot_response"];
const THREAD_BROADCAST: &str = "thread_broadcast";

/// Message keys the upstream API is known to emit but which this crate keeps
/// untyped. Anything else in a strictly-read day-shard is schema drift.
const PASSTHROUGH_FIELDS: &[&str] = &[
    "blocks",
    "bot_id",
    "bot_profile",
    "channel",
    "display_as_bot",
    "hidden",
    "icons",
    "inviter",
    "is_locked",
    "is_starred",
    "last_read",
    "latest_reply",
    "name",
    "old_name",
    "parent_user_id",
    "permalink",
    "pinned_to",
    "purpose",
    "reply_count",
    "reply_users",
    "reply_users_count",
    "root",
    "source_team",
    "subscribed",
    "team",
    "topic",
    "upload",
    "user_profile",
    "user_team",
    "username",
    "x_files",
];

const FILE_PASSTHROUGH_FIELDS: &[&str] = &[
    "created",
    "deanimate_gif",
    "display_as_bot",
    "edit_link",
    "editable",
    "external_type",
    "has_rich_preview",
    "is_external",
    "is_public",
    "is_starred",
    "mode",
    "original_h",
    "original_w",
    "permalink",
    "permalink_public",
    "pretty_type",
    "public_url_shared",
    "size",
    "thumb_1024",
    "thumb_1024_h",
    "thumb_1024_w",
    "thumb_160",
    "thumb_360",
    "thumb_360_gif",
    "thumb_360_h",
    "thumb_360_w",
    "thumb_480",
    "thumb_480_gif",
    "thumb_480_h",
    "thumb_480_w",
    "thumb_64",
    "thumb_720",
    "thumb_720_h",
    "thumb_720_w",
    "thumb_80",
    "thumb_800",
    "thumb_800_h",
    "thumb_800_w",
    "thumb_960",
    "thumb_960_h",
    "thumb_960_w",
    "thumb_tiny",
    "thumb_video",
    "timestamp",
    "user",
    "username",
];

const ATTACHMENT_PASSTHROUGH_FIELDS: &[&str] = &[
    "author_icon",
    "author_name",
    "author_subname",
    "footer",
    "footer_icon",
    "from_url",
    "original_url",
    "service_icon",
    "service_name",
    "thumb_height",
    "thumb_url",
    "thumb_width",
    "video_html",
    "video_html_height",
    "video_html_width",
];

/// Slack-style `SECONDS.MICROSECONDS` string. The raw text is kept verbatim so
/// it round-trips through JSON and the index writer unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(String);

impl Timestamp {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn parts(&self) -> Result<(i64, u32)> {
        split_timestamp(&self.0)
    }

    pub fn to_time(&self, zone: ArchiveZone) -> Result<OffsetDateTime> {
        parse_timestamp(&self.0, zone)
    }

    /// Orders by the decimal value the string encodes. Unparseable values sort
    /// first, among themselves by raw text, so the ordering stays total.
    pub fn chronological_cmp(&self, other: &Timestamp) -> Ordering {
        match (self.parts().ok(), other.parts().ok()) {
            (Some(a), Some(b)) => a.cmp(&b),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Timestamp {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_msg_id: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subtype: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default)]
    pub text: String,
    pub ts: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited: Option<Edited>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<File>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<Reaction>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,

    /// Rendering hint: the previous message in its month bucket has the same author.
    #[serde(skip)]
    pub trail: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Edited {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub ts: Timestamp,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct File {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mimetype: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filetype: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url_private: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url_private_download: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<AttachmentTs>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fallback: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title_link: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Attachment timestamps arrive either quoted or as bare JSON numbers and are
/// written back in whichever shape they came in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttachmentTs {
    Text(String),
    Number(serde_json::Number),
}

impl AttachmentTs {
    pub fn value(&self) -> String {
        match self {
            AttachmentTs::Text(s) => s.clone(),
            AttachmentTs::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub name: String,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub count: u32,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Message {
    pub fn timestamp_time(&self, zone: ArchiveZone) -> Result<OffsetDateTime> {
        self.ts.to_time(zone)
    }

    pub fn before(&self, other: &Message) -> bool {
        self.ts.chronological_cmp(&other.ts) == Ordering::Less
    }

    /// The thread this message belongs to; an empty `thread_ts` means none.
    pub fn thread_timestamp(&self) -> Option<&Timestamp> {
        self.thread_ts.as_ref().filter(|ts| !ts.is_empty())
    }

    pub fn is_visible(&self) -> bool {
        self.subtype.is_empty() || VISIBLE_SUBTYPES.contains(&self.subtype.as_str())
    }

    pub fn is_bot_message(&self) -> bool {
        BOT_SUBTYPES.contains(&self.subtype.as_str())
    }

    pub fn is_root_of_thread(&self) -> bool {
        self.thread_timestamp() == Some(&self.ts)
    }

    /// Replies that belong only in the thread view, not in the channel timeline.
    pub fn is_thread_child(&self) -> bool {
        match self.thread_timestamp() {
            Some(thread_ts) => *thread_ts != self.ts && self.subtype != THREAD_BROADCAST,
            None => false,
        }
    }

    pub fn is_edited(&self) -> bool {
        self.edited.is_some()
    }

    /// Keys, at any level of the message, that are neither typed fields nor
    /// known passthrough fields. Nested keys are reported as paths such as
    /// `files[0].key` or `edited.key`.
    pub fn unknown_fields(&self) -> Vec<String> {
        let mut found = Vec::new();
        collect_unknown(&mut found, "", &self.extra, PASSTHROUGH_FIELDS);
        if let Some(edited) = &self.edited {
            collect_unknown(&mut found, "edited.", &edited.extra, &[]);
        }
        for (i, file) in self.files.iter().enumerate() {
            let prefix = format!("files[{i}].");
            collect_unknown(&mut found, &prefix, &file.extra, FILE_PASSTHROUGH_FIELDS);
        }
        for (i, attachment) in self.attachments.iter().enumerate() {
            let prefix = format!("attachments[{i}].");
            collect_unknown(&mut found, &prefix, &attachment.extra, ATTACHMENT_PASSTHROUGH_FIELDS);
        }
        for (i, reaction) in self.reactions.iter().enumerate() {
            let prefix = format!("reactions[{i}].");
            collect_unknown(&mut found, &prefix, &reaction.extra, &[]);
        }
        found
    }
}

fn collect_unknown(
    found: &mut Vec<String>,
    prefix: &str,
    extra: &BTreeMap<String, Value>,
    known: &[&str],
) {
    found.extend(
        extra
            .keys()
            .filter(|key| !known.contains(&key.as_str()))
            .map(|key| format!("{prefix}{key}")),
    );
}

/// Stable sort by timestamp; equal timestamps keep their relative order.
pub fn sort_messages(msgs: &mut [Message]) {
    msgs.sort_by(|a, b| a.ts.chronological_cmp(&b.ts));
}

/// Recomputes `trail` from authorship of the immediately preceding message.
pub fn mark_trails(msgs: &mut [Message]) {
    let mut previous: Option<String> = None;
    for msg in msgs.iter_mut() {
        msg.trail = previous.as_deref() == Some(msg.user.as_str());
        previous = Some(msg.user.clone());
    }
}

/// Calendar month bucket key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageMonthKey {
    year: i32,
    month: u8,
}

impl MessageMonthKey {
    pub fn new(year: i32, month: u8) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn parse(year: &str, month: &str) -> Option<Self> {
        Self::new(year.parse().ok()?, month.parse().ok()?)
    }

    pub fn of_instant(instant: OffsetDateTime, zone: ArchiveZone) -> Self {
        let local = instant.to_offset(zone.offset());
        Self {
            year: local.year(),
            month: u8::from(local.month()),
        }
    }

    pub fn year_number(&self) -> i32 {
        self.year
    }

    pub fn month_number(&self) -> u8 {
        self.month
    }

    pub fn next(&self) -> Self {
        if self.month >= 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn prev(&self) -> Self {
        if self.month <= 1 {
            Self {
                year: self.year - 1,
                month: 12,
            }
        } else {
            Self {
                year: self.year,
                month: self.month - 1,
            }
        }
    }

    pub fn year(&self) -> String {
        format!("{:04}", self.year)
    }

    pub fn month(&self) -> String {
        format!("{:02}", self.month)
    }

    pub fn next_year(&self) -> String {
        self.next().year()
    }

    pub fn next_month(&self) -> String {
        self.next().month()
    }

    pub fn prev_year(&self) -> String {
        self.prev().year()
    }

    pub fn prev_month(&self) -> String {
        self.prev().month()
    }

    pub fn time_key(&self, zone: ArchiveZone) -> Option<TimeKey> {
        let month = Month::try_from(self.month).ok()?;
        TimeKey::of_month(self.year, month, zone)
    }
}

impl fmt::Display for MessageMonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(ts: &str, user: &str) -> Message {
        Message {
            ts: Timestamp::from(ts),
            user: user.to_string(),
            ..Message::default()
        }
    }

    #[test]
    fn orders_numerically_not_lexicographically() {
        let short = Timestamp::from("999.5");
        let long = Timestamp::from("1000.000001");
        assert_eq!(short.chronological_cmp(&long), Ordering::Less);
        assert_eq!(
            Timestamp::from("10.5").chronological_cmp(&Timestamp::from("10.500000")),
            Ordering::Equal
        );
        assert_eq!(
            Timestamp::from("bogus").chronological_cmp(&Timestamp::from("1.0")),
            Ordering::Less
        );
    }

    #[test]
    fn trail_depends_only_on_previous_author() {
        let mut msgs = vec![
            msg("3.0", "bob"),
            msg("1.0", "alice"),
            msg("2.0", "alice"),
            msg("2.0", "bob"),
            msg("4.0", "bob"),
        ];
        sort_messages(&mut msgs);
        mark_trails(&mut msgs);
        let seen: Vec<_> = msgs
            .iter()
            .map(|m| (m.ts.as_str(), m.user.as_str(), m.trail))
            .collect();
        assert_eq!(
            seen,
            vec![
                ("1.0", "alice", false),
                ("2.0", "alice", true),
                ("2.0", "bob", false),
                ("3.0", "bob", true),
                ("4.0", "bob", true),
            ]
        );

        // Recomputing after a mutation clears stale flags.
        msgs.remove(1);
        mark_trails(&mut msgs);
        assert!(!msgs[1].trail);
    }

    #[test]
    fn thread_predicates() {
        let mut root = msg("10.0", "a");
        root.thread_ts = Some("10.0".into());
        assert!(root.is_root_of_thread());
        assert!(!root.is_thread_child());

        let mut reply = msg("11.0", "b");
        reply.thread_ts = Some("10.0".into());
        assert!(reply.is_thread_child());

        reply.subtype = "thread_broadcast".into();
        assert!(!reply.is_thread_child());
        assert!(reply.is_visible());

        let mut plain = msg("12.0", "c");
        plain.thread_ts = Some(Timestamp::default());
        assert!(plain.thread_timestamp().is_none());
        plain.subtype = "channel_join".into();
        assert!(!plain.is_visible());
    }

    #[test]
    fn month_key_navigation() {
        let dec = MessageMonthKey::new(2019, 12).unwrap();
        assert_eq!(dec.next(), MessageMonthKey::new(2020, 1).unwrap());
        assert_eq!(dec.next().prev(), dec);
        assert_eq!(dec.next_year(), "2020");
        assert_eq!(dec.next_month(), "01");
        let jan = MessageMonthKey::new(2020, 1).unwrap();
        assert_eq!(jan.prev_year(), "2019");
        assert_eq!(jan.prev_month(), "12");
        assert!(MessageMonthKey::new(2020, 13).is_none());
        assert_eq!(MessageMonthKey::parse("2020", "03").unwrap().to_string(), "2020-03");
    }

    #[test]
    fn attachment_ts_keeps_json_shape() -> anyhow::Result<()> {
        for raw in [r#"{"id":0,"ts":"1234.5678"}"#, r#"{"id":0,"ts":1234.5678}"#, r#"{"id":0}"#] {
            let parsed: Attachment = serde_json::from_str(raw)?;
            assert_eq!(serde_json::to_string(&parsed)?, raw);
        }
        let parsed: Attachment = serde_json::from_str(r#"{"ts":1234.5678}"#)?;
        assert_eq!(parsed.ts.map(|ts| ts.value()).as_deref(), Some("1234.5678"));
        Ok(())
    }

    #[test]
    fn unknown_fields_excludes_passthrough_keys() -> anyhow::Result<()> {
        let parsed: Message = serde_json::from_str(
            r#"{"ts":"1.0","text":"hi","blocks":[],"team":"T1","surprise":true}"#,
        )?;
        assert_eq!(parsed.unknown_fields(), vec!["surprise"]);
        Ok(())
    }

    #[test]
    fn unknown_fields_reach_into_nested_objects() -> anyhow::Result<()> {
        let parsed: Message = serde_json::from_str(
            r#"{
                "ts":"1.0",
                "edited":{"user":"U1","ts":"2.0","e_drift":1},
                "files":[{"id":"F1","size":10,"permalink":"p","f_drift":1}],
                "attachments":[{"id":1,"footer":"f","a_drift":1}],
                "reactions":[{"name":"a","users":[],"count":0,"r_drift":1}]
            }"#,
        )?;
        assert_eq!(
            parsed.unknown_fields(),
            vec![
                "edited.e_drift",
                "files[0].f_drift",
                "attachments[0].a_drift",
                "reactions[0].r_drift",
            ]
        );

        let clean: Message = serde_json::from_str(
            r#"{"ts":"1.0","edited":{"user":"U1","ts":"2.0"},"files":[{"id":"F1","thumb_64":"t"}]}"#,
        )?;
        assert!(clean.unknown_fields().is_empty());
        Ok(())
    }

    #[test]
    fn nested_unknown_fields_survive_a_round_trip() -> anyhow::Result<()> {
        let raw = r#"{"text":"","ts":"1.0","edited":{"user":"U","ts":"1","x":1}}"#;
        let parsed: Message = serde_json::from_str(raw)?;
        assert_eq!(serde_json::to_string(&parsed)?, raw);
        Ok(())
    }
}
