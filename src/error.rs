use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Which half of a `SECONDS.FRACTION` timestamp failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampPart {
    Seconds,
    Nanoseconds,
}

impl fmt::Display for TimestampPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampPart::Seconds => f.write_str("seconds"),
            TimestampPart::Nanoseconds => f.write_str("nano seconds"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("syntax error in {part} part: {raw:?}")]
    MalformedTimestamp { part: TimestampPart, raw: String },

    #[error("empty ID is forbidden")]
    EmptyIdentifier,

    #[error("failed to decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown field `{field}` in {}", path.display())]
    UnknownField { path: PathBuf, field: String },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("channel not found, unknown id: id={0}")]
    ChannelNotFound(String),

    #[error("invalid timestamp {ts} ({channel})")]
    InvalidIndexTimestamp { channel: String, ts: String },

    #[error("iteration aborted")]
    IterationAborted,

    /// Broken invariant inside the store or indexer; indicates a bug rather than bad input.
    #[error("internal consistency error: {0}")]
    Internal(String),
}

impl ArchiveError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        ArchiveError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn decode(path: impl AsRef<Path>, source: serde_json::Error) -> Self {
        ArchiveError::Decode {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ArchiveError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

pub type Result<T, E = ArchiveError> = std::result::Result<T, E>;
