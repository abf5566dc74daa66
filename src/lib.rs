pub mod cli;
pub mod config;
pub mod error;
pub mod message;
pub mod search;
pub mod storage;
pub mod thread;
pub mod timekey;

pub use config::{AppConfig, ConfigLoader, ConfigPaths, StorageOptions};
pub use error::{ArchiveError, Result};
pub use message::{Message, MessageMonthKey, Timestamp};
pub use search::Indexer;
pub use storage::{LogStore, MessageStore, MessageTable, MessageTx, MessagesMap};
pub use thread::Thread;
pub use timekey::{ArchiveZone, DateKey, TimeKey};
