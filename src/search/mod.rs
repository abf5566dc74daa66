use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{ArchiveError, Result};
use crate::message::{Message, Timestamp};
use crate::storage::LogStore;

pub mod codec;

use self::codec::{
    decode_index_file, encode_postings, format_channel_line, ngram_path, parse_channel_file,
    ChannelPostings, CHANNEL_FILE,
};

/// Longest n-gram indexed; every length from 1 up to this is recorded.
pub const GRAM_N: usize = 2;

/// channel number -> message timestamp -> character positions
pub type Postings = BTreeMap<u32, BTreeMap<Timestamp, Vec<u32>>>;

/// Where the indexer gets its channels and their messages from.
pub trait MessageSource {
    /// `(id, name)` of every channel to index.
    fn channels(&self) -> Vec<(String, String)>;
    fn all_messages(&self, channel_id: &str) -> Result<Vec<Message>>;
}

impl MessageSource for LogStore {
    fn channels(&self) -> Vec<(String, String)> {
        LogStore::channels(self)
            .iter()
            .map(|c| (c.id.clone(), c.name.clone()))
            .collect()
    }

    fn all_messages(&self, channel_id: &str) -> Result<Vec<Message>> {
        self.get_all_messages(channel_id)
    }
}

/// Positional n-gram index keyed by the n-gram's characters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NgramIndex {
    grams: BTreeMap<String, Postings>,
}

impl NgramIndex {
    pub fn add(&mut self, gram: &str, channel_number: u32, ts: &Timestamp, position: u32) {
        self.grams
            .entry(gram.to_string())
            .or_default()
            .entry(channel_number)
            .or_default()
            .entry(ts.clone())
            .or_default()
            .push(position);
    }

    /// Records every 1..=[`GRAM_N`] character n-gram of `text` at its
    /// starting character offset.
    pub fn add_text(&mut self, channel_number: u32, ts: &Timestamp, text: &str) {
        let chars: Vec<char> = text.chars().collect();
        for start in 0..chars.len() {
            for n in 1..=GRAM_N {
                let Some(window) = chars.get(start..start + n) else {
                    break;
                };
                let gram: String = window.iter().collect();
                self.add(&gram, channel_number, ts, start as u32);
            }
        }
    }

    pub fn postings(&self, gram: &str) -> Option<&Postings> {
        self.grams.get(gram)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Postings)> {
        self.grams.iter().map(|(gram, postings)| (gram.as_str(), postings))
    }

    pub fn len(&self) -> usize {
        self.grams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grams.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberedChannel {
    pub number: u32,
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputStats {
    pub channels: usize,
    pub index_files: usize,
    pub bytes: u64,
}

pub struct Indexer<'a, S: ?Sized> {
    source: &'a S,
    channels: Vec<NumberedChannel>,
    index: NgramIndex,
}

impl<'a, S: MessageSource + ?Sized> Indexer<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self {
            source,
            channels: Vec::new(),
            index: NgramIndex::default(),
        }
    }

    /// Numbers channels from 1 in id order, then indexes every message.
    pub fn build(&mut self) -> Result<()> {
        let mut channels = self.source.channels();
        channels.sort();
        self.channels.clear();
        self.index = NgramIndex::default();

        for (number, (id, name)) in (1u32..).zip(channels) {
            let msgs = self.source.all_messages(&id)?;
            for msg in &msgs {
                self.index.add_text(number, &msg.ts, &msg.text);
            }
            tracing::debug!(channel = %id, number, messages = msgs.len(), "indexed channel");
            self.channels.push(NumberedChannel { number, id, name });
        }
        Ok(())
    }

    pub fn channels(&self) -> &[NumberedChannel] {
        &self.channels
    }

    pub fn index(&self) -> &NgramIndex {
        &self.index
    }

    /// Writes the `channel` manifest and one `.index` file per n-gram under `dir`.
    pub fn output(&self, dir: &Path) -> Result<OutputStats> {
        fs::create_dir_all(dir).map_err(|err| ArchiveError::io(dir, err))?;

        let manifest_path = dir.join(CHANNEL_FILE);
        let manifest: String = self
            .channels
            .iter()
            .map(|c| format_channel_line(c.number, &c.id, &c.name))
            .collect();
        fs::write(&manifest_path, manifest).map_err(|err| ArchiveError::io(&manifest_path, err))?;

        let mut stats = OutputStats {
            channels: self.channels.len(),
            ..OutputStats::default()
        };
        for (gram, postings) in self.index.iter() {
            let path = ngram_path(dir, gram);
            let bytes = encode_postings(&path, postings, |number| self.channel_id(number))?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|err| ArchiveError::io(parent, err))?;
            }
            fs::write(&path, &bytes).map_err(|err| ArchiveError::io(&path, err))?;
            stats.index_files += 1;
            stats.bytes += bytes.len() as u64;
        }

        tracing::info!(
            dir = %dir.display(),
            channels = stats.channels,
            index_files = stats.index_files,
            bytes = stats.bytes,
            "wrote search index"
        );
        Ok(stats)
    }

    fn channel_id(&self, number: u32) -> String {
        number
            .checked_sub(1)
            .and_then(|i| self.channels.get(i as usize))
            .map(|c| c.id.clone())
            .unwrap_or_else(|| format!("#{number}"))
    }
}

/// Reads back the `channel` manifest of an index directory.
pub fn read_channel_file(dir: &Path) -> Result<Vec<NumberedChannel>> {
    let path = dir.join(CHANNEL_FILE);
    let contents = fs::read_to_string(&path).map_err(|err| ArchiveError::io(&path, err))?;
    Ok(parse_channel_file(&contents)?
        .into_iter()
        .map(|(number, id, name)| NumberedChannel { number, id, name })
        .collect())
}

/// Postings stored for `gram`; an n-gram that was never indexed has none.
pub fn read_ngram(dir: &Path, gram: &str) -> Result<Vec<ChannelPostings>> {
    let path = ngram_path(dir, gram);
    match fs::read(&path) {
        Ok(bytes) => decode_index_file(&bytes),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(ArchiveError::io(&path, err)),
    }
}
