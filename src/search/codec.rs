//! On-disk search index encoding.
//!
//! Every n-gram gets one `.index` file. Its path spells the n-gram's UTF-16
//! code units, two directory levels per unit (high byte, then low byte, each as
//! two lowercase hex digits). The file body repeats, per channel number:
//!
//! ```text
//! vint   channel number
//! vint   number of timestamps
//! repeat:
//!   u32be  timestamp seconds
//!   vint   timestamp fraction (as written, e.g. microseconds)
//!   vint*  position + 1, for each position
//!   0x00   terminator
//! ```
//!
//! A vint is base-128, most significant group first; every byte except the
//! last carries the `0x80` continuation bit. Zero is the single byte `0x00`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{ArchiveError, Result, TimestampPart};
use crate::message::Timestamp;

pub const INDEX_EXTENSION: &str = "index";
pub const CHANNEL_FILE: &str = "channel";

const VINT_MAX_BYTES: usize = 10; // ceil(64 / 7)

pub fn encode_vint(mut value: u64, out: &mut Vec<u8>) {
    if value == 0 {
        out.push(0);
        return;
    }
    let mut buf = [0u8; VINT_MAX_BYTES];
    let mut start = VINT_MAX_BYTES;
    let mut continuation = 0u8;
    while value != 0 {
        start -= 1;
        buf[start] = (value & 0x7f) as u8 | continuation;
        value >>= 7;
        continuation = 0x80;
    }
    out.extend_from_slice(&buf[start..]);
}

pub fn vint_bytes(value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(2);
    encode_vint(value, &mut out);
    out
}

pub fn decode_vint(bytes: &[u8], offset: &mut usize) -> Result<u64> {
    let mut value: u64 = 0;
    loop {
        let Some(&byte) = bytes.get(*offset) else {
            return Err(ArchiveError::Internal(
                "unexpected end of index data while reading vint".into(),
            ));
        };
        *offset += 1;
        if value > u64::MAX >> 7 {
            return Err(ArchiveError::Internal("vint overflows u64".into()));
        }
        value = (value << 7) | u64::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
}

/// `dir/hh/ll[/hh/ll].index` for the UTF-16 code units of `gram`.
pub fn ngram_path(dir: &Path, gram: &str) -> PathBuf {
    let mut path = dir.to_path_buf();
    for unit in gram.encode_utf16() {
        path.push(format!("{:02x}", unit >> 8));
        path.push(format!("{:02x}", unit & 0xff));
    }
    path.set_extension(INDEX_EXTENSION);
    path
}

/// Encodes every channel's postings for one n-gram. Fails before anything is
/// written when a timestamp cannot be split or a position list is empty.
pub fn encode_postings(
    path: &Path,
    postings: &BTreeMap<u32, BTreeMap<Timestamp, Vec<u32>>>,
    channel_id: impl Fn(u32) -> String,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for (&channel_number, by_ts) in postings {
        encode_vint(u64::from(channel_number), &mut out);
        encode_vint(by_ts.len() as u64, &mut out);
        for (ts, positions) in by_ts {
            let (seconds, fraction) = split_index_timestamp(ts, || channel_id(channel_number))?;
            out.extend_from_slice(&seconds.to_be_bytes());
            encode_vint(fraction, &mut out);
            if positions.is_empty() {
                return Err(ArchiveError::Internal(format!(
                    "empty positions: {}: {}: {}",
                    path.display(),
                    channel_id(channel_number),
                    ts
                )));
            }
            for &pos in positions {
                encode_vint(u64::from(pos) + 1, &mut out);
            }
            out.push(0);
        }
    }
    Ok(out)
}

fn split_index_timestamp(ts: &Timestamp, channel_id: impl Fn() -> String) -> Result<(u32, u64)> {
    let raw = ts.as_str();
    let invalid = || ArchiveError::InvalidIndexTimestamp {
        channel: channel_id(),
        ts: raw.to_string(),
    };
    let (sec_part, frac_part) = raw.split_once('.').ok_or_else(invalid)?;
    if frac_part.contains('.') {
        return Err(invalid());
    }
    let seconds = sec_part
        .parse::<u32>()
        .map_err(|_| ArchiveError::MalformedTimestamp {
            part: TimestampPart::Seconds,
            raw: raw.to_string(),
        })?;
    let fraction = frac_part
        .parse::<u64>()
        .map_err(|_| ArchiveError::MalformedTimestamp {
            part: TimestampPart::Nanoseconds,
            raw: raw.to_string(),
        })?;
    Ok((seconds, fraction))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedMessage {
    pub seconds: u32,
    pub fraction: u64,
    pub positions: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPostings {
    pub channel_number: u32,
    pub messages: Vec<IndexedMessage>,
}

pub fn decode_index_file(bytes: &[u8]) -> Result<Vec<ChannelPostings>> {
    let mut offset = 0;
    let mut channels = Vec::new();
    while offset < bytes.len() {
        let channel_number = read_u32_vint(bytes, &mut offset)?;
        let count = decode_vint(bytes, &mut offset)?;
        let mut messages = Vec::new();
        for _ in 0..count {
            let end = offset + 4;
            let raw: [u8; 4] = bytes
                .get(offset..end)
                .and_then(|s| s.try_into().ok())
                .ok_or_else(|| {
                    ArchiveError::Internal("unexpected end of index data in timestamp".into())
                })?;
            offset = end;
            let seconds = u32::from_be_bytes(raw);
            let fraction = decode_vint(bytes, &mut offset)?;
            let mut positions = Vec::new();
            loop {
                match read_u32_vint(bytes, &mut offset)? {
                    0 => break,
                    pos => positions.push(pos - 1),
                }
            }
            messages.push(IndexedMessage {
                seconds,
                fraction,
                positions,
            });
        }
        channels.push(ChannelPostings {
            channel_number,
            messages,
        });
    }
    Ok(channels)
}

fn read_u32_vint(bytes: &[u8], offset: &mut usize) -> Result<u32> {
    let value = decode_vint(bytes, offset)?;
    u32::try_from(value)
        .map_err(|_| ArchiveError::Internal(format!("index value {value} overflows u32")))
}

pub fn format_channel_line(number: u32, id: &str, name: &str) -> String {
    format!("{number}\t{id}\t{name}\n")
}

/// Parses the `channel` manifest into `(number, id, name)` rows.
pub fn parse_channel_file(contents: &str) -> Result<Vec<(u32, String, String)>> {
    contents
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut fields = line.splitn(3, '\t');
            let number = fields.next().and_then(|n| n.parse::<u32>().ok());
            match (number, fields.next(), fields.next()) {
                (Some(number), Some(id), Some(name)) => {
                    Ok((number, id.to_string(), name.to_string()))
                }
                _ => Err(ArchiveError::Internal(format!(
                    "malformed channel manifest line: {line:?}"
                ))),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn vint_round_trips_boundaries() {
        for value in [0u64, 1, 127, 128, 16_384, (1 << 31) - 1] {
            let bytes = vint_bytes(value);
            let mut offset = 0;
            assert_eq!(decode_vint(&bytes, &mut offset).unwrap(), value);
            assert_eq!(offset, bytes.len());
        }
        assert_eq!(vint_bytes(0), vec![0x00]);
    }

    #[test]
    fn vint_emits_most_significant_group_first() {
        assert_eq!(vint_bytes(127), vec![0x7f]);
        assert_eq!(vint_bytes(128), vec![0x81, 0x00]);
        assert_eq!(vint_bytes(300), vec![0x82, 0x2c]);
        assert_eq!(vint_bytes(16_384), vec![0x81, 0x80, 0x00]);
    }

    #[test]
    fn truncated_vint_is_reported() {
        let mut offset = 0;
        assert_matches!(
            decode_vint(&[0x81], &mut offset),
            Err(ArchiveError::Internal(_))
        );
    }

    #[test]
    fn ngram_path_uses_utf16_byte_pairs() {
        let dir = Path::new("out");
        assert_eq!(ngram_path(dir, "a"), Path::new("out/00/61.index"));
        assert_eq!(ngram_path(dir, "ab"), Path::new("out/00/61/00/62.index"));
        assert_eq!(ngram_path(dir, "あ"), Path::new("out/30/42.index"));
        // A single supplementary-plane rune is two UTF-16 units.
        assert_eq!(
            ngram_path(dir, "😀"),
            Path::new("out/d8/3d/de/00.index")
        );
    }

    #[test]
    fn postings_encode_and_decode_back() {
        let mut by_ts = BTreeMap::new();
        by_ts.insert(Timestamp::from("1583688494.253200"), vec![0, 5]);
        let mut postings = BTreeMap::new();
        postings.insert(3, by_ts);

        let bytes = encode_postings(Path::new("x.index"), &postings, |_| "C1".into()).unwrap();
        let decoded = decode_index_file(&bytes).unwrap();
        assert_eq!(
            decoded,
            vec![ChannelPostings {
                channel_number: 3,
                messages: vec![IndexedMessage {
                    seconds: 1_583_688_494,
                    fraction: 253_200,
                    positions: vec![0, 5],
                }],
            }]
        );
    }

    #[test]
    fn empty_positions_fail_with_context() {
        let mut by_ts = BTreeMap::new();
        by_ts.insert(Timestamp::from("1.0"), Vec::new());
        let mut postings = BTreeMap::new();
        postings.insert(1, by_ts);

        let err = encode_postings(Path::new("x.index"), &postings, |_| "C9".into()).unwrap_err();
        assert_matches!(err, ArchiveError::Internal(ref msg) if msg.contains("C9") && msg.contains("1.0"));
    }

    #[test]
    fn timestamp_without_single_separator_is_rejected() {
        for raw in ["100", "1.2.3"] {
            let mut by_ts = BTreeMap::new();
            by_ts.insert(Timestamp::from(raw), vec![0]);
            let mut postings = BTreeMap::new();
            postings.insert(1, by_ts);
            let err = encode_postings(Path::new("x.index"), &postings, |_| "C1".into()).unwrap_err();
            assert_matches!(err, ArchiveError::InvalidIndexTimestamp { ref channel, .. } if channel == "C1");
        }
    }

    #[test]
    fn channel_manifest_parses_rows() {
        let text = format_channel_line(1, "C1", "general") + &format_channel_line(2, "C2", "random");
        let rows = parse_channel_file(&text).unwrap();
        assert_eq!(rows[1], (2, "C2".to_string(), "random".to_string()));
        assert!(parse_channel_file("nonsense").is_err());
    }
}
