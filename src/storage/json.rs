use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ArchiveError, Result};

pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = fs::File::open(path).map_err(|err| ArchiveError::io(path, err))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|err| ArchiveError::decode(path, err))
}

/// Reads JSON Lines (one value per line). A missing file reads as empty.
pub fn read_json_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(ArchiveError::io(path, err)),
    };
    serde_json::Deserializer::from_reader(BufReader::new(file))
        .into_iter::<T>()
        .map(|item| item.map_err(|err| ArchiveError::decode(path, err)))
        .collect()
}

/// Writes one JSON value per line into a sibling temp file, then renames it
/// over `path`.
pub fn write_json_lines<'a, T, I>(path: &Path, items: I) -> Result<()>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| ArchiveError::io(parent, err))?;
    }
    let tmp_path = path.with_extension("jsonl.tmp");
    let file = fs::File::create(&tmp_path).map_err(|err| ArchiveError::io(&tmp_path, err))?;
    let mut writer = BufWriter::new(file);
    for item in items {
        serde_json::to_writer(&mut writer, item).map_err(|source| ArchiveError::Encode {
            path: tmp_path.clone(),
            source,
        })?;
        writer
            .write_all(b"\n")
            .map_err(|err| ArchiveError::io(&tmp_path, err))?;
    }
    writer
        .into_inner()
        .map_err(|err| ArchiveError::io(&tmp_path, err.into_error()))?
        .sync_all()
        .map_err(|err| ArchiveError::io(&tmp_path, err))?;
    fs::rename(&tmp_path, path).map_err(|err| ArchiveError::io(path, err))?;
    Ok(())
}
