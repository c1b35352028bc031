//! Durable context files.
//!
//! Two layouts share the framed codec:
//!
//! - a **context file** holds the header and exactly one [`ContextImage`]
//!   with every record, rewritten on each save;
//! - a **checkpoint file** holds the header followed by one image per
//!   checkpoint, each carrying only the records changed since the previous
//!   one. Replay applies the frames in order.

mod codec;

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ExecutionError, KbError, KbResult};
use crate::record::Record;

/// Records of a store at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ContextImage {
    pub(crate) id: String,
    pub(crate) clock: u64,
    pub(crate) saved_at: DateTime<Utc>,
    pub(crate) records: Vec<(String, Record)>,
}

impl ContextImage {
    pub(crate) fn new(id: impl Into<String>, clock: u64, records: Vec<(String, Record)>) -> Self {
        Self {
            id: id.into(),
            clock,
            saved_at: Utc::now(),
            records,
        }
    }
}

fn storage(path: &Path, action: &str, err: impl std::fmt::Display) -> KbError {
    ExecutionError::Storage {
        message: format!("failed to {action} '{}': {err}", path.display()),
    }
    .into()
}

/// Write `image` as a complete context file, replacing any previous one.
///
/// Writes to a sibling temporary file first and renames it into place.
pub(crate) fn save_image(path: &Path, image: &ContextImage) -> KbResult<()> {
    let tmp = path.with_extension("tmp");
    let frame = codec::encode(image).map_err(|e| storage(path, "encode", e))?;
    {
        let file = File::create(&tmp).map_err(|e| storage(&tmp, "create", e))?;
        let mut writer = BufWriter::new(file);
        codec::write_header(&mut writer).map_err(|e| storage(&tmp, "write", e))?;
        writer.write_all(&frame).map_err(|e| storage(&tmp, "write", e))?;
        let file = writer.into_inner().map_err(|e| storage(&tmp, "flush", e.error()))?;
        file.sync_all().map_err(|e| storage(&tmp, "sync", e))?;
    }
    fs::rename(&tmp, path).map_err(|e| storage(path, "replace", e))
}

/// Read a context file.
pub(crate) fn load_image(path: &Path) -> KbResult<ContextImage> {
    let file = File::open(path).map_err(|e| storage(path, "open", e))?;
    let mut reader = BufReader::new(file);
    codec::read_header(&mut reader).map_err(|e| storage(path, "read", e))?;
    codec::decode_next(&mut reader)
        .map_err(|e| storage(path, "read", e))?
        .ok_or_else(|| storage(path, "read", "file holds no context"))
}

/// Append one checkpoint frame, creating the file with its header if needed.
pub(crate) fn append_checkpoint(path: &Path, image: &ContextImage) -> KbResult<()> {
    let frame = codec::encode(image).map_err(|e| storage(path, "encode", e))?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| storage(path, "open", e))?;
    let empty = file.metadata().map_err(|e| storage(path, "stat", e))?.len() == 0;
    if empty {
        codec::write_header(&mut file).map_err(|e| storage(path, "write", e))?;
    }
    file.write_all(&frame).map_err(|e| storage(path, "write", e))?;
    file.sync_data().map_err(|e| storage(path, "sync", e))
}

/// Every checkpoint frame in file order.
pub(crate) fn read_checkpoints(path: &Path) -> KbResult<Vec<ContextImage>> {
    let file = File::open(path).map_err(|e| storage(path, "open", e))?;
    let mut reader = BufReader::new(file);
    codec::read_header(&mut reader).map_err(|e| storage(path, "read", e))?;
    let mut images = Vec::new();
    while let Some(image) = codec::decode_next(&mut reader).map_err(|e| storage(path, "read", e))? {
        images.push(image);
    }
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn image(records: &[(&str, i64)]) -> ContextImage {
        ContextImage::new(
            "kb",
            7,
            records
                .iter()
                .map(|(k, v)| ((*k).to_string(), Record::new(*v).with_clock(3)))
                .collect(),
        )
    }

    #[test]
    fn test_context_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ctx.kb");
        save_image(&path, &image(&[("a", 1), ("b", 2)])).unwrap();
        save_image(&path, &image(&[("c", 3)])).unwrap();

        let loaded = load_image(&path).unwrap();
        assert_eq!(loaded.id, "kb");
        assert_eq!(loaded.clock, 7);
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.records[0].1.clock, 3);
    }

    #[test]
    fn test_checkpoints_append() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ckpt.kb");
        append_checkpoint(&path, &image(&[("a", 1)])).unwrap();
        append_checkpoint(&path, &image(&[("a", 2), ("b", 1)])).unwrap();

        let frames = read_checkpoints(&path).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].records.len(), 2);
    }

    #[test]
    fn test_missing_file_is_storage_error() {
        let dir = tempdir().unwrap();
        let err = load_image(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, KbError::Execution(ExecutionError::Storage { .. })));
    }
}
