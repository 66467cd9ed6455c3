use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use prost::Message;
use thiserror::Error;
use tracing::{debug, info, warn};

use timerscan_proto::proto::ResultRecord;

use crate::video::frame::FrameIndex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("result journal {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode record for frame {frame_index}: {source}")]
    Encode {
        frame_index: FrameIndex,
        #[source]
        source: prost::EncodeError,
    },
    #[error("result journal {path} has an undecodable record at byte {offset}")]
    Corrupt { path: PathBuf, offset: u64 },
}

/// Durable table of results keyed by frame index.
///
/// Writes for an index already present replace the earlier row. A write that
/// returns `Ok` survives a crash.
pub trait ResultStore: Send + Sync {
    fn upsert(&self, record: ResultRecord) -> Result<(), StoreError>;

    /// True if a row exists for `frame_index`; used to skip finished work on resume.
    fn contains(&self, frame_index: FrameIndex) -> bool;
}

struct Journal {
    file: File,
    rows: BTreeMap<FrameIndex, ResultRecord>,
    /// Records in the file, including ones later overwritten.
    entries: usize,
    /// Length of the file up to the end of the last record that was synced.
    len: u64,
}

impl Journal {
    /// Append `buf` and sync it. On failure the file is cut back to its last
    /// good length, so a half-written record never precedes later ones.
    fn append(&mut self, buf: &[u8]) -> io::Result<()> {
        let on_disk = self.file.metadata()?.len();
        if on_disk != self.len {
            warn!(
                expected = self.len,
                on_disk, "discarding bytes left by an earlier failed append"
            );
            self.file.set_len(self.len)?;
        }

        let written = self
            .file
            .write_all(buf)
            .and_then(|()| self.file.sync_data());
        if let Err(e) = written {
            if let Err(rollback) = self.file.set_len(self.len) {
                warn!(error = %rollback, "failed to roll back partial append");
            }
            return Err(e);
        }

        self.len += buf.len() as u64;
        Ok(())
    }
}

/// Append-only journal of length-delimited `ResultRecord`s.
///
/// Every upsert appends one record and syncs it before returning. Opening
/// replays the journal with last-write-wins. A final record cut short by a
/// crash is truncated away; an undecodable record anywhere else fails the
/// open rather than discarding what follows it.
pub struct JournalStore {
    path: PathBuf,
    inner: Mutex<Journal>,
}

impl JournalStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(io_err(e)),
        };

        let Replayed {
            rows,
            entries,
            valid_len,
        } = replay(&bytes).map_err(|offset| StoreError::Corrupt {
            path: path.to_path_buf(),
            offset: offset as u64,
        })?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io_err)?;
        if valid_len < bytes.len() {
            warn!(
                ?path,
                valid_bytes = valid_len,
                total_bytes = bytes.len(),
                "truncating torn record at end of journal"
            );
            file.set_len(valid_len as u64).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }

        info!(?path, rows = rows.len(), entries, "result journal opened");

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Journal {
                file,
                rows,
                entries,
                len: valid_len as u64,
            }),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All rows in frame-index order.
    pub fn records(&self) -> Vec<ResultRecord> {
        self.inner.lock().rows.values().cloned().collect()
    }

    /// Rewrite the journal so it holds exactly one record per row.
    ///
    /// The new journal is written beside the old one and renamed over it, so a
    /// crash leaves either the old or the new file intact.
    pub fn compact(&self) -> Result<(), StoreError> {
        let mut journal = self.inner.lock();
        if journal.entries == journal.rows.len() {
            debug!(path = ?self.path, "journal already compact");
            return Ok(());
        }

        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        let mut buf = Vec::new();
        for record in journal.rows.values() {
            encode_into(record, &mut buf)?;
        }

        let tmp_path = self.path.with_extension("compact");
        {
            let mut tmp = File::create(&tmp_path).map_err(io_err)?;
            tmp.write_all(&buf).map_err(io_err)?;
            tmp.sync_all().map_err(io_err)?;
        }
        fs::rename(&tmp_path, &self.path).map_err(io_err)?;

        journal.file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        journal.len = buf.len() as u64;
        let before = journal.entries;
        journal.entries = journal.rows.len();

        info!(path = ?self.path, before, after = journal.entries, "journal compacted");
        Ok(())
    }
}

impl ResultStore for JournalStore {
    fn upsert(&self, record: ResultRecord) -> Result<(), StoreError> {
        let mut buf = Vec::new();
        encode_into(&record, &mut buf)?;

        let mut journal = self.inner.lock();
        journal.append(&buf).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;

        debug!(frame_index = record.frame_index, "record persisted");
        journal.entries += 1;
        journal.rows.insert(record.frame_index, record);
        Ok(())
    }

    fn contains(&self, frame_index: FrameIndex) -> bool {
        self.inner.lock().rows.contains_key(&frame_index)
    }
}

fn encode_into(record: &ResultRecord, buf: &mut Vec<u8>) -> Result<(), StoreError> {
    record
        .encode_length_delimited(buf)
        .map_err(|source| StoreError::Encode {
            frame_index: record.frame_index,
            source,
        })
}

/// Longest varint prost writes for a length delimiter.
const MAX_DELIMITER_LEN: usize = 10;

struct Replayed {
    rows: BTreeMap<FrameIndex, ResultRecord>,
    entries: usize,
    /// Bytes up to the end of the last whole record.
    valid_len: usize,
}

/// Decode every record in `bytes`.
///
/// Stops quietly at a final record that runs past the end of the data. A
/// whole record that fails to decode is an error carrying its byte offset.
fn replay(bytes: &[u8]) -> Result<Replayed, usize> {
    let mut rows = BTreeMap::new();
    let mut entries = 0;
    let mut offset = 0;

    while offset < bytes.len() {
        let tail = &bytes[offset..];
        let mut rest = tail;
        let body_len = match prost::decode_length_delimiter(&mut rest) {
            Ok(n) => n,
            Err(_) if is_cut_varint(tail) => break,
            Err(e) => {
                debug!(error = %e, offset, "bad length delimiter in journal");
                return Err(offset);
            }
        };
        let header_len = tail.len() - rest.len();
        if body_len > rest.len() {
            break;
        }

        match ResultRecord::decode(&rest[..body_len]) {
            Ok(record) => {
                entries += 1;
                rows.insert(record.frame_index, record);
            }
            Err(e) => {
                debug!(error = %e, offset, "undecodable journal record");
                return Err(offset);
            }
        }
        offset += header_len + body_len;
    }

    Ok(Replayed {
        rows,
        entries,
        valid_len: offset,
    })
}

/// True if `tail` is the start of a varint that the end of the data cut off.
fn is_cut_varint(tail: &[u8]) -> bool {
    tail.len() < MAX_DELIMITER_LEN && tail.iter().all(|b| b & 0x80 != 0)
}
