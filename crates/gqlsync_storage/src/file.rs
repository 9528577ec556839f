//! File-based storage backend for persistent caches.
//!
//! The file is an append-only log of batch frames:
//!
//! ```text
//! | magic (4) | version (2) | payload_len (4) | payload | crc32 (4) |
//! ```
//!
//! The payload holds the batch's operations. The CRC covers header and
//! payload. On open the log is replayed into an in-memory index; a frame cut
//! short by a crash is discarded and the file is truncated back to the last
//! complete frame, which is what makes a batch all-or-nothing.

use crate::backend::{BatchOp, StorageBackend};
use crate::error::{StorageError, StorageResult};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes identifying a log frame.
pub const LOG_MAGIC: [u8; 4] = *b"GQLC";

/// Current log format version.
pub const LOG_VERSION: u16 = 1;

const HEADER_SIZE: usize = 10;
const CRC_SIZE: usize = 4;
const TAG_PUT: u8 = 1;
const TAG_DELETE: u8 = 2;

/// A file-based storage backend.
///
/// Entries survive process restarts. Reads are served from an in-memory
/// index rebuilt when the file is opened.
///
/// # Durability
///
/// - Every batch is written as one frame and flushed to the OS
/// - With [`FileBackend::sync_on_write`] enabled, each batch is also
///   `fsync`ed before `apply_batch` returns
///
/// # Example
///
/// ```no_run
/// use gqlsync_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("cache.log")).unwrap();
/// backend.put("Post:1", b"record bytes").unwrap();
/// backend.flush().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: File,
    size: u64,
    index: BTreeMap<String, Vec<u8>>,
    sync_on_write: bool,
}

impl FileBackend {
    /// Opens or creates a file backend at the given path and replays its log.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, or if a complete frame
    /// fails its checksum.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let bytes = std::fs::read(path)?;
        let (index, valid_len) = replay(&bytes)?;

        if valid_len < bytes.len() as u64 {
            // Torn tail from an interrupted write.
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(valid_len))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            size: valid_len,
            index,
            sync_on_write: false,
        })
    }

    /// Opens or creates a file backend, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or file cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Enables or disables `fsync` after every batch.
    #[must_use]
    pub fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current size of the log in bytes.
    #[must_use]
    pub fn log_size(&self) -> u64 {
        self.size
    }

    /// Syncs all data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    pub fn sync(&mut self) -> StorageResult<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.index.get(key).cloned())
    }

    fn apply_batch(&mut self, ops: &[BatchOp]) -> StorageResult<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let frame = encode_frame(ops)?;
        let written = self
            .file
            .write_all(&frame)
            .and_then(|()| self.file.flush())
            .and_then(|()| {
                if self.sync_on_write {
                    self.file.sync_data()
                } else {
                    Ok(())
                }
            });

        if let Err(err) = written {
            return Err(undo_append(&mut self.file, self.size, err));
        }

        self.size += frame.len() as u64;
        apply_to_index(&mut self.index, ops);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.index.keys().cloned().collect())
    }

    fn clear(&mut self) -> StorageResult<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.sync_all()?;
        self.size = 0;
        self.index.clear();
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.flush()?;
        Ok(())
    }

    fn len(&self) -> StorageResult<usize> {
        Ok(self.index.len())
    }

    /// Rewrites the log as a single frame holding only live entries.
    fn compact(&mut self) -> StorageResult<()> {
        let ops: Vec<BatchOp> = self
            .index
            .iter()
            .map(|(key, value)| BatchOp::put(key.clone(), value.clone()))
            .collect();
        let frame = if ops.is_empty() {
            Vec::new()
        } else {
            encode_frame(&ops)?
        };

        let tmp_path = self.path.with_extension("compact");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&frame)?;
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.seek(SeekFrom::End(0))?;
        self.file = file;
        self.size = frame.len() as u64;
        Ok(())
    }
}

/// Truncates a partially appended frame back to `size`.
fn undo_append(file: &mut File, size: u64, cause: io::Error) -> StorageError {
    match file
        .set_len(size)
        .and_then(|()| file.seek(SeekFrom::Start(size)).map(drop))
    {
        Ok(()) => StorageError::Io(cause),
        Err(rollback) => StorageError::WriteRollback { cause, rollback },
    }
}

fn apply_to_index(index: &mut BTreeMap<String, Vec<u8>>, ops: &[BatchOp]) {
    for op in ops {
        match op {
            BatchOp::Put { key, value } => {
                index.insert(key.clone(), value.clone());
            }
            BatchOp::Delete { key } => {
                index.remove(key);
            }
        }
    }
}

fn len_u32(len: usize) -> StorageResult<u32> {
    u32::try_from(len).map_err(|_| StorageError::EntryTooLarge { len })
}

fn encode_frame(ops: &[BatchOp]) -> StorageResult<Vec<u8>> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&len_u32(ops.len())?.to_le_bytes());
    for op in ops {
        match op {
            BatchOp::Put { key, value } => {
                payload.push(TAG_PUT);
                payload.extend_from_slice(&len_u32(key.len())?.to_le_bytes());
                payload.extend_from_slice(key.as_bytes());
                payload.extend_from_slice(&len_u32(value.len())?.to_le_bytes());
                payload.extend_from_slice(value);
            }
            BatchOp::Delete { key } => {
                payload.push(TAG_DELETE);
                payload.extend_from_slice(&len_u32(key.len())?.to_le_bytes());
                payload.extend_from_slice(key.as_bytes());
            }
        }
    }

    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    frame.extend_from_slice(&LOG_MAGIC);
    frame.extend_from_slice(&LOG_VERSION.to_le_bytes());
    frame.extend_from_slice(&len_u32(payload.len())?.to_le_bytes());
    frame.extend_from_slice(&payload);
    let crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Replays every complete frame in `bytes`.
///
/// Returns the rebuilt index and the length of the valid prefix.
fn replay(bytes: &[u8]) -> StorageResult<(BTreeMap<String, Vec<u8>>, u64)> {
    let mut index = BTreeMap::new();
    let mut pos = 0usize;

    while pos < bytes.len() {
        let offset = pos as u64;
        if bytes.len() - pos < HEADER_SIZE {
            break;
        }
        let header = &bytes[pos..pos + HEADER_SIZE];
        if header[0..4] != LOG_MAGIC {
            return Err(StorageError::corrupted(offset, "invalid magic"));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > LOG_VERSION {
            return Err(StorageError::corrupted(
                offset,
                format!("unsupported version {version}"),
            ));
        }
        let payload_len =
            u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;
        let total = HEADER_SIZE + payload_len + CRC_SIZE;
        if bytes.len() - pos < total {
            break;
        }

        let body_end = pos + HEADER_SIZE + payload_len;
        let stored = u32::from_le_bytes([
            bytes[body_end],
            bytes[body_end + 1],
            bytes[body_end + 2],
            bytes[body_end + 3],
        ]);
        let computed = crc32fast::hash(&bytes[pos..body_end]);
        if stored != computed {
            return Err(StorageError::ChecksumMismatch {
                offset,
                expected: stored,
                actual: computed,
            });
        }

        let ops = decode_payload(offset, &bytes[pos + HEADER_SIZE..body_end])?;
        apply_to_index(&mut index, &ops);
        pos += total;
    }

    Ok((index, pos as u64))
}

fn decode_payload(offset: u64, payload: &[u8]) -> StorageResult<Vec<BatchOp>> {
    let mut cursor = 0usize;

    let read_u32 = |cursor: &mut usize| -> StorageResult<u32> {
        let end = *cursor + 4;
        let slice = payload
            .get(*cursor..end)
            .ok_or_else(|| StorageError::corrupted(offset, "payload ends inside a length"))?;
        *cursor = end;
        Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
    };
    let read_bytes = |cursor: &mut usize, len: usize| -> StorageResult<Vec<u8>> {
        let end = *cursor + len;
        let slice = payload
            .get(*cursor..end)
            .ok_or_else(|| StorageError::corrupted(offset, "payload ends inside an entry"))?;
        *cursor = end;
        Ok(slice.to_vec())
    };

    let count = read_u32(&mut cursor)? as usize;
    let mut ops = Vec::with_capacity(count);
    for _ in 0..count {
        let tag = *payload
            .get(cursor)
            .ok_or_else(|| StorageError::corrupted(offset, "missing operation tag"))?;
        cursor += 1;
        let key_len = read_u32(&mut cursor)? as usize;
        let key = String::from_utf8(read_bytes(&mut cursor, key_len)?)
            .map_err(|_| StorageError::corrupted(offset, "key is not UTF-8"))?;
        match tag {
            TAG_PUT => {
                let value_len = read_u32(&mut cursor)? as usize;
                let value = read_bytes(&mut cursor, value_len)?;
                ops.push(BatchOp::Put { key, value });
            }
            TAG_DELETE => ops.push(BatchOp::Delete { key }),
            other => {
                return Err(StorageError::corrupted(
                    offset,
                    format!("unknown operation tag {other}"),
                ))
            }
        }
    }

    if cursor != payload.len() {
        return Err(StorageError::corrupted(offset, "trailing bytes in frame"));
    }
    Ok(ops)
}
