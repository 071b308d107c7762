//! Durable store: a [`MemStore`] backed by an append-only log of commits.
//!
//! File layout: an 8-byte header (`TGLG`, format version u16, two reserved
//! zero bytes) followed by frames of `[len u32 BE][crc32 u32 BE][payload]`.
//! A payload is either a write batch or a counter value set by `fetch_add`.
//! Opening the file replays every intact frame; a torn or corrupt tail is
//! truncated away. A failed append is cut back off the file before the
//! error is returned, so later frames never land behind a torn one.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::kv::{KvSnapshot, KvStore, WriteBatch, WriteOp};
use super::mem::MemStore;
use crate::error::{GraphError, Result};
use crate::primitives::bytes::buf::{put_var_bytes, Cursor};
use crate::primitives::bytes::var;

const LOG_MAGIC: [u8; 4] = *b"TGLG";
const LOG_FORMAT_VERSION: u16 = 1;
const FILE_HEADER_LEN: usize = 8;
const FRAME_HEADER_LEN: usize = 8;

const RECORD_BATCH: u8 = 1;
const RECORD_COUNTER: u8 = 2;

const OP_PUT: u8 = 0;
const OP_DELETE: u8 = 1;
const OP_MERGE: u8 = 2;

/// Counters describing the log file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LogStats {
    /// Frames replayed when the store was opened.
    pub frames_replayed: u64,
    /// Bytes discarded from a torn tail when the store was opened.
    pub bytes_truncated: u64,
    /// Frames appended since open.
    pub frames_appended: u64,
}

/// Durable [`KvStore`] writing every commit to a log file before applying it.
pub struct LogStore {
    mem: MemStore,
    file: Mutex<LogFile>,
    path: PathBuf,
    sync: bool,
}

struct LogFile {
    file: File,
    /// Length of the intact log.
    len: u64,
    /// Set when a failed append could not be cut back off the file.
    broken: bool,
    stats: LogStats,
    /// Bytes of the next frame to write before failing it.
    #[cfg(test)]
    fail_next_append_after: Option<usize>,
}

impl LogFile {
    fn write_frame(&mut self, frame: &[u8], sync: bool) -> io::Result<()> {
        #[cfg(test)]
        if let Some(written) = self.fail_next_append_after.take() {
            self.file.write_all(&frame[..written.min(frame.len())])?;
            return Err(io::Error::new(io::ErrorKind::Other, "injected append failure"));
        }
        self.file.write_all(frame)?;
        if sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.file.set_len(self.len)?;
        self.file.seek(SeekFrom::Start(self.len))?;
        Ok(())
    }
}

impl LogStore {
    /// Opens or creates the log at `path`, replaying its contents.
    pub fn open(path: impl AsRef<Path>, sync: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        let mem = MemStore::new();
        let mut stats = LogStats::default();
        if contents.is_empty() {
            file.write_all(&encode_header())?;
            file.sync_all()?;
        } else {
            decode_header(&contents)?;
            let (valid_len, frames) = replay(&contents[FILE_HEADER_LEN..], &mem)?;
            let end = (FILE_HEADER_LEN + valid_len) as u64;
            stats.frames_replayed = frames;
            if end < contents.len() as u64 {
                stats.bytes_truncated = contents.len() as u64 - end;
                warn!(
                    path = %path.display(),
                    discarded = stats.bytes_truncated,
                    "log.open.truncate_tail"
                );
                file.set_len(end)?;
                file.sync_all()?;
            }
        }
        let len = file.seek(SeekFrom::End(0))?;
        debug!(path = %path.display(), frames = stats.frames_replayed, "log.open");
        Ok(Self {
            mem,
            file: Mutex::new(LogFile {
                file,
                len,
                broken: false,
                stats,
                #[cfg(test)]
                fail_next_append_after: None,
            }),
            path,
            sync,
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a copy of the log counters.
    pub fn stats(&self) -> LogStats {
        self.file.lock().stats
    }

    fn append(&self, payload: &[u8]) -> Result<()> {
        let mut log = self.file.lock();
        if log.broken {
            return Err(GraphError::Corruption("log has a torn frame that could not be removed"));
        }
        let len = u32::try_from(payload.len())
            .map_err(|_| GraphError::invalid("log frame larger than 4 GiB"))?;
        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&crc32fast::hash(payload).to_be_bytes());
        frame.extend_from_slice(payload);
        if let Err(err) = log.write_frame(&frame, self.sync) {
            warn!(path = %self.path.display(), error = %err, "log.append.rollback");
            if let Err(rollback) = log.rewind() {
                log.broken = true;
                warn!(path = %self.path.display(), error = %rollback, "log.append.rollback_failed");
            }
            return Err(err.into());
        }
        log.len += frame.len() as u64;
        log.stats.frames_appended += 1;
        Ok(())
    }
}

impl KvStore for LogStore {
    fn snapshot(&self) -> Result<Box<dyn KvSnapshot>> {
        self.mem.snapshot()
    }

    fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.ops().is_empty() {
            return self.mem.apply_with(&batch, || Ok(()));
        }
        let payload = encode_batch(batch.ops());
        self.mem.apply_with(&batch, || self.append(&payload))
    }

    fn fetch_add(&self, key: &[u8], delta: i64) -> Result<i64> {
        self.mem
            .fetch_add_with(key, delta, |next| self.append(&encode_counter(key, next)))
    }
}

fn encode_header() -> [u8; FILE_HEADER_LEN] {
    let mut buf = [0u8; FILE_HEADER_LEN];
    buf[0..4].copy_from_slice(&LOG_MAGIC);
    buf[4..6].copy_from_slice(&LOG_FORMAT_VERSION.to_be_bytes());
    buf
}

fn decode_header(src: &[u8]) -> Result<()> {
    if src.len() < FILE_HEADER_LEN {
        return Err(GraphError::Corruption("log header truncated"));
    }
    if src[0..4] != LOG_MAGIC {
        return Err(GraphError::Corruption("log magic mismatch"));
    }
    if src[4..6] != LOG_FORMAT_VERSION.to_be_bytes() {
        return Err(GraphError::Corruption("log format version mismatch"));
    }
    if src[6..8] != [0, 0] {
        return Err(GraphError::Corruption("log reserved header bytes non-zero"));
    }
    Ok(())
}

fn encode_batch(ops: &[WriteOp]) -> Vec<u8> {
    let mut out = vec![RECORD_BATCH];
    var::encode_u64(ops.len() as u64, &mut out);
    for op in ops {
        match op {
            WriteOp::Put(key, value) => {
                out.push(OP_PUT);
                put_var_bytes(&mut out, key);
                put_var_bytes(&mut out, value);
            }
            WriteOp::Delete(key) => {
                out.push(OP_DELETE);
                put_var_bytes(&mut out, key);
            }
            WriteOp::Merge(key, delta) => {
                out.push(OP_MERGE);
                put_var_bytes(&mut out, key);
                var::encode_i64(*delta, &mut out);
            }
        }
    }
    out
}

fn encode_counter(key: &[u8], value: i64) -> Vec<u8> {
    let mut out = vec![RECORD_COUNTER];
    put_var_bytes(&mut out, key);
    var::encode_i64(value, &mut out);
    out
}

/// Replays frames into `mem`; returns the byte length of the intact prefix
/// and the number of frames applied.
fn replay(mut src: &[u8], mem: &MemStore) -> Result<(usize, u64)> {
    let mut consumed = 0usize;
    let mut frames = 0u64;
    while src.len() >= FRAME_HEADER_LEN {
        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        let crc = u32::from_be_bytes([src[4], src[5], src[6], src[7]]);
        let Some(payload) = src.get(FRAME_HEADER_LEN..FRAME_HEADER_LEN + len) else {
            break;
        };
        if crc32fast::hash(payload) != crc {
            break;
        }
        apply_record(payload, mem)?;
        frames += 1;
        consumed += FRAME_HEADER_LEN + len;
        src = &src[FRAME_HEADER_LEN + len..];
    }
    Ok((consumed, frames))
}

fn apply_record(payload: &[u8], mem: &MemStore) -> Result<()> {
    let mut cur = Cursor::new(payload);
    match cur.u8()? {
        RECORD_BATCH => {
            let count = cur.var_u64()?;
            let mut ops = Vec::new();
            for _ in 0..count {
                let tag = cur.u8()?;
                let key = cur.var_bytes()?.to_vec();
                let op = match tag {
                    OP_PUT => WriteOp::Put(key, cur.var_bytes()?.to_vec()),
                    OP_DELETE => WriteOp::Delete(key),
                    OP_MERGE => WriteOp::Merge(key, cur.var_i64()?),
                    _ => return Err(GraphError::Corruption("unknown log op tag")),
                };
                ops.push(op);
            }
            mem.apply_unchecked(&ops)
        }
        RECORD_COUNTER => {
            let key = cur.var_bytes()?;
            let value = cur.var_i64()?;
            mem.set_counter(key, value);
            Ok(())
        }
        _ => Err(GraphError::Corruption("unknown log record type")),
    }
}
