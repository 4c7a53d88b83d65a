use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard};
use tracing::warn;
use crate::core::error::{Error, ErrorKind, Result};

/// Append-only ordered key-value store: a replayed log in front of an
/// in-memory tree. Each commit appends one length-prefixed, crc-checked
/// bincode batch, so a torn tail is detected and dropped on the next open.
pub struct KvStore {
    path: PathBuf,
    inner: RwLock<KvInner>,
    write_gate: WriterGate,
}

struct KvInner {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    file: File,
    position: u64,
}

/// Hands out the single-writer token without tying a guard lifetime to the
/// store, so a write transaction can be held across calls.
struct WriterGate {
    locked: Mutex<bool>,
    cond: Condvar,
}

impl WriterGate {
    fn new() -> Self {
        WriterGate {
            locked: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut locked = self.locked.lock();
        while *locked {
            self.cond.wait(&mut locked);
        }
        *locked = true;
    }

    fn release(&self) {
        *self.locked.lock() = false;
        self.cond.notify_one();
    }
}

impl KvStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;

        // Replay committed batches; stop at the first torn or corrupt frame.
        let mut entries = BTreeMap::new();
        let mut position = 0usize;
        while raw.len() - position >= 8 {
            let len = u32::from_le_bytes([
                raw[position],
                raw[position + 1],
                raw[position + 2],
                raw[position + 3],
            ]) as usize;
            let crc = u32::from_le_bytes([
                raw[position + 4],
                raw[position + 5],
                raw[position + 6],
                raw[position + 7],
            ]);
            let start = position + 8;
            if raw.len() - start < len {
                warn!(path = %path.display(), "truncated batch at log tail, dropping");
                break;
            }
            let payload = &raw[start..start + len];
            if crc32fast::hash(payload) != crc {
                warn!(path = %path.display(), "corrupt batch at log tail, dropping");
                break;
            }
            let batch: Vec<(Vec<u8>, Vec<u8>)> = bincode::deserialize(payload)?;
            for (key, value) in batch {
                entries.insert(key, value);
            }
            position = start + len;
        }
        if position < raw.len() {
            // Drop the unreadable tail so future commits append cleanly.
            file.set_len(position as u64)?;
        }

        Ok(Arc::new(KvStore {
            path,
            inner: RwLock::new(KvInner {
                entries,
                file,
                position: position as u64,
            }),
            write_gate: WriterGate::new(),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read transaction over the committed state. Dropping it is the
    /// rollback; there is nothing to commit.
    pub fn read(&self) -> ReadTxn<'_> {
        ReadTxn {
            guard: self.inner.read(),
        }
    }

    /// Write transaction over `store`. Blocks until the previous writer
    /// commits or drops. The transaction owns its handle on the store, so it
    /// can outlive the borrow that created it.
    pub fn write(store: &Arc<KvStore>) -> WriteTxn {
        store.write_gate.acquire();
        WriteTxn {
            store: store.clone(),
            staged: BTreeMap::new(),
            released: false,
        }
    }
}

pub struct ReadTxn<'a> {
    guard: RwLockReadGuard<'a, KvInner>,
}

impl ReadTxn<'_> {
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.guard.entries.get(key).map(|v| v.as_slice())
    }

    pub fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.guard
            .entries
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Last value handed out by a named sequence; zero if never used.
    pub fn sequence_head(&self, key: &[u8]) -> u64 {
        decode_sequence(self.guard.entries.get(key).map(|v| v.as_slice()))
    }
}

pub struct WriteTxn {
    store: Arc<KvStore>,
    staged: BTreeMap<Vec<u8>, Vec<u8>>,
    released: bool,
}

fn decode_sequence(raw: Option<&[u8]>) -> u64 {
    match raw {
        Some(bytes) if bytes.len() == 8 => {
            u64::from_be_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ])
        }
        _ => 0,
    }
}

impl WriteTxn {
    /// Staged value first, then the committed state.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(value) = self.staged.get(key) {
            return Some(value.clone());
        }
        self.store.inner.read().entries.get(key).cloned()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.staged.insert(key, value);
    }

    /// Allocate the next value of the named monotonic sequence. The head is
    /// staged with the rest of the transaction, so an abort discards the
    /// allocation and leaves no hole.
    pub fn next_sequence(&mut self, key: &[u8]) -> Result<u64> {
        let head = decode_sequence(self.get(key).as_deref());
        let next = head.checked_add(1).ok_or_else(|| {
            Error::new(ErrorKind::InvalidState, "sequence exhausted".to_string())
        })?;
        self.put(key.to_vec(), next.to_be_bytes().to_vec());
        Ok(next)
    }

    /// Append the staged batch to the log, fsync, then publish it to the
    /// in-memory tree. A failed append truncates back to the last good
    /// offset so the log stays replayable.
    pub fn commit(mut self) -> Result<()> {
        if self.staged.is_empty() {
            self.released = true;
            self.store.write_gate.release();
            return Ok(());
        }
        let batch: Vec<(Vec<u8>, Vec<u8>)> = std::mem::take(&mut self.staged).into_iter().collect();
        let payload = bincode::serialize(&batch)?;
        let crc = crc32fast::hash(&payload);

        let mut inner = self.store.inner.write();
        let result = (|| -> Result<()> {
            inner.file.write_all(&(payload.len() as u32).to_le_bytes())?;
            inner.file.write_all(&crc.to_le_bytes())?;
            inner.file.write_all(&payload)?;
            inner.file.sync_all()?;
            Ok(())
        })();
        match result {
            Ok(()) => {
                inner.position += 8 + payload.len() as u64;
                for (key, value) in batch {
                    inner.entries.insert(key, value);
                }
            }
            Err(e) => {
                let position = inner.position;
                if let Err(trunc) = inner.file.set_len(position) {
                    warn!(path = %self.store.path.display(), error = %trunc,
                        "failed to truncate log after bad append");
                }
                drop(inner);
                self.released = true;
                self.store.write_gate.release();
                return Err(e);
            }
        }
        drop(inner);
        self.released = true;
        self.store.write_gate.release();
        Ok(())
    }
}

impl Drop for WriteTxn {
    fn drop(&mut self) {
        if !self.released {
            // rollback: staged state is simply discarded
            self.store.write_gate.release();
        }
    }
}
