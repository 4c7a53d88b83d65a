use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use roaring::RoaringTreemap;
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, ErrorKind, Result};
use crate::row::cursor::{row_bits, stream_rows, RowCursor};
use crate::row::row::Row;
use crate::storage::layout::StorageLayout;
use crate::storage::mmap_file::MmapFile;

const MAGIC: &[u8; 4] = b"LTSD";
const VERSION: u32 = 1;
// magic + version + directory length + directory crc
const HEADER_LEN: usize = 4 + 4 + 8 + 4;

/// Directory row naming one bitmap stream inside the blob section.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StreamEntry {
    field: String,
    view: String,
    offset: u64,
    len: u64,
    crc: u32,
}

struct ShardState {
    map: MmapFile,
    // (field, view) -> absolute offset, length, checksum
    directory: HashMap<(String, String), (usize, usize, u32)>,
}

/// One shard's stream store: every field's bitmap for every view, written as
/// a whole on commit and memory-mapped for reads. One write transaction at a
/// time, any number of read transactions.
pub struct ShardDb {
    shard: u64,
    path: PathBuf,
    state: RwLock<ShardState>,
    size_bytes: AtomicU64,
    closed: AtomicBool,
}

impl ShardDb {
    /// Open the shard's store, creating an empty one on first touch.
    pub fn open(layout: &StorageLayout, shard: u64) -> Result<Self> {
        let path = layout.shard_path(shard);
        if !path.exists() {
            write_streams(&path, &BTreeMap::new())?;
        }
        let state = load_state(&path)?;
        let size = fs::metadata(&path)?.len();
        Ok(ShardDb {
            shard,
            path,
            state: RwLock::new(state),
            size_bytes: AtomicU64::new(size),
            closed: AtomicBool::new(false),
        })
    }

    pub fn shard(&self) -> u64 {
        self.shard
    }

    /// On-disk size, the handle's cost in the shard cache.
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes.load(Ordering::SeqCst)
    }

    pub fn read(&self) -> Result<ReadTxn<'_>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::new(
                ErrorKind::InvalidState,
                format!("shard {} handle is closed", self.shard),
            ));
        }
        Ok(ReadTxn {
            shard: self.shard,
            state: self.state.read(),
        })
    }

    pub fn write(&self) -> Result<WriteTxn<'_>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::new(
                ErrorKind::InvalidState,
                format!("shard {} handle is closed", self.shard),
            ));
        }
        Ok(WriteTxn {
            db: self,
            state: self.state.write(),
            staged: HashMap::new(),
        })
    }

    /// Stop handing out transactions and release the mapping. In-flight
    /// transactions keep the old mapping alive until they finish.
    pub fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(mut state) = self.state.try_write() {
            state.map = MmapFile::empty();
            state.directory.clear();
        }
        Ok(())
    }
}

/// Read-only view of one shard. Dropping it is the rollback.
pub struct ReadTxn<'a> {
    shard: u64,
    state: RwLockReadGuard<'a, ShardState>,
}

impl ReadTxn<'_> {
    pub fn shard(&self) -> u64 {
        self.shard
    }

    /// Cursor over one (field, view) stream; `None` when the shard has no
    /// such stream, which readers treat as an empty result.
    pub fn cursor(&self, field: &str, view: &str) -> Option<StreamCursor<'_>> {
        let (offset, len, crc) = self
            .state
            .directory
            .get(&(field.to_string(), view.to_string()))?;
        Some(StreamCursor {
            data: &self.state.map.data()[*offset..*offset + *len],
            crc: *crc,
            bits: None,
        })
    }
}

/// Cursor over one stream's raw bytes. The bitmap is decoded on first use so
/// checksum and decode failures surface through cursor calls.
pub struct StreamCursor<'a> {
    data: &'a [u8],
    crc: u32,
    bits: Option<RoaringTreemap>,
}

impl StreamCursor<'_> {
    fn load(&mut self) -> Result<&RoaringTreemap> {
        if self.bits.is_none() {
            if crc32fast::hash(self.data) != self.crc {
                return Err(Error::new(
                    ErrorKind::Corrupted,
                    "stream checksum mismatch".to_string(),
                ));
            }
            self.bits = Some(RoaringTreemap::deserialize_from(self.data)?);
        }
        match &self.bits {
            Some(bits) => Ok(bits),
            None => Err(Error::new(
                ErrorKind::Internal,
                "stream decode produced no bitmap".to_string(),
            )),
        }
    }
}

impl RowCursor for StreamCursor<'_> {
    fn row(&mut self, row_id: u64) -> Result<Row> {
        Ok(row_bits(self.load()?, row_id))
    }

    fn max(&mut self) -> Result<Option<u64>> {
        Ok(self.load()?.max())
    }

    fn rows(&mut self, start: u64, f: &mut dyn FnMut(u64, Row) -> Result<()>) -> Result<()> {
        stream_rows(self.load()?, start, f)
    }
}

/// Write transaction: stages stream merges and atomically rewrites the file
/// on commit. Dropping without commit discards the staged merges.
pub struct WriteTxn<'a> {
    db: &'a ShardDb,
    state: RwLockWriteGuard<'a, ShardState>,
    staged: HashMap<(String, String), RoaringTreemap>,
}

impl WriteTxn<'_> {
    /// Union `bits` into the named stream.
    pub fn merge(&mut self, field: &str, view: &str, bits: &RoaringTreemap) {
        let entry = self
            .staged
            .entry((field.to_string(), view.to_string()))
            .or_default();
        *entry |= bits;
    }

    pub fn commit(mut self) -> Result<()> {
        if self.staged.is_empty() {
            return Ok(());
        }
        // fold the staged merges into the streams already on disk
        let mut streams: BTreeMap<(String, String), RoaringTreemap> = BTreeMap::new();
        for (key, (offset, len, crc)) in &self.state.directory {
            let data = &self.state.map.data()[*offset..*offset + *len];
            if crc32fast::hash(data) != *crc {
                return Err(Error::new(
                    ErrorKind::Corrupted,
                    format!("stream {:?} checksum mismatch", key),
                ));
            }
            streams.insert(key.clone(), RoaringTreemap::deserialize_from(data)?);
        }
        for (key, bits) in std::mem::take(&mut self.staged) {
            let entry = streams.entry(key).or_default();
            *entry |= bits;
        }

        let size = write_streams(&self.db.path, &streams)?;
        *self.state = load_state(&self.db.path)?;
        self.db.size_bytes.store(size, Ordering::SeqCst);
        Ok(())
    }
}

/// Serialize every stream into a fresh file and swap it in with a rename.
fn write_streams(
    path: &Path,
    streams: &BTreeMap<(String, String), RoaringTreemap>,
) -> Result<u64> {
    let mut blobs = Vec::new();
    let mut entries = Vec::with_capacity(streams.len());
    for ((field, view), bits) in streams {
        let mut buf = Vec::new();
        bits.serialize_into(&mut buf)?;
        entries.push(StreamEntry {
            field: field.clone(),
            view: view.clone(),
            offset: blobs.len() as u64,
            len: buf.len() as u64,
            crc: crc32fast::hash(&buf),
        });
        blobs.extend_from_slice(&buf);
    }
    let directory = bincode::serialize(&entries)?;

    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(MAGIC)?;
    file.write_all(&VERSION.to_le_bytes())?;
    file.write_all(&(directory.len() as u64).to_le_bytes())?;
    file.write_all(&crc32fast::hash(&directory).to_le_bytes())?;
    file.write_all(&directory)?;
    file.write_all(&blobs)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;

    Ok((HEADER_LEN + directory.len() + blobs.len()) as u64)
}

fn load_state(path: &Path) -> Result<ShardState> {
    let map = MmapFile::open_read_only(path)?;
    let data = map.data();
    if data.len() < HEADER_LEN {
        return Err(Error::new(
            ErrorKind::Corrupted,
            format!("{} is shorter than a header", path.display()),
        ));
    }
    if &data[0..4] != MAGIC {
        return Err(Error::new(
            ErrorKind::Corrupted,
            format!("{} is not a shard store", path.display()),
        ));
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != VERSION {
        return Err(Error::new(
            ErrorKind::InvalidArgument,
            format!("incompatible shard store version {}", version),
        ));
    }
    let dir_len = u64::from_le_bytes([
        data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
    ]) as usize;
    let dir_crc = u32::from_le_bytes([data[16], data[17], data[18], data[19]]);
    if data.len() < HEADER_LEN + dir_len {
        return Err(Error::new(
            ErrorKind::Corrupted,
            format!("{} directory is truncated", path.display()),
        ));
    }
    let dir_bytes = &data[HEADER_LEN..HEADER_LEN + dir_len];
    if crc32fast::hash(dir_bytes) != dir_crc {
        return Err(Error::new(
            ErrorKind::Corrupted,
            format!("{} directory checksum mismatch", path.display()),
        ));
    }
    let entries: Vec<StreamEntry> = bincode::deserialize(dir_bytes)?;

    let blob_start = HEADER_LEN + dir_len;
    let mut directory = HashMap::with_capacity(entries.len());
    for entry in entries {
        let offset = blob_start + entry.offset as usize;
        let len = entry.len as usize;
        if offset + len > data.len() {
            return Err(Error::new(
                ErrorKind::Corrupted,
                format!("{} stream blob out of bounds", path.display()),
            ));
        }
        directory.insert((entry.field, entry.view), (offset, len, entry.crc));
    }
    Ok(ShardState { map, directory })
}
