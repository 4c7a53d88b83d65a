use std::path::Path;
use std::sync::Arc;
use crate::core::error::{Error, ErrorKind, Result};
use crate::kv::store::{KvStore, ReadTxn as KvReadTxn, WriteTxn as KvWriteTxn};

const FORWARD_TAG: u8 = 0x01;
const REVERSE_TAG: u8 = 0x02;
const SEQ_KEY: &[u8] = b"\x00translate_seq";

/// Bidirectional, append-only mapping between opaque field keys and dense
/// integer IDs. IDs come from a per-store monotonic sequence starting at 1;
/// entries are never deleted or renumbered.
pub struct TranslateStore {
    kv: Arc<KvStore>,
}

fn forward_key(field: &str, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 + field.len() + key.len());
    out.push(FORWARD_TAG);
    out.extend_from_slice(&(field.len() as u16).to_be_bytes());
    out.extend_from_slice(field.as_bytes());
    out.extend_from_slice(key);
    out
}

fn reverse_key(field: &str, id: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(11 + field.len());
    out.push(REVERSE_TAG);
    out.extend_from_slice(&(field.len() as u16).to_be_bytes());
    out.extend_from_slice(field.as_bytes());
    out.extend_from_slice(&id.to_be_bytes());
    out
}

fn decode_id(raw: &[u8]) -> Result<u64> {
    if raw.len() != 8 {
        return Err(Error::new(
            ErrorKind::Corrupted,
            "translation id is not 8 bytes".to_string(),
        ));
    }
    Ok(u64::from_be_bytes([
        raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
    ]))
}

impl TranslateStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(TranslateStore {
            kv: KvStore::open(path)?,
        })
    }

    pub fn read(&self) -> TranslateReadTxn<'_> {
        TranslateReadTxn {
            tx: self.kv.read(),
        }
    }

    pub fn write(&self) -> TranslateWriteTxn {
        TranslateWriteTxn {
            tx: KvStore::write(&self.kv),
        }
    }
}

pub struct TranslateReadTxn<'a> {
    tx: KvReadTxn<'a>,
}

impl TranslateReadTxn<'_> {
    /// Forward lookup without mutation.
    pub fn find(&self, field: &str, key: &[u8]) -> Result<Option<u64>> {
        match self.tx.get(&forward_key(field, key)) {
            Some(raw) => Ok(Some(decode_id(raw)?)),
            None => Ok(None),
        }
    }

    /// Reverse lookup without mutation.
    pub fn key(&self, field: &str, id: u64) -> Option<Vec<u8>> {
        self.tx.get(&reverse_key(field, id)).map(|raw| raw.to_vec())
    }
}

pub struct TranslateWriteTxn {
    tx: KvWriteTxn,
}

impl TranslateWriteTxn {
    /// Translate `key` for `field`, allocating the next ID on first sight.
    /// Repeated calls with the same pair return the same ID, inside one
    /// transaction and across them.
    pub fn tr(&mut self, field: &str, key: &[u8]) -> Result<u64> {
        let fkey = forward_key(field, key);
        if let Some(raw) = self.tx.get(&fkey) {
            return decode_id(&raw);
        }
        let id = self.tx.next_sequence(SEQ_KEY)?;
        self.tx.put(fkey, id.to_be_bytes().to_vec());
        self.tx.put(reverse_key(field, id), key.to_vec());
        Ok(id)
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit()
    }
}
