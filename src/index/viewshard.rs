use std::collections::HashMap;
use std::sync::Arc;
use roaring::RoaringBitmap;
use crate::core::config::RosterMerge;
use crate::core::error::{Error, ErrorKind, Result};
use crate::kv::store::{KvStore, WriteTxn as KvWriteTxn};
use crate::storage::layout::StorageLayout;
use crate::translate::store::{TranslateStore, TranslateWriteTxn};

const ROSTER_TAG: u8 = 0x03;
const SEQ_RECORDS: &[u8] = b"\x00record_seq";

/// Tracks which shards contain data for each view, owns the global record-ID
/// sequence, and fronts the translation store so both commit together.
pub struct ViewShardIndex {
    kv: Arc<KvStore>,
    translate: TranslateStore,
    merge: RosterMerge,
}

fn roster_key(view: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + view.len());
    out.push(ROSTER_TAG);
    out.extend_from_slice(view.as_bytes());
    out
}

fn decode_roster(raw: &[u8]) -> Result<RoaringBitmap> {
    RoaringBitmap::deserialize_from(raw).map_err(|e| {
        Error::new(
            ErrorKind::Corrupted,
            format!("shard roster is unreadable: {}", e),
        )
    })
}

impl ViewShardIndex {
    pub fn open(layout: &StorageLayout, merge: RosterMerge) -> Result<Self> {
        Ok(ViewShardIndex {
            kv: KvStore::open(layout.index_path())?,
            translate: TranslateStore::open(layout.translate_path())?,
            merge,
        })
    }

    pub fn translate(&self) -> &TranslateStore {
        &self.translate
    }

    /// Shards known to contain data for `view`, ascending.
    pub fn shards(&self, view: &str) -> Result<Vec<u64>> {
        let tx = self.kv.read();
        match tx.get(&roster_key(view)) {
            Some(raw) => {
                let roster = decode_roster(raw)?;
                Ok(roster.iter().map(u64::from).collect())
            }
            None => Ok(Vec::new()),
        }
    }

    /// Group the given views by shard, so a caller opens each shard once and
    /// handles all relevant views together. View lists are deduplicated and
    /// sorted.
    pub fn views(&self, names: &[&str]) -> Result<HashMap<u64, Vec<String>>> {
        let tx = self.kv.read();
        let mut grouped: HashMap<u64, Vec<String>> = HashMap::new();
        for name in names {
            if let Some(raw) = tx.get(&roster_key(name)) {
                let roster = decode_roster(raw)?;
                for shard in roster.iter() {
                    grouped
                        .entry(shard as u64)
                        .or_default()
                        .push(name.to_string());
                }
            }
        }
        for list in grouped.values_mut() {
            list.sort();
            list.dedup();
        }
        Ok(grouped)
    }

    /// Every view with a persisted roster, ascending.
    pub fn view_names(&self) -> Result<Vec<String>> {
        let tx = self.kv.read();
        Ok(tx
            .scan_prefix(&[ROSTER_TAG])
            .into_iter()
            .map(|(key, _)| String::from_utf8_lossy(&key[1..]).into_owned())
            .collect())
    }

    /// Begin the write scope holding the record-ID sequence and staged
    /// rosters.
    pub fn write(&self) -> IndexWriteTxn {
        IndexWriteTxn {
            tx: KvStore::write(&self.kv),
            merge: self.merge,
        }
    }

    /// Persist the observed rosters, then commit the index store and the
    /// translation store together. Neither failure short-circuits the other;
    /// the outcomes are joined.
    pub fn commit(
        &self,
        mut tx: IndexWriteTxn,
        translate_tx: Option<TranslateWriteTxn>,
        views: &HashMap<String, RoaringBitmap>,
    ) -> Result<()> {
        for (view, shards) in views {
            tx.stage_roster(view, shards)?;
        }
        let index_result = tx.commit();
        let translate_result = match translate_tx {
            Some(translate_tx) => translate_tx.commit(),
            None => Ok(()),
        };
        match (index_result, translate_result) {
            (Ok(()), Ok(())) => Ok(()),
            (a, b) => Err(Error::join(
                [a.err(), b.err()].into_iter().flatten().collect(),
            )),
        }
    }
}

pub struct IndexWriteTxn {
    tx: KvWriteTxn,
    merge: RosterMerge,
}

impl IndexWriteTxn {
    /// Next global record (column) ID. Staged with the transaction, so an
    /// abort discards the allocation.
    pub fn next_record_id(&mut self) -> Result<u64> {
        self.tx.next_sequence(SEQ_RECORDS)
    }

    /// Combine `shards` with the persisted roster for `view` under the
    /// configured merge semantics and stage the result.
    pub fn stage_roster(&mut self, view: &str, shards: &RoaringBitmap) -> Result<()> {
        let key = roster_key(view);
        let combined = match self.tx.get(&key) {
            Some(raw) => {
                let existing = decode_roster(&raw)?;
                match self.merge {
                    RosterMerge::Union => &existing | shards,
                    RosterMerge::Intersect => &existing & shards,
                }
            }
            None => shards.clone(),
        };
        let mut buf = Vec::new();
        combined
            .serialize_into(&mut buf)
            .map_err(|e| Error::new(ErrorKind::Io, format!("roster encode failed: {}", e)))?;
        self.tx.put(key, buf);
        Ok(())
    }

    pub fn commit(self) -> Result<()> {
        self.tx.commit()
    }
}
