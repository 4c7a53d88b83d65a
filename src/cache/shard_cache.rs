use std::sync::Arc;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, warn};
use crate::core::config::Config;
use crate::core::error::Result;
use crate::storage::layout::StorageLayout;
use crate::storage::shard_db::{ReadTxn, ShardDb, WriteTxn};

/// Sole owner of shard storage handles. Handles are cached by shard number
/// with the on-disk size as their cost, bounded by an aggregate ceiling;
/// eviction closes the evicted handle. The ceiling is a soft bound: one
/// oversized shard still opens and stays usable, it is just evicted
/// aggressively once another handle arrives.
pub struct ShardCache {
    layout: Arc<StorageLayout>,
    inner: Mutex<CacheInner>,
    // Serializes open-or-fetch so a shard is physically opened at most once.
    open_lock: Mutex<()>,
    cost_limit: u64,
    admit_retries: usize,
}

struct CacheInner {
    entries: LruCache<u64, Arc<ShardDb>>,
    total_cost: u64,
}

impl ShardCache {
    pub fn new(layout: Arc<StorageLayout>, config: &Config) -> Self {
        ShardCache {
            layout,
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                total_cost: 0,
            }),
            open_lock: Mutex::new(()),
            cost_limit: config.cache_cost_limit,
            admit_retries: config.cache_admit_retries,
        }
    }

    /// Run `f` inside a read-only transaction. The transaction state is
    /// dropped afterward regardless of the outcome; there is nothing a read
    /// can leave behind.
    pub fn view<T>(&self, shard: u64, f: impl FnOnce(&ReadTxn<'_>) -> Result<T>) -> Result<T> {
        let db = self.acquire(shard)?;
        let tx = db.read()?;
        f(&tx)
    }

    /// Run `f` inside a write transaction, committing when it returns `Ok`
    /// and rolling back otherwise.
    pub fn update<T>(
        &self,
        shard: u64,
        f: impl FnOnce(&mut WriteTxn<'_>) -> Result<T>,
    ) -> Result<T> {
        let db = self.acquire(shard)?;
        let mut tx = db.write()?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            // dropping the transaction rolls it back
            Err(e) => Err(e),
        }
    }

    /// Cached handle for `shard`, opening it on miss. A handle that cannot
    /// be admitted to the cache is still returned; it is released when the
    /// last reference drops.
    pub fn acquire(&self, shard: u64) -> Result<Arc<ShardDb>> {
        if let Some(db) = self.inner.lock().entries.get(&shard) {
            return Ok(db.clone());
        }

        let _open = self.open_lock.lock();
        // another caller may have opened the shard while we waited
        if let Some(db) = self.inner.lock().entries.get(&shard) {
            return Ok(db.clone());
        }
        let db = Arc::new(ShardDb::open(&self.layout, shard)?);
        self.admit(shard, db.clone());
        Ok(db)
    }

    /// Insert a freshly opened handle, evicting least-recently-used handles
    /// until the aggregate cost fits again. Admission is retried a bounded
    /// number of times under contention and then abandoned.
    fn admit(&self, shard: u64, db: Arc<ShardDb>) {
        for _ in 0..self.admit_retries.max(1) {
            let Some(mut inner) = self.inner.try_lock() else {
                continue;
            };
            let cost = db.size_bytes();
            if let Some((_, replaced)) = inner.entries.push(shard, db) {
                inner.total_cost = inner.total_cost.saturating_sub(replaced.size_bytes());
                close_handle(&replaced);
            }
            inner.total_cost += cost;
            while inner.total_cost > self.cost_limit && inner.entries.len() > 1 {
                match inner.entries.pop_lru() {
                    Some((_, evicted)) => {
                        inner.total_cost = inner.total_cost.saturating_sub(evicted.size_bytes());
                        close_handle(&evicted);
                    }
                    None => break,
                }
            }
            return;
        }
        debug!(shard, "shard handle not admitted to cache");
    }

    pub fn cached_shards(&self) -> Vec<u64> {
        let inner = self.inner.lock();
        let mut shards: Vec<u64> = inner.entries.iter().map(|(shard, _)| *shard).collect();
        shards.sort();
        shards
    }

    /// Close every cached handle. Handles still referenced elsewhere refuse
    /// new transactions from this point on.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        while let Some((_, db)) = inner.entries.pop_lru() {
            close_handle(&db);
        }
        inner.total_cost = 0;
    }
}

/// Best-effort cleanup: a close failure is logged, never propagated.
fn close_handle(db: &Arc<ShardDb>) {
    if let Err(e) = db.close() {
        warn!(shard = db.shard(), error = %e, "failed to close shard handle");
    }
}
