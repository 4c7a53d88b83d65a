use std::sync::Arc;
use crate::cache::shard_cache::ShardCache;
use crate::core::config::Config;
use crate::core::error::Result;
use crate::index::viewshard::ViewShardIndex;
use crate::query::filter::Filter;
use crate::schema::schema::Schema;
use crate::storage::layout::StorageLayout;
use crate::writer::schema_writer::SchemaWriter;

/// Top-level wiring: one storage layout, one shard cache owning every shard
/// handle, one view/shard index fronting the translation store.
pub struct Database {
    pub config: Config,
    pub layout: Arc<StorageLayout>,
    pub cache: Arc<ShardCache>,
    pub index: Arc<ViewShardIndex>,
}

impl Database {
    pub fn open(config: Config) -> Result<Self> {
        let layout = Arc::new(StorageLayout::new(config.storage_path.clone())?);
        let index = Arc::new(ViewShardIndex::open(&layout, config.roster_merge)?);
        let cache = Arc::new(ShardCache::new(layout.clone(), &config));
        Ok(Database {
            config,
            layout,
            cache,
            index,
        })
    }

    /// Batch writer for `schema`. One batch at a time; the writer holds the
    /// store write scopes until `save` or `release`.
    pub fn writer(&self, schema: Schema) -> Result<SchemaWriter> {
        SchemaWriter::new(
            schema,
            self.config.time_format,
            self.index.clone(),
            self.cache.clone(),
        )
    }

    /// Run `filter` over every shard the roster names for `view` and
    /// materialize the matching global column IDs. A per-shard error aborts
    /// the whole query; callers wanting per-shard recovery drive the cache
    /// themselves.
    pub fn query(&self, view: &str, filter: &dyn Filter) -> Result<Vec<u64>> {
        let mut columns = Vec::new();
        for shard in self.index.shards(view)? {
            let row = self.cache.view(shard, |tx| filter.apply(tx, None))?;
            columns.extend(row.columns(shard));
        }
        Ok(columns)
    }

    pub fn close(&self) {
        self.cache.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use crate::core::types::{FieldValue, Record};
    use crate::query::compare::Op;
    use crate::query::filter::{BoolEquals, BsiCompare, MutexEquals};

    // 2024-01-01T12:00:00Z in milliseconds
    const TS: i64 = 1_704_110_400_000;

    fn config(dir: &TempDir) -> Config {
        Config {
            storage_path: dir.path().to_path_buf(),
            ..Config::default()
        }
    }

    fn schema() -> Schema {
        Schema::new("ts")
            .add_bool_field("active")
            .add_int_field("age")
            .add_string_field("city")
    }

    fn seed(db: &Database) {
        let mut writer = db.writer(schema()).unwrap();
        for (active, age, city) in [
            (true, 34, "hanoi"),
            (false, 7, "hue"),
            (true, 42, "hanoi"),
            (true, 42, "danang"),
        ] {
            let mut record = Record::new();
            record.set("ts", FieldValue::Timestamp(TS));
            record.set("active", FieldValue::Bool(active));
            record.set("age", FieldValue::Int(age));
            record.set("city", FieldValue::String(city.to_string()));
            writer.write(&record).unwrap();
        }
        writer.save().unwrap();
        writer.release().unwrap();
    }

    #[test]
    fn ingest_then_query_by_every_predicate_kind() {
        let dir = TempDir::new().unwrap();
        let db = Database::open(config(&dir)).unwrap();
        seed(&db);

        let view = "20240101".to_string();
        let active = BoolEquals {
            field: "active".to_string(),
            view: view.clone(),
            value: true,
        };
        assert_eq!(db.query(&view, &active).unwrap(), vec![1, 3, 4]);

        let age_eq = BsiCompare {
            field: "age".to_string(),
            view: view.clone(),
            op: Op::Eq,
            a: 42,
            b: 0,
        };
        assert_eq!(db.query(&view, &age_eq).unwrap(), vec![3, 4]);

        let age_range = BsiCompare {
            field: "age".to_string(),
            view: view.clone(),
            op: Op::Range,
            a: 7,
            b: 34,
        };
        assert_eq!(db.query(&view, &age_range).unwrap(), vec![1, 2]);

        let hanoi = db.index.translate().read().find("city", b"hanoi").unwrap();
        let in_hanoi = MutexEquals {
            field: "city".to_string(),
            view: view.clone(),
            row_id: hanoi.unwrap(),
        };
        assert_eq!(db.query(&view, &in_hanoi).unwrap(), vec![1, 3]);

        // a view with no roster yields no columns
        assert_eq!(db.query("20231231", &active).unwrap(), Vec::<u64>::new());
    }

    #[test]
    fn data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let db = Database::open(config(&dir)).unwrap();
            seed(&db);
            db.close();
        }
        let db = Database::open(config(&dir)).unwrap();
        let filter = BsiCompare {
            field: "age".to_string(),
            view: "20240101".to_string(),
            op: Op::Ge,
            a: 34,
            b: 0,
        };
        assert_eq!(db.query("20240101", &filter).unwrap(), vec![1, 3, 4]);
    }
}
