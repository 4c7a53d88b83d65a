use std::collections::HashMap;
use std::mem;
use std::sync::Arc;
use roaring::{RoaringBitmap, RoaringTreemap};
use crate::cache::shard_cache::ShardCache;
use crate::codec::{boolean, bsi, mutex, set};
use crate::core::config::TimeFormat;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{shard_of, FieldValue, Record};
use crate::index::viewshard::{IndexWriteTxn, ViewShardIndex};
use crate::schema::schema::{Field, FieldKind, Schema};
use crate::translate::store::TranslateWriteTxn;

/// Name of the fixed, non-quantized view.
pub const STANDARD_VIEW: &str = "standard";

/// Floats are stored as BSI over their bit pattern.
pub fn float_bits(value: f64) -> i64 {
    value.to_bits() as i64
}

pub fn float_from_bits(raw: i64) -> f64 {
    f64::from_bits(raw as u64)
}

/// Routes each record field through its codec into per-(shard, view, field)
/// accumulators, then flushes them shard by shard on `save`. The accumulator
/// arena belongs to the in-progress batch and is cleared, not reallocated,
/// when the batch ends.
pub struct SchemaWriter {
    schema: Schema,
    time_format: TimeFormat,
    index: Arc<ViewShardIndex>,
    cache: Arc<ShardCache>,
    // shard -> (field, view) -> accumulated bits
    batch: HashMap<u64, HashMap<(String, String), RoaringTreemap>>,
    views: HashMap<String, RoaringBitmap>,
    index_tx: Option<IndexWriteTxn>,
    translate_tx: Option<TranslateWriteTxn>,
}

impl SchemaWriter {
    pub fn new(
        schema: Schema,
        time_format: TimeFormat,
        index: Arc<ViewShardIndex>,
        cache: Arc<ShardCache>,
    ) -> Result<Self> {
        schema.validate()?;
        Ok(SchemaWriter {
            schema,
            time_format,
            index,
            cache,
            batch: HashMap::new(),
            views: HashMap::new(),
            index_tx: None,
            translate_tx: None,
        })
    }

    /// Assign the next column ID to `record` and encode every schema field it
    /// carries. A record without its timestamp field is rejected before any
    /// state changes.
    pub fn write(&mut self, record: &Record) -> Result<()> {
        let view = self.view_for(record)?;

        let index = self.index.clone();
        let index_tx = self.index_tx.get_or_insert_with(|| index.write());
        let id = index_tx.next_record_id()?;
        let shard = shard_of(id);

        let translate_tx = self
            .translate_tx
            .get_or_insert_with(|| index.translate().write());
        let streams = self.batch.entry(shard).or_default();
        for field in &self.schema.fields {
            let Some(value) = record.get(&field.name) else {
                continue;
            };
            let bits = streams
                .entry((field.name.clone(), view.clone()))
                .or_default();
            encode_field(bits, translate_tx, field, id, value)?;
        }
        self.views
            .entry(view)
            .or_default()
            .insert(shard as u32);
        Ok(())
    }

    /// Flush every accumulated shard, then commit the rosters and both
    /// key-value stores. Shard flushes are all attempted even when one
    /// fails; a failed flush aborts the batch and rolls the stores back.
    pub fn save(&mut self) -> Result<()> {
        let batch = mem::take(&mut self.batch);
        let mut errors = Vec::new();
        for (shard, streams) in &batch {
            let result = self.cache.update(*shard, |tx| {
                for ((field, view), bits) in streams {
                    tx.merge(field, view, bits);
                }
                Ok(())
            });
            if let Err(e) = result {
                errors.push(Error::new(
                    ErrorKind::Io,
                    format!("shard {} flush failed: {}", shard, e),
                ));
            }
        }
        if !errors.is_empty() {
            self.release_state();
            return Err(Error::join(errors));
        }

        let views = mem::take(&mut self.views);
        let translate_tx = self.translate_tx.take();
        match self.index_tx.take() {
            Some(index_tx) => self.index.commit(index_tx, translate_tx, &views),
            None => match translate_tx {
                Some(translate_tx) => translate_tx.commit(),
                None => Ok(()),
            },
        }
    }

    /// Discard all in-progress state without flushing: the accumulator arena
    /// and both open write transactions, which roll back on drop.
    pub fn release(&mut self) -> Result<()> {
        self.release_state();
        Ok(())
    }

    fn release_state(&mut self) {
        self.batch.clear();
        self.views.clear();
        self.index_tx = None;
        self.translate_tx = None;
    }

    /// Day-granularity view bucket from the record's timestamp field, or the
    /// standard view for non-quantized schemas.
    fn view_for(&self, record: &Record) -> Result<String> {
        let raw = match record.get(&self.schema.timestamp_field) {
            Some(FieldValue::Timestamp(v)) | Some(FieldValue::Int(v)) => *v,
            Some(other) => {
                return Err(Error::new(
                    ErrorKind::Schema,
                    format!(
                        "timestamp field `{}` holds {:?}",
                        self.schema.timestamp_field, other
                    ),
                ));
            }
            None => {
                return Err(Error::new(
                    ErrorKind::Schema,
                    format!(
                        "record is missing timestamp field `{}`",
                        self.schema.timestamp_field
                    ),
                ));
            }
        };
        if !self.schema.quantum {
            return Ok(STANDARD_VIEW.to_string());
        }
        let when = self.time_format.to_datetime(raw).ok_or_else(|| {
            Error::new(
                ErrorKind::Schema,
                format!("timestamp {} is out of range", raw),
            )
        })?;
        Ok(when.format("%Y%m%d").to_string())
    }
}

/// One field value into its codec's rows.
fn encode_field(
    bits: &mut RoaringTreemap,
    translate: &mut TranslateWriteTxn,
    field: &Field,
    id: u64,
    value: &FieldValue,
) -> Result<()> {
    match (field.kind, value) {
        (FieldKind::Bool, FieldValue::Bool(v)) => {
            boolean::add(bits, id, *v);
        }
        (FieldKind::Int, FieldValue::Int(v)) => {
            bsi::add(bits, id, *v);
        }
        (FieldKind::Timestamp, FieldValue::Timestamp(v))
        | (FieldKind::Timestamp, FieldValue::Int(v)) => {
            bsi::add(bits, id, *v);
        }
        (FieldKind::Float, FieldValue::Float(v)) => {
            bsi::add(bits, id, float_bits(*v));
        }
        (FieldKind::Enum, FieldValue::Int(v)) => {
            if *v < 0 {
                return Err(Error::new(
                    ErrorKind::Schema,
                    format!("field `{}` rejects negative enum index {}", field.name, v),
                ));
            }
            mutex::add(bits, id, *v as u64);
        }
        (FieldKind::String, FieldValue::String(v)) => {
            let key_id = translate.tr(&field.name, v.as_bytes())?;
            mutex::add(bits, id, key_id);
        }
        (FieldKind::Bytes, FieldValue::Bytes(v)) => {
            let key_id = translate.tr(&field.name, v)?;
            mutex::add(bits, id, key_id);
        }
        (FieldKind::StringSet, FieldValue::StringSet(values)) => {
            let mut key_ids = Vec::with_capacity(values.len());
            for value in values {
                key_ids.push(translate.tr(&field.name, value.as_bytes())?);
            }
            set::add(bits, id, &key_ids);
        }
        (kind, value) => {
            return Err(Error::new(
                ErrorKind::Schema,
                format!("field `{}` ({:?}) cannot store {:?}", field.name, kind, value),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use crate::core::config::{Config, RosterMerge};
    use crate::query::compare::{compare, Op};
    use crate::row::cursor::RowCursor;
    use crate::storage::layout::StorageLayout;

    struct Fixture {
        _dir: TempDir,
        index: Arc<ViewShardIndex>,
        cache: Arc<ShardCache>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let layout = Arc::new(StorageLayout::new(dir.path().to_path_buf()).unwrap());
        let index = Arc::new(ViewShardIndex::open(&layout, RosterMerge::Union).unwrap());
        let cache = Arc::new(ShardCache::new(layout, &Config::default()));
        Fixture {
            _dir: dir,
            index,
            cache,
        }
    }

    fn schema() -> Schema {
        Schema::new("ts")
            .add_bool_field("active")
            .add_int_field("age")
            .add_float_field("score")
            .add_string_field("name")
            .add_string_set_field("tags")
    }

    // 2024-01-01T12:00:00Z in milliseconds
    const TS: i64 = 1_704_110_400_000;

    fn record(name: &str, age: i64) -> Record {
        let mut record = Record::new();
        record.set("ts", FieldValue::Timestamp(TS));
        record.set("active", FieldValue::Bool(true));
        record.set("age", FieldValue::Int(age));
        record.set("score", FieldValue::Float(age as f64 / 2.0));
        record.set("name", FieldValue::String(name.to_string()));
        record.set(
            "tags",
            FieldValue::StringSet(vec!["x".to_string(), name.to_string()]),
        );
        record
    }

    #[test]
    fn write_and_save_round_trips_every_codec() {
        let fx = fixture();
        let mut writer = SchemaWriter::new(
            schema(),
            TimeFormat::Millis,
            fx.index.clone(),
            fx.cache.clone(),
        )
        .unwrap();

        writer.write(&record("A", 34)).unwrap();
        writer.write(&record("B", 7)).unwrap();
        writer.save().unwrap();
        writer.release().unwrap();

        // records landed in shard 0 under the day view
        assert_eq!(fx.index.shards("20240101").unwrap(), vec![0]);

        fx.cache
            .view(0, |tx| {
                let mut ages = tx.cursor("age", "20240101").expect("age stream");
                let row = compare(&mut ages, Op::Eq, 34, 0, None)?;
                assert_eq!(row.columns(0), vec![1]);

                let mut scores = tx.cursor("score", "20240101").expect("score stream");
                let mut decoded = Vec::new();
                bsi::extract_validate(&mut scores, 0, None, &mut |column, raw| {
                    decoded.push((column, float_from_bits(raw)));
                    Ok(())
                })?;
                decoded.sort_by_key(|(column, _)| *column);
                assert_eq!(decoded, vec![(1, 17.0), (2, 3.5)]);

                // ids run through one store-wide sequence: name "A" = 1,
                // tags "x" = 2, tags "A" = 3, name "B" = 4, tags "B" = 5
                let mut names = tx.cursor("name", "20240101").expect("name stream");
                assert_eq!(mutex::value(&mut names, 1)?, Some(1));
                assert_eq!(mutex::value(&mut names, 2)?, Some(4));

                let mut tags = tx.cursor("tags", "20240101").expect("tags stream");
                assert_eq!(set::value(&mut tags, 1)?, vec![2, 3]);
                assert_eq!(set::value(&mut tags, 2)?, vec![2, 5]);

                let mut active = tx.cursor("active", "20240101").expect("active stream");
                assert_eq!(cur_row(&mut active, boolean::TRUE_ROW), vec![1, 2]);
                Ok(())
            })
            .unwrap();

        let tx = fx.index.translate().read();
        assert_eq!(tx.find("name", b"A").unwrap(), Some(1));
        assert_eq!(tx.find("tags", b"x").unwrap(), Some(2));
        assert_eq!(tx.find("name", b"B").unwrap(), Some(4));
        assert_eq!(tx.key("name", 4), Some(b"B".to_vec()));
    }

    #[test]
    fn first_key_written_gets_the_lower_id() {
        let fx = fixture();
        let schema = Schema::new("ts").add_string_field("name");
        let mut writer = SchemaWriter::new(
            schema,
            TimeFormat::Millis,
            fx.index.clone(),
            fx.cache.clone(),
        )
        .unwrap();

        let mut a = Record::new();
        a.set("ts", FieldValue::Timestamp(TS));
        a.set("name", FieldValue::String("A".to_string()));
        let mut b = Record::new();
        b.set("ts", FieldValue::Timestamp(TS));
        b.set("name", FieldValue::String("B".to_string()));

        writer.write(&a).unwrap();
        writer.write(&b).unwrap();
        writer.save().unwrap();

        let tx = fx.index.translate().read();
        assert_eq!(tx.find("name", b"A").unwrap(), Some(1));
        assert_eq!(tx.find("name", b"B").unwrap(), Some(2));
    }

    fn cur_row<C: RowCursor>(cur: &mut C, row_id: u64) -> Vec<u64> {
        cur.row(row_id).unwrap().columns(0)
    }

    #[test]
    fn missing_timestamp_is_a_hard_error() {
        let fx = fixture();
        let mut writer = SchemaWriter::new(
            schema(),
            TimeFormat::Millis,
            fx.index.clone(),
            fx.cache.clone(),
        )
        .unwrap();

        let mut record = Record::new();
        record.set("age", FieldValue::Int(1));
        let err = writer.write(&record).unwrap_err();
        assert!(err.context.contains("missing timestamp"));
    }

    #[test]
    fn mismatched_value_kind_is_a_schema_error() {
        let fx = fixture();
        let mut writer = SchemaWriter::new(
            schema(),
            TimeFormat::Millis,
            fx.index.clone(),
            fx.cache.clone(),
        )
        .unwrap();

        let mut record = Record::new();
        record.set("ts", FieldValue::Timestamp(TS));
        record.set("age", FieldValue::String("old".to_string()));
        assert!(writer.write(&record).is_err());
    }

    #[test]
    fn release_discards_ids_and_translations() {
        let fx = fixture();
        let mut writer = SchemaWriter::new(
            schema(),
            TimeFormat::Millis,
            fx.index.clone(),
            fx.cache.clone(),
        )
        .unwrap();

        writer.write(&record("dropped", 1)).unwrap();
        writer.release().unwrap();

        // nothing was flushed or committed
        assert_eq!(fx.index.shards("20240101").unwrap(), Vec::<u64>::new());
        assert_eq!(
            fx.index.translate().read().find("name", b"dropped").unwrap(),
            None
        );

        // the discarded column id is handed out again
        writer.write(&record("kept", 2)).unwrap();
        writer.save().unwrap();
        fx.cache
            .view(0, |tx| {
                let mut ages = tx.cursor("age", "20240101").expect("age stream");
                assert_eq!(compare(&mut ages, Op::Eq, 2, 0, None)?.columns(0), vec![1]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn standard_view_when_not_quantized() {
        let fx = fixture();
        let mut writer = SchemaWriter::new(
            schema().standard_views_only(),
            TimeFormat::Millis,
            fx.index.clone(),
            fx.cache.clone(),
        )
        .unwrap();

        writer.write(&record("A", 10)).unwrap();
        writer.save().unwrap();

        assert_eq!(fx.index.shards(STANDARD_VIEW).unwrap(), vec![0]);
        fx.cache
            .view(0, |tx| {
                assert!(tx.cursor("age", STANDARD_VIEW).is_some());
                assert!(tx.cursor("age", "20240101").is_none());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn nanosecond_timestamps_bucket_the_same_day() {
        let fx = fixture();
        let mut writer = SchemaWriter::new(
            schema(),
            TimeFormat::Nanos,
            fx.index.clone(),
            fx.cache.clone(),
        )
        .unwrap();

        let mut r = record("A", 10);
        r.set("ts", FieldValue::Timestamp(TS * 1_000_000));
        writer.write(&r).unwrap();
        writer.save().unwrap();

        assert_eq!(fx.index.shards("20240101").unwrap(), vec![0]);
    }
}
