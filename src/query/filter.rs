use crate::codec::boolean;
use crate::core::error::Result;
use crate::query::compare::{compare, Op};
use crate::row::cursor::RowCursor;
use crate::row::row::Row;
use crate::storage::shard_db::ReadTxn;

/// Predicate primitive handed to the plan layer: each codec's comparison is
/// wrapped as a filter so plans compose predicates without knowing the
/// encoding. A shard with no stream for the filter's field and view yields
/// an empty row, not an error.
pub trait Filter {
    fn apply(&self, tx: &ReadTxn<'_>, columns: Option<&Row>) -> Result<Row>;
}

fn narrowed(row: Row, columns: Option<&Row>) -> Row {
    match columns {
        Some(filter) => row.intersect(filter),
        None => row,
    }
}

/// Boolean field equality.
pub struct BoolEquals {
    pub field: String,
    pub view: String,
    pub value: bool,
}

impl Filter for BoolEquals {
    fn apply(&self, tx: &ReadTxn<'_>, columns: Option<&Row>) -> Result<Row> {
        let Some(mut cur) = tx.cursor(&self.field, &self.view) else {
            return Ok(Row::new());
        };
        let row = cur.row(if self.value {
            boolean::TRUE_ROW
        } else {
            boolean::FALSE_ROW
        })?;
        Ok(narrowed(row, columns))
    }
}

/// BSI comparison; `a` is the predicate, `b` the inclusive range end for
/// `Op::Range`.
pub struct BsiCompare {
    pub field: String,
    pub view: String,
    pub op: Op,
    pub a: i64,
    pub b: i64,
}

impl Filter for BsiCompare {
    fn apply(&self, tx: &ReadTxn<'_>, columns: Option<&Row>) -> Result<Row> {
        let Some(mut cur) = tx.cursor(&self.field, &self.view) else {
            return Ok(Row::new());
        };
        compare(&mut cur, self.op, self.a, self.b, columns)
    }
}

/// Mutex field equality against a translated or enumerated value index.
pub struct MutexEquals {
    pub field: String,
    pub view: String,
    pub row_id: u64,
}

impl Filter for MutexEquals {
    fn apply(&self, tx: &ReadTxn<'_>, columns: Option<&Row>) -> Result<Row> {
        let Some(mut cur) = tx.cursor(&self.field, &self.view) else {
            return Ok(Row::new());
        };
        Ok(narrowed(cur.row(self.row_id)?, columns))
    }
}

/// Set field membership for one value index.
pub struct SetContains {
    pub field: String,
    pub view: String,
    pub row_id: u64,
}

impl Filter for SetContains {
    fn apply(&self, tx: &ReadTxn<'_>, columns: Option<&Row>) -> Result<Row> {
        let Some(mut cur) = tx.cursor(&self.field, &self.view) else {
            return Ok(Row::new());
        };
        Ok(narrowed(cur.row(self.row_id)?, columns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roaring::RoaringTreemap;
    use std::sync::Arc;
    use tempfile::TempDir;
    use crate::cache::shard_cache::ShardCache;
    use crate::codec::{bsi, mutex, set};
    use crate::core::config::Config;
    use crate::storage::layout::StorageLayout;

    fn seeded_cache(dir: &TempDir) -> ShardCache {
        let layout = Arc::new(StorageLayout::new(dir.path().to_path_buf()).unwrap());
        let cache = ShardCache::new(layout, &Config::default());
        cache
            .update(0, |tx| {
                let mut flags = RoaringTreemap::new();
                crate::codec::boolean::add(&mut flags, 1, true);
                crate::codec::boolean::add(&mut flags, 2, false);
                tx.merge("active", "standard", &flags);

                let mut ages = RoaringTreemap::new();
                bsi::add(&mut ages, 1, 34);
                bsi::add(&mut ages, 2, 7);
                tx.merge("age", "standard", &ages);

                let mut cities = RoaringTreemap::new();
                mutex::add(&mut cities, 1, 3);
                mutex::add(&mut cities, 2, 4);
                tx.merge("city", "standard", &cities);

                let mut tags = RoaringTreemap::new();
                set::add(&mut tags, 1, &[2, 8]);
                set::add(&mut tags, 2, &[8]);
                tx.merge("tags", "standard", &tags);
                Ok(())
            })
            .unwrap();
        cache
    }

    #[test]
    fn filters_compose_over_one_transaction() {
        let dir = TempDir::new().unwrap();
        let cache = seeded_cache(&dir);

        cache
            .view(0, |tx| {
                let active = BoolEquals {
                    field: "active".to_string(),
                    view: "standard".to_string(),
                    value: true,
                };
                assert_eq!(active.apply(tx, None)?.columns(0), vec![1]);

                let adults = BsiCompare {
                    field: "age".to_string(),
                    view: "standard".to_string(),
                    op: Op::Ge,
                    a: 18,
                    b: 0,
                };
                assert_eq!(adults.apply(tx, None)?.columns(0), vec![1]);

                let in_city = MutexEquals {
                    field: "city".to_string(),
                    view: "standard".to_string(),
                    row_id: 4,
                };
                assert_eq!(in_city.apply(tx, None)?.columns(0), vec![2]);

                let tagged = SetContains {
                    field: "tags".to_string(),
                    view: "standard".to_string(),
                    row_id: 8,
                };
                assert_eq!(tagged.apply(tx, None)?.columns(0), vec![1, 2]);

                // plans narrow one filter's result with the previous one
                let narrowed = tagged.apply(tx, Some(&adults.apply(tx, None)?))?;
                assert_eq!(narrowed.columns(0), vec![1]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn missing_stream_is_an_empty_row() {
        let dir = TempDir::new().unwrap();
        let cache = seeded_cache(&dir);

        cache
            .view(0, |tx| {
                let filter = BsiCompare {
                    field: "age".to_string(),
                    view: "20240101".to_string(),
                    op: Op::Gt,
                    a: 0,
                    b: 0,
                };
                assert!(!filter.apply(tx, None)?.any());
                Ok(())
            })
            .unwrap();
    }
}
