use roaring::RoaringTreemap;
use crate::core::error::Result;
use crate::core::types::{fragment_of, SHARD_WIDTH};
use crate::row::cursor::RowCursor;
use crate::row::row::Row;

/// Set one bit per value in the list, same row addressing as the mutex codec
/// but without the one-hot constraint.
pub fn add(bits: &mut RoaringTreemap, id: u64, values: &[u64]) {
    let fragment = fragment_of(id);
    for value in values {
        bits.insert(value * SHARD_WIDTH + fragment);
    }
}

/// Enumerate `(column, value index)` pairs across all non-empty rows,
/// optionally narrowed to `columns`. Columns holding several values are
/// reported once per value.
pub fn extract<C: RowCursor>(
    cur: &mut C,
    shard: u64,
    columns: Option<&Row>,
    f: &mut dyn FnMut(u64, u64) -> Result<()>,
) -> Result<()> {
    cur.rows(0, &mut |row_id, row| {
        let row = match columns {
            Some(filter) => row.intersect(filter),
            None => row,
        };
        for column in row.columns(shard) {
            f(column, row_id)?;
        }
        Ok(())
    })
}

/// All value indexes set for one column.
pub fn value<C: RowCursor>(cur: &mut C, id: u64) -> Result<Vec<u64>> {
    let fragment = fragment_of(id);
    let mut out = Vec::new();
    cur.rows(0, &mut |row_id, row| {
        if row.contains(fragment) {
            out.push(row_id);
        }
        Ok(())
    })?;
    Ok(out)
}
