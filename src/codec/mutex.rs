use roaring::RoaringTreemap;
use crate::core::error::Result;
use crate::core::types::{fragment_of, SHARD_WIDTH};
use crate::row::cursor::RowCursor;
use crate::row::row::Row;

/// Set the bit for `id` on the row of its single value index. One row per
/// distinct value; the writer assigns each column exactly once per batch, so
/// the one-hot invariant is preserved by construction.
pub fn add(bits: &mut RoaringTreemap, id: u64, value: u64) {
    bits.insert(value * SHARD_WIDTH + fragment_of(id));
}

/// Enumerate `(column, value index)` pairs across all non-empty rows,
/// optionally narrowed to `columns`.
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

/// Point lookup of one column's value index.
pub fn value<C: RowCursor>(cur: &mut C, id: u64) -> Result<Option<u64>> {
    let fragment = fragment_of(id);
    let mut found = None;
    cur.rows(0, &mut |row_id, row| {
        if found.is_none() && row.contains(fragment) {
            found = Some(row_id);
        }
        Ok(())
    })?;
    Ok(found)
}
