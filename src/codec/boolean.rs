use roaring::RoaringTreemap;
use crate::core::error::Result;
use crate::core::types::{fragment_of, SHARD_WIDTH};
use crate::row::cursor::RowCursor;
use crate::row::row::Row;

/// Row holding the `false` bits.
pub const FALSE_ROW: u64 = 0;
/// Row holding the `true` bits.
pub const TRUE_ROW: u64 = 1;

/// Set the bit for `id` on the matching row. The opposite row's bit is
/// cleared so re-adding a column inside one batch is last-write-wins and the
/// one-of-two-rows invariant holds.
pub fn add(bits: &mut RoaringTreemap, id: u64, value: bool) {
    let fragment = fragment_of(id);
    let (set_row, clear_row) = if value {
        (TRUE_ROW, FALSE_ROW)
    } else {
        (FALSE_ROW, TRUE_ROW)
    };
    bits.insert(set_row * SHARD_WIDTH + fragment);
    bits.remove(clear_row * SHARD_WIDTH + fragment);
}

/// Decode the columns holding `value`, optionally narrowed to `columns`, and
/// hand each to `f`.
pub fn extract<C: RowCursor>(
    cur: &mut C,
    shard: u64,
    value: bool,
    columns: Option<&Row>,
    f: &mut dyn FnMut(u64, bool) -> Result<()>,
) -> Result<()> {
    let row = cur.row(if value { TRUE_ROW } else { FALSE_ROW })?;
    let row = match columns {
        Some(filter) => row.intersect(filter),
        None => row,
    };
    for column in row.columns(shard) {
        f(column, value)?;
    }
    Ok(())
}
