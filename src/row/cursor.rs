use roaring::RoaringTreemap;
use crate::core::error::Result;
use crate::core::types::SHARD_WIDTH;
use crate::row::row::Row;

/// Narrow read interface over one (field, view) bitmap stream. The codecs and
/// the range engine depend only on this seam, not on how streams are stored.
pub trait RowCursor {
    /// Decode one logical row into its fragment columns.
    fn row(&mut self, row_id: u64) -> Result<Row>;

    /// Highest set bit position in the stream, if the stream has any bits.
    fn max(&mut self) -> Result<Option<u64>>;

    /// Visit every non-empty row with id at or above `start`, ascending.
    fn rows(&mut self, start: u64, f: &mut dyn FnMut(u64, Row) -> Result<()>) -> Result<()>;
}

/// Decode one row out of a raw stream bitmap.
pub fn row_bits(bits: &RoaringTreemap, row_id: u64) -> Row {
    let lo = row_id * SHARD_WIDTH;
    let mut mask = RoaringTreemap::new();
    mask.insert_range(lo..lo + SHARD_WIDTH);
    mask &= bits;
    let mut row = Row::new();
    for position in mask.iter() {
        row.set(position - lo);
    }
    row
}

/// Walk a raw stream bitmap grouping set bits into rows.
pub fn stream_rows(
    bits: &RoaringTreemap,
    start: u64,
    f: &mut dyn FnMut(u64, Row) -> Result<()>,
) -> Result<()> {
    let mut current: Option<(u64, Row)> = None;
    for position in bits.iter() {
        let row_id = position / SHARD_WIDTH;
        if row_id < start {
            continue;
        }
        match current.as_mut() {
            Some((id, row)) if *id == row_id => row.set(position % SHARD_WIDTH),
            _ => {
                if let Some((id, row)) = current.take() {
                    f(id, row)?;
                }
                let mut row = Row::new();
                row.set(position % SHARD_WIDTH);
                current = Some((row_id, row));
            }
        }
    }
    if let Some((id, row)) = current {
        f(id, row)?;
    }
    Ok(())
}

/// In-memory accumulators double as cursors so freshly encoded bitmaps can be
/// read back without a round trip through storage.
impl RowCursor for RoaringTreemap {
    fn row(&mut self, row_id: u64) -> Result<Row> {
        Ok(row_bits(self, row_id))
    }

    fn max(&mut self) -> Result<Option<u64>> {
        Ok(RoaringTreemap::max(self))
    }

    fn rows(&mut self, start: u64, f: &mut dyn FnMut(u64, Row) -> Result<()>) -> Result<()> {
        stream_rows(self, start, f)
    }
}
