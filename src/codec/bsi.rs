use std::collections::HashMap;
use roaring::RoaringTreemap;
use crate::core::error::Result;
use crate::core::types::{fragment_of, SHARD_WIDTH};
use crate::row::cursor::RowCursor;
use crate::row::row::Row;

/// Row marking which columns hold any value at all. Distinguishes a stored
/// zero from an absent value.
pub const EXISTS_ROW: u64 = 0;
/// Row holding the sign flag; set means negative.
pub const SIGN_ROW: u64 = 1;
/// First magnitude row. Bit `i` of a value's magnitude lives at row
/// `OFFSET_ROW + i`, least-significant bit first.
pub const OFFSET_ROW: u64 = 2;

/// Encode `value` for column `id`: the exists bit, the sign flag for
/// negatives, then one bit per set magnitude bit. The loop bound comes from
/// the magnitude's highest set bit, so zero stores only the exists bit.
pub fn add(bits: &mut RoaringTreemap, id: u64, value: i64) {
    let fragment = fragment_of(id);
    bits.insert(EXISTS_ROW * SHARD_WIDTH + fragment);
    if value < 0 {
        bits.insert(SIGN_ROW * SHARD_WIDTH + fragment);
    }
    let magnitude = value.unsigned_abs();
    let depth = 64 - magnitude.leading_zeros() as u64;
    for i in 0..depth {
        if magnitude & (1 << i) != 0 {
            bits.insert((OFFSET_ROW + i) * SHARD_WIDTH + fragment);
        }
    }
}

/// Number of magnitude rows present in the stream, derived from the highest
/// stored bit.
pub fn bit_depth<C: RowCursor>(cur: &mut C) -> Result<u64> {
    let max_row = cur.max()?.unwrap_or(0) / SHARD_WIDTH;
    Ok(if max_row >= OFFSET_ROW {
        max_row - OFFSET_ROW + 1
    } else {
        0
    })
}

/// Decode the value of every column in `exists`, invoking `f(column, value)`.
/// `exists` is caller-supplied so a pre-filtered existence set can be reused
/// across fields.
pub fn extract<C: RowCursor>(
    cur: &mut C,
    shard: u64,
    exists: &Row,
    f: &mut dyn FnMut(u64, i64) -> Result<()>,
) -> Result<()> {
    let depth = bit_depth(cur)?;
    let mut magnitudes: HashMap<u64, u64> = HashMap::new();
    for i in 0..depth {
        let plane = cur.row(OFFSET_ROW + i)?.intersect(exists);
        for fragment in plane.fragments() {
            *magnitudes.entry(fragment).or_insert(0) |= 1 << i;
        }
    }
    let sign = cur.row(SIGN_ROW)?.intersect(exists);
    for fragment in exists.fragments() {
        let magnitude = magnitudes.get(&fragment).copied().unwrap_or(0);
        let value = if sign.contains(fragment) {
            // magnitude 2^63 folds back to i64::MIN
            (magnitude as i64).wrapping_neg()
        } else {
            magnitude as i64
        };
        f(shard * SHARD_WIDTH + fragment, value)?;
    }
    Ok(())
}

/// Like `extract`, but confirms the stream has existence bits inside the
/// requested columns before the per-row scan, so shards with no relevant
/// data are skipped cheaply.
pub fn extract_validate<C: RowCursor>(
    cur: &mut C,
    shard: u64,
    columns: Option<&Row>,
    f: &mut dyn FnMut(u64, i64) -> Result<()>,
) -> Result<()> {
    let exists = cur.row(EXISTS_ROW)?;
    let exists = match columns {
        Some(filter) => exists.intersect(filter),
        None => exists,
    };
    if !exists.any() {
        return Ok(());
    }
    extract(cur, shard, &exists, f)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bits: &mut RoaringTreemap, shard: u64) -> Vec<(u64, i64)> {
        let mut out = Vec::new();
        extract_validate(bits, shard, None, &mut |column, value| {
            out.push((column, value));
            Ok(())
        })
        .unwrap();
        out.sort();
        out
    }

    #[test]
    fn round_trip() {
        let mut bits = RoaringTreemap::new();
        add(&mut bits, 1, 0);
        add(&mut bits, 2, 1);
        add(&mut bits, 3, 42);
        add(&mut bits, 4, -42);
        add(&mut bits, 5, i64::MAX);
        add(&mut bits, 6, i64::MIN);

        assert_eq!(
            decode_all(&mut bits, 0),
            vec![(1, 0), (2, 1), (3, 42), (4, -42), (5, i64::MAX), (6, i64::MIN)]
        );
    }

    #[test]
    fn negative_seven_layout() {
        let mut bits = RoaringTreemap::new();
        add(&mut bits, 5, -7);

        assert!(bits.contains(EXISTS_ROW * SHARD_WIDTH + 5));
        assert!(bits.contains(SIGN_ROW * SHARD_WIDTH + 5));
        // magnitude 0b111 occupies the three lowest magnitude rows
        assert!(bits.contains(2 * SHARD_WIDTH + 5));
        assert!(bits.contains(3 * SHARD_WIDTH + 5));
        assert!(bits.contains(4 * SHARD_WIDTH + 5));
        assert!(!bits.contains(5 * SHARD_WIDTH + 5));

        assert_eq!(decode_all(&mut bits, 0), vec![(5, -7)]);
    }

    #[test]
    fn zero_keeps_only_exists() {
        let mut bits = RoaringTreemap::new();
        add(&mut bits, 9, 0);
        assert_eq!(bits.len(), 1);
        assert!(bits.contains(EXISTS_ROW * SHARD_WIDTH + 9));
        assert_eq!(decode_all(&mut bits, 0), vec![(9, 0)]);
    }

    #[test]
    fn validate_skips_unmatched_columns() {
        let mut bits = RoaringTreemap::new();
        add(&mut bits, 3, 12);

        let filter: Row = [4].into_iter().collect();
        let mut calls = 0;
        extract_validate(&mut bits, 0, Some(&filter), &mut |_, _| {
            calls += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(calls, 0);
    }

    #[test]
    fn shard_relative_columns() {
        let mut bits = RoaringTreemap::new();
        add(&mut bits, 2 * SHARD_WIDTH + 8, 5);
        assert_eq!(decode_all(&mut bits, 2), vec![(2 * SHARD_WIDTH + 8, 5)]);
    }
}
