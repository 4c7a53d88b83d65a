use crate::codec::bsi::{self, EXISTS_ROW, OFFSET_ROW, SIGN_ROW};
use crate::core::error::Result;
use crate::row::cursor::RowCursor;
use crate::row::row::Row;

/// Comparison operators understood by the bit-plane sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Lt,
    Le,
    Eq,
    Neq,
    Ge,
    Gt,
    Range,
}

impl Op {
    /// Resolve a planner-supplied operator name. Unknown spellings yield
    /// `None`, which `compare_named` turns into an empty match rather than an
    /// error.
    pub fn parse(name: &str) -> Option<Op> {
        match name {
            "<" | "lt" => Some(Op::Lt),
            "<=" | "le" => Some(Op::Le),
            "==" | "eq" => Some(Op::Eq),
            "!=" | "neq" => Some(Op::Neq),
            ">=" | "ge" => Some(Op::Ge),
            ">" | "gt" => Some(Op::Gt),
            "between" | "range" => Some(Op::Range),
            _ => None,
        }
    }
}

/// Evaluate `op` against a BSI stream without decoding values. `a` is the
/// predicate (the range start for `Op::Range`), `b` the inclusive range end.
/// The result is intersected with `columns` when given.
pub fn compare<C: RowCursor>(
    cur: &mut C,
    op: Op,
    a: i64,
    b: i64,
    columns: Option<&Row>,
) -> Result<Row> {
    let depth = bsi::bit_depth(cur)?;
    let row = match op {
        Op::Lt => range_lt(cur, depth, a, false)?,
        Op::Le => range_lt(cur, depth, a, true)?,
        Op::Eq => range_eq(cur, depth, a)?,
        Op::Neq => range_neq(cur, depth, a)?,
        Op::Ge => range_gt(cur, depth, a, true)?,
        Op::Gt => range_gt(cur, depth, a, false)?,
        Op::Range => range_between(cur, depth, a, b)?,
    };
    Ok(match columns {
        Some(filter) => row.intersect(filter),
        None => row,
    })
}

/// `compare` with the operator resolved by name; unrecognized operators match
/// nothing.
pub fn compare_named<C: RowCursor>(
    cur: &mut C,
    op: &str,
    a: i64,
    b: i64,
    columns: Option<&Row>,
) -> Result<Row> {
    match Op::parse(op) {
        Some(op) => compare(cur, op, a, b, columns),
        None => Ok(Row::new()),
    }
}

fn bit_len(value: u64) -> u64 {
    64 - value.leading_zeros() as u64
}

/// Largest magnitude representable in `depth` bit planes.
fn ones_mask(depth: u64) -> u64 {
    if depth >= 64 {
        u64::MAX
    } else {
        (1 << depth) - 1
    }
}

/// Columns whose value equals `predicate`: walk every magnitude plane,
/// intersecting where the predicate bit is one and subtracting where it is
/// zero.
fn range_eq<C: RowCursor>(cur: &mut C, depth: u64, predicate: i64) -> Result<Row> {
    let magnitude = predicate.unsigned_abs();
    // A predicate wider than the stored planes can never match.
    if bit_len(magnitude) > depth {
        return Ok(Row::new());
    }
    let exists = cur.row(EXISTS_ROW)?;
    let sign = cur.row(SIGN_ROW)?;
    let mut matched = if predicate < 0 {
        exists.intersect(&sign)
    } else {
        exists.difference(&sign)
    };
    for i in (0..depth).rev() {
        let plane = cur.row(OFFSET_ROW + i)?;
        if magnitude >> i & 1 == 1 {
            matched = matched.intersect(&plane);
        } else {
            matched = matched.difference(&plane);
        }
    }
    Ok(matched)
}

/// Everything that exists minus the equality match.
fn range_neq<C: RowCursor>(cur: &mut C, depth: u64, predicate: i64) -> Result<Row> {
    let exists = cur.row(EXISTS_ROW)?;
    let eq = range_eq(cur, depth, predicate)?;
    Ok(exists.difference(&eq))
}

/// Columns whose value is below `predicate`. The sign plane splits the
/// candidates: negatives compare by descending magnitude, positives by the
/// unsigned sweep.
fn range_lt<C: RowCursor>(
    cur: &mut C,
    depth: u64,
    predicate: i64,
    allow_equality: bool,
) -> Result<Row> {
    let exists = cur.row(EXISTS_ROW)?;
    let sign = cur.row(SIGN_ROW)?;
    let magnitude = predicate.unsigned_abs();
    match (predicate, allow_equality) {
        (0, false) => Ok(exists.intersect(&sign)),
        (0, true) => {
            let zero = range_eq(cur, depth, 0)?;
            Ok(zero.union(&exists.intersect(&sign)))
        }
        _ if predicate < 0 => {
            // only negatives with magnitude beyond the predicate's qualify
            range_gt_unsigned(cur, depth, &exists.intersect(&sign), magnitude, allow_equality)
        }
        _ => {
            // every negative, plus positives below the predicate
            let positives = range_lt_unsigned(
                cur,
                depth,
                &exists.difference(&sign),
                magnitude,
                allow_equality,
            )?;
            Ok(positives.union(&exists.intersect(&sign)))
        }
    }
}

/// Mirror image of `range_lt`.
fn range_gt<C: RowCursor>(
    cur: &mut C,
    depth: u64,
    predicate: i64,
    allow_equality: bool,
) -> Result<Row> {
    let exists = cur.row(EXISTS_ROW)?;
    let sign = cur.row(SIGN_ROW)?;
    let magnitude = predicate.unsigned_abs();
    match (predicate, allow_equality) {
        (0, false) => range_gt_unsigned(cur, depth, &exists.difference(&sign), 0, false),
        (0, true) => Ok(exists.difference(&sign)),
        _ if predicate >= 0 => {
            range_gt_unsigned(cur, depth, &exists.difference(&sign), magnitude, allow_equality)
        }
        _ => {
            // every positive (zero included), plus negatives with magnitude
            // below the predicate's
            let negatives = range_lt_unsigned(
                cur,
                depth,
                &exists.intersect(&sign),
                magnitude,
                allow_equality,
            )?;
            Ok(negatives.union(&exists.difference(&sign)))
        }
    }
}

/// Columns whose value lies in `[min, max]`, both ends inclusive.
fn range_between<C: RowCursor>(cur: &mut C, depth: u64, min: i64, max: i64) -> Result<Row> {
    if min > max {
        return Ok(Row::new());
    }
    if min == max {
        return range_eq(cur, depth, min);
    }
    let exists = cur.row(EXISTS_ROW)?;
    let sign = cur.row(SIGN_ROW)?;
    if min >= 0 {
        range_between_unsigned(
            cur,
            depth,
            &exists.difference(&sign),
            min.unsigned_abs(),
            max.unsigned_abs(),
        )
    } else if max < 0 {
        // both bounds negative: magnitudes compare in reverse order
        range_between_unsigned(
            cur,
            depth,
            &exists.intersect(&sign),
            max.unsigned_abs(),
            min.unsigned_abs(),
        )
    } else {
        // the range straddles zero
        let negatives = range_lt_unsigned(
            cur,
            depth,
            &exists.intersect(&sign),
            min.unsigned_abs(),
            true,
        )?;
        let positives = range_lt_unsigned(
            cur,
            depth,
            &exists.difference(&sign),
            max.unsigned_abs(),
            true,
        )?;
        Ok(negatives.union(&positives))
    }
}

/// Inclusive unsigned between: filter candidates through the high bits where
/// `min` and `max` agree, then bound the differing low bits from both sides.
fn range_between_unsigned<C: RowCursor>(
    cur: &mut C,
    depth: u64,
    filter: &Row,
    min: u64,
    max: u64,
) -> Result<Row> {
    if max >= ones_mask(depth) {
        // the upper bound cannot be violated
        return range_gt_unsigned(cur, depth, filter, min, true);
    }
    if min == 0 {
        return range_lt_unsigned(cur, depth, filter, max, true);
    }
    let diff_len = bit_len(min ^ max);
    let mut filtered = filter.clone();
    for i in (diff_len..depth).rev() {
        let plane = cur.row(OFFSET_ROW + i)?;
        if min >> i & 1 == 1 {
            filtered = filtered.intersect(&plane);
        } else {
            filtered = filtered.difference(&plane);
        }
    }
    let low_mask = ones_mask(diff_len);
    let lower_bounded = range_gt_unsigned(cur, diff_len, &filtered, min & low_mask, true)?;
    range_lt_unsigned(cur, diff_len, &lower_bounded, max & low_mask, true)
}

/// Candidates strictly below `predicate`, walking planes MSB to LSB.
/// `allow_equality` first widens the predicate, so `<= v` runs as `< v+1`.
fn range_lt_unsigned<C: RowCursor>(
    cur: &mut C,
    depth: u64,
    filter: &Row,
    mut predicate: u64,
    allow_equality: bool,
) -> Result<Row> {
    if allow_equality {
        if predicate >= ones_mask(depth) {
            // every representable value qualifies
            return Ok(filter.clone());
        }
        predicate += 1;
    } else {
        if predicate == 0 {
            return Ok(Row::new());
        }
        if predicate > ones_mask(depth) {
            return Ok(filter.clone());
        }
    }
    let mut matched = Row::new();
    let mut remaining = filter.clone();
    for i in (0..depth).rev() {
        if !remaining.any() {
            break;
        }
        let plane = cur.row(OFFSET_ROW + i)?;
        let zeroes = remaining.difference(&plane);
        if predicate >> i & 1 == 1 {
            // a zero bit where the predicate has one is definitively less
            matched = matched.union(&zeroes);
            remaining = remaining.intersect(&plane);
        } else {
            // a one bit where the predicate has zero can no longer stay equal
            remaining = zeroes;
        }
    }
    // whatever is left equals the predicate exactly, which strict comparison
    // excludes
    Ok(matched)
}

/// Candidates strictly above `predicate`. `allow_equality` first narrows the
/// predicate, so `>= v` runs as `> v-1`.
fn range_gt_unsigned<C: RowCursor>(
    cur: &mut C,
    depth: u64,
    filter: &Row,
    mut predicate: u64,
    allow_equality: bool,
) -> Result<Row> {
    if allow_equality {
        if predicate == 0 {
            return Ok(filter.clone());
        }
        if predicate > ones_mask(depth) {
            return Ok(Row::new());
        }
        predicate -= 1;
    } else if predicate >= ones_mask(depth) {
        return Ok(Row::new());
    }
    let mut matched = Row::new();
    let mut remaining = filter.clone();
    for i in (0..depth).rev() {
        if !remaining.any() {
            break;
        }
        let plane = cur.row(OFFSET_ROW + i)?;
        let ones = remaining.intersect(&plane);
        if predicate >> i & 1 == 1 {
            // a zero bit where the predicate has one can no longer catch up
            remaining = ones;
        } else {
            // a one bit where the predicate has zero is definitively greater
            matched = matched.union(&ones);
            remaining = remaining.difference(&plane);
        }
    }
    Ok(matched)
}
