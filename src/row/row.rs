use roaring::RoaringBitmap;
use crate::core::types::SHARD_WIDTH;

/// One decoded bit plane: the set of fragment columns whose bit is set for a
/// single logical row of a field's bitmap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    pub bits: RoaringBitmap,
}

impl Row {
    pub fn new() -> Self {
        Row {
            bits: RoaringBitmap::new(),
        }
    }

    pub fn from_bits(bits: RoaringBitmap) -> Self {
        Row { bits }
    }

    /// Set one fragment column. Positions at or above `SHARD_WIDTH` belong to
    /// a different row and are rejected by debug builds.
    pub fn set(&mut self, fragment: u64) {
        debug_assert!(fragment < SHARD_WIDTH);
        self.bits.insert(fragment as u32);
    }

    pub fn contains(&self, fragment: u64) -> bool {
        fragment < SHARD_WIDTH && self.bits.contains(fragment as u32)
    }

    pub fn union(&self, other: &Row) -> Row {
        Row {
            bits: &self.bits | &other.bits,
        }
    }

    pub fn intersect(&self, other: &Row) -> Row {
        Row {
            bits: &self.bits & &other.bits,
        }
    }

    pub fn difference(&self, other: &Row) -> Row {
        Row {
            bits: &self.bits - &other.bits,
        }
    }

    /// True if any column is set.
    pub fn any(&self) -> bool {
        !self.bits.is_empty()
    }

    pub fn count(&self) -> u64 {
        self.bits.len()
    }

    pub fn fragments(&self) -> impl Iterator<Item = u64> + '_ {
        self.bits.iter().map(|f| f as u64)
    }

    /// Materialize global column IDs for the given shard.
    pub fn columns(&self, shard: u64) -> Vec<u64> {
        self.bits
            .iter()
            .map(|f| shard * SHARD_WIDTH + f as u64)
            .collect()
    }
}

impl FromIterator<u64> for Row {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        let mut row = Row::new();
        for fragment in iter {
            row.set(fragment);
        }
        row
    }
}
