use std::cmp::Ordering;

/// Orders keys in the tree. A custom comparator disables prefix
/// compression, since stored key suffixes only keep their order under
/// plain byte-wise comparison.
pub trait KeyComparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Compares little-endian u32 keys by value.
pub struct IntegerComparator;

impl KeyComparator for IntegerComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        if a.len() < 4 || b.len() < 4 {
            return a.len().cmp(&b.len());
        }

        let a_val = u32::from_le_bytes([a[0], a[1], a[2], a[3]]);
        let b_val = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);

        a_val.cmp(&b_val)
    }
}

/// Lexicographic order; a shorter key sorts before any longer key it
/// prefixes.
pub struct BytewiseComparator;

impl KeyComparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Lexicographic order on the reversed byte strings: keys are compared
/// from their last byte backwards.
pub struct ReverseBytewiseComparator;

impl KeyComparator for ReverseBytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.iter().rev().cmp(b.iter().rev())
    }
}
