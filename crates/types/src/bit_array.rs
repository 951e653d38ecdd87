//! Fixed-size bit array.
//!
//! Tracks which validator indices have voted or which parts of a block
//! have arrived. Out-of-range indices are ignored rather than rejected so
//! that a peer advertising a differently-sized array cannot force an
//! error path.

use rand::Rng;

/// A fixed-size set of indices backed by packed 64-bit words.
#[derive(Clone, PartialEq, Eq)]
pub struct BitArray {
    bits: usize,
    words: Vec<u64>,
}

impl BitArray {
    /// A new array of `bits` entries, all unset.
    pub fn new(bits: usize) -> Self {
        Self {
            bits,
            words: vec![0; bits.div_ceil(64)],
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.bits
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Value at `index`, `false` when out of range.
    pub fn get(&self, index: usize) -> bool {
        if index >= self.bits {
            return false;
        }
        self.words[index / 64] >> (index % 64) & 1 == 1
    }

    /// Set `index` to `value`; out-of-range indices are a no-op.
    pub fn set(&mut self, index: usize, value: bool) {
        if index >= self.bits {
            return;
        }
        let mask = 1u64 << (index % 64);
        if value {
            self.words[index / 64] |= mask;
        } else {
            self.words[index / 64] &= !mask;
        }
    }

    /// Number of set entries.
    pub fn count_set(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// In-place union with `other`, truncated to this array's width.
    pub fn or_with(&mut self, other: &BitArray) {
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w |= o;
        }
        self.clear_tail();
    }

    /// In-place intersection with `other`.
    pub fn and_with(&mut self, other: &BitArray) {
        for (i, w) in self.words.iter_mut().enumerate() {
            *w &= other.words.get(i).copied().unwrap_or(0);
        }
    }

    /// In-place difference: unset every entry that is set in `other`.
    pub fn sub(&mut self, other: &BitArray) {
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w &= !o;
        }
    }

    /// A uniformly random set index, or `None` when no entry is set.
    pub fn pick_random_set(&self, rng: &mut impl Rng) -> Option<usize> {
        let total = self.count_set();
        if total == 0 {
            return None;
        }
        let mut nth = rng.gen_range(0..total);
        for index in 0..self.bits {
            if self.get(index) {
                if nth == 0 {
                    return Some(index);
                }
                nth -= 1;
            }
        }
        None
    }

    /// Iterator over the set indices in ascending order.
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.bits).filter(|&i| self.get(i))
    }

    /// Bits past `self.bits` in the last word must stay zero so that
    /// `count_set` stays truthful after `or_with` against a wider array.
    fn clear_tail(&mut self) {
        let tail = self.bits % 64;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
    }
}

impl std::fmt::Debug for BitArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bits: String = (0..self.bits.min(64))
            .map(|i| if self.get(i) { 'x' } else { '_' })
            .collect();
        write!(f, "BitArray({}/{}:{})", self.count_set(), self.bits, bits)
    }
}
