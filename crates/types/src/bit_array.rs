//! Fixed-width bit array indexed by validator position.

use sbor::prelude::*;
use std::fmt;

/// One bit per validator slot. Used to advertise which votes we hold.
#[derive(Clone, PartialEq, Eq, Hash, Default, BasicSbor)]
pub struct BitArray {
    bits: u64,
    words: Vec<u64>,
}

impl BitArray {
    /// Create an all-zero array of `bits` slots.
    pub fn new(bits: usize) -> Self {
        Self {
            bits: bits as u64,
            words: vec![0; bits.div_ceil(64)],
        }
    }

    pub fn len(&self) -> usize {
        self.bits as usize
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Read a bit. Out-of-range reads are false.
    pub fn get(&self, index: usize) -> bool {
        if index >= self.len() {
            return false;
        }
        self.words[index / 64] & (1 << (index % 64)) != 0
    }

    /// Set a bit. Returns false if `index` is out of range.
    pub fn set(&mut self, index: usize, value: bool) -> bool {
        if index >= self.len() {
            return false;
        }
        let mask = 1u64 << (index % 64);
        if value {
            self.words[index / 64] |= mask;
        } else {
            self.words[index / 64] &= !mask;
        }
        true
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Indices of set bits in ascending order.
    pub fn set_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len()).filter(move |i| self.get(*i))
    }

    pub fn is_full(&self) -> bool {
        self.count_ones() == self.len()
    }
}

impl fmt::Debug for BitArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s: String = (0..self.len())
            .map(|i| if self.get(i) { 'x' } else { '_' })
            .collect();
        write!(f, "BA{{{}:{}}}", self.len(), s)
    }
}
