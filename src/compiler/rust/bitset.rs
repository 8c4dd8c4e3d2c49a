// Copyright © 2022 Collabora, Ltd.
// SPDX-License-Identifier: MIT

//! Bit sets
//!
//! [`BitSet`] is a growable set of `usize`, stored one bit per potential
//! member.  [`RegMask`] is a fixed-width set of machine registers, one bit per
//! register in the 64-entry register file, with range construction checked
//! against the width of the file.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use thiserror::Error;

/// A growable set of `usize`, implemented as an array of bits
#[derive(Clone, Default)]
pub struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    pub fn new() -> BitSet {
        BitSet { words: Vec::new() }
    }

    fn reserve_words(&mut self, words: usize) {
        if self.words.len() < words {
            self.words.resize(words, 0);
        }
    }

    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn contains(&self, idx: usize) -> bool {
        match self.words.get(idx / 64) {
            Some(w) => w & (1_u64 << (idx % 64)) != 0,
            None => false,
        }
    }

    /// Inserts `idx`, returning true if it was not already present.
    pub fn insert(&mut self, idx: usize) -> bool {
        let w = idx / 64;
        let bit = 1_u64 << (idx % 64);
        self.reserve_words(w + 1);
        let exists = self.words[w] & bit != 0;
        self.words[w] |= bit;
        !exists
    }

    /// Removes `idx`, returning true if it was present.
    pub fn remove(&mut self, idx: usize) -> bool {
        let w = idx / 64;
        let bit = 1_u64 << (idx % 64);
        let Some(word) = self.words.get_mut(w) else {
            return false;
        };
        let exists = *word & bit != 0;
        *word &= !bit;
        exists
    }

    /// Adds every member of `other` to self.
    ///
    /// Returns true if the value of self changes.
    pub fn union_with(&mut self, other: &BitSet) -> bool {
        self.reserve_words(other.words.len());
        let mut added_bits = false;
        for (w, o) in self.words.iter_mut().zip(other.words.iter()) {
            let uw = *w | *o;
            if uw != *w {
                added_bits = true;
                *w = uw;
            }
        }
        added_bits
    }

    pub fn iter(&self) -> impl '_ + Iterator<Item = usize> {
        self.words.iter().enumerate().flat_map(|(w, word)| {
            WordBits(*word).map(move |b| w * 64 + b)
        })
    }
}

impl FromIterator<usize> for BitSet {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = usize>,
    {
        let mut res = BitSet::new();
        for i in iter {
            res.insert(i);
        }
        res
    }
}

impl fmt::Debug for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Iterates the indices of the set bits of a single word, lowest first
struct WordBits(u64);

impl Iterator for WordBits {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.0 == 0 {
            return None;
        }
        let b = self.0.trailing_zeros();
        self.0 &= self.0 - 1;
        Some(b as usize)
    }
}

/// Number of registers tracked by a [`RegMask`]
pub const NUM_REGS: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum RegMaskError {
    #[error("register range {start}..{end} does not fit in the register file")]
    OutOfRange { start: usize, end: usize },
}

/// A set of machine registers, one bit per register
///
/// All constructors which take a register range check it against
/// [`NUM_REGS`] and fail instead of shifting out of range.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RegMask(u64);

impl RegMask {
    pub const EMPTY: RegMask = RegMask(0);

    pub const fn from_bits(bits: u64) -> RegMask {
        RegMask(bits)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// Returns the mask of `count` contiguous registers starting at `start`.
    pub fn from_range(
        start: usize,
        count: usize,
    ) -> Result<RegMask, RegMaskError> {
        let mut mask = RegMask::EMPTY;
        mask.set_range(start, count)?;
        Ok(mask)
    }

    /// Adds `count` contiguous registers starting at `start`.
    ///
    /// On error, self is left unchanged.
    pub fn set_range(
        &mut self,
        start: usize,
        count: usize,
    ) -> Result<(), RegMaskError> {
        let end = start.saturating_add(count);
        if end > NUM_REGS {
            return Err(RegMaskError::OutOfRange { start, end });
        }
        if count == 0 {
            return Ok(());
        }

        // 0 < count <= 64 and start < 64 at this point
        let bits = u64::MAX >> (NUM_REGS - count);
        self.0 |= bits << start;
        Ok(())
    }

    pub fn contains(&self, reg: usize) -> bool {
        reg < NUM_REGS && self.0 & (1_u64 << reg) != 0
    }

    pub fn union(self, other: RegMask) -> RegMask {
        RegMask(self.0 | other.0)
    }

    /// Adds every register of `other` to self.
    ///
    /// Returns true if the value of self changes.
    pub fn union_with(&mut self, other: RegMask) -> bool {
        let old = self.0;
        self.0 |= other.0;
        self.0 != old
    }

    pub fn intersects(&self, other: RegMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_subset_of(&self, other: RegMask) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> {
        WordBits(self.0)
    }
}

impl BitOr for RegMask {
    type Output = RegMask;

    fn bitor(self, rhs: RegMask) -> RegMask {
        self.union(rhs)
    }
}

impl BitOrAssign for RegMask {
    fn bitor_assign(&mut self, rhs: RegMask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for RegMask {
    type Output = RegMask;

    fn bitand(self, rhs: RegMask) -> RegMask {
        RegMask(self.0 & rhs.0)
    }
}

impl fmt::Debug for RegMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for RegMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, reg) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "r{reg}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_vec(set: &BitSet) -> Vec<usize> {
        set.iter().collect()
    }

    #[test]
    fn test_basic() {
        let mut set = BitSet::new();

        assert_eq!(to_vec(&set), &[]);
        assert!(set.is_empty());

        assert!(set.insert(0));
        assert!(!set.insert(0));
        set.insert(73);
        set.insert(1);

        assert_eq!(to_vec(&set), &[0, 1, 73]);
        assert!(set.contains(73));
        assert!(!set.contains(197));

        assert!(set.remove(1));
        assert!(!set.remove(7));
        assert!(!set.remove(4096));
        assert_eq!(to_vec(&set), &[0, 73]);

        set.clear();
        assert!(set.is_empty());
    }

    #[test]
    fn test_union_with() {
        let a: BitSet = vec![9, 23, 18, 72].into_iter().collect();
        let b: BitSet = vec![7, 23, 1337].into_iter().collect();

        let mut c = a.clone();
        assert!(!c.union_with(&a));
        assert!(c.union_with(&b));
        assert_eq!(to_vec(&c), &[7, 9, 18, 23, 72, 1337]);

        let mut d = b.clone();
        assert!(d.union_with(&a));
        assert_eq!(to_vec(&c), to_vec(&d));
    }

    #[test]
    fn test_reg_mask_range() {
        let m = RegMask::from_range(4, 3).unwrap();
        assert_eq!(m.bits(), 0b111_0000);
        assert_eq!(m.iter().collect::<Vec<_>>(), &[4, 5, 6]);

        assert_eq!(RegMask::from_range(0, 64).unwrap().bits(), u64::MAX);
        assert_eq!(RegMask::from_range(63, 1).unwrap().bits(), 1 << 63);
        assert!(RegMask::from_range(64, 0).unwrap().is_empty());
        assert!(RegMask::from_range(17, 0).unwrap().is_empty());
    }

    #[test]
    fn test_reg_mask_out_of_range() {
        assert_eq!(
            RegMask::from_range(62, 4),
            Err(RegMaskError::OutOfRange { start: 62, end: 66 })
        );
        assert!(RegMask::from_range(64, 1).is_err());
        assert!(RegMask::from_range(usize::MAX, 2).is_err());

        let mut m = RegMask::from_bits(0b1);
        assert!(m.set_range(63, 2).is_err());
        assert_eq!(m.bits(), 0b1);
    }

    #[test]
    fn test_reg_mask_ops() {
        let a = RegMask::from_range(0, 4).unwrap();
        let b = RegMask::from_range(3, 2).unwrap();
        let c = RegMask::from_range(8, 1).unwrap();

        assert!(a.intersects(b));
        assert!(!a.intersects(c));
        assert_eq!((a | b).bits(), 0b1_1111);
        assert_eq!((a & b).bits(), 0b1000);
        assert!(b.is_subset_of(a | b));
        assert!(!b.is_subset_of(a));

        let mut d = a;
        assert!(!d.union_with(a));
        assert!(d.union_with(c));
        assert_eq!(d.count(), 5);
        assert!(d.contains(8));
        assert!(!d.contains(64));

        d.clear();
        assert!(d.is_empty());
        assert_eq!(format!("{}", a | c), "{r0, r1, r2, r3, r8}");
    }
}
