//! 256-bit asset-universe bit flags.

use std::fmt;

use alloy_primitives::U256;

use crate::error::BitFlagError;

/// A set of asset-universe indices packed into a 256-bit word.
///
/// Bit `i` set means the asset registered at index `i` belongs to the set.
/// Iteration order is always ascending index order, which is also the order
/// of a basket's asset list and its target-weight vector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BitFlag(U256);

impl BitFlag {
    /// Number of addressable indices.
    pub const CAPACITY: usize = 256;

    /// The empty set. Never accepted where a basket universe is expected.
    pub const EMPTY: BitFlag = BitFlag(U256::ZERO);

    /// Wrap a raw word, rejecting the empty set.
    pub fn new(raw: U256) -> Result<Self, BitFlagError> {
        if raw.is_zero() {
            return Err(BitFlagError::Empty);
        }
        Ok(Self(raw))
    }

    /// Build a flag from explicit indices. Duplicates are harmless.
    pub fn from_indices<I>(indices: I) -> Result<Self, BitFlagError>
    where
        I: IntoIterator<Item = usize>,
    {
        let mut flag = Self::EMPTY;
        for index in indices {
            flag.insert(index)?;
        }
        if flag.is_empty() {
            return Err(BitFlagError::Empty);
        }
        Ok(flag)
    }

    #[inline]
    pub fn raw(&self) -> U256 {
        self.0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        index < Self::CAPACITY && self.0.bit(index)
    }

    pub fn insert(&mut self, index: usize) -> Result<(), BitFlagError> {
        if index >= Self::CAPACITY {
            return Err(BitFlagError::IndexOutOfRange(index));
        }
        self.0.set_bit(index, true);
        Ok(())
    }

    pub fn remove(&mut self, index: usize) {
        if index < Self::CAPACITY {
            self.0.set_bit(index, false);
        }
    }

    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// True when every index in `other` is also in `self`.
    pub fn is_superset_of(&self, other: &Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Number of selected indices.
    pub fn count(&self) -> usize {
        self.0.count_ones()
    }

    /// Selected indices in ascending order.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..Self::CAPACITY).filter(move |&i| self.0.bit(i))
    }

    /// Ordinal of `index` among the selected indices, if selected.
    pub fn position(&self, index: usize) -> Option<usize> {
        if !self.contains(index) {
            return None;
        }
        Some(self.indices().take_while(|&i| i < index).count())
    }

    /// Big-endian 32-byte encoding, used in hashes.
    pub fn to_be_bytes(&self) -> [u8; 32] {
        self.0.to_be_bytes::<32>()
    }
}

impl fmt::Display for BitFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
