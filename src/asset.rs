//! Asset universe: the index space that bit flags select from.

use alloy_primitives::Address;
use rustc_hash::FxHashMap;

use crate::bitflag::BitFlag;
use crate::error::BitFlagError;

/// Maps asset-universe indices to asset addresses and back.
pub trait AssetRegistry: Send + Sync {
    /// Asset registered at `index`, if any.
    fn asset_at(&self, index: usize) -> Option<Address>;

    /// Index of `asset` in the universe, if registered.
    fn index_of(&self, asset: &Address) -> Option<usize>;

    /// Assets selected by `bit_flag`, in ascending index order.
    fn assets_for(&self, bit_flag: &BitFlag) -> Result<Vec<Address>, BitFlagError> {
        bit_flag
            .indices()
            .map(|i| self.asset_at(i).ok_or(BitFlagError::UnregisteredAsset(i)))
            .collect()
    }
}

/// A fixed, in-memory asset universe.
#[derive(Clone, Debug, Default)]
pub struct StaticAssetRegistry {
    assets: Vec<Address>,
    index: FxHashMap<Address, usize>,
}

impl StaticAssetRegistry {
    /// Register `assets` at indices `0..assets.len()`.
    pub fn new(assets: Vec<Address>) -> Result<Self, BitFlagError> {
        if assets.len() > BitFlag::CAPACITY {
            return Err(BitFlagError::IndexOutOfRange(assets.len() - 1));
        }
        let mut index = FxHashMap::default();
        for (i, asset) in assets.iter().enumerate() {
            if index.insert(*asset, i).is_some() {
                return Err(BitFlagError::DuplicateAsset(*asset));
            }
        }
        Ok(Self { assets, index })
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn assets(&self) -> &[Address] {
        &self.assets
    }

    /// Bit flag selecting `assets`; every asset must be registered.
    pub fn flag_for(&self, assets: &[Address]) -> Result<BitFlag, BitFlagError> {
        let mut flag = BitFlag::EMPTY;
        for asset in assets {
            let i = self
                .index
                .get(asset)
                .copied()
                .ok_or(BitFlagError::UnknownAsset(*asset))?;
            flag.insert(i)?;
        }
        if flag.is_empty() {
            return Err(BitFlagError::Empty);
        }
        Ok(flag)
    }
}

impl AssetRegistry for StaticAssetRegistry {
    fn asset_at(&self, index: usize) -> Option<Address> {
        self.assets.get(index).copied()
    }

    fn index_of(&self, asset: &Address) -> Option<usize> {
        self.index.get(asset).copied()
    }
}
