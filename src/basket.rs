//! Point-in-time basket state used for valuation and planning.

use alloy_primitives::{Address, B256};
use sha2::{Digest, Sha256};

use crate::error::PlanError;

/// One basket's holdings and targets, aligned by asset position.
///
/// `assets`, `balances`, and `target_weights` share one ordering: ascending
/// asset-universe index, as selected by the basket's bit flag.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BasketSnapshot {
    pub basket: Address,
    pub base_asset: Address,
    pub assets: Vec<Address>,
    pub balances: Vec<u128>,
    /// WAD-scaled target weights summing to exactly `WAD`.
    pub target_weights: Vec<u64>,
}

impl BasketSnapshot {
    /// Reject snapshots whose parallel vectors disagree in length.
    pub fn validate(&self) -> Result<(), PlanError> {
        let n = self.assets.len();
        if n == 0 || self.balances.len() != n || self.target_weights.len() != n {
            return Err(PlanError::MalformedSnapshot(self.basket));
        }
        Ok(())
    }

    pub fn position_of(&self, asset: &Address) -> Option<usize> {
        self.assets.iter().position(|a| a == asset)
    }

    /// Balance of `asset`; zero when the asset is not in the basket.
    pub fn balance_of(&self, asset: &Address) -> u128 {
        self.position_of(asset).map_or(0, |i| self.balances[i])
    }

    /// Mutable balance slot for `asset`, if it belongs to the basket.
    pub fn balance_mut(&mut self, asset: &Address) -> Option<&mut u128> {
        let i = self.position_of(asset)?;
        self.balances.get_mut(i)
    }

    fn hash_into(&self, hasher: &mut Sha256) {
        hasher.update(self.basket.as_slice());
        hasher.update((self.assets.len() as u64).to_be_bytes());
        for (asset, weight) in self.assets.iter().zip(&self.target_weights) {
            hasher.update(asset.as_slice());
            hasher.update(weight.to_be_bytes());
        }
    }
}

/// Commitment over the basket set of an epoch.
///
/// Covers each basket's address, asset list, and target weights, in the
/// given order. Balances are excluded: they move during the epoch while the
/// committed set must not.
pub fn basket_set_hash(snapshots: &[BasketSnapshot]) -> B256 {
    let mut hasher = Sha256::new();
    hasher.update((snapshots.len() as u64).to_be_bytes());
    for snapshot in snapshots {
        snapshot.hash_into(&mut hasher);
    }
    B256::from_slice(hasher.finalize().as_slice())
}
