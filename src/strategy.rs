//! Target-weight strategies.

use std::fmt;
use std::sync::RwLock;

use alloy_primitives::Address;
use rustc_hash::FxHashMap;

use crate::bitflag::BitFlag;
use crate::error::StrategyError;
use crate::wad::WAD;

/// Supplies target weights for asset universes selected by a bit flag.
///
/// Weights are WAD-scaled, one per selected asset in ascending index order,
/// and sum to exactly `WAD`.
pub trait WeightStrategy: Send + Sync {
    /// Stable identifier of the strategy.
    fn id(&self) -> Address;

    fn target_weights(&self, bit_flag: &BitFlag) -> Result<Vec<u64>, StrategyError>;

    /// `(epoch, timestamp)` of the latest update for `bit_flag`.
    fn last_updated(&self, bit_flag: &BitFlag) -> Option<(u64, u64)>;

    fn supports_bit_flag(&self, bit_flag: &BitFlag) -> bool;
}

/// One stored weight vector.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TargetWeightSet {
    pub bit_flag: BitFlag,
    pub weights: Vec<u64>,
    /// Number of updates applied to this bit flag so far.
    pub epoch: u64,
    pub updated_at: u64,
}

/// Check length and sum of a weight vector for `bit_flag`.
pub fn validate_weights(bit_flag: &BitFlag, weights: &[u64]) -> Result<(), StrategyError> {
    let expected = bit_flag.count();
    if weights.len() != expected {
        return Err(StrategyError::InvalidWeightsLength {
            expected,
            got: weights.len(),
        });
    }
    let sum: u128 = weights.iter().map(|&w| u128::from(w)).sum();
    if sum != WAD {
        return Err(StrategyError::WeightsSumMismatch { sum });
    }
    Ok(())
}

/// A strategy whose weights are set explicitly by a manager.
pub struct ManagedWeightStrategy {
    id: Address,
    sets: RwLock<FxHashMap<BitFlag, TargetWeightSet>>,
}

impl ManagedWeightStrategy {
    pub fn new(id: Address) -> Self {
        Self {
            id,
            sets: RwLock::new(FxHashMap::default()),
        }
    }

    /// Store `weights` for `bit_flag`, replacing any previous set.
    pub fn set_target_weights(
        &self,
        bit_flag: BitFlag,
        weights: Vec<u64>,
        now: u64,
    ) -> Result<TargetWeightSet, StrategyError> {
        if bit_flag.is_empty() {
            return Err(StrategyError::UnsupportedBitFlag(bit_flag.to_string()));
        }
        validate_weights(&bit_flag, &weights)?;

        let mut sets = self.sets.write().map_err(|_| StrategyError::Poisoned)?;
        let epoch = sets.get(&bit_flag).map_or(0, |s| s.epoch) + 1;
        let set = TargetWeightSet {
            bit_flag,
            weights,
            epoch,
            updated_at: now,
        };
        sets.insert(bit_flag, set.clone());
        Ok(set)
    }
}

impl WeightStrategy for ManagedWeightStrategy {
    fn id(&self) -> Address {
        self.id
    }

    fn target_weights(&self, bit_flag: &BitFlag) -> Result<Vec<u64>, StrategyError> {
        let sets = self.sets.read().map_err(|_| StrategyError::Poisoned)?;
        sets.get(bit_flag)
            .map(|s| s.weights.clone())
            .ok_or_else(|| StrategyError::NoTargetWeights(bit_flag.to_string()))
    }

    fn last_updated(&self, bit_flag: &BitFlag) -> Option<(u64, u64)> {
        let sets = self.sets.read().ok()?;
        sets.get(bit_flag).map(|s| (s.epoch, s.updated_at))
    }

    fn supports_bit_flag(&self, bit_flag: &BitFlag) -> bool {
        self.sets
            .read()
            .map(|sets| sets.contains_key(bit_flag))
            .unwrap_or(false)
    }
}

impl fmt::Debug for ManagedWeightStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedWeightStrategy")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
