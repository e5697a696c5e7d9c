//! Error types for the rebalancing core.

use alloy_primitives::Address;

/// Fixed-point arithmetic failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MathError {
    #[error("arithmetic overflow")]
    Overflow,
    #[error("division by zero")]
    DivisionByZero,
}

/// Bit-flag construction and asset-universe lookup failures.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BitFlagError {
    #[error("bit flag must select at least one index")]
    Empty,
    #[error("bit index {0} is out of range (max 255)")]
    IndexOutOfRange(usize),
    #[error("no asset registered at index {0}")]
    UnregisteredAsset(usize),
    #[error("asset {0} registered twice")]
    DuplicateAsset(Address),
    #[error("asset {0} is not in the universe")]
    UnknownAsset(Address),
}

/// Price source and price guard failures.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PriceError {
    #[error("invalid price answer: {0}")]
    InvalidAnswer(String),

    #[error("primary quote {primary} diverges from anchor quote {anchor} beyond {max_divergence} (WAD)")]
    DivergentPrices {
        primary: u128,
        anchor: u128,
        max_divergence: u128,
    },

    #[error("invalid price guard configuration: {0}")]
    InvalidConfiguration(String),

    #[error(transparent)]
    Math(#[from] MathError),
}

/// Target-weight strategy failures.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StrategyError {
    #[error("expected {expected} weights for the bit flag, got {got}")]
    InvalidWeightsLength { expected: usize, got: usize },

    #[error("weights sum to {sum}, expected exactly 1e18")]
    WeightsSumMismatch { sum: u128 },

    #[error("no target weights set for bit flag {0}")]
    NoTargetWeights(String),

    #[error("bit flag {0} is not supported by this strategy")]
    UnsupportedBitFlag(String),

    #[error("strategy state poisoned")]
    Poisoned,
}

/// Failures while valuing baskets or planning trades.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error(transparent)]
    Price(#[from] PriceError),

    #[error(transparent)]
    Math(#[from] MathError),

    #[error("snapshot for basket {0} has mismatched asset, balance, and weight lengths")]
    MalformedSnapshot(Address),

    #[error("basket {0} appears twice in the plan input")]
    DuplicateBasket(Address),
}
