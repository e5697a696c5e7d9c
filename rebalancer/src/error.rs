//! Error types for the rebalancer.

use std::path::PathBuf;

use basketbook::{Address, BitFlagError, MathError, PlanError, PriceError, StrategyError};
use basketbook_venue::VenueError;
use serde::Serialize;

use crate::auth::Capability;
use crate::epoch::TransitionError;

/// Broad class of a failure, telling the caller how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// Wrong state, stale input, or re-entry: re-derive input and retry.
    Sequencing,
    /// Prices or trades failed a bound: re-propose within the same epoch.
    Economic,
    /// A price source, strategy, or venue failed: retry after a delay.
    Capability,
    /// A parameter or basket definition is invalid: fix and resubmit.
    Configuration,
    /// The caller lacks the capability for the operation.
    Unauthorized,
}

/// All errors that can occur during rebalancer operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // Sequencing
    #[error(transparent)]
    WrongState(#[from] TransitionError),

    #[error("a rebalance is in progress; wait for it to complete")]
    MustWaitForRebalanceToComplete,

    #[error("no rebalance in progress")]
    NoActiveRebalance,

    #[error("step window has not elapsed ({elapsed}s of {step_delay}s)")]
    StepNotTimedOut { elapsed: u64, step_delay: u64 },

    #[error("basket set no longer matches the committed hash")]
    BasketSetHashMismatch,

    #[error("external trades do not match the committed hash")]
    ExternalTradesHashMismatch,

    #[error("proposed trades do not match the netted plan")]
    TradesMismatch,

    #[error("trade proposal is empty")]
    EmptyTradeSet,

    #[error("no basket needs rebalancing")]
    NoRebalanceRequired,

    #[error("basket list is empty")]
    EmptyBasketSet,

    #[error("basket {0} listed twice")]
    DuplicateBasket(Address),

    #[error("invalid ownership: {0}")]
    InvalidOwnership(String),

    #[error("invalid plan input: {0}")]
    InvalidPlanInput(PlanError),

    #[error("invalid redemption: {0}")]
    InvalidRedemption(String),

    #[error("reentrant call")]
    ReentrantCall,

    #[error("protocol is paused")]
    EnforcedPause,

    #[error("protocol is not paused")]
    ExpectedPause,

    #[error("basket {0} has external trades awaiting settlement")]
    UnsettledEscrow(Address),

    #[error("execution aborted: {0}")]
    Aborted(String),

    #[error("epoch {epoch} did not complete at {step}: {reason}")]
    EpochIncomplete {
        epoch: u64,
        step: String,
        reason: String,
    },

    // Economic
    #[error("risk check failed: {0}")]
    RiskFailed(String),

    #[error("price divergence: {0}")]
    PriceDivergence(PriceError),

    #[error("basket {basket} holds {available} of {asset}, needs {required}")]
    InsufficientBalance {
        basket: Address,
        asset: Address,
        available: u128,
        required: u128,
    },

    // Capability
    #[error("price source failure: {0}")]
    Price(PriceError),

    #[error("venue error: {0}")]
    Venue(#[from] VenueError),

    #[error("venue returned {got} claims for {expected} trades")]
    ClaimsLengthMismatch { expected: usize, got: usize },

    #[error("strategy error: {0}")]
    Strategy(#[from] StrategyError),

    #[error("arithmetic error: {0}")]
    Math(#[from] MathError),

    #[error("manager state lock poisoned")]
    Poisoned,

    #[error("audit log error: {0}")]
    Audit(#[from] std::io::Error),

    // Configuration
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid {name}: {value}")]
    InvalidParameter { name: &'static str, value: String },

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("scenario error: {0}")]
    Scenario(String),

    #[error("failed to read scenario file {path}: {source}")]
    ScenarioRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse scenario JSON: {0}")]
    ScenarioParse(#[from] serde_json::Error),

    #[error(transparent)]
    BitFlag(#[from] BitFlagError),

    #[error("basket not found: {0}")]
    BasketNotFound(Address),

    #[error("a basket with this bit flag and strategy already exists")]
    BasketIdAlreadyExists,

    #[error("basket limit reached")]
    BasketLimitReached,

    #[error("base asset {0} is not in the basket universe")]
    BaseAssetNotInUniverse(Address),

    #[error("new bit flag must differ from the current one")]
    BitFlagMustBeDifferent,

    #[error("new bit flag must include every current asset")]
    BitFlagMustIncludeCurrent,

    #[error("strategy has no weights for the bit flag")]
    BitFlagUnsupportedByStrategy,

    // Unauthorized
    #[error("{caller} lacks the {capability:?} capability")]
    Unauthorized {
        caller: Address,
        capability: Capability,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        use Error::*;
        match self {
            WrongState(_)
            | MustWaitForRebalanceToComplete
            | NoActiveRebalance
            | StepNotTimedOut { .. }
            | BasketSetHashMismatch
            | ExternalTradesHashMismatch
            | TradesMismatch
            | EmptyTradeSet
            | NoRebalanceRequired
            | EmptyBasketSet
            | DuplicateBasket(_)
            | InvalidOwnership(_)
            | InvalidPlanInput(_)
            | InvalidRedemption(_)
            | ReentrantCall
            | EnforcedPause
            | ExpectedPause
            | UnsettledEscrow(_)
            | Aborted(_)
            | EpochIncomplete { .. } => ErrorKind::Sequencing,

            RiskFailed(_) | PriceDivergence(_) | InsufficientBalance { .. } => ErrorKind::Economic,

            Price(_)
            | Venue(_)
            | ClaimsLengthMismatch { .. }
            | Strategy(_)
            | Math(_)
            | Poisoned
            | Audit(_)
            | ConfigRead { .. }
            | ScenarioRead { .. } => ErrorKind::Capability,

            Config(_)
            | InvalidParameter { .. }
            | ConfigParse(_)
            | Scenario(_)
            | ScenarioParse(_)
            | BitFlag(_)
            | BasketNotFound(_)
            | BasketIdAlreadyExists
            | BasketLimitReached
            | BaseAssetNotInUniverse(_)
            | BitFlagMustBeDifferent
            | BitFlagMustIncludeCurrent
            | BitFlagUnsupportedByStrategy => ErrorKind::Configuration,

            Unauthorized { .. } => ErrorKind::Unauthorized,
        }
    }
}

impl From<PriceError> for Error {
    fn from(e: PriceError) -> Self {
        match e {
            PriceError::DivergentPrices { .. } => Error::PriceDivergence(e),
            PriceError::Math(m) => Error::Math(m),
            other => Error::Price(other),
        }
    }
}

impl From<PlanError> for Error {
    fn from(e: PlanError) -> Self {
        match e {
            PlanError::Price(p) => p.into(),
            PlanError::Math(m) => Error::Math(m),
            other => Error::InvalidPlanInput(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
