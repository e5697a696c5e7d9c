//! Pre-trade risk engine for basketbook.
//!
//! Validates a rebalance trade proposal before it is committed: internal
//! trade bounds and balances, external trade slippage and ownership, and the
//! weights every basket would end up at.

pub mod checks;
pub mod config;
pub mod report;

pub use config::RiskConfig;
pub use report::{RiskCheck, RiskReport, RiskStatus};

use basketbook::{BasketSnapshot, ExternalTrade, InternalTrade, PlanError, WeightEngine};

/// Pre-trade risk engine.
#[derive(Debug, Clone)]
pub struct RiskEngine {
    config: RiskConfig,
}

impl RiskEngine {
    /// Create a new risk engine with the given config.
    ///
    /// # Panics
    ///
    /// Panics if `config` fails validation. Use [`RiskEngine::try_new`] when
    /// the config comes from outside the program.
    #[track_caller]
    pub fn new(config: RiskConfig) -> Self {
        match Self::try_new(config) {
            Ok(engine) => engine,
            Err(msg) => panic!("invalid RiskConfig: {msg}"),
        }
    }

    pub fn try_new(config: RiskConfig) -> Result<Self, String> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Access the current config.
    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Check a trade proposal against the baskets it touches.
    ///
    /// Trades are applied in order to a copy of `snapshots`; external trades
    /// are assumed to fill at their minimum amount. Price and arithmetic
    /// failures are errors, limit breaches are `Fail` checks in the report.
    pub fn check_proposal(
        &self,
        snapshots: &[BasketSnapshot],
        internal: &[InternalTrade],
        external: &[ExternalTrade],
        engine: &WeightEngine,
    ) -> Result<RiskReport, PlanError> {
        checks::check_proposal(&self.config, snapshots, internal, external, engine)
    }
}
