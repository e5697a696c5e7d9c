//! Trade venue adapters for basketbook.
//!
//! A venue executes the external trades of a rebalance epoch and later
//! reports what each trade actually delivered. Implementations:
//!
//! - **Mock** ([`mock::MockAdapter`]): configurable fills for tests and dry runs

pub mod error;
pub mod mock;
pub mod types;

pub use error::VenueError;
pub use types::*;

use basketbook::ExternalTrade;

/// An external venue that swaps assets on behalf of baskets.
///
/// `execute` hands the venue a batch of trades; `settle` collects the
/// outcome of that batch, one [`ClaimedAmounts`] per trade in the same
/// order. A venue must not report more than it received.
pub trait TradeAdapter: Send + Sync {
    /// Short venue name for logs and audit records.
    fn name(&self) -> &str {
        "unnamed"
    }

    /// Start executing `trades`. `venue_data` is opaque routing data.
    fn execute(&self, trades: &[ExternalTrade], venue_data: &[u8]) -> Result<(), VenueError>;

    /// Finish the batch started by `execute` and return claimed amounts.
    fn settle(&self, trades: &[ExternalTrade]) -> Result<Vec<ClaimedAmounts>, VenueError>;
}
