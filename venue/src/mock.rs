//! Mock venue for testing: implements `TradeAdapter` with configurable fills.
//!
//! Use this in integration tests to simulate a venue without any network.
//!
//! ```
//! use basketbook_venue::mock::{FillMode, MockAdapter};
//!
//! let venue = MockAdapter::builder()
//!     .fill_mode(FillMode::ImmediateFull)
//!     .surplus_bps(10)
//!     .build();
//! assert!(venue.executions().is_empty());
//! ```

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use basketbook::ExternalTrade;
use basketbook::wad::{BPS, mul_div};

use crate::TradeAdapter;
use crate::error::VenueError;
use crate::types::ClaimedAmounts;

/// How the mock venue handles executed trades.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FillMode {
    /// Every trade sells in full and receives its minimum amount.
    ImmediateFull,
    /// Each trade sells only the given share (basis points) of its amount;
    /// the rest is returned unsold.
    ImmediatePartial(u16),
    /// `execute` fails.
    Reject,
    /// `execute` succeeds but `settle` fails.
    FailSettle,
}

/// A recorded `execute` call for assertion in tests.
#[derive(Clone, Debug)]
pub struct RecordedExecution {
    pub trades: Vec<ExternalTrade>,
    pub venue_data: Vec<u8>,
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// Builder for `MockAdapter`.
pub struct MockAdapterBuilder {
    fill_mode: FillMode,
    surplus_bps: u16,
    settle_failures: usize,
    on_execute: Option<Hook>,
}

impl MockAdapterBuilder {
    pub fn fill_mode(mut self, mode: FillMode) -> Self {
        self.fill_mode = mode;
        self
    }

    /// Deliver this many basis points above each trade's minimum.
    pub fn surplus_bps(mut self, bps: u16) -> Self {
        self.surplus_bps = bps;
        self
    }

    /// Fail the first `n` `settle` calls, then settle normally.
    pub fn settle_failures(mut self, n: usize) -> Self {
        self.settle_failures = n;
        self
    }

    /// Run `hook` from inside every `execute` call, before it returns.
    pub fn on_execute<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_execute = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> MockAdapter {
        MockAdapter {
            fill_mode: self.fill_mode,
            surplus_bps: self.surplus_bps,
            settle_failures: Mutex::new(self.settle_failures),
            on_execute: self.on_execute,
            pending: Mutex::new(None),
            executions: Mutex::new(Vec::new()),
        }
    }
}

/// A mock venue that records executions and fills deterministically.
pub struct MockAdapter {
    fill_mode: FillMode,
    surplus_bps: u16,
    settle_failures: Mutex<usize>,
    on_execute: Option<Hook>,
    pending: Mutex<Option<Vec<ExternalTrade>>>,
    executions: Mutex<Vec<RecordedExecution>>,
}

impl MockAdapter {
    pub fn builder() -> MockAdapterBuilder {
        MockAdapterBuilder {
            fill_mode: FillMode::ImmediateFull,
            surplus_bps: 0,
            settle_failures: 0,
            on_execute: None,
        }
    }

    /// All `execute` calls so far, including rejected ones.
    pub fn executions(&self) -> Vec<RecordedExecution> {
        lock(&self.executions).clone()
    }

    /// True while an executed batch awaits settlement.
    pub fn has_pending(&self) -> bool {
        lock(&self.pending).is_some()
    }

    fn claim(&self, trade: &ExternalTrade) -> Result<ClaimedAmounts, VenueError> {
        let math = |e: basketbook::MathError| VenueError::Other(e.to_string());
        let sold = match self.fill_mode {
            FillMode::ImmediatePartial(bps) => {
                mul_div(trade.sell_amount, u128::from(bps).min(BPS), BPS).map_err(math)?
            }
            _ => trade.sell_amount,
        };
        let base_buy = mul_div(trade.min_amount, sold, trade.sell_amount.max(1)).map_err(math)?;
        let buy = mul_div(base_buy, BPS + u128::from(self.surplus_bps), BPS).map_err(math)?;
        Ok(ClaimedAmounts::new(trade.sell_amount - sold, buy))
    }
}

impl TradeAdapter for MockAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    fn execute(&self, trades: &[ExternalTrade], venue_data: &[u8]) -> Result<(), VenueError> {
        lock(&self.executions).push(RecordedExecution {
            trades: trades.to_vec(),
            venue_data: venue_data.to_vec(),
        });

        if self.fill_mode == FillMode::Reject {
            return Err(VenueError::ExecutionFailed("mock: batch rejected".into()));
        }
        if let Some(hook) = &self.on_execute {
            hook();
        }
        *lock(&self.pending) = Some(trades.to_vec());
        log::debug!("mock venue accepted {} external trades", trades.len());
        Ok(())
    }

    fn settle(&self, trades: &[ExternalTrade]) -> Result<Vec<ClaimedAmounts>, VenueError> {
        if self.fill_mode == FillMode::FailSettle {
            return Err(VenueError::SettlementFailed("mock: settlement failed".into()));
        }
        {
            let mut failures = lock(&self.settle_failures);
            if *failures > 0 {
                *failures -= 1;
                return Err(VenueError::SettlementFailed("mock: settlement unavailable".into()));
            }
        }
        let mut pending = lock(&self.pending);
        match pending.as_deref() {
            None => return Err(VenueError::NotExecuted),
            Some(executed) if executed != trades => return Err(VenueError::BatchMismatch),
            Some(_) => {}
        }
        let claims = trades
            .iter()
            .map(|t| self.claim(t))
            .collect::<Result<Vec<_>, _>>()?;
        *pending = None;
        Ok(claims)
    }
}

impl fmt::Debug for MockAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockAdapter")
            .field("fill_mode", &self.fill_mode)
            .field("surplus_bps", &self.surplus_bps)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
