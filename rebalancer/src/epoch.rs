//! The single rebalance epoch slot and its transitions.
//!
//! At most one rebalance is active at a time. Every transition checks the
//! current status and fails with [`TransitionError`] otherwise, so a step
//! can never be applied twice.

use std::fmt;

use basketbook::{Address, B256, BitFlag, ExternalTrade, InternalSettlement, InternalTrade};
use serde::Serialize;

/// Rebalance lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RebalanceStatus {
    NotStarted,
    RebalanceProposed,
    TradesProposed,
    TradesExecuted,
    /// Reported by the completing step; the slot itself returns to
    /// `NotStarted`.
    RebalanceComplete,
}

impl fmt::Display for RebalanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "NOT_STARTED",
            Self::RebalanceProposed => "REBALANCE_PROPOSED",
            Self::TradesProposed => "TRADES_PROPOSED",
            Self::TradesExecuted => "TRADES_EXECUTED",
            Self::RebalanceComplete => "REBALANCE_COMPLETE",
        };
        f.write_str(s)
    }
}

/// A step was attempted from the wrong status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("expected status {expected}, found {actual}")]
pub struct TransitionError {
    pub expected: RebalanceStatus,
    pub actual: RebalanceStatus,
}

/// Step-specific data of the active rebalance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    RebalanceProposed,
    TradesProposed {
        internal: Vec<InternalTrade>,
        /// Internal trades priced at proposal time, applied at execution.
        settlements: Vec<InternalSettlement>,
        external_hash: B256,
    },
    TradesExecuted {
        external_hash: B256,
        /// Sent to the venue and escrowed from their owners.
        external: Vec<ExternalTrade>,
    },
}

impl Phase {
    pub fn status(&self) -> RebalanceStatus {
        match self {
            Phase::RebalanceProposed => RebalanceStatus::RebalanceProposed,
            Phase::TradesProposed { .. } => RebalanceStatus::TradesProposed,
            Phase::TradesExecuted { .. } => RebalanceStatus::TradesExecuted,
        }
    }

    /// Committed external trades hash, once trades are proposed.
    pub fn external_hash(&self) -> Option<B256> {
        match self {
            Phase::RebalanceProposed => None,
            Phase::TradesProposed { external_hash, .. }
            | Phase::TradesExecuted { external_hash, .. } => Some(*external_hash),
        }
    }

    /// External trades awaiting settlement at the venue.
    pub fn executed_trades(&self) -> &[ExternalTrade] {
        match self {
            Phase::TradesExecuted { external, .. } => external,
            _ => &[],
        }
    }
}

/// The in-flight rebalance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRebalance {
    pub epoch: u64,
    /// Basket indices included in this epoch.
    pub basket_mask: BitFlag,
    /// Basket addresses in ascending index order.
    pub baskets: Vec<Address>,
    pub basket_set_hash: B256,
    pub proposal_timestamp: u64,
    pub last_step_timestamp: u64,
    pub retry_count: u8,
    pub phase: Phase,
}

impl ActiveRebalance {
    pub fn status(&self) -> RebalanceStatus {
        self.phase.status()
    }
}

/// Result of a timeout-driven retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    Retried {
        epoch: u64,
        retry_count: u8,
        status: RebalanceStatus,
    },
    /// The retry limit was exceeded; the slot is free again.
    Aborted(ActiveRebalance),
}

/// Holds the epoch counter and at most one active rebalance.
#[derive(Debug, Clone, Default)]
pub struct EpochSlot {
    epoch: u64,
    active: Option<ActiveRebalance>,
}

impl EpochSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest epoch number handed out.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn status(&self) -> RebalanceStatus {
        self.active
            .as_ref()
            .map_or(RebalanceStatus::NotStarted, ActiveRebalance::status)
    }

    pub fn active(&self) -> Option<&ActiveRebalance> {
        self.active.as_ref()
    }

    /// True when basket `index` belongs to the active rebalance.
    pub fn includes(&self, index: usize) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.basket_mask.contains(index))
    }

    fn expect(&mut self, expected: RebalanceStatus) -> Result<&mut ActiveRebalance, TransitionError> {
        let actual = self.status();
        match self.active.as_mut() {
            Some(active) if actual == expected => Ok(active),
            _ => Err(TransitionError { expected, actual }),
        }
    }

    /// Open a new epoch over `baskets`.
    pub fn begin(
        &mut self,
        basket_mask: BitFlag,
        baskets: Vec<Address>,
        basket_set_hash: B256,
        now: u64,
    ) -> Result<u64, TransitionError> {
        if self.active.is_some() {
            return Err(TransitionError {
                expected: RebalanceStatus::NotStarted,
                actual: self.status(),
            });
        }
        self.epoch += 1;
        self.active = Some(ActiveRebalance {
            epoch: self.epoch,
            basket_mask,
            baskets,
            basket_set_hash,
            proposal_timestamp: now,
            last_step_timestamp: now,
            retry_count: 0,
            phase: Phase::RebalanceProposed,
        });
        Ok(self.epoch)
    }

    pub fn propose_trades(
        &mut self,
        internal: Vec<InternalTrade>,
        settlements: Vec<InternalSettlement>,
        external_hash: B256,
        now: u64,
    ) -> Result<(), TransitionError> {
        let active = self.expect(RebalanceStatus::RebalanceProposed)?;
        active.phase = Phase::TradesProposed {
            internal,
            settlements,
            external_hash,
        };
        active.last_step_timestamp = now;
        Ok(())
    }

    /// Move to `TradesExecuted` with `external` in flight, handing back the
    /// internal trades to settle.
    pub fn mark_executed(
        &mut self,
        external: Vec<ExternalTrade>,
        now: u64,
    ) -> Result<(Vec<InternalTrade>, Vec<InternalSettlement>), TransitionError> {
        let active = self.expect(RebalanceStatus::TradesProposed)?;
        let external_hash = active.phase.external_hash().unwrap_or_default();
        let previous = std::mem::replace(
            &mut active.phase,
            Phase::TradesExecuted {
                external_hash,
                external,
            },
        );
        active.last_step_timestamp = now;
        match previous {
            Phase::TradesProposed {
                internal,
                settlements,
                ..
            } => Ok((internal, settlements)),
            _ => Ok((Vec::new(), Vec::new())),
        }
    }

    /// Return an executed epoch to `RebalanceProposed` for another round.
    pub fn reopen(&mut self, now: u64) -> Result<u8, TransitionError> {
        let active = self.expect(RebalanceStatus::TradesExecuted)?;
        active.phase = Phase::RebalanceProposed;
        active.retry_count = active.retry_count.saturating_add(1);
        active.last_step_timestamp = now;
        Ok(active.retry_count)
    }

    /// Close an executed epoch and free the slot.
    pub fn finish(&mut self) -> Result<ActiveRebalance, TransitionError> {
        self.expect(RebalanceStatus::TradesExecuted)?;
        self.active.take().ok_or(TransitionError {
            expected: RebalanceStatus::TradesExecuted,
            actual: RebalanceStatus::NotStarted,
        })
    }

    /// Seconds since the last step, or `None` when nothing is active or the
    /// clock moved backwards.
    pub fn elapsed(&self, now: u64) -> Option<u64> {
        self.active
            .as_ref()
            .and_then(|a| now.checked_sub(a.last_step_timestamp))
    }

    /// True when the active step's window is over.
    pub fn window_elapsed(&self, now: u64, step_delay: u64) -> bool {
        self.active.is_some() && self.elapsed(now).is_none_or(|e| e > step_delay)
    }

    /// Count a retry. Past `retry_limit` the rebalance is aborted and the
    /// slot released, with any executed trades left to the caller to settle;
    /// otherwise unexecuted trades are dropped and the step
    /// window restarts at `now`.
    pub fn retry(&mut self, now: u64, retry_limit: u8) -> Option<RetryOutcome> {
        let active = self.active.as_mut()?;
        active.retry_count = active.retry_count.saturating_add(1);
        if active.retry_count > retry_limit {
            return self.active.take().map(RetryOutcome::Aborted);
        }
        if matches!(active.phase, Phase::TradesProposed { .. }) {
            active.phase = Phase::RebalanceProposed;
        }
        active.last_step_timestamp = now;
        Some(RetryOutcome::Retried {
            epoch: active.epoch,
            retry_count: active.retry_count,
            status: active.status(),
        })
    }
}
