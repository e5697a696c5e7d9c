//! Structured records of every manager state change.

use std::sync::Mutex;

use basketbook::{Address, B256, BitFlag, ExternalTrade, InternalTrade};
use serde::Serialize;

use crate::epoch::RebalanceStatus;
use crate::error::Result;

/// Why a step was retried instead of performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryReason {
    /// The step window elapsed.
    StepTimedOut,
    /// Settlement left weights outside the deviation limit.
    TargetWeightsNotMet,
}

/// A manager event. Serialized with an `event` tag in snake case.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RebalanceEvent {
    BasketCreated {
        basket: Address,
        name: String,
        symbol: String,
        base_asset: Address,
        bit_flag: BitFlag,
        strategy: Address,
    },
    BasketBitFlagUpdated {
        basket: Address,
        old: BitFlag,
        new: BitFlag,
    },
    RebalanceProposed {
        epoch: u64,
        baskets: Vec<Address>,
        basket_mask: BitFlag,
        basket_set_hash: B256,
    },
    TokenSwapProposed {
        epoch: u64,
        internal: Vec<InternalTrade>,
        external: Vec<ExternalTrade>,
        external_trades_hash: B256,
    },
    TokenSwapExecuted {
        epoch: u64,
        external: Vec<ExternalTrade>,
        internal_settled: usize,
    },
    RebalanceRetried {
        epoch: u64,
        retry_count: u8,
        status: RebalanceStatus,
        reason: RetryReason,
    },
    RebalanceCompleted {
        epoch: u64,
        baskets: Vec<Address>,
    },
    RebalanceAborted {
        epoch: u64,
        baskets: Vec<Address>,
        retry_count: u8,
    },
    /// Trades of an aborted epoch were claimed and credited.
    ExternalTradesSettled {
        epoch: u64,
        trades: usize,
    },
    /// Trades of an aborted epoch could not be claimed; owners stay escrowed.
    ExternalTradesUnsettled {
        epoch: u64,
        trades: usize,
    },
    ParameterSet {
        name: &'static str,
        old: String,
        new: String,
    },
    ManagementFeeSet {
        basket: Address,
        old: u16,
        new: u16,
    },
    SwapFeeCollected {
        asset: Address,
        amount: u128,
    },
    Deposited {
        basket: Address,
        asset: Address,
        amount: u128,
    },
    Redeemed {
        basket: Address,
        amounts: Vec<(Address, u128)>,
    },
    Paused {
        by: Address,
    },
    Unpaused {
        by: Address,
    },
}

impl RebalanceEvent {
    /// Snake-case event name, as written to the audit trail.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BasketCreated { .. } => "basket_created",
            Self::BasketBitFlagUpdated { .. } => "basket_bit_flag_updated",
            Self::RebalanceProposed { .. } => "rebalance_proposed",
            Self::TokenSwapProposed { .. } => "token_swap_proposed",
            Self::TokenSwapExecuted { .. } => "token_swap_executed",
            Self::RebalanceRetried { .. } => "rebalance_retried",
            Self::RebalanceCompleted { .. } => "rebalance_completed",
            Self::RebalanceAborted { .. } => "rebalance_aborted",
            Self::ExternalTradesSettled { .. } => "external_trades_settled",
            Self::ExternalTradesUnsettled { .. } => "external_trades_unsettled",
            Self::ParameterSet { .. } => "parameter_set",
            Self::ManagementFeeSet { .. } => "management_fee_set",
            Self::SwapFeeCollected { .. } => "swap_fee_collected",
            Self::Deposited { .. } => "deposited",
            Self::Redeemed { .. } => "redeemed",
            Self::Paused { .. } => "paused",
            Self::Unpaused { .. } => "unpaused",
        }
    }
}

/// Receives manager events.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &RebalanceEvent) -> Result<()>;
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<RebalanceEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RebalanceEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Drain and return the collected events.
    pub fn take(&self) -> Vec<RebalanceEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl EventSink for MemorySink {
    fn publish(&self, event: &RebalanceEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}
