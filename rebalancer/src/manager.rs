//! The rebalance manager: baskets, balances, and the epoch protocol.
//!
//! Every entry point takes the re-entrancy guard, checks the caller's
//! capability, and then either applies its whole effect or fails without
//! touching state. Steps that call the trade venue restore a checkpoint of
//! the manager state when the venue fails.

use std::fmt;
use std::sync::Arc;

use basketbook::wad::{half_fee, mul_div};
use basketbook::{
    Address, AssetRegistry, B256, BasketSnapshot, BitFlag, Clock, ExternalTrade, InternalSettlement,
    InternalTrade, PriceSource, SystemClock, TradeNetter, TradePlan, WAD, WeightEngine,
    WeightStrategy, basket_set_hash, external_trades_hash, settle_internal,
};
use basketbook_risk::{RiskEngine, RiskReport};
use basketbook_venue::{ClaimedAmounts, TradeAdapter, VenueError};
use rustc_hash::FxHashSet;
use serde::Serialize;

use crate::auth::{Authorizer, Capability};
use crate::config::{self, ManagerConfig};
use crate::epoch::{ActiveRebalance, EpochSlot, RebalanceStatus, RetryOutcome, TransitionError};
use crate::error::{Error, Result};
use crate::events::{EventSink, RebalanceEvent, RetryReason};
use crate::guard::{Entered, ReentrancyGuard};
use crate::ledger::{BasketInfo, BasketLedger, NewBasket};

/// What a protocol step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepOutcome {
    /// The step was performed; `status` is the resulting status.
    Advanced { epoch: u64, status: RebalanceStatus },
    /// The step window had elapsed, so a retry was counted instead.
    Retried { epoch: u64, retry_count: u8 },
    /// The retry limit was exceeded and the epoch was dropped.
    Aborted { epoch: u64 },
}

/// Result of a successful rebalance proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProposalSummary {
    pub epoch: u64,
    /// Baskets included, in ascending basket index.
    pub baskets: Vec<Address>,
    /// Requested baskets already within the deviation limit.
    pub skipped: Vec<Address>,
    pub basket_mask: BitFlag,
    pub basket_set_hash: B256,
}

/// External trades of an aborted epoch that the venue has not settled yet.
/// Their sell legs stay escrowed until [`RebalanceManager::claim_unsettled`]
/// credits the proceeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsettledBatch {
    pub epoch: u64,
    pub external: Vec<ExternalTrade>,
}

impl UnsettledBatch {
    fn is_owner(&self, basket: &Address) -> bool {
        self.external
            .iter()
            .any(|t| t.ownership.iter().any(|s| s.basket == *basket))
    }
}

/// Mutable manager state. Cloned as a checkpoint around venue calls.
#[derive(Clone)]
struct ManagerState {
    config: ManagerConfig,
    ledger: BasketLedger,
    slot: EpochSlot,
    unsettled: Vec<UnsettledBatch>,
    paused: bool,
    adapter: Arc<dyn TradeAdapter>,
}

impl fmt::Debug for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerState")
            .field("config", &self.config)
            .field("ledger", &self.ledger)
            .field("slot", &self.slot)
            .field("unsettled", &self.unsettled.len())
            .field("paused", &self.paused)
            .field("adapter", &self.adapter.name())
            .finish()
    }
}

impl ManagerState {
    fn require(&self, expected: RebalanceStatus) -> Result<()> {
        let actual = self.slot.status();
        if actual != expected {
            return Err(TransitionError { expected, actual }.into());
        }
        Ok(())
    }

    fn require_idle(&self) -> Result<()> {
        if self.slot.status() != RebalanceStatus::NotStarted {
            return Err(Error::MustWaitForRebalanceToComplete);
        }
        Ok(())
    }

    /// Fail when `basket` belongs to the active epoch or still has sells
    /// escrowed at the venue.
    fn require_basket_idle(&self, basket: &Address) -> Result<usize> {
        let index = self.ledger.index_of(basket)?;
        if self.slot.includes(index) {
            return Err(Error::MustWaitForRebalanceToComplete);
        }
        self.require_settled(basket)?;
        Ok(index)
    }

    fn require_settled(&self, basket: &Address) -> Result<()> {
        if self.unsettled.iter().any(|b| b.is_owner(basket)) {
            return Err(Error::UnsettledEscrow(*basket));
        }
        Ok(())
    }

    fn committed_hash(&self) -> Option<B256> {
        self.slot.active().and_then(|a| a.phase.external_hash())
    }
}

/// Builder for [`RebalanceManager`].
pub struct ManagerBuilder {
    config: ManagerConfig,
    prices: Option<Arc<dyn PriceSource>>,
    assets: Option<Arc<dyn AssetRegistry>>,
    authorizer: Option<Arc<dyn Authorizer>>,
    adapter: Option<Arc<dyn TradeAdapter>>,
    clock: Arc<dyn Clock>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl ManagerBuilder {
    /// Price source used for valuation and internal settlement.
    pub fn prices(mut self, prices: Arc<dyn PriceSource>) -> Self {
        self.prices = Some(prices);
        self
    }

    pub fn assets(mut self, assets: Arc<dyn AssetRegistry>) -> Self {
        self.assets = Some(assets);
        self
    }

    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    pub fn adapter(mut self, adapter: Arc<dyn TradeAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Add an event sink. May be called repeatedly.
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn build(self) -> Result<RebalanceManager> {
        self.config.validate()?;
        let missing = |what: &str| Error::Config(format!("rebalance manager needs {what}"));
        let state = ManagerState {
            config: self.config,
            ledger: BasketLedger::new(),
            slot: EpochSlot::new(),
            unsettled: Vec::new(),
            paused: false,
            adapter: self.adapter.ok_or_else(|| missing("a trade adapter"))?,
        };
        Ok(RebalanceManager {
            state: ReentrancyGuard::new(state),
            prices: self.prices.ok_or_else(|| missing("a price source"))?,
            assets: self.assets.ok_or_else(|| missing("an asset registry"))?,
            authorizer: self.authorizer.ok_or_else(|| missing("an authorizer"))?,
            clock: self.clock,
            sinks: self.sinks,
        })
    }
}

/// Coordinates baskets through propose, trade, execute, and complete.
pub struct RebalanceManager {
    state: ReentrancyGuard<ManagerState>,
    prices: Arc<dyn PriceSource>,
    assets: Arc<dyn AssetRegistry>,
    authorizer: Arc<dyn Authorizer>,
    clock: Arc<dyn Clock>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl fmt::Debug for RebalanceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RebalanceManager")
            .field("state", &self.state)
            .field("sinks", &self.sinks.len())
            .finish_non_exhaustive()
    }
}

type State<'a> = Entered<'a, ManagerState>;

impl RebalanceManager {
    pub fn builder(config: ManagerConfig) -> ManagerBuilder {
        ManagerBuilder {
            config,
            prices: None,
            assets: None,
            authorizer: None,
            adapter: None,
            clock: Arc::new(SystemClock),
            sinks: Vec::new(),
        }
    }

    // ====================================================================
    // Access
    // ====================================================================

    fn authorize(&self, caller: &Address, capability: Capability) -> Result<()> {
        if !self.authorizer.is_authorized(caller, capability) {
            return Err(Error::Unauthorized {
                caller: *caller,
                capability,
            });
        }
        Ok(())
    }

    /// Guard, then capability.
    fn enter(&self, caller: &Address, capability: Capability) -> Result<State<'_>> {
        let state = self.state.enter()?;
        self.authorize(caller, capability)?;
        Ok(state)
    }

    /// Guard, capability, then pause flag.
    fn enter_unpaused(&self, caller: &Address, capability: Capability) -> Result<State<'_>> {
        let state = self.enter(caller, capability)?;
        if state.paused {
            return Err(Error::EnforcedPause);
        }
        Ok(state)
    }

    fn publish(&self, event: RebalanceEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.publish(&event) {
                log::error!("failed to publish {} event: {e}", event.name());
            }
        }
    }

    fn engine(&self) -> WeightEngine {
        WeightEngine::new(self.prices.clone())
    }

    /// Snapshots of the active epoch's baskets, checked against the
    /// committed basket set.
    fn epoch_snapshots(&self, state: &ManagerState) -> Result<Vec<BasketSnapshot>> {
        let active = state.slot.active().ok_or(Error::NoActiveRebalance)?;
        let snapshots = active
            .baskets
            .iter()
            .map(|b| state.ledger.snapshot(b, self.assets.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        if basket_set_hash(&snapshots) != active.basket_set_hash {
            return Err(Error::BasketSetHashMismatch);
        }
        Ok(snapshots)
    }

    // ====================================================================
    // Epoch protocol
    // ====================================================================

    /// Open an epoch over the listed baskets that need rebalancing.
    pub fn propose_rebalance(
        &self,
        caller: &Address,
        baskets: &[Address],
    ) -> Result<ProposalSummary> {
        let mut state = self.enter_unpaused(caller, Capability::RebalanceProposer)?;
        state.require_idle()?;
        if baskets.is_empty() {
            return Err(Error::EmptyBasketSet);
        }
        let mut seen = FxHashSet::default();
        let mut indexed = Vec::with_capacity(baskets.len());
        for basket in baskets {
            if !seen.insert(*basket) {
                return Err(Error::DuplicateBasket(*basket));
            }
            let index = state.ledger.index_of(basket)?;
            state.require_settled(basket)?;
            indexed.push((index, *basket));
        }
        indexed.sort_unstable();

        let engine = self.engine();
        let limit = state.config.weight_deviation_limit;
        let mut included = Vec::new();
        let mut snapshots = Vec::new();
        let mut skipped = Vec::new();
        for (index, basket) in indexed {
            let snapshot = state.ledger.snapshot(&basket, self.assets.as_ref())?;
            if engine.needs_rebalance(&snapshot, limit)? {
                included.push((index, basket));
                snapshots.push(snapshot);
            } else {
                skipped.push(basket);
            }
        }
        if included.is_empty() {
            return Err(Error::NoRebalanceRequired);
        }

        let basket_mask = BitFlag::from_indices(included.iter().map(|(i, _)| *i))?;
        let addresses: Vec<Address> = included.into_iter().map(|(_, b)| b).collect();
        let hash = basket_set_hash(&snapshots);
        let now = self.clock.now();
        let epoch = state.slot.begin(basket_mask, addresses.clone(), hash, now)?;

        log::info!(
            "epoch {epoch}: proposed rebalance of {} baskets ({} skipped)",
            addresses.len(),
            skipped.len()
        );
        self.publish(RebalanceEvent::RebalanceProposed {
            epoch,
            baskets: addresses.clone(),
            basket_mask,
            basket_set_hash: hash,
        });
        Ok(ProposalSummary {
            epoch,
            baskets: addresses,
            skipped,
            basket_mask,
            basket_set_hash: hash,
        })
    }

    /// The netted trade plan for the active epoch. Read-only.
    pub fn plan_trades(&self) -> Result<TradePlan> {
        let state = self.state.enter()?;
        let snapshots = self.epoch_snapshots(&state)?;
        let netter = TradeNetter::new(self.engine(), state.config.netting_params());
        Ok(netter.plan_trades(&snapshots)?)
    }

    /// Risk report for a candidate proposal against the active epoch.
    pub fn check_trades(
        &self,
        internal: &[InternalTrade],
        external: &[ExternalTrade],
    ) -> Result<RiskReport> {
        let state = self.state.enter()?;
        let snapshots = self.epoch_snapshots(&state)?;
        self.risk_report(&state, &snapshots, internal, external)
    }

    fn risk_report(
        &self,
        state: &ManagerState,
        snapshots: &[BasketSnapshot],
        internal: &[InternalTrade],
        external: &[ExternalTrade],
    ) -> Result<RiskReport> {
        let risk = RiskEngine::try_new(state.config.risk_config()).map_err(Error::Config)?;
        Ok(risk.check_proposal(snapshots, internal, external, &self.engine())?)
    }

    /// Commit internal and external trades for the active epoch.
    ///
    /// The proposal must equal the netted plan for the committed basket set
    /// and pass every risk check. Internal trades are priced now and applied
    /// at execution.
    pub fn propose_token_swap(
        &self,
        caller: &Address,
        internal: Vec<InternalTrade>,
        external: Vec<ExternalTrade>,
    ) -> Result<StepOutcome> {
        let mut state = self.enter_unpaused(caller, Capability::TokenSwapProposer)?;
        state.require(RebalanceStatus::RebalanceProposed)?;
        let now = self.clock.now();
        if let Some(outcome) = self.retry_if_elapsed(&mut state, now) {
            return Ok(outcome);
        }
        if internal.is_empty() && external.is_empty() {
            return Err(Error::EmptyTradeSet);
        }

        let snapshots = self.epoch_snapshots(&state)?;
        let netter = TradeNetter::new(self.engine(), state.config.netting_params());
        let plan = netter.plan_trades(&snapshots)?;
        if plan.internal != internal || plan.external != external {
            return Err(Error::TradesMismatch);
        }
        check_ownership(&snapshots, &external)?;

        let report = self.risk_report(&state, &snapshots, &internal, &external)?;
        if report.has_failures() {
            log::warn!("trade proposal rejected: {}", report.failure_summary());
            return Err(Error::RiskFailed(report.failure_summary()));
        }

        let swap_fee = state.config.swap_fee;
        let settlements = internal
            .iter()
            .map(|t| settle_internal(t, self.prices.as_ref(), swap_fee))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let external_hash = external_trades_hash(&external);
        state
            .slot
            .propose_trades(internal.clone(), settlements, external_hash, now)?;

        let epoch = state.slot.epoch();
        log::info!(
            "epoch {epoch}: proposed {} internal and {} external trades",
            internal.len(),
            external.len()
        );
        self.publish(RebalanceEvent::TokenSwapProposed {
            epoch,
            internal,
            external,
            external_trades_hash: external_hash,
        });
        Ok(StepOutcome::Advanced {
            epoch,
            status: RebalanceStatus::TradesProposed,
        })
    }

    /// Settle internal trades, escrow external sells, and hand the external
    /// trades to the venue.
    pub fn execute_token_swap(
        &self,
        caller: &Address,
        external: &[ExternalTrade],
        venue_data: &[u8],
    ) -> Result<StepOutcome> {
        let mut state = self.enter_unpaused(caller, Capability::TokenSwapExecutor)?;
        state.require(RebalanceStatus::TradesProposed)?;
        let now = self.clock.now();
        if let Some(outcome) = self.retry_if_elapsed(&mut state, now) {
            return Ok(outcome);
        }
        if state.committed_hash() != Some(external_trades_hash(external)) {
            return Err(Error::ExternalTradesHashMismatch);
        }

        let checkpoint = (*state).clone();
        let applied = state
            .slot
            .mark_executed(external.to_vec(), now)
            .map_err(Error::from)
            .and_then(
            |(internal, settlements)| {
                apply_internal(&mut state.ledger, &internal, &settlements)?;
                escrow_external(&mut state.ledger, external)?;
                Ok(internal.len())
            },
        );
        let internal_settled = match applied {
            Ok(n) => n,
            Err(e) => {
                *state = checkpoint;
                return Err(e);
            }
        };

        let adapter = state.adapter.clone();
        if let Err(e) = adapter.execute(external, venue_data) {
            log::warn!("venue {} rejected external trades: {e}", adapter.name());
            *state = checkpoint;
            return Err(e.into());
        }

        let epoch = state.slot.epoch();
        log::info!(
            "epoch {epoch}: settled {internal_settled} internal trades, sent {} to {}",
            external.len(),
            adapter.name()
        );
        self.publish(RebalanceEvent::TokenSwapExecuted {
            epoch,
            external: external.to_vec(),
            internal_settled,
        });
        Ok(StepOutcome::Advanced {
            epoch,
            status: RebalanceStatus::TradesExecuted,
        })
    }

    /// Collect venue results, credit baskets, and close or reopen the epoch.
    pub fn complete_rebalance(
        &self,
        caller: &Address,
        external: &[ExternalTrade],
    ) -> Result<StepOutcome> {
        let mut state = self.enter_unpaused(caller, Capability::RebalanceProposer)?;
        state.require(RebalanceStatus::TradesExecuted)?;
        let now = self.clock.now();
        if let Some(outcome) = self.retry_if_elapsed(&mut state, now) {
            return Ok(outcome);
        }
        if state.committed_hash() != Some(external_trades_hash(external)) {
            return Err(Error::ExternalTradesHashMismatch);
        }

        self.settle_external(&mut state, external)?;

        let active = state.slot.active().cloned().ok_or(Error::NoActiveRebalance)?;
        let retry_limit = state.config.retry_limit;
        if active.retry_count < retry_limit && self.off_target(&state)? {
            let retry_count = state.slot.reopen(now)?;
            log::warn!(
                "epoch {}: targets not met after settlement, retry {retry_count}/{retry_limit}",
                active.epoch
            );
            self.publish(RebalanceEvent::RebalanceRetried {
                epoch: active.epoch,
                retry_count,
                status: RebalanceStatus::RebalanceProposed,
                reason: RetryReason::TargetWeightsNotMet,
            });
            return Ok(StepOutcome::Retried {
                epoch: active.epoch,
                retry_count,
            });
        }

        let done = state.slot.finish()?;
        log::info!("epoch {}: rebalance complete", done.epoch);
        self.publish(RebalanceEvent::RebalanceCompleted {
            epoch: done.epoch,
            baskets: done.baskets,
        });
        Ok(StepOutcome::Advanced {
            epoch: done.epoch,
            status: RebalanceStatus::RebalanceComplete,
        })
    }

    /// Claim `external` from the venue and credit the proceeds to owners.
    /// Leaves the ledger untouched on failure.
    fn settle_external(&self, state: &mut ManagerState, external: &[ExternalTrade]) -> Result<()> {
        if external.is_empty() {
            return Ok(());
        }
        let claims = state.adapter.settle(external)?;
        if claims.len() != external.len() {
            return Err(Error::ClaimsLengthMismatch {
                expected: external.len(),
                got: claims.len(),
            });
        }
        let mut ledger = state.ledger.clone();
        credit_claims(&mut ledger, state.config.swap_fee, external, &claims)?;
        state.ledger = ledger;
        Ok(())
    }

    /// True when some epoch basket still deviates beyond the limit.
    fn off_target(&self, state: &ManagerState) -> Result<bool> {
        let engine = self.engine();
        let limit = state.config.weight_deviation_limit;
        for snapshot in self.epoch_snapshots(state)? {
            match engine.needs_rebalance(&snapshot, limit) {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => {
                    log::warn!("skipping weight check for {}: {e}", snapshot.basket);
                }
            }
        }
        Ok(false)
    }

    /// Advance a stalled epoch whose step window has elapsed.
    pub fn retry(&self, caller: &Address) -> Result<StepOutcome> {
        let mut state = self.enter_unpaused(caller, Capability::RebalanceProposer)?;
        let now = self.clock.now();
        if state.slot.active().is_none() {
            return Err(Error::NoActiveRebalance);
        }
        let step_delay = state.config.step_delay;
        if !state.slot.window_elapsed(now, step_delay) {
            return Err(Error::StepNotTimedOut {
                elapsed: state.slot.elapsed(now).unwrap_or(0),
                step_delay,
            });
        }
        self.apply_retry(&mut state, now)
            .ok_or(Error::NoActiveRebalance)
    }

    fn retry_if_elapsed(&self, state: &mut ManagerState, now: u64) -> Option<StepOutcome> {
        if !state.slot.window_elapsed(now, state.config.step_delay) {
            return None;
        }
        self.apply_retry(state, now)
    }

    fn apply_retry(&self, state: &mut ManagerState, now: u64) -> Option<StepOutcome> {
        match state.slot.retry(now, state.config.retry_limit)? {
            RetryOutcome::Retried {
                epoch,
                retry_count,
                status,
            } => {
                log::warn!("epoch {epoch}: step timed out, retry {retry_count} from {status}");
                self.publish(RebalanceEvent::RebalanceRetried {
                    epoch,
                    retry_count,
                    status,
                    reason: RetryReason::StepTimedOut,
                });
                Some(StepOutcome::Retried { epoch, retry_count })
            }
            RetryOutcome::Aborted(active) => {
                let in_flight = active.phase.executed_trades();
                if !in_flight.is_empty() {
                    self.settle_aborted(state, active.epoch, in_flight);
                }
                log::warn!(
                    "epoch {}: aborted after {} retries",
                    active.epoch,
                    active.retry_count
                );
                self.publish(RebalanceEvent::RebalanceAborted {
                    epoch: active.epoch,
                    baskets: active.baskets,
                    retry_count: active.retry_count,
                });
                Some(StepOutcome::Aborted {
                    epoch: active.epoch,
                })
            }
        }
    }

    /// Credit what the venue returns for an aborted epoch's trades, or park
    /// them as unsettled with their sell legs still escrowed.
    fn settle_aborted(&self, state: &mut ManagerState, epoch: u64, external: &[ExternalTrade]) {
        match self.settle_external(state, external) {
            Ok(()) => {
                log::info!(
                    "epoch {epoch}: settled {} external trades on abort",
                    external.len()
                );
                self.publish(RebalanceEvent::ExternalTradesSettled {
                    epoch,
                    trades: external.len(),
                });
            }
            Err(e) => {
                log::warn!("epoch {epoch}: external trades left unsettled on abort: {e}");
                state.unsettled.push(UnsettledBatch {
                    epoch,
                    external: external.to_vec(),
                });
                self.publish(RebalanceEvent::ExternalTradesUnsettled {
                    epoch,
                    trades: external.len(),
                });
            }
        }
    }

    /// Retry settlement of trades left behind by aborted epochs, oldest
    /// first. Returns how many batches were credited; stops at the first
    /// failure and keeps it and everything after it.
    pub fn claim_unsettled(&self, caller: &Address) -> Result<usize> {
        let mut state = self.enter_unpaused(caller, Capability::RebalanceProposer)?;
        let mut claimed = 0;
        while let Some(batch) = state.unsettled.first().cloned() {
            self.settle_external(&mut state, &batch.external)?;
            state.unsettled.remove(0);
            claimed += 1;
            log::info!("epoch {}: claimed unsettled external trades", batch.epoch);
            self.publish(RebalanceEvent::ExternalTradesSettled {
                epoch: batch.epoch,
                trades: batch.external.len(),
            });
        }
        Ok(claimed)
    }

    // ====================================================================
    // Baskets and balances
    // ====================================================================

    /// Register a basket over `bit_flag`, valued in `base_asset`.
    pub fn create_basket(
        &self,
        caller: &Address,
        name: &str,
        symbol: &str,
        base_asset: Address,
        bit_flag: BitFlag,
        strategy: Arc<dyn WeightStrategy>,
    ) -> Result<Address> {
        let mut state = self.enter_unpaused(caller, Capability::Manager)?;
        if bit_flag.is_empty() {
            return Err(basketbook::BitFlagError::Empty.into());
        }
        self.assets.assets_for(&bit_flag)?;
        match self.assets.index_of(&base_asset) {
            Some(i) if bit_flag.contains(i) => {}
            _ => return Err(Error::BaseAssetNotInUniverse(base_asset)),
        }
        if !strategy.supports_bit_flag(&bit_flag) {
            return Err(Error::BitFlagUnsupportedByStrategy);
        }

        let management_fee = state.config.management_fee;
        let basket = state.ledger.insert(NewBasket {
            name: name.to_string(),
            symbol: symbol.to_string(),
            base_asset,
            bit_flag,
            strategy,
            management_fee,
        })?;
        let address = basket.address;
        let event = RebalanceEvent::BasketCreated {
            basket: address,
            name: basket.name.clone(),
            symbol: basket.symbol.clone(),
            base_asset,
            bit_flag,
            strategy: basket.strategy.id(),
        };
        log::info!("created basket {symbol} at {address} over {bit_flag}");
        self.publish(event);
        Ok(address)
    }

    /// Widen a basket's asset universe between epochs.
    pub fn update_bit_flag(&self, caller: &Address, basket: &Address, bit_flag: BitFlag) -> Result<()> {
        let mut state = self.enter_unpaused(caller, Capability::Manager)?;
        state.require_basket_idle(basket)?;
        let current = state.ledger.basket(basket)?;
        if current.bit_flag == bit_flag {
            return Err(Error::BitFlagMustBeDifferent);
        }
        if !bit_flag.is_superset_of(&current.bit_flag) {
            return Err(Error::BitFlagMustIncludeCurrent);
        }
        self.assets.assets_for(&bit_flag)?;
        if !current.strategy.supports_bit_flag(&bit_flag) {
            return Err(Error::BitFlagUnsupportedByStrategy);
        }
        let old = state.ledger.set_bit_flag(basket, bit_flag)?;
        log::info!("basket {basket}: bit flag {old} -> {bit_flag}");
        self.publish(RebalanceEvent::BasketBitFlagUpdated {
            basket: *basket,
            old,
            new: bit_flag,
        });
        Ok(())
    }

    /// Credit a deposit of `asset`, which must be in the basket's universe.
    pub fn record_deposit(
        &self,
        caller: &Address,
        basket: &Address,
        asset: Address,
        amount: u128,
    ) -> Result<()> {
        let mut state = self.enter_unpaused(caller, Capability::BasketToken)?;
        state.require_basket_idle(basket)?;
        let bit_flag = state.ledger.basket(basket)?.bit_flag;
        match self.assets.index_of(&asset) {
            Some(i) if bit_flag.contains(i) => {}
            _ => return Err(basketbook::BitFlagError::UnknownAsset(asset).into()),
        }
        state.ledger.credit(basket, &asset, amount)?;
        log::debug!("basket {basket}: deposit of {amount}");
        self.publish(RebalanceEvent::Deposited {
            basket: *basket,
            asset,
            amount,
        });
        Ok(())
    }

    /// Withdraw `burned_shares / total_supply_before` of every holding.
    pub fn pro_rata_redeem(
        &self,
        caller: &Address,
        basket: &Address,
        total_supply_before: u128,
        burned_shares: u128,
    ) -> Result<Vec<(Address, u128)>> {
        let mut state = self.enter_unpaused(caller, Capability::BasketToken)?;
        state.require_basket_idle(basket)?;
        if total_supply_before == 0 || burned_shares == 0 || burned_shares > total_supply_before {
            return Err(Error::InvalidRedemption(format!(
                "cannot burn {burned_shares} of {total_supply_before} shares"
            )));
        }
        let bit_flag = state.ledger.basket(basket)?.bit_flag;
        let assets = self.assets.assets_for(&bit_flag)?;

        let mut amounts = Vec::with_capacity(assets.len());
        for asset in assets {
            let balance = state.ledger.balance_of(basket, &asset);
            amounts.push((asset, mul_div(balance, burned_shares, total_supply_before)?));
        }
        for (asset, amount) in &amounts {
            state.ledger.debit(basket, asset, *amount)?;
        }
        self.publish(RebalanceEvent::Redeemed {
            basket: *basket,
            amounts: amounts.clone(),
        });
        Ok(amounts)
    }

    /// Pay out and reset the swap fees accrued in `asset`.
    pub fn collect_swap_fee(&self, caller: &Address, asset: &Address) -> Result<u128> {
        let mut state = self.enter(caller, Capability::Manager)?;
        let amount = state.ledger.take_fees(asset);
        if amount > 0 {
            log::info!("collected {amount} of {asset} in swap fees");
            self.publish(RebalanceEvent::SwapFeeCollected {
                asset: *asset,
                amount,
            });
        }
        Ok(amount)
    }

    // ====================================================================
    // Parameters
    // ====================================================================

    fn set_parameter<T>(
        &self,
        caller: &Address,
        capability: Capability,
        name: &'static str,
        value: T,
        check: fn(T) -> Result<()>,
        field: fn(&mut ManagerConfig) -> &mut T,
    ) -> Result<()>
    where
        T: Copy + fmt::Display,
    {
        let mut state = self.enter(caller, capability)?;
        self.write_parameter(&mut state, name, value, check, field)
    }

    /// Validate and store one parameter while the guard is held.
    fn write_parameter<T>(
        &self,
        state: &mut ManagerState,
        name: &'static str,
        value: T,
        check: fn(T) -> Result<()>,
        field: fn(&mut ManagerConfig) -> &mut T,
    ) -> Result<()>
    where
        T: Copy + fmt::Display,
    {
        check(value)?;
        let old = std::mem::replace(field(&mut state.config), value);
        log::info!("{name}: {old} -> {value}");
        self.publish(RebalanceEvent::ParameterSet {
            name,
            old: old.to_string(),
            new: value.to_string(),
        });
        Ok(())
    }

    pub fn set_retry_limit(&self, caller: &Address, value: u8) -> Result<()> {
        self.set_parameter(
            caller,
            Capability::Manager,
            "retry_limit",
            value,
            config::check_retry_limit,
            |c| &mut c.retry_limit,
        )
    }

    pub fn set_step_delay(&self, caller: &Address, value: u64) -> Result<()> {
        self.set_parameter(
            caller,
            Capability::Manager,
            "step_delay",
            value,
            config::check_step_delay,
            |c| &mut c.step_delay,
        )
    }

    pub fn set_slippage_limit(&self, caller: &Address, value: u128) -> Result<()> {
        self.set_parameter(
            caller,
            Capability::Manager,
            "slippage_limit",
            value,
            config::check_slippage_limit,
            |c| &mut c.slippage_limit,
        )
    }

    pub fn set_weight_deviation_limit(&self, caller: &Address, value: u128) -> Result<()> {
        self.set_parameter(
            caller,
            Capability::Manager,
            "weight_deviation_limit",
            value,
            config::check_weight_deviation,
            |c| &mut c.weight_deviation_limit,
        )
    }

    /// Default management fee for baskets created afterwards.
    pub fn set_management_fee(&self, caller: &Address, value: u16) -> Result<()> {
        self.set_parameter(
            caller,
            Capability::Manager,
            "management_fee",
            value,
            config::check_management_fee,
            |c| &mut c.management_fee,
        )
    }

    pub fn set_basket_management_fee(&self, caller: &Address, basket: &Address, value: u16) -> Result<()> {
        let mut state = self.enter(caller, Capability::Manager)?;
        config::check_management_fee(value)?;
        let entry = state.ledger.basket_mut(basket)?;
        let old = std::mem::replace(&mut entry.management_fee, value);
        self.publish(RebalanceEvent::ManagementFeeSet {
            basket: *basket,
            old,
            new: value,
        });
        Ok(())
    }

    /// Change the swap fee. Rejected during an epoch, since proposed trades
    /// were priced with the old fee.
    pub fn set_swap_fee(&self, caller: &Address, value: u16) -> Result<()> {
        let mut state = self.enter(caller, Capability::Timelock)?;
        state.require_idle()?;
        self.write_parameter(
            &mut state,
            "swap_fee",
            value,
            config::check_swap_fee,
            |c| &mut c.swap_fee,
        )
    }

    /// Replace the trade venue between epochs.
    pub fn set_trade_adapter(&self, caller: &Address, adapter: Arc<dyn TradeAdapter>) -> Result<()> {
        let mut state = self.enter(caller, Capability::Timelock)?;
        state.require_idle()?;
        let old = std::mem::replace(&mut state.adapter, adapter);
        let new = state.adapter.name().to_string();
        log::info!("trade adapter: {} -> {new}", old.name());
        self.publish(RebalanceEvent::ParameterSet {
            name: "trade_adapter",
            old: old.name().to_string(),
            new,
        });
        Ok(())
    }

    pub fn pause(&self, caller: &Address) -> Result<()> {
        let mut state = self.enter_unpaused(caller, Capability::Pauser)?;
        state.paused = true;
        log::warn!("protocol paused by {caller}");
        self.publish(RebalanceEvent::Paused { by: *caller });
        Ok(())
    }

    pub fn unpause(&self, caller: &Address) -> Result<()> {
        let mut state = self.enter(caller, Capability::Admin)?;
        if !state.paused {
            return Err(Error::ExpectedPause);
        }
        state.paused = false;
        log::info!("protocol unpaused by {caller}");
        self.publish(RebalanceEvent::Unpaused { by: *caller });
        Ok(())
    }

    // ====================================================================
    // Views
    // ====================================================================

    pub fn status(&self) -> Result<RebalanceStatus> {
        Ok(self.state.enter()?.slot.status())
    }

    /// Latest epoch number handed out.
    pub fn epoch(&self) -> Result<u64> {
        Ok(self.state.enter()?.slot.epoch())
    }

    pub fn active_rebalance(&self) -> Result<Option<ActiveRebalance>> {
        Ok(self.state.enter()?.slot.active().cloned())
    }

    pub fn config(&self) -> Result<ManagerConfig> {
        Ok(self.state.enter()?.config)
    }

    pub fn is_paused(&self) -> Result<bool> {
        Ok(self.state.enter()?.paused)
    }

    pub fn baskets(&self) -> Result<Vec<BasketInfo>> {
        let state = self.state.enter()?;
        Ok(state.ledger.baskets().iter().map(|b| b.info()).collect())
    }

    pub fn basket(&self, basket: &Address) -> Result<BasketInfo> {
        Ok(self.state.enter()?.ledger.basket(basket)?.info())
    }

    pub fn basket_balance_of(&self, basket: &Address, asset: &Address) -> Result<u128> {
        let state = self.state.enter()?;
        state.ledger.basket(basket)?;
        Ok(state.ledger.balance_of(basket, asset))
    }

    pub fn snapshot(&self, basket: &Address) -> Result<BasketSnapshot> {
        let state = self.state.enter()?;
        state.ledger.snapshot(basket, self.assets.as_ref())
    }

    pub fn collected_swap_fees(&self, asset: &Address) -> Result<u128> {
        Ok(self.state.enter()?.ledger.swap_fees(asset))
    }

    /// External trades of aborted epochs still awaiting settlement.
    pub fn unsettled(&self) -> Result<Vec<UnsettledBatch>> {
        Ok(self.state.enter()?.unsettled.clone())
    }
}

/// Every external trade is owned by epoch baskets only, with fractions
/// summing to exactly one and owner amounts summing to the sell amount.
fn check_ownership(snapshots: &[BasketSnapshot], external: &[ExternalTrade]) -> Result<()> {
    let members: FxHashSet<Address> = snapshots.iter().map(|s| s.basket).collect();
    for (i, trade) in external.iter().enumerate() {
        if trade.ownership.is_empty() {
            return Err(Error::InvalidOwnership(format!("trade {i} has no owners")));
        }
        if let Some(outsider) = trade.ownership.iter().find(|s| !members.contains(&s.basket)) {
            return Err(Error::InvalidOwnership(format!(
                "trade {i} owner {} is not in the epoch",
                outsider.basket
            )));
        }
        if trade.ownership_total() != WAD {
            return Err(Error::InvalidOwnership(format!(
                "trade {i} fractions sum to {}",
                trade.ownership_total()
            )));
        }
        if trade.owned_total() != trade.sell_amount {
            return Err(Error::InvalidOwnership(format!(
                "trade {i} owners sell {} of {}",
                trade.owned_total(),
                trade.sell_amount
            )));
        }
    }
    Ok(())
}

/// Move internal trade amounts between baskets and accrue both fee halves.
fn apply_internal(
    ledger: &mut BasketLedger,
    trades: &[InternalTrade],
    settlements: &[InternalSettlement],
) -> Result<()> {
    for (trade, s) in trades.iter().zip(settlements) {
        ledger.debit(&trade.from_basket, &trade.sell_asset, s.sell_amount)?;
        ledger.debit(&trade.to_basket, &trade.buy_asset, s.initial_buy)?;
        ledger.credit(&trade.from_basket, &trade.buy_asset, s.net_buy)?;
        ledger.credit(&trade.to_basket, &trade.sell_asset, s.net_sell)?;
        ledger.accrue_fee(&trade.sell_asset, s.fee_on_sell)?;
        ledger.accrue_fee(&trade.buy_asset, s.fee_on_buy)?;
    }
    Ok(())
}

/// Return unsold amounts and credit proceeds, net of the buy-side fee half,
/// to each trade's owners pro rata.
fn credit_claims(
    ledger: &mut BasketLedger,
    swap_fee: u16,
    external: &[ExternalTrade],
    claims: &[ClaimedAmounts],
) -> Result<()> {
    for (trade, claim) in external.iter().zip(claims) {
        if claim.sell > trade.sell_amount {
            return Err(Error::Venue(VenueError::SettlementFailed(format!(
                "returned {} unsold of {}",
                claim.sell, trade.sell_amount
            ))));
        }
        for (basket, amount) in trade.split_amount(claim.sell)? {
            ledger.credit(&basket, &trade.sell_asset, amount)?;
        }
        let fee = half_fee(claim.buy, swap_fee)?;
        ledger.accrue_fee(&trade.buy_asset, fee)?;
        for (basket, amount) in trade.split_amount(claim.buy - fee)? {
            ledger.credit(&basket, &trade.buy_asset, amount)?;
        }
    }
    Ok(())
}

/// Debit each owner's sell leg of every external trade.
fn escrow_external(ledger: &mut BasketLedger, trades: &[ExternalTrade]) -> Result<()> {
    for trade in trades {
        for (basket, amount) in trade.sell_legs() {
            ledger.debit(&basket, &trade.sell_asset, amount)?;
        }
    }
    Ok(())
}
