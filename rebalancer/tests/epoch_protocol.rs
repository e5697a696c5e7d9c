//! Integration tests for the rebalance epoch protocol.

use std::sync::{Arc, Mutex, OnceLock, Weak};

use basketbook::{
    Address, BitFlag, ManagedWeightStrategy, ManualClock, PriceGuard, PriceTable,
    StaticAssetRegistry, WAD,
};
use basketbook_rebalancer::auth::{Capability, RoleTable};
use basketbook_rebalancer::config::ManagerConfig;
use basketbook_rebalancer::epoch::RebalanceStatus;
use basketbook_rebalancer::error::{Error, ErrorKind};
use basketbook_rebalancer::audit::AuditLog;
use basketbook_rebalancer::events::{EventSink, MemorySink, RebalanceEvent, RetryReason};
use basketbook_rebalancer::manager::{RebalanceManager, StepOutcome};
use basketbook_rebalancer::scenario::asset_address;
use basketbook_venue::TradeAdapter;
use basketbook_venue::mock::{FillMode, MockAdapter};

const HALF: u64 = (WAD / 2) as u64;
const START: u64 = 1_000;

fn x() -> Address {
    Address::repeat_byte(1)
}
fn y() -> Address {
    Address::repeat_byte(2)
}
fn usd() -> Address {
    Address::repeat_byte(3)
}
fn ops() -> Address {
    Address::repeat_byte(0xee)
}

fn config() -> ManagerConfig {
    ManagerConfig {
        retry_limit: 2,
        step_delay: 3_600,
        slippage_limit: WAD / 200,
        weight_deviation_limit: WAD / 20,
        swap_fee: 0,
        management_fee: 0,
    }
}

struct World {
    manager: Arc<RebalanceManager>,
    clock: Arc<ManualClock>,
    anchor: Arc<PriceTable>,
    roles: Arc<RoleTable>,
    events: Arc<MemorySink>,
}

fn world_with(config: ManagerConfig, venue: Arc<dyn TradeAdapter>) -> World {
    build_world(config, venue, None)
}

fn build_world(
    config: ManagerConfig,
    venue: Arc<dyn TradeAdapter>,
    extra_sink: Option<Arc<dyn EventSink>>,
) -> World {
    let clock = Arc::new(ManualClock::new(START));
    let primary = Arc::new(PriceTable::new(clock.clone()));
    let anchor = Arc::new(PriceTable::new(clock.clone()));
    for asset in [x(), y(), usd()] {
        primary.set_price(asset, WAD);
        anchor.set_price(asset, WAD);
    }
    let guard = PriceGuard::new(primary, anchor.clone(), WAD / 100).unwrap();
    let roles = Arc::new(RoleTable::with_all(ops()));
    let events = Arc::new(MemorySink::new());
    let mut builder = RebalanceManager::builder(config)
        .prices(Arc::new(guard))
        .assets(Arc::new(StaticAssetRegistry::new(vec![x(), y(), usd()]).unwrap()))
        .authorizer(roles.clone())
        .adapter(venue)
        .clock(clock.clone())
        .sink(events.clone());
    if let Some(sink) = extra_sink {
        builder = builder.sink(sink);
    }
    let manager = builder.build().unwrap();
    World {
        manager: Arc::new(manager),
        clock,
        anchor,
        roles,
        events,
    }
}

fn world() -> World {
    world_with(config(), Arc::new(MockAdapter::builder().build()))
}

impl World {
    /// A 50/50 basket over two universe indices, valued in `base`.
    fn basket(&self, name: &str, indices: [usize; 2], base: Address, holdings: &[(Address, u128)]) -> Address {
        self.weighted_basket(name, indices, [HALF, HALF], base, holdings)
    }

    fn weighted_basket(
        &self,
        name: &str,
        indices: [usize; 2],
        weights: [u64; 2],
        base: Address,
        holdings: &[(Address, u128)],
    ) -> Address {
        let flag = BitFlag::from_indices(indices).unwrap();
        let strategy = ManagedWeightStrategy::new(asset_address(&format!("strategy:{name}")));
        strategy
            .set_target_weights(flag, weights.to_vec(), START)
            .unwrap();
        let basket = self
            .manager
            .create_basket(&ops(), name, name, base, flag, Arc::new(strategy))
            .unwrap();
        for &(asset, amount) in holdings {
            self.manager
                .record_deposit(&ops(), &basket, asset, amount)
                .unwrap();
        }
        basket
    }

    /// A holds only X, B holds only Y; both target 50/50 X/Y.
    fn opposed_pair(&self, amount: u128) -> (Address, Address) {
        let a = self.basket("A", [0, 1], x(), &[(x(), amount)]);
        let b = self.basket("B", [0, 1], x(), &[(y(), amount)]);
        (a, b)
    }

    /// C holds only USD and targets 50/50 USD/X.
    fn lone(&self) -> Address {
        self.basket("C", [0, 2], usd(), &[(usd(), 1_000_000)])
    }

    fn balance(&self, basket: &Address, asset: Address) -> u128 {
        self.manager.basket_balance_of(basket, &asset).unwrap()
    }

    /// Propose the netted plan and execute it.
    fn through_execute(&self, baskets: &[Address]) -> Vec<basketbook::ExternalTrade> {
        let m = &self.manager;
        m.propose_rebalance(&ops(), baskets).unwrap();
        let plan = m.plan_trades().unwrap();
        m.propose_token_swap(&ops(), plan.internal, plan.external.clone())
            .unwrap();
        m.execute_token_swap(&ops(), &plan.external, b"route")
            .unwrap();
        plan.external
    }
}

// ============================================================================
// Full epochs
// ============================================================================

#[test]
fn opposed_baskets_net_internally() {
    let w = world();
    let (a, b) = w.opposed_pair(1_000);
    let m = &w.manager;

    let proposal = m.propose_rebalance(&ops(), &[b, a]).unwrap();
    assert_eq!(proposal.epoch, 1);
    assert_eq!(proposal.baskets, vec![a, b]);
    assert_eq!(m.status().unwrap(), RebalanceStatus::RebalanceProposed);

    let plan = m.plan_trades().unwrap();
    assert!(plan.external.is_empty());
    assert_eq!(plan.internal.len(), 1);
    let t = &plan.internal[0];
    assert_eq!((t.from_basket, t.to_basket), (a, b));
    assert_eq!((t.sell_asset, t.buy_asset, t.sell_amount), (x(), y(), 500));

    let step = m
        .propose_token_swap(&ops(), plan.internal.clone(), vec![])
        .unwrap();
    assert_eq!(
        step,
        StepOutcome::Advanced {
            epoch: 1,
            status: RebalanceStatus::TradesProposed
        }
    );
    m.execute_token_swap(&ops(), &[], &[]).unwrap();
    assert_eq!(w.balance(&a, x()), 500);
    assert_eq!(w.balance(&a, y()), 500);
    assert_eq!(w.balance(&b, x()), 500);
    assert_eq!(w.balance(&b, y()), 500);

    let done = m.complete_rebalance(&ops(), &[]).unwrap();
    assert_eq!(
        done,
        StepOutcome::Advanced {
            epoch: 1,
            status: RebalanceStatus::RebalanceComplete
        }
    );
    assert_eq!(m.status().unwrap(), RebalanceStatus::NotStarted);
    assert!(m.active_rebalance().unwrap().is_none());
}

#[test]
fn internal_swap_fee_accrues_on_both_legs() {
    let w = world_with(
        ManagerConfig {
            swap_fee: 10,
            ..config()
        },
        Arc::new(MockAdapter::builder().build()),
    );
    let (a, b) = w.opposed_pair(1_000_000);
    w.through_execute(&[a, b]);

    // 500_000 * 10 / 20_000 per leg.
    assert_eq!(w.balance(&a, y()), 499_750);
    assert_eq!(w.balance(&b, x()), 499_750);
    assert_eq!(w.manager.collected_swap_fees(&x()).unwrap(), 250);
    assert_eq!(w.manager.collected_swap_fees(&y()).unwrap(), 250);

    // Each asset is conserved.
    let total_x = w.balance(&a, x()) + w.balance(&b, x()) + 250;
    assert_eq!(total_x, 1_000_000);

    assert_eq!(w.manager.collect_swap_fee(&ops(), &x()).unwrap(), 250);
    assert_eq!(w.manager.collected_swap_fees(&x()).unwrap(), 0);
}

#[test]
fn residual_goes_through_venue() {
    let venue = Arc::new(MockAdapter::builder().build());
    let w = world_with(config(), venue.clone());
    let c = w.lone();

    let external = w.through_execute(&[c]);
    assert_eq!(external.len(), 1);
    assert_eq!(external[0].sell_amount, 500_000);
    assert_eq!(external[0].min_amount, 497_500);
    assert_eq!(w.balance(&c, usd()), 500_000);
    assert_eq!(venue.executions().len(), 1);
    assert_eq!(venue.executions()[0].venue_data, b"route".to_vec());

    let done = w.manager.complete_rebalance(&ops(), &external).unwrap();
    assert!(matches!(
        done,
        StepOutcome::Advanced {
            status: RebalanceStatus::RebalanceComplete,
            ..
        }
    ));
    assert_eq!(w.balance(&c, x()), 497_500);
    assert!(!venue.has_pending());

    let names: Vec<&str> = w.events.events().iter().map(|e| e.name()).collect();
    assert_eq!(
        &names[names.len() - 4..],
        &[
            "rebalance_proposed",
            "token_swap_proposed",
            "token_swap_executed",
            "rebalance_completed"
        ]
    );
}

#[test]
fn partial_fill_reopens_epoch() {
    let w = world_with(
        config(),
        Arc::new(
            MockAdapter::builder()
                .fill_mode(FillMode::ImmediatePartial(5_000))
                .build(),
        ),
    );
    let c = w.lone();
    let external = w.through_execute(&[c]);

    let step = w.manager.complete_rebalance(&ops(), &external).unwrap();
    assert_eq!(
        step,
        StepOutcome::Retried {
            epoch: 1,
            retry_count: 1
        }
    );
    assert_eq!(w.manager.status().unwrap(), RebalanceStatus::RebalanceProposed);
    // Half sold: the unsold half came back.
    assert_eq!(w.balance(&c, usd()), 750_000);
    assert_eq!(w.balance(&c, x()), 248_750);
    assert!(w.events.events().iter().any(|e| matches!(
        e,
        RebalanceEvent::RebalanceRetried {
            reason: RetryReason::TargetWeightsNotMet,
            ..
        }
    )));

    // The same epoch plans the remainder.
    let plan = w.manager.plan_trades().unwrap();
    assert_eq!(plan.external.len(), 1);
    assert_eq!(w.manager.epoch().unwrap(), 1);
}

#[test]
fn pooled_exit_escrows_each_owners_leg() {
    let w = world();
    // Both baskets drop X entirely and pool one external sell of 3_000_000.
    let a = w.weighted_basket("A", [0, 1], [0, WAD as u64], x(), &[(x(), 1_000_000)]);
    let b = w.weighted_basket("B", [0, 1], [0, WAD as u64], x(), &[(x(), 2_000_000)]);

    let external = w.through_execute(&[a, b]);
    assert_eq!(external.len(), 1);
    assert_eq!(external[0].sell_amount, 3_000_000);
    assert_eq!(
        external[0].sell_legs().collect::<Vec<_>>(),
        vec![(a, 1_000_000), (b, 2_000_000)]
    );
    assert_eq!(w.balance(&a, x()), 0);
    assert_eq!(w.balance(&b, x()), 0);

    let done = w.manager.complete_rebalance(&ops(), &external).unwrap();
    assert!(matches!(
        done,
        StepOutcome::Advanced {
            status: RebalanceStatus::RebalanceComplete,
            ..
        }
    ));
    // 2_985_000 received, split by fraction.
    assert_eq!(w.balance(&a, y()), 994_999);
    assert_eq!(w.balance(&b, y()), 1_990_001);
}

// ============================================================================
// Sequencing
// ============================================================================

#[test]
fn second_proposal_must_wait() {
    let w = world();
    let (a, b) = w.opposed_pair(1_000);
    w.manager.propose_rebalance(&ops(), &[a, b]).unwrap();
    let err = w.manager.propose_rebalance(&ops(), &[a]).unwrap_err();
    assert!(matches!(err, Error::MustWaitForRebalanceToComplete));
    assert_eq!(err.kind(), ErrorKind::Sequencing);
    assert_eq!(w.manager.epoch().unwrap(), 1);
}

#[test]
fn proposal_input_checks() {
    let w = world();
    let (a, _) = w.opposed_pair(1_000);
    let m = &w.manager;
    assert!(matches!(
        m.propose_rebalance(&ops(), &[]),
        Err(Error::EmptyBasketSet)
    ));
    assert!(matches!(
        m.propose_rebalance(&ops(), &[a, a]),
        Err(Error::DuplicateBasket(_))
    ));
    assert!(matches!(
        m.propose_rebalance(&ops(), &[Address::ZERO]),
        Err(Error::BasketNotFound(_))
    ));
}

#[test]
fn balanced_baskets_are_skipped() {
    let w = world();
    let (a, _) = w.opposed_pair(1_000);
    let even = w.basket("E", [0, 1], x(), &[(x(), 500), (y(), 500)]);
    let empty = w.basket("Z", [1, 2], y(), &[]);
    let m = &w.manager;

    assert!(matches!(
        m.propose_rebalance(&ops(), &[even, empty]),
        Err(Error::NoRebalanceRequired)
    ));
    let proposal = m.propose_rebalance(&ops(), &[even, a]).unwrap();
    assert_eq!(proposal.baskets, vec![a]);
    assert_eq!(proposal.skipped, vec![even]);
    assert!(proposal.basket_mask.contains(0));
}

#[test]
fn execute_twice_is_rejected() {
    let w = world();
    let (a, b) = w.opposed_pair(1_000);
    w.through_execute(&[a, b]);
    let before = (w.balance(&a, x()), w.balance(&b, y()));

    let err = w.manager.execute_token_swap(&ops(), &[], &[]).unwrap_err();
    assert!(matches!(err, Error::WrongState(_)));
    assert_eq!((w.balance(&a, x()), w.balance(&b, y())), before);
}

#[test]
fn proposal_must_match_plan() {
    let w = world();
    let c = w.lone();
    let m = &w.manager;
    m.propose_rebalance(&ops(), &[c]).unwrap();
    let plan = m.plan_trades().unwrap();

    assert!(matches!(
        m.propose_token_swap(&ops(), vec![], vec![]),
        Err(Error::EmptyTradeSet)
    ));
    let mut tampered = plan.external.clone();
    tampered[0].sell_amount += 1;
    assert!(matches!(
        m.propose_token_swap(&ops(), vec![], tampered),
        Err(Error::TradesMismatch)
    ));
    assert_eq!(m.status().unwrap(), RebalanceStatus::RebalanceProposed);

    m.propose_token_swap(&ops(), vec![], plan.external.clone())
        .unwrap();
    let mut other = plan.external.clone();
    other[0].min_amount -= 1;
    assert!(matches!(
        m.execute_token_swap(&ops(), &other, &[]),
        Err(Error::ExternalTradesHashMismatch)
    ));
}

#[test]
fn changed_weights_break_basket_set_hash() {
    let w = world();
    let flag = BitFlag::from_indices([0, 2]).unwrap();
    let strategy = Arc::new(ManagedWeightStrategy::new(Address::repeat_byte(0x77)));
    strategy
        .set_target_weights(flag, vec![HALF, HALF], START)
        .unwrap();
    let c = w
        .manager
        .create_basket(&ops(), "C", "C", usd(), flag, strategy.clone())
        .unwrap();
    w.manager
        .record_deposit(&ops(), &c, usd(), 1_000_000)
        .unwrap();
    w.manager.propose_rebalance(&ops(), &[c]).unwrap();

    let quarter = (WAD / 4) as u64;
    strategy
        .set_target_weights(flag, vec![quarter, 3 * quarter], START + 1)
        .unwrap();
    assert!(matches!(
        w.manager.plan_trades(),
        Err(Error::BasketSetHashMismatch)
    ));
}

// ============================================================================
// Retries
// ============================================================================

#[test]
fn stalled_epoch_aborts_after_retry_limit() {
    let w = world();
    let (a, b) = w.opposed_pair(1_000);
    let m = &w.manager;
    m.propose_rebalance(&ops(), &[a, b]).unwrap();

    assert!(matches!(
        m.retry(&ops()),
        Err(Error::StepNotTimedOut { .. })
    ));
    w.clock.advance(3_601);
    assert_eq!(
        m.retry(&ops()).unwrap(),
        StepOutcome::Retried {
            epoch: 1,
            retry_count: 1
        }
    );
    w.clock.advance(3_601);
    assert_eq!(
        m.retry(&ops()).unwrap(),
        StepOutcome::Retried {
            epoch: 1,
            retry_count: 2
        }
    );
    w.clock.advance(3_601);
    assert_eq!(m.retry(&ops()).unwrap(), StepOutcome::Aborted { epoch: 1 });
    assert_eq!(m.status().unwrap(), RebalanceStatus::NotStarted);
    assert!(matches!(m.retry(&ops()), Err(Error::NoActiveRebalance)));

    // The baskets are free again.
    m.record_deposit(&ops(), &a, x(), 1).unwrap();
    assert_eq!(m.propose_rebalance(&ops(), &[a, b]).unwrap().epoch, 2);
}

/// Run the lone basket through execute, then let the epoch time out.
fn abort_after_execute(w: &World) -> (Address, Vec<basketbook::ExternalTrade>) {
    let c = w.lone();
    let external = w.through_execute(&[c]);
    let m = &w.manager;
    for _ in 0..2 {
        w.clock.advance(3_601);
        assert!(matches!(m.retry(&ops()).unwrap(), StepOutcome::Retried { .. }));
        assert_eq!(m.status().unwrap(), RebalanceStatus::TradesExecuted);
    }
    w.clock.advance(3_601);
    assert_eq!(m.retry(&ops()).unwrap(), StepOutcome::Aborted { epoch: 1 });
    assert_eq!(m.status().unwrap(), RebalanceStatus::NotStarted);
    (c, external)
}

#[test]
fn abort_after_execute_settles_escrow() {
    let venue = Arc::new(MockAdapter::builder().build());
    let w = world_with(config(), venue.clone());
    let (c, external) = abort_after_execute(&w);

    assert_eq!(w.balance(&c, usd()), 500_000);
    assert_eq!(w.balance(&c, x()), 497_500);
    assert!(!venue.has_pending());
    assert!(w.manager.unsettled().unwrap().is_empty());
    assert!(matches!(
        w.manager.complete_rebalance(&ops(), &external),
        Err(Error::WrongState(_))
    ));

    let names: Vec<&str> = w.events.events().iter().map(|e| e.name()).collect();
    assert_eq!(
        &names[names.len() - 2..],
        &["external_trades_settled", "rebalance_aborted"]
    );
    w.manager.record_deposit(&ops(), &c, usd(), 1).unwrap();
}

#[test]
fn unsettled_escrow_is_claimed_later() {
    let venue = Arc::new(MockAdapter::builder().settle_failures(1).build());
    let w = world_with(config(), venue.clone());
    let (c, _) = abort_after_execute(&w);
    let m = &w.manager;

    // The sell leg stays escrowed until the venue pays out.
    assert_eq!(w.balance(&c, usd()), 500_000);
    assert_eq!(w.balance(&c, x()), 0);
    assert!(venue.has_pending());
    let parked = m.unsettled().unwrap();
    assert_eq!(parked.len(), 1);
    assert_eq!(parked[0].epoch, 1);
    assert!(w.events.events().iter().any(|e| matches!(
        e,
        RebalanceEvent::ExternalTradesUnsettled { epoch: 1, trades: 1 }
    )));

    let err = m.record_deposit(&ops(), &c, usd(), 1).unwrap_err();
    assert!(matches!(err, Error::UnsettledEscrow(b) if b == c));
    assert_eq!(err.kind(), ErrorKind::Sequencing);
    assert!(matches!(
        m.propose_rebalance(&ops(), &[c]),
        Err(Error::UnsettledEscrow(_))
    ));

    assert_eq!(m.claim_unsettled(&ops()).unwrap(), 1);
    assert_eq!(w.balance(&c, x()), 497_500);
    assert!(m.unsettled().unwrap().is_empty());
    assert!(!venue.has_pending());
    assert_eq!(m.claim_unsettled(&ops()).unwrap(), 0);
    m.record_deposit(&ops(), &c, usd(), 1).unwrap();
}

#[test]
fn late_step_takes_retry_path() {
    let w = world();
    let c = w.lone();
    let m = &w.manager;
    m.propose_rebalance(&ops(), &[c]).unwrap();
    let plan = m.plan_trades().unwrap();

    w.clock.advance(3_601);
    let step = m
        .propose_token_swap(&ops(), vec![], plan.external.clone())
        .unwrap();
    assert_eq!(
        step,
        StepOutcome::Retried {
            epoch: 1,
            retry_count: 1
        }
    );
    assert_eq!(m.status().unwrap(), RebalanceStatus::RebalanceProposed);

    // Within the fresh window the step goes through.
    let step = m
        .propose_token_swap(&ops(), vec![], plan.external)
        .unwrap();
    assert!(matches!(step, StepOutcome::Advanced { .. }));
    assert_eq!(m.active_rebalance().unwrap().unwrap().retry_count, 1);
}

// ============================================================================
// Economic and capability failures
// ============================================================================

#[test]
fn divergent_anchor_rejects_then_recovers() {
    let w = world();
    let c = w.lone();
    let m = &w.manager;
    m.propose_rebalance(&ops(), &[c]).unwrap();
    let plan = m.plan_trades().unwrap();

    w.anchor.set_price(x(), WAD + WAD / 50);
    let err = m
        .propose_token_swap(&ops(), vec![], plan.external.clone())
        .unwrap_err();
    assert!(matches!(err, Error::PriceDivergence(_)));
    assert_eq!(err.kind(), ErrorKind::Economic);
    assert_eq!(m.status().unwrap(), RebalanceStatus::RebalanceProposed);

    w.anchor.set_price(x(), WAD);
    m.propose_token_swap(&ops(), vec![], plan.external).unwrap();
    assert_eq!(m.status().unwrap(), RebalanceStatus::TradesProposed);
}

#[test]
fn venue_rejection_restores_state() {
    let w = world_with(
        config(),
        Arc::new(MockAdapter::builder().fill_mode(FillMode::Reject).build()),
    );
    let c = w.lone();
    let m = &w.manager;
    m.propose_rebalance(&ops(), &[c]).unwrap();
    let plan = m.plan_trades().unwrap();
    m.propose_token_swap(&ops(), vec![], plan.external.clone())
        .unwrap();

    let err = m
        .execute_token_swap(&ops(), &plan.external, &[])
        .unwrap_err();
    assert!(matches!(err, Error::Venue(_)));
    assert_eq!(err.kind(), ErrorKind::Capability);
    assert_eq!(m.status().unwrap(), RebalanceStatus::TradesProposed);
    assert_eq!(w.balance(&c, usd()), 1_000_000);

    // No venue swap mid-epoch.
    let err = m
        .set_trade_adapter(&ops(), Arc::new(MockAdapter::builder().build()))
        .unwrap_err();
    assert!(matches!(err, Error::MustWaitForRebalanceToComplete));
}

#[test]
fn reentrant_venue_is_refused() {
    let cell: Arc<OnceLock<Weak<RebalanceManager>>> = Arc::new(OnceLock::new());
    let outcome: Arc<Mutex<Option<bool>>> = Arc::new(Mutex::new(None));
    let (hook_cell, hook_outcome) = (cell.clone(), outcome.clone());
    let venue = MockAdapter::builder()
        .on_execute(move || {
            if let Some(manager) = hook_cell.get().and_then(Weak::upgrade) {
                let refused = matches!(
                    manager.complete_rebalance(&ops(), &[]),
                    Err(Error::ReentrantCall)
                );
                *hook_outcome.lock().unwrap() = Some(refused);
            }
        })
        .build();
    let w = world_with(config(), Arc::new(venue));
    cell.set(Arc::downgrade(&w.manager)).unwrap();

    let c = w.lone();
    w.through_execute(&[c]);
    assert_eq!(*outcome.lock().unwrap(), Some(true));
    assert_eq!(w.manager.status().unwrap(), RebalanceStatus::TradesExecuted);
}

// ============================================================================
// Access and pause
// ============================================================================

#[test]
fn missing_capability_is_unauthorized() {
    let w = world();
    let (a, b) = w.opposed_pair(1_000);
    let stranger = Address::repeat_byte(0x99);
    let err = w.manager.propose_rebalance(&stranger, &[a, b]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    w.roles.grant(stranger, Capability::RebalanceProposer);
    w.manager.propose_rebalance(&stranger, &[a, b]).unwrap();
    assert!(matches!(
        w.manager.propose_token_swap(&stranger, vec![], vec![]),
        Err(Error::Unauthorized {
            capability: Capability::TokenSwapProposer,
            ..
        })
    ));
}

#[test]
fn pause_blocks_protocol_steps() {
    let w = world();
    let (a, b) = w.opposed_pair(1_000);
    let m = &w.manager;
    m.pause(&ops()).unwrap();
    assert!(m.is_paused().unwrap());
    assert!(matches!(
        m.propose_rebalance(&ops(), &[a, b]),
        Err(Error::EnforcedPause)
    ));
    assert!(matches!(m.pause(&ops()), Err(Error::EnforcedPause)));

    m.unpause(&ops()).unwrap();
    assert!(matches!(m.unpause(&ops()), Err(Error::ExpectedPause)));
    m.propose_rebalance(&ops(), &[a, b]).unwrap();
}

// ============================================================================
// Baskets, redemption, and parameters
// ============================================================================

#[test]
fn basket_definition_rules() {
    let w = world();
    let m = &w.manager;
    let flag = BitFlag::from_indices([0, 1]).unwrap();
    let strategy = Arc::new(ManagedWeightStrategy::new(Address::repeat_byte(0x55)));
    strategy
        .set_target_weights(flag, vec![HALF, HALF], START)
        .unwrap();

    assert!(matches!(
        m.create_basket(&ops(), "Q", "Q", usd(), flag, strategy.clone()),
        Err(Error::BaseAssetNotInUniverse(_))
    ));
    let wide = BitFlag::from_indices([0, 1, 2]).unwrap();
    assert!(matches!(
        m.create_basket(&ops(), "Q", "Q", x(), wide, strategy.clone()),
        Err(Error::BitFlagUnsupportedByStrategy)
    ));

    let q = m
        .create_basket(&ops(), "Q", "Q", x(), flag, strategy.clone())
        .unwrap();
    assert!(matches!(
        m.create_basket(&ops(), "Q2", "Q2", x(), flag, strategy.clone()),
        Err(Error::BasketIdAlreadyExists)
    ));
    assert!(matches!(
        m.record_deposit(&ops(), &q, usd(), 10),
        Err(Error::BitFlag(_))
    ));

    assert!(matches!(
        m.update_bit_flag(&ops(), &q, flag),
        Err(Error::BitFlagMustBeDifferent)
    ));
    assert!(matches!(
        m.update_bit_flag(&ops(), &q, BitFlag::from_indices([0, 2]).unwrap()),
        Err(Error::BitFlagMustIncludeCurrent)
    ));
    assert!(matches!(
        m.update_bit_flag(&ops(), &q, wide),
        Err(Error::BitFlagUnsupportedByStrategy)
    ));
    let third = (WAD / 3) as u64;
    strategy
        .set_target_weights(wide, vec![third, third, WAD as u64 - 2 * third], START)
        .unwrap();
    m.update_bit_flag(&ops(), &q, wide).unwrap();
    assert_eq!(m.basket(&q).unwrap().bit_flag, wide);
    m.record_deposit(&ops(), &q, usd(), 10).unwrap();
}

#[test]
fn redemption_is_pro_rata_and_blocked_in_epoch() {
    let w = world();
    let (a, b) = w.opposed_pair(1_000);
    let even = w.basket("E", [0, 1], x(), &[(x(), 300), (y(), 301)]);
    let m = &w.manager;

    let out = m.pro_rata_redeem(&ops(), &even, 4, 1).unwrap();
    assert_eq!(out, vec![(x(), 75), (y(), 75)]);
    assert_eq!(w.balance(&even, x()), 225);
    assert_eq!(w.balance(&even, y()), 226);
    assert!(matches!(
        m.pro_rata_redeem(&ops(), &even, 4, 5),
        Err(Error::InvalidRedemption(_))
    ));

    m.propose_rebalance(&ops(), &[a, b]).unwrap();
    assert!(matches!(
        m.pro_rata_redeem(&ops(), &a, 4, 1),
        Err(Error::MustWaitForRebalanceToComplete)
    ));
    // Baskets outside the epoch stay usable.
    m.pro_rata_redeem(&ops(), &even, 3, 1).unwrap();
}

#[test]
fn parameter_bounds_and_timing() {
    let w = world();
    let (a, b) = w.opposed_pair(1_000);
    let m = &w.manager;

    let err = m.set_step_delay(&ops(), 30).unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidParameter {
            name: "step_delay",
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(m.set_slippage_limit(&ops(), WAD).is_err());
    assert!(m.set_weight_deviation_limit(&ops(), 0).is_err());

    m.set_retry_limit(&ops(), 5).unwrap();
    m.set_swap_fee(&ops(), 20).unwrap();
    assert_eq!(m.config().unwrap().retry_limit, 5);
    assert_eq!(m.config().unwrap().swap_fee, 20);

    m.propose_rebalance(&ops(), &[a, b]).unwrap();
    let published = w.events.events().len();
    assert!(matches!(
        m.set_swap_fee(&ops(), 30),
        Err(Error::MustWaitForRebalanceToComplete)
    ));
    assert_eq!(m.config().unwrap().swap_fee, 20);
    assert_eq!(w.events.events().len(), published);
    // Manager parameters apply mid-epoch.
    m.set_step_delay(&ops(), 7_200).unwrap();
    assert!(w.events.events().iter().any(|e| matches!(
        e,
        RebalanceEvent::ParameterSet {
            name: "step_delay",
            ..
        }
    )));
}

#[test]
fn audit_log_records_epoch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logs").join("audit.jsonl");
    let audit: Arc<dyn EventSink> = Arc::new(AuditLog::open(&path).unwrap());
    let w = build_world(
        config(),
        Arc::new(MockAdapter::builder().build()),
        Some(audit),
    );
    let (a, b) = w.opposed_pair(1_000);
    w.through_execute(&[a, b]);
    w.manager.complete_rebalance(&ops(), &[]).unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), w.events.events().len());
    let last: serde_json::Value = serde_json::from_str(lines[lines.len() - 1]).unwrap();
    assert_eq!(last["event"], "rebalance_completed");
    assert_eq!(last["epoch"], 1);
    assert!(last["ts"].is_string());
}
