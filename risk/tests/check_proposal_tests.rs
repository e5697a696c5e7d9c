//! Tests for RiskEngine::check_proposal.

use std::sync::Arc;

use basketbook::{
    Address, BasketSnapshot, ExternalTrade, InternalTrade, ManualClock, NettingParams,
    OwnershipSplit, PriceTable, TradeNetter, WAD, WeightEngine,
};
use basketbook_risk::{RiskConfig, RiskEngine, RiskStatus};

const HALF: u64 = (WAD / 2) as u64;

fn addr(n: u8) -> Address {
    Address::repeat_byte(n)
}

fn prices() -> Arc<PriceTable> {
    let t = PriceTable::new(Arc::new(ManualClock::new(0)));
    t.set_price(addr(1), WAD);
    t.set_price(addr(2), 2 * WAD);
    Arc::new(t)
}

fn weight_engine() -> WeightEngine {
    WeightEngine::new(prices())
}

fn engine() -> RiskEngine {
    RiskEngine::new(RiskConfig::default())
}

fn basket(id: u8, balances: Vec<u128>) -> BasketSnapshot {
    BasketSnapshot {
        basket: addr(id),
        base_asset: addr(1),
        assets: vec![addr(1), addr(2)],
        balances,
        target_weights: vec![HALF, HALF],
    }
}

fn planned(snapshots: &[BasketSnapshot]) -> (Vec<InternalTrade>, Vec<ExternalTrade>) {
    let netter = TradeNetter::new(
        weight_engine(),
        NettingParams {
            slippage_limit: RiskConfig::default().slippage_limit,
            swap_fee_bps: 0,
        },
    );
    let plan = netter.plan_trades(snapshots).unwrap();
    (plan.internal, plan.external)
}

// ============================================================================
// Planned trades pass
// ============================================================================

#[test]
fn netted_plan_passes() {
    let baskets = vec![basket(0xa, vec![2_000_000, 0]), basket(0xb, vec![0, 1_000_000])];
    let (internal, external) = planned(&baskets);
    assert_eq!(internal.len(), 1);
    assert!(external.is_empty());

    let report = engine()
        .check_proposal(&baskets, &internal, &external, &weight_engine())
        .unwrap();
    assert!(!report.has_failures(), "{report}");
}

#[test]
fn external_plan_passes() {
    let baskets = vec![basket(0xc, vec![2_000_000, 0])];
    let (internal, external) = planned(&baskets);
    assert_eq!(external.len(), 1);

    let report = engine()
        .check_proposal(&baskets, &internal, &external, &weight_engine())
        .unwrap();
    assert!(!report.has_failures(), "{report}");
}

// ============================================================================
// Violations
// ============================================================================

#[test]
fn internal_bounds_violation_fails() {
    let baskets = vec![basket(0xa, vec![2_000_000, 0]), basket(0xb, vec![0, 1_000_000])];
    let (mut internal, external) = planned(&baskets);
    internal[0].min_amount = internal[0].max_amount + 1;

    let report = engine()
        .check_proposal(&baskets, &internal, &external, &weight_engine())
        .unwrap();
    assert!(report.has_failures());
    assert!(report.failure_summary().contains("outside"));
}

#[test]
fn external_min_below_slippage_fails() {
    let baskets = vec![basket(0xc, vec![2_000_000, 0])];
    let (internal, mut external) = planned(&baskets);
    external[0].min_amount /= 2;

    let report = engine()
        .check_proposal(&baskets, &internal, &external, &weight_engine())
        .unwrap();
    let failed: Vec<_> = report.failures().map(|c| c.name).collect();
    assert!(failed.contains(&"External trades"));
}

#[test]
fn ownership_must_sum_to_wad() {
    let baskets = vec![basket(0xc, vec![2_000_000, 0])];
    let (internal, mut external) = planned(&baskets);
    let amount = external[0].sell_amount;
    external[0].ownership = vec![OwnershipSplit {
        basket: addr(0xc),
        fraction: WAD - 1,
        amount,
    }];

    let report = engine()
        .check_proposal(&baskets, &internal, &external, &weight_engine())
        .unwrap();
    assert!(report.has_failures());
}

#[test]
fn owner_amounts_must_cover_sell() {
    let baskets = vec![basket(0xc, vec![2_000_000, 0])];
    let (internal, mut external) = planned(&baskets);
    external[0].ownership[0].amount -= 1;

    let report = engine()
        .check_proposal(&baskets, &internal, &external, &weight_engine())
        .unwrap();
    let failed: Vec<_> = report.failures().map(|c| c.detail.as_str()).collect();
    assert!(failed.iter().any(|d| d.contains("owners sell")), "{failed:?}");
}

#[test]
fn pooled_exit_debits_each_owner_exactly() {
    // Both baskets drop asset 1 entirely and pool one external sell.
    let exiting = |id: u8, amount: u128| BasketSnapshot {
        target_weights: vec![0, WAD as u64],
        ..basket(id, vec![amount, 0])
    };
    let baskets = vec![exiting(0xa, 1_000_000), exiting(0xb, 2_000_000)];
    let (internal, external) = planned(&baskets);
    assert!(internal.is_empty());
    assert_eq!(external.len(), 1);
    assert_eq!(external[0].sell_amount, 3_000_000);

    let report = engine()
        .check_proposal(&baskets, &internal, &external, &weight_engine())
        .unwrap();
    assert!(!report.has_failures(), "{report}");
}

#[test]
fn overselling_fails() {
    let baskets = vec![basket(0xa, vec![100, 0]), basket(0xb, vec![0, 1_000_000])];
    let trade = InternalTrade {
        from_basket: addr(0xa),
        to_basket: addr(0xb),
        sell_asset: addr(1),
        buy_asset: addr(2),
        sell_amount: 1_000,
        min_amount: 0,
        max_amount: u128::MAX,
    };
    let report = engine()
        .check_proposal(&baskets, &[trade], &[], &weight_engine())
        .unwrap();
    assert!(report.failure_summary().contains("seller holds less"));
}

#[test]
fn unbalanced_result_fails_weight_check() {
    // No trades at all: the basket stays 100% in asset 1.
    let baskets = vec![basket(0xc, vec![2_000_000, 0])];
    let report = engine()
        .check_proposal(&baskets, &[], &[], &weight_engine())
        .unwrap();
    let weights = report
        .checks
        .iter()
        .find(|c| c.name == "Post-trade weights")
        .unwrap();
    assert_eq!(weights.status, RiskStatus::Fail);
}

#[test]
#[should_panic(expected = "invalid RiskConfig")]
fn invalid_config_panics() {
    RiskEngine::new(RiskConfig {
        slippage_limit: 0,
        ..RiskConfig::default()
    });
}
