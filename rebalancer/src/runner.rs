//! Scenario runner: deploy → propose → confirm → trade → complete.
//!
//! Builds an in-memory protocol from a scenario file, with a price guard
//! over two price tables and the mock venue, and drives one epoch.

use std::sync::Arc;

use basketbook::{
    Address, BitFlag, Clock, ExternalTrade, InternalTrade, ManagedWeightStrategy, PriceGuard,
    PriceSource, PriceTable, StaticAssetRegistry, SystemClock, TradePlan,
};
use basketbook_risk::RiskReport;
use basketbook_venue::mock::MockAdapter;
use log::{info, warn};
use rustc_hash::FxHashMap;

use crate::audit::AuditLog;
use crate::auth::RoleTable;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{EventSink, MemorySink};
use crate::manager::{RebalanceManager, StepOutcome};
use crate::scenario::{Scenario, asset_address};

/// Options for a scenario run.
pub struct RunOptions {
    pub dry_run: bool,
    pub force: bool,
    pub scenario_file: String,
}

/// Caller holding every capability in a scenario deployment.
pub fn operator() -> Address {
    asset_address("operator")
}

/// A protocol instance built from a scenario.
pub struct Deployment {
    pub manager: RebalanceManager,
    pub venue: Arc<MockAdapter>,
    pub events: Arc<MemorySink>,
    /// The guarded price source the manager values baskets with.
    pub prices: Arc<dyn PriceSource>,
    /// Basket addresses in scenario order.
    pub baskets: Vec<Address>,
    symbols: FxHashMap<Address, String>,
}

impl Deployment {
    /// Display name of an asset or basket address.
    pub fn label(&self, address: &Address) -> String {
        self.symbols
            .get(address)
            .cloned()
            .unwrap_or_else(|| address.to_string())
    }
}

/// Build the protocol described by `scenario`.
///
/// Extra sinks (such as the audit log) receive every manager event.
pub fn deploy(
    config: &Config,
    scenario: &Scenario,
    clock: Arc<dyn Clock>,
    sinks: Vec<Arc<dyn EventSink>>,
) -> Result<Deployment> {
    let mut symbols = FxHashMap::default();
    let addresses: Vec<Address> = scenario
        .assets
        .iter()
        .map(|a| {
            let address = asset_address(&a.symbol);
            symbols.insert(address, a.symbol.clone());
            address
        })
        .collect();
    let registry = Arc::new(StaticAssetRegistry::new(addresses)?);

    let mut primary = PriceTable::new(clock.clone()).with_spread_bps(config.oracle.spread_bps);
    let mut anchor = PriceTable::new(clock.clone()).with_spread_bps(config.oracle.spread_bps);
    if let Some(age) = config.oracle.max_price_age_secs {
        primary = primary.with_max_age(age);
        anchor = anchor.with_max_age(age);
    }
    for a in &scenario.assets {
        let address = asset_address(&a.symbol);
        primary.set_price(address, a.price);
        anchor.set_price(address, a.anchor_price.unwrap_or(a.price));
    }
    let guard = PriceGuard::new(
        Arc::new(primary),
        Arc::new(anchor),
        u128::from(config.oracle.max_divergence),
    )
    .map_err(|e| Error::Config(e.to_string()))?;
    let prices: Arc<dyn PriceSource> = Arc::new(guard);

    let ops = operator();
    let venue = Arc::new(MockAdapter::builder().build());
    let events = Arc::new(MemorySink::new());
    let mut builder = RebalanceManager::builder(config.manager_config())
        .prices(prices.clone())
        .assets(registry.clone())
        .authorizer(Arc::new(RoleTable::with_all(ops)))
        .adapter(venue.clone())
        .clock(clock.clone())
        .sink(events.clone());
    for sink in sinks {
        builder = builder.sink(sink);
    }
    let manager = builder.build()?;

    let mut baskets = Vec::with_capacity(scenario.baskets.len());
    for spec in &scenario.baskets {
        let mut holdings: Vec<(usize, Address, &crate::scenario::Holding)> = spec
            .holdings
            .iter()
            .map(|h| {
                let address = asset_address(&h.asset);
                let index = registry.assets().iter().position(|a| *a == address);
                index
                    .map(|i| (i, address, h))
                    .ok_or_else(|| Error::Scenario(format!("unknown asset {}", h.asset)))
            })
            .collect::<Result<_>>()?;
        holdings.sort_by_key(|(i, _, _)| *i);

        let bit_flag = BitFlag::from_indices(holdings.iter().map(|(i, _, _)| *i))?;
        let strategy = ManagedWeightStrategy::new(asset_address(&format!("strategy:{}", spec.symbol)));
        strategy.set_target_weights(
            bit_flag,
            holdings.iter().map(|(_, _, h)| h.weight).collect(),
            clock.now(),
        )?;

        let basket = manager.create_basket(
            &ops,
            &spec.name,
            &spec.symbol,
            asset_address(&spec.base_asset),
            bit_flag,
            Arc::new(strategy),
        )?;
        for (_, asset, h) in &holdings {
            if h.balance > 0 {
                manager.record_deposit(&ops, &basket, *asset, h.balance)?;
            }
        }
        symbols.insert(basket, spec.symbol.clone());
        baskets.push(basket);
    }

    Ok(Deployment {
        manager,
        venue,
        events,
        prices,
        baskets,
        symbols,
    })
}

/// Print which baskets need rebalancing and the netted plan. Read-only.
pub fn plan(config: &Config, scenario: &Scenario) -> Result<()> {
    let deployment = deploy(config, scenario, Arc::new(SystemClock), Vec::new())?;
    display_baskets(&deployment)?;

    let ops = operator();
    match deployment.manager.propose_rebalance(&ops, &deployment.baskets) {
        Ok(_) => {}
        Err(Error::NoRebalanceRequired) => {
            println!("\nNo rebalancing needed: every basket is within limits.");
            return Ok(());
        }
        Err(e) => return Err(e),
    }
    let trades = deployment.manager.plan_trades()?;
    display_plan(&deployment, &trades);
    let report = deployment
        .manager
        .check_trades(&trades.internal, &trades.external)?;
    print!("\n{report}");
    Ok(())
}

/// Drive one full epoch for `scenario`.
pub fn run(config: &Config, scenario: &Scenario, opts: &RunOptions) -> Result<()> {
    let audit: Arc<dyn EventSink> = Arc::new(AuditLog::open(&config.audit_path())?);
    info!("running scenario {}", opts.scenario_file);
    let deployment = deploy(config, scenario, Arc::new(SystemClock), vec![audit])?;
    let manager = &deployment.manager;
    let ops = operator();

    display_baskets(&deployment)?;

    let proposal = match manager.propose_rebalance(&ops, &deployment.baskets) {
        Ok(p) => p,
        Err(Error::NoRebalanceRequired) => {
            println!("\nNo rebalancing needed: every basket is within limits.");
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    println!(
        "\nEpoch {}: {} baskets in scope, {} skipped",
        proposal.epoch,
        proposal.baskets.len(),
        proposal.skipped.len()
    );

    let trades = manager.plan_trades()?;
    display_plan(&deployment, &trades);
    let report: RiskReport = manager.check_trades(&trades.internal, &trades.external)?;
    print!("\n{report}");
    if report.has_failures() {
        return Err(Error::RiskFailed(report.failure_summary()));
    }

    if opts.dry_run {
        println!("\n[DRY RUN] No trades proposed.");
        return Ok(());
    }

    if !opts.force {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt("Execute?")
            .default(false)
            .interact()
            .map_err(|e| Error::Aborted(format!("confirmation prompt failed: {e}")))?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let TradePlan { internal, external } = trades;
    step("propose trades", manager.propose_token_swap(&ops, internal, external.clone())?)?;
    step("execute trades", manager.execute_token_swap(&ops, &external, &[])?)?;
    step("complete", manager.complete_rebalance(&ops, &external)?)?;

    println!();
    display_baskets(&deployment)?;
    println!(
        "\n{} events. Audit logged to {}",
        deployment.events.events().len(),
        config.audit_path().display()
    );
    Ok(())
}

fn step(name: &str, outcome: StepOutcome) -> Result<()> {
    match outcome {
        StepOutcome::Advanced { epoch, status } => {
            println!("[epoch {epoch}] {name}: {status}");
            Ok(())
        }
        StepOutcome::Retried { epoch, retry_count } => {
            warn!("epoch {epoch}: {name} retried ({retry_count})");
            Err(Error::EpochIncomplete {
                epoch,
                step: name.to_string(),
                reason: format!("reopened for retry {retry_count}"),
            })
        }
        StepOutcome::Aborted { epoch } => Err(Error::EpochIncomplete {
            epoch,
            step: name.to_string(),
            reason: "aborted after too many retries".into(),
        }),
    }
}

// === Helpers ===

fn pct(w: u128) -> f64 {
    w as f64 / 1e16
}

fn display_baskets(deployment: &Deployment) -> Result<()> {
    let engine = basketbook::WeightEngine::new(deployment.prices.clone());
    println!("BASKETS:");
    for basket in &deployment.baskets {
        let snapshot = deployment.manager.snapshot(basket)?;
        let deviations = engine.compute_deviation(&snapshot)?;
        println!("  {}", deployment.label(basket));
        for (d, balance) in deviations.iter().zip(&snapshot.balances) {
            println!(
                "    {:8} {:>24}  {:>6.2}% (target {:>6.2}%)",
                deployment.label(&d.asset),
                balance,
                pct(d.current_weight),
                pct(d.target_weight),
            );
        }
    }
    Ok(())
}

fn display_plan(deployment: &Deployment, plan: &TradePlan) {
    println!("\nINTERNAL TRADES:");
    if plan.internal.is_empty() {
        println!("  (none)");
    }
    for (i, t) in plan.internal.iter().enumerate() {
        print_internal(deployment, i, t);
    }
    println!("\nEXTERNAL TRADES:");
    if plan.external.is_empty() {
        println!("  (none)");
    }
    for (i, t) in plan.external.iter().enumerate() {
        print_external(deployment, i, t);
    }
}

fn print_internal(deployment: &Deployment, i: usize, t: &InternalTrade) {
    println!(
        "  {:>3}  {} -> {}: sell {} {} for {} in [{}, {}]",
        i + 1,
        deployment.label(&t.from_basket),
        deployment.label(&t.to_basket),
        t.sell_amount,
        deployment.label(&t.sell_asset),
        deployment.label(&t.buy_asset),
        t.min_amount,
        t.max_amount,
    );
}

fn print_external(deployment: &Deployment, i: usize, t: &ExternalTrade) {
    let owners: Vec<String> = t
        .ownership
        .iter()
        .map(|s| format!("{} {:.2}%", deployment.label(&s.basket), pct(s.fraction)))
        .collect();
    println!(
        "  {:>3}  sell {} {} for at least {} {}  ({})",
        i + 1,
        t.sell_amount,
        deployment.label(&t.sell_asset),
        t.min_amount,
        deployment.label(&t.buy_asset),
        owners.join(", "),
    );
}

#[cfg(test)]
mod tests {
    use basketbook::ManualClock;

    use super::*;
    use crate::epoch::RebalanceStatus;

    fn scenario() -> Scenario {
        Scenario::from_json(
            r#"{
                "timestamp": "2026-10-19T12:00:00Z",
                "assets": [
                    {"symbol": "USD", "price": 1000000000000000000},
                    {"symbol": "ETH", "price": 2000000000000000000000}
                ],
                "baskets": [
                    {"name": "Cash", "symbol": "CASH", "base_asset": "USD", "holdings": [
                        {"asset": "USD", "balance": 4000, "weight": 500000000000000000},
                        {"asset": "ETH", "weight": 500000000000000000}
                    ]},
                    {"name": "Ether", "symbol": "ETHB", "base_asset": "ETH", "holdings": [
                        {"asset": "USD", "weight": 500000000000000000},
                        {"asset": "ETH", "balance": 2, "weight": 500000000000000000}
                    ]}
                ]
            }"#,
        )
        .unwrap()
    }

    fn deployed() -> Deployment {
        deploy(
            &Config::default(),
            &scenario(),
            Arc::new(ManualClock::new(1_000)),
            Vec::new(),
        )
        .unwrap()
    }

    #[test]
    fn deploy_seeds_baskets() {
        let d = deployed();
        assert_eq!(d.baskets.len(), 2);
        assert_eq!(d.label(&d.baskets[0]), "CASH");
        assert_eq!(d.label(&asset_address("ETH")), "ETH");
        let cash = d
            .manager
            .basket_balance_of(&d.baskets[0], &asset_address("USD"))
            .unwrap();
        assert_eq!(cash, 4_000);
        assert_eq!(d.events.events().len(), 2 + 2);
    }

    #[test]
    fn opposed_scenario_nets_internally() {
        let d = deployed();
        let ops = operator();
        d.manager.propose_rebalance(&ops, &d.baskets).unwrap();
        let plan = d.manager.plan_trades().unwrap();
        assert_eq!(plan.internal.len(), 1);
        assert!(plan.external.is_empty());

        let report = d
            .manager
            .check_trades(&plan.internal, &plan.external)
            .unwrap();
        assert!(!report.has_failures());
        step(
            "propose trades",
            d.manager
                .propose_token_swap(&ops, plan.internal, Vec::new())
                .unwrap(),
        )
        .unwrap();
        assert_eq!(d.manager.status().unwrap(), RebalanceStatus::TradesProposed);
    }

    #[test]
    fn retried_step_stops_the_run() {
        let err = step(
            "execute trades",
            StepOutcome::Retried {
                epoch: 3,
                retry_count: 1,
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::EpochIncomplete { epoch: 3, .. }));
        assert!(err.to_string().contains("retry 1"));
        assert!(matches!(
            step("complete", StepOutcome::Aborted { epoch: 3 }),
            Err(Error::EpochIncomplete { epoch: 3, .. })
        ));
    }
}
