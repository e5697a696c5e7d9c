//! Individual risk check implementations.

use basketbook::wad::{WAD, half_fee, mul_div, mul_div_up};
use basketbook::{
    Address, BasketSnapshot, ExternalTrade, InternalTrade, PlanError, PriceSource, WeightEngine,
    settle_internal,
};
use rustc_hash::FxHashMap;

use crate::config::RiskConfig;
use crate::report::{RiskCheck, RiskReport, RiskStatus};

/// WAD fraction as a percentage, for display only.
fn pct(w: u128) -> f64 {
    w as f64 / 1e16
}

fn fail(name: &'static str, detail: String) -> RiskCheck {
    RiskCheck {
        name,
        status: RiskStatus::Fail,
        detail,
    }
}

fn pass(name: &'static str, detail: String) -> RiskCheck {
    RiskCheck {
        name,
        status: RiskStatus::Pass,
        detail,
    }
}

/// Balances of every basket in the proposal, updated as trades are applied.
struct Staged {
    baskets: Vec<BasketSnapshot>,
    index: FxHashMap<Address, usize>,
}

impl Staged {
    fn new(snapshots: &[BasketSnapshot]) -> Self {
        let index = snapshots
            .iter()
            .enumerate()
            .map(|(i, s)| (s.basket, i))
            .collect();
        Self {
            baskets: snapshots.to_vec(),
            index,
        }
    }

    /// Position of `basket` and of `assets` inside it.
    fn locate<const N: usize>(
        &self,
        basket: &Address,
        assets: [&Address; N],
    ) -> Option<(usize, [usize; N])> {
        let b = *self.index.get(basket)?;
        let mut positions = [0; N];
        for (slot, asset) in positions.iter_mut().zip(assets) {
            *slot = self.baskets[b].position_of(asset)?;
        }
        Some((b, positions))
    }
}

/// Run all checks for a trade proposal.
pub fn check_proposal(
    config: &RiskConfig,
    snapshots: &[BasketSnapshot],
    internal: &[InternalTrade],
    external: &[ExternalTrade],
    engine: &WeightEngine,
) -> Result<RiskReport, PlanError> {
    let mut staged = Staged::new(snapshots);
    let prices = engine.prices().as_ref();

    let mut checks = check_internal(config, &mut staged, internal, prices)?;
    checks.extend(check_external(config, &mut staged, external, prices)?);
    checks.extend(check_weights(config, &staged.baskets, engine)?);
    Ok(RiskReport { checks })
}

/// Price every internal trade, verify its bounds and both baskets' balances,
/// then apply it to the staged balances.
fn check_internal(
    config: &RiskConfig,
    staged: &mut Staged,
    trades: &[InternalTrade],
    prices: &dyn PriceSource,
) -> Result<Vec<RiskCheck>, PlanError> {
    const NAME: &str = "Internal trades";
    let mut checks = Vec::new();

    for (i, trade) in trades.iter().enumerate() {
        if trade.from_basket == trade.to_basket {
            checks.push(fail(NAME, format!("trade {i}: basket trades with itself")));
            continue;
        }
        let assets = [&trade.sell_asset, &trade.buy_asset];
        let (Some((from, [f_sell, f_buy])), Some((to, [t_sell, t_buy]))) = (
            staged.locate(&trade.from_basket, assets),
            staged.locate(&trade.to_basket, assets),
        ) else {
            checks.push(fail(
                NAME,
                format!("trade {i}: basket or asset outside the rebalance"),
            ));
            continue;
        };

        let s = settle_internal(trade, prices, config.swap_fee_bps)?;
        if !s.within_bounds(trade) {
            checks.push(fail(
                NAME,
                format!(
                    "trade {i}: net buy {} outside [{}, {}]",
                    s.net_buy, trade.min_amount, trade.max_amount
                ),
            ));
            continue;
        }
        if staged.baskets[from].balances[f_sell] < s.sell_amount {
            checks.push(fail(
                NAME,
                format!("trade {i}: seller holds less than {}", s.sell_amount),
            ));
            continue;
        }
        if staged.baskets[to].balances[t_buy] < s.initial_buy {
            checks.push(fail(
                NAME,
                format!("trade {i}: counterparty holds less than {}", s.initial_buy),
            ));
            continue;
        }

        staged.baskets[from].balances[f_sell] -= s.sell_amount;
        staged.baskets[from].balances[f_buy] += s.net_buy;
        staged.baskets[to].balances[t_buy] -= s.initial_buy;
        staged.baskets[to].balances[t_sell] += s.net_sell;
    }

    if checks.is_empty() {
        checks.push(pass(
            NAME,
            format!("{} trades within bounds and balances", trades.len()),
        ));
    }
    Ok(checks)
}

/// Verify ownership, slippage, and balances of external trades, assuming
/// each fills at exactly its minimum amount.
fn check_external(
    config: &RiskConfig,
    staged: &mut Staged,
    trades: &[ExternalTrade],
    prices: &dyn PriceSource,
) -> Result<Vec<RiskCheck>, PlanError> {
    const NAME: &str = "External trades";
    let mut checks = Vec::new();
    let slippage = config.slippage_limit;

    for (i, trade) in trades.iter().enumerate() {
        if trade.ownership.is_empty() || trade.ownership_total() != WAD {
            checks.push(fail(
                NAME,
                format!(
                    "trade {i}: ownership sums to {}, expected 1e18",
                    trade.ownership_total()
                ),
            ));
            continue;
        }
        if trade.owned_total() != trade.sell_amount {
            checks.push(fail(
                NAME,
                format!(
                    "trade {i}: owners sell {} of {}",
                    trade.owned_total(),
                    trade.sell_amount
                ),
            ));
            continue;
        }

        let oracle = prices.quote(trade.sell_amount, &trade.sell_asset, &trade.buy_asset)?;
        let lower = mul_div(oracle, WAD - slippage, WAD)?;
        let upper = mul_div_up(oracle, WAD + slippage, WAD)?;
        if trade.min_amount < lower || trade.min_amount > upper {
            checks.push(fail(
                NAME,
                format!(
                    "trade {i}: min amount {} outside [{lower}, {upper}] ({:.2}% slippage)",
                    trade.min_amount,
                    pct(slippage)
                ),
            ));
            continue;
        }

        let sells: Vec<_> = trade.sell_legs().collect();
        let received = trade.min_amount - half_fee(trade.min_amount, config.swap_fee_bps)?;
        let buys = trade.split_amount(received)?;
        let assets = [&trade.sell_asset, &trade.buy_asset];

        let mut moves = Vec::with_capacity(sells.len());
        let mut problem = None;
        for ((basket, sold), (_, bought)) in sells.iter().zip(&buys) {
            match staged.locate(basket, assets) {
                Some((b, [sell, _])) if staged.baskets[b].balances[sell] < *sold => {
                    problem = Some(format!("trade {i}: basket {basket} holds less than {sold}"));
                    break;
                }
                Some((b, [sell, buy])) => moves.push((b, sell, buy, *sold, *bought)),
                None => {
                    problem = Some(format!("trade {i}: owner {basket} outside the rebalance"));
                    break;
                }
            }
        }
        if let Some(detail) = problem {
            checks.push(fail(NAME, detail));
            continue;
        }
        for (b, sell, buy, sold, bought) in moves {
            staged.baskets[b].balances[sell] -= sold;
            staged.baskets[b].balances[buy] += bought;
        }
    }

    if checks.is_empty() {
        checks.push(pass(
            NAME,
            format!(
                "{} trades within {:.2}% of oracle",
                trades.len(),
                pct(slippage)
            ),
        ));
    }
    Ok(checks)
}

/// Every basket must land within the deviation limit of its targets.
fn check_weights(
    config: &RiskConfig,
    staged: &[BasketSnapshot],
    engine: &WeightEngine,
) -> Result<Vec<RiskCheck>, PlanError> {
    const NAME: &str = "Post-trade weights";
    let limit = config.weight_deviation_limit;
    let mut checks = Vec::new();
    let mut worst = 0;

    for basket in staged {
        let deviation = engine.max_deviation(basket)?;
        worst = worst.max(deviation);
        if deviation > limit {
            checks.push(fail(
                NAME,
                format!(
                    "basket {}: {:.2}% > {:.2}% limit",
                    basket.basket,
                    pct(deviation),
                    pct(limit)
                ),
            ));
        }
    }

    if checks.is_empty() {
        checks.push(pass(
            NAME,
            format!("worst {:.2}% <= {:.2}% limit", pct(worst), pct(limit)),
        ));
    }
    Ok(checks)
}
