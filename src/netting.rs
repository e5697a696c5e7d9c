//! Internal trade netting across baskets.
//!
//! Opposing intents on the same asset pair are matched against each other at
//! oracle prices and become [`InternalTrade`]s. Whatever cannot be matched is
//! aggregated into one [`ExternalTrade`] per direction. Each contributing
//! basket keeps its exact residual as the amount it sells, plus a WAD
//! fraction for dividing the proceeds.
//!
//! Given the same snapshots and prices the plan is identical on every call:
//! pairs are visited in address order, and within a pair baskets are matched
//! in ascending basket index.

use std::collections::BTreeMap;

use alloy_primitives::Address;
use rustc_hash::FxHashSet;

use crate::basket::BasketSnapshot;
use crate::error::PlanError;
use crate::trade::{ExternalTrade, InternalTrade, OwnershipSplit};
use crate::wad::{WAD, half_fee, mul_div, mul_div_up};
use crate::weights::{SwapIntent, WeightEngine};

/// Pricing parameters applied to planned trades.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NettingParams {
    /// WAD-scaled tolerance used for trade bounds.
    pub slippage_limit: u128,
    /// Total swap fee in basis points, charged half per leg.
    pub swap_fee_bps: u16,
}

/// Trades that take a set of baskets to target.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TradePlan {
    pub internal: Vec<InternalTrade>,
    pub external: Vec<ExternalTrade>,
}

impl TradePlan {
    pub fn is_empty(&self) -> bool {
        self.internal.is_empty() && self.external.is_empty()
    }
}

#[derive(Clone, Copy, Debug)]
struct Leg {
    basket: Address,
    basket_index: usize,
    amount: u128,
}

#[derive(Default)]
struct PairBook {
    /// Legs selling the lower-addressed asset.
    forward: Vec<Leg>,
    /// Legs selling the higher-addressed asset.
    backward: Vec<Leg>,
}

/// Plans internal and external trades for a set of baskets.
pub struct TradeNetter {
    engine: WeightEngine,
    params: NettingParams,
}

impl TradeNetter {
    pub fn new(engine: WeightEngine, params: NettingParams) -> Self {
        Self { engine, params }
    }

    pub fn engine(&self) -> &WeightEngine {
        &self.engine
    }

    pub fn params(&self) -> NettingParams {
        self.params
    }

    /// Plan trades for `snapshots`, whose order defines basket index.
    pub fn plan_trades(&self, snapshots: &[BasketSnapshot]) -> Result<TradePlan, PlanError> {
        let mut seen = FxHashSet::default();
        let mut intents = Vec::new();
        for (index, snapshot) in snapshots.iter().enumerate() {
            if !seen.insert(snapshot.basket) {
                return Err(PlanError::DuplicateBasket(snapshot.basket));
            }
            intents.extend(self.engine.swap_intents(index, snapshot)?);
        }
        self.net(&intents)
    }

    /// Net a set of swap intents into internal and external trades.
    pub fn net(&self, intents: &[SwapIntent]) -> Result<TradePlan, PlanError> {
        let mut pairs: BTreeMap<(Address, Address), PairBook> = BTreeMap::new();
        for intent in intents {
            if intent.sell_amount == 0 || intent.sell_asset == intent.buy_asset {
                continue;
            }
            let forward = intent.sell_asset < intent.buy_asset;
            let key = if forward {
                (intent.sell_asset, intent.buy_asset)
            } else {
                (intent.buy_asset, intent.sell_asset)
            };
            let leg = Leg {
                basket: intent.basket,
                basket_index: intent.basket_index,
                amount: intent.sell_amount,
            };
            let book = pairs.entry(key).or_default();
            if forward {
                book.forward.push(leg);
            } else {
                book.backward.push(leg);
            }
        }

        let mut plan = TradePlan::default();
        for ((lo, hi), mut book) in pairs {
            book.forward.sort_by_key(|l| l.basket_index);
            book.backward.sort_by_key(|l| l.basket_index);
            let (rest_fwd, rest_bwd) = self.match_pair(lo, hi, &book, &mut plan.internal)?;
            if let Some(trade) = self.external_trade(lo, hi, &rest_fwd)? {
                plan.external.push(trade);
            }
            if let Some(trade) = self.external_trade(hi, lo, &rest_bwd)? {
                plan.external.push(trade);
            }
        }
        Ok(plan)
    }

    /// Match `lo -> hi` sellers against `hi -> lo` sellers. Returns what is
    /// left on each side.
    fn match_pair(
        &self,
        lo: Address,
        hi: Address,
        book: &PairBook,
        internal: &mut Vec<InternalTrade>,
    ) -> Result<(Vec<Leg>, Vec<Leg>), PlanError> {
        let prices = self.engine.prices();
        let mut rest_fwd = Vec::new();
        let mut rest_bwd = Vec::new();

        let (fwd, bwd) = (&book.forward, &book.backward);
        let (mut fi, mut bi) = (0, 0);
        let mut fa = fwd.first().map_or(0, |l| l.amount);
        let mut ba = bwd.first().map_or(0, |l| l.amount);

        while fi < fwd.len() && bi < bwd.len() {
            let (seller, buyer) = (fwd[fi], bwd[bi]);
            // Buyer's remaining `hi`, expressed in `lo`.
            let fits = prices.quote(ba, &hi, &lo)?;

            if fa <= fits {
                let got = prices.quote(fa, &lo, &hi)?;
                if got == 0 {
                    rest_fwd.push(Leg { amount: fa, ..seller });
                } else {
                    internal.push(self.internal_trade(seller.basket, buyer.basket, lo, hi, fa, got)?);
                    ba = ba.saturating_sub(got);
                }
                fi += 1;
                fa = fwd.get(fi).map_or(0, |l| l.amount);
                if ba == 0 {
                    bi += 1;
                    ba = bwd.get(bi).map_or(0, |l| l.amount);
                }
                continue;
            }

            // Buyer is exhausted first.
            let mut sold = fits;
            if prices.quote(sold + 1, &lo, &hi)? <= ba {
                sold += 1;
            }
            let got = prices.quote(sold, &lo, &hi)?;
            if sold > 0 && got > 0 {
                internal.push(self.internal_trade(seller.basket, buyer.basket, lo, hi, sold, got)?);
                fa -= sold;
                ba = ba.saturating_sub(got);
            }
            if ba > 0 {
                rest_bwd.push(Leg { amount: ba, ..buyer });
            }
            bi += 1;
            ba = bwd.get(bi).map_or(0, |l| l.amount);
        }

        if fi < fwd.len() {
            rest_fwd.push(Leg { amount: fa, ..fwd[fi] });
            rest_fwd.extend_from_slice(&fwd[fi + 1..]);
        }
        if bi < bwd.len() {
            rest_bwd.push(Leg { amount: ba, ..bwd[bi] });
            rest_bwd.extend_from_slice(&bwd[bi + 1..]);
        }
        rest_fwd.retain(|l| l.amount > 0);
        rest_bwd.retain(|l| l.amount > 0);
        Ok((rest_fwd, rest_bwd))
    }

    fn internal_trade(
        &self,
        from_basket: Address,
        to_basket: Address,
        sell_asset: Address,
        buy_asset: Address,
        sell_amount: u128,
        initial_buy: u128,
    ) -> Result<InternalTrade, PlanError> {
        let slippage = self.params.slippage_limit;
        let net = initial_buy - half_fee(initial_buy, self.params.swap_fee_bps)?;
        Ok(InternalTrade {
            from_basket,
            to_basket,
            sell_asset,
            buy_asset,
            sell_amount,
            min_amount: mul_div(net, WAD.saturating_sub(slippage), WAD)?,
            max_amount: mul_div_up(net, WAD + slippage, WAD)?,
        })
    }

    fn external_trade(
        &self,
        sell_asset: Address,
        buy_asset: Address,
        legs: &[Leg],
    ) -> Result<Option<ExternalTrade>, PlanError> {
        let total: u128 = legs.iter().map(|l| l.amount).sum();
        if total == 0 {
            return Ok(None);
        }

        let mut ownership = Vec::with_capacity(legs.len());
        let mut assigned: u128 = 0;
        for (i, leg) in legs.iter().enumerate() {
            let fraction = if i + 1 == legs.len() {
                WAD - assigned
            } else {
                mul_div(leg.amount, WAD, total)?
            };
            assigned += fraction;
            ownership.push(OwnershipSplit {
                basket: leg.basket,
                fraction,
                amount: leg.amount,
            });
        }

        let expected = self.engine.prices().quote(total, &sell_asset, &buy_asset)?;
        let min_amount = mul_div(expected, WAD.saturating_sub(self.params.slippage_limit), WAD)?;
        Ok(Some(ExternalTrade {
            sell_asset,
            buy_asset,
            sell_amount: total,
            min_amount,
            ownership,
        }))
    }
}
