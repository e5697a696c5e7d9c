//! Basket valuation, weight deviation, and per-basket swap intents.

use std::sync::Arc;

use alloy_primitives::Address;

use crate::basket::BasketSnapshot;
use crate::error::{MathError, PlanError};
use crate::price::PriceSource;
use crate::wad::{WAD, mul_div, wad_div};

/// Current and target weight of one asset, both WAD-scaled.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AssetDeviation {
    pub asset: Address,
    pub current_weight: u128,
    pub target_weight: u128,
}

impl AssetDeviation {
    /// Absolute distance between current and target weight.
    pub fn deviation(&self) -> u128 {
        self.current_weight.abs_diff(self.target_weight)
    }
}

/// Where one asset sits relative to its target.
///
/// Values are in units of the basket's base asset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetDelta {
    pub asset: Address,
    pub balance: u128,
    pub target_balance: u128,
    pub value: u128,
    pub target_value: u128,
}

impl AssetDelta {
    /// Units held above target, zero when not overweight.
    pub fn excess(&self) -> u128 {
        if self.value > self.target_value {
            self.balance.saturating_sub(self.target_balance)
        } else {
            0
        }
    }

    /// Base-asset value missing below target, zero when not underweight.
    pub fn deficit_value(&self) -> u128 {
        self.target_value.saturating_sub(self.value)
    }
}

/// A basket's wish to turn `sell_amount` of one asset into another.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapIntent {
    pub basket: Address,
    /// Position of the basket in the epoch's basket order.
    pub basket_index: usize,
    pub sell_asset: Address,
    pub buy_asset: Address,
    pub sell_amount: u128,
}

/// Holding values of a basket in its base asset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Valuation {
    pub values: Vec<u128>,
    pub total: u128,
}

/// Values baskets through a price source and derives what they must trade.
#[derive(Clone)]
pub struct WeightEngine {
    prices: Arc<dyn PriceSource>,
}

impl WeightEngine {
    pub fn new(prices: Arc<dyn PriceSource>) -> Self {
        Self { prices }
    }

    pub fn prices(&self) -> &Arc<dyn PriceSource> {
        &self.prices
    }

    pub fn valuation(&self, snapshot: &BasketSnapshot) -> Result<Valuation, PlanError> {
        snapshot.validate()?;
        let mut values = Vec::with_capacity(snapshot.assets.len());
        let mut total: u128 = 0;
        for (asset, &balance) in snapshot.assets.iter().zip(&snapshot.balances) {
            let value = self.prices.quote(balance, asset, &snapshot.base_asset)?;
            total = total.checked_add(value).ok_or(MathError::Overflow)?;
            values.push(value);
        }
        Ok(Valuation { values, total })
    }

    /// Current vs target weight per asset. An empty basket reports zero
    /// current weights.
    pub fn compute_deviation(
        &self,
        snapshot: &BasketSnapshot,
    ) -> Result<Vec<AssetDeviation>, PlanError> {
        let valuation = self.valuation(snapshot)?;
        deviations(snapshot, &valuation)
    }

    /// True when any asset deviates from target by strictly more than
    /// `limit`. An empty basket never needs rebalancing.
    pub fn needs_rebalance(
        &self,
        snapshot: &BasketSnapshot,
        limit: u128,
    ) -> Result<bool, PlanError> {
        let valuation = self.valuation(snapshot)?;
        if valuation.total == 0 {
            return Ok(false);
        }
        Ok(deviations(snapshot, &valuation)?
            .iter()
            .any(|d| d.deviation() > limit))
    }

    /// Largest per-asset deviation, zero for an empty basket.
    pub fn max_deviation(&self, snapshot: &BasketSnapshot) -> Result<u128, PlanError> {
        let valuation = self.valuation(snapshot)?;
        if valuation.total == 0 {
            return Ok(0);
        }
        Ok(deviations(snapshot, &valuation)?
            .iter()
            .map(AssetDeviation::deviation)
            .max()
            .unwrap_or(0))
    }

    /// Per-asset position against target holdings.
    pub fn target_deltas(&self, snapshot: &BasketSnapshot) -> Result<Vec<AssetDelta>, PlanError> {
        let valuation = self.valuation(snapshot)?;
        let mut deltas = Vec::with_capacity(snapshot.assets.len());
        for (i, asset) in snapshot.assets.iter().enumerate() {
            let target_value = mul_div(
                valuation.total,
                u128::from(snapshot.target_weights[i]),
                WAD,
            )?;
            let target_balance = self
                .prices
                .quote(target_value, &snapshot.base_asset, asset)?;
            deltas.push(AssetDelta {
                asset: *asset,
                balance: snapshot.balances[i],
                target_balance,
                value: valuation.values[i],
                target_value,
            });
        }
        Ok(deltas)
    }

    /// Pair each overweight asset with underweight assets by value.
    ///
    /// Overweight and underweight assets are walked in position order. Every
    /// excess unit ends up in exactly one intent: rounding leftovers after the
    /// last underweight asset is filled are sold into that last asset.
    pub fn swap_intents(
        &self,
        basket_index: usize,
        snapshot: &BasketSnapshot,
    ) -> Result<Vec<SwapIntent>, PlanError> {
        let deltas = self.target_deltas(snapshot)?;

        // (asset, units, value)
        let sells: Vec<(Address, u128, u128)> = deltas
            .iter()
            .filter(|d| d.excess() > 0)
            .map(|d| (d.asset, d.excess(), d.value - d.target_value))
            .collect();
        let buys: Vec<(Address, u128)> = deltas
            .iter()
            .filter(|d| d.deficit_value() > 0)
            .map(|d| (d.asset, d.deficit_value()))
            .collect();

        let mut intents: Vec<SwapIntent> = Vec::new();
        let Some(&(last_buy, _)) = buys.last() else {
            return Ok(intents);
        };

        let mut push = |sell_asset: Address, buy_asset: Address, units: u128| {
            if units == 0 {
                return;
            }
            if let Some(last) = intents.last_mut() {
                if last.sell_asset == sell_asset && last.buy_asset == buy_asset {
                    last.sell_amount += units;
                    return;
                }
            }
            intents.push(SwapIntent {
                basket: snapshot.basket,
                basket_index,
                sell_asset,
                buy_asset,
                sell_amount: units,
            });
        };

        let mut bi = 0;
        let mut buy_left = buys[0].1;
        for &(sell_asset, units, value) in &sells {
            let mut units_left = units;
            let mut value_left = value;
            while units_left > 0 {
                if bi >= buys.len() {
                    push(sell_asset, last_buy, units_left);
                    break;
                }
                let matched = value_left.min(buy_left);
                let take = if matched >= value_left {
                    units_left
                } else {
                    mul_div(units_left, matched, value_left)?
                };
                push(sell_asset, buys[bi].0, take);
                units_left -= take;
                value_left -= matched;
                buy_left -= matched;
                if buy_left == 0 {
                    bi += 1;
                    buy_left = buys.get(bi).map_or(0, |b| b.1);
                }
            }
        }
        Ok(intents)
    }
}

fn deviations(
    snapshot: &BasketSnapshot,
    valuation: &Valuation,
) -> Result<Vec<AssetDeviation>, PlanError> {
    snapshot
        .assets
        .iter()
        .enumerate()
        .map(|(i, asset)| {
            let current_weight = if valuation.total == 0 {
                0
            } else {
                wad_div(valuation.values[i], valuation.total)?
            };
            Ok(AssetDeviation {
                asset: *asset,
                current_weight,
                target_weight: u128::from(snapshot.target_weights[i]),
            })
        })
        .collect()
}
