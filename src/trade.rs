//! Internal and external trade records, settlement math, and commitments.

use alloy_primitives::{Address, B256};
use sha2::{Digest, Sha256};

use crate::error::{MathError, PriceError};
use crate::price::PriceSource;
use crate::wad::{WAD, half_fee, mul_div};

/// A swap settled directly between two baskets at oracle prices.
///
/// `from_basket` gives `sell_amount` of `sell_asset` and receives
/// `buy_asset` from `to_basket`. The net amount `from_basket` receives must
/// land in `[min_amount, max_amount]`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InternalTrade {
    pub from_basket: Address,
    pub to_basket: Address,
    pub sell_asset: Address,
    pub buy_asset: Address,
    pub sell_amount: u128,
    pub min_amount: u128,
    pub max_amount: u128,
}

/// One basket's part of an external trade.
///
/// `amount` is the exact quantity of the sell asset this basket puts in.
/// `fraction` is its WAD-scaled share, used to divide whatever the venue
/// hands back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OwnershipSplit {
    pub basket: Address,
    pub fraction: u128,
    pub amount: u128,
}

/// A residual swap routed through the trade venue on behalf of one or more
/// baskets. Ownership fractions sum to exactly `WAD` and owner amounts sum
/// to exactly `sell_amount`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExternalTrade {
    pub sell_asset: Address,
    pub buy_asset: Address,
    pub sell_amount: u128,
    pub min_amount: u128,
    pub ownership: Vec<OwnershipSplit>,
}

impl ExternalTrade {
    /// Sum of ownership fractions.
    pub fn ownership_total(&self) -> u128 {
        self.ownership.iter().map(|s| s.fraction).sum()
    }

    /// Sum of owner sell amounts.
    pub fn owned_total(&self) -> u128 {
        self.ownership.iter().map(|s| s.amount).sum()
    }

    /// What each owner puts into the sell side.
    pub fn sell_legs(&self) -> impl Iterator<Item = (Address, u128)> + '_ {
        self.ownership.iter().map(|s| (s.basket, s.amount))
    }

    /// Divide `amount` across owners pro rata. The last owner receives the
    /// remainder so the parts always sum to `amount`.
    pub fn split_amount(&self, amount: u128) -> Result<Vec<(Address, u128)>, MathError> {
        let mut parts = Vec::with_capacity(self.ownership.len());
        let mut assigned: u128 = 0;
        let last = self.ownership.len().saturating_sub(1);
        for (i, split) in self.ownership.iter().enumerate() {
            let part = if i == last {
                amount.checked_sub(assigned).ok_or(MathError::Overflow)?
            } else {
                mul_div(amount, split.fraction, WAD)?
            };
            assigned = assigned.checked_add(part).ok_or(MathError::Overflow)?;
            parts.push((split.basket, part));
        }
        Ok(parts)
    }

    fn hash_into(&self, hasher: &mut Sha256) {
        hasher.update(self.sell_asset.as_slice());
        hasher.update(self.buy_asset.as_slice());
        hasher.update(self.sell_amount.to_be_bytes());
        hasher.update(self.min_amount.to_be_bytes());
        hasher.update((self.ownership.len() as u64).to_be_bytes());
        for split in &self.ownership {
            hasher.update(split.basket.as_slice());
            hasher.update(split.fraction.to_be_bytes());
            hasher.update(split.amount.to_be_bytes());
        }
    }
}

/// Commitment over an ordered list of external trades.
pub fn external_trades_hash(trades: &[ExternalTrade]) -> B256 {
    let mut hasher = Sha256::new();
    hasher.update((trades.len() as u64).to_be_bytes());
    for trade in trades {
        trade.hash_into(&mut hasher);
    }
    B256::from_slice(hasher.finalize().as_slice())
}

/// Amounts moved by one internal trade, fees included.
///
/// `from_basket` pays `sell_amount` and receives `net_buy`; `to_basket` pays
/// `initial_buy` and receives `net_sell`. The two fees accrue to the
/// protocol, so each asset is conserved exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InternalSettlement {
    pub sell_amount: u128,
    pub fee_on_sell: u128,
    pub net_sell: u128,
    pub initial_buy: u128,
    pub fee_on_buy: u128,
    pub net_buy: u128,
}

impl InternalSettlement {
    /// True when `net_buy` honours the trade's bounds.
    pub fn within_bounds(&self, trade: &InternalTrade) -> bool {
        trade.min_amount <= self.net_buy && self.net_buy <= trade.max_amount
    }
}

/// Price an internal trade and split the swap fee across both legs.
pub fn settle_internal(
    trade: &InternalTrade,
    prices: &dyn PriceSource,
    swap_fee_bps: u16,
) -> Result<InternalSettlement, PriceError> {
    let fee_on_sell = half_fee(trade.sell_amount, swap_fee_bps)?;
    let initial_buy = prices.quote(trade.sell_amount, &trade.sell_asset, &trade.buy_asset)?;
    let fee_on_buy = half_fee(initial_buy, swap_fee_bps)?;
    Ok(InternalSettlement {
        sell_amount: trade.sell_amount,
        fee_on_sell,
        net_sell: trade.sell_amount - fee_on_sell,
        initial_buy,
        fee_on_buy,
        net_buy: initial_buy - fee_on_buy,
    })
}
