use std::sync::{Arc, RwLock};

use alloy_primitives::Address;
use rustc_hash::FxHashMap;

use super::PriceSource;
use crate::clock::Clock;
use crate::error::PriceError;
use crate::wad::{BPS, mul_div, mul_div_up};

#[derive(Clone, Copy, Debug)]
struct PriceEntry {
    /// Numeraire value of one unit of the asset, WAD-scaled.
    price: u128,
    published_at: u64,
}

/// A table of per-asset prices in a common numeraire.
///
/// `quote(amount, base, quote) = amount * price(base) / price(quote)`.
/// Entries older than `max_age` seconds, or priced at zero, are rejected
/// as invalid answers.
pub struct PriceTable {
    entries: RwLock<FxHashMap<Address, PriceEntry>>,
    clock: Arc<dyn Clock>,
    max_age: Option<u64>,
    spread_bps: u16,
}

impl PriceTable {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
            clock,
            max_age: None,
            spread_bps: 0,
        }
    }

    /// Reject prices published more than `secs` seconds ago.
    pub fn with_max_age(mut self, secs: u64) -> Self {
        self.max_age = Some(secs);
        self
    }

    /// Quote bid/ask at `bps` either side of mid.
    pub fn with_spread_bps(mut self, bps: u16) -> Self {
        self.spread_bps = bps.min(BPS as u16);
        self
    }

    /// Publish `price` for `asset` at the current clock time.
    pub fn set_price(&self, asset: Address, price: u128) {
        self.set_price_at(asset, price, self.clock.now());
    }

    pub fn set_price_at(&self, asset: Address, price: u128, published_at: u64) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            asset,
            PriceEntry {
                price,
                published_at,
            },
        );
    }

    pub fn remove(&self, asset: &Address) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(asset);
    }

    /// Current numeraire price of `asset`, validated.
    pub fn price_of(&self, asset: &Address) -> Result<u128, PriceError> {
        let entry = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            entries.get(asset).copied()
        };
        let entry =
            entry.ok_or_else(|| PriceError::InvalidAnswer(format!("no price for {asset}")))?;
        if entry.price == 0 {
            return Err(PriceError::InvalidAnswer(format!(
                "non-positive price for {asset}"
            )));
        }
        if let Some(max_age) = self.max_age {
            let age = self.clock.now().saturating_sub(entry.published_at);
            if age > max_age {
                return Err(PriceError::InvalidAnswer(format!(
                    "stale price for {asset}: {age}s old, limit {max_age}s"
                )));
            }
        }
        Ok(entry.price)
    }
}

impl PriceSource for PriceTable {
    fn quote(&self, amount: u128, base: &Address, quote: &Address) -> Result<u128, PriceError> {
        if base == quote {
            return Ok(amount);
        }
        let base_price = self.price_of(base)?;
        let quote_price = self.price_of(quote)?;
        Ok(mul_div(amount, base_price, quote_price)?)
    }

    fn quotes(
        &self,
        amount: u128,
        base: &Address,
        quote: &Address,
    ) -> Result<(u128, u128), PriceError> {
        let mid = self.quote(amount, base, quote)?;
        if self.spread_bps == 0 || base == quote {
            return Ok((mid, mid));
        }
        let spread = u128::from(self.spread_bps);
        let bid = mul_div(mid, BPS - spread, BPS)?;
        let ask = mul_div_up(mid, BPS + spread, BPS)?;
        Ok((bid, ask))
    }
}
