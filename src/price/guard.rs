use std::sync::Arc;

use alloy_primitives::Address;

use super::PriceSource;
use crate::error::PriceError;
use crate::wad::{WAD, exceeds_relative};

/// Smallest accepted divergence tolerance: 0.1%.
pub const MAX_DIVERGENCE_FLOOR: u128 = WAD / 1_000;

/// Largest accepted divergence tolerance: 50%.
pub const MAX_DIVERGENCE_CEILING: u128 = WAD / 2;

/// Cross-checks a primary price source against an independent anchor.
///
/// Every quote is taken from both sources. The primary answer is returned
/// only when `|primary - anchor| / anchor <= max_divergence`; the boundary
/// itself passes. Stateless apart from the configured sources.
pub struct PriceGuard {
    primary: Arc<dyn PriceSource>,
    anchor: Arc<dyn PriceSource>,
    max_divergence: u128,
}

impl PriceGuard {
    pub fn new(
        primary: Arc<dyn PriceSource>,
        anchor: Arc<dyn PriceSource>,
        max_divergence: u128,
    ) -> Result<Self, PriceError> {
        if !(MAX_DIVERGENCE_FLOOR..=MAX_DIVERGENCE_CEILING).contains(&max_divergence) {
            return Err(PriceError::InvalidConfiguration(format!(
                "max divergence {max_divergence} outside [{MAX_DIVERGENCE_FLOOR}, {MAX_DIVERGENCE_CEILING}]"
            )));
        }
        Ok(Self {
            primary,
            anchor,
            max_divergence,
        })
    }

    pub fn max_divergence(&self) -> u128 {
        self.max_divergence
    }

    fn reconcile(&self, primary: u128, anchor: u128) -> Result<u128, PriceError> {
        match (primary, anchor) {
            // Both sources agree the amount rounds to nothing.
            (0, 0) => Ok(0),
            (0, _) | (_, 0) => Err(PriceError::InvalidAnswer(format!(
                "one source quoted zero (primary {primary}, anchor {anchor})"
            ))),
            _ if exceeds_relative(primary, anchor, anchor, self.max_divergence) => {
                Err(PriceError::DivergentPrices {
                    primary,
                    anchor,
                    max_divergence: self.max_divergence,
                })
            }
            _ => Ok(primary),
        }
    }
}

impl PriceSource for PriceGuard {
    fn quote(&self, amount: u128, base: &Address, quote: &Address) -> Result<u128, PriceError> {
        let primary = self.primary.quote(amount, base, quote)?;
        let anchor = self.anchor.quote(amount, base, quote)?;
        self.reconcile(primary, anchor)
    }

    fn quotes(
        &self,
        amount: u128,
        base: &Address,
        quote: &Address,
    ) -> Result<(u128, u128), PriceError> {
        let (p_bid, p_ask) = self.primary.quotes(amount, base, quote)?;
        let (a_bid, a_ask) = self.anchor.quotes(amount, base, quote)?;
        Ok((self.reconcile(p_bid, a_bid)?, self.reconcile(p_ask, a_ask)?))
    }
}
