//! Price sources and the divergence-checked price guard.
//!
//! All quotes are expressed in units of the quote asset. A source never
//! reports an implicit zero: an unusable answer is an error.

mod guard;
mod table;

pub use guard::{MAX_DIVERGENCE_CEILING, MAX_DIVERGENCE_FLOOR, PriceGuard};
pub use table::PriceTable;

use alloy_primitives::Address;

use crate::error::PriceError;

/// Converts amounts of one asset into another.
pub trait PriceSource: Send + Sync {
    /// Amount of `quote` equivalent to `amount` of `base`.
    fn quote(&self, amount: u128, base: &Address, quote: &Address) -> Result<u128, PriceError>;

    /// `(bid, ask)` for `amount` of `base` in `quote`.
    ///
    /// Sources without a spread return the mid quote on both sides.
    fn quotes(
        &self,
        amount: u128,
        base: &Address,
        quote: &Address,
    ) -> Result<(u128, u128), PriceError> {
        let mid = self.quote(amount, base, quote)?;
        Ok((mid, mid))
    }
}
