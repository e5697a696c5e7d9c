//! Venue data types.

use serde::Serialize;

/// What one external trade delivered: the unsold remainder of the sell
/// asset and the amount of buy asset received.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ClaimedAmounts {
    pub sell: u128,
    pub buy: u128,
}

impl ClaimedAmounts {
    pub fn new(sell: u128, buy: u128) -> Self {
        Self { sell, buy }
    }
}
