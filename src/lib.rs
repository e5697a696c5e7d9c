//! # basketbook
//!
//! Deterministic core of a multi-basket rebalancing protocol.
//!
//! ## Features
//!
//! - **Price guard**: every quote cross-checked against an independent anchor
//! - **Weight engine**: basket valuation, deviation, and per-basket swap intents
//! - **Trade netting**: opposing needs settled basket-to-basket at oracle prices,
//!   only the residual routed to an external venue
//! - **Fixed-point math**: WAD (1e18) fractions with 256-bit intermediates
//! - **Commitments**: SHA-256 hashes over basket sets and external trade lists
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use basketbook::{
//!     Address, BasketSnapshot, ManualClock, NettingParams, PriceTable, TradeNetter,
//!     WeightEngine, WAD,
//! };
//!
//! let (usd, eth) = (Address::repeat_byte(1), Address::repeat_byte(2));
//! let prices = PriceTable::new(Arc::new(ManualClock::new(0)));
//! prices.set_price(usd, WAD);
//! prices.set_price(eth, 2_000 * WAD);
//!
//! let netter = TradeNetter::new(
//!     WeightEngine::new(Arc::new(prices)),
//!     NettingParams { slippage_limit: WAD / 200, swap_fee_bps: 0 },
//! );
//!
//! // All in USD, targeting 50/50 USD/ETH.
//! let basket = BasketSnapshot {
//!     basket: Address::repeat_byte(0xaa),
//!     base_asset: usd,
//!     assets: vec![usd, eth],
//!     balances: vec![4_000, 0],
//!     target_weights: vec![(WAD / 2) as u64, (WAD / 2) as u64],
//! };
//!
//! let plan = netter.plan_trades(&[basket]).unwrap();
//! assert!(plan.internal.is_empty());
//! assert_eq!(plan.external[0].sell_amount, 2_000);
//! ```
//!
//! ## Units
//!
//! Amounts are raw `u128` token units. Weights, ownership fractions, and
//! every tolerance are WAD-scaled, so `WAD / 100` is 1%. Prices in a
//! [`PriceTable`] are the numeraire value of one unit, WAD-scaled.

pub mod asset;
pub mod basket;
pub mod bitflag;
pub mod clock;
pub mod error;
pub mod netting;
pub mod price;
pub mod strategy;
pub mod trade;
pub mod wad;
pub mod weights;

pub use alloy_primitives::{Address, B256, U256};
pub use asset::{AssetRegistry, StaticAssetRegistry};
pub use basket::{BasketSnapshot, basket_set_hash};
pub use bitflag::BitFlag;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BitFlagError, MathError, PlanError, PriceError, StrategyError};
pub use netting::{NettingParams, TradeNetter, TradePlan};
pub use price::{PriceGuard, PriceSource, PriceTable};
pub use strategy::{ManagedWeightStrategy, TargetWeightSet, WeightStrategy};
pub use trade::{
    ExternalTrade, InternalSettlement, InternalTrade, OwnershipSplit, external_trades_hash,
    settle_internal,
};
pub use wad::{BPS, WAD};
pub use weights::{AssetDelta, AssetDeviation, SwapIntent, Valuation, WeightEngine};
