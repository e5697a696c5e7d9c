//! Scenario files (scenario.json): assets, prices, and baskets to rebalance.

use std::path::Path;

use basketbook::{Address, WAD};
use chrono::{DateTime, Utc};
use rustc_hash::FxHashSet;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// A snapshot of the world to drive one rebalance epoch against.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub timestamp: DateTime<Utc>,
    pub assets: Vec<AssetSpec>,
    pub baskets: Vec<BasketSpec>,
}

/// An asset and its WAD-scaled value in the shared numeraire.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetSpec {
    pub symbol: String,
    pub price: u128,
    /// Anchor source price; defaults to `price`.
    #[serde(default)]
    pub anchor_price: Option<u128>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BasketSpec {
    pub name: String,
    pub symbol: String,
    pub base_asset: String,
    pub holdings: Vec<Holding>,
}

/// One asset of a basket: its balance in raw units and WAD target weight.
#[derive(Debug, Clone, Deserialize)]
pub struct Holding {
    pub asset: String,
    #[serde(default)]
    pub balance: u128,
    pub weight: u64,
}

/// Address standing in for an asset symbol.
pub fn asset_address(symbol: &str) -> Address {
    let mut hasher = Sha256::new();
    hasher.update(b"asset:");
    hasher.update(symbol.as_bytes());
    Address::from_slice(&hasher.finalize()[12..])
}

impl Scenario {
    /// Load and validate a scenario file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::ScenarioRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json(&contents)
    }

    /// Parse from a JSON string (useful for testing).
    pub fn from_json(json: &str) -> Result<Self> {
        let scenario: Scenario = serde_json::from_str(json)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn asset(&self, symbol: &str) -> Option<&AssetSpec> {
        self.assets.iter().find(|a| a.symbol == symbol)
    }

    /// Symbol of the asset at `address`, for display.
    pub fn symbol_of(&self, address: &Address) -> Option<&str> {
        self.assets
            .iter()
            .find(|a| asset_address(&a.symbol) == *address)
            .map(|a| a.symbol.as_str())
    }

    fn validate(&self) -> Result<()> {
        if self.assets.is_empty() {
            return Err(Error::Scenario("assets list is empty".into()));
        }
        let mut seen = FxHashSet::default();
        for a in &self.assets {
            if a.symbol.is_empty() {
                return Err(Error::Scenario("empty asset symbol".into()));
            }
            if !seen.insert(a.symbol.as_str()) {
                return Err(Error::Scenario(format!("duplicate asset: {}", a.symbol)));
            }
            if a.price == 0 || a.anchor_price == Some(0) {
                return Err(Error::Scenario(format!("asset {} has a zero price", a.symbol)));
            }
        }

        if self.baskets.is_empty() {
            return Err(Error::Scenario("baskets list is empty".into()));
        }
        let mut symbols = FxHashSet::default();
        for b in &self.baskets {
            if !symbols.insert(b.symbol.as_str()) {
                return Err(Error::Scenario(format!("duplicate basket: {}", b.symbol)));
            }
            self.validate_basket(b)?;
        }
        Ok(())
    }

    fn validate_basket(&self, basket: &BasketSpec) -> Result<()> {
        let fail = |msg: String| Error::Scenario(format!("basket {}: {msg}", basket.symbol));
        if basket.holdings.is_empty() {
            return Err(fail("no holdings".into()));
        }
        let mut held = FxHashSet::default();
        for h in &basket.holdings {
            if self.asset(&h.asset).is_none() {
                return Err(fail(format!("unknown asset {}", h.asset)));
            }
            if !held.insert(h.asset.as_str()) {
                return Err(fail(format!("asset {} listed twice", h.asset)));
            }
        }
        if !held.contains(basket.base_asset.as_str()) {
            return Err(fail(format!(
                "base asset {} is not a holding",
                basket.base_asset
            )));
        }
        let sum: u128 = basket.holdings.iter().map(|h| u128::from(h.weight)).sum();
        if sum != WAD {
            return Err(fail(format!("weights sum to {sum}, expected {WAD}")));
        }
        Ok(())
    }
}
