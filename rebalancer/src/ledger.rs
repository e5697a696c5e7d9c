//! Basket registry and per-basket asset balances.

use std::fmt;
use std::sync::Arc;

use basketbook::{
    Address, AssetRegistry, B256, BasketSnapshot, BitFlag, MathError, WeightStrategy,
};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Identity of a basket: its universe and strategy.
pub fn basket_id(bit_flag: &BitFlag, strategy: &Address) -> B256 {
    let mut hasher = Sha256::new();
    hasher.update(bit_flag.to_be_bytes());
    hasher.update(strategy.as_slice());
    B256::from_slice(hasher.finalize().as_slice())
}

/// Deterministic basket address from its name, symbol, and creation index.
pub fn basket_address(name: &str, symbol: &str, index: usize) -> Address {
    let mut hasher = Sha256::new();
    hasher.update(b"basket");
    hasher.update((name.len() as u64).to_be_bytes());
    hasher.update(name.as_bytes());
    hasher.update((symbol.len() as u64).to_be_bytes());
    hasher.update(symbol.as_bytes());
    hasher.update((index as u64).to_be_bytes());
    Address::from_slice(&hasher.finalize()[12..])
}

/// A registered basket.
#[derive(Clone)]
pub struct Basket {
    pub address: Address,
    /// Creation order; also the basket's bit in an epoch mask.
    pub index: usize,
    pub name: String,
    pub symbol: String,
    pub base_asset: Address,
    pub bit_flag: BitFlag,
    pub strategy: Arc<dyn WeightStrategy>,
    /// Basis points.
    pub management_fee: u16,
}

impl Basket {
    pub fn info(&self) -> BasketInfo {
        BasketInfo {
            address: self.address,
            index: self.index,
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            base_asset: self.base_asset,
            bit_flag: self.bit_flag,
            strategy: self.strategy.id(),
            management_fee: self.management_fee,
        }
    }
}

impl fmt::Debug for Basket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Basket")
            .field("address", &self.address)
            .field("index", &self.index)
            .field("symbol", &self.symbol)
            .field("bit_flag", &self.bit_flag)
            .field("strategy", &self.strategy.id())
            .finish_non_exhaustive()
    }
}

/// Plain-data view of a basket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BasketInfo {
    pub address: Address,
    pub index: usize,
    pub name: String,
    pub symbol: String,
    pub base_asset: Address,
    pub bit_flag: BitFlag,
    pub strategy: Address,
    pub management_fee: u16,
}

/// Fields of a basket to be created.
pub struct NewBasket {
    pub name: String,
    pub symbol: String,
    pub base_asset: Address,
    pub bit_flag: BitFlag,
    pub strategy: Arc<dyn WeightStrategy>,
    pub management_fee: u16,
}

/// Baskets, their balances, and accrued swap fees.
#[derive(Clone, Default)]
pub struct BasketLedger {
    baskets: Vec<Basket>,
    by_address: FxHashMap<Address, usize>,
    ids: FxHashSet<B256>,
    balances: FxHashMap<(Address, Address), u128>,
    swap_fees: FxHashMap<Address, u128>,
}

impl BasketLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.baskets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.baskets.is_empty()
    }

    pub fn baskets(&self) -> &[Basket] {
        &self.baskets
    }

    /// Register a basket. Fails past 256 baskets or when the
    /// `(bit_flag, strategy)` pair is already taken.
    pub fn insert(&mut self, new: NewBasket) -> Result<&Basket> {
        let index = self.baskets.len();
        if index >= BitFlag::CAPACITY {
            return Err(Error::BasketLimitReached);
        }
        let id = basket_id(&new.bit_flag, &new.strategy.id());
        if self.ids.contains(&id) {
            return Err(Error::BasketIdAlreadyExists);
        }
        let address = basket_address(&new.name, &new.symbol, index);
        self.ids.insert(id);
        self.by_address.insert(address, index);
        self.baskets.push(Basket {
            address,
            index,
            name: new.name,
            symbol: new.symbol,
            base_asset: new.base_asset,
            bit_flag: new.bit_flag,
            strategy: new.strategy,
            management_fee: new.management_fee,
        });
        Ok(&self.baskets[index])
    }

    pub fn index_of(&self, basket: &Address) -> Result<usize> {
        self.by_address
            .get(basket)
            .copied()
            .ok_or(Error::BasketNotFound(*basket))
    }

    pub fn basket(&self, basket: &Address) -> Result<&Basket> {
        let i = self.index_of(basket)?;
        Ok(&self.baskets[i])
    }

    pub fn basket_mut(&mut self, basket: &Address) -> Result<&mut Basket> {
        let i = self.index_of(basket)?;
        Ok(&mut self.baskets[i])
    }

    /// Replace a basket's universe, keeping the id index in step.
    pub fn set_bit_flag(&mut self, basket: &Address, bit_flag: BitFlag) -> Result<BitFlag> {
        let i = self.index_of(basket)?;
        let strategy = self.baskets[i].strategy.id();
        let old = self.baskets[i].bit_flag;
        let id = basket_id(&bit_flag, &strategy);
        if self.ids.contains(&id) {
            return Err(Error::BasketIdAlreadyExists);
        }
        self.ids.remove(&basket_id(&old, &strategy));
        self.ids.insert(id);
        self.baskets[i].bit_flag = bit_flag;
        Ok(old)
    }

    pub fn balance_of(&self, basket: &Address, asset: &Address) -> u128 {
        self.balances.get(&(*basket, *asset)).copied().unwrap_or(0)
    }

    pub fn credit(&mut self, basket: &Address, asset: &Address, amount: u128) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let slot = self.balances.entry((*basket, *asset)).or_default();
        *slot = slot.checked_add(amount).ok_or(MathError::Overflow)?;
        Ok(())
    }

    pub fn debit(&mut self, basket: &Address, asset: &Address, amount: u128) -> Result<()> {
        let available = self.balance_of(basket, asset);
        if available < amount {
            return Err(Error::InsufficientBalance {
                basket: *basket,
                asset: *asset,
                available,
                required: amount,
            });
        }
        if amount > 0 {
            self.balances.insert((*basket, *asset), available - amount);
        }
        Ok(())
    }

    pub fn accrue_fee(&mut self, asset: &Address, amount: u128) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        let slot = self.swap_fees.entry(*asset).or_default();
        *slot = slot.checked_add(amount).ok_or(MathError::Overflow)?;
        Ok(())
    }

    pub fn swap_fees(&self, asset: &Address) -> u128 {
        self.swap_fees.get(asset).copied().unwrap_or(0)
    }

    /// Return and zero the accrued fees of `asset`.
    pub fn take_fees(&mut self, asset: &Address) -> u128 {
        self.swap_fees.remove(asset).unwrap_or(0)
    }

    /// Current holdings and targets of `basket`, for planning.
    pub fn snapshot(&self, basket: &Address, registry: &dyn AssetRegistry) -> Result<BasketSnapshot> {
        let b = self.basket(basket)?;
        let assets = registry.assets_for(&b.bit_flag)?;
        let target_weights = b.strategy.target_weights(&b.bit_flag)?;
        let balances = assets
            .iter()
            .map(|asset| self.balance_of(basket, asset))
            .collect();
        Ok(BasketSnapshot {
            basket: *basket,
            base_asset: b.base_asset,
            assets,
            balances,
            target_weights,
        })
    }
}

impl fmt::Debug for BasketLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasketLedger")
            .field("baskets", &self.baskets)
            .field("balances", &self.balances.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use basketbook::{ManagedWeightStrategy, StaticAssetRegistry, WAD};

    use super::*;

    fn assets() -> Vec<Address> {
        (1..=3).map(Address::repeat_byte).collect()
    }

    fn strategy() -> Arc<ManagedWeightStrategy> {
        let s = ManagedWeightStrategy::new(Address::repeat_byte(0x50));
        let half = (WAD / 2) as u64;
        s.set_target_weights(BitFlag::from_indices([0, 1]).unwrap(), vec![half, half], 0)
            .unwrap();
        Arc::new(s)
    }

    fn new_basket(strategy: Arc<ManagedWeightStrategy>, bit_flag: BitFlag) -> NewBasket {
        NewBasket {
            name: "Blue".into(),
            symbol: "BLU".into(),
            base_asset: Address::repeat_byte(1),
            bit_flag,
            strategy,
            management_fee: 0,
        }
    }

    #[test]
    fn insert_and_lookup() {
        let mut ledger = BasketLedger::new();
        let flag = BitFlag::from_indices([0, 1]).unwrap();
        let address = ledger.insert(new_basket(strategy(), flag)).unwrap().address;
        assert_eq!(address, basket_address("Blue", "BLU", 0));
        assert_eq!(ledger.index_of(&address).unwrap(), 0);
        assert!(matches!(
            ledger.basket(&Address::ZERO),
            Err(Error::BasketNotFound(_))
        ));
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut ledger = BasketLedger::new();
        let flag = BitFlag::from_indices([0, 1]).unwrap();
        let s = strategy();
        ledger.insert(new_basket(s.clone(), flag)).unwrap();
        assert!(matches!(
            ledger.insert(new_basket(s, flag)),
            Err(Error::BasketIdAlreadyExists)
        ));
    }

    #[test]
    fn debit_checks_balance() {
        let mut ledger = BasketLedger::new();
        let (b, a) = (Address::repeat_byte(9), Address::repeat_byte(1));
        ledger.credit(&b, &a, 100).unwrap();
        ledger.debit(&b, &a, 40).unwrap();
        assert_eq!(ledger.balance_of(&b, &a), 60);
        let err = ledger.debit(&b, &a, 61).unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientBalance {
                available: 60,
                required: 61,
                ..
            }
        ));
        assert_eq!(ledger.balance_of(&b, &a), 60);
    }

    #[test]
    fn fees_accrue_and_drain() {
        let mut ledger = BasketLedger::new();
        let a = Address::repeat_byte(1);
        ledger.accrue_fee(&a, 5).unwrap();
        ledger.accrue_fee(&a, 7).unwrap();
        assert_eq!(ledger.swap_fees(&a), 12);
        assert_eq!(ledger.take_fees(&a), 12);
        assert_eq!(ledger.swap_fees(&a), 0);
    }

    #[test]
    fn snapshot_follows_bit_flag_order() {
        let registry = StaticAssetRegistry::new(assets()).unwrap();
        let mut ledger = BasketLedger::new();
        let flag = BitFlag::from_indices([1, 0]).unwrap();
        let b = ledger.insert(new_basket(strategy(), flag)).unwrap().address;
        ledger.credit(&b, &Address::repeat_byte(2), 30).unwrap();

        let snap = ledger.snapshot(&b, &registry).unwrap();
        assert_eq!(snap.assets, vec![Address::repeat_byte(1), Address::repeat_byte(2)]);
        assert_eq!(snap.balances, vec![0, 30]);
        assert_eq!(snap.target_weights.iter().map(|&w| u128::from(w)).sum::<u128>(), WAD);
    }

    #[test]
    fn set_bit_flag_moves_id() {
        let mut ledger = BasketLedger::new();
        let s = strategy();
        let b = ledger
            .insert(new_basket(s.clone(), BitFlag::from_indices([0, 1]).unwrap()))
            .unwrap()
            .address;
        let wider = BitFlag::from_indices([0, 1, 2]).unwrap();
        let old = ledger.set_bit_flag(&b, wider).unwrap();
        assert_eq!(old, BitFlag::from_indices([0, 1]).unwrap());
        // The old universe is free again.
        ledger.insert(new_basket(s, old)).unwrap();
    }
}
