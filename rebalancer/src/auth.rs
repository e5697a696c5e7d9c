//! Capability-based authorization.

use std::sync::RwLock;

use basketbook::Address;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

/// A right to invoke a class of manager operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Grants and revokes roles; unpauses.
    Admin,
    /// Creates baskets, edits bit flags and fees, collects swap fees.
    Manager,
    /// Changes the trade venue adapter and swap fee.
    Timelock,
    /// Pauses the protocol.
    Pauser,
    /// Proposes and completes rebalances, triggers retries.
    RebalanceProposer,
    /// Proposes internal and external trades.
    TokenSwapProposer,
    /// Sends external trades to the venue.
    TokenSwapExecutor,
    /// Basket share tokens: deposits and redemptions.
    BasketToken,
}

/// Decides whether a caller holds a capability.
pub trait Authorizer: Send + Sync {
    fn is_authorized(&self, caller: &Address, capability: Capability) -> bool;
}

/// In-memory role table.
#[derive(Debug, Default)]
pub struct RoleTable {
    roles: RwLock<FxHashMap<Capability, FxHashSet<Address>>>,
}

impl RoleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant every capability to `holder`.
    pub fn with_all(holder: Address) -> Self {
        let table = Self::new();
        for capability in [
            Capability::Admin,
            Capability::Manager,
            Capability::Timelock,
            Capability::Pauser,
            Capability::RebalanceProposer,
            Capability::TokenSwapProposer,
            Capability::TokenSwapExecutor,
            Capability::BasketToken,
        ] {
            table.grant(holder, capability);
        }
        table
    }

    pub fn grant(&self, holder: Address, capability: Capability) {
        let mut roles = self.roles.write().unwrap_or_else(|e| e.into_inner());
        roles.entry(capability).or_default().insert(holder);
    }

    pub fn revoke(&self, holder: &Address, capability: Capability) {
        let mut roles = self.roles.write().unwrap_or_else(|e| e.into_inner());
        if let Some(holders) = roles.get_mut(&capability) {
            holders.remove(holder);
        }
    }
}

impl Authorizer for RoleTable {
    fn is_authorized(&self, caller: &Address, capability: Capability) -> bool {
        let roles = self.roles.read().unwrap_or_else(|e| e.into_inner());
        roles
            .get(&capability)
            .is_some_and(|holders| holders.contains(caller))
    }
}
