//! basketbook-rebalancer: the rebalance manager for basketbook baskets.
//!
//! Runs the epoch protocol (propose, propose trades, execute, complete)
//! over a set of baskets, with capability checks, a re-entrancy guard,
//! timeout-driven retries, swap-fee accrual, and a JSONL audit trail.

pub mod audit;
pub mod auth;
pub mod config;
pub mod epoch;
pub mod error;
pub mod events;
pub mod guard;
pub mod ledger;
pub mod manager;
pub mod runner;
pub mod scenario;

pub use auth::{Authorizer, Capability, RoleTable};
pub use config::{Config, ManagerConfig};
pub use epoch::{ActiveRebalance, RebalanceStatus};
pub use error::{Error, ErrorKind, Result};
pub use events::{EventSink, MemorySink, RebalanceEvent, RetryReason};
pub use manager::{ManagerBuilder, ProposalSummary, RebalanceManager, StepOutcome};
