//! TOML configuration loading and validation.

use std::path::Path;

use basketbook::price::{MAX_DIVERGENCE_CEILING, MAX_DIVERGENCE_FLOOR};
use basketbook::{NettingParams, WAD};
use basketbook_risk::RiskConfig;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Highest accepted retry limit.
pub const MAX_RETRY_LIMIT: u8 = 10;
/// Shortest accepted step delay, in seconds.
pub const MIN_STEP_DELAY: u64 = 60;
/// Longest accepted step delay, in seconds.
pub const MAX_STEP_DELAY: u64 = 86_400;
/// Highest accepted swap fee, in basis points.
pub const MAX_SWAP_FEE: u16 = 500;
/// Highest accepted management fee, in basis points.
pub const MAX_MANAGEMENT_FEE: u16 = 3_000;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Protocol parameters. Fractions are WAD-scaled integers.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u8,
    #[serde(default = "default_step_delay")]
    pub step_delay_secs: u64,
    #[serde(default = "default_slippage")]
    pub slippage_limit: u64,
    #[serde(default = "default_deviation")]
    pub weight_deviation_limit: u64,
    #[serde(default)]
    pub swap_fee_bps: u16,
    #[serde(default)]
    pub management_fee_bps: u16,
}

fn default_retry_limit() -> u8 {
    3
}
fn default_step_delay() -> u64 {
    3_600
}
fn default_slippage() -> u64 {
    5_000_000_000_000_000 // 0.5%
}
fn default_deviation() -> u64 {
    50_000_000_000_000_000 // 5%
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            retry_limit: default_retry_limit(),
            step_delay_secs: default_step_delay(),
            slippage_limit: default_slippage(),
            weight_deviation_limit: default_deviation(),
            swap_fee_bps: 0,
            management_fee_bps: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
    /// Max primary/anchor divergence, WAD-scaled.
    #[serde(default = "default_divergence")]
    pub max_divergence: u64,
    #[serde(default)]
    pub max_price_age_secs: Option<u64>,
    #[serde(default)]
    pub spread_bps: u16,
}

fn default_divergence() -> u64 {
    10_000_000_000_000_000 // 1%
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            max_divergence: default_divergence(),
            max_price_age_secs: None,
            spread_bps: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default = "default_audit_file")]
    pub audit_file: String,
}

fn default_log_dir() -> String {
    "./logs".into()
}
fn default_audit_file() -> String {
    "audit.jsonl".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            audit_file: default_audit_file(),
        }
    }
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&contents)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate config invariants.
    pub fn validate(&self) -> Result<()> {
        self.manager_config().validate()?;
        let divergence = u128::from(self.oracle.max_divergence);
        if !(MAX_DIVERGENCE_FLOOR..=MAX_DIVERGENCE_CEILING).contains(&divergence) {
            return Err(Error::Config(format!(
                "oracle.max_divergence must be in [{MAX_DIVERGENCE_FLOOR}, {MAX_DIVERGENCE_CEILING}]"
            )));
        }
        if self.oracle.spread_bps >= 10_000 {
            return Err(Error::Config("oracle.spread_bps must be < 10000".into()));
        }
        Ok(())
    }

    /// Protocol parameters in the form the manager uses.
    pub fn manager_config(&self) -> ManagerConfig {
        let p = &self.protocol;
        ManagerConfig {
            retry_limit: p.retry_limit,
            step_delay: p.step_delay_secs,
            slippage_limit: u128::from(p.slippage_limit),
            weight_deviation_limit: u128::from(p.weight_deviation_limit),
            swap_fee: p.swap_fee_bps,
            management_fee: p.management_fee_bps,
        }
    }

    /// Full path to the audit log file.
    pub fn audit_path(&self) -> std::path::PathBuf {
        Path::new(&self.logging.dir).join(&self.logging.audit_file)
    }
}

/// Live protocol parameters held by the rebalance manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ManagerConfig {
    pub retry_limit: u8,
    /// Seconds a step may take before the retry path applies.
    pub step_delay: u64,
    pub slippage_limit: u128,
    pub weight_deviation_limit: u128,
    /// Total swap fee in basis points.
    pub swap_fee: u16,
    /// Default management fee for new baskets, in basis points.
    pub management_fee: u16,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Config::default().manager_config()
    }
}

fn invalid(name: &'static str, value: impl ToString) -> Error {
    Error::InvalidParameter {
        name,
        value: value.to_string(),
    }
}

impl ManagerConfig {
    pub fn validate(&self) -> Result<()> {
        check_retry_limit(self.retry_limit)?;
        check_step_delay(self.step_delay)?;
        check_slippage_limit(self.slippage_limit)?;
        check_weight_deviation(self.weight_deviation_limit)?;
        check_swap_fee(self.swap_fee)?;
        check_management_fee(self.management_fee)
    }

    pub fn risk_config(&self) -> RiskConfig {
        RiskConfig {
            slippage_limit: self.slippage_limit,
            weight_deviation_limit: self.weight_deviation_limit,
            swap_fee_bps: self.swap_fee,
        }
    }

    pub fn netting_params(&self) -> NettingParams {
        NettingParams {
            slippage_limit: self.slippage_limit,
            swap_fee_bps: self.swap_fee,
        }
    }
}

pub fn check_retry_limit(value: u8) -> Result<()> {
    if value > MAX_RETRY_LIMIT {
        return Err(invalid("retry_limit", value));
    }
    Ok(())
}

pub fn check_step_delay(value: u64) -> Result<()> {
    if !(MIN_STEP_DELAY..=MAX_STEP_DELAY).contains(&value) {
        return Err(invalid("step_delay", value));
    }
    Ok(())
}

pub fn check_slippage_limit(value: u128) -> Result<()> {
    if value == 0 || value >= WAD {
        return Err(invalid("slippage_limit", value));
    }
    Ok(())
}

pub fn check_weight_deviation(value: u128) -> Result<()> {
    if value == 0 || value >= WAD {
        return Err(invalid("weight_deviation_limit", value));
    }
    Ok(())
}

pub fn check_swap_fee(value: u16) -> Result<()> {
    if value > MAX_SWAP_FEE {
        return Err(invalid("swap_fee", value));
    }
    Ok(())
}

pub fn check_management_fee(value: u16) -> Result<()> {
    if value > MAX_MANAGEMENT_FEE {
        return Err(invalid("management_fee", value));
    }
    Ok(())
}
