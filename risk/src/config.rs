//! Risk configuration.

use basketbook::WAD;

/// Limits applied to a trade proposal. Fractions are WAD-scaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskConfig {
    /// Max relative distance between a trade bound and the oracle quote.
    pub slippage_limit: u128,
    /// Max per-asset distance from target weight after the trades.
    pub weight_deviation_limit: u128,
    /// Total swap fee in basis points, charged half per leg.
    pub swap_fee_bps: u16,
}

impl RiskConfig {
    /// Validate the config. Returns `Err` with a description if any field is nonsensical.
    pub fn validate(&self) -> Result<(), String> {
        if self.slippage_limit == 0 || self.slippage_limit >= WAD {
            return Err(format!(
                "slippage_limit must be in (0, 1e18), got {}",
                self.slippage_limit
            ));
        }
        if self.weight_deviation_limit == 0 || self.weight_deviation_limit >= WAD {
            return Err(format!(
                "weight_deviation_limit must be in (0, 1e18), got {}",
                self.weight_deviation_limit
            ));
        }
        if self.swap_fee_bps > 10_000 {
            return Err(format!(
                "swap_fee_bps must be <= 10000, got {}",
                self.swap_fee_bps
            ));
        }
        Ok(())
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            slippage_limit: WAD / 200,         // 0.5%
            weight_deviation_limit: WAD / 20, // 5%
            swap_fee_bps: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(RiskConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_full_slippage() {
        let cfg = RiskConfig {
            slippage_limit: WAD,
            ..RiskConfig::default()
        };
        assert!(cfg.validate().unwrap_err().contains("slippage_limit"));
    }

    #[test]
    fn rejects_zero_deviation() {
        let cfg = RiskConfig {
            weight_deviation_limit: 0,
            ..RiskConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
