//! Gateway fee and net commission calculation for order reports

use serde::Serialize;

use crate::error::{BillingError, BillingResult};

/// Default gateway fee: 6.74% expressed in basis points
pub const DEFAULT_GATEWAY_FEE_BPS: u32 = 674;

const BPS_DENOMINATOR: i64 = 10_000;

/// Gateway fee rate applied to every order, in basis points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommissionRate {
    bps: u32,
}

impl Default for CommissionRate {
    fn default() -> Self {
        Self {
            bps: DEFAULT_GATEWAY_FEE_BPS,
        }
    }
}

impl CommissionRate {
    pub fn from_bps(bps: u32) -> BillingResult<Self> {
        if i64::from(bps) > BPS_DENOMINATOR {
            return Err(BillingError::Config(format!(
                "GATEWAY_FEE_BPS must be at most {}, got {}",
                BPS_DENOMINATOR, bps
            )));
        }
        Ok(Self { bps })
    }

    /// Read `GATEWAY_FEE_BPS`, falling back to the default rate when unset
    pub fn from_env() -> BillingResult<Self> {
        match std::env::var("GATEWAY_FEE_BPS") {
            Ok(raw) => {
                let bps = raw.trim().parse::<u32>().map_err(|_| {
                    BillingError::Config(format!("GATEWAY_FEE_BPS is not an integer: {}", raw))
                })?;
                Self::from_bps(bps)
            }
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn bps(&self) -> u32 {
        self.bps
    }

    /// Split a total (minor units) into gateway fee and net commission.
    ///
    /// The fee is rounded half-up to the nearest minor unit and the two parts
    /// always add back to the total.
    pub fn split(&self, total: i64) -> Commission {
        let total = total.max(0);
        let scaled = i128::from(total) * i128::from(self.bps) + i128::from(BPS_DENOMINATOR / 2);
        let fee = i64::try_from(scaled / i128::from(BPS_DENOMINATOR)).unwrap_or(total);
        Commission {
            total_price_in_cents: total,
            gateway_fee_in_cents: fee,
            user_commission_in_cents: total - fee,
        }
    }
}

/// Commission breakdown attached to an order report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Commission {
    pub total_price_in_cents: i64,
    pub gateway_fee_in_cents: i64,
    pub user_commission_in_cents: i64,
}
