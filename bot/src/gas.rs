// src/gas.rs
// Module for gas limits and gas price selection.

use crate::chain::ChainClient;
use crate::error::FlashLoanError;
use ethers::types::U256;
use tracing::{debug, instrument, warn};

pub const DEPLOY_GAS_LIMIT_DEFAULT: u64 = 2_000_000;
pub const TRANSFER_GAS_LIMIT_DEFAULT: u64 = 100_000;
pub const FLASH_LOAN_GAS_LIMIT_DEFAULT: u64 = 500_000;

/// Gas caps per transaction kind plus optional price controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasSettings {
    pub deploy_gas_limit: U256,
    pub transfer_gas_limit: U256,
    pub flash_loan_gas_limit: U256,
    /// Fixed gas price; skips `eth_gasPrice` entirely when set.
    pub gas_price_override: Option<U256>,
    /// Upper bound applied to the node-suggested price.
    pub max_gas_price: Option<U256>,
}

impl Default for GasSettings {
    fn default() -> Self {
        Self {
            deploy_gas_limit: U256::from(DEPLOY_GAS_LIMIT_DEFAULT),
            transfer_gas_limit: U256::from(TRANSFER_GAS_LIMIT_DEFAULT),
            flash_loan_gas_limit: U256::from(FLASH_LOAN_GAS_LIMIT_DEFAULT),
            gas_price_override: None,
            max_gas_price: None,
        }
    }
}

/// Picks the legacy gas price for the next transaction.
#[instrument(skip(client, settings), level = "debug")]
pub async fn fetch_gas_price<C: ChainClient + ?Sized>(
    client: &C,
    settings: &GasSettings,
) -> Result<U256, FlashLoanError> {
    if let Some(fixed) = settings.gas_price_override {
        debug!(gas_price = %fixed, "Using configured gas price override.");
        return Ok(fixed);
    }
    let suggested = client.get_gas_price().await?;
    let gas_price = match settings.max_gas_price {
        Some(cap) if suggested > cap => {
            warn!(%suggested, %cap, "Node gas price exceeds configured cap; capping. Inclusion may be slow.");
            cap
        }
        _ => suggested,
    };
    debug!(%gas_price, "Gas price selected.");
    Ok(gas_price)
}

/// Upper bound on the native cost of a transaction: `gas_limit * gas_price`.
pub fn max_gas_cost(gas_limit: U256, gas_price: U256) -> U256 {
    gas_limit.saturating_mul(gas_price)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_simulator::LocalChain;

    #[tokio::test]
    async fn override_skips_node_price() {
        let chain = LocalChain::new();
        chain.set_gas_price(U256::from(7));
        let settings = GasSettings { gas_price_override: Some(U256::from(3)), ..Default::default() };
        assert_eq!(fetch_gas_price(&chain, &settings).await.unwrap(), U256::from(3));
    }

    #[tokio::test]
    async fn cap_limits_node_price() {
        let chain = LocalChain::new();
        chain.set_gas_price(U256::from(50));
        let capped = GasSettings { max_gas_price: Some(U256::from(20)), ..Default::default() };
        assert_eq!(fetch_gas_price(&chain, &capped).await.unwrap(), U256::from(20));
        assert_eq!(
            fetch_gas_price(&chain, &GasSettings::default()).await.unwrap(),
            U256::from(50)
        );
    }

    #[test]
    fn max_cost_saturates() {
        assert_eq!(max_gas_cost(U256::from(21_000), U256::from(2)), U256::from(42_000));
        assert_eq!(max_gas_cost(U256::MAX, U256::from(2)), U256::MAX);
    }
}

// END OF FILE: bot/src/gas.rs
