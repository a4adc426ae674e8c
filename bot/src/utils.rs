// src/utils.rs

// --- Imports ---
use crate::error::FlashLoanError;
use ethers::types::{Address, H256, U256};
use ethers::utils::{format_ether, format_units as ethers_format_units, parse_units};
use std::fmt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter};

// --- Amounts ---

/// Integer amount in a token's minor units, carried with its `decimals` for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAmount {
    pub raw: U256,
    pub decimals: u8,
}

impl TokenAmount {
    pub fn new(raw: U256, decimals: u8) -> Self {
        Self { raw, decimals }
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_token(self.raw, self.decimals))
    }
}

/// Renders minor units as a decimal string, e.g. `1000000` with 6 decimals -> `1.000000`.
pub fn format_token(raw: U256, decimals: u8) -> String {
    ethers_format_units(raw, decimals as u32).unwrap_or_else(|_| raw.to_string())
}

pub fn format_native(wei: U256) -> String {
    format_ether(wei)
}

/// Converts a decimal token quantity ("100", "0.5") into minor units exactly.
pub fn parse_token_amount(amount: &str, decimals: u8) -> Result<U256, FlashLoanError> {
    parse_units_exact(amount, decimals)
        .map_err(|e| FlashLoanError::Config(format!("invalid token amount {amount:?}: {e}")))
}

/// Like `parse_units`, but refuses negatives and digits past `decimals`
/// instead of truncating them.
pub fn parse_units_exact(amount: &str, decimals: u8) -> Result<U256, String> {
    let trimmed = amount.trim();
    if trimmed.is_empty() || trimmed.starts_with('-') {
        return Err("must be a non-negative decimal number".to_owned());
    }
    if let Some((_, fraction)) = trimmed.split_once('.') {
        if fraction.len() > decimals as usize {
            return Err(format!("more than {decimals} fractional digits"));
        }
    }
    parse_units(trimmed, decimals as u32).map(U256::from).map_err(|e| e.to_string())
}

// --- Explorer Links ---

pub fn explorer_tx_url(base: &str, tx_hash: H256) -> String {
    format!("{}/tx/{:?}", base.trim_end_matches('/'), tx_hash)
}

pub fn explorer_address_url(base: &str, address: Address) -> String {
    format!("{}/address/{:?}", base.trim_end_matches('/'), address)
}

// --- Logging ---

/// Installs the fmt subscriber; `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
