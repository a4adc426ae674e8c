// bot/src/config.rs

use crate::account::Account;
use crate::error::FlashLoanError;
use crate::gas::{
    GasSettings, DEPLOY_GAS_LIMIT_DEFAULT, FLASH_LOAN_GAS_LIMIT_DEFAULT, TRANSFER_GAS_LIMIT_DEFAULT,
};
use crate::runner::{Amount, RunnerConfig, DEFAULT_FEE_DENOMINATOR};
use crate::transaction::{ReceiptPolicy, TX_CONFIRMATION_TIMEOUT_SECS, TX_POLLING_INTERVAL_MS};
use crate::contracts::MODE_SUCCESS;
use crate::utils::parse_units_exact;
use dotenv::dotenv;
use ethers::types::{Address, U256};
use eyre::{Result, WrapErr};
use std::{env, fmt, path::PathBuf, time::Duration};

pub const DEFAULT_CONTRACT_ARTIFACT: &str = "artifacts/contracts/FlashLoanTester.sol/FlashLoanTester.json";
pub const DEFAULT_NETWORK_NAME: &str = "EVM testnet";
const GWEI_DECIMALS: u8 = 9;

#[derive(Clone)]
pub struct Config {
    // Network & Keys
    pub rpc_url: String,
    pub private_key: String,
    pub network_name: String,
    pub explorer_url: Option<String>,

    // Contract Addresses
    pub flash_loan_provider: Option<Address>,
    pub token_address: Option<Address>,
    pub deployed_contract: Option<Address>,

    // Deployment Options
    pub contract_artifact: PathBuf,

    // Flash Loan Parameters (decimal token units)
    pub funding_amount: String,
    pub loan_amount: String,
    pub fee_denominator: U256,

    // Gas & Receipts
    pub gas: GasSettings,
    pub receipts: ReceiptPolicy,
}

// Hand-written so the private key never reaches logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("rpc_url", &self.rpc_url)
            .field("private_key", &"<redacted>")
            .field("network_name", &self.network_name)
            .field("explorer_url", &self.explorer_url)
            .field("flash_loan_provider", &self.flash_loan_provider)
            .field("token_address", &self.token_address)
            .field("deployed_contract", &self.deployed_contract)
            .field("contract_artifact", &self.contract_artifact)
            .field("funding_amount", &self.funding_amount)
            .field("loan_amount", &self.loan_amount)
            .field("fee_denominator", &self.fee_denominator)
            .field("gas", &self.gas)
            .field("receipts", &self.receipts)
            .finish()
    }
}

/// Loads `.env` (if present) and parses the process environment.
pub fn load_config() -> Result<Config> {
    println!("Loading configuration from .env file...");
    dotenv().ok();
    let config = Config::from_lookup(|name| env::var(name).ok())
        .wrap_err("Invalid configuration (see .env.example)")?;
    println!("✅ Configuration loaded successfully.");
    Ok(config)
}

impl Config {
    /// Builds a config from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, FlashLoanError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| -> Option<String> {
            lookup(name).map(|s| s.trim().to_owned()).filter(|s| !s.is_empty())
        };
        let required = |name: &str| -> Result<String, FlashLoanError> {
            var(name).ok_or_else(|| FlashLoanError::Config(format!("{name} is not set")))
        };
        let parse_optional_address = |name: &str| -> Result<Option<Address>, FlashLoanError> {
            match var(name) {
                Some(value) => parse_address(name, &value).map(Some),
                None => Ok(None),
            }
        };
        let parse_u64_env = |name: &str, default: u64| -> Result<u64, FlashLoanError> {
            match var(name) {
                Some(value) => value
                    .parse::<u64>()
                    .map_err(|e| FlashLoanError::Config(format!("{name}={value:?}: {e}"))),
                None => Ok(default),
            }
        };
        let parse_optional_gwei = |name: &str| -> Result<Option<U256>, FlashLoanError> {
            match var(name) {
                Some(value) => parse_units_exact(&value, GWEI_DECIMALS)
                    .map(Some)
                    .map_err(|e| FlashLoanError::Config(format!("{name}={value:?}: {e}"))),
                None => Ok(None),
            }
        };

        // --- Load vars ---
        let rpc_url = required("RPC_URL")?;
        let private_key = required("PRIVATE_KEY")?;
        let flash_loan_provider = parse_optional_address("FLASH_LOAN_PROVIDER")?;
        let token_address = parse_optional_address("TOKEN_ADDRESS")?;
        let deployed_contract = parse_optional_address("DEPLOYED_CONTRACT")?;
        let contract_artifact = PathBuf::from(
            var("CONTRACT_ARTIFACT").unwrap_or_else(|| DEFAULT_CONTRACT_ARTIFACT.to_owned()),
        );
        let funding_amount = var("FUNDING_AMOUNT").unwrap_or_else(|| "1".to_owned());
        let loan_amount = var("LOAN_AMOUNT").unwrap_or_else(|| "100".to_owned());
        let fee_denominator = parse_u64_env("FEE_DENOMINATOR", DEFAULT_FEE_DENOMINATOR)?;
        if fee_denominator == 0 {
            return Err(FlashLoanError::Config("FEE_DENOMINATOR must be greater than zero".into()));
        }

        let gas = GasSettings {
            deploy_gas_limit: U256::from(parse_u64_env("DEPLOY_GAS_LIMIT", DEPLOY_GAS_LIMIT_DEFAULT)?),
            transfer_gas_limit: U256::from(parse_u64_env("TRANSFER_GAS_LIMIT", TRANSFER_GAS_LIMIT_DEFAULT)?),
            flash_loan_gas_limit: U256::from(parse_u64_env("FLASH_LOAN_GAS_LIMIT", FLASH_LOAN_GAS_LIMIT_DEFAULT)?),
            gas_price_override: parse_optional_gwei("GAS_PRICE_GWEI")?,
            max_gas_price: parse_optional_gwei("MAX_GAS_PRICE_GWEI")?,
        };
        let receipts = ReceiptPolicy {
            timeout: Duration::from_secs(parse_u64_env("RECEIPT_TIMEOUT_SECS", TX_CONFIRMATION_TIMEOUT_SECS)?),
            poll_interval: Duration::from_millis(parse_u64_env("RECEIPT_POLL_INTERVAL_MS", TX_POLLING_INTERVAL_MS)?),
        };
        if receipts.timeout.is_zero() || receipts.poll_interval.is_zero() {
            return Err(FlashLoanError::Config(
                "RECEIPT_TIMEOUT_SECS and RECEIPT_POLL_INTERVAL_MS must be greater than zero".into(),
            ));
        }

        Ok(Config {
            rpc_url,
            private_key,
            network_name: var("NETWORK_NAME").unwrap_or_else(|| DEFAULT_NETWORK_NAME.to_owned()),
            explorer_url: var("EXPLORER_URL"),
            flash_loan_provider,
            token_address,
            deployed_contract,
            contract_artifact,
            funding_amount,
            loan_amount,
            fee_denominator: U256::from(fee_denominator),
            gas,
            receipts,
        })
    }

    pub fn account(&self, chain_id: u64) -> Result<Account, FlashLoanError> {
        Account::from_private_key(&self.private_key, chain_id)
    }

    /// The provider address the receiver is deployed against.
    pub fn require_provider(&self) -> Result<Address, FlashLoanError> {
        self.flash_loan_provider
            .ok_or_else(|| FlashLoanError::Config("FLASH_LOAN_PROVIDER is not set".into()))
    }

    /// Parameters for the execute step. The contract address stays optional so
    /// the runner itself reports a missing deployment.
    pub fn runner_config(&self) -> Result<RunnerConfig, FlashLoanError> {
        let token = self
            .token_address
            .ok_or_else(|| FlashLoanError::Config("TOKEN_ADDRESS is not set".into()))?;
        Ok(RunnerConfig {
            contract: self.deployed_contract,
            token,
            funding_amount: Amount::Tokens(self.funding_amount.clone()),
            loan_amount: Amount::Tokens(self.loan_amount.clone()),
            fee_denominator: self.fee_denominator,
            mode: MODE_SUCCESS,
            gas: self.gas,
            receipts: self.receipts,
        })
    }
}

fn parse_address(name: &str, value: &str) -> Result<Address, FlashLoanError> {
    if value.starts_with('<') {
        return Err(FlashLoanError::Config(format!(
            "{name} still holds the placeholder {value}; set a real 0x address"
        )));
    }
    if !value.starts_with("0x") {
        return Err(FlashLoanError::Config(format!("{name} must be a 0x-prefixed address, got {value:?}")));
    }
    value
        .parse::<Address>()
        .map_err(|e| FlashLoanError::Config(format!("{name}={value:?}: {e}")))
}


// END OF FILE: bot/src/config.rs
