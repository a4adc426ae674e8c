// src/deploy.rs

use crate::account::Account;
use crate::chain::{ChainClient, TxReceipt};
use crate::encoding::creation_data;
use crate::error::FlashLoanError;
use crate::gas::{max_gas_cost, GasSettings};
use crate::transaction::{CancelSignal, ReceiptPolicy, TxSubmitter};
use ethers::{
    abi::{Abi, Token},
    types::{Address, Bytes, H256, U256, U64},
    utils::hex,
};
use serde::Deserialize;
use std::{fs, path::Path};
use tracing::{error, info, instrument, warn};

/// Compiled contract: creation bytecode plus, when available, its ABI.
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    pub bytecode: Bytes,
    pub abi: Option<Abi>,
}

#[derive(Deserialize)]
struct HardhatArtifact {
    abi: Abi,
    bytecode: String,
}

impl ContractArtifact {
    /// Loads a Hardhat artifact JSON (`{"abi": [...], "bytecode": "0x..."}`) or a
    /// raw hex bytecode file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FlashLoanError> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|e| {
            FlashLoanError::Config(format!("failed to read contract artifact {path_ref:?}: {e}"))
        })?;
        Self::parse(&contents)
            .map_err(|e| FlashLoanError::Config(format!("{path_ref:?}: {e}")))
    }

    fn parse(contents: &str) -> Result<Self, String> {
        let trimmed = contents.trim();
        if trimmed.starts_with('{') {
            let artifact: HardhatArtifact = serde_json::from_str(trimmed)
                .map_err(|e| format!("invalid artifact JSON: {e}"))?;
            let mut parsed = Self::from_hex(&artifact.bytecode)?;
            parsed.abi = Some(artifact.abi);
            Ok(parsed)
        } else {
            Self::from_hex(trimmed)
        }
    }

    /// Parses `0x`-optional hex bytecode without an ABI.
    pub fn from_hex(bytecode_hex: &str) -> Result<Self, String> {
        let cleaned = bytecode_hex.trim().trim_start_matches("0x");
        if cleaned.is_empty() {
            return Err("bytecode is empty (was the contract compiled?)".into());
        }
        let bytecode = hex::decode(cleaned).map_err(|e| format!("invalid hex bytecode: {e}"))?;
        Ok(Self { bytecode: Bytes::from(bytecode), abi: None })
    }
}

/// A confirmed contract creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub address: Address,
    pub tx_hash: H256,
    pub block_number: Option<U64>,
    pub gas_used: Option<U256>,
}

/// The receiver contract as recorded at deployment time. Its address is the
/// only artifact the operator must carry into the execute step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedContract {
    pub address: Address,
    pub owner: Address,
    pub provider: Address,
    pub tx_hash: H256,
    pub block_number: Option<U64>,
    pub gas_used: Option<U256>,
}

/// Submits contract-creation transactions. Never retries.
pub struct ContractDeployer<'a, C: ?Sized> {
    client: &'a C,
    gas: GasSettings,
    policy: ReceiptPolicy,
    cancel: CancelSignal,
}

impl<'a, C: ChainClient + ?Sized> ContractDeployer<'a, C> {
    pub fn new(client: &'a C, gas: GasSettings, policy: ReceiptPolicy) -> Self {
        Self { client, gas, policy, cancel: CancelSignal::never() }
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Deploys `artifact` with `constructor_args` from `account` and waits for inclusion.
    #[instrument(skip_all, fields(deployer = ?account.address()), level = "info")]
    pub async fn deploy(
        &self,
        artifact: &ContractArtifact,
        constructor_args: &[Token],
        account: &Account,
    ) -> Result<Deployment, FlashLoanError> {
        let data = creation_data(&artifact.bytecode, artifact.abi.as_ref(), constructor_args)?;

        // Gas is paid in the native asset; an empty account can only waste a nonce lookup.
        let native_balance = self.client.get_balance(account.address()).await?;
        if native_balance.is_zero() {
            error!(deployer = ?account.address(), "Deployer has no native balance for gas.");
            return Err(FlashLoanError::InsufficientBalance {
                address: account.address(),
                asset: "native".into(),
                balance: native_balance,
                required: U256::one(),
            });
        }

        let mut submitter = TxSubmitter::new(self.client, account, self.gas, self.policy, self.cancel.clone());
        let tx = submitter.build(None, data, self.gas.deploy_gas_limit).await?;
        let worst_case = max_gas_cost(tx.gas_limit, tx.gas_price);
        if native_balance < worst_case {
            warn!(%native_balance, %worst_case, "Native balance below gas limit * gas price; deployment may be rejected.");
        }

        info!(nonce = %tx.nonce, gas_limit = %tx.gas_limit, bytes = tx.data.len(), "Sending deployment transaction...");
        let tx_hash = submitter.submit(tx).await.map_err(|e| match e {
            FlashLoanError::Rpc(rpc) => FlashLoanError::Deployment { tx_hash: None, reason: rpc.to_string() },
            other => other,
        })?;
        let receipt = submitter.confirm(tx_hash).await?;
        Self::check_receipt(tx_hash, &receipt)
    }

    /// Deploys the flash-loan receiver, whose constructor takes the provider address.
    /// The deploying account becomes its owner.
    pub async fn deploy_receiver(
        &self,
        artifact: &ContractArtifact,
        flash_loan_provider: Address,
        account: &Account,
    ) -> Result<DeployedContract, FlashLoanError> {
        if flash_loan_provider.is_zero() {
            return Err(FlashLoanError::Config("flash loan provider address is zero".into()));
        }
        let deployment = self
            .deploy(artifact, &[Token::Address(flash_loan_provider)], account)
            .await?;
        info!(address = ?deployment.address, block = ?deployment.block_number, gas_used = ?deployment.gas_used, "✅ Receiver contract deployed.");
        Ok(DeployedContract {
            address: deployment.address,
            owner: account.address(),
            provider: flash_loan_provider,
            tx_hash: deployment.tx_hash,
            block_number: deployment.block_number,
            gas_used: deployment.gas_used,
        })
    }

    fn check_receipt(tx_hash: H256, receipt: &TxReceipt) -> Result<Deployment, FlashLoanError> {
        if !receipt.is_success() {
            error!(?tx_hash, "❌ Deployment reverted on-chain.");
            return Err(FlashLoanError::Deployment {
                tx_hash: Some(tx_hash),
                reason: "creation transaction reverted".into(),
            });
        }
        let address = match receipt.contract_address {
            Some(address) if !address.is_zero() => address,
            _ => {
                error!(?tx_hash, "❌ Deployment receipt carries no contract address.");
                return Err(FlashLoanError::Deployment {
                    tx_hash: Some(tx_hash),
                    reason: "receipt contains no contract address".into(),
                });
            }
        };
        Ok(Deployment {
            address,
            tx_hash,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::FlashLoanTester;
    use crate::local_simulator::{LocalChain, DEV_KEY, RECEIVER_ARTIFACT_JSON};
    use ethers::utils::get_contract_address;
    use std::time::Duration;

    fn policy() -> ReceiptPolicy {
        ReceiptPolicy { timeout: Duration::from_millis(200), poll_interval: Duration::from_millis(10) }
    }

    #[test]
    fn parses_hardhat_artifact_and_raw_hex() {
        let artifact = ContractArtifact::parse(RECEIVER_ARTIFACT_JSON).unwrap();
        assert!(artifact.abi.as_ref().and_then(|abi| abi.constructor()).is_some());
        assert!(!artifact.bytecode.is_empty());

        let raw = ContractArtifact::parse("0x6080604052\n").unwrap();
        assert_eq!(raw.bytecode, Bytes::from(vec![0x60, 0x80, 0x60, 0x40, 0x52]));
        assert!(raw.abi.is_none());

        assert!(ContractArtifact::parse("0x").is_err());
        assert!(ContractArtifact::parse("{\"abi\": []}").is_err());
    }

    #[test]
    fn missing_artifact_is_a_config_error() {
        let err = ContractArtifact::load("/nonexistent/FlashLoanTester.json").unwrap_err();
        assert!(matches!(err, FlashLoanError::Config(_)));
    }

    #[tokio::test]
    async fn deploys_receiver_owned_by_deployer() {
        let chain = LocalChain::new();
        let account = chain.funded_account(DEV_KEY);
        let provider = Address::repeat_byte(0x63);
        let artifact = ContractArtifact::parse(RECEIVER_ARTIFACT_JSON).unwrap();

        let deployer = ContractDeployer::new(&chain, GasSettings::default(), policy());
        let deployed = deployer.deploy_receiver(&artifact, provider, &account).await.unwrap();

        assert_eq!(deployed.address, get_contract_address(account.address(), U256::zero()));
        assert_eq!(deployed.owner, account.address());
        assert_eq!(deployed.provider, provider);
        assert!(deployed.block_number.is_some());
        assert!(deployed.gas_used.is_some());
        assert_eq!(FlashLoanTester::new(deployed.address, &chain).owner().await.unwrap(), account.address());
        assert_eq!(chain.receiver_provider(deployed.address), Some(provider));
    }

    #[tokio::test]
    async fn receipt_without_address_is_a_deployment_error() {
        let chain = LocalChain::new();
        let account = chain.funded_account(DEV_KEY);
        chain.omit_contract_address(true);
        let artifact = ContractArtifact::parse(RECEIVER_ARTIFACT_JSON).unwrap();

        let deployer = ContractDeployer::new(&chain, GasSettings::default(), policy());
        let err = deployer
            .deploy_receiver(&artifact, Address::repeat_byte(0x63), &account)
            .await
            .unwrap_err();
        assert!(matches!(err, FlashLoanError::Deployment { tx_hash: Some(_), .. }));
        assert!(err.gas_spent());
    }

    #[tokio::test]
    async fn reverted_creation_is_a_deployment_error() {
        let chain = LocalChain::new();
        let account = chain.funded_account(DEV_KEY);
        chain.revert_deployments(true);
        let artifact = ContractArtifact::parse(RECEIVER_ARTIFACT_JSON).unwrap();

        let deployer = ContractDeployer::new(&chain, GasSettings::default(), policy());
        let err = deployer
            .deploy_receiver(&artifact, Address::repeat_byte(0x63), &account)
            .await
            .unwrap_err();
        assert!(matches!(err, FlashLoanError::Deployment { .. }));
        // The nonce is consumed even though creation reverted.
        assert_eq!(chain.nonce_of(account.address()), U256::one());
    }

    #[tokio::test]
    async fn empty_deployer_sends_nothing() {
        let chain = LocalChain::new();
        let account = chain.account(DEV_KEY);
        let artifact = ContractArtifact::parse(RECEIVER_ARTIFACT_JSON).unwrap();

        let deployer = ContractDeployer::new(&chain, GasSettings::default(), policy());
        let err = deployer
            .deploy_receiver(&artifact, Address::repeat_byte(0x63), &account)
            .await
            .unwrap_err();
        assert!(matches!(err, FlashLoanError::InsufficientBalance { .. }));
        assert_eq!(chain.sent_count(), 0);
    }

    #[tokio::test]
    async fn zero_provider_is_rejected_before_sending() {
        let chain = LocalChain::new();
        let account = chain.funded_account(DEV_KEY);
        let artifact = ContractArtifact::parse(RECEIVER_ARTIFACT_JSON).unwrap();

        let deployer = ContractDeployer::new(&chain, GasSettings::default(), policy());
        let err = deployer.deploy_receiver(&artifact, Address::zero(), &account).await.unwrap_err();
        assert!(matches!(err, FlashLoanError::Config(_)));
        assert_eq!(chain.sent_count(), 0);
    }
}
