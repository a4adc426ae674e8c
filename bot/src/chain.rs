// bot/src/chain.rs
// Chain access capability: balance, nonce, gas price, read-only calls,
// raw transaction submission and receipt lookup against one RPC endpoint.

use crate::encoding::decode_revert_reason;
use crate::error::{ChainError, FlashLoanError};
use async_trait::async_trait;
use ethers::{
    providers::{Http, Middleware, Provider, ProviderError, RpcError},
    types::{
        transaction::eip2718::TypedTransaction, Address, Bytes, TransactionReceipt,
        TransactionRequest, H256, U256, U64,
    },
};
use tracing::{debug, info, instrument};

const TX_SUCCESS_STATUS: U64 = U64([1]);
// EIP-1474 "execution reverted" code used by geth-style nodes for eth_call.
const JSON_RPC_REVERT_CODE: i64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Success,
    Failure,
}

/// Confirmation record of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub transaction_hash: H256,
    pub status: TxStatus,
    pub block_number: Option<U64>,
    pub gas_used: Option<U256>,
    pub contract_address: Option<Address>,
}

impl TxReceipt {
    pub fn is_success(&self) -> bool {
        self.status == TxStatus::Success
    }
}

impl From<TransactionReceipt> for TxReceipt {
    fn from(receipt: TransactionReceipt) -> Self {
        let status = if receipt.status == Some(TX_SUCCESS_STATUS) {
            TxStatus::Success
        } else {
            TxStatus::Failure
        };
        Self {
            transaction_hash: receipt.transaction_hash,
            status,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
            contract_address: receipt.contract_address,
        }
    }
}

/// Read-only contract invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
}

impl CallRequest {
    pub fn new(to: Address, data: impl Into<Bytes>) -> Self {
        Self { from: None, to, data: data.into() }
    }

    pub fn with_sender(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }
}

/// Everything the deploy and flash-loan workflows need from a chain.
///
/// `send_signed` mutates chain state; reads issued before its receipt is
/// observed may see either the pre- or the post-state.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Chain id reported by the endpoint at connect time.
    fn chain_id(&self) -> u64;

    async fn get_balance(&self, address: Address) -> Result<U256, ChainError>;

    /// Count of confirmed transactions sent from `address`.
    async fn get_nonce(&self, address: Address) -> Result<U256, ChainError>;

    async fn get_gas_price(&self) -> Result<U256, ChainError>;

    /// Executes `request` without creating a transaction.
    async fn call(&self, request: &CallRequest) -> Result<Bytes, ChainError>;

    /// Submits a signed raw transaction and returns its hash without waiting.
    async fn send_signed(&self, raw: Bytes) -> Result<H256, ChainError>;

    async fn get_receipt(&self, tx_hash: H256) -> Result<Option<TxReceipt>, ChainError>;
}

/// [`ChainClient`] over an ethers HTTP provider.
#[derive(Debug, Clone)]
pub struct EthersChainClient {
    provider: Provider<Http>,
    chain_id: u64,
}

impl EthersChainClient {
    /// Connects to `rpc_url` and confirms it speaks JSON-RPC by fetching the chain id.
    #[instrument(level = "info")]
    pub async fn connect(rpc_url: &str) -> Result<Self, FlashLoanError> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| FlashLoanError::Config(format!("invalid RPC URL {rpc_url}: {e}")))?;
        let chain_id = provider
            .get_chainid()
            .await
            .map_err(|e| FlashLoanError::Connection(format!("{rpc_url}: {e}")))?;
        info!(chain_id = %chain_id, "Connected to RPC endpoint.");
        Ok(Self { provider, chain_id: chain_id.as_u64() })
    }
}

#[async_trait]
impl ChainClient for EthersChainClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn get_balance(&self, address: Address) -> Result<U256, ChainError> {
        self.provider
            .get_balance(address, None)
            .await
            .map_err(classify_provider_error)
    }

    async fn get_nonce(&self, address: Address) -> Result<U256, ChainError> {
        self.provider
            .get_transaction_count(address, None)
            .await
            .map_err(classify_provider_error)
    }

    async fn get_gas_price(&self) -> Result<U256, ChainError> {
        self.provider.get_gas_price().await.map_err(classify_provider_error)
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes, ChainError> {
        let mut tx = TransactionRequest::new().to(request.to).data(request.data.clone());
        if let Some(from) = request.from {
            tx = tx.from(from);
        }
        let tx: TypedTransaction = tx.into();
        self.provider.call(&tx, None).await.map_err(classify_provider_error)
    }

    async fn send_signed(&self, raw: Bytes) -> Result<H256, ChainError> {
        let pending = self
            .provider
            .send_raw_transaction(raw)
            .await
            .map_err(classify_provider_error)?;
        let tx_hash = pending.tx_hash();
        debug!(?tx_hash, "Raw transaction accepted by node.");
        Ok(tx_hash)
    }

    async fn get_receipt(&self, tx_hash: H256) -> Result<Option<TxReceipt>, ChainError> {
        self.provider
            .get_transaction_receipt(tx_hash)
            .await
            .map(|receipt| receipt.map(TxReceipt::from))
            .map_err(classify_provider_error)
    }
}

/// Sorts a provider failure into revert / nonce / rejection / transport.
fn classify_provider_error(err: ProviderError) -> ChainError {
    let Some(rpc) = err.as_error_response() else {
        return ChainError::Transport(err.to_string());
    };
    let revert_data = rpc
        .data
        .as_ref()
        .and_then(|value| value.as_str())
        .and_then(|hex_str| hex_str.parse::<Bytes>().ok());
    if rpc.code == JSON_RPC_REVERT_CODE || rpc.message.to_lowercase().contains("revert") {
        let data = revert_data.unwrap_or_default();
        let reason = decode_revert_reason(&data).or_else(|| {
            rpc.message
                .split_once("reverted:")
                .map(|(_, reason)| reason.trim().to_owned())
        });
        return ChainError::Revert { reason, data };
    }
    if ChainError::is_nonce_message(&rpc.message) {
        return ChainError::NonceRejected(rpc.message.clone());
    }
    ChainError::Rejected(rpc.message.clone())
}
