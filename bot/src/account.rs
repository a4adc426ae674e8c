// bot/src/account.rs

use crate::error::FlashLoanError;
use ethers::{
    signers::{LocalWallet, Signer},
    types::{
        transaction::eip2718::TypedTransaction, Address, Bytes, TransactionRequest, H256, U256,
    },
    utils::keccak256,
};

const PRIVATE_KEY_PLACEHOLDER: &str = "<YOUR_PRIVATE_KEY_HERE>";

/// Signing account loaded from configuration. Immutable once built.
#[derive(Debug, Clone)]
pub struct Account {
    wallet: LocalWallet,
}

impl Account {
    /// Parses a `0x`-prefixed hex private key and binds it to `chain_id` for
    /// EIP-155 signatures.
    pub fn from_private_key(private_key: &str, chain_id: u64) -> Result<Self, FlashLoanError> {
        let key = private_key.trim();
        if key.is_empty() || key == PRIVATE_KEY_PLACEHOLDER || !key.starts_with("0x") {
            return Err(FlashLoanError::Config(
                "PRIVATE_KEY must be a 0x-prefixed hex private key".into(),
            ));
        }
        let wallet = key
            .parse::<LocalWallet>()
            .map_err(|e| FlashLoanError::Config(format!("invalid PRIVATE_KEY: {e}")))?;
        Ok(Self { wallet: wallet.with_chain_id(chain_id) })
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.wallet.chain_id()
    }

    /// Signs `tx`, consuming it: a signed payload is submitted once and a
    /// resubmission must go through a freshly built transaction.
    pub async fn sign(&self, tx: PendingTransaction) -> Result<SignedTransaction, FlashLoanError> {
        if tx.from != self.address() {
            return Err(FlashLoanError::Config(format!(
                "transaction sender {:?} does not match signing account {:?}",
                tx.from,
                self.address()
            )));
        }
        let typed = tx.to_typed(self.chain_id());
        let signature = self
            .wallet
            .sign_transaction(&typed)
            .await
            .map_err(|e| FlashLoanError::Config(format!("signing failed: {e}")))?;
        let raw = typed.rlp_signed(&signature);
        let hash = H256::from(keccak256(&raw));
        Ok(SignedTransaction { raw, hash, nonce: tx.nonce })
    }
}

/// Unsigned transaction built against the sender's current on-chain nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub nonce: U256,
    pub gas_limit: U256,
    pub gas_price: U256,
    pub value: U256,
    pub data: Bytes,
}

impl PendingTransaction {
    /// Legacy (type 0) request, which every EVM testnet accepts.
    pub fn to_typed(&self, chain_id: u64) -> TypedTransaction {
        let mut request = TransactionRequest::new()
            .from(self.from)
            .nonce(self.nonce)
            .gas(self.gas_limit)
            .gas_price(self.gas_price)
            .value(self.value)
            .data(self.data.clone())
            .chain_id(chain_id);
        if let Some(to) = self.to {
            request = request.to(to);
        }
        request.into()
    }
}

/// RLP-encoded signed transaction ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub raw: Bytes,
    /// keccak256 of `raw`; the hash the chain will report.
    pub hash: H256,
    pub nonce: U256,
}
