// bot/src/error.rs

use ethers::types::{Address, Bytes, H256, U256};
use std::time::Duration;
use thiserror::Error;

/// Failures reported by a [`ChainClient`](crate::chain::ChainClient).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("execution reverted: {}", .reason.as_deref().unwrap_or("no reason given"))]
    Revert { reason: Option<String>, data: Bytes },
    #[error("nonce rejected: {0}")]
    NonceRejected(String),
    #[error("transaction rejected: {0}")]
    Rejected(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ChainError {
    /// Node messages that mean the nonce was already used or is out of sequence.
    pub fn is_nonce_message(message: &str) -> bool {
        let lower = message.to_lowercase();
        lower.contains("nonce too low")
            || lower.contains("nonce too high")
            || lower.contains("invalid nonce")
            || lower.contains("already known")
            || lower.contains("replacement transaction underpriced")
    }
}

/// Workflow error taxonomy for deploy and flash-loan runs.
///
/// Variants raised before a transaction is sent (`Config`, `Connection`,
/// `InsufficientBalance`, `NotOwner`) never cost gas. The rest may have been
/// raised after a transaction was submitted; see [`FlashLoanError::gas_spent`].
#[derive(Debug, Error)]
pub enum FlashLoanError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("insufficient {asset} balance for {address:?}: have {balance}, need {required}")]
    InsufficientBalance {
        address: Address,
        asset: String,
        balance: U256,
        required: U256,
    },

    #[error("{caller:?} is not the owner of the contract (owner is {owner:?})")]
    NotOwner { caller: Address, owner: Address },

    #[error("deployment failed (tx {tx_hash:?}): {reason}")]
    Deployment { tx_hash: Option<H256>, reason: String },

    #[error("funding transfer failed (tx {tx_hash:?}): {reason}")]
    Funding { tx_hash: Option<H256>, reason: String },

    #[error("flash loan execution failed (tx {tx_hash:?}): {}", .reason.as_deref().unwrap_or("no revert reason reported"))]
    FlashLoanExecution {
        tx_hash: Option<H256>,
        reason: Option<String>,
    },

    #[error("no receipt for {tx_hash:?} after {waited:?}; on-chain outcome unknown")]
    Timeout { tx_hash: H256, waited: Duration },

    #[error("wait for {tx_hash:?} was cancelled; on-chain outcome unknown")]
    Cancelled { tx_hash: H256 },

    #[error("cancelled before {step} was sent; nothing submitted")]
    Aborted { step: String },

    #[error("nonce {nonce} rejected by the chain: {reason}")]
    NonceRejected { nonce: U256, reason: String },

    #[error("rpc error: {0}")]
    Rpc(#[from] ChainError),
}

impl FlashLoanError {
    /// True when a transaction may already have been submitted (and paid for)
    /// by the time this error was raised.
    pub fn gas_spent(&self) -> bool {
        match self {
            FlashLoanError::Deployment { tx_hash, .. }
            | FlashLoanError::Funding { tx_hash, .. }
            | FlashLoanError::FlashLoanExecution { tx_hash, .. } => tx_hash.is_some(),
            FlashLoanError::Timeout { .. } | FlashLoanError::Cancelled { .. } => true,
            _ => false,
        }
    }

    /// Transaction hash attached to the failure, if one was submitted.
    pub fn tx_hash(&self) -> Option<H256> {
        match self {
            FlashLoanError::Deployment { tx_hash, .. }
            | FlashLoanError::Funding { tx_hash, .. }
            | FlashLoanError::FlashLoanExecution { tx_hash, .. } => *tx_hash,
            FlashLoanError::Timeout { tx_hash, .. } | FlashLoanError::Cancelled { tx_hash } => {
                Some(*tx_hash)
            }
            _ => None,
        }
    }
}
