// bot/src/local_simulator.rs
// In-process EVM stand-in for tests: signed raw transactions are decoded,
// sender-recovered and applied to a tiny world with one ERC-20 token and any
// number of flash-loan receivers.

use crate::account::Account;
use crate::bindings::{
    BalanceOfReturn, DecimalsReturn, IERC20Calls, IFlashLoanTesterCalls, OwnerReturn,
    SymbolReturn, TestFlashLoanCall, TransferReturn,
};
use crate::chain::{CallRequest, ChainClient, TxReceipt, TxStatus};
use crate::contracts::MODE_SUCCESS;
use crate::encoding::encode_revert_reason;
use crate::error::ChainError;
use async_trait::async_trait;
use ethers::{
    abi::{AbiDecode, AbiEncode},
    types::{transaction::eip2718::TypedTransaction, Address, Bytes, H256, U256, U64},
    utils::{get_contract_address, keccak256, parse_ether, rlp::Rlp},
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

// --- Simulation Constants ---
/// Well-known anvil/hardhat development key #0.
pub const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
/// Development key #1, used as a second (non-owner) operator.
pub const OTHER_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
pub const DEFAULT_CHAIN_ID: u64 = 31337;
pub const DEFAULT_GAS_PRICE_WEI: u64 = 1_000_000_000;
/// Fee denominator charged by the simulated provider (0.01%).
pub const DEFAULT_FEE_DENOMINATOR: u64 = 10_000;
const FUNDED_NATIVE_ETHER: u64 = 100;
const TX_BASE_GAS: u64 = 21_000;
const TX_CREATE_GAS: u64 = 32_000;
const TX_ZERO_BYTE_GAS: u64 = 4;
const TX_NONZERO_BYTE_GAS: u64 = 16;

/// Hardhat-style artifact for the receiver contract. The bytecode is opaque to
/// the simulator; only the trailing constructor argument is interpreted.
pub const RECEIVER_ARTIFACT_JSON: &str = r#"{
  "_format": "hh-sol-artifact-1",
  "contractName": "FlashLoanTester",
  "sourceName": "contracts/FlashLoanTester.sol",
  "abi": [
    {
      "inputs": [{"internalType": "address", "name": "_flashLoanProvider", "type": "address"}],
      "stateMutability": "nonpayable",
      "type": "constructor"
    },
    {
      "inputs": [],
      "name": "owner",
      "outputs": [{"internalType": "address", "name": "", "type": "address"}],
      "stateMutability": "view",
      "type": "function"
    },
    {
      "inputs": [
        {"internalType": "address", "name": "token", "type": "address"},
        {"internalType": "uint256", "name": "amount", "type": "uint256"},
        {"internalType": "uint8", "name": "mode", "type": "uint8"}
      ],
      "name": "testFlashLoan",
      "outputs": [],
      "stateMutability": "nonpayable",
      "type": "function"
    }
  ],
  "bytecode": "0x608060405234801561001057600080fd5b5060405161010038038061010083398101604081905261002f91610054565b600080546001600160a01b03191633179055600180546001600160a01b0319166001600160a01b0392909216919091179055610084565b",
  "deployedBytecode": "0x6080604052348015600f57600080fd5b50",
  "linkReferences": {},
  "deployedLinkReferences": {}
}"#;

#[derive(Debug, Clone)]
struct TokenState {
    address: Address,
    symbol: String,
    decimals: u8,
    balances: HashMap<Address, U256>,
}

impl TokenState {
    fn balance(&self, holder: Address) -> U256 {
        self.balances.get(&holder).copied().unwrap_or_default()
    }

    fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<(), String> {
        let available = self.balance(from);
        if available < amount {
            return Err("ERC20: transfer amount exceeds balance".into());
        }
        self.balances.insert(from, available - amount);
        *self.balances.entry(to).or_default() += amount;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Receiver {
    owner: Address,
    provider: Address,
}

/// Fault injection and fee policy.
#[derive(Debug, Clone)]
struct Knobs {
    hold_receipts: bool,
    omit_contract_address: bool,
    revert_deployments: bool,
    unreachable: bool,
    fee_override: Option<U256>,
    flash_loan_revert: Option<String>,
}

#[derive(Debug, Clone)]
struct SimState {
    chain_id: u64,
    gas_price: U256,
    block_number: u64,
    native: HashMap<Address, U256>,
    nonces: HashMap<Address, U256>,
    token: TokenState,
    receivers: HashMap<Address, Receiver>,
    receipts: HashMap<H256, TxReceipt>,
    sent: usize,
    balance_queries: HashMap<Address, usize>,
    knobs: Knobs,
}

impl SimState {
    fn nonce(&self, address: Address) -> U256 {
        self.nonces.get(&address).copied().unwrap_or_default()
    }

    fn native_balance(&self, address: Address) -> U256 {
        self.native.get(&address).copied().unwrap_or_default()
    }

    fn ensure_reachable(&self) -> Result<(), ChainError> {
        if self.knobs.unreachable {
            return Err(ChainError::Transport("error sending request: connection refused".into()));
        }
        Ok(())
    }

    /// Applies a transaction body. `Err` carries the revert reason; the caller
    /// discards all state changes in that case.
    fn execute(
        &mut self,
        from: Address,
        to: Option<Address>,
        data: &Bytes,
        nonce: U256,
    ) -> Result<Option<Address>, String> {
        let Some(to) = to else {
            return self.create(from, data, nonce).map(Some);
        };
        if to == self.token.address {
            return match IERC20Calls::decode(data) {
                Ok(IERC20Calls::Transfer(call)) => {
                    self.token.transfer(from, call.to, call.amount).map(|_| None)
                }
                Ok(_) => Ok(None),
                Err(_) => Err("unrecognized token selector".into()),
            };
        }
        if self.receivers.contains_key(&to) {
            return match IFlashLoanTesterCalls::decode(data) {
                Ok(IFlashLoanTesterCalls::TestFlashLoan(call)) => {
                    self.flash_loan(from, to, &call).map(|_| None)
                }
                Ok(_) => Ok(None),
                Err(_) => Err("unrecognized receiver selector".into()),
            };
        }
        // Plain value transfer to an account without code.
        Ok(None)
    }

    fn create(&mut self, from: Address, data: &Bytes, nonce: U256) -> Result<Address, String> {
        if self.knobs.revert_deployments {
            return Err("contract creation reverted".into());
        }
        if data.len() < 32 {
            return Err("creation data too short for constructor(address)".into());
        }
        let provider = Address::from_slice(&data[data.len() - 20..]);
        let address = get_contract_address(from, nonce);
        self.receivers.insert(address, Receiver { owner: from, provider });
        Ok(address)
    }

    /// Borrow-and-repay inside one transaction: only the fee leaves the receiver.
    fn flash_loan(&mut self, caller: Address, receiver: Address, call: &TestFlashLoanCall) -> Result<(), String> {
        let Receiver { owner, provider } = self
            .receivers
            .get(&receiver)
            .copied()
            .ok_or_else(|| "no receiver at target".to_owned())?;
        if caller != owner {
            return Err("Only owner".into());
        }
        if let Some(reason) = &self.knobs.flash_loan_revert {
            return Err(reason.clone());
        }
        if call.token != self.token.address {
            return Err("Unsupported token".into());
        }
        if call.mode != MODE_SUCCESS {
            return Err("Flash loan test mode failure".into());
        }
        let fee = match self.knobs.fee_override {
            Some(fee) => fee,
            None => call.amount / U256::from(DEFAULT_FEE_DENOMINATOR),
        };
        if self.token.balance(receiver) < fee {
            return Err("Insufficient balance to repay fee".into());
        }
        self.token.transfer(receiver, provider, fee)
    }

    fn read(&mut self, request: &CallRequest) -> Result<Bytes, ChainError> {
        let revert = |reason: String| ChainError::Revert {
            data: encode_revert_reason(&reason),
            reason: Some(reason),
        };
        let caller = request.from.unwrap_or_default();
        if request.to == self.token.address {
            let output = match IERC20Calls::decode(&request.data) {
                Ok(IERC20Calls::BalanceOf(call)) => {
                    *self.balance_queries.entry(call.account).or_default() += 1;
                    BalanceOfReturn(self.token.balance(call.account)).encode()
                }
                Ok(IERC20Calls::Symbol(_)) => SymbolReturn(self.token.symbol.clone()).encode(),
                Ok(IERC20Calls::Decimals(_)) => DecimalsReturn(self.token.decimals).encode(),
                Ok(IERC20Calls::Transfer(call)) => {
                    let mut scratch = self.token.clone();
                    scratch.transfer(caller, call.to, call.amount).map_err(revert)?;
                    TransferReturn(true).encode()
                }
                Err(_) => return Err(ChainError::Revert { reason: None, data: Bytes::default() }),
            };
            return Ok(output.into());
        }
        if let Some(receiver) = self.receivers.get(&request.to).copied() {
            let output = match IFlashLoanTesterCalls::decode(&request.data) {
                Ok(IFlashLoanTesterCalls::Owner(_)) => OwnerReturn(receiver.owner).encode(),
                Ok(IFlashLoanTesterCalls::TestFlashLoan(call)) => {
                    let mut scratch = self.clone();
                    scratch.flash_loan(caller, request.to, &call).map_err(revert)?;
                    Vec::new()
                }
                Err(_) => return Err(ChainError::Revert { reason: None, data: Bytes::default() }),
            };
            return Ok(output.into());
        }
        // No code at the target: the call succeeds with empty output.
        Ok(Bytes::default())
    }
}

fn intrinsic_gas(data: &[u8], is_create: bool) -> U256 {
    let payload: u64 = data
        .iter()
        .map(|byte| if *byte == 0 { TX_ZERO_BYTE_GAS } else { TX_NONZERO_BYTE_GAS })
        .sum();
    let create = if is_create { TX_CREATE_GAS } else { 0 };
    U256::from(TX_BASE_GAS + create + payload)
}

/// Single-token chain held in memory. Every transaction is mined into its own
/// block as soon as it is accepted.
#[derive(Debug)]
pub struct LocalChain {
    state: Mutex<SimState>,
}

impl Default for LocalChain {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalChain {
    pub fn new() -> Self {
        let token = TokenState {
            address: Address::from_low_u64_be(0x7e57),
            symbol: "TUSDT".into(),
            decimals: 6,
            balances: HashMap::new(),
        };
        let state = SimState {
            chain_id: DEFAULT_CHAIN_ID,
            gas_price: U256::from(DEFAULT_GAS_PRICE_WEI),
            block_number: 0,
            native: HashMap::new(),
            nonces: HashMap::new(),
            token,
            receivers: HashMap::new(),
            receipts: HashMap::new(),
            sent: 0,
            balance_queries: HashMap::new(),
            knobs: Knobs {
                hold_receipts: false,
                omit_contract_address: false,
                revert_deployments: false,
                unreachable: false,
                fee_override: None,
                flash_loan_revert: None,
            },
        };
        Self { state: Mutex::new(state) }
    }

    pub fn with_token(self, symbol: &str, decimals: u8) -> Self {
        {
            let mut state = self.lock();
            state.token.symbol = symbol.to_owned();
            state.token.decimals = decimals;
        }
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn token_address(&self) -> Address {
        self.lock().token.address
    }

    pub fn mint(&self, to: Address, amount: U256) {
        *self.lock().token.balances.entry(to).or_default() += amount;
    }

    pub fn token_balance(&self, holder: Address) -> U256 {
        self.lock().token.balance(holder)
    }

    pub fn fund_native(&self, to: Address, amount: U256) {
        *self.lock().native.entry(to).or_default() += amount;
    }

    pub fn native_balance(&self, address: Address) -> U256 {
        self.lock().native_balance(address)
    }

    /// Account for `private_key` bound to this chain's id. No native balance.
    ///
    /// # Panics
    /// If `private_key` is not a valid key.
    pub fn account(&self, private_key: &str) -> Account {
        let chain_id = self.lock().chain_id;
        Account::from_private_key(private_key, chain_id).expect("simulator account key must be valid")
    }

    /// Like [`LocalChain::account`], with native balance for gas.
    pub fn funded_account(&self, private_key: &str) -> Account {
        let account = self.account(private_key);
        self.fund_native(account.address(), parse_ether(FUNDED_NATIVE_ETHER).unwrap_or_default());
        account
    }

    /// Installs a receiver without a deployment transaction.
    pub fn register_receiver(&self, address: Address, owner: Address, provider: Address) {
        self.lock().receivers.insert(address, Receiver { owner, provider });
    }

    pub fn receiver_provider(&self, address: Address) -> Option<Address> {
        self.lock().receivers.get(&address).map(|receiver| receiver.provider)
    }

    pub fn set_gas_price(&self, gas_price: U256) {
        self.lock().gas_price = gas_price;
    }

    pub fn gas_price(&self) -> U256 {
        self.lock().gas_price
    }

    pub fn nonce_of(&self, address: Address) -> U256 {
        self.lock().nonce(address)
    }

    /// Transactions accepted into a block (successful or reverted).
    pub fn sent_count(&self) -> usize {
        self.lock().sent
    }

    /// `balanceOf(holder)` reads served so far.
    pub fn balance_queries(&self, holder: Address) -> usize {
        self.lock().balance_queries.get(&holder).copied().unwrap_or_default()
    }

    /// Keeps mining but hides receipts, as a congested node would.
    pub fn hold_receipts(&self, hold: bool) {
        self.lock().knobs.hold_receipts = hold;
    }

    pub fn omit_contract_address(&self, omit: bool) {
        self.lock().knobs.omit_contract_address = omit;
    }

    pub fn revert_deployments(&self, revert: bool) {
        self.lock().knobs.revert_deployments = revert;
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().knobs.unreachable = unreachable;
    }

    /// Charges a fixed fee instead of `amount / denominator`.
    pub fn set_fee_override(&self, fee: Option<U256>) {
        self.lock().knobs.fee_override = fee;
    }

    /// Makes every `testFlashLoan` revert with `reason`.
    pub fn revert_flash_loans(&self, reason: Option<&str>) {
        self.lock().knobs.flash_loan_revert = reason.map(str::to_owned);
    }
}

#[async_trait]
impl ChainClient for LocalChain {
    fn chain_id(&self) -> u64 {
        self.lock().chain_id
    }

    async fn get_balance(&self, address: Address) -> Result<U256, ChainError> {
        let state = self.lock();
        state.ensure_reachable()?;
        Ok(state.native_balance(address))
    }

    async fn get_nonce(&self, address: Address) -> Result<U256, ChainError> {
        let state = self.lock();
        state.ensure_reachable()?;
        Ok(state.nonce(address))
    }

    async fn get_gas_price(&self) -> Result<U256, ChainError> {
        let state = self.lock();
        state.ensure_reachable()?;
        Ok(state.gas_price)
    }

    async fn call(&self, request: &CallRequest) -> Result<Bytes, ChainError> {
        let mut state = self.lock();
        state.ensure_reachable()?;
        state.read(request)
    }

    async fn send_signed(&self, raw: Bytes) -> Result<H256, ChainError> {
        let mut state = self.lock();
        state.ensure_reachable()?;

        let (tx, signature) = TypedTransaction::decode_signed(&Rlp::new(raw.as_ref()))
            .map_err(|e| ChainError::Rejected(format!("malformed transaction: {e}")))?;
        let from = signature
            .recover(tx.sighash())
            .map_err(|e| ChainError::Rejected(format!("invalid signature: {e}")))?;
        if let Some(chain_id) = tx.chain_id() {
            if chain_id.as_u64() != state.chain_id {
                return Err(ChainError::Rejected(format!("invalid chain id {chain_id}")));
            }
        }

        let nonce = tx.nonce().copied().unwrap_or_default();
        let expected = state.nonce(from);
        if nonce < expected {
            return Err(ChainError::NonceRejected(format!(
                "nonce too low: next nonce {expected}, tx nonce {nonce}"
            )));
        }
        if nonce > expected {
            return Err(ChainError::NonceRejected(format!(
                "nonce too high: next nonce {expected}, tx nonce {nonce}"
            )));
        }

        let to = tx.to().and_then(|target| target.as_address().copied());
        let data = tx.data().cloned().unwrap_or_default();
        let gas_limit = tx.gas().copied().unwrap_or_default();
        let gas_price = tx.gas_price().unwrap_or_default();
        let gas_used = intrinsic_gas(&data, to.is_none());
        if gas_limit < gas_used {
            return Err(ChainError::Rejected(format!("intrinsic gas too low: have {gas_limit}, want {gas_used}")));
        }
        let balance = state.native_balance(from);
        if balance < gas_limit.saturating_mul(gas_price) {
            return Err(ChainError::Rejected(format!(
                "insufficient funds for gas * price + value: balance {balance}"
            )));
        }

        let tx_hash = H256::from(keccak256(raw.as_ref()));
        let mut next = state.clone();
        let outcome = next.execute(from, to, &data, nonce);
        let (status, created) = match outcome {
            Ok(created) => {
                *state = next;
                (TxStatus::Success, created)
            }
            Err(reason) => {
                debug!(?tx_hash, %reason, "Simulated transaction reverted.");
                (TxStatus::Failure, None)
            }
        };

        state.nonces.insert(from, nonce + 1);
        state.native.insert(from, balance - gas_used * gas_price);
        state.sent += 1;
        state.block_number += 1;
        let contract_address = if state.knobs.omit_contract_address { None } else { created };
        let receipt = TxReceipt {
            transaction_hash: tx_hash,
            status,
            block_number: Some(U64::from(state.block_number)),
            gas_used: Some(gas_used),
            contract_address,
        };
        state.receipts.insert(tx_hash, receipt);
        Ok(tx_hash)
    }

    async fn get_receipt(&self, tx_hash: H256) -> Result<Option<TxReceipt>, ChainError> {
        let state = self.lock();
        state.ensure_reachable()?;
        if state.knobs.hold_receipts {
            return Ok(None);
        }
        Ok(state.receipts.get(&tx_hash).cloned())
    }
}

// END OF FILE: bot/src/local_simulator.rs

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::PendingTransaction;
    use crate::contracts::{Erc20, FlashLoanTester};

    async fn send(chain: &LocalChain, account: &Account, to: Address, data: Bytes) -> TxReceipt {
        let tx = PendingTransaction {
            from: account.address(),
            to: Some(to),
            nonce: chain.nonce_of(account.address()),
            gas_limit: U256::from(500_000),
            gas_price: chain.gas_price(),
            value: U256::zero(),
            data,
        };
        let signed = account.sign(tx).await.unwrap();
        let tx_hash = chain.send_signed(signed.raw).await.unwrap();
        chain.get_receipt(tx_hash).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn flash_loan_charges_floor_fee_to_provider() {
        let chain = LocalChain::new();
        let owner = chain.funded_account(DEV_KEY);
        let receiver = Address::repeat_byte(0x77);
        let provider = Address::repeat_byte(0x63);
        chain.register_receiver(receiver, owner.address(), provider);
        chain.mint(receiver, U256::from(1_000_000));

        let tester = FlashLoanTester::new(receiver, &chain);
        let data = tester.test_flash_loan_calldata(chain.token_address(), U256::from(100_009_999), MODE_SUCCESS);
        let receipt = send(&chain, &owner, receiver, data).await;

        assert!(receipt.is_success());
        assert_eq!(chain.token_balance(receiver), U256::from(990_000));
        assert_eq!(chain.token_balance(provider), U256::from(10_000));
    }

    #[tokio::test]
    async fn reverted_transaction_keeps_state_but_burns_gas_and_nonce() {
        let chain = LocalChain::new();
        let owner = chain.funded_account(DEV_KEY);
        let before = chain.native_balance(owner.address());
        let token = Erc20::new(chain.token_address(), &chain);

        let data = token.transfer_calldata(Address::repeat_byte(1), U256::from(5));
        let receipt = send(&chain, &owner, token.address(), data).await;

        assert_eq!(receipt.status, TxStatus::Failure);
        assert_eq!(chain.nonce_of(owner.address()), U256::one());
        assert!(chain.native_balance(owner.address()) < before);
        assert_eq!(chain.token_balance(Address::repeat_byte(1)), U256::zero());
    }

    #[tokio::test]
    async fn replayed_call_reports_revert_reason() {
        let chain = LocalChain::new();
        let owner = chain.funded_account(DEV_KEY);
        let stranger = chain.funded_account(OTHER_KEY);
        let receiver = Address::repeat_byte(0x77);
        chain.register_receiver(receiver, owner.address(), Address::repeat_byte(0x63));

        let data = FlashLoanTester::new(receiver, &chain).test_flash_loan_calldata(
            chain.token_address(),
            U256::from(100),
            MODE_SUCCESS,
        );
        let request = CallRequest::new(receiver, data).with_sender(stranger.address());
        let err = chain.call(&request).await.unwrap_err();
        assert!(matches!(err, ChainError::Revert { reason: Some(ref r), .. } if r == "Only owner"));
    }

    #[tokio::test]
    async fn unreachable_chain_fails_every_request() {
        let chain = LocalChain::new();
        chain.set_unreachable(true);
        assert!(matches!(chain.get_gas_price().await, Err(ChainError::Transport(_))));
        assert!(matches!(chain.get_receipt(H256::zero()).await, Err(ChainError::Transport(_))));
    }

    #[tokio::test]
    async fn underfunded_sender_is_rejected_without_consuming_nonce() {
        let chain = LocalChain::new();
        let broke = chain.account(DEV_KEY);
        let tx = PendingTransaction {
            from: broke.address(),
            to: Some(Address::repeat_byte(9)),
            nonce: U256::zero(),
            gas_limit: U256::from(21_000),
            gas_price: chain.gas_price(),
            value: U256::zero(),
            data: Bytes::default(),
        };
        let signed = broke.sign(tx).await.unwrap();
        assert!(matches!(chain.send_signed(signed.raw).await, Err(ChainError::Rejected(_))));
        assert_eq!(chain.nonce_of(broke.address()), U256::zero());
        assert_eq!(chain.sent_count(), 0);
    }
}
