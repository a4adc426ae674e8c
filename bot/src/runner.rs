// bot/src/runner.rs
// Fund-then-borrow workflow against an already deployed receiver contract.
//
// IDLE -> VALIDATED -> FUNDED -> LOAN_SUBMITTED -> LOAN_CONFIRMED -> VERIFIED,
// with any step able to drop to FAILED. Each step consumes the previous
// step's output, so steps cannot be run out of order or repeated.

use crate::account::Account;
use crate::chain::{CallRequest, ChainClient, TxReceipt};
use crate::contracts::{Erc20, FlashLoanTester, MODE_SUCCESS};
use crate::error::{ChainError, FlashLoanError};
use crate::gas::GasSettings;
use crate::transaction::{wait_for_receipt, CancelSignal, ReceiptPolicy, TxSubmitter};
use crate::utils::{format_token, parse_token_amount, TokenAmount};
use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, H256, U256};
use std::fmt;
use tracing::{debug, error, info, instrument, warn};

pub const DEFAULT_FEE_DENOMINATOR: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Validated,
    Funded,
    LoanSubmitted,
    LoanConfirmed,
    Verified,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "IDLE",
            RunState::Validated => "VALIDATED",
            RunState::Funded => "FUNDED",
            RunState::LoanSubmitted => "LOAN_SUBMITTED",
            RunState::LoanConfirmed => "LOAN_CONFIRMED",
            RunState::Verified => "VERIFIED",
            RunState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// A token quantity as configured: decimal token units (resolved once the
/// token's decimals are known) or exact minor units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Amount {
    Tokens(String),
    Minor(U256),
}

impl Amount {
    pub fn to_minor_units(&self, decimals: u8) -> Result<U256, FlashLoanError> {
        match self {
            Amount::Tokens(tokens) => parse_token_amount(tokens, decimals),
            Amount::Minor(raw) => Ok(*raw),
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Amount::Tokens(tokens) => write!(f, "{tokens} tokens"),
            Amount::Minor(raw) => write!(f, "{raw} minor units"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Receiver deployed in the deploy step. `None` until one exists.
    pub contract: Option<Address>,
    pub token: Address,
    pub funding_amount: Amount,
    pub loan_amount: Amount,
    pub fee_denominator: U256,
    pub mode: u8,
    pub gas: GasSettings,
    pub receipts: ReceiptPolicy,
}

impl RunnerConfig {
    pub fn new(contract: Address, token: Address) -> Self {
        Self {
            contract: Some(contract),
            token,
            funding_amount: Amount::Tokens("1".into()),
            loan_amount: Amount::Tokens("100".into()),
            fee_denominator: U256::from(DEFAULT_FEE_DENOMINATOR),
            mode: MODE_SUCCESS,
            gas: GasSettings::default(),
            receipts: ReceiptPolicy::default(),
        }
    }
}

/// Client-side fee estimate: `loan_amount / fee_denominator`, rounded down.
pub fn expected_fee(loan_amount: U256, fee_denominator: U256) -> Result<U256, FlashLoanError> {
    loan_amount
        .checked_div(fee_denominator)
        .ok_or_else(|| FlashLoanError::Config("fee denominator must be greater than zero".into()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

impl TokenInfo {
    pub fn amount(&self, raw: U256) -> TokenAmount {
        TokenAmount::new(raw, self.decimals)
    }
}

/// Every precondition checked; nothing sent yet.
#[derive(Debug, Clone)]
pub struct ValidatedRun {
    pub contract: Address,
    pub caller: Address,
    pub token: TokenInfo,
    pub native_balance: U256,
    pub wallet_balance: U256,
    pub funding_amount: U256,
    pub loan_amount: U256,
    pub expected_fee: U256,
    pub started_at: DateTime<Utc>,
}

/// Funding transfer confirmed; `contract_balance_before` is the fee baseline.
#[derive(Debug, Clone)]
pub struct FundedRun {
    pub validated: ValidatedRun,
    pub transfer: TxReceipt,
    pub contract_balance_before: U256,
}

#[derive(Debug, Clone)]
pub struct ConfirmedLoan {
    pub funded: FundedRun,
    pub loan: TxReceipt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeVerification {
    pub expected_fee: U256,
    pub balance_before: U256,
    pub balance_after: U256,
}

impl FeeVerification {
    /// Tokens that left the contract during the loan. `None` if its balance grew.
    pub fn fee_paid(&self) -> Option<U256> {
        self.balance_before.checked_sub(self.balance_after)
    }

    pub fn matches(&self) -> bool {
        self.fee_paid() == Some(self.expected_fee)
    }

    pub fn warning(&self) -> Option<FeeMismatchWarning> {
        (!self.matches()).then_some(FeeMismatchWarning {
            expected: self.expected_fee,
            actual: self.fee_paid(),
            balance_before: self.balance_before,
            balance_after: self.balance_after,
        })
    }
}

/// The loan succeeded but the observed balance change is not the locally
/// computed fee. The provider's real fee formula may differ; not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeMismatchWarning {
    pub expected: U256,
    pub actual: Option<U256>,
    pub balance_before: U256,
    pub balance_after: U256,
}

impl fmt::Display for FeeMismatchWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.actual {
            Some(actual) => write!(f, "expected fee {} but contract paid {}", self.expected, actual),
            None => write!(
                f,
                "expected fee {} but contract balance grew from {} to {}",
                self.expected, self.balance_before, self.balance_after
            ),
        }
    }
}

/// Outcome of a verified run.
#[derive(Debug, Clone)]
pub struct FlashLoanReport {
    pub contract: Address,
    pub caller: Address,
    pub token: TokenInfo,
    pub funding_amount: U256,
    pub loan_amount: U256,
    pub transfer: TxReceipt,
    pub loan: TxReceipt,
    pub fee: FeeVerification,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl FlashLoanReport {
    pub fn total_repayment(&self) -> U256 {
        self.loan_amount.saturating_add(self.fee.expected_fee)
    }

    pub fn loan_tx_hash(&self) -> H256 {
        self.loan.transaction_hash
    }
}

impl fmt::Display for FlashLoanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = &self.token.symbol;
        let decimals = self.token.decimals;
        writeln!(f, "Contract:          {:?}", self.contract)?;
        writeln!(f, "Loan Amount:       {} {symbol}", format_token(self.loan_amount, decimals))?;
        writeln!(f, "Expected Fee:      {} {symbol}", format_token(self.fee.expected_fee, decimals))?;
        writeln!(f, "Total Repayment:   {} {symbol}", format_token(self.total_repayment(), decimals))?;
        writeln!(f, "Balance Before:    {} {symbol}", format_token(self.fee.balance_before, decimals))?;
        writeln!(f, "Balance After:     {} {symbol}", format_token(self.fee.balance_after, decimals))?;
        match self.fee.fee_paid() {
            Some(paid) => writeln!(f, "Fee Paid:          {} {symbol}", format_token(paid, decimals))?,
            None => writeln!(f, "Fee Paid:          n/a (balance increased)")?,
        }
        writeln!(f, "Fee Match:         {}", if self.fee.matches() { "✅ Yes" } else { "❌ No" })?;
        writeln!(f, "Transfer Tx:       {:?}", self.transfer.transaction_hash)?;
        writeln!(f, "Flash Loan Tx:     {:?}", self.loan.transaction_hash)?;
        if let Some(block) = self.loan.block_number {
            writeln!(f, "Block:             {block}")?;
        }
        if let Some(gas_used) = self.loan.gas_used {
            writeln!(f, "Gas Used:          {gas_used}")?;
        }
        write!(
            f,
            "Duration:          {}s",
            (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
        )
    }
}

fn chain_reason(err: &ChainError) -> String {
    match err {
        ChainError::Revert { reason: Some(reason), .. } => reason.clone(),
        other => other.to_string(),
    }
}

/// Drives one flash-loan test for one account.
pub struct FlashLoanRunner<'a, C: ?Sized> {
    client: &'a C,
    account: &'a Account,
    config: RunnerConfig,
    state: RunState,
    cancel: CancelSignal,
}

impl<'a, C: ChainClient + ?Sized> FlashLoanRunner<'a, C> {
    pub fn new(client: &'a C, account: &'a Account, config: RunnerConfig) -> Self {
        Self { client, account, config, state: RunState::Idle, cancel: CancelSignal::never() }
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn advance(&mut self, next: RunState) {
        info!(from = %self.state, to = %next, "Run state transition.");
        self.state = next;
    }

    fn fail(&mut self, err: FlashLoanError) -> FlashLoanError {
        error!(state = %self.state, error = %err, gas_spent = err.gas_spent(), tx_hash = ?err.tx_hash(), "❌ Flash loan run failed.");
        self.state = RunState::Failed;
        err
    }

    fn submitter(&self) -> TxSubmitter<'a, C> {
        TxSubmitter::new(self.client, self.account, self.config.gas, self.config.receipts, self.cancel.clone())
    }

    /// Validate, fund, borrow, verify.
    #[instrument(skip(self), fields(caller = ?self.account.address()), level = "info")]
    pub async fn run(&mut self) -> Result<FlashLoanReport, FlashLoanError> {
        let validated = self.validate().await?;
        let funded = self.fund(validated).await?;
        let confirmed = self.execute_loan(funded).await?;
        self.verify(confirmed).await
    }

    /// Read-only precondition checks. Sends nothing.
    pub async fn validate(&mut self) -> Result<ValidatedRun, FlashLoanError> {
        let outcome = self.check_preconditions().await;
        match outcome {
            Ok(validated) => {
                self.advance(RunState::Validated);
                Ok(validated)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn check_preconditions(&self) -> Result<ValidatedRun, FlashLoanError> {
        let started_at = Utc::now();
        if self.config.fee_denominator.is_zero() {
            return Err(FlashLoanError::Config("FEE_DENOMINATOR must be greater than zero".into()));
        }
        let contract = match self.config.contract {
            Some(contract) if !contract.is_zero() => contract,
            Some(_) => return Err(FlashLoanError::Config("DEPLOYED_CONTRACT is the zero address".into())),
            None => {
                return Err(FlashLoanError::Config(
                    "DEPLOYED_CONTRACT is not set; run the deploy step first".into(),
                ))
            }
        };
        if self.config.token.is_zero() {
            return Err(FlashLoanError::Config("TOKEN_ADDRESS is the zero address".into()));
        }

        let caller = self.account.address();
        let erc20 = Erc20::new(self.config.token, self.client);
        let token = TokenInfo {
            address: erc20.address(),
            symbol: erc20.symbol().await?,
            decimals: erc20.decimals().await?,
        };

        let native_balance = self.client.get_balance(caller).await?;
        if native_balance.is_zero() {
            return Err(FlashLoanError::InsufficientBalance {
                address: caller,
                asset: "native".into(),
                balance: native_balance,
                required: U256::one(),
            });
        }

        let wallet_balance = erc20.balance_of(caller).await?;
        info!(balance = %token.amount(wallet_balance), symbol = %token.symbol, "💰 Wallet token balance.");
        if wallet_balance.is_zero() {
            return Err(FlashLoanError::InsufficientBalance {
                address: caller,
                asset: token.symbol.clone(),
                balance: wallet_balance,
                required: U256::one(),
            });
        }

        let owner = FlashLoanTester::new(contract, self.client)
            .owner()
            .await
            .map_err(|e| match e {
                ChainError::Decode(_) => FlashLoanError::Config(format!(
                    "{contract:?} does not answer owner(); is it the deployed receiver?"
                )),
                other => other.into(),
            })?;
        if owner != caller {
            return Err(FlashLoanError::NotOwner { caller, owner });
        }

        let funding_amount = self.config.funding_amount.to_minor_units(token.decimals)?;
        if funding_amount.is_zero() {
            return Err(FlashLoanError::Config("FUNDING_AMOUNT must be greater than zero".into()));
        }
        if funding_amount > wallet_balance {
            return Err(FlashLoanError::InsufficientBalance {
                address: caller,
                asset: token.symbol.clone(),
                balance: wallet_balance,
                required: funding_amount,
            });
        }
        let loan_amount = self.config.loan_amount.to_minor_units(token.decimals)?;
        if loan_amount.is_zero() {
            return Err(FlashLoanError::Config("LOAN_AMOUNT must be greater than zero".into()));
        }
        let expected_fee = expected_fee(loan_amount, self.config.fee_denominator)?;
        if funding_amount < expected_fee {
            warn!(funding = %token.amount(funding_amount), fee = %token.amount(expected_fee), "Funding is below the expected fee; the loan will likely revert.");
        }

        Ok(ValidatedRun {
            contract,
            caller,
            token,
            native_balance,
            wallet_balance,
            funding_amount,
            loan_amount,
            expected_fee,
            started_at,
        })
    }

    /// Transfers `funding_amount` to the contract and records its balance.
    pub async fn fund(&mut self, run: ValidatedRun) -> Result<FundedRun, FlashLoanError> {
        let outcome = self.send_funding(run).await;
        match outcome {
            Ok(funded) => {
                self.advance(RunState::Funded);
                Ok(funded)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn send_funding(&self, run: ValidatedRun) -> Result<FundedRun, FlashLoanError> {
        let erc20 = Erc20::new(run.token.address, self.client);
        let data = erc20.transfer_calldata(run.contract, run.funding_amount);
        let mut submitter = self.submitter();

        info!(amount = %run.token.amount(run.funding_amount), symbol = %run.token.symbol, contract = ?run.contract, "💸 Funding contract for fees...");
        let tx = submitter
            .build(Some(erc20.address()), data.clone(), self.config.gas.transfer_gas_limit)
            .await?;
        let tx_hash = submitter.submit(tx).await.map_err(|e| match e {
            FlashLoanError::Rpc(rpc) => FlashLoanError::Funding { tx_hash: None, reason: chain_reason(&rpc) },
            other => other,
        })?;
        let transfer = submitter.confirm(tx_hash).await?;
        if !transfer.is_success() {
            let reason = self
                .replay_revert_reason(erc20.address(), data)
                .await
                .unwrap_or_else(|| "token transfer reverted".into());
            return Err(FlashLoanError::Funding { tx_hash: Some(tx_hash), reason });
        }

        let contract_balance_before = erc20.balance_of(run.contract).await?;
        info!(balance = %run.token.amount(contract_balance_before), "✅ Contract funded.");
        Ok(FundedRun { validated: run, transfer, contract_balance_before })
    }

    /// Submits `testFlashLoan` and waits for its receipt.
    pub async fn execute_loan(&mut self, funded: FundedRun) -> Result<ConfirmedLoan, FlashLoanError> {
        let submitted = self.submit_loan(&funded).await;
        let (tx_hash, data) = match submitted {
            Ok(sent) => sent,
            Err(e) => return Err(self.fail(e)),
        };
        self.advance(RunState::LoanSubmitted);
        let confirmed = self.confirm_loan(&funded, tx_hash, data).await;
        match confirmed {
            Ok(loan) => {
                self.advance(RunState::LoanConfirmed);
                Ok(ConfirmedLoan { funded, loan })
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn submit_loan(&self, funded: &FundedRun) -> Result<(H256, Bytes), FlashLoanError> {
        let run = &funded.validated;
        let tester = FlashLoanTester::new(run.contract, self.client);
        let data = tester.test_flash_loan_calldata(run.token.address, run.loan_amount, self.config.mode);
        let mut submitter = self.submitter();

        info!(
            amount = %run.token.amount(run.loan_amount),
            fee = %run.token.amount(run.expected_fee),
            mode = self.config.mode,
            "⏳ Executing flash loan transaction..."
        );
        let tx = submitter
            .build(Some(run.contract), data.clone(), self.config.gas.flash_loan_gas_limit)
            .await?;
        let tx_hash = submitter.submit(tx).await.map_err(|e| match e {
            FlashLoanError::Rpc(rpc) => FlashLoanError::FlashLoanExecution {
                tx_hash: None,
                reason: Some(chain_reason(&rpc)),
            },
            other => other,
        })?;
        Ok((tx_hash, data))
    }

    async fn confirm_loan(&self, funded: &FundedRun, tx_hash: H256, data: Bytes) -> Result<TxReceipt, FlashLoanError> {
        let mut cancel = self.cancel.clone();
        let loan = wait_for_receipt(self.client, tx_hash, &self.config.receipts, &mut cancel).await?;
        if !loan.is_success() {
            let reason = self.replay_revert_reason(funded.validated.contract, data).await;
            return Err(FlashLoanError::FlashLoanExecution { tx_hash: Some(tx_hash), reason });
        }
        info!(?tx_hash, block = ?loan.block_number, gas_used = ?loan.gas_used, "✅ Flash loan executed.");
        Ok(loan)
    }

    /// Compares the contract's balance drop with the expected fee.
    pub async fn verify(&mut self, confirmed: ConfirmedLoan) -> Result<FlashLoanReport, FlashLoanError> {
        let run = &confirmed.funded.validated;
        let read = Erc20::new(run.token.address, self.client).balance_of(run.contract).await;
        let balance_after = match read {
            Ok(balance) => balance,
            Err(e) => return Err(self.fail(e.into())),
        };
        let fee = FeeVerification {
            expected_fee: run.expected_fee,
            balance_before: confirmed.funded.contract_balance_before,
            balance_after,
        };
        match fee.warning() {
            Some(warning) => warn!(%warning, "⚠️ Fee mismatch."),
            None => info!(fee = %run.token.amount(run.expected_fee), "Fee matches expectation."),
        }
        self.advance(RunState::Verified);

        let ConfirmedLoan { funded, loan } = confirmed;
        let FundedRun { validated, transfer, .. } = funded;
        Ok(FlashLoanReport {
            contract: validated.contract,
            caller: validated.caller,
            token: validated.token,
            funding_amount: validated.funding_amount,
            loan_amount: validated.loan_amount,
            transfer,
            loan,
            fee,
            state: self.state,
            started_at: validated.started_at,
            finished_at: Utc::now(),
        })
    }

    /// Re-runs a failed call against latest state to recover its revert reason.
    async fn replay_revert_reason(&self, to: Address, data: Bytes) -> Option<String> {
        let request = CallRequest::new(to, data).with_sender(self.account.address());
        match self.client.call(&request).await {
            Err(ChainError::Revert { reason, .. }) => reason,
            Err(e) => {
                debug!(error = %e, "Revert reason replay failed.");
                None
            }
            Ok(_) => {
                debug!("Replay succeeded against latest state; revert reason unavailable.");
                None
            }
        }
    }
}


// END OF FILE: bot/src/runner.rs
