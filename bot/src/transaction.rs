// bot/src/transaction.rs

use crate::account::{Account, PendingTransaction, SignedTransaction};
use crate::chain::{ChainClient, TxReceipt};
use crate::error::{ChainError, FlashLoanError};
use crate::gas::{fetch_gas_price, GasSettings};
use ethers::types::{Address, Bytes, H256, U256};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, warn};

// --- Constants ---
pub const TX_CONFIRMATION_TIMEOUT_SECS: u64 = 120;
pub const TX_POLLING_INTERVAL_MS: u64 = 2_000;

/// Bounds on how long a receipt is waited for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiptPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for ReceiptPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(TX_CONFIRMATION_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(TX_POLLING_INTERVAL_MS),
        }
    }
}

/// Caller-held abort switch.
///
/// Once fired, no further transaction is sent. Aborting a receipt wait only
/// stops the local wait; a transaction already handed to the node may still
/// be included.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// Returns the trigger (send `true` to cancel) and the signal.
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx: Some(rx) })
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolves once cancellation is requested; pends forever otherwise.
    pub async fn cancelled(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                if rx.changed().await.is_err() {
                    // Trigger dropped without firing.
                    break;
                }
            }
        }
        std::future::pending::<()>().await
    }
}

/// Polls for `tx_hash`'s receipt until it appears, `policy.timeout` elapses, or
/// `cancel` fires.
#[instrument(skip(client, policy, cancel), level = "debug")]
pub async fn wait_for_receipt<C: ChainClient + ?Sized>(
    client: &C,
    tx_hash: H256,
    policy: &ReceiptPolicy,
    cancel: &mut CancelSignal,
) -> Result<TxReceipt, FlashLoanError> {
    let started = Instant::now();
    tokio::select! {
        polled = timeout(policy.timeout, poll_receipt(client, tx_hash, policy.poll_interval)) => {
            match polled {
                Ok(receipt) => {
                    debug!(?tx_hash, elapsed = ?started.elapsed(), "Receipt observed.");
                    Ok(receipt)
                }
                Err(_) => {
                    error!(?tx_hash, timeout = ?policy.timeout, "Timed out waiting for receipt.");
                    Err(FlashLoanError::Timeout { tx_hash, waited: started.elapsed() })
                }
            }
        }
        _ = cancel.cancelled() => {
            warn!(?tx_hash, "Receipt wait cancelled; transaction may still be included.");
            Err(FlashLoanError::Cancelled { tx_hash })
        }
    }
}

async fn poll_receipt<C: ChainClient + ?Sized>(
    client: &C,
    tx_hash: H256,
    poll_interval: Duration,
) -> TxReceipt {
    loop {
        match client.get_receipt(tx_hash).await {
            Ok(Some(receipt)) => return receipt,
            Ok(None) => debug!(?tx_hash, "Receipt not yet available."),
            // A failed lookup says nothing about inclusion; keep polling until the bound.
            Err(e) => warn!(?tx_hash, error = %e, "Receipt lookup failed."),
        }
        sleep(poll_interval).await;
    }
}

/// Builds, signs, submits and confirms transactions for one account.
///
/// Every send takes `&mut self`, so a submitter can never have two
/// transactions in flight at once.
pub struct TxSubmitter<'a, C: ?Sized> {
    client: &'a C,
    account: &'a Account,
    gas: GasSettings,
    policy: ReceiptPolicy,
    cancel: CancelSignal,
}

impl<'a, C: ChainClient + ?Sized> TxSubmitter<'a, C> {
    pub fn new(
        client: &'a C,
        account: &'a Account,
        gas: GasSettings,
        policy: ReceiptPolicy,
        cancel: CancelSignal,
    ) -> Self {
        Self { client, account, gas, policy, cancel }
    }

    /// Builds a transaction against the account's current on-chain nonce.
    #[instrument(skip(self, data), fields(from = ?self.account.address()), level = "debug")]
    pub async fn build(
        &self,
        to: Option<Address>,
        data: Bytes,
        gas_limit: U256,
    ) -> Result<PendingTransaction, FlashLoanError> {
        let from = self.account.address();
        let nonce = self.client.get_nonce(from).await?;
        let gas_price = fetch_gas_price(self.client, &self.gas).await?;
        debug!(%nonce, %gas_limit, %gas_price, "Transaction built.");
        Ok(PendingTransaction {
            from,
            to,
            nonce,
            gas_limit,
            gas_price,
            value: U256::zero(),
            data,
        })
    }

    /// Signs and submits `tx`. Returns as soon as the node accepts it.
    #[instrument(skip(self, tx), fields(nonce = %tx.nonce, to = ?tx.to), level = "info")]
    pub async fn submit(&mut self, tx: PendingTransaction) -> Result<H256, FlashLoanError> {
        if self.cancel.is_cancelled() {
            warn!(nonce = %tx.nonce, "Cancellation requested; not sending.");
            let step = match tx.to {
                Some(to) => format!("transaction to {to:?}"),
                None => "contract creation".to_owned(),
            };
            return Err(FlashLoanError::Aborted { step });
        }
        let signed = self.account.sign(tx).await?;
        self.submit_signed(&signed).await
    }

    /// Submits an already signed payload.
    pub async fn submit_signed(&mut self, signed: &SignedTransaction) -> Result<H256, FlashLoanError> {
        match self.client.send_signed(signed.raw.clone()).await {
            Ok(tx_hash) => {
                if tx_hash != signed.hash {
                    warn!(reported = ?tx_hash, local = ?signed.hash, "Node reported a different transaction hash.");
                }
                info!(?tx_hash, nonce = %signed.nonce, "Transaction submitted.");
                Ok(tx_hash)
            }
            Err(ChainError::NonceRejected(reason)) => {
                error!(nonce = %signed.nonce, %reason, "Chain rejected transaction nonce.");
                Err(FlashLoanError::NonceRejected { nonce: signed.nonce, reason })
            }
            Err(e) => {
                error!(error = %e, "Transaction submission failed.");
                Err(e.into())
            }
        }
    }

    pub async fn confirm(&mut self, tx_hash: H256) -> Result<TxReceipt, FlashLoanError> {
        wait_for_receipt(self.client, tx_hash, &self.policy, &mut self.cancel).await
    }

}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_simulator::{LocalChain, DEV_KEY};

    fn fast_policy() -> ReceiptPolicy {
        ReceiptPolicy { timeout: Duration::from_millis(150), poll_interval: Duration::from_millis(10) }
    }

    #[tokio::test]
    async fn build_uses_on_chain_nonce() {
        let chain = LocalChain::new();
        let account = chain.funded_account(DEV_KEY);
        let submitter = TxSubmitter::new(&chain, &account, GasSettings::default(), fast_policy(), CancelSignal::never());

        let tx = submitter
            .build(Some(Address::repeat_byte(9)), Bytes::default(), U256::from(21_000))
            .await
            .unwrap();
        assert_eq!(tx.nonce, U256::zero());
        assert_eq!(tx.gas_price, chain.gas_price());
    }

    #[tokio::test]
    async fn resubmitting_a_signed_transaction_is_rejected() {
        let chain = LocalChain::new();
        let account = chain.funded_account(DEV_KEY);
        let mut submitter = TxSubmitter::new(&chain, &account, GasSettings::default(), fast_policy(), CancelSignal::never());

        let tx = submitter
            .build(Some(Address::repeat_byte(9)), Bytes::default(), U256::from(21_000))
            .await
            .unwrap();
        let signed = account.sign(tx).await.unwrap();
        let tx_hash = submitter.submit_signed(&signed).await.unwrap();
        assert!(submitter.confirm(tx_hash).await.unwrap().is_success());

        let err = submitter.submit_signed(&signed).await.unwrap_err();
        assert!(matches!(err, FlashLoanError::NonceRejected { nonce, .. } if nonce == U256::zero()));
        assert_eq!(chain.nonce_of(account.address()), U256::one());
    }

    #[tokio::test]
    async fn two_transactions_built_on_one_nonce_cannot_both_land() {
        let chain = LocalChain::new();
        let account = chain.funded_account(DEV_KEY);
        let mut submitter = TxSubmitter::new(&chain, &account, GasSettings::default(), fast_policy(), CancelSignal::never());

        let first = submitter.build(Some(Address::repeat_byte(1)), Bytes::default(), U256::from(21_000)).await.unwrap();
        let second = submitter.build(Some(Address::repeat_byte(2)), Bytes::default(), U256::from(21_000)).await.unwrap();
        assert_eq!(first.nonce, second.nonce);

        submitter.submit(first).await.unwrap();
        let err = submitter.submit(second).await.unwrap_err();
        assert!(matches!(err, FlashLoanError::NonceRejected { .. }));
    }

    #[tokio::test]
    async fn missing_receipt_times_out() {
        let chain = LocalChain::new();
        let account = chain.funded_account(DEV_KEY);
        chain.hold_receipts(true);
        let mut submitter = TxSubmitter::new(&chain, &account, GasSettings::default(), fast_policy(), CancelSignal::never());

        let tx = submitter.build(Some(Address::repeat_byte(9)), Bytes::default(), U256::from(21_000)).await.unwrap();
        let tx_hash = submitter.submit(tx).await.unwrap();
        let err = submitter.confirm(tx_hash).await.unwrap_err();
        assert!(matches!(err, FlashLoanError::Timeout { tx_hash: h, .. } if h == tx_hash));
    }

    #[tokio::test]
    async fn cancellation_aborts_wait() {
        let chain = LocalChain::new();
        let account = chain.funded_account(DEV_KEY);
        chain.hold_receipts(true);
        let (trigger, cancel) = CancelSignal::channel();
        let policy = ReceiptPolicy { timeout: Duration::from_secs(30), poll_interval: Duration::from_millis(10) };
        let mut submitter = TxSubmitter::new(&chain, &account, GasSettings::default(), policy, cancel);

        let tx = submitter.build(Some(Address::repeat_byte(9)), Bytes::default(), U256::from(21_000)).await.unwrap();
        let tx_hash = submitter.submit(tx).await.unwrap();
        trigger.send(true).unwrap();
        let err = submitter.confirm(tx_hash).await.unwrap_err();
        assert!(matches!(err, FlashLoanError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn cancelled_submitter_sends_nothing() {
        let chain = LocalChain::new();
        let account = chain.funded_account(DEV_KEY);
        let (trigger, cancel) = CancelSignal::channel();
        let mut submitter = TxSubmitter::new(&chain, &account, GasSettings::default(), fast_policy(), cancel);

        let tx = submitter.build(Some(Address::repeat_byte(9)), Bytes::default(), U256::from(21_000)).await.unwrap();
        trigger.send(true).unwrap();
        let err = submitter.submit(tx).await.unwrap_err();
        assert!(matches!(err, FlashLoanError::Aborted { .. }));
        assert!(!err.gas_spent());
        assert_eq!(chain.sent_count(), 0);
        assert_eq!(chain.nonce_of(account.address()), U256::zero());
    }

    #[tokio::test]
    async fn dropped_trigger_never_cancels() {
        let (trigger, mut cancel) = CancelSignal::channel();
        drop(trigger);
        assert!(!cancel.is_cancelled());
        let fired = timeout(Duration::from_millis(50), cancel.cancelled()).await;
        assert!(fired.is_err());
    }
}

// END OF FILE: bot/src/transaction.rs
