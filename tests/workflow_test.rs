// tests/workflow_test.rs
#![cfg(feature = "local_simulation")] // Only compile when local_simulation feature is enabled
#![allow(clippy::all)] // Suppress clippy warnings for test code

// --- Imports from our library ---
use flashloan_tester::{
    deploy::ContractArtifact,
    local_simulator::{LocalChain, DEV_KEY, OTHER_KEY, RECEIVER_ARTIFACT_JSON},
    Amount, CancelSignal, ChainClient, Config, ContractDeployer, FlashLoanError, FlashLoanRunner,
    GasSettings, ReceiptPolicy, RunState, RunnerConfig,
};

// --- Standard library and Crate Imports ---
use ethers::types::{Address, U256};
use eyre::{Result, WrapErr};
use std::{collections::HashMap, io::Write, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

// --- Constants ---
const PROVIDER: Address = Address::repeat_byte(0x63);
const WALLET_TOKENS: u64 = 50_000_000; // 50 TUSDT at 6 decimals

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fast_receipts() -> ReceiptPolicy {
    ReceiptPolicy { timeout: Duration::from_millis(500), poll_interval: Duration::from_millis(5) }
}

/// Writes the receiver artifact to a temp file, the way `npx hardhat compile` leaves it.
fn write_artifact(name: &str) -> Result<std::path::PathBuf> {
    let path = std::env::temp_dir().join(format!("flashloan_tester_{}_{name}.json", std::process::id()));
    let mut file = std::fs::File::create(&path).wrap_err("creating artifact file")?;
    file.write_all(RECEIVER_ARTIFACT_JSON.as_bytes())?;
    Ok(path)
}

#[tokio::test]
async fn deploy_then_execute_end_to_end() -> Result<()> {
    init_logging();
    let chain = LocalChain::new().with_token("TUSDT", 6);
    let account = chain.funded_account(DEV_KEY);
    chain.mint(account.address(), U256::from(WALLET_TOKENS));

    // --- Step 1: deploy ---
    let artifact = ContractArtifact::load(write_artifact("e2e")?)?;
    let deployer = ContractDeployer::new(&chain, GasSettings::default(), fast_receipts());
    let deployed = deployer.deploy_receiver(&artifact, PROVIDER, &account).await?;
    info!(address = ?deployed.address, "🧪 Receiver deployed.");

    // --- Step 2: execute with config-style token units ---
    let config = RunnerConfig {
        funding_amount: Amount::Tokens("1".into()),
        loan_amount: Amount::Tokens("100".into()),
        receipts: fast_receipts(),
        ..RunnerConfig::new(deployed.address, chain.token_address())
    };
    let mut runner = FlashLoanRunner::new(&chain, &account, config);
    let report = runner.run().await?;

    assert_eq!(runner.state(), RunState::Verified);
    assert_eq!(report.contract, deployed.address);
    assert_eq!(report.fee.expected_fee, U256::from(10_000u64));
    assert_eq!(report.fee.fee_paid(), Some(U256::from(10_000u64)));
    assert!(report.fee.matches());
    assert!(report.loan.is_success());
    assert_eq!(chain.token_balance(deployed.address), U256::from(990_000u64));
    assert_eq!(chain.token_balance(PROVIDER), U256::from(10_000u64));
    // deploy + transfer + loan, one nonce each
    assert_eq!(chain.nonce_of(account.address()), U256::from(3u64));
    Ok(())
}

#[tokio::test]
async fn second_run_reuses_the_same_contract() -> Result<()> {
    init_logging();
    let chain = LocalChain::new();
    let account = chain.funded_account(DEV_KEY);
    chain.mint(account.address(), U256::from(WALLET_TOKENS));
    let artifact = ContractArtifact::load(write_artifact("rerun")?)?;
    let deployed = ContractDeployer::new(&chain, GasSettings::default(), fast_receipts())
        .deploy_receiver(&artifact, PROVIDER, &account)
        .await?;

    let config = RunnerConfig {
        funding_amount: Amount::Minor(U256::from(1_000_000u64)),
        loan_amount: Amount::Minor(U256::from(100_000_000u64)),
        receipts: fast_receipts(),
        ..RunnerConfig::new(deployed.address, chain.token_address())
    };
    let first = FlashLoanRunner::new(&chain, &account, config.clone()).run().await?;
    let second = FlashLoanRunner::new(&chain, &account, config).run().await?;

    // The leftover from run one is part of run two's baseline.
    assert_eq!(first.fee.balance_after, U256::from(990_000u64));
    assert_eq!(second.fee.balance_before, U256::from(1_990_000u64));
    assert!(second.fee.matches());
    Ok(())
}

#[tokio::test]
async fn only_the_deployer_can_execute() -> Result<()> {
    init_logging();
    let chain = LocalChain::new();
    let owner = chain.funded_account(DEV_KEY);
    let operator = chain.funded_account(OTHER_KEY);
    chain.mint(operator.address(), U256::from(WALLET_TOKENS));
    let artifact = ContractArtifact::load(write_artifact("owner")?)?;
    let deployed = ContractDeployer::new(&chain, GasSettings::default(), fast_receipts())
        .deploy_receiver(&artifact, PROVIDER, &owner)
        .await?;
    let sent_before = chain.sent_count();

    let config = RunnerConfig { receipts: fast_receipts(), ..RunnerConfig::new(deployed.address, chain.token_address()) };
    let err = FlashLoanRunner::new(&chain, &operator, config).run().await.unwrap_err();

    assert!(matches!(err, FlashLoanError::NotOwner { owner: o, .. } if o == owner.address()));
    assert_eq!(chain.sent_count(), sent_before);
    assert_eq!(chain.token_balance(operator.address()), U256::from(WALLET_TOKENS));
    Ok(())
}

#[tokio::test]
async fn failed_deployment_leaves_nothing_to_execute() -> Result<()> {
    init_logging();
    let chain = LocalChain::new();
    let account = chain.funded_account(DEV_KEY);
    chain.omit_contract_address(true);
    let artifact = ContractArtifact::load(write_artifact("nodeploy")?)?;

    let err = ContractDeployer::new(&chain, GasSettings::default(), fast_receipts())
        .deploy_receiver(&artifact, PROVIDER, &account)
        .await
        .unwrap_err();
    assert!(matches!(err, FlashLoanError::Deployment { .. }));
    assert_eq!(chain.sent_count(), 1);
    Ok(())
}

#[tokio::test]
async fn cancelled_loan_wait_reports_unknown_outcome() -> Result<()> {
    init_logging();
    let chain = LocalChain::new();
    let account = chain.funded_account(DEV_KEY);
    chain.mint(account.address(), U256::from(WALLET_TOKENS));
    chain.register_receiver(Address::repeat_byte(0x77), account.address(), PROVIDER);

    let (trigger, cancel) = CancelSignal::channel();
    let config = RunnerConfig {
        receipts: ReceiptPolicy { timeout: Duration::from_secs(30), poll_interval: Duration::from_millis(5) },
        ..RunnerConfig::new(Address::repeat_byte(0x77), chain.token_address())
    };
    let mut runner = FlashLoanRunner::new(&chain, &account, config).with_cancel(cancel);
    let validated = runner.validate().await?;
    let funded = runner.fund(validated).await?;

    // Cancel only once the loan is already with the node.
    chain.hold_receipts(true);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = trigger.send(true);
    });
    let err = runner.execute_loan(funded).await.unwrap_err();
    assert!(matches!(err, FlashLoanError::Cancelled { .. }));
    assert!(err.gas_spent());
    // The loan was mined even though the wait was abandoned.
    assert_eq!(chain.token_balance(PROVIDER), U256::from(10_000u64));
    assert_eq!(chain.sent_count(), 2);
    Ok(())
}

#[tokio::test]
async fn cancel_before_funding_leaves_chain_untouched() -> Result<()> {
    init_logging();
    let chain = LocalChain::new();
    let account = chain.funded_account(DEV_KEY);
    chain.mint(account.address(), U256::from(WALLET_TOKENS));
    let receiver = Address::repeat_byte(0x77);
    chain.register_receiver(receiver, account.address(), PROVIDER);

    let (trigger, cancel) = CancelSignal::channel();
    let config = RunnerConfig { receipts: fast_receipts(), ..RunnerConfig::new(receiver, chain.token_address()) };
    let mut runner = FlashLoanRunner::new(&chain, &account, config).with_cancel(cancel);
    let validated = runner.validate().await?;
    trigger.send(true)?;

    let err = runner.fund(validated).await.unwrap_err();
    assert!(matches!(err, FlashLoanError::Aborted { .. }));
    assert_eq!(runner.state(), RunState::Failed);
    assert_eq!(chain.sent_count(), 0);
    assert_eq!(chain.nonce_of(account.address()), U256::zero());
    assert_eq!(chain.token_balance(receiver), U256::zero());
    Ok(())
}

#[tokio::test]
async fn environment_config_drives_the_runner() -> Result<()> {
    init_logging();
    let chain = LocalChain::new();
    let account = chain.funded_account(DEV_KEY);
    chain.mint(account.address(), U256::from(WALLET_TOKENS));
    let receiver = Address::repeat_byte(0x77);
    chain.register_receiver(receiver, account.address(), PROVIDER);

    let vars: HashMap<&str, String> = HashMap::from([
        ("RPC_URL", "http://127.0.0.1:8545".to_string()),
        ("PRIVATE_KEY", DEV_KEY.to_string()),
        ("TOKEN_ADDRESS", format!("{:?}", chain.token_address())),
        ("DEPLOYED_CONTRACT", format!("{:?}", receiver)),
        ("FUNDING_AMOUNT", "2.5".to_string()),
        ("LOAN_AMOUNT", "250".to_string()),
        ("RECEIPT_TIMEOUT_SECS", "1".to_string()),
        ("RECEIPT_POLL_INTERVAL_MS", "5".to_string()),
    ]);
    let config = Config::from_lookup(|name| vars.get(name).cloned())?;
    let env_account = config.account(chain.chain_id())?;
    assert_eq!(env_account.address(), account.address());

    let report = FlashLoanRunner::new(&chain, &env_account, config.runner_config()?).run().await?;
    assert_eq!(report.funding_amount, U256::from(2_500_000u64));
    assert_eq!(report.loan_amount, U256::from(250_000_000u64));
    assert_eq!(report.fee.fee_paid(), Some(U256::from(25_000u64)));
    Ok(())
}
