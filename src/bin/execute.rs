// src/bin/execute.rs
// Step 2: fund the deployed receiver, run a flash loan and verify the fee.

use eyre::Result;
use flashloan_tester::{
    load_config,
    utils::{explorer_tx_url, init_tracing},
    CancelSignal, ChainClient, EthersChainClient, FlashLoanError, FlashLoanRunner,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    println!("\n⚡ Execute Flash Loan\n");
    println!("{}", "=".repeat(60));

    let config = load_config()?;
    let runner_config = config.runner_config()?;
    let client = EthersChainClient::connect(&config.rpc_url).await?;
    let account = config.account(client.chain_id())?;

    println!("\n📍 Network: {} (chain id {})", config.network_name, client.chain_id());
    println!("👤 Wallet: {:?}", account.address());
    match runner_config.contract {
        Some(contract) => println!("📄 Contract: {:?}", contract),
        None => println!("📄 Contract: <not set>"),
    }
    println!("💸 Funding: {} tokens, Loan: {} tokens", config.funding_amount, config.loan_amount);

    let (trigger, cancel) = CancelSignal::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = trigger.send(true);
        }
    });

    let mut runner = FlashLoanRunner::new(&client, &account, runner_config).with_cancel(cancel);
    let report = match runner.run().await {
        Ok(report) => report,
        Err(e) => {
            println!("\n❌ Flash loan run failed in state {}: {e}", runner.state());
            if let Some(tx_hash) = e.tx_hash() {
                println!("🔗 Tx Hash: {:?}", tx_hash);
                if let Some(explorer) = &config.explorer_url {
                    println!("🔍 Explorer: {}", explorer_tx_url(explorer, tx_hash));
                }
            }
            print_hints(&e);
            return Err(e.into());
        }
    };

    println!("\n{}", "=".repeat(60));
    println!("✅ Flash loan verified");
    println!("{}", "=".repeat(60));
    println!("{report}");
    if let Some(explorer) = &config.explorer_url {
        println!("🔍 Explorer: {}", explorer_tx_url(explorer, report.loan_tx_hash()));
    }
    if let Some(warning) = report.fee.warning() {
        println!("\n⚠️  Fee mismatch: {warning}");
        println!("   The provider's fee formula may differ from 1/FEE_DENOMINATOR.");
    }
    println!();
    Ok(())
}

fn print_hints(err: &FlashLoanError) {
    match err {
        FlashLoanError::Config(_) => {
            println!("\n💡 Check .env; run `cargo run --bin deploy` first if DEPLOYED_CONTRACT is unset.");
        }
        FlashLoanError::InsufficientBalance { asset, .. } => {
            println!("\n💡 The wallet needs {asset}; use the network faucet and retry.");
        }
        FlashLoanError::NotOwner { .. } => {
            println!("\n💡 Only the deploying account can trigger flash loans on this contract.");
        }
        FlashLoanError::FlashLoanExecution { .. } => {
            println!("\n💡 Common causes:");
            println!("   • Insufficient balance: the contract needs tokens to pay the fee");
            println!("   • Provider liquidity below the requested loan amount");
            println!("   • Wrong token or provider address");
        }
        FlashLoanError::Timeout { .. } | FlashLoanError::Cancelled { .. } => {
            println!("\n💡 The transaction may still be mined; check the explorer before re-running.");
        }
        FlashLoanError::Aborted { .. } => {
            println!("\n💡 Stopped before sending; the next run starts from the current balances.");
        }
        _ => {}
    }
}
