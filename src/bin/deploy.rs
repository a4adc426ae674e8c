// src/bin/deploy.rs
// Step 1: deploy the flash-loan receiver contract owned by PRIVATE_KEY's account.

use eyre::{Result, WrapErr};
use flashloan_tester::{
    load_config,
    utils::{explorer_address_url, explorer_tx_url, format_native, init_tracing},
    CancelSignal, ChainClient, ContractArtifact, ContractDeployer, EthersChainClient,
};
use tokio::sync::watch;

/// Fires the cancel signal on Ctrl-C so a pending receipt wait stops early.
fn cancel_on_ctrl_c() -> CancelSignal {
    let (trigger, cancel) = CancelSignal::channel();
    tokio::spawn(forward_ctrl_c(trigger));
    cancel
}

async fn forward_ctrl_c(trigger: watch::Sender<bool>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        let _ = trigger.send(true);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    println!("\n🚀 Deploy FlashLoanTester\n");
    println!("{}", "=".repeat(60));

    let config = load_config()?;
    let provider_address = config.require_provider()?;
    let artifact = ContractArtifact::load(&config.contract_artifact)
        .wrap_err("Compile the contract first (e.g. `npx hardhat compile`) or set CONTRACT_ARTIFACT")?;

    let client = EthersChainClient::connect(&config.rpc_url).await?;
    let account = config.account(client.chain_id())?;
    let balance = client.get_balance(account.address()).await?;

    println!("\n📍 Network: {} (chain id {})", config.network_name, client.chain_id());
    println!("👤 Deployer: {:?}", account.address());
    println!("💰 Balance: {} native", format_native(balance));
    println!("🏦 Flash Loan Provider: {:?}", provider_address);
    println!("📦 Bytecode: {} bytes", artifact.bytecode.len());

    println!("\n⏳ Deploying contract...");
    let deployer = ContractDeployer::new(&client, config.gas, config.receipts).with_cancel(cancel_on_ctrl_c());
    let deployed = match deployer.deploy_receiver(&artifact, provider_address, &account).await {
        Ok(deployed) => deployed,
        Err(e) => {
            println!("\n❌ Deployment failed: {e}");
            if e.gas_spent() {
                println!("   Gas may have been spent; check the transaction before retrying.");
            }
            return Err(e.into());
        }
    };

    println!("\n{}", "=".repeat(60));
    println!("✅ Contract deployed!");
    println!("{}", "=".repeat(60));
    println!("📄 Address: {:?}", deployed.address);
    println!("🔗 Tx Hash: {:?}", deployed.tx_hash);
    if let Some(block) = deployed.block_number {
        println!("📦 Block: {block}");
    }
    if let Some(gas_used) = deployed.gas_used {
        println!("⛽ Gas Used: {gas_used}");
    }
    if let Some(explorer) = &config.explorer_url {
        println!("🔍 Explorer: {}", explorer_address_url(explorer, deployed.address));
        println!("🔍 Transaction: {}", explorer_tx_url(explorer, deployed.tx_hash));
    }

    println!("\n📝 Next step: set DEPLOYED_CONTRACT in .env and run");
    println!("   DEPLOYED_CONTRACT={:?}", deployed.address);
    println!("   cargo run --bin execute\n");
    Ok(())
}
