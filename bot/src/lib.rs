// bot/src/lib.rs
// Library interface shared by the deploy and execute binaries and the integration tests.

pub mod account;
pub mod bindings;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod deploy;
pub mod encoding;
pub mod error;
pub mod gas;
pub mod runner;
pub mod transaction;
pub mod utils;

#[cfg(any(test, feature = "local_simulation"))]
pub mod local_simulator;

// Public types re-exported for convenience
pub use account::{Account, PendingTransaction, SignedTransaction};
pub use chain::{CallRequest, ChainClient, EthersChainClient, TxReceipt, TxStatus};
pub use config::{load_config, Config};
pub use deploy::{ContractArtifact, ContractDeployer, DeployedContract};
pub use error::{ChainError, FlashLoanError};
pub use gas::GasSettings;
pub use runner::{
    expected_fee, Amount, FeeMismatchWarning, FeeVerification, FlashLoanReport, FlashLoanRunner,
    RunState, RunnerConfig,
};
pub use transaction::{CancelSignal, ReceiptPolicy, TxSubmitter};
pub use utils::TokenAmount;
