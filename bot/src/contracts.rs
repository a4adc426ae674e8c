// bot/src/contracts.rs
// Typed views over the token and receiver contracts, built on ChainClient::call.

use crate::bindings::{
    BalanceOfCall, BalanceOfReturn, DecimalsCall, DecimalsReturn, OwnerCall, OwnerReturn,
    SymbolCall, SymbolReturn, TestFlashLoanCall, TransferCall,
};
use crate::chain::{CallRequest, ChainClient};
use crate::error::ChainError;
use ethers::{
    abi::{AbiDecode, AbiEncode},
    types::{Address, Bytes, U256},
};
use tracing::instrument;

/// `testFlashLoan` mode in which the receiver repays principal plus fee.
pub const MODE_SUCCESS: u8 = 0;

async fn read<C, T>(client: &C, to: Address, call: impl AbiEncode) -> Result<T, ChainError>
where
    C: ChainClient + ?Sized,
    T: AbiDecode,
{
    let output = client.call(&CallRequest::new(to, call.encode())).await?;
    T::decode(&output).map_err(|e| ChainError::Decode(format!("{to:?}: {e}")))
}

/// ERC-20 token at a fixed address.
#[derive(Debug)]
pub struct Erc20<'a, C: ?Sized> {
    client: &'a C,
    address: Address,
}

impl<'a, C: ChainClient + ?Sized> Erc20<'a, C> {
    pub fn new(address: Address, client: &'a C) -> Self {
        Self { client, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    #[instrument(skip(self), fields(token = ?self.address), level = "debug")]
    pub async fn balance_of(&self, account: Address) -> Result<U256, ChainError> {
        let BalanceOfReturn(balance) = read(self.client, self.address, BalanceOfCall { account }).await?;
        Ok(balance)
    }

    pub async fn symbol(&self) -> Result<String, ChainError> {
        let SymbolReturn(symbol) = read(self.client, self.address, SymbolCall).await?;
        Ok(symbol)
    }

    pub async fn decimals(&self) -> Result<u8, ChainError> {
        let DecimalsReturn(decimals) = read(self.client, self.address, DecimalsCall).await?;
        Ok(decimals)
    }

    /// Calldata for `transfer(to, amount)`.
    pub fn transfer_calldata(&self, to: Address, amount: U256) -> Bytes {
        TransferCall { to, amount }.encode().into()
    }
}

/// Deployed flash-loan receiver.
#[derive(Debug)]
pub struct FlashLoanTester<'a, C: ?Sized> {
    client: &'a C,
    address: Address,
}

impl<'a, C: ChainClient + ?Sized> FlashLoanTester<'a, C> {
    pub fn new(address: Address, client: &'a C) -> Self {
        Self { client, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub async fn owner(&self) -> Result<Address, ChainError> {
        let OwnerReturn(owner) = read(self.client, self.address, OwnerCall).await?;
        Ok(owner)
    }

    /// Calldata for `testFlashLoan(token, amount, mode)`.
    pub fn test_flash_loan_calldata(&self, token: Address, amount: U256, mode: u8) -> Bytes {
        TestFlashLoanCall { token, amount, mode }.encode().into()
    }
}
