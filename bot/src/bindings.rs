// bot/src/bindings.rs
#![allow(clippy::all)]
use ethers::prelude::abigen;

// Minimal ERC-20 surface used to fund the receiver and read balances.
abigen!(
    IERC20,
    r#"[
        event Transfer(address indexed from, address indexed to, uint256 value)
        function balanceOf(address account) external view returns (uint256)
        function transfer(address to, uint256 amount) external returns (bool)
        function symbol() external view returns (string)
        function decimals() external view returns (uint8)
    ]"#,
    event_derives(serde::Deserialize, serde::Serialize)
);

// Owner-gated flash-loan receiver deployed in step 1; constructor(address flashLoanProvider).
abigen!(
    IFlashLoanTester,
    r#"[
        function owner() external view returns (address)
        function testFlashLoan(address token, uint256 amount, uint8 mode) external
    ]"#
);

// END OF FILE: bot/src/bindings.rs
