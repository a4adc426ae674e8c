// src/encoding.rs
// Module for encoding deployment payloads and decoding revert data.

use crate::error::FlashLoanError;
use ethers::{
    abi::{self, Abi, AbiDecode, ParamType, Token},
    types::{Bytes, U256},
};

/// Selector of `Error(string)`, the standard Solidity revert payload.
pub const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
/// Selector of `Panic(uint256)`, raised by failed asserts and checked arithmetic.
pub const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

/// Builds the `data` field of a contract-creation transaction.
///
/// When the artifact ABI declares a constructor the arguments are encoded (and
/// type-checked) through it. Without an ABI the arguments are ABI-encoded and
/// appended to the bytecode as-is.
///
/// # Arguments
/// * `bytecode`: Creation bytecode of the contract.
/// * `abi`: Optional contract ABI from the build artifact.
/// * `constructor_args`: Constructor arguments, in declaration order.
///
/// # Returns
/// * `Result<Bytes, FlashLoanError>`: `bytecode || encode(args)` or a config error
///   if the arguments do not match the constructor.
pub fn creation_data(
    bytecode: &Bytes,
    abi: Option<&Abi>,
    constructor_args: &[Token],
) -> Result<Bytes, FlashLoanError> {
    if bytecode.is_empty() {
        return Err(FlashLoanError::Config("contract bytecode is empty".into()));
    }
    match abi.and_then(|abi| abi.constructor()) {
        Some(constructor) => constructor
            .encode_input(bytecode.to_vec(), constructor_args)
            .map(Bytes::from)
            .map_err(|e| {
                FlashLoanError::Config(format!("constructor arguments do not match ABI: {e}"))
            }),
        None => {
            if abi.is_some() && !constructor_args.is_empty() {
                return Err(FlashLoanError::Config(
                    "ABI declares no constructor but constructor arguments were supplied".into(),
                ));
            }
            let mut data = bytecode.to_vec();
            data.extend(abi::encode(constructor_args));
            Ok(Bytes::from(data))
        }
    }
}

/// Decodes a human-readable reason out of raw revert data.
///
/// Handles `Error(string)` and `Panic(uint256)`; any other non-empty payload is
/// reported by its 4-byte selector so custom errors are still visible.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    if data.len() < 4 {
        return None;
    }
    let (selector, payload) = data.split_at(4);
    if selector == ERROR_STRING_SELECTOR {
        return match abi::decode(&[ParamType::String], payload) {
            Ok(mut tokens) => tokens.pop().and_then(Token::into_string),
            Err(_) => None,
        };
    }
    if selector == PANIC_SELECTOR {
        return U256::decode(payload)
            .ok()
            .map(|code| format!("panic code {:#x}", code));
    }
    Some(format!("custom error 0x{}", hex::encode(selector)))
}

/// Encodes `reason` as an `Error(string)` revert payload.
pub fn encode_revert_reason(reason: &str) -> Bytes {
    let mut data = ERROR_STRING_SELECTOR.to_vec();
    data.extend(abi::encode(&[Token::String(reason.to_owned())]));
    Bytes::from(data)
}

// END OF FILE: bot/src/encoding.rs
