//! Core domain types shared by every layer of the Alder VM host.
//!
//! This crate holds the value types that cross the dispatch boundary
//! (inputs, outputs, return codes), the asynchronous-call data model that
//! is persisted to contract storage, the call-data wire codec, and the
//! hook traits through which the host reaches the blockchain and the
//! cryptographic primitives.

pub mod address;
pub mod async_call;
pub mod call_data;
pub mod hooks;
pub mod input;
pub mod output;

pub use address::Address;
pub use async_call::{
    AsyncCallStatus, AsyncContext, AsyncContextInfo, AsyncGeneratedCall, AsyncInitiator,
};
pub use call_data::{callback_payload, parse_call_data, CallDataBuilder};
pub use hooks::{BlockchainHook, CryptoHook, DefaultCryptoHook, HookError};
pub use input::{CallType, ContractCallInput, ContractCreateInput, VMInput};
pub use output::{
    LogEntry, OutputAccount, OutputTransfer, ReturnCode, StorageUpdate, VMOutput,
};

use thiserror::Error;

/// Errors produced while constructing or parsing core values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid address length: expected {expected} bytes, got {actual}")]
    InvalidAddressLength { expected: usize, actual: usize },

    #[error("invalid call data: {0}")]
    InvalidCallData(String),
}

/// Result type for core value construction and parsing.
pub type Result<T> = std::result::Result<T, CoreError>;
