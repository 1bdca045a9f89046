//! Dispatch outputs: the structured result of running a contract.

use crate::{Address, CallType};
use num_bigint::{BigInt, BigUint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Outcome category of a dispatch, as seen by the protocol layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnCode {
    #[default]
    Ok,
    FunctionNotFound,
    FunctionWrongSignature,
    ContractNotFound,
    UserError,
    OutOfGas,
    AccountCollision,
    OutOfFunds,
    CallStackOverFlow,
    ContractInvalid,
    ExecutionFailed,
    UpgradeFailed,
}

impl ReturnCode {
    /// Minimal big-endian byte encoding of the numeric code, used when the
    /// code travels inside call-data arguments. `Ok` encodes as empty.
    pub fn to_bytes(self) -> Vec<u8> {
        let value = self as u64;
        if value == 0 {
            return Vec::new();
        }
        let bytes = value.to_be_bytes();
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
        bytes[first..].to_vec()
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            ReturnCode::Ok => "ok",
            ReturnCode::FunctionNotFound => "function not found",
            ReturnCode::FunctionWrongSignature => "wrong signature for function",
            ReturnCode::ContractNotFound => "contract not found",
            ReturnCode::UserError => "user error",
            ReturnCode::OutOfGas => "out of gas",
            ReturnCode::AccountCollision => "account collision",
            ReturnCode::OutOfFunds => "out of funds",
            ReturnCode::CallStackOverFlow => "call stack overflow",
            ReturnCode::ContractInvalid => "contract invalid",
            ReturnCode::ExecutionFailed => "execution failed",
            ReturnCode::UpgradeFailed => "upgrade failed",
        };
        write!(f, "{message}")
    }
}

/// A single staged write to contract storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageUpdate {
    /// The storage key.
    pub offset: Vec<u8>,
    /// The new value; empty means the entry is deleted.
    pub data: Vec<u8>,
}

/// A value (and optionally data and gas) leaving an account.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputTransfer {
    /// Value transferred.
    pub value: BigUint,
    /// Gas accompanying the transfer, to be used at the destination.
    pub gas_limit: u64,
    /// Gas locked for the eventual callback leg of an asynchronous call.
    pub gas_locked: u64,
    /// Payload delivered with the transfer.
    pub data: Vec<u8>,
    /// The call type the destination should dispatch this transfer as.
    pub call_type: CallType,
    /// The account the transfer originates from.
    pub sender_address: Address,
}

/// A log entry emitted by a contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogEntry {
    /// The event identifier, by convention the first topic-like field.
    pub identifier: Vec<u8>,
    /// The contract that emitted the entry.
    pub address: Address,
    /// Indexed topics.
    pub topics: Vec<Vec<u8>>,
    /// Unindexed payload.
    pub data: Vec<u8>,
}

/// Accumulated changes to a single account produced by a dispatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputAccount {
    /// The account address.
    pub address: Address,
    /// New nonce, if the dispatch changed it.
    pub nonce: Option<u64>,
    /// Absolute balance, if known.
    pub balance: Option<BigUint>,
    /// Net balance change produced by this dispatch.
    pub balance_delta: BigInt,
    /// Staged storage writes, keyed by storage key.
    pub storage_updates: BTreeMap<Vec<u8>, StorageUpdate>,
    /// Newly deployed code, if any.
    pub code: Option<Vec<u8>>,
    /// Metadata of the newly deployed code.
    pub code_metadata: Option<Vec<u8>>,
    /// Gas attributed to this account's execution.
    pub gas_used: u64,
    /// Transfers leaving this account.
    pub output_transfers: Vec<OutputTransfer>,
}

impl OutputAccount {
    /// Creates an empty account delta for the given address.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    /// Total gas carried away by this account's outgoing transfers.
    pub fn transferred_gas(&self) -> u64 {
        self.output_transfers.iter().fold(0u64, |acc, transfer| {
            acc.saturating_add(transfer.gas_limit)
                .saturating_add(transfer.gas_locked)
        })
    }
}

/// The aggregate result of a dispatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VMOutput {
    /// Data returned by the contract, in order of emission.
    pub return_data: Vec<Vec<u8>>,
    /// Outcome category.
    pub return_code: ReturnCode,
    /// Human-readable message accompanying a non-`Ok` outcome.
    pub return_message: String,
    /// Gas left unconsumed, returned to the caller.
    pub gas_remaining: u64,
    /// Gas refunded on top of the remaining gas.
    pub gas_refund: BigUint,
    /// Per-account deltas, keyed by address.
    pub output_accounts: BTreeMap<Address, OutputAccount>,
    /// Accounts deleted by the dispatch.
    pub deleted_accounts: Vec<Address>,
    /// Accounts read but not modified.
    pub touched_accounts: Vec<Address>,
    /// Log entries, in order of emission.
    pub logs: Vec<LogEntry>,
}

impl VMOutput {
    /// Total gas accounted to the output: per-account usage plus the gas
    /// carried away by transfers.
    pub fn accounted_gas(&self) -> u64 {
        self.output_accounts.values().fold(0u64, |acc, account| {
            acc.saturating_add(account.gas_used)
                .saturating_add(account.transferred_gas())
        })
    }
}
