//! The asynchronous-call data model.
//!
//! Contracts may register calls to other contracts that are resolved after
//! their own execution finishes: inline when the destination lives on the
//! same shard, or through a follow-up transaction otherwise. The pending
//! subset of this model is serialized to contract storage between the
//! outbound and return legs of a cross-shard call, so every collection here
//! is deterministically ordered: contexts sort lexicographically by
//! identifier, calls keep their registration order.

use crate::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Resolution state of a registered asynchronous call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AsyncCallStatus {
    /// Not yet executed, or awaiting a cross-shard callback.
    #[default]
    Pending,
    /// Executed and its success callback ran.
    Resolved,
    /// Executed with an error and its error callback ran.
    Rejected,
}

/// One asynchronous call registered by a contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncGeneratedCall {
    pub status: AsyncCallStatus,
    /// The contract to call.
    pub destination: Address,
    /// Encoded call data (`function@arg@arg…`).
    pub data: Vec<u8>,
    /// Big-endian value to transfer with the call.
    pub value_bytes: Vec<u8>,
    /// Share of the remaining gas requested for this call, relative to the
    /// other calls registered in the same dispatch.
    pub gas_percentage: u64,
    /// Gas assigned by the scheduler once percentages are resolved.
    pub gas_limit: u64,
    /// Callback to run when the call succeeds.
    pub success_callback: String,
    /// Callback to run when the call fails.
    pub error_callback: String,
}

/// A group of asynchronous calls sharing one context-level callback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncContext {
    /// Callback invoked when every call of the context has resolved.
    pub callback: String,
    /// The calls of this context, in registration order.
    pub async_calls: Vec<AsyncGeneratedCall>,
}

/// The account that triggered the dispatch which registered the calls,
/// kept so the final callback can reach it after a cross-shard round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncInitiator {
    pub caller_addr: Address,
    pub return_data: Vec<Vec<u8>>,
}

/// All asynchronous calls registered during one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsyncContextInfo {
    pub async_initiator: AsyncInitiator,
    /// Contexts keyed by their guest-assigned identifier.
    pub async_context_map: BTreeMap<String, AsyncContext>,
}

impl AsyncContextInfo {
    /// Creates an empty info for a dispatch initiated by `caller`.
    pub fn new(caller: Address) -> Self {
        Self {
            async_initiator: AsyncInitiator {
                caller_addr: caller,
                return_data: Vec::new(),
            },
            async_context_map: BTreeMap::new(),
        }
    }

    /// Whether no contexts are registered.
    pub fn is_empty(&self) -> bool {
        self.async_context_map.is_empty()
    }

    /// Total number of registered calls across all contexts.
    pub fn call_count(&self) -> usize {
        self.async_context_map
            .values()
            .map(|context| context.async_calls.len())
            .sum()
    }
}
