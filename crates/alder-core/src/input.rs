//! Dispatch inputs: the requests entering the VM host.

use crate::Address;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

/// How a contract call entered the host, which selects the post-execution
/// protocol applied by the dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallType {
    /// A regular call made directly by a transaction or another contract.
    #[default]
    Direct,
    /// A call produced by the asynchronous-call scheduler.
    AsynchronousCall,
    /// The return leg of an asynchronous call, carrying its results back.
    AsynchronousCallBack,
}

/// The portion of a request common to calls and deployments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VMInput {
    /// The account that initiated this request.
    pub caller_addr: Address,
    /// Raw call arguments, in order.
    pub arguments: Vec<Vec<u8>>,
    /// Value transferred with the call.
    pub call_value: BigUint,
    /// Gas price of the enclosing transaction.
    pub gas_price: u64,
    /// Gas available for this execution.
    pub gas_provided: u64,
    /// Gas locked by the caller for a future asynchronous callback.
    pub gas_locked: u64,
    /// The call type, selecting the post-execution protocol.
    pub call_type: CallType,
    /// Hash of the transaction that started the whole call chain.
    pub original_tx_hash: Vec<u8>,
    /// Hash of the transaction carrying this particular request.
    pub current_tx_hash: Vec<u8>,
}

/// A request to execute a function of a deployed contract.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractCallInput {
    pub vm_input: VMInput,
    /// The contract being called.
    pub recipient_addr: Address,
    /// Name of the exported function to run.
    pub function: String,
}

/// A request to deploy a new contract.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractCreateInput {
    pub vm_input: VMInput,
    /// The contract bytecode to deploy.
    pub contract_code: Vec<u8>,
    /// Opaque code metadata stored alongside the bytecode.
    pub contract_code_metadata: Vec<u8>,
}
