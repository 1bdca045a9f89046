//! The execution core of the Alder smart-contract VM.
//!
//! This crate orchestrates contract creation, upgrade and call requests
//! into an abstract bytecode engine while keeping execution state
//! transactional and gas fully accounted. The moving parts:
//!
//! - six execution contexts ([`contexts`]) with snapshot stacks that
//!   advance and retract in lock-step at sub-call boundaries;
//! - the host dispatcher ([`host`]) with the public entry points, the
//!   synchronous sub-call protocol and the two-phase asynchronous-call
//!   scheduler;
//! - a process-wide registry ([`registry`]) that lets engine trampolines
//!   identify the host behind a numeric context id.

pub mod contexts;
pub mod host;
pub mod registry;

pub use host::{HostParameters, VmHost};

use alder_core::ReturnCode;
use alder_vm::InstanceError;
use thiserror::Error;

/// Name of the constructor function, callable only while deploying.
pub const INIT_FUNCTION_NAME: &str = "init";
/// Ethereum-style alias of the constructor function.
pub const INIT_FUNCTION_NAME_ETH: &str = "_init";
/// Name of the asynchronous callback entry point, callable only when a
/// callback dispatch arrives, and the default context-level callback.
pub const CALLBACK_FUNCTION_NAME: &str = "callBack";
/// Prefix of the storage key under which pending asynchronous calls are
/// persisted between cross-shard legs.
pub const ASYNC_DATA_PREFIX: &[u8] = b"asyncCalls";
/// Storage keys starting with this prefix are reserved for the host.
pub const PROTECTED_KEY_PREFIX: &[u8] = b"ALDER";
/// Argument width of the Ethereum-compatible call-data encoding.
pub const ETH_ARGUMENT_LEN: usize = 32;

/// Every failure the dispatcher distinguishes.
///
/// Errors never cross the dispatch boundary: each one is converted into a
/// `VMOutput` carrying the matching [`ReturnCode`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("not enough gas")]
    NotEnoughGas,

    #[error("contract not found")]
    ContractNotFound,

    #[error("invalid contract code")]
    ContractInvalid,

    #[error("invalid arguments to upgrade")]
    InvalidUpgradeArguments,

    #[error("function not found")]
    FuncNotFound,

    #[error("it is not allowed to call init in run")]
    InitFuncCalledInRun,

    #[error("it is not allowed to call callBack in run")]
    CallBackFuncCalledInRun,

    #[error("callback function not expected")]
    CallBackFuncNotExpected,

    #[error("return code is not ok")]
    ReturnCodeNotOk,

    #[error("operation not permitted in read only mode")]
    InvalidCallOnReadOnlyMode,

    #[error("mismatch between input gas and output gas")]
    InputAndOutputGasDoesNotMatch,

    #[error("{0}")]
    SignalError(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("max number of engine instances reached")]
    MaxInstancesReached,

    #[error("async call gas percentages exceed 100")]
    GasPercentageExceeded,

    #[error("storage key is reserved: {0}")]
    StorageReservedKey(String),

    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    #[error("blockchain hook error: {0}")]
    BlockchainHook(String),
}

impl HostError {
    /// The return code an error surfaces as in the dispatch output.
    pub fn return_code(&self) -> ReturnCode {
        match self {
            HostError::NotEnoughGas => ReturnCode::OutOfGas,
            HostError::ContractNotFound => ReturnCode::ContractNotFound,
            HostError::ContractInvalid => ReturnCode::ContractInvalid,
            HostError::FuncNotFound => ReturnCode::FunctionNotFound,
            HostError::MaxInstancesReached => ReturnCode::CallStackOverFlow,
            HostError::InvalidUpgradeArguments
            | HostError::InitFuncCalledInRun
            | HostError::CallBackFuncCalledInRun
            | HostError::CallBackFuncNotExpected
            | HostError::ReturnCodeNotOk
            | HostError::InvalidCallOnReadOnlyMode
            | HostError::SignalError(_)
            | HostError::GasPercentageExceeded
            | HostError::StorageReservedKey(_) => ReturnCode::UserError,
            HostError::InputAndOutputGasDoesNotMatch
            | HostError::ExecutionFailed(_)
            | HostError::SerializationFailed(_)
            | HostError::BlockchainHook(_) => ReturnCode::ExecutionFailed,
        }
    }
}

impl From<InstanceError> for HostError {
    fn from(err: InstanceError) -> Self {
        match err {
            InstanceError::InvalidBytecode | InstanceError::VerificationFailed(_) => {
                HostError::ContractInvalid
            }
            InstanceError::FunctionNotFound(_) => HostError::FuncNotFound,
            InstanceError::Trap(reason) => HostError::ExecutionFailed(reason),
            InstanceError::Breakpoint => {
                HostError::ExecutionFailed("breakpoint with no condition".to_string())
            }
        }
    }
}

impl From<alder_core::HookError> for HostError {
    fn from(err: alder_core::HookError) -> Self {
        HostError::BlockchainHook(err.to_string())
    }
}

/// Result type used throughout the host.
pub type Result<T> = std::result::Result<T, HostError>;
