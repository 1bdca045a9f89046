//! The host-import surface seen by running contracts.

use crate::executor::InstanceError;
use alder_core::{Address, ContractCallInput, ContractCreateInput};

/// The functions a bytecode engine may import from the host.
///
/// The dispatcher implements this trait; the engine receives it for the
/// duration of each instance call. Failing operations record a breakpoint
/// on the runtime and return [`InstanceError::Breakpoint`], which the
/// engine must propagate so the dispatcher can classify the outcome.
pub trait VmHooks {
    /// Consumes gas; fails (and raises an out-of-gas breakpoint) when the
    /// remaining gas is insufficient.
    fn use_gas(&mut self, gas: u64) -> Result<(), InstanceError>;

    /// Gas still available to the current execution.
    fn gas_left(&self) -> u64;

    /// Appends a piece of return data.
    fn finish(&mut self, data: &[u8]) -> Result<(), InstanceError>;

    /// Signals a user error and stops execution. Always returns the
    /// breakpoint error, so guests can `return Err(hooks.signal_error(…))`.
    fn signal_error(&mut self, message: &str) -> InstanceError;

    /// Writes contract storage. Returns the storage status code.
    fn storage_store(&mut self, key: &[u8], value: &[u8]) -> Result<i32, InstanceError>;

    /// Reads contract storage; missing keys read as empty.
    fn storage_load(&mut self, key: &[u8]) -> Result<Vec<u8>, InstanceError>;

    /// The call arguments of the current execution.
    fn arguments(&self) -> Vec<Vec<u8>>;

    /// The caller of the current execution.
    fn caller(&self) -> Address;

    /// The address of the contract being executed.
    fn sc_address(&self) -> Address;

    /// Big-endian bytes of the value sent with the current call.
    fn call_value_bytes(&self) -> Vec<u8>;

    /// Emits a log entry.
    fn write_log(&mut self, topics: &[Vec<u8>], data: &[u8]) -> Result<(), InstanceError>;

    /// Transfers value from the current contract to `destination`.
    fn transfer_value(
        &mut self,
        destination: &Address,
        value_bytes: &[u8],
    ) -> Result<(), InstanceError>;

    /// Executes a contract in an isolated child context. Returns 0 when the
    /// child succeeded, 1 otherwise; the child's effects are merged into
    /// the current context only on success.
    fn execute_on_dest_context(&mut self, input: ContractCallInput) -> Result<i32, InstanceError>;

    /// Executes a contract in the current context (shared storage).
    /// Returns 0 on success, 1 otherwise.
    fn execute_on_same_context(&mut self, input: ContractCallInput) -> Result<i32, InstanceError>;

    /// Deploys a new contract from inside the current one and returns its
    /// address.
    fn create_contract(&mut self, input: ContractCreateInput) -> Result<Address, InstanceError>;

    /// Registers an asynchronous call under a context identifier, to be
    /// scheduled after the current execution finishes.
    #[allow(clippy::too_many_arguments)]
    fn create_async_call(
        &mut self,
        context_identifier: &str,
        destination: &Address,
        data: &[u8],
        value_bytes: &[u8],
        success_callback: &str,
        error_callback: &str,
        gas_percentage: u64,
    ) -> Result<(), InstanceError>;

    /// Ethereum-shaped call data: four selector bytes (Keccak-256 of the
    /// function name) followed by the arguments, each left-padded to 32
    /// bytes. Computed once per dispatch and cached.
    fn ethereum_call_data(&mut self) -> Vec<u8>;

    /// Allocates a scoped big integer, returning its handle.
    fn big_int_new(&mut self, initial: i64) -> i32;

    /// Reads a scoped big integer as an `i64`.
    fn big_int_get_int64(&self, handle: i32) -> Result<i64, InstanceError>;

    /// Overwrites a scoped big integer.
    fn big_int_set_int64(&mut self, handle: i32, value: i64) -> Result<(), InstanceError>;
}
