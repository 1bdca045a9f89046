//! The six execution contexts and their capability traits.
//!
//! Each context is a state machine with a snapshot stack. The dispatcher
//! owns one boxed instance of each and is the only coordinator between
//! them: a context never holds a reference to the host or to a sibling —
//! where an operation needs a peer (metering reads the runtime's gas
//! points, storage stages writes into the output accumulator), the peer is
//! passed in as a trait object for just that call. Tests substitute any
//! context through its trait.

pub mod bigint;
pub mod blockchain;
pub mod metering;
pub mod output;
pub mod runtime;
pub mod storage;

pub use bigint::BigIntContext;
pub use blockchain::BlockchainContext;
pub use metering::MeteringContext;
pub use output::OutputContext;
pub use runtime::RuntimeContext;
pub use storage::{StorageContext, StorageStatus};

use crate::registry::HostContextId;
use crate::Result;
use alder_config::GasSchedule;
use alder_core::{
    Address, AsyncContextInfo, AsyncGeneratedCall, CallType, ContractCallInput, OutputAccount,
    ReturnCode, VMInput, VMOutput,
};
use alder_vm::{BreakpointValue, Instance};
use num_bigint::BigInt;
use num_bigint::BigUint;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Snapshot-stack discipline shared by every context.
///
/// `push_state` snapshots the active state; the three pop operations
/// differ in how the snapshot and the active state are composed:
/// restore the snapshot (`pop_set_active_state`), drop the snapshot and
/// keep the active state (`pop_discard`), or — where a context supports
/// it — keep the active state while absorbing the snapshot underneath
/// (`pop_merge_active_state` on [`Output`] and [`Metering`]).
pub trait StateStack {
    /// Resets the active state for a fresh dispatch.
    fn init_state(&mut self);
    /// Snapshots the active state onto the stack.
    fn push_state(&mut self);
    /// Pops the newest snapshot and makes it the active state.
    fn pop_set_active_state(&mut self);
    /// Pops the newest snapshot and drops it, keeping the active state.
    fn pop_discard(&mut self);
    /// Empties the snapshot stack.
    fn clear_state_stack(&mut self);
    /// Current snapshot-stack depth.
    fn state_stack_len(&self) -> usize;
}

/// The scoped big-integer handle table.
pub trait BigIntPool: StateStack {
    /// Stores a value and returns its handle.
    fn put(&mut self, value: BigInt) -> i32;
    /// Reads the value behind a handle.
    fn get(&self, handle: i32) -> Result<BigInt>;
    /// Overwrites the value behind a handle.
    fn set(&mut self, handle: i32, value: BigInt) -> Result<()>;
}

/// Access to chain state, with per-dispatch caching and snapshot-based
/// rollback of hook-side mutations.
pub trait Blockchain: StateStack {
    /// Derives the address of a contract deployed by `creator`.
    fn new_address(&mut self, creator: &Address) -> Result<Address>;
    /// Fetches (and caches) the code of the contract at `address`.
    fn get_code(&mut self, address: &Address) -> Result<Vec<u8>>;
    /// Reads committed storage of `address` under `key`.
    fn get_storage_data(&self, address: &Address, key: &[u8]) -> Result<Vec<u8>>;
    /// Increments the nonce of `address`.
    fn increase_nonce(&mut self, address: &Address);
    /// Runs a protocol built-in function.
    fn process_built_in_function(&self, input: &ContractCallInput) -> Result<VMOutput>;
}

/// Gas accounting across the dispatch.
pub trait Metering: StateStack {
    /// Pops the newest snapshot, restores its frame scalars and merges the
    /// per-account gas attribution of the active frame into it.
    fn pop_merge_active_state(&mut self);

    /// The gas schedule in force.
    fn gas_schedule(&self) -> &GasSchedule;
    /// Gas ceiling of one block.
    fn block_gas_limit(&self) -> u64;

    /// Starts a metering frame from the runtime's current input. For
    /// callback dispatches this also folds the locked callback gas back
    /// into the provided gas.
    fn init_state_from_input(&mut self, runtime: &mut dyn Runtime);

    /// Consumes gas on the active engine instance.
    fn use_gas(&self, runtime: &mut dyn Runtime, gas: u64);
    /// Consumes gas, failing when not enough is left.
    fn use_gas_bounded(&self, runtime: &mut dyn Runtime, gas: u64) -> Result<()>;
    /// Returns previously consumed gas to the active engine instance.
    fn restore_gas(&self, runtime: &mut dyn Runtime, gas: u64);
    /// Adds gas to the dispatch refund.
    fn free_gas(&self, output: &mut dyn Output, gas: u64);
    /// Gas still available to the current frame.
    fn gas_left(&self, runtime: &dyn Runtime) -> u64;
    /// Everything the current contract has consumed: the initial cost plus
    /// the points burned on its instance.
    fn gas_spent_by_contract(&self, runtime: &dyn Runtime) -> u64;
    /// Gas provided to the current frame.
    fn get_gas_provided(&self) -> u64;
    /// The initial deduction taken from the current frame.
    fn get_sc_prepare_initial_cost(&self) -> u64;
    /// Gas left for execution after the initial deduction.
    fn get_gas_for_execution(&self) -> u64;

    /// Deducts the initial cost of executing deployed code.
    fn deduct_initial_gas_for_execution(
        &mut self,
        runtime: &dyn Runtime,
        code: &[u8],
    ) -> Result<()>;
    /// Deducts the initial cost of a transaction-initiated deployment.
    fn deduct_initial_gas_for_direct_deployment(
        &mut self,
        runtime: &dyn Runtime,
        code: &[u8],
    ) -> Result<()>;
    /// Deducts the initial cost of a contract-initiated deployment.
    fn deduct_initial_gas_for_indirect_deployment(
        &mut self,
        runtime: &dyn Runtime,
        code: &[u8],
    ) -> Result<()>;

    /// For `AsynchronousCall` inputs, releases the locked callback gas
    /// into the executable budget once the async step has completed.
    fn unlock_gas_if_async_step(&mut self, runtime: &dyn Runtime);
    /// Minimum gas to lock so the callback of an asynchronous call can
    /// always run: recompilation plus the callback execution minimum.
    fn compute_gas_locked_for_async(&self, runtime: &dyn Runtime) -> u64;
    /// Charges one asynchronous protocol step.
    fn use_gas_for_async_step(&self, runtime: &mut dyn Runtime) -> Result<()>;

    /// Attributes the gas spent by the current frame to its account,
    /// net of gas forwarded through transfers and of gas already
    /// attributed to other accounts.
    fn update_sc_gas_used(
        &mut self,
        runtime: &dyn Runtime,
        accounts: &BTreeMap<Address, OutputAccount>,
    );
    /// Final accounting of a successful dispatch: stamps per-account gas
    /// into the output and verifies that provided gas equals accounted
    /// gas plus the remainder.
    fn update_gas_state_on_success(
        &mut self,
        runtime: &dyn Runtime,
        vm_output: &mut VMOutput,
    ) -> Result<()>;
    /// Final accounting of a failed dispatch: the current account is
    /// charged everything that was provided.
    fn update_gas_state_on_failure(&self, runtime: &dyn Runtime, output: &mut dyn Output);
}

/// The dispatch output accumulator.
pub trait Output: StateStack {
    /// Pops the newest snapshot and absorbs it underneath the active
    /// state: the active accounts, logs and return data win, the
    /// snapshot's entries persist where the active state has none.
    fn pop_merge_active_state(&mut self);

    /// Blanks the accumulator (used when entering an isolated sub-call).
    fn censor_vm_output(&mut self);

    /// Returns the delta entry for `address`, creating it when absent.
    fn get_output_account(&mut self, address: &Address) -> &mut OutputAccount;
    /// All account deltas accumulated so far.
    fn output_accounts(&self) -> &BTreeMap<Address, OutputAccount>;

    /// Credits the incoming call value to an account.
    fn add_tx_value_to_account(&mut self, address: &Address, value: &BigUint);
    /// Records a transfer between two accounts, with optional gas and
    /// payload.
    #[allow(clippy::too_many_arguments)]
    fn transfer(
        &mut self,
        destination: &Address,
        sender: &Address,
        gas_limit: u64,
        gas_locked: u64,
        value: &BigUint,
        data: &[u8],
        call_type: CallType,
    );
    /// Records newly deployed code on an account.
    fn deploy_code(&mut self, address: &Address, code: &[u8], code_metadata: &[u8]);

    /// Appends return data.
    fn finish(&mut self, data: &[u8]);
    /// Return data accumulated so far.
    fn return_data(&self) -> &[Vec<u8>];
    /// Emits a log entry for `address`.
    fn write_log(&mut self, address: &Address, topics: &[Vec<u8>], data: &[u8]);

    fn set_return_code(&mut self, code: ReturnCode);
    fn return_code(&self) -> ReturnCode;
    fn set_return_message(&mut self, message: &str);
    fn return_message(&self) -> &str;
    /// Adds to the gas refund.
    fn add_refund(&mut self, gas: u64);

    /// Assembles the dispatch output from the accumulated state.
    fn get_vm_output(&self, gas_remaining: u64) -> VMOutput;
    /// Wraps a failure into a dispatch output with zero gas remaining.
    fn create_vm_output_in_case_of_error(&self, error: &crate::HostError) -> VMOutput;
    /// Absorbs an externally produced output (a built-in function's) into
    /// the active state.
    fn add_to_active_state(&mut self, vm_output: VMOutput);
}

/// The per-dispatch runtime: input, addresses, the engine instance stack
/// and the async bookkeeping.
pub trait Runtime: StateStack {
    /// Rebinds the runtime to a contract-call input.
    fn init_state_from_call_input(&mut self, input: &ContractCallInput);
    /// Rebinds only the VM input (deployments have no recipient yet).
    fn set_vm_input(&mut self, input: &VMInput);
    fn vm_input(&self) -> &VMInput;
    fn vm_input_mut(&mut self) -> &mut VMInput;

    fn sc_address(&self) -> &Address;
    fn set_sc_address(&mut self, address: &Address);
    /// The function the dispatch was asked to run.
    fn function(&self) -> &str;
    /// Overrides the entry point (used for stored async callbacks).
    fn set_custom_call_function(&mut self, function: &str);
    fn arguments(&self) -> &[Vec<u8>];
    fn read_only(&self) -> bool;
    fn set_read_only(&mut self, read_only: bool);
    /// Extracts `(code, code_metadata)` from the first two upgrade
    /// arguments.
    fn get_code_upgrade_from_args(&self) -> Result<(Vec<u8>, Vec<u8>)>;
    fn original_tx_hash(&self) -> &[u8];

    fn async_context_info(&self) -> &AsyncContextInfo;
    fn set_async_context_info(&mut self, info: AsyncContextInfo);
    /// Registers an asynchronous call, validating that the gas percentages
    /// of its context stay within 100.
    fn add_async_call(&mut self, context_identifier: &str, call: AsyncGeneratedCall)
        -> Result<()>;

    fn breakpoint_value(&self) -> BreakpointValue;
    fn set_breakpoint_value(&mut self, value: BreakpointValue);

    /// Gas points consumed on the active engine instance.
    fn points_used(&self) -> u64;
    fn set_points_used(&mut self, points: u64);
    /// Byte length of the code behind the active instance.
    fn code_size(&self) -> u64;

    /// Compiles `code` and makes it the active instance with fresh gas
    /// points.
    fn start_instance(&mut self, code: &[u8], gas_limit: u64) -> Result<()>;
    /// Saves the active instance (and its points) on the instance stack.
    fn push_instance(&mut self) -> Result<()>;
    /// Drops the active instance and restores the previous one.
    fn pop_instance(&mut self);
    fn instance_stack_len(&self) -> usize;
    /// A shared handle to the active instance.
    fn instance(&self) -> Result<Arc<dyn Instance>>;
    /// Drops the active instance without touching the stack.
    fn clean_instance(&mut self);

    /// Engine-side code verification of the active instance.
    fn verify_contract_code(&self) -> Result<()>;
    /// Resolves the entry point: the custom callback override when set,
    /// the requested function otherwise. Fails when not exported.
    fn get_function_to_call(&self) -> Result<String>;
    /// Whether the active instance exports `name`.
    fn has_function(&self, name: &str) -> bool;

    /// Ties the dispatch to its registry id, for engine trampolines.
    fn set_instance_context_id(&mut self, id: HostContextId);
    fn instance_context_id(&self) -> Option<HostContextId>;
}

/// Typed access to the storage of the contract bound to the current frame.
pub trait Storage: StateStack {
    /// Rebinds the context to a contract address.
    fn set_address(&mut self, address: &Address);
    fn address(&self) -> &Address;

    /// Reads a storage value: staged writes first, committed state as the
    /// fallback. Missing entries read as empty.
    fn get_storage(&self, output: &dyn Output, key: &[u8]) -> Vec<u8>;
    /// Stages a storage write. Rejected in read-only frames and for
    /// reserved keys.
    fn set_storage(
        &mut self,
        runtime: &dyn Runtime,
        output: &mut dyn Output,
        key: &[u8],
        value: &[u8],
    ) -> Result<StorageStatus>;
    /// Stages a write to a host-reserved key. Only the host calls this:
    /// the async scheduler persists its pending set under a reserved key
    /// that guest writes cannot touch.
    fn set_protected_storage(
        &mut self,
        output: &mut dyn Output,
        key: &[u8],
        value: &[u8],
    ) -> Result<StorageStatus>;
}
