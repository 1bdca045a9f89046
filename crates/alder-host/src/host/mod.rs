//! The VM host: owner of the six contexts and the dispatch orchestrator.

pub mod asyncs;
pub mod execution;
pub mod hooks_impl;

use crate::contexts::{
    BigIntContext, BigIntPool, Blockchain, BlockchainContext, Metering, MeteringContext, Output,
    OutputContext, Runtime, RuntimeContext, StateStack, Storage, StorageContext,
};
use alder_config::GasSchedule;
use alder_core::{
    Address, BlockchainHook, ContractCallInput, ContractCreateInput, CryptoHook, VMOutput,
};
use alder_vm::Executor;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Construction-time knobs of the host.
#[derive(Clone)]
pub struct HostParameters {
    /// The gas schedule in force.
    pub gas_schedule: GasSchedule,
    /// Gas ceiling of one block.
    pub block_gas_limit: u64,
    /// Names of the protocol built-in functions, resolved host-side before
    /// any guest dispatch.
    pub builtin_functions: BTreeSet<String>,
    /// Maximum depth of the engine instance stack.
    pub max_instances: usize,
}

impl Default for HostParameters {
    fn default() -> Self {
        Self {
            gas_schedule: GasSchedule::default(),
            block_gas_limit: 10_000_000_000,
            builtin_functions: BTreeSet::new(),
            max_instances: 10,
        }
    }
}

/// The execution host. One instance serves one dispatch at a time; run
/// several hosts for parallel dispatches.
pub struct VmHost {
    pub(crate) crypto: Arc<dyn CryptoHook>,
    pub(crate) bigint: Box<dyn BigIntPool>,
    pub(crate) blockchain: Box<dyn Blockchain>,
    pub(crate) metering: Box<dyn Metering>,
    pub(crate) output: Box<dyn Output>,
    pub(crate) runtime: Box<dyn Runtime>,
    pub(crate) storage: Box<dyn Storage>,
    pub(crate) builtin_functions: BTreeSet<String>,
    pub(crate) eth_input: Option<Vec<u8>>,
}

impl VmHost {
    /// Builds a host over the given hooks and engine.
    pub fn new(
        blockchain_hook: Arc<dyn BlockchainHook>,
        crypto_hook: Arc<dyn CryptoHook>,
        executor: Arc<dyn Executor>,
        parameters: HostParameters,
    ) -> Self {
        Self {
            crypto: crypto_hook,
            bigint: Box::new(BigIntContext::new()),
            blockchain: Box::new(BlockchainContext::new(blockchain_hook.clone())),
            metering: Box::new(MeteringContext::new(
                parameters.gas_schedule,
                parameters.block_gas_limit,
            )),
            output: Box::new(OutputContext::new()),
            runtime: Box::new(RuntimeContext::new(executor, parameters.max_instances)),
            storage: Box::new(StorageContext::new(blockchain_hook)),
            builtin_functions: parameters.builtin_functions,
            eth_input: None,
        }
    }

    /// The big-integer context.
    pub fn bigint(&self) -> &dyn BigIntPool {
        self.bigint.as_ref()
    }

    /// The blockchain context.
    pub fn blockchain(&self) -> &dyn Blockchain {
        self.blockchain.as_ref()
    }

    /// The metering context.
    pub fn metering(&self) -> &dyn Metering {
        self.metering.as_ref()
    }

    /// The output context.
    pub fn output(&self) -> &dyn Output {
        self.output.as_ref()
    }

    /// The runtime context.
    pub fn runtime(&self) -> &dyn Runtime {
        self.runtime.as_ref()
    }

    /// The storage context.
    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// The crypto hook.
    pub fn crypto(&self) -> &dyn CryptoHook {
        self.crypto.as_ref()
    }

    /// Deploys a contract from a transaction.
    pub fn run_contract_create(&mut self, input: ContractCreateInput) -> VMOutput {
        tracing::debug!(
            caller = %input.vm_input.caller_addr,
            code_len = input.contract_code.len(),
            gas = input.vm_input.gas_provided,
            "run contract create"
        );
        self.init_state();
        let vm_output = self.do_run_contract_create(&input);
        self.clean();
        vm_output
    }

    /// Replaces the code of an existing contract. The new code and its
    /// metadata travel as the first two call arguments.
    pub fn run_contract_upgrade(&mut self, input: ContractCallInput) -> VMOutput {
        tracing::debug!(
            recipient = %input.recipient_addr,
            gas = input.vm_input.gas_provided,
            "run contract upgrade"
        );
        self.init_state();
        let vm_output = self.do_run_contract_upgrade(&input);
        self.clean();
        vm_output
    }

    /// Runs a function of a deployed contract.
    pub fn run_contract_call(&mut self, input: ContractCallInput) -> VMOutput {
        tracing::debug!(
            recipient = %input.recipient_addr,
            function = %input.function,
            call_type = ?input.vm_input.call_type,
            gas = input.vm_input.gas_provided,
            "run contract call"
        );
        self.init_state();
        let vm_output = self.do_run_contract_call(&input);
        self.clean();
        vm_output
    }

    /// Resets every context for a fresh dispatch.
    pub(crate) fn init_state(&mut self) {
        self.bigint.init_state();
        self.bigint.clear_state_stack();
        self.blockchain.init_state();
        self.blockchain.clear_state_stack();
        self.metering.init_state();
        self.metering.clear_state_stack();
        self.output.init_state();
        self.output.clear_state_stack();
        self.runtime.init_state();
        self.runtime.clear_state_stack();
        self.storage.init_state();
        self.storage.clear_state_stack();
        self.eth_input = None;
    }

    /// Releases per-dispatch resources. Runs on every exit path of the
    /// public entry points.
    pub(crate) fn clean(&mut self) {
        self.runtime.clean_instance();
    }

    /// Whether the protocol resolves this function name host-side.
    pub(crate) fn is_builtin_function(&self, function: &str) -> bool {
        self.builtin_functions.contains(function)
    }

    /// A destination is reachable synchronously when its code is locally
    /// available; otherwise the call must cross a shard boundary.
    pub(crate) fn can_execute_synchronously_on_dest(&mut self, address: &Address) -> bool {
        matches!(self.blockchain.get_code(address), Ok(code) if !code.is_empty())
    }
}
