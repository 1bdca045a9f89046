//! Dispatch flows: the public entry points, the synchronous sub-call
//! protocol and the inner execution layer.
//!
//! Every flow follows the same discipline: context snapshots are pushed
//! before a frame is entered and popped on every exit path, engine
//! instances are pushed and popped in pairs, and the host-context
//! registration is released by its guard. Errors never leave the public
//! entry points — they are folded into the returned `VMOutput`.

use crate::contexts::{Blockchain, Metering, Output, Runtime, StateStack, Storage};
use crate::host::VmHost;
use crate::registry::{self, HostContextEntry};
use crate::{
    HostError, Result, CALLBACK_FUNCTION_NAME, ETH_ARGUMENT_LEN, INIT_FUNCTION_NAME,
    INIT_FUNCTION_NAME_ETH,
};
use alder_core::{
    Address, AsyncContextInfo, CallType, ContractCallInput, ContractCreateInput, ReturnCode,
    VMOutput,
};
use alder_vm::{BreakpointValue, InstanceError};

impl VmHost {
    pub(crate) fn do_run_contract_create(&mut self, input: &ContractCreateInput) -> VMOutput {
        let address = match self.blockchain.new_address(&input.vm_input.caller_addr) {
            Ok(address) => address,
            Err(err) => return self.vm_output_on_error(&err),
        };

        self.runtime.set_vm_input(&input.vm_input);
        self.runtime.set_sc_address(&address);
        self.metering.init_state_from_input(self.runtime.as_mut());

        self.output
            .add_tx_value_to_account(&address, &input.vm_input.call_value);
        self.storage.set_address(&address);

        match self.perform_code_deploy(
            &address,
            &input.contract_code,
            &input.contract_code_metadata,
        ) {
            Ok(vm_output) => vm_output,
            Err(err) => self.vm_output_on_error(&err),
        }
    }

    pub(crate) fn do_run_contract_upgrade(&mut self, input: &ContractCallInput) -> VMOutput {
        self.runtime.init_state_from_call_input(input);
        self.metering.init_state_from_input(self.runtime.as_mut());

        self.output
            .add_tx_value_to_account(&input.recipient_addr, &input.vm_input.call_value);
        self.storage.set_address(&input.recipient_addr);

        let (code, code_metadata) = match self.runtime.get_code_upgrade_from_args() {
            Ok(parts) => parts,
            Err(_) => return self.vm_output_on_error(&HostError::InvalidUpgradeArguments),
        };

        match self.perform_code_deploy(&input.recipient_addr, &code, &code_metadata) {
            Ok(vm_output) => vm_output,
            Err(err) => self.vm_output_on_error(&err),
        }
    }

    fn perform_code_deploy(
        &mut self,
        address: &Address,
        code: &[u8],
        code_metadata: &[u8],
    ) -> Result<VMOutput> {
        tracing::trace!(%address, code_len = code.len(), "perform code deploy");

        self.metering
            .deduct_initial_gas_for_direct_deployment(self.runtime.as_ref(), code)?;

        let gas_for_deployment = self.metering.get_gas_for_execution();
        self.runtime
            .start_instance(code, gas_for_deployment)
            .map_err(|_| HostError::ContractInvalid)?;
        self.runtime
            .verify_contract_code()
            .map_err(|_| HostError::ContractInvalid)?;

        let context_guard = registry::register(HostContextEntry::new(
            self.runtime.original_tx_hash(),
            address,
        ));
        self.runtime.set_instance_context_id(context_guard.id());

        self.call_init_function()?;

        self.output.deploy_code(address, code, code_metadata);
        self.assemble_vm_output()
    }

    pub(crate) fn do_run_contract_call(&mut self, input: &ContractCallInput) -> VMOutput {
        self.runtime.init_state_from_call_input(input);
        self.metering.init_state_from_input(self.runtime.as_mut());

        self.output
            .add_tx_value_to_account(&input.recipient_addr, &input.vm_input.call_value);
        self.storage.set_address(&input.recipient_addr);

        let contract = match self.blockchain.get_code(&input.recipient_addr) {
            Ok(contract) => contract,
            Err(_) => return self.vm_output_on_error(&HostError::ContractNotFound),
        };

        if let Err(_err) = self
            .metering
            .deduct_initial_gas_for_execution(self.runtime.as_ref(), &contract)
        {
            return self.vm_output_on_error(&HostError::NotEnoughGas);
        }

        let gas_for_execution = self.metering.get_gas_for_execution();
        if self
            .runtime
            .start_instance(&contract, gas_for_execution)
            .is_err()
        {
            return self.vm_output_on_error(&HostError::ContractInvalid);
        }

        let context_guard = registry::register(HostContextEntry::new(
            self.runtime.original_tx_hash(),
            &input.recipient_addr,
        ));
        self.runtime.set_instance_context_id(context_guard.id());

        if let Err(err) = self.call_sc_method() {
            return self.vm_output_on_error(&err);
        }

        self.metering.unlock_gas_if_async_step(self.runtime.as_ref());

        match self.assemble_vm_output() {
            Ok(vm_output) => vm_output,
            Err(err) => self.vm_output_on_error(&err),
        }
    }

    /// Runs a contract in an isolated child context. The child starts from
    /// a blank output accumulator; on success its effects are merged back
    /// into the parent, on failure all four involved contexts roll back as
    /// if the call never happened. The error outcome is captured in the
    /// returned `VMOutput` before the rollback.
    pub(crate) fn execute_on_dest_context(
        &mut self,
        input: &ContractCallInput,
    ) -> (VMOutput, AsyncContextInfo) {
        tracing::trace!(function = %input.function, recipient = %input.recipient_addr,
            "execute on dest context");

        self.bigint.push_state();
        self.bigint.init_state();

        self.output.push_state();
        self.output.censor_vm_output();

        self.runtime.push_state();
        self.runtime.init_state_from_call_input(input);

        self.storage.push_state();
        self.storage.set_address(&input.recipient_addr);

        let result = self.run_on_dest_context(input);
        self.finish_execute_on_dest_context(result)
    }

    fn run_on_dest_context(&mut self, input: &ContractCallInput) -> Result<AsyncContextInfo> {
        // The transfer only persists if the execution succeeds.
        self.output.transfer(
            &input.recipient_addr,
            &input.vm_input.caller_addr,
            0,
            0,
            &input.vm_input.call_value,
            &[],
            CallType::Direct,
        );

        self.execute(input)?;

        let mut async_info = self.runtime.async_context_info().clone();
        self.process_async_info(&mut async_info)?;
        self.runtime.set_async_context_info(async_info.clone());
        Ok(async_info)
    }

    fn finish_execute_on_dest_context(
        &mut self,
        result: Result<AsyncContextInfo>,
    ) -> (VMOutput, AsyncContextInfo) {
        match result {
            Err(err) => {
                // Capture the failure before any state is restored.
                let vm_output = self.output.create_vm_output_in_case_of_error(&err);

                self.bigint.pop_set_active_state();
                self.output.pop_set_active_state();
                self.runtime.pop_set_active_state();
                self.storage.pop_set_active_state();

                (vm_output, AsyncContextInfo::default())
            }
            Ok(async_info) => {
                // Extract the child's output before the accumulator is
                // merged into the parent.
                let gas_remaining = self.metering.gas_left(self.runtime.as_ref());
                let vm_output = self.output.get_vm_output(gas_remaining);

                self.bigint.pop_set_active_state();
                self.output.pop_merge_active_state();
                self.runtime.pop_set_active_state();
                self.storage.pop_set_active_state();

                (vm_output, async_info)
            }
        }
    }

    /// Runs a contract inside the caller's context: storage stays bound to
    /// the caller, and on success the callee's bigint and output changes
    /// are kept as if the caller made them.
    pub(crate) fn execute_on_same_context(
        &mut self,
        input: &ContractCallInput,
    ) -> Result<AsyncContextInfo> {
        tracing::trace!(function = %input.function, recipient = %input.recipient_addr,
            "execute on same context");

        self.bigint.push_state();
        self.output.push_state();
        self.runtime.push_state();
        self.runtime.init_state_from_call_input(input);

        let result = self.run_on_same_context(input);
        self.finish_execute_on_same_context(result)
    }

    fn run_on_same_context(&mut self, input: &ContractCallInput) -> Result<AsyncContextInfo> {
        self.output.transfer(
            &input.recipient_addr,
            &input.vm_input.caller_addr,
            0,
            0,
            &input.vm_input.call_value,
            &[],
            CallType::Direct,
        );

        self.execute(input)?;
        Ok(self.runtime.async_context_info().clone())
    }

    fn finish_execute_on_same_context(
        &mut self,
        result: Result<AsyncContextInfo>,
    ) -> Result<AsyncContextInfo> {
        match result {
            Err(err) => {
                self.bigint.pop_set_active_state();
                self.output.pop_set_active_state();
                self.runtime.pop_set_active_state();
                Err(err)
            }
            Ok(async_info) => {
                self.bigint.pop_discard();
                self.output.pop_discard();
                self.runtime.pop_set_active_state();
                Ok(async_info)
            }
        }
    }

    /// Deploys a contract from inside a running contract and returns the
    /// new address. The full provided gas is reserved up front and the
    /// unused part restored on success.
    pub(crate) fn create_new_contract(&mut self, input: &ContractCreateInput) -> Result<Address> {
        tracing::trace!(code_len = input.contract_code.len(), "create new contract");

        let initial_gas_provided = input.vm_input.gas_provided;
        self.metering
            .use_gas(self.runtime.as_mut(), initial_gas_provided);

        if self.runtime.read_only() {
            return Err(HostError::InvalidCallOnReadOnlyMode);
        }

        self.runtime.push_state();
        self.runtime.set_vm_input(&input.vm_input);

        let address = match self.blockchain.new_address(&input.vm_input.caller_addr) {
            Ok(address) => address,
            Err(err) => {
                self.runtime.pop_set_active_state();
                return Err(err);
            }
        };

        self.output.transfer(
            &address,
            &input.vm_input.caller_addr,
            0,
            0,
            &input.vm_input.call_value,
            &[],
            CallType::Direct,
        );
        self.blockchain.increase_nonce(&input.vm_input.caller_addr);
        self.runtime.set_sc_address(&address);

        self.metering.push_state();
        self.metering.init_state_from_input(self.runtime.as_mut());
        if let Err(err) = self
            .metering
            .deduct_initial_gas_for_indirect_deployment(self.runtime.as_ref(), &input.contract_code)
        {
            self.metering.pop_set_active_state();
            self.runtime.pop_set_active_state();
            return Err(err);
        }

        let context_guard = registry::register(HostContextEntry::new(
            self.runtime.original_tx_hash(),
            &address,
        ));

        if let Err(err) = self.runtime.push_instance() {
            self.metering.pop_set_active_state();
            self.runtime.pop_set_active_state();
            return Err(err);
        }

        let gas_for_deployment = self.metering.get_gas_for_execution();
        if let Err(err) = self
            .runtime
            .start_instance(&input.contract_code, gas_for_deployment)
        {
            self.runtime.pop_instance();
            self.metering.pop_set_active_state();
            self.runtime.pop_set_active_state();
            return Err(err);
        }

        if let Err(err) = self.runtime.verify_contract_code() {
            self.runtime.pop_instance();
            self.metering.pop_set_active_state();
            self.runtime.pop_set_active_state();
            return Err(err);
        }

        self.runtime.set_instance_context_id(context_guard.id());

        if let Err(err) = self.call_init_function() {
            self.runtime.pop_instance();
            self.metering.pop_set_active_state();
            self.runtime.pop_set_active_state();
            return Err(err);
        }

        self.output.deploy_code(
            &address,
            &input.contract_code,
            &input.contract_code_metadata,
        );

        let gas_to_restore = self.metering.gas_left(self.runtime.as_ref());
        self.runtime.pop_instance();
        self.metering.pop_merge_active_state();
        self.runtime.pop_set_active_state();
        self.metering.restore_gas(self.runtime.as_mut(), gas_to_restore);

        Ok(address)
    }

    /// The inner dispatch shared by every sub-call form. Assumes the
    /// runtime is already bound to the callee's input. Gas is modelled as
    /// lent: the full provided amount is consumed on the caller's instance
    /// and whatever the callee leaves unused is restored on clean exit.
    pub(crate) fn execute(&mut self, input: &ContractCallInput) -> Result<()> {
        if self.is_builtin_function(&input.function) {
            return self.call_builtin_function(input);
        }

        let initial_gas_provided = input.vm_input.gas_provided;
        self.metering
            .use_gas(self.runtime.as_mut(), initial_gas_provided);

        if input.function == INIT_FUNCTION_NAME || input.function == INIT_FUNCTION_NAME_ETH {
            return Err(HostError::InitFuncCalledInRun);
        }

        let sc_address = self.runtime.sc_address().clone();
        let contract = self.blockchain.get_code(&sc_address)?;

        self.metering.push_state();
        self.metering.init_state_from_input(self.runtime.as_mut());
        if let Err(err) = self
            .metering
            .deduct_initial_gas_for_execution(self.runtime.as_ref(), &contract)
        {
            self.metering.pop_set_active_state();
            return Err(err);
        }

        let context_guard = registry::register(HostContextEntry::new(
            self.runtime.original_tx_hash(),
            &sc_address,
        ));

        if let Err(err) = self.runtime.push_instance() {
            self.metering.pop_set_active_state();
            return Err(err);
        }

        let gas_for_execution = self.metering.get_gas_for_execution();
        if let Err(err) = self.runtime.start_instance(&contract, gas_for_execution) {
            self.runtime.pop_instance();
            self.metering.pop_set_active_state();
            return Err(err);
        }
        self.runtime.set_instance_context_id(context_guard.id());

        if let Err(err) = self.call_sc_method_indirect() {
            self.runtime.pop_instance();
            self.metering.pop_set_active_state();
            return Err(err);
        }

        if self.output.return_code() != ReturnCode::Ok {
            self.runtime.pop_instance();
            self.metering.pop_set_active_state();
            return Err(HostError::ReturnCodeNotOk);
        }

        self.metering.unlock_gas_if_async_step(self.runtime.as_ref());
        self.metering
            .update_sc_gas_used(self.runtime.as_ref(), self.output.output_accounts());

        let gas_to_restore = self.metering.gas_left(self.runtime.as_ref());
        self.runtime.pop_instance();
        self.metering.pop_merge_active_state();
        self.metering.restore_gas(self.runtime.as_mut(), gas_to_restore);

        Ok(())
    }

    fn call_builtin_function(&mut self, input: &ContractCallInput) -> Result<()> {
        let vm_output = match self.blockchain.process_built_in_function(input) {
            Ok(vm_output) => vm_output,
            Err(err) => {
                self.metering
                    .use_gas(self.runtime.as_mut(), input.vm_input.gas_provided);
                return Err(err);
            }
        };

        if vm_output.gas_remaining < input.vm_input.gas_provided {
            let gas_consumed = input.vm_input.gas_provided - vm_output.gas_remaining;
            self.metering.use_gas(self.runtime.as_mut(), gas_consumed);
        }

        self.output.add_to_active_state(vm_output);
        Ok(())
    }

    /// Runs the entry point of a top-level call and the post-execution
    /// protocol selected by the call type.
    pub(crate) fn call_sc_method(&mut self) -> Result<()> {
        self.verify_allowed_function_call()?;

        let call_type = self.runtime.vm_input().call_type;
        let function = self.get_function_by_call_type(call_type)?;
        self.call_instance_function(&function)?;

        match call_type {
            CallType::AsynchronousCall => {
                let pending = self.process_async_info_of_runtime()?;
                if pending.async_context_map.is_empty() {
                    self.send_callback_to_current_caller()?;
                }
            }
            CallType::AsynchronousCallBack => {
                self.process_callback_stack()?;
            }
            CallType::Direct => {
                self.process_async_info_of_runtime()?;
            }
        }
        Ok(())
    }

    fn call_sc_method_indirect(&mut self) -> Result<()> {
        let function = self.runtime.get_function_to_call()?;
        self.call_instance_function(&function)
    }

    pub(crate) fn call_init_function(&mut self) -> Result<()> {
        if self.runtime.has_function(INIT_FUNCTION_NAME) {
            self.call_instance_function(INIT_FUNCTION_NAME)?;
        }
        Ok(())
    }

    /// Invokes an exported function on the active instance and folds a
    /// trap through the breakpoint handler.
    fn call_instance_function(&mut self, function: &str) -> Result<()> {
        let instance = self.runtime.instance()?;
        match instance.call(function, self) {
            Ok(()) => Ok(()),
            Err(err) => self.handle_breakpoint(err),
        }
    }

    /// When a breakpoint was raised, its meaning dominates the raw engine
    /// error; a trap without a breakpoint is a generic execution failure.
    fn handle_breakpoint(&mut self, err: InstanceError) -> Result<()> {
        match self.runtime.breakpoint_value() {
            BreakpointValue::None => Err(HostError::from(err)),
            BreakpointValue::OutOfGas => Err(HostError::NotEnoughGas),
            BreakpointValue::SignalError => Err(HostError::SignalError(
                self.output.return_message().to_string(),
            )),
            BreakpointValue::ExecutionFailed => Err(HostError::ExecutionFailed(
                "runtime breakpoint".to_string(),
            )),
            BreakpointValue::AsyncCall => {
                // The contract stopped early on purpose; the registered
                // async calls are processed by the scheduler.
                self.runtime.set_breakpoint_value(BreakpointValue::None);
                Ok(())
            }
        }
    }

    fn verify_allowed_function_call(&mut self) -> Result<()> {
        let function = self.runtime.function();

        if function == INIT_FUNCTION_NAME || function == INIT_FUNCTION_NAME_ETH {
            return Err(HostError::InitFuncCalledInRun);
        }

        let is_callback = function == CALLBACK_FUNCTION_NAME;
        let in_callback_dispatch =
            self.runtime.vm_input().call_type == CallType::AsynchronousCallBack;
        if is_callback && !in_callback_dispatch {
            return Err(HostError::CallBackFuncCalledInRun);
        }

        Ok(())
    }

    /// Resolves the entry point for the given call type. Incoming async
    /// callbacks run the success callback registered for the shard that
    /// answered; anything else runs the requested function.
    fn get_function_by_call_type(&mut self, call_type: CallType) -> Result<String> {
        if call_type != CallType::AsynchronousCallBack {
            return self.runtime.get_function_to_call();
        }

        let async_info = self.get_current_async_info()?;
        let caller = self.runtime.vm_input().caller_addr.clone();

        'search: for context in async_info.async_context_map.values() {
            for call in &context.async_calls {
                if call.destination == caller {
                    self.runtime.set_custom_call_function(&call.success_callback);
                    break 'search;
                }
            }
        }

        self.runtime.get_function_to_call()
    }

    /// Folds a failure into a dispatch-level output: the current account
    /// is charged all provided gas and nothing remains.
    pub(crate) fn vm_output_on_error(&mut self, err: &HostError) -> VMOutput {
        tracing::debug!(error = %err, "dispatch failed");
        self.metering
            .update_gas_state_on_failure(self.runtime.as_ref(), self.output.as_mut());
        self.output.create_vm_output_in_case_of_error(err)
    }

    /// Assembles the success output and runs the final gas accounting.
    fn assemble_vm_output(&mut self) -> Result<VMOutput> {
        let gas_remaining = self.metering.gas_left(self.runtime.as_ref());
        let mut vm_output = self.output.get_vm_output(gas_remaining);
        self.metering
            .update_gas_state_on_success(self.runtime.as_ref(), &mut vm_output)?;
        Ok(vm_output)
    }

    /// Ethereum-shaped call data for the current dispatch, cached after
    /// the first request.
    pub(crate) fn ethereum_call_data(&mut self) -> Vec<u8> {
        if self.eth_input.is_none() {
            self.eth_input = Some(self.create_eth_call_input());
        }
        self.eth_input.clone().unwrap_or_default()
    }

    /// Four selector bytes (Keccak-256 of the function name) followed by
    /// every argument left-padded to 32 bytes.
    fn create_eth_call_input(&self) -> Vec<u8> {
        let mut data = Vec::new();

        let function = self.runtime.function();
        if !function.is_empty() {
            let hash = self.crypto.keccak256(function.as_bytes());
            data.extend_from_slice(&hash[..4]);
        }

        for argument in self.runtime.arguments() {
            let mut padded = vec![0u8; ETH_ARGUMENT_LEN];
            let len = argument.len().min(ETH_ARGUMENT_LEN);
            padded[ETH_ARGUMENT_LEN - len..].copy_from_slice(&argument[argument.len() - len..]);
            data.extend_from_slice(&padded);
        }

        data
    }
}
