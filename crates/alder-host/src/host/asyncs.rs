//! The asynchronous-call scheduler and the cross-shard callback resolver.
//!
//! When a contract finishes executing, the calls it registered are
//! resolved in two phases: gas is split across the calls by their
//! requested percentages and every same-shard destination is executed
//! inline (with its callback, when nothing remains pending underneath);
//! the still-pending remainder is persisted to the contract's storage and
//! re-emitted as cross-shard transfers. Incoming callback dispatches drain
//! the persisted set one entry at a time; draining the last entry erases
//! the storage and triggers the context-level callback.

use crate::contexts::{Metering, Output, Runtime, Storage};
use crate::host::VmHost;
use crate::{HostError, Result, ASYNC_DATA_PREFIX, CALLBACK_FUNCTION_NAME};
use alder_core::{
    callback_payload, parse_call_data, AsyncCallStatus, AsyncContextInfo, AsyncGeneratedCall,
    AsyncInitiator, CallType, ContractCallInput, VMInput, VMOutput,
};
use num_bigint::BigUint;

impl VmHost {
    /// Runs the scheduler over the runtime's registered calls and writes
    /// the updated statuses back.
    pub(crate) fn process_async_info_of_runtime(&mut self) -> Result<AsyncContextInfo> {
        let mut async_info = self.runtime.async_context_info().clone();
        let pending = self.process_async_info(&mut async_info)?;
        self.runtime.set_async_context_info(async_info);
        Ok(pending)
    }

    /// The two-phase resolution protocol. Returns the set of calls that
    /// remain pending and must be resolved by other shards.
    pub(crate) fn process_async_info(
        &mut self,
        async_info: &mut AsyncContextInfo,
    ) -> Result<AsyncContextInfo> {
        if async_info.is_empty() {
            return Ok(AsyncContextInfo {
                async_initiator: async_info.async_initiator.clone(),
                ..AsyncContextInfo::default()
            });
        }

        self.setup_async_calls_gas(async_info);

        let identifiers: Vec<String> = async_info.async_context_map.keys().cloned().collect();
        for identifier in &identifiers {
            let call_count = async_info.async_context_map[identifier].async_calls.len();
            for index in 0..call_count {
                let destination = async_info.async_context_map[identifier].async_calls[index]
                    .destination
                    .clone();
                if !self.can_execute_synchronously_on_dest(&destination) {
                    continue;
                }
                self.process_async_call(async_info, identifier, index)?;
            }
        }

        let pending = self.get_pending_async_calls(async_info);
        if pending.async_context_map.is_empty() {
            return Ok(pending);
        }

        self.save_pending_async_calls(&pending)?;

        let mut outgoing = pending;
        self.setup_async_calls_gas(&mut outgoing);
        for context in outgoing.async_context_map.values() {
            for call in &context.async_calls {
                if !self.can_execute_synchronously_on_dest(&call.destination) {
                    self.send_async_call_to_destination(call)?;
                }
            }
        }

        Ok(outgoing)
    }

    /// Executes one same-shard async call; when nothing stays pending
    /// beneath it, its callback runs inline and the status is settled.
    fn process_async_call(
        &mut self,
        async_info: &mut AsyncContextInfo,
        identifier: &str,
        index: usize,
    ) -> Result<()> {
        let call = async_info.async_context_map[identifier].async_calls[index].clone();
        let call_input = self.create_destination_contract_call_input(&call)?;
        let (vm_output, sub_async_info) = self.execute_on_dest_context(&call_input);

        let sub_pending = self.get_pending_async_calls(&sub_async_info);
        if !sub_pending.async_context_map.is_empty() {
            // The destination spawned its own cross-shard work; this call
            // stays pending until that resolves.
            return Ok(());
        }

        let status = if vm_output.return_code == alder_core::ReturnCode::Ok {
            AsyncCallStatus::Resolved
        } else {
            AsyncCallStatus::Rejected
        };
        if let Some(context) = async_info.async_context_map.get_mut(identifier) {
            context.async_calls[index].status = status;
        }

        self.callback_async(&call, &vm_output)
    }

    /// Runs the success or error callback of an executed async call on the
    /// originating contract.
    fn callback_async(&mut self, call: &AsyncGeneratedCall, vm_output: &VMOutput) -> Result<()> {
        let callback_function = if vm_output.return_code == alder_core::ReturnCode::Ok {
            call.success_callback.as_str()
        } else {
            call.error_callback.as_str()
        };

        let callback_input =
            self.create_callback_contract_call_input(vm_output, &call.destination, callback_function);
        let (callback_output, _) = self.execute_on_dest_context(&callback_input);
        self.process_callback_vm_output(&callback_output);
        Ok(())
    }

    /// A failed callback does not fail the dispatch; the failure is
    /// recorded in the return data instead.
    fn process_callback_vm_output(&mut self, callback_output: &VMOutput) {
        if callback_output.return_code == alder_core::ReturnCode::Ok {
            return;
        }
        tracing::warn!(
            return_code = %callback_output.return_code,
            message = %callback_output.return_message,
            "async callback failed"
        );
        self.output
            .finish(callback_output.return_code.to_string().as_bytes());
        self.output
            .finish(callback_output.return_message.as_bytes());
    }

    /// Filters the registered calls down to those still pending.
    pub(crate) fn get_pending_async_calls(&self, async_info: &AsyncContextInfo) -> AsyncContextInfo {
        let mut pending = AsyncContextInfo {
            async_initiator: async_info.async_initiator.clone(),
            ..AsyncContextInfo::default()
        };

        for (identifier, context) in &async_info.async_context_map {
            for call in &context.async_calls {
                if call.status != AsyncCallStatus::Pending {
                    continue;
                }
                let entry = pending
                    .async_context_map
                    .entry(identifier.clone())
                    .or_insert_with(|| alder_core::AsyncContext {
                        callback: context.callback.clone(),
                        async_calls: Vec::new(),
                    });
                entry.async_calls.push(call.clone());
            }
        }

        pending
    }

    /// Persists the pending set under the async storage key so the
    /// callback legs can find it.
    fn save_pending_async_calls(&mut self, pending: &AsyncContextInfo) -> Result<()> {
        let key = self.async_storage_key();
        let data = serde_json::to_vec(pending)
            .map_err(|err| HostError::SerializationFailed(err.to_string()))?;

        tracing::trace!(
            key = %hex::encode(&key),
            pending_calls = pending.call_count(),
            "save pending async calls"
        );
        self.storage
            .set_protected_storage(self.output.as_mut(), &key, &data)?;
        Ok(())
    }

    /// Splits the remaining gas across the registered calls proportionally
    /// to their requested percentages. The division remainder goes to the
    /// last call in canonical order.
    fn setup_async_calls_gas(&mut self, async_info: &mut AsyncContextInfo) {
        let gas_left = self.metering.gas_left(self.runtime.as_ref());

        let total_percentage: u128 = async_info
            .async_context_map
            .values()
            .flat_map(|context| context.async_calls.iter())
            .map(|call| call.gas_percentage as u128)
            .sum();
        if total_percentage == 0 {
            return;
        }

        let mut gas_assigned: u64 = 0;
        let mut last_assigned: Option<(String, usize)> = None;
        for (identifier, context) in async_info.async_context_map.iter_mut() {
            for (index, call) in context.async_calls.iter_mut().enumerate() {
                let gas_limit =
                    (gas_left as u128 * call.gas_percentage as u128 / total_percentage) as u64;
                call.gas_limit = gas_limit;
                gas_assigned = gas_assigned.saturating_add(gas_limit);
                last_assigned = Some((identifier.clone(), index));
            }
        }

        if let Some((identifier, index)) = last_assigned {
            if gas_assigned < gas_left {
                let context = async_info.async_context_map.get_mut(&identifier);
                if let Some(context) = context {
                    context.async_calls[index].gas_limit += gas_left - gas_assigned;
                }
            }
        }
    }

    /// Emits a cross-shard transfer carrying an async call, charging the
    /// assigned gas to the sender frame.
    fn send_async_call_to_destination(&mut self, call: &AsyncGeneratedCall) -> Result<()> {
        tracing::trace!(
            destination = %call.destination,
            gas_limit = call.gas_limit,
            "send async call to destination"
        );

        let sender = self.runtime.sc_address().clone();
        let value = BigUint::from_bytes_be(&call.value_bytes);
        self.output.transfer(
            &call.destination,
            &sender,
            call.gas_limit,
            0,
            &value,
            &call.data,
            CallType::AsynchronousCall,
        );
        self.metering.use_gas(self.runtime.as_mut(), call.gas_limit);
        Ok(())
    }

    /// After an `AsynchronousCall` dispatch with no pending follow-ups,
    /// ships the results back to the caller as a callback transfer.
    pub(crate) fn send_callback_to_current_caller(&mut self) -> Result<()> {
        let caller = self.runtime.vm_input().caller_addr.clone();
        let sender = self.runtime.sc_address().clone();
        let gas_left = self.metering.gas_left(self.runtime.as_ref());

        let return_code = self.output.return_code();
        let payload = callback_payload(return_code, self.output.return_data());

        self.output.transfer(
            &caller,
            &sender,
            gas_left,
            0,
            &BigUint::default(),
            &payload,
            CallType::AsynchronousCallBack,
        );
        self.metering.use_gas(self.runtime.as_mut(), gas_left);
        Ok(())
    }

    /// Ships the stored initiator results to a cross-shard initiator.
    fn send_storage_callback_to_destination(
        &mut self,
        initiator: &AsyncInitiator,
    ) -> Result<()> {
        let sender = self.runtime.sc_address().clone();
        let gas_left = self.metering.gas_left(self.runtime.as_ref());

        let payload = callback_payload(self.output.return_code(), &initiator.return_data);

        self.output.transfer(
            &initiator.caller_addr,
            &sender,
            gas_left,
            0,
            &BigUint::default(),
            &payload,
            CallType::AsynchronousCallBack,
        );
        self.metering.use_gas(self.runtime.as_mut(), gas_left);
        Ok(())
    }

    /// Handles an incoming cross-shard callback: removes the answered call
    /// from the persisted pending set, and once the set drains, erases the
    /// storage and resolves the context-level callback.
    pub(crate) fn process_callback_stack(&mut self) -> Result<()> {
        let key = self.async_storage_key();
        let stored = self.storage.get_storage(self.output.as_ref(), &key);
        let mut async_info: AsyncContextInfo = serde_json::from_slice(&stored)
            .map_err(|_| HostError::CallBackFuncNotExpected)?;

        let caller = self.runtime.vm_input().caller_addr.clone();
        let mut position: Option<(String, usize)> = None;
        'search: for (identifier, context) in &async_info.async_context_map {
            for (index, call) in context.async_calls.iter().enumerate() {
                if call.destination == caller {
                    position = Some((identifier.clone(), index));
                    break 'search;
                }
            }
        }

        let (identifier, index) = position.ok_or(HostError::CallBackFuncNotExpected)?;

        // Remove the answered call; drop the whole context once empty.
        let context_drained = {
            let context = async_info
                .async_context_map
                .get_mut(&identifier)
                .ok_or(HostError::CallBackFuncNotExpected)?;
            context.async_calls.swap_remove(index);
            context.async_calls.is_empty()
        };
        if context_drained {
            async_info.async_context_map.remove(&identifier);
        }

        if !async_info.async_context_map.is_empty() {
            // Still waiting for other shards; persist the shrunken set.
            let data = serde_json::to_vec(&async_info)
                .map_err(|err| HostError::SerializationFailed(err.to_string()))?;
            self.storage
                .set_protected_storage(self.output.as_mut(), &key, &data)?;
            return Ok(());
        }

        self.storage
            .set_protected_storage(self.output.as_mut(), &key, &[])?;

        let initiator = async_info.async_initiator.clone();
        if !self.can_execute_synchronously_on_dest(&initiator.caller_addr) {
            return self.send_storage_callback_to_destination(&initiator);
        }

        // The initiator is local: run the context-level callback.
        let gas_remaining = self.metering.gas_left(self.runtime.as_ref());
        let current_output = self.output.get_vm_output(gas_remaining);
        let callback_input = self.create_callback_contract_call_input(
            &current_output,
            &initiator.caller_addr,
            CALLBACK_FUNCTION_NAME,
        );
        let (callback_output, _) = self.execute_on_dest_context(&callback_input);
        self.process_callback_vm_output(&callback_output);
        Ok(())
    }

    /// Reads the persisted pending set for the current transaction.
    pub(crate) fn get_current_async_info(&mut self) -> Result<AsyncContextInfo> {
        let key = self.async_storage_key();
        let stored = self.storage.get_storage(self.output.as_ref(), &key);
        serde_json::from_slice(&stored).map_err(|_| HostError::CallBackFuncNotExpected)
    }

    /// The storage key the pending set lives under:
    /// `hash(prefix ‖ original transaction hash)`.
    pub(crate) fn async_storage_key(&self) -> Vec<u8> {
        let mut data = ASYNC_DATA_PREFIX.to_vec();
        data.extend_from_slice(self.runtime.original_tx_hash());
        self.crypto.keccak256(&data).to_vec()
    }

    /// Builds the call input executing one async call on its destination.
    fn create_destination_contract_call_input(
        &mut self,
        call: &AsyncGeneratedCall,
    ) -> Result<ContractCallInput> {
        let (function, arguments) = parse_call_data(&call.data)
            .map_err(|err| HostError::ExecutionFailed(err.to_string()))?;

        let runtime_input = self.runtime.vm_input();
        Ok(ContractCallInput {
            vm_input: VMInput {
                caller_addr: self.runtime.sc_address().clone(),
                arguments,
                call_value: BigUint::from_bytes_be(&call.value_bytes),
                gas_price: runtime_input.gas_price,
                gas_provided: call.gas_limit,
                gas_locked: 0,
                call_type: CallType::AsynchronousCall,
                original_tx_hash: runtime_input.original_tx_hash.clone(),
                current_tx_hash: runtime_input.current_tx_hash.clone(),
            },
            recipient_addr: call.destination.clone(),
            function,
        })
    }

    /// Builds the input running a callback on the current contract: the
    /// first argument is the producing call's return code, followed by its
    /// return data on success or its message on failure.
    fn create_callback_contract_call_input(
        &mut self,
        dest_output: &VMOutput,
        callback_initiator: &alder_core::Address,
        callback_function: &str,
    ) -> ContractCallInput {
        let mut arguments = vec![dest_output.return_code.to_bytes()];
        if dest_output.return_code == alder_core::ReturnCode::Ok {
            arguments.extend(dest_output.return_data.iter().cloned());
        } else {
            arguments.push(dest_output.return_message.as_bytes().to_vec());
        }

        let gas_left = self.metering.gas_left(self.runtime.as_ref());
        let runtime_input = self.runtime.vm_input();

        ContractCallInput {
            vm_input: VMInput {
                caller_addr: callback_initiator.clone(),
                arguments,
                call_value: BigUint::default(),
                gas_price: runtime_input.gas_price,
                gas_provided: gas_left,
                gas_locked: 0,
                call_type: CallType::AsynchronousCallBack,
                original_tx_hash: runtime_input.original_tx_hash.clone(),
                current_tx_hash: runtime_input.current_tx_hash.clone(),
            },
            recipient_addr: self.runtime.sc_address().clone(),
            function: callback_function.to_string(),
        }
    }
}
