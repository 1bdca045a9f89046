//! The host side of the import surface: how guest-visible operations map
//! onto the contexts.
//!
//! Failing operations record a breakpoint on the runtime and hand the
//! engine an opaque `Breakpoint` error; the dispatcher reads the
//! breakpoint to classify the outcome once the engine unwinds.

use crate::contexts::{BigIntPool, Metering, Output, Runtime, Storage};
use crate::host::VmHost;
use crate::HostError;
use alder_core::{
    Address, AsyncCallStatus, AsyncGeneratedCall, CallType, ContractCallInput,
    ContractCreateInput, ReturnCode,
};
use alder_vm::{BreakpointValue, InstanceError, VmHooks};
use num_bigint::{BigInt, BigUint};

impl VmHost {
    /// Records a failure breakpoint and produces the engine-facing error.
    fn break_execution(&mut self, err: &HostError, value: BreakpointValue) -> InstanceError {
        tracing::debug!(error = %err, breakpoint = ?value, "host import failed");
        self.runtime.set_breakpoint_value(value);
        InstanceError::Breakpoint
    }
}

impl VmHooks for VmHost {
    fn use_gas(&mut self, gas: u64) -> Result<(), InstanceError> {
        self.metering
            .use_gas_bounded(self.runtime.as_mut(), gas)
            .map_err(|err| self.break_execution(&err, BreakpointValue::OutOfGas))
    }

    fn gas_left(&self) -> u64 {
        self.metering.gas_left(self.runtime.as_ref())
    }

    fn finish(&mut self, data: &[u8]) -> Result<(), InstanceError> {
        let cost = self
            .metering
            .gas_schedule()
            .base_ops_api_cost
            .finish
            .saturating_add(
                self.metering
                    .gas_schedule()
                    .base_operation_cost
                    .data_copy_per_byte
                    .saturating_mul(data.len() as u64),
            );
        self.use_gas(cost)?;
        self.output.finish(data);
        Ok(())
    }

    fn signal_error(&mut self, message: &str) -> InstanceError {
        let cost = self.metering.gas_schedule().base_ops_api_cost.signal_error;
        self.metering.use_gas(self.runtime.as_mut(), cost);

        self.output.set_return_code(ReturnCode::UserError);
        self.output.set_return_message(message);
        self.runtime
            .set_breakpoint_value(BreakpointValue::SignalError);
        InstanceError::Breakpoint
    }

    fn storage_store(&mut self, key: &[u8], value: &[u8]) -> Result<i32, InstanceError> {
        let cost = self
            .metering
            .gas_schedule()
            .base_ops_api_cost
            .storage_store
            .saturating_add(
                self.metering
                    .gas_schedule()
                    .base_operation_cost
                    .store_per_byte
                    .saturating_mul(value.len() as u64),
            );
        self.use_gas(cost)?;

        match self
            .storage
            .set_storage(self.runtime.as_ref(), self.output.as_mut(), key, value)
        {
            Ok(status) => Ok(status.as_i32()),
            Err(err) => Err(self.break_execution(&err, BreakpointValue::ExecutionFailed)),
        }
    }

    fn storage_load(&mut self, key: &[u8]) -> Result<Vec<u8>, InstanceError> {
        let cost = self.metering.gas_schedule().base_ops_api_cost.storage_load;
        self.use_gas(cost)?;
        Ok(self.storage.get_storage(self.output.as_ref(), key))
    }

    fn arguments(&self) -> Vec<Vec<u8>> {
        self.runtime.arguments().to_vec()
    }

    fn caller(&self) -> Address {
        self.runtime.vm_input().caller_addr.clone()
    }

    fn sc_address(&self) -> Address {
        self.runtime.sc_address().clone()
    }

    fn call_value_bytes(&self) -> Vec<u8> {
        self.runtime.vm_input().call_value.to_bytes_be()
    }

    fn write_log(&mut self, topics: &[Vec<u8>], data: &[u8]) -> Result<(), InstanceError> {
        let cost = self.metering.gas_schedule().base_ops_api_cost.log;
        self.use_gas(cost)?;
        let address = self.runtime.sc_address().clone();
        self.output.write_log(&address, topics, data);
        Ok(())
    }

    fn transfer_value(
        &mut self,
        destination: &Address,
        value_bytes: &[u8],
    ) -> Result<(), InstanceError> {
        let cost = self.metering.gas_schedule().base_ops_api_cost.transfer_value;
        self.use_gas(cost)?;

        let sender = self.runtime.sc_address().clone();
        let value = BigUint::from_bytes_be(value_bytes);
        self.output
            .transfer(destination, &sender, 0, 0, &value, &[], CallType::Direct);
        Ok(())
    }

    fn execute_on_dest_context(&mut self, input: ContractCallInput) -> Result<i32, InstanceError> {
        let (vm_output, _async_info) = VmHost::execute_on_dest_context(self, &input);
        Ok(if vm_output.return_code == ReturnCode::Ok {
            0
        } else {
            1
        })
    }

    fn execute_on_same_context(&mut self, input: ContractCallInput) -> Result<i32, InstanceError> {
        match VmHost::execute_on_same_context(self, &input) {
            Ok(_) => Ok(0),
            Err(err) => {
                tracing::debug!(error = %err, "execute on same context failed");
                Ok(1)
            }
        }
    }

    fn create_contract(&mut self, input: ContractCreateInput) -> Result<Address, InstanceError> {
        match self.create_new_contract(&input) {
            Ok(address) => Ok(address),
            Err(err) => Err(self.break_execution(&err, BreakpointValue::ExecutionFailed)),
        }
    }

    fn create_async_call(
        &mut self,
        context_identifier: &str,
        destination: &Address,
        data: &[u8],
        value_bytes: &[u8],
        success_callback: &str,
        error_callback: &str,
        gas_percentage: u64,
    ) -> Result<(), InstanceError> {
        let cost = self
            .metering
            .gas_schedule()
            .base_ops_api_cost
            .create_async_call;
        self.use_gas(cost)?;

        let call = AsyncGeneratedCall {
            status: AsyncCallStatus::Pending,
            destination: destination.clone(),
            data: data.to_vec(),
            value_bytes: value_bytes.to_vec(),
            gas_percentage,
            gas_limit: 0,
            success_callback: success_callback.to_string(),
            error_callback: error_callback.to_string(),
        };
        self.runtime
            .add_async_call(context_identifier, call)
            .map_err(|err| self.break_execution(&err, BreakpointValue::ExecutionFailed))
    }

    fn ethereum_call_data(&mut self) -> Vec<u8> {
        VmHost::ethereum_call_data(self)
    }

    fn big_int_new(&mut self, initial: i64) -> i32 {
        self.bigint.put(BigInt::from(initial))
    }

    fn big_int_get_int64(&self, handle: i32) -> Result<i64, InstanceError> {
        let value = self
            .bigint
            .get(handle)
            .map_err(|err| InstanceError::Trap(err.to_string()))?;
        i64::try_from(value).map_err(|_| InstanceError::Trap("big int out of i64 range".to_string()))
    }

    fn big_int_set_int64(&mut self, handle: i32, value: i64) -> Result<(), InstanceError> {
        self.bigint
            .set(handle, BigInt::from(value))
            .map_err(|err| InstanceError::Trap(err.to_string()))
    }
}
