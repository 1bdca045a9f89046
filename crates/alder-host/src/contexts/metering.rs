//! The metering context: gas accounting across the dispatch.
//!
//! Gas points are burned on the runtime's active engine instance; this
//! context holds the frame scalars (provided gas, initial deduction,
//! executable budget) and the per-account attribution map. Sub-frames that
//! borrow the caller's gas push this state and merge their attribution
//! back on success.

use crate::contexts::{Metering, Output, Runtime, StateStack};
use crate::{HostError, Result};
use alder_config::GasSchedule;
use alder_core::{Address, CallType, OutputAccount, VMOutput};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
struct MeteringState {
    initial_gas_provided: u64,
    initial_cost: u64,
    gas_for_execution: u64,
    gas_used_by_accounts: BTreeMap<Address, u64>,
}

/// Gas accounting for one host.
pub struct MeteringContext {
    gas_schedule: GasSchedule,
    block_gas_limit: u64,
    state: MeteringState,
    state_stack: Vec<MeteringState>,
}

impl MeteringContext {
    pub fn new(gas_schedule: GasSchedule, block_gas_limit: u64) -> Self {
        Self {
            gas_schedule,
            block_gas_limit,
            state: MeteringState::default(),
            state_stack: Vec::new(),
        }
    }

    fn deduct_initial_gas(
        &mut self,
        runtime: &dyn Runtime,
        code_len: u64,
        initial_cost: u64,
    ) -> Result<()> {
        let gas_provided = runtime.vm_input().gas_provided;
        if initial_cost > gas_provided {
            tracing::debug!(initial_cost, gas_provided, code_len, "not enough gas to prepare");
            return Err(HostError::NotEnoughGas);
        }
        self.state.initial_cost = initial_cost;
        self.state.gas_for_execution = gas_provided - initial_cost;
        Ok(())
    }

    /// Gas carried away by the outgoing transfers of every account.
    fn gas_transferred_by_all(accounts: &BTreeMap<Address, OutputAccount>) -> u64 {
        accounts
            .values()
            .fold(0u64, |acc, account| acc.saturating_add(account.transferred_gas()))
    }
}

impl StateStack for MeteringContext {
    fn init_state(&mut self) {
        self.state = MeteringState::default();
    }

    fn push_state(&mut self) {
        self.state_stack.push(self.state.clone());
    }

    fn pop_set_active_state(&mut self) {
        if let Some(previous) = self.state_stack.pop() {
            self.state = previous;
        }
    }

    fn pop_discard(&mut self) {
        self.state_stack.pop();
    }

    fn clear_state_stack(&mut self) {
        self.state_stack.clear();
    }

    fn state_stack_len(&self) -> usize {
        self.state_stack.len()
    }
}

impl Metering for MeteringContext {
    fn pop_merge_active_state(&mut self) {
        let Some(previous) = self.state_stack.pop() else {
            return;
        };
        let frame_attribution = std::mem::take(&mut self.state.gas_used_by_accounts);
        self.state = previous;
        for (address, gas) in frame_attribution {
            let entry = self.state.gas_used_by_accounts.entry(address).or_insert(0);
            *entry = entry.saturating_add(gas);
        }
    }

    fn gas_schedule(&self) -> &GasSchedule {
        &self.gas_schedule
    }

    fn block_gas_limit(&self) -> u64 {
        self.block_gas_limit
    }

    fn init_state_from_input(&mut self, runtime: &mut dyn Runtime) {
        self.state = MeteringState::default();

        let input = runtime.vm_input_mut();
        if input.call_type == CallType::AsynchronousCallBack {
            // The caller locked gas so this callback could run; make it
            // spendable again.
            input.gas_provided = input.gas_provided.saturating_add(input.gas_locked);
            input.gas_locked = 0;
        }
        self.state.initial_gas_provided = input.gas_provided;
        self.state.gas_for_execution = input.gas_provided;
    }

    fn use_gas(&self, runtime: &mut dyn Runtime, gas: u64) {
        let used = runtime.points_used().saturating_add(gas);
        runtime.set_points_used(used);
    }

    fn use_gas_bounded(&self, runtime: &mut dyn Runtime, gas: u64) -> Result<()> {
        if self.gas_left(runtime) <= gas {
            return Err(HostError::NotEnoughGas);
        }
        self.use_gas(runtime, gas);
        Ok(())
    }

    fn restore_gas(&self, runtime: &mut dyn Runtime, gas: u64) {
        let used = runtime.points_used();
        if gas <= used {
            runtime.set_points_used(used - gas);
        }
    }

    fn free_gas(&self, output: &mut dyn Output, gas: u64) {
        output.add_refund(gas);
    }

    fn gas_left(&self, runtime: &dyn Runtime) -> u64 {
        self.state
            .gas_for_execution
            .saturating_sub(runtime.points_used())
    }

    fn gas_spent_by_contract(&self, runtime: &dyn Runtime) -> u64 {
        self.state.initial_cost.saturating_add(runtime.points_used())
    }

    fn get_gas_provided(&self) -> u64 {
        self.state.initial_gas_provided
    }

    fn get_sc_prepare_initial_cost(&self) -> u64 {
        self.state.initial_cost
    }

    fn get_gas_for_execution(&self) -> u64 {
        self.state.gas_for_execution
    }

    fn deduct_initial_gas_for_execution(
        &mut self,
        runtime: &dyn Runtime,
        code: &[u8],
    ) -> Result<()> {
        let code_len = code.len() as u64;
        self.deduct_initial_gas(runtime, code_len, self.gas_schedule.execution_cost(code_len))
    }

    fn deduct_initial_gas_for_direct_deployment(
        &mut self,
        runtime: &dyn Runtime,
        code: &[u8],
    ) -> Result<()> {
        let code_len = code.len() as u64;
        self.deduct_initial_gas(
            runtime,
            code_len,
            self.gas_schedule.direct_deployment_cost(code_len),
        )
    }

    fn deduct_initial_gas_for_indirect_deployment(
        &mut self,
        runtime: &dyn Runtime,
        code: &[u8],
    ) -> Result<()> {
        let code_len = code.len() as u64;
        self.deduct_initial_gas(
            runtime,
            code_len,
            self.gas_schedule.indirect_deployment_cost(code_len),
        )
    }

    fn unlock_gas_if_async_step(&mut self, runtime: &dyn Runtime) {
        let input = runtime.vm_input();
        if input.call_type == CallType::AsynchronousCall {
            self.state.gas_for_execution = self
                .state
                .gas_for_execution
                .saturating_add(input.gas_locked);
        }
    }

    fn compute_gas_locked_for_async(&self, runtime: &dyn Runtime) -> u64 {
        let compilation_lock = runtime
            .code_size()
            .saturating_mul(self.gas_schedule.base_operation_cost.aot_prepare_per_byte);
        let execution_lock = self
            .gas_schedule
            .base_ops_api_cost
            .async_call_step
            .saturating_add(self.gas_schedule.base_ops_api_cost.async_callback_gas_lock);
        compilation_lock.saturating_add(execution_lock)
    }

    fn use_gas_for_async_step(&self, runtime: &mut dyn Runtime) -> Result<()> {
        self.use_gas_bounded(runtime, self.gas_schedule.base_ops_api_cost.async_call_step)
    }

    fn update_sc_gas_used(
        &mut self,
        runtime: &dyn Runtime,
        accounts: &BTreeMap<Address, OutputAccount>,
    ) {
        let current = runtime.sc_address().clone();
        let transferred = Self::gas_transferred_by_all(accounts);
        let used_by_others = accounts
            .keys()
            .filter(|address| **address != current)
            .fold(0u64, |acc, address| {
                acc.saturating_add(
                    self.state
                        .gas_used_by_accounts
                        .get(address)
                        .copied()
                        .unwrap_or(0),
                )
            });

        let gas_used = self
            .gas_spent_by_contract(runtime)
            .saturating_sub(transferred)
            .saturating_sub(used_by_others);
        self.state.gas_used_by_accounts.insert(current, gas_used);
    }

    fn update_gas_state_on_success(
        &mut self,
        runtime: &dyn Runtime,
        vm_output: &mut VMOutput,
    ) -> Result<()> {
        self.update_sc_gas_used(runtime, &vm_output.output_accounts);

        for (address, account) in vm_output.output_accounts.iter_mut() {
            if let Some(gas) = self.state.gas_used_by_accounts.get(address) {
                account.gas_used = *gas;
            }
        }
        for address in self.state.gas_used_by_accounts.keys() {
            if !vm_output.output_accounts.contains_key(address) {
                tracing::error!(%address, "gas attributed to an account missing from the output");
                return Err(HostError::InputAndOutputGasDoesNotMatch);
            }
        }

        let accounted = vm_output
            .accounted_gas()
            .saturating_add(vm_output.gas_remaining);
        if accounted != self.state.initial_gas_provided {
            tracing::error!(
                accounted,
                gas_provided = self.state.initial_gas_provided,
                "gas usage mismatch"
            );
            return Err(HostError::InputAndOutputGasDoesNotMatch);
        }
        Ok(())
    }

    fn update_gas_state_on_failure(&self, runtime: &dyn Runtime, output: &mut dyn Output) {
        let address = runtime.sc_address().clone();
        let account = output.get_output_account(&address);
        account.gas_used = account
            .gas_used
            .saturating_add(self.state.initial_gas_provided);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contexts::RuntimeContext;
    use alder_core::{ContractCallInput, VMInput};
    use alder_vm::mock::MockExecutor;
    use std::sync::Arc;

    fn runtime_with_gas(gas_provided: u64) -> RuntimeContext {
        let mut runtime = RuntimeContext::new(Arc::new(MockExecutor::new()), 10);
        let input = ContractCallInput {
            vm_input: VMInput {
                gas_provided,
                ..VMInput::default()
            },
            ..ContractCallInput::default()
        };
        runtime.init_state_from_call_input(&input);
        runtime
    }

    fn metering() -> MeteringContext {
        MeteringContext::new(GasSchedule::default(), 10_000_000_000)
    }

    #[test]
    fn test_gas_left_tracks_points() {
        let mut runtime = runtime_with_gas(10_000);
        let mut metering = metering();
        metering.init_state_from_input(&mut runtime);

        assert_eq!(metering.gas_left(&runtime), 10_000);
        metering.use_gas(&mut runtime, 3_000);
        assert_eq!(metering.gas_left(&runtime), 7_000);
        metering.restore_gas(&mut runtime, 1_000);
        assert_eq!(metering.gas_left(&runtime), 8_000);
    }

    #[test]
    fn test_use_gas_bounded_rejects_exhaustion() {
        let mut runtime = runtime_with_gas(100);
        let mut metering = metering();
        metering.init_state_from_input(&mut runtime);

        assert!(metering.use_gas_bounded(&mut runtime, 50).is_ok());
        let err = metering.use_gas_bounded(&mut runtime, 50).unwrap_err();
        assert_eq!(err, HostError::NotEnoughGas);
    }

    #[test]
    fn test_deduction_equal_to_provided_gas_succeeds() {
        let cost = GasSchedule::default().execution_cost(4);
        let mut runtime = runtime_with_gas(cost);
        let mut metering = metering();
        metering.init_state_from_input(&mut runtime);

        metering
            .deduct_initial_gas_for_execution(&runtime, &[0u8; 4])
            .unwrap();
        assert_eq!(metering.get_gas_for_execution(), 0);
        assert_eq!(metering.get_sc_prepare_initial_cost(), cost);
    }

    #[test]
    fn test_deduction_beyond_provided_gas_fails() {
        let mut runtime = runtime_with_gas(1);
        let mut metering = metering();
        metering.init_state_from_input(&mut runtime);

        let err = metering
            .deduct_initial_gas_for_execution(&runtime, &[0u8; 100])
            .unwrap_err();
        assert_eq!(err, HostError::NotEnoughGas);
    }

    #[test]
    fn test_callback_input_unlocks_gas() {
        let mut runtime = RuntimeContext::new(Arc::new(MockExecutor::new()), 10);
        let input = ContractCallInput {
            vm_input: VMInput {
                gas_provided: 1_000,
                gas_locked: 500,
                call_type: CallType::AsynchronousCallBack,
                ..VMInput::default()
            },
            ..ContractCallInput::default()
        };
        runtime.init_state_from_call_input(&input);

        let mut metering = metering();
        metering.init_state_from_input(&mut runtime);

        assert_eq!(metering.get_gas_provided(), 1_500);
        assert_eq!(runtime.vm_input().gas_locked, 0);
        assert_eq!(runtime.vm_input().gas_provided, 1_500);
    }

    #[test]
    fn test_pop_merge_combines_attribution() {
        let mut runtime = runtime_with_gas(10_000);
        let mut metering = metering();
        metering.init_state_from_input(&mut runtime);

        let account = Address::new([5u8; 32]);
        runtime.set_sc_address(&account);
        metering.use_gas(&mut runtime, 100);
        metering.update_sc_gas_used(&runtime, &BTreeMap::new());
        assert_eq!(metering.state.gas_used_by_accounts[&account], 100);

        metering.push_state();
        metering.init_state_from_input(&mut runtime);
        runtime.set_points_used(40);
        metering.update_sc_gas_used(&runtime, &BTreeMap::new());
        metering.pop_merge_active_state();

        // The frame's attribution is added on top of the parent's, and the
        // parent's scalars are restored.
        assert_eq!(metering.state.gas_used_by_accounts[&account], 140);
        assert_eq!(metering.get_gas_provided(), 10_000);
    }

    #[test]
    fn test_update_gas_state_on_failure_charges_everything() {
        let mut runtime = runtime_with_gas(5_000);
        let mut metering = metering();
        metering.init_state_from_input(&mut runtime);

        let mut output = crate::contexts::OutputContext::new();
        metering.update_gas_state_on_failure(&runtime, &mut output);
        let account = output.get_output_account(&runtime.sc_address().clone());
        assert_eq!(account.gas_used, 5_000);
    }

    #[test]
    fn test_gas_invariant_check() {
        let mut runtime = runtime_with_gas(1_000);
        let mut metering = metering();
        metering.init_state_from_input(&mut runtime);
        metering.use_gas(&mut runtime, 400);

        let address = runtime.sc_address().clone();
        let mut vm_output = VMOutput::default();
        vm_output
            .output_accounts
            .insert(address.clone(), OutputAccount::new(address));
        vm_output.gas_remaining = metering.gas_left(&runtime);

        metering
            .update_gas_state_on_success(&runtime, &mut vm_output)
            .unwrap();
        assert_eq!(
            vm_output.output_accounts.values().next().unwrap().gas_used,
            400
        );

        // Tampering with the remaining gas breaks the invariant.
        vm_output.gas_remaining += 1;
        let err = metering
            .update_gas_state_on_success(&runtime, &mut vm_output)
            .unwrap_err();
        assert_eq!(err, HostError::InputAndOutputGasDoesNotMatch);
    }
}
