//! The runtime context: the current execution frame and the engine
//! instance stack.

use crate::contexts::{Runtime, StateStack};
use crate::registry::HostContextId;
use crate::{HostError, Result};
use alder_core::{
    Address, AsyncContextInfo, AsyncGeneratedCall, ContractCallInput, VMInput,
};
use alder_vm::{BreakpointValue, Executor, Instance};
use std::sync::Arc;

/// The active engine instance together with the per-instance execution
/// state: gas points burned so far, the code size behind it and the
/// breakpoint raised by host imports, if any.
#[derive(Clone, Default)]
struct InstanceFrame {
    instance: Option<Arc<dyn Instance>>,
    points_used: u64,
    code_size: u64,
    breakpoint: BreakpointValue,
}

#[derive(Clone, Default)]
struct RuntimeSnapshot {
    vm_input: VMInput,
    sc_address: Address,
    call_function: String,
    custom_call_function: String,
    read_only: bool,
    async_context_info: AsyncContextInfo,
}

/// Owns the VM input, the contract address, the async bookkeeping and the
/// engine instances of one dispatch. The frame state stack and the
/// instance stack move independently: sub-calls snapshot the frame, while
/// nested executions on different bytecode push instances.
pub struct RuntimeContext {
    executor: Arc<dyn Executor>,
    max_instances: usize,

    vm_input: VMInput,
    sc_address: Address,
    call_function: String,
    custom_call_function: String,
    read_only: bool,
    async_context_info: AsyncContextInfo,
    instance_context_id: Option<HostContextId>,

    frame: InstanceFrame,
    instance_stack: Vec<InstanceFrame>,
    state_stack: Vec<RuntimeSnapshot>,
}

impl RuntimeContext {
    pub fn new(executor: Arc<dyn Executor>, max_instances: usize) -> Self {
        Self {
            executor,
            max_instances,
            vm_input: VMInput::default(),
            sc_address: Address::zero(),
            call_function: String::new(),
            custom_call_function: String::new(),
            read_only: false,
            async_context_info: AsyncContextInfo::default(),
            instance_context_id: None,
            frame: InstanceFrame::default(),
            instance_stack: Vec::new(),
            state_stack: Vec::new(),
        }
    }

    fn snapshot(&self) -> RuntimeSnapshot {
        RuntimeSnapshot {
            vm_input: self.vm_input.clone(),
            sc_address: self.sc_address.clone(),
            call_function: self.call_function.clone(),
            custom_call_function: self.custom_call_function.clone(),
            read_only: self.read_only,
            async_context_info: self.async_context_info.clone(),
        }
    }

    fn restore(&mut self, snapshot: RuntimeSnapshot) {
        self.vm_input = snapshot.vm_input;
        self.sc_address = snapshot.sc_address;
        self.call_function = snapshot.call_function;
        self.custom_call_function = snapshot.custom_call_function;
        self.read_only = snapshot.read_only;
        self.async_context_info = snapshot.async_context_info;
    }
}

impl StateStack for RuntimeContext {
    fn init_state(&mut self) {
        self.vm_input = VMInput::default();
        self.sc_address = Address::zero();
        self.call_function = String::new();
        self.custom_call_function = String::new();
        self.read_only = false;
        self.async_context_info = AsyncContextInfo::default();
        self.instance_context_id = None;
    }

    fn push_state(&mut self) {
        let snapshot = self.snapshot();
        self.state_stack.push(snapshot);
    }

    fn pop_set_active_state(&mut self) {
        if let Some(snapshot) = self.state_stack.pop() {
            self.restore(snapshot);
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

impl Runtime for RuntimeContext {
    fn init_state_from_call_input(&mut self, input: &ContractCallInput) {
        self.vm_input = input.vm_input.clone();
        self.sc_address = input.recipient_addr.clone();
        self.call_function = input.function.clone();
        self.custom_call_function = String::new();
        self.async_context_info = AsyncContextInfo::new(input.vm_input.caller_addr.clone());
    }

    fn set_vm_input(&mut self, input: &VMInput) {
        self.vm_input = input.clone();
        self.custom_call_function = String::new();
        self.async_context_info = AsyncContextInfo::new(input.caller_addr.clone());
    }

    fn vm_input(&self) -> &VMInput {
        &self.vm_input
    }

    fn vm_input_mut(&mut self) -> &mut VMInput {
        &mut self.vm_input
    }

    fn sc_address(&self) -> &Address {
        &self.sc_address
    }

    fn set_sc_address(&mut self, address: &Address) {
        self.sc_address = address.clone();
    }

    fn function(&self) -> &str {
        &self.call_function
    }

    fn set_custom_call_function(&mut self, function: &str) {
        self.custom_call_function = function.to_string();
    }

    fn arguments(&self) -> &[Vec<u8>] {
        &self.vm_input.arguments
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    fn get_code_upgrade_from_args(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let arguments = &self.vm_input.arguments;
        if arguments.len() < 2 {
            return Err(HostError::InvalidUpgradeArguments);
        }
        Ok((arguments[0].clone(), arguments[1].clone()))
    }

    fn original_tx_hash(&self) -> &[u8] {
        &self.vm_input.original_tx_hash
    }

    fn async_context_info(&self) -> &AsyncContextInfo {
        &self.async_context_info
    }

    fn set_async_context_info(&mut self, info: AsyncContextInfo) {
        self.async_context_info = info;
    }

    fn add_async_call(
        &mut self,
        context_identifier: &str,
        call: AsyncGeneratedCall,
    ) -> Result<()> {
        let context = self
            .async_context_info
            .async_context_map
            .entry(context_identifier.to_string())
            .or_default();

        let total_percentage: u64 = context
            .async_calls
            .iter()
            .map(|existing| existing.gas_percentage)
            .sum::<u64>()
            .saturating_add(call.gas_percentage);
        if total_percentage > 100 {
            return Err(HostError::GasPercentageExceeded);
        }

        context.async_calls.push(call);
        Ok(())
    }

    fn breakpoint_value(&self) -> BreakpointValue {
        self.frame.breakpoint
    }

    fn set_breakpoint_value(&mut self, value: BreakpointValue) {
        self.frame.breakpoint = value;
    }

    fn points_used(&self) -> u64 {
        self.frame.points_used
    }

    fn set_points_used(&mut self, points: u64) {
        self.frame.points_used = points;
    }

    fn code_size(&self) -> u64 {
        self.frame.code_size
    }

    fn start_instance(&mut self, code: &[u8], gas_limit: u64) -> Result<()> {
        let instance = self
            .executor
            .new_instance(code, gas_limit)
            .map_err(HostError::from)?;
        self.frame = InstanceFrame {
            instance: Some(instance),
            points_used: 0,
            code_size: code.len() as u64,
            breakpoint: BreakpointValue::None,
        };
        Ok(())
    }

    fn push_instance(&mut self) -> Result<()> {
        if self.instance_stack.len() >= self.max_instances {
            return Err(HostError::MaxInstancesReached);
        }
        self.instance_stack.push(self.frame.clone());
        Ok(())
    }

    fn pop_instance(&mut self) {
        if let Some(previous) = self.instance_stack.pop() {
            self.frame = previous;
        }
    }

    fn instance_stack_len(&self) -> usize {
        self.instance_stack.len()
    }

    fn instance(&self) -> Result<Arc<dyn Instance>> {
        self.frame
            .instance
            .clone()
            .ok_or_else(|| HostError::ExecutionFailed("no active engine instance".to_string()))
    }

    fn clean_instance(&mut self) {
        self.frame = InstanceFrame::default();
    }

    fn verify_contract_code(&self) -> Result<()> {
        self.instance()?.verify().map_err(HostError::from)
    }

    fn get_function_to_call(&self) -> Result<String> {
        let name = if self.custom_call_function.is_empty() {
            self.call_function.as_str()
        } else {
            self.custom_call_function.as_str()
        };
        if self.has_function(name) {
            Ok(name.to_string())
        } else {
            Err(HostError::FuncNotFound)
        }
    }

    fn has_function(&self, name: &str) -> bool {
        self.frame
            .instance
            .as_ref()
            .map(|instance| instance.has_function(name))
            .unwrap_or(false)
    }

    fn set_instance_context_id(&mut self, id: HostContextId) {
        self.instance_context_id = Some(id);
    }

    fn instance_context_id(&self) -> Option<HostContextId> {
        self.instance_context_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alder_vm::mock::{MockContract, MockExecutor};

    fn executor_with(code: &[u8], contract: MockContract) -> Arc<MockExecutor> {
        let executor = Arc::new(MockExecutor::new());
        executor.register_contract(code, contract);
        executor
    }

    fn call_input(function: &str) -> ContractCallInput {
        ContractCallInput {
            vm_input: VMInput {
                caller_addr: Address::new([1u8; 32]),
                gas_provided: 1_000,
                ..VMInput::default()
            },
            recipient_addr: Address::new([2u8; 32]),
            function: function.to_string(),
        }
    }

    #[test]
    fn test_init_state_resets_everything() {
        let mut runtime = RuntimeContext::new(Arc::new(MockExecutor::new()), 10);
        runtime.init_state_from_call_input(&call_input("do"));
        runtime.set_read_only(true);
        runtime.set_custom_call_function("other");

        runtime.init_state();
        assert_eq!(runtime.vm_input(), &VMInput::default());
        assert_eq!(runtime.sc_address(), &Address::zero());
        assert_eq!(runtime.function(), "");
        assert!(!runtime.read_only());
        assert!(runtime.async_context_info().is_empty());
    }

    #[test]
    fn test_init_from_call_input_binds_async_initiator() {
        let mut runtime = RuntimeContext::new(Arc::new(MockExecutor::new()), 10);
        let input = call_input("do");
        runtime.init_state_from_call_input(&input);
        assert_eq!(
            runtime.async_context_info().async_initiator.caller_addr,
            input.vm_input.caller_addr
        );
        assert_eq!(runtime.sc_address(), &input.recipient_addr);
        assert_eq!(runtime.function(), "do");
    }

    #[test]
    fn test_push_pop_state_roundtrip() {
        let mut runtime = RuntimeContext::new(Arc::new(MockExecutor::new()), 10);
        runtime.init_state_from_call_input(&call_input("outer"));

        runtime.push_state();
        runtime.init_state_from_call_input(&call_input("inner"));
        assert_eq!(runtime.function(), "inner");

        runtime.pop_set_active_state();
        assert_eq!(runtime.function(), "outer");
        assert_eq!(runtime.state_stack_len(), 0);
    }

    #[test]
    fn test_start_instance_resets_points_and_breakpoint() {
        let executor = executor_with(b"code", MockContract::new().with_function("f", |_| Ok(())));
        let mut runtime = RuntimeContext::new(executor, 10);
        runtime.set_points_used(55);
        runtime.set_breakpoint_value(BreakpointValue::SignalError);

        runtime.start_instance(b"code", 1_000).unwrap();
        assert_eq!(runtime.points_used(), 0);
        assert_eq!(runtime.breakpoint_value(), BreakpointValue::None);
        assert_eq!(runtime.code_size(), 4);
        assert!(runtime.has_function("f"));
    }

    #[test]
    fn test_invalid_code_fails_start() {
        let mut runtime = RuntimeContext::new(Arc::new(MockExecutor::new()), 10);
        let err = runtime.start_instance(b"", 1_000).unwrap_err();
        assert_eq!(err, HostError::ContractInvalid);
    }

    #[test]
    fn test_instance_stack_preserves_points() {
        let executor = executor_with(b"code", MockContract::new());
        let mut runtime = RuntimeContext::new(executor, 10);
        runtime.start_instance(b"code", 1_000).unwrap();
        runtime.set_points_used(300);

        runtime.push_instance().unwrap();
        runtime.start_instance(b"code", 500).unwrap();
        assert_eq!(runtime.points_used(), 0);
        runtime.set_points_used(120);

        runtime.pop_instance();
        assert_eq!(runtime.points_used(), 300);
        assert_eq!(runtime.instance_stack_len(), 0);
    }

    #[test]
    fn test_instance_stack_depth_limit() {
        let executor = executor_with(b"code", MockContract::new());
        let mut runtime = RuntimeContext::new(executor, 1);
        runtime.start_instance(b"code", 1_000).unwrap();
        runtime.push_instance().unwrap();
        assert_eq!(
            runtime.push_instance().unwrap_err(),
            HostError::MaxInstancesReached
        );
    }

    #[test]
    fn test_function_resolution() {
        let executor = executor_with(
            b"code",
            MockContract::new()
                .with_function("run", |_| Ok(()))
                .with_function("onDone", |_| Ok(())),
        );
        let mut runtime = RuntimeContext::new(executor, 10);
        runtime.init_state_from_call_input(&call_input("run"));
        runtime.start_instance(b"code", 1_000).unwrap();
        assert_eq!(runtime.get_function_to_call().unwrap(), "run");

        runtime.set_custom_call_function("onDone");
        assert_eq!(runtime.get_function_to_call().unwrap(), "onDone");

        runtime.set_custom_call_function("missing");
        assert_eq!(
            runtime.get_function_to_call().unwrap_err(),
            HostError::FuncNotFound
        );
    }

    #[test]
    fn test_upgrade_args_extraction() {
        let mut runtime = RuntimeContext::new(Arc::new(MockExecutor::new()), 10);
        let mut input = call_input("upgradeContract");
        input.vm_input.arguments = vec![b"new code".to_vec(), b"meta".to_vec()];
        runtime.init_state_from_call_input(&input);

        let (code, metadata) = runtime.get_code_upgrade_from_args().unwrap();
        assert_eq!(code, b"new code".to_vec());
        assert_eq!(metadata, b"meta".to_vec());

        input.vm_input.arguments = vec![b"only code".to_vec()];
        runtime.init_state_from_call_input(&input);
        assert_eq!(
            runtime.get_code_upgrade_from_args().unwrap_err(),
            HostError::InvalidUpgradeArguments
        );
    }

    #[test]
    fn test_async_percentage_validation() {
        let mut runtime = RuntimeContext::new(Arc::new(MockExecutor::new()), 10);
        runtime.init_state_from_call_input(&call_input("go"));

        let call = |percentage| AsyncGeneratedCall {
            gas_percentage: percentage,
            ..AsyncGeneratedCall::default()
        };
        runtime.add_async_call("ctx", call(60)).unwrap();
        runtime.add_async_call("ctx", call(40)).unwrap();
        assert_eq!(
            runtime.add_async_call("ctx", call(1)).unwrap_err(),
            HostError::GasPercentageExceeded
        );
        // A different context has its own budget.
        runtime.add_async_call("other", call(100)).unwrap();
    }
}
