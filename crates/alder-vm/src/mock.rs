//! A scriptable engine for tests.
//!
//! `MockExecutor` maps registered bytecodes to `MockContract`s, whose
//! functions are closures over the host-import surface. This is enough to
//! exercise every dispatch path of the host without a real WebAssembly
//! engine: a "contract" stores data, finishes return values, issues
//! sub-calls and registers asynchronous calls exactly as compiled code
//! would, through [`VmHooks`].

use crate::executor::{Executor, Instance, InstanceError};
use crate::hooks::VmHooks;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A guest function body.
pub type MockMethod = Arc<dyn Fn(&mut dyn VmHooks) -> Result<(), InstanceError> + Send + Sync>;

/// A fake contract: a set of exported functions plus a verification
/// outcome.
#[derive(Clone, Default)]
pub struct MockContract {
    functions: BTreeMap<String, MockMethod>,
    verify_error: Option<String>,
}

impl MockContract {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an exported function.
    pub fn with_function(
        mut self,
        name: &str,
        body: impl Fn(&mut dyn VmHooks) -> Result<(), InstanceError> + Send + Sync + 'static,
    ) -> Self {
        self.functions.insert(name.to_string(), Arc::new(body));
        self
    }

    /// Makes code verification fail with the given reason.
    pub fn failing_verification(mut self, reason: &str) -> Self {
        self.verify_error = Some(reason.to_string());
        self
    }
}

/// An instantiated mock contract.
pub struct MockInstance {
    contract: MockContract,
    gas_limit: u64,
}

impl std::fmt::Debug for MockInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockInstance")
            .field("gas_limit", &self.gas_limit)
            .finish()
    }
}

impl MockInstance {
    /// The gas budget this instance was started with.
    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }
}

impl Instance for MockInstance {
    fn verify(&self) -> Result<(), InstanceError> {
        match &self.contract.verify_error {
            Some(reason) => Err(InstanceError::VerificationFailed(reason.clone())),
            None => Ok(()),
        }
    }

    fn has_function(&self, name: &str) -> bool {
        self.contract.functions.contains_key(name)
    }

    fn exported_functions(&self) -> Vec<String> {
        self.contract.functions.keys().cloned().collect()
    }

    fn call(&self, name: &str, hooks: &mut dyn VmHooks) -> Result<(), InstanceError> {
        let function = self
            .contract
            .functions
            .get(name)
            .ok_or_else(|| InstanceError::FunctionNotFound(name.to_string()))?;
        (function.as_ref())(hooks)
    }
}

/// An engine whose "bytecodes" are keys into a contract registry.
#[derive(Default)]
pub struct MockExecutor {
    contracts: Mutex<BTreeMap<Vec<u8>, MockContract>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a contract under the given bytecode bytes.
    pub fn register_contract(&self, code: &[u8], contract: MockContract) {
        self.contracts.lock().insert(code.to_vec(), contract);
    }
}

impl Executor for MockExecutor {
    fn new_instance(
        &self,
        code: &[u8],
        gas_limit: u64,
    ) -> Result<Arc<dyn Instance>, InstanceError> {
        if code.is_empty() {
            return Err(InstanceError::InvalidBytecode);
        }
        let contract = self
            .contracts
            .lock()
            .get(code)
            .cloned()
            .ok_or(InstanceError::InvalidBytecode)?;
        Ok(Arc::new(MockInstance {
            contract,
            gas_limit,
        }))
    }
}
