//! The executor and instance traits any bytecode engine must satisfy.

use crate::hooks::VmHooks;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InstanceError {
    /// The bytecode could not be compiled into an instance.
    #[error("invalid contract bytecode")]
    InvalidBytecode,

    /// Post-compilation verification rejected the contract.
    #[error("contract code verification failed: {0}")]
    VerificationFailed(String),

    /// The requested export does not exist.
    #[error("function '{0}' not found in contract")]
    FunctionNotFound(String),

    /// A host import stopped execution; the runtime breakpoint value holds
    /// the actual condition.
    #[error("execution stopped by host breakpoint")]
    Breakpoint,

    /// The engine trapped while running guest code.
    #[error("runtime trap: {0}")]
    Trap(String),
}

/// A compiled, ready-to-run contract instance.
///
/// Calls take `&self`: engines that need mutable internals keep them behind
/// interior mutability, which lets the host hold a shared handle to the
/// active instance while the guest re-enters the host through [`VmHooks`].
pub trait Instance: Send + Sync + std::fmt::Debug {
    /// Engine-side contract verification: forbidden imports, section and
    /// size caps. Run once per deployment.
    fn verify(&self) -> Result<(), InstanceError>;

    /// Whether the contract exports a function named `name`.
    fn has_function(&self, name: &str) -> bool;

    /// Names of all exported functions.
    fn exported_functions(&self) -> Vec<String>;

    /// Runs the exported function `name`. Host imports invoked by the
    /// guest are dispatched through `hooks`.
    fn call(&self, name: &str, hooks: &mut dyn VmHooks) -> Result<(), InstanceError>;
}

/// Compiles bytecode into instances.
pub trait Executor: Send + Sync {
    /// Compiles `code` into a fresh instance with the given gas budget.
    fn new_instance(&self, code: &[u8], gas_limit: u64)
        -> Result<Arc<dyn Instance>, InstanceError>;
}
