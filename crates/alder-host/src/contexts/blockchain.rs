//! The blockchain context: chain state behind a snapshot stack.

use crate::contexts::{Blockchain, StateStack};
use crate::{HostError, Result};
use alder_core::{Address, BlockchainHook, ContractCallInput, HookError, VMOutput};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Wraps the blockchain hook with per-dispatch code caching and
/// snapshot-based rollback. Hook-side mutations (nonce bumps) are undone
/// by reverting to the snapshot taken when the state was pushed.
pub struct BlockchainContext {
    hook: Arc<dyn BlockchainHook>,
    code_cache: BTreeMap<Address, Vec<u8>>,
    snapshot_stack: Vec<u32>,
}

impl BlockchainContext {
    pub fn new(hook: Arc<dyn BlockchainHook>) -> Self {
        Self {
            hook,
            code_cache: BTreeMap::new(),
            snapshot_stack: Vec::new(),
        }
    }
}

impl StateStack for BlockchainContext {
    fn init_state(&mut self) {
        self.code_cache.clear();
    }

    fn push_state(&mut self) {
        self.snapshot_stack.push(self.hook.get_snapshot());
    }

    fn pop_set_active_state(&mut self) {
        if let Some(snapshot) = self.snapshot_stack.pop() {
            self.hook.revert_to_snapshot(snapshot);
        }
    }

    fn pop_discard(&mut self) {
        self.snapshot_stack.pop();
    }

    fn clear_state_stack(&mut self) {
        self.snapshot_stack.clear();
    }

    fn state_stack_len(&self) -> usize {
        self.snapshot_stack.len()
    }
}

impl Blockchain for BlockchainContext {
    fn new_address(&mut self, creator: &Address) -> Result<Address> {
        self.hook.new_address(creator).map_err(HostError::from)
    }

    fn get_code(&mut self, address: &Address) -> Result<Vec<u8>> {
        if let Some(code) = self.code_cache.get(address) {
            return Ok(code.clone());
        }
        let code = match self.hook.get_code(address) {
            Ok(code) if !code.is_empty() => code,
            Ok(_) | Err(HookError::AccountNotFound) | Err(HookError::CodeNotFound) => {
                return Err(HostError::ContractNotFound)
            }
            Err(other) => return Err(HostError::from(other)),
        };
        self.code_cache.insert(address.clone(), code.clone());
        Ok(code)
    }

    fn get_storage_data(&self, address: &Address, key: &[u8]) -> Result<Vec<u8>> {
        self.hook
            .get_storage_data(address, key)
            .map_err(HostError::from)
    }

    fn increase_nonce(&mut self, address: &Address) {
        self.hook.increase_nonce(address);
    }

    fn process_built_in_function(&self, input: &ContractCallInput) -> Result<VMOutput> {
        self.hook
            .process_built_in_function(input)
            .map_err(HostError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CountingHook {
        code_fetches: Mutex<u32>,
        snapshots: Mutex<Vec<u32>>,
        reverted_to: Mutex<Option<u32>>,
    }

    impl BlockchainHook for CountingHook {
        fn new_address(&self, _creator: &Address) -> std::result::Result<Address, HookError> {
            Ok(Address::new([0xcc; 32]))
        }

        fn get_code(&self, address: &Address) -> std::result::Result<Vec<u8>, HookError> {
            *self.code_fetches.lock() += 1;
            if address.is_zero() {
                return Err(HookError::CodeNotFound);
            }
            Ok(b"code".to_vec())
        }

        fn get_storage_data(
            &self,
            _address: &Address,
            _key: &[u8],
        ) -> std::result::Result<Vec<u8>, HookError> {
            Ok(Vec::new())
        }

        fn increase_nonce(&self, _address: &Address) {}

        fn process_built_in_function(
            &self,
            _input: &ContractCallInput,
        ) -> std::result::Result<VMOutput, HookError> {
            Err(HookError::BuiltInFunctionFailed("none registered".to_string()))
        }

        fn get_snapshot(&self) -> u32 {
            let mut snapshots = self.snapshots.lock();
            let id = snapshots.len() as u32;
            snapshots.push(id);
            id
        }

        fn revert_to_snapshot(&self, snapshot: u32) {
            *self.reverted_to.lock() = Some(snapshot);
        }
    }

    #[test]
    fn test_code_is_cached_per_dispatch() {
        let hook = Arc::new(CountingHook::default());
        let mut context = BlockchainContext::new(hook.clone());
        let address = Address::new([1u8; 32]);

        context.get_code(&address).unwrap();
        context.get_code(&address).unwrap();
        assert_eq!(*hook.code_fetches.lock(), 1);

        context.init_state();
        context.get_code(&address).unwrap();
        assert_eq!(*hook.code_fetches.lock(), 2);
    }

    #[test]
    fn test_missing_code_is_contract_not_found() {
        let mut context = BlockchainContext::new(Arc::new(CountingHook::default()));
        let err = context.get_code(&Address::zero()).unwrap_err();
        assert_eq!(err, HostError::ContractNotFound);
    }

    #[test]
    fn test_pop_set_active_reverts_hook() {
        let hook = Arc::new(CountingHook::default());
        let mut context = BlockchainContext::new(hook.clone());

        context.push_state();
        context.push_state();
        assert_eq!(context.state_stack_len(), 2);

        context.pop_set_active_state();
        assert_eq!(*hook.reverted_to.lock(), Some(1));

        context.pop_discard();
        // Discard forgets the snapshot without reverting.
        assert_eq!(*hook.reverted_to.lock(), Some(1));
        assert_eq!(context.state_stack_len(), 0);
    }
}
