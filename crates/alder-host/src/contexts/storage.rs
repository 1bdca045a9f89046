//! The storage context: typed access to the current contract's storage.

use crate::contexts::{Output, Runtime, StateStack, Storage};
use crate::{HostError, Result, PROTECTED_KEY_PREFIX};
use alder_core::{Address, BlockchainHook, StorageUpdate};
use std::sync::Arc;

/// Outcome of a storage write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageStatus {
    /// The stored value did not change.
    Unchanged = 0,
    /// A new entry was created.
    Added = 1,
    /// An existing entry was overwritten.
    Modified = 2,
    /// An existing entry was removed.
    Deleted = 3,
}

impl StorageStatus {
    /// Numeric form returned through the host-import surface.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Reads and writes the storage of the contract bound to the current
/// frame. Reads overlay the staged updates of the output accumulator over
/// committed chain state; writes stage new updates. The snapshot stack
/// carries only the bound address — the staged data itself lives in the
/// output context and rolls back with it.
pub struct StorageContext {
    hook: Arc<dyn BlockchainHook>,
    address: Address,
    address_stack: Vec<Address>,
}

impl StorageContext {
    pub fn new(hook: Arc<dyn BlockchainHook>) -> Self {
        Self {
            hook,
            address: Address::zero(),
            address_stack: Vec::new(),
        }
    }

    fn stage_update(
        &self,
        output: &mut dyn Output,
        key: &[u8],
        value: &[u8],
    ) -> StorageStatus {
        let old_value = self.get_storage_impl(output, key);
        let status = match (old_value.is_empty(), value.is_empty()) {
            _ if old_value == value => StorageStatus::Unchanged,
            (true, false) => StorageStatus::Added,
            (false, true) => StorageStatus::Deleted,
            _ => StorageStatus::Modified,
        };
        if status == StorageStatus::Unchanged {
            return status;
        }

        let account = output.get_output_account(&self.address);
        account.storage_updates.insert(
            key.to_vec(),
            StorageUpdate {
                offset: key.to_vec(),
                data: value.to_vec(),
            },
        );
        status
    }

    fn get_storage_impl(&self, output: &dyn Output, key: &[u8]) -> Vec<u8> {
        if let Some(account) = output.output_accounts().get(&self.address) {
            if let Some(update) = account.storage_updates.get(key) {
                return update.data.clone();
            }
        }
        self.hook
            .get_storage_data(&self.address, key)
            .unwrap_or_default()
    }
}

impl StateStack for StorageContext {
    fn init_state(&mut self) {
        self.address = Address::zero();
    }

    fn push_state(&mut self) {
        self.address_stack.push(self.address.clone());
    }

    fn pop_set_active_state(&mut self) {
        if let Some(previous) = self.address_stack.pop() {
            self.address = previous;
        }
    }

    fn pop_discard(&mut self) {
        self.address_stack.pop();
    }

    fn clear_state_stack(&mut self) {
        self.address_stack.clear();
    }

    fn state_stack_len(&self) -> usize {
        self.address_stack.len()
    }
}

impl Storage for StorageContext {
    fn set_address(&mut self, address: &Address) {
        self.address = address.clone();
    }

    fn address(&self) -> &Address {
        &self.address
    }

    fn get_storage(&self, output: &dyn Output, key: &[u8]) -> Vec<u8> {
        self.get_storage_impl(output, key)
    }

    fn set_storage(
        &mut self,
        runtime: &dyn Runtime,
        output: &mut dyn Output,
        key: &[u8],
        value: &[u8],
    ) -> Result<StorageStatus> {
        if runtime.read_only() {
            return Err(HostError::InvalidCallOnReadOnlyMode);
        }
        if key.starts_with(PROTECTED_KEY_PREFIX) {
            return Err(HostError::StorageReservedKey(hex::encode(key)));
        }
        Ok(self.stage_update(output, key, value))
    }

    fn set_protected_storage(
        &mut self,
        output: &mut dyn Output,
        key: &[u8],
        value: &[u8],
    ) -> Result<StorageStatus> {
        Ok(self.stage_update(output, key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contexts::{OutputContext, RuntimeContext};
    use alder_core::{ContractCallInput, HookError};
    use alder_vm::mock::MockExecutor;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct StorageOnlyHook {
        committed: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
    }

    impl BlockchainHook for StorageOnlyHook {
        fn new_address(&self, _creator: &Address) -> std::result::Result<Address, HookError> {
            Err(HookError::Other("unsupported".to_string()))
        }

        fn get_code(&self, _address: &Address) -> std::result::Result<Vec<u8>, HookError> {
            Err(HookError::CodeNotFound)
        }

        fn get_storage_data(
            &self,
            _address: &Address,
            key: &[u8],
        ) -> std::result::Result<Vec<u8>, HookError> {
            Ok(self.committed.lock().get(key).cloned().unwrap_or_default())
        }

        fn increase_nonce(&self, _address: &Address) {}

        fn process_built_in_function(
            &self,
            _input: &ContractCallInput,
        ) -> std::result::Result<alder_core::VMOutput, HookError> {
            Err(HookError::BuiltInFunctionFailed("none".to_string()))
        }

        fn get_snapshot(&self) -> u32 {
            0
        }

        fn revert_to_snapshot(&self, _snapshot: u32) {}
    }

    fn fixture() -> (StorageContext, OutputContext, RuntimeContext) {
        let hook = Arc::new(StorageOnlyHook::default());
        let mut storage = StorageContext::new(hook);
        storage.set_address(&Address::new([8u8; 32]));
        let runtime = RuntimeContext::new(Arc::new(MockExecutor::new()), 10);
        (storage, OutputContext::new(), runtime)
    }

    #[test]
    fn test_write_then_read_back() {
        let (mut storage, mut output, runtime) = fixture();
        let status = storage
            .set_storage(&runtime, &mut output, b"counter", b"\x01")
            .unwrap();
        assert_eq!(status, StorageStatus::Added);
        assert_eq!(storage.get_storage(&output, b"counter"), b"\x01".to_vec());

        let status = storage
            .set_storage(&runtime, &mut output, b"counter", b"\x02")
            .unwrap();
        assert_eq!(status, StorageStatus::Modified);

        let status = storage
            .set_storage(&runtime, &mut output, b"counter", b"\x02")
            .unwrap();
        assert_eq!(status, StorageStatus::Unchanged);

        let status = storage
            .set_storage(&runtime, &mut output, b"counter", b"")
            .unwrap();
        assert_eq!(status, StorageStatus::Deleted);
    }

    #[test]
    fn test_committed_state_is_the_fallback() {
        let hook = Arc::new(StorageOnlyHook::default());
        hook.committed
            .lock()
            .insert(b"existing".to_vec(), b"value".to_vec());
        let mut storage = StorageContext::new(hook);
        storage.set_address(&Address::new([8u8; 32]));
        let output = OutputContext::new();

        assert_eq!(storage.get_storage(&output, b"existing"), b"value".to_vec());
        assert!(storage.get_storage(&output, b"missing").is_empty());
    }

    #[test]
    fn test_read_only_frame_rejects_writes() {
        let (mut storage, mut output, mut runtime) = fixture();
        runtime.set_read_only(true);
        let err = storage
            .set_storage(&runtime, &mut output, b"k", b"v")
            .unwrap_err();
        assert_eq!(err, HostError::InvalidCallOnReadOnlyMode);
    }

    #[test]
    fn test_reserved_prefix_is_guest_unwritable() {
        let (mut storage, mut output, runtime) = fixture();
        let mut key = PROTECTED_KEY_PREFIX.to_vec();
        key.extend_from_slice(b"internal");

        assert!(matches!(
            storage.set_storage(&runtime, &mut output, &key, b"v"),
            Err(HostError::StorageReservedKey(_))
        ));
        // The host-side path can write it.
        assert_eq!(
            storage
                .set_protected_storage(&mut output, &key, b"v")
                .unwrap(),
            StorageStatus::Added
        );
    }

    #[test]
    fn test_address_stack() {
        let (mut storage, _output, _runtime) = fixture();
        let first = storage.address().clone();
        storage.push_state();
        storage.set_address(&Address::new([9u8; 32]));
        storage.pop_set_active_state();
        assert_eq!(storage.address(), &first);
    }
}
