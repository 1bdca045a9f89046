//! Shared fixtures for the host integration suites: an in-memory world
//! behind the blockchain hook, and builders for hosts and inputs.

// Each integration binary uses a different slice of these helpers.
#![allow(dead_code)]

use alder_core::{
    Address, BlockchainHook, ContractCallInput, ContractCreateInput, DefaultCryptoHook,
    HookError, VMInput, VMOutput,
};
use alder_host::{HostParameters, VmHost};
use alder_vm::mock::MockExecutor;
use num_bigint::BigUint;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub type BuiltinHandler =
    Box<dyn Fn(&ContractCallInput) -> Result<VMOutput, HookError> + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct AccountState {
    pub nonce: u64,
    pub code: Vec<u8>,
    pub storage: BTreeMap<Vec<u8>, Vec<u8>>,
}

#[derive(Default)]
struct WorldState {
    accounts: BTreeMap<Address, AccountState>,
    snapshots: Vec<BTreeMap<Address, AccountState>>,
}

/// An in-memory blockchain: accounts, code, committed storage and
/// clone-based snapshots.
#[derive(Default)]
pub struct MockWorld {
    state: Mutex<WorldState>,
    builtin_handler: Mutex<Option<BuiltinHandler>>,
}

impl MockWorld {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_account(&self, address: &Address, code: &[u8]) {
        self.state.lock().accounts.insert(
            address.clone(),
            AccountState {
                code: code.to_vec(),
                ..AccountState::default()
            },
        );
    }

    pub fn set_storage(&self, address: &Address, key: &[u8], value: &[u8]) {
        let mut state = self.state.lock();
        let account = state.accounts.entry(address.clone()).or_default();
        account.storage.insert(key.to_vec(), value.to_vec());
    }

    pub fn committed_storage(&self, address: &Address, key: &[u8]) -> Vec<u8> {
        self.state
            .lock()
            .accounts
            .get(address)
            .and_then(|account| account.storage.get(key).cloned())
            .unwrap_or_default()
    }

    pub fn nonce(&self, address: &Address) -> u64 {
        self.state
            .lock()
            .accounts
            .get(address)
            .map(|account| account.nonce)
            .unwrap_or(0)
    }

    pub fn set_builtin_handler(&self, handler: BuiltinHandler) {
        *self.builtin_handler.lock() = Some(handler);
    }

    /// The address `new_address` will derive for this creator right now.
    pub fn next_address_for(&self, creator: &Address) -> Address {
        derive_address(creator, self.nonce(creator))
    }

    /// Commits a dispatch output: deployed code, nonces and storage
    /// updates become world state for the next dispatch.
    pub fn apply_vm_output(&self, vm_output: &VMOutput) {
        let mut state = self.state.lock();
        for (address, delta) in &vm_output.output_accounts {
            let account = state.accounts.entry(address.clone()).or_default();
            if let Some(code) = &delta.code {
                account.code = code.clone();
            }
            if let Some(nonce) = delta.nonce {
                account.nonce = nonce;
            }
            for (key, update) in &delta.storage_updates {
                if update.data.is_empty() {
                    account.storage.remove(key);
                } else {
                    account.storage.insert(key.clone(), update.data.clone());
                }
            }
        }
    }
}

fn derive_address(creator: &Address, nonce: u64) -> Address {
    use alder_core::CryptoHook;
    let mut data = creator.to_vec();
    data.extend_from_slice(&nonce.to_be_bytes());
    Address::new(DefaultCryptoHook.keccak256(&data))
}

impl BlockchainHook for MockWorld {
    fn new_address(&self, creator: &Address) -> Result<Address, HookError> {
        Ok(self.next_address_for(creator))
    }

    fn get_code(&self, address: &Address) -> Result<Vec<u8>, HookError> {
        let state = self.state.lock();
        match state.accounts.get(address) {
            Some(account) if !account.code.is_empty() => Ok(account.code.clone()),
            Some(_) => Err(HookError::CodeNotFound),
            None => Err(HookError::AccountNotFound),
        }
    }

    fn get_storage_data(&self, address: &Address, key: &[u8]) -> Result<Vec<u8>, HookError> {
        Ok(self
            .state
            .lock()
            .accounts
            .get(address)
            .and_then(|account| account.storage.get(key).cloned())
            .unwrap_or_default())
    }

    fn increase_nonce(&self, address: &Address) {
        let mut state = self.state.lock();
        state.accounts.entry(address.clone()).or_default().nonce += 1;
    }

    fn process_built_in_function(&self, input: &ContractCallInput) -> Result<VMOutput, HookError> {
        match self.builtin_handler.lock().as_ref() {
            Some(handler) => handler(input),
            None => Err(HookError::BuiltInFunctionFailed(format!(
                "no handler for '{}'",
                input.function
            ))),
        }
    }

    fn get_snapshot(&self) -> u32 {
        let mut state = self.state.lock();
        let snapshot = state.accounts.clone();
        state.snapshots.push(snapshot);
        (state.snapshots.len() - 1) as u32
    }

    fn revert_to_snapshot(&self, snapshot: u32) {
        let mut state = self.state.lock();
        let index = snapshot as usize;
        if index < state.snapshots.len() {
            state.accounts = state.snapshots[index].clone();
            state.snapshots.truncate(index);
        }
    }
}

pub fn addr(byte: u8) -> Address {
    Address::new([byte; 32])
}

pub fn make_host(world: Arc<MockWorld>, executor: Arc<MockExecutor>) -> VmHost {
    VmHost::new(
        world,
        Arc::new(DefaultCryptoHook),
        executor,
        HostParameters::default(),
    )
}

pub fn make_host_with_builtins(
    world: Arc<MockWorld>,
    executor: Arc<MockExecutor>,
    builtins: &[&str],
) -> VmHost {
    let parameters = HostParameters {
        builtin_functions: builtins
            .iter()
            .map(|name| name.to_string())
            .collect::<BTreeSet<_>>(),
        ..HostParameters::default()
    };
    VmHost::new(world, Arc::new(DefaultCryptoHook), executor, parameters)
}

pub fn call_input(
    caller: &Address,
    recipient: &Address,
    function: &str,
    gas_provided: u64,
) -> ContractCallInput {
    ContractCallInput {
        vm_input: VMInput {
            caller_addr: caller.clone(),
            gas_provided,
            original_tx_hash: b"tx-hash-original".to_vec(),
            current_tx_hash: b"tx-hash-current".to_vec(),
            ..VMInput::default()
        },
        recipient_addr: recipient.clone(),
        function: function.to_string(),
    }
}

pub fn create_input(caller: &Address, code: &[u8], gas_provided: u64) -> ContractCreateInput {
    ContractCreateInput {
        vm_input: VMInput {
            caller_addr: caller.clone(),
            gas_provided,
            original_tx_hash: b"tx-hash-original".to_vec(),
            current_tx_hash: b"tx-hash-current".to_vec(),
            ..VMInput::default()
        },
        contract_code: code.to_vec(),
        contract_code_metadata: vec![0x01, 0x00],
    }
}

pub fn with_value(mut input: ContractCallInput, value: u64) -> ContractCallInput {
    input.vm_input.call_value = BigUint::from(value);
    input
}

/// Checks the dispatch-level gas conservation: what went in either sits on
/// an account, rides a transfer, or comes back.
pub fn assert_gas_invariant(gas_provided: u64, vm_output: &VMOutput) {
    assert_eq!(
        vm_output
            .accounted_gas()
            .checked_add(vm_output.gas_remaining)
            .expect("gas accounting overflow"),
        gas_provided,
        "gas invariant violated: accounts + transfers + remaining != provided"
    );
}

/// The storage key the pending async set is persisted under.
pub fn async_storage_key(original_tx_hash: &[u8]) -> Vec<u8> {
    use alder_core::CryptoHook;
    let mut data = b"asyncCalls".to_vec();
    data.extend_from_slice(original_tx_hash);
    DefaultCryptoHook.keccak256(&data).to_vec()
}
