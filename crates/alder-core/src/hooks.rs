//! Hooks through which the host reaches the world outside the VM.
//!
//! The blockchain hook is the only window onto chain state: account code,
//! committed storage, nonces and protocol built-in functions. The crypto
//! hook supplies the hash primitives the host needs for storage keys and
//! the Ethereum-compatible call-data shim.

use crate::{Address, ContractCallInput, VMOutput};
use sha2::Digest;
use thiserror::Error;

/// Errors surfaced by hook implementations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HookError {
    #[error("account not found")]
    AccountNotFound,

    #[error("no code under account")]
    CodeNotFound,

    #[error("built-in function failed: {0}")]
    BuiltInFunctionFailed(String),

    #[error("{0}")]
    Other(String),
}

/// Access to blockchain state. Implementations are shared between the
/// contexts of one host, so all methods take `&self`; mutation is interior.
pub trait BlockchainHook: Send + Sync {
    /// Derives the address for a contract deployed by `creator`.
    fn new_address(&self, creator: &Address) -> Result<Address, HookError>;

    /// Returns the code of the contract at `address`.
    fn get_code(&self, address: &Address) -> Result<Vec<u8>, HookError>;

    /// Reads committed (pre-dispatch) storage of `address` under `key`.
    /// A missing entry reads as empty.
    fn get_storage_data(&self, address: &Address, key: &[u8]) -> Result<Vec<u8>, HookError>;

    /// Increments the nonce of `address`.
    fn increase_nonce(&self, address: &Address);

    /// Runs a protocol built-in function and returns its output.
    fn process_built_in_function(&self, input: &ContractCallInput) -> Result<VMOutput, HookError>;

    /// Takes a snapshot of the hook's mutable state.
    fn get_snapshot(&self) -> u32;

    /// Reverts the hook's mutable state to an earlier snapshot.
    fn revert_to_snapshot(&self, snapshot: u32);
}

/// Hash primitives used by the host.
pub trait CryptoHook: Send + Sync {
    fn keccak256(&self, data: &[u8]) -> [u8; 32];
    fn sha256(&self, data: &[u8]) -> [u8; 32];
}

/// The stock crypto hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCryptoHook;

impl CryptoHook for DefaultCryptoHook {
    fn keccak256(&self, data: &[u8]) -> [u8; 32] {
        let mut hasher = sha3::Keccak256::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    fn sha256(&self, data: &[u8]) -> [u8; 32] {
        let mut hasher = sha2::Sha256::new();
        hasher.update(data);
        hasher.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak256_known_vector() {
        let crypto = DefaultCryptoHook;
        // Keccak-256 of the empty input.
        assert_eq!(
            hex::encode(crypto.keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_sha256_known_vector() {
        let crypto = DefaultCryptoHook;
        assert_eq!(
            hex::encode(crypto.sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
