//! The scoped big-integer handle table.

use crate::contexts::{BigIntPool, StateStack};
use crate::{HostError, Result};
use num_bigint::BigInt;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
struct BigIntState {
    values: BTreeMap<i32, BigInt>,
    next_handle: i32,
}

/// Holds the big integers a contract works with during one execution
/// frame. Sub-calls snapshot the whole table so a child frame starts
/// empty and the parent's handles survive untouched.
#[derive(Debug, Default)]
pub struct BigIntContext {
    state: BigIntState,
    state_stack: Vec<BigIntState>,
}

impl BigIntContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live values in the active table.
    pub fn len(&self) -> usize {
        self.state.values.len()
    }

    /// Whether the active table is empty.
    pub fn is_empty(&self) -> bool {
        self.state.values.is_empty()
    }
}

impl StateStack for BigIntContext {
    fn init_state(&mut self) {
        self.state = BigIntState::default();
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

impl BigIntPool for BigIntContext {
    fn put(&mut self, value: BigInt) -> i32 {
        let handle = self.state.next_handle;
        self.state.next_handle += 1;
        self.state.values.insert(handle, value);
        handle
    }

    fn get(&self, handle: i32) -> Result<BigInt> {
        self.state
            .values
            .get(&handle)
            .cloned()
            .ok_or_else(|| HostError::ExecutionFailed(format!("no big int under handle {handle}")))
    }

    fn set(&mut self, handle: i32, value: BigInt) -> Result<()> {
        match self.state.values.get_mut(&handle) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(HostError::ExecutionFailed(format!(
                "no big int under handle {handle}"
            ))),
        }
    }
}
