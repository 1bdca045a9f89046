//! The output context: the accumulator every execution writes into.

use crate::contexts::{Output, StateStack};
use crate::HostError;
use alder_core::{
    Address, CallType, LogEntry, OutputAccount, OutputTransfer, ReturnCode, StorageUpdate,
    VMOutput,
};
use num_bigint::{BigInt, BigUint};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
struct OutputState {
    return_data: Vec<Vec<u8>>,
    return_code: ReturnCode,
    return_message: String,
    gas_refund: BigUint,
    output_accounts: BTreeMap<Address, OutputAccount>,
    deleted_accounts: Vec<Address>,
    touched_accounts: Vec<Address>,
    logs: Vec<LogEntry>,
}

/// Accumulates return data, logs, transfers and account deltas. On
/// sub-call boundaries the state is snapshotted; a successful isolated
/// sub-call merges its accumulator back into the parent's snapshot, a
/// failed one restores the snapshot untouched.
#[derive(Debug, Default)]
pub struct OutputContext {
    state: OutputState,
    state_stack: Vec<OutputState>,
}

impl OutputContext {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Lays `top` over `base`: account deltas combine, data and logs append,
/// the newer return code and message win.
fn merge_states(mut base: OutputState, top: OutputState) -> OutputState {
    for (address, account) in top.output_accounts {
        match base.output_accounts.entry(address) {
            std::collections::btree_map::Entry::Occupied(mut entry) => {
                merge_accounts(entry.get_mut(), account);
            }
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(account);
            }
        }
    }
    base.return_data.extend(top.return_data);
    base.return_code = top.return_code;
    base.return_message = top.return_message;
    base.gas_refund += top.gas_refund;
    base.deleted_accounts.extend(top.deleted_accounts);
    base.touched_accounts.extend(top.touched_accounts);
    base.logs.extend(top.logs);
    base
}

fn merge_accounts(base: &mut OutputAccount, top: OutputAccount) {
    base.balance_delta += top.balance_delta;
    if top.balance.is_some() {
        base.balance = top.balance;
    }
    if top.nonce.is_some() {
        base.nonce = top.nonce;
    }
    for (key, update) in top.storage_updates {
        base.storage_updates.insert(key, update);
    }
    base.output_transfers.extend(top.output_transfers);
    if top.gas_used > base.gas_used {
        base.gas_used = top.gas_used;
    }
    if top.code.is_some() {
        base.code = top.code;
    }
    if top.code_metadata.is_some() {
        base.code_metadata = top.code_metadata;
    }
}

impl StateStack for OutputContext {
    fn init_state(&mut self) {
        self.state = OutputState::default();
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

impl Output for OutputContext {
    fn pop_merge_active_state(&mut self) {
        let Some(previous) = self.state_stack.pop() else {
            return;
        };
        let current = std::mem::take(&mut self.state);
        self.state = merge_states(previous, current);
    }

    fn censor_vm_output(&mut self) {
        self.state = OutputState::default();
    }

    fn get_output_account(&mut self, address: &Address) -> &mut OutputAccount {
        self.state
            .output_accounts
            .entry(address.clone())
            .or_insert_with(|| OutputAccount::new(address.clone()))
    }

    fn output_accounts(&self) -> &BTreeMap<Address, OutputAccount> {
        &self.state.output_accounts
    }

    fn add_tx_value_to_account(&mut self, address: &Address, value: &BigUint) {
        let account = self.get_output_account(address);
        account.balance_delta += BigInt::from(value.clone());
    }

    fn transfer(
        &mut self,
        destination: &Address,
        sender: &Address,
        gas_limit: u64,
        gas_locked: u64,
        value: &BigUint,
        data: &[u8],
        call_type: CallType,
    ) {
        let destination_account = self.get_output_account(destination);
        destination_account.balance_delta += BigInt::from(value.clone());
        destination_account.output_transfers.push(OutputTransfer {
            value: value.clone(),
            gas_limit,
            gas_locked,
            data: data.to_vec(),
            call_type,
            sender_address: sender.clone(),
        });

        let sender_account = self.get_output_account(sender);
        sender_account.balance_delta -= BigInt::from(value.clone());
    }

    fn deploy_code(&mut self, address: &Address, code: &[u8], code_metadata: &[u8]) {
        let account = self.get_output_account(address);
        account.code = Some(code.to_vec());
        account.code_metadata = Some(code_metadata.to_vec());
    }

    fn finish(&mut self, data: &[u8]) {
        self.state.return_data.push(data.to_vec());
    }

    fn return_data(&self) -> &[Vec<u8>] {
        &self.state.return_data
    }

    fn write_log(&mut self, address: &Address, topics: &[Vec<u8>], data: &[u8]) {
        self.state.logs.push(LogEntry {
            identifier: topics.first().cloned().unwrap_or_default(),
            address: address.clone(),
            topics: topics.to_vec(),
            data: data.to_vec(),
        });
    }

    fn set_return_code(&mut self, code: ReturnCode) {
        self.state.return_code = code;
    }

    fn return_code(&self) -> ReturnCode {
        self.state.return_code
    }

    fn set_return_message(&mut self, message: &str) {
        self.state.return_message = message.to_string();
    }

    fn return_message(&self) -> &str {
        &self.state.return_message
    }

    fn add_refund(&mut self, gas: u64) {
        self.state.gas_refund += BigUint::from(gas);
    }

    fn get_vm_output(&self, gas_remaining: u64) -> VMOutput {
        VMOutput {
            return_data: self.state.return_data.clone(),
            return_code: self.state.return_code,
            return_message: self.state.return_message.clone(),
            gas_remaining,
            gas_refund: self.state.gas_refund.clone(),
            output_accounts: self.state.output_accounts.clone(),
            deleted_accounts: self.state.deleted_accounts.clone(),
            touched_accounts: self.state.touched_accounts.clone(),
            logs: self.state.logs.clone(),
        }
    }

    fn create_vm_output_in_case_of_error(&self, error: &HostError) -> VMOutput {
        VMOutput {
            return_code: error.return_code(),
            return_message: error.to_string(),
            gas_remaining: 0,
            output_accounts: self.state.output_accounts.clone(),
            ..VMOutput::default()
        }
    }

    fn add_to_active_state(&mut self, vm_output: VMOutput) {
        let incoming = OutputState {
            return_data: vm_output.return_data,
            return_code: vm_output.return_code,
            return_message: vm_output.return_message,
            gas_refund: vm_output.gas_refund,
            output_accounts: vm_output.output_accounts,
            deleted_accounts: vm_output.deleted_accounts,
            touched_accounts: vm_output.touched_accounts,
            logs: vm_output.logs,
        };
        let current = std::mem::take(&mut self.state);
        self.state = merge_states(current, incoming);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::new([byte; 32])
    }

    #[test]
    fn test_transfer_moves_value_between_deltas() {
        let mut output = OutputContext::new();
        let from = addr(1);
        let to = addr(2);
        output.transfer(&to, &from, 100, 20, &BigUint::from(40u32), b"hi", CallType::Direct);

        let to_account = &output.output_accounts()[&to];
        assert_eq!(to_account.balance_delta, BigInt::from(40));
        assert_eq!(to_account.output_transfers.len(), 1);
        assert_eq!(to_account.output_transfers[0].gas_limit, 100);
        assert_eq!(to_account.output_transfers[0].gas_locked, 20);
        assert_eq!(to_account.output_transfers[0].sender_address, from);

        let from_account = &output.output_accounts()[&from];
        assert_eq!(from_account.balance_delta, BigInt::from(-40));
    }

    #[test]
    fn test_censor_blanks_everything() {
        let mut output = OutputContext::new();
        output.finish(b"data");
        output.set_return_code(ReturnCode::UserError);
        output.set_return_message("bad");
        output.add_tx_value_to_account(&addr(1), &BigUint::from(5u32));

        output.censor_vm_output();
        let vm_output = output.get_vm_output(0);
        assert!(vm_output.return_data.is_empty());
        assert_eq!(vm_output.return_code, ReturnCode::Ok);
        assert!(vm_output.return_message.is_empty());
        assert!(vm_output.output_accounts.is_empty());
    }

    #[test]
    fn test_pop_set_active_rolls_back() {
        let mut output = OutputContext::new();
        output.finish(b"parent");

        output.push_state();
        output.censor_vm_output();
        output.finish(b"child");
        output.add_tx_value_to_account(&addr(9), &BigUint::from(1u32));

        output.pop_set_active_state();
        assert_eq!(output.return_data(), &[b"parent".to_vec()]);
        assert!(output.output_accounts().is_empty());
    }

    #[test]
    fn test_pop_merge_absorbs_child_into_parent() {
        let mut output = OutputContext::new();
        output.finish(b"parent");
        output.add_tx_value_to_account(&addr(1), &BigUint::from(10u32));

        output.push_state();
        output.censor_vm_output();
        output.finish(b"child");
        output.add_tx_value_to_account(&addr(1), &BigUint::from(5u32));
        output.transfer(
            &addr(2),
            &addr(1),
            0,
            0,
            &BigUint::from(3u32),
            &[],
            CallType::Direct,
        );

        output.pop_merge_active_state();
        assert_eq!(
            output.return_data(),
            &[b"parent".to_vec(), b"child".to_vec()]
        );
        // 10 from the parent frame, +5 then -3 from the child.
        assert_eq!(
            output.output_accounts()[&addr(1)].balance_delta,
            BigInt::from(12)
        );
        assert_eq!(
            output.output_accounts()[&addr(2)].balance_delta,
            BigInt::from(3)
        );
        assert_eq!(output.state_stack_len(), 0);
    }

    #[test]
    fn test_storage_updates_overlay_on_merge() {
        let mut output = OutputContext::new();
        let account = addr(3);
        output
            .get_output_account(&account)
            .storage_updates
            .insert(
                b"k".to_vec(),
                StorageUpdate {
                    offset: b"k".to_vec(),
                    data: b"old".to_vec(),
                },
            );

        output.push_state();
        output
            .get_output_account(&account)
            .storage_updates
            .insert(
                b"k".to_vec(),
                StorageUpdate {
                    offset: b"k".to_vec(),
                    data: b"new".to_vec(),
                },
            );

        output.pop_merge_active_state();
        assert_eq!(
            output.output_accounts()[&account].storage_updates[b"k".as_slice()].data,
            b"new".to_vec()
        );
    }

    #[test]
    fn test_error_output_has_zero_gas_remaining() {
        let output = OutputContext::new();
        let vm_output =
            output.create_vm_output_in_case_of_error(&HostError::SignalError("oops".to_string()));
        assert_eq!(vm_output.return_code, ReturnCode::UserError);
        assert_eq!(vm_output.return_message, "oops");
        assert_eq!(vm_output.gas_remaining, 0);
    }

    #[test]
    fn test_add_to_active_state_merges_builtin_output() {
        let mut output = OutputContext::new();
        output.finish(b"before");

        let mut builtin = VMOutput::default();
        builtin.return_data.push(b"builtin".to_vec());
        builtin
            .output_accounts
            .insert(addr(7), OutputAccount::new(addr(7)));
        output.add_to_active_state(builtin);

        assert_eq!(
            output.return_data(),
            &[b"before".to_vec(), b"builtin".to_vec()]
        );
        assert!(output.output_accounts().contains_key(&addr(7)));
    }
}
