//! Gas schedule configuration for the Alder VM host.
//!
//! The host charges gas for two kinds of work: byte-proportional base
//! operations (compiling code, copying data, persisting storage) and
//! fixed-cost host API operations. Both tables are plain serde structs so
//! that node operators can override them from configuration files; the
//! defaults here are the production values.

use serde::Deserialize;

/// Costs proportional to the amount of data being processed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct BaseOperationCost {
    /// Cost per byte written to contract storage.
    pub store_per_byte: u64,
    /// Cost per byte copied between guest and host memory.
    pub data_copy_per_byte: u64,
    /// Cost per byte of bytecode compiled on direct or indirect deployment.
    pub compile_per_byte: u64,
    /// Cost per byte of bytecode prepared for execution of an already
    /// deployed contract.
    pub aot_prepare_per_byte: u64,
    /// Base cost of fetching contract code from the blockchain.
    pub get_code: u64,
    /// Cost per byte persisted across dispatches.
    pub persist_per_byte: u64,
}

impl Default for BaseOperationCost {
    fn default() -> Self {
        Self {
            store_per_byte: 1_000,
            data_copy_per_byte: 50,
            compile_per_byte: 300,
            aot_prepare_per_byte: 100,
            get_code: 500,
            persist_per_byte: 1_000,
        }
    }
}

/// Fixed costs of the host API operations exposed to contracts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct BaseOpsApiCost {
    /// Base cost of deploying a contract from a transaction.
    pub create_contract: u64,
    /// Cost of a plain value transfer.
    pub transfer_value: u64,
    /// Base cost of a storage write, on top of the per-byte cost.
    pub storage_store: u64,
    /// Cost of a storage read.
    pub storage_load: u64,
    /// Base cost of appending return data.
    pub finish: u64,
    /// Cost of emitting a log entry.
    pub log: u64,
    /// Cost of signalling a user error.
    pub signal_error: u64,
    /// Cost of reading one call argument.
    pub get_argument: u64,
    /// Cost charged for each step of the asynchronous call protocol.
    pub async_call_step: u64,
    /// Gas reserved so an asynchronous callback can always run.
    pub async_callback_gas_lock: u64,
    /// Cost of registering an asynchronous call.
    pub create_async_call: u64,
}

impl Default for BaseOpsApiCost {
    fn default() -> Self {
        Self {
            create_contract: 50_000,
            transfer_value: 2_000,
            storage_store: 7_500,
            storage_load: 3_500,
            finish: 1_500,
            log: 2_500,
            signal_error: 1_500,
            get_argument: 100,
            async_call_step: 10_000,
            async_callback_gas_lock: 100_000,
            create_async_call: 20_000,
        }
    }
}

/// The complete gas schedule consumed by the metering context.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct GasSchedule {
    pub base_operation_cost: BaseOperationCost,
    pub base_ops_api_cost: BaseOpsApiCost,
}

impl GasSchedule {
    /// Initial gas for deploying a contract directly from a transaction:
    /// a fixed creation cost plus a per-byte compilation cost.
    pub fn direct_deployment_cost(&self, code_len: u64) -> u64 {
        self.base_ops_api_cost
            .create_contract
            .saturating_add(code_len.saturating_mul(self.base_operation_cost.compile_per_byte))
    }

    /// Initial gas for deploying a contract from inside another contract.
    /// Only the compilation is charged; the creation cost was already paid
    /// by the outer transaction.
    pub fn indirect_deployment_cost(&self, code_len: u64) -> u64 {
        code_len.saturating_mul(self.base_operation_cost.compile_per_byte)
    }

    /// Initial gas for executing an already deployed contract.
    pub fn execution_cost(&self, code_len: u64) -> u64 {
        self.base_operation_cost
            .get_code
            .saturating_add(code_len.saturating_mul(self.base_operation_cost.aot_prepare_per_byte))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule_is_non_zero() {
        let schedule = GasSchedule::default();
        assert!(schedule.base_operation_cost.compile_per_byte > 0);
        assert!(schedule.base_operation_cost.aot_prepare_per_byte > 0);
        assert!(schedule.base_ops_api_cost.create_contract > 0);
        assert!(schedule.base_ops_api_cost.async_callback_gas_lock > 0);
    }

    #[test]
    fn test_deployment_costs() {
        let schedule = GasSchedule::default();
        assert_eq!(
            schedule.direct_deployment_cost(100),
            50_000 + 100 * schedule.base_operation_cost.compile_per_byte
        );
        assert_eq!(
            schedule.indirect_deployment_cost(100),
            100 * schedule.base_operation_cost.compile_per_byte
        );
        assert_eq!(
            schedule.execution_cost(0),
            schedule.base_operation_cost.get_code
        );
    }

    #[test]
    fn test_costs_saturate_instead_of_overflowing() {
        let schedule = GasSchedule::default();
        assert_eq!(schedule.direct_deployment_cost(u64::MAX), u64::MAX);
        assert_eq!(schedule.execution_cost(u64::MAX), u64::MAX);
    }

    #[test]
    fn test_deserialize_partial_override() {
        let schedule: GasSchedule = serde_json::from_str(
            r#"{"BaseOperationCost": {"CompilePerByte": 42}}"#,
        )
        .unwrap();
        assert_eq!(schedule.base_operation_cost.compile_per_byte, 42);
        // Untouched fields keep their defaults.
        assert_eq!(
            schedule.base_ops_api_cost.create_contract,
            BaseOpsApiCost::default().create_contract
        );
    }
}
