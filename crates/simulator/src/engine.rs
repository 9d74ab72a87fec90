//! Execution engine seam and its revm implementation.
//!
//! The orchestrator only sees [`ExecutionEngine`]; [`RevmEngine`] runs the
//! transaction on revm against a write overlay of the local snapshot, with
//! the tracer attached through [`HookInspector`].

use crate::inspector::HookInspector;
use crate::tracer::ExecutionHooks;
use alloy_primitives::{Address, Bytes, U256};
use retrace_core::StateOverrides;
use retrace_provider::{snapshot, LocalSnapshot};
use revm::context::result::ExecutionResult;
use revm::context::{Context, TxEnv};
use revm::database::CacheDB;
use revm::state::{AccountInfo, Bytecode};
use thiserror::Error;

/// Block timestamp used when the caller does not override it.
pub const DEFAULT_BLOCK_TIMESTAMP: u64 = 1_723_484_999;

/// Block base fee (wei) used when the caller does not override it.
pub const DEFAULT_BASE_FEE: u64 = 3_310_633_170;

/// Engine-level settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub debug: bool,
    pub origin: Address,
    /// `None` runs at block zero.
    pub block_number: Option<u64>,
    pub gas_limit: u64,
    pub gas_price: U256,
    pub value: U256,
    pub chain_id: u64,
    pub timestamp: u64,
    pub base_fee: u64,
}

/// Everything the engine needs besides the snapshot and the hooks.
#[derive(Debug, Clone)]
pub struct ExecutionRequest<'a> {
    /// `None` deploys `input` as init code.
    pub recipient: Option<Address>,
    /// Installed on the origin account when present.
    pub starting_balance: Option<U256>,
    /// Installed on the recipient when present.
    pub code: Option<&'a Bytes>,
    pub input: &'a Bytes,
    pub config: EngineConfig,
    pub overrides: Option<&'a StateOverrides>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutput {
    pub returned_data: Bytes,
    pub gas_used: u64,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid transaction environment: {0}")]
    InvalidEnv(String),

    #[error("state setup failed: {0}")]
    State(String),

    #[error("execution reverted (gas used {gas_used}, output {output})")]
    Reverted { output: Bytes, gas_used: u64 },

    #[error("execution halted: {reason} (gas used {gas_used})")]
    Halted { reason: String, gas_used: u64 },

    #[error("evm error: {0}")]
    Evm(String),
}

/// Executes bytecode and calls back into the hooks in program order.
pub trait ExecutionEngine {
    fn execute(
        &self,
        request: &ExecutionRequest<'_>,
        snapshot: &LocalSnapshot,
        hooks: &mut dyn ExecutionHooks,
    ) -> Result<ExecutionOutput, EngineError>;
}

/// revm-backed engine. Validation that would stop a historical replay
/// (nonce, balance, base fee, block gas limit, EIP-3607) is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct RevmEngine;

type Overlay<'a> = CacheDB<&'a LocalSnapshot>;

/// Reads an account through the overlay, edits it, and writes it back.
fn patch_account(
    db: &mut Overlay<'_>,
    base: &LocalSnapshot,
    address: Address,
    edit: impl FnOnce(&mut AccountInfo),
) {
    let mut info = db
        .cache
        .accounts
        .get(&address)
        .map(|account| account.info.clone())
        .or_else(|| snapshot::account_info(base, address).cloned())
        .unwrap_or_default();
    edit(&mut info);
    db.insert_account_info(address, info);
}

fn set_code(info: &mut AccountInfo, code: &Bytes) {
    let bytecode = Bytecode::new_raw(code.clone());
    info.code_hash = bytecode.hash_slow();
    info.code = Some(bytecode);
}

fn prepare_state<'a>(
    request: &ExecutionRequest<'_>,
    base: &'a LocalSnapshot,
) -> Result<Overlay<'a>, EngineError> {
    let mut db = CacheDB::new(base);

    if let (Some(recipient), Some(code)) = (request.recipient, request.code) {
        patch_account(&mut db, base, recipient, |info| set_code(info, code));
    }

    if let Some(balance) = request.starting_balance {
        patch_account(&mut db, base, request.config.origin, |info| {
            info.balance = balance;
        });
    }

    if let Some(overrides) = request.overrides {
        for (address, code) in &overrides.codes {
            patch_account(&mut db, base, *address, |info| set_code(info, code));
        }
        for (address, balance) in &overrides.balances {
            patch_account(&mut db, base, *address, |info| info.balance = *balance);
        }
        for (address, slots) in &overrides.storage {
            for (slot, value) in slots {
                db.insert_account_storage(*address, *slot, *value)
                    .map_err(|e| EngineError::State(format!("{address} slot {slot}: {e:?}")))?;
            }
        }
    }

    Ok(db)
}

impl ExecutionEngine for RevmEngine {
    fn execute(
        &self,
        request: &ExecutionRequest<'_>,
        snapshot: &LocalSnapshot,
        hooks: &mut dyn ExecutionHooks,
    ) -> Result<ExecutionOutput, EngineError> {
        use revm::handler::{MainBuilder, MainContext};
        use revm::inspector::InspectEvm;
        use revm::primitives::TxKind;

        let cfg = &request.config;

        let tx_env = TxEnv::builder()
            .caller(cfg.origin)
            .kind(match request.recipient {
                Some(addr) => TxKind::Call(addr),
                None => TxKind::Create,
            })
            .data(request.input.clone())
            .value(cfg.value)
            .gas_limit(cfg.gas_limit)
            .gas_price(cfg.gas_price.saturating_to::<u128>())
            .chain_id(Some(cfg.chain_id))
            .build()
            .map_err(|e| EngineError::InvalidEnv(format!("{e:?}")))?;

        let db = prepare_state(request, snapshot)?;

        let mut ctx = Context::mainnet()
            .with_db(db)
            .with_tx(TxEnv::default()); // placeholder, overwritten by inspect_one_tx

        ctx.cfg.chain_id = cfg.chain_id;
        ctx.cfg.disable_nonce_check = true;
        ctx.cfg.disable_balance_check = true;
        ctx.cfg.disable_block_gas_limit = true;
        ctx.cfg.disable_base_fee = true;
        ctx.cfg.disable_eip3607 = true;

        ctx.block.number = U256::from(cfg.block_number.unwrap_or_default());
        ctx.block.timestamp = U256::from(cfg.timestamp);
        ctx.block.basefee = cfg.base_fee;

        let mut evm = ctx.build_mainnet_with_inspector(HookInspector::new(hooks));
        let result = evm.inspect_one_tx(tx_env);

        if cfg.debug {
            tracing::debug!(
                origin = %cfg.origin,
                recipient = ?request.recipient,
                gas_limit = cfg.gas_limit,
                ok = result.as_ref().is_ok_and(|r| r.is_success()),
                "evm execution finished"
            );
        }

        match result {
            Ok(res) => {
                let gas_used = res.gas_used();
                let output = res.output().cloned().unwrap_or_default();
                match res {
                    ExecutionResult::Success { .. } => Ok(ExecutionOutput {
                        returned_data: output,
                        gas_used,
                    }),
                    ExecutionResult::Revert { .. } => {
                        Err(EngineError::Reverted { output, gas_used })
                    }
                    ExecutionResult::Halt { reason, .. } => Err(EngineError::Halted {
                        reason: format!("{reason:?}"),
                        gas_used,
                    }),
                }
            }
            Err(e) => Err(EngineError::Evm(format!("{e:?}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::CallTreeTracer;

    fn config(origin: Address) -> EngineConfig {
        EngineConfig {
            debug: false,
            origin,
            block_number: Some(1_000),
            gas_limit: 1_000_000,
            gas_price: U256::ZERO,
            value: U256::ZERO,
            chain_id: 1,
            timestamp: DEFAULT_BLOCK_TIMESTAMP,
            base_fee: DEFAULT_BASE_FEE,
        }
    }

    #[test]
    fn stop_contract_succeeds_with_one_frame() {
        let origin = Address::new([0x0a; 20]);
        let target = Address::new([0x0b; 20]);
        let code = Bytes::from_static(&[0x00]); // STOP
        let input = Bytes::new();
        let db = snapshot::empty();
        let mut tracer = CallTreeTracer::new();

        let request = ExecutionRequest {
            recipient: Some(target),
            starting_balance: None,
            code: Some(&code),
            input: &input,
            config: config(origin),
            overrides: None,
        };
        let out = RevmEngine.execute(&request, &db, &mut tracer).unwrap();

        assert!(out.returned_data.is_empty());
        assert!(out.gas_used >= 21_000);
        let trace = tracer.to_trace();
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].enter.to, target);
        assert_eq!(trace[0].opcodes.len(), 1);
        assert_eq!(trace[0].opcodes[0].opcode, "STOP");
        assert!(trace[0].is_sealed());
    }

    #[test]
    fn reverting_contract_is_an_error_with_trace() {
        let origin = Address::new([0x0a; 20]);
        let target = Address::new([0x0b; 20]);
        // PUSH1 0 PUSH1 0 REVERT
        let code = Bytes::from_static(&[0x60, 0x00, 0x60, 0x00, 0xfd]);
        let input = Bytes::new();
        let db = snapshot::empty();
        let mut tracer = CallTreeTracer::new();

        let request = ExecutionRequest {
            recipient: Some(target),
            starting_balance: None,
            code: Some(&code),
            input: &input,
            config: config(origin),
            overrides: None,
        };
        let err = RevmEngine.execute(&request, &db, &mut tracer).unwrap_err();

        assert!(matches!(err, EngineError::Reverted { .. }));
        let trace = tracer.to_trace();
        assert!(trace[0].is_reverted());
        assert_eq!(trace[0].opcodes.len(), 3);
        assert_eq!(trace[0].opcodes[2].opcode, "REVERT");
        // Stack before REVERT: two zero words.
        assert_eq!(trace[0].opcodes[2].stack, vec!["0x0", "0x0"]);
    }

    #[test]
    fn halted_child_consumes_forwarded_gas() {
        let origin = Address::new([0x0a; 20]);
        let target = Address::new([0x0b; 20]);
        let callee = Address::new([0x0c; 20]);
        // CALL callee with 50_000 gas and no args, drop status, STOP.
        let mut code = vec![0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x73];
        code.extend_from_slice(callee.as_slice());
        code.extend_from_slice(&[0x61, 0xc3, 0x50, 0xf1, 0x50, 0x00]);
        let code = Bytes::from(code);
        let input = Bytes::new();
        let db = snapshot::empty();
        let mut overrides = StateOverrides::default();
        overrides.codes.insert(callee, Bytes::from_static(&[0xfe]));
        let mut tracer = CallTreeTracer::new();

        let request = ExecutionRequest {
            recipient: Some(target),
            starting_balance: None,
            code: Some(&code),
            input: &input,
            config: config(origin),
            overrides: Some(&overrides),
        };
        RevmEngine.execute(&request, &db, &mut tracer).unwrap();

        let trace = tracer.to_trace();
        assert!(!trace[0].is_reverted());
        let child = &trace[0].children[0];
        assert_eq!(child.enter.to, callee);
        assert_eq!(child.enter.gas, 50_000);
        let exit = child.exit.as_ref().unwrap();
        assert!(exit.reverted);
        assert!(exit.error.is_some());
        assert_eq!(exit.gas_used, 50_000);
    }

    #[test]
    fn halted_top_level_frame_consumes_all_gas() {
        let origin = Address::new([0x0a; 20]);
        let target = Address::new([0x0b; 20]);
        let code = Bytes::from_static(&[0xfe]);
        let input = Bytes::new();
        let db = snapshot::empty();
        let mut tracer = CallTreeTracer::new();

        let request = ExecutionRequest {
            recipient: Some(target),
            starting_balance: None,
            code: Some(&code),
            input: &input,
            config: config(origin),
            overrides: None,
        };
        let err = RevmEngine.execute(&request, &db, &mut tracer).unwrap_err();

        assert!(matches!(err, EngineError::Halted { .. }));
        let trace = tracer.to_trace();
        let exit = trace[0].exit.as_ref().unwrap();
        assert!(exit.reverted);
        assert!(exit.gas_used > 0);
        assert_eq!(exit.gas_used, trace[0].enter.gas);
    }

    #[test]
    fn overrides_install_storage() {
        let origin = Address::new([0x0a; 20]);
        let target = Address::new([0x0b; 20]);
        // PUSH1 0 SLOAD PUSH1 0 MSTORE PUSH1 32 PUSH1 0 RETURN
        let code = Bytes::from_static(&[
            0x60, 0x00, 0x54, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3,
        ]);
        let input = Bytes::new();
        let db = snapshot::empty();
        let mut overrides = StateOverrides::default();
        overrides
            .storage
            .entry(target)
            .or_default()
            .insert(U256::ZERO, U256::from(42));
        let mut tracer = CallTreeTracer::new();

        let request = ExecutionRequest {
            recipient: Some(target),
            starting_balance: None,
            code: Some(&code),
            input: &input,
            config: config(origin),
            overrides: Some(&overrides),
        };
        let out = RevmEngine.execute(&request, &db, &mut tracer).unwrap();

        assert_eq!(U256::from_be_slice(&out.returned_data), U256::from(42));
    }
}
