//! Full replay through `Simulator` + `RevmEngine` against canned chain data.

use alloy_primitives::{Address, Bytes, B256, U256};
use retrace_core::{CallKind, SimulationRequest, StateOverrides, Trace, TracerError};
use retrace_provider::testing::StubClient;
use retrace_provider::{snapshot, RemoteTransaction};
use retrace_simulator::{render_trace, RevmEngine, Simulator};

const A: Address = Address::new([0xaa; 20]);
const B: Address = Address::new([0xbb; 20]);
const C: Address = Address::new([0xcc; 20]);
const TX: B256 = B256::new([0x42; 32]);

/// STATICCALL C with no args, drop the status, STOP.
fn caller_code() -> Bytes {
    let mut code = vec![0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x73];
    code.extend_from_slice(C.as_slice());
    code.extend_from_slice(&[0x5a, 0xfa, 0x50, 0x00]);
    Bytes::from(code)
}

/// PUSH1 0 PUSH1 0 REVERT
fn reverting_code() -> Bytes {
    Bytes::from_static(&[0x60, 0x00, 0x60, 0x00, 0xfd])
}

fn transaction(to: Address, value: u64) -> RemoteTransaction {
    RemoteTransaction {
        hash: TX,
        from: A,
        to: Some(to),
        block_number: Some(20_000_000),
        gas: 100_000,
        gas_price: U256::ZERO,
        value: U256::from(value),
        input: Bytes::from_static(&[0xab, 0xcd, 0xef]),
    }
}

#[tokio::test]
async fn nested_reverting_staticcall() {
    let client = StubClient::new()
        .with_transaction(transaction(B, 0))
        .with_code(B, caller_code());
    let mut db = snapshot::empty();
    snapshot::insert_account(&mut db, C, U256::ZERO, reverting_code());

    let sim = Simulator::new(client, RevmEngine);
    let result = sim
        .simulate(SimulationRequest::new(1, TX), &db, None)
        .await
        .unwrap();

    // Estimation is unavailable on the stub; the tx limit is used.
    assert_eq!(result.gas_limit, 100_000);
    assert!(result.gas_used > 21_000);

    let trace: Trace = serde_json::from_slice(&result.trace).unwrap();
    assert_eq!(trace.len(), 1);

    let root = &trace[0];
    assert_eq!(root.enter.call_type, CallKind::Call);
    assert_eq!((root.enter.from, root.enter.to), (A, B));
    assert_eq!(root.enter.depth, 0);
    assert_eq!(root.enter.input, Bytes::from_static(&[0xab, 0xcd, 0xef]));
    assert!(root.is_sealed());
    assert!(!root.is_reverted());
    assert_eq!(root.opcodes.last().map(|op| op.opcode.as_str()), Some("STOP"));
    assert!(root.opcodes.iter().any(|op| op.opcode == "STATICCALL"));

    assert_eq!(root.children.len(), 1);
    let child = &root.children[0];
    assert_eq!(child.enter.call_type, CallKind::StaticCall);
    assert_eq!((child.enter.from, child.enter.to), (B, C));
    assert_eq!(child.enter.depth, 1);
    assert!(child.is_reverted());
    assert_eq!(child.opcodes.len(), 3);
    assert!(child.opcodes.iter().all(|op| op.depth == 1));
    assert_eq!(child.opcodes[0].scope.address, C);
    assert_eq!(child.opcodes[0].scope.caller, B);

    let text = render_trace(&trace);
    assert_eq!(text.lines().count(), 2);
    assert!(text.lines().nth(1).unwrap().starts_with("  STATICCALL"));
}

#[tokio::test]
async fn top_level_revert_returns_partial_trace() {
    let client = StubClient::new()
        .with_transaction(transaction(C, 0))
        .with_code(C, reverting_code());

    let sim = Simulator::new(client, RevmEngine);
    let err = sim
        .simulate(SimulationRequest::new(1, TX), &snapshot::empty(), None)
        .await
        .unwrap_err();

    assert!(matches!(err, TracerError::Execution { .. }));
    let trace: Trace = serde_json::from_slice(err.partial_trace().unwrap()).unwrap();
    assert_eq!(trace.len(), 1);
    assert!(trace[0].is_reverted());
    assert_eq!(trace[0].opcodes.len(), 3);
}

#[tokio::test]
async fn value_transfer_uses_remote_balance() {
    let client = StubClient::new()
        .with_transaction(transaction(B, 1_000))
        .with_code(B, Bytes::from_static(&[0x00]))
        .with_balance(A, U256::from(1_000_000));

    let sim = Simulator::new(client, RevmEngine);
    let result = sim
        .simulate(SimulationRequest::new(1, TX), &snapshot::empty(), None)
        .await
        .unwrap();

    assert_eq!(sim.client().balance_calls(), 1);
    let trace: Trace = serde_json::from_slice(&result.trace).unwrap();
    assert_eq!(trace[0].enter.value, U256::from(1_000));
}

#[tokio::test]
async fn overrides_replace_callee_code() {
    let client = StubClient::new()
        .with_transaction(transaction(B, 0))
        .with_code(B, caller_code());
    let mut db = snapshot::empty();
    snapshot::insert_account(&mut db, C, U256::ZERO, reverting_code());

    let mut overrides = StateOverrides::default();
    overrides.codes.insert(C, Bytes::from_static(&[0x00]));

    let sim = Simulator::new(client, RevmEngine);
    let result = sim
        .simulate(SimulationRequest::new(1, TX), &db, Some(&overrides))
        .await
        .unwrap();

    let trace: Trace = serde_json::from_slice(&result.trace).unwrap();
    assert!(!trace[0].children[0].is_reverted());
    assert_eq!(trace[0].children[0].opcodes.len(), 1);
}

#[tokio::test]
async fn fetched_storage_is_visible_to_sload() {
    // PUSH1 7 SLOAD PUSH1 0 MSTORE PUSH1 32 PUSH1 0 RETURN
    let code = Bytes::from_static(&[
        0x60, 0x07, 0x54, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3,
    ]);
    let client = StubClient::new()
        .with_transaction(transaction(B, 0))
        .with_code(B, code)
        .with_storage(B, U256::from(7), U256::from(1234));

    let sim = Simulator::new(client, RevmEngine);
    let result = sim
        .simulate_with_storage(
            SimulationRequest::new(1, TX),
            &snapshot::empty(),
            &[(B, U256::from(7))],
            StateOverrides::default(),
        )
        .await
        .unwrap();

    assert_eq!(U256::from_be_slice(&result.returned_data), U256::from(1234));
}
