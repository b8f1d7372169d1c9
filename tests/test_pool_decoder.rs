//! Integration tests for pool state decoding
//!
//! Tests cover:
//! - Schema dispatch by record count (30 vs 34)
//! - Address cells (std, extern, none, malformed)
//! - tonapi JSON stack parsing end to end
//! - Cached pool state keeps big integers exact

use kton_sdk::address::{Address, AnyAddress};
use kton_sdk::cell::CellBuilder;
use kton_sdk::pool_state::{decode_pool_state, DecodeError, PoolState, SchemaVersion};
use kton_sdk::stack::{CellBlob, StackRecord};
use kton_sdk::{Codec, TtlCache};
use num_bigint::BigInt;
use num_traits::Zero;
use std::str::FromStr;

const STAKING_POOL: &str = "EQA9HwEZD_tONfVz6lJS0PVKR5viEiEGyj9AuQewGQVnXPg0";

fn std_address_cell(addr: &Address) -> StackRecord {
    let cell = CellBuilder::new()
        .store_uint(0b10, 2)
        .store_bit(false)
        .store_int(addr.workchain as i64, 8)
        .store_bytes(&addr.hash)
        .build();
    StackRecord::cell(CellBlob::new(cell.to_boc()))
}

fn none_address_cell() -> StackRecord {
    let cell = CellBuilder::new().store_uint(0, 2).build();
    StackRecord::cell(CellBlob::new(cell.to_boc()))
}

fn round(round_id: i64, borrowed: i64) -> StackRecord {
    StackRecord::tuple(vec![
        StackRecord::Null,
        StackRecord::int(round_id),
        StackRecord::int(2i64),
        StackRecord::int(borrowed),
        StackRecord::int(borrowed + 10),
        StackRecord::int(0i64),
        StackRecord::int(0i64),
    ])
}

/// 34-record stack with distinct, recognisable values.
fn current_schema_stack() -> Vec<StackRecord> {
    let pool: Address = STAKING_POOL.parse().unwrap();
    let big_balance = BigInt::from_str("123456789012345678901234567890").unwrap();
    vec![
        StackRecord::int(1i64),                // state
        StackRecord::int(0i64),                // halted
        StackRecord::int(big_balance),         // total_balance
        StackRecord::int(1i64 << 20),          // interest_rate
        StackRecord::int(-1i64),               // optimistic_deposit_withdrawals
        StackRecord::int(-1i64),               // deposits_open
        StackRecord::int(500i64),              // instant_withdrawal_fee
        StackRecord::int(77i64),               // saved_validator_set_hash
        round(41, 1_000),                      // previous_round
        round(42, 2_000),                      // current_round
        StackRecord::int(100i64),              // min_loan
        StackRecord::int(200i64),              // max_loan
        StackRecord::int(1i64 << 22),          // governance_fee
        StackRecord::int(9i64),                // accrued_governance_fee
        StackRecord::int(15i64),               // disbalance_tolerance
        StackRecord::int(3600i64),             // credit_start_prior_elections_end
        std_address_cell(&pool),               // pool_jetton_minter
        StackRecord::int(1_000_000_000i64),    // pool_jetton_supply
        std_address_cell(&pool),               // deposit_payout
        StackRecord::int(5i64),                // requested_for_deposit
        none_address_cell(),                   // withdrawal_payout
        StackRecord::int(6i64),                // requested_for_withdrawal
        StackRecord::Null,                     // sudoer
        StackRecord::int(0i64),                // sudoer_set_at
        std_address_cell(&pool),               // governor
        StackRecord::int(0i64),                // governor_update_after
        StackRecord::Null,                     // interest_manager
        StackRecord::Null,                     // halter
        StackRecord::Null,                     // approver
        StackRecord::Null,                     // controller_code
        StackRecord::Null,                     // jetton_wallet_code
        StackRecord::Null,                     // payout_minter_code
        StackRecord::int(2_000_000_000i64),    // projected_total_balance
        StackRecord::int(1_500_000_000i64),    // projected_pool_supply
    ]
}

#[test]
fn test_current_schema_populates_extra_fields() {
    let stack = current_schema_stack();
    assert_eq!(stack.len(), 34);

    let state = decode_pool_state(&stack).unwrap();
    assert_eq!(state.schema, SchemaVersion::Current);
    assert_eq!(state.instant_withdrawal_fee, 500);
    assert_eq!(state.accrued_governance_fee, BigInt::from(9i64));
    assert_eq!(state.disbalance_tolerance, 15);
    assert_eq!(state.credit_start_prior_elections_end, 3600);

    assert!(state.deposits_open);
    assert!(!state.halted);
    assert_eq!(state.total_balance.to_string(), "123456789012345678901234567890");
    assert_eq!(state.previous_round.round_id, 41);
    assert_eq!(state.current_round.borrowed, BigInt::from(2_000i64));
    assert_eq!(state.current_round.expected, BigInt::from(2_010i64));
    assert_eq!(state.supply(), &BigInt::from(1_000_000_000i64));
    assert_eq!(state.projected_pool_supply, BigInt::from(1_500_000_000i64));
}

#[test]
fn test_current_schema_reads_addresses() {
    let state = decode_pool_state(&current_schema_stack()).unwrap();
    let pool: Address = STAKING_POOL.parse().unwrap();

    assert_eq!(state.pool_jetton_minter, Some(pool));
    assert_eq!(state.deposit_payout, Some(AnyAddress::Internal(pool)));
    assert_eq!(state.withdrawal_payout, None, "addr_none reads as absent");
    assert_eq!(state.sudoer, None, "non-cell reads as absent");
    assert_eq!(state.governor.map(|a| a.to_string()).as_deref(), Some(STAKING_POOL));
}

#[test]
fn test_legacy_all_zero_stack_takes_defaults() {
    let stack = vec![StackRecord::int(0i64); 30];
    let state = decode_pool_state(&stack).unwrap();

    assert_eq!(state.schema, SchemaVersion::Legacy);
    assert_eq!(state.instant_withdrawal_fee, 0);
    assert_eq!(state.accrued_governance_fee, BigInt::zero());
    assert_eq!(state.disbalance_tolerance, 30);
    assert_eq!(state.credit_start_prior_elections_end, 0);
    assert_eq!(state.deposit_payout, None);
    assert_eq!(state.pool_jetton_minter, None);
}

#[test]
fn test_other_counts_use_legacy_layout() {
    // 31 records: legacy layout reads the first 30 and ignores the rest.
    let mut stack = vec![StackRecord::int(0i64); 31];
    stack[13] = StackRecord::int(777i64); // legacy position of pool_jetton_supply
    let state = decode_pool_state(&stack).unwrap();
    assert_eq!(state.schema, SchemaVersion::Legacy);
    assert_eq!(state.pool_jetton_supply, BigInt::from(777i64));
}

#[test]
fn test_malformed_address_cell_is_an_error() {
    let mut stack = current_schema_stack();
    let var_address = CellBuilder::new().store_uint(0b11, 2).build();
    stack[16] = StackRecord::cell(CellBlob::new(var_address.to_boc()));

    match decode_pool_state(&stack) {
        Err(DecodeError::Address { field, .. }) => assert_eq!(field, "pool_jetton_minter"),
        other => panic!("expected address error, got {:?}", other),
    }

    let mut stack = current_schema_stack();
    stack[16] = StackRecord::cell(CellBlob::new(vec![0xde, 0xad]));
    assert!(matches!(decode_pool_state(&stack), Err(DecodeError::Address { .. })));
}

#[test]
fn test_decodes_tonapi_json_stack() {
    let pool: Address = STAKING_POOL.parse().unwrap();
    let minter_hex = match std_address_cell(&pool) {
        StackRecord::Cell(blob) => blob.to_hex(),
        _ => unreachable!(),
    };

    let mut records = vec![serde_json::json!({"type": "num", "num": "0x0"}); 30];
    records[2] = serde_json::json!({"type": "num", "num": "0x3b9aca00"});
    records[7] = serde_json::json!({"type": "tuple", "tuple": [
        {"type": "null"},
        {"type": "num", "num": "0x7"},
        {"type": "num", "num": "0x1"},
        {"type": "num", "num": "0x64"}
    ]});
    records[12] = serde_json::json!({"type": "cell", "cell": minter_hex});
    records[28] = serde_json::json!({"type": "nan"});

    let stack: Vec<StackRecord> = serde_json::from_value(serde_json::Value::Array(records)).unwrap();
    let state = decode_pool_state(&stack).unwrap();

    assert_eq!(state.total_balance, BigInt::from(1_000_000_000i64));
    assert_eq!(state.previous_round.round_id, 7);
    assert_eq!(state.previous_round.borrowed, BigInt::from(100i64));
    assert_eq!(state.previous_round.expected, BigInt::zero(), "short round tuple defaults");
    assert_eq!(state.pool_jetton_minter, Some(pool));
    assert_eq!(state.projected_total_balance, BigInt::zero(), "nan degrades to zero");
}

#[tokio::test]
async fn test_pool_state_survives_cache_round_trip() {
    let state = decode_pool_state(&current_schema_stack()).unwrap();

    let text = Codec::new().encode(&state).unwrap();
    assert!(text.contains("\"123456789012345678901234567890n\""));
    let decoded: PoolState = Codec::new().decode(&text).unwrap();
    assert_eq!(decoded, state);

    let cache = TtlCache::in_memory();
    cache.save("poolInfo", state.clone(), None).await;
    let cached: PoolState = cache.retrieve("poolInfo").await.unwrap();
    assert_eq!(cached.total_balance, state.total_balance);
    assert_eq!(cached.pool_jetton_minter, state.pool_jetton_minter);
}

#[test]
fn test_full_width_validator_set_hash_decodes() {
    // uint256 hashes use the top bit about half the time.
    let hash_hex = format!("0x8f3a{}01", "0".repeat(58));
    let too_wide = format!("0x1{}", "0".repeat(64));

    let mut records = serde_json::to_value(current_schema_stack()).unwrap();
    records[7] = serde_json::json!({"type": "num", "num": hash_hex});
    records[13] = serde_json::json!({"type": "num", "num": too_wide});
    let response = serde_json::json!({"success": true, "exit_code": 0, "stack": records});

    let result: kton_sdk::client::MethodExecutionResult = serde_json::from_value(response).unwrap();
    let state = decode_pool_state(&result.stack).unwrap();

    assert_eq!(state.schema, SchemaVersion::Current);
    assert_eq!(state.saved_validator_set_hash.bits(), 256);
    assert_eq!(format!("0x{:x}", state.saved_validator_set_hash.magnitude()), hash_hex);
    assert_eq!(state.accrued_governance_fee, BigInt::zero(), "out-of-range number degrades to zero");
    assert_eq!(state.total_balance.to_string(), "123456789012345678901234567890");

    let text = Codec::new().encode(&state).unwrap();
    let decoded: PoolState = Codec::new().decode(&text).unwrap();
    assert_eq!(decoded.saved_validator_set_hash, state.saved_validator_set_hash);
}
