//! Integration tests for the pool client
//!
//! Tests cover:
//! - Pool state is fetched once and then served from the cache
//! - APY, TVL, liquidity, rates and payouts derived from a canned stack
//! - Jetton wallet lookup and staked balances, including missing wallets
//! - Clearing per-user cache groups keeps pool-wide entries

use async_trait::async_trait;
use kton_sdk::cache::ManualClock;
use kton_sdk::cell::CellBuilder;
use kton_sdk::client::{
    ClientError, MethodExecutionResult, POOL_FULL_DATA_METHOD, WALLET_ADDRESS_METHOD, WALLET_DATA_METHOD,
};
use kton_sdk::stack::{CellBlob, StackRecord};
use kton_sdk::utils::rounds_per_year;
use kton_sdk::{Address, AnyAddress, PoolClient, RemoteApi, TtlCache};
use num_bigint::BigInt;
use num_traits::Zero;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const STAKING_POOL: &str = "EQA9HwEZD_tONfVz6lJS0PVKR5viEiEGyj9AuQewGQVnXPg0";
const MINTER: &str = "0:1111111111111111111111111111111111111111111111111111111111111111";
const OWNER: &str = "0:2222222222222222222222222222222222222222222222222222222222222222";
const WALLET: &str = "0:3333333333333333333333333333333333333333333333333333333333333333";
const EMPTY_WALLET: &str = "0:4444444444444444444444444444444444444444444444444444444444444444";

fn address_cell(addr: &Address) -> StackRecord {
    let cell = CellBuilder::new()
        .store_uint(0b10, 2)
        .store_bit(false)
        .store_int(addr.workchain as i64, 8)
        .store_bytes(&addr.hash)
        .build();
    StackRecord::cell(CellBlob::new(cell.to_boc()))
}

fn round(borrowed: i64) -> StackRecord {
    StackRecord::tuple(vec![
        StackRecord::Null,
        StackRecord::int(1i64),
        StackRecord::int(1i64),
        StackRecord::int(borrowed),
        StackRecord::int(borrowed),
        StackRecord::int(0i64),
        StackRecord::int(0i64),
    ])
}

/// 34 records: 3000 TON balance, 1500 KTON supply, 1/64 rate, 1/4 fee.
fn pool_stack() -> Vec<StackRecord> {
    let minter: Address = MINTER.parse().unwrap();
    let deposit: Address = OWNER.parse().unwrap();
    let mut stack = vec![StackRecord::int(0i64); 34];
    stack[2] = StackRecord::int(3_000_000_000_000i64); // total_balance
    stack[3] = StackRecord::int(1i64 << 18); // interest_rate
    stack[5] = StackRecord::int(-1i64); // deposits_open
    stack[8] = round(100_000_000_000);
    stack[9] = round(200_000_000_000);
    stack[12] = StackRecord::int(1i64 << 22); // governance_fee
    stack[16] = address_cell(&minter);
    stack[17] = StackRecord::int(1_500_000_000_000i64); // pool_jetton_supply
    stack[18] = address_cell(&deposit);
    stack[19] = StackRecord::int(7_000_000_000i64); // requested_for_deposit
    stack[21] = StackRecord::int(500_000_000_000i64); // requested_for_withdrawal
    stack[32] = StackRecord::int(2_000_000_000_000i64); // projected_total_balance
    stack[33] = StackRecord::int(1_600_000_000_000i64); // projected_pool_supply
    stack
}

#[derive(Default)]
struct FakeApi {
    pool_calls: AtomicUsize,
    wallet_address_calls: AtomicUsize,
    wallet_data_calls: AtomicUsize,
    price_calls: AtomicUsize,
    price_fails: bool,
}

fn ok_result(stack: Vec<StackRecord>, decoded: Option<serde_json::Value>) -> MethodExecutionResult {
    MethodExecutionResult {
        success: true,
        exit_code: 0,
        stack,
        decoded,
    }
}

#[async_trait]
impl RemoteApi for FakeApi {
    async fn run_get_method(
        &self,
        account: &str,
        method: &str,
        args: &[String],
    ) -> Result<MethodExecutionResult, ClientError> {
        match method {
            POOL_FULL_DATA_METHOD => {
                self.pool_calls.fetch_add(1, Ordering::SeqCst);
                assert_eq!(account, STAKING_POOL);
                Ok(ok_result(pool_stack(), None))
            }
            WALLET_ADDRESS_METHOD => {
                self.wallet_address_calls.fetch_add(1, Ordering::SeqCst);
                assert_eq!(account.parse::<Address>().unwrap(), MINTER.parse::<Address>().unwrap());
                assert_eq!(args, &[OWNER.to_string()][..]);
                Ok(ok_result(vec![], Some(serde_json::json!({ "jetton_wallet_address": WALLET }))))
            }
            WALLET_DATA_METHOD => {
                self.wallet_data_calls.fetch_add(1, Ordering::SeqCst);
                let wallet: Address = account.parse().unwrap();
                if wallet == WALLET.parse::<Address>().unwrap() {
                    Ok(ok_result(
                        vec![StackRecord::int(0i64)],
                        Some(serde_json::json!({ "balance": "123456789012345678901234567890" })),
                    ))
                } else {
                    // Uninitialized account: the get-method exits with a non-zero code.
                    Ok(MethodExecutionResult {
                        success: false,
                        exit_code: -13,
                        stack: vec![],
                        decoded: None,
                    })
                }
            }
            other => panic!("unexpected method {}", other),
        }
    }

    async fn ton_price_usd(&self) -> Result<f64, ClientError> {
        self.price_calls.fetch_add(1, Ordering::SeqCst);
        if self.price_fails {
            Err(ClientError::Status {
                status: 503,
                url: "https://tonapi.test/v2/rates".to_string(),
                body: String::new(),
            })
        } else {
            Ok(5.5)
        }
    }
}

fn client_with(api: Arc<FakeApi>) -> PoolClient {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let cache = TtlCache::in_memory().with_clock(clock);
    PoolClient::new(api, Arc::new(cache), STAKING_POOL.parse().unwrap())
}

#[tokio::test]
async fn test_pool_state_is_fetched_once() {
    let api = Arc::new(FakeApi::default());
    let client = client_with(api.clone());

    let first = client.fetch_pool_state(None).await.unwrap();
    let second = client.fetch_pool_state(None).await.unwrap();
    client.tvl(None).await.unwrap();
    client.current_apy(None).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(api.pool_calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.pool_jetton_minter, Some(MINTER.parse::<Address>().unwrap()));
}

#[tokio::test]
async fn test_derived_pool_figures() {
    let client = client_with(Arc::new(FakeApi::default()));

    let tvl = client.tvl(None).await.unwrap();
    assert_eq!(tvl, BigInt::from(3_300_000_000_000i64));

    let liquidity = client.instant_liquidity(None).await.unwrap();
    assert_eq!(liquidity, BigInt::from(2_500_000_000_000i64));

    let apy = client.current_apy(None).await.unwrap();
    let expected = (1.0 / 64.0) * (1.0 - 0.25) * rounds_per_year() / 2.0;
    assert!((apy - expected).abs() < 1e-12, "apy {} != {}", apy, expected);
}

#[tokio::test]
async fn test_rates_with_and_without_price() {
    let api = Arc::new(FakeApi::default());
    let client = client_with(api.clone());
    let rates = client.rates(None).await.unwrap();
    assert_eq!(rates.kton_ton, Decimal::from(2));
    assert_eq!(rates.kton_ton_projected, Decimal::from_str("1.25").unwrap());
    assert_eq!(rates.ton_usd, 5.5);

    client.rates(None).await.unwrap();
    assert_eq!(api.price_calls.load(Ordering::SeqCst), 1, "price is cached");

    let failing = client_with(Arc::new(FakeApi {
        price_fails: true,
        ..FakeApi::default()
    }));
    let rates = failing.rates(None).await.unwrap();
    assert_eq!(rates.ton_usd, 0.0);
    assert_eq!(rates.kton_ton, Decimal::from(2));
}

#[tokio::test]
async fn test_payouts_come_from_pool_state() {
    let client = client_with(Arc::new(FakeApi::default()));
    let payouts = client.payouts(None).await.unwrap();

    assert_eq!(payouts.deposit_payout, Some(AnyAddress::Internal(OWNER.parse::<Address>().unwrap())));
    assert_eq!(payouts.deposit_amount, BigInt::from(7_000_000_000i64));
    assert_eq!(payouts.withdrawal_payout, None);
    assert_eq!(payouts.withdrawal_amount, BigInt::from(500_000_000_000i64));

    let round = client.round_timestamps();
    assert!(payouts.cycle_end >= round.round_start);
    assert_eq!(round.round_end - round.round_start, 65_536);
}

#[tokio::test]
async fn test_jetton_wallet_and_balance() {
    let api = Arc::new(FakeApi::default());
    let client = client_with(api.clone());
    let owner: Address = OWNER.parse().unwrap();

    let wallet = client.jetton_wallet_address(&owner, None).await.unwrap();
    assert_eq!(wallet, WALLET.parse::<Address>().unwrap());
    client.jetton_wallet_address(&owner, None).await.unwrap();
    assert_eq!(api.wallet_address_calls.load(Ordering::SeqCst), 1);

    let balance = client.staked_balance(&wallet, None).await.unwrap();
    assert_eq!(balance.to_string(), "123456789012345678901234567890");
    // Served from the cache with the big integer intact.
    let again = client.staked_balance(&wallet, None).await.unwrap();
    assert_eq!(again, balance);
    assert_eq!(api.wallet_data_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_wallet_has_zero_balance() {
    let api = Arc::new(FakeApi::default());
    let client = client_with(api.clone());
    let empty: Address = EMPTY_WALLET.parse().unwrap();

    assert_eq!(client.staked_balance(&empty, None).await.unwrap(), BigInt::zero());
    // Failures are not cached.
    assert_eq!(client.staked_balance(&empty, None).await.unwrap(), BigInt::zero());
    assert_eq!(api.wallet_data_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_clear_user_data_keeps_pool_entries() {
    let api = Arc::new(FakeApi::default());
    let client = client_with(api.clone());
    let owner: Address = OWNER.parse().unwrap();

    let wallet = client.jetton_wallet_address(&owner, None).await.unwrap();
    client.staked_balance(&wallet, None).await.unwrap();
    client.payouts(None).await.unwrap();
    assert_eq!(client.cache().size().await.unwrap(), 4);

    let removed = client.clear_storage_user_data().await.unwrap();
    assert_eq!(removed, 3);
    assert_eq!(client.cache().size().await.unwrap(), 1);

    client.fetch_pool_state(None).await.unwrap();
    assert_eq!(api.pool_calls.load(Ordering::SeqCst), 1, "poolInfo survived");

    assert_eq!(client.clear_storage_data().await.unwrap(), 1);
    client.fetch_pool_state(None).await.unwrap();
    assert_eq!(api.pool_calls.load(Ordering::SeqCst), 2);
}
