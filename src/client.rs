//! # Staking pool client
//!
//! [`PoolClient`] reads the liquid-staking pool through a [`RemoteApi`] and
//! memoizes every answer in a [`TtlCache`]. The production transport is
//! [`TonApiClient`], which speaks the tonapi v2 REST API with bearer auth,
//! retries transient failures and falls back to backup base URLs.
//!
//! Cache keys used here (all under the cache prefix):
//!
//! | key | value |
//! |---|---|
//! | `poolInfo` | decoded [`PoolState`] |
//! | `payouts` | [`Payouts`] |
//! | `tonPrice` | TON/USD price |
//! | `stakedBalance-<wallet>` | `get_wallet_data` result |
//! | `account-jettonWallet-<owner>` | owner's jetton wallet address |

use crate::address::{Address, AddressError, AnyAddress};
use crate::cache::{CacheError, TtlCache};
use crate::codec::tagged_bigint;
use crate::metrics;
use crate::pool_state::{decode_pool_state, DecodeError, PoolState, SchemaVersion};
use crate::settings::{Network, Settings};
use crate::stack::StackRecord;
use crate::store::StoreError;
use crate::types::conversions::{bigint_to_decimal, parse_stack_int, ConversionError, NANO_DECIMALS};
use crate::utils::{now_secs, round_window, rounds_per_year, ROUND_DURATION_SECS};
use async_trait::async_trait;
use num_bigint::BigInt;
use num_traits::Zero;
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use url::Url;

pub const POOL_FULL_DATA_METHOD: &str = "get_pool_full_data";
pub const WALLET_DATA_METHOD: &str = "get_wallet_data";
pub const WALLET_ADDRESS_METHOD: &str = "get_wallet_address";

/// Cache groups holding per-user data.
pub const USER_DATA_GROUPS: [&str; 3] = [
    "network-cache-payouts",
    "network-cache-stakedBalance",
    "network-cache-account",
];

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status} from {url}: {body}")]
    Status { status: u16, url: String, body: String },
    #[error("get-method `{method}` failed with exit code {exit_code}")]
    MethodFailed { method: String, exit_code: i32 },
    #[error("no base URL configured")]
    NoEndpoint,
    #[error("invalid base URL `{url}`: {source}")]
    InvalidUrl { url: String, source: url::ParseError },
    #[error("invalid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),
    #[error("response is missing `{0}`")]
    MissingField(&'static str),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl ClientError {
    /// True when the contract or account simply does not exist (yet).
    pub fn is_not_found(&self) -> bool {
        match self {
            ClientError::Status { status, .. } => *status == StatusCode::NOT_FOUND.as_u16(),
            ClientError::MethodFailed { .. } => true,
            _ => false,
        }
    }

    fn is_transient(&self) -> bool {
        match self {
            ClientError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            ClientError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Result of running a contract get-method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodExecutionResult {
    pub success: bool,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub stack: Vec<StackRecord>,
    /// ABI-decoded view, when the API recognises the method.
    #[serde(default)]
    pub decoded: Option<serde_json::Value>,
}

impl MethodExecutionResult {
    fn ensure_success(self, method: &str) -> Result<Self, ClientError> {
        if self.success && self.exit_code == 0 {
            Ok(self)
        } else {
            Err(ClientError::MethodFailed {
                method: method.to_string(),
                exit_code: self.exit_code,
            })
        }
    }
}

/// Read access to the chain.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn run_get_method(
        &self,
        account: &str,
        method: &str,
        args: &[String],
    ) -> Result<MethodExecutionResult, ClientError>;

    /// Current TON price in USD.
    async fn ton_price_usd(&self) -> Result<f64, ClientError>;
}

/// tonapi v2 transport.
pub struct TonApiClient {
    http: reqwest::Client,
    base_urls: Vec<String>,
    max_retries: usize,
    retry_base_ms: u64,
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    rates: std::collections::HashMap<String, TokenRates>,
}

#[derive(Debug, Deserialize)]
struct TokenRates {
    #[serde(default)]
    prices: std::collections::HashMap<String, f64>,
}

impl TonApiClient {
    pub fn new(network: &Network) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = network.api_key.as_deref().filter(|k| !k.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", key))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(network.request_timeout_ms))
            .default_headers(headers)
            .build()?;

        let mut base_urls = Vec::new();
        for raw in std::iter::once(network.base_url()).chain(network.backup_api_urls.iter().map(String::as_str)) {
            let trimmed = raw.trim().trim_end_matches('/');
            if trimmed.is_empty() {
                continue;
            }
            Url::parse(trimmed).map_err(|source| ClientError::InvalidUrl {
                url: trimmed.to_string(),
                source,
            })?;
            base_urls.push(trimmed.to_string());
        }

        info!(
            "tonapi client: primary={} backups={} testnet={}",
            network.base_url(),
            base_urls.len().saturating_sub(1),
            network.is_testnet
        );

        Ok(Self {
            http,
            base_urls,
            max_retries: network.max_retries,
            retry_base_ms: network.retry_base_ms,
        })
    }

    pub fn base_urls(&self) -> &[String] {
        &self.base_urls
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ClientError> {
        let response = self.http.get(url).query(query).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    /// Tries each base URL in order, retrying transient failures on each.
    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ClientError> {
        let mut last_error = ClientError::NoEndpoint;
        for base in &self.base_urls {
            let url = format!("{}{}", base, path);
            let strategy = ExponentialBackoff::from_millis(self.retry_base_ms.max(1))
                .factor(2)
                .max_delay(Duration::from_secs(5))
                .map(jitter)
                .take(self.max_retries);

            match RetryIf::spawn(strategy, || self.get_json(&url, query), ClientError::is_transient).await {
                Ok(value) => return Ok(value),
                // A definitive answer from the primary is not worth repeating elsewhere.
                Err(e) if e.is_not_found() => return Err(e),
                Err(e) => {
                    warn!("⚠️ Request to {} failed: {}", url, e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

#[async_trait]
impl RemoteApi for TonApiClient {
    async fn run_get_method(
        &self,
        account: &str,
        method: &str,
        args: &[String],
    ) -> Result<MethodExecutionResult, ClientError> {
        let path = format!("/v2/blockchain/accounts/{}/methods/{}", account, method);
        let query: Vec<(&str, String)> = args.iter().map(|a| ("args", a.clone())).collect();

        let start = Instant::now();
        let result = self.fetch::<MethodExecutionResult>(&path, &query).await;
        metrics::record_remote_call(method, result.is_ok(), start.elapsed());
        debug!("{} on {} took {:?}", method, account, start.elapsed());
        result
    }

    async fn ton_price_usd(&self) -> Result<f64, ClientError> {
        let query = [("tokens", "ton".to_string()), ("currencies", "usd".to_string())];
        let response: RatesResponse = self.fetch("/v2/rates", &query).await?;
        response
            .rates
            .get("TON")
            .and_then(|r| r.prices.get("USD"))
            .copied()
            .ok_or(ClientError::MissingField("rates.TON.prices.USD"))
    }
}

/// Pool token exchange rates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rates {
    pub ton_usd: f64,
    /// TON per pool token now.
    pub kton_ton: Decimal,
    /// TON per pool token after the current round settles.
    pub kton_ton_projected: Decimal,
}

/// Pending payout distribution for the current cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payouts {
    pub deposit_payout: Option<AnyAddress>,
    #[serde(with = "tagged_bigint")]
    pub deposit_amount: BigInt,
    pub withdrawal_payout: Option<AnyAddress>,
    #[serde(with = "tagged_bigint")]
    pub withdrawal_amount: BigInt,
    /// Unix seconds.
    pub cycle_end: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTimestamps {
    pub round_start: i64,
    pub round_end: i64,
}

pub struct PoolClient {
    api: Arc<dyn RemoteApi>,
    cache: Arc<TtlCache>,
    staking_address: Address,
}

impl PoolClient {
    pub fn new(api: Arc<dyn RemoteApi>, cache: Arc<TtlCache>, staking_address: Address) -> Self {
        Self {
            api,
            cache,
            staking_address,
        }
    }

    /// Wires a tonapi transport and a cache from settings.
    pub async fn from_settings(settings: &Settings) -> Result<Self, ClientError> {
        let api = TonApiClient::new(&settings.network)?;
        let cache = TtlCache::from_settings(&settings.cache).await?;
        let staking_address: Address = settings.staking_address().parse()?;
        Ok(Self::new(Arc::new(api), Arc::new(cache), staking_address))
    }

    pub fn staking_address(&self) -> &Address {
        &self.staking_address
    }

    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    /// Decoded `get_pool_full_data`, cached under `poolInfo`.
    pub async fn fetch_pool_state(&self, ttl: Option<i64>) -> Result<PoolState, ClientError> {
        let api = Arc::clone(&self.api);
        let account = self.staking_address.to_string();
        self.cache
            .get("poolInfo", || load_pool_state(api, account), ttl)
            .await
    }

    /// Annualized yield from the current interest rate net of governance fee.
    pub async fn current_apy(&self, ttl: Option<i64>) -> Result<f64, ClientError> {
        let state = self.fetch_pool_state(ttl).await?;
        let round_roi = state.interest_rate_fraction() * (1.0 - state.governance_fee_fraction());
        Ok(round_roi * rounds_per_year() / 2.0)
    }

    /// Total value locked, in nanotons.
    pub async fn tvl(&self, ttl: Option<i64>) -> Result<BigInt, ClientError> {
        let state = self.fetch_pool_state(ttl).await?;
        Ok(state.total_balance + state.current_round.borrowed + state.previous_round.borrowed)
    }

    /// TON that can be withdrawn right away, in nanotons.
    pub async fn instant_liquidity(&self, ttl: Option<i64>) -> Result<BigInt, ClientError> {
        let state = self.fetch_pool_state(ttl).await?;
        Ok(state.total_balance - state.requested_for_withdrawal)
    }

    /// Exchange rates. A failed price lookup reports a TON price of 0.
    pub async fn rates(&self, ttl: Option<i64>) -> Result<Rates, ClientError> {
        let state = self.fetch_pool_state(ttl).await?;
        let kton_ton = ratio(&state.total_balance, state.supply())?;
        let kton_ton_projected = ratio(&state.projected_total_balance, &state.projected_pool_supply)?;

        let api = Arc::clone(&self.api);
        let ton_usd = match self
            .cache
            .get("tonPrice", || async move { api.ton_price_usd().await }, ttl)
            .await
        {
            Ok(price) => price,
            Err(e) => {
                warn!("TON price unavailable: {}", e);
                0.0
            }
        };

        Ok(Rates {
            ton_usd,
            kton_ton,
            kton_ton_projected,
        })
    }

    /// Payout addresses and pending amounts, cached under `payouts`.
    pub async fn payouts(&self, ttl: Option<i64>) -> Result<Payouts, ClientError> {
        let state = self.fetch_pool_state(ttl).await?;
        self.cache
            .get(
                "payouts",
                || async move {
                    Ok::<_, ClientError>(Payouts {
                        deposit_payout: state.deposit_payout,
                        deposit_amount: state.requested_for_deposit,
                        withdrawal_payout: state.withdrawal_payout,
                        withdrawal_amount: state.requested_for_withdrawal,
                        cycle_end: now_secs() + ROUND_DURATION_SECS,
                    })
                },
                ttl,
            )
            .await
    }

    /// Estimated bounds of the running validation round.
    pub fn round_timestamps(&self) -> RoundTimestamps {
        let (round_start, round_end) = round_window(now_secs());
        RoundTimestamps {
            round_start,
            round_end,
        }
    }

    /// Pool-token wallet of `owner`, asked from the jetton minter.
    pub async fn jetton_wallet_address(&self, owner: &Address, ttl: Option<i64>) -> Result<Address, ClientError> {
        let minter = self
            .fetch_pool_state(ttl)
            .await?
            .pool_jetton_minter
            .ok_or(ClientError::MissingField("pool_jetton_minter"))?;

        let api = Arc::clone(&self.api);
        let args = vec![owner.to_raw_string()];
        let key = format!("account-jettonWallet-{}", owner.to_raw_string());
        self.cache
            .get(
                &key,
                || async move {
                    let result = api
                        .run_get_method(&minter.to_string(), WALLET_ADDRESS_METHOD, &args)
                        .await?
                        .ensure_success(WALLET_ADDRESS_METHOD)?;
                    let raw = result
                        .decoded
                        .as_ref()
                        .and_then(|d| d.get("jetton_wallet_address"))
                        .and_then(|v| v.as_str())
                        .ok_or(ClientError::MissingField("decoded.jetton_wallet_address"))?;
                    Ok::<Address, ClientError>(raw.parse()?)
                },
                ttl,
            )
            .await
    }

    /// Pool-token balance of a jetton wallet, in nano units. A wallet that
    /// does not exist yet holds 0.
    pub async fn staked_balance(&self, jetton_wallet: &Address, ttl: Option<i64>) -> Result<BigInt, ClientError> {
        let api = Arc::clone(&self.api);
        let account = jetton_wallet.to_string();
        let key = format!("stakedBalance-{}", account);
        let fetched = self
            .cache
            .get(
                &key,
                || async move {
                    api.run_get_method(&account, WALLET_DATA_METHOD, &[])
                        .await?
                        .ensure_success(WALLET_DATA_METHOD)
                },
                ttl,
            )
            .await;

        match fetched {
            Ok(result) => wallet_balance(&result),
            Err(e) if e.is_not_found() => {
                debug!("Jetton wallet {} not found, balance is 0", jetton_wallet);
                Ok(BigInt::zero())
            }
            Err(e) => Err(e),
        }
    }

    /// Drops every cached entry.
    pub async fn clear_storage_data(&self) -> Result<usize, ClientError> {
        Ok(self.cache.clear(None).await?)
    }

    /// Drops cached per-user data, keeping pool-wide entries.
    pub async fn clear_storage_user_data(&self) -> Result<usize, ClientError> {
        Ok(self.cache.clear(Some(&USER_DATA_GROUPS[..])).await?)
    }
}

async fn load_pool_state(api: Arc<dyn RemoteApi>, account: String) -> Result<PoolState, ClientError> {
    let result = api
        .run_get_method(&account, POOL_FULL_DATA_METHOD, &[])
        .await?
        .ensure_success(POOL_FULL_DATA_METHOD)?;
    let schema = match SchemaVersion::for_record_count(result.stack.len()) {
        SchemaVersion::Current => "current",
        SchemaVersion::Legacy => "legacy",
    };
    match decode_pool_state(&result.stack) {
        Ok(state) => {
            metrics::increment_stack_decode(schema, "ok");
            debug!("Decoded {:?} pool state from {} records", state.schema, result.stack.len());
            Ok(state)
        }
        Err(e) => {
            metrics::increment_stack_decode(schema, "error");
            Err(e.into())
        }
    }
}

/// `numerator / denominator` in whole units; 0 when the denominator is 0.
fn ratio(numerator: &BigInt, denominator: &BigInt) -> Result<Decimal, ClientError> {
    let num = bigint_to_decimal(numerator, NANO_DECIMALS)?;
    let den = bigint_to_decimal(denominator, NANO_DECIMALS)?;
    Ok(num.checked_div(den).unwrap_or(Decimal::ZERO))
}

/// `balance` from the decoded view, else the first stack item.
fn wallet_balance(result: &MethodExecutionResult) -> Result<BigInt, ClientError> {
    if let Some(balance) = result.decoded.as_ref().and_then(|d| d.get("balance")) {
        return match balance {
            serde_json::Value::String(s) => Ok(parse_stack_int(s)?),
            serde_json::Value::Number(n) => Ok(parse_stack_int(&n.to_string())?),
            _ => Err(ClientError::MissingField("decoded.balance")),
        };
    }
    result
        .stack
        .first()
        .and_then(StackRecord::as_int)
        .cloned()
        .ok_or(ClientError::MissingField("stack[0]"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_handles_zero_supply() {
        let r = ratio(&BigInt::from(2_000_000_000i64), &BigInt::from(1_000_000_000i64)).unwrap();
        assert_eq!(r, Decimal::from(2));
        assert_eq!(ratio(&BigInt::from(5i64), &BigInt::zero()).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn wallet_balance_prefers_decoded_view() {
        let from_decoded = MethodExecutionResult {
            success: true,
            exit_code: 0,
            stack: vec![StackRecord::int(1i64)],
            decoded: Some(serde_json::json!({ "balance": "1500000000" })),
        };
        assert_eq!(wallet_balance(&from_decoded).unwrap(), BigInt::from(1_500_000_000i64));

        let from_stack = MethodExecutionResult {
            decoded: None,
            ..from_decoded
        };
        assert_eq!(wallet_balance(&from_stack).unwrap(), BigInt::from(1i64));
    }

    #[test]
    fn parses_tonapi_method_response() {
        let body = r#"{
            "success": true,
            "exit_code": 0,
            "stack": [{"type": "num", "num": "0x10"}, {"type": "null"}],
            "decoded": null
        }"#;
        let result: MethodExecutionResult = serde_json::from_str(body).unwrap();
        assert_eq!(result.stack.len(), 2);
        assert_eq!(result.stack[0].as_int(), Some(&BigInt::from(16i64)));

        let failed = MethodExecutionResult {
            success: false,
            exit_code: 11,
            ..result
        };
        assert!(failed.ensure_success("get_x").unwrap_err().is_not_found());
    }

    #[test]
    fn rejects_malformed_base_url() {
        let network = Network {
            api_url: "tonapi without scheme".to_string(),
            ..Network::default()
        };
        assert!(matches!(TonApiClient::new(&network), Err(ClientError::InvalidUrl { .. })));

        let network = Network {
            backup_api_urls: vec!["https://backup.example/".to_string(), String::new()],
            ..Network::default()
        };
        let client = TonApiClient::new(&network).unwrap();
        assert_eq!(client.base_urls().len(), 2);
        assert_eq!(client.base_urls()[1], "https://backup.example");
    }

    #[test]
    fn transient_classification() {
        let busy = ClientError::Status {
            status: 429,
            url: String::new(),
            body: String::new(),
        };
        let missing = ClientError::Status {
            status: 404,
            url: String::new(),
            body: String::new(),
        };
        assert!(busy.is_transient());
        assert!(!missing.is_transient());
        assert!(missing.is_not_found());
    }
}
