use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

pub const MAINNET_API_URL: &str = "https://tonapi.io";
pub const TESTNET_API_URL: &str = "https://testnet.tonapi.io";
pub const MAINNET_STAKING_CONTRACT: &str = "EQA9HwEZD_tONfVz6lJS0PVKR5viEiEGyj9AuQewGQVnXPg0";
pub const TESTNET_STAKING_CONTRACT: &str = "kQD2y9eUotYw7VprrD0UJvAigDVXwgCCLWAl-DjaamCHniVr";
pub const PARTNER_CODE: u64 = 0x0000_0000_7474_6f6e;
pub const RECOMMENDED_FEE_RESERVE: f64 = 1.1;

#[derive(Debug, Deserialize, Clone)]
pub struct Network {
    #[serde(default)]
    pub is_testnet: bool,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_api_url_testnet")]
    pub api_url_testnet: String,
    /// Extra tonapi-compatible base URLs tried in order after the primary.
    #[serde(default)]
    pub backup_api_urls: Vec<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

fn default_api_url() -> String {
    MAINNET_API_URL.to_string()
}
fn default_api_url_testnet() -> String {
    TESTNET_API_URL.to_string()
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_max_retries() -> usize {
    3
}
fn default_retry_base_ms() -> u64 {
    200
}

impl Default for Network {
    fn default() -> Self {
        Self {
            is_testnet: false,
            api_url: default_api_url(),
            api_url_testnet: default_api_url_testnet(),
            backup_api_urls: Vec::new(),
            api_key: None,
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

impl Network {
    /// Primary base URL for the selected network.
    pub fn base_url(&self) -> &str {
        if self.is_testnet {
            &self.api_url_testnet
        } else {
            &self.api_url
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Contract {
    #[serde(default = "default_staking_mainnet")]
    pub staking_address: String,
    #[serde(default = "default_staking_testnet")]
    pub staking_address_testnet: String,
    #[serde(default = "default_partner_code")]
    pub partner_code: u64,
}

fn default_staking_mainnet() -> String {
    MAINNET_STAKING_CONTRACT.to_string()
}
fn default_staking_testnet() -> String {
    TESTNET_STAKING_CONTRACT.to_string()
}
fn default_partner_code() -> u64 {
    PARTNER_CODE
}

impl Default for Contract {
    fn default() -> Self {
        Self {
            staking_address: default_staking_mainnet(),
            staking_address_testnet: default_staking_testnet(),
            partner_code: default_partner_code(),
        }
    }
}

impl Contract {
    pub fn staking_address_for(&self, is_testnet: bool) -> &str {
        if is_testnet {
            &self.staking_address_testnet
        } else {
            &self.staking_address
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    File,
    Redis,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    #[serde(default = "default_cache_ttl_ms")]
    pub default_ttl_ms: i64,
    #[serde(default = "default_cache_prefix")]
    pub prefix: String,
    #[serde(default = "default_true")]
    pub coalesce_producers: bool,
    #[serde(default)]
    pub backend: CacheBackend,
    #[serde(default = "default_cache_file_path")]
    pub file_path: String,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

fn default_cache_ttl_ms() -> i64 {
    30_000
}
fn default_cache_prefix() -> String {
    "network-cache-".to_string()
}
fn default_true() -> bool {
    true
}
fn default_cache_file_path() -> String {
    "network-cache.json".to_string()
}
fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_ms: default_cache_ttl_ms(),
            prefix: default_cache_prefix(),
            coalesce_producers: default_true(),
            backend: CacheBackend::default(),
            file_path: default_cache_file_path(),
            redis_url: default_redis_url(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub network: Network,
    #[serde(default)]
    pub contract: Contract,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub log: LogSettings,
}

impl Settings {
    /// Loads `Config.toml` from the working directory if present, then applies
    /// `SDK_*` environment overrides.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_file("Config.toml")
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("SDK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Self = s.try_deserialize()?;

        // Shorthand overrides for the values people set most
        if let Ok(key) = env::var("SDK_API_KEY") {
            let trimmed = key.trim();
            if !trimmed.is_empty() {
                settings.network.api_key = Some(trimmed.to_string());
            }
        }
        if let Ok(raw) = env::var("SDK_TESTNET") {
            if let Ok(flag) = raw.trim().parse::<bool>() {
                settings.network.is_testnet = flag;
            }
        }
        if let Ok(raw) = env::var("SDK_BACKUP_API_URLS") {
            let list = parse_string_list(&raw);
            if !list.is_empty() {
                settings.network.backup_api_urls = list;
            }
        }

        Ok(settings)
    }

    pub fn staking_address(&self) -> &str {
        self.contract.staking_address_for(self.network.is_testnet)
    }
}

/// Accepts a JSON array or a comma-separated list.
fn parse_string_list(input: &str) -> Vec<String> {
    let trimmed = input.trim();
    if trimmed.starts_with('[') {
        if let Ok(list) = serde_json::from_str::<Vec<String>>(trimmed) {
            return list;
        }
    }
    trimmed
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|s| s.trim().trim_matches('"').trim_matches('\'').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
