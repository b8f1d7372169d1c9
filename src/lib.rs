//! # KTON SDK
//!
//! Rust client for a TON liquid-staking pool. It reads the pool's on-chain
//! state through the tonapi REST API and keeps the answers in a TTL cache that
//! preserves big integers and timestamps exactly.
//!
//! ## Overview
//!
//! - **Decoding**: turns the raw `get_pool_full_data` stack into a typed
//!   [`PoolState`], for both the 30-record and 34-record contract layouts
//! - **Caching**: get-or-compute with expiry over a pluggable key/value store
//!   (memory, JSON file, Redis)
//! - **Client**: APY, TVL, exchange rates, payouts and staked balances derived
//!   from the cached pool state
//!
//! ## Architecture
//!
//! ### Wire Layer
//! Stack records, bag-of-cells parsing and TL-B message addresses.
//!
//! ### State Layer
//! Record-count schema dispatch and the per-field decode policies.
//!
//! ### Cache Layer
//! Type-preserving JSON codec, injected store, TTL cache with per-key producer
//! coalescing.
//!
//! ### Client Layer
//! Remote API trait, tonapi transport with retry and backup endpoints, and the
//! pool client that ties everything together.

// Wire Types
/// Common types and conversions
pub mod types;
/// tonapi stack records
pub mod stack;
/// Bag-of-cells parsing and bit cursors
pub mod cell;
/// Message addresses and their friendly form
pub mod address;

// State
/// Pool state decoder
pub mod pool_state;

// Cache
/// Type-preserving JSON codec
pub mod codec;
/// Key/value stores behind the cache
pub mod store;
/// TTL cache
pub mod cache;
/// Redis cache store (optional, feature-gated)
#[cfg(feature = "redis")]
pub mod redis_manager;

// Client
/// Remote API and pool client
pub mod client;

// Infrastructure
/// Metrics and observability
pub mod metrics;
/// General utilities
pub mod utils;

// Settings & Configuration
/// Configuration management
pub mod settings;

// Re-exports for convenience
pub use address::{Address, AnyAddress};
pub use cache::TtlCache;
pub use client::{PoolClient, RemoteApi, TonApiClient};
pub use codec::{Codec, Value};
pub use pool_state::{decode_pool_state, PoolState};
pub use settings::Settings;
pub use stack::StackRecord;
pub use store::{FileStore, KeyValueStore, MemoryStore};
