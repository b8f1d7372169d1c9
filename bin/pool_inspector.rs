//! # Pool Inspector
//!
//! Command-line view of the liquid-staking pool: decoded state, APY, TVL,
//! rates, payouts and per-owner balances, all served through the SDK cache.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin pool_inspector -- summary
//! cargo run --bin pool_inspector -- balance --owner EQ...
//! cargo run --bin pool_inspector -- decode --file stack.json
//! ```
//!
//! Configuration comes from `Config.toml` and `SDK_*` environment variables.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use num_bigint::BigInt;
use kton_sdk::{
    client::MethodExecutionResult,
    decode_pool_state,
    types::{bigint_to_decimal, NANO_DECIMALS},
    Address, PoolClient, Settings, StackRecord,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "pool_inspector", about = "Inspect the liquid-staking pool")]
struct Cli {
    /// Use testnet endpoints and contract
    #[arg(long)]
    testnet: bool,
    /// Cache TTL override in milliseconds
    #[arg(long)]
    ttl: Option<i64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pool state overview
    Summary,
    /// Full decoded pool state as JSON
    State,
    /// Current APY, TVL, liquidity and rates
    Metrics,
    /// Pending payouts of the running cycle
    Payouts,
    /// Pool-token balance of an owner wallet
    Balance {
        #[arg(long)]
        owner: String,
    },
    /// Decode a saved get-method response or bare stack without network access
    Decode {
        #[arg(long)]
        file: PathBuf,
    },
    /// Drop cached entries
    Clear {
        /// Only per-user entries
        #[arg(long)]
        user: bool,
    },
}

fn ton(nano: &BigInt) -> String {
    bigint_to_decimal(nano, NANO_DECIMALS)
        .map(|d| d.normalize().to_string())
        .unwrap_or_else(|_| nano.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let mut settings = Settings::new().context("Failed to load settings")?;
    if cli.testnet {
        settings.network.is_testnet = true;
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(settings.log.level.as_str()))
        .init();

    #[cfg(feature = "observability")]
    if let Ok(addr) = std::env::var("SDK_METRICS_ADDR") {
        kton_sdk::metrics::init_prometheus(addr.parse()?)?;
    }

    if let Command::Decode { file } = &cli.command {
        return decode_file(file);
    }

    let client = PoolClient::from_settings(&settings).await?;
    let ttl = cli.ttl;

    match cli.command {
        Command::Summary => {
            let state = client.fetch_pool_state(ttl).await?;
            println!("🏦 Pool {}", client.staking_address());
            println!("   Schema:            {:?}", state.schema);
            println!("   Halted:            {}", state.halted);
            println!("   Deposits open:     {}", state.deposits_open);
            println!("   Total balance:     {} TON", ton(&state.total_balance));
            println!("   Supply:            {}", ton(state.supply()));
            println!("   Interest rate:     {:.6}%", state.interest_rate_fraction() * 100.0);
            println!("   Governance fee:    {:.4}%", state.governance_fee_fraction() * 100.0);
            println!("   Current round:     #{}", state.current_round.round_id);
            if let Some(minter) = state.pool_jetton_minter {
                println!("   Jetton minter:     {}", minter);
            }
        }
        Command::State => {
            let state = client.fetch_pool_state(ttl).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Command::Metrics => {
            // Concurrent callers share one pool-state fetch through the cache.
            let (apy, tvl, liquidity, rates) = futures::try_join!(
                client.current_apy(ttl),
                client.tvl(ttl),
                client.instant_liquidity(ttl),
                client.rates(ttl),
            )?;
            let round = client.round_timestamps();
            println!("📈 APY:               {:.4}%", apy * 100.0);
            println!("💰 TVL:               {} TON", ton(&tvl));
            println!("💧 Instant liquidity: {} TON", ton(&liquidity));
            println!("🔁 KTON/TON:          {}", rates.kton_ton);
            println!("🔁 KTON/TON (proj.):  {}", rates.kton_ton_projected);
            println!("💵 TON/USD:           {}", rates.ton_usd);
            println!("⏱️  Round:             {} → {}", round.round_start, round.round_end);
        }
        Command::Payouts => {
            let payouts = client.payouts(ttl).await?;
            let show = |a: Option<kton_sdk::AnyAddress>| a.map(|a| a.to_string()).unwrap_or_default();
            println!("Deposit payout:     {} ({} TON)", show(payouts.deposit_payout), ton(&payouts.deposit_amount));
            println!("Withdrawal payout:  {} ({} TON)", show(payouts.withdrawal_payout), ton(&payouts.withdrawal_amount));
            println!("Cycle end (est.):   {}", payouts.cycle_end);
        }
        Command::Balance { owner } => {
            let owner: Address = owner.parse()?;
            let wallet = client.jetton_wallet_address(&owner, ttl).await?;
            let balance = client.staked_balance(&wallet, ttl).await?;
            println!("Jetton wallet: {}", wallet);
            println!("Staked:        {}", ton(&balance));
        }
        Command::Clear { user } => {
            let removed = if user {
                client.clear_storage_user_data().await?
            } else {
                client.clear_storage_data().await?
            };
            println!("🗑️  Removed {} cached entries", removed);
        }
        Command::Decode { file } => decode_file(&file)?,
    }

    Ok(())
}

fn decode_file(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let stack: Vec<StackRecord> = match serde_json::from_str::<MethodExecutionResult>(&text) {
        Ok(result) => result.stack,
        Err(_) => serde_json::from_str(&text).context("Expected a get-method response or a stack array")?,
    };
    let state = decode_pool_state(&stack)?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}
