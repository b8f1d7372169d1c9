//! Decoding of the `get_pool_full_data` stack into [`PoolState`].
//!
//! The stack is positional. Which layout applies is decided once, up front,
//! from the number of records: 34 records is the newer contract, any other
//! count is read with the older layout. Field content is never inspected to
//! guess the schema.
//!
//! Every field read goes through one of the [`StackReader`] methods, and the
//! method name spells out the field policy:
//!
//! | reader method        | record expected | wrong kind / no value      |
//! |----------------------|-----------------|----------------------------|
//! | `small_or_zero`      | `num`           | `0`                        |
//! | `flag_or_false`      | `num`           | `false`                    |
//! | `big_or_zero`        | `num`           | `0`                        |
//! | `round_or_empty`     | `tuple`         | [`RoundInfo::default`]     |
//! | `std_address`        | `cell`          | `None`; bad address errors |
//! | `any_address`        | `cell`          | `None`; bad address errors |
//! | `opaque_cell`        | `cell`          | `None`                     |
//!
//! Running past the end of the top-level stack is always a
//! [`DecodeError::OutOfRange`]; there is no partially filled state.

use crate::address::{Address, AddressError, AnyAddress};
use crate::codec::tagged_bigint;
use crate::stack::{CellBlob, StackRecord};
use crate::types::conversions::bigint_to_i64;
use num_bigint::BigInt;
use num_traits::Zero;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Record count of the newer contract layout.
pub const NEW_SCHEMA_RECORD_COUNT: usize = 34;
/// Record count of the older contract layout.
pub const OLD_SCHEMA_RECORD_COUNT: usize = 30;
/// Disbalance tolerance reported for older contracts.
pub const DEFAULT_DISBALANCE_TOLERANCE: i64 = 30;
/// Rates and fees are fixed point with this many fractional bits.
pub const RATE_SCALE_BITS: u32 = 24;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("stack has no record at position {index} (len {len}) for `{field}`")]
    OutOfRange {
        field: &'static str,
        index: usize,
        len: usize,
    },
    #[error("`{field}`: {source}")]
    Address {
        field: &'static str,
        #[source]
        source: AddressError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaVersion {
    /// 30-record layout (and any count other than 34).
    Legacy,
    /// 34-record layout with instant withdrawal fee and governance accrual.
    Current,
}

impl SchemaVersion {
    pub fn for_record_count(count: usize) -> Self {
        if count == NEW_SCHEMA_RECORD_COUNT {
            SchemaVersion::Current
        } else {
            SchemaVersion::Legacy
        }
    }
}

/// Lending round summary (`previous_round` / `current_round`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundInfo {
    pub borrowers: Option<CellBlob>,
    pub round_id: i64,
    #[serde(with = "tagged_bigint")]
    pub active_borrowers: BigInt,
    #[serde(with = "tagged_bigint")]
    pub borrowed: BigInt,
    #[serde(with = "tagged_bigint")]
    pub expected: BigInt,
    #[serde(with = "tagged_bigint")]
    pub returned: BigInt,
    #[serde(with = "tagged_bigint")]
    pub profit: BigInt,
}

/// Snapshot of the staking pool contract as returned by `get_pool_full_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolState {
    pub schema: SchemaVersion,

    pub state: i64,
    pub halted: bool,
    #[serde(with = "tagged_bigint")]
    pub total_balance: BigInt,
    /// Raw 2^24 fixed point.
    pub interest_rate: i64,
    pub optimistic_deposit_withdrawals: bool,
    pub deposits_open: bool,
    pub instant_withdrawal_fee: i64,
    #[serde(with = "tagged_bigint")]
    pub saved_validator_set_hash: BigInt,

    pub previous_round: RoundInfo,
    pub current_round: RoundInfo,

    #[serde(with = "tagged_bigint")]
    pub min_loan: BigInt,
    #[serde(with = "tagged_bigint")]
    pub max_loan: BigInt,
    /// Raw 2^24 fixed point.
    pub governance_fee: i64,
    #[serde(with = "tagged_bigint")]
    pub accrued_governance_fee: BigInt,
    pub disbalance_tolerance: i64,
    pub credit_start_prior_elections_end: i64,

    pub pool_jetton_minter: Option<Address>,
    #[serde(with = "tagged_bigint")]
    pub pool_jetton_supply: BigInt,

    pub deposit_payout: Option<AnyAddress>,
    #[serde(with = "tagged_bigint")]
    pub requested_for_deposit: BigInt,
    pub withdrawal_payout: Option<AnyAddress>,
    #[serde(with = "tagged_bigint")]
    pub requested_for_withdrawal: BigInt,

    pub sudoer: Option<AnyAddress>,
    pub sudoer_set_at: i64,
    pub governor: Option<Address>,
    pub governor_update_after: i64,
    pub interest_manager: Option<Address>,
    pub halter: Option<Address>,
    pub approver: Option<Address>,

    pub controller_code: Option<CellBlob>,
    pub jetton_wallet_code: Option<CellBlob>,
    pub payout_minter_code: Option<CellBlob>,

    #[serde(with = "tagged_bigint")]
    pub projected_total_balance: BigInt,
    #[serde(with = "tagged_bigint")]
    pub projected_pool_supply: BigInt,
}

impl Default for RoundInfo {
    fn default() -> Self {
        Self {
            borrowers: None,
            round_id: 0,
            active_borrowers: BigInt::zero(),
            borrowed: BigInt::zero(),
            expected: BigInt::zero(),
            returned: BigInt::zero(),
            profit: BigInt::zero(),
        }
    }
}

impl PoolState {
    /// Pool token supply; same value as `pool_jetton_supply`.
    pub fn supply(&self) -> &BigInt {
        &self.pool_jetton_supply
    }

    /// `interest_rate` as a fraction.
    pub fn interest_rate_fraction(&self) -> f64 {
        scale_rate(self.interest_rate)
    }

    /// `governance_fee` as a fraction.
    pub fn governance_fee_fraction(&self) -> f64 {
        scale_rate(self.governance_fee)
    }
}

pub fn scale_rate(raw: i64) -> f64 {
    raw as f64 / (1u64 << RATE_SCALE_BITS) as f64
}

/// Forward-only cursor over one tuple level.
pub struct StackReader<'a> {
    records: &'a [StackRecord],
    pos: usize,
}

impl<'a> StackReader<'a> {
    pub fn new(records: &'a [StackRecord]) -> Self {
        Self { records, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn next(&mut self, field: &'static str) -> Result<&'a StackRecord, DecodeError> {
        let record = self.records.get(self.pos).ok_or(DecodeError::OutOfRange {
            field,
            index: self.pos,
            len: self.records.len(),
        })?;
        self.pos += 1;
        Ok(record)
    }

    pub fn big_or_zero(&mut self, field: &'static str) -> Result<BigInt, DecodeError> {
        Ok(self.next(field)?.as_int().cloned().unwrap_or_else(BigInt::zero))
    }

    pub fn small_or_zero(&mut self, field: &'static str) -> Result<i64, DecodeError> {
        let value = self.big_or_zero(field)?;
        Ok(bigint_to_i64(&value).unwrap_or_else(|_| {
            warn!("Stack field {} does not fit in i64 ({}), using 0", field, value);
            0
        }))
    }

    pub fn flag_or_false(&mut self, field: &'static str) -> Result<bool, DecodeError> {
        Ok(self.small_or_zero(field)? != 0)
    }

    pub fn opaque_cell(&mut self, field: &'static str) -> Result<Option<CellBlob>, DecodeError> {
        Ok(self.next(field)?.as_cell().cloned())
    }

    pub fn std_address(&mut self, field: &'static str) -> Result<Option<Address>, DecodeError> {
        match self.next(field)?.as_cell() {
            None => Ok(None),
            Some(blob) => read_address(blob, field, |slice| slice.load_address()).map(Some),
        }
    }

    pub fn any_address(&mut self, field: &'static str) -> Result<Option<AnyAddress>, DecodeError> {
        match self.next(field)?.as_cell() {
            None => Ok(None),
            Some(blob) => read_address(blob, field, |slice| slice.load_address_any()),
        }
    }

    pub fn round_or_empty(&mut self, field: &'static str) -> Result<RoundInfo, DecodeError> {
        let items = self.next(field)?.as_tuple().unwrap_or(&[]);
        Ok(RoundReader::new(items).read())
    }
}

fn read_address<T>(
    blob: &CellBlob,
    field: &'static str,
    load: impl FnOnce(&mut crate::cell::CellSlice<'_>) -> Result<T, AddressError>,
) -> Result<T, DecodeError> {
    let cell = blob
        .parse()
        .map_err(|e| DecodeError::Address { field, source: e.into() })?;
    let mut slice = cell.begin_parse();
    load(&mut slice).map_err(|source| DecodeError::Address { field, source })
}

/// Second nesting level. Items missing from a short round tuple take their defaults.
struct RoundReader<'a> {
    items: &'a [StackRecord],
    pos: usize,
}

impl<'a> RoundReader<'a> {
    fn new(items: &'a [StackRecord]) -> Self {
        Self { items, pos: 0 }
    }

    fn next(&mut self) -> Option<&'a StackRecord> {
        let item = self.items.get(self.pos);
        self.pos += 1;
        item
    }

    fn big(&mut self) -> BigInt {
        self.next().and_then(StackRecord::as_int).cloned().unwrap_or_else(BigInt::zero)
    }

    fn read(mut self) -> RoundInfo {
        let borrowers = self.next().and_then(StackRecord::as_cell).cloned();
        let round_id = bigint_to_i64(&self.big()).unwrap_or(0);
        RoundInfo {
            borrowers,
            round_id,
            active_borrowers: self.big(),
            borrowed: self.big(),
            expected: self.big(),
            returned: self.big(),
            profit: self.big(),
        }
    }
}

/// Decodes a `get_pool_full_data` stack.
pub fn decode_pool_state(stack: &[StackRecord]) -> Result<PoolState, DecodeError> {
    let schema = SchemaVersion::for_record_count(stack.len());
    let current = schema == SchemaVersion::Current;
    let mut r = StackReader::new(stack);

    let state = r.small_or_zero("state")?;
    let halted = r.flag_or_false("halted")?;
    let total_balance = r.big_or_zero("total_balance")?;
    let interest_rate = r.small_or_zero("interest_rate")?;
    let optimistic_deposit_withdrawals = r.flag_or_false("optimistic_deposit_withdrawals")?;
    let deposits_open = r.flag_or_false("deposits_open")?;
    let instant_withdrawal_fee = if current {
        r.small_or_zero("instant_withdrawal_fee")?
    } else {
        0
    };
    let saved_validator_set_hash = r.big_or_zero("saved_validator_set_hash")?;

    let previous_round = r.round_or_empty("previous_round")?;
    let current_round = r.round_or_empty("current_round")?;

    let min_loan = r.big_or_zero("min_loan")?;
    let max_loan = r.big_or_zero("max_loan")?;
    let governance_fee = r.small_or_zero("governance_fee")?;

    let (accrued_governance_fee, disbalance_tolerance, credit_start_prior_elections_end) = if current {
        (
            r.big_or_zero("accrued_governance_fee")?,
            r.small_or_zero("disbalance_tolerance")?,
            r.small_or_zero("credit_start_prior_elections_end")?,
        )
    } else {
        (BigInt::zero(), DEFAULT_DISBALANCE_TOLERANCE, 0)
    };

    let pool_jetton_minter = r.std_address("pool_jetton_minter")?;
    let pool_jetton_supply = r.big_or_zero("pool_jetton_supply")?;

    let deposit_payout = r.any_address("deposit_payout")?;
    let requested_for_deposit = r.big_or_zero("requested_for_deposit")?;
    let withdrawal_payout = r.any_address("withdrawal_payout")?;
    let requested_for_withdrawal = r.big_or_zero("requested_for_withdrawal")?;

    let sudoer = r.any_address("sudoer")?;
    let sudoer_set_at = r.small_or_zero("sudoer_set_at")?;
    let governor = r.std_address("governor")?;
    let governor_update_after = r.small_or_zero("governor_update_after")?;
    let interest_manager = r.std_address("interest_manager")?;
    let halter = r.std_address("halter")?;
    let approver = r.std_address("approver")?;

    let controller_code = r.opaque_cell("controller_code")?;
    let jetton_wallet_code = r.opaque_cell("jetton_wallet_code")?;
    let payout_minter_code = r.opaque_cell("payout_minter_code")?;

    let projected_total_balance = r.big_or_zero("projected_total_balance")?;
    let projected_pool_supply = r.big_or_zero("projected_pool_supply")?;

    if r.position() != stack.len() {
        debug!(
            "Pool stack has {} trailing records ({:?} layout)",
            stack.len() - r.position(),
            schema
        );
    }

    Ok(PoolState {
        schema,
        state,
        halted,
        total_balance,
        interest_rate,
        optimistic_deposit_withdrawals,
        deposits_open,
        instant_withdrawal_fee,
        saved_validator_set_hash,
        previous_round,
        current_round,
        min_loan,
        max_loan,
        governance_fee,
        accrued_governance_fee,
        disbalance_tolerance,
        credit_start_prior_elections_end,
        pool_jetton_minter,
        pool_jetton_supply,
        deposit_payout,
        requested_for_deposit,
        withdrawal_payout,
        requested_for_withdrawal,
        sudoer,
        sudoer_set_at,
        governor,
        governor_update_after,
        interest_manager,
        halter,
        approver,
        controller_code,
        jetton_wallet_code,
        payout_minter_code,
        projected_total_balance,
        projected_pool_supply,
    })
}
