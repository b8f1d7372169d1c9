//! Shared conversion helpers for stack integers and TON amounts.

pub mod conversions;

pub use conversions::{bigint_to_decimal, parse_stack_int, ConversionError, NANO_DECIMALS};
