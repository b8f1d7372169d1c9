use num_bigint::{BigInt, Sign};
use num_traits::{Num, ToPrimitive};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Number of decimals of a TON amount expressed in nanotons.
pub const NANO_DECIMALS: u8 = 9;

/// TVM integers are signed 257-bit: `-2^256 ..= 2^256 - 1`.
pub const STACK_INT_BITS: u64 = 257;

/// Parses a stack integer as emitted by tonapi: `0x`-prefixed hex (optionally
/// negative) or plain decimal. Values outside the 257-bit range are rejected.
pub fn parse_stack_int(raw: &str) -> Result<BigInt, ConversionError> {
    let trimmed = raw.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let (radix, body) = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => (16, hex),
        None => (10, digits),
    };
    if body.is_empty() || body.starts_with(['+', '-']) {
        return Err(ConversionError::InvalidInteger(raw.to_string()));
    }
    let magnitude =
        BigInt::from_str_radix(body, radix).map_err(|_| ConversionError::InvalidInteger(raw.to_string()))?;

    let value = if negative { -magnitude } else { magnitude };
    if !fits_stack_int(&value) {
        return Err(ConversionError::Overflow);
    }
    Ok(value)
}

/// True when `value` is representable as a TVM integer.
pub fn fits_stack_int(value: &BigInt) -> bool {
    let bits = value.bits();
    if bits < STACK_INT_BITS {
        return true;
    }
    // -2^256 is the one 257-bit magnitude that fits.
    value.sign() == Sign::Minus && bits == STACK_INT_BITS && value.magnitude().trailing_zeros() == Some(256)
}

/// Parses a decimal big integer (with optional sign).
pub fn parse_dec_bigint(raw: &str) -> Result<BigInt, ConversionError> {
    BigInt::from_str(raw.trim()).map_err(|_| ConversionError::InvalidInteger(raw.to_string()))
}

// Para montos en nanotons -> TON
pub fn bigint_to_decimal(value: &BigInt, decimals: u8) -> Result<Decimal, ConversionError> {
    let value_str = value.to_string();
    let decimal_value = Decimal::from_str(&value_str)
        .map_err(|e| ConversionError::InvalidDecimal(e.to_string()))?;

    let divisor = Decimal::from(10u64.pow(decimals as u32));
    Ok(decimal_value / divisor)
}

pub fn bigint_to_i64(value: &BigInt) -> Result<i64, ConversionError> {
    value.to_i64().ok_or(ConversionError::Overflow)
}

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Invalid decimal: {0}")]
    InvalidDecimal(String),
    #[error("Invalid integer: {0}")]
    InvalidInteger(String),
    #[error("Overflow in conversion")]
    Overflow,
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::One;

    #[test]
    fn parses_hex_and_decimal_stack_ints() {
        assert_eq!(parse_stack_int("0x1f").unwrap(), BigInt::from(31));
        assert_eq!(parse_stack_int("-0x10").unwrap(), BigInt::from(-16));
        assert_eq!(parse_stack_int("12345").unwrap(), BigInt::from(12345));
        assert!(parse_stack_int("0xzz").is_err());
        assert!(parse_stack_int("0x").is_err());
        assert!(parse_stack_int("--5").is_err());
    }

    #[test]
    fn accepts_full_uint256_hash() {
        let hash = format!("0x8f3a{}01", "0".repeat(58));
        let value = parse_stack_int(&hash).unwrap();
        assert_eq!(value.bits(), 256);
        assert_eq!(format!("0x{:x}", value.magnitude()), hash);
    }

    #[test]
    fn enforces_257_bit_range() {
        let max = (BigInt::one() << 256usize) - 1;
        let min = -(BigInt::one() << 256usize);
        assert!(fits_stack_int(&max));
        assert!(fits_stack_int(&min));
        assert!(!fits_stack_int(&(&max + 1)));
        assert!(!fits_stack_int(&(&min - 1)));

        let too_wide = format!("0x1{}", "0".repeat(64));
        assert!(matches!(parse_stack_int(&too_wide), Err(ConversionError::Overflow)));
        assert_eq!(parse_stack_int(&format!("-{}", too_wide)).unwrap(), min);
    }

    #[test]
    fn converts_nanotons_to_ton() {
        let nanotons = BigInt::from(1_500_000_000i64);
        let ton = bigint_to_decimal(&nanotons, NANO_DECIMALS).unwrap();
        assert_eq!(ton, Decimal::from_str("1.5").unwrap());
        assert_eq!(bigint_to_i64(&nanotons).unwrap(), 1_500_000_000);
    }
}
