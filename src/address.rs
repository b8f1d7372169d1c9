//! Message addresses as serialized inside cells, plus the user-friendly
//! base64 form used by wallets and explorers.

use crate::cell::{CellError, CellSlice};
use ethers::types::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const BOUNCEABLE_TAG: u8 = 0x11;
const NON_BOUNCEABLE_TAG: u8 = 0x51;
const TEST_FLAG: u8 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error(transparent)]
    Cell(#[from] CellError),
    #[error("expected an internal address, found {0}")]
    NotInternal(&'static str),
    #[error("anycast addresses are not supported")]
    Anycast,
    #[error("variable-length addresses are not supported")]
    VarAddress,
    #[error("external address of {0} bits is too long")]
    ExternalTooLong(usize),
    #[error("invalid address string `{0}`")]
    InvalidFormat(String),
    #[error("address checksum mismatch")]
    Checksum,
}

/// Standard internal address (`addr_std` without anycast).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub workchain: i8,
    pub hash: [u8; 32],
}

impl Address {
    pub fn new(workchain: i8, hash: [u8; 32]) -> Self {
        Self { workchain, hash }
    }

    /// `<workchain>:<hex hash>`
    pub fn to_raw_string(&self) -> String {
        format!("{}:{}", self.workchain, hex::encode(self.hash))
    }

    /// Url-safe friendly form.
    pub fn to_friendly(&self, bounceable: bool, test_only: bool) -> String {
        let mut tag = if bounceable { BOUNCEABLE_TAG } else { NON_BOUNCEABLE_TAG };
        if test_only {
            tag |= TEST_FLAG;
        }

        let mut bytes = Vec::with_capacity(36);
        bytes.push(tag);
        bytes.push(self.workchain as u8);
        bytes.extend_from_slice(&self.hash);
        let crc = crc16_xmodem(&bytes);
        bytes.extend_from_slice(&crc.to_be_bytes());

        base64::encode_config(bytes, base64::URL_SAFE)
    }

    /// Re-renders any parseable address string in friendly form. Strings that
    /// do not parse are returned unchanged.
    pub fn to_readable(address: &str, bounceable: bool) -> String {
        match Address::from_str(address) {
            Ok(parsed) => parsed.to_friendly(bounceable, false),
            Err(e) => {
                log::error!("Invalid address format {}: {}", address, e);
                address.to_string()
            }
        }
    }

    fn parse_friendly(raw: &str) -> Result<Self, AddressError> {
        let normalized: String = raw
            .chars()
            .map(|c| match c {
                '-' => '+',
                '_' => '/',
                other => other,
            })
            .collect();
        let bytes = base64::decode_config(&normalized, base64::STANDARD)
            .map_err(|_| AddressError::InvalidFormat(raw.to_string()))?;
        if bytes.len() != 36 {
            return Err(AddressError::InvalidFormat(raw.to_string()));
        }

        let tag = bytes[0] & !TEST_FLAG;
        if tag != BOUNCEABLE_TAG && tag != NON_BOUNCEABLE_TAG {
            return Err(AddressError::InvalidFormat(raw.to_string()));
        }
        let crc = u16::from_be_bytes([bytes[34], bytes[35]]);
        if crc16_xmodem(&bytes[..34]) != crc {
            return Err(AddressError::Checksum);
        }

        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[2..34]);
        Ok(Address::new(bytes[1] as i8, hash))
    }

    fn parse_raw(raw: &str) -> Result<Self, AddressError> {
        let (wc, hash_hex) = raw
            .split_once(':')
            .ok_or_else(|| AddressError::InvalidFormat(raw.to_string()))?;
        let workchain = wc
            .parse::<i8>()
            .map_err(|_| AddressError::InvalidFormat(raw.to_string()))?;
        let decoded = hex::decode(hash_hex).map_err(|_| AddressError::InvalidFormat(raw.to_string()))?;
        let hash: [u8; 32] = decoded
            .try_into()
            .map_err(|_| AddressError::InvalidFormat(raw.to_string()))?;
        Ok(Address::new(workchain, hash))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_friendly(true, false))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_raw_string())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.contains(':') {
            Self::parse_raw(trimmed)
        } else {
            Self::parse_friendly(trimmed)
        }
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// `addr_extern`: up to 256 bits of opaque data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExternalAddress {
    pub bits: u16,
    pub value: U256,
}

impl fmt::Display for ExternalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "External<{}:{}>", self.bits, self.value)
    }
}

impl FromStr for ExternalAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AddressError::InvalidFormat(s.to_string());
        let inner = s
            .strip_prefix("External<")
            .and_then(|rest| rest.strip_suffix('>'))
            .ok_or_else(invalid)?;
        let (bits, value) = inner.split_once(':').ok_or_else(invalid)?;
        Ok(ExternalAddress {
            bits: bits.parse().map_err(|_| invalid())?,
            value: U256::from_dec_str(value).map_err(|_| invalid())?,
        })
    }
}

/// Result of reading `MsgAddress` where either kind is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnyAddress {
    Internal(Address),
    External(ExternalAddress),
}

impl AnyAddress {
    pub fn as_internal(&self) -> Option<&Address> {
        match self {
            AnyAddress::Internal(addr) => Some(addr),
            AnyAddress::External(_) => None,
        }
    }
}

impl fmt::Display for AnyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnyAddress::Internal(addr) => addr.fmt(f),
            AnyAddress::External(ext) => ext.fmt(f),
        }
    }
}

impl FromStr for AnyAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with("External<") {
            s.parse().map(AnyAddress::External)
        } else {
            s.parse().map(AnyAddress::Internal)
        }
    }
}

impl Serialize for AnyAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AnyAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl<'a> CellSlice<'a> {
    /// Reads an `addr_std`; anything else is an error.
    pub fn load_address(&mut self) -> Result<Address, AddressError> {
        match self.load_address_any()? {
            Some(AnyAddress::Internal(addr)) => Ok(addr),
            Some(AnyAddress::External(_)) => Err(AddressError::NotInternal("addr_extern")),
            None => Err(AddressError::NotInternal("addr_none")),
        }
    }

    /// Reads any `MsgAddress`; `addr_none` yields `None`.
    pub fn load_address_any(&mut self) -> Result<Option<AnyAddress>, AddressError> {
        match self.load_uint(2)? {
            0b00 => Ok(None),
            0b01 => {
                let bits = self.load_uint(9)? as usize;
                if bits > 256 {
                    return Err(AddressError::ExternalTooLong(bits));
                }
                let data = self.load_bits(bits)?;
                let mut value = U256::from_big_endian(&data);
                if bits % 8 != 0 {
                    value >>= 8 - bits % 8;
                }
                Ok(Some(AnyAddress::External(ExternalAddress {
                    bits: bits as u16,
                    value,
                })))
            }
            0b10 => {
                if self.load_bit()? {
                    return Err(AddressError::Anycast);
                }
                let workchain = self.load_int(8)? as i8;
                let mut hash = [0u8; 32];
                hash.copy_from_slice(&self.load_bytes(32)?);
                Ok(Some(AnyAddress::Internal(Address::new(workchain, hash))))
            }
            _ => Err(AddressError::VarAddress),
        }
    }
}

/// CRC-16/XMODEM as used by the friendly address checksum.
fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for byte in data {
        crc ^= (*byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}
