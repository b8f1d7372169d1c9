//! Stack records returned by a remote get-method call.
//!
//! The wire shape is the tonapi `TvmStackRecord` JSON:
//! `{"type":"num","num":"0x.."}`, `{"type":"cell","cell":"<hex boc>"}`,
//! `{"type":"tuple","tuple":[..]}`, `{"type":"null"}` and `{"type":"nan"}`.

use crate::cell::{Cell, CellError};
use crate::types::conversions::parse_stack_int;
use log::warn;
use num_bigint::{BigInt, Sign};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Serialized bag-of-cells kept as opaque bytes until someone needs its bits.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct CellBlob(Vec<u8>);

impl CellBlob {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn from_hex(raw: &str) -> Result<Self, CellError> {
        hex::decode(raw.trim())
            .map(Self)
            .map_err(|e| CellError::InvalidHex(e.to_string()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Deserializes the bag of cells and returns its root cell.
    pub fn parse(&self) -> Result<Cell, CellError> {
        Cell::from_boc(&self.0)
    }
}

impl fmt::Debug for CellBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CellBlob({})", self.to_hex())
    }
}

impl Serialize for CellBlob {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CellBlob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        CellBlob::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

/// One decoded item of a virtual-machine stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStackRecord", into = "RawStackRecord")]
pub enum StackRecord {
    /// Integer; `None` when the API sent a `num` record without a usable value.
    Int(Option<BigInt>),
    Cell(CellBlob),
    Tuple(Vec<StackRecord>),
    Null,
    Nan,
}

impl StackRecord {
    pub fn int(value: impl Into<BigInt>) -> Self {
        StackRecord::Int(Some(value.into()))
    }

    pub fn cell(blob: CellBlob) -> Self {
        StackRecord::Cell(blob)
    }

    pub fn tuple(items: Vec<StackRecord>) -> Self {
        StackRecord::Tuple(items)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StackRecord::Int(_) => "num",
            StackRecord::Cell(_) => "cell",
            StackRecord::Tuple(_) => "tuple",
            StackRecord::Null => "null",
            StackRecord::Nan => "nan",
        }
    }

    pub fn as_int(&self) -> Option<&BigInt> {
        match self {
            StackRecord::Int(value) => value.as_ref(),
            _ => None,
        }
    }

    pub fn as_cell(&self) -> Option<&CellBlob> {
        match self {
            StackRecord::Cell(blob) => Some(blob),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[StackRecord]> {
        match self {
            StackRecord::Tuple(items) => Some(items),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawStackRecord {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    num: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cell: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tuple: Option<Vec<RawStackRecord>>,
}

#[derive(Debug, thiserror::Error)]
pub enum StackRecordError {
    #[error("unknown stack record type `{0}`")]
    UnknownKind(String),
    #[error("stack record `{0}` is missing its payload")]
    MissingPayload(&'static str),
    #[error(transparent)]
    Cell(#[from] CellError),
}

impl TryFrom<RawStackRecord> for StackRecord {
    type Error = StackRecordError;

    fn try_from(raw: RawStackRecord) -> Result<Self, Self::Error> {
        match raw.kind.as_str() {
            // A bad number must not sink the whole response; the decoder
            // treats a valueless `num` as 0.
            "num" => Ok(StackRecord::Int(raw.num.and_then(|num| match parse_stack_int(&num) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Unreadable stack integer `{}`: {}", num, e);
                    None
                }
            }))),
            "cell" => {
                let cell = raw.cell.ok_or(StackRecordError::MissingPayload("cell"))?;
                Ok(StackRecord::Cell(CellBlob::from_hex(&cell)?))
            }
            "tuple" => {
                let items = raw
                    .tuple
                    .unwrap_or_default()
                    .into_iter()
                    .map(StackRecord::try_from)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(StackRecord::Tuple(items))
            }
            "null" => Ok(StackRecord::Null),
            "nan" => Ok(StackRecord::Nan),
            other => Err(StackRecordError::UnknownKind(other.to_string())),
        }
    }
}

impl From<StackRecord> for RawStackRecord {
    fn from(record: StackRecord) -> Self {
        let kind = record.kind().to_string();
        let mut raw = RawStackRecord {
            kind,
            num: None,
            cell: None,
            tuple: None,
        };
        match record {
            StackRecord::Int(value) => raw.num = value.map(format_stack_int),
            StackRecord::Cell(blob) => raw.cell = Some(blob.to_hex()),
            StackRecord::Tuple(items) => {
                raw.tuple = Some(items.into_iter().map(RawStackRecord::from).collect())
            }
            StackRecord::Null | StackRecord::Nan => {}
        }
        raw
    }
}

fn format_stack_int(value: BigInt) -> String {
    if value.sign() == Sign::Minus {
        format!("-0x{:x}", value.magnitude())
    } else {
        format!("0x{:x}", value.magnitude())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tonapi_records() {
        let raw = r#"[
            {"type":"num","num":"0x2a"},
            {"type":"num"},
            {"type":"cell","cell":"b5ee9c72"},
            {"type":"tuple","tuple":[{"type":"num","num":"-0x1"},{"type":"null"}]},
            {"type":"nan"}
        ]"#;
        let records: Vec<StackRecord> = serde_json::from_str(raw).unwrap();

        assert_eq!(records[0], StackRecord::int(42));
        assert_eq!(records[1], StackRecord::Int(None));
        assert_eq!(records[2].as_cell().unwrap().as_bytes(), &[0xb5, 0xee, 0x9c, 0x72]);
        assert_eq!(
            records[3],
            StackRecord::tuple(vec![StackRecord::int(-1), StackRecord::Null])
        );
        assert_eq!(records[4], StackRecord::Nan);
    }

    #[test]
    fn rejects_unknown_record_type() {
        let err = serde_json::from_str::<StackRecord>(r#"{"type":"slice","slice":"00"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn unreadable_numbers_become_valueless() {
        let hash = format!("0x8f3a{}ff", "0".repeat(58));
        let record: StackRecord = serde_json::from_str(&format!(r#"{{"type":"num","num":"{}"}}"#, hash)).unwrap();
        assert_eq!(record.as_int().map(|v| v.bits()), Some(256));
        assert_eq!(serde_json::to_value(&record).unwrap()["num"], hash.as_str());

        let too_wide = format!("0x1{}", "0".repeat(64));
        let record: StackRecord = serde_json::from_str(&format!(r#"{{"type":"num","num":"{}"}}"#, too_wide)).unwrap();
        assert_eq!(record, StackRecord::Int(None));

        let garbage: StackRecord = serde_json::from_str(r#"{"type":"num","num":"0xzz"}"#).unwrap();
        assert_eq!(garbage, StackRecord::Int(None));
    }

    #[test]
    fn serializes_back_to_wire_shape() {
        let json = serde_json::to_string(&StackRecord::int(-16)).unwrap();
        assert_eq!(json, r#"{"type":"num","num":"-0x10"}"#);
    }
}
