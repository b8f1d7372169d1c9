//! Type-preserving JSON codec for cached values.
//!
//! Plain JSON would turn big integers into lossy doubles and dates into bare
//! strings. The codec keeps both by writing tagged forms:
//!
//! - big integer: the string `"<digits>n"` (matches `^-?\d+n$`)
//! - timestamp: `{"__type":"Date","value":"<ISO-8601>"}`, with as many
//!   fractional digits as the value needs so nanoseconds survive
//!
//! Typed structs opt in per field with `#[serde(with = "tagged_bigint")]` /
//! `#[serde(with = "tagged_date")]`. The dynamic [`Value`] tree applies the
//! same tags on encode and revives them on decode.
//!
//! Known hazard: on the dynamic path any string shaped like `"123n"` is
//! revived as a big integer, even if it started life as text. Decoding into a
//! statically typed `String` field is not affected.

use chrono::{DateTime, SecondsFormat, Utc};
use num_bigint::BigInt;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use std::str::FromStr;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub static BIGINT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?\d+n$").expect("static regex"));

const TYPE_KEY: &str = "__type";
const DATE_TAG: &str = "Date";
const LEGACY_BIGINT_TAG: &str = "bigint";

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode value: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode value: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Renders a big integer in its tagged string form.
pub fn bigint_to_tagged(value: &BigInt) -> String {
    format!("{}n", value)
}

/// Parses `"<digits>n"`; returns `None` for anything else.
pub fn bigint_from_tagged(raw: &str) -> Option<BigInt> {
    if !BIGINT_PATTERN.is_match(raw) {
        return None;
    }
    parse_digits(&raw[..raw.len() - 1])
}

fn parse_digits(raw: &str) -> Option<BigInt> {
    BigInt::from_str(raw).ok()
}

fn date_to_iso(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn date_from_iso(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// `#[serde(with = "tagged_bigint")]` for `BigInt` fields.
pub mod tagged_bigint {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Signed(i64),
        Unsigned(u64),
        Legacy {
            #[serde(rename = "__type")]
            kind: String,
            value: String,
        },
    }

    pub fn serialize<S: Serializer>(value: &BigInt, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&bigint_to_tagged(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigInt, D::Error> {
        use serde::de::Error;

        match Repr::deserialize(deserializer)? {
            Repr::Text(raw) => bigint_from_tagged(&raw)
                .or_else(|| parse_digits(&raw))
                .ok_or_else(|| D::Error::custom(format!("invalid big integer `{}`", raw))),
            Repr::Signed(v) => Ok(BigInt::from(v)),
            Repr::Unsigned(v) => Ok(BigInt::from(v)),
            Repr::Legacy { kind, value } if kind == LEGACY_BIGINT_TAG => parse_digits(&value)
                .ok_or_else(|| D::Error::custom(format!("invalid big integer `{}`", value))),
            Repr::Legacy { kind, .. } => Err(D::Error::custom(format!("unexpected tag `{}`", kind))),
        }
    }
}

/// `#[serde(with = "tagged_date")]` for `DateTime<Utc>` fields.
pub mod tagged_date {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Tagged {
            #[serde(rename = "__type")]
            kind: String,
            value: String,
        },
        Plain(String),
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(TYPE_KEY, DATE_TAG)?;
        map.serialize_entry("value", &date_to_iso(value))?;
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        use serde::de::Error;

        let raw = match Repr::deserialize(deserializer)? {
            Repr::Tagged { kind, value } if kind == DATE_TAG => value,
            Repr::Tagged { kind, .. } => {
                return Err(D::Error::custom(format!("unexpected tag `{}`", kind)))
            }
            Repr::Plain(value) => value,
        };
        date_from_iso(&raw).ok_or_else(|| D::Error::custom(format!("invalid date `{}`", raw)))
    }
}

/// Dynamically typed cache value with first-class big integers and dates.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    BigInt(BigInt),
    Date(DateTime<Utc>),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bigint(&self) -> Option<&BigInt> {
        match self {
            Value::BigInt(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Date(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Restores tagged big integers and dates from plain JSON.
    pub fn revive(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => match bigint_from_tagged(&s) {
                Some(v) => Value::BigInt(v),
                None => Value::String(s),
            },
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::revive).collect())
            }
            serde_json::Value::Object(map) => {
                if let Some(revived) = revive_tagged_object(&map) {
                    return revived;
                }
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::revive(v))).collect())
            }
        }
    }
}

fn revive_tagged_object(map: &serde_json::Map<String, serde_json::Value>) -> Option<Value> {
    if map.len() != 2 {
        return None;
    }
    let kind = map.get(TYPE_KEY)?.as_str()?;
    let value = map.get("value")?.as_str()?;
    match kind {
        DATE_TAG => date_from_iso(value).map(Value::Date),
        LEGACY_BIGINT_TAG => parse_digits(value).map(Value::BigInt),
        _ => None,
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => n.serialize(serializer),
            Value::String(s) => serializer.serialize_str(s),
            Value::BigInt(v) => tagged_bigint::serialize(v, serializer),
            Value::Date(d) => tagged_date::serialize(d, serializer),
            Value::Array(items) => items.serialize(serializer),
            Value::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::revive)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(v.into())
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::Number(v.into())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<BigInt> for Value {
    fn from(v: BigInt) -> Self {
        Value::BigInt(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Date(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Value {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Value::Object(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Named codec owned by the cache. Never touches process-wide serializers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Codec;

impl Codec {
    pub fn new() -> Self {
        Self
    }

    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, CodecError> {
        serde_json::to_string(value).map_err(CodecError::Encode)
    }

    /// Serializes to a JSON tree; used to detect `null` before persisting.
    pub fn to_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<serde_json::Value, CodecError> {
        serde_json::to_value(value).map_err(CodecError::Encode)
    }

    pub fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T, CodecError> {
        serde_json::from_str(text).map_err(CodecError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Snapshot {
        #[serde(with = "tagged_bigint")]
        balance: BigInt,
        #[serde(with = "tagged_date")]
        taken_at: DateTime<Utc>,
        label: String,
    }

    #[test]
    fn big_integer_survives_round_trip() {
        let codec = Codec::new();
        let big = BigInt::from_str("123456789012345678901234567890").unwrap();

        let text = codec.encode(&Value::BigInt(big.clone())).unwrap();
        assert_eq!(text, "\"123456789012345678901234567890n\"");

        let back: Value = codec.decode(&text).unwrap();
        assert_eq!(back.as_bigint(), Some(&big));
    }

    #[test]
    fn nested_values_round_trip_with_types() {
        let codec = Codec::new();
        let when = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let value: Value = vec![
            ("balance", Value::from(BigInt::from(-42))),
            ("when", Value::from(when)),
            ("count", Value::from(7i64)),
            ("items", Value::from(vec![Value::Null, Value::from("x")])),
        ]
        .into_iter()
        .collect();

        let text = codec.encode(&value).unwrap();
        assert!(text.contains(r#""balance":"-42n""#));
        assert!(text.contains(r#"{"__type":"Date","value":"2024-05-01T12:30:00Z"}"#));

        let back: Value = codec.decode(&text).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn typed_struct_round_trip_keeps_lookalike_strings() {
        let codec = Codec::new();
        let snap = Snapshot {
            balance: BigInt::from_str("-98765432109876543210").unwrap(),
            taken_at: Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap(),
            label: "123n".to_string(),
        };
        let back: Snapshot = codec.decode(&codec.encode(&snap).unwrap()).unwrap();
        assert_eq!(back, snap);

        // The dynamic path revives the same text as a big integer.
        let dynamic: Value = codec.decode(&codec.encode(&snap).unwrap()).unwrap();
        assert_eq!(dynamic.get("label").and_then(Value::as_bigint), Some(&BigInt::from(123)));
    }

    #[test]
    fn sub_millisecond_dates_round_trip() {
        let codec = Codec::new();
        let now = Utc::now();
        let exact = Utc.with_ymd_and_hms(2026, 10, 16, 19, 54, 18).unwrap() + chrono::Duration::nanoseconds(409_926_663);

        for when in [now, exact] {
            let back: Value = codec.decode(&codec.encode(&Value::Date(when)).unwrap()).unwrap();
            assert_eq!(back, Value::Date(when));
        }
        let text = codec.encode(&Value::Date(exact)).unwrap();
        assert!(text.contains("2026-10-16T19:54:18.409926663Z"), "{}", text);

        // Millisecond text written by older clients still reads.
        let v: Value = codec.decode(r#"{"__type":"Date","value":"2024-05-01T12:30:00.000Z"}"#).unwrap();
        assert_eq!(v.as_date(), Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()));
    }

    #[test]
    fn accepts_legacy_bigint_record() {
        let codec = Codec::new();
        let v: Value = codec.decode(r#"{"__type":"bigint","value":"77"}"#).unwrap();
        assert_eq!(v, Value::BigInt(BigInt::from(77)));
    }
}
