//! Decoded PLC values and the byte codec.
//!
//! [`Value`] is the tree a handle's fields are bound into: scalars at the
//! leaves, [`Value::Object`] and [`Value::Array`] as containers. [`decode`]
//! and [`encode`] convert one item of a [`TypeDescriptor`] between
//! little-endian bytes and a `Value`.
//!
//! Date and time types are counted from the Unix epoch. When the local
//! timezone is in effect, decoding adds the local offset (UTC minus local
//! time, in minutes) and encoding removes it, so a PLC clock kept in local
//! time reads back as the same wall-clock value.
//!
//! # Example
//!
//! ```
//! use beckhoff_ads::types::{INT, STRING};
//! use beckhoff_ads::value::{decode, encode};
//! use beckhoff_ads::Value;
//!
//! let mut buf = [0u8; 2];
//! encode(&INT, &Value::Int(-2), &mut buf, 0, false).unwrap();
//! assert_eq!(buf, [0xFE, 0xFF]);
//! assert_eq!(decode(&INT, &buf, 0, false), Value::Int(-2));
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Local, Offset, TimeZone, Utc};

use crate::error::{AdsError, Result};
use crate::response::latin1_until_nul;
use crate::types::{Primitive, TypeDescriptor, TypeKind};

/// A decoded value or a container of values.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Value {
    /// No value.
    #[default]
    Null,
    /// `BOOL`.
    Bool(bool),
    /// Signed integers.
    Int(i64),
    /// Unsigned integers.
    UInt(u64),
    /// `REAL` and `LREAL`.
    Real(f64),
    /// `STRING`.
    String(String),
    /// Date and time types.
    DateTime(DateTime<Utc>),
    /// Untyped bytes.
    Bytes(Vec<u8>),
    /// Ordered list.
    Array(Vec<Value>),
    /// Named members.
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Creates an empty object.
    pub fn object() -> Self {
        Self::Object(BTreeMap::new())
    }

    /// Returns whether this is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the boolean, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the value as `i64` if it is an integer that fits.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Returns the value as `u64` if it is a non-negative integer.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt(v) => Some(*v),
            Self::Int(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Returns the value as `f64` for any number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::UInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Returns the string slice, if this is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the timestamp, if this is a `DateTime`.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::DateTime(t) => Some(*t),
            _ => None,
        }
    }

    /// Returns the bytes, if this is `Bytes`.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the elements, if this is an `Array`.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the member `key` of an object.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Object(map) => map.get(key),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::String(s) => f.write_str(s),
            Self::DateTime(t) => write!(f, "{}", t.to_rfc3339()),
            Self::Bytes(b) => {
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Object(map) => {
                f.write_str("{")?;
                for (i, (key, item)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{key}:{item}")?;
                }
                f.write_str("}")
            }
        }
    }
}

macro_rules! value_from {
    ($($t:ty => $variant:ident as $target:ty),* $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Self::$variant(<$target>::from(v))
                }
            }
        )*
    };
}

value_from! {
    bool => Bool as bool,
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int as i64,
    u8 => UInt as u64,
    u16 => UInt as u64,
    u32 => UInt as u64,
    u64 => UInt as u64,
    f32 => Real as f64,
    f64 => Real as f64,
    String => String as String,
    &str => String as String,
    DateTime<Utc> => DateTime as DateTime<Utc>,
    Vec<Value> => Array as Vec<Value>,
}

/// Offset of local time from UTC at `t`, as UTC minus local in minutes.
fn local_offset_minutes(t: DateTime<Utc>) -> i64 {
    let east = Local.offset_from_utc_datetime(&t.naive_utc()).fix().local_minus_utc();
    -i64::from(east) / 60
}

/// Decodes one item of `ty` at `offset`.
///
/// Returns `Value::Null` when the buffer is too short or the type has no
/// codec.
pub fn decode(ty: &TypeDescriptor, buf: &[u8], offset: usize, use_local_timezone: bool) -> Value {
    decode_with(ty, buf, offset, use_local_timezone, &local_offset_minutes)
}

/// Encodes `value` as one item of `ty` at `offset`.
///
/// # Errors
///
/// Returns `AdsError::InvalidParameter` if the value does not fit the type
/// and `AdsError::Decode` if the buffer is too short.
pub fn encode(
    ty: &TypeDescriptor,
    value: &Value,
    buf: &mut [u8],
    offset: usize,
    use_local_timezone: bool,
) -> Result<()> {
    encode_with(ty, value, buf, offset, use_local_timezone, &local_offset_minutes)
}

pub(crate) fn decode_with(
    ty: &TypeDescriptor,
    buf: &[u8],
    offset: usize,
    use_local_timezone: bool,
    offset_at: &dyn Fn(DateTime<Utc>) -> i64,
) -> Value {
    let len = ty.length();
    let Some(data) = offset
        .checked_add(len)
        .and_then(|end| buf.get(offset..end))
    else {
        return Value::Null;
    };

    let primitive = match ty.kind() {
        TypeKind::Primitive(p) => *p,
        TypeKind::Raw => return Value::Bytes(data.to_vec()),
        TypeKind::Unknown(_) => return Value::Null,
    };

    match primitive {
        Primitive::Bool => Value::Bool(data[0] != 0),
        Primitive::Byte | Primitive::Usint => Value::UInt(u64::from(data[0])),
        Primitive::Sint => Value::Int(i64::from(data[0] as i8)),
        Primitive::Word | Primitive::Uint => Value::UInt(u64::from(le_u16(data))),
        Primitive::Int => Value::Int(i64::from(le_u16(data) as i16)),
        Primitive::Dword | Primitive::Udint => Value::UInt(u64::from(le_u32(data))),
        Primitive::Dint => Value::Int(i64::from(le_u32(data) as i32)),
        Primitive::Lint => Value::Int(le_u64(data) as i64),
        Primitive::Ulint => Value::UInt(le_u64(data)),
        Primitive::Real => Value::Real(f64::from(f32::from_bits(le_u32(data)))),
        Primitive::Lreal => Value::Real(f64::from_bits(le_u64(data))),
        Primitive::String => Value::String(latin1_until_nul(data)),
        Primitive::Time | Primitive::TimeOfDay | Primitive::Tod => {
            decode_time(i64::from(le_u32(data)), use_local_timezone, offset_at)
        }
        Primitive::Date | Primitive::DateAndTime | Primitive::Dt => {
            decode_time(i64::from(le_u32(data)) * 1000, use_local_timezone, offset_at)
        }
    }
}

pub(crate) fn encode_with(
    ty: &TypeDescriptor,
    value: &Value,
    buf: &mut [u8],
    offset: usize,
    use_local_timezone: bool,
    offset_at: &dyn Fn(DateTime<Utc>) -> i64,
) -> Result<()> {
    let len = ty.length();
    let buf_len = buf.len();
    let out = offset
        .checked_add(len)
        .and_then(|end| buf.get_mut(offset..end))
        .ok_or_else(|| {
            AdsError::decode(format!(
                "{ty} does not fit at offset {offset} of a {buf_len} byte buffer"
            ))
        })?;

    let primitive = match ty.kind() {
        TypeKind::Primitive(p) => *p,
        TypeKind::Raw => {
            let bytes = value
                .as_bytes()
                .ok_or_else(|| mismatch(ty, value))?;
            let n = bytes.len().min(len);
            out[..n].copy_from_slice(&bytes[..n]);
            return Ok(());
        }
        TypeKind::Unknown(_) => return Err(mismatch(ty, value)),
    };

    match primitive {
        Primitive::Bool => out[0] = u8::from(truthy(ty, value)?),
        Primitive::Byte | Primitive::Usint => out[0] = ranged::<u8>(ty, value)?,
        Primitive::Sint => out[0] = ranged::<i8>(ty, value)? as u8,
        Primitive::Word | Primitive::Uint => {
            out.copy_from_slice(&ranged::<u16>(ty, value)?.to_le_bytes())
        }
        Primitive::Int => out.copy_from_slice(&ranged::<i16>(ty, value)?.to_le_bytes()),
        Primitive::Dword | Primitive::Udint => {
            out.copy_from_slice(&ranged::<u32>(ty, value)?.to_le_bytes())
        }
        Primitive::Dint => out.copy_from_slice(&ranged::<i32>(ty, value)?.to_le_bytes()),
        Primitive::Lint => out.copy_from_slice(&ranged::<i64>(ty, value)?.to_le_bytes()),
        Primitive::Ulint => out.copy_from_slice(&ranged::<u64>(ty, value)?.to_le_bytes()),
        Primitive::Real => {
            let v = value.as_f64().ok_or_else(|| mismatch(ty, value))?;
            out.copy_from_slice(&(v as f32).to_le_bytes());
        }
        Primitive::Lreal => {
            let v = value.as_f64().ok_or_else(|| mismatch(ty, value))?;
            out.copy_from_slice(&v.to_le_bytes());
        }
        Primitive::String => encode_string(ty, value, out)?,
        Primitive::Time | Primitive::TimeOfDay | Primitive::Tod => {
            let ms = encode_time(ty, value, use_local_timezone, offset_at)?;
            out.copy_from_slice(&to_u32(ty, value, ms)?.to_le_bytes());
        }
        Primitive::Date | Primitive::DateAndTime | Primitive::Dt => {
            let ms = encode_time(ty, value, use_local_timezone, offset_at)?;
            out.copy_from_slice(&to_u32(ty, value, ms.div_euclid(1000))?.to_le_bytes());
        }
    }
    Ok(())
}

fn le_u16(data: &[u8]) -> u16 {
    u16::from_le_bytes([data[0], data[1]])
}

fn le_u32(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}

fn le_u64(data: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[..8]);
    u64::from_le_bytes(raw)
}

fn mismatch(ty: &TypeDescriptor, value: &Value) -> AdsError {
    AdsError::invalid_parameter(ty.to_string(), format!("cannot encode {value}"))
}

fn truthy(ty: &TypeDescriptor, value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Int(v) => Ok(*v != 0),
        Value::UInt(v) => Ok(*v != 0),
        _ => Err(mismatch(ty, value)),
    }
}

fn integer(ty: &TypeDescriptor, value: &Value) -> Result<i128> {
    match value {
        Value::Bool(b) => Ok(i128::from(*b)),
        Value::Int(v) => Ok(i128::from(*v)),
        Value::UInt(v) => Ok(i128::from(*v)),
        Value::Real(v) if v.fract() == 0.0 && v.is_finite() => Ok(*v as i128),
        _ => Err(mismatch(ty, value)),
    }
}

fn ranged<T: TryFrom<i128>>(ty: &TypeDescriptor, value: &Value) -> Result<T> {
    T::try_from(integer(ty, value)?).map_err(|_| {
        AdsError::invalid_parameter(ty.to_string(), format!("{value} is out of range"))
    })
}

fn to_u32(ty: &TypeDescriptor, value: &Value, raw: i64) -> Result<u32> {
    u32::try_from(raw).map_err(|_| {
        AdsError::invalid_parameter(ty.to_string(), format!("{value} is out of range"))
    })
}

fn encode_string(ty: &TypeDescriptor, value: &Value, out: &mut [u8]) -> Result<()> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Int(_) | Value::UInt(_) | Value::Real(_) => value.to_string(),
        _ => return Err(mismatch(ty, value)),
    };
    let capacity = out.len().saturating_sub(1);
    let mut written = 0;
    for c in text.chars().take(capacity) {
        out[written] = (u32::from(c) & 0xFF) as u8;
        written += 1;
    }
    if written < out.len() {
        out[written] = 0;
    }
    Ok(())
}

fn decode_time(
    millis: i64,
    use_local_timezone: bool,
    offset_at: &dyn Fn(DateTime<Utc>) -> i64,
) -> Value {
    let Some(raw) = DateTime::<Utc>::from_timestamp_millis(millis) else {
        return Value::Null;
    };
    if !use_local_timezone {
        return Value::DateTime(raw);
    }
    Value::DateTime(raw + chrono::Duration::minutes(offset_at(raw)))
}

fn encode_time(
    ty: &TypeDescriptor,
    value: &Value,
    use_local_timezone: bool,
    offset_at: &dyn Fn(DateTime<Utc>) -> i64,
) -> Result<i64> {
    let wall = match value {
        Value::DateTime(t) => *t,
        Value::Int(_) | Value::UInt(_) => value
            .as_i64()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| mismatch(ty, value))?,
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| mismatch(ty, value))?,
        _ => return Err(mismatch(ty, value)),
    };
    if !use_local_timezone {
        return Ok(wall.timestamp_millis());
    }

    // Find raw with raw + offset_at(raw) == wall; offsets differ across a DST change.
    let shift = |t: DateTime<Utc>| wall - chrono::Duration::minutes(offset_at(t));
    let mut raw = shift(wall);
    for _ in 0..3 {
        let next = shift(raw);
        if next == raw {
            break;
        }
        raw = next;
    }
    Ok(raw.timestamp_millis())
}
