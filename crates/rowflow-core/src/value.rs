//! Typed cell values and the column type ladder.
//!
//! Every cell that survives parsing is converted into a [`Value`]. The
//! [`ColumnType`] ladder is ordered most-specific first; schema inference
//! narrows each column down the ladder, and the field converter produces
//! values of the declared type (or falls back to strings).

use std::any::Any;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

/// Column types, ordered by inference precedence (most specific first).
///
/// `Str` is the terminal type: a column whose candidate set empties out is
/// pinned to `Str` and never re-examined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Bool,
    I32,
    I64,
    Decimal,
    F64,
    DateTime,
    Guid,
    Str,
}

/// The fixed candidate ladder used by schema inference.
pub const TYPE_LADDER: [ColumnType; 7] = [
    ColumnType::Bool,
    ColumnType::I32,
    ColumnType::I64,
    ColumnType::Decimal,
    ColumnType::F64,
    ColumnType::DateTime,
    ColumnType::Guid,
];

impl ColumnType {
    pub fn name(self) -> &'static str {
        match self {
            ColumnType::Bool => "bool",
            ColumnType::I32 => "i32",
            ColumnType::I64 => "i64",
            ColumnType::Decimal => "decimal",
            ColumnType::F64 => "f64",
            ColumnType::DateTime => "datetime",
            ColumnType::Guid => "guid",
            ColumnType::Str => "string",
        }
    }

    /// Whether this type participates in the numeric-preservation rules
    /// (leading zeros, very long digit runs).
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ColumnType::I32 | ColumnType::I64 | ColumnType::Decimal | ColumnType::F64
        )
    }

    /// The zero value used for unmapped constructor parameters and for
    /// empty cells feeding non-optional slots.
    pub fn zero_value(self) -> Value {
        match self {
            ColumnType::Bool => Value::Bool(false),
            ColumnType::I32 => Value::I32(0),
            ColumnType::I64 => Value::I64(0),
            ColumnType::Decimal => Value::Decimal(Decimal::ZERO),
            ColumnType::F64 => Value::F64(0.0),
            ColumnType::DateTime => Value::DateTime(NaiveDateTime::default()),
            ColumnType::Guid => Value::Guid(Uuid::nil()),
            ColumnType::Str => Value::Str(String::new()),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A converted cell value.
///
/// `Null` is an empty cell. `Composite` carries a nested instance produced
/// by recursive materialization; it only ever appears inside constructor
/// argument arrays, never in emitted [`DynRecord`]s.
#[derive(Debug)]
pub enum Value {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    Decimal(Decimal),
    F64(f64),
    DateTime(NaiveDateTime),
    Guid(Uuid),
    Str(String),
    Composite(Box<dyn Any + Send>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The column type this value inhabits, if it is a plain scalar.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Bool(_) => Some(ColumnType::Bool),
            Value::I32(_) => Some(ColumnType::I32),
            Value::I64(_) => Some(ColumnType::I64),
            Value::Decimal(_) => Some(ColumnType::Decimal),
            Value::F64(_) => Some(ColumnType::F64),
            Value::DateTime(_) => Some(ColumnType::DateTime),
            Value::Guid(_) => Some(ColumnType::Guid),
            Value::Str(_) => Some(ColumnType::Str),
            Value::Null | Value::Composite(_) => None,
        }
    }

    /// Convert this value into `target`, widening or re-parsing as needed.
    ///
    /// `Null` converts to the target's zero value. Strings are parsed with
    /// invariant (dot-decimal) rules; locale-aware parsing happens earlier,
    /// in the field converter.
    pub fn convert_to(self, target: ColumnType) -> Result<Value, ValueTypeError> {
        if self.column_type() == Some(target) {
            return Ok(self);
        }
        let err = |found: &Value| ValueTypeError {
            wanted: target.name(),
            found: found.describe(),
        };
        Ok(match (self, target) {
            (Value::Null, t) => t.zero_value(),
            // Widening numeric conversions.
            (Value::I32(v), ColumnType::I64) => Value::I64(v as i64),
            (Value::I32(v), ColumnType::F64) => Value::F64(v as f64),
            (Value::I32(v), ColumnType::Decimal) => Value::Decimal(Decimal::from(v)),
            (Value::I64(v), ColumnType::F64) => Value::F64(v as f64),
            (Value::I64(v), ColumnType::Decimal) => Value::Decimal(Decimal::from(v)),
            (Value::Decimal(v), ColumnType::F64) => {
                use rust_decimal::prelude::ToPrimitive;
                match v.to_f64() {
                    Some(f) => Value::F64(f),
                    None => return Err(err(&Value::Decimal(v))),
                }
            }
            // Anything renders into a string slot.
            (v, ColumnType::Str) => Value::Str(v.render()),
            // Strings re-parse into typed slots with invariant rules.
            (Value::Str(s), t) => parse_invariant(&s, t).ok_or(ValueTypeError {
                wanted: t.name(),
                found: format!("string {s:?}"),
            })?,
            (v, _) => return Err(err(&v)),
        })
    }

    /// Render as plain text, the way the value would appear in a cell.
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(v) => v.to_string(),
            Value::I32(v) => v.to_string(),
            Value::I64(v) => v.to_string(),
            Value::Decimal(v) => v.to_string(),
            Value::F64(v) => v.to_string(),
            Value::DateTime(v) => v.to_string(),
            Value::Guid(v) => v.to_string(),
            Value::Str(v) => v.clone(),
            Value::Composite(_) => "<composite>".to_string(),
        }
    }

    fn describe(&self) -> String {
        match self.column_type() {
            Some(t) => format!("{t} value"),
            None if self.is_null() => "null".to_string(),
            None => "composite value".to_string(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Guid(a), Value::Guid(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            // Composite instances are opaque; they never compare equal.
            _ => false,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::I32(v) => serializer.serialize_i32(*v),
            Value::I64(v) => serializer.serialize_i64(*v),
            Value::Decimal(v) => Serialize::serialize(v, serializer),
            Value::F64(v) => serializer.serialize_f64(*v),
            Value::DateTime(v) => v.serialize(serializer),
            Value::Guid(v) => v.serialize(serializer),
            Value::Str(v) => serializer.serialize_str(v),
            Value::Composite(_) => serializer.serialize_str("<composite>"),
        }
    }
}

/// Parse `s` into `target` with invariant (dot-decimal, ISO-ish) rules.
/// Used by [`Value::convert_to`]; the locale-aware path lives in the field
/// converter, which runs before values reach this point.
fn parse_invariant(s: &str, target: ColumnType) -> Option<Value> {
    let s = s.trim();
    match target {
        ColumnType::Bool => match s.to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        ColumnType::I32 => i32::from_str(s).ok().map(Value::I32),
        ColumnType::I64 => i64::from_str(s).ok().map(Value::I64),
        ColumnType::Decimal => Decimal::from_str(s).ok().map(Value::Decimal),
        ColumnType::F64 => f64::from_str(s).ok().map(Value::F64),
        ColumnType::DateTime => parse_datetime_invariant(s).map(Value::DateTime),
        ColumnType::Guid => Uuid::parse_str(s).ok().map(Value::Guid),
        ColumnType::Str => Some(Value::Str(s.to_string())),
    }
}

/// Datetime formats tried, in order, when no caller format list applies.
pub const DEFAULT_DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d",
    "%m/%d/%Y",
];

pub(crate) fn parse_datetime_invariant(s: &str) -> Option<NaiveDateTime> {
    parse_datetime_with(s, DEFAULT_DATETIME_FORMATS.iter().copied())
}

/// Try each format as a full datetime, then as a bare date at midnight.
pub fn parse_datetime_with<'a, I>(s: &str, formats: I) -> Option<NaiveDateTime>
where
    I: IntoIterator<Item = &'a str>,
{
    for format in formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// A value could not be converted into the requested slot type.
#[derive(Debug, Clone, thiserror::Error)]
#[error("cannot convert {found} into {wanted}")]
pub struct ValueTypeError {
    pub wanted: &'static str,
    pub found: String,
}

/// How a constructor parameter or settable member is typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotType {
    pub ty: ColumnType,
    /// Optional slots accept `Null` as-is instead of a zero value.
    pub optional: bool,
}

impl SlotType {
    pub const fn of(ty: ColumnType) -> Self {
        SlotType { ty, optional: false }
    }

    pub const fn optional(ty: ColumnType) -> Self {
        SlotType { ty, optional: true }
    }
}

/// Conversion from a [`Value`] into a concrete Rust field type, used by
/// [`Materialize`](crate::materialize::Materialize) implementations.
pub trait FromValue: Sized {
    /// Slot type advertised to plan scoring.
    const SLOT: SlotType;

    fn from_value(value: Value) -> Result<Self, ValueTypeError>;
}

macro_rules! impl_from_value {
    ($rust:ty, $column:expr, $variant:ident) => {
        impl FromValue for $rust {
            const SLOT: SlotType = SlotType::of($column);

            fn from_value(value: Value) -> Result<Self, ValueTypeError> {
                match value.convert_to($column)? {
                    Value::$variant(v) => Ok(v),
                    other => Err(ValueTypeError {
                        wanted: $column.name(),
                        found: other.describe(),
                    }),
                }
            }
        }
    };
}

impl_from_value!(bool, ColumnType::Bool, Bool);
impl_from_value!(i32, ColumnType::I32, I32);
impl_from_value!(i64, ColumnType::I64, I64);
impl_from_value!(Decimal, ColumnType::Decimal, Decimal);
impl_from_value!(f64, ColumnType::F64, F64);
impl_from_value!(NaiveDateTime, ColumnType::DateTime, DateTime);
impl_from_value!(Uuid, ColumnType::Guid, Guid);
impl_from_value!(String, ColumnType::Str, Str);

impl<T: FromValue> FromValue for Option<T> {
    const SLOT: SlotType = SlotType {
        ty: T::SLOT.ty,
        optional: true,
    };

    fn from_value(value: Value) -> Result<Self, ValueTypeError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// An untyped record: the resolved column names zipped with the row's
/// converted values, in schema order.
#[derive(Debug, Default, PartialEq)]
pub struct DynRecord {
    fields: Vec<(String, Value)>,
}

impl DynRecord {
    pub fn new(fields: Vec<(String, Value)>) -> Self {
        DynRecord { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn into_fields(self) -> Vec<(String, Value)> {
        self.fields
    }
}

impl Serialize for DynRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn null_converts_to_zero_values() {
        assert_eq!(i32::from_value(Value::Null).unwrap(), 0);
        assert_eq!(String::from_value(Value::Null).unwrap(), "");
        assert_eq!(Option::<i32>::from_value(Value::Null).unwrap(), None);
    }

    #[test]
    fn widening_conversions() {
        assert_eq!(i64::from_value(Value::I32(7)).unwrap(), 7i64);
        assert_eq!(f64::from_value(Value::I32(7)).unwrap(), 7.0);
        assert_eq!(
            Decimal::from_value(Value::I64(12)).unwrap(),
            Decimal::from(12)
        );
    }

    #[test]
    fn string_slots_accept_anything() {
        assert_eq!(String::from_value(Value::I32(5)).unwrap(), "5");
        assert_eq!(String::from_value(Value::Bool(true)).unwrap(), "true");
    }

    #[test]
    fn strings_reparse_into_typed_slots() {
        assert_eq!(i32::from_value(Value::Str("42".into())).unwrap(), 42);
        assert!(bool::from_value(Value::Str("not a bool".into())).is_err());
    }

    #[test]
    fn datetime_falls_back_to_midnight_for_bare_dates() {
        let dt = parse_datetime_invariant("2024-03-01").unwrap();
        assert_eq!(dt.to_string(), "2024-03-01 00:00:00");
    }
}
