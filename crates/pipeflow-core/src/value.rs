//! Dynamically typed cell values carried by a `Record`.
//!
//! There is no schema: every cell holds one `Value`, and typed reads go through
//! `FromValue`, which applies a small set of lossless-or-parse conversions.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Timestamp(_) => "timestamp",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        i64::from_value(self)
    }

    pub fn as_f64(&self) -> Option<f64> {
        f64::from_value(self)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Convert into a JSON tree. Timestamps become RFC 3339 strings and
    /// non-finite floats become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(J::Number)
                .unwrap_or(J::Null),
            Value::Text(s) => J::String(s.clone()),
            Value::Timestamp(ts) => J::String(ts.to_rfc3339()),
            Value::List(items) => J::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => J::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Rank used to order values of different variants.
    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Float(_) => 3,
            Value::Text(_) => 4,
            Value::Timestamp(_) => 5,
            Value::List(_) => 6,
            Value::Map(_) => 7,
        }
    }
}

// Floats compare by bit pattern so `Value` can be a hash key (needed by
// `distinct`). `Int(1)` and `Float(1.0)` are different values.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (Text(a), Text(b)) => a == b,
            (Timestamp(a), Timestamp(b)) => a == b,
            (List(a), List(b)) => a == b,
            (Map(a), Map(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u8(self.type_rank());
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
            Value::Timestamp(ts) => ts.hash(state),
            Value::List(items) => items.hash(state),
            Value::Map(map) => map.hash(state),
        }
    }
}

/// Total order: nulls first, then by variant rank for mixed types.
/// Floats use IEEE total ordering, so NaN sorts after every number.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Text(a), Text(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            (List(a), List(b)) => a.cmp(b),
            (Map(a), Map(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
            Value::Timestamp(ts) => f.write_str(&ts.to_rfc3339()),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as J;
        match json {
            J::Null => Value::Null,
            J::Bool(b) => Value::Bool(b),
            J::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            J::String(s) => Value::Text(s),
            J::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            J::Object(map) => Value::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect()),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i64 => Int,
    i32 => Int,
    u32 => Int,
    f64 => Float,
    f32 => Float,
    String => Text,
    &str => Text,
    DateTime<Utc> => Timestamp,
    Vec<Value> => List,
    BTreeMap<String, Value> => Map,
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Typed extraction from a `Value`.
///
/// Returns `None` when the stored value cannot be represented as `Self`; the
/// record layer turns that into a `TypeConversion` error naming the column.
pub trait FromValue: Sized {
    fn type_name() -> &'static str;
    fn from_value(value: &Value) -> Option<Self>;

    /// What a null cell reads as through `Record::get_as`. Plain scalars read
    /// as their default; `None` here makes a null cell a conversion error.
    fn null_value() -> Option<Self> {
        None
    }
}

impl FromValue for Value {
    fn type_name() -> &'static str {
        "value"
    }
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromValue for i64 {
    fn null_value() -> Option<Self> {
        Some(Self::default())
    }
    fn type_name() -> &'static str {
        "i64"
    }
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(*i),
            // Only integral floats inside the i64 range convert.
            Value::Float(f) if f.fract() == 0.0 && f.abs() < 9.2e18 => Some(*f as i64),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl FromValue for i32 {
    fn null_value() -> Option<Self> {
        Some(Self::default())
    }
    fn type_name() -> &'static str {
        "i32"
    }
    fn from_value(value: &Value) -> Option<Self> {
        i64::from_value(value).and_then(|i| i32::try_from(i).ok())
    }
}

impl FromValue for f64 {
    fn null_value() -> Option<Self> {
        Some(Self::default())
    }
    fn type_name() -> &'static str {
        "f64"
    }
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl FromValue for bool {
    fn null_value() -> Option<Self> {
        Some(Self::default())
    }
    fn type_name() -> &'static str {
        "bool"
    }
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::Float(f) => Some(*f != 0.0),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl FromValue for String {
    fn null_value() -> Option<Self> {
        Some(Self::default())
    }
    fn type_name() -> &'static str {
        "string"
    }
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null | Value::List(_) | Value::Map(_) => None,
            other => Some(other.to_string()),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn null_value() -> Option<Self> {
        Some(Self::default())
    }
    fn type_name() -> &'static str {
        "timestamp"
    }
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Timestamp(ts) => Some(*ts),
            Value::Text(s) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|ts| ts.with_timezone(&Utc)),
            _ => None,
        }
    }
}

impl FromValue for Vec<Value> {
    fn null_value() -> Option<Self> {
        Some(Self::default())
    }
    fn type_name() -> &'static str {
        "list"
    }
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::List(items) => Some(items.clone()),
            _ => None,
        }
    }
}

/// Null reads as `None`; anything else must convert to `T`.
impl<T: FromValue> FromValue for Option<T> {
    fn type_name() -> &'static str {
        T::type_name()
    }
    fn null_value() -> Option<Self> {
        Some(None)
    }
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn numeric_conversions() {
        assert_eq!(i64::from_value(&Value::Float(3.0)), Some(3));
        assert_eq!(i64::from_value(&Value::Float(3.5)), None);
        assert_eq!(i64::from_value(&Value::Text(" 42 ".into())), Some(42));
        assert_eq!(f64::from_value(&Value::Int(2)), Some(2.0));
        assert_eq!(i32::from_value(&Value::Int(i64::MAX)), None);
        assert_eq!(bool::from_value(&Value::Text("TRUE".into())), Some(true));
        assert_eq!(String::from_value(&Value::Int(7)), Some("7".to_string()));
        assert_eq!(i64::from_value(&Value::Null), None);
    }

    #[test]
    fn null_readings() {
        assert_eq!(i64::null_value(), Some(0));
        assert_eq!(String::null_value(), Some(String::new()));
        assert_eq!(bool::null_value(), Some(false));
        assert_eq!(Option::<f64>::null_value(), Some(None));
        assert_eq!(Value::null_value(), None);
    }

    #[test]
    fn null_reads_as_none_for_optional_targets() {
        assert_eq!(Option::<i64>::from_value(&Value::Null), Some(None));
        assert_eq!(Option::<i64>::from_value(&Value::Int(1)), Some(Some(1)));
        assert_eq!(Option::<i64>::from_value(&Value::Text("x".into())), None);
    }

    #[test]
    fn ordering_puts_nulls_first_and_nan_last() {
        let mut values = vec![
            Value::Float(f64::NAN),
            Value::Float(1.5),
            Value::Null,
            Value::Float(-2.0),
        ];
        values.sort();
        assert!(values[0].is_null());
        assert_eq!(values[1], Value::Float(-2.0));
        assert_eq!(values[2], Value::Float(1.5));
        assert!(matches!(values[3], Value::Float(f) if f.is_nan()));
    }

    #[test]
    fn equal_values_hash_equal() {
        let mut set = HashSet::new();
        assert!(set.insert(Value::Float(1.0)));
        assert!(!set.insert(Value::Float(1.0)));
        assert!(set.insert(Value::Int(1)));
        assert!(set.insert(Value::List(vec![Value::Int(1)])));
        assert!(!set.insert(Value::List(vec![Value::Int(1)])));
    }

    #[test]
    fn json_round_trip_of_nested_values() {
        let json = serde_json::json!({"tags": ["a", "b"], "n": 3, "x": 1.25, "ok": null});
        let value = Value::from(json.clone());
        match &value {
            Value::Map(map) => {
                assert_eq!(map["n"], Value::Int(3));
                assert_eq!(
                    map["tags"],
                    Value::List(vec![Value::from("a"), Value::from("b")])
                );
            }
            other => panic!("expected map, got {other:?}"),
        }
        assert_eq!(value.to_json(), json);
    }
}
