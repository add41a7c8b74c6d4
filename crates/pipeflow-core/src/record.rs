//! `Record`: an ordered, case-insensitive, schema-less row.
//!
//! Column positions are fixed at first write. Names are matched without regard
//! to case, and the first-seen spelling is the one reported back.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Index;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::error::{Error, Result};
use crate::value::{FromValue, Value};

#[derive(Debug, Clone, Default)]
pub struct Record {
    /// (first-seen name, value) in insertion order.
    cells: Vec<(String, Value)>,
    /// folded name -> position in `cells`.
    index: HashMap<String, usize>,
}

fn fold(name: &str) -> String {
    name.to_lowercase()
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(columns: usize) -> Self {
        Self {
            cells: Vec::with_capacity(columns),
            index: HashMap::with_capacity(columns),
        }
    }

    /// Build a record from name/value pairs. Later pairs overwrite earlier ones
    /// whose names differ only by case.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut record = Record::new();
        for (k, v) in pairs {
            record.set(k, v);
        }
        record
    }

    /// Build a record from a JSON object; nested arrays/objects become
    /// `Value::List`/`Value::Map`.
    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        match json {
            serde_json::Value::Object(map) => {
                Ok(Record::from_pairs(map.into_iter().map(|(k, v)| (k, Value::from(v)))))
            }
            other => Err(Error::Source(format!(
                "expected a JSON object for a record, got {other}"
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn contains_column(&self, name: &str) -> bool {
        self.index.contains_key(&fold(name))
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.index
            .get(&fold(name))
            .copied()
            .ok_or_else(|| Error::ColumnNotFound {
                column: name.to_string(),
            })
    }

    pub fn get(&self, name: &str) -> Result<&Value> {
        let pos = self.position(name)?;
        Ok(&self.cells[pos].1)
    }

    pub fn get_at(&self, index: usize) -> Result<&Value> {
        self.cells
            .get(index)
            .map(|(_, v)| v)
            .ok_or(Error::IndexOutOfRange {
                index,
                len: self.cells.len(),
            })
    }

    /// Insert or overwrite. A new column is appended; an existing one (matched
    /// case-insensitively) keeps its position and first-seen spelling.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.index.get(&fold(&name)) {
            Some(&pos) => self.cells[pos].1 = value,
            None => {
                self.index.insert(fold(&name), self.cells.len());
                self.cells.push((name, value));
            }
        }
    }

    /// Overwrite the value at an existing position.
    pub fn set_at(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        let len = self.cells.len();
        let cell = self
            .cells
            .get_mut(index)
            .ok_or(Error::IndexOutOfRange { index, len })?;
        cell.1 = value.into();
        Ok(())
    }

    /// Typed read. Missing columns are `ColumnNotFound`; values that cannot
    /// become `T` are `TypeConversion`. A null cell reads as `T`'s default
    /// (`None` for `Option<T>`).
    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<T> {
        let value = self.get(name)?;
        if value.is_null() {
            if let Some(v) = T::null_value() {
                return Ok(v);
            }
        }
        T::from_value(value).ok_or_else(|| Error::TypeConversion {
            column: name.to_string(),
            target: T::type_name(),
            found: format!("{} ({})", value, value.type_name()),
        })
    }

    /// Like `get_as`, but reports failure of either kind as `None`. A null
    /// cell is a successful read.
    pub fn try_get<T: FromValue>(&self, name: &str) -> Option<T> {
        self.get_as(name).ok()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.cells.iter().map(|(name, v)| (name.as_str(), v))
    }

    /// Ordered snapshot of the row.
    pub fn to_pairs(&self) -> Vec<(String, Value)> {
        self.cells.clone()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.cells
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

// Equality follows column order, case-folded names, and cell values.
impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.cells.len() == other.cells.len()
            && self
                .cells
                .iter()
                .zip(&other.cells)
                .all(|((ka, va), (kb, vb))| va == vb && fold(ka) == fold(kb))
    }
}

impl Eq for Record {}

impl Hash for Record {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.cells.len());
        for (k, v) in &self.cells {
            fold(k).hash(state);
            v.hash(state);
        }
    }
}

impl Index<&str> for Record {
    type Output = Value;

    fn index(&self, name: &str) -> &Value {
        match self.get(name) {
            Ok(v) => v,
            Err(e) => panic!("{e}"),
        }
    }
}

impl Index<usize> for Record {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        match self.get_at(index) {
            Ok(v) => v,
            Err(e) => panic!("{e}"),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (k, v)) in self.cells.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k}: {v}")?;
        }
        f.write_str("}")
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (k, v) in &self.cells {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Record::from_pairs(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Record {
        Record::from_pairs([
            ("Id", Value::Int(1)),
            ("Name", Value::from("ada")),
            ("Score", Value::Float(9.5)),
        ])
    }

    #[test]
    fn case_variants_share_one_column() {
        let mut r = Record::new();
        r.set("Email", "a@x");
        r.set("EMAIL", "b@x");
        assert_eq!(r.len(), 1);
        assert_eq!(r.column_names().collect::<Vec<_>>(), vec!["Email"]);
        assert_eq!(r.get("email").unwrap(), &Value::from("b@x"));
    }

    #[test]
    fn positions_are_fixed_at_first_write() {
        let mut r = sample();
        r.set("name", "grace");
        r.set("extra", true);
        assert_eq!(
            r.column_names().collect::<Vec<_>>(),
            vec!["Id", "Name", "Score", "extra"]
        );
        assert_eq!(r[1], Value::from("grace"));
        assert_eq!(r["EXTRA"], Value::Bool(true));
    }

    #[test]
    fn positional_access_is_bounds_checked() {
        let mut r = sample();
        assert_eq!(r.get_at(0).unwrap(), &Value::Int(1));
        assert!(matches!(
            r.get_at(3),
            Err(Error::IndexOutOfRange { index: 3, len: 3 })
        ));
        assert!(r.set_at(5, 1).is_err());
        r.set_at(2, 7.0).unwrap();
        assert_eq!(r["score"], Value::Float(7.0));
    }

    #[test]
    fn unknown_columns_fail_with_not_found() {
        let r = sample();
        assert!(matches!(
            r.get("missing"),
            Err(Error::ColumnNotFound { ref column }) if column == "missing"
        ));
        assert!(!r.contains_column("missing"));
        assert!(r.contains_column("SCORE"));
    }

    #[test]
    fn typed_reads_distinguish_missing_from_unconvertible() {
        let r = sample();
        assert_eq!(r.get_as::<i64>("id").unwrap(), 1);
        assert_eq!(r.get_as::<String>("name").unwrap(), "ada");
        assert!(matches!(
            r.get_as::<i64>("name"),
            Err(Error::TypeConversion { target: "i64", .. })
        ));
        assert!(matches!(
            r.get_as::<i64>("nope"),
            Err(Error::ColumnNotFound { .. })
        ));
        assert_eq!(r.try_get::<f64>("score"), Some(9.5));
        assert_eq!(r.try_get::<i64>("name"), None);
        assert_eq!(r.try_get::<i64>("nope"), None);
    }

    #[test]
    fn null_cells_read_as_defaults() {
        let mut r = Record::new();
        r.set("maybe", Value::Null);
        assert_eq!(r.get_as::<Option<i64>>("maybe").unwrap(), None);
        assert_eq!(r.get_as::<i64>("maybe").unwrap(), 0);
        assert_eq!(r.get_as::<String>("MAYBE").unwrap(), "");
        assert_eq!(r.try_get::<f64>("maybe"), Some(0.0));
        assert_eq!(r.get_as::<Value>("maybe").unwrap(), Value::Null);
        assert!(matches!(r.get_as::<i64>("other"), Err(Error::ColumnNotFound { .. })));
    }

    #[test]
    fn json_keeps_key_order_both_ways() {
        let r = Record::from_json(serde_json::json!({"zeta": 1, "alpha": 2, "mid": 3})).unwrap();
        assert_eq!(r.column_names().collect::<Vec<_>>(), vec!["zeta", "alpha", "mid"]);
        let text = r.to_json().to_string();
        assert_eq!(text, r#"{"zeta":1,"alpha":2,"mid":3}"#);
    }

    #[test]
    fn snapshot_and_display_keep_insertion_order() {
        let r = sample();
        let pairs = r.to_pairs();
        assert_eq!(pairs[0].0, "Id");
        assert_eq!(pairs[2].1, Value::Float(9.5));
        assert_eq!(r.to_string(), "{Id: 1, Name: ada, Score: 9.5}");
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.starts_with("{\"Id\":"));
    }

    #[test]
    fn equality_ignores_name_case() {
        let a = Record::from_pairs([("A", 1)]);
        let b = Record::from_pairs([("a", 1)]);
        let c = Record::from_pairs([("a", 2)]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn json_objects_become_records() {
        let r = Record::from_json(serde_json::json!({"user": {"id": 3}, "tags": [1, 2]})).unwrap();
        assert!(matches!(r.get("user").unwrap(), Value::Map(_)));
        assert_eq!(r.to_json()["tags"], serde_json::json!([1, 2]));
        assert!(Record::from_json(serde_json::json!([1])).is_err());
    }
}
