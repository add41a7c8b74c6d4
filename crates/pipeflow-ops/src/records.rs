//! Column-level operators for pipelines of `Record`s.
//!
//! Column names are matched case-insensitively, the same way `Record` does.
//! Blank column names are rejected before anything is evaluated.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use pipeflow_core::{Error, Record, Result, Value};

use crate::lazy::Pipeline;
use crate::source::{Interrupt, RowIter, Source};

/// Folds one group of rows into a single cell value.
pub type Aggregator = Arc<dyn Fn(&[Record]) -> Value + Send + Sync>;

/// Pair an output column with the aggregation that fills it.
pub fn aggregate<F>(column: impl Into<String>, f: F) -> (String, Aggregator)
where
    F: Fn(&[Record]) -> Value + Send + Sync + 'static,
{
    (column.into(), Arc::new(f))
}

fn column_name(name: &str, what: &str) -> Result<String> {
    if name.trim().is_empty() {
        return Err(Error::precondition(format!("{what} must not be blank")));
    }
    Ok(name.to_string())
}

fn same_column(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

pub trait RecordPipeline: Sized {
    /// Set `column` on every row to the value computed from that row.
    fn add_column<F>(&self, column: &str, value: F) -> Result<Pipeline<Record>>
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static;

    fn remove_column(&self, column: &str) -> Result<Pipeline<Record>>;

    /// Rename `from` to `to`, keeping the column's position.
    fn rename_column(&self, from: &str, to: &str) -> Result<Pipeline<Record>>;

    /// Write `default` where `column` is absent or null.
    fn fill_missing(&self, column: &str, default: impl Into<Value>) -> Result<Pipeline<Record>>;

    /// Keep the first row for each distinct value of `key`. A row without the
    /// column surfaces `ColumnNotFound` in place.
    fn remove_duplicates(&self, key: &str) -> Result<Pipeline<Record>>;

    /// One output row per distinct `key` value, in first-seen order: the key
    /// column followed by one column per aggregation. Grouping needs the
    /// whole input, so a pass drains the upstream before yielding anything.
    fn group_by<I>(&self, key: &str, aggregations: I) -> Result<Pipeline<Record>>
    where
        I: IntoIterator<Item = (String, Aggregator)>;
}

impl RecordPipeline for Pipeline<Record> {
    fn add_column<F>(&self, column: &str, value: F) -> Result<Pipeline<Record>>
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        let column = column_name(column, "column name")?;
        Ok(self.map(move |mut row| {
            let v = value(&row);
            row.set(column.clone(), v);
            row
        }))
    }

    fn remove_column(&self, column: &str) -> Result<Pipeline<Record>> {
        let column = column_name(column, "column name")?;
        Ok(self.map(move |row| {
            row.iter()
                .filter(|(name, _)| !same_column(name, &column))
                .map(|(name, v)| (name.to_string(), v.clone()))
                .collect()
        }))
    }

    fn rename_column(&self, from: &str, to: &str) -> Result<Pipeline<Record>> {
        let from = column_name(from, "old column name")?;
        let to = column_name(to, "new column name")?;
        Ok(self.map(move |row| {
            row.iter()
                .map(|(name, v)| {
                    let name = if same_column(name, &from) { to.as_str() } else { name };
                    (name.to_string(), v.clone())
                })
                .collect()
        }))
    }

    fn fill_missing(&self, column: &str, default: impl Into<Value>) -> Result<Pipeline<Record>> {
        let column = column_name(column, "column name")?;
        let default = default.into();
        Ok(self.map(move |mut row| {
            if row.get(&column).map_or(true, Value::is_null) {
                row.set(column.clone(), default.clone());
            }
            row
        }))
    }

    fn remove_duplicates(&self, key: &str) -> Result<Pipeline<Record>> {
        let key = column_name(key, "key column")?;
        Ok(self.over(Deduplicated {
            upstream: self.clone(),
            key,
        }))
    }

    fn group_by<I>(&self, key: &str, aggregations: I) -> Result<Pipeline<Record>>
    where
        I: IntoIterator<Item = (String, Aggregator)>,
    {
        let key = column_name(key, "key column")?;
        let aggregations = aggregations
            .into_iter()
            .map(|(name, f)| Ok((column_name(&name, "aggregate column")?, f)))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.over(Grouped {
            upstream: self.clone(),
            key,
            aggregations: aggregations.into(),
        }))
    }
}

struct Deduplicated {
    upstream: Pipeline<Record>,
    key: String,
}

impl Deduplicated {
    fn dedup<'a>(&self, input: RowIter<'a, Record>) -> RowIter<'a, Record> {
        let key = self.key.clone();
        let mut seen: HashSet<Value> = HashSet::new();
        Box::new(input.filter_map(move |item| {
            let row = match item {
                Ok(row) => row,
                Err(e) => return Some(Err(e)),
            };
            let fresh = match row.get(&key) {
                Ok(v) => seen.insert(v.clone()),
                Err(e) => return Some(Err(e)),
            };
            fresh.then_some(Ok(row))
        }))
    }
}

impl Source<Record> for Deduplicated {
    fn rows(&self) -> RowIter<'_, Record> {
        self.dedup(self.upstream.rows())
    }

    fn rows_until(&self, stop: Interrupt) -> RowIter<'_, Record> {
        self.dedup(self.upstream.rows_until(stop))
    }
}

struct Grouped {
    upstream: Pipeline<Record>,
    key: String,
    aggregations: Arc<[(String, Aggregator)]>,
}

impl Grouped {
    fn group(&self, input: RowIter<'_, Record>) -> Result<Vec<Record>> {
        let mut order: Vec<Value> = Vec::new();
        let mut groups: HashMap<Value, Vec<Record>> = HashMap::new();
        for row in input {
            let row = row?;
            let k = row.get(&self.key)?.clone();
            groups
                .entry(k.clone())
                .or_insert_with(|| {
                    order.push(k);
                    Vec::new()
                })
                .push(row);
        }
        tracing::trace!(groups = order.len(), key = %self.key, "group_by pass");

        let mut out = Vec::with_capacity(order.len());
        for k in order {
            let rows = groups.remove(&k).unwrap_or_default();
            let mut summary = Record::with_capacity(self.aggregations.len() + 1);
            summary.set(self.key.clone(), k);
            for (column, f) in self.aggregations.iter() {
                summary.set(column.clone(), f(&rows));
            }
            out.push(summary);
        }
        Ok(out)
    }

    fn emit<'a>(&self, input: RowIter<'a, Record>) -> RowIter<'a, Record> {
        match self.group(input) {
            Ok(rows) => Box::new(rows.into_iter().map(Ok)),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }
}

// Grouping happens on the first pull, not when the pass is created.
impl Source<Record> for Grouped {
    fn rows(&self) -> RowIter<'_, Record> {
        deferred(move || self.emit(self.upstream.rows()))
    }

    fn rows_until(&self, stop: Interrupt) -> RowIter<'_, Record> {
        deferred(move || self.emit(self.upstream.rows_until(stop)))
    }
}

fn deferred<'a, F>(make: F) -> RowIter<'a, Record>
where
    F: FnOnce() -> RowIter<'a, Record> + Send + 'a,
{
    let mut make = Some(make);
    let mut rows: Option<RowIter<'a, Record>> = None;
    Box::new(std::iter::from_fn(move || {
        if let Some(make) = make.take() {
            rows = Some(make());
        }
        rows.as_mut()?.next()
    }))
}
