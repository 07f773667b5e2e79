//! Row/column data
//!
//! [`Table`] is the in-memory tabular representation that flows between
//! extraction, transform, query and profiling tasks. All operations are pure:
//! they return a new table and never mutate the receiver.

use crate::hash::ContentHash;
use crate::value::Scalar;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Column/row table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Scalar>>,
}

/// Comparison operator for row filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
}

impl CompareOp {
    /// Evaluate `left <op> right`
    #[must_use]
    pub fn eval(self, left: &Scalar, right: &Scalar) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Eq => left.loose_eq(right),
            CompareOp::Ne => !left.loose_eq(right),
            // nulls never satisfy an ordering comparison
            _ if left.is_null() || right.is_null() => false,
            CompareOp::Gt => left.total_cmp(right) == Greater,
            CompareOp::Ge => left.total_cmp(right) != Less,
            CompareOp::Lt => left.total_cmp(right) == Less,
            CompareOp::Le => left.total_cmp(right) != Greater,
            CompareOp::Contains => left
                .to_string()
                .to_lowercase()
                .contains(&right.to_string().to_lowercase()),
        }
    }
}

impl FromStr for CompareOp {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "==" | "=" | "eq" | "is" => Ok(CompareOp::Eq),
            "!=" | "<>" | "ne" => Ok(CompareOp::Ne),
            ">" | "gt" => Ok(CompareOp::Gt),
            ">=" | "ge" => Ok(CompareOp::Ge),
            "<" | "lt" => Ok(CompareOp::Lt),
            "<=" | "le" => Ok(CompareOp::Le),
            "contains" | "like" => Ok(CompareOp::Contains),
            other => Err(TableError::InvalidOperator(other.to_string())),
        }
    }
}

/// Aggregation function for group-by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    Sum,
    Mean,
    Count,
    Min,
    Max,
}

impl Aggregation {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Mean => "mean",
            Aggregation::Count => "count",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
        }
    }

    fn apply(self, values: &[f64], count: usize) -> Scalar {
        match self {
            Aggregation::Count => Scalar::Int(count as i64),
            _ if values.is_empty() => Scalar::Null,
            Aggregation::Sum => Scalar::Float(values.iter().sum()),
            Aggregation::Mean => Scalar::Float(values.iter().sum::<f64>() / values.len() as f64),
            Aggregation::Min => Scalar::Float(values.iter().copied().fold(f64::INFINITY, f64::min)),
            Aggregation::Max => Scalar::Float(values.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        }
    }
}

impl FromStr for Aggregation {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" | "total" => Ok(Aggregation::Sum),
            "mean" | "avg" | "average" => Ok(Aggregation::Mean),
            "count" | "number" => Ok(Aggregation::Count),
            "min" | "minimum" | "lowest" => Ok(Aggregation::Min),
            "max" | "maximum" | "highest" => Ok(Aggregation::Max),
            other => Err(TableError::InvalidAggregation(other.to_string())),
        }
    }
}

/// Join flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
}

impl FromStr for JoinKind {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inner" => Ok(JoinKind::Inner),
            "left" => Ok(JoinKind::Left),
            other => Err(TableError::InvalidOperator(format!("join kind {other}"))),
        }
    }
}

/// Inferred column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Integer,
    Float,
    Boolean,
    Text,
    Mixed,
    Empty,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::Boolean => "boolean",
            DataType::Text => "text",
            DataType::Mixed => "mixed",
            DataType::Empty => "empty",
        };
        f.write_str(name)
    }
}

/// Name and inferred type of one column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub dtype: DataType,
}

impl Table {
    /// Create an empty table with the given columns
    #[must_use]
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Create a table from rows, checking every row's width
    ///
    /// # Errors
    /// Returns [`TableError::RowWidth`] for the first row whose length does
    /// not match the column count.
    pub fn from_rows<S: Into<String>>(
        columns: impl IntoIterator<Item = S>,
        rows: Vec<Vec<Scalar>>,
    ) -> Result<Self, TableError> {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if let Some((index, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != columns.len()) {
            return Err(TableError::RowWidth {
                row: index,
                expected: columns.len(),
                actual: row.len(),
            });
        }
        Ok(Self { columns, rows })
    }

    /// Build a table from JSON records (an array of objects)
    ///
    /// Columns are the union of keys in first-seen order; missing keys become
    /// nulls. Nested values are stored as their JSON text.
    ///
    /// # Errors
    /// Returns [`TableError::InvalidRecord`] if an element is not an object.
    pub fn from_records(records: &[serde_json::Value]) -> Result<Self, TableError> {
        let mut columns: Vec<String> = Vec::new();
        for (i, record) in records.iter().enumerate() {
            let obj = record
                .as_object()
                .ok_or_else(|| TableError::InvalidRecord(format!("record {i} is not an object")))?;
            for key in obj.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .iter()
            .filter_map(serde_json::Value::as_object)
            .map(|obj| {
                columns
                    .iter()
                    .map(|c| obj.get(c).map_or(Scalar::Null, json_to_scalar))
                    .collect()
            })
            .collect();

        Ok(Self { columns, rows })
    }

    #[inline]
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[inline]
    #[must_use]
    pub fn rows(&self) -> &[Vec<Scalar>] {
        &self.rows
    }

    #[inline]
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row
    ///
    /// # Errors
    /// Returns [`TableError::RowWidth`] if the row length is wrong.
    pub fn push_row(&mut self, row: Vec<Scalar>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                row: self.rows.len(),
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Index of a column by name
    ///
    /// # Errors
    /// Returns [`TableError::UnknownColumn`] if absent.
    pub fn column_index(&self, name: &str) -> Result<usize, TableError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .or_else(|| self.columns.iter().position(|c| c.eq_ignore_ascii_case(name)))
            .ok_or_else(|| TableError::UnknownColumn(name.to_string()))
    }

    /// All values of a column
    ///
    /// # Errors
    /// Returns [`TableError::UnknownColumn`] if absent.
    pub fn column(&self, name: &str) -> Result<Vec<Scalar>, TableError> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(|r| r[idx].clone()).collect())
    }

    /// Non-null numeric values of a column
    ///
    /// # Errors
    /// Returns [`TableError::NotNumeric`] if a non-null cell is not a number.
    pub fn numeric(&self, name: &str) -> Result<Vec<f64>, TableError> {
        let idx = self.column_index(name)?;
        let mut out = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            match &row[idx] {
                Scalar::Null => {}
                cell => out.push(cell.as_f64().ok_or_else(|| TableError::NotNumeric {
                    column: name.to_string(),
                })?),
            }
        }
        Ok(out)
    }

    /// Rows where `column <op> value` holds
    ///
    /// # Errors
    /// Returns [`TableError::UnknownColumn`] if the column is absent.
    pub fn filter(&self, column: &str, op: CompareOp, value: &Scalar) -> Result<Self, TableError> {
        let idx = self.column_index(column)?;
        let rows = self
            .rows
            .iter()
            .filter(|r| op.eval(&r[idx], value))
            .cloned()
            .collect();
        Ok(Self {
            columns: self.columns.clone(),
            rows,
        })
    }

    /// Projection onto the given columns, in the given order
    ///
    /// # Errors
    /// Returns [`TableError::UnknownColumn`] for the first missing column.
    pub fn select<S: AsRef<str>>(&self, columns: &[S]) -> Result<Self, TableError> {
        let indices = columns
            .iter()
            .map(|c| self.column_index(c.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            columns: indices.iter().map(|&i| self.columns[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|r| indices.iter().map(|&i| r[i].clone()).collect())
                .collect(),
        })
    }

    /// Aggregate a column, optionally grouped by another
    ///
    /// Groups keep first-appearance order. The output has the group column
    /// (when grouped) and a `<agg>_<column>` column. `Count` accepts `*` as
    /// the column and counts rows.
    ///
    /// # Errors
    /// Returns an error for unknown columns or non-numeric aggregation input.
    pub fn aggregate(
        &self,
        group_by: Option<&str>,
        column: &str,
        agg: Aggregation,
    ) -> Result<Self, TableError> {
        let value_idx = if column == "*" {
            if agg != Aggregation::Count {
                return Err(TableError::UnknownColumn(column.to_string()));
            }
            None
        } else {
            Some(self.column_index(column)?)
        };
        let group_idx = group_by.map(|g| self.column_index(g)).transpose()?;

        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, (Scalar, Vec<f64>, usize)> = HashMap::new();
        for row in &self.rows {
            let group_value = group_idx.map_or(Scalar::Null, |i| row[i].clone());
            let key = group_value.key();
            let entry = groups.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                (group_value, Vec::new(), 0)
            });
            match value_idx {
                None => entry.2 += 1,
                Some(i) => match &row[i] {
                    Scalar::Null => {}
                    cell => {
                        let v = cell.as_f64().ok_or_else(|| TableError::NotNumeric {
                            column: column.to_string(),
                        });
                        match (agg, v) {
                            (Aggregation::Count, _) => entry.2 += 1,
                            (_, Ok(v)) => {
                                entry.1.push(v);
                                entry.2 += 1;
                            }
                            (_, Err(e)) => return Err(e),
                        }
                    }
                },
            }
        }

        let label = if column == "*" {
            "count".to_string()
        } else {
            format!("{}_{}", agg.name(), self.columns[value_idx.unwrap_or(0)])
        };
        let mut columns = Vec::new();
        if let Some(i) = group_idx {
            columns.push(self.columns[i].clone());
        }
        columns.push(label);

        let mut rows = Vec::with_capacity(order.len());
        if group_idx.is_none() && order.is_empty() {
            rows.push(vec![agg.apply(&[], 0)]);
        }
        for key in order {
            if let Some((group_value, values, count)) = groups.remove(&key) {
                let cell = agg.apply(&values, count);
                if group_idx.is_some() {
                    rows.push(vec![group_value, cell]);
                } else {
                    rows.push(vec![cell]);
                }
            }
        }
        Ok(Self { columns, rows })
    }

    /// Join with another table on a shared key column
    ///
    /// Right-hand columns that clash with left-hand names are prefixed with
    /// `right_`; the right key column is dropped.
    ///
    /// # Errors
    /// Returns [`TableError::UnknownColumn`] if either side lacks the key.
    pub fn join(&self, other: &Table, on: &str, kind: JoinKind) -> Result<Self, TableError> {
        self.try_join(other, on, kind, |_| Ok::<_, TableError>(()))
    }

    /// [`Table::join`] that calls `on_row` with each joined row before it is
    /// kept, stopping at the first error
    ///
    /// Lets callers meter or bound a join as it grows rather than after.
    ///
    /// # Errors
    /// [`TableError::UnknownColumn`] if either side lacks the key, or the
    /// first error returned by `on_row`.
    pub fn try_join<E, F>(&self, other: &Table, on: &str, kind: JoinKind, mut on_row: F) -> Result<Self, E>
    where
        E: From<TableError>,
        F: FnMut(&[Scalar]) -> Result<(), E>,
    {
        let left_key = self.column_index(on)?;
        let right_key = other.column_index(on)?;

        let right_cols: Vec<usize> = (0..other.columns.len()).filter(|&i| i != right_key).collect();
        let mut columns = self.columns.clone();
        for &i in &right_cols {
            let name = &other.columns[i];
            if columns.contains(name) {
                columns.push(format!("right_{name}"));
            } else {
                columns.push(name.clone());
            }
        }

        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, row) in other.rows.iter().enumerate() {
            index.entry(row[right_key].key()).or_default().push(i);
        }

        let mut rows = Vec::new();
        for row in &self.rows {
            match index.get(&row[left_key].key()) {
                Some(matches) if !row[left_key].is_null() => {
                    for &m in matches {
                        let mut joined = row.clone();
                        joined.extend(right_cols.iter().map(|&i| other.rows[m][i].clone()));
                        on_row(&joined)?;
                        rows.push(joined);
                    }
                }
                _ if kind == JoinKind::Left => {
                    let mut joined = row.clone();
                    joined.extend(right_cols.iter().map(|_| Scalar::Null));
                    on_row(&joined)?;
                    rows.push(joined);
                }
                _ => {}
            }
        }
        Ok(Self { columns, rows })
    }

    /// Stable sort by a column
    ///
    /// # Errors
    /// Returns [`TableError::UnknownColumn`] if absent.
    pub fn sort_by(&self, column: &str, descending: bool) -> Result<Self, TableError> {
        let idx = self.column_index(column)?;
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| {
            let ord = a[idx].total_cmp(&b[idx]);
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });
        Ok(Self {
            columns: self.columns.clone(),
            rows,
        })
    }

    /// First `n` rows
    #[must_use]
    pub fn head(&self, n: usize) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    /// Distinct values of one column, first-appearance order
    ///
    /// # Errors
    /// Returns [`TableError::UnknownColumn`] if absent.
    pub fn distinct(&self, column: &str) -> Result<Self, TableError> {
        let idx = self.column_index(column)?;
        let mut seen = HashSet::new();
        let rows = self
            .rows
            .iter()
            .filter(|r| seen.insert(r[idx].key()))
            .map(|r| vec![r[idx].clone()])
            .collect();
        Ok(Self {
            columns: vec![self.columns[idx].clone()],
            rows,
        })
    }

    /// Drop rows with a null in any of `columns` (all columns when empty)
    ///
    /// # Errors
    /// Returns [`TableError::UnknownColumn`] for a missing column.
    pub fn drop_nulls<S: AsRef<str>>(&self, columns: &[S]) -> Result<Self, TableError> {
        let indices: Vec<usize> = if columns.is_empty() {
            (0..self.columns.len()).collect()
        } else {
            columns
                .iter()
                .map(|c| self.column_index(c.as_ref()))
                .collect::<Result<_, _>>()?
        };
        let rows = self
            .rows
            .iter()
            .filter(|r| indices.iter().all(|&i| !r[i].is_null()))
            .cloned()
            .collect();
        Ok(Self {
            columns: self.columns.clone(),
            rows,
        })
    }

    /// Replace every null with `value`
    #[must_use]
    pub fn fill_nulls(&self, value: &Scalar) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: self
                .rows
                .iter()
                .map(|r| {
                    r.iter()
                        .map(|c| if c.is_null() { value.clone() } else { c.clone() })
                        .collect()
                })
                .collect(),
        }
    }

    /// Rename one column
    ///
    /// # Errors
    /// Returns [`TableError::UnknownColumn`] if `from` is absent.
    pub fn rename(&self, from: &str, to: &str) -> Result<Self, TableError> {
        let idx = self.column_index(from)?;
        let mut out = self.clone();
        out.columns[idx] = to.to_string();
        Ok(out)
    }

    /// Number of rows that exactly repeat an earlier row
    #[must_use]
    pub fn duplicate_rows(&self) -> usize {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .filter(|r| !seen.insert(r.iter().map(Scalar::key).collect::<Vec<_>>()))
            .count()
    }

    /// Inferred schema, one entry per column
    #[must_use]
    pub fn schema(&self) -> Vec<ColumnSchema> {
        self.columns
            .iter()
            .enumerate()
            .map(|(i, name)| ColumnSchema {
                name: name.clone(),
                dtype: infer_dtype(self.rows.iter().map(|r| &r[i])),
            })
            .collect()
    }

    /// Compact schema description for prompts, e.g. `region:text, sales:float (120 rows)`
    #[must_use]
    pub fn schema_summary(&self) -> String {
        let cols: Vec<String> = self
            .schema()
            .into_iter()
            .map(|c| format!("{}:{}", c.name, c.dtype))
            .collect();
        format!("{} ({} rows)", cols.join(", "), self.rows.len())
    }

    /// Content fingerprint
    ///
    /// Two tables with the same columns and cells hash equal regardless of
    /// where they were loaded from.
    #[must_use]
    pub fn fingerprint(&self) -> ContentHash {
        let mut hasher = blake3::Hasher::new();
        for c in &self.columns {
            hasher.update(c.as_bytes());
            hasher.update(&[0x1f]);
        }
        hasher.update(&[0x1e]);
        for row in &self.rows {
            for cell in row {
                hasher.update(cell.type_name().as_bytes());
                hasher.update(&[b':']);
                hasher.update(cell.to_string().as_bytes());
                hasher.update(&[0x1f]);
            }
            hasher.update(&[0x1e]);
        }
        ContentHash::new(*hasher.finalize().as_bytes())
    }
}

fn infer_dtype<'a>(cells: impl Iterator<Item = &'a Scalar>) -> DataType {
    let mut seen: Option<DataType> = None;
    for cell in cells {
        let t = match cell {
            Scalar::Null => continue,
            Scalar::Bool(_) => DataType::Boolean,
            Scalar::Int(_) => DataType::Integer,
            Scalar::Float(_) => DataType::Float,
            Scalar::Str(_) => DataType::Text,
        };
        seen = Some(match (seen, t) {
            (None, t) => t,
            (Some(a), b) if a == b => a,
            (Some(DataType::Integer), DataType::Float) | (Some(DataType::Float), DataType::Integer) => {
                DataType::Float
            }
            _ => DataType::Mixed,
        });
    }
    seen.unwrap_or(DataType::Empty)
}

fn json_to_scalar(value: &serde_json::Value) -> Scalar {
    match value {
        serde_json::Value::Null => Scalar::Null,
        serde_json::Value::Bool(b) => Scalar::Bool(*b),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Scalar::Int)
            .or_else(|| n.as_f64().map(Scalar::Float))
            .unwrap_or(Scalar::Null),
        serde_json::Value::String(s) => Scalar::Str(s.clone()),
        other => Scalar::Str(other.to_string()),
    }
}

/// Errors raised by table operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TableError {
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("row {row} has {actual} cells, expected {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("column {column} is not numeric")]
    NotNumeric { column: String },

    #[error("invalid operator: {0}")]
    InvalidOperator(String),

    #[error("invalid aggregation: {0}")]
    InvalidAggregation(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}
