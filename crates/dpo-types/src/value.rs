//! Scalar and structured values exchanged between tasks
//!
//! [`Scalar`] is what task parameters and table cells hold; [`Value`] is the
//! opaque data handle a task produces and its dependents consume.

use crate::table::Table;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Task parameters, ordered by key so their encoding is canonical
pub type Params = BTreeMap<String, Scalar>;

/// A single scalar value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Numeric view of the scalar, if it has one
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(i) => Some(*i),
            Scalar::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Scalar::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            Scalar::Str(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Parse free text into the most specific scalar it represents
    ///
    /// Used when parameters come from natural language or CLI input.
    #[must_use]
    pub fn infer(text: &str) -> Self {
        let trimmed = text.trim().trim_matches(|c| c == '"' || c == '\'');
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
            return Scalar::Null;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Scalar::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            if f.is_finite() {
                return Scalar::Float(f);
            }
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => Scalar::Bool(true),
            "false" => Scalar::Bool(false),
            _ => Scalar::Str(trimmed.to_string()),
        }
    }

    /// Total order used for sorting and comparisons
    ///
    /// `Null < Bool < numbers < strings`; integers and floats compare
    /// numerically with each other.
    #[must_use]
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        fn rank(s: &Scalar) -> u8 {
            match s {
                Scalar::Null => 0,
                Scalar::Bool(_) => 1,
                Scalar::Int(_) | Scalar::Float(_) => 2,
                Scalar::Str(_) => 3,
            }
        }
        match (self, other) {
            (Scalar::Bool(a), Scalar::Bool(b)) => a.cmp(b),
            (Scalar::Int(a), Scalar::Int(b)) => a.cmp(b),
            (Scalar::Str(a), Scalar::Str(b)) => a.cmp(b),
            (a, b) if rank(a) == 2 && rank(b) == 2 => {
                let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                x.total_cmp(&y)
            }
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }

    /// Equality that treats `1` and `1.0` as the same value
    #[must_use]
    pub fn loose_eq(&self, other: &Self) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }

    /// Stable textual key, used for grouping and joining
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Scalar::Null => "\u{0}null".to_string(),
            Scalar::Bool(b) => format!("\u{0}b:{b}"),
            Scalar::Int(i) => format!("\u{0}n:{}", *i as f64),
            Scalar::Float(f) => format!("\u{0}n:{f}"),
            Scalar::Str(s) => s.clone(),
        }
    }

    /// Name of the scalar's type
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Scalar::Null => "null",
            Scalar::Bool(_) => "bool",
            Scalar::Int(_) => "int",
            Scalar::Float(_) => "float",
            Scalar::Str(_) => "string",
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(x) => write!(f, "{x}"),
            Scalar::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Str(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Str(s)
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::Int(i)
    }
}

impl From<f64> for Scalar {
    fn from(f: f64) -> Self {
        Scalar::Float(f)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

/// Data produced by a task and handed to its dependents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Table(Table),
}

impl Value {
    /// Name of the value's type, as shown in error messages
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Table(_) => "table",
        }
    }

    #[must_use]
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    /// The table this value carries, looking inside extracted documents
    ///
    /// A document extraction result is a map with a `tables` list; its first
    /// table is the primary one.
    #[must_use]
    pub fn primary_table(&self) -> Option<&Table> {
        match self {
            Value::Table(t) => Some(t),
            Value::Map(m) => match m.get("tables") {
                Some(Value::List(items)) => items.iter().find_map(Value::as_table),
                _ => m.get("table").and_then(Value::as_table),
            },
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to a scalar when the value is one
    #[must_use]
    pub fn to_scalar(&self) -> Option<Scalar> {
        match self {
            Value::Null => Some(Scalar::Null),
            Value::Bool(b) => Some(Scalar::Bool(*b)),
            Value::Int(i) => Some(Scalar::Int(*i)),
            Value::Float(f) => Some(Scalar::Float(*f)),
            Value::Str(s) => Some(Scalar::Str(s.clone())),
            _ => None,
        }
    }

    /// One-line human summary, used for conversation turns and logs
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Value::Table(t) => format!("table {}x{}", t.row_count(), t.column_count()),
            Value::List(items) => format!("list of {}", items.len()),
            Value::Map(m) => {
                let keys: Vec<&str> = m.keys().map(String::as_str).take(5).collect();
                format!("map {{{}}}", keys.join(", "))
            }
            Value::Str(s) if s.chars().count() > 80 => {
                let head: String = s.chars().take(77).collect();
                format!("{head}...")
            }
            other => other.to_json().to_string(),
        }
    }

    /// Plain JSON rendering (tables become `{columns, rows}`)
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f).map_or(J::Null, J::Number),
            Value::Str(s) => J::String(s.clone()),
            Value::List(items) => J::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(m) => J::Object(m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
            Value::Table(t) => serde_json::json!({
                "columns": t.columns(),
                "rows": t.rows(),
            }),
        }
    }
}

impl From<Scalar> for Value {
    fn from(s: Scalar) -> Self {
        match s {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(b),
            Scalar::Int(i) => Value::Int(i),
            Scalar::Float(f) => Value::Float(f),
            Scalar::Str(s) => Value::Str(s),
        }
    }
}

impl From<Table> for Value {
    fn from(t: Table) -> Self {
        Value::Table(t)
    }
}
