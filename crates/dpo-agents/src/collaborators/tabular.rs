//! Tabular data access

use super::CollaboratorError;
use async_trait::async_trait;
use dpo_types::{ColumnSchema, DataType, Table, Value};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Numeric description of one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    /// Column name
    pub column: String,
    /// Non-null values
    pub count: usize,
    /// Arithmetic mean
    pub mean: f64,
    /// Sample standard deviation
    pub std: f64,
    /// Smallest value
    pub min: f64,
    /// First quartile
    pub q25: f64,
    /// Second quartile
    pub median: f64,
    /// Third quartile
    pub q75: f64,
    /// Largest value
    pub max: f64,
}

impl ColumnSummary {
    /// Map keyed like a describe table: `count`, `mean`, `25%`, ...
    #[must_use]
    pub fn to_value(&self) -> Value {
        let fields = [
            ("count", Value::Int(self.count as i64)),
            ("mean", Value::Float(self.mean)),
            ("std", Value::Float(self.std)),
            ("min", Value::Float(self.min)),
            ("25%", Value::Float(self.q25)),
            ("50%", Value::Float(self.median)),
            ("75%", Value::Float(self.q75)),
            ("max", Value::Float(self.max)),
        ];
        Value::Map(fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }
}

/// Summary of every numeric column of a table
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NumericSummary {
    /// One entry per numeric column, in table order
    pub columns: Vec<ColumnSummary>,
}

impl NumericSummary {
    /// Describe the integer and float columns of `table`
    #[must_use]
    pub fn describe(table: &Table) -> Self {
        let columns = table
            .schema()
            .into_iter()
            .filter(|c| matches!(c.dtype, DataType::Integer | DataType::Float))
            .filter_map(|c| {
                let mut values = table.numeric(&c.name).ok()?;
                values.sort_by(f64::total_cmp);
                summarize_sorted(c.name, &values)
            })
            .collect();
        Self { columns }
    }

    /// Summary of `name`, if it is numeric
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnSummary> {
        self.columns.iter().find(|c| c.column == name)
    }
}

fn summarize_sorted(column: String, sorted: &[f64]) -> Option<ColumnSummary> {
    let (&min, &max) = (sorted.first()?, sorted.last()?);
    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    // sample standard deviation, zero for a single value
    let std = if sorted.len() > 1 {
        (sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    } else {
        0.0
    };
    Some(ColumnSummary {
        column,
        count: sorted.len(),
        mean,
        std,
        min,
        q25: quantile(sorted, 0.25),
        median: quantile(sorted, 0.5),
        q75: quantile(sorted, 0.75),
        max,
    })
}

/// Linear-interpolated quantile of sorted, non-empty data
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Source of named tables
#[async_trait]
pub trait TabularData: Send + Sync {
    /// Load a dataset by name
    async fn load(&self, name: &str) -> Result<Table, CollaboratorError>;

    /// Make a table available under `name`
    async fn register(&self, name: &str, table: Table) -> Result<(), CollaboratorError>;

    /// Column names and inferred types
    fn schema(&self, table: &Table) -> Vec<ColumnSchema> {
        table.schema()
    }

    /// Numeric summary, the heavy part of profiling
    async fn summarize(&self, table: &Table) -> Result<NumericSummary, CollaboratorError>;

    /// Names of the known datasets
    fn datasets(&self) -> Vec<String>;
}

/// Datasets held in process
#[derive(Debug, Default)]
pub struct InMemoryTabular {
    tables: RwLock<BTreeMap<String, Table>>,
}

impl InMemoryTabular {
    /// Source with no datasets
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `table` under `name`
    #[must_use]
    pub fn with_table(self, name: impl Into<String>, table: Table) -> Self {
        self.tables.write().insert(name.into(), table);
        self
    }

    /// Register a JSON file holding an array of records
    pub async fn load_json_file(&self, name: &str, path: &Path) -> Result<usize, CollaboratorError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CollaboratorError::DataAccess(format!("{}: {e}", path.display())))?;
        let records: Vec<serde_json::Value> = serde_json::from_str(&text)
            .map_err(|e| CollaboratorError::DataAccess(format!("{}: {e}", path.display())))?;
        let table = Table::from_records(&records)
            .map_err(|e| CollaboratorError::DataAccess(format!("{}: {e}", path.display())))?;
        let rows = table.row_count();
        self.tables.write().insert(name.to_string(), table);
        tracing::info!(dataset = name, rows, path = %path.display(), "registered dataset");
        Ok(rows)
    }
}

#[async_trait]
impl TabularData for InMemoryTabular {
    async fn load(&self, name: &str) -> Result<Table, CollaboratorError> {
        let tables = self.tables.read();
        if let Some(table) = tables.get(name) {
            return Ok(table.clone());
        }
        tables
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, t)| t.clone())
            .ok_or_else(|| CollaboratorError::DataAccess(format!("unknown dataset: {name}")))
    }

    async fn register(&self, name: &str, table: Table) -> Result<(), CollaboratorError> {
        self.tables.write().insert(name.to_string(), table);
        Ok(())
    }

    async fn summarize(&self, table: &Table) -> Result<NumericSummary, CollaboratorError> {
        Ok(NumericSummary::describe(table))
    }

    fn datasets(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dpo_types::Scalar;

    fn numbers() -> Table {
        Table::from_rows(
            ["x", "label"],
            (1..=5).map(|i| vec![Scalar::Int(i), Scalar::Str(format!("r{i}"))]).collect(),
        )
        .unwrap()
    }

    #[test]
    fn describe_matches_known_values() {
        let summary = NumericSummary::describe(&numbers());
        assert_eq!(summary.columns.len(), 1);
        let x = summary.column("x").unwrap();
        assert_eq!(x.count, 5);
        assert_eq!(x.mean, 3.0);
        assert_eq!(x.median, 3.0);
        assert_eq!(x.q25, 2.0);
        assert_eq!(x.q75, 4.0);
        assert!((x.std - 2.5f64.sqrt()).abs() < 1e-12);
    }

    #[tokio::test]
    async fn load_is_case_insensitive_and_reports_missing() {
        let tabular = InMemoryTabular::new().with_table("Sales", numbers());
        assert_eq!(tabular.load("sales").await.unwrap().row_count(), 5);
        let err = tabular.load("nope").await.unwrap_err();
        assert!(matches!(err, CollaboratorError::DataAccess(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn json_file_registration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.json");
        std::fs::write(&path, r#"[{"id": 1, "amount": 9.5}, {"id": 2, "amount": null}]"#).unwrap();
        let tabular = InMemoryTabular::new();
        assert_eq!(tabular.load_json_file("orders", &path).await.unwrap(), 2);
        assert_eq!(tabular.datasets(), vec!["orders".to_string()]);
    }
}
