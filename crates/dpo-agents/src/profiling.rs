//! Data profiling and quality signals

use crate::agent::{Agent, AgentKind, TaskInput};
use crate::collaborators::{ColumnSummary, TabularData};
use crate::error::AgentError;
use async_trait::async_trait;
use dpo_types::{DataType, Scalar, Table, Task, TaskKind, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

const DEFAULT_TOP_VALUES: usize = 5;
const DEFAULT_HIGH_NULL_RATIO: f64 = 0.5;

/// Profile of a single column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnProfile {
    /// Column name
    pub name: String,
    /// Inferred type
    pub dtype: DataType,
    /// Null cells
    pub missing: usize,
    /// Null cells as a percentage of rows
    pub missing_pct: f64,
    /// Distinct non-null values
    pub unique: usize,
    /// Most frequent non-null values with their counts
    pub top_values: Vec<(String, usize)>,
    /// Numeric summary for integer and float columns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric: Option<ColumnSummary>,
}

/// Full profile of a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileReport {
    /// Row count
    pub rows: usize,
    /// Column count
    pub columns: usize,
    /// Per-column details, in table order
    pub column_profiles: Vec<ColumnProfile>,
    /// Rows identical to an earlier row
    pub duplicate_rows: usize,
    /// Columns holding a single distinct non-null value
    pub constant_columns: Vec<String>,
    /// Columns whose missing ratio exceeds the threshold
    pub high_null_columns: Vec<String>,
    /// Share of non-null cells, 0 to 100
    pub completeness: f64,
}

impl ProfileReport {
    /// Build a report; `numeric` comes from the tabular collaborator
    #[must_use]
    pub fn build(table: &Table, numeric: &[ColumnSummary], top_n: usize, high_null_ratio: f64) -> Self {
        let rows = table.row_count();
        let mut total_missing = 0;
        let column_profiles: Vec<ColumnProfile> = table
            .schema()
            .into_iter()
            .enumerate()
            .map(|(i, schema)| {
                let mut counts: HashMap<String, usize> = HashMap::new();
                let mut first_seen: Vec<String> = Vec::new();
                let mut missing = 0;
                for row in table.rows() {
                    let cell = &row[i];
                    if cell.is_null() {
                        missing += 1;
                        continue;
                    }
                    let key = cell.to_string();
                    let count = counts.entry(key.clone()).or_insert(0);
                    if *count == 0 {
                        first_seen.push(key);
                    }
                    *count += 1;
                }
                total_missing += missing;

                // most frequent first, ties in order of appearance
                let mut top_values: Vec<(String, usize)> = first_seen
                    .into_iter()
                    .map(|v| {
                        let c = counts.get(&v).copied().unwrap_or(0);
                        (v, c)
                    })
                    .collect();
                top_values.sort_by(|a, b| b.1.cmp(&a.1));
                top_values.truncate(top_n);

                ColumnProfile {
                    missing_pct: percent(missing, rows),
                    unique: counts.len(),
                    numeric: numeric.iter().find(|s| s.column == schema.name).cloned(),
                    name: schema.name,
                    dtype: schema.dtype,
                    missing,
                    top_values,
                }
            })
            .collect();

        let constant_columns = column_profiles
            .iter()
            .filter(|c| c.unique == 1)
            .map(|c| c.name.clone())
            .collect();
        let high_null_columns = column_profiles
            .iter()
            .filter(|c| rows > 0 && c.missing as f64 / rows as f64 > high_null_ratio)
            .map(|c| c.name.clone())
            .collect();
        let cells = rows * table.column_count();
        let completeness = if cells == 0 {
            100.0
        } else {
            100.0 - percent(total_missing, cells)
        };

        Self {
            rows,
            columns: table.column_count(),
            duplicate_rows: table.duplicate_rows(),
            column_profiles,
            constant_columns,
            high_null_columns,
            completeness,
        }
    }

    /// Profile of `name`
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnProfile> {
        self.column_profiles.iter().find(|c| c.name == name)
    }

    /// Map value handed to dependent tasks
    #[must_use]
    pub fn to_value(&self) -> Value {
        let names = |cols: &[String]| Value::List(cols.iter().cloned().map(Value::Str).collect());
        let columns: BTreeMap<String, Value> = self
            .column_profiles
            .iter()
            .map(|c| {
                let mut m = BTreeMap::new();
                m.insert("dtype".to_string(), Value::Str(c.dtype.to_string()));
                m.insert("missing".to_string(), Value::Int(c.missing as i64));
                m.insert("missing_pct".to_string(), Value::Float(c.missing_pct));
                m.insert("unique".to_string(), Value::Int(c.unique as i64));
                let top = c
                    .top_values
                    .iter()
                    .map(|(v, n)| (v.clone(), Value::Int(*n as i64)))
                    .collect();
                m.insert("top_values".to_string(), Value::Map(top));
                if let Some(summary) = &c.numeric {
                    m.insert("numeric".to_string(), summary.to_value());
                }
                (c.name.clone(), Value::Map(m))
            })
            .collect();

        let mut shape = BTreeMap::new();
        shape.insert("rows".to_string(), Value::Int(self.rows as i64));
        shape.insert("columns".to_string(), Value::Int(self.columns as i64));

        let mut quality = BTreeMap::new();
        quality.insert("duplicate_rows".to_string(), Value::Int(self.duplicate_rows as i64));
        quality.insert("constant_columns".to_string(), names(&self.constant_columns));
        quality.insert("high_null_columns".to_string(), names(&self.high_null_columns));
        quality.insert("completeness".to_string(), Value::Float(self.completeness));

        let mut out = BTreeMap::new();
        out.insert("shape".to_string(), Value::Map(shape));
        out.insert("columns".to_string(), Value::Map(columns));
        out.insert("quality".to_string(), Value::Map(quality));
        Value::Map(out)
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64 * 10_000.0).round() / 100.0
    }
}

/// Handles `profile` tasks
///
/// Optional parameters: `top_n` (values listed per column) and
/// `null_threshold` (missing ratio that flags a column).
pub struct ProfilingAgent {
    tabular: Arc<dyn TabularData>,
}

impl ProfilingAgent {
    /// Agent reading datasets from `tabular`
    #[must_use]
    pub fn new(tabular: Arc<dyn TabularData>) -> Self {
        Self { tabular }
    }
}

#[async_trait]
impl Agent for ProfilingAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Profiling
    }

    fn supports(&self, kind: TaskKind) -> bool {
        kind == TaskKind::Profile
    }

    async fn run(&self, task: &Task, input: &TaskInput) -> Result<Value, AgentError> {
        if task.kind != TaskKind::Profile {
            return Err(AgentError::Unsupported {
                agent: AgentKind::Profiling,
                kind: task.kind,
            });
        }
        let table = input.table()?;
        let top_n = match task.param("top_n") {
            Some(Scalar::Int(n)) if *n >= 0 => usize::try_from(*n).unwrap_or(DEFAULT_TOP_VALUES),
            Some(_) => return Err(AgentError::invalid("`top_n` must be a non-negative integer")),
            None => DEFAULT_TOP_VALUES,
        };
        let threshold = match task.param("null_threshold") {
            Some(s) => s
                .as_f64()
                .filter(|t| (0.0..=1.0).contains(t))
                .ok_or_else(|| AgentError::invalid("`null_threshold` must be between 0 and 1"))?,
            None => DEFAULT_HIGH_NULL_RATIO,
        };

        let summary = self.tabular.summarize(table).await?;
        let report = ProfileReport::build(table, &summary.columns, top_n, threshold);
        tracing::debug!(
            task_id = %task.id,
            rows = report.rows,
            columns = report.columns,
            completeness = report.completeness,
            "profiled table"
        );
        Ok(report.to_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{InMemoryTabular, NumericSummary};
    use pretty_assertions::assert_eq;

    fn orders() -> Table {
        Table::from_rows(
            ["id", "status", "amount", "note"],
            vec![
                vec![Scalar::Int(1), Scalar::from("paid"), Scalar::Float(10.0), Scalar::Null],
                vec![Scalar::Int(2), Scalar::from("paid"), Scalar::Float(20.0), Scalar::Null],
                vec![Scalar::Int(3), Scalar::from("open"), Scalar::Null, Scalar::from("late")],
                vec![Scalar::Int(2), Scalar::from("paid"), Scalar::Float(20.0), Scalar::Null],
            ],
        )
        .unwrap()
    }

    #[test]
    fn report_fields() {
        let table = orders();
        let summary = NumericSummary::describe(&table);
        let report = ProfileReport::build(&table, &summary.columns, 5, 0.5);

        assert_eq!(report.rows, 4);
        assert_eq!(report.columns, 4);
        assert_eq!(report.duplicate_rows, 1);
        assert_eq!(report.constant_columns, vec!["note".to_string()]);
        assert_eq!(report.high_null_columns, vec!["note".to_string()]);
        // 4 missing cells out of 16
        assert_eq!(report.completeness, 75.0);

        let status = report.column("status").unwrap();
        assert_eq!(status.unique, 2);
        assert_eq!(status.top_values[0], ("paid".to_string(), 3));
        assert!(status.numeric.is_none());

        let amount = report.column("amount").unwrap();
        assert_eq!(amount.missing, 1);
        assert_eq!(amount.missing_pct, 25.0);
        assert_eq!(amount.numeric.as_ref().unwrap().count, 3);
    }

    #[test]
    fn empty_table_is_complete() {
        let table = Table::new(["a"]);
        let report = ProfileReport::build(&table, &[], 5, 0.5);
        assert_eq!(report.completeness, 100.0);
        assert!(report.high_null_columns.is_empty());
    }

    #[tokio::test]
    async fn agent_returns_report_value() {
        let agent = ProfilingAgent::new(Arc::new(InMemoryTabular::new()));
        let task = Task::new("p", TaskKind::Profile).with_param("top_n", 1i64);
        let value = agent.run(&task, &TaskInput::new(Value::Table(orders()))).await.unwrap();
        let Value::Map(map) = value else {
            panic!("expected a map");
        };
        assert!(map.contains_key("shape"));
        assert!(map.contains_key("quality"));

        let bad = Task::new("p", TaskKind::Profile).with_param("null_threshold", 3i64);
        let err = agent.run(&bad, &TaskInput::new(Value::Table(orders()))).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidTask(_)));
    }
}
