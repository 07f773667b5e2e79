//! Extraction and table transformations

use crate::agent::{Agent, AgentKind, TaskInput};
use crate::collaborators::StructuredStorage;
use crate::error::AgentError;
use async_trait::async_trait;
use dpo_types::{Aggregation, CompareOp, JoinKind, Scalar, Table, Task, TaskKind, Value};
use std::str::FromStr;
use std::sync::Arc;

/// Transform operations, selected by the `op` parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformOp {
    /// Keep rows matching a comparison
    Filter,
    /// Keep the named columns
    Select,
    /// Group and aggregate
    Aggregate,
    /// Join with another dataset
    Join,
    /// Order rows by a column
    Sort,
    /// First `n` rows
    Head,
    /// Remove duplicate rows
    Distinct,
    /// Remove rows with nulls
    DropNulls,
    /// Replace nulls with a value
    FillNulls,
    /// Rename columns
    Rename,
}

/// `export` is handled apart from the table operations: it accepts any value
fn is_export(op: &str) -> bool {
    matches!(op.trim().to_ascii_lowercase().as_str(), "export" | "save")
}

impl FromStr for TransformOp {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "filter" | "where" => Ok(Self::Filter),
            "select" | "project" => Ok(Self::Select),
            "aggregate" | "group_by" | "groupby" => Ok(Self::Aggregate),
            "join" | "merge" => Ok(Self::Join),
            "sort" | "order_by" => Ok(Self::Sort),
            "head" | "limit" | "top" => Ok(Self::Head),
            "distinct" | "unique" => Ok(Self::Distinct),
            "drop_nulls" | "dropna" => Ok(Self::DropNulls),
            "fill_nulls" | "fillna" => Ok(Self::FillNulls),
            "rename" => Ok(Self::Rename),
            other => Err(AgentError::invalid(format!("unknown transform op: {other}"))),
        }
    }
}

/// Handles `extract` and `transform` tasks
///
/// Pure over data: no code generation and no sandbox. Inputs named by the
/// task, including a join partner, are loaded before [`Agent::run`] is
/// called, so `extract` projects and limits what was loaded.
pub struct EtlAgent {
    storage: Arc<dyn StructuredStorage>,
}

impl EtlAgent {
    /// Agent saving extracted data to `storage`
    #[must_use]
    pub fn new(storage: Arc<dyn StructuredStorage>) -> Self {
        Self { storage }
    }

    fn extract(task: &Task, input: &TaskInput) -> Result<Value, AgentError> {
        if input.source.is_none() && input.dependencies.is_empty() {
            return Err(AgentError::MissingInput(format!(
                "extract task {} names no dataset or document",
                task.id
            )));
        }
        let Some(table) = input.primary.as_table() else {
            // documents keep their text and entities
            return Ok(input.primary.clone());
        };
        let columns = list_param(task, "columns");
        let mut out = if columns.is_empty() {
            table.clone()
        } else {
            table.select(&columns)?
        };
        if let Some(limit) = usize_param(task, "limit")? {
            out = out.head(limit);
        }
        Ok(Value::Table(out))
    }

    async fn transform(&self, task: &Task, input: &TaskInput) -> Result<Value, AgentError> {
        let op_name = required(task, "op")?;
        if is_export(op_name) {
            return self.export(task, input).await;
        }
        let op: TransformOp = op_name.parse()?;
        let table = input.table()?;
        let out = match op {
            TransformOp::Filter => {
                let column = required(task, "column")?;
                let cmp: CompareOp = task
                    .param_str("operator")
                    .or_else(|| task.param_str("cmp"))
                    .unwrap_or("==")
                    .parse()?;
                let value = match task.param("value") {
                    Some(Scalar::Str(s)) => Scalar::infer(s),
                    Some(v) => v.clone(),
                    None => return Err(AgentError::invalid("filter needs a value")),
                };
                table.filter(column, cmp, &value)?
            }
            TransformOp::Select => {
                let columns = list_param(task, "columns");
                if columns.is_empty() {
                    return Err(AgentError::invalid("select needs columns"));
                }
                table.select(&columns)?
            }
            TransformOp::Aggregate => {
                let agg: Aggregation = task
                    .param_str("agg")
                    .or_else(|| task.param_str("function"))
                    .unwrap_or("count")
                    .parse()?;
                let column = task.param_str("column").unwrap_or("*");
                table.aggregate(task.param_str("group_by"), column, agg)?
            }
            TransformOp::Join => {
                let on = required(task, "on")?;
                let how: JoinKind = task.param_str("how").unwrap_or("inner").parse()?;
                let right = Self::join_partner(task, input)?;
                table.join(&right, on, how)?
            }
            TransformOp::Sort => {
                let column = required(task, "column")?;
                let descending = task.param("descending").and_then(Scalar::as_bool).unwrap_or(false)
                    || task
                        .param_str("order")
                        .is_some_and(|o| o.eq_ignore_ascii_case("desc") || o.eq_ignore_ascii_case("descending"));
                table.sort_by(column, descending)?
            }
            TransformOp::Head => table.head(usize_param(task, "n")?.unwrap_or(5)),
            TransformOp::Distinct => table.distinct(required(task, "column")?)?,
            TransformOp::DropNulls => table.drop_nulls(&list_param(task, "columns"))?,
            TransformOp::FillNulls => {
                let value = task.param("value").cloned().unwrap_or(Scalar::Int(0));
                table.fill_nulls(&value)
            }
            TransformOp::Rename => table.rename(required(task, "from")?, required(task, "to")?)?,
        };
        tracing::debug!(
            task_id = %task.id,
            op = ?op,
            rows_in = table.row_count(),
            rows_out = out.row_count(),
            "transform applied"
        );
        Ok(Value::Table(out))
    }

    /// Right-hand table of a join
    ///
    /// `with` names either a dependency task or a dataset; without it the
    /// second dependency is used.
    fn join_partner(task: &Task, input: &TaskInput) -> Result<Table, AgentError> {
        let from_dependency = |value: &Value| {
            value
                .primary_table()
                .cloned()
                .ok_or_else(|| AgentError::MissingInput("join partner is not a table".to_string()))
        };
        match task.param_str("with") {
            Some(name) => match input.dependencies.get(name).or_else(|| input.references.get(name)) {
                Some(value) => from_dependency(value),
                None => Err(AgentError::MissingInput(format!("join partner {name} was not loaded"))),
            },
            None => {
                let first = task.dependencies.first().map(|d| d.as_str());
                let other = input
                    .dependencies
                    .iter()
                    .find(|(id, _)| Some(id.as_str()) != first)
                    .map(|(_, v)| v);
                match other {
                    Some(value) => from_dependency(value),
                    None => Err(AgentError::MissingInput("join needs a `with` table".to_string())),
                }
            }
        }
    }

    async fn export(&self, task: &Task, input: &TaskInput) -> Result<Value, AgentError> {
        let key = task
            .param_str("key")
            .map_or_else(|| format!("exports/{}", task.id), str::to_string);
        self.storage.put(&key, &input.primary).await?;
        tracing::info!(task_id = %task.id, key = %key, value = %input.primary.summary(), "exported");
        Ok(input.primary.clone())
    }
}

#[async_trait]
impl Agent for EtlAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Etl
    }

    fn supports(&self, kind: TaskKind) -> bool {
        matches!(kind, TaskKind::Extract | TaskKind::Transform)
    }

    async fn run(&self, task: &Task, input: &TaskInput) -> Result<Value, AgentError> {
        match task.kind {
            TaskKind::Extract => Self::extract(task, input),
            TaskKind::Transform => self.transform(task, input).await,
            kind => Err(AgentError::Unsupported {
                agent: AgentKind::Etl,
                kind,
            }),
        }
    }

    /// Exports write to storage and must run every time
    fn cacheable(&self, task: &Task) -> bool {
        !(task.kind == TaskKind::Transform && task.param_str("op").is_some_and(is_export))
    }

    /// A join's `with` dataset, unless it names a dependency
    fn references(&self, task: &Task) -> Vec<String> {
        let is_join = task.kind == TaskKind::Transform
            && task
                .param_str("op")
                .and_then(|op| op.parse::<TransformOp>().ok())
                == Some(TransformOp::Join);
        match task.param_str("with") {
            Some(name) if is_join && !task.dependencies.iter().any(|d| d.as_str() == name) => {
                vec![name.to_string()]
            }
            _ => Vec::new(),
        }
    }
}

fn required<'a>(task: &'a Task, key: &str) -> Result<&'a str, AgentError> {
    task.param_str(key)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AgentError::invalid(format!("{} task {} needs `{key}`", task.kind, task.id)))
}

/// Comma-separated list parameter
fn list_param(task: &Task, key: &str) -> Vec<String> {
    task.param_str(key)
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn usize_param(task: &Task, key: &str) -> Result<Option<usize>, AgentError> {
    match task.param(key) {
        None | Some(Scalar::Null) => Ok(None),
        Some(Scalar::Int(n)) => usize::try_from(*n)
            .map(Some)
            .map_err(|_| AgentError::invalid(format!("`{key}` must not be negative"))),
        Some(Scalar::Str(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AgentError::invalid(format!("`{key}` must be a count, got {s}"))),
        Some(other) => Err(AgentError::invalid(format!("`{key}` must be a count, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryStorage;
    use dpo_types::InputRef;
    use pretty_assertions::assert_eq;

    fn sales() -> Table {
        Table::from_rows(
            ["region", "product", "sales"],
            vec![
                vec![Scalar::from("north"), Scalar::from("a"), Scalar::Int(100)],
                vec![Scalar::from("south"), Scalar::from("a"), Scalar::Int(250)],
                vec![Scalar::from("north"), Scalar::from("b"), Scalar::Null],
                vec![Scalar::from("south"), Scalar::from("b"), Scalar::Int(50)],
            ],
        )
        .unwrap()
    }

    fn regions() -> Table {
        Table::from_rows(
            ["region", "manager"],
            vec![
                vec![Scalar::from("north"), Scalar::from("ana")],
                vec![Scalar::from("south"), Scalar::from("bo")],
            ],
        )
        .unwrap()
    }

    fn agent() -> (EtlAgent, Arc<InMemoryStorage>) {
        let storage = Arc::new(InMemoryStorage::new());
        (EtlAgent::new(storage.clone()), storage)
    }

    fn input() -> TaskInput {
        TaskInput::new(Value::Table(sales()))
            .with_dependency("t1", Value::Table(sales()))
            .with_reference("regions", Value::Table(regions()))
    }

    async fn transform(task: Task) -> Result<Table, AgentError> {
        let (agent, _) = agent();
        let value = agent.run(&task, &input()).await?;
        Ok(value.as_table().cloned().unwrap())
    }

    fn op(op: &str) -> Task {
        Task::new("t2", TaskKind::Transform).with_param("op", op).depends_on("t1")
    }

    #[tokio::test]
    async fn filter_infers_value_type() {
        let task = op("filter")
            .with_param("column", "sales")
            .with_param("operator", ">")
            .with_param("value", "90");
        let out = transform(task).await.unwrap();
        assert_eq!(out.row_count(), 2);
    }

    #[tokio::test]
    async fn aggregate_by_group() {
        let out = transform(
            op("aggregate")
                .with_param("group_by", "region")
                .with_param("column", "sales")
                .with_param("agg", "sum"),
        )
        .await
        .unwrap();
        assert_eq!(out.columns(), ["region", "sum_sales"]);
        assert_eq!(out.rows()[1][1], Scalar::Float(300.0));
    }

    #[tokio::test]
    async fn join_with_dataset() {
        let out = transform(op("join").with_param("with", "regions").with_param("on", "region"))
            .await
            .unwrap();
        assert_eq!(out.columns(), ["region", "product", "sales", "manager"]);
        assert_eq!(out.row_count(), 4);
    }

    #[test]
    fn join_partner_is_a_reference_unless_it_is_a_dependency() {
        let (agent, _) = agent();
        let join = op("join").with_param("with", "regions").with_param("on", "region");
        assert_eq!(agent.references(&join), vec!["regions".to_string()]);
        let on_dependency = op("join").with_param("with", "t1").with_param("on", "region");
        assert!(agent.references(&on_dependency).is_empty());
        assert!(agent.references(&op("filter").with_param("with", "regions")).is_empty());
    }

    #[tokio::test]
    async fn join_without_loaded_partner_is_missing_input() {
        let (agent, _) = agent();
        let task = op("join").with_param("with", "elsewhere").with_param("on", "region");
        let err = agent.run(&task, &input()).await.unwrap_err();
        assert!(matches!(err, AgentError::MissingInput(_)));
    }

    #[tokio::test]
    async fn sort_head_and_cleanup_ops() {
        let sorted = transform(op("sort").with_param("column", "sales").with_param("order", "desc"))
            .await
            .unwrap();
        assert_eq!(sorted.rows()[0][2], Scalar::Int(250));

        let head = transform(op("head").with_param("n", 1i64)).await.unwrap();
        assert_eq!(head.row_count(), 1);

        let dropped = transform(op("drop_nulls")).await.unwrap();
        assert_eq!(dropped.row_count(), 3);

        let renamed = transform(op("rename").with_param("from", "sales").with_param("to", "revenue"))
            .await
            .unwrap();
        assert_eq!(renamed.columns()[2], "revenue");
    }

    #[tokio::test]
    async fn bad_parameters_are_invalid_task() {
        let err = transform(op("filter").with_param("column", "nope").with_param("value", 1i64))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidTask(_)));
        let err = transform(op("explode")).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidTask(_)));
        let err = transform(op("head").with_param("n", -1i64)).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidTask(_)));
    }

    #[tokio::test]
    async fn export_writes_storage_and_is_not_cacheable() {
        let (agent, storage) = agent();
        let task = op("export").with_param("key", "reports/sales");
        assert!(!agent.cacheable(&task));
        agent.run(&task, &input()).await.unwrap();
        assert_eq!(
            storage.get("reports/sales").await.unwrap(),
            Some(Value::Table(sales()))
        );
    }

    #[tokio::test]
    async fn extract_projects_and_limits() {
        let (agent, _) = agent();
        let task = Task::new("t1", TaskKind::Extract)
            .with_input(InputRef::Dataset("sales".into()))
            .with_param("columns", "region, sales")
            .with_param("limit", 2i64);
        let input = TaskInput::new(Value::Table(sales())).with_source(task.input.clone());
        let out = agent.run(&task, &input).await.unwrap();
        let table = out.as_table().unwrap();
        assert_eq!(table.columns(), ["region", "sales"]);
        assert_eq!(table.row_count(), 2);

        let bare = Task::new("t1", TaskKind::Extract);
        let err = agent.run(&bare, &TaskInput::new(Value::Null)).await.unwrap_err();
        assert!(matches!(err, AgentError::MissingInput(_)));
    }

    #[tokio::test]
    async fn rejects_other_kinds() {
        let (agent, _) = agent();
        assert!(!agent.supports(TaskKind::Query));
        let err = agent
            .run(&Task::new("q", TaskKind::Query), &input())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Unsupported { .. }));
    }
}
