//! Natural-language questions answered by sandboxed snippets

use crate::agent::{Agent, AgentKind, TaskInput};
use crate::collaborators::{Inference, InferTarget, TemplateModel, TextUnderstanding};
use crate::error::AgentError;
use async_trait::async_trait;
use dpo_sandbox::{Bindings, CodeSnippet, PolicyValidator, Sandbox};
use dpo_types::{Task, TaskKind, Value};
use std::sync::Arc;

/// Handles `query` and `custom-code` tasks
///
/// A `code` parameter is executed as given. Otherwise the `question`
/// parameter and the input's schema go to the text-understanding
/// collaborator; when it is unavailable the rule-based [`TemplateModel`]
/// answers instead. Every snippet passes the policy validator before it
/// reaches the sandbox.
pub struct QueryAgent {
    model: Arc<dyn TextUnderstanding>,
    validator: PolicyValidator,
    sandbox: Sandbox,
}

impl QueryAgent {
    /// Agent answering through `model`, checked by `validator` and run in `sandbox`
    #[must_use]
    pub fn new(model: Arc<dyn TextUnderstanding>, validator: PolicyValidator, sandbox: Sandbox) -> Self {
        Self {
            model,
            validator,
            sandbox,
        }
    }

    async fn snippet_for(&self, task: &Task, input: &TaskInput) -> Result<CodeSnippet, AgentError> {
        if let Some(code) = task.param_str("code") {
            let imports: Vec<&str> = task
                .param_str("imports")
                .map(|s| s.split(',').map(str::trim).filter(|m| !m.is_empty()).collect())
                .unwrap_or_default();
            return Ok(CodeSnippet::new(code).with_imports(imports));
        }
        let question = task
            .param_str("question")
            .or_else(|| task.param_str("prompt"))
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| AgentError::invalid(format!("{} task {} needs `question` or `code`", task.kind, task.id)))?;
        let hint = input
            .primary
            .primary_table()
            .map(dpo_types::Table::schema_summary)
            .unwrap_or_default();

        match self.model.infer(question, &hint, InferTarget::Snippet).await {
            Ok(Inference::Snippet(snippet)) => Ok(snippet),
            Ok(Inference::Plan(_)) => {
                tracing::warn!(task_id = %task.id, model = self.model.name(), "model answered with a plan, using templates");
                Ok(TemplateModel::snippet_for(question, &hint))
            }
            Err(err) if err.is_unavailable() => {
                tracing::warn!(task_id = %task.id, model = self.model.name(), error = %err, "model unavailable, using templates");
                Ok(TemplateModel::snippet_for(question, &hint))
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Dependency ids made usable as snippet names
fn binding_name(id: &str) -> String {
    let mut name: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

/// Name under which the primary input is bound
const PRIMARY_BINDING: &str = "df";

/// Snippet bindings: `df` plus one name per dependency
///
/// # Errors
/// [`AgentError::InvalidTask`] when two dependency ids map to the same name,
/// or one maps to `df`.
fn bindings(input: &TaskInput) -> Result<Bindings, AgentError> {
    let mut out = Bindings::new();
    let mut owners: std::collections::BTreeMap<String, &str> = std::collections::BTreeMap::new();
    for (id, value) in &input.dependencies {
        let name = binding_name(id);
        if name == PRIMARY_BINDING {
            return Err(AgentError::invalid(format!(
                "dependency {id} would bind as `{PRIMARY_BINDING}`, which names the primary input"
            )));
        }
        if let Some(other) = owners.insert(name.clone(), id) {
            return Err(AgentError::invalid(format!(
                "dependencies {other} and {id} would both bind as `{name}`"
            )));
        }
        out.insert(name, value.clone());
    }
    let df = input
        .primary
        .primary_table()
        .map_or_else(|| input.primary.clone(), |t| Value::Table(t.clone()));
    out.insert(PRIMARY_BINDING.to_string(), df);
    Ok(out)
}

#[async_trait]
impl Agent for QueryAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Query
    }

    fn supports(&self, kind: TaskKind) -> bool {
        matches!(kind, TaskKind::Query | TaskKind::CustomCode)
    }

    async fn run(&self, task: &Task, input: &TaskInput) -> Result<Value, AgentError> {
        if !self.supports(task.kind) {
            return Err(AgentError::Unsupported {
                agent: AgentKind::Query,
                kind: task.kind,
            });
        }
        let snippet = self.snippet_for(task, input).await?;
        let validated = self.validator.validate(&snippet).map_err(|violation| {
            tracing::warn!(task_id = %task.id, violation = %violation, "snippet rejected");
            violation
        })?;
        tracing::debug!(task_id = %task.id, snippet = %validated.fingerprint().short(), "executing snippet");
        let bindings = bindings(input)?;
        Ok(self.sandbox.execute(&validated, bindings).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::CollaboratorError;
    use dpo_sandbox::{PolicyViolation, SandboxConfig, SandboxError};
    use dpo_types::{Scalar, Table};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    struct DownModel;

    #[async_trait]
    impl TextUnderstanding for DownModel {
        fn name(&self) -> &str {
            "down"
        }

        async fn infer(&self, _: &str, _: &str, _: InferTarget) -> Result<Inference, CollaboratorError> {
            Err(CollaboratorError::unavailable("down", "connection refused"))
        }
    }

    struct FixedModel(&'static str);

    #[async_trait]
    impl TextUnderstanding for FixedModel {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn infer(&self, _: &str, _: &str, _: InferTarget) -> Result<Inference, CollaboratorError> {
            Ok(Inference::Snippet(CodeSnippet::new(self.0)))
        }
    }

    fn agent(model: Arc<dyn TextUnderstanding>) -> QueryAgent {
        QueryAgent::new(
            model,
            PolicyValidator::default(),
            Sandbox::new(SandboxConfig::default().with_timeout(Duration::from_secs(5))),
        )
    }

    fn input() -> TaskInput {
        let table = Table::from_rows(
            ["region", "sales"],
            vec![
                vec![Scalar::from("north"), Scalar::Int(10)],
                vec![Scalar::from("south"), Scalar::Int(30)],
            ],
        )
        .unwrap();
        TaskInput::new(Value::Table(table)).with_dependency("t-1", Value::Int(7))
    }

    #[test]
    fn binding_names_are_identifiers() {
        assert_eq!(binding_name("t1"), "t1");
        assert_eq!(binding_name("t-1"), "t_1");
        assert_eq!(binding_name("1st"), "_1st");
    }

    #[test]
    fn colliding_binding_names_are_rejected() {
        let clash = input().with_dependency("t_1", Value::Int(8));
        let err = bindings(&clash).unwrap_err();
        assert!(matches!(err, AgentError::InvalidTask(ref m) if m.contains("t-1") && m.contains("t_1")));

        let shadow = input().with_dependency("df", Value::Int(8));
        assert!(matches!(bindings(&shadow), Err(AgentError::InvalidTask(_))));

        let ok = bindings(&input()).unwrap();
        assert_eq!(ok.keys().collect::<Vec<_>>(), vec!["df", "t_1"]);
    }

    #[tokio::test]
    async fn colliding_dependencies_fail_the_task() {
        let task = Task::new("c", TaskKind::CustomCode).with_param("code", "1");
        let clash = input().with_dependency("t_1", Value::Int(8));
        let err = agent(Arc::new(DownModel)).run(&task, &clash).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidTask(_)));
    }

    #[tokio::test]
    async fn code_param_skips_the_model() {
        let task = Task::new("c", TaskKind::CustomCode)
            .with_param("code", "import stats\nstats.sum(df, \"sales\") + t_1")
            .with_param("imports", "stats");
        let value = agent(Arc::new(DownModel)).run(&task, &input()).await.unwrap();
        assert_eq!(value.as_f64(), Some(47.0));
    }

    #[tokio::test]
    async fn unavailable_model_falls_back_to_templates() {
        let task = Task::new("q", TaskKind::Query).with_param("question", "what is the total sales?");
        let value = agent(Arc::new(DownModel)).run(&task, &input()).await.unwrap();
        assert_eq!(value.as_f64(), Some(40.0));
    }

    #[tokio::test]
    async fn forbidden_snippet_is_rejected_before_execution() {
        let task = Task::new("q", TaskKind::Query).with_param("question", "anything");
        let err = agent(Arc::new(FixedModel("import os\nos.system(\"rm -rf /\")")))
            .run(&task, &input())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Policy(PolicyViolation::ForbiddenModule { .. })));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn runtime_fault_is_an_execution_error() {
        let task = Task::new("q", TaskKind::Query).with_param("question", "anything");
        let err = agent(Arc::new(FixedModel("import stats\nstats.mean(df, \"missing\")")))
            .run(&task, &input())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Sandbox(SandboxError::Execution { .. })));
    }

    #[tokio::test]
    async fn question_is_required() {
        let err = agent(Arc::new(DownModel))
            .run(&Task::new("q", TaskKind::Query), &input())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidTask(_)));
    }
}
