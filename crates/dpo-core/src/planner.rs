//! Turning request text into planned steps

use crate::error::PlanningError;
use async_trait::async_trait;
use dpo_agents::collaborators::{Inference, InferTarget, TextUnderstanding};
use dpo_memory::SessionContext;
use dpo_types::{InputRef, Params, PlannedStep, Scalar, TaskKind};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

/// Session scratch key naming the dataset the conversation is about
pub const ACTIVE_DATASET: &str = "active_dataset";

/// Produces the steps of a workflow
#[async_trait]
pub trait Planner: Send + Sync {
    fn name(&self) -> &str;

    /// Plan `request`; `datasets` are the names the tabular collaborator knows
    ///
    /// # Errors
    /// [`PlanningError::NoTaskInferred`] when nothing in the request maps to
    /// a task.
    async fn plan(
        &self,
        request: &str,
        context: &SessionContext,
        datasets: &[String],
    ) -> Result<Vec<PlannedStep>, PlanningError>;
}

static CLAUSE_BREAK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*(?:;|\n|[.!?](?:\s+|$)|,?\s+and then\s+|,?\s+then\s+)\s*").expect("CLAUSE_BREAK pattern is valid")
});
static LOAD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:load|extract|read|open|import|use)\s+(?:the\s+)?(?:dataset\s+|table\s+|data\s+from\s+)?([A-Za-z_][\w.-]*)").expect("LOAD pattern is valid")
});
static DOCUMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:document|report|pdf|file)\s+([A-Za-z_][\w.-]*)").expect("DOCUMENT pattern is valid")
});
static FILTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:filter|where|only|keep)\b.*?\b([A-Za-z_]\w*)\s*(>=|<=|!=|==|=|>|<|greater than|more than|above|less than|below|equals?|is|contains)\s*([\w.'-]+)").expect("FILTER pattern is valid")
});
static AGGREGATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(sum|total|average|avg|mean|count|min|minimum|max|maximum)\s+of\s+([A-Za-z_]\w*)\s+(?:by|per|for each)\s+([A-Za-z_]\w*)").expect("AGGREGATE pattern is valid")
});
static TOP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\btop\s+(\d+)\s+(?:\w+\s+)?by\s+([A-Za-z_]\w*)").expect("TOP pattern is valid")
});
static JOIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:join|merge)\s+(?:it\s+)?(?:with\s+)?([A-Za-z_][\w.-]*)\s+on\s+([A-Za-z_]\w*)").expect("JOIN pattern is valid")
});
static SORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:sort|order)\s+(?:it\s+|rows\s+)?by\s+([A-Za-z_]\w*)(\s+desc(?:ending)?)?").expect("SORT pattern is valid")
});
static DROP_NULLS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:drop|remove)\s+(?:rows\s+with\s+)?(?:nulls?|missing|empty|na)\b|\bdropna\b").expect("DROP_NULLS pattern is valid")
});
static FILL_NULLS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bfill\s+(?:nulls?|missing(?:\s+values)?|gaps)\s+with\s+([\w.'-]+)").expect("FILL_NULLS pattern is valid")
});
static PROFILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:profile|profiling|data quality|quality|describe|overview|summari[sz]e)\b").expect("PROFILE pattern is valid")
});
static EXPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:export|save|store)\b(?:.*?\b(?:to|as)\s+([\w./-]+))?").expect("EXPORT pattern is valid")
});
static QUESTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\?|^\s*(?:what|which|who|how|when|where|why|show|list|compute|calculate|find|give|tell|is|are|does|do)\b|\b(?:average|mean|median|total|sum|count|correlation|distinct|unique|max(?:imum)?|min(?:imum)?|highest|lowest)\b").expect("QUESTION pattern is valid")
});

/// Deterministic rule-based planner
///
/// Splits the request into clauses on `then`, `;`, newlines and sentence
/// breaks, and maps keywords in each clause to steps. Steps run as a chain:
/// each one consumes the previous step's output. When no dataset is named,
/// the session's [`ACTIVE_DATASET`] is used.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordPlanner;

struct PlanBuilder {
    steps: Vec<PlannedStep>,
    dataset: Option<String>,
}

impl PlanBuilder {
    /// Append a step chained onto the previous one, loading the active
    /// dataset first when nothing precedes it
    fn push(&mut self, kind: TaskKind, params: Params) {
        if self.steps.is_empty() {
            if let Some(name) = self.dataset.clone() {
                self.steps
                    .push(PlannedStep::new(TaskKind::Extract).with_input(InputRef::Dataset(name)));
            }
        }
        let mut step = PlannedStep::new(kind).with_params(params);
        if let Some(prev) = self.steps.len().checked_sub(1) {
            step = step.after(prev);
        }
        self.steps.push(step);
    }

    fn extract(&mut self, input: InputRef) {
        self.steps.push(PlannedStep::new(TaskKind::Extract).with_input(input));
    }
}

fn params<const N: usize>(pairs: [(&str, Scalar); N]) -> Params {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn comparison(word: &str) -> &'static str {
    match word.to_ascii_lowercase().as_str() {
        ">" | "greater than" | "more than" | "above" => ">",
        ">=" => ">=",
        "<" | "less than" | "below" => "<",
        "<=" => "<=",
        "!=" => "!=",
        "contains" => "contains",
        _ => "==",
    }
}

fn unquote(s: &str) -> &str {
    s.trim_matches(|c| c == '\'' || c == '"')
}

/// Dataset named in `clause`: a known name mentioned as a word, else the
/// object of a load verb
fn named_dataset(clause: &str, datasets: &[String]) -> Option<String> {
    let lower = clause.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric() && c != '_' && c != '-' && c != '.')
        .collect();
    datasets
        .iter()
        .find(|d| words.contains(&d.to_lowercase().as_str()))
        .cloned()
        .or_else(|| {
            LOAD.captures(clause).and_then(|c| c.get(1)).map(|m| m.as_str().trim_end_matches('.').to_string())
        })
}

impl KeywordPlanner {
    /// Clauses of a request, in order
    #[must_use]
    pub fn clauses(request: &str) -> Vec<String> {
        CLAUSE_BREAK
            .split(request)
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Plan without session state
    ///
    /// # Errors
    /// See [`Planner::plan`].
    pub fn plan_request(
        &self,
        request: &str,
        active_dataset: Option<&str>,
        datasets: &[String],
    ) -> Result<Vec<PlannedStep>, PlanningError> {
        if request.trim().is_empty() {
            return Err(PlanningError::EmptyRequest);
        }
        let mut plan = PlanBuilder {
            steps: Vec::new(),
            dataset: active_dataset.map(str::to_string),
        };

        for clause in Self::clauses(request) {
            let before = plan.steps.len();
            let wants_load = LOAD.is_match(&clause);

            if let Some(doc) = DOCUMENT.captures(&clause).and_then(|c| c.get(1)) {
                if wants_load || clause.to_lowercase().contains("extract") {
                    plan.extract(InputRef::Document(doc.as_str().to_string()));
                }
            } else if wants_load {
                if let Some(name) = named_dataset(&clause, datasets) {
                    plan.dataset = Some(name.clone());
                    plan.extract(InputRef::Dataset(name));
                }
            } else if let Some(name) = named_dataset(&clause, datasets) {
                // a known dataset mentioned in passing switches the chain to it
                if plan.dataset.as_deref() != Some(name.as_str()) && plan.steps.is_empty() {
                    plan.dataset = Some(name);
                }
            }

            if let Some(c) = JOIN.captures(&clause) {
                plan.push(
                    TaskKind::Transform,
                    params([
                        ("op", "join".into()),
                        ("with", c[1].to_string().into()),
                        ("on", c[2].to_string().into()),
                    ]),
                );
            }
            if let Some(c) = FILTER.captures(&clause) {
                plan.push(
                    TaskKind::Transform,
                    params([
                        ("op", "filter".into()),
                        ("column", c[1].to_string().into()),
                        ("operator", comparison(&c[2]).into()),
                        ("value", Scalar::infer(unquote(&c[3]))),
                    ]),
                );
            }
            if DROP_NULLS.is_match(&clause) {
                plan.push(TaskKind::Transform, params([("op", "drop_nulls".into())]));
            }
            if let Some(c) = FILL_NULLS.captures(&clause) {
                plan.push(
                    TaskKind::Transform,
                    params([("op", "fill_nulls".into()), ("value", Scalar::infer(unquote(&c[1])))]),
                );
            }
            if let Some(c) = AGGREGATE.captures(&clause) {
                plan.push(
                    TaskKind::Transform,
                    params([
                        ("op", "aggregate".into()),
                        ("agg", c[1].to_lowercase().into()),
                        ("column", c[2].to_string().into()),
                        ("group_by", c[3].to_string().into()),
                    ]),
                );
            }
            if let Some(c) = TOP.captures(&clause) {
                let n = c[1].parse::<i64>().unwrap_or(5);
                plan.push(
                    TaskKind::Transform,
                    params([("op", "sort".into()), ("column", c[2].to_string().into()), ("order", "desc".into())]),
                );
                plan.push(TaskKind::Transform, params([("op", "head".into()), ("n", n.into())]));
            } else if let Some(c) = SORT.captures(&clause) {
                let order = if c.get(2).is_some() { "desc" } else { "asc" };
                plan.push(
                    TaskKind::Transform,
                    params([("op", "sort".into()), ("column", c[1].to_string().into()), ("order", order.into())]),
                );
            }
            if PROFILE.is_match(&clause) {
                plan.push(TaskKind::Profile, Params::new());
            }

            let found_transform = plan.steps[before..].iter().any(|s| s.kind != TaskKind::Extract);
            if !found_transform && !wants_load && QUESTION.is_match(&clause) {
                plan.push(TaskKind::Query, params([("question", clause.clone().into())]));
            }

            if let Some(c) = EXPORT.captures(&clause) {
                let mut p = params([("op", "export".into())]);
                if let Some(key) = c.get(1) {
                    p.insert("key".to_string(), key.as_str().trim_end_matches('.').into());
                }
                plan.push(TaskKind::Transform, p);
            }
        }

        if plan.steps.is_empty() {
            return Err(PlanningError::NoTaskInferred(request.trim().to_string()));
        }
        Ok(plan.steps)
    }
}

#[async_trait]
impl Planner for KeywordPlanner {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn plan(
        &self,
        request: &str,
        context: &SessionContext,
        datasets: &[String],
    ) -> Result<Vec<PlannedStep>, PlanningError> {
        self.plan_request(request, context.scratch_str(ACTIVE_DATASET), datasets)
    }
}

/// Planner backed by a text-understanding collaborator
///
/// Falls back to [`KeywordPlanner`] when the collaborator is unavailable or
/// answers with something that is not a usable plan.
pub struct ModelPlanner {
    model: Arc<dyn TextUnderstanding>,
    fallback: KeywordPlanner,
}

impl ModelPlanner {
    #[must_use]
    pub fn new(model: Arc<dyn TextUnderstanding>) -> Self {
        Self {
            model,
            fallback: KeywordPlanner,
        }
    }
}

fn check_references(steps: &[PlannedStep]) -> Result<(), PlanningError> {
    for (i, step) in steps.iter().enumerate() {
        if let Some(&dependency) = step.depends_on.iter().find(|d| **d >= i) {
            return Err(PlanningError::BadStepReference { step: i, dependency });
        }
    }
    Ok(())
}

#[async_trait]
impl Planner for ModelPlanner {
    fn name(&self) -> &str {
        self.model.name()
    }

    async fn plan(
        &self,
        request: &str,
        context: &SessionContext,
        datasets: &[String],
    ) -> Result<Vec<PlannedStep>, PlanningError> {
        if request.trim().is_empty() {
            return Err(PlanningError::EmptyRequest);
        }
        let mut hint = datasets.join(", ");
        if let Some(active) = context.scratch_str(ACTIVE_DATASET) {
            hint.push_str(&format!(" (current: {active})"));
        }
        match self.model.infer(request, &hint, InferTarget::Plan).await {
            Ok(Inference::Plan(steps)) if !steps.is_empty() => match check_references(&steps) {
                Ok(()) => return Ok(steps),
                Err(err) => {
                    tracing::warn!(model = self.model.name(), error = %err, "model plan rejected, using keywords");
                }
            },
            Ok(_) => {
                tracing::warn!(model = self.model.name(), "model returned no plan, using keywords");
            }
            Err(err) => {
                tracing::warn!(model = self.model.name(), error = %err, "planner unavailable, using keywords");
            }
        }
        self.fallback.plan(request, context, datasets).await
    }
}
