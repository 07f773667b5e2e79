//! Text understanding: questions to snippets, requests to plans

use super::CollaboratorError;
use async_trait::async_trait;
use dpo_sandbox::CodeSnippet;
use dpo_types::PlannedStep;
use once_cell::sync::Lazy;
use regex::Regex;

/// What the caller wants back from [`TextUnderstanding::infer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferTarget {
    /// A code snippet answering the prompt
    Snippet,
    /// An ordered list of workflow steps
    Plan,
}

/// What [`TextUnderstanding::infer`] produced
#[derive(Debug, Clone, PartialEq)]
pub enum Inference {
    /// Snippet for the query agent
    Snippet(CodeSnippet),
    /// Steps for the planner
    Plan(Vec<PlannedStep>),
}

/// Language-model style collaborator
///
/// `prompt` is the user's text; `schema_hint` describes the data it is
/// about, in the `name:type, name:type (N rows)` form produced by
/// `Table::schema_summary`.
#[async_trait]
pub trait TextUnderstanding: Send + Sync {
    /// Service name for logs
    fn name(&self) -> &str;

    /// Turn `prompt` into a snippet or a plan
    async fn infer(
        &self,
        prompt: &str,
        schema_hint: &str,
        target: InferTarget,
    ) -> Result<Inference, CollaboratorError>;
}

/// Column names and types parsed from a schema hint
#[must_use]
pub fn hint_columns(schema_hint: &str) -> Vec<(String, String)> {
    let body = match schema_hint.rfind(" (") {
        Some(idx) => &schema_hint[..idx],
        None => schema_hint,
    };
    body.split(", ")
        .filter_map(|part| {
            let (name, dtype) = part.rsplit_once(':')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), dtype.trim().to_string()))
        })
        .collect()
}

/// Rule-based question → snippet mapper
///
/// Deterministic and always available; used when no model server is
/// configured and as the fallback when one is unreachable. It does not
/// plan workflows.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateModel;

static GROUP_BY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:by|per|for each|grouped by)\s+([a-z_][a-z0-9_ ]*)").expect("GROUP_BY pattern is valid")
});
static TOP_N: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:top|first|largest|highest|biggest)\s+(\d+)\b|\b(\d+)\s+(?:largest|highest|biggest|top)\b")
        .expect("TOP_N pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Mean,
    Sum,
    Max,
    Min,
    Median,
    Std,
    Count,
}

impl Intent {
    fn detect(q: &str) -> Option<Self> {
        let has = |words: &[&str]| words.iter().any(|w| contains_word(q, w));
        if has(&["average", "mean", "avg"]) {
            Some(Self::Mean)
        } else if has(&["total", "sum"]) {
            Some(Self::Sum)
        } else if has(&["median"]) {
            Some(Self::Median)
        } else if has(&["std", "deviation", "spread"]) {
            Some(Self::Std)
        } else if has(&["max", "maximum", "highest", "largest", "most", "biggest"]) {
            Some(Self::Max)
        } else if has(&["min", "minimum", "lowest", "smallest", "least"]) {
            Some(Self::Min)
        } else if has(&["count", "many", "number"]) {
            Some(Self::Count)
        } else {
            None
        }
    }

    fn stats_fn(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Sum => "sum",
            Self::Max => "max",
            Self::Min => "min",
            Self::Median => "median",
            Self::Std => "std",
            Self::Count => "count",
        }
    }

    /// Aggregation name accepted by `table.aggregate`
    fn aggregation(self) -> Option<&'static str> {
        match self {
            Self::Mean => Some("mean"),
            Self::Sum => Some("sum"),
            Self::Max => Some("max"),
            Self::Min => Some("min"),
            Self::Count => Some("count"),
            Self::Median | Self::Std => None,
        }
    }
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .any(|w| w == word)
}

fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

impl TemplateModel {
    /// Build a snippet for `question` over a table described by `schema_hint`
    #[must_use]
    pub fn snippet_for(question: &str, schema_hint: &str) -> CodeSnippet {
        let q = question.to_lowercase();
        let columns = hint_columns(schema_hint);
        let is_numeric = |name: &str| {
            columns
                .iter()
                .any(|(n, t)| n == name && (t == "integer" || t == "float"))
        };

        // columns named in the question, in order of appearance
        let mut mentioned: Vec<(usize, String)> = columns
            .iter()
            .filter_map(|(name, _)| {
                let lower = name.to_lowercase();
                let spaced = lower.replace('_', " ");
                q.find(&lower)
                    .or_else(|| q.find(&spaced))
                    .map(|pos| (pos, name.clone()))
            })
            .collect();
        mentioned.sort();
        let mentioned: Vec<String> = mentioned.into_iter().map(|(_, n)| n).collect();

        let group = GROUP_BY.captures(&q).and_then(|caps| {
            let phrase = caps.get(1)?.as_str().trim().to_string();
            mentioned
                .iter()
                .find(|c| {
                    let lower = c.to_lowercase();
                    phrase.starts_with(&lower) || phrase.starts_with(&lower.replace('_', " "))
                })
                .cloned()
        });
        let value_col = mentioned
            .iter()
            .filter(|c| Some(*c) != group.as_ref())
            .find(|c| is_numeric(c.as_str()))
            .cloned()
            .or_else(|| columns.iter().find(|(n, _)| is_numeric(n.as_str())).map(|(n, _)| n.clone()));
        let top_n = TOP_N.captures(&q).and_then(|caps| {
            caps.get(1)
                .or_else(|| caps.get(2))
                .and_then(|m| m.as_str().parse::<usize>().ok())
        });

        let (module, body) = if let (Some(n), Some(col)) = (top_n, value_col.as_ref()) {
            ("table", format!("table.top(df, {}, {n})", quoted(col)))
        } else if contains_word(&q, "correlation") || contains_word(&q, "corr") {
            let numeric: Vec<&String> = mentioned.iter().filter(|c| is_numeric(c.as_str())).collect();
            match numeric.as_slice() {
                [a, b, ..] => ("stats", format!("stats.corr(df, {}, {})", quoted(a), quoted(b))),
                _ => ("table", "table.head(df, 5)".to_string()),
            }
        } else if contains_word(&q, "unique") || contains_word(&q, "distinct") {
            match mentioned.first() {
                Some(col) => ("table", format!("table.distinct(df, {})", quoted(col))),
                None => ("table", "table.head(df, 5)".to_string()),
            }
        } else if let Some(intent) = Intent::detect(&q) {
            match (&group, intent.aggregation()) {
                (Some(g), Some(agg)) => {
                    let target = if intent == Intent::Count {
                        "*".to_string()
                    } else {
                        value_col.clone().unwrap_or_else(|| "*".to_string())
                    };
                    let agg = if target == "*" { "count" } else { agg };
                    (
                        "table",
                        format!("table.aggregate(df, {}, {}, {})", quoted(g), quoted(&target), quoted(agg)),
                    )
                }
                _ if intent == Intent::Count && mentioned.is_empty() => ("table", "table.rows(df)".to_string()),
                _ => match value_col.as_ref().or(mentioned.first()) {
                    Some(col) => ("stats", format!("stats.{}(df, {})", intent.stats_fn(), quoted(col))),
                    None => ("table", "table.rows(df)".to_string()),
                },
            }
        } else if contains_word(&q, "columns") {
            ("table", "table.columns(df)".to_string())
        } else if contains_word(&q, "shape") || contains_word(&q, "size") || contains_word(&q, "dimensions") {
            ("table", "table.shape(df)".to_string())
        } else {
            ("table", "table.head(df, 5)".to_string())
        };

        CodeSnippet::new(format!("import {module}\n{body}")).with_imports([module])
    }
}

#[async_trait]
impl TextUnderstanding for TemplateModel {
    fn name(&self) -> &str {
        "template"
    }

    async fn infer(
        &self,
        prompt: &str,
        schema_hint: &str,
        target: InferTarget,
    ) -> Result<Inference, CollaboratorError> {
        match target {
            InferTarget::Snippet => Ok(Inference::Snippet(Self::snippet_for(prompt, schema_hint))),
            InferTarget::Plan => Err(CollaboratorError::unavailable(
                "template",
                "plan inference is not supported",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const HINT: &str = "region:text, sales:float, units:integer (120 rows)";

    #[test]
    fn question_patterns_compile() {
        assert!(GROUP_BY.is_match("total sales by region"));
        assert!(TOP_N.is_match("top 5 products"));
    }

    fn body(question: &str) -> String {
        let snippet = TemplateModel::snippet_for(question, HINT);
        snippet.source.lines().last().unwrap_or_default().to_string()
    }

    #[test]
    fn parses_hint() {
        assert_eq!(
            hint_columns(HINT),
            vec![
                ("region".to_string(), "text".to_string()),
                ("sales".to_string(), "float".to_string()),
                ("units".to_string(), "integer".to_string()),
            ]
        );
        assert!(hint_columns("").is_empty());
    }

    #[test]
    fn grouped_average() {
        assert_eq!(
            body("What is the average sales by region?"),
            r#"table.aggregate(df, "region", "sales", "mean")"#
        );
    }

    #[test]
    fn ungrouped_total() {
        assert_eq!(body("total units sold"), r#"stats.sum(df, "units")"#);
    }

    #[test]
    fn top_n() {
        assert_eq!(body("show the top 3 rows by sales"), r#"table.top(df, "sales", 3)"#);
    }

    #[test]
    fn row_count_and_fallback() {
        assert_eq!(body("how many rows are there?"), "table.rows(df)");
        assert_eq!(body("count orders per region"), r#"table.aggregate(df, "region", "*", "count")"#);
        assert_eq!(body("tell me something"), "table.head(df, 5)");
    }

    #[test]
    fn declares_its_import() {
        let snippet = TemplateModel::snippet_for("median sales", HINT);
        assert_eq!(snippet.declared_imports, vec!["stats".to_string()]);
        assert!(snippet.source.starts_with("import stats\n"));
    }

    #[tokio::test]
    async fn plans_are_unavailable() {
        let err = TemplateModel.infer("load sales", "", InferTarget::Plan).await.unwrap_err();
        assert!(err.is_unavailable());
    }
}
