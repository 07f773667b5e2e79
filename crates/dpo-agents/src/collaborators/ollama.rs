//! Client for an Ollama-compatible model server

use super::model::{Inference, InferTarget, TextUnderstanding};
use super::prompts::{plan_prompt, snippet_prompt};
use super::CollaboratorError;
use async_trait::async_trait;
use dpo_sandbox::CodeSnippet;
use dpo_types::{InputRef, Params, PlannedStep, Scalar, TaskKind};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SERVICE: &str = "ollama";
const BODY_PREVIEW_LIMIT: usize = 256;

/// Model server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Server root, e.g. `http://localhost:11434`
    pub base_url: String,
    pub model: String,
    /// Per-request timeout
    pub timeout_ms: u64,
    /// Sampling temperature
    pub temperature: f32,
}

impl OllamaConfig {
    /// Per-request timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Point at another server
    #[inline]
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Use another model
    #[inline]
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the per-request timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            timeout_ms: 30_000,
            temperature: 0.4,
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    name: String,
}

/// [`TextUnderstanding`] backed by `POST /api/generate`
///
/// For [`InferTarget::Plan`] the `schema_hint` argument carries the list of
/// known datasets.
#[derive(Debug, Clone)]
pub struct OllamaModel {
    config: OllamaConfig,
    http: reqwest::Client,
    url_generate: String,
    url_tags: String,
}

impl OllamaModel {
    /// # Errors
    /// Fails when the HTTP client cannot be built.
    pub fn new(config: OllamaConfig) -> Result<Self, CollaboratorError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| CollaboratorError::unavailable(SERVICE, e.to_string()))?;
        let base = config.base_url.trim_end_matches('/');
        Ok(Self {
            url_generate: format!("{base}/api/generate"),
            url_tags: format!("{base}/api/tags"),
            config,
            http,
        })
    }

    /// Settings in use
    #[must_use]
    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    /// Names of the models the server has pulled
    pub async fn list_models(&self) -> Result<Vec<String>, CollaboratorError> {
        let resp = self
            .http
            .get(&self.url_tags)
            .send()
            .await
            .map_err(|e| from_reqwest(&e))?;
        let body = read_success(resp).await?;
        let tags: TagsResponse = serde_json::from_str(&body)
            .map_err(|e| CollaboratorError::malformed(SERVICE, format!("tags: {e}")))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Whether the server answers and has the configured model
    pub async fn check_connection(&self) -> bool {
        match self.list_models().await {
            Ok(models) => models
                .iter()
                .any(|m| m == &self.config.model || m.split(':').next() == Some(self.config.model.as_str())),
            Err(err) => {
                tracing::debug!(error = %err, "model server check failed");
                false
            }
        }
    }

    async fn generate(&self, prompt: &str, json: bool) -> Result<String, CollaboratorError> {
        let request = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
            format: json.then_some("json"),
            options: GenerateOptions {
                temperature: self.config.temperature,
            },
        };
        let resp = self
            .http
            .post(&self.url_generate)
            .json(&request)
            .send()
            .await
            .map_err(|e| from_reqwest(&e))?;
        let body = read_success(resp).await?;
        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| CollaboratorError::malformed(SERVICE, format!("{e}: {}", preview(&body))))?;
        Ok(parsed.response)
    }
}

fn from_reqwest(err: &reqwest::Error) -> CollaboratorError {
    let kind = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect"
    } else {
        "request"
    };
    CollaboratorError::unavailable(SERVICE, format!("{kind}: {err}"))
}

async fn read_success(resp: reqwest::Response) -> Result<String, CollaboratorError> {
    let status = resp.status();
    let body = resp.text().await.map_err(|e| from_reqwest(&e))?;
    if !status.is_success() {
        return Err(CollaboratorError::unavailable(
            SERVICE,
            format!("status {}: {}", status.as_u16(), preview(&body)),
        ));
    }
    Ok(body)
}

fn preview(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty body>".to_string();
    }
    let mut out: String = trimmed.chars().take(BODY_PREVIEW_LIMIT).collect();
    if trimmed.chars().count() > BODY_PREVIEW_LIMIT {
        out.push_str("...");
    }
    out
}

/// Code from the first fenced block, or the whole text when there is none
#[must_use]
pub fn extract_code(text: &str) -> Option<String> {
    let code = match text.find("```") {
        Some(start) => {
            let after = &text[start + 3..];
            // skip the info string
            let body = after.split_once('\n').map_or(after, |(_, rest)| rest);
            match body.find("```") {
                Some(end) => &body[..end],
                None => body,
            }
        }
        None => text,
    };
    let code = code.trim();
    (!code.is_empty()).then(|| code.to_string())
}

/// Modules named by `import` statements
fn imports_of(source: &str) -> Vec<String> {
    source
        .lines()
        .filter_map(|line| line.trim().strip_prefix("import "))
        .map(|m| m.trim().trim_end_matches(';').to_string())
        .filter(|m| !m.is_empty())
        .collect()
}

#[derive(Deserialize)]
struct RawPlan {
    steps: Vec<RawStep>,
}

#[derive(Deserialize)]
struct RawStep {
    kind: String,
    #[serde(default)]
    params: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    input: Option<RawInput>,
    #[serde(default)]
    depends_on: Vec<usize>,
    #[serde(default)]
    optional: bool,
}

#[derive(Deserialize)]
struct RawInput {
    #[serde(default)]
    source: String,
    #[serde(default)]
    name: String,
}

fn json_scalar(value: serde_json::Value) -> Scalar {
    match value {
        serde_json::Value::Null => Scalar::Null,
        serde_json::Value::Bool(b) => Scalar::Bool(b),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Scalar::Int)
            .or_else(|| n.as_f64().map(Scalar::Float))
            .unwrap_or(Scalar::Null),
        serde_json::Value::String(s) => Scalar::Str(s),
        other => Scalar::Str(other.to_string()),
    }
}

/// Parse a model's JSON plan into steps
///
/// Task kinds accept the usual aliases. A dependency must point at an
/// earlier step.
///
/// # Errors
/// Returns a description of the first problem found.
pub fn parse_plan(text: &str) -> Result<Vec<PlannedStep>, String> {
    let raw: RawPlan = serde_json::from_str(text.trim()).map_err(|e| e.to_string())?;
    if raw.steps.is_empty() {
        return Err("plan has no steps".to_string());
    }
    raw.steps
        .into_iter()
        .enumerate()
        .map(|(i, step)| {
            let kind: TaskKind = step.kind.parse().map_err(|e| format!("step {i}: {e}"))?;
            if let Some(dep) = step.depends_on.iter().find(|d| **d >= i) {
                return Err(format!("step {i} depends on later step {dep}"));
            }
            let input = match step.input {
                None => InputRef::None,
                Some(input) if input.name.is_empty() => InputRef::None,
                Some(input) => match input.source.to_ascii_lowercase().as_str() {
                    "document" | "doc" | "file" => InputRef::Document(input.name),
                    _ => InputRef::Dataset(input.name),
                },
            };
            let params: Params = step.params.into_iter().map(|(k, v)| (k, json_scalar(v))).collect();
            Ok(PlannedStep {
                kind,
                params,
                input,
                depends_on: step.depends_on,
                optional: step.optional,
            })
        })
        .collect()
}

#[async_trait]
impl TextUnderstanding for OllamaModel {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn infer(
        &self,
        prompt: &str,
        schema_hint: &str,
        target: InferTarget,
    ) -> Result<Inference, CollaboratorError> {
        match target {
            InferTarget::Snippet => {
                let text = self.generate(&snippet_prompt(prompt, schema_hint), false).await?;
                let source = extract_code(&text)
                    .ok_or_else(|| CollaboratorError::malformed(SERVICE, "empty snippet"))?;
                let imports = imports_of(&source);
                tracing::debug!(model = %self.config.model, imports = ?imports, "model proposed snippet");
                Ok(Inference::Snippet(CodeSnippet::new(source).with_imports(imports)))
            }
            InferTarget::Plan => {
                let text = self.generate(&plan_prompt(prompt, schema_hint), true).await?;
                let steps = parse_plan(&text).map_err(|e| CollaboratorError::malformed(SERVICE, e))?;
                tracing::debug!(model = %self.config.model, steps = steps.len(), "model proposed plan");
                Ok(Inference::Plan(steps))
            }
        }
    }
}
