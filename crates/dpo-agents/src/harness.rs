//! Behaviour shared by every agent: input resolution, caching, retries
//!
//! Agents stay small by composition: an [`AgentHarness`] wraps one agent and
//! does everything around [`Agent::run`].

use crate::agent::{Agent, AgentKind, TaskInput};
use crate::collaborators::Collaborators;
use crate::config::AgentConfig;
use crate::error::AgentError;
use chrono::{DateTime, Utc};
use dpo_cache::{CacheKey, CacheManager};
use dpo_types::{InputRef, Task, Value};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Value produced for a task and whether it came from cache
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessOutput {
    /// The task's value
    pub value: Value,
    /// Whether it was served from cache
    pub cache_hit: bool,
}

/// Point-in-time execution statistics of one agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentStats {
    /// Agent the stats belong to
    pub agent: AgentKind,
    /// Tasks handed to the harness, cached or not
    pub executions: u64,
    /// Executions that produced a value
    pub successes: u64,
    /// Executions that ended in an error
    pub failures: u64,
    /// Successful executions answered from cache
    pub cache_hits: u64,
    /// Wall-clock time spent in successful and failed executions
    pub total_ms: u64,
    /// When the harness was built
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Counters {
    executions: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    cache_hits: AtomicU64,
    total_ms: AtomicU64,
}

/// Runs an agent with input resolution, caching, retries and stats
pub struct AgentHarness {
    agent: Arc<dyn Agent>,
    collaborators: Collaborators,
    cache: CacheManager,
    config: AgentConfig,
    counters: Counters,
    created_at: DateTime<Utc>,
}

impl AgentHarness {
    /// Harness around `agent`
    #[must_use]
    pub fn new(agent: Arc<dyn Agent>, collaborators: Collaborators, cache: CacheManager, config: AgentConfig) -> Self {
        Self {
            agent,
            collaborators,
            cache,
            config,
            counters: Counters::default(),
            created_at: Utc::now(),
        }
    }

    /// Execution counts since this harness was built
    #[must_use]
    pub fn stats(&self) -> AgentStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        AgentStats {
            agent: self.kind(),
            executions: load(&self.counters.executions),
            successes: load(&self.counters.successes),
            failures: load(&self.counters.failures),
            cache_hits: load(&self.counters.cache_hits),
            total_ms: load(&self.counters.total_ms),
            created_at: self.created_at,
        }
    }

    /// Kind of the wrapped agent
    #[inline]
    #[must_use]
    pub fn kind(&self) -> AgentKind {
        self.agent.kind()
    }

    /// The wrapped agent
    #[inline]
    #[must_use]
    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    /// Run `task` with its dependencies' outputs, keyed by task id
    ///
    /// # Errors
    /// The agent's error after retries are exhausted, or the input
    /// resolution error.
    pub async fn execute(
        &self,
        task: &Task,
        dependencies: BTreeMap<String, Value>,
    ) -> Result<HarnessOutput, AgentError> {
        let started = Instant::now();
        self.counters.executions.fetch_add(1, Ordering::Relaxed);
        let outcome = self.execute_once(task, dependencies, started).await;
        match &outcome {
            Ok(output) => {
                self.counters.successes.fetch_add(1, Ordering::Relaxed);
                if output.cache_hit {
                    self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                }
            }
            Err(_) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.counters.total_ms.fetch_add(elapsed, Ordering::Relaxed);
        outcome
    }

    async fn execute_once(
        &self,
        task: &Task,
        dependencies: BTreeMap<String, Value>,
        started: Instant,
    ) -> Result<HarnessOutput, AgentError> {
        let agent = self.kind();
        let input = self
            .with_retry(task, || self.resolve_input(task, &dependencies))
            .await?;

        if !(self.config.cache_results && self.agent.cacheable(task)) {
            let value = self.with_retry(task, || self.agent.run(task, &input)).await?;
            tracing::debug!(
                task_id = %task.id,
                %agent,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "task ran uncached"
            );
            return Ok(HarnessOutput {
                value,
                cache_hit: false,
            });
        }

        let key = CacheKey::derive(
            &format!("{agent}/{}", task.kind),
            &task.params,
            &input.fingerprint(),
        );
        let (value, cache_hit) = self
            .cache
            .get_or_compute(key, self.config.result_ttl(), || {
                self.with_retry(task, || self.agent.run(task, &input))
            })
            .await?;
        tracing::debug!(
            task_id = %task.id,
            %agent,
            cache_key = %key.short(),
            cache_hit,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "task ran"
        );
        Ok(HarnessOutput { value, cache_hit })
    }

    async fn resolve_input(
        &self,
        task: &Task,
        dependencies: &BTreeMap<String, Value>,
    ) -> Result<TaskInput, AgentError> {
        let primary = match &task.input {
            InputRef::Dataset(name) => Value::Table(self.collaborators.tabular.load(name).await?),
            InputRef::Document(name) => self.collaborators.documents.extract(name).await?.to_value(),
            InputRef::None => task
                .dependencies
                .iter()
                .find_map(|id| dependencies.get(id.as_str()))
                .cloned()
                .unwrap_or(Value::Null),
        };
        let mut references = BTreeMap::new();
        for name in self.agent.references(task) {
            if dependencies.contains_key(&name) {
                continue;
            }
            let table = self.collaborators.tabular.load(&name).await?;
            references.insert(name, Value::Table(table));
        }
        Ok(TaskInput {
            primary,
            dependencies: dependencies.clone(),
            references,
            source: task.input.clone(),
        })
    }

    /// Retry transient failures with exponential backoff
    async fn with_retry<T, F, Fut>(&self, task: &Task, mut op: F) -> Result<T, AgentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let mut attempt = 1;
        let mut delay = self.config.backoff();
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.config.max_attempts => {
                    tracing::warn!(
                        task_id = %task.id,
                        agent = %self.kind(),
                        attempt,
                        error = %err,
                        "retrying task"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl std::fmt::Debug for AgentHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHarness")
            .field("agent", &self.kind())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
