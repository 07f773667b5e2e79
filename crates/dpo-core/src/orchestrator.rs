//! The Orchestrator
//!
//! Owns workflows from planning to aggregation:
//! - plans request text into a validated [`Workflow`]
//! - runs each task once its own dependencies have finished, through a
//!   bounded worker pool
//! - dispatches each task to the agent its kind routes to
//! - records requests and outcomes in the session store

use crate::config::{DpoConfig, ModelBackend};
use crate::error::{ConfigError, OrchestratorError, PlanningError};
use crate::graph::TaskGraph;
use crate::planner::{KeywordPlanner, ModelPlanner, Planner, ACTIVE_DATASET};
use crate::registry::AgentRegistry;
use dpo_agents::collaborators::OllamaModel;
use dpo_agents::{Agent, AgentStats, Collaborators};
use dpo_cache::CacheManager;
use dpo_memory::{ExecutionRecord, RecordStatus, SessionContext, SessionStore, Turn};
use dpo_sandbox::{PolicyValidator, Sandbox};
use dpo_types::{
    ErrorClass, InputRef, Params, PlannedStep, Scalar, SessionId, Task, TaskError, TaskId, TaskKind, TaskResult, TaskStatus,
    Value, Workflow, WorkflowResult, WorkflowStatus,
};
use futures::FutureExt;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Skip note for tasks abandoned by cancellation
pub const CANCELLED_NOTE: &str = "cancelled";

/// Id of the task planned from step `index`
#[inline]
#[must_use]
pub fn step_id(index: usize) -> TaskId {
    TaskId::new(format!("t{}", index + 1))
}

/// Turn planned steps into a workflow, assigning ids `t1..tn`
///
/// # Errors
/// A step depending on one that does not precede it.
pub fn workflow_from_steps(
    session_id: SessionId,
    request: &str,
    steps: Vec<PlannedStep>,
) -> Result<Workflow, PlanningError> {
    let mut workflow = Workflow::new(session_id, request);
    for (i, step) in steps.into_iter().enumerate() {
        let mut task = Task::new(step_id(i), step.kind)
            .with_input(step.input)
            .with_params(step.params)
            .optional(step.optional);
        for dependency in step.depends_on {
            if dependency >= i {
                return Err(PlanningError::BadStepReference { step: i, dependency });
            }
            task = task.depends_on(step_id(dependency));
        }
        workflow.push(task);
    }
    Ok(workflow)
}

/// Central coordinator; cheap to share behind an `Arc`
pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    planner: Arc<dyn Planner>,
    memory: Arc<SessionStore>,
    max_workers: usize,
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    config: DpoConfig,
    collaborators: Collaborators,
    planner: Option<Arc<dyn Planner>>,
    memory: Option<Arc<SessionStore>>,
    cache: Option<CacheManager>,
    agents: Vec<Arc<dyn Agent>>,
}

impl OrchestratorBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: DpoConfig::default(),
            collaborators: Collaborators::in_memory(),
            planner: None,
            memory: None,
            cache: None,
            agents: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_config(mut self, config: DpoConfig) -> Self {
        self.config = config;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = collaborators;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Share an existing session store
    #[inline]
    #[must_use]
    pub fn with_memory(mut self, memory: Arc<SessionStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Share an existing cache
    #[inline]
    #[must_use]
    pub fn with_cache(mut self, cache: CacheManager) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replace the standard agent of the same kind
    #[inline]
    #[must_use]
    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.push(agent);
        self
    }

    /// # Errors
    /// Invalid configuration or an unusable model backend.
    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        let config = self.config;
        config.validate()?;

        let mut collaborators = self.collaborators;
        if config.model.backend == ModelBackend::Ollama {
            let model = OllamaModel::new(config.model.ollama.clone())
                .map_err(|e| ConfigError::Invalid(format!("model backend: {e}")))?;
            collaborators = collaborators.with_model(Arc::new(model));
        }

        let planner: Arc<dyn Planner> = match self.planner {
            Some(planner) => planner,
            None if config.model.backend == ModelBackend::Ollama && config.model.plan_with_model => {
                Arc::new(ModelPlanner::new(Arc::clone(&collaborators.model)))
            }
            None => Arc::new(KeywordPlanner),
        };

        let cache = self
            .cache
            .unwrap_or_else(|| CacheManager::from_config(&config.cache));
        let memory = self
            .memory
            .unwrap_or_else(|| Arc::new(SessionStore::new(config.memory.clone())));

        let mut registry = AgentRegistry::standard(
            collaborators,
            cache,
            config.agents.clone(),
            PolicyValidator::new(config.policy.clone()),
            Sandbox::new(config.sandbox.clone()),
        );
        for agent in self.agents {
            registry = registry.with_agent(agent);
        }

        tracing::info!(
            planner = planner.name(),
            agents = ?registry.kinds(),
            max_workers = config.orchestrator.max_workers,
            "orchestrator ready"
        );
        Ok(Orchestrator {
            registry: Arc::new(registry),
            planner,
            memory,
            max_workers: config.orchestrator.max_workers,
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    #[inline]
    #[must_use]
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    /// Orchestrator over `collaborators`, everything else from `config`
    ///
    /// # Errors
    /// See [`OrchestratorBuilder::build`].
    pub fn from_config(config: DpoConfig, collaborators: Collaborators) -> Result<Self, OrchestratorError> {
        Self::builder()
            .with_config(config)
            .with_collaborators(collaborators)
            .build()
    }

    #[inline]
    #[must_use]
    pub fn memory(&self) -> &Arc<SessionStore> {
        &self.memory
    }

    #[inline]
    #[must_use]
    pub fn cache(&self) -> &CacheManager {
        self.registry.cache()
    }

    #[inline]
    #[must_use]
    pub fn collaborators(&self) -> &Collaborators {
        self.registry.collaborators()
    }

    #[inline]
    #[must_use]
    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Per-agent execution statistics since this orchestrator was built
    #[must_use]
    pub fn agent_stats(&self) -> Vec<AgentStats> {
        self.registry.stats()
    }

    /// Plan `request` into a validated workflow
    ///
    /// When the planner finds no task, the whole request becomes one
    /// custom-code task answered by the Query agent.
    ///
    /// # Errors
    /// Blank request, planner failure other than "nothing inferred", or a
    /// structurally invalid plan.
    #[tracing::instrument(skip(self, context), fields(session_id = %context.session_id, planner = self.planner.name()))]
    pub async fn plan(&self, request: &str, context: &SessionContext) -> Result<Workflow, OrchestratorError> {
        let request = request.trim();
        if request.is_empty() {
            return Err(PlanningError::EmptyRequest.into());
        }
        let datasets = self.collaborators().tabular.datasets();
        let steps = match self.planner.plan(request, context, &datasets).await {
            Ok(steps) => steps,
            Err(PlanningError::NoTaskInferred(_)) => {
                tracing::info!("no task inferred, answering as custom code");
                let input = context
                    .scratch_str(ACTIVE_DATASET)
                    .map_or(InputRef::None, |name| InputRef::Dataset(name.to_string()));
                vec![PlannedStep::new(TaskKind::CustomCode)
                    .with_input(input)
                    .with_params(Params::from([("question".to_string(), Scalar::from(request))]))]
            }
            Err(err) => return Err(err.into()),
        };

        let workflow = workflow_from_steps(context.session_id.clone(), request, steps)?;
        TaskGraph::build(&workflow)?;
        tracing::info!(correlation_id = %workflow.id, tasks = workflow.len(), "workflow planned");
        Ok(workflow)
    }

    /// Run `workflow` to completion
    ///
    /// # Errors
    /// [`OrchestratorError::InvalidWorkflow`] before anything runs. Task
    /// failures are reported in the result, never as errors.
    pub async fn run(&self, workflow: &Workflow) -> Result<WorkflowResult, OrchestratorError> {
        self.run_with_cancel(workflow, CancellationToken::new()).await
    }

    /// Run `workflow`, abandoning undispatched tasks once `cancel` fires
    ///
    /// Tasks already dispatched run to completion; the rest are skipped with
    /// the note [`CANCELLED_NOTE`].
    ///
    /// # Errors
    /// See [`Orchestrator::run`].
    #[tracing::instrument(skip_all, fields(correlation_id = %workflow.id, session_id = %workflow.session_id))]
    pub async fn run_with_cancel(
        &self,
        workflow: &Workflow,
        cancel: CancellationToken,
    ) -> Result<WorkflowResult, OrchestratorError> {
        let started = Instant::now();
        let graph = TaskGraph::build(workflow)?;
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut results: Vec<Option<TaskResult>> = vec![None; workflow.len()];
        let mut waiting_on = graph.in_degrees();
        let mut ready: BTreeSet<usize> = (0..workflow.len()).filter(|&n| waiting_on[n] == 0).collect();
        let mut running = JoinSet::new();

        loop {
            // lowest position first, so ready tasks start in workflow order
            while let Some(node) = ready.pop_first() {
                let task = &workflow.tasks[node];
                if cancel.is_cancelled() {
                    results[node] = Some(TaskResult::skipped(task.id.clone(), CANCELLED_NOTE));
                    release(&graph, &mut waiting_on, &mut ready, node);
                    continue;
                }
                let blocked = graph
                    .dependencies(node)
                    .find(|&d| !results[d].as_ref().is_some_and(TaskResult::is_success));
                if let Some(dep) = blocked {
                    let note = format!("dependency {} did not succeed", workflow.tasks[dep].id);
                    tracing::info!(task_id = %task.id, %note, "task skipped");
                    results[node] = Some(TaskResult::skipped(task.id.clone(), note));
                    release(&graph, &mut waiting_on, &mut ready, node);
                    continue;
                }

                let inputs: BTreeMap<String, Value> = graph
                    .dependencies(node)
                    .filter_map(|d| {
                        let output = results[d].as_ref().and_then(TaskResult::output)?;
                        Some((workflow.tasks[d].id.to_string(), output.clone()))
                    })
                    .collect();

                let permit = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
                };
                let Some(permit) = permit else {
                    results[node] = Some(TaskResult::skipped(task.id.clone(), CANCELLED_NOTE));
                    release(&graph, &mut waiting_on, &mut ready, node);
                    continue;
                };

                tracing::debug!(task_id = %task.id, kind = %task.kind, depth = graph.depth(node), "task dispatched");
                let registry = Arc::clone(&self.registry);
                let task = task.clone();
                running.spawn(async move {
                    let result = dispatch_with(&registry, &task, inputs).await;
                    drop(permit);
                    (node, result)
                });
            }

            let Some(joined) = running.join_next().await else {
                break;
            };
            match joined {
                Ok((node, result)) => {
                    results[node] = Some(result);
                    release(&graph, &mut waiting_on, &mut ready, node);
                }
                Err(err) => tracing::error!(error = %err, "task worker did not finish"),
            }
        }

        let results: Vec<TaskResult> = results
            .into_iter()
            .zip(&workflow.tasks)
            .map(|(result, task)| {
                result.unwrap_or_else(|| {
                    let error = TaskError::new(ErrorClass::Execution, "task worker did not finish");
                    TaskResult::failed(task.id.clone(), error, std::time::Duration::ZERO)
                })
            })
            .collect();
        let status = overall_status(workflow, &results);
        let duration = started.elapsed();
        tracing::info!(
            %status,
            tasks = results.len(),
            failed = results.iter().filter(|r| r.status() == TaskStatus::Failed).count(),
            elapsed_ms = duration.as_millis() as u64,
            "workflow finished"
        );
        Ok(WorkflowResult {
            workflow_id: workflow.id,
            session_id: workflow.session_id.clone(),
            status,
            results,
            duration,
        })
    }

    /// Run one task on the agent its kind routes to
    ///
    /// Never fails: routing errors, agent errors and agent panics all come
    /// back as a failed [`TaskResult`].
    pub async fn dispatch(&self, task: &Task, inputs: BTreeMap<String, Value>) -> TaskResult {
        dispatch_with(&self.registry, task, inputs).await
    }

    /// Plan and run `request` for a session, recording it in memory
    ///
    /// # Errors
    /// Planning and workflow validation errors. The failure is logged to
    /// the session before it is returned.
    #[tracing::instrument(skip_all, fields(session_id = %session_id))]
    pub async fn handle_request(
        &self,
        session_id: &SessionId,
        request: &str,
    ) -> Result<WorkflowResult, OrchestratorError> {
        let context = self.memory.get_context(session_id);
        let outcome = match self.plan(request, &context).await {
            Ok(workflow) => self.run(&workflow).await.map(|result| (workflow, result)),
            Err(err) => Err(err),
        };
        let (workflow, result) = match outcome {
            Ok(pair) => pair,
            Err(err) => {
                self.memory.log_execution(
                    session_id,
                    ExecutionRecord::new("plan", RecordStatus::Error).with_details(serde_json::json!({
                        "request": request,
                        "error": err.to_string(),
                    })),
                );
                return Err(err);
            }
        };

        self.memory.record(session_id, Turn::new(request, summarize(&result)));
        let status = match result.status {
            WorkflowStatus::Succeeded => RecordStatus::Success,
            WorkflowStatus::Cancelled => RecordStatus::Warning,
            WorkflowStatus::Failed if result.succeeded().next().is_some() => RecordStatus::Warning,
            WorkflowStatus::Failed => RecordStatus::Error,
        };
        self.memory.log_execution(
            session_id,
            ExecutionRecord::new("workflow", status).with_details(serde_json::json!({
                "correlation_id": workflow.id.to_string(),
                "tasks": workflow.len(),
                "failed": result.failed().count(),
                "skipped": result.skipped().count(),
                "duration_ms": result.duration.as_millis() as u64,
            })),
        );
        let dataset = workflow.tasks.iter().rev().find_map(|t| match &t.input {
            InputRef::Dataset(name) => Some(name.clone()),
            _ => None,
        });
        if let Some(name) = dataset {
            self.memory.set_scratch(session_id, ACTIVE_DATASET, serde_json::Value::String(name));
        }
        self.memory.set_scratch(
            session_id,
            "last_workflow",
            serde_json::Value::String(workflow.id.to_string()),
        );
        Ok(result)
    }

    /// Persist `result` under `key` in structured storage
    ///
    /// # Errors
    /// [`OrchestratorError::Storage`] when the write fails.
    pub async fn export(&self, result: &WorkflowResult, key: &str) -> Result<(), OrchestratorError> {
        self.collaborators()
            .storage
            .put(key, &result_value(result))
            .await?;
        tracing::info!(correlation_id = %result.workflow_id, key, "workflow result exported");
        Ok(())
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("planner", &self.planner.name())
            .field("registry", &self.registry)
            .field("max_workers", &self.max_workers)
            .finish_non_exhaustive()
    }
}

async fn dispatch_with(registry: &AgentRegistry, task: &Task, inputs: BTreeMap<String, Value>) -> TaskResult {
    let started = Instant::now();
    let harness = match registry.resolve(task.kind) {
        Ok(harness) => harness,
        Err(err) => {
            tracing::warn!(task_id = %task.id, kind = %task.kind, error = %err, "no agent for task");
            return TaskResult::failed(task.id.clone(), err.to_task_error(), started.elapsed());
        }
    };

    match AssertUnwindSafe(harness.execute(task, inputs)).catch_unwind().await {
        Ok(Ok(output)) => {
            tracing::debug!(task_id = %task.id, agent = %harness.kind(), cache_hit = output.cache_hit, "task succeeded");
            TaskResult::success(task.id.clone(), output.value, started.elapsed(), output.cache_hit)
        }
        Ok(Err(err)) => {
            tracing::warn!(task_id = %task.id, agent = %harness.kind(), error = %err, "task failed");
            TaskResult::failed(task.id.clone(), err.to_task_error(), started.elapsed())
        }
        Err(_) => {
            tracing::error!(task_id = %task.id, agent = %harness.kind(), "agent panicked");
            let error = TaskError::new(ErrorClass::Execution, format!("{} agent panicked", harness.kind()));
            TaskResult::failed(task.id.clone(), error, started.elapsed())
        }
    }
}

/// Mark `node` as settled; dependents with nothing left to wait for
/// become ready
fn release(graph: &TaskGraph, waiting_on: &mut [usize], ready: &mut BTreeSet<usize>, node: usize) {
    for next in graph.dependents(node) {
        waiting_on[next] = waiting_on[next].saturating_sub(1);
        if waiting_on[next] == 0 {
            ready.insert(next);
        }
    }
}

fn overall_status(workflow: &Workflow, results: &[TaskResult]) -> WorkflowStatus {
    if results.iter().any(|r| r.note() == Some(CANCELLED_NOTE)) {
        return WorkflowStatus::Cancelled;
    }
    let mandatory_failure = workflow
        .tasks
        .iter()
        .zip(results)
        .any(|(task, result)| !task.optional && !result.is_success());
    if mandatory_failure {
        WorkflowStatus::Failed
    } else {
        WorkflowStatus::Succeeded
    }
}

/// One-line description of a run, kept as the turn's response summary
fn summarize(result: &WorkflowResult) -> String {
    let answer = result
        .final_output()
        .map_or_else(|| "no output".to_string(), Value::summary);
    format!(
        "{} ({}/{} tasks succeeded): {answer}",
        result.status,
        result.succeeded().count(),
        result.results.len()
    )
}

fn result_value(result: &WorkflowResult) -> Value {
    let tasks = result
        .results
        .iter()
        .map(|r| {
            let mut entry = BTreeMap::from([
                ("task_id".to_string(), Value::Str(r.task_id().to_string())),
                ("status".to_string(), Value::Str(r.status().to_string())),
                ("duration_ms".to_string(), Value::Int(r.duration().as_millis() as i64)),
                ("cache_hit".to_string(), Value::Bool(r.cache_hit())),
            ]);
            if let Some(output) = r.output() {
                entry.insert("output".to_string(), output.clone());
            }
            if let Some(error) = r.error() {
                entry.insert("error".to_string(), Value::Str(error.to_string()));
            }
            if let Some(note) = r.note() {
                entry.insert("note".to_string(), Value::Str(note.to_string()));
            }
            Value::Map(entry)
        })
        .collect();
    Value::Map(BTreeMap::from([
        ("correlation_id".to_string(), Value::Str(result.workflow_id.to_string())),
        ("session_id".to_string(), Value::Str(result.session_id.to_string())),
        ("status".to_string(), Value::Str(result.status.to_string())),
        ("duration_ms".to_string(), Value::Int(result.duration.as_millis() as i64)),
        ("results".to_string(), Value::List(tasks)),
    ]))
}
