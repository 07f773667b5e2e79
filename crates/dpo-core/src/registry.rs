//! Task kind to agent routing

use dpo_agents::{
    Agent, AgentConfig, AgentError, AgentHarness, AgentKind, AgentStats, Collaborators, EtlAgent, ProfilingAgent,
    QueryAgent,
};
use dpo_cache::CacheManager;
use dpo_sandbox::{PolicyValidator, Sandbox};
use dpo_types::TaskKind;
use std::collections::HashMap;
use std::sync::Arc;

/// Agent responsible for each task kind
#[must_use]
pub const fn route(kind: TaskKind) -> AgentKind {
    match kind {
        TaskKind::Extract | TaskKind::Transform => AgentKind::Etl,
        TaskKind::Query | TaskKind::CustomCode => AgentKind::Query,
        TaskKind::Profile => AgentKind::Profiling,
    }
}

/// One harness per agent kind, built once and shared by every dispatch
pub struct AgentRegistry {
    collaborators: Collaborators,
    cache: CacheManager,
    config: AgentConfig,
    harnesses: HashMap<AgentKind, Arc<AgentHarness>>,
}

impl AgentRegistry {
    /// Registry with no agents
    #[must_use]
    pub fn new(collaborators: Collaborators, cache: CacheManager, config: AgentConfig) -> Self {
        Self {
            collaborators,
            cache,
            config,
            harnesses: HashMap::new(),
        }
    }

    /// Registry with the ETL, Query and Profiling agents
    #[must_use]
    pub fn standard(
        collaborators: Collaborators,
        cache: CacheManager,
        config: AgentConfig,
        validator: PolicyValidator,
        sandbox: Sandbox,
    ) -> Self {
        let etl = EtlAgent::new(Arc::clone(&collaborators.storage));
        let query = QueryAgent::new(Arc::clone(&collaborators.model), validator, sandbox);
        let profiling = ProfilingAgent::new(Arc::clone(&collaborators.tabular));
        Self::new(collaborators, cache, config)
            .with_agent(Arc::new(etl))
            .with_agent(Arc::new(query))
            .with_agent(Arc::new(profiling))
    }

    /// Install `agent`, replacing any agent of the same kind
    #[must_use]
    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        let kind = agent.kind();
        let harness = AgentHarness::new(agent, self.collaborators.clone(), self.cache.clone(), self.config.clone());
        self.harnesses.insert(kind, Arc::new(harness));
        self
    }

    /// Harness for `kind`
    ///
    /// # Errors
    /// [`AgentError::Unsupported`] when the routed agent is not installed or
    /// refuses the kind.
    pub fn resolve(&self, kind: TaskKind) -> Result<Arc<AgentHarness>, AgentError> {
        let agent = route(kind);
        match self.harnesses.get(&agent) {
            Some(harness) if harness.agent().supports(kind) => Ok(Arc::clone(harness)),
            _ => Err(AgentError::Unsupported { agent, kind }),
        }
    }

    /// Installed agent kinds, in declaration order
    #[must_use]
    pub fn kinds(&self) -> Vec<AgentKind> {
        AgentKind::ALL
            .into_iter()
            .filter(|k| self.harnesses.contains_key(k))
            .collect()
    }

    /// Execution statistics of every installed agent, in declaration order
    #[must_use]
    pub fn stats(&self) -> Vec<AgentStats> {
        AgentKind::ALL
            .into_iter()
            .filter_map(|k| self.harnesses.get(&k))
            .map(|h| h.stats())
            .collect()
    }

    /// Collaborators shared by every installed agent
    #[inline]
    #[must_use]
    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// Result cache shared by every installed agent
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.kinds())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
