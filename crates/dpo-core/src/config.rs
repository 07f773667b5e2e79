//! Workspace configuration
//!
//! Loaded from TOML, then overridden from `DPO_*` environment variables,
//! then validated. Every section has defaults, so an empty file is valid.

use crate::error::ConfigError;
use dpo_agents::collaborators::OllamaConfig;
use dpo_agents::AgentConfig;
use dpo_cache::CacheConfig;
use dpo_memory::MemoryConfig;
use dpo_sandbox::{PolicyConfig, SandboxConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Orchestrator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Tasks dispatched concurrently
    pub max_workers: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { max_workers: 4 }
    }
}

/// Which text-understanding collaborator to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelBackend {
    /// Rule-based templates, no external service
    #[default]
    Template,
    /// Ollama-compatible HTTP server
    Ollama,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub backend: ModelBackend,
    /// Plan workflows with the model, keywords otherwise
    pub plan_with_model: bool,
    pub ollama: OllamaConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: ModelBackend::Template,
            plan_with_model: true,
            ollama: OllamaConfig::default(),
        }
    }
}

/// Full configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DpoConfig {
    pub orchestrator: OrchestratorConfig,
    pub policy: PolicyConfig,
    pub sandbox: SandboxConfig,
    pub cache: CacheConfig,
    pub memory: MemoryConfig,
    pub agents: AgentConfig,
    pub model: ModelConfig,
}

impl DpoConfig {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a TOML file
    ///
    /// # Errors
    /// Unreadable or unparsable file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// File (when given), then environment, then validation
    ///
    /// # Errors
    /// Any load, override or validation failure.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        let config = config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DPO_*` overrides from the process environment
    ///
    /// # Errors
    /// A variable that does not parse.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from any variable lookup
    ///
    /// # Errors
    /// A variable that does not parse.
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        fn parse<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
            value.trim().parse().map_err(|_| ConfigError::Env { var, value })
        }

        if let Some(v) = lookup("DPO_MAX_WORKERS") {
            self.orchestrator.max_workers = parse("DPO_MAX_WORKERS", v)?;
        }
        if let Some(v) = lookup("DPO_CACHE_DIR") {
            self.cache.dir = (!v.trim().is_empty()).then(|| v.trim().into());
        }
        if let Some(v) = lookup("DPO_CACHE_TTL_SECONDS") {
            self.cache.default_ttl_secs = parse("DPO_CACHE_TTL_SECONDS", v)?;
        }
        if let Some(v) = lookup("DPO_MAX_HISTORY") {
            self.memory.max_history = parse("DPO_MAX_HISTORY", v)?;
        }
        if let Some(v) = lookup("DPO_MODEL_URL") {
            self.model.ollama.base_url = v.trim().to_string();
            self.model.backend = ModelBackend::Ollama;
        }
        if let Some(v) = lookup("DPO_MODEL_NAME") {
            self.model.ollama.model = v.trim().to_string();
        }
        if let Some(v) = lookup("DPO_SANDBOX_TIMEOUT_MS") {
            let ms: u64 = parse("DPO_SANDBOX_TIMEOUT_MS", v)?;
            self.sandbox = self.sandbox.with_timeout(Duration::from_millis(ms));
        }
        Ok(self)
    }

    /// # Errors
    /// The first out-of-range setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.orchestrator.max_workers == 0, "orchestrator.max_workers must be at least 1"),
            (self.memory.max_history == 0, "memory.max_history must be at least 1"),
            (self.cache.max_entries == 0, "cache.max_entries must be at least 1"),
            (self.cache.default_ttl_secs == 0, "cache.default_ttl_secs must be positive"),
            (self.sandbox.timeout_ms == 0, "sandbox.timeout_ms must be positive"),
            (self.sandbox.fuel == 0, "sandbox.fuel must be positive"),
            (self.agents.max_attempts == 0, "agents.max_attempts must be at least 1"),
            (self.policy.allowed_modules.is_empty(), "policy.allowed_modules must not be empty"),
            (
                self.model.backend == ModelBackend::Ollama && self.model.ollama.base_url.trim().is_empty(),
                "model.ollama.base_url is required for the ollama backend",
            ),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(ConfigError::Invalid((*message).to_string())),
            None => Ok(()),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.orchestrator.max_workers = workers;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_memory(mut self, memory: MemoryConfig) -> Self {
        self.memory = memory;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_agents(mut self, agents: AgentConfig) -> Self {
        self.agents = agents;
        self
    }

    /// TOML rendering of the effective configuration
    ///
    /// # Errors
    /// Serialization failure.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = DpoConfig::default();
        assert_eq!(config.orchestrator.max_workers, 4);
        assert_eq!(config.cache.default_ttl_secs, 3600);
        assert_eq!(config.memory.max_history, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dpo.toml");
        std::fs::write(
            &path,
            "[orchestrator]\nmax_workers = 8\n\n[model]\nbackend = \"ollama\"\n\n[model.ollama]\nmodel = \"mistral\"\n",
        )
        .unwrap();
        let config = DpoConfig::load(&path).unwrap();
        assert_eq!(config.orchestrator.max_workers, 8);
        assert_eq!(config.model.backend, ModelBackend::Ollama);
        assert_eq!(config.model.ollama.model, "mistral");
        assert_eq!(config.model.ollama.base_url, "http://localhost:11434");
        assert_eq!(config.memory.max_history, 100);
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DPO_MAX_WORKERS", "2"),
            ("DPO_CACHE_DIR", "/tmp/dpo-cache"),
            ("DPO_MODEL_URL", "http://models:11434"),
            ("DPO_SANDBOX_TIMEOUT_MS", "250"),
        ]);
        let config = DpoConfig::default()
            .apply_overrides(|k| env.get(k).map(|v| (*v).to_string()))
            .unwrap();
        assert_eq!(config.orchestrator.max_workers, 2);
        assert_eq!(config.cache.dir.as_deref(), Some(Path::new("/tmp/dpo-cache")));
        assert_eq!(config.model.backend, ModelBackend::Ollama);
        assert_eq!(config.sandbox.timeout_ms, 250);
    }

    #[test]
    fn bad_env_value_names_the_variable() {
        let err = DpoConfig::default()
            .apply_overrides(|k| (k == "DPO_MAX_HISTORY").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: "DPO_MAX_HISTORY", .. }));
    }

    #[test]
    fn validation_rejects_zero_workers() {
        let err = DpoConfig::default().with_max_workers(0).validate().unwrap_err();
        assert!(err.to_string().contains("max_workers"));
    }

    #[test]
    fn toml_round_trip() {
        let config = DpoConfig::default().with_max_workers(3);
        let text = config.to_toml().unwrap();
        let back: DpoConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
