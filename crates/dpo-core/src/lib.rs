//! DPO Core - workflow orchestration
//!
//! Plans a natural-language request into a [`Workflow`](dpo_types::Workflow)
//! of typed tasks, runs it through a bounded worker pool and routes every task
//! to the agent its kind maps to.
//!
//! # Example
//!
//! ```rust,ignore
//! use dpo_core::{DpoConfig, Orchestrator};
//! use dpo_agents::Collaborators;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = Orchestrator::from_config(DpoConfig::default(), Collaborators::in_memory())?;
//! let result = orchestrator
//!     .handle_request(&"session-1".into(), "load sales then profile it")
//!     .await?;
//! println!("{}", result.status);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod planner;
pub mod registry;
pub mod telemetry;

pub use config::{DpoConfig, ModelBackend, ModelConfig, OrchestratorConfig};
pub use error::{ConfigError, GraphError, OrchestratorError, PlanningError};
pub use graph::TaskGraph;
pub use orchestrator::{Orchestrator, OrchestratorBuilder, CANCELLED_NOTE};
pub use planner::{KeywordPlanner, ModelPlanner, Planner, ACTIVE_DATASET};
pub use registry::{route, AgentRegistry};
pub use telemetry::LogFormat;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
