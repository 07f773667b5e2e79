//! Capability-specific task handlers
//!
//! | Agent | Task kinds | Uses |
//! |---|---|---|
//! | [`EtlAgent`] | extract, transform | tabular data, structured storage |
//! | [`QueryAgent`] | query, custom-code | text understanding, policy validator, sandbox |
//! | [`ProfilingAgent`] | profile | tabular data |
//!
//! Every agent runs behind an [`AgentHarness`], which resolves the task's
//! input, consults the cache and retries transient failures.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod agent;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod etl;
pub mod harness;
pub mod profiling;
pub mod query;

pub use agent::{Agent, AgentKind, TaskInput};
pub use collaborators::{CollaboratorError, Collaborators};
pub use config::AgentConfig;
pub use error::AgentError;
pub use etl::{EtlAgent, TransformOp};
pub use harness::{AgentHarness, AgentStats, HarnessOutput};
pub use profiling::{ColumnProfile, ProfileReport, ProfilingAgent};
pub use query::QueryAgent;
