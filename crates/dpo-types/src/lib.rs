//! Shared data model for DPO
//!
//! Every other crate in the workspace speaks in these types:
//! - [`Task`] / [`TaskResult`]: a unit of work and its immutable outcome
//! - [`Workflow`] / [`WorkflowResult`]: an ordered task collection and its aggregate
//! - [`Value`] / [`Table`]: data handed between tasks
//! - [`ContentHash`]: content fingerprints for caching

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod hash;
pub mod table;
pub mod task;
pub mod value;
pub mod workflow;

pub use hash::{ContentHash, HashError};
pub use table::{Aggregation, ColumnSchema, CompareOp, DataType, JoinKind, Table, TableError};
pub use task::{
    ErrorClass, InputRef, Task, TaskError, TaskId, TaskKind, TaskResult, TaskStatus, UnknownTaskKind,
};
pub use value::{Params, Scalar, Value};
pub use workflow::{PlannedStep, SessionId, Workflow, WorkflowId, WorkflowResult, WorkflowStatus};
