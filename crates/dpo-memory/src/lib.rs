//! Session memory for DPO
//!
//! Keeps a bounded history of turns per session, free-form scratch state
//! (for example the dataset a conversation is working on) and a bounded
//! execution log. Never needed for the correctness of a single task; the
//! orchestrator reads it only for conversational continuity.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod error;
pub mod ring;
pub mod session;
pub mod store;

pub use config::MemoryConfig;
pub use error::MemoryError;
pub use ring::BoundedRing;
pub use session::{ExecutionRecord, RecordStatus, SessionContext, SessionSnapshot, Turn};
pub use store::{SessionStore, StoreSummary};
