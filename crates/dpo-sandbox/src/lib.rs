//! Policy-checked execution of analysis snippets
//!
//! Snippets are written in a small expression language with no loops, no
//! user-defined functions and no ambient authority: the only capabilities
//! are the allow-listed `table`, `stats`, `math` and `text` modules.
//!
//! ```text
//! CodeSnippet --PolicyValidator::validate--> ValidatedSnippet --Sandbox::execute--> Value
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod ast;
pub mod builtins;
pub mod config;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod policy;
pub mod sandbox;
pub mod snippet;

pub use config::{PolicyConfig, SandboxConfig};
pub use error::{PolicyViolation, SandboxError};
pub use policy::{PolicyValidator, ValidatedSnippet, ValidationOutcome};
pub use sandbox::{Bindings, Sandbox};
pub use snippet::CodeSnippet;
