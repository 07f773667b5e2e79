//! Execution sandbox
//!
//! Runs a [`ValidatedSnippet`] on a blocking worker with a fresh scope, a
//! fuel budget, a wall-clock timeout and a bound on the size of every value
//! it builds. A timed-out call returns only after its worker has stopped. The
//! sandbox performs no policy checks of its own: the type of its input is
//! the proof that validation already happened.

use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::interpreter::{Budget, Interpreter, RuntimeError};
use crate::policy::ValidatedSnippet;
use dpo_types::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Named values visible to a snippet
pub type Bindings = BTreeMap<String, Value>;

/// Snippet executor
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    config: SandboxConfig,
    active: Arc<AtomicUsize>,
}

/// Decrements the active-worker count when the worker ends, including by panic
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Sandbox {
    /// Sandbox enforcing `config`
    #[inline]
    #[must_use]
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Active limits
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Workers currently running
    #[inline]
    #[must_use]
    pub fn active_executions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Execute a validated snippet with the given bindings
    ///
    /// # Errors
    /// - [`SandboxError::Timeout`] when the wall-clock limit is reached
    /// - [`SandboxError::OutputTooLarge`] when the result exceeds the bound
    /// - [`SandboxError::Execution`] for runtime faults, fuel exhaustion and
    ///   interpreter panics
    pub async fn execute(&self, snippet: &ValidatedSnippet, bindings: Bindings) -> Result<Value, SandboxError> {
        let started = Instant::now();
        let program = snippet.program();
        let fuel = self.config.fuel;
        let max_output = self.config.max_output_bytes;
        let cancel = Arc::new(AtomicBool::new(false));
        let worker_cancel = Arc::clone(&cancel);
        let guard = ActiveGuard::enter(&self.active);

        let mut handle = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let budget = Budget::new(fuel, &worker_cancel).with_max_value_bytes(max_output);
            let value = Interpreter::new(bindings, budget).run(&program)?;
            let size = serde_json::to_vec(&value)
                .map(|bytes| bytes.len())
                .map_err(|_| RuntimeError::fault("result cannot be serialized"))?;
            Ok::<_, RuntimeError>((value, size.min(max_output.saturating_add(1))))
        });

        let joined = match tokio::time::timeout(self.config.timeout(), &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                cancel.store(true, Ordering::SeqCst);
                if tokio::time::timeout(self.config.teardown_grace(), &mut handle).await.is_err() {
                    tracing::warn!(
                        snippet = %snippet.fingerprint().short(),
                        "sandbox worker did not stop within teardown grace"
                    );
                    // the worker polls the cancel flag on every charge, so this ends
                    let _ = handle.await;
                }
                let elapsed_ms = elapsed_ms(started);
                tracing::warn!(snippet = %snippet.fingerprint().short(), elapsed_ms, "snippet timed out");
                return Err(SandboxError::Timeout { elapsed_ms });
            }
        };

        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(err) => {
                if err.is_panic() {
                    tracing::error!(snippet = %snippet.fingerprint().short(), "sandbox worker panicked");
                }
                return Err(SandboxError::execution("snippet execution aborted"));
            }
        };

        match outcome {
            Ok((value, size)) => {
                if size > max_output {
                    return Err(SandboxError::OutputTooLarge {
                        size,
                        limit: max_output,
                    });
                }
                tracing::debug!(
                    snippet = %snippet.fingerprint().short(),
                    elapsed_ms = elapsed_ms(started),
                    output = value.type_name(),
                    "snippet executed"
                );
                Ok(value)
            }
            Err(RuntimeError::Fault(message)) => Err(SandboxError::Execution { message }),
            Err(RuntimeError::FuelExhausted(limit)) => {
                Err(SandboxError::execution(format!("step limit of {limit} exceeded")))
            }
            Err(RuntimeError::Cancelled) => Err(SandboxError::Timeout {
                elapsed_ms: elapsed_ms(started),
            }),
            Err(RuntimeError::OutputTooLarge { size, limit }) => Err(SandboxError::OutputTooLarge { size, limit }),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyValidator;
    use crate::snippet::CodeSnippet;
    use dpo_types::{Scalar, Table};

    fn validated(src: &str) -> ValidatedSnippet {
        PolicyValidator::default().validate(&CodeSnippet::new(src)).unwrap()
    }

    fn sales() -> Value {
        Value::Table(
            Table::from_rows(
                ["region", "sales"],
                vec![
                    vec!["West".into(), Scalar::Int(100)],
                    vec!["East".into(), Scalar::Int(50)],
                    vec!["West".into(), Scalar::Int(25)],
                ],
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn executes_with_bindings() {
        let sandbox = Sandbox::default();
        let snippet = validated(
            "import table\nlet g = table.aggregate(df, \"region\", \"sales\", \"sum\")\ntable.cell(g, 0, \"sum_sales\")",
        );
        let bindings = Bindings::from([("df".to_string(), sales())]);
        assert_eq!(sandbox.execute(&snippet, bindings).await.unwrap(), Value::Float(125.0));
        assert_eq!(sandbox.active_executions(), 0);
    }

    #[tokio::test]
    async fn runtime_fault_is_execution_error() {
        let sandbox = Sandbox::default();
        let err = sandbox.execute(&validated("1 / 0"), Bindings::new()).await.unwrap_err();
        assert!(matches!(err, SandboxError::Execution { ref message } if message.contains("division by zero")));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn scope_is_fresh_per_call() {
        let sandbox = Sandbox::default();
        sandbox.execute(&validated("let leaked = 1"), Bindings::new()).await.unwrap();
        let err = sandbox.execute(&validated("leaked"), Bindings::new()).await.unwrap_err();
        assert!(matches!(err, SandboxError::Execution { .. }));
    }

    #[tokio::test]
    async fn output_bound() {
        let sandbox = Sandbox::new(SandboxConfig::default().with_max_output_bytes(16));
        let err = sandbox
            .execute(&validated("text.concat(\"aaaaaaaaaa\", \"bbbbbbbbbb\")"), Bindings::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::OutputTooLarge { limit: 16, .. }));
        assert_eq!(err.class(), dpo_types::ErrorClass::Execution);
    }

    #[tokio::test]
    async fn fuel_exhaustion() {
        let sandbox = Sandbox::new(SandboxConfig::default().with_fuel(5));
        let err = sandbox
            .execute(&validated("1 + 2 + 3 + 4 + 5 + 6"), Bindings::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Execution { ref message } if message.contains("step limit")));
    }
}
