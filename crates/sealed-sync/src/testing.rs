//! Scripted provider executor for tests.
//!
//! [`ScriptedExecutor`] replaces the real CLI with canned responses keyed by
//! argument prefix, and records every call (arguments and environment) for
//! assertions. It is compiled into the library so integration tests and
//! downstream crates can drive the full stack without a provider binary.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{Result, SyncError};
use crate::provider::{CommandExecutor, CommandOutput};

/// One observed provider invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

enum Outcome {
    Respond(String),
    Fail(String),
}

struct Script {
    prefix: String,
    outcome: Outcome,
}

#[derive(Default)]
struct Inner {
    scripts: Mutex<Vec<Script>>,
    calls: Mutex<Vec<RecordedCall>>,
}

/// Executor whose responses are scripted per argument prefix. Cheap to
/// clone; clones share scripts and the call log.
#[derive(Clone, Default)]
pub struct ScriptedExecutor {
    inner: Arc<Inner>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Succeed with `text` for any command whose space-joined arguments
    /// start with `prefix`. Later scripts take precedence over earlier ones.
    pub fn respond_with(&self, prefix: &str, text: &str) {
        self.push(prefix, Outcome::Respond(text.to_string()));
    }

    /// Fail with a non-zero-exit error carrying `message` for any command
    /// whose space-joined arguments start with `prefix`.
    pub fn fail_with(&self, prefix: &str, message: &str) {
        self.push(prefix, Outcome::Fail(message.to_string()));
    }

    /// Every call observed so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner.calls.lock().unwrap().clone()
    }

    /// Space-joined argument lines of every call, for quick assertions.
    pub fn call_lines(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.args.join(" ")).collect()
    }

    fn push(&self, prefix: &str, outcome: Outcome) {
        self.inner.scripts.lock().unwrap().push(Script {
            prefix: prefix.to_string(),
            outcome,
        });
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn run(&self, args: &[String], env: &[(String, String)]) -> Result<CommandOutput> {
        self.inner.calls.lock().unwrap().push(RecordedCall {
            args: args.to_vec(),
            env: env.to_vec(),
        });

        let joined = args.join(" ");
        let scripts = self.inner.scripts.lock().unwrap();
        for script in scripts.iter().rev() {
            if joined.starts_with(&script.prefix) {
                return match &script.outcome {
                    Outcome::Respond(text) => Ok(CommandOutput { text: text.clone() }),
                    Outcome::Fail(message) => Err(SyncError::CommandFailed {
                        message: message.clone(),
                    }),
                };
            }
        }
        Err(SyncError::CommandFailed {
            message: format!("no script for: {joined}"),
        })
    }
}
