//! Build/test validation gate
//!
//! A validation runner holds an ordered list of candidate commands (build,
//! test, lint). The engine tries each in turn and treats the first that
//! succeeds as the validation result; if none succeed, validation fails
//! with the last observed error.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Outcome of one validation pass
#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    pub success: bool,
    /// Command that produced this outcome
    pub command: String,
    pub output: String,
    pub error: Option<String>,
}

impl ValidationOutcome {
    pub fn passed(command: &str, output: &str) -> Self {
        Self {
            success: true,
            command: command.to_string(),
            output: output.to_string(),
            error: None,
        }
    }

    pub fn failed(command: &str, error: &str) -> Self {
        Self {
            success: false,
            command: command.to_string(),
            output: String::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Trait for the build/validation collaborator
#[async_trait]
pub trait ValidationRunner: Send + Sync {
    async fn run(&self, project_path: &Path) -> Result<ValidationOutcome>;
}

/// Runs configured shell commands in order; first success wins
pub struct CommandValidationRunner {
    commands: Vec<String>,
}

impl CommandValidationRunner {
    pub fn new(commands: Vec<String>) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl ValidationRunner for CommandValidationRunner {
    async fn run(&self, project_path: &Path) -> Result<ValidationOutcome> {
        if self.commands.is_empty() {
            return Err(anyhow::anyhow!("no validation commands configured"));
        }

        let mut last_failure: Option<ValidationOutcome> = None;

        for command in &self.commands {
            debug!(command, "running validation candidate");
            let parts = shell_words::split(command)
                .map_err(|e| anyhow::anyhow!("invalid validation command '{}': {}", command, e))?;
            let Some((program, args)) = parts.split_first() else {
                continue;
            };

            let output = tokio::process::Command::new(program)
                .args(args)
                .current_dir(project_path)
                .output()
                .await;

            match output {
                Ok(out) if out.status.success() => {
                    return Ok(ValidationOutcome::passed(
                        command,
                        &String::from_utf8_lossy(&out.stdout),
                    ));
                }
                Ok(out) => {
                    let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
                    let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
                    let detail = if stderr.is_empty() { stdout } else { stderr };
                    warn!(command, "validation candidate failed");
                    last_failure = Some(ValidationOutcome::failed(command, &detail));
                }
                Err(e) => {
                    warn!(command, error = %e, "validation candidate could not run");
                    last_failure = Some(ValidationOutcome::failed(command, &e.to_string()));
                }
            }
        }

        last_failure.ok_or_else(|| anyhow::anyhow!("no runnable validation command configured"))
    }
}

/// Scripted mock runner for tests
pub struct MockValidationRunner {
    outcomes: Arc<Mutex<VecDeque<ValidationOutcome>>>,
    run_count: Arc<Mutex<u32>>,
}

impl MockValidationRunner {
    pub fn new() -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(VecDeque::new())),
            run_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Convenience: a runner that always passes
    pub fn always_passing() -> Self {
        Self::new()
    }

    pub async fn queue(&self, outcome: ValidationOutcome) {
        self.outcomes.lock().await.push_back(outcome);
    }

    pub async fn queue_failures(&self, n: usize) {
        for i in 0..n {
            self.queue(ValidationOutcome::failed(
                "mock-build",
                &format!("compile error #{}", i + 1),
            ))
            .await;
        }
    }

    pub async fn runs(&self) -> u32 {
        *self.run_count.lock().await
    }
}

impl Default for MockValidationRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ValidationRunner for MockValidationRunner {
    async fn run(&self, _project_path: &Path) -> Result<ValidationOutcome> {
        *self.run_count.lock().await += 1;
        Ok(self
            .outcomes
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| ValidationOutcome::passed("mock-build", "ok")))
    }
}
