//! Retry-with-feedback validation loop
//!
//! The central retry policy of the engine: apply a change, validate it, and
//! on failure feed the error back into the next attempt, bounded by an
//! attempt budget. The loop is a pure control-flow primitive over two
//! injected capabilities; it knows nothing about AI edits or build systems.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::future::Future;
use tracing::{debug, info, warn};

use crate::abstractions::ValidationOutcome;
use crate::error::{Result, WorkflowError};

/// Capability that applies a change, optionally guided by feedback from the
/// previous failed attempt
#[async_trait]
pub trait ChangeApplier: Send {
    /// Returns the responder's output, when the channel produces one
    async fn apply(&mut self, feedback: Option<&str>) -> anyhow::Result<Option<String>>;
}

/// Capability that checks whether the change holds up
#[async_trait]
pub trait ChangeValidator: Send {
    async fn validate(&mut self) -> anyhow::Result<ValidationOutcome>;
}

/// One attempt's audit record
#[derive(Debug, Clone, Serialize)]
pub struct RetryAttempt {
    pub attempt_number: u32,
    pub build_result: ValidationOutcome,
    pub ai_response: Option<String>,
}

/// Final outcome of the loop
#[derive(Debug, Clone, Serialize)]
pub struct RetryOutcome {
    pub success: bool,
    pub attempts: Vec<RetryAttempt>,
}

impl RetryOutcome {
    /// Error detail from the last failed attempt, if any
    pub fn last_error(&self) -> Option<&str> {
        self.attempts
            .iter()
            .rev()
            .find(|a| !a.build_result.success)
            .and_then(|a| a.build_result.error.as_deref())
    }
}

#[derive(Debug)]
pub struct RetryValidationLoop {
    max_attempts: u32,
}

impl RetryValidationLoop {
    /// A zero attempt budget is invalid input, not an empty loop.
    pub fn new(max_attempts: u32) -> Result<Self> {
        if max_attempts == 0 {
            return Err(WorkflowError::precondition(
                "retry loop requires max_attempts >= 1",
            ));
        }
        Ok(Self { max_attempts })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Drive apply → validate → feed-back until success or the budget is
    /// exhausted. Once the bound is reached, `apply` is not invoked again.
    pub async fn run<A, V, F>(
        &self,
        applier: &mut A,
        validator: &mut V,
        build_feedback: F,
    ) -> Result<RetryOutcome>
    where
        A: ChangeApplier,
        V: ChangeValidator,
        F: Fn(&ValidationOutcome) -> String + Send + Sync,
    {
        let mut attempts = Vec::new();
        let mut feedback: Option<String> = None;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            info!(attempt, max = self.max_attempts, "retry loop attempt");

            let ai_response = applier
                .apply(feedback.as_deref())
                .await
                .map_err(|e| WorkflowError::Validation(e.to_string()))?;

            let build_result = validator
                .validate()
                .await
                .map_err(|e| WorkflowError::Validation(e.to_string()))?;

            let succeeded = build_result.success;
            attempts.push(RetryAttempt {
                attempt_number: attempt,
                build_result: build_result.clone(),
                ai_response,
            });

            if succeeded {
                debug!(attempt, "validation passed");
                return Ok(RetryOutcome {
                    success: true,
                    attempts,
                });
            }

            if attempt >= self.max_attempts {
                warn!(
                    attempts = attempt,
                    "attempt budget exhausted without passing validation"
                );
                return Ok(RetryOutcome {
                    success: false,
                    attempts,
                });
            }

            feedback = Some(build_feedback(&build_result));
        }
    }
}

/// Default bound for [`apply_fixes_bounded`]
pub const DEFAULT_MAX_CONCURRENT_FIXES: usize = 3;

/// Apply independent leaf-level fixes with bounded concurrency. Results come
/// back in input order; one fix failing never cancels the others. This is
/// the only concurrent path in the engine and must not touch shared branch
/// state.
pub async fn apply_fixes_bounded<Fut, T>(
    fixes: Vec<Fut>,
    max_concurrent: usize,
) -> Result<Vec<anyhow::Result<T>>>
where
    Fut: Future<Output = anyhow::Result<T>> + Send,
    T: Send,
{
    if max_concurrent == 0 {
        return Err(WorkflowError::precondition(
            "fix application requires max_concurrent >= 1",
        ));
    }
    Ok(stream::iter(fixes).buffered(max_concurrent).collect().await)
}
