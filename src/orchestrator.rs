//! Top-level workflow coordinator
//!
//! Drives one task end to end: resolve the branch strategy, create the
//! branch and capture a rollback point, dispatch the type-specific
//! pipeline, then complete (commit, push, optional squash merge) or roll
//! back. The context is marked completed exactly once regardless of outcome
//! and returned as the execution summary.

use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::abstractions::{
    AutomationChannel, GitOperations, MergeOptions, ValidationRunner,
};
use crate::branch::BranchNameGenerator;
use crate::config::WorkflowOptions;
use crate::context::{Category, WorkflowContext};
use crate::error::{Result, WorkflowError};
use crate::events::{EventSink, NullEventSink, WorkflowEvent};
use crate::pipeline::{CancellationFlag, ExecutionStep, WorkflowDispatcher};
use crate::strategy::{BranchStrategyResolver, ProtectionLevel};
use crate::task::Task;

/// Structured result of one workflow execution
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub workflow_id: Uuid,
    pub success: bool,
    pub branch_name: Option<String>,
    pub steps: Vec<ExecutionStep>,
    /// First fatal error, if any
    pub error: Option<String>,
    pub rolled_back: bool,
    pub duration_ms: i64,
    pub context: WorkflowContext,
}

pub struct WorkflowOrchestrator {
    git: Arc<dyn GitOperations>,
    automation: Arc<dyn AutomationChannel>,
    validation: Arc<dyn ValidationRunner>,
    events: Arc<dyn EventSink>,
}

impl WorkflowOrchestrator {
    pub fn new(
        git: Arc<dyn GitOperations>,
        automation: Arc<dyn AutomationChannel>,
        validation: Arc<dyn ValidationRunner>,
    ) -> Self {
        Self {
            git,
            automation,
            validation,
            events: Arc::new(NullEventSink),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub async fn execute_workflow(
        &self,
        task: &Task,
        options: &WorkflowOptions,
    ) -> Result<WorkflowResult> {
        self.execute_workflow_cancellable(task, options, &CancellationFlag::new())
            .await
    }

    /// Cancellation is honored at pipeline step boundaries; an in-flight
    /// step finishes or times out first.
    pub async fn execute_workflow_cancellable(
        &self,
        task: &Task,
        options: &WorkflowOptions,
        cancel: &CancellationFlag,
    ) -> Result<WorkflowResult> {
        // Missing projectPath is a fatal precondition, propagated as-is.
        let project_path = task.project_path()?.to_string();
        let path = PathBuf::from(&project_path);

        let workflow_id = Uuid::new_v4();
        let started = Instant::now();
        let mut ctx = WorkflowContext::new(task, &project_path);

        info!(
            %workflow_id,
            task_id = %task.id,
            task_type = %task.task_type,
            "starting workflow"
        );

        let strategy = BranchStrategyResolver::resolve(task.task_type, Some(&options.overrides));
        let branch_name = BranchNameGenerator::generate(task, &strategy);

        // Phase 1: branch creation. Fatal on failure; nothing to roll back.
        if let Err(e) = self
            .git
            .create_branch(&path, &branch_name, Some(&strategy.start_point))
            .await
        {
            let err = WorkflowError::branch_op("create branch", e.to_string());
            error!(branch = %branch_name, "branch creation failed");
            ctx.add_error(err.to_string(), "branch-creation");
            ctx.mark_completed();
            return Ok(self
                .finish(workflow_id, false, None, Vec::new(), Some(err), false, started, ctx)
                .await);
        }

        ctx.set_branch_info(&branch_name, &strategy.start_point);
        self.publish(WorkflowEvent::BranchCreated {
            task_id: task.id.clone(),
            branch: branch_name.clone(),
            timestamp: Utc::now(),
        })
        .await;

        // Explicit rollback point: the commit the branch started from.
        let rollback_point = match self.git.current_commit(&path).await {
            Ok(sha) => Some(sha),
            Err(e) => {
                ctx.add_warning(
                    format!("could not capture rollback point: {e}"),
                    "branch-creation",
                );
                None
            }
        };

        if strategy.protection_level >= ProtectionLevel::High {
            if let Err(e) = self
                .git
                .set_branch_protection(&path, &branch_name, strategy.protection_level)
                .await
            {
                ctx.add_warning(format!("branch protection not applied: {e}"), "branch-creation");
            }
        }

        // Phase 2: type-specific pipeline.
        let dispatcher =
            WorkflowDispatcher::new(self.automation.clone(), self.validation.clone(), options);
        let dispatch = dispatcher.dispatch(task, &mut ctx, cancel).await?;

        if !dispatch.success {
            let err = if dispatch.cancelled {
                // The step the cancellation pre-empted, not the last one run.
                let at = dispatch
                    .cancelled_at
                    .clone()
                    .unwrap_or_else(|| "start".to_string());
                ctx.add_error(format!("cancelled before step '{at}'"), "cancellation");
                WorkflowError::Cancelled(at)
            } else {
                WorkflowError::Step {
                    step: dispatch
                        .steps
                        .last()
                        .map(|s| s.name.clone())
                        .unwrap_or_default(),
                    message: dispatch.error.clone().unwrap_or_default(),
                }
            };
            self.rollback(&path, task, &branch_name, &strategy.start_point, rollback_point, &mut ctx)
                .await;
            ctx.mark_completed();
            let result = self
                .finish(
                    workflow_id,
                    false,
                    Some(branch_name),
                    dispatch.steps,
                    Some(err),
                    true,
                    started,
                    ctx,
                )
                .await;
            return Ok(result);
        }

        // Phase 3: commit, push, optional auto-merge.
        match self
            .complete_branch(&path, task, &strategy.merge_target, strategy.auto_merge, &branch_name, &mut ctx)
            .await
        {
            Ok(()) => {
                if strategy.requires_review && !strategy.auto_merge {
                    ctx.set_review_info("unassigned", "pending");
                }
                ctx.mark_completed();
                Ok(self.finish(
                    workflow_id,
                    true,
                    Some(branch_name),
                    dispatch.steps,
                    None,
                    false,
                    started,
                    ctx,
                ).await)
            }
            Err(CompletionFailure::BeforeMerge(err)) => {
                // Bad local state: protect the tree by rolling back.
                ctx.add_error(err.to_string(), "completion");
                self.rollback(&path, task, &branch_name, &strategy.start_point, rollback_point, &mut ctx)
                    .await;
                ctx.mark_completed();
                Ok(self.finish(
                    workflow_id,
                    false,
                    Some(branch_name),
                    dispatch.steps,
                    Some(err),
                    true,
                    started,
                    ctx,
                ).await)
            }
            Err(CompletionFailure::Merge(err)) => {
                // Deliberate asymmetry: the branch and its history survive
                // for manual resolution; rollback protects against bad
                // edits, not merge-infrastructure problems.
                warn!(branch = %branch_name, "merge failed; branch left intact");
                ctx.add_error(err.to_string(), "merge");
                ctx.mark_completed();
                Ok(self.finish(
                    workflow_id,
                    false,
                    Some(branch_name),
                    dispatch.steps,
                    Some(err),
                    false,
                    started,
                    ctx,
                ).await)
            }
        }
    }

    async fn complete_branch(
        &self,
        path: &Path,
        task: &Task,
        merge_target: &str,
        auto_merge: bool,
        branch_name: &str,
        ctx: &mut WorkflowContext,
    ) -> std::result::Result<(), CompletionFailure> {
        let message = commit_message(task);

        self.git
            .add_files(path, &["."])
            .await
            .map_err(|e| CompletionFailure::before_merge("stage changes", e))?;
        self.git
            .commit_changes(path, &message)
            .await
            .map_err(|e| CompletionFailure::before_merge("commit", e))?;
        self.git
            .push_changes(path, branch_name, true)
            .await
            .map_err(|e| CompletionFailure::before_merge("push", e))?;

        if auto_merge {
            self.git
                .checkout_branch(path, merge_target)
                .await
                .map_err(|e| CompletionFailure::merge("checkout merge target", e))?;
            self.git
                .merge_branch(
                    path,
                    branch_name,
                    &MergeOptions {
                        strategy: Some("squash".to_string()),
                        no_ff: false,
                    },
                )
                .await
                .map_err(|e| CompletionFailure::merge("merge", e))?;
            self.git
                .delete_branch(path, branch_name)
                .await
                .map_err(|e| CompletionFailure::merge("delete merged branch", e))?;
            ctx.set_merge_info(branch_name, merge_target, "squash");
            debug!(branch = branch_name, target = merge_target, "auto-merged");
        } else {
            // Record where the branch is headed even when the merge itself
            // waits for review.
            ctx.set(
                "mergeTarget",
                serde_json::Value::String(merge_target.to_string()),
                Category::GitData,
            );
        }

        Ok(())
    }

    /// Restore the rollback point, return to the base branch, and delete the
    /// task branch. Rollback failures are warnings; they never mask the
    /// original error.
    async fn rollback(
        &self,
        path: &Path,
        task: &Task,
        branch_name: &str,
        base_branch: &str,
        rollback_point: Option<String>,
        ctx: &mut WorkflowContext,
    ) {
        info!(branch = branch_name, "rolling back workflow");

        match rollback_point {
            Some(commit) => {
                if let Err(e) = self.git.reset_to_commit(path, &commit).await {
                    ctx.add_warning(format!("reset to {commit} failed: {e}"), "rollback");
                }
            }
            None => {
                ctx.add_warning("no rollback point captured; skipping reset", "rollback");
            }
        }

        if let Err(e) = self.git.checkout_branch(path, base_branch).await {
            ctx.add_warning(format!("checkout {base_branch} failed: {e}"), "rollback");
        }
        if let Err(e) = self.git.delete_branch(path, branch_name).await {
            ctx.add_warning(format!("delete {branch_name} failed: {e}"), "rollback");
        }

        self.publish(WorkflowEvent::RolledBack {
            task_id: task.id.clone(),
            branch: branch_name.to_string(),
            timestamp: Utc::now(),
        })
        .await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        workflow_id: Uuid,
        success: bool,
        branch_name: Option<String>,
        steps: Vec<ExecutionStep>,
        error: Option<WorkflowError>,
        rolled_back: bool,
        started: Instant,
        ctx: WorkflowContext,
    ) -> WorkflowResult {
        let result = WorkflowResult {
            workflow_id,
            success,
            branch_name: branch_name.clone(),
            steps,
            error: error.map(|e| e.to_string()),
            rolled_back,
            duration_ms: started.elapsed().as_millis() as i64,
            context: ctx,
        };

        self.publish(WorkflowEvent::Completed {
            task_id: result.context.task_id.clone(),
            branch: branch_name.unwrap_or_default(),
            success,
            timestamp: Utc::now(),
        })
        .await;

        info!(
            success = result.success,
            rolled_back = result.rolled_back,
            duration_ms = result.duration_ms,
            "workflow finished"
        );
        result
    }

    async fn publish(&self, event: WorkflowEvent) {
        if let Err(e) = self.events.publish(event).await {
            debug!(error = %e, "event sink rejected event");
        }
    }
}

fn commit_message(task: &Task) -> String {
    format!(
        "{}: {} [{}] ({})",
        task.task_type,
        task.title,
        task.id,
        Utc::now().format("%Y-%m-%dT%H:%M:%SZ")
    )
}

enum CompletionFailure {
    BeforeMerge(WorkflowError),
    Merge(WorkflowError),
}

impl CompletionFailure {
    fn before_merge(op: &str, e: anyhow::Error) -> Self {
        Self::BeforeMerge(WorkflowError::branch_op(op, e.to_string()))
    }

    fn merge(op: &str, e: anyhow::Error) -> Self {
        Self::Merge(WorkflowError::branch_op(op, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskType;

    #[test]
    fn test_commit_message_template() {
        let task = Task::new("T-9", TaskType::Feature, "Add search");
        let msg = commit_message(&task);
        assert!(msg.starts_with("feature: Add search [T-9] ("));
        assert!(msg.ends_with(')'));
    }
}
