//! Sequential multi-task pipeline
//!
//! Chains N tasks through a shared integration branch: each task works on
//! its own branch, merges into the integration branch on success, and
//! pre-creates the next task's branch so the next task starts from a clean,
//! already-isolated branch. Strictly sequential by design; a later task
//! assumes the integration branch reflects every earlier merge.

use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::abstractions::{AutomationChannel, GitOperations, MergeOptions};
use crate::branch::BranchNameGenerator;
use crate::config::SequentialOptions;
use crate::error::{Result, WorkflowError};
use crate::events::{EventSink, NullEventSink, WorkflowEvent};
use crate::pipeline::has_completion_marker;
use crate::strategy::BranchStrategyResolver;
use crate::task::Task;

/// Per-task entry in a pipeline run, appended strictly in task order
#[derive(Debug, Clone, Serialize)]
pub struct TaskRun {
    pub task_id: String,
    pub branch_name: String,
    pub success: bool,
    /// Branch the task's work was merged into, when it was
    pub merge_result: Option<String>,
    /// Branch pre-created for the following task
    pub next_branch: Option<String>,
    pub duration_ms: i64,
    pub error: Option<String>,
}

/// Aggregate summary of a sequential run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRunSummary {
    pub run_id: Uuid,
    pub entries: Vec<TaskRun>,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub success: bool,
}

/// Failure from one task's turn, keeping the branch that was in play so the
/// run summary can report it (and any dangling branch can be cleaned up).
struct TaskFailure {
    branch_name: Option<String>,
    error: WorkflowError,
}

impl TaskFailure {
    fn on(branch: &str, error: WorkflowError) -> Self {
        Self {
            branch_name: Some(branch.to_string()),
            error,
        }
    }

    fn early(error: WorkflowError) -> Self {
        Self {
            branch_name: None,
            error,
        }
    }
}

pub struct SequentialPipelineExecutor {
    git: Arc<dyn GitOperations>,
    automation: Arc<dyn AutomationChannel>,
    events: Arc<dyn EventSink>,
}

impl SequentialPipelineExecutor {
    pub fn new(git: Arc<dyn GitOperations>, automation: Arc<dyn AutomationChannel>) -> Self {
        Self {
            git,
            automation,
            events: Arc::new(NullEventSink),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Run tasks in input order. By default a task failure is recorded and
    /// the remaining tasks still run; `fail_fast` halts the batch instead.
    pub async fn run_sequential(
        &self,
        tasks: &[Task],
        options: &SequentialOptions,
    ) -> Result<PipelineRunSummary> {
        let run_id = Uuid::new_v4();
        let mut entries: Vec<TaskRun> = Vec::with_capacity(tasks.len());
        // Branch pre-created by the previous iteration, if any.
        let mut pending_branch: Option<String> = None;

        info!(%run_id, tasks = tasks.len(), "starting sequential pipeline");

        for (index, task) in tasks.iter().enumerate() {
            let started = Instant::now();
            let next_task = tasks.get(index + 1);

            match self
                .run_one(task, next_task, pending_branch.take(), options)
                .await
            {
                Ok(entry) => {
                    pending_branch = entry.next_branch.clone();
                    self.publish(WorkflowEvent::SequentialTaskCompleted {
                        task_id: task.id.clone(),
                        branch: entry.branch_name.clone(),
                        timestamp: Utc::now(),
                    })
                    .await;
                    entries.push(entry);
                }
                Err(failure) => {
                    let error = failure.error.to_string();
                    warn!(task_id = %task.id, error = %error, "sequential task failed");
                    self.publish(WorkflowEvent::SequentialTaskFailed {
                        task_id: task.id.clone(),
                        reason: error.clone(),
                        timestamp: Utc::now(),
                    })
                    .await;
                    entries.push(TaskRun {
                        task_id: task.id.clone(),
                        branch_name: failure.branch_name.unwrap_or_default(),
                        success: false,
                        merge_result: None,
                        next_branch: None,
                        duration_ms: started.elapsed().as_millis() as i64,
                        error: Some(error),
                    });
                    if options.fail_fast {
                        info!("fail-fast set; halting remaining tasks");
                        break;
                    }
                }
            }
        }

        let total = entries.len();
        let successful = entries.iter().filter(|e| e.success).count();
        let failed = total - successful;

        Ok(PipelineRunSummary {
            run_id,
            entries,
            total,
            successful,
            failed,
            success: failed == 0,
        })
    }

    async fn run_one(
        &self,
        task: &Task,
        next_task: Option<&Task>,
        pre_created: Option<String>,
        options: &SequentialOptions,
    ) -> std::result::Result<TaskRun, TaskFailure> {
        let started = Instant::now();
        let project_path = task
            .project_path()
            .map_err(TaskFailure::early)?
            .to_string();
        let path = PathBuf::from(&project_path);

        // Use the branch pre-created by the previous task, or cut one now.
        let branch_name = match pre_created {
            Some(branch) => {
                self.git
                    .checkout_branch(&path, &branch)
                    .await
                    .map_err(|e| {
                        TaskFailure::on(&branch, WorkflowError::branch_op("checkout", e.to_string()))
                    })?;
                branch
            }
            None => self
                .create_task_branch(&path, task, options)
                .await
                .map_err(TaskFailure::early)?,
        };

        let session_id = self
            .automation
            .start_session()
            .await
            .map_err(|e| TaskFailure::on(&branch_name, WorkflowError::Other(e)))?;
        // Give the fresh session time to become responsive.
        sleep(options.settle_delay).await;

        let prompt = task_instruction(task);
        self.automation
            .send_instruction(&session_id, &prompt)
            .await
            .map_err(|e| TaskFailure::on(&branch_name, WorkflowError::Other(e)))?;

        self.await_completion(task, &session_id, options)
            .await
            .map_err(|e| TaskFailure::on(&branch_name, e))?;

        // Merge the finished work into the shared integration branch.
        self.git
            .checkout_branch(&path, &options.integration_branch)
            .await
            .map_err(|e| {
                TaskFailure::on(
                    &branch_name,
                    WorkflowError::branch_op("checkout integration", e.to_string()),
                )
            })?;
        self.git
            .merge_branch(
                &path,
                &branch_name,
                &MergeOptions {
                    strategy: None,
                    no_ff: true,
                },
            )
            .await
            .map_err(|e| {
                TaskFailure::on(
                    &branch_name,
                    WorkflowError::branch_op("merge into integration", e.to_string()),
                )
            })?;

        // Pre-create the next task's branch from the clean integration tip.
        let next_branch = match next_task {
            Some(next) => Some(
                self.create_task_branch(&path, next, options)
                    .await
                    .map_err(|e| TaskFailure::on(&branch_name, e))?,
            ),
            None => None,
        };

        Ok(TaskRun {
            task_id: task.id.clone(),
            branch_name,
            success: true,
            merge_result: Some(options.integration_branch.clone()),
            next_branch,
            duration_ms: started.elapsed().as_millis() as i64,
            error: None,
        })
    }

    /// Cut a task branch off the integration branch.
    async fn create_task_branch(
        &self,
        path: &Path,
        task: &Task,
        options: &SequentialOptions,
    ) -> Result<String> {
        let strategy = BranchStrategyResolver::resolve(task.task_type, Some(&options.overrides));
        let branch_name = BranchNameGenerator::generate(task, &strategy);
        self.git
            .create_branch(path, &branch_name, Some(&options.integration_branch))
            .await
            .map_err(|e| WorkflowError::branch_op("create branch", e.to_string()))?;
        Ok(branch_name)
    }

    /// Bounded poll for a completion marker in the automation output.
    async fn await_completion(
        &self,
        task: &Task,
        session_id: &str,
        options: &SequentialOptions,
    ) -> Result<()> {
        let started = Instant::now();
        loop {
            if let Some(output) = self
                .automation
                .poll_output(session_id)
                .await
                .map_err(WorkflowError::Other)?
            {
                if has_completion_marker(&output) {
                    return Ok(());
                }
            }
            if started.elapsed() >= options.completion_timeout {
                return Err(WorkflowError::AutomationTimeout {
                    task_id: task.id.clone(),
                    waited: started.elapsed(),
                });
            }
            sleep(options.poll_interval).await;
        }
    }

    async fn publish(&self, event: WorkflowEvent) {
        if let Err(e) = self.events.publish(event).await {
            tracing::debug!(error = %e, "event sink rejected event");
        }
    }
}

fn task_instruction(task: &Task) -> String {
    let mut prompt = format!("Task {} ({}): {}", task.id, task.task_type, task.title);
    if !task.description.is_empty() {
        prompt.push('\n');
        prompt.push_str(&task.description);
    }
    prompt.push_str("\nReply with 'done' when the task is complete.");
    prompt
}
