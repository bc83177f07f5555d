//! Workflow dispatcher
//!
//! Each task type maps to a fixed, ordered list of named steps; the
//! dispatcher runs them in order, halting on the first failure. Pipelines
//! are data (a table of step descriptors), so adding a task type means
//! adding one table entry. Retry is never applied at the pipeline level;
//! it lives entirely inside the steps that use the retry loop.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::abstractions::{
    AutomationChannel, CommandValidationRunner, ValidationOutcome, ValidationRunner,
};
use crate::config::WorkflowOptions;
use crate::context::{Category, WorkflowContext};
use crate::error::Result;
use crate::retry::{ChangeApplier, ChangeValidator, RetryValidationLoop};
use crate::task::{Task, TaskType};

/// What a step does, drawn from the dispatcher's capability set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    /// Open a fresh automation session for the task
    CreateSession,
    /// Send an instruction and await the response
    Instruct,
    /// Poll the automation channel for a completion marker
    AwaitCompletion,
    /// Apply edits through the retry-with-feedback validation loop
    EditWithRetry,
    /// Run the validation gate once; the step fails if validation fails
    RunValidation,
    /// Run the validation gate and record the outcome without failing
    Probe,
}

/// One entry in a pipeline table
#[derive(Debug, Clone, Copy)]
pub struct StepSpec {
    pub name: &'static str,
    pub action: StepAction,
}

const fn step(name: &'static str, action: StepAction) -> StepSpec {
    StepSpec { name, action }
}

use StepAction::*;

const REFACTOR: &[StepSpec] = &[
    step("create-session", CreateSession),
    step("ai-edit-with-retry-loop", EditWithRetry),
    step("completion", AwaitCompletion),
];

const FEATURE: &[StepSpec] = &[
    step("create-session", CreateSession),
    step("implement", Instruct),
    step("generate-tests", Instruct),
    step("validate", RunValidation),
];

const BUGFIX: &[StepSpec] = &[
    step("create-session", CreateSession),
    step("reproduce", Instruct),
    step("fix-with-retry", EditWithRetry),
    step("verify", RunValidation),
];

const HOTFIX: &[StepSpec] = &[
    step("create-session", CreateSession),
    step("patch", Instruct),
    step("validate", RunValidation),
];

const ANALYSIS: &[StepSpec] = &[
    step("create-session", CreateSession),
    step("analyze", Instruct),
    step("report", Instruct),
];

const TESTING: &[StepSpec] = &[
    step("run-tests", Probe),
    step("analyze-failures", Instruct),
    step("apply-fixes", EditWithRetry),
    step("verify", RunValidation),
];

const DOCUMENTATION: &[StepSpec] = &[
    step("create-session", CreateSession),
    step("draft-docs", Instruct),
    step("review-output", Instruct),
];

const DEBUG: &[StepSpec] = &[
    step("create-session", CreateSession),
    step("diagnose", Instruct),
    step("fix-with-retry", EditWithRetry),
    step("verify", RunValidation),
];

const OPTIMIZATION: &[StepSpec] = &[
    step("create-session", CreateSession),
    step("profile", Instruct),
    step("optimize-with-retry", EditWithRetry),
    step("validate", RunValidation),
];

const CODE_REVIEW: &[StepSpec] = &[
    step("create-session", CreateSession),
    step("review", Instruct),
    step("summarize", Instruct),
];

const GENERIC: &[StepSpec] = &[
    step("create-session", CreateSession),
    step("execute", Instruct),
];

/// Pipeline table lookup; unregistered types get the generic pipeline.
pub fn pipeline_for(task_type: TaskType) -> &'static [StepSpec] {
    match task_type {
        TaskType::Refactor => REFACTOR,
        TaskType::Feature => FEATURE,
        TaskType::Bugfix => BUGFIX,
        TaskType::Hotfix => HOTFIX,
        TaskType::Analysis => ANALYSIS,
        TaskType::Testing => TESTING,
        TaskType::Documentation => DOCUMENTATION,
        TaskType::Debug => DEBUG,
        TaskType::Optimization => OPTIMIZATION,
        TaskType::CodeReview => CODE_REVIEW,
        TaskType::Generic => GENERIC,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Audit-trail record for one executed step; appended in run order and
/// never reordered or removed
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionStep {
    pub name: String,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl ExecutionStep {
    fn start(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: StepStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            data: None,
            error: None,
        }
    }

    fn complete(&mut self, data: Option<Value>) {
        self.status = StepStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.data = data;
    }

    fn fail(&mut self, error: String) {
        self.status = StepStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error);
    }
}

/// Cooperative cancellation, observed at step boundaries. A step already in
/// flight finishes or times out before the flag takes effect.
#[derive(Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one pipeline dispatch
#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    pub success: bool,
    pub steps: Vec<ExecutionStep>,
    pub error: Option<String>,
    pub cancelled: bool,
    /// Step the cancellation pre-empted, when `cancelled` is set
    pub cancelled_at: Option<String>,
}

/// Completion markers looked for in automation output
const COMPLETION_MARKERS: [&str; 3] = ["done", "completed", "finished"];

pub(crate) fn has_completion_marker(text: &str) -> bool {
    let lowered = text.to_lowercase();
    COMPLETION_MARKERS.iter().any(|m| lowered.contains(m))
}

pub struct WorkflowDispatcher {
    automation: Arc<dyn AutomationChannel>,
    validation: Arc<dyn ValidationRunner>,
    max_attempts: u32,
    completion_timeout: Duration,
    poll_interval: Duration,
}

impl WorkflowDispatcher {
    /// Configured validation commands take precedence over the injected
    /// runner, so callers can swap the gate per workflow without rebuilding
    /// their collaborator set.
    pub fn new(
        automation: Arc<dyn AutomationChannel>,
        validation: Arc<dyn ValidationRunner>,
        options: &WorkflowOptions,
    ) -> Self {
        let validation: Arc<dyn ValidationRunner> = if options.validation_commands.is_empty() {
            validation
        } else {
            Arc::new(CommandValidationRunner::new(
                options.validation_commands.clone(),
            ))
        };
        Self {
            automation,
            validation,
            max_attempts: options.max_attempts,
            completion_timeout: options.completion_timeout,
            poll_interval: options.poll_interval,
        }
    }

    /// Run the task type's pipeline to completion or first failure.
    pub async fn dispatch(
        &self,
        task: &Task,
        ctx: &mut WorkflowContext,
        cancel: &CancellationFlag,
    ) -> Result<DispatchResult> {
        let pipeline = pipeline_for(task.task_type);
        let mut steps: Vec<ExecutionStep> = Vec::with_capacity(pipeline.len());

        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            steps = pipeline.len(),
            "dispatching pipeline"
        );

        for spec in pipeline {
            if cancel.is_cancelled() {
                warn!(step = spec.name, "cancellation observed at step boundary");
                return Ok(DispatchResult {
                    success: false,
                    steps,
                    error: Some(format!("cancelled before step '{}'", spec.name)),
                    cancelled: true,
                    cancelled_at: Some(spec.name.to_string()),
                });
            }

            let mut record = ExecutionStep::start(spec.name);
            debug!(step = spec.name, "step started");

            match self.run_step(spec, task, ctx).await {
                Ok(data) => {
                    record.complete(data);
                    steps.push(record);
                }
                Err(e) => {
                    let message = e.to_string();
                    record.fail(message.clone());
                    steps.push(record);
                    ctx.add_error(message.clone(), spec.name);
                    return Ok(DispatchResult {
                        success: false,
                        steps,
                        error: Some(format!("step '{}' failed: {}", spec.name, message)),
                        cancelled: false,
                        cancelled_at: None,
                    });
                }
            }
        }

        Ok(DispatchResult {
            success: true,
            steps,
            error: None,
            cancelled: false,
            cancelled_at: None,
        })
    }

    async fn run_step(
        &self,
        spec: &StepSpec,
        task: &Task,
        ctx: &mut WorkflowContext,
    ) -> anyhow::Result<Option<Value>> {
        match spec.action {
            StepAction::CreateSession => {
                let session_id = self.automation.start_session().await?;
                ctx.set(
                    "sessionId",
                    Value::String(session_id.clone()),
                    Category::Metadata,
                );
                Ok(Some(json!({ "sessionId": session_id })))
            }
            StepAction::Instruct => {
                let session_id = self.ensure_session(ctx).await?;
                let prompt = instruction_prompt(task, spec.name);
                let response = self.automation.send_message(&session_id, &prompt).await?;
                Ok(Some(json!({ "responseChars": response.len() })))
            }
            StepAction::AwaitCompletion => {
                let session_id = self.ensure_session(ctx).await?;
                let deadline = Instant::now() + self.completion_timeout;
                loop {
                    if let Some(output) = self.automation.poll_output(&session_id).await? {
                        if has_completion_marker(&output) {
                            return Ok(Some(json!({ "output": output })));
                        }
                    }
                    if Instant::now() >= deadline {
                        anyhow::bail!(
                            "no completion signal within {:?}",
                            self.completion_timeout
                        );
                    }
                    sleep(self.poll_interval).await;
                }
            }
            StepAction::EditWithRetry => {
                let session_id = self.ensure_session(ctx).await?;
                let looper = RetryValidationLoop::new(self.max_attempts)?;
                let mut applier = AutomationEditApplier {
                    automation: self.automation.clone(),
                    session_id,
                    base_prompt: instruction_prompt(task, spec.name),
                };
                let mut validator = GateValidator {
                    runner: self.validation.clone(),
                    project_path: PathBuf::from(&ctx.project_path),
                };
                let outcome = looper
                    .run(&mut applier, &mut validator, feedback_prompt)
                    .await?;

                let data = json!({
                    "attempts": outcome.attempts.len(),
                    "lastError": outcome.last_error(),
                });
                if !outcome.success {
                    anyhow::bail!(
                        "validation still failing after {} attempts: {}",
                        outcome.attempts.len(),
                        outcome.last_error().unwrap_or("unknown error")
                    );
                }
                Ok(Some(data))
            }
            StepAction::RunValidation => {
                let outcome = self
                    .validation
                    .run(&PathBuf::from(&ctx.project_path))
                    .await?;
                if !outcome.success {
                    anyhow::bail!(
                        "validation failed: {}",
                        outcome.error.as_deref().unwrap_or("unknown error")
                    );
                }
                Ok(Some(json!({ "command": outcome.command })))
            }
            StepAction::Probe => {
                let outcome = self
                    .validation
                    .run(&PathBuf::from(&ctx.project_path))
                    .await?;
                Ok(Some(json!({
                    "command": outcome.command,
                    "passed": outcome.success,
                    "error": outcome.error,
                })))
            }
        }
    }

    /// Session id from the context, opening one lazily for pipelines whose
    /// first step is not create-session. Opened at most once per task.
    async fn ensure_session(&self, ctx: &mut WorkflowContext) -> anyhow::Result<String> {
        if let Some(id) = ctx.get_str("sessionId", Category::Metadata) {
            return Ok(id.to_string());
        }
        let session_id = self.automation.start_session().await?;
        ctx.set(
            "sessionId",
            Value::String(session_id.clone()),
            Category::Metadata,
        );
        Ok(session_id)
    }
}

fn instruction_prompt(task: &Task, step_name: &str) -> String {
    let mut prompt = format!(
        "[{}] Task {} ({}): {}",
        step_name, task.id, task.task_type, task.title
    );
    if !task.description.is_empty() {
        prompt.push('\n');
        prompt.push_str(&task.description);
    }
    if let Some(file) = task.file_path() {
        prompt.push_str(&format!("\nFocus file: {file}"));
    }
    prompt
}

fn feedback_prompt(outcome: &ValidationOutcome) -> String {
    format!(
        "The previous change failed validation ({}). Error:\n{}\nPlease fix the issue and try again.",
        outcome.command,
        outcome.error.as_deref().unwrap_or("unknown error")
    )
}

struct AutomationEditApplier {
    automation: Arc<dyn AutomationChannel>,
    session_id: String,
    base_prompt: String,
}

#[async_trait]
impl ChangeApplier for AutomationEditApplier {
    async fn apply(&mut self, feedback: Option<&str>) -> anyhow::Result<Option<String>> {
        let prompt = match feedback {
            Some(fb) => format!("{}\n\n{}", self.base_prompt, fb),
            None => self.base_prompt.clone(),
        };
        let response = self.automation.send_message(&self.session_id, &prompt).await?;
        Ok(Some(response))
    }
}

struct GateValidator {
    runner: Arc<dyn ValidationRunner>,
    project_path: PathBuf,
}

#[async_trait]
impl ChangeValidator for GateValidator {
    async fn validate(&mut self) -> anyhow::Result<ValidationOutcome> {
        self.runner.run(&self.project_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstractions::{MockAutomationChannel, MockValidationRunner};

    fn fast_options() -> WorkflowOptions {
        WorkflowOptions {
            completion_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
            ..Default::default()
        }
    }

    fn make_dispatcher(
        automation: Arc<MockAutomationChannel>,
        validation: Arc<MockValidationRunner>,
    ) -> WorkflowDispatcher {
        WorkflowDispatcher::new(automation, validation, &fast_options())
    }

    fn ctx_for(task: &Task) -> WorkflowContext {
        WorkflowContext::new(task, "/repo")
    }

    #[test]
    fn test_every_task_type_has_a_pipeline() {
        for task_type in TaskType::ALL {
            assert!(!pipeline_for(task_type).is_empty());
        }
    }

    #[test]
    fn test_generic_pipeline_is_single_instruction() {
        let steps = pipeline_for(TaskType::Generic);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].name, "create-session");
        assert_eq!(steps[1].name, "execute");
    }

    #[test]
    fn test_completion_markers_case_insensitive() {
        assert!(has_completion_marker("Task is DONE"));
        assert!(has_completion_marker("All tests Completed successfully"));
        assert!(has_completion_marker("finished without issues"));
        assert!(!has_completion_marker("still working on it"));
    }

    #[tokio::test]
    async fn test_refactor_pipeline_happy_path() {
        let automation = Arc::new(MockAutomationChannel::new());
        automation.queue_response("made the edit").await;
        automation.queue_poll_output(Some("refactor done")).await;
        let validation = Arc::new(MockValidationRunner::new());

        let dispatcher = make_dispatcher(automation.clone(), validation);
        let task = Task::new("t-1", TaskType::Refactor, "Tidy").with_project_path("/repo");
        let mut ctx = ctx_for(&task);

        let result = dispatcher
            .dispatch(&task, &mut ctx, &CancellationFlag::new())
            .await
            .unwrap();

        assert!(result.success);
        let names: Vec<&str> = result.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["create-session", "ai-edit-with-retry-loop", "completion"]
        );
        assert!(result
            .steps
            .iter()
            .all(|s| s.status == StepStatus::Completed));
    }

    #[tokio::test]
    async fn test_pipeline_halts_on_first_failure() {
        let automation = Arc::new(MockAutomationChannel::new());
        // No scripted response: the "patch" instruction will fail.
        let validation = Arc::new(MockValidationRunner::new());

        let dispatcher = make_dispatcher(automation, validation.clone());
        let task = Task::new("t-2", TaskType::Hotfix, "Fix prod").with_project_path("/repo");
        let mut ctx = ctx_for(&task);

        let result = dispatcher
            .dispatch(&task, &mut ctx, &CancellationFlag::new())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[1].name, "patch");
        assert_eq!(result.steps[1].status, StepStatus::Failed);
        // The validate step never ran.
        assert_eq!(validation.runs().await, 0);
        assert_eq!(ctx.errors().len(), 1);
        assert_eq!(ctx.errors()[0].phase, "patch");
    }

    #[tokio::test]
    async fn test_edit_with_retry_exhausts_budget_and_fails_step() {
        let automation = Arc::new(MockAutomationChannel::new());
        for _ in 0..3 {
            automation.queue_response("tried an edit").await;
        }
        let validation = Arc::new(MockValidationRunner::new());
        validation.queue_failures(3).await;

        let dispatcher = make_dispatcher(automation.clone(), validation);
        let task = Task::new("t-3", TaskType::Refactor, "Tidy").with_project_path("/repo");
        let mut ctx = ctx_for(&task);

        let result = dispatcher
            .dispatch(&task, &mut ctx, &CancellationFlag::new())
            .await
            .unwrap();

        assert!(!result.success);
        let failed = result.steps.last().unwrap();
        assert_eq!(failed.name, "ai-edit-with-retry-loop");
        assert!(failed.error.as_deref().unwrap().contains("3 attempts"));
        // Feedback prompts were embedded in the second and third edits.
        let prompts = automation.prompts().await;
        assert_eq!(prompts.len(), 3);
        assert!(prompts[1].contains("failed validation"));
    }

    #[tokio::test]
    async fn test_await_completion_times_out() {
        let automation = Arc::new(MockAutomationChannel::new());
        automation.queue_response("edit").await;
        // Never produce a completion marker.
        let validation = Arc::new(MockValidationRunner::new());

        let dispatcher = make_dispatcher(automation, validation);
        let task = Task::new("t-4", TaskType::Refactor, "Tidy").with_project_path("/repo");
        let mut ctx = ctx_for(&task);

        let result = dispatcher
            .dispatch(&task, &mut ctx, &CancellationFlag::new())
            .await
            .unwrap();

        assert!(!result.success);
        let failed = result.steps.last().unwrap();
        assert_eq!(failed.name, "completion");
        assert!(failed.error.as_deref().unwrap().contains("completion signal"));
    }

    #[tokio::test]
    async fn test_cancellation_observed_at_step_boundary() {
        let automation = Arc::new(MockAutomationChannel::new());
        let validation = Arc::new(MockValidationRunner::new());
        let dispatcher = make_dispatcher(automation, validation);

        let task = Task::new("t-5", TaskType::Generic, "Do it").with_project_path("/repo");
        let mut ctx = ctx_for(&task);
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let result = dispatcher.dispatch(&task, &mut ctx, &cancel).await.unwrap();
        assert!(!result.success);
        assert!(result.cancelled);
        assert!(result.steps.is_empty());
        // The pre-empted step, not the last completed one.
        assert_eq!(result.cancelled_at.as_deref(), Some("create-session"));
    }

    #[tokio::test]
    async fn test_configured_validation_commands_replace_injected_runner() {
        let automation = Arc::new(MockAutomationChannel::new());
        for _ in 0..3 {
            automation.queue_response("tried an edit").await;
        }
        // The injected runner would pass every time.
        let validation = Arc::new(MockValidationRunner::new());
        let options = WorkflowOptions {
            validation_commands: vec!["sh -c 'exit 1'".to_string()],
            ..fast_options()
        };

        let dispatcher = WorkflowDispatcher::new(automation, validation.clone(), &options);
        let task = Task::new("t-8", TaskType::Refactor, "Tidy").with_project_path(".");
        let mut ctx = WorkflowContext::new(&task, ".");

        let result = dispatcher
            .dispatch(&task, &mut ctx, &CancellationFlag::new())
            .await
            .unwrap();

        // The configured commands fail validation; the injected runner
        // never gets consulted.
        assert!(!result.success);
        assert_eq!(validation.runs().await, 0);
        let failed = result.steps.last().unwrap();
        assert_eq!(failed.name, "ai-edit-with-retry-loop");
    }

    #[tokio::test]
    async fn test_configured_validation_commands_can_pass() {
        let automation = Arc::new(MockAutomationChannel::new());
        automation.queue_response("made the edit").await;
        automation.queue_poll_output(Some("refactor done")).await;
        let validation = Arc::new(MockValidationRunner::new());
        let options = WorkflowOptions {
            validation_commands: vec!["sh -c 'echo built ok'".to_string()],
            ..fast_options()
        };

        let dispatcher = WorkflowDispatcher::new(automation, validation.clone(), &options);
        let task = Task::new("t-9", TaskType::Refactor, "Tidy").with_project_path(".");
        let mut ctx = WorkflowContext::new(&task, ".");

        let result = dispatcher
            .dispatch(&task, &mut ctx, &CancellationFlag::new())
            .await
            .unwrap();

        assert!(result.success, "error: {:?}", result.error);
        assert_eq!(validation.runs().await, 0);
    }

    #[tokio::test]
    async fn test_testing_pipeline_probe_does_not_halt_on_red_tests() {
        let automation = Arc::new(MockAutomationChannel::new());
        automation.queue_response("failure analysis").await;
        automation.queue_response("fixed the tests").await;
        let validation = Arc::new(MockValidationRunner::new());
        // run-tests probe sees red, fix validation passes, verify passes.
        validation.queue_failures(1).await;

        let dispatcher = make_dispatcher(automation, validation);
        let task = Task::new("t-6", TaskType::Testing, "Stabilize").with_project_path("/repo");
        let mut ctx = ctx_for(&task);

        let result = dispatcher
            .dispatch(&task, &mut ctx, &CancellationFlag::new())
            .await
            .unwrap();

        assert!(result.success, "error: {:?}", result.error);
        assert_eq!(result.steps[0].name, "run-tests");
        assert_eq!(result.steps[0].status, StepStatus::Completed);
        assert_eq!(result.steps[0].data.as_ref().unwrap()["passed"], false);
    }

    #[tokio::test]
    async fn test_step_timestamps_non_decreasing() {
        let automation = Arc::new(MockAutomationChannel::new());
        automation.queue_response("a").await;
        automation.queue_response("b").await;
        let validation = Arc::new(MockValidationRunner::new());

        let dispatcher = make_dispatcher(automation, validation);
        let task = Task::new("t-7", TaskType::Feature, "Ship it").with_project_path("/repo");
        let mut ctx = ctx_for(&task);

        let result = dispatcher
            .dispatch(&task, &mut ctx, &CancellationFlag::new())
            .await
            .unwrap();

        assert!(result.success);
        for pair in result.steps.windows(2) {
            assert!(pair[0].started_at <= pair[1].started_at);
        }
    }
}
