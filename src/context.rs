//! Per-workflow execution context
//!
//! One `WorkflowContext` is created per task at workflow start, mutated by
//! each pipeline step, marked completed exactly once, and returned as the
//! execution summary. It is owned by a single workflow execution and never
//! shared across tasks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::task::{Task, TaskType};

/// Data category for the generic key/value accessors.
///
/// Timestamps are deliberately not a `Category`: they live in a typed
/// `DateTime` map with monotonic clamping and go through `stamp` /
/// `timestamp` / `clear_timestamp` instead of the untyped `Value` API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    GitData,
    Metadata,
}

/// One recorded error or warning, with the phase it occurred in
#[derive(Debug, Clone, Serialize)]
pub struct ContextNote {
    pub message: String,
    pub phase: String,
    pub timestamp: DateTime<Utc>,
}

/// Result of `WorkflowContext::validate`
#[derive(Debug, Clone, Serialize)]
pub struct ContextValidation {
    pub is_valid: bool,
    pub missing_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowContext {
    pub task_id: String,
    pub task_type: TaskType,
    pub project_path: String,
    git_data: HashMap<String, Value>,
    metadata: HashMap<String, Value>,
    timestamps: HashMap<String, DateTime<Utc>>,
    errors: Vec<ContextNote>,
    warnings: Vec<ContextNote>,
}

impl WorkflowContext {
    /// Create a context from a task snapshot, stamping `created`.
    pub fn new(task: &Task, project_path: impl Into<String>) -> Self {
        let mut ctx = Self {
            task_id: task.id.clone(),
            task_type: task.task_type,
            project_path: project_path.into(),
            git_data: HashMap::new(),
            metadata: HashMap::new(),
            timestamps: HashMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        };
        ctx.metadata
            .insert("title".to_string(), Value::String(task.title.clone()));
        ctx.stamp("created");
        ctx
    }

    fn map(&self, category: Category) -> &HashMap<String, Value> {
        match category {
            Category::GitData => &self.git_data,
            Category::Metadata => &self.metadata,
        }
    }

    fn map_mut(&mut self, category: Category) -> &mut HashMap<String, Value> {
        match category {
            Category::GitData => &mut self.git_data,
            Category::Metadata => &mut self.metadata,
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value, category: Category) {
        self.map_mut(category).insert(key.into(), value);
    }

    pub fn get<'a>(&'a self, key: &str, category: Category, default: &'a Value) -> &'a Value {
        self.map(category).get(key).unwrap_or(default)
    }

    pub fn get_str(&self, key: &str, category: Category) -> Option<&str> {
        self.map(category).get(key).and_then(Value::as_str)
    }

    pub fn has(&self, key: &str, category: Category) -> bool {
        self.map(category).contains_key(key)
    }

    pub fn delete(&mut self, key: &str, category: Category) -> bool {
        self.map_mut(category).remove(key).is_some()
    }

    /// Stamp a named milestone. Timestamps are clamped so the set stays
    /// monotonically non-decreasing per context instance.
    pub fn stamp(&mut self, name: &str) {
        let floor = self.timestamps.values().max().copied();
        let now = Utc::now();
        let instant = match floor {
            Some(prev) if prev > now => prev,
            _ => now,
        };
        self.timestamps.insert(name.to_string(), instant);
    }

    pub fn timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        self.timestamps.get(name).copied()
    }

    /// Remove a named milestone. Clearing `completed` re-opens the context
    /// for a later `mark_completed`.
    pub fn clear_timestamp(&mut self, name: &str) -> bool {
        self.timestamps.remove(name).is_some()
    }

    /// Record branch creation; also stamps `branchCreated`.
    pub fn set_branch_info(&mut self, branch_name: &str, base_branch: &str) {
        self.git_data.insert(
            "branchName".to_string(),
            Value::String(branch_name.to_string()),
        );
        self.git_data.insert(
            "baseBranch".to_string(),
            Value::String(base_branch.to_string()),
        );
        self.stamp("branchCreated");
    }

    /// Record merge completion; also stamps `mergeCompleted`.
    pub fn set_merge_info(&mut self, source: &str, target: &str, strategy: &str) {
        self.git_data
            .insert("mergeSource".to_string(), Value::String(source.to_string()));
        self.git_data
            .insert("mergeTarget".to_string(), Value::String(target.to_string()));
        self.git_data.insert(
            "mergeStrategy".to_string(),
            Value::String(strategy.to_string()),
        );
        self.stamp("mergeCompleted");
    }

    /// Record pull request details; also stamps `pullRequestCreated`.
    pub fn set_pull_request_info(&mut self, pr_id: &str, url: &str) {
        self.git_data
            .insert("pullRequestId".to_string(), Value::String(pr_id.to_string()));
        self.git_data
            .insert("pullRequestUrl".to_string(), Value::String(url.to_string()));
        self.stamp("pullRequestCreated");
    }

    /// Record review assignment; also stamps `reviewRequested`.
    pub fn set_review_info(&mut self, reviewer: &str, status: &str) {
        self.git_data
            .insert("reviewer".to_string(), Value::String(reviewer.to_string()));
        self.git_data.insert(
            "reviewStatus".to_string(),
            Value::String(status.to_string()),
        );
        self.stamp("reviewRequested");
    }

    /// Append-only; raw messages are preserved for downstream reporting.
    pub fn add_error(&mut self, message: impl Into<String>, phase: &str) {
        self.errors.push(ContextNote {
            message: message.into(),
            phase: phase.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn add_warning(&mut self, message: impl Into<String>, phase: &str) {
        self.warnings.push(ContextNote {
            message: message.into(),
            phase: phase.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn errors(&self) -> &[ContextNote] {
        &self.errors
    }

    pub fn warnings(&self) -> &[ContextNote] {
        &self.warnings
    }

    /// First write wins; repeated calls leave `completed` untouched.
    pub fn mark_completed(&mut self) {
        if !self.timestamps.contains_key("completed") {
            self.stamp("completed");
        }
    }

    pub fn is_completed(&self) -> bool {
        self.timestamps.contains_key("completed")
    }

    /// `completed` (or now, while still running) minus `created`.
    pub fn get_duration(&self) -> chrono::Duration {
        let created = self
            .timestamps
            .get("created")
            .copied()
            .unwrap_or_else(Utc::now);
        let end = self
            .timestamps
            .get("completed")
            .copied()
            .unwrap_or_else(Utc::now);
        end - created
    }

    /// Checks the identity fields only; git data is populated progressively
    /// by later phases and is not validated here.
    pub fn validate(&self) -> ContextValidation {
        let mut missing = Vec::new();
        if self.task_id.trim().is_empty() {
            missing.push("taskId".to_string());
        }
        if self.project_path.trim().is_empty() {
            missing.push("projectPath".to_string());
        }
        ContextValidation {
            is_valid: missing.is_empty(),
            missing_fields: missing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskType;

    fn ctx() -> WorkflowContext {
        let task = Task::new("t-1", TaskType::Refactor, "Tidy up").with_project_path("/repo");
        WorkflowContext::new(&task, "/repo")
    }

    #[test]
    fn test_created_stamped_on_construction() {
        let ctx = ctx();
        assert!(ctx.timestamp("created").is_some());
    }

    #[test]
    fn test_set_get_has_delete() {
        let mut ctx = ctx();
        ctx.set("commitSha", Value::String("abc123".into()), Category::GitData);
        assert!(ctx.has("commitSha", Category::GitData));
        assert_eq!(ctx.get_str("commitSha", Category::GitData), Some("abc123"));
        assert!(!ctx.has("commitSha", Category::Metadata));

        let default = Value::String("none".into());
        assert_eq!(ctx.get("missing", Category::GitData, &default), &default);

        assert!(ctx.delete("commitSha", Category::GitData));
        assert!(!ctx.delete("commitSha", Category::GitData));
    }

    #[test]
    fn test_branch_info_dual_write() {
        let mut ctx = ctx();
        ctx.set_branch_info("refactor/tidy-up-t-1-123", "main");
        assert_eq!(
            ctx.get_str("branchName", Category::GitData),
            Some("refactor/tidy-up-t-1-123")
        );
        assert_eq!(ctx.get_str("baseBranch", Category::GitData), Some("main"));
        assert!(ctx.timestamp("branchCreated").is_some());
    }

    #[test]
    fn test_merge_info_dual_write() {
        let mut ctx = ctx();
        ctx.set_merge_info("refactor/x", "develop", "squash");
        assert_eq!(ctx.get_str("mergeTarget", Category::GitData), Some("develop"));
        assert!(ctx.timestamp("mergeCompleted").is_some());
    }

    #[test]
    fn test_clear_timestamp_removes_named_milestone() {
        let mut ctx = ctx();
        ctx.set_branch_info("b", "main");
        assert!(ctx.clear_timestamp("branchCreated"));
        assert!(ctx.timestamp("branchCreated").is_none());
        assert!(!ctx.clear_timestamp("branchCreated"));
        // Other milestones are untouched.
        assert!(ctx.timestamp("created").is_some());
    }

    #[test]
    fn test_mark_completed_is_first_write_wins() {
        let mut ctx = ctx();
        ctx.mark_completed();
        let first = ctx.timestamp("completed").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        ctx.mark_completed();
        assert_eq!(ctx.timestamp("completed").unwrap(), first);
    }

    #[test]
    fn test_duration_monotonic_while_running() {
        let ctx = ctx();
        let d1 = ctx.get_duration();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let d2 = ctx.get_duration();
        assert!(d2 >= d1);
    }

    #[test]
    fn test_duration_frozen_after_completion() {
        let mut ctx = ctx();
        ctx.mark_completed();
        let d1 = ctx.get_duration();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(ctx.get_duration(), d1);
    }

    #[test]
    fn test_timestamps_non_decreasing() {
        let mut ctx = ctx();
        ctx.set_branch_info("b", "main");
        ctx.set_merge_info("b", "main", "squash");
        ctx.mark_completed();
        let created = ctx.timestamp("created").unwrap();
        let branched = ctx.timestamp("branchCreated").unwrap();
        let merged = ctx.timestamp("mergeCompleted").unwrap();
        let completed = ctx.timestamp("completed").unwrap();
        assert!(created <= branched && branched <= merged && merged <= completed);
    }

    #[test]
    fn test_errors_append_only_with_phase() {
        let mut ctx = ctx();
        ctx.add_error("build exploded", "validation");
        ctx.add_error("still broken", "validation");
        ctx.add_warning("rollback: branch already gone", "rollback");
        assert_eq!(ctx.errors().len(), 2);
        assert_eq!(ctx.errors()[0].message, "build exploded");
        assert_eq!(ctx.errors()[1].phase, "validation");
        assert_eq!(ctx.warnings().len(), 1);
    }

    #[test]
    fn test_validate_checks_identity_fields() {
        let ctx = ctx();
        assert!(ctx.validate().is_valid);

        let task = Task::new("", TaskType::Generic, "x");
        let bad = WorkflowContext::new(&task, "");
        let v = bad.validate();
        assert!(!v.is_valid);
        assert_eq!(v.missing_fields, vec!["taskId", "projectPath"]);
    }
}
