//! Task snapshot consumed by the workflow engine
//!
//! Tasks are owned by an external store; the engine reads them and never
//! writes back. The only hard precondition is a resolvable project path.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use crate::error::{Result, WorkflowError};

/// Closed set of workflow categories driving strategy and pipeline selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    Refactor,
    Feature,
    Bugfix,
    Hotfix,
    Analysis,
    Testing,
    Documentation,
    Debug,
    Optimization,
    CodeReview,
    Generic,
}

impl TaskType {
    /// All known task types, in table order
    pub const ALL: [TaskType; 11] = [
        TaskType::Refactor,
        TaskType::Feature,
        TaskType::Bugfix,
        TaskType::Hotfix,
        TaskType::Analysis,
        TaskType::Testing,
        TaskType::Documentation,
        TaskType::Debug,
        TaskType::Optimization,
        TaskType::CodeReview,
        TaskType::Generic,
    ];

    /// Parse a task type string, mapping anything unknown to `Generic`
    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "refactor" | "refactoring" => Self::Refactor,
            "feature" => Self::Feature,
            "bug" | "bugfix" => Self::Bugfix,
            "hotfix" => Self::Hotfix,
            "analysis" => Self::Analysis,
            "test" | "testing" => Self::Testing,
            "documentation" | "docs" => Self::Documentation,
            "debug" => Self::Debug,
            "optimization" | "optimize" => Self::Optimization,
            "review" | "code-review" => Self::CodeReview,
            _ => Self::Generic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refactor => "refactor",
            Self::Feature => "feature",
            Self::Bugfix => "bugfix",
            Self::Hotfix => "hotfix",
            Self::Analysis => "analysis",
            Self::Testing => "testing",
            Self::Documentation => "documentation",
            Self::Debug => "debug",
            Self::Optimization => "optimization",
            Self::CodeReview => "code-review",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only task record handed to the engine by the application layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Free-form metadata bag; `projectPath` is required, `filePath` optional
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Task {
    pub fn new(id: impl Into<String>, task_type: TaskType, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_type,
            title: title.into(),
            description: String::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_project_path(mut self, path: impl Into<String>) -> Self {
        self.metadata
            .insert("projectPath".to_string(), Value::String(path.into()));
        self
    }

    /// Resolve the project path. Absence is a fatal precondition failure,
    /// never a retryable error.
    pub fn project_path(&self) -> Result<&str> {
        self.metadata
            .get("projectPath")
            .and_then(Value::as_str)
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                WorkflowError::precondition(format!(
                    "task {} has no resolvable projectPath",
                    self.id
                ))
            })
    }

    pub fn file_path(&self) -> Option<&str> {
        self.metadata.get("filePath").and_then(Value::as_str)
    }
}
