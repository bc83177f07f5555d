use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Branch operation '{operation}' failed: {message}")]
    BranchOperation { operation: String, message: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Automation timed out for task {task_id} after {waited:?}")]
    AutomationTimeout { task_id: String, waited: Duration },

    #[error("Rollback failed: {0}")]
    Rollback(String),

    #[error("Workflow cancelled at step '{0}'")]
    Cancelled(String),

    #[error("Step '{step}' failed: {message}")]
    Step { step: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl WorkflowError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn branch_op(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BranchOperation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Fatal errors propagate immediately with no retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Precondition(_) | Self::BranchOperation { .. } | Self::Cancelled(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(WorkflowError::precondition("missing projectPath").is_fatal());
        assert!(WorkflowError::branch_op("create", "exists").is_fatal());
        assert!(!WorkflowError::Validation("build failed".into()).is_fatal());
        assert!(!WorkflowError::Rollback("reset failed".into()).is_fatal());
    }

    #[test]
    fn test_display_includes_operation() {
        let err = WorkflowError::branch_op("merge", "conflict in src/lib.rs");
        let msg = err.to_string();
        assert!(msg.contains("merge"));
        assert!(msg.contains("conflict"));
    }
}
