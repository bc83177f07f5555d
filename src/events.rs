//! Lifecycle events
//!
//! The orchestrator and sequential executor publish named events to an
//! optional sink. Publishing is best-effort: sink errors are logged and
//! never alter control flow.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum WorkflowEvent {
    #[serde(rename = "workflow.branch.created")]
    BranchCreated {
        task_id: String,
        branch: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "workflow.completed")]
    Completed {
        task_id: String,
        branch: String,
        success: bool,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "workflow.rolled_back")]
    RolledBack {
        task_id: String,
        branch: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "task.sequential.completed")]
    SequentialTaskCompleted {
        task_id: String,
        branch: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "task.sequential.failed")]
    SequentialTaskFailed {
        task_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl WorkflowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BranchCreated { .. } => "workflow.branch.created",
            Self::Completed { .. } => "workflow.completed",
            Self::RolledBack { .. } => "workflow.rolled_back",
            Self::SequentialTaskCompleted { .. } => "task.sequential.completed",
            Self::SequentialTaskFailed { .. } => "task.sequential.failed",
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: WorkflowEvent) -> anyhow::Result<()>;
}

/// Default sink: logs at debug and drops the event
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn publish(&self, event: WorkflowEvent) -> anyhow::Result<()> {
        debug!(event = event.name(), "workflow event (no sink attached)");
        Ok(())
    }
}

/// In-memory sink for tests and simple consumers
pub struct RecordingEventSink {
    events: tokio::sync::Mutex<Vec<WorkflowEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self {
            events: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub async fn recorded(&self) -> Vec<WorkflowEvent> {
        self.events.lock().await.clone()
    }

    pub async fn names(&self) -> Vec<&'static str> {
        self.events.lock().await.iter().map(|e| e.name()).collect()
    }
}

impl Default for RecordingEventSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn publish(&self, event: WorkflowEvent) -> anyhow::Result<()> {
        self.events.lock().await.push(event);
        Ok(())
    }
}
