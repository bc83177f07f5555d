//! # Branchflow
//!
//! Workflow orchestration and git branch-strategy engine for AI-assisted
//! development pipelines. The library maps each task type to a branching
//! policy, drives the type-specific step pipeline through an automation
//! channel with a retry-with-feedback validation loop, and completes with a
//! commit/push/merge or rolls back to the captured rollback point. A
//! sequential executor chains multiple tasks through a shared integration
//! branch.
//!
//! ## Modules
//!
//! - `abstractions` - Trait-based seams for external collaborators (git,
//!   automation channel, validation gate)
//! - `strategy` - Pure task-type to branch-strategy resolution
//! - `branch` - Branch name generation and sanitization
//! - `context` - Per-workflow mutable execution context
//! - `retry` - Retry-with-feedback validation loop
//! - `pipeline` - Step descriptors and the workflow dispatcher
//! - `orchestrator` - Top-level workflow coordinator
//! - `sequential` - Sequential multi-task pipeline executor
//! - `events` - Lifecycle events and sinks

pub mod abstractions;
pub mod branch;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod pipeline;
pub mod retry;
pub mod sequential;
pub mod strategy;
pub mod task;

pub use branch::BranchNameGenerator;
pub use config::{SequentialOptions, WorkflowOptions};
pub use context::WorkflowContext;
pub use error::{Result, WorkflowError};
pub use orchestrator::{WorkflowOrchestrator, WorkflowResult};
pub use pipeline::{CancellationFlag, WorkflowDispatcher};
pub use retry::{RetryAttempt, RetryOutcome, RetryValidationLoop};
pub use sequential::{PipelineRunSummary, SequentialPipelineExecutor, TaskRun};
pub use strategy::{BranchStrategy, BranchStrategyResolver, ProtectionLevel, StrategyOverrides};
pub use task::{Task, TaskType};
