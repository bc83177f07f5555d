//! Engine configuration
//!
//! All timeouts and bounds are explicit configuration rather than constants
//! buried in control flow. Durations deserialize from humantime strings
//! ("300s", "5s").

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::strategy::StrategyOverrides;

/// Options for a single workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowOptions {
    /// Attempt budget for the retry-with-feedback validation loop
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Strategy adjustments applied on top of the task type's defaults
    #[serde(default)]
    pub overrides: StrategyOverrides,
    /// Ordered candidate validation commands; first success wins. When
    /// non-empty these take precedence over the injected validation runner.
    #[serde(default)]
    pub validation_commands: Vec<String>,
    /// Deadline for observing a completion marker in a pipeline step
    #[serde(default = "default_completion_timeout", with = "humantime_serde")]
    pub completion_timeout: Duration,
    /// Interval between automation output polls
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            overrides: StrategyOverrides::default(),
            validation_commands: Vec::new(),
            completion_timeout: default_completion_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

/// Options for sequential multi-task execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequentialOptions {
    /// Shared branch every completed task merges into
    #[serde(default = "default_integration_branch")]
    pub integration_branch: String,
    /// Deadline for observing a completion marker per task
    #[serde(default = "default_completion_timeout", with = "humantime_serde")]
    pub completion_timeout: Duration,
    /// Interval between automation output polls
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Pause after opening a fresh automation session
    #[serde(default = "default_settle_delay", with = "humantime_serde")]
    pub settle_delay: Duration,
    /// Halt the batch on the first task failure instead of continuing
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub overrides: StrategyOverrides,
}

impl Default for SequentialOptions {
    fn default() -> Self {
        Self {
            integration_branch: default_integration_branch(),
            completion_timeout: default_completion_timeout(),
            poll_interval: default_poll_interval(),
            settle_delay: default_settle_delay(),
            fail_fast: false,
            overrides: StrategyOverrides::default(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_integration_branch() -> String {
    "agent".to_string()
}

fn default_completion_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_settle_delay() -> Duration {
    Duration::from_secs(2)
}
