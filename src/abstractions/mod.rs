//! Abstraction layers for external collaborators
//!
//! Trait-based seams for the version-control commands, the AI automation
//! channel, and the build/test validation gate, each with a real
//! implementation and a scripted mock for tests.

pub mod automation;
pub mod git;
pub mod validation;

pub use automation::{AutomationChannel, MockAutomationChannel};
pub use git::{GitOperations, MergeOptions, MockGitOperations, RealGitOperations};
pub use validation::{
    CommandValidationRunner, MockValidationRunner, ValidationOutcome, ValidationRunner,
};
