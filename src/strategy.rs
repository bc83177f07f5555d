//! Branch strategy resolution
//!
//! Maps a task type to its branching policy: prefix, start point, protection
//! level, merge target, review and auto-merge flags. Resolution is a pure
//! table lookup with no I/O, so the full mapping is unit-testable.

use serde::{Deserialize, Serialize};

use crate::task::TaskType;

/// Qualitative policy governing review requirements and deletion permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Immutable branching policy resolved from a task type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchStrategy {
    pub task_type: TaskType,
    pub branch_prefix: String,
    pub start_point: String,
    pub protection_level: ProtectionLevel,
    pub auto_merge: bool,
    pub requires_review: bool,
    pub merge_target: String,
}

/// Caller-supplied adjustments. Overrides may replace the start point or
/// merge target and may force auto-merge off; they can never weaken the
/// type's protection level or review requirement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyOverrides {
    #[serde(default)]
    pub start_point: Option<String>,
    #[serde(default)]
    pub merge_target: Option<String>,
    #[serde(default)]
    pub disable_auto_merge: bool,
}

pub struct BranchStrategyResolver;

struct StrategyRow {
    prefix: &'static str,
    start: &'static str,
    protection: ProtectionLevel,
    review: bool,
    auto_merge: bool,
    target: &'static str,
}

const fn row(
    prefix: &'static str,
    start: &'static str,
    protection: ProtectionLevel,
    review: bool,
    auto_merge: bool,
    target: &'static str,
) -> StrategyRow {
    StrategyRow {
        prefix,
        start,
        protection,
        review,
        auto_merge,
        target,
    }
}

/// Unknown task types resolve through the `Generic` row.
fn base_row(task_type: TaskType) -> StrategyRow {
    use ProtectionLevel::*;
    match task_type {
        TaskType::Refactor => row("refactor", "main", Medium, true, false, "develop"),
        TaskType::Feature => row("feature", "develop", Medium, true, false, "develop"),
        TaskType::Bugfix => row("bugfix", "main", High, true, false, "main"),
        TaskType::Hotfix => row("hotfix", "main", Critical, true, false, "main"),
        TaskType::Analysis => row("analysis", "main", Low, false, true, "develop"),
        TaskType::Testing => row("test", "develop", Low, false, true, "develop"),
        TaskType::Documentation => row("docs", "main", Low, false, true, "develop"),
        TaskType::Debug => row("debug", "main", Medium, true, false, "develop"),
        TaskType::Optimization => row("optimize", "main", Medium, true, false, "develop"),
        TaskType::CodeReview => row("review", "main", Low, false, false, "develop"),
        TaskType::Generic => row("task", "main", Medium, true, false, "main"),
    }
}

impl BranchStrategyResolver {
    /// Resolve the branching policy for a task type. Deterministic: the same
    /// type and overrides always yield a structurally equal strategy.
    pub fn resolve(task_type: TaskType, overrides: Option<&StrategyOverrides>) -> BranchStrategy {
        let base = base_row(task_type);

        let mut strategy = BranchStrategy {
            task_type,
            branch_prefix: base.prefix.to_string(),
            start_point: base.start.to_string(),
            protection_level: base.protection,
            auto_merge: base.auto_merge,
            requires_review: base.review,
            merge_target: base.target.to_string(),
        };

        if let Some(ov) = overrides {
            if let Some(start) = &ov.start_point {
                strategy.start_point = start.clone();
            }
            if let Some(target) = &ov.merge_target {
                strategy.merge_target = target.clone();
            }
            if ov.disable_auto_merge {
                strategy.auto_merge = false;
            }
        }

        // Critical protection always goes through review.
        if strategy.protection_level == ProtectionLevel::Critical {
            strategy.requires_review = true;
        }

        strategy
    }
}
