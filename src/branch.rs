//! Branch name generation
//!
//! Names are `{prefix}/{slug}-{task_id}-{unix_millis}`. Uniqueness is
//! probabilistic via the timestamp suffix; callers needing a hard guarantee
//! must fall back to a collision check against the VCS.

use chrono::Utc;

use crate::strategy::BranchStrategy;
use crate::task::Task;

const MAX_SLUG_LEN: usize = 30;
const EMPTY_SLUG_PLACEHOLDER: &str = "task";

pub struct BranchNameGenerator;

impl BranchNameGenerator {
    pub fn generate(task: &Task, strategy: &BranchStrategy) -> String {
        Self::generate_at(task, strategy, Utc::now().timestamp_millis())
    }

    /// Timestamp injected for deterministic tests.
    pub fn generate_at(task: &Task, strategy: &BranchStrategy, timestamp_millis: i64) -> String {
        let slug = sanitize_segment(&task.title, MAX_SLUG_LEN);
        let id = sanitize_segment(&task.id, usize::MAX);
        format!(
            "{}/{}-{}-{}",
            strategy.branch_prefix, slug, id, timestamp_millis
        )
    }
}

/// Lowercase, strip everything outside `[a-z0-9\s-]`, collapse whitespace
/// runs to single hyphens, truncate, and fall back to a placeholder rather
/// than yielding an empty segment.
fn sanitize_segment(input: &str, max_len: usize) -> String {
    let lowered = input.to_lowercase();
    let filtered: String = lowered
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace() || *c == '-')
        .collect();

    let mut slug = String::new();
    for word in filtered.split_whitespace() {
        if !slug.is_empty() {
            slug.push('-');
        }
        slug.push_str(word);
    }

    if slug.len() > max_len {
        slug.truncate(max_len);
    }
    let slug = slug.trim_matches('-').to_string();

    if slug.is_empty() {
        EMPTY_SLUG_PLACEHOLDER.to_string()
    } else {
        slug
    }
}
