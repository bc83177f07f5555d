//! Git operations abstraction layer
//!
//! Provides trait-based abstraction for the branch-level git commands the
//! orchestration engine needs, to enable testing without an actual
//! repository. Every call is fallible; failures are wrapped with the
//! operation description.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::strategy::ProtectionLevel;

/// Merge behavior for `merge_branch`
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    /// Merge strategy name ("squash", "merge", "rebase")
    pub strategy: Option<String>,
    /// Force a merge commit even when fast-forward is possible
    pub no_ff: bool,
}

/// Trait for version-control operations
#[async_trait]
pub trait GitOperations: Send + Sync {
    /// Create a branch, optionally rooted at a start point
    async fn create_branch(&self, path: &Path, name: &str, start_point: Option<&str>)
        -> Result<()>;

    /// Switch to an existing branch
    async fn checkout_branch(&self, path: &Path, name: &str) -> Result<()>;

    /// Stage the given paths ("." stages everything)
    async fn add_files(&self, path: &Path, files: &[&str]) -> Result<()>;

    /// Create a commit from staged changes
    async fn commit_changes(&self, path: &Path, message: &str) -> Result<()>;

    /// Push a branch, optionally setting its upstream
    async fn push_changes(&self, path: &Path, branch: &str, set_upstream: bool) -> Result<()>;

    /// Merge a branch into the current one
    async fn merge_branch(&self, path: &Path, name: &str, options: &MergeOptions) -> Result<()>;

    /// Delete a local branch
    async fn delete_branch(&self, path: &Path, name: &str) -> Result<()>;

    /// Hard-reset the working tree to a specific commit
    async fn reset_to_commit(&self, path: &Path, commit: &str) -> Result<()>;

    /// Resolve the current HEAD commit SHA
    async fn current_commit(&self, path: &Path) -> Result<String>;

    /// Name of the currently checked-out branch
    async fn current_branch(&self, path: &Path) -> Result<String>;

    /// Apply a protection policy to a branch
    async fn set_branch_protection(
        &self,
        path: &Path,
        name: &str,
        level: ProtectionLevel,
    ) -> Result<()>;
}

/// Real implementation shelling out to `git`
pub struct RealGitOperations {
    /// Serializes git invocations; concurrent index access corrupts state
    git_mutex: Arc<Mutex<()>>,
}

impl RealGitOperations {
    pub fn new() -> Self {
        Self {
            git_mutex: Arc::new(Mutex::new(())),
        }
    }

    async fn git_command(
        &self,
        path: &Path,
        args: &[&str],
        description: &str,
    ) -> Result<std::process::Output> {
        let _guard = self.git_mutex.lock().await;

        let output = tokio::process::Command::new("git")
            .current_dir(path)
            .args(args)
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to execute git {}: {}", description, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow::anyhow!(
                "Git {} failed: {}",
                description,
                stderr.trim()
            ));
        }

        Ok(output)
    }
}

impl Default for RealGitOperations {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GitOperations for RealGitOperations {
    async fn create_branch(
        &self,
        path: &Path,
        name: &str,
        start_point: Option<&str>,
    ) -> Result<()> {
        let mut args = vec!["checkout", "-b", name];
        if let Some(start) = start_point {
            args.push(start);
        }
        self.git_command(path, &args, "create branch").await?;
        Ok(())
    }

    async fn checkout_branch(&self, path: &Path, name: &str) -> Result<()> {
        self.git_command(path, &["checkout", name], "checkout")
            .await?;
        Ok(())
    }

    async fn add_files(&self, path: &Path, files: &[&str]) -> Result<()> {
        let mut args = vec!["add"];
        args.extend_from_slice(files);
        self.git_command(path, &args, "add").await?;
        Ok(())
    }

    async fn commit_changes(&self, path: &Path, message: &str) -> Result<()> {
        self.git_command(path, &["commit", "-m", message], "commit")
            .await?;
        Ok(())
    }

    async fn push_changes(&self, path: &Path, branch: &str, set_upstream: bool) -> Result<()> {
        let args: Vec<&str> = if set_upstream {
            vec!["push", "--set-upstream", "origin", branch]
        } else {
            vec!["push", "origin", branch]
        };
        self.git_command(path, &args, "push").await?;
        Ok(())
    }

    async fn merge_branch(&self, path: &Path, name: &str, options: &MergeOptions) -> Result<()> {
        if options.strategy.as_deref() == Some("squash") {
            // A squash merge only stages; the commit is part of the operation.
            self.git_command(path, &["merge", "--squash", name], "merge")
                .await?;
            let message = format!("squash merge of {name}");
            self.git_command(path, &["commit", "-m", &message], "merge commit")
                .await?;
            return Ok(());
        }
        let mut args = vec!["merge"];
        if options.no_ff {
            args.push("--no-ff");
        }
        args.push(name);
        self.git_command(path, &args, "merge").await?;
        Ok(())
    }

    async fn delete_branch(&self, path: &Path, name: &str) -> Result<()> {
        self.git_command(path, &["branch", "-D", name], "delete branch")
            .await?;
        Ok(())
    }

    async fn reset_to_commit(&self, path: &Path, commit: &str) -> Result<()> {
        self.git_command(path, &["reset", "--hard", commit], "reset")
            .await?;
        Ok(())
    }

    async fn current_commit(&self, path: &Path) -> Result<String> {
        let output = self
            .git_command(path, &["rev-parse", "HEAD"], "rev-parse HEAD")
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn current_branch(&self, path: &Path) -> Result<String> {
        let output = self
            .git_command(path, &["rev-parse", "--abbrev-ref", "HEAD"], "current branch")
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn set_branch_protection(
        &self,
        path: &Path,
        name: &str,
        level: ProtectionLevel,
    ) -> Result<()> {
        // Core git has no protection primitive; hosted-platform
        // implementations of this trait enforce it.
        let _ = path;
        info!(branch = name, ?level, "branch protection requested");
        Ok(())
    }
}

/// Mock implementation with scripted responses and call recording
pub struct MockGitOperations {
    /// Scripted results, consumed front-to-back by every trait call
    responses: Arc<Mutex<Vec<Result<String>>>>,
    /// Recorded calls: operation name plus arguments
    calls: Arc<Mutex<Vec<Vec<String>>>>,
    /// Operation names that should fail regardless of scripted responses
    failing_ops: Arc<Mutex<Vec<String>>>,
}

impl MockGitOperations {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            failing_ops: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn add_success(&self, stdout: &str) {
        self.responses.lock().await.push(Ok(stdout.to_string()));
    }

    pub async fn add_error(&self, message: &str) {
        let msg = message.to_string();
        self.responses.lock().await.push(Err(anyhow::anyhow!(msg)));
    }

    /// Make every call to the named operation fail
    pub async fn fail_operation(&self, op: &str) {
        self.failing_ops.lock().await.push(op.to_string());
    }

    pub async fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().await.clone()
    }

    /// Recorded calls for one operation name
    pub async fn calls_for(&self, op: &str) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.first().map(String::as_str) == Some(op))
            .cloned()
            .collect()
    }

    async fn invoke(&self, op: &str, args: &[&str]) -> Result<String> {
        let mut call = vec![op.to_string()];
        call.extend(args.iter().map(|s| s.to_string()));
        self.calls.lock().await.push(call);

        if self.failing_ops.lock().await.iter().any(|f| f == op) {
            return Err(anyhow::anyhow!("mock: {} configured to fail", op));
        }

        let mut responses = self.responses.lock().await;
        if responses.is_empty() {
            // Unscripted calls succeed with empty output
            return Ok(String::new());
        }
        responses.remove(0)
    }
}

impl Default for MockGitOperations {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GitOperations for MockGitOperations {
    async fn create_branch(
        &self,
        _path: &Path,
        name: &str,
        start_point: Option<&str>,
    ) -> Result<()> {
        self.invoke("create_branch", &[name, start_point.unwrap_or("")])
            .await?;
        Ok(())
    }

    async fn checkout_branch(&self, _path: &Path, name: &str) -> Result<()> {
        self.invoke("checkout_branch", &[name]).await?;
        Ok(())
    }

    async fn add_files(&self, _path: &Path, files: &[&str]) -> Result<()> {
        self.invoke("add_files", files).await?;
        Ok(())
    }

    async fn commit_changes(&self, _path: &Path, message: &str) -> Result<()> {
        self.invoke("commit_changes", &[message]).await?;
        Ok(())
    }

    async fn push_changes(&self, _path: &Path, branch: &str, set_upstream: bool) -> Result<()> {
        let upstream = if set_upstream { "upstream" } else { "" };
        self.invoke("push_changes", &[branch, upstream]).await?;
        Ok(())
    }

    async fn merge_branch(&self, _path: &Path, name: &str, options: &MergeOptions) -> Result<()> {
        let strategy = options.strategy.clone().unwrap_or_default();
        self.invoke("merge_branch", &[name, &strategy]).await?;
        Ok(())
    }

    async fn delete_branch(&self, _path: &Path, name: &str) -> Result<()> {
        self.invoke("delete_branch", &[name]).await?;
        Ok(())
    }

    async fn reset_to_commit(&self, _path: &Path, commit: &str) -> Result<()> {
        self.invoke("reset_to_commit", &[commit]).await?;
        Ok(())
    }

    async fn current_commit(&self, _path: &Path) -> Result<String> {
        let out = self.invoke("current_commit", &[]).await?;
        if out.is_empty() {
            Ok("deadbeef".to_string())
        } else {
            Ok(out)
        }
    }

    async fn current_branch(&self, _path: &Path) -> Result<String> {
        let out = self.invoke("current_branch", &[]).await?;
        if out.is_empty() {
            Ok("main".to_string())
        } else {
            Ok(out)
        }
    }

    async fn set_branch_protection(
        &self,
        _path: &Path,
        name: &str,
        level: ProtectionLevel,
    ) -> Result<()> {
        self.invoke("set_branch_protection", &[name, &format!("{level:?}")])
            .await?;
        Ok(())
    }
}
