//! Sequential multi-task pipeline scenarios

use std::sync::Arc;
use std::time::Duration;

use branchflow::abstractions::{MockAutomationChannel, MockGitOperations};
use branchflow::events::RecordingEventSink;
use branchflow::{SequentialOptions, SequentialPipelineExecutor, Task, TaskType};

fn fast_options() -> SequentialOptions {
    SequentialOptions {
        completion_timeout: Duration::from_millis(40),
        poll_interval: Duration::from_millis(5),
        settle_delay: Duration::from_millis(1),
        ..Default::default()
    }
}

fn task(id: &str, title: &str) -> Task {
    Task::new(id, TaskType::Feature, title).with_project_path("/repo")
}

#[tokio::test]
async fn three_tasks_with_middle_timeout_continue_on_error() {
    let git = Arc::new(MockGitOperations::new());
    let automation = Arc::new(MockAutomationChannel::new());
    automation
        .queue_poll_output_for("session-1", Some("done"))
        .await;
    // session-2 stays silent and times out.
    automation.queue_poll_output_for("session-2", None).await;
    automation
        .queue_poll_output_for("session-3", Some("completed"))
        .await;
    let events = Arc::new(RecordingEventSink::new());

    let executor = SequentialPipelineExecutor::new(git, automation)
        .with_event_sink(events.clone());
    let tasks = [
        task("1", "First"),
        task("2", "Second"),
        task("3", "Third"),
    ];

    let summary = executor
        .run_sequential(&tasks, &fast_options())
        .await
        .unwrap();

    // All three tasks were attempted, in input order.
    assert_eq!(summary.total, 3);
    assert_eq!(summary.entries.len(), 3);
    assert_eq!(summary.entries[0].task_id, "1");
    assert_eq!(summary.entries[1].task_id, "2");
    assert_eq!(summary.entries[2].task_id, "3");

    assert!(summary.entries[0].success);
    assert!(!summary.entries[1].success);
    assert!(summary.entries[1]
        .error
        .as_deref()
        .unwrap()
        .contains("timed out"));
    assert!(summary.entries[2].success);

    assert_eq!(summary.successful, 2);
    assert_eq!(summary.failed, 1);
    assert!(!summary.success);

    // The timed-out entry keeps the branch it was checked out on.
    assert_eq!(
        summary.entries[1].branch_name,
        summary.entries[0].next_branch.as_deref().unwrap()
    );

    let names = events.names().await;
    assert_eq!(
        names,
        vec![
            "task.sequential.completed",
            "task.sequential.failed",
            "task.sequential.completed"
        ]
    );
}

#[tokio::test]
async fn every_successful_task_merges_into_the_integration_branch() {
    let git = Arc::new(MockGitOperations::new());
    let automation = Arc::new(MockAutomationChannel::new());
    automation
        .queue_poll_output_for("session-1", Some("done"))
        .await;
    automation
        .queue_poll_output_for("session-2", Some("done"))
        .await;

    let executor = SequentialPipelineExecutor::new(git.clone(), automation);
    let summary = executor
        .run_sequential(&[task("1", "One"), task("2", "Two")], &fast_options())
        .await
        .unwrap();

    assert!(summary.success);
    for entry in &summary.entries {
        assert_eq!(entry.merge_result.as_deref(), Some("agent"));
    }
    // Two merges, each preceded by a checkout of the integration branch.
    assert_eq!(git.calls_for("merge_branch").await.len(), 2);
    let checkouts = git.calls_for("checkout_branch").await;
    assert!(checkouts.iter().filter(|c| c[1] == "agent").count() >= 2);
}

#[tokio::test]
async fn next_task_branch_is_pre_created_after_each_merge() {
    let git = Arc::new(MockGitOperations::new());
    let automation = Arc::new(MockAutomationChannel::new());
    automation
        .queue_poll_output_for("session-1", Some("done"))
        .await;
    automation
        .queue_poll_output_for("session-2", Some("done"))
        .await;

    let executor = SequentialPipelineExecutor::new(git.clone(), automation);
    let summary = executor
        .run_sequential(&[task("1", "One"), task("2", "Two")], &fast_options())
        .await
        .unwrap();

    let first = &summary.entries[0];
    let second = &summary.entries[1];
    assert_eq!(
        first.next_branch.as_deref(),
        Some(second.branch_name.as_str())
    );
    assert!(second.next_branch.is_none());

    // Task 2's branch was created exactly once, during task 1's turn.
    let creates = git.calls_for("create_branch").await;
    assert_eq!(creates.len(), 2);
}

#[tokio::test]
async fn fail_fast_stops_after_first_failure() {
    let git = Arc::new(MockGitOperations::new());
    let automation = Arc::new(MockAutomationChannel::new());
    // Silence everywhere: task 1 times out.
    automation.queue_poll_output_for("session-1", None).await;

    let executor = SequentialPipelineExecutor::new(git, automation.clone());
    let mut options = fast_options();
    options.fail_fast = true;

    let summary = executor
        .run_sequential(
            &[task("1", "One"), task("2", "Two"), task("3", "Three")],
            &options,
        )
        .await
        .unwrap();

    assert_eq!(summary.entries.len(), 1);
    assert!(!summary.success);
    // Tasks 2 and 3 never opened a session.
    assert_eq!(automation.session_count().await, 1);
}

#[tokio::test]
async fn custom_integration_branch_is_used_everywhere() {
    let git = Arc::new(MockGitOperations::new());
    let automation = Arc::new(MockAutomationChannel::new());
    automation
        .queue_poll_output_for("session-1", Some("done"))
        .await;

    let executor = SequentialPipelineExecutor::new(git.clone(), automation);
    let mut options = fast_options();
    options.integration_branch = "integration".to_string();

    let summary = executor
        .run_sequential(&[task("1", "One")], &options)
        .await
        .unwrap();

    assert_eq!(
        summary.entries[0].merge_result.as_deref(),
        Some("integration")
    );
    let creates = git.calls_for("create_branch").await;
    assert_eq!(creates[0][2], "integration");
}
