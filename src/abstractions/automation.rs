//! AI automation channel abstraction
//!
//! The engine never talks to a model directly; it drives a channel that can
//! open sessions, send prompts, and expose the latest output for polling.
//! A session is reset once per task before any edits, never mid-task.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Trait for the AI/IDE automation collaborator
#[async_trait]
pub trait AutomationChannel: Send + Sync {
    /// Open a fresh session and return its id
    async fn start_session(&self) -> Result<String>;

    /// Send a prompt and await the response
    async fn send_message(&self, session_id: &str, prompt: &str) -> Result<String>;

    /// Fire-and-forget instruction; completion is observed via `poll_output`
    async fn send_instruction(&self, session_id: &str, prompt: &str) -> Result<()>;

    /// Latest output text for the session, if any has arrived
    async fn poll_output(&self, session_id: &str) -> Result<Option<String>>;
}

/// Scripted mock channel for tests
pub struct MockAutomationChannel {
    /// Responses consumed by `send_message`, front to back
    message_responses: Arc<Mutex<VecDeque<String>>>,
    /// Outputs consumed by `poll_output`; `None` entries simulate silence
    poll_outputs: Arc<Mutex<VecDeque<Option<String>>>>,
    /// Per-session output scripts, consulted before the shared queue. A
    /// session with an exhausted script stays silent forever.
    session_outputs: Arc<Mutex<HashMap<String, VecDeque<Option<String>>>>>,
    /// Prompts observed by either send variant, in order
    sent_prompts: Arc<Mutex<Vec<String>>>,
    sessions_started: Arc<Mutex<u32>>,
}

impl MockAutomationChannel {
    pub fn new() -> Self {
        Self {
            message_responses: Arc::new(Mutex::new(VecDeque::new())),
            poll_outputs: Arc::new(Mutex::new(VecDeque::new())),
            session_outputs: Arc::new(Mutex::new(HashMap::new())),
            sent_prompts: Arc::new(Mutex::new(Vec::new())),
            sessions_started: Arc::new(Mutex::new(0)),
        }
    }

    pub async fn queue_response(&self, response: &str) {
        self.message_responses
            .lock()
            .await
            .push_back(response.to_string());
    }

    pub async fn queue_poll_output(&self, output: Option<&str>) {
        self.poll_outputs
            .lock()
            .await
            .push_back(output.map(str::to_string));
    }

    /// Script outputs for one session id; sessions are numbered
    /// "session-1", "session-2", ... in start order
    pub async fn queue_poll_output_for(&self, session_id: &str, output: Option<&str>) {
        self.session_outputs
            .lock()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push_back(output.map(str::to_string));
    }

    pub async fn prompts(&self) -> Vec<String> {
        self.sent_prompts.lock().await.clone()
    }

    pub async fn session_count(&self) -> u32 {
        *self.sessions_started.lock().await
    }
}

impl Default for MockAutomationChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AutomationChannel for MockAutomationChannel {
    async fn start_session(&self) -> Result<String> {
        let mut count = self.sessions_started.lock().await;
        *count += 1;
        Ok(format!("session-{count}"))
    }

    async fn send_message(&self, _session_id: &str, prompt: &str) -> Result<String> {
        self.sent_prompts.lock().await.push(prompt.to_string());
        self.message_responses
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no scripted response for prompt"))
    }

    async fn send_instruction(&self, _session_id: &str, prompt: &str) -> Result<()> {
        self.sent_prompts.lock().await.push(prompt.to_string());
        Ok(())
    }

    async fn poll_output(&self, session_id: &str) -> Result<Option<String>> {
        let mut sessions = self.session_outputs.lock().await;
        if let Some(script) = sessions.get_mut(session_id) {
            return Ok(script.pop_front().flatten());
        }
        drop(sessions);
        Ok(self.poll_outputs.lock().await.pop_front().flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sessions_get_distinct_ids() {
        let mock = MockAutomationChannel::new();
        let a = mock.start_session().await.unwrap();
        let b = mock.start_session().await.unwrap();
        assert_ne!(a, b);
        assert_eq!(mock.session_count().await, 2);
    }

    #[tokio::test]
    async fn test_scripted_responses_consumed_in_order() {
        let mock = MockAutomationChannel::new();
        mock.queue_response("first").await;
        mock.queue_response("second").await;

        let s = mock.start_session().await.unwrap();
        assert_eq!(mock.send_message(&s, "p1").await.unwrap(), "first");
        assert_eq!(mock.send_message(&s, "p2").await.unwrap(), "second");
        assert!(mock.send_message(&s, "p3").await.is_err());
        assert_eq!(mock.prompts().await, vec!["p1", "p2", "p3"]);
    }

    #[tokio::test]
    async fn test_poll_output_silence_then_text() {
        let mock = MockAutomationChannel::new();
        mock.queue_poll_output(None).await;
        mock.queue_poll_output(Some("task completed")).await;

        let s = mock.start_session().await.unwrap();
        assert_eq!(mock.poll_output(&s).await.unwrap(), None);
        assert_eq!(
            mock.poll_output(&s).await.unwrap(),
            Some("task completed".to_string())
        );
    }
}
