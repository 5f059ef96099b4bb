//! Mock transport for tests.
//!
//! Provides a scripted [`Transport`] so resolver, command, and fan-out
//! behavior can be exercised without SSH or a tmux server. Responses
//! are registered per node; unknown nodes answer with an empty
//! success. The mock also records every call and tracks the in-flight
//! high-water mark so bounded-parallelism claims can be asserted.

use crate::transport::Transport;
use crate::types::NodeResult;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
struct MockResponse {
    stdout: String,
    stderr: String,
    exit: i32,
}

#[derive(Debug, Default)]
struct Inner {
    responses: Mutex<HashMap<String, MockResponse>>,
    calls: Mutex<Vec<(String, Vec<String>)>>,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// A scripted transport. Cheap to clone; clones share the script and
/// the call log.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the response a node gives to any command.
    pub fn with_response(
        self,
        node: impl Into<String>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        exit: i32,
    ) -> Self {
        self.inner.responses.lock().unwrap().insert(
            node.into(),
            MockResponse {
                stdout: stdout.into(),
                stderr: stderr.into(),
                exit,
            },
        );
        self
    }

    /// Script a node as unreachable (ssh connect timeout).
    pub fn with_unreachable(self, node: impl Into<String>) -> Self {
        let node = node.into();
        let stderr = format!("ssh: connect to host {node} port 22: Connection timed out");
        self.with_response(node, "", stderr, 255)
    }

    /// Delay every call, to widen the concurrency window.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.inner.delay.lock().unwrap() = Some(delay);
        self
    }

    /// Every `(node, argv)` pair dispatched so far, in dispatch order.
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.inner.calls.lock().unwrap().clone()
    }

    /// Calls whose argv contained the given token.
    pub fn calls_containing(&self, token: &str) -> Vec<(String, Vec<String>)> {
        self.calls()
            .into_iter()
            .filter(|(_, argv)| argv.iter().any(|arg| arg == token))
            .collect()
    }

    /// Highest number of concurrently in-flight calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    async fn run_on_node(&self, node: &str, argv: &[String], _timeout: Duration) -> NodeResult {
        let delay = {
            let inner = &self.inner;
            inner
                .calls
                .lock()
                .unwrap()
                .push((node.to_string(), argv.to_vec()));

            let current = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            inner.max_in_flight.fetch_max(current, Ordering::SeqCst);

            *inner.delay.lock().unwrap()
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let response = self.inner.responses.lock().unwrap().get(node).cloned();
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);

        match response {
            Some(response) => NodeResult {
                stdout: response.stdout,
                stderr: response.stderr,
                exit: response.exit,
                node: node.to_string(),
            },
            None => NodeResult {
                stdout: String::new(),
                stderr: String::new(),
                exit: 0,
                node: node.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::DEFAULT_CONNECT_TIMEOUT;

    #[tokio::test]
    async fn test_scripted_response() {
        let transport = MockTransport::new().with_response("dev", "out", "err", 3);
        let result = transport
            .run_on_node("dev", &["x".to_string()], DEFAULT_CONNECT_TIMEOUT)
            .await;
        assert_eq!(result.stdout, "out");
        assert_eq!(result.stderr, "err");
        assert_eq!(result.exit, 3);
    }

    #[tokio::test]
    async fn test_unknown_node_defaults_to_empty_success() {
        let transport = MockTransport::new();
        let result = transport
            .run_on_node("mystery", &["x".to_string()], DEFAULT_CONNECT_TIMEOUT)
            .await;
        assert!(result.success());
        assert!(result.stdout.is_empty());
    }

    #[tokio::test]
    async fn test_call_log_records_dispatches() {
        let transport = MockTransport::new();
        let argv = vec!["tmux".to_string(), "kill-session".to_string()];
        transport.run_on_node("local", &argv, DEFAULT_CONNECT_TIMEOUT).await;

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "local");
        assert_eq!(calls[0].1, argv);
        assert_eq!(transport.calls_containing("kill-session").len(), 1);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let transport = MockTransport::new().with_unreachable("gpu");
        let clone = transport.clone();
        let result = clone
            .run_on_node("gpu", &["x".to_string()], DEFAULT_CONNECT_TIMEOUT)
            .await;
        assert_eq!(result.exit, 255);
        assert_eq!(transport.calls().len(), 1);
    }
}
