//! SSH transport and bounded fan-out.
//!
//! The transport surface is deliberately narrow (node → argv → result)
//! so alternative dispatchers can slot in behind the same trait without
//! touching the resolver, attach, or dashboard layers. Remote nodes are
//! reached through the user's ssh client, which is expected to multiplex
//! over a pre-established control connection; the only knob this layer
//! turns is a strict connect timeout.

use crate::types::NodeResult;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tracing::debug;

/// The reserved node name that bypasses SSH entirely.
pub const LOCAL_NODE: &str = "local";

/// Default SSH connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Executes a command vector on a named node.
///
/// Implementations are total: every failure mode maps to a
/// [`NodeResult`] with a non-zero exit, never to an error.
pub trait Transport: Clone + Send + Sync + 'static {
    fn run_on_node(
        &self,
        node: &str,
        argv: &[String],
        timeout: Duration,
    ) -> impl Future<Output = NodeResult> + Send;
}

/// The production transport: local spawn or `ssh` with a connect
/// timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshTransport;

impl Transport for SshTransport {
    async fn run_on_node(&self, node: &str, argv: &[String], timeout: Duration) -> NodeResult {
        let Some((program, args)) = argv.split_first() else {
            return NodeResult::failure(node, "empty command vector");
        };

        debug!(node, command = %argv.join(" "), "dispatching");

        let mut cmd = if node == LOCAL_NODE {
            let mut cmd = tokio::process::Command::new(program);
            cmd.args(args);
            cmd
        } else {
            let mut cmd = tokio::process::Command::new("ssh");
            cmd.arg("-o")
                .arg(format!("ConnectTimeout={}", timeout.as_secs()))
                .arg(node)
                .arg(shell_join(argv));
            cmd
        };

        match cmd.output().await {
            Ok(output) => NodeResult {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                exit: output.status.code().unwrap_or(-1),
                node: node.to_string(),
            },
            Err(e) => NodeResult::failure(node, format!("failed to spawn {program}: {e}")),
        }
    }
}

/// Join an argv vector into a single shell-safe command string for the
/// remote side of an ssh invocation.
pub fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./_-".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

/// Cooperative cancellation handle for fan-out.
///
/// Cloned into every in-flight task; cancelling makes pending and
/// in-flight nodes resolve to [`NodeResult::cancelled`] while results
/// already reported stay valid.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when the token is cancelled; never resolves otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // All senders gone without a cancel: stay pending.
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Execute one command vector against many nodes concurrently.
///
/// At most `max_parallel` commands are in flight at any moment, gated
/// by a semaphore. The returned map is total over `nodes`: unreachable
/// nodes carry their transport failure, nodes pending or in flight at
/// cancellation carry a cancellation result.
pub async fn fan_out<T: Transport>(
    transport: &T,
    nodes: &[String],
    argv: &[String],
    max_parallel: usize,
    cancel: &CancelToken,
) -> HashMap<String, NodeResult> {
    let semaphore = Arc::new(Semaphore::new(max_parallel.max(1)));
    let mut handles = Vec::with_capacity(nodes.len());

    for node in nodes {
        let transport = transport.clone();
        let semaphore = Arc::clone(&semaphore);
        let cancel = cancel.clone();
        let argv = argv.to_vec();
        let key = node.clone();
        let node = node.clone();

        let handle = tokio::spawn(async move {
            let _permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return NodeResult::cancelled(node.as_str()),
                permit = semaphore.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return NodeResult::cancelled(node.as_str()),
                },
            };

            tokio::select! {
                _ = cancel.cancelled() => NodeResult::cancelled(node.as_str()),
                result = transport.run_on_node(&node, &argv, DEFAULT_CONNECT_TIMEOUT) => result,
            }
        });
        handles.push((key, handle));
    }

    let mut results = HashMap::with_capacity(nodes.len());
    for (node, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => NodeResult::failure(node.as_str(), format!("fan-out task failed: {e}")),
        };
        results.insert(node, result);
    }
    results
}
