//! Core data carriers shared across nx components.

use serde::{Deserialize, Serialize};

/// Outcome of executing a command on a node.
///
/// Always a value, never an error: transport-level failures (connect
/// timeout, unreachable host, spawn error) are folded into a non-zero
/// exit with an explanatory stderr so that fan-out stays total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeResult {
    /// Standard output from the command.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
    /// Exit code of the command (non-zero for transport failures).
    pub exit: i32,
    /// The node the command was executed on.
    pub node: String,
}

impl NodeResult {
    pub fn success(&self) -> bool {
        self.exit == 0
    }

    /// A transport-level failure folded into a result value.
    pub fn failure(node: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit: 1,
            node: node.into(),
        }
    }

    /// The result a pending or in-flight node receives when fan-out is
    /// interrupted before its command completed.
    pub fn cancelled(node: impl Into<String>) -> Self {
        Self::failure(node, "cancelled by user interrupt")
    }
}

/// A qualified session identity: one session on one node.
///
/// The canonical textual form is `node/session`. Session names cannot
/// contain `/` (tmux rejects them), but parsing still splits on the
/// first `/` only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    pub node: String,
    pub session: String,
}

impl Target {
    pub fn new(node: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            session: session.into(),
        }
    }

    /// Parse a qualified `node/session` name. Names without a `/` are
    /// unqualified and return `None`; resolving those requires a fleet
    /// query.
    pub fn parse(name: &str) -> Option<Self> {
        let (node, session) = name.split_once('/')?;
        Some(Self::new(node, session))
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.node, self.session)
    }
}

/// One parsed session record from the tmux `list-sessions` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session name, locally unique on its node.
    pub name: String,
    /// Number of windows in the session.
    pub windows: u32,
    /// Number of attached clients.
    pub attached: u32,
    /// Current working directory of the active pane.
    pub pane_path: String,
    /// Foreground command in the active pane.
    pub pane_cmd: String,
    /// PID of the active pane's process.
    pub pane_pid: u32,
    /// Whether the pane process has exited.
    pub is_dead: bool,
    /// Exit code of the pane process; present iff `is_dead`.
    pub exit_status: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_parse_qualified() {
        let target = Target::parse("dev/api").unwrap();
        assert_eq!(target.node, "dev");
        assert_eq!(target.session, "api");
    }

    #[test]
    fn test_target_parse_splits_on_first_slash() {
        let target = Target::parse("dev/api/extra").unwrap();
        assert_eq!(target.node, "dev");
        assert_eq!(target.session, "api/extra");
    }

    #[test]
    fn test_target_parse_bare_name() {
        assert_eq!(Target::parse("api"), None);
    }

    #[test]
    fn test_target_display_canonical_form() {
        assert_eq!(Target::new("gpu", "train").to_string(), "gpu/train");
    }

    #[test]
    fn test_node_result_failure_is_nonzero() {
        let result = NodeResult::failure("dev", "connect timeout");
        assert!(!result.success());
        assert_eq!(result.node, "dev");
        assert_eq!(result.stderr, "connect timeout");
    }

    #[test]
    fn test_node_result_cancelled() {
        let result = NodeResult::cancelled("gpu");
        assert!(!result.success());
        assert!(result.stderr.contains("cancelled"));
    }
}
