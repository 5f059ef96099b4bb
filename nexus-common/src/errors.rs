//! Error taxonomy for nx.
//!
//! Three propagation tiers with distinct exit codes:
//!
//! | Code | Category  | Examples                                        |
//! |------|-----------|-------------------------------------------------|
//! | 1    | User      | not-found, ambiguous, unknown node, missing dep |
//! | 1    | Node      | a required single-node command failed           |
//! | 2    | Protocol  | session record format violation                 |
//! | 2    | Internal  | anything else                                   |
//!
//! Transport and fan-out never raise at all: node-level failures are
//! folded into [`crate::types::NodeResult`] values. Only the resolver
//! and the command layer use these raised errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NxError {
    /// No session matched the given name on any reachable node.
    #[error("{0}")]
    SessionNotFound(String),

    /// Multiple sessions matched and disambiguation was not possible.
    #[error("{0}")]
    AmbiguousSession(String),

    /// The named node is not part of the fleet.
    #[error("Unknown node '{0}'.")]
    UnknownNode(String),

    /// A required external tool is not on PATH.
    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    /// The multiplexer rejected a session name already in use.
    #[error("Session '{name}' already exists on {node}.")]
    DuplicateSession { name: String, node: String },

    /// A required single-node command returned a non-zero exit.
    #[error("{0}")]
    NodeCommandFailed(String),

    /// Configuration could not be loaded or persisted.
    #[error("configuration error: {0}")]
    Config(String),

    /// The multiplexer violated the pinned record contract. The raw
    /// offending line is carried so implementers can debug.
    #[error("malformed session record ({reason}): {line:?}")]
    FormatParse { line: String, reason: String },

    #[error("{0}")]
    Internal(String),
}

impl NxError {
    /// Process exit code for this error: 1 for user errors, 2 for
    /// protocol and internal errors.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::SessionNotFound(_)
            | Self::AmbiguousSession(_)
            | Self::UnknownNode(_)
            | Self::MissingDependency(_)
            | Self::DuplicateSession { .. }
            | Self::NodeCommandFailed(_)
            | Self::Config(_) => 1,
            Self::FormatParse { .. } | Self::Internal(_) => 2,
        }
    }
}
