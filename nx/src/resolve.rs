//! Session resolution: from a name to a qualified `(node, session)`.
//!
//! Qualified names (`node/session`) split without touching the
//! network. Bare names fan the tmux `list-sessions` query out across
//! the fleet and branch on the match count: zero is not-found, one is
//! the answer, and a collision is disambiguated interactively through
//! fzf or rejected with the full match list when stdin is piped.

use nexus_common::{CancelToken, FleetConfig, NxError, Target, Transport, fan_out, tmux};
use std::io::{IsTerminal, Write};
use std::process::{Command, Stdio};
use tracing::warn;

/// Interactive selection among ambiguous matches. A seam so tests can
/// script the selection instead of launching fzf.
pub trait Picker {
    /// Present candidates and return the selected line, or `None` when
    /// the user cancelled.
    fn pick(&self, candidates: &[String]) -> Result<Option<String>, NxError>;
}

/// The production picker: fzf on PATH, candidates on stdin, selection
/// on stdout, non-zero exit means cancelled.
pub struct FzfPicker;

impl Picker for FzfPicker {
    fn pick(&self, candidates: &[String]) -> Result<Option<String>, NxError> {
        let mut child = Command::new("fzf")
            .arg("--prompt")
            .arg("Select session: ")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| NxError::MissingDependency(format!("failed to launch fzf: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            let input = format!("{}\n", candidates.join("\n"));
            let _ = stdin.write_all(input.as_bytes());
        }

        let output = child
            .wait_with_output()
            .map_err(|e| NxError::Internal(format!("fzf did not exit cleanly: {e}")))?;

        if !output.status.success() {
            return Ok(None);
        }
        let selected = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if selected.is_empty() {
            Ok(None)
        } else {
            Ok(Some(selected))
        }
    }
}

/// Resolve with the production picker and the real stdin tty state.
pub async fn resolve_cli<T: Transport>(
    name: &str,
    config: &FleetConfig,
    transport: &T,
    cancel: &CancelToken,
) -> Result<Target, NxError> {
    let interactive = std::io::stdin().is_terminal();
    resolve_session(name, config, transport, cancel, interactive, &FzfPicker).await
}

/// Resolve a session name to a qualified target.
pub async fn resolve_session<T: Transport>(
    name: &str,
    config: &FleetConfig,
    transport: &T,
    cancel: &CancelToken,
    interactive: bool,
    picker: &dyn Picker,
) -> Result<Target, NxError> {
    if let Some(target) = Target::parse(name) {
        return Ok(target);
    }

    let results = fan_out(
        transport,
        &config.nodes,
        &tmux::build_list_cmd(),
        config.max_concurrent_ssh,
        cancel,
    )
    .await;

    // Matches are collected in config-node order so the collision
    // diagnostic is deterministic. A session cannot exist on an
    // unreachable node for our purposes, so those only warn.
    let mut matches: Vec<Target> = Vec::new();
    for node in &config.nodes {
        let Some(result) = results.get(node) else {
            continue;
        };
        if !result.success() {
            warn!(node = %node, stderr = %result.stderr.trim(), "node unreachable during resolution");
            continue;
        }
        for session in tmux::parse_list_output(&result.stdout)? {
            if session.name == name {
                matches.push(Target::new(node.clone(), session.name));
            }
        }
    }

    match matches.len() {
        0 => Err(NxError::SessionNotFound(format!(
            "Session '{name}' not found on any node."
        ))),
        1 => Ok(matches.remove(0)),
        _ if interactive => disambiguate_interactive(matches, &config.default_node, picker),
        _ => {
            let listed = matches
                .iter()
                .map(Target::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            Err(NxError::AmbiguousSession(format!(
                "Ambiguous session. Matches: {listed}. Use a fully qualified name (node/session)."
            )))
        }
    }
}

fn disambiguate_interactive(
    mut matches: Vec<Target>,
    default_node: &str,
    picker: &dyn Picker,
) -> Result<Target, NxError> {
    // Deterministic order: default-node matches first, then by node and
    // session name, so the most likely target is pre-selected.
    matches.sort_by_key(|t| (t.node != default_node, t.node.clone(), t.session.clone()));
    let candidates: Vec<String> = matches.iter().map(Target::to_string).collect();

    match picker.pick(&candidates)? {
        Some(selected) => Target::parse(&selected).ok_or_else(|| {
            NxError::Internal(format!("picker returned an unqualified name: {selected:?}"))
        }),
        None => Err(NxError::SessionNotFound("Selection cancelled.".to_string())),
    }
}
