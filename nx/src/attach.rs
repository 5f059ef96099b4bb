//! The attach state machine.
//!
//! Attaching has to account for where the caller already is. Three
//! nesting contexts exist (a bare terminal, a shell inside the nexus
//! tmux server, and a shell inside the user's personal tmux), and each
//! crosses with a local or remote target to give five scenarios with
//! two execution strategies:
//!
//! - Bare-terminal scenarios own the terminal for the whole session,
//!   so the process is **replaced** (`exec`) with the attach command.
//!   Signals and resizes propagate natively and nothing is left behind.
//! - Nested scenarios put the long-lived attach inside a tmux window
//!   (or switch the current client); the launcher has nothing left to
//!   own and exits immediately.

use crate::resolve;
use anyhow::Result;
use nexus_common::transport::LOCAL_NODE;
use nexus_common::{CancelToken, FleetConfig, NxError, Target, Transport, tmux};
use std::os::unix::process::CommandExt;
use std::path::Path;

/// The caller's nesting context crossed with the target's locality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scenario {
    /// No tmux; local target. Replace the process with a local attach.
    BareLocal { session: String },
    /// No tmux; remote target. Replace the process with `ssh -t`.
    BareRemote { node: String, session: String },
    /// Inside the nexus server; local target. Switch the client in place.
    NexusLocal { session: String },
    /// Inside the nexus server; remote target. New window hosting the hop.
    NexusRemote { node: String, session: String },
    /// Inside a foreign tmux server. Nested window on the caller's server.
    ForeignTmux { node: String, session: String },
}

/// How a scenario is carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachPlan {
    /// Replace the current process image; never returns on success.
    Replace(Vec<String>),
    /// Fire-and-forget spawn; the launcher exits 0 right after.
    Spawn(Vec<String>),
}

/// Classify the caller's context. `tmux_env` is the raw `$TMUX` value,
/// `None` when unset or empty.
pub fn detect(tmux_env: Option<&str>, target: &Target) -> Scenario {
    let local = target.node == LOCAL_NODE;

    match tmux_env.and_then(socket_name) {
        None => {
            if local {
                Scenario::BareLocal {
                    session: target.session.clone(),
                }
            } else {
                Scenario::BareRemote {
                    node: target.node.clone(),
                    session: target.session.clone(),
                }
            }
        }
        Some(socket) if socket == tmux::SOCKET_NAME => {
            if local {
                Scenario::NexusLocal {
                    session: target.session.clone(),
                }
            } else {
                Scenario::NexusRemote {
                    node: target.node.clone(),
                    session: target.session.clone(),
                }
            }
        }
        Some(_) => Scenario::ForeignTmux {
            node: target.node.clone(),
            session: target.session.clone(),
        },
    }
}

/// `$TMUX` is `socket_path,server_pid,session_id`; the socket file name
/// identifies the server the caller sits in.
fn socket_name(tmux_env: &str) -> Option<String> {
    let path = tmux_env.split(',').next()?;
    if path.is_empty() {
        return None;
    }
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

/// Build the concrete command for a scenario.
pub fn plan(scenario: &Scenario) -> AttachPlan {
    match scenario {
        Scenario::BareLocal { session } => {
            AttachPlan::Replace(tmux::build_attach_cmd(tmux::SOCKET_NAME, session))
        }
        Scenario::BareRemote { node, session } => {
            AttachPlan::Replace(remote_attach_argv(node, session))
        }
        Scenario::NexusLocal { session } => {
            AttachPlan::Spawn(tmux::build_switch_client_cmd(session))
        }
        Scenario::NexusRemote { node, session } => AttachPlan::Spawn(tmux::build_new_window_cmd(
            Some(tmux::SOCKET_NAME),
            session,
            &remote_attach_argv(node, session),
        )),
        Scenario::ForeignTmux { node, session } => {
            let inner = if node == LOCAL_NODE {
                tmux::build_attach_cmd(tmux::SOCKET_NAME, session)
            } else {
                remote_attach_argv(node, session)
            };
            AttachPlan::Spawn(tmux::build_new_window_cmd(None, session, &inner))
        }
    }
}

fn remote_attach_argv(node: &str, session: &str) -> Vec<String> {
    let mut argv = vec!["ssh".to_string(), "-t".to_string(), node.to_string()];
    argv.extend(tmux::build_attach_cmd(tmux::SOCKET_NAME, session));
    argv
}

/// Resolve, classify, and hand off. On a Replace plan this function
/// does not return; on a Spawn plan it returns `Ok(())` so the process
/// exits 0 and frees the caller's shell.
pub async fn run<T: Transport>(
    config: &FleetConfig,
    transport: &T,
    cancel: &CancelToken,
    name: &str,
) -> Result<()> {
    let target = resolve::resolve_cli(name, config, transport, cancel).await?;
    crate::commands::ensure_known_node(config, &target.node)?;

    let tmux_env = std::env::var("TMUX").ok().filter(|v| !v.is_empty());
    let scenario = detect(tmux_env.as_deref(), &target);
    execute(plan(&scenario)).await
}

/// Carry out an attach plan.
pub async fn execute(plan: AttachPlan) -> Result<()> {
    match plan {
        AttachPlan::Replace(argv) => {
            // exec only returns on failure.
            let err = std::process::Command::new(&argv[0]).args(&argv[1..]).exec();
            Err(NxError::NodeCommandFailed(format!(
                "failed to exec {}: {err}",
                argv[0]
            ))
            .into())
        }
        AttachPlan::Spawn(argv) => {
            let output = tokio::process::Command::new(&argv[0])
                .args(&argv[1..])
                .output()
                .await
                .map_err(|e| {
                    NxError::NodeCommandFailed(format!("failed to spawn {}: {e}", argv[0]))
                })?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(NxError::NodeCommandFailed(format!(
                    "attach handoff failed: {}",
                    stderr.trim()
                ))
                .into());
            }
            Ok(())
        }
    }
}
