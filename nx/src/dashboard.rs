//! The dashboard: a transient, read-only multi-pane view of the fleet.
//!
//! Composition lives on its own socket (`nx_dash`) so launching it from
//! inside the nexus server is safe. Each pane is a read-only attach to
//! one live session, tagged with the `@nx_target` pane option. Enter is
//! bound to a shim that captures the focused pane's tag, tears the
//! dashboard down, and re-enters the target through `nx attach`: the
//! teardown must come first so attach observes the caller's original
//! `$TMUX`, not the dashboard's.

use crate::attach::{self, AttachPlan};
use anyhow::Result;
use nexus_common::transport::{DEFAULT_CONNECT_TIMEOUT, LOCAL_NODE};
use nexus_common::{CancelToken, FleetConfig, NxError, Target, Transport, fan_out, tmux};
use tracing::warn;

const DASH_SESSION: &str = "dashboard";

/// Pane cap: beyond this the view stops being legible.
pub const MAX_PANES: usize = 16;

/// The Enter-key shim. Ordering is load-bearing: the target and binary
/// path are captured, the dashboard dies, and only then does the
/// re-entry exec run, under the caller's restored environment.
pub const ENTER_SHIM: &str = "NX_BIN=$(tmux -L nx_dash show-environment -h NX_BIN | cut -d= -f2); \
TARGET=$(tmux -L nx_dash display-message -p '#{@nx_target}'); \
tmux -L nx_dash detach-client && tmux -L nx_dash kill-session; \
exec \"$NX_BIN\" attach \"$TARGET\"";

/// `nx dash`: compose the dashboard and replace the process with an
/// attach to it. Prints a notice and exits 0 when the fleet is idle.
pub async fn run<T: Transport>(
    config: &FleetConfig,
    transport: &T,
    cancel: &CancelToken,
) -> Result<()> {
    match build_dashboard(config, transport, cancel).await? {
        Some(attach_argv) => attach::execute(AttachPlan::Replace(attach_argv)).await,
        None => {
            println!("No active sessions.");
            Ok(())
        }
    }
}

/// Compose the dashboard session. Returns the argv that attaches to
/// it, or `None` when there are no live sessions to show.
pub async fn build_dashboard<T: Transport>(
    config: &FleetConfig,
    transport: &T,
    cancel: &CancelToken,
) -> Result<Option<Vec<String>>> {
    let results = fan_out(
        transport,
        &config.nodes,
        &tmux::build_list_cmd(),
        config.max_concurrent_ssh,
        cancel,
    )
    .await;

    let mut targets: Vec<Target> = Vec::new();
    for node in &config.nodes {
        let Some(result) = results.get(node) else {
            continue;
        };
        if !result.success() {
            continue;
        }
        for session in tmux::parse_list_output(&result.stdout)? {
            if !session.is_dead {
                targets.push(Target::new(node.clone(), session.name));
            }
        }
    }

    if targets.is_empty() {
        return Ok(None);
    }

    if targets.len() > MAX_PANES {
        let elided: Vec<String> = targets[MAX_PANES..].iter().map(Target::to_string).collect();
        warn!(
            shown = MAX_PANES,
            total = targets.len(),
            elided = %elided.join(", "),
            "dashboard pane cap reached; some sessions are not shown"
        );
        targets.truncate(MAX_PANES);
    }

    // The first target's read-only attach is the initial window command
    // so the dashboard session starts with at least one pane.
    let first = &targets[0];
    let mut new_session = dash_argv(&["new-session", "-d", "-s", DASH_SESSION]);
    new_session.extend(read_only_attach(&first.node, &first.session));

    let result = transport
        .run_on_node(LOCAL_NODE, &new_session, DEFAULT_CONNECT_TIMEOUT)
        .await;
    if !result.success() {
        return Err(NxError::NodeCommandFailed(format!(
            "Failed to create dashboard: {}",
            result.stderr.trim()
        ))
        .into());
    }

    let first_pane = format!("{DASH_SESSION}:0.0");
    run_step(
        transport,
        tmux::build_set_pane_option_cmd(
            tmux::DASH_SOCKET,
            Some(&first_pane),
            "@nx_target",
            &first.to_string(),
        ),
    )
    .await;

    for target in &targets[1..] {
        let split = tmux::build_split_window_cmd(
            tmux::DASH_SOCKET,
            DASH_SESSION,
            &read_only_attach(&target.node, &target.session),
        );
        run_step(transport, split).await;

        // Tags the pane that split-window just focused.
        run_step(
            transport,
            tmux::build_set_pane_option_cmd(tmux::DASH_SOCKET, None, "@nx_target", &target.to_string()),
        )
        .await;
    }

    // The shim needs the nx binary's location at re-entry time.
    let nx_bin = std::env::current_exe()
        .map_err(|e| NxError::Internal(format!("could not resolve own binary path: {e}")))?;
    run_step(
        transport,
        tmux::build_set_environment_cmd(tmux::DASH_SOCKET, "NX_BIN", &nx_bin.display().to_string()),
    )
    .await;

    run_step(
        transport,
        tmux::build_bind_key_cmd(tmux::DASH_SOCKET, "Enter", ENTER_SHIM),
    )
    .await;

    run_step(
        transport,
        tmux::build_select_layout_cmd(tmux::DASH_SOCKET, DASH_SESSION, "tiled"),
    )
    .await;
    run_step(
        transport,
        tmux::build_select_pane_cmd(tmux::DASH_SOCKET, &first_pane),
    )
    .await;

    Ok(Some(tmux::build_attach_cmd(tmux::DASH_SOCKET, DASH_SESSION)))
}

/// Best-effort composition step; a failure degrades the dashboard but
/// does not abort it.
async fn run_step<T: Transport>(transport: &T, argv: Vec<String>) {
    let result = transport
        .run_on_node(LOCAL_NODE, &argv, DEFAULT_CONNECT_TIMEOUT)
        .await;
    if !result.success() {
        warn!(
            command = %argv.join(" "),
            stderr = %result.stderr.trim(),
            "dashboard composition step failed"
        );
    }
}

fn dash_argv(args: &[&str]) -> Vec<String> {
    let mut argv = vec!["tmux".to_string(), "-L".to_string(), tmux::DASH_SOCKET.to_string()];
    argv.extend(args.iter().map(|s| s.to_string()));
    argv
}

/// Read-only attach command for one session, local or over ssh.
fn read_only_attach(node: &str, session: &str) -> Vec<String> {
    let mut argv = if node == LOCAL_NODE {
        Vec::new()
    } else {
        vec!["ssh".to_string(), "-t".to_string(), node.to_string()]
    };
    argv.extend(tmux::build_attach_cmd(tmux::SOCKET_NAME, session));
    argv.push("-r".to_string());
    argv
}
