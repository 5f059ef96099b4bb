//! The session command surface: list, new, peek, logs, send, kill, gc.
//!
//! Each command composes the shared engine: resolve a target where one
//! is named, dispatch through the transport, and keep diagnostics to a
//! single line. Whole-fleet commands never abort on an unreachable
//! node; single-node commands surface the node's own failure.

use crate::output::{self, Table};
use crate::resolve;
use anyhow::{Context, Result};
use nexus_common::transport::{DEFAULT_CONNECT_TIMEOUT, LOCAL_NODE};
use nexus_common::{CancelToken, FleetConfig, NxError, Target, Transport, fan_out, tmux};
use nexus_common::tmux::CaptureRange;
use std::io::IsTerminal;

pub(crate) fn ensure_known_node(config: &FleetConfig, node: &str) -> Result<(), NxError> {
    if config.nodes.iter().any(|n| n == node) {
        Ok(())
    } else {
        Err(NxError::UnknownNode(node.to_string()))
    }
}

/// `nx list`: the whole fleet in one table.
pub async fn list<T: Transport>(
    config: &FleetConfig,
    transport: &T,
    cancel: &CancelToken,
) -> Result<()> {
    let results = fan_out(
        transport,
        &config.nodes,
        &tmux::build_list_cmd(),
        config.max_concurrent_ssh,
        cancel,
    )
    .await;

    let mut node_sessions = Vec::new();
    let mut unreachable = Vec::new();
    for node in &config.nodes {
        match results.get(node) {
            Some(result) if result.success() => {
                node_sessions.push((node.clone(), tmux::parse_list_output(&result.stdout)?));
            }
            _ => unreachable.push(node.clone()),
        }
    }

    let total: usize = node_sessions.iter().map(|(_, s)| s.len()).sum();
    if total == 0 && unreachable.is_empty() {
        println!("No active sessions.");
        return Ok(());
    }

    let mut table = Table::new(&["Node", "Session", "Directory", "Command", "Status"]);
    for (node, sessions) in &node_sessions {
        for session in sessions {
            table.add_row(vec![
                node.clone(),
                session.name.clone(),
                session.pane_path.clone(),
                session.pane_cmd.clone(),
                output::session_status(session),
            ]);
        }
    }
    for node in &unreachable {
        table.add_row(vec![
            node.clone(),
            String::new(),
            String::new(),
            String::new(),
            "[UNREACHABLE]".to_string(),
        ]);
    }

    print!("{}", table.render());
    Ok(())
}

/// `nx new`: create a detached session.
pub async fn new_session<T: Transport>(
    config: &FleetConfig,
    transport: &T,
    name: &str,
    on: Option<String>,
    dir: Option<String>,
    cmd_args: &[String],
) -> Result<()> {
    let node = on.unwrap_or_else(|| config.default_node.clone());
    ensure_known_node(config, &node)?;

    // Local sessions start in the caller's cwd; remote sessions omit
    // -c so tmux falls back to the remote $HOME, since the local cwd
    // is unlikely to exist there.
    let directory = match dir {
        Some(dir) => Some(dir),
        None if node == LOCAL_NODE => Some(
            std::env::current_dir()
                .context("could not determine current directory")?
                .display()
                .to_string(),
        ),
        None => None,
    };

    let command = if cmd_args.is_empty() {
        config.default_cmd.clone()
    } else {
        cmd_args.join(" ")
    };

    let argv = tmux::build_new_cmd(name, Some(&command), directory.as_deref());
    let result = transport
        .run_on_node(&node, &argv, DEFAULT_CONNECT_TIMEOUT)
        .await;

    if !result.success() {
        // Not pre-checked: tmux itself rejects duplicates, which keeps
        // creation race-free across concurrent callers.
        if result.stderr.contains("duplicate session") {
            return Err(NxError::DuplicateSession {
                name: name.to_string(),
                node,
            }
            .into());
        }
        return Err(NxError::NodeCommandFailed(format!(
            "Failed to create session on {node}: {}",
            result.stderr.trim()
        ))
        .into());
    }

    println!("Created session {node}/{name}");
    Ok(())
}

/// `nx peek`: the last 30 lines of the session's pane.
pub async fn peek<T: Transport>(
    config: &FleetConfig,
    transport: &T,
    cancel: &CancelToken,
    name: &str,
) -> Result<()> {
    let target = resolve::resolve_cli(name, config, transport, cancel).await?;
    capture_and_print(transport, &target, CaptureRange::Lines(30)).await
}

/// Scrollback range for `nx logs`: an explicit `--lines` always wins;
/// otherwise 100 lines on a terminal and the full history when piped.
pub fn logs_range(lines: Option<u32>, stdout_tty: bool) -> CaptureRange {
    match lines {
        Some(n) => CaptureRange::Lines(n),
        None if stdout_tty => CaptureRange::Lines(100),
        None => CaptureRange::Full,
    }
}

/// `nx logs`: session scrollback.
pub async fn logs<T: Transport>(
    config: &FleetConfig,
    transport: &T,
    cancel: &CancelToken,
    name: &str,
    lines: Option<u32>,
) -> Result<()> {
    let target = resolve::resolve_cli(name, config, transport, cancel).await?;
    let range = logs_range(lines, std::io::stdout().is_terminal());
    capture_and_print(transport, &target, range).await
}

async fn capture_and_print<T: Transport>(
    transport: &T,
    target: &Target,
    range: CaptureRange,
) -> Result<()> {
    let argv = tmux::build_capture_cmd(&target.session, range);
    let result = transport
        .run_on_node(&target.node, &argv, DEFAULT_CONNECT_TIMEOUT)
        .await;

    if !result.success() {
        return Err(NxError::NodeCommandFailed(format!(
            "Failed to capture {target}: {}",
            result.stderr.trim()
        ))
        .into());
    }
    print!("{}", result.stdout);
    Ok(())
}

/// `nx send`: keystrokes into a session.
pub async fn send<T: Transport>(
    config: &FleetConfig,
    transport: &T,
    cancel: &CancelToken,
    name: &str,
    keys: &[String],
    raw: bool,
) -> Result<()> {
    let target = resolve::resolve_cli(name, config, transport, cancel).await?;
    let argv = tmux::build_send_keys_cmd(&target.session, keys, raw);
    let result = transport
        .run_on_node(&target.node, &argv, DEFAULT_CONNECT_TIMEOUT)
        .await;

    if !result.success() {
        return Err(NxError::NodeCommandFailed(format!(
            "Failed to send keys to {target}: {}",
            result.stderr.trim()
        ))
        .into());
    }
    println!("Sent keys to {target}");
    Ok(())
}

/// `nx kill`: kill a session.
pub async fn kill<T: Transport>(
    config: &FleetConfig,
    transport: &T,
    cancel: &CancelToken,
    name: &str,
) -> Result<()> {
    let target = resolve::resolve_cli(name, config, transport, cancel).await?;
    let result = transport
        .run_on_node(
            &target.node,
            &tmux::build_kill_cmd(&target.session),
            DEFAULT_CONNECT_TIMEOUT,
        )
        .await;

    if !result.success() {
        return Err(NxError::NodeCommandFailed(format!(
            "Failed to kill {target}: {}",
            result.stderr.trim()
        ))
        .into());
    }
    println!("Killed {target}");
    Ok(())
}

/// `nx gc`: reap exited sessions across the fleet.
pub async fn gc<T: Transport>(
    config: &FleetConfig,
    transport: &T,
    cancel: &CancelToken,
    dry_run: bool,
    name: Option<&str>,
) -> Result<()> {
    let interactive = std::io::stdin().is_terminal();
    gc_with_confirmation(config, transport, cancel, dry_run, name, interactive).await
}

pub async fn gc_with_confirmation<T: Transport>(
    config: &FleetConfig,
    transport: &T,
    cancel: &CancelToken,
    dry_run: bool,
    name: Option<&str>,
    interactive: bool,
) -> Result<()> {
    let results = fan_out(
        transport,
        &config.nodes,
        &tmux::build_list_cmd(),
        config.max_concurrent_ssh,
        cancel,
    )
    .await;

    let mut dead: Vec<Target> = Vec::new();
    for node in &config.nodes {
        let Some(result) = results.get(node) else {
            continue;
        };
        if !result.success() {
            continue;
        }
        for session in tmux::parse_list_output(&result.stdout)? {
            if !session.is_dead {
                continue;
            }
            if name.is_some_and(|n| n != session.name) {
                continue;
            }
            dead.push(Target::new(node.clone(), session.name));
        }
    }

    if dead.is_empty() {
        println!("No exited sessions.");
        return Ok(());
    }

    if dry_run {
        for target in &dead {
            println!("Would reap {target}");
        }
        return Ok(());
    }

    if interactive && !output::confirm(&format!("Reap {} session(s)?", dead.len()))? {
        println!("Aborted.");
        return Ok(());
    }

    for target in dead {
        let result = transport
            .run_on_node(
                &target.node,
                &tmux::build_kill_cmd(&target.session),
                DEFAULT_CONNECT_TIMEOUT,
            )
            .await;
        if result.success() {
            println!("Reaped {target}");
        } else {
            eprintln!("Failed to reap {target}: {}", result.stderr.trim());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_common::mock::MockTransport;

    fn fleet(nodes: &[&str]) -> FleetConfig {
        FleetConfig {
            nodes: nodes.iter().map(|s| s.to_string()).collect(),
            default_node: "local".to_string(),
            default_cmd: "/bin/bash".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_new_local_defaults_to_cwd_and_default_cmd() {
        let config = fleet(&["local"]);
        let transport = MockTransport::new();

        new_session(&config, &transport, "api", None, None, &[])
            .await
            .unwrap();

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        let (node, argv) = &calls[0];
        assert_eq!(node, "local");
        assert_eq!(argv[..7], ["tmux", "-L", "nexus", "new-session", "-d", "-s", "api"]);

        let cwd = std::env::current_dir().unwrap().display().to_string();
        let c_index = argv.iter().position(|a| a == "-c").unwrap();
        assert_eq!(argv[c_index + 1], cwd);
        assert!(argv.contains(&"/bin/bash".to_string()));
    }

    #[tokio::test]
    async fn test_new_remote_omits_directory() {
        let config = fleet(&["local", "dev-server"]);
        let transport = MockTransport::new();

        new_session(
            &config,
            &transport,
            "api",
            Some("dev-server".to_string()),
            None,
            &[],
        )
        .await
        .unwrap();

        let calls = transport.calls();
        assert_eq!(calls[0].0, "dev-server");
        assert!(!calls[0].1.contains(&"-c".to_string()));
    }

    #[tokio::test]
    async fn test_new_explicit_dir_and_cmd() {
        let config = fleet(&["local"]);
        let transport = MockTransport::new();

        new_session(
            &config,
            &transport,
            "api",
            None,
            Some("/tmp".to_string()),
            &["npm".to_string(), "start".to_string()],
        )
        .await
        .unwrap();

        let argv = &transport.calls()[0].1;
        let c_index = argv.iter().position(|a| a == "-c").unwrap();
        assert_eq!(argv[c_index + 1], "/tmp");
        assert_eq!(argv[argv.len() - 2..], ["npm", "start"]);
    }

    #[tokio::test]
    async fn test_new_duplicate_session_is_user_error() {
        let config = fleet(&["local"]);
        let transport =
            MockTransport::new().with_response("local", "", "duplicate session: api", 1);

        let err = new_session(&config, &transport, "api", None, None, &[])
            .await
            .unwrap_err();

        let nx = err.downcast_ref::<NxError>().unwrap();
        assert_eq!(nx.to_string(), "Session 'api' already exists on local.");
        assert_eq!(nx.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_new_unknown_node_rejected() {
        let config = fleet(&["local"]);
        let transport = MockTransport::new();

        let err = new_session(
            &config,
            &transport,
            "api",
            Some("ghost".to_string()),
            None,
            &[],
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<NxError>(),
            Some(NxError::UnknownNode(_))
        ));
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn test_logs_range_policy() {
        assert_eq!(logs_range(Some(50), true), CaptureRange::Lines(50));
        assert_eq!(logs_range(Some(50), false), CaptureRange::Lines(50));
        assert_eq!(logs_range(None, true), CaptureRange::Lines(100));
        assert_eq!(logs_range(None, false), CaptureRange::Full);
    }

    #[tokio::test]
    async fn test_send_auto_enter_through_resolution() {
        let config = fleet(&["local"]);
        let transport = MockTransport::new();
        let cancel = CancelToken::new();

        send(
            &config,
            &transport,
            &cancel,
            "local/api",
            &["npm test".to_string()],
            false,
        )
        .await
        .unwrap();

        let argv = &transport.calls()[0].1;
        assert_eq!(argv[argv.len() - 2..], ["npm test", "Enter"]);
    }

    #[tokio::test]
    async fn test_send_raw_omits_enter() {
        let config = fleet(&["local"]);
        let transport = MockTransport::new();
        let cancel = CancelToken::new();

        send(
            &config,
            &transport,
            &cancel,
            "local/api",
            &["C-c".to_string()],
            true,
        )
        .await
        .unwrap();

        let argv = &transport.calls()[0].1;
        assert_eq!(argv[argv.len() - 1], "C-c");
        assert!(!argv.contains(&"Enter".to_string()));
    }

    #[tokio::test]
    async fn test_kill_failure_is_user_error() {
        let config = fleet(&["local"]);
        let transport =
            MockTransport::new().with_response("local", "", "can't find session: ghost", 1);
        let cancel = CancelToken::new();

        let err = kill(&config, &transport, &cancel, "local/ghost")
            .await
            .unwrap_err();

        let nx = err.downcast_ref::<NxError>().unwrap();
        assert_eq!(nx.exit_code(), 1);
        assert!(nx.to_string().contains("local/ghost"));
    }

    #[tokio::test]
    async fn test_gc_reaps_dead_sessions_fleet_wide() {
        let config = fleet(&["local", "dev-server"]);
        let transport = MockTransport::new()
            .with_response("local", "old-api|1|0|/home/u|bash|1|1|0\n", "", 0)
            .with_response("dev-server", "crashed|1|0|/app|node|2|1|137\n", "", 0);
        let cancel = CancelToken::new();

        gc_with_confirmation(&config, &transport, &cancel, false, None, false)
            .await
            .unwrap();

        let kills = transport.calls_containing("kill-session");
        assert_eq!(kills.len(), 2);
    }

    #[tokio::test]
    async fn test_gc_name_filter() {
        let config = fleet(&["local", "dev-server"]);
        let transport = MockTransport::new()
            .with_response("local", "old-api|1|0|/home/u|bash|1|1|0\n", "", 0)
            .with_response("dev-server", "crashed|1|0|/app|node|2|1|137\n", "", 0);
        let cancel = CancelToken::new();

        gc_with_confirmation(&config, &transport, &cancel, false, Some("old-api"), false)
            .await
            .unwrap();

        let kills = transport.calls_containing("kill-session");
        assert_eq!(kills.len(), 1);
        assert_eq!(kills[0].0, "local");
    }

    #[tokio::test]
    async fn test_gc_dry_run_kills_nothing() {
        let config = fleet(&["local"]);
        let transport =
            MockTransport::new().with_response("local", "old-api|1|0|/home/u|bash|1|1|0\n", "", 0);
        let cancel = CancelToken::new();

        gc_with_confirmation(&config, &transport, &cancel, true, None, false)
            .await
            .unwrap();

        assert!(transport.calls_containing("kill-session").is_empty());
    }

    #[tokio::test]
    async fn test_gc_skips_running_sessions() {
        let config = fleet(&["local"]);
        let transport =
            MockTransport::new().with_response("local", "api|1|0|/home/u|python|1234|0|\n", "", 0);
        let cancel = CancelToken::new();

        gc_with_confirmation(&config, &transport, &cancel, false, None, false)
            .await
            .unwrap();

        assert!(transport.calls_containing("kill-session").is_empty());
    }

    #[tokio::test]
    async fn test_list_mixed_fleet_does_not_abort_on_unreachable() {
        let config = fleet(&["local", "dev", "gpu"]);
        let transport = MockTransport::new()
            .with_response("local", "api|1|0|/home/u|python|1234|0|\n", "", 0)
            .with_response("dev", "api|1|1|/app|node|77|1|2\n", "", 0)
            .with_unreachable("gpu");
        let cancel = CancelToken::new();

        list(&config, &transport, &cancel).await.unwrap();

        // One list call per node, no other dispatches.
        assert_eq!(transport.calls().len(), 3);
    }
}
