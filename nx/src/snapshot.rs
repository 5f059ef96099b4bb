//! Snapshot and restore of fleet state.
//!
//! A snapshot records (node, name, directory, command) for every live
//! session; restore re-creates each one through the transport. The
//! snapshot file is the only thing nx ever writes about sessions, and
//! it is explicitly a point-in-time export, not a cache.

use anyhow::Result;
use chrono::{DateTime, Utc};
use nexus_common::transport::DEFAULT_CONNECT_TIMEOUT;
use nexus_common::{CancelToken, FleetConfig, NxError, Transport, config, fan_out, tmux};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One session's re-creatable state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub node: String,
    pub name: String,
    pub directory: String,
    pub command: String,
}

/// Full fleet snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub timestamp: DateTime<Utc>,
    pub sessions: Vec<SessionSnapshot>,
}

/// `~/.config/nexus/snapshot.json`.
pub fn default_snapshot_path() -> PathBuf {
    config::config_dir().join("snapshot.json")
}

/// Capture every live session to `path`.
pub async fn save<T: Transport>(
    config: &FleetConfig,
    transport: &T,
    cancel: &CancelToken,
    path: &Path,
) -> Result<FleetSnapshot> {
    let results = fan_out(
        transport,
        &config.nodes,
        &tmux::build_list_cmd(),
        config.max_concurrent_ssh,
        cancel,
    )
    .await;

    let mut sessions = Vec::new();
    for node in &config.nodes {
        let Some(result) = results.get(node) else {
            continue;
        };
        if !result.success() {
            continue;
        }
        for info in tmux::parse_list_output(&result.stdout)? {
            if info.is_dead {
                continue;
            }
            sessions.push(SessionSnapshot {
                node: node.clone(),
                name: info.name,
                directory: info.pane_path,
                command: info.pane_cmd,
            });
        }
    }

    let snapshot = FleetSnapshot {
        timestamp: Utc::now(),
        sessions,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| NxError::Internal(format!("failed to create {}: {e}", parent.display())))?;
    }
    let raw = serde_json::to_string_pretty(&snapshot)
        .map_err(|e| NxError::Internal(format!("failed to serialize snapshot: {e}")))?;
    std::fs::write(path, raw)
        .map_err(|e| NxError::Internal(format!("failed to write {}: {e}", path.display())))?;

    Ok(snapshot)
}

/// Re-create sessions from the snapshot at `path`, returning one log
/// line per attempt. A missing snapshot restores nothing.
pub async fn restore<T: Transport>(
    transport: &T,
    node_filter: Option<&str>,
    path: &Path,
) -> Result<Vec<String>> {
    let mut log = Vec::new();

    if !path.exists() {
        return Ok(log);
    }

    let raw = std::fs::read_to_string(path)
        .map_err(|e| NxError::Internal(format!("failed to read {}: {e}", path.display())))?;
    let snapshot: FleetSnapshot = serde_json::from_str(&raw)
        .map_err(|e| NxError::Internal(format!("malformed snapshot {}: {e}", path.display())))?;

    for session in &snapshot.sessions {
        if node_filter.is_some_and(|node| node != session.node) {
            continue;
        }

        let argv = tmux::build_new_cmd(
            &session.name,
            Some(&session.command),
            Some(&session.directory),
        );
        let result = transport
            .run_on_node(&session.node, &argv, DEFAULT_CONNECT_TIMEOUT)
            .await;

        if result.success() {
            log.push(format!("Restoring {}/{}... OK", session.node, session.name));
        } else {
            log.push(format!(
                "Restoring {}/{}... FAILED: {}",
                session.node,
                session.name,
                result.stderr.trim()
            ));
        }
    }

    Ok(log)
}

/// `nx snap save`.
pub async fn run_save<T: Transport>(
    config: &FleetConfig,
    transport: &T,
    cancel: &CancelToken,
) -> Result<()> {
    let path = default_snapshot_path();
    let snapshot = save(config, transport, cancel, &path).await?;
    println!(
        "Saved {} session(s) to {}",
        snapshot.sessions.len(),
        path.display()
    );
    Ok(())
}

/// `nx snap restore`.
pub async fn run_restore<T: Transport>(transport: &T, node_filter: Option<&str>) -> Result<()> {
    let log = restore(transport, node_filter, &default_snapshot_path()).await?;
    if log.is_empty() {
        println!("Nothing to restore.");
        return Ok(());
    }
    for line in log {
        println!("{line}");
    }
    Ok(())
}
