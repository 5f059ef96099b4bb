//! Fleet node management: status, onboarding, removal, discovery.
//!
//! Onboarding keeps remote state converged with what nx expects: a
//! tmux new enough for the pinned format string, the canonical
//! tmux.conf in place, and an SSH config block that gives the
//! transport a persistent multiplexed control connection.

use crate::output::Table;
use anyhow::Result;
use nexus_common::transport::{DEFAULT_CONNECT_TIMEOUT, LOCAL_NODE};
use nexus_common::{FleetConfig, NxError, Transport, config};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// The canonical tmux.conf pushed to every node.
pub const CANONICAL_TMUX_CONF: &str = include_str!("../data/tmux.conf");

/// SSH config block appended for each onboarded node.
const SSH_CONFIG_TEMPLATE: &str = "\nHost {host}\n    ControlMaster auto\n    ControlPath ~/.ssh/sockets/nx-%r@%h:%p\n    ControlPersist 10m\n    ServerAliveInterval 30\n";

const MIN_TMUX_MAJOR: u32 = 3;

/// `~/.ssh/nexus_config`: the nx-managed SSH config file.
fn nexus_ssh_config_path() -> PathBuf {
    home_dir().join(".ssh").join("nexus_config")
}

fn local_tmux_conf_path() -> PathBuf {
    config::config_dir().join("tmux.conf")
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Status of one fleet node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub node: String,
    pub reachable: bool,
    pub tmux_version: Option<String>,
    pub config_drift: bool,
}

fn conf_digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Check one node: reachability, tmux version, tmux.conf drift.
async fn check_node<T: Transport>(transport: &T, node: &str, canonical_hash: &str) -> NodeStatus {
    let result = transport
        .run_on_node(node, &argv(&["tmux", "-V"]), DEFAULT_CONNECT_TIMEOUT)
        .await;

    if node == LOCAL_NODE {
        let version = result.success().then(|| result.stdout.trim().to_string());
        let drift = match std::fs::read(local_tmux_conf_path()) {
            Ok(content) => conf_digest(&content) != canonical_hash,
            Err(_) => false,
        };
        return NodeStatus {
            node: node.to_string(),
            reachable: true,
            tmux_version: version,
            config_drift: drift,
        };
    }

    if !result.success() {
        return NodeStatus {
            node: node.to_string(),
            reachable: false,
            tmux_version: None,
            config_drift: false,
        };
    }
    let version = result.stdout.trim().to_string();

    let hash_result = transport
        .run_on_node(
            node,
            &argv(&["sh", "-c", "sha256sum \"$HOME/.config/nexus/tmux.conf\""]),
            DEFAULT_CONNECT_TIMEOUT,
        )
        .await;
    let drift = if hash_result.success() {
        hash_result
            .stdout
            .split_whitespace()
            .next()
            .is_some_and(|remote| remote != canonical_hash)
    } else {
        false
    };

    NodeStatus {
        node: node.to_string(),
        reachable: true,
        tmux_version: Some(version),
        config_drift: drift,
    }
}

/// Probe every fleet node concurrently.
pub async fn nodes_ls<T: Transport>(config: &FleetConfig, transport: &T) -> Vec<NodeStatus> {
    let canonical_hash = conf_digest(CANONICAL_TMUX_CONF.as_bytes());

    let mut handles = Vec::with_capacity(config.nodes.len());
    for node in &config.nodes {
        let transport = transport.clone();
        let node = node.clone();
        let hash = canonical_hash.clone();
        handles.push(tokio::spawn(async move {
            check_node(&transport, &node, &hash).await
        }));
    }

    let mut statuses = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(status) => statuses.push(status),
            Err(e) => tracing::warn!(error = %e, "node status probe task failed"),
        }
    }
    statuses
}

/// `nx nodes ls`.
pub async fn run_ls<T: Transport>(config: &FleetConfig, transport: &T) -> Result<()> {
    let statuses = nodes_ls(config, transport).await;

    let mut table = Table::new(&["Node", "Status", "tmux", "Config"]);
    for status in statuses {
        table.add_row(vec![
            status.node,
            if status.reachable {
                "[OK]".to_string()
            } else {
                "[UNREACHABLE]".to_string()
            },
            status.tmux_version.unwrap_or_else(|| "-".to_string()),
            if status.config_drift {
                "[DRIFT]".to_string()
            } else {
                "[SYNCED]".to_string()
            },
        ]);
    }
    print!("{}", table.render());
    Ok(())
}

/// Onboard a host: verify tmux, push the canonical conf, write the SSH
/// config block, persist the fleet entry. Returns the action log.
pub async fn nodes_add<T: Transport>(
    mut fleet: FleetConfig,
    transport: &T,
    host: &str,
    ssh_config_path: &Path,
    fleet_config_path: Option<&Path>,
) -> Result<Vec<String>> {
    let mut log = Vec::new();

    let result = transport
        .run_on_node(host, &argv(&["tmux", "-V"]), DEFAULT_CONNECT_TIMEOUT)
        .await;
    if !result.success() {
        return Err(NxError::NodeCommandFailed(format!(
            "Cannot reach {host} or tmux is not installed."
        ))
        .into());
    }

    let version_str = result.stdout.trim().to_string();
    match parse_tmux_version(&version_str) {
        Some((major, _)) if major >= MIN_TMUX_MAJOR => {}
        _ => {
            return Err(NxError::NodeCommandFailed(format!(
                "tmux >= 3.0 required on {host}, found: {version_str}"
            ))
            .into());
        }
    }
    log.push(format!("Verified {version_str} on {host}"));

    let socket_dir = home_dir().join(".ssh").join("sockets");
    std::fs::create_dir_all(&socket_dir)
        .map_err(|e| NxError::Internal(format!("failed to create {}: {e}", socket_dir.display())))?;
    log.push(format!("Ensured {} exists", socket_dir.display()));

    // Heredoc write instead of scp: one round-trip, and it goes through
    // the same transport the rest of nx uses.
    let push = format!(
        "mkdir -p \"$HOME/.config/nexus\" && cat > \"$HOME/.config/nexus/tmux.conf\" << 'NXEOF'\n{CANONICAL_TMUX_CONF}\nNXEOF"
    );
    let result = transport
        .run_on_node(host, &argv(&["sh", "-c", &push]), DEFAULT_CONNECT_TIMEOUT)
        .await;
    if !result.success() {
        return Err(NxError::NodeCommandFailed(format!(
            "Failed to push tmux.conf to {host}: {}",
            result.stderr.trim()
        ))
        .into());
    }
    log.push(format!("Pushed tmux.conf to {host}"));

    let existing = if ssh_config_path.exists() {
        std::fs::read_to_string(ssh_config_path)
            .map_err(|e| NxError::Internal(format!("failed to read ssh config: {e}")))?
    } else {
        String::new()
    };

    if existing.contains(&format!("Host {host}")) {
        log.push(format!("SSH config for {host} already exists"));
    } else {
        if let Some(parent) = ssh_config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| NxError::Internal(format!("failed to create {}: {e}", parent.display())))?;
        }
        let block = SSH_CONFIG_TEMPLATE.replace("{host}", host);
        std::fs::write(ssh_config_path, existing + &block)
            .map_err(|e| NxError::Internal(format!("failed to write ssh config: {e}")))?;
        log.push(format!("Added SSH config for {host}"));
    }

    if !fleet.nodes.iter().any(|n| n == host) {
        fleet.nodes.push(host.to_string());
        fleet.save(fleet_config_path)?;
        log.push(format!("Added {host} to fleet config"));
    }

    Ok(log)
}

/// Remove a host from the fleet and its SSH config block.
pub fn nodes_rm(
    mut fleet: FleetConfig,
    host: &str,
    ssh_config_path: &Path,
    fleet_config_path: Option<&Path>,
) -> Result<Vec<String>> {
    let mut log = Vec::new();

    if ssh_config_path.exists() {
        let content = std::fs::read_to_string(ssh_config_path)
            .map_err(|e| NxError::Internal(format!("failed to read ssh config: {e}")))?;
        let (remaining, removed) = remove_host_block(&content, host);
        if removed {
            std::fs::write(ssh_config_path, remaining)
                .map_err(|e| NxError::Internal(format!("failed to write ssh config: {e}")))?;
            log.push(format!("Removed SSH config for {host}"));
        }
    }

    if let Some(index) = fleet.nodes.iter().position(|n| n == host) {
        fleet.nodes.remove(index);
        fleet.save(fleet_config_path)?;
        log.push(format!("Removed {host} from fleet config"));
    }

    if log.is_empty() {
        return Err(NxError::UnknownNode(host.to_string()).into());
    }
    Ok(log)
}

/// `nx nodes add`.
pub async fn run_add<T: Transport>(
    fleet: FleetConfig,
    transport: &T,
    host: &str,
    fleet_config_path: Option<&Path>,
) -> Result<()> {
    let log = nodes_add(
        fleet,
        transport,
        host,
        &nexus_ssh_config_path(),
        fleet_config_path,
    )
    .await?;
    for line in log {
        println!("{line}");
    }
    Ok(())
}

/// `nx nodes rm`.
pub fn run_rm(fleet: FleetConfig, host: &str, fleet_config_path: Option<&Path>) -> Result<()> {
    let log = nodes_rm(fleet, host, &nexus_ssh_config_path(), fleet_config_path)?;
    for line in log {
        println!("{line}");
    }
    Ok(())
}

/// `nx nodes discover`.
pub fn run_discover(fleet: &FleetConfig) -> Result<()> {
    let candidates = discover_hosts(fleet, &home_dir().join(".ssh").join("config"));
    if candidates.is_empty() {
        println!("No new hosts found in ~/.ssh/config.");
        return Ok(());
    }
    for host in candidates {
        println!("{host}");
    }
    Ok(())
}

/// SSH hosts present in the user's config but not yet in the fleet.
pub fn discover_hosts(fleet: &FleetConfig, ssh_config_path: &Path) -> Vec<String> {
    parse_ssh_config_hosts(ssh_config_path)
        .into_iter()
        .filter(|host| host != LOCAL_NODE && !fleet.nodes.iter().any(|n| n == host))
        .collect()
}

/// Parse an SSH config for concrete `Host` entries, following
/// `Include` directives (with `~` and glob support) and skipping
/// wildcard patterns.
pub fn parse_ssh_config_hosts(path: &Path) -> Vec<String> {
    let mut hosts = Vec::new();
    collect_hosts(path, &mut hosts);
    hosts.sort();
    hosts.dedup();
    hosts
}

fn collect_hosts(path: &Path, hosts: &mut Vec<String>) {
    let Ok(content) = std::fs::read_to_string(path) else {
        return;
    };

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        // SSH config keywords are case-insensitive.
        let lower = trimmed.to_ascii_lowercase();

        if lower.starts_with("host ") {
            // Multi-host lines ("Host foo bar baz") name several
            // aliases; wildcard patterns are not concrete hosts.
            for entry in trimmed.split_whitespace().skip(1) {
                if entry.contains(['*', '?', '!']) {
                    continue;
                }
                hosts.push(entry.to_string());
            }
        } else if lower.starts_with("include ") {
            let Some(pattern) = trimmed.split_whitespace().nth(1) else {
                continue;
            };
            let expanded = expand_tilde(pattern);
            if let Ok(paths) = glob::glob(&expanded) {
                for included in paths.flatten() {
                    collect_hosts(&included, hosts);
                }
            }
        }
    }
}

fn expand_tilde(pattern: &str) -> String {
    if let Some(rest) = pattern.strip_prefix("~/") {
        home_dir().join(rest).display().to_string()
    } else {
        pattern.to_string()
    }
}

/// Extract `(major, minor)` from a `tmux -V` banner such as
/// `tmux 3.3a`.
fn parse_tmux_version(version_str: &str) -> Option<(u32, u32)> {
    let start = version_str.find(|c: char| c.is_ascii_digit())?;
    let token: String = version_str[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    let mut parts = token.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().and_then(|m| m.parse().ok()).unwrap_or(0);
    Some((major, minor))
}

/// Drop a `Host <host>` block (the header plus its indented body) from
/// an SSH config. Returns the remaining content and whether anything
/// was removed.
fn remove_host_block(content: &str, host: &str) -> (String, bool) {
    let header = format!("Host {host}");
    let mut out: Vec<&str> = Vec::new();
    let mut removed = false;

    let mut lines = content.lines().peekable();
    while let Some(line) = lines.next() {
        if line.trim() == header {
            removed = true;
            while let Some(next) = lines.peek() {
                if next.starts_with(' ') || next.starts_with('\t') {
                    lines.next();
                } else {
                    break;
                }
            }
            continue;
        }
        out.push(line);
    }

    let mut remaining = out.join("\n");
    if !remaining.is_empty() {
        remaining.push('\n');
    }
    (remaining, removed)
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
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

    #[test]
    fn test_parse_tmux_version() {
        assert_eq!(parse_tmux_version("tmux 3.4"), Some((3, 4)));
        assert_eq!(parse_tmux_version("tmux 3.3a"), Some((3, 3)));
        assert_eq!(parse_tmux_version("tmux 2.9"), Some((2, 9)));
        assert_eq!(parse_tmux_version("tmux next-3.5"), Some((3, 5)));
        assert_eq!(parse_tmux_version("no digits here"), None);
    }

    #[test]
    fn test_parse_ssh_config_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(
            &path,
            "# fleet machines\n\
             Host dev-server\n    HostName 10.0.0.2\n\n\
             Host gpu worker-2\n    HostName 10.0.0.3\n\n\
             Host *.internal\n    User root\n",
        )
        .unwrap();

        let hosts = parse_ssh_config_hosts(&path);
        assert_eq!(hosts, vec!["dev-server", "gpu", "worker-2"]);
    }

    #[test]
    fn test_parse_ssh_config_follows_includes() {
        let dir = tempfile::tempdir().unwrap();
        let extra = dir.path().join("extra_config");
        std::fs::write(&extra, "Host included-host\n    HostName 10.0.0.9\n").unwrap();

        let main = dir.path().join("config");
        std::fs::write(
            &main,
            format!("Include {}\nHost main-host\n", extra.display()),
        )
        .unwrap();

        let hosts = parse_ssh_config_hosts(&main);
        assert_eq!(hosts, vec!["included-host", "main-host"]);
    }

    #[test]
    fn test_parse_ssh_config_missing_file() {
        assert!(parse_ssh_config_hosts(Path::new("/nonexistent/config")).is_empty());
    }

    #[test]
    fn test_discover_hosts_excludes_fleet_members() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "Host dev-server\nHost new-box\n").unwrap();

        let config = fleet(&["local", "dev-server"]);
        assert_eq!(discover_hosts(&config, &path), vec!["new-box"]);
    }

    #[test]
    fn test_remove_host_block() {
        let content = "Host keep\n    HostName 10.0.0.1\n\nHost gone\n    ControlMaster auto\n    ControlPersist 10m\nHost also-keep\n";
        let (remaining, removed) = remove_host_block(content, "gone");
        assert!(removed);
        assert!(remaining.contains("Host keep"));
        assert!(remaining.contains("Host also-keep"));
        assert!(!remaining.contains("gone"));
        assert!(!remaining.contains("ControlMaster"));
    }

    #[test]
    fn test_remove_host_block_absent() {
        let (remaining, removed) = remove_host_block("Host other\n", "gone");
        assert!(!removed);
        assert_eq!(remaining, "Host other\n");
    }

    #[tokio::test]
    async fn test_nodes_add_happy_path() {
        let dir = tempfile::tempdir().unwrap();
        let ssh_config = dir.path().join("nexus_config");
        let fleet_config = dir.path().join("fleet.toml");

        let transport = MockTransport::new().with_response("dev-server", "tmux 3.4\n", "", 0);
        let log = nodes_add(
            fleet(&["local"]),
            &transport,
            "dev-server",
            &ssh_config,
            Some(&fleet_config),
        )
        .await
        .unwrap();

        assert!(log.iter().any(|l| l.contains("Verified tmux 3.4")));
        assert!(log.iter().any(|l| l.contains("Pushed tmux.conf")));
        assert!(log.iter().any(|l| l.contains("Added SSH config")));
        assert!(log.iter().any(|l| l.contains("Added dev-server to fleet config")));

        let ssh = std::fs::read_to_string(&ssh_config).unwrap();
        assert!(ssh.contains("Host dev-server"));
        assert!(ssh.contains("ControlMaster auto"));

        let persisted = FleetConfig::load(Some(&fleet_config)).unwrap();
        assert!(persisted.nodes.iter().any(|n| n == "dev-server"));
    }

    #[tokio::test]
    async fn test_nodes_add_rejects_old_tmux() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new().with_response("old-box", "tmux 2.9\n", "", 0);

        let err = nodes_add(
            fleet(&["local"]),
            &transport,
            "old-box",
            &dir.path().join("nexus_config"),
            Some(&dir.path().join("fleet.toml")),
        )
        .await
        .unwrap_err();

        let nx = err.downcast_ref::<NxError>().unwrap();
        assert!(nx.to_string().contains("tmux >= 3.0 required"));
        assert_eq!(nx.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_nodes_add_unreachable_host() {
        let dir = tempfile::tempdir().unwrap();
        let transport = MockTransport::new().with_unreachable("ghost");

        let err = nodes_add(
            fleet(&["local"]),
            &transport,
            "ghost",
            &dir.path().join("nexus_config"),
            Some(&dir.path().join("fleet.toml")),
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("Cannot reach ghost"));
    }

    #[tokio::test]
    async fn test_nodes_add_idempotent_ssh_block() {
        let dir = tempfile::tempdir().unwrap();
        let ssh_config = dir.path().join("nexus_config");
        let fleet_config = dir.path().join("fleet.toml");
        let transport = MockTransport::new().with_response("dev-server", "tmux 3.4\n", "", 0);

        for _ in 0..2 {
            nodes_add(
                fleet(&["local"]),
                &transport,
                "dev-server",
                &ssh_config,
                Some(&fleet_config),
            )
            .await
            .unwrap();
        }

        let ssh = std::fs::read_to_string(&ssh_config).unwrap();
        assert_eq!(ssh.matches("Host dev-server").count(), 1);
    }

    #[test]
    fn test_nodes_rm_unknown_host() {
        let dir = tempfile::tempdir().unwrap();
        let err = nodes_rm(
            fleet(&["local"]),
            "ghost",
            &dir.path().join("nexus_config"),
            Some(&dir.path().join("fleet.toml")),
        )
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<NxError>(),
            Some(NxError::UnknownNode(_))
        ));
    }

    #[test]
    fn test_nodes_rm_removes_block_and_fleet_entry() {
        let dir = tempfile::tempdir().unwrap();
        let ssh_config = dir.path().join("nexus_config");
        let fleet_config = dir.path().join("fleet.toml");
        std::fs::write(
            &ssh_config,
            "\nHost dev-server\n    ControlMaster auto\n    ControlPersist 10m\n",
        )
        .unwrap();

        let log = nodes_rm(
            fleet(&["local", "dev-server"]),
            "dev-server",
            &ssh_config,
            Some(&fleet_config),
        )
        .unwrap();

        assert_eq!(log.len(), 2);
        let ssh = std::fs::read_to_string(&ssh_config).unwrap();
        assert!(!ssh.contains("dev-server"));

        let persisted = FleetConfig::load(Some(&fleet_config)).unwrap();
        assert!(!persisted.nodes.iter().any(|n| n == "dev-server"));
    }

    #[tokio::test]
    async fn test_nodes_ls_flags_unreachable() {
        let config = fleet(&["local", "dev", "gpu"]);
        let transport = MockTransport::new()
            .with_response("local", "tmux 3.4\n", "", 0)
            .with_response("dev", "tmux 3.3a\n", "", 0)
            .with_unreachable("gpu");

        let statuses = nodes_ls(&config, &transport).await;
        assert_eq!(statuses.len(), 3);

        let by_node = |name: &str| statuses.iter().find(|s| s.node == name).unwrap();
        assert!(by_node("local").reachable);
        assert_eq!(by_node("dev").tmux_version.as_deref(), Some("tmux 3.3a"));
        assert!(!by_node("gpu").reachable);
        assert_eq!(by_node("gpu").tmux_version, None);
    }
}
