//! Fleet configuration: `~/.config/nexus/fleet.toml`.
//!
//! The config is loaded once at CLI startup and treated as frozen by the
//! core; only node management (`nx nodes add/rm`) writes it back.

use crate::errors::NxError;
use crate::transport::LOCAL_NODE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_MAX_CONCURRENT_SSH: usize = 16;

/// Fleet configuration model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Nodes in the fleet. `local` is always present.
    pub nodes: Vec<String>,
    /// Default target node for `nx new` when `--on` is omitted.
    pub default_node: String,
    /// Default command for new sessions. Environment variables are
    /// expanded at load time, so the core always sees a concrete value.
    pub default_cmd: String,
    /// Parallelism cap for fan-out dispatch.
    pub max_concurrent_ssh: usize,
    /// Whether the canonical tmux.conf reaps panes that exit cleanly.
    pub auto_reap_clean_exit: bool,
}

impl Default for FleetConfig {
    fn default() -> Self {
        let mut config = Self {
            nodes: vec![LOCAL_NODE.to_string()],
            default_node: LOCAL_NODE.to_string(),
            default_cmd: "$SHELL".to_string(),
            max_concurrent_ssh: DEFAULT_MAX_CONCURRENT_SSH,
            auto_reap_clean_exit: true,
        };
        config.normalize();
        config
    }
}

impl FleetConfig {
    /// Load the fleet config from `path`, or the default location when
    /// `None`. A missing file yields the defaults, not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, NxError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);

        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)
            .map_err(|e| NxError::Config(format!("failed to read {}: {e}", path.display())))?;
        let mut config: Self = toml::from_str(&raw)
            .map_err(|e| NxError::Config(format!("failed to parse {}: {e}", path.display())))?;
        config.normalize();
        Ok(config)
    }

    /// Persist the config back to `path` (default location when `None`).
    pub fn save(&self, path: Option<&Path>) -> Result<(), NxError> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| NxError::Config(format!("failed to create {}: {e}", parent.display())))?;
        }
        let raw = toml::to_string_pretty(self)
            .map_err(|e| NxError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(&path, raw)
            .map_err(|e| NxError::Config(format!("failed to write {}: {e}", path.display())))?;
        Ok(())
    }

    /// Expand env vars in string fields and guarantee `local` is in the
    /// node list. Applied on every construction path, so a config built
    /// without a file present still gets an expanded `default_cmd`.
    fn normalize(&mut self) {
        self.default_node = expand_env(&self.default_node);
        self.default_cmd = expand_env(&self.default_cmd);
        if !self.nodes.iter().any(|n| n == LOCAL_NODE) {
            self.nodes.insert(0, LOCAL_NODE.to_string());
        }
    }
}

/// `~/.config/nexus/fleet.toml`.
pub fn default_config_path() -> PathBuf {
    config_dir().join("fleet.toml")
}

/// `~/.config/nexus`.
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("nexus")
}

/// Expand `$VAR` and `${VAR}` references against the process
/// environment. Unset variables are left verbatim, matching the usual
/// shell-adjacent expansion behavior for config files.
fn expand_env(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'$' {
            let ch_len = utf8_len(bytes[i]);
            out.push_str(&input[i..i + ch_len]);
            i += ch_len;
            continue;
        }

        // ${VAR}
        if i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            if let Some(close) = input[i + 2..].find('}') {
                let name = &input[i + 2..i + 2 + close];
                match std::env::var(name) {
                    Ok(value) if !name.is_empty() => out.push_str(&value),
                    _ => out.push_str(&input[i..i + close + 3]),
                }
                i += close + 3;
                continue;
            }
            out.push('$');
            i += 1;
            continue;
        }

        // $VAR
        let start = i + 1;
        let mut end = start;
        while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
            end += 1;
        }
        if end == start {
            out.push('$');
            i += 1;
            continue;
        }
        let name = &input[start..end];
        match std::env::var(name) {
            Ok(value) => out.push_str(&value),
            Err(_) => out.push_str(&input[i..end]),
        }
        i = end;
    }

    out
}

fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        b if b < 0x80 => 1,
        b if b >= 0xF0 => 4,
        b if b >= 0xE0 => 3,
        _ => 2,
    }
}
