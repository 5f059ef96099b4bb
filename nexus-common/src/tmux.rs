//! tmux command builders and list-output parser.
//!
//! Everything nx asks of tmux goes through a dedicated control socket so
//! fleet sessions never collide with the user's personal tmux server:
//! `nexus` for managed sessions, `nx_dash` for the transient dashboard.
//!
//! The `list-sessions` output format is a pinned contract: eight
//! `|`-separated fields per line. The field set is chosen so tmux cannot
//! emit the delimiter inside a field (names are validated by tmux,
//! paths cannot contain `|` on supported platforms, the rest is
//! numeric), which is what makes the strict parser below safe.

use crate::errors::NxError;
use crate::types::SessionInfo;

/// Control socket for fleet-managed sessions.
pub const SOCKET_NAME: &str = "nexus";
/// Control socket for the transient dashboard session.
pub const DASH_SOCKET: &str = "nx_dash";

pub const FIELD_SEPARATOR: char = '|';
pub const FIELD_COUNT: usize = 8;

/// Pinned `list-sessions` format string. Field order matches
/// [`SessionInfo`].
pub const FORMAT_STRING: &str = "#{session_name}\
|#{session_windows}\
|#{session_attached}\
|#{pane_current_path}\
|#{pane_current_command}\
|#{pane_pid}\
|#{pane_dead}\
|#{pane_dead_status}";

fn tmux(socket: &str) -> Vec<String> {
    vec!["tmux".into(), "-L".into(), socket.into()]
}

/// `list-sessions` on the nexus socket with the pinned format.
pub fn build_list_cmd() -> Vec<String> {
    let mut cmd = tmux(SOCKET_NAME);
    cmd.extend(["list-sessions".into(), "-F".into(), FORMAT_STRING.into()]);
    cmd
}

/// New detached session, optional working directory, optional command.
pub fn build_new_cmd(name: &str, cmd: Option<&str>, directory: Option<&str>) -> Vec<String> {
    let mut argv = tmux(SOCKET_NAME);
    argv.extend(["new-session".into(), "-d".into(), "-s".into(), name.into()]);

    if let Some(dir) = directory {
        argv.extend(["-c".into(), dir.into()]);
    }
    if let Some(cmd) = cmd {
        argv.extend(cmd.split_whitespace().map(String::from));
    }
    argv
}

/// Scrollback range for `capture-pane`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureRange {
    /// Last `n` lines from the bottom of the scrollback.
    Lines(u32),
    /// The entire scrollback history.
    Full,
}

/// `capture-pane -p` for the target session.
pub fn build_capture_cmd(session: &str, range: CaptureRange) -> Vec<String> {
    let start = match range {
        CaptureRange::Lines(n) => format!("-{n}"),
        CaptureRange::Full => "-".to_string(),
    };
    let mut argv = tmux(SOCKET_NAME);
    argv.extend([
        "capture-pane".into(),
        "-p".into(),
        "-t".into(),
        session.into(),
        "-S".into(),
        start,
    ]);
    argv
}

/// `send-keys` to the target session. In the default mode a literal
/// `Enter` token is appended after the last key; raw mode passes the
/// keys verbatim.
pub fn build_send_keys_cmd(session: &str, keys: &[String], raw: bool) -> Vec<String> {
    let mut argv = tmux(SOCKET_NAME);
    argv.extend(["send-keys".into(), "-t".into(), session.into()]);
    argv.extend(keys.iter().cloned());
    if !raw {
        argv.push("Enter".into());
    }
    argv
}

/// `kill-session` for the target session.
pub fn build_kill_cmd(session: &str) -> Vec<String> {
    let mut argv = tmux(SOCKET_NAME);
    argv.extend(["kill-session".into(), "-t".into(), session.into()]);
    argv
}

/// `switch-client` on the nexus socket (attach scenario B-local).
pub fn build_switch_client_cmd(session: &str) -> Vec<String> {
    let mut argv = tmux(SOCKET_NAME);
    argv.extend(["switch-client".into(), "-t".into(), session.into()]);
    argv
}

/// `new-window` running `command`, on a named socket or on the caller's
/// current server when `socket` is `None`. The window closes with its
/// command (no remain-on-exit), so a finished SSH hop cannot leave a
/// zombie window behind.
pub fn build_new_window_cmd(socket: Option<&str>, name: &str, command: &[String]) -> Vec<String> {
    let mut argv = match socket {
        Some(socket) => tmux(socket),
        None => vec!["tmux".into()],
    };
    argv.extend(["new-window".into(), "-n".into(), name.into()]);
    argv.extend(command.iter().cloned());
    argv
}

/// `split-window` in a session, running `command` in the new pane.
pub fn build_split_window_cmd(socket: &str, session: &str, command: &[String]) -> Vec<String> {
    let mut argv = tmux(socket);
    argv.extend(["split-window".into(), "-t".into(), session.into()]);
    argv.extend(command.iter().cloned());
    argv
}

/// `attach` to a session on the given socket.
pub fn build_attach_cmd(socket: &str, session: &str) -> Vec<String> {
    let mut argv = tmux(socket);
    argv.extend(["attach".into(), "-t".into(), session.into()]);
    argv
}

/// Set a pane user option (e.g. `@nx_target`), optionally addressing an
/// explicit pane; without a target the active pane is tagged.
pub fn build_set_pane_option_cmd(
    socket: &str,
    target: Option<&str>,
    option: &str,
    value: &str,
) -> Vec<String> {
    let mut argv = tmux(socket);
    argv.extend(["set-option".into(), "-p".into()]);
    if let Some(target) = target {
        argv.extend(["-t".into(), target.into()]);
    }
    argv.extend([option.into(), value.into()]);
    argv
}

/// `set-environment` in the server's global environment on a socket.
pub fn build_set_environment_cmd(socket: &str, name: &str, value: &str) -> Vec<String> {
    let mut argv = tmux(socket);
    argv.extend(["set-environment".into(), name.into(), value.into()]);
    argv
}

/// Bind a root-table key to a `run-shell` command on a socket.
pub fn build_bind_key_cmd(socket: &str, key: &str, shell_command: &str) -> Vec<String> {
    let mut argv = tmux(socket);
    argv.extend([
        "bind-key".into(),
        "-n".into(),
        key.into(),
        "run-shell".into(),
        shell_command.into(),
    ]);
    argv
}

/// `select-layout` for a session on a socket.
pub fn build_select_layout_cmd(socket: &str, session: &str, layout: &str) -> Vec<String> {
    let mut argv = tmux(socket);
    argv.extend(["select-layout".into(), "-t".into(), session.into(), layout.into()]);
    argv
}

/// `select-pane` for an explicit pane on a socket.
pub fn build_select_pane_cmd(socket: &str, target: &str) -> Vec<String> {
    let mut argv = tmux(socket);
    argv.extend(["select-pane".into(), "-t".into(), target.into()]);
    argv
}

/// Parse `list-sessions` output produced with [`FORMAT_STRING`].
///
/// Empty input yields an empty list. Any line that does not have
/// exactly [`FIELD_COUNT`] fields, or whose numeric fields fail to
/// coerce, is a contract violation and fails the whole parse.
pub fn parse_list_output(raw: &str) -> Result<Vec<SessionInfo>, NxError> {
    let mut sessions = Vec::new();

    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split(FIELD_SEPARATOR).collect();
        if fields.len() != FIELD_COUNT {
            return Err(NxError::FormatParse {
                line: line.to_string(),
                reason: format!("expected {FIELD_COUNT} fields, got {}", fields.len()),
            });
        }

        let is_dead = match fields[6] {
            "0" => false,
            "1" => true,
            other => {
                return Err(NxError::FormatParse {
                    line: line.to_string(),
                    reason: format!("is_dead must be 0 or 1, got {other:?}"),
                });
            }
        };

        let exit_status = match (is_dead, fields[7]) {
            (false, _) => None,
            (true, "") => {
                return Err(NxError::FormatParse {
                    line: line.to_string(),
                    reason: "dead pane without an exit status".to_string(),
                });
            }
            (true, status) => Some(parse_numeric(line, "exit_status", status)?),
        };

        sessions.push(SessionInfo {
            name: fields[0].to_string(),
            windows: parse_numeric(line, "windows", fields[1])?,
            attached: parse_numeric(line, "attached", fields[2])?,
            pane_path: fields[3].to_string(),
            pane_cmd: fields[4].to_string(),
            pane_pid: parse_numeric(line, "pid", fields[5])?,
            is_dead,
            exit_status,
        });
    }

    Ok(sessions)
}

fn parse_numeric<T: std::str::FromStr>(line: &str, field: &str, value: &str) -> Result<T, NxError> {
    value.parse().map_err(|_| NxError::FormatParse {
        line: line.to_string(),
        reason: format!("non-numeric {field} field {value:?}"),
    })
}
