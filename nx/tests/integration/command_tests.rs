use std::process::Command;

use super::common::{assert_contains, init_test_logging};

fn nx() -> Command {
    Command::new(env!("CARGO_BIN_EXE_nx"))
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_nx_help_includes_description() {
    init_test_logging();
    crate::test_log!("TEST START: test_nx_help_includes_description");

    let output = nx().arg("--help").output().expect("Failed to run nx --help");

    assert!(output.status.success(), "nx --help failed");
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_contains(&stdout, "distributed terminal orchestration");
    crate::test_log!("TEST PASS: test_nx_help_includes_description");
}

#[test]
fn test_nx_version_output() {
    init_test_logging();
    crate::test_log!("TEST START: test_nx_version_output");

    let output = nx()
        .arg("--version")
        .output()
        .expect("Failed to run nx --version");

    assert!(output.status.success(), "nx --version failed");
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert_contains(&stdout, "nx");
    crate::test_log!("Version output: {}", stdout.trim());
    crate::test_log!("TEST PASS: test_nx_version_output");
}

#[test]
fn test_no_args_shows_help() {
    init_test_logging();
    crate::test_log!("TEST START: test_no_args_shows_help");

    let output = nx().output().expect("Failed to run nx");

    // arg_required_else_help: help text, non-zero exit.
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert_contains(&stderr, "Usage");
    crate::test_log!("TEST PASS: test_no_args_shows_help");
}

// =============================================================================
// Subcommand Help Tests
// =============================================================================

#[test]
fn test_subcommand_help_surfaces() {
    init_test_logging();
    crate::test_log!("TEST START: test_subcommand_help_surfaces");

    for (subcommand, expect) in [
        ("list", "fleet"),
        ("new", "--on"),
        ("attach", "nesting"),
        ("peek", "pane"),
        ("logs", "--lines"),
        ("send", "--raw"),
        ("kill", "session"),
        ("gc", "--dry-run"),
        ("dash", "dashboard"),
        ("snap", "restore"),
        ("nodes", "fleet"),
    ] {
        let output = nx()
            .args([subcommand, "--help"])
            .output()
            .unwrap_or_else(|_| panic!("Failed to run nx {subcommand} --help"));

        assert!(output.status.success(), "nx {subcommand} --help failed");
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert_contains(&stdout, expect);
    }
    crate::test_log!("TEST PASS: test_subcommand_help_surfaces");
}

#[test]
fn test_list_alias_help() {
    init_test_logging();
    crate::test_log!("TEST START: test_list_alias_help");

    let output = nx()
        .args(["l", "--help"])
        .output()
        .expect("Failed to run nx l --help");

    assert!(output.status.success(), "nx l --help failed");
    crate::test_log!("TEST PASS: test_list_alias_help");
}

// =============================================================================
// Invalid Command Tests
// =============================================================================

#[test]
fn test_invalid_subcommand_fails() {
    init_test_logging();
    crate::test_log!("TEST START: test_invalid_subcommand_fails");

    let output = nx()
        .arg("nonexistent-command")
        .output()
        .expect("Failed to run nx nonexistent-command");

    assert!(!output.status.success(), "Expected failure for invalid subcommand");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("error") || stderr.contains("unrecognized"),
        "Expected error message in stderr: {}",
        stderr
    );
    crate::test_log!("TEST PASS: test_invalid_subcommand_fails");
}

#[test]
fn test_invalid_flag_fails() {
    init_test_logging();
    crate::test_log!("TEST START: test_invalid_flag_fails");

    let output = nx()
        .arg("--nonexistent-flag")
        .output()
        .expect("Failed to run nx --nonexistent-flag");

    assert!(!output.status.success(), "Expected failure for invalid flag");
    crate::test_log!("TEST PASS: test_invalid_flag_fails");
}

// =============================================================================
// Global Flag Tests
// =============================================================================

#[test]
fn test_global_verbose_flag_accepted() {
    init_test_logging();
    crate::test_log!("TEST START: test_global_verbose_flag_accepted");

    let output = nx()
        .args(["--verbose", "--help"])
        .output()
        .expect("Failed to run nx --verbose --help");

    assert!(output.status.success(), "nx --verbose --help failed");
    crate::test_log!("TEST PASS: test_global_verbose_flag_accepted");
}

#[test]
fn test_global_config_flag_accepted() {
    init_test_logging();
    crate::test_log!("TEST START: test_global_config_flag_accepted");

    let output = nx()
        .args(["--config", "/tmp/fleet.toml", "--help"])
        .output()
        .expect("Failed to run nx --config --help");

    assert!(output.status.success(), "nx --config <path> --help failed");
    crate::test_log!("TEST PASS: test_global_config_flag_accepted");
}
