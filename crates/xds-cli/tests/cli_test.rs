//! Binary-level checks: argument and configuration failures exit before
//! any connection to the agent is attempted.

use assert_cmd::Command;
use predicates::prelude::*;

const XDS_VARS: &[&str] = &[
    "XDS_CONFIG",
    "XDS_LOGLEVEL",
    "XDS_AGENT_URL",
    "XDS_SERVER_URL",
    "XDS_TIMESTAMP",
    "XDS_PROJECT_ID",
    "XDS_RPATH",
    "XDS_SDK_ID",
    "XDS_TIMEOUT",
    "RUST_LOG",
];

/// Binary with a clean XDS environment and an agent URL nothing listens on.
fn xds_cli() -> Command {
    let mut cmd = Command::cargo_bin("xds-cli").unwrap();
    for var in XDS_VARS {
        cmd.env_remove(var);
    }
    cmd.args(["-u", "127.0.0.1:1"]);
    cmd
}

#[test]
fn missing_config_file_exits_with_one() {
    xds_cli()
        .args(["-c", "/nonexistent/x.env", "misc", "version"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn invalid_log_level_is_rejected() {
    xds_cli()
        .args(["-l", "chatty", "misc", "version"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid log level"));
}

#[test]
fn exec_without_project_id_is_rejected() {
    xds_cli()
        .args(["exec", "make"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("project id must be set"));
}

#[test]
fn unknown_project_type_is_rejected() {
    xds_cli()
        .args(["prj", "add", "-t", "docker"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Unknown project type"));
}

#[test]
fn invalid_sdk_filter_is_rejected() {
    xds_cli()
        .args(["sdks", "ls", "-f", "("])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid filter"));
}

#[test]
fn project_id_from_config_file_is_used() {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), "XDS_PROJECT_ID=prj-1\n").unwrap();

    // Validation passes, so the failure is the unreachable agent.
    xds_cli()
        .args(["-c", file.path().to_str().unwrap(), "exec", "make"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("project id must be set").not());
}

#[test]
fn unknown_format_exits_with_one() {
    xds_cli()
        .args(["--format", "xml", "misc", "version"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid value 'xml'"));
}

#[test]
fn unknown_flag_exits_with_one() {
    xds_cli()
        .args(["misc", "version", "--bogus"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--bogus"));
}

#[test]
fn missing_subcommand_exits_with_one() {
    xds_cli().assert().code(1);
}

#[test]
fn help_still_succeeds() {
    xds_cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("exec"));
}
