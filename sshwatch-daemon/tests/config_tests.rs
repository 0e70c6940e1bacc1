//! Configuration precedence tests.
//!
//! The daemon layers configuration as file, then `SSHWATCH_*`
//! environment variables, then command-line flags.

use clap::Parser;
use serial_test::serial;

use sshwatch_core::config::SshwatchConfig;
use sshwatch_daemon::cli::DaemonCli;
use sshwatch_daemon::orchestrator;

const FILE_CONFIG: &str = r#"
[general]
log_level = "debug"
log_format = "pretty"
pid_file = "/tmp/from-file.pid"

[source]
path = "/var/log/secure"

[storage]
backend = "memory"
"#;

fn layered(args: &[&str]) -> SshwatchConfig {
    let cli = DaemonCli::try_parse_from(args).expect("should parse args");
    let mut config = SshwatchConfig::parse(FILE_CONFIG).expect("should parse config");
    config.apply_env_overrides();
    cli.apply_overrides(&mut config);
    config
}

#[test]
#[serial]
fn test_file_values_apply_without_overrides() {
    let config = layered(&["sshwatch-daemon"]);
    assert_eq!(config.general.log_level, "debug");
    assert_eq!(config.general.pid_file, "/tmp/from-file.pid");
    assert_eq!(config.source.path, "/var/log/secure");
}

#[test]
#[serial]
fn test_env_overrides_file() {
    // SAFETY: env mutation is serialized via #[serial]
    unsafe { std::env::set_var("SSHWATCH_GENERAL_LOG_LEVEL", "warn") };
    let config = layered(&["sshwatch-daemon"]);
    unsafe { std::env::remove_var("SSHWATCH_GENERAL_LOG_LEVEL") };

    assert_eq!(config.general.log_level, "warn");
}

#[test]
#[serial]
fn test_cli_overrides_env() {
    unsafe { std::env::set_var("SSHWATCH_GENERAL_LOG_LEVEL", "warn") };
    unsafe { std::env::set_var("SSHWATCH_GENERAL_PID_FILE", "/tmp/from-env.pid") };
    let config = layered(&[
        "sshwatch-daemon",
        "--log-level",
        "error",
        "--pid-file",
        "/tmp/from-cli.pid",
    ]);
    unsafe { std::env::remove_var("SSHWATCH_GENERAL_LOG_LEVEL") };
    unsafe { std::env::remove_var("SSHWATCH_GENERAL_PID_FILE") };

    assert_eq!(config.general.log_level, "error");
    assert_eq!(config.general.pid_file, "/tmp/from-cli.pid");
}

#[test]
#[serial]
fn test_validate_accepts_layered_config() {
    let config = layered(&["sshwatch-daemon", "--log-format", "json"]);
    let tracker = orchestrator::validate(&config).expect("should validate");
    assert_eq!(tracker.source_path, "/var/log/secure");
}

#[test]
#[serial]
fn test_validate_rejects_bad_cli_log_level() {
    let config = layered(&["sshwatch-daemon", "--log-level", "loud"]);
    let err = orchestrator::validate(&config).unwrap_err();
    assert!(err.to_string().contains("log_level"), "got: {err}");
}

#[test]
fn test_example_config_is_valid() {
    let config = SshwatchConfig::parse(include_str!("../../sshwatch.toml.example"))
        .expect("example config should parse");
    orchestrator::validate(&config).expect("example config should validate");
}
