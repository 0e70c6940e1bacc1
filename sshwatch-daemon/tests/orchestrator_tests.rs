//! Orchestrator lifecycle tests.
//!
//! Runs the full daemon assembly against a temporary auth log with an
//! in-memory store, using a test-controlled future in place of signals.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sshwatch_core::config::SshwatchConfig;
use sshwatch_daemon::orchestrator::Orchestrator;
use sshwatch_tracker::{EngineStats, MemoryStore};

const LONE_FAILURE: &str =
    "Jan 15 12:00:05 bastion sshd[200]: Failed password for admin from 10.0.0.5 port 51515 ssh2";

fn config_for(dir: &Path) -> SshwatchConfig {
    let mut config = SshwatchConfig::default();
    config.general.pid_file = dir.join("run").join("sshwatch.pid").display().to_string();
    config.general.shutdown_timeout_secs = 5;
    config.source.path = dir.join("auth.log").display().to_string();
    config.source.position_file = dir.join("position.json").display().to_string();
    config.source.poll_interval_ms = 20;
    config.source.startup_wait_secs = 0;
    config.geo.enabled = false;
    config.storage.backend = "memory".to_owned();
    config.storage.stats_interval_secs = 0;
    config
}

fn append(path: &Path, line: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .expect("open log for append");
    writeln!(file, "{line}").expect("append line");
}

async fn completed(stats: Arc<EngineStats>, n: u64) -> anyhow::Result<&'static str> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while stats.completed() < n {
        if tokio::time::Instant::now() >= deadline {
            return Err(anyhow::anyhow!("timed out waiting for {n} attempts"));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok("test")
}

#[tokio::test]
async fn test_run_records_attempt_and_cleans_up() {
    // Given: A log with one failed login and an orchestrator over a memory store
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    append(Path::new(&config.source.path), LONE_FAILURE);
    let pid_path = dir.path().join("run").join("sshwatch.pid");

    let store = Arc::new(MemoryStore::new());
    let mut orchestrator =
        Orchestrator::build_with_store(config, store.clone()).expect("should build");
    let stats = orchestrator.engine_stats();

    // When: Running until the attempt is recorded
    orchestrator
        .run_until(completed(stats, 1))
        .await
        .expect("run should succeed");

    // Then: The attempt is stored, the position saved and the PID file gone
    let attempts = store.attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].username.as_deref(), Some("admin"));
    assert!(dir.path().join("position.json").exists());
    assert!(!pid_path.exists(), "PID file should be removed on shutdown");

    let health = orchestrator.health().await;
    assert!(health.status.is_unhealthy(), "stopped engine reports unhealthy");
    assert_eq!(health.engine_state, "stopped");
    assert_eq!(health.recorded, 1);
}

#[tokio::test]
async fn test_run_refuses_live_pid_file() {
    // Given: A PID file left by another instance
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    append(Path::new(&config.source.path), LONE_FAILURE);
    let pid_path = dir.path().join("run").join("sshwatch.pid");
    std::fs::create_dir_all(pid_path.parent().unwrap()).unwrap();
    std::fs::write(&pid_path, "4242\n").unwrap();

    let mut orchestrator =
        Orchestrator::build_with_store(config, Arc::new(MemoryStore::new())).unwrap();

    // When: Running
    let err = orchestrator
        .run_until(async { Ok("test") })
        .await
        .expect_err("should refuse to start");

    // Then: The engine never started and the foreign PID file is untouched
    assert!(err.to_string().contains("4242"), "got: {err}");
    assert_eq!(orchestrator.health().await.engine_state, "initialized");
    assert_eq!(std::fs::read_to_string(&pid_path).unwrap(), "4242\n");
}

#[tokio::test]
async fn test_missing_log_fails_start_and_removes_pid_file() {
    // Given: A config whose log file never appears
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    let pid_path = dir.path().join("run").join("sshwatch.pid");

    let mut orchestrator =
        Orchestrator::build_with_store(config, Arc::new(MemoryStore::new())).unwrap();

    // When: Running
    let result = orchestrator.run_until(async { Ok("test") }).await;

    // Then: Startup fails and no PID file is left behind
    let err = result.expect_err("start should fail");
    assert!(err.to_string().contains("failed to start"), "got: {err}");
    assert!(!pid_path.exists());
}

#[tokio::test]
async fn test_shutdown_future_error_still_stops_engine() {
    // Given: A running daemon whose shutdown trigger fails
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path());
    append(Path::new(&config.source.path), LONE_FAILURE);

    let mut orchestrator =
        Orchestrator::build_with_store(config, Arc::new(MemoryStore::new())).unwrap();

    // When: The trigger resolves with an error
    let result = orchestrator
        .run_until(async { Err(anyhow::anyhow!("signal handler unavailable")) })
        .await;

    // Then: The error surfaces and the engine is stopped anyway
    assert!(result.is_err());
    assert_eq!(orchestrator.health().await.engine_state, "stopped");
}

#[test]
fn test_invalid_config_is_rejected_before_opening_store() {
    // Given: An sqlite config with an invalid engine setting
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(dir.path());
    let db_path = dir.path().join("ssh_attempts.db");
    config.storage.backend = "sqlite".to_owned();
    config.storage.db_path = db_path.display().to_string();
    config.correlator.min_disconnect_age_secs = config.correlator.stale_session_secs;

    // When: Building
    let result = Orchestrator::build_from_config(config);

    // Then: Validation fails and no database file is created
    assert!(result.is_err());
    assert!(!db_path.exists());
}
