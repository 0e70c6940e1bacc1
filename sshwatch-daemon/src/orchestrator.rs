//! Daemon orchestration: assembly and lifecycle management.
//!
//! The [`Orchestrator`] owns the loaded configuration, the attempt store
//! and the [`AttemptEngine`]. It writes the PID file, starts the engine,
//! watches engine health until a shutdown signal arrives, then stops the
//! engine so pending attempts are flushed and the read position is saved.
//!
//! # Shutdown Order
//!
//! 1. Shutdown signal received (SIGTERM or SIGINT)
//! 2. Background daemon tasks (uptime updater) stopped
//! 3. Engine stopped: ingest checkpoints, enrichment drains
//! 4. PID file removed

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::broadcast;

use sshwatch_core::config::{SshwatchConfig, StorageConfig};
use sshwatch_core::pipeline::{HealthStatus, Pipeline};
use sshwatch_tracker::{
    AttemptEngine, AttemptEngineBuilder, AttemptStore, EngineStats, MemoryStore, SqliteStore,
    TrackerConfig,
};

use crate::health::{DaemonHealth, status_changed};
use crate::metrics_server;

/// Interval between engine health polls.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: SshwatchConfig,
    /// The ingestion engine.
    engine: AttemptEngine,
    /// Shutdown broadcast sender for daemon-level background tasks.
    shutdown_tx: broadcast::Sender<()>,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
}

impl Orchestrator {
    /// Load configuration from `config_path` and build the orchestrator.
    ///
    /// Environment overrides are applied and the result validated.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = SshwatchConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config)
    }

    /// Build from an already-loaded configuration, opening the configured store.
    pub fn build_from_config(config: SshwatchConfig) -> Result<Self> {
        validate(&config)?;
        let store = build_store(&config.storage)?;
        Self::build_with_store(config, store)
    }

    /// Build with a caller-supplied store.
    pub fn build_with_store(config: SshwatchConfig, store: Arc<dyn AttemptStore>) -> Result<Self> {
        let tracker_config = validate(&config)?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
        }

        let engine = AttemptEngineBuilder::new()
            .config(tracker_config)
            .store(store)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build attempt engine: {}", e))?;

        let (shutdown_tx, _) = broadcast::channel(4);

        tracing::info!(
            source = %config.source.path,
            backend = %config.storage.backend,
            geo_enabled = config.geo.enabled,
            "orchestrator initialized"
        );

        Ok(Self {
            config,
            engine,
            shutdown_tx,
            start_time: Instant::now(),
        })
    }

    /// Start the engine and block until SIGTERM or SIGINT.
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(wait_for_shutdown_signal()).await
    }

    /// Start the engine and block until `shutdown` resolves.
    ///
    /// `shutdown` yields the name of the trigger for logging. The engine is
    /// always stopped and the PID file removed before returning, including
    /// when the engine turns unhealthy on its own.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = Result<&'static str>>,
    {
        let pid_file = self.pid_file();
        if let Some(path) = &pid_file {
            write_pid_file(path)?;
        }

        if let Err(e) = self.engine.start().await {
            tracing::error!(error = %e, "attempt engine failed to start");
            if let Some(path) = &pid_file {
                remove_pid_file(path);
            }
            return Err(anyhow::anyhow!("failed to start attempt engine: {}", e));
        }

        let uptime_task = self.config.metrics.enabled.then(|| {
            metrics_server::spawn_uptime_updater(self.start_time, self.shutdown_tx.subscribe())
        });

        let outcome = self.monitor(shutdown).await;

        let _ = self.shutdown_tx.send(());
        if let Some(task) = uptime_task {
            let _ = task.await;
        }

        let stopped = self.shutdown().await;

        if let Some(path) = &pid_file {
            remove_pid_file(path);
        }

        outcome.and(stopped)
    }

    /// Poll engine health until `shutdown` resolves or the engine fails.
    async fn monitor<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = Result<&'static str>>,
    {
        tokio::pin!(shutdown);
        let mut interval = tokio::time::interval_at(
            tokio::time::Instant::now() + HEALTH_CHECK_INTERVAL,
            HEALTH_CHECK_INTERVAL,
        );
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_status: Option<HealthStatus> = None;

        tracing::info!("sshwatch-daemon running");
        loop {
            tokio::select! {
                signal = &mut shutdown => {
                    let signal = signal?;
                    tracing::info!(signal = signal, "shutdown signal received");
                    return Ok(());
                }
                _ = interval.tick() => {
                    let health = self.health().await;
                    if status_changed(last_status.as_ref(), &health.status) {
                        health.log();
                    }
                    if let HealthStatus::Unhealthy(reason) = &health.status {
                        return Err(anyhow::anyhow!("attempt engine unhealthy: {}", reason));
                    }
                    last_status = Some(health.status);
                }
            }
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("stopping attempt engine");
        self.engine
            .stop()
            .await
            .map_err(|e| anyhow::anyhow!("failed to stop attempt engine: {}", e))
    }

    /// Current health report.
    pub async fn health(&self) -> DaemonHealth {
        let status = self.engine.health_check().await;
        DaemonHealth::new(
            status,
            self.start_time.elapsed().as_secs(),
            self.engine.state_name(),
            &self.engine.stats(),
        )
    }

    /// Engine counters, shared with the running tasks.
    pub fn engine_stats(&self) -> Arc<EngineStats> {
        self.engine.stats()
    }

    /// Loaded configuration.
    pub fn config(&self) -> &SshwatchConfig {
        &self.config
    }

    fn pid_file(&self) -> Option<PathBuf> {
        let path = &self.config.general.pid_file;
        (!path.is_empty()).then(|| PathBuf::from(path))
    }
}

/// Validate the core configuration and the derived engine configuration.
///
/// Used by `--validate` as well as by the orchestrator builders.
pub fn validate(config: &SshwatchConfig) -> Result<TrackerConfig> {
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    let tracker_config = TrackerConfig::from_core(config);
    tracker_config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;
    Ok(tracker_config)
}

/// Open the attempt store selected by `[storage] backend`.
pub fn build_store(config: &StorageConfig) -> Result<Arc<dyn AttemptStore>> {
    match config.backend.as_str() {
        "sqlite" => {
            let store = SqliteStore::open(
                &config.db_path,
                Duration::from_millis(config.busy_timeout_ms),
            )
            .map_err(|e| anyhow::anyhow!("failed to open attempt database: {}", e))?;
            Ok(Arc::new(store))
        }
        "memory" => {
            tracing::warn!("using in-memory attempt store; records are lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
        other => Err(anyhow::anyhow!("unknown storage backend '{}'", other)),
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Write the current process PID to `path`.
///
/// The file is created with `create_new`, so a second instance fails
/// instead of overwriting a live daemon's PID.
fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            fs::DirBuilder::new()
                .mode(0o755)
                .recursive(true)
                .create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    if !file.metadata()?.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file",
            path.display()
        ));
    }

    let pid = std::process::id();
    writeln!(file, "{}", pid)?;

    tracing::info!(pid = pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file. Failure is logged, not returned.
fn remove_pid_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::info!(path = %path.display(), "PID file removed"),
        Err(e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "failed to remove PID file"
        ),
    }
}
