//! Daemon health reporting.
//!
//! The orchestrator polls the engine's `health_check()` on a fixed
//! interval and logs a [`DaemonHealth`] snapshot whenever the status
//! changes, so operators see degradation (storage or geolocation down)
//! without scraping metrics.

use std::fmt;

use sshwatch_core::pipeline::HealthStatus;
use sshwatch_tracker::EngineStats;

/// Point-in-time health report for the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonHealth {
    /// Engine health status.
    pub status: HealthStatus,
    /// Seconds since the daemon started.
    pub uptime_secs: u64,
    /// Engine lifecycle state ("initialized", "running", "stopped").
    pub engine_state: String,
    /// Lines read from the monitored log.
    pub lines_read: u64,
    /// Attempts newly written to storage.
    pub recorded: u64,
    /// Attempts dropped after storage retries were exhausted.
    pub dropped: u64,
}

impl DaemonHealth {
    /// Assemble a report from the engine status and counters.
    pub fn new(
        status: HealthStatus,
        uptime_secs: u64,
        engine_state: &str,
        stats: &EngineStats,
    ) -> Self {
        Self {
            status,
            uptime_secs,
            engine_state: engine_state.to_owned(),
            lines_read: stats.lines_read(),
            recorded: stats.recorded(),
            dropped: stats.dropped(),
        }
    }

    /// Emit the report at a level matching its status.
    pub fn log(&self) {
        match &self.status {
            HealthStatus::Healthy => tracing::info!(
                uptime_secs = self.uptime_secs,
                engine_state = %self.engine_state,
                lines_read = self.lines_read,
                recorded = self.recorded,
                dropped = self.dropped,
                "daemon healthy"
            ),
            HealthStatus::Degraded(reason) => tracing::warn!(
                reason = %reason,
                uptime_secs = self.uptime_secs,
                recorded = self.recorded,
                dropped = self.dropped,
                "daemon degraded"
            ),
            HealthStatus::Unhealthy(reason) => tracing::error!(
                reason = %reason,
                uptime_secs = self.uptime_secs,
                engine_state = %self.engine_state,
                "daemon unhealthy"
            ),
        }
    }
}

impl fmt::Display for DaemonHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (engine {}, up {}s, {} recorded, {} dropped)",
            self.status, self.engine_state, self.uptime_secs, self.recorded, self.dropped
        )
    }
}

/// Returns true when `current` should be logged given the last logged status.
///
/// Only transitions are reported; a repeated reason change within the same
/// variant counts as a transition.
pub fn status_changed(previous: Option<&HealthStatus>, current: &HealthStatus) -> bool {
    previous.is_none_or(|prev| prev != current)
}
