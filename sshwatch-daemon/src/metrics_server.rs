//! Prometheus metrics exporter.
//!
//! Installs the global `metrics` recorder backed by the built-in HTTP
//! listener of `metrics-exporter-prometheus`. Once installed, every
//! counter and gauge the tracker emits becomes scrapeable.

use std::net::SocketAddr;
use std::time::Instant;

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::broadcast;

use sshwatch_core::config::MetricsConfig;
use sshwatch_core::metrics as m;

/// How often the uptime gauge is refreshed.
const UPTIME_REFRESH_SECS: u64 = 10;

/// Resolve the socket address the exporter binds to.
///
/// # Errors
///
/// - The endpoint is anything other than `/metrics` (the listener serves one path)
/// - `listen_addr:port` is not a valid socket address
pub fn listen_addr(config: &MetricsConfig) -> Result<SocketAddr> {
    if config.endpoint != "/metrics" {
        return Err(anyhow::anyhow!(
            "unsupported metrics endpoint '{}': only '/metrics' is served",
            config.endpoint
        ));
    }

    format!("{}:{}", config.listen_addr, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address: {}", e))
}

/// Install the global recorder and start the HTTP listener.
///
/// Call once per process. Also registers metric descriptions and the
/// build-info gauge.
pub fn install_metrics_recorder(config: &MetricsConfig) -> Result<()> {
    let addr = listen_addr(config)?;

    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint is exposed on all interfaces"
        );
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {}", e))?;

    m::describe_all();
    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);

    tracing::info!(listen_addr = %addr, "Prometheus metrics endpoint active");
    Ok(())
}

/// Spawn a task that keeps the uptime gauge fresh until shutdown.
pub fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(tokio::time::Duration::from_secs(UPTIME_REFRESH_SECS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS)
                        .set(start_time.elapsed().as_secs() as f64);
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}
