use anyhow::Result;
use clap::Parser;

use sshwatch_core::config::SshwatchConfig;
use sshwatch_daemon::cli::DaemonCli;
use sshwatch_daemon::logging::init_tracing;
use sshwatch_daemon::orchestrator::{self, Orchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    // file -> env -> CLI
    let mut config = SshwatchConfig::from_file(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
    config.apply_env_overrides();
    cli.apply_overrides(&mut config);

    init_tracing(&config.general)?;

    if cli.validate {
        orchestrator::validate(&config)?;
        tracing::info!(config = %cli.config.display(), "configuration is valid");
        return Ok(());
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "sshwatch-daemon starting"
    );

    let mut orchestrator = Orchestrator::build_from_config(config)?;
    if let Err(e) = orchestrator.run().await {
        tracing::error!(error = %e, "sshwatch-daemon exited with error");
        return Err(e);
    }

    tracing::info!("sshwatch-daemon shut down");
    Ok(())
}
