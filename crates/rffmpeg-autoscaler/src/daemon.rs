//! Daemon wiring: startup sequence, signal handling, and drain.

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use rffmpeg_autoscale::{Autoscaler, ControlLoop, ScalingPolicy};
use rffmpeg_cloud::{HetznerCloud, LifecycleManager, ProvisionSettings};
use rffmpeg_core::AutoscalerConfig;
use rffmpeg_state::{Inventory, InventoryStore, MIGRATION_NAMESPACE};
use tokio::signal;
use tracing::{error, info};

async fn load(config_path: &Path) -> anyhow::Result<(AutoscalerConfig, Inventory)> {
    let mut config = AutoscalerConfig::load(config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    config
        .database
        .prepare()
        .context("preparing database location")?;

    let store = InventoryStore::connect(&config.database.url(), config.database.kind)
        .await
        .with_context(|| format!("opening {} inventory store", config.database.kind.as_str()))?;
    Ok((config, Inventory::new(store)))
}

/// Start the control loop and block until a shutdown signal has been
/// handled and the in-flight cycle has drained.
pub async fn run(config_path: &Path) -> anyhow::Result<()> {
    let (config, inventory) = load(config_path).await?;

    let store_version = inventory
        .store()
        .server_version()
        .await
        .context("querying database version")?;

    let cloud = HetznerCloud::new(&config.cloud).context("building cloud client")?;
    let servers = cloud
        .verify_credentials()
        .await
        .context("verifying cloud credentials")?;

    info!(
        migrator = "sql",
        namespace = MIGRATION_NAMESPACE,
        backend = inventory.store().backend(),
        version = %store_version,
        cloud_servers = servers,
        fallback = %config.fallback.host,
        interval = ?config.scaling.interval,
        jobs_per_worker = config.fallback.jobs_per_worker,
        "rffmpeg-autoscaler initialised"
    );

    let lifecycle = LifecycleManager::new(
        Arc::new(cloud),
        inventory.clone(),
        ProvisionSettings::from_config(&config),
    );
    let autoscaler = Autoscaler::new(
        inventory.clone(),
        Arc::new(lifecycle),
        ScalingPolicy::from_config(&config.fallback),
        config.scaling.max_concurrent_teardowns,
    );
    let handle = ControlLoop::new(autoscaler, config.scaling.interval).spawn();

    shutdown_signal().await;

    let cycles = handle.drain().await.context("control loop task failed")?;
    inventory.store().close().await;
    info!(cycles, "rffmpeg-autoscaler stopped");
    Ok(())
}

/// Print every registered worker as pretty JSON.
pub async fn print_hosts(config_path: &Path) -> anyhow::Result<()> {
    let (_, inventory) = load(config_path).await?;
    let hosts = inventory.hosts().await.context("listing hosts")?;
    println!("{}", serde_json::to_string_pretty(&hosts)?);
    inventory.store().close().await;
    Ok(())
}

/// Resolve when `received` does. A handler that could not be installed
/// never fires, so it must not end the daemon.
async fn signal_or_pending(received: impl Future<Output = io::Result<()>>, name: &str) {
    if let Err(e) = received.await {
        error!(error = %e, signal = name, "failed to install signal handler");
        std::future::pending::<()>().await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = signal_or_pending(signal::ctrl_c(), "SIGINT");

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT"),
        () = terminate => info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn failed_handler_install_never_signals() {
        let failing = async { Err::<(), _>(io::Error::other("no signal driver")) };
        let waited =
            tokio::time::timeout(Duration::from_millis(50), signal_or_pending(failing, "SIGINT")).await;
        assert!(waited.is_err(), "shutdown fired without a signal");
    }

    #[tokio::test]
    async fn delivered_signal_resolves() {
        let delivered = async { io::Result::Ok(()) };
        tokio::time::timeout(Duration::from_millis(50), signal_or_pending(delivered, "SIGINT"))
            .await
            .unwrap();
    }
}
