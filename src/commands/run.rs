use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use revisit::config::Config;
use revisit::metrics;
use revisit::storage::open_store;

use super::build_scheduler;

/// Run the scheduling loop until Ctrl-C
pub async fn run(config: Config) -> Result<()> {
    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics disabled");
    }

    let store = open_store(&config.database)?;
    let links = store.list_active_links().context("Failed to read links")?;

    println!("Starting revisit scheduler");
    println!("==========================");
    println!("  Database: {}", config.database.sqlite_path.display());
    println!("  Active links: {}", links.len());
    println!("  Quota: {} visits per cycle", config.engine.quota);
    println!("  Proxies: {}", config.proxies.pool.len());
    println!("  Tick: {}s", config.engine.tick_interval_secs);
    println!("  Metrics: {}", config.metrics.snapshot_path.display());

    if config.proxies.pool.is_empty() {
        tracing::warn!("No proxies configured, visits will connect directly");
    }

    let mut scheduler = build_scheduler(&config, store)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                println!("\nShutdown signal received, stopping...");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                // Dropping the sender would stop the scheduler.
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });

    let snapshots = spawn_metrics_snapshots(&config, shutdown_rx.clone());

    scheduler.run(shutdown_rx).await?;

    snapshots.abort();
    save_metrics_snapshot(&config.metrics.snapshot_path);

    println!("Scheduler stopped");
    Ok(())
}

/// Dump the metrics registry on an interval until shutdown
fn spawn_metrics_snapshots(config: &Config, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    let path: PathBuf = config.metrics.snapshot_path.clone();
    let mut interval = tokio::time::interval(config.metrics_snapshot_interval());

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = interval.tick() => save_metrics_snapshot(&path),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

fn save_metrics_snapshot(path: &Path) {
    if !metrics::metrics_initialized() {
        return;
    }
    match metrics::write_snapshot(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Metrics snapshot written"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to write metrics snapshot"),
    }
}
