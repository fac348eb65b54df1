use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use jar_monitor::client::JarClient;
use jar_monitor::models::{DetectedTransfer, JarHealth};
use jar_monitor::recovery::RecoveryPlanner;
use jar_monitor::session::{JarEvents, SessionManager, SessionOptions};
use jar_monitor::store::TransferStore;
use jar_monitor::{api, config};

/// Writes every notification to the log, transfers as JSON lines.
struct LogEvents;

impl JarEvents for LogEvents {
    fn on_transfer_detected(&self, transfer: &DetectedTransfer) {
        match serde_json::to_string(transfer) {
            Ok(json) => info!("transfer detected: {json}"),
            Err(_) => info!(
                "transfer detected: {}#{}",
                transfer.tx_hash, transfer.log_index
            ),
        }
    }

    fn on_health_change(&self, health: &JarHealth) {
        if health.is_healthy {
            info!("jar healthy again");
        } else {
            for issue in &health.issues {
                error!("jar issue: {issue}");
            }
        }
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stdout)
        .with_target(false)
        .init();

    info!("Jar monitor starting...");

    let cfg = config::load()?;
    info!("Loaded config:");
    info!("  RPC URL: {}", cfg.rpc_http_url);
    info!("  Jar: {}", cfg.jar_address);
    info!("  Port: {}", cfg.port);
    info!("  Scan interval: {:?}", cfg.scan_interval);
    info!("  Real-time: {}", cfg.realtime_enabled);
    info!("  Auto-recover: {}", cfg.auto_recover);

    let port = cfg.port;
    let realtime_enabled = cfg.realtime_enabled;
    let auto_recover = cfg.auto_recover;

    let client = Arc::new(JarClient::connect(cfg).await?);
    let store = Arc::new(TransferStore::new());
    let planner = Arc::new(RecoveryPlanner::new(Arc::clone(&client), Arc::clone(&store)));
    let manager = Arc::new(SessionManager::new(
        Arc::clone(&client),
        Arc::clone(&store),
        Arc::clone(&planner),
        Arc::new(LogEvents),
    ));

    let session_id = if realtime_enabled {
        Some(
            manager
                .start_monitoring_session(SessionOptions { auto_recover })
                .await?,
        )
    } else {
        info!("real-time monitoring disabled; serving the query API only");
        None
    };

    // Spawn API task
    let api_handle = tokio::spawn({
        let store = Arc::clone(&store);
        let planner = Arc::clone(&planner);
        let manager = Arc::clone(&manager);
        async move { api::serve(port, store, planner, manager).await }
    });

    // Graceful shutdown
    tokio::select! {
        res = api_handle => match res {
            Ok(Ok(_)) => info!("API exited cleanly"),
            Ok(Err(e)) => error!("API error: {:?}", e),
            Err(e) => error!("API task panicked: {:?}", e),
        },
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received, stopping...");
        }
    }

    if let Some(id) = session_id {
        if let Some(stats) = manager.stop_monitoring_session(id) {
            info!(
                "Final counters: {} detected, {} processed, {} recovered",
                stats.transfers_detected, stats.transfers_processed, stats.total_value_recovered
            );
        }
    }

    info!("Jar monitor stopped.");
    Ok(())
}
