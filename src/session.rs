use crate::client::JarClient;
use crate::error::Result;
use crate::models::{DetectedTransfer, JarHealth, MonitoringSession, SessionStats};
use crate::recovery::RecoveryPlanner;
use crate::store::TransferStore;
use crate::watcher::RealTimeWatcher;
use alloy::primitives::U256;
use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Opaque handle to one monitoring lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Collaborator notification hooks.
pub trait JarEvents: Send + Sync {
    fn on_transfer_detected(&self, _transfer: &DetectedTransfer) {}
    fn on_health_change(&self, _health: &JarHealth) {}
}

/// Hook implementation that ignores every notification.
pub struct NoopEvents;

impl JarEvents for NoopEvents {}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
    /// Attempt single-token recovery as direct transfers arrive. Requires
    /// the client's write interface; without it transfers are only recorded.
    pub auto_recover: bool,
}

struct SessionEntry {
    session: Arc<Mutex<MonitoringSession>>,
    watcher: RealTimeWatcher,
    consumer: JoinHandle<()>,
    health: JoinHandle<()>,
}

/// Supervises monitoring lifecycles: one watcher, one transfer consumer and
/// one periodic health check per session, plus the cumulative counters.
pub struct SessionManager {
    client: Arc<JarClient>,
    store: Arc<TransferStore>,
    planner: Arc<RecoveryPlanner>,
    events: Arc<dyn JarEvents>,
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
    next_id: AtomicU64,
}

impl SessionManager {
    pub fn new(
        client: Arc<JarClient>,
        store: Arc<TransferStore>,
        planner: Arc<RecoveryPlanner>,
        events: Arc<dyn JarEvents>,
    ) -> Self {
        Self {
            client,
            store,
            planner,
            events,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn start_monitoring_session(&self, options: SessionOptions) -> Result<SessionId> {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = Arc::new(Mutex::new(MonitoringSession {
            jar_address: self.client.jar_address(),
            started_at: Utc::now(),
            transfers_detected: 0,
            transfers_processed: 0,
            total_value_recovered: U256::ZERO,
            is_active: true,
        }));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = RealTimeWatcher::new(Arc::clone(&self.client));
        watcher.start(tx).await?;

        let consumer = {
            let session = Arc::clone(&session);
            let store = Arc::clone(&self.store);
            let planner = Arc::clone(&self.planner);
            let events = Arc::clone(&self.events);
            let client = Arc::clone(&self.client);
            let auto_recover = options.auto_recover;
            tokio::spawn(async move {
                while let Some(transfer) = rx.recv().await {
                    if !store.insert(transfer.clone()) {
                        continue; // already in this jar's transfer set
                    }
                    session.lock().unwrap().transfers_detected += 1;
                    events.on_transfer_detected(&transfer);

                    if auto_recover && transfer.is_direct_transfer && client.has_write_access() {
                        match planner.recover_token(transfer.token_address).await {
                            Ok(tx_hash) => {
                                info!(
                                    "auto-recovered {} {} (tx {tx_hash})",
                                    transfer.formatted_amount, transfer.token_symbol
                                );
                                let mut s = session.lock().unwrap();
                                s.transfers_processed += 1;
                                s.total_value_recovered =
                                    s.total_value_recovered.saturating_add(transfer.amount);
                            }
                            Err(err) => warn!(
                                "auto-recovery for token {} failed: {err}",
                                transfer.token_address
                            ),
                        }
                    }
                }
                debug!("transfer consumer finished");
            })
        };

        let health = {
            let planner = Arc::clone(&self.planner);
            let events = Arc::clone(&self.events);
            let period = self.client.config().health_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                let mut last_issues: Option<Vec<String>> = None;
                loop {
                    ticker.tick().await;
                    let health = planner.check_jar_health().await;
                    if last_issues.as_ref() != Some(&health.issues) {
                        last_issues = Some(health.issues.clone());
                        events.on_health_change(&health);
                    }
                }
            })
        };

        self.sessions.lock().unwrap().insert(
            id,
            SessionEntry {
                session,
                watcher,
                consumer,
                health,
            },
        );
        info!("{id} started for jar {}", self.client.jar_address());
        Ok(id)
    }

    /// Stop a session and return its final counters; `None` for an unknown
    /// id.
    pub fn stop_monitoring_session(&self, id: SessionId) -> Option<SessionStats> {
        let mut entry = self.sessions.lock().unwrap().remove(&id)?;
        entry.watcher.stop();
        entry.consumer.abort();
        entry.health.abort();

        let mut session = entry.session.lock().unwrap();
        session.is_active = false;
        let stats = SessionStats {
            transfers_detected: session.transfers_detected,
            transfers_processed: session.transfers_processed,
            total_value_recovered: session.total_value_recovered,
        };
        info!(
            "{id} stopped: {} detected / {} processed",
            stats.transfers_detected, stats.transfers_processed
        );
        Some(stats)
    }

    pub fn stop_all(&self) {
        let ids: Vec<SessionId> = self.sessions.lock().unwrap().keys().copied().collect();
        for id in ids {
            let _ = self.stop_monitoring_session(id);
        }
    }

    /// Current sessions with their live counters.
    pub fn active_sessions(&self) -> Vec<(SessionId, MonitoringSession)> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .map(|(id, entry)| (*id, entry.session.lock().unwrap().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::collections::HashSet;
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            rpc_http_url: "http://localhost:8545".to_string(),
            rpc_ws_url: None,
            jar_address: alloy::primitives::Address::repeat_byte(0x01),
            signer_key: None,
            scan_interval: Duration::from_secs(30),
            blocks_per_batch: 2_000,
            max_retries: 1,
            request_timeout: Duration::from_secs(1),
            realtime_enabled: false,
            auto_recover: false,
            token_allowlist: HashSet::new(),
            min_amount: U256::ZERO,
            health_interval: Duration::from_secs(300),
            port: 0,
        }
    }

    #[tokio::test]
    async fn stopping_an_unknown_session_returns_none() {
        let client = Arc::new(JarClient::connect(test_config()).await.expect("connect"));
        let store = Arc::new(TransferStore::new());
        let planner = Arc::new(RecoveryPlanner::new(Arc::clone(&client), Arc::clone(&store)));
        let manager = SessionManager::new(client, store, planner, Arc::new(NoopEvents));

        assert!(manager.stop_monitoring_session(SessionId(999)).is_none());
        assert!(manager.active_sessions().is_empty());
    }
}
