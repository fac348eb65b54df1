use crate::client::JarClient;
use crate::error::{MonitorError, Result};
use crate::models::DetectedTransfer;
use crate::scanner::LogScanner;
use alloy::primitives::{B256, U256};
use futures_util::StreamExt;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Remembers recently forwarded `(tx_hash, log_index)` keys so the push
/// feed and the catch-up scan cannot deliver the same transfer twice.
struct RecentKeys {
    seen: HashSet<(B256, u64)>,
    order: VecDeque<(B256, u64)>,
    capacity: usize,
}

impl RecentKeys {
    fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// True when the key was not seen before. Oldest keys age out first.
    fn insert(&mut self, key: (B256, u64)) -> bool {
        if !self.seen.insert(key) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatcherState {
    Stopped,
    Active,
}

/// Long-running monitor for one jar: a push subscription for immediacy and
/// a periodic catch-up scan for resilience. Either path may observe an
/// event first; the dedup window keeps the consumer-visible effect
/// idempotent per identity key.
pub struct RealTimeWatcher {
    client: Arc<JarClient>,
    state: WatcherState,
    shutdown: Option<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl RealTimeWatcher {
    pub fn new(client: Arc<JarClient>) -> Self {
        Self {
            client,
            state: WatcherState::Stopped,
            shutdown: None,
            tasks: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == WatcherState::Active
    }

    /// Begin monitoring; every fresh transfer is delivered on `out`.
    /// Starting an already-active watcher is a precondition violation.
    pub async fn start(&mut self, out: mpsc::UnboundedSender<DetectedTransfer>) -> Result<()> {
        if self.state == WatcherState::Active {
            return Err(MonitorError::WatcherActive);
        }

        let baseline = self.client.block_number().await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dedup = Arc::new(Mutex::new(RecentKeys::new(4096)));
        let min_amount = self.client.config().min_amount;

        // ---------------------------
        // Push subscription
        // ---------------------------
        if self.client.has_push() {
            let client = Arc::clone(&self.client);
            let out = out.clone();
            let dedup = Arc::clone(&dedup);
            let mut shutdown = shutdown_rx.clone();
            self.tasks.push(tokio::spawn(async move {
                let scanner = LogScanner::new(Arc::clone(&client));
                let sub = match client.subscribe_jar_transfers().await {
                    Ok(sub) => sub,
                    Err(err) => {
                        warn!("push subscription unavailable, catch-up scans only: {err}");
                        return;
                    }
                };
                info!("📡 subscribed to live transfer events");
                let mut stream = sub.into_stream();
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        maybe_log = stream.next() => {
                            let Some(log) = maybe_log else {
                                warn!("push subscription closed; catch-up scans continue");
                                break;
                            };
                            if let Some(transfer) = scanner.decode_and_enrich(&log).await {
                                forward(&out, &dedup, min_amount, transfer);
                            }
                        }
                    }
                }
            }));
        } else {
            info!("no WS endpoint configured; running in polling-only mode");
        }

        // ---------------------------
        // Periodic catch-up scan
        // ---------------------------
        {
            let client = Arc::clone(&self.client);
            let out = out.clone();
            let dedup = Arc::clone(&dedup);
            let mut shutdown = shutdown_rx.clone();
            let scan_interval = self.client.config().scan_interval;
            self.tasks.push(tokio::spawn(async move {
                let scanner = LogScanner::new(Arc::clone(&client));
                let mut last_scanned = baseline;
                let mut ticker = interval(scan_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = ticker.tick() => {
                            let head = match client.block_number().await {
                                Ok(head) => head,
                                Err(err) => {
                                    warn!("catch-up tick skipped, head lookup failed: {err}");
                                    continue;
                                }
                            };
                            if head <= last_scanned {
                                continue;
                            }
                            match scanner.scan_block_range(last_scanned + 1, head).await {
                                Ok(transfers) => {
                                    for transfer in transfers {
                                        forward(&out, &dedup, min_amount, transfer);
                                    }
                                    // Monotone: a covered block is never re-scanned.
                                    last_scanned = head;
                                }
                                Err(err) => {
                                    warn!("catch-up scan failed, retrying next tick: {err}")
                                }
                            }
                        }
                    }
                }
            }));
        }

        self.shutdown = Some(shutdown_tx);
        self.state = WatcherState::Active;
        info!("watcher active from block {baseline}");
        Ok(())
    }

    /// Cancel the subscription and the timer. Idempotent.
    pub fn stop(&mut self) {
        if self.state == WatcherState::Stopped {
            return;
        }
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.state = WatcherState::Stopped;
        info!("watcher stopped");
    }
}

impl Drop for RealTimeWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn forward(
    out: &mpsc::UnboundedSender<DetectedTransfer>,
    dedup: &Mutex<RecentKeys>,
    min_amount: U256,
    transfer: DetectedTransfer,
) {
    if transfer.amount < min_amount {
        debug!(
            "ignoring transfer {}#{} below the minimum amount",
            transfer.tx_hash, transfer.log_index
        );
        return;
    }
    if !dedup.lock().unwrap().insert(transfer.key()) {
        debug!(
            "duplicate delivery of {}#{} suppressed",
            transfer.tx_hash, transfer.log_index
        );
        return;
    }
    if out.send(transfer).is_err() {
        debug!("transfer consumer dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_keys_reject_repeats() {
        let mut keys = RecentKeys::new(10);
        let key = (B256::repeat_byte(1), 0);
        assert!(keys.insert(key));
        assert!(!keys.insert(key));
        assert!(keys.insert((B256::repeat_byte(1), 1)));
    }

    #[test]
    fn recent_keys_evict_oldest_at_capacity() {
        let mut keys = RecentKeys::new(2);
        let a = (B256::repeat_byte(1), 0);
        let b = (B256::repeat_byte(2), 0);
        let c = (B256::repeat_byte(3), 0);
        assert!(keys.insert(a));
        assert!(keys.insert(b));
        assert!(keys.insert(c)); // evicts a
        assert!(keys.insert(a)); // a is forgotten, accepted again
        assert!(!keys.insert(c));
    }
}
