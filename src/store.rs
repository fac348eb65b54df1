use crate::models::DetectedTransfer;
use alloy::primitives::{Address, B256};
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::RwLock;

/// In-memory transfer set shared between the watcher, the session manager
/// and the query API. Nothing is persisted; the ledger itself is the
/// durable record.
#[derive(Default)]
pub struct TransferStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    transfers: Vec<DetectedTransfer>,
    keys: HashSet<(B256, u64)>,
}

impl TransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a transfer; false when its identity key is already present.
    pub fn insert(&self, transfer: DetectedTransfer) -> bool {
        let mut inner = self.inner.write().unwrap();
        if !inner.keys.insert(transfer.key()) {
            return false;
        }
        inner.transfers.push(transfer);
        true
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most recent transfers first.
    pub fn latest(&self, limit: usize) -> Vec<DetectedTransfer> {
        let inner = self.inner.read().unwrap();
        inner.transfers.iter().rev().take(limit).cloned().collect()
    }

    pub fn direct_transfers(&self) -> Vec<DetectedTransfer> {
        self.inner
            .read()
            .unwrap()
            .transfers
            .iter()
            .filter(|t| t.is_direct_transfer)
            .cloned()
            .collect()
    }

    /// Transfers whose block timestamp falls inside the trailing window.
    pub fn recent_transfers(&self, window_hours: u64) -> Vec<DetectedTransfer> {
        let cutoff = Utc::now() - Duration::hours(window_hours as i64);
        let cutoff = cutoff.timestamp().max(0) as u64;
        self.inner
            .read()
            .unwrap()
            .transfers
            .iter()
            .filter(|t| t.block_timestamp >= cutoff)
            .cloned()
            .collect()
    }

    pub fn token_transfers(&self, token: Address) -> Vec<DetectedTransfer> {
        self.inner
            .read()
            .unwrap()
            .transfers
            .iter()
            .filter(|t| t.token_address == token)
            .cloned()
            .collect()
    }

    /// Distinct token addresses in first-seen order.
    pub fn unique_tokens(&self) -> Vec<Address> {
        let inner = self.inner.read().unwrap();
        let mut out = Vec::new();
        for t in &inner.transfers {
            if !out.contains(&t.token_address) {
                out.push(t.token_address);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;

    fn transfer(tx: u8, log_index: u64, direct: bool, timestamp: u64) -> DetectedTransfer {
        DetectedTransfer {
            token_address: Address::repeat_byte(0xaa),
            token_symbol: "TOK".to_string(),
            token_decimals: 18,
            from: Address::repeat_byte(0xbb),
            amount: U256::from(1u64),
            formatted_amount: "0.000000000000000001".to_string(),
            block_number: 100,
            block_timestamp: timestamp,
            tx_hash: B256::repeat_byte(tx),
            log_index,
            is_direct_transfer: direct,
            is_jar_call: !direct,
            gas_used: Some(50_000),
            gas_price: Some(1_000_000_000),
        }
    }

    #[test]
    fn rejects_duplicate_identity_keys() {
        let store = TransferStore::new();
        assert!(store.insert(transfer(1, 0, true, 0)));
        assert!(!store.insert(transfer(1, 0, false, 0)));
        assert!(store.insert(transfer(1, 1, true, 0)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn filters_direct_transfers() {
        let store = TransferStore::new();
        store.insert(transfer(1, 0, true, 0));
        store.insert(transfer(2, 0, false, 0));
        store.insert(transfer(3, 0, true, 0));
        assert_eq!(store.direct_transfers().len(), 2);
    }

    #[test]
    fn windows_recent_transfers_by_timestamp() {
        let store = TransferStore::new();
        let now = Utc::now().timestamp() as u64;
        store.insert(transfer(1, 0, true, now));
        store.insert(transfer(2, 0, true, now - 2 * 3600));
        store.insert(transfer(3, 0, true, now - 48 * 3600));
        assert_eq!(store.recent_transfers(24).len(), 2);
        assert_eq!(store.recent_transfers(1).len(), 1);
    }

    #[test]
    fn filters_by_token() {
        let store = TransferStore::new();
        let mut other = transfer(1, 0, true, 0);
        other.token_address = Address::repeat_byte(0xcc);
        store.insert(other);
        store.insert(transfer(2, 0, true, 0));
        assert_eq!(store.token_transfers(Address::repeat_byte(0xaa)).len(), 1);
        assert_eq!(store.unique_tokens().len(), 2);
    }
}
