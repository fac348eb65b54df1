// src/models.rs
use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

/// One observed token movement into the jar.
///
/// `is_direct_transfer` and `is_jar_call` are computed independently from
/// the originating transaction's target; a transfer routed through a
/// third-party contract has both set to false.
#[derive(Debug, Clone, Serialize)]
pub struct DetectedTransfer {
    pub token_address: Address,
    pub token_symbol: String,
    pub token_decimals: u8,
    pub from: Address,
    pub amount: U256,
    pub formatted_amount: String,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    pub is_direct_transfer: bool,
    pub is_jar_call: bool,
    pub gas_used: Option<u64>,
    pub gas_price: Option<u128>,
}

impl DetectedTransfer {
    /// Identity key; unique within any aggregated set.
    pub fn key(&self) -> (B256, u64) {
        (self.tx_hash, self.log_index)
    }
}

/// Render a raw token amount in whole-token units.
pub fn format_token_amount(amount: U256, decimals: u8) -> String {
    if decimals <= 28 {
        if let Some(mut value) = u128::try_from(amount).ok().and_then(Decimal::from_u128) {
            if value.set_scale(u32::from(decimals)).is_ok() {
                return value.normalize().to_string();
            }
        }
    }
    // Raw units once outside Decimal's range.
    amount.to_string()
}

/// Aggregate over a scanned block range. Derived, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct JarAnalysis {
    pub total_transfers: usize,
    pub direct: Vec<DetectedTransfer>,
    pub via_jar_call: Vec<DetectedTransfer>,
    pub suspicious: Vec<DetectedTransfer>,
    pub total_value: U256,
    pub unique_tokens: Vec<Address>,
    /// `(min, max)` block timestamp over the set; `None` when empty.
    pub time_range: Option<(u64, u64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SenderActivity {
    pub sender: Address,
    pub count: usize,
    pub total_amount: U256,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnomalyReport {
    pub high_value_transfers: Vec<DetectedTransfer>,
    pub frequent_senders: Vec<SenderActivity>,
    pub unusual_tokens: Vec<Address>,
    pub gas_anomalies: Vec<DetectedTransfer>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Recommendations {
    pub immediate: Vec<String>,
    pub suggested: Vec<String>,
    pub monitoring: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryKind {
    Emergency,
    Process,
    Configure,
    Scan,
}

impl RecoveryKind {
    /// Lower sorts first in a plan.
    pub fn priority(self) -> u8 {
        match self {
            RecoveryKind::Emergency => 0,
            RecoveryKind::Process => 1,
            RecoveryKind::Configure => 2,
            RecoveryKind::Scan => 3,
        }
    }
}

/// A planned remediation, regenerated on each analysis pass.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryAction {
    pub kind: RecoveryKind,
    pub description: String,
    pub token: Option<Address>,
    pub amount: Option<U256>,
    pub gas_estimate: Option<u64>,
}

/// Snapshot of the jar's condition; recomputed whole on every check.
#[derive(Debug, Clone, Serialize)]
pub struct JarHealth {
    pub address: Address,
    pub is_healthy: bool,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub last_checked: DateTime<Utc>,
}

/// One continuous watch lifecycle for a single jar.
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringSession {
    pub jar_address: Address,
    pub started_at: DateTime<Utc>,
    pub transfers_detected: u64,
    pub transfers_processed: u64,
    pub total_value_recovered: U256,
    pub is_active: bool,
}

/// Final counters returned when a session stops.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub transfers_detected: u64,
    pub transfers_processed: u64,
    pub total_value_recovered: U256,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_whole_token_amounts() {
        let amount = U256::from(1_500_000_000_000_000_000u128); // 1.5 * 10^18
        assert_eq!(format_token_amount(amount, 18), "1.5");
    }

    #[test]
    fn formats_zero() {
        assert_eq!(format_token_amount(U256::ZERO, 18), "0");
    }

    #[test]
    fn formats_six_decimal_tokens() {
        assert_eq!(format_token_amount(U256::from(2_000_000u64), 6), "2");
        assert_eq!(format_token_amount(U256::from(2_500_000u64), 6), "2.5");
    }

    #[test]
    fn falls_back_to_raw_units_for_huge_amounts() {
        let amount = U256::MAX;
        assert_eq!(format_token_amount(amount, 18), amount.to_string());
    }
}
