use crate::client::JarClient;
use crate::error::Result;
use crate::models::{
    AnomalyReport, DetectedTransfer, JarAnalysis, Recommendations, SenderActivity,
};
use crate::scanner::{BlockTarget, LogScanner};
use alloy::primitives::{Address, U256};
use std::collections::HashSet;
use std::sync::Arc;

/// Gas ceiling above which a transfer is flagged suspicious.
pub const SUSPICIOUS_GAS: u64 = 500_000;
/// Canonical minimum gas of a plain transfer.
pub const MIN_TRANSFER_GAS: u64 = 21_000;
/// Transfer count beyond which auto-processing gets suggested.
const AUTO_PROCESS_SUGGESTION_THRESHOLD: usize = 10;

/// Aggregates scanned transfers into statistics, categories and anomaly
/// reports. Holds its own scanner; all heavy lifting is in the pure
/// functions below so it stays testable without a ledger.
pub struct AnalysisEngine {
    scanner: LogScanner,
    allowlist: HashSet<Address>,
}

impl AnalysisEngine {
    pub fn new(client: Arc<JarClient>) -> Self {
        let allowlist = client.config().token_allowlist.clone();
        Self {
            scanner: LogScanner::new(client),
            allowlist,
        }
    }

    /// Scan the range and return the raw transfer set, owned by the caller.
    pub async fn scan_transfers(
        &self,
        from_block: u64,
        to_block: impl Into<BlockTarget>,
    ) -> Result<Vec<DetectedTransfer>> {
        self.scanner.scan_block_range(from_block, to_block).await
    }

    /// Scan the range and partition the result.
    pub async fn analyze_jar(
        &self,
        from_block: u64,
        to_block: impl Into<BlockTarget>,
    ) -> Result<JarAnalysis> {
        let transfers = self.scan_transfers(from_block, to_block).await?;
        Ok(partition_transfers(&transfers))
    }

    pub fn detect_anomalies(&self, transfers: &[DetectedTransfer]) -> AnomalyReport {
        detect_anomalies(transfers, &self.allowlist)
    }

    pub fn generate_recommendations(&self, analysis: &JarAnalysis) -> Recommendations {
        generate_recommendations(analysis)
    }
}

/// Partition a transfer set into the standard categories and totals.
pub fn partition_transfers(transfers: &[DetectedTransfer]) -> JarAnalysis {
    let direct: Vec<_> = transfers
        .iter()
        .filter(|t| t.is_direct_transfer)
        .cloned()
        .collect();
    let via_jar_call: Vec<_> = transfers.iter().filter(|t| t.is_jar_call).cloned().collect();
    let suspicious: Vec<_> = transfers
        .iter()
        .filter(|t| t.gas_used.is_some_and(|g| g > SUSPICIOUS_GAS) || t.amount.is_zero())
        .cloned()
        .collect();

    let total_value = transfers
        .iter()
        .fold(U256::ZERO, |acc, t| acc.saturating_add(t.amount));

    let mut unique_tokens: Vec<Address> = Vec::new();
    for t in transfers {
        if !unique_tokens.contains(&t.token_address) {
            unique_tokens.push(t.token_address);
        }
    }

    let time_range = transfers
        .iter()
        .map(|t| t.block_timestamp)
        .fold(None, |acc: Option<(u64, u64)>, ts| {
            Some(match acc {
                None => (ts, ts),
                Some((lo, hi)) => (lo.min(ts), hi.max(ts)),
            })
        });

    JarAnalysis {
        total_transfers: transfers.len(),
        direct,
        via_jar_call,
        suspicious,
        total_value,
        unique_tokens,
        time_range,
    }
}

/// Flag statistical outliers in a transfer set.
pub fn detect_anomalies(
    transfers: &[DetectedTransfer],
    allowlist: &HashSet<Address>,
) -> AnomalyReport {
    // Top 10% by amount; stable sort keeps ties in input order.
    let take = transfers.len().div_ceil(10);
    let mut by_amount: Vec<&DetectedTransfer> = transfers.iter().collect();
    by_amount.sort_by(|a, b| b.amount.cmp(&a.amount));
    let high_value_transfers: Vec<DetectedTransfer> =
        by_amount.into_iter().take(take).cloned().collect();

    // Per-sender aggregation, repeat senders only, busiest first.
    let mut frequent_senders: Vec<SenderActivity> = Vec::new();
    for t in transfers {
        match frequent_senders.iter_mut().find(|s| s.sender == t.from) {
            Some(s) => {
                s.count += 1;
                s.total_amount = s.total_amount.saturating_add(t.amount);
            }
            None => frequent_senders.push(SenderActivity {
                sender: t.from,
                count: 1,
                total_amount: t.amount,
            }),
        }
    }
    frequent_senders.retain(|s| s.count > 1);
    frequent_senders.sort_by(|a, b| b.count.cmp(&a.count));

    let mut unusual_tokens: Vec<Address> = Vec::new();
    for t in transfers {
        if !allowlist.contains(&t.token_address) && !unusual_tokens.contains(&t.token_address) {
            unusual_tokens.push(t.token_address);
        }
    }

    let gas_values: Vec<u64> = transfers.iter().filter_map(|t| t.gas_used).collect();
    let mean_gas = if gas_values.is_empty() {
        0
    } else {
        gas_values.iter().sum::<u64>() / gas_values.len() as u64
    };
    let gas_anomalies: Vec<DetectedTransfer> = transfers
        .iter()
        .filter(|t| {
            t.gas_used.is_some_and(|g| {
                (mean_gas > 0 && g > mean_gas.saturating_mul(3)) || g < MIN_TRANSFER_GAS
            })
        })
        .cloned()
        .collect();

    AnomalyReport {
        high_value_transfers,
        frequent_senders,
        unusual_tokens,
        gas_anomalies,
    }
}

/// Free-text guidance in three urgency buckets.
pub fn generate_recommendations(analysis: &JarAnalysis) -> Recommendations {
    let mut rec = Recommendations::default();

    // Immediate: every direct transfer bypassed the jar's own accounting.
    for t in &analysis.direct {
        rec.immediate.push(format!(
            "Recover {} {} sent directly by {} in tx {}",
            t.formatted_amount, t.token_symbol, t.from, t.tx_hash
        ));
    }
    if !analysis.direct.is_empty() {
        rec.immediate.push(format!(
            "{} direct transfer(s) require recovery",
            analysis.direct.len()
        ));
    }

    // Suggested: heuristics over token diversity and routing mix.
    if analysis.unique_tokens.len() > 3 {
        rec.suggested.push(format!(
            "{} distinct tokens seen; review the monitored-token list",
            analysis.unique_tokens.len()
        ));
    }
    if analysis.direct.len() > analysis.via_jar_call.len() {
        rec.suggested.push(
            "Direct transfers outnumber jar deposits; consider publicising the deposit flow"
                .to_string(),
        );
    }
    if !analysis.suspicious.is_empty() {
        rec.suggested.push(format!(
            "{} suspicious transfer(s) flagged; inspect before recovery",
            analysis.suspicious.len()
        ));
    }

    // Monitoring: one watch item per token seen.
    for token in &analysis.unique_tokens {
        rec.monitoring
            .push(format!("Watch token {token} for further direct transfers"));
    }
    if analysis.total_transfers > AUTO_PROCESS_SUGGESTION_THRESHOLD {
        rec.monitoring.push(
            "High transfer volume; consider enabling on-chain auto-processing".to_string(),
        );
    }

    rec
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::B256;

    fn transfer(tx: u8, amount: u64, gas: u64) -> DetectedTransfer {
        DetectedTransfer {
            token_address: Address::repeat_byte(0xaa),
            token_symbol: "TOK".to_string(),
            token_decimals: 18,
            from: Address::repeat_byte(0xbb),
            amount: U256::from(amount),
            formatted_amount: amount.to_string(),
            block_number: 150,
            block_timestamp: 1_700_000_000,
            tx_hash: B256::repeat_byte(tx),
            log_index: 0,
            is_direct_transfer: false,
            is_jar_call: true,
            gas_used: Some(gas),
            gas_price: Some(1_000_000_000),
        }
    }

    #[test]
    fn partitions_and_totals_a_simple_set() {
        let transfers = vec![
            transfer(1, 1, 50_000),
            transfer(2, 2, 50_000),
            transfer(3, 5, 50_000),
        ];
        let analysis = partition_transfers(&transfers);
        assert_eq!(analysis.total_transfers, 3);
        assert_eq!(analysis.total_value, U256::from(8u64));
        assert_eq!(analysis.unique_tokens.len(), 1);
        assert_eq!(
            analysis.time_range,
            Some((1_700_000_000, 1_700_000_000))
        );
    }

    #[test]
    fn empty_set_has_no_time_range() {
        let analysis = partition_transfers(&[]);
        assert_eq!(analysis.time_range, None);
        assert_eq!(analysis.total_value, U256::ZERO);
    }

    #[test]
    fn flags_suspicious_by_gas_and_zero_amount() {
        let transfers = vec![
            transfer(1, 10, 600_000),
            transfer(2, 0, 50_000),
            transfer(3, 10, 250_000),
        ];
        let analysis = partition_transfers(&transfers);
        let keys: Vec<_> = analysis.suspicious.iter().map(|t| t.tx_hash).collect();
        assert!(keys.contains(&B256::repeat_byte(1)));
        assert!(keys.contains(&B256::repeat_byte(2)));
        assert!(!keys.contains(&B256::repeat_byte(3)));
    }

    #[test]
    fn direct_and_jar_call_partitions_are_independent() {
        let mut routed = transfer(1, 5, 50_000);
        routed.is_direct_transfer = false;
        routed.is_jar_call = false;
        let mut direct = transfer(2, 5, 50_000);
        direct.is_direct_transfer = true;
        direct.is_jar_call = false;

        let analysis = partition_transfers(&[routed, direct]);
        assert_eq!(analysis.direct.len(), 1);
        assert_eq!(analysis.via_jar_call.len(), 0);
    }

    #[test]
    fn frequent_senders_are_repeat_senders_sorted_by_count() {
        let mut transfers = Vec::new();
        for i in 0..3u8 {
            let mut t = transfer(i, 10, 50_000);
            t.from = Address::repeat_byte(0x01);
            t.tx_hash = B256::repeat_byte(i);
            transfers.push(t);
        }
        for i in 3..5u8 {
            let mut t = transfer(i, 10, 50_000);
            t.from = Address::repeat_byte(0x02);
            transfers.push(t);
        }
        let mut once = transfer(9, 10, 50_000);
        once.from = Address::repeat_byte(0x03);
        transfers.push(once);

        let report = detect_anomalies(&transfers, &HashSet::new());
        assert_eq!(report.frequent_senders.len(), 2);
        assert_eq!(report.frequent_senders[0].sender, Address::repeat_byte(0x01));
        assert_eq!(report.frequent_senders[0].count, 3);
        assert_eq!(report.frequent_senders[1].count, 2);
        assert!(report.frequent_senders.iter().all(|s| s.count > 1));
    }

    #[test]
    fn high_value_takes_the_top_decile() {
        let transfers: Vec<_> = (0..20u8).map(|i| transfer(i, i as u64 + 1, 50_000)).collect();
        let report = detect_anomalies(&transfers, &HashSet::new());
        assert_eq!(report.high_value_transfers.len(), 2);
        assert_eq!(report.high_value_transfers[0].amount, U256::from(20u64));
        assert_eq!(report.high_value_transfers[1].amount, U256::from(19u64));
    }

    #[test]
    fn gas_anomalies_flag_extremes() {
        let transfers = vec![
            transfer(1, 10, 50_000),
            transfer(2, 10, 50_000),
            transfer(3, 10, 50_000),
            transfer(4, 10, 400_000), // > 3x mean
            transfer(5, 10, 20_000),  // below the 21000 floor
        ];
        let report = detect_anomalies(&transfers, &HashSet::new());
        let keys: Vec<_> = report.gas_anomalies.iter().map(|t| t.tx_hash).collect();
        assert!(keys.contains(&B256::repeat_byte(4)));
        assert!(keys.contains(&B256::repeat_byte(5)));
        assert!(!keys.contains(&B256::repeat_byte(1)));
    }

    #[test]
    fn unusual_tokens_respect_the_allowlist() {
        let allowed = Address::repeat_byte(0xaa);
        let odd = Address::repeat_byte(0xdd);
        let mut strange = transfer(2, 10, 50_000);
        strange.token_address = odd;

        let allowlist: HashSet<Address> = [allowed].into_iter().collect();
        let report = detect_anomalies(&[transfer(1, 10, 50_000), strange], &allowlist);
        assert_eq!(report.unusual_tokens, vec![odd]);
    }

    #[test]
    fn recommendations_fill_all_three_buckets() {
        let mut direct = transfer(1, 10, 50_000);
        direct.is_direct_transfer = true;
        direct.is_jar_call = false;
        let analysis = partition_transfers(&[direct]);
        let rec = generate_recommendations(&analysis);

        assert_eq!(rec.immediate.len(), 2); // one per direct + summary
        assert!(!rec.suggested.is_empty()); // direct outnumber jar calls
        assert_eq!(rec.monitoring.len(), 1); // one per unique token
    }
}
