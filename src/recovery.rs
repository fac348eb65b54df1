use crate::analysis::{generate_recommendations, partition_transfers, AnalysisEngine};
use crate::client::{JarClient, JarStateSnapshot};
use crate::error::{MonitorError, Result};
use crate::models::{
    AnomalyReport, JarAnalysis, JarHealth, Recommendations, RecoveryAction, RecoveryKind,
};
use crate::scanner::BlockTarget;
use crate::store::TransferStore;
use alloy::primitives::{Address, B256, U256};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything one full pass produces: the off-chain view, the on-chain
/// view, and the plan that reconciles them.
#[derive(Debug, Clone)]
pub struct FullAnalysis {
    pub analysis: JarAnalysis,
    pub anomalies: AnomalyReport,
    pub recommendations: Recommendations,
    pub snapshot: JarStateSnapshot,
    pub actions: Vec<RecoveryAction>,
}

#[derive(Debug, Clone, Default)]
pub struct AutoRecoverOptions {
    pub from_block: u64,
    /// Plan but do not execute.
    pub dry_run: bool,
    /// Skip actions whose estimated fee exceeds this many wei.
    pub max_fee_wei: Option<U256>,
}

#[derive(Debug, Clone, Default)]
pub struct RecoveryOutcome {
    pub executed: Vec<(RecoveryAction, B256)>,
    pub skipped: Vec<RecoveryAction>,
    pub failed: Vec<(RecoveryAction, String)>,
}

/// Cross-references off-chain scan results against on-chain contract state
/// and turns the differences into an ordered action plan.
pub struct RecoveryPlanner {
    client: Arc<JarClient>,
    engine: AnalysisEngine,
    store: Arc<TransferStore>,
}

impl RecoveryPlanner {
    pub fn new(client: Arc<JarClient>, store: Arc<TransferStore>) -> Self {
        Self {
            engine: AnalysisEngine::new(Arc::clone(&client)),
            client,
            store,
        }
    }

    /// Scan from `from_block` to the head, read the jar's own bookkeeping,
    /// and produce the prioritized recovery plan.
    pub async fn perform_full_analysis(&self, from_block: u64) -> Result<FullAnalysis> {
        let transfers = self
            .engine
            .scan_transfers(from_block, BlockTarget::Head)
            .await?;
        let analysis = partition_transfers(&transfers);
        let anomalies = self.engine.detect_anomalies(&transfers);
        let recommendations = generate_recommendations(&analysis);

        let snapshot = self.client.jar_state_snapshot(&analysis.unique_tokens).await?;
        let mut actions = plan_recovery_actions(&analysis, &snapshot);

        // Best-effort gas estimates; failures leave the estimate empty.
        for action in &mut actions {
            match self.client.estimate_action_gas(action.kind, action.token).await {
                Ok(gas) => action.gas_estimate = Some(gas),
                Err(err) => {
                    debug!("gas estimate for `{}` unavailable: {err}", action.description)
                }
            }
        }

        info!(
            "full analysis: {} transfer(s), {} action(s) planned",
            analysis.total_transfers,
            actions.len()
        );

        Ok(FullAnalysis {
            analysis,
            anomalies,
            recommendations,
            snapshot,
            actions,
        })
    }

    /// Health of the jar's bookkeeping. Read failures never escape: they
    /// yield an unhealthy result with a diagnostic issue instead.
    pub async fn check_jar_health(&self) -> JarHealth {
        let address = self.client.jar_address();
        let tokens_seen = self.store.unique_tokens();
        match self.client.jar_state_snapshot(&tokens_seen).await {
            Ok(snapshot) => evaluate_jar_health(address, &snapshot, &tokens_seen),
            Err(err) => {
                let err = MonitorError::HealthCheck(err.to_string());
                JarHealth {
                    address,
                    is_healthy: false,
                    issues: vec![err.to_string()],
                    recommendations: vec!["Verify RPC connectivity and retry".to_string()],
                    last_checked: Utc::now(),
                }
            }
        }
    }

    /// Plan and execute recovery actions sequentially. Individual failures
    /// are collected; the remaining actions still run.
    pub async fn auto_recover(&self, options: AutoRecoverOptions) -> Result<RecoveryOutcome> {
        let full = self.perform_full_analysis(options.from_block).await?;
        let mut outcome = RecoveryOutcome::default();

        if options.dry_run {
            info!("dry run: {} recovery action(s) planned", full.actions.len());
            outcome.skipped = full.actions;
            return Ok(outcome);
        }

        let gas_price = match options.max_fee_wei {
            Some(_) => Some(self.client.gas_price().await?),
            None => None,
        };

        for action in full.actions {
            if let (Some(max_fee), Some(price), Some(gas)) =
                (options.max_fee_wei, gas_price, action.gas_estimate)
            {
                let fee = U256::from(gas).saturating_mul(U256::from(price));
                if fee > max_fee {
                    info!(
                        "skipping `{}`: estimated fee {fee} above limit {max_fee}",
                        action.description
                    );
                    outcome.skipped.push(action);
                    continue;
                }
            }
            match self.execute_action(&action).await {
                Ok(tx_hash) => {
                    info!("executed `{}` in tx {tx_hash}", action.description);
                    outcome.executed.push((action, tx_hash));
                }
                Err(err) => {
                    warn!("recovery action `{}` failed: {err}", action.description);
                    outcome.failed.push((action, err.to_string()));
                }
            }
        }
        Ok(outcome)
    }

    /// Submit one planned action and wait for confirmation.
    pub async fn execute_action(&self, action: &RecoveryAction) -> Result<B256> {
        self.client
            .execute_action(action.kind, action.token)
            .await
            .map_err(|err| MonitorError::ActionExecution {
                description: action.description.clone(),
                reason: err.to_string(),
            })
    }

    /// Single-token fast path used by auto-recovering sessions.
    pub async fn recover_token(&self, token: Address) -> Result<B256> {
        self.client
            .execute_action(RecoveryKind::Emergency, Some(token))
            .await
    }
}

/// Derive the action plan from the off-chain analysis and the jar's own
/// on-chain view. Pure; ordering is by kind priority, stable within a kind.
pub fn plan_recovery_actions(
    analysis: &JarAnalysis,
    snapshot: &JarStateSnapshot,
) -> Vec<RecoveryAction> {
    let mut actions = Vec::new();

    // Tokens arriving directly but unknown to the contract come first in
    // discovery order, one configure action each.
    let mut unmonitored: Vec<Address> = Vec::new();
    for t in &analysis.direct {
        if !snapshot.monitored_tokens.contains(&t.token_address)
            && !unmonitored.contains(&t.token_address)
        {
            unmonitored.push(t.token_address);
        }
    }
    for token in unmonitored {
        actions.push(RecoveryAction {
            kind: RecoveryKind::Configure,
            description: format!("Enable monitoring for token {token}"),
            token: Some(token),
            amount: None,
            gas_estimate: None,
        });
    }

    // The contract lags the off-chain view: ask it to re-scan.
    if analysis.total_transfers as u64 > snapshot.on_chain_detected_count {
        actions.push(RecoveryAction {
            kind: RecoveryKind::Scan,
            description: format!(
                "Trigger on-chain scan: {} transfer(s) observed vs {} recorded",
                analysis.total_transfers, snapshot.on_chain_detected_count
            ),
            token: None,
            amount: None,
            gas_estimate: None,
        });
    }

    for (token, balance) in &snapshot.unaccounted {
        if !balance.is_zero() {
            actions.push(RecoveryAction {
                kind: RecoveryKind::Emergency,
                description: format!("Emergency-recover unaccounted balance of token {token}"),
                token: Some(*token),
                amount: Some(*balance),
                gas_estimate: None,
            });
        }
    }

    for (token, balance) in &snapshot.pending {
        if !balance.is_zero() {
            actions.push(RecoveryAction {
                kind: RecoveryKind::Process,
                description: format!("Process pending balance of token {token}"),
                token: Some(*token),
                amount: Some(*balance),
                gas_estimate: None,
            });
        }
    }

    actions.sort_by_key(|a| a.kind.priority());
    actions
}

/// Health rules: healthy iff no unaccounted balances, no pending balances,
/// and every token seen in transfers is monitored. Each violation appends
/// an issue and a matching recommendation.
pub fn evaluate_jar_health(
    address: Address,
    snapshot: &JarStateSnapshot,
    tokens_seen: &[Address],
) -> JarHealth {
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    for (token, balance) in &snapshot.unaccounted {
        if !balance.is_zero() {
            issues.push(format!("unaccounted balance of {balance} on token {token}"));
            recommendations.push(format!("Run emergency recovery for {token}"));
        }
    }
    for (token, balance) in &snapshot.pending {
        if !balance.is_zero() {
            issues.push(format!("pending balance of {balance} on token {token}"));
            recommendations.push(format!("Process the pending balance of {token}"));
        }
    }
    for token in tokens_seen {
        if !snapshot.monitored_tokens.contains(token) {
            issues.push(format!("token {token} seen in transfers but not monitored"));
            recommendations.push(format!("Enable monitoring for {token}"));
        }
    }

    JarHealth {
        address,
        is_healthy: issues.is_empty(),
        issues,
        recommendations,
        last_checked: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::partition_transfers;
    use crate::models::DetectedTransfer;

    fn direct_transfer(tx: u8, token: Address) -> DetectedTransfer {
        DetectedTransfer {
            token_address: token,
            token_symbol: "TOK".to_string(),
            token_decimals: 18,
            from: Address::repeat_byte(0xbb),
            amount: U256::from(5u64),
            formatted_amount: "5".to_string(),
            block_number: 120,
            block_timestamp: 1_700_000_000,
            tx_hash: B256::repeat_byte(tx),
            log_index: 0,
            is_direct_transfer: true,
            is_jar_call: false,
            gas_used: Some(60_000),
            gas_price: Some(1_000_000_000),
        }
    }

    fn empty_snapshot() -> JarStateSnapshot {
        JarStateSnapshot {
            monitored_tokens: Vec::new(),
            on_chain_detected_count: 0,
            unaccounted: Vec::new(),
            pending: Vec::new(),
            jar_balances: Vec::new(),
        }
    }

    #[test]
    fn one_configure_action_per_unmonitored_direct_token() {
        let token = Address::repeat_byte(0xaa);
        let analysis = partition_transfers(&[
            direct_transfer(1, token),
            direct_transfer(2, token), // same token twice
        ]);
        let mut snapshot = empty_snapshot();
        snapshot.on_chain_detected_count = 2; // no scan action

        let actions = plan_recovery_actions(&analysis, &snapshot);
        let configures: Vec<_> = actions
            .iter()
            .filter(|a| a.kind == RecoveryKind::Configure)
            .collect();
        assert_eq!(configures.len(), 1);
        assert_eq!(configures[0].token, Some(token));
    }

    #[test]
    fn monitored_tokens_get_no_configure_action() {
        let token = Address::repeat_byte(0xaa);
        let analysis = partition_transfers(&[direct_transfer(1, token)]);
        let mut snapshot = empty_snapshot();
        snapshot.monitored_tokens.push(token);
        snapshot.on_chain_detected_count = 1;

        let actions = plan_recovery_actions(&analysis, &snapshot);
        assert!(actions.iter().all(|a| a.kind != RecoveryKind::Configure));
    }

    #[test]
    fn scan_action_when_contract_lags() {
        let token = Address::repeat_byte(0xaa);
        let analysis = partition_transfers(&[direct_transfer(1, token)]);
        let mut snapshot = empty_snapshot();
        snapshot.monitored_tokens.push(token);
        snapshot.on_chain_detected_count = 0;

        let actions = plan_recovery_actions(&analysis, &snapshot);
        assert_eq!(
            actions
                .iter()
                .filter(|a| a.kind == RecoveryKind::Scan)
                .count(),
            1
        );
    }

    #[test]
    fn balances_yield_emergency_and_process_actions_in_priority_order() {
        let token = Address::repeat_byte(0xaa);
        let other = Address::repeat_byte(0xcc);
        let analysis = partition_transfers(&[direct_transfer(1, token)]);
        let mut snapshot = empty_snapshot();
        snapshot.unaccounted.push((token, U256::from(7u64)));
        snapshot.pending.push((other, U256::from(3u64)));
        snapshot.on_chain_detected_count = 5;

        let actions = plan_recovery_actions(&analysis, &snapshot);
        assert_eq!(actions[0].kind, RecoveryKind::Emergency);
        assert_eq!(actions[0].amount, Some(U256::from(7u64)));
        assert_eq!(actions[1].kind, RecoveryKind::Process);
        assert_eq!(actions[2].kind, RecoveryKind::Configure);
    }

    #[test]
    fn zero_balances_produce_no_actions() {
        let token = Address::repeat_byte(0xaa);
        let analysis = partition_transfers(&[]);
        let mut snapshot = empty_snapshot();
        snapshot.monitored_tokens.push(token);
        snapshot.unaccounted.push((token, U256::ZERO));
        snapshot.pending.push((token, U256::ZERO));

        assert!(plan_recovery_actions(&analysis, &snapshot).is_empty());
    }

    #[test]
    fn health_is_healthy_iff_no_issues() {
        let jar = Address::repeat_byte(0x01);
        let token = Address::repeat_byte(0xaa);
        let mut snapshot = empty_snapshot();
        snapshot.monitored_tokens.push(token);

        let healthy = evaluate_jar_health(jar, &snapshot, &[token]);
        assert!(healthy.is_healthy);
        assert!(healthy.issues.is_empty());

        snapshot.unaccounted.push((token, U256::from(1u64)));
        let unhealthy = evaluate_jar_health(jar, &snapshot, &[token]);
        assert!(!unhealthy.is_healthy);
        assert_eq!(unhealthy.issues.len(), unhealthy.recommendations.len());
    }

    #[test]
    fn unmonitored_seen_token_is_an_issue() {
        let jar = Address::repeat_byte(0x01);
        let token = Address::repeat_byte(0xaa);
        let health = evaluate_jar_health(jar, &empty_snapshot(), &[token]);
        assert!(!health.is_healthy);
        assert_eq!(health.issues.len(), 1);
    }
}
