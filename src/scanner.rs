use crate::client::JarClient;
use crate::error::{MonitorError, Result};
use crate::models::{format_token_amount, DetectedTransfer};
use crate::parser;
use alloy::consensus::Transaction as _;
use alloy::primitives::B256;
use alloy::rpc::types::Log;
use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

fn drop_log(tx_hash: B256, log_index: u64, reason: impl Into<String>) {
    warn!(
        "{}",
        MonitorError::LogProcessing {
            tx_hash,
            log_index,
            reason: reason.into(),
        }
    );
}

/// Upper bound of a scan: an explicit block, or the chain head at call time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTarget {
    Number(u64),
    Head,
}

impl From<u64> for BlockTarget {
    fn from(n: u64) -> Self {
        BlockTarget::Number(n)
    }
}

/// Fetches and decodes transfer events addressed to the jar.
///
/// Scanning is read-only and deterministic for a finalized range: repeated
/// calls with identical inputs yield the same transfer set.
pub struct LogScanner {
    client: Arc<JarClient>,
}

impl LogScanner {
    pub fn new(client: Arc<JarClient>) -> Self {
        Self { client }
    }

    /// Every transfer into the jar within `[from_block, to_block]`, ordered
    /// as the ledger reports them, unique per `(tx_hash, log_index)`.
    pub async fn scan_block_range(
        &self,
        from_block: u64,
        to_block: impl Into<BlockTarget>,
    ) -> Result<Vec<DetectedTransfer>> {
        let to_block = match to_block.into() {
            BlockTarget::Number(n) => n,
            BlockTarget::Head => self.client.block_number().await.map_err(|err| {
                MonitorError::Scan {
                    from: from_block,
                    to: from_block,
                    reason: format!("failed to resolve chain head: {err}"),
                }
            })?,
        };
        if to_block < from_block {
            return Err(MonitorError::InvalidRange {
                from: from_block,
                to: to_block,
            });
        }

        // Chunked range query: provider log limits cap how many blocks one
        // eth_getLogs may cover.
        let batch = self.client.config().blocks_per_batch.max(1);
        let mut logs: Vec<Log> = Vec::new();
        let mut start = from_block;
        while start <= to_block {
            let end = to_block.min(start.saturating_add(batch - 1));
            let chunk = self
                .client
                .transfer_logs_to_jar(start, end)
                .await
                .map_err(|err| MonitorError::Scan {
                    from: from_block,
                    to: to_block,
                    reason: err.to_string(),
                })?;
            logs.extend(chunk);
            match end.checked_add(1) {
                Some(next) => start = next,
                None => break,
            }
        }

        let enriched = join_all(logs.iter().map(|log| self.decode_and_enrich(log))).await;

        let mut seen = HashSet::new();
        let mut transfers = Vec::new();
        for transfer in enriched.into_iter().flatten() {
            if seen.insert(transfer.key()) {
                transfers.push(transfer);
            }
        }

        debug!(
            "scanned blocks {from_block}..={to_block}: {} transfer(s)",
            transfers.len()
        );
        Ok(transfers)
    }

    /// Decode one raw log and resolve its token metadata and transaction
    /// context. Shared by range scans and the push subscription. Metadata
    /// failures fall back to defaults; context failures drop the event.
    pub(crate) async fn decode_and_enrich(&self, log: &Log) -> Option<DetectedTransfer> {
        let raw = match parser::decode_transfer(log) {
            Some(raw) => raw,
            None => {
                debug!("skipping undecodable log in tx {:?}", log.transaction_hash);
                return None;
            }
        };

        let (meta, tx, receipt, timestamp) = tokio::join!(
            self.client.token_metadata(raw.token),
            self.client.transaction(raw.tx_hash),
            self.client.receipt(raw.tx_hash),
            self.client.block_timestamp(raw.block_number),
        );

        let tx = match tx {
            Ok(Some(tx)) => tx,
            Ok(None) => {
                drop_log(raw.tx_hash, raw.log_index, "transaction not found");
                return None;
            }
            Err(err) => {
                drop_log(
                    raw.tx_hash,
                    raw.log_index,
                    format!("transaction lookup failed: {err}"),
                );
                return None;
            }
        };
        let receipt = match receipt {
            Ok(Some(receipt)) => receipt,
            Ok(None) => {
                drop_log(raw.tx_hash, raw.log_index, "receipt not found");
                return None;
            }
            Err(err) => {
                drop_log(
                    raw.tx_hash,
                    raw.log_index,
                    format!("receipt lookup failed: {err}"),
                );
                return None;
            }
        };
        let timestamp = match timestamp {
            Ok(Some(ts)) => ts,
            Ok(None) => {
                drop_log(
                    raw.tx_hash,
                    raw.log_index,
                    format!("block {} not found", raw.block_number),
                );
                return None;
            }
            Err(err) => {
                drop_log(
                    raw.tx_hash,
                    raw.log_index,
                    format!("block lookup failed: {err}"),
                );
                return None;
            }
        };

        let target = tx.to();
        let jar = self.client.jar_address();

        Some(DetectedTransfer {
            token_address: raw.token,
            token_symbol: meta.symbol,
            token_decimals: meta.decimals,
            from: raw.from,
            formatted_amount: format_token_amount(raw.value, meta.decimals),
            amount: raw.value,
            block_number: raw.block_number,
            block_timestamp: timestamp,
            tx_hash: raw.tx_hash,
            log_index: raw.log_index,
            is_direct_transfer: target == Some(raw.token),
            is_jar_call: target == Some(jar),
            gas_used: Some(receipt.gas_used),
            gas_price: Some(receipt.effective_gas_price),
        })
    }
}
