use alloy::primitives::B256;
use thiserror::Error;

pub type Result<T, E = MonitorError> = std::result::Result<T, E>;

/// Error taxonomy for the monitor.
///
/// Scan-level and session-start failures surface to the caller; everything
/// inside a long-running watcher or batch operation is caught locally and
/// reported through the log/health channels instead of crashing the monitor.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// The range query itself failed; aborts that scan.
    #[error("scan of blocks {from}..={to} failed: {reason}")]
    Scan { from: u64, to: u64, reason: String },

    #[error("invalid block range: {from}..={to}")]
    InvalidRange { from: u64, to: u64 },

    /// A single log failed to decode or enrich; dropped from results.
    #[error("log {tx_hash}#{log_index} could not be processed: {reason}")]
    LogProcessing {
        tx_hash: B256,
        log_index: u64,
        reason: String,
    },

    /// The push feed failed; the timer-based catch-up keeps running.
    #[error("push subscription failed: {0}")]
    Subscription(String),

    /// A recovery action's submission or confirmation failed.
    #[error("recovery action `{description}` failed: {reason}")]
    ActionExecution { description: String, reason: String },

    #[error("health check failed: {0}")]
    HealthCheck(String),

    #[error("watcher is already active")]
    WatcherActive,

    #[error("`{call}` gave no usable response after {attempts} attempts")]
    RpcExhausted { call: String, attempts: u32 },

    #[error("`{call}` timed out")]
    Timeout { call: String },

    #[error("write interface not configured (missing signing key)")]
    NoWriteAccess,

    #[error(transparent)]
    Transport(#[from] alloy::transports::TransportError),

    #[error(transparent)]
    Contract(#[from] alloy::contract::Error),

    #[error(transparent)]
    PendingTransaction(#[from] alloy::providers::PendingTransactionError),

    #[error("invalid configuration: {0}")]
    Config(String),
}
