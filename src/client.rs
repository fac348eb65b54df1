// src/client.rs
use crate::config::Config;
use crate::error::{MonitorError, Result};
use crate::models::RecoveryKind;
use crate::parser::TRANSFER_TOPIC;
use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use alloy::pubsub::Subscription;
use alloy::rpc::types::{Filter, Log, Transaction, TransactionReceipt};
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::TransportError;
use futures_util::future::try_join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

alloy::sol! {
    #[sol(rpc)]
    contract Erc20 {
        function symbol() external view returns (string);
        function decimals() external view returns (uint8);
        function balanceOf(address owner) external view returns (uint256);
    }

    #[sol(rpc)]
    contract Jar {
        function getMonitoredTokens() external view returns (address[]);
        function unaccountedBalance(address token) external view returns (uint256);
        function pendingBalance(address token) external view returns (uint256);
        function totalDetectedTransfers() external view returns (uint256);
        function enableTokenMonitoring(address token) external;
        function scanForDirectTransfers() external;
        function emergencyRecoverToken(address token) external;
        function processPendingBalance(address token) external;
        function setAutoProcessing(bool enabled) external;
    }
}

/// Upper bound for on-chain confirmation of a submitted action.
const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct TokenMetadata {
    pub symbol: String,
    pub decimals: u8,
}

/// On-chain view of the jar's bookkeeping, read in one pass.
#[derive(Debug, Clone)]
pub struct JarStateSnapshot {
    pub monitored_tokens: Vec<Address>,
    pub on_chain_detected_count: u64,
    pub unaccounted: Vec<(Address, U256)>,
    pub pending: Vec<(Address, U256)>,
    pub jar_balances: Vec<(Address, U256)>,
}

/// All ledger access goes through this struct: an HTTP provider for reads,
/// an optional WS provider for the push feed, and an optional wallet-backed
/// provider for state-changing calls. Every raw read is wrapped in a
/// per-call timeout with bounded exponential backoff.
pub struct JarClient {
    cfg: Config,
    read: DynProvider,
    push: Option<DynProvider>,
    write: Option<DynProvider>,
    meta_cache: Mutex<HashMap<Address, TokenMetadata>>,
    ts_cache: Mutex<HashMap<u64, u64>>,
}

impl JarClient {
    pub async fn connect(cfg: Config) -> Result<Self> {
        let http_url = cfg.rpc_http_url.parse().map_err(|e| {
            MonitorError::Config(format!("invalid RPC_HTTP_URL `{}`: {e}", cfg.rpc_http_url))
        })?;

        let read = ProviderBuilder::new().connect_http(http_url).erased();

        let push = match &cfg.rpc_ws_url {
            Some(ws_url) => {
                match ProviderBuilder::new()
                    .connect_ws(WsConnect::new(ws_url.clone()))
                    .await
                {
                    Ok(provider) => {
                        info!("📡 WS endpoint connected: {ws_url}");
                        Some(provider.erased())
                    }
                    Err(err) => {
                        warn!("WS connect to {ws_url} failed, polling only: {err}");
                        None
                    }
                }
            }
            None => None,
        };

        let write = match &cfg.signer_key {
            Some(key) => {
                let signer: PrivateKeySigner = key
                    .trim()
                    .parse()
                    .map_err(|e| MonitorError::Config(format!("invalid SIGNER_KEY: {e}")))?;
                info!("write interface enabled for {}", signer.address());
                let wallet = EthereumWallet::from(signer);
                let write_url = cfg.rpc_http_url.parse().map_err(|e| {
                    MonitorError::Config(format!("invalid RPC_HTTP_URL `{}`: {e}", cfg.rpc_http_url))
                })?;
                Some(
                    ProviderBuilder::new()
                        .wallet(wallet)
                        .connect_http(write_url)
                        .erased(),
                )
            }
            None => None,
        };

        Ok(Self {
            cfg,
            read,
            push,
            write,
            meta_cache: Mutex::new(HashMap::new()),
            ts_cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn jar_address(&self) -> Address {
        self.cfg.jar_address
    }

    pub fn has_push(&self) -> bool {
        self.push.is_some()
    }

    pub fn has_write_access(&self) -> bool {
        self.write.is_some()
    }

    fn write_provider(&self) -> Result<&DynProvider> {
        self.write.as_ref().ok_or(MonitorError::NoWriteAccess)
    }

    /// Bound a one-shot ledger operation by the configured request timeout.
    async fn with_deadline<T, E>(
        &self,
        call: &str,
        fut: impl Future<Output = std::result::Result<T, E>>,
    ) -> Result<T>
    where
        MonitorError: From<E>,
    {
        match timeout(self.cfg.request_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(err.into()),
            Err(_) => Err(MonitorError::Timeout {
                call: call.to_string(),
            }),
        }
    }

    /// Run one raw RPC with a timeout, retrying with capped backoff.
    async fn retry_rpc<T, Fut>(&self, call: &str, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: Future<Output = std::result::Result<T, TransportError>>,
    {
        let attempts = self.cfg.max_retries.max(1);
        let mut delay = Duration::from_millis(500);
        for attempt in 1..=attempts {
            match timeout(self.cfg.request_timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => {
                    if attempt == attempts {
                        return Err(err.into());
                    }
                    warn!("{call} failed (attempt {attempt}/{attempts}): {err}");
                }
                Err(_) => {
                    if attempt == attempts {
                        break;
                    }
                    warn!("{call} timed out (attempt {attempt}/{attempts})");
                }
            }
            sleep(delay).await;
            delay = (delay * 2).min(Duration::from_secs(8));
        }
        Err(MonitorError::RpcExhausted {
            call: call.to_string(),
            attempts,
        })
    }

    pub async fn block_number(&self) -> Result<u64> {
        let provider = self.read.clone();
        self.retry_rpc("eth_blockNumber", move || {
            let p = provider.clone();
            async move { p.get_block_number().await }
        })
        .await
    }

    pub async fn gas_price(&self) -> Result<u128> {
        let provider = self.read.clone();
        self.retry_rpc("eth_gasPrice", move || {
            let p = provider.clone();
            async move { p.get_gas_price().await }
        })
        .await
    }

    /// Transfer events whose recipient topic is the jar, within the range.
    pub async fn transfer_logs_to_jar(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>> {
        let filter = self.jar_transfer_filter().from_block(from_block).to_block(to_block);
        let provider = self.read.clone();
        self.retry_rpc("eth_getLogs", move || {
            let p = provider.clone();
            let f = filter.clone();
            async move { p.get_logs(&f).await }
        })
        .await
    }

    pub async fn transaction(&self, hash: B256) -> Result<Option<Transaction>> {
        let provider = self.read.clone();
        self.retry_rpc("eth_getTransactionByHash", move || {
            let p = provider.clone();
            async move { p.get_transaction_by_hash(hash).await }
        })
        .await
    }

    pub async fn receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>> {
        let provider = self.read.clone();
        self.retry_rpc("eth_getTransactionReceipt", move || {
            let p = provider.clone();
            async move { p.get_transaction_receipt(hash).await }
        })
        .await
    }

    /// Timestamp of a block, cached per client instance.
    pub async fn block_timestamp(&self, number: u64) -> Result<Option<u64>> {
        if let Some(ts) = self.ts_cache.lock().unwrap().get(&number).copied() {
            return Ok(Some(ts));
        }
        let provider = self.read.clone();
        let block = self
            .retry_rpc("eth_getBlockByNumber", move || {
                let p = provider.clone();
                async move { p.get_block_by_number(number.into()).await }
            })
            .await?;
        let ts = block.map(|b| b.header.timestamp);
        if let Some(ts) = ts {
            self.ts_cache.lock().unwrap().insert(number, ts);
        }
        Ok(ts)
    }

    /// Symbol and decimals for a token, defaulting to `"UNKNOWN"`/18 when
    /// the contract does not answer. Successful lookups are cached.
    pub async fn token_metadata(&self, token: Address) -> TokenMetadata {
        if let Some(meta) = self.meta_cache.lock().unwrap().get(&token).cloned() {
            return meta;
        }

        let erc20 = Erc20::new(token, self.read.clone());
        let symbol_call = erc20.symbol();
        let decimals_call = erc20.decimals();
        let (symbol, decimals) = tokio::join!(
            timeout(self.cfg.request_timeout, symbol_call.call()),
            timeout(self.cfg.request_timeout, decimals_call.call()),
        );
        let symbol = symbol.ok().and_then(|r| r.ok());
        let decimals = decimals.ok().and_then(|r| r.ok());

        if symbol.is_none() || decimals.is_none() {
            debug!("token metadata unavailable for {token}, using defaults");
            return TokenMetadata {
                symbol: symbol.unwrap_or_else(|| "UNKNOWN".to_string()),
                decimals: decimals.unwrap_or(18),
            };
        }

        let meta = TokenMetadata {
            symbol: symbol.unwrap_or_default(),
            decimals: decimals.unwrap_or(18),
        };
        self.meta_cache
            .lock()
            .unwrap()
            .insert(token, meta.clone());
        meta
    }

    /// Read the jar's bookkeeping in one pass: the monitored-token list and
    /// detected-transfer count, then per-token balances for the union of
    /// monitored tokens and `extra_tokens`, all issued concurrently.
    pub async fn jar_state_snapshot(&self, extra_tokens: &[Address]) -> Result<JarStateSnapshot> {
        let jar = Jar::new(self.cfg.jar_address, self.read.clone());
        let monitored_call = jar.getMonitoredTokens();
        let count_call = jar.totalDetectedTransfers();
        let (monitored_tokens, raw_count) = self
            .with_deadline("jar state reads", async {
                tokio::try_join!(monitored_call.call(), count_call.call())
            })
            .await?;
        let on_chain_detected_count = u64::try_from(raw_count).unwrap_or(u64::MAX);

        let mut tokens = monitored_tokens.clone();
        for token in extra_tokens {
            if !tokens.contains(token) {
                tokens.push(*token);
            }
        }

        let jar_address = self.cfg.jar_address;
        let reads = tokens.iter().map(|&token| {
            let per_token_jar = Jar::new(jar_address, self.read.clone());
            let erc20 = Erc20::new(token, self.read.clone());
            async move {
                let unaccounted_call = per_token_jar.unaccountedBalance(token);
                let pending_call = per_token_jar.pendingBalance(token);
                let balance_call = erc20.balanceOf(jar_address);
                let (unaccounted, pending, balance) = tokio::try_join!(
                    unaccounted_call.call(),
                    pending_call.call(),
                    balance_call.call(),
                )?;
                Ok::<_, alloy::contract::Error>((token, unaccounted, pending, balance))
            }
        });
        let rows = self
            .with_deadline("per-token balance reads", try_join_all(reads))
            .await?;

        let mut snapshot = JarStateSnapshot {
            monitored_tokens,
            on_chain_detected_count,
            unaccounted: Vec::with_capacity(rows.len()),
            pending: Vec::with_capacity(rows.len()),
            jar_balances: Vec::with_capacity(rows.len()),
        };
        for (token, unaccounted, pending, balance) in rows {
            snapshot.unaccounted.push((token, unaccounted));
            snapshot.pending.push((token, pending));
            snapshot.jar_balances.push((token, balance));
        }
        Ok(snapshot)
    }

    /// Submit the state-changing call behind a recovery action and wait for
    /// it to confirm. Requires the write interface.
    pub async fn execute_action(&self, kind: RecoveryKind, token: Option<Address>) -> Result<B256> {
        let jar = Jar::new(self.cfg.jar_address, self.write_provider()?.clone());
        let pending = match (kind, token) {
            (RecoveryKind::Configure, Some(t)) => {
                self.with_deadline("enableTokenMonitoring", jar.enableTokenMonitoring(t).send())
                    .await?
            }
            (RecoveryKind::Scan, _) => {
                self.with_deadline("scanForDirectTransfers", jar.scanForDirectTransfers().send())
                    .await?
            }
            (RecoveryKind::Emergency, Some(t)) => {
                self.with_deadline("emergencyRecoverToken", jar.emergencyRecoverToken(t).send())
                    .await?
            }
            (RecoveryKind::Process, Some(t)) => {
                self.with_deadline("processPendingBalance", jar.processPendingBalance(t).send())
                    .await?
            }
            _ => {
                return Err(MonitorError::Config(
                    "recovery action is missing its target token".to_string(),
                ))
            }
        };
        self.await_confirmation(pending).await
    }

    async fn await_confirmation(
        &self,
        pending: alloy::providers::PendingTransactionBuilder<alloy::network::Ethereum>,
    ) -> Result<B256> {
        match timeout(CONFIRMATION_TIMEOUT, pending.watch()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(MonitorError::Timeout {
                call: "transaction confirmation".to_string(),
            }),
        }
    }

    /// Best-effort gas estimate for a planned action.
    pub async fn estimate_action_gas(
        &self,
        kind: RecoveryKind,
        token: Option<Address>,
    ) -> Result<u64> {
        let provider = self.write.clone().unwrap_or_else(|| self.read.clone());
        let jar = Jar::new(self.cfg.jar_address, provider);
        let gas = match (kind, token) {
            (RecoveryKind::Configure, Some(t)) => {
                self.with_deadline("gas estimate", jar.enableTokenMonitoring(t).estimate_gas())
                    .await?
            }
            (RecoveryKind::Scan, _) => {
                self.with_deadline("gas estimate", jar.scanForDirectTransfers().estimate_gas())
                    .await?
            }
            (RecoveryKind::Emergency, Some(t)) => {
                self.with_deadline("gas estimate", jar.emergencyRecoverToken(t).estimate_gas())
                    .await?
            }
            (RecoveryKind::Process, Some(t)) => {
                self.with_deadline("gas estimate", jar.processPendingBalance(t).estimate_gas())
                    .await?
            }
            _ => {
                return Err(MonitorError::Config(
                    "recovery action is missing its target token".to_string(),
                ))
            }
        };
        Ok(gas)
    }

    /// Toggle the jar's on-chain auto-processing flag.
    pub async fn set_auto_processing(&self, enabled: bool) -> Result<B256> {
        let jar = Jar::new(self.cfg.jar_address, self.write_provider()?.clone());
        let pending = self
            .with_deadline("setAutoProcessing", jar.setAutoProcessing(enabled).send())
            .await?;
        self.await_confirmation(pending).await
    }

    /// Open the push feed for transfers into the jar.
    pub async fn subscribe_jar_transfers(&self) -> Result<Subscription<Log>> {
        let push = self.push.as_ref().ok_or_else(|| {
            MonitorError::Subscription("no WS endpoint configured".to_string())
        })?;
        let filter = self.jar_transfer_filter();
        push.subscribe_logs(&filter)
            .await
            .map_err(|err| MonitorError::Subscription(err.to_string()))
    }

    fn jar_transfer_filter(&self) -> Filter {
        Filter::new()
            .event_signature(TRANSFER_TOPIC)
            .topic2(self.cfg.jar_address.into_word())
    }
}
