use alloy::primitives::{address, Address, U256};
use dotenvy::dotenv;
use eyre::{eyre, Result};
use std::{collections::HashSet, env, time::Duration};
use tracing::info;

/// Mainnet tokens anomaly detection treats as unremarkable.
pub const WELL_KNOWN_TOKENS: [Address; 4] = [
    address!("C02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"), // WETH
    address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"), // USDC
    address!("dAC17F958D2ee523a2206206994597C13D831ec7"), // USDT
    address!("6B175474E89094C44Da98b954EedeAC495271d0F"), // DAI
];

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc_http_url: String,
    pub rpc_ws_url: Option<String>,
    pub jar_address: Address,
    pub signer_key: Option<String>,
    pub scan_interval: Duration,
    pub blocks_per_batch: u64,
    pub max_retries: u32,
    pub request_timeout: Duration,
    pub realtime_enabled: bool,
    pub auto_recover: bool,
    pub token_allowlist: HashSet<Address>,
    pub min_amount: U256,
    pub health_interval: Duration,
    pub port: u16,
}

pub fn load() -> Result<Config> {
    dotenv().ok();

    let rpc_http_url =
        env::var("RPC_HTTP_URL").unwrap_or_else(|_| "http://localhost:8545".to_string());

    // Optional: without a WS endpoint the watcher degrades to polling only.
    let rpc_ws_url = env::var("RPC_WS_URL").ok().filter(|s| !s.trim().is_empty());

    let raw_jar = env::var("JAR_ADDRESS").map_err(|_| eyre!("JAR_ADDRESS is required"))?;
    let jar_address: Address = raw_jar
        .trim()
        .parse()
        .map_err(|e| eyre!("invalid JAR_ADDRESS `{raw_jar}`: {e}"))?;

    // Optional: without a key the write interface stays disabled.
    let signer_key = env::var("SIGNER_KEY").ok().filter(|s| !s.trim().is_empty());

    let scan_interval = Duration::from_secs(env_u64("SCAN_INTERVAL_SECS", 30).max(1));
    let blocks_per_batch = env_u64("BLOCKS_PER_BATCH", 2_000).max(1);
    let max_retries = env_u64("MAX_RETRIES", 3).clamp(1, 10) as u32;
    let request_timeout = Duration::from_secs(env_u64("REQUEST_TIMEOUT_SECS", 15).max(1));
    let health_interval = Duration::from_secs(env_u64("HEALTH_INTERVAL_SECS", 300).max(10));

    let realtime_enabled = env_bool("REALTIME_ENABLED", true);
    let auto_recover = env_bool("AUTO_RECOVER", false);

    // Token allow-list (default: the usual mainnet majors).
    let token_allowlist: HashSet<Address> = match env::var("TOKEN_ALLOWLIST") {
        Ok(raw) => raw
            .split(',')
            .filter_map(|s| s.trim().parse::<Address>().ok())
            .collect(),
        Err(_) => WELL_KNOWN_TOKENS.into_iter().collect(),
    };

    // Transfers below this raw amount are not forwarded by the watcher.
    let min_amount = env::var("MIN_AMOUNT_WEI")
        .ok()
        .and_then(|v| v.trim().parse::<U256>().ok())
        .unwrap_or(U256::ZERO);

    let port = env_u64("PORT", 8080) as u16;

    let cfg = Config {
        rpc_http_url,
        rpc_ws_url,
        jar_address,
        signer_key,
        scan_interval,
        blocks_per_batch,
        max_retries,
        request_timeout,
        realtime_enabled,
        auto_recover,
        token_allowlist,
        min_amount,
        health_interval,
        port,
    };

    info!("Loaded config for jar {}", cfg.jar_address);

    Ok(cfg)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}
