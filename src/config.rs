use std::env;
use std::time::Duration;

/// Runtime configuration for the pipeline. Every field has a sane default;
/// env vars override it. Mirrors the teacher's `BookStoreConfig::from_env`
/// pattern: plain `env::var` lookups, no config crate.
#[derive(Debug, Clone)]
pub struct Config {
    pub venue_k_ws_url: String,
    pub venue_p_ws_url: String,
    pub venue_k_key_id: Option<String>,
    pub venue_k_private_key_path: Option<String>,

    pub publish_interval: Duration,
    pub min_spread_threshold: f64,
    pub min_trade_size: f64,

    pub ingest_queue_capacity: usize,
    pub coord_prepare_timeout: Duration,

    pub ping_interval: Duration,
    pub reconnect_interval: Duration,
    pub max_retries: u32,

    pub client_send_timeout: Duration,
    pub bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            venue_k_ws_url: "wss://trading-api.kalshi.com/trade-api/ws/v2".to_string(),
            venue_p_ws_url: "wss://ws-subscriptions-clob.polymarket.com/ws/market".to_string(),
            venue_k_key_id: None,
            venue_k_private_key_path: None,
            publish_interval: Duration::from_secs(1),
            min_spread_threshold: 0.02,
            min_trade_size: 1.0,
            ingest_queue_capacity: 1000,
            coord_prepare_timeout: Duration::from_secs(30),
            ping_interval: Duration::from_secs(10),
            reconnect_interval: Duration::from_secs(2),
            max_retries: 3,
            client_send_timeout: Duration::from_secs(5),
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            venue_k_ws_url: env::var("KALSHI_WS_URL").unwrap_or(defaults.venue_k_ws_url),
            venue_p_ws_url: env::var("POLYMARKET_WS_URL").unwrap_or(defaults.venue_p_ws_url),
            venue_k_key_id: env::var("KALSHI_API_KEY_ID").ok(),
            venue_k_private_key_path: env::var("KALSHI_PRIVATE_KEY_PATH").ok(),
            publish_interval: env_secs("PUBLISH_INTERVAL_SECONDS", defaults.publish_interval),
            min_spread_threshold: env_f64("MIN_SPREAD_THRESHOLD", defaults.min_spread_threshold),
            min_trade_size: env_f64("MIN_TRADE_SIZE", defaults.min_trade_size),
            ingest_queue_capacity: env_usize(
                "INGEST_QUEUE_CAPACITY",
                defaults.ingest_queue_capacity,
            ),
            coord_prepare_timeout: env_secs(
                "COORD_PREPARE_TIMEOUT_SECONDS",
                defaults.coord_prepare_timeout,
            ),
            ping_interval: defaults.ping_interval,
            reconnect_interval: defaults.reconnect_interval,
            max_retries: defaults.max_retries,
            client_send_timeout: defaults.client_send_timeout,
            bind_addr: env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
        }
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
