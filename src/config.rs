#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

const DEFAULT_CONNECT_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_PING_INTERVAL_DURATION: Duration = Duration::from_secs(25);
const DEFAULT_PONG_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_MIN_DELAY_DURATION: Duration = Duration::from_millis(500);
const DEFAULT_MAX_DELAY_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
const DEFAULT_MAX_RETRIES: u32 = 10;

/// Configuration for client connection behavior.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum time allowed for an initial connection attempt. A zero
    /// timeout disables the connect-timeout guard.
    pub connect_timeout: Duration,
    /// Interval between heartbeat pings. A zero interval disables the
    /// heartbeat entirely.
    pub ping_interval: Duration,
    /// Maximum time to wait for a pong reply before treating the connection
    /// as dead.
    pub pong_timeout: Duration,
    /// When set, the client does not connect on construction; the caller
    /// drives the lifecycle through [`open`](crate::Client::open).
    pub manual: bool,
    /// Reconnection strategy configuration
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_DURATION,
            ping_interval: DEFAULT_PING_INTERVAL_DURATION,
            pong_timeout: DEFAULT_PONG_TIMEOUT_DURATION,
            manual: false,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts before giving up.
    /// `None` means infinite retries.
    pub max_retries: Option<u32>,
    /// Delay before the first reconnection attempt (used exactly, no jitter)
    pub min_delay: Duration,
    /// Maximum delay between reconnection attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_retries: Some(DEFAULT_MAX_RETRIES),
            min_delay: DEFAULT_MIN_DELAY_DURATION,
            max_delay: DEFAULT_MAX_DELAY_DURATION,
            factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}
