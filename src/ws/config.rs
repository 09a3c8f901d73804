#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bon::Builder;
use url::Url;

use crate::Result;
use crate::error::Error;
use crate::stomp::HeartBeat;

const DEFAULT_ENDPOINT: &str = "ws://localhost:8080/ws";
const DEFAULT_HEARTBEAT_OUTGOING_DURATION: Duration = Duration::from_millis(4000);
const DEFAULT_HEARTBEAT_INCOMING_DURATION: Duration = Duration::from_millis(4000);
const DEFAULT_RECONNECT_DELAY_DURATION: Duration = Duration::from_millis(5000);
const DEFAULT_RECONNECT_MULTIPLIER: f64 = 1.0;
const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_CONNECT_TIMEOUT_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_SUBSCRIBE_RETRY_INTERVAL_DURATION: Duration = Duration::from_millis(1000);
const DEFAULT_FORCE_RECONNECT_DELAY_DURATION: Duration = Duration::from_millis(1000);
const DEFAULT_WAIT_POLL_INTERVAL_DURATION: Duration = Duration::from_millis(100);

/// Configuration for the connection manager and its STOMP session.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use stomp_link::ws::config::Config;
///
/// let config = Config::builder()
///     .endpoint("wss://example.com/ws")
///     .max_connect_attempts(3)
///     .subscribe_retry_interval(Duration::from_millis(250))
///     .build();
///
/// assert_eq!(config.max_connect_attempts, 3);
/// assert_eq!(config.heartbeat.outgoing, Duration::from_secs(4));
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// WebSocket endpoint carrying the STOMP session
    #[builder(into, default = DEFAULT_ENDPOINT.to_owned())]
    pub endpoint: String,
    /// Heart-beat intervals offered in the `CONNECT` frame
    #[builder(default = HeartBeat::new(
        DEFAULT_HEARTBEAT_OUTGOING_DURATION,
        DEFAULT_HEARTBEAT_INCOMING_DURATION,
    ))]
    pub heartbeat: HeartBeat,
    /// Low-level reconnect policy used by an active session after its transport drops
    #[builder(default)]
    pub reconnect: ReconnectConfig,
    /// Ceiling on consecutive `connect` attempts before `force_reconnect` is required
    #[builder(default = DEFAULT_MAX_CONNECT_ATTEMPTS)]
    pub max_connect_attempts: u32,
    /// Time allowed between opening the transport and receiving `CONNECTED`
    #[builder(default = DEFAULT_CONNECT_TIMEOUT_DURATION)]
    pub connect_timeout: Duration,
    /// Poll interval of a `subscribe` call waiting for the connection
    #[builder(default = DEFAULT_SUBSCRIBE_RETRY_INTERVAL_DURATION)]
    pub subscribe_retry_interval: Duration,
    /// Optional cap on the polls a waiting `subscribe` performs.
    /// `None` waits until connected, cancelled or connect attempts run out.
    pub subscribe_retry_limit: Option<u32>,
    /// Pause between teardown and the new `connect` in `force_reconnect`
    #[builder(default = DEFAULT_FORCE_RECONNECT_DELAY_DURATION)]
    pub force_reconnect_delay: Duration,
    /// Poll granularity of `wait_for_connection`
    #[builder(default = DEFAULT_WAIT_POLL_INTERVAL_DURATION)]
    pub wait_poll_interval: Duration,
    /// Extra headers sent with `CONNECT` (e.g. `login`/`passcode`)
    #[builder(default)]
    pub connect_headers: Vec<(String, String)>,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Config {
    /// Check the endpoint and limits before any connection is attempted.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.endpoint)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::validation(format!(
                "endpoint must use ws or wss, got {}",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(Error::validation("endpoint must include a host"));
        }
        if self.max_connect_attempts == 0 {
            return Err(Error::validation("max_connect_attempts must be at least 1"));
        }
        if self.subscribe_retry_interval.is_zero() {
            return Err(Error::validation("subscribe_retry_interval must be non-zero"));
        }
        if self.wait_poll_interval.is_zero() {
            return Err(Error::validation("wait_poll_interval must be non-zero"));
        }
        Ok(())
    }
}

/// Configuration for the automatic low-level reconnect of an active session.
///
/// The defaults produce a fixed 5 second delay between transport attempts.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt
    pub delay: Duration,
    /// Upper bound on the delay
    pub max_delay: Duration,
    /// Growth factor between attempts; `1.0` keeps the delay constant
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY_DURATION,
            max_delay: DEFAULT_RECONNECT_DELAY_DURATION,
            multiplier: DEFAULT_RECONNECT_MULTIPLIER,
        }
    }
}

impl ReconnectConfig {
    #[must_use]
    pub fn new(delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            delay,
            max_delay,
            multiplier,
        }
    }

    /// Constant `delay` between attempts.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self::new(delay, delay, DEFAULT_RECONNECT_MULTIPLIER)
    }
}

impl From<ReconnectConfig> for ExponentialBackoff {
    fn from(config: ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.delay)
            .with_max_interval(config.max_delay)
            .with_multiplier(config.multiplier)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None) // Session retries until deactivated
            .build()
    }
}

#[cfg(test)]
mod tests {
    use backoff::backoff::Backoff as _;

    use super::*;

    #[test]
    fn default_reconnect_delay_is_fixed_five_seconds() {
        let mut backoff: ExponentialBackoff = ReconnectConfig::default().into();

        for _ in 0..5 {
            assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(5)));
        }
    }

    #[test]
    fn backoff_respects_max() {
        let config = ReconnectConfig {
            delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            multiplier: 2.0,
        };
        let mut backoff: ExponentialBackoff = config.into();

        for _ in 0..10 {
            let _next = backoff.next_backoff();
        }

        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(300)));
    }

    #[test]
    fn defaults_match_documented_intervals() {
        let config = Config::default();

        assert_eq!(config.endpoint, "ws://localhost:8080/ws");
        assert_eq!(config.heartbeat.outgoing, Duration::from_millis(4000));
        assert_eq!(config.heartbeat.incoming, Duration::from_millis(4000));
        assert_eq!(config.max_connect_attempts, 5);
        assert_eq!(config.subscribe_retry_interval, Duration::from_secs(1));
        assert_eq!(config.subscribe_retry_limit, None);
        assert_eq!(config.force_reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.wait_poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn validate_rejects_http_endpoint() {
        let config = Config::builder().endpoint("http://localhost/ws").build();

        let err = config.validate().expect_err("http is not a websocket scheme");

        assert_eq!(err.kind(), crate::error::Kind::Validation);
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let config = Config::builder().max_connect_attempts(0).build();

        assert!(config.validate().is_err(), "zero attempts can never connect");
    }

    #[test]
    fn validate_rejects_zero_poll_intervals() {
        let wait = Config::builder().wait_poll_interval(Duration::ZERO).build();
        let retry = Config::builder()
            .subscribe_retry_interval(Duration::ZERO)
            .build();

        let err = wait.validate().expect_err("a zero interval cannot tick");
        assert_eq!(err.kind(), crate::error::Kind::Validation);
        assert!(retry.validate().is_err(), "a zero retry interval spins");
    }

    #[test]
    fn validate_accepts_defaults() {
        Config::default().validate().expect("defaults are valid");
    }
}
