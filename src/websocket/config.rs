//! Session configuration

use std::time::Duration;
use tokio_tungstenite::tungstenite::http::Uri;

use crate::error::{Error, Result};
use crate::types::{Network, WsEndpoint};

/// Configuration for automatic reconnection
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Whether to automatically reconnect on disconnect
    pub enabled: bool,
    /// Initial delay before first reconnect attempt
    pub initial_delay: Duration,
    /// Maximum delay between reconnect attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Maximum number of consecutive failed attempts (None for unlimited)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Create a new reconnect config with reconnection disabled
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let multiplier = self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let delay_ms = self.initial_delay.as_millis() as f64 * multiplier;
        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }

        std::cmp::min(Duration::from_millis(delay_ms as u64), self.max_delay)
    }

    /// Check if another reconnect attempt should be made
    pub fn should_attempt(&self, attempt: u32) -> bool {
        if !self.enabled {
            return false;
        }
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }
}

/// Configuration for one streaming session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket URL (`ws://` or `wss://`)
    pub url: String,
    /// Reconnection policy
    pub reconnect: ReconnectConfig,
    /// Send a text `ping` after this long without an inbound frame.
    /// A connection that lasts this long also resets the backoff.
    pub ping_interval: Duration,
    /// Treat the connection as lost after this long without an inbound frame
    pub idle_timeout: Duration,
    /// How long a reconnect waits for replayed subscriptions to be confirmed
    /// before reporting the session connected anyway
    pub resubscribe_timeout: Duration,
    /// Upper bound on the close handshake during shutdown
    pub close_timeout: Duration,
    /// Frames buffered between the reader and the dispatch callback
    pub dispatch_capacity: usize,
}

impl SessionConfig {
    /// Create a config for a URL with default timings
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectConfig::default(),
            ping_interval: Duration::from_secs(25),
            idle_timeout: Duration::from_secs(30),
            resubscribe_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(1),
            dispatch_capacity: 1024,
        }
    }

    /// Create a config for one of the exchange's endpoints
    pub fn for_endpoint(network: Network, endpoint: WsEndpoint) -> Self {
        Self::new(network.ws_url(endpoint))
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_ping_interval(mut self, ping_interval: Duration) -> Self {
        self.ping_interval = ping_interval;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_resubscribe_timeout(mut self, resubscribe_timeout: Duration) -> Self {
        self.resubscribe_timeout = resubscribe_timeout;
        self
    }

    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    pub fn with_dispatch_capacity(mut self, dispatch_capacity: usize) -> Self {
        self.dispatch_capacity = dispatch_capacity;
        self
    }

    /// Check everything that can be checked without touching the network
    pub fn validate(&self) -> Result<()> {
        let uri: Uri = self
            .url
            .parse()
            .map_err(|e| Error::InvalidParameter(format!("invalid url '{}': {e}", self.url)))?;

        match uri.scheme_str() {
            Some("ws") | Some("wss") => {}
            other => {
                return Err(Error::InvalidParameter(format!(
                    "url '{}' must use ws:// or wss://, got {:?}",
                    self.url, other
                )))
            }
        }
        if uri.host().map_or(true, str::is_empty) {
            return Err(Error::InvalidParameter(format!(
                "url '{}' has no host",
                self.url
            )));
        }
        if self.ping_interval.is_zero() {
            return Err(Error::InvalidParameter(
                "ping_interval must be non-zero".to_string(),
            ));
        }
        if self.idle_timeout <= self.ping_interval {
            return Err(Error::InvalidParameter(format!(
                "idle_timeout ({:?}) must exceed ping_interval ({:?})",
                self.idle_timeout, self.ping_interval
            )));
        }
        if self.dispatch_capacity == 0 {
            return Err(Error::InvalidParameter(
                "dispatch_capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::for_endpoint(Network::Live, WsEndpoint::Public)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LIVE_PUBLIC_WS_URL;

    // ============ ReconnectConfig Tests ============

    #[test]
    fn test_reconnect_config_default() {
        let config = ReconnectConfig::default();
        assert!(config.enabled);
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.backoff_multiplier, 2.0);
        assert!(config.max_attempts.is_none());
    }

    #[test]
    fn test_reconnect_config_disabled() {
        let config = ReconnectConfig::disabled();
        assert!(!config.enabled);
        assert!(!config.should_attempt(0));
    }

    #[test]
    fn test_reconnect_config_delay_calculation() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            ..Default::default()
        };

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn test_reconnect_config_max_delay_cap() {
        let config = ReconnectConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 10.0,
            ..Default::default()
        };

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
        // Overflowing exponent still caps instead of wrapping
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_reconnect_config_should_attempt() {
        let unlimited = ReconnectConfig::default();
        assert!(unlimited.should_attempt(0));
        assert!(unlimited.should_attempt(1000));

        let limited = ReconnectConfig {
            max_attempts: Some(3),
            ..Default::default()
        };
        assert!(limited.should_attempt(2));
        assert!(!limited.should_attempt(3));
        assert!(!limited.should_attempt(4));
    }

    // ============ SessionConfig Tests ============

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.url, LIVE_PUBLIC_WS_URL);
        assert_eq!(config.ping_interval, Duration::from_secs(25));
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.dispatch_capacity, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_session_config_builders() {
        let config = SessionConfig::new("ws://localhost:8080/ws")
            .with_ping_interval(Duration::from_millis(50))
            .with_idle_timeout(Duration::from_millis(200))
            .with_resubscribe_timeout(Duration::from_millis(300))
            .with_close_timeout(Duration::from_millis(10))
            .with_dispatch_capacity(4)
            .with_reconnect(ReconnectConfig::disabled());

        assert_eq!(config.ping_interval, Duration::from_millis(50));
        assert_eq!(config.resubscribe_timeout, Duration::from_millis(300));
        assert_eq!(config.dispatch_capacity, 4);
        assert!(!config.reconnect.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_urls() {
        for url in ["", "not a url", "https://ws.okx.com/ws/v5/public", "ws:///path"] {
            let result = SessionConfig::new(url).validate();
            assert!(
                matches!(result, Err(Error::InvalidParameter(_))),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_rejects_bad_timings() {
        let config = SessionConfig::default()
            .with_ping_interval(Duration::from_secs(30))
            .with_idle_timeout(Duration::from_secs(30));
        assert!(config.validate().is_err());

        let config = SessionConfig::default().with_dispatch_capacity(0);
        assert!(config.validate().is_err());

        let config = SessionConfig::default().with_ping_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
