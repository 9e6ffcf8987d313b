//! Configuration for the Event Store client
//!
//! Centralized configuration with sensible defaults.

use std::time::Duration;

use uuid::Uuid;

/// Default Event Store TCP port
pub const DEFAULT_PORT: u16 = 1113;

/// Default upper bound on a packet's content length (64 MB)
pub const DEFAULT_MAX_PACKET_SIZE: usize = 64 * 1024 * 1024;

/// Default number of connection attempts made by the supervisor
pub const DEFAULT_CONNECT_ATTEMPTS: usize = 5;

/// Default wait after the first failed connection attempt (milliseconds)
pub const DEFAULT_BACKOFF_MS: u64 = 100;

/// Default ceiling for the reconnect wait (milliseconds)
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 5000;

/// Default random spread added to each reconnect wait (milliseconds)
pub const DEFAULT_JITTER_MS: u64 = 50;

/// Main configuration for a client connection
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Endpoint Configuration
    // -------------------------------------------------------------------------
    /// Server host name or IP address
    pub host: String,

    /// Server TCP port
    pub port: u16,

    // -------------------------------------------------------------------------
    // Timeout Configuration
    // -------------------------------------------------------------------------
    /// Connect timeout (milliseconds, 0 = OS default)
    pub connect_timeout_ms: u64,

    /// How long `PendingReply::wait` blocks before giving up (milliseconds)
    pub request_timeout_ms: u64,

    /// Socket write timeout (milliseconds, 0 = none)
    pub write_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Framing Configuration
    // -------------------------------------------------------------------------
    /// Bytes requested per socket read
    pub read_buffer_size: usize,

    /// Largest content length accepted from the server
    pub max_packet_size: usize,

    // -------------------------------------------------------------------------
    // Reconnect Configuration
    // -------------------------------------------------------------------------
    /// Backoff policy used by `supervisor::connect_with_retry`
    pub retry: RetryPolicy,
}

/// Reconnect backoff used by `supervisor::connect_with_retry`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Connection attempts before giving up, the first one included
    pub connect_attempts: usize,

    /// Wait after the first failure (milliseconds); doubles on each further failure
    pub backoff_ms: u64,

    /// Ceiling for the doubled wait (milliseconds)
    pub max_backoff_ms: u64,

    /// Random spread added on top of every wait (milliseconds, 0 = none)
    pub jitter_ms: u64,
}

impl RetryPolicy {
    /// Connect once and never wait
    pub fn none() -> Self {
        Self {
            connect_attempts: 1,
            backoff_ms: 0,
            max_backoff_ms: 0,
            jitter_ms: 0,
        }
    }

    /// Wait before the attempt following failed attempt number `failed_attempt`
    ///
    /// Attempts are numbered from 1.
    pub fn backoff(&self, failed_attempt: usize) -> Duration {
        let doublings = failed_attempt.saturating_sub(1).min(32) as u32;
        let base = self
            .backoff_ms
            .saturating_mul(1u64 << doublings)
            .min(self.max_backoff_ms);
        Duration::from_millis(base.saturating_add(self.spread()))
    }

    /// Random value in `0..=jitter_ms`, drawn from the same source as
    /// correlation ids
    fn spread(&self) -> u64 {
        if self.jitter_ms == 0 {
            return 0;
        }
        (Uuid::new_v4().as_u128() % (self.jitter_ms as u128 + 1)) as u64
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            backoff_ms: DEFAULT_BACKOFF_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            jitter_ms: DEFAULT_JITTER_MS,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: 5000,
            request_timeout_ms: 10_000,
            write_timeout_ms: 5000,
            read_buffer_size: 64 * 1024, // 64 KB
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// `host:port` string for the server endpoint
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the server host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the server port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the connect timeout (in milliseconds)
    pub fn connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.connect_timeout_ms = ms;
        self
    }

    /// Set the default request timeout (in milliseconds)
    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.request_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    /// Set the socket read buffer size (in bytes)
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size.max(1);
        self
    }

    /// Set the maximum accepted packet content length (in bytes)
    pub fn max_packet_size(mut self, size: usize) -> Self {
        self.config.max_packet_size = size;
        self
    }

    /// Set the reconnect backoff policy
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
