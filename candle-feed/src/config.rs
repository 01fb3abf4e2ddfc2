use std::{str::FromStr, time::Duration};

/// Default live ticker feed.
pub const DEFAULT_FEED_URL: &str = "wss://ws-feed.exchange.coinbase.com";

/// Default market-data backend serving historical candles & indicator rows.
pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";

/// Shortest period used for the ping & indicator poll timers.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Clamp a timer period to at least [`MIN_INTERVAL`].
pub fn non_zero(interval: Duration) -> Duration {
    interval.max(MIN_INTERVAL)
}

/// Exponential reconnect backoff for the live feed.
///
/// Reconnection is indefinite: the delay starts at `initial`, is multiplied by `multiplier` after
/// every failed attempt, never exceeds `max`, and returns to `initial` once a connection subscribes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2,
        }
    }
}

/// Live ticker feed configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedConfig {
    /// WebSocket server URL
    pub url: String,
    /// Ping interval to keep connection alive
    pub ping_interval: Duration,
    /// Silence after which the connection is considered dead
    pub read_timeout: Duration,
    /// Reconnection policy after disconnect
    pub reconnect: ReconnectPolicy,
    /// Maximum channel buffer size for ticks
    pub channel_buffer_size: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_FEED_URL.to_string(),
            ping_interval: Duration::from_secs(30),
            read_timeout: Duration::from_secs(120),
            reconnect: ReconnectPolicy::default(),
            channel_buffer_size: 1000,
        }
    }
}

impl FeedConfig {
    /// Create a new configuration with custom URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = non_zero(interval);
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_channel_buffer_size(mut self, size: usize) -> Self {
        self.channel_buffer_size = size;
        self
    }
}

/// HTTP backend configuration shared by the history loader and indicator source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Base URL, eg/ "http://localhost:8000/api"
    pub base_url: String,
    /// Exchange the historical candles were recorded from
    pub exchange: String,
    /// Upper bound on candles requested per history load
    pub max_points: u32,
    /// Per request timeout
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            exchange: "coinbase".to_string(),
            max_points: 2000,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    pub fn with_max_points(mut self, max_points: u32) -> Self {
        self.max_points = max_points;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Top level [`ChartEngine`](crate::engine::ChartEngine) configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub feed: FeedConfig,
    pub api: ApiConfig,
    /// Interval between indicator polls for the selected symbol
    pub indicator_poll_interval: Duration,
    /// Capacity of the engine command channel
    pub command_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            api: ApiConfig::default(),
            indicator_poll_interval: Duration::from_secs(60),
            command_buffer_size: 64,
        }
    }
}

impl EngineConfig {
    pub fn with_feed(mut self, feed: FeedConfig) -> Self {
        self.feed = feed;
        self
    }

    pub fn with_api(mut self, api: ApiConfig) -> Self {
        self.api = api;
        self
    }

    pub fn with_indicator_poll_interval(mut self, interval: Duration) -> Self {
        self.indicator_poll_interval = non_zero(interval);
        self
    }

    /// Build a configuration from the environment, falling back to defaults.
    ///
    /// | Variable              | Default                                |
    /// |-----------------------|----------------------------------------|
    /// | `FEED_URL`            | `wss://ws-feed.exchange.coinbase.com`  |
    /// | `API_URL`             | `http://localhost:8000/api`            |
    /// | `EXCHANGE`            | `coinbase`                             |
    /// | `MAX_POINTS`          | `2000`                                 |
    /// | `INDICATOR_POLL_SECS` | `60`                                   |
    /// | `RECONNECT_MAX_SECS`  | `30`                                   |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let parse = |key: &str| lookup(key).and_then(|value| parse_trimmed::<u64>(&value));

        let reconnect = ReconnectPolicy {
            max: parse("RECONNECT_MAX_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.feed.reconnect.max),
            ..defaults.feed.reconnect
        };

        let feed = FeedConfig {
            url: lookup("FEED_URL").unwrap_or(defaults.feed.url),
            reconnect,
            ..defaults.feed
        };

        let api = ApiConfig {
            base_url: lookup("API_URL").unwrap_or(defaults.api.base_url),
            exchange: lookup("EXCHANGE").unwrap_or(defaults.api.exchange),
            max_points: lookup("MAX_POINTS")
                .and_then(|value| parse_trimmed::<u32>(&value))
                .unwrap_or(defaults.api.max_points),
            ..defaults.api
        };

        Self {
            feed,
            api,
            indicator_poll_interval: parse("INDICATOR_POLL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.indicator_poll_interval),
            command_buffer_size: defaults.command_buffer_size,
        }
    }
}

fn parse_trimmed<T: FromStr>(value: &str) -> Option<T> {
    value.trim().parse().ok()
}
