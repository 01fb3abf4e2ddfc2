use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Transport-level failures of the live feed.
///
/// Handled inside the [`TickSource`](crate::feed::TickSource) by reconnecting with backoff, never
/// surfaced to the engine.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum FeedError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },

    #[error("failed to send subscription request: {0}")]
    Subscribe(String),

    #[error("WebSocket transport error: {0}")]
    Transport(String),

    #[error("WebSocket read timeout: no data received for {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("WebSocket closed by peer")]
    ClosedByPeer,
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

/// Malformed or unrecognised inbound data. Dropped and logged, never fatal.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("message has no type")]
    MissingType,

    #[error("unsupported message type: {0}")]
    Unsupported(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("message for product {actual} received on {expected} subscription")]
    UnexpectedProduct { expected: String, actual: String },

    #[error("unknown timeframe: {0}")]
    Timeframe(String),
}

impl From<serde_json::Error> for ParseError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value.to_string())
    }
}

/// Historical candle or indicator fetch failure, surfaced to the rendering boundary as state.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Error)]
pub enum FetchError {
    #[error("invalid request url: {0}")]
    Url(String),

    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("HTTP error: {0}")]
    Status(u16),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl FetchError {
    /// Determine if repeating the same request could succeed (transport failures, 429 & 5xx).
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Request(_) => true,
            FetchError::Status(status) => *status == 429 || *status >= 500,
            FetchError::Url(_) | FetchError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(value: reqwest::Error) -> Self {
        if let Some(status) = value.status() {
            Self::Status(status.as_u16())
        } else if value.is_decode() {
            Self::Decode(value.to_string())
        } else {
            Self::Request(value.to_string())
        }
    }
}

impl From<url::ParseError> for FetchError {
    fn from(value: url::ParseError) -> Self {
        Self::Url(value.to_string())
    }
}

/// Failures talking to a running [`ChartEngine`](crate::engine::ChartEngine).
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum EngineError {
    #[error("chart engine has stopped")]
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_is_retryable() {
        struct TestCase {
            input: FetchError,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: transport failure is retryable
                input: FetchError::Request("connection refused".to_string()),
                expected: true,
            },
            TestCase {
                // TC1: server error is retryable
                input: FetchError::Status(503),
                expected: true,
            },
            TestCase {
                // TC2: rate limit is retryable
                input: FetchError::Status(429),
                expected: true,
            },
            TestCase {
                // TC3: not found is not retryable
                input: FetchError::Status(404),
                expected: false,
            },
            TestCase {
                // TC4: undecodable body is not retryable
                input: FetchError::Decode("expected value at line 1".to_string()),
                expected: false,
            },
            TestCase {
                // TC5: invalid url is not retryable
                input: FetchError::from(url::ParseError::RelativeUrlWithoutBase),
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.is_retryable();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_feed_error_display() {
        assert_eq!(
            FeedError::Timeout(Duration::from_secs(120)).to_string(),
            "WebSocket read timeout: no data received for 120 seconds"
        );
        assert_eq!(FetchError::Status(502).to_string(), "HTTP error: 502");
    }
}
