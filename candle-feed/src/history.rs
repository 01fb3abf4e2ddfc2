use crate::{
    config::ApiConfig,
    de::{decimal_from_value, timestamp_from_value, unwrap_rows},
    error::FetchError,
    model::{Candle, Symbol, Timeframe, into_series},
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

/// Keys under which a wrapped history response may carry its rows.
const ROW_KEYS: [&str; 2] = ["candles", "data"];

/// How far back a history load reaches for each [`Timeframe`].
pub fn lookback(timeframe: Timeframe) -> TimeDelta {
    match timeframe {
        Timeframe::M1 => TimeDelta::hours(24),
        Timeframe::M5 => TimeDelta::hours(48),
        Timeframe::M15 => TimeDelta::hours(72),
        Timeframe::H1 => TimeDelta::days(7),
        Timeframe::H4 => TimeDelta::days(30),
        Timeframe::D1 => TimeDelta::days(90),
    }
}

/// Bounded `[start, end]` time range requested from the history backend.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HistoryWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl HistoryWindow {
    /// Window ending at `end` and reaching back the [`lookback`] of `timeframe`.
    pub fn lookback(timeframe: Timeframe, end: DateTime<Utc>) -> Self {
        Self {
            start: end - lookback(timeframe),
            end,
        }
    }
}

/// Result of a successful history load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryOutcome {
    /// Closed candles, ascending by `bucket_start` and unique.
    Loaded(Vec<Candle>),
    /// The backend has nothing for the window.
    NoData,
}

impl HistoryOutcome {
    pub fn from_candles(candles: Vec<Candle>) -> Self {
        if candles.is_empty() {
            Self::NoData
        } else {
            Self::Loaded(candles)
        }
    }
}

/// Fetches the historical candle series for a (symbol, timeframe) window.
#[async_trait]
pub trait HistoryLoader: Send + Sync + 'static {
    async fn load(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        window: HistoryWindow,
    ) -> Result<HistoryOutcome, FetchError>;
}

/// [`HistoryLoader`] querying `GET {base}/market/candles/{exchange}/{symbol}`.
#[derive(Debug, Clone)]
pub struct HttpHistoryLoader {
    client: reqwest::Client,
    config: ApiConfig,
}

impl HttpHistoryLoader {
    pub fn new(config: ApiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Build the candles endpoint for `symbol`, percent-encoding every path segment.
    pub fn candles_url(&self, symbol: &Symbol) -> Result<Url, FetchError> {
        let mut url = Url::parse(&self.config.base_url)?;

        url.path_segments_mut()
            .map_err(|_| FetchError::Url(format!("cannot be a base: {}", self.config.base_url)))?
            .pop_if_empty()
            .extend(["market", "candles", self.config.exchange.as_str(), symbol.as_str()]);

        Ok(url)
    }
}

#[async_trait]
impl HistoryLoader for HttpHistoryLoader {
    async fn load(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
        window: HistoryWindow,
    ) -> Result<HistoryOutcome, FetchError> {
        let url = self.candles_url(symbol)?;
        debug!(%url, %timeframe, start = %window.start, end = %window.end, "fetching candle history");

        let response = self
            .client
            .get(url)
            .query(&[
                ("start", window.start.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ("end", window.end.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ("timeframe", timeframe.label().to_string()),
                ("max_points", self.config.max_points.to_string()),
            ])
            .timeout(self.config.request_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let body = response.json::<Value>().await?;
        let rows = unwrap_rows(body, &ROW_KEYS)
            .ok_or_else(|| FetchError::Decode("expected an array of candles".to_string()))?;

        let outcome = HistoryOutcome::from_candles(normalise(rows, timeframe));
        match &outcome {
            HistoryOutcome::Loaded(candles) => {
                info!(%symbol, %timeframe, candles = candles.len(), "loaded candle history")
            }
            HistoryOutcome::NoData => info!(%symbol, %timeframe, "no candle history available"),
        }

        Ok(outcome)
    }
}

/// Turn raw history rows into a Series for `timeframe`.
///
/// Rows with an unreadable timestamp or price, or violating the OHLC invariant, are dropped. The
/// remainder is aligned to bucket boundaries, sorted ascending and deduplicated keeping the last
/// occurrence of each bucket.
pub fn normalise(rows: Vec<Value>, timeframe: Timeframe) -> Vec<Candle> {
    let total = rows.len();

    let candles = rows
        .iter()
        .filter_map(|row| parse_row(row, timeframe))
        .filter(Candle::is_valid)
        .collect::<Vec<_>>();

    if candles.len() < total {
        warn!(
            %timeframe,
            dropped = total - candles.len(),
            total,
            "dropped invalid history rows"
        );
    }

    into_series(candles)
}

fn parse_row(row: &Value, timeframe: Timeframe) -> Option<Candle> {
    let time = row
        .get("timestamp")
        .or_else(|| row.get("time"))
        .and_then(timestamp_from_value)?;

    let field = |key: &str| row.get(key).and_then(decimal_from_value);

    Some(Candle::new(
        timeframe.bucket_start(time.timestamp()),
        field("open")?,
        field("high")?,
        field("low")?,
        field("close")?,
        field("volume").unwrap_or(Decimal::ZERO),
    ))
}
