use crate::{
    config::ApiConfig,
    de::{f64_from_value, timestamp_from_value, unwrap_rows},
    error::FetchError,
    model::{Candle, Symbol},
};
use async_trait::async_trait;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use url::Url;

/// Keys of an indicator row holding its timestamp.
const TIME_KEYS: [&str; 2] = ["timestamp", "time"];

/// Price columns the analysis rows repeat alongside the indicators.
const OHLCV_KEYS: [&str; 5] = ["open", "high", "low", "close", "volume"];

fn is_indicator_key(key: &str) -> bool {
    !TIME_KEYS.contains(&key)
        && !OHLCV_KEYS
            .iter()
            .any(|price| price.eq_ignore_ascii_case(key))
}

/// One precomputed indicator row: every present, finite field keyed by name.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IndicatorPoint {
    /// Seconds since epoch.
    pub time: i64,
    pub values: BTreeMap<SmolStr, f64>,
}

#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct LinePoint {
    pub time: i64,
    pub value: f64,
}

/// A named overlay line, ascending by time with unique timestamps.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IndicatorLine {
    pub name: SmolStr,
    pub points: Vec<LinePoint>,
}

impl IndicatorLine {
    pub fn latest(&self) -> Option<&LinePoint> {
        self.points.last()
    }
}

/// Indicator lines for one symbol, ordered by name.
///
/// Lines are independent of the candle Series: points without a matching candle are kept, and
/// [`IndicatorOverlay::aligned`] selects the ones that share a candle timestamp.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IndicatorOverlay {
    pub symbol: Symbol,
    pub lines: Vec<IndicatorLine>,
}

impl IndicatorOverlay {
    /// Build one line per field name from the points carrying that field.
    ///
    /// Lines without any point are omitted. Duplicate timestamps keep the last value.
    pub fn from_points(symbol: Symbol, points: &[IndicatorPoint]) -> Self {
        let lines = points
            .iter()
            .flat_map(|point| {
                point.values.iter().map(|(name, value)| {
                    (
                        name.clone(),
                        LinePoint {
                            time: point.time,
                            value: *value,
                        },
                    )
                })
            })
            .into_group_map()
            .into_iter()
            .sorted_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(name, points)| IndicatorLine {
                name,
                points: sort_dedup_last(points),
            })
            .filter(|line| !line.points.is_empty())
            .collect();

        Self { symbol, lines }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line(&self, name: &str) -> Option<&IndicatorLine> {
        self.lines.iter().find(|line| line.name == name)
    }

    /// Subset of every line whose timestamps exactly equal a candle `bucket_start`.
    ///
    /// `series` must be ascending by `bucket_start`. No interpolation is performed.
    pub fn aligned(&self, series: &[Candle]) -> Self {
        let lines = self
            .lines
            .iter()
            .map(|line| IndicatorLine {
                name: line.name.clone(),
                points: line
                    .points
                    .iter()
                    .filter(|point| {
                        series
                            .binary_search_by_key(&point.time, |candle| candle.bucket_start)
                            .is_ok()
                    })
                    .copied()
                    .collect(),
            })
            .filter(|line| !line.points.is_empty())
            .collect();

        Self {
            symbol: self.symbol.clone(),
            lines,
        }
    }
}

fn sort_dedup_last(points: Vec<LinePoint>) -> Vec<LinePoint> {
    points
        .into_iter()
        .sorted_by_key(|point| point.time)
        .coalesce(|previous, next| {
            if previous.time == next.time {
                Ok(next)
            } else {
                Err((previous, next))
            }
        })
        .collect()
}

/// Parse an indicator response body: a bare array of rows or `{"data": [...]}`.
///
/// Any other shape is treated as empty. Rows without a readable timestamp are dropped, as are
/// `null` and non-numeric fields and the OHLCV columns.
pub fn parse_rows(body: Value) -> Vec<IndicatorPoint> {
    let Some(rows) = unwrap_rows(body, &["data"]) else {
        debug!("indicator response has no rows");
        return Vec::new();
    };

    rows.iter().filter_map(parse_row).collect()
}

fn parse_row(row: &Value) -> Option<IndicatorPoint> {
    let object = row.as_object()?;

    let time = TIME_KEYS
        .iter()
        .find_map(|key| object.get(*key))
        .and_then(timestamp_from_value)?
        .timestamp();

    let values = object
        .iter()
        .filter(|(key, _)| is_indicator_key(key))
        .filter_map(|(key, value)| Some((SmolStr::new(key), f64_from_value(value)?)))
        .collect();

    Some(IndicatorPoint { time, values })
}

/// Source of precomputed indicator rows for a symbol.
#[async_trait]
pub trait IndicatorSource: Send + Sync + 'static {
    async fn poll(&self, symbol: &Symbol) -> Result<Vec<IndicatorPoint>, FetchError>;
}

/// [`IndicatorSource`] querying `GET {base}/coin/{symbol}/analysis`.
#[derive(Debug, Clone)]
pub struct HttpIndicatorSource {
    client: reqwest::Client,
    config: ApiConfig,
}

impl HttpIndicatorSource {
    pub fn new(config: ApiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn analysis_url(&self, symbol: &Symbol) -> Result<Url, FetchError> {
        let mut url = Url::parse(&self.config.base_url)?;

        url.path_segments_mut()
            .map_err(|_| FetchError::Url(format!("cannot be a base: {}", self.config.base_url)))?
            .pop_if_empty()
            .extend(["coin", symbol.as_str(), "analysis"]);

        Ok(url)
    }
}

#[async_trait]
impl IndicatorSource for HttpIndicatorSource {
    async fn poll(&self, symbol: &Symbol) -> Result<Vec<IndicatorPoint>, FetchError> {
        let url = self.analysis_url(symbol)?;
        debug!(%url, "polling indicators");

        let response = self
            .client
            .get(url)
            .timeout(self.config.request_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            warn!(%symbol, status, "indicator poll rejected");
            return Err(FetchError::Status(status));
        }

        let points = parse_rows(response.json::<Value>().await?);
        debug!(%symbol, rows = points.len(), "polled indicators");

        Ok(points)
    }
}
