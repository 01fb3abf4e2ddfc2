use crate::error::ParseError;
use chrono::{DateTime, Utc};
use derive_more::{Constructor, Display};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::str::FromStr;

/// Normalised product identifier, eg/ "BTC-USD".
///
/// Normalisation upper-cases the input, replaces `/` with `-`, and quotes a bare asset in USD.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, Display)]
pub struct Symbol(SmolStr);

impl Symbol {
    pub fn new(raw: impl AsRef<str>) -> Self {
        let normalised = raw.as_ref().trim().to_uppercase().replace('/', "-");

        if normalised.contains('-') {
            Self(SmolStr::new(normalised))
        } else {
            Self(SmolStr::new(format!("{normalised}-USD")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Product id used on the live ticker feed, which only lists USD books.
    pub fn feed_product_id(&self) -> SmolStr {
        match self.0.strip_suffix("-USDT") {
            Some(base) => SmolStr::new(format!("{base}-USD")),
            None => self.0.clone(),
        }
    }
}

impl From<&str> for Symbol {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Aggressor side of a trade.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Deserialize, Serialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[display("buy")]
    Buy,
    #[display("sell")]
    Sell,
}

impl FromStr for Side {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" | "Buy" | "BUY" => Ok(Side::Buy),
            "sell" | "Sell" | "SELL" => Ok(Side::Sell),
            other => Err(ParseError::InvalidField {
                field: "side",
                value: other.to_string(),
            }),
        }
    }
}

/// Rolling 24h statistics carried alongside each ticker update.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DailyStats {
    pub high_24h: Option<Decimal>,
    pub low_24h: Option<Decimal>,
    pub volume_24h: Option<Decimal>,
}

/// Normalised trade/price update from the live feed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Tick {
    pub symbol: Symbol,
    pub price: Decimal,
    pub size: Decimal,
    pub side: Side,
    pub time: DateTime<Utc>,
    pub stats: DailyStats,
}

impl Tick {
    pub fn new(symbol: Symbol, price: Decimal, size: Decimal, side: Side, time: DateTime<Utc>) -> Self {
        Self {
            symbol,
            price,
            size,
            side,
            time,
            stats: DailyStats::default(),
        }
    }

    pub fn with_stats(self, stats: DailyStats) -> Self {
        Self { stats, ..self }
    }
}

/// Chart timeframe, each mapping to a fixed bucket duration.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 6] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    /// Bucket duration in seconds.
    pub fn seconds(self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 5 * 60,
            Timeframe::M15 => 15 * 60,
            Timeframe::H1 => 60 * 60,
            Timeframe::H4 => 4 * 60 * 60,
            Timeframe::D1 => 24 * 60 * 60,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// Aligned start of the bucket containing `timestamp` (seconds since epoch).
    ///
    /// Floors towards negative infinity so pre-epoch timestamps still align.
    pub fn bucket_start(self, timestamp: i64) -> i64 {
        timestamp.div_euclid(self.seconds()) * self.seconds()
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Timeframe {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .into_iter()
            .find(|timeframe| timeframe.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseError::Timeframe(s.to_string()))
    }
}

/// OHLCV summary of every tick inside one bucket.
///
/// `bucket_start` is expressed in seconds since epoch, as the rendering boundary expects.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize, Constructor)]
pub struct Candle {
    #[serde(rename = "time")]
    pub bucket_start: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Start a fresh bucket from its first trade.
    pub fn open_at(bucket_start: i64, price: Decimal, size: Decimal) -> Self {
        Self {
            bucket_start,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: size,
        }
    }

    /// Fold another trade of the same bucket into this candle.
    pub fn absorb(&mut self, price: Decimal, size: Decimal) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += size;
    }

    /// `low <= open, close <= high`, positive prices and non-negative volume.
    pub fn is_valid(&self) -> bool {
        self.low > Decimal::ZERO
            && self.low <= self.open
            && self.open <= self.high
            && self.low <= self.close
            && self.close <= self.high
            && self.volume >= Decimal::ZERO
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.bucket_start, 0)
    }
}

/// Sort candles by `bucket_start` and keep the last occurrence of every duplicated bucket.
pub fn into_series(candles: impl IntoIterator<Item = Candle>) -> Vec<Candle> {
    let mut candles = candles.into_iter().collect::<Vec<_>>();

    // Stable sort keeps later duplicates after earlier ones
    candles.sort_by_key(|candle| candle.bucket_start);

    let mut series: Vec<Candle> = Vec::with_capacity(candles.len());
    for candle in candles {
        match series.last_mut() {
            Some(last) if last.bucket_start == candle.bucket_start => *last = candle,
            _ => series.push(candle),
        }
    }

    series
}

/// The (symbol, timeframe) pair a chart is currently showing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize, Constructor, Display)]
#[display("{symbol}@{timeframe}")]
pub struct Selection {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
}

/// Monotonically increasing tag identifying the data belonging to one selection.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, Display,
)]
pub struct Generation(pub u64);

impl Generation {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}
