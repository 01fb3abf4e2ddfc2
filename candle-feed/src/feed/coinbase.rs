use crate::{
    error::ParseError,
    model::{DailyStats, Side, Symbol, Tick},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;
use std::str::FromStr;

/// Coinbase ticker channel name.
pub const TICKER_CHANNEL: &str = "ticker";

/// Subscription request sent once per connection after it opens.
///
/// ### Raw Payload Example
/// ```json
/// {"type":"subscribe","product_ids":["BTC-USD"],"channels":["ticker"]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeRequest<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub product_ids: [&'a str; 1],
    pub channels: [&'static str; 1],
}

impl<'a> SubscribeRequest<'a> {
    pub fn ticker(product_id: &'a str) -> Self {
        Self {
            kind: "subscribe",
            product_ids: [product_id],
            channels: [TICKER_CHANNEL],
        }
    }

    pub fn to_json(&self) -> String {
        // Serialising a struct of string slices cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// ### Raw Payload Example
/// See docs: <https://docs.cdp.coinbase.com/exchange/docs/websocket-channels#ticker-channel>
/// ```json
/// {
///     "type": "ticker",
///     "sequence": 37475248783,
///     "product_id": "ETH-USD",
///     "price": "1285.22",
///     "open_24h": "1310.79",
///     "volume_24h": "245532.79269678",
///     "low_24h": "1280.52",
///     "high_24h": "1313.8",
///     "side": "buy",
///     "time": "2022-10-19T23:28:22.061769Z",
///     "trade_id": 370843401,
///     "last_size": "11.4396987"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct CoinbaseTicker {
    #[serde(default)]
    product_id: Option<SmolStr>,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    last_size: Option<String>,
    #[serde(default)]
    side: Option<String>,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    high_24h: Option<String>,
    #[serde(default)]
    low_24h: Option<String>,
    #[serde(default)]
    volume_24h: Option<String>,
}

/// Inbound message received on a Coinbase ticker subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoinbaseEvent {
    Tick(Tick),
    Subscriptions,
    Error(String),
}

/// Parse a raw text frame received on the subscription for `product_id`.
///
/// Only `ticker` messages produce a [`Tick`]; all numeric fields arrive as strings. A missing or
/// unparsable `time` falls back to `received`.
pub fn parse_message(
    text: &str,
    product_id: &str,
    symbol: &Symbol,
    received: DateTime<Utc>,
) -> Result<CoinbaseEvent, ParseError> {
    let value = serde_json::from_str::<Value>(text)?;
    let kind = value.get("type").and_then(Value::as_str).map(SmolStr::new);

    match kind.as_deref() {
        Some(TICKER_CHANNEL) => {
            let ticker = serde_json::from_value::<CoinbaseTicker>(value)?;
            ticker
                .into_tick(product_id, symbol, received)
                .map(CoinbaseEvent::Tick)
        }
        Some("subscriptions") => Ok(CoinbaseEvent::Subscriptions),
        Some("error") => {
            let message = value
                .get("reason")
                .or_else(|| value.get("message"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(CoinbaseEvent::Error(message))
        }
        Some(other) => Err(ParseError::Unsupported(other.to_string())),
        None => Err(ParseError::MissingType),
    }
}

impl CoinbaseTicker {
    fn into_tick(
        self,
        product_id: &str,
        symbol: &Symbol,
        received: DateTime<Utc>,
    ) -> Result<Tick, ParseError> {
        if let Some(actual) = self.product_id.filter(|actual| actual != product_id) {
            return Err(ParseError::UnexpectedProduct {
                expected: product_id.to_string(),
                actual: actual.to_string(),
            });
        }

        let price = self
            .price
            .as_deref()
            .ok_or(ParseError::MissingField("price"))
            .and_then(|price| parse_decimal("price", price))?;

        if price <= Decimal::ZERO {
            return Err(ParseError::InvalidField {
                field: "price",
                value: price.to_string(),
            });
        }

        let size = match self.last_size.as_deref() {
            Some(size) => parse_decimal("last_size", size)?,
            None => Decimal::ZERO,
        };

        let side = self
            .side
            .as_deref()
            .ok_or(ParseError::MissingField("side"))
            .and_then(Side::from_str)?;

        let time = self
            .time
            .as_deref()
            .and_then(|time| DateTime::parse_from_rfc3339(time).ok())
            .map(|time| time.with_timezone(&Utc))
            .unwrap_or(received);

        let stats = DailyStats {
            high_24h: self.high_24h.as_deref().and_then(|value| parse_decimal("high_24h", value).ok()),
            low_24h: self.low_24h.as_deref().and_then(|value| parse_decimal("low_24h", value).ok()),
            volume_24h: self
                .volume_24h
                .as_deref()
                .and_then(|value| parse_decimal("volume_24h", value).ok()),
        };

        Ok(Tick::new(symbol.clone(), price, size, side, time).with_stats(stats))
    }
}

fn parse_decimal(field: &'static str, value: &str) -> Result<Decimal, ParseError> {
    Decimal::from_str(value.trim())
        .or_else(|_| Decimal::from_scientific(value.trim()))
        .map_err(|_| ParseError::InvalidField {
            field,
            value: value.to_string(),
        })
}
