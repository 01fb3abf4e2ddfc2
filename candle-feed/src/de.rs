use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Naive ISO-8601 layout emitted by some backends without an offset; interpreted as UTC.
const NAIVE_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Parse a timestamp expressed as an RFC 3339 string, a naive ISO-8601 string (UTC), or a
/// number of seconds since epoch.
pub fn timestamp_from_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => timestamp_from_str(raw),
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|seconds| seconds.trunc() as i64))
            .and_then(|seconds| DateTime::from_timestamp(seconds, 0)),
        _ => None,
    }
}

pub fn timestamp_from_str(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    DateTime::parse_from_rfc3339(raw)
        .map(|time| time.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, NAIVE_DATETIME_FORMAT)
                .ok()
                .map(|naive| naive.and_utc())
        })
        .or_else(|| {
            raw.parse::<i64>()
                .ok()
                .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
        })
}

/// Parse a decimal expressed as a JSON string or number. `null` and anything else is `None`.
pub fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(raw) => {
            let raw = raw.trim();
            Decimal::from_str(raw)
                .or_else(|_| Decimal::from_scientific(raw))
                .ok()
        }
        Value::Number(number) => number.as_i64().map(Decimal::from).or_else(|| {
            number
                .as_f64()
                .and_then(|float| Decimal::from_str(&float.to_string()).ok())
        }),
        _ => None,
    }
}

/// Parse a float expressed as a JSON number or numeric string. Non-finite values are `None`.
pub fn f64_from_value(value: &Value) -> Option<f64> {
    let float = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse::<f64>().ok(),
        _ => None,
    };

    float.filter(|float| float.is_finite())
}

/// Extract the row array from a response that is either a bare array or an object wrapping it
/// under one of `keys`. Any other shape yields `None`.
pub fn unwrap_rows(body: Value, keys: &[&str]) -> Option<Vec<Value>> {
    match body {
        Value::Array(rows) => Some(rows),
        Value::Object(mut object) => keys.iter().find_map(|key| match object.remove(*key) {
            Some(Value::Array(rows)) => Some(rows),
            _ => None,
        }),
        _ => None,
    }
}
