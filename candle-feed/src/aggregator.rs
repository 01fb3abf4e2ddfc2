//! Tick to candle aggregation.
//!
//! Buckets live ticks into OHLCV candles using tick timestamps (not wall clock) for bucket
//! boundaries. Once a later bucket opens, the previous candle is final and is never reopened.

use crate::model::{Candle, Symbol, Tick, Timeframe};
use tracing::debug;

/// Change to the in-progress candle produced by one [`Tick`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CandleEvent {
    /// A new bucket started; any previously open candle is now closed.
    Opened(Candle),
    /// The open bucket absorbed another tick.
    Updated(Candle),
}

impl CandleEvent {
    pub fn candle(&self) -> &Candle {
        match self {
            CandleEvent::Opened(candle) | CandleEvent::Updated(candle) => candle,
        }
    }
}

/// Aggregates ticks of one symbol into candles of one [`Timeframe`].
///
/// Changing timeframe or symbol requires a fresh aggregator.
#[derive(Debug, Clone)]
pub struct CandleAggregator {
    symbol: Symbol,
    timeframe: Timeframe,
    current: Option<Candle>,
    last_closed: Option<Candle>,
}

impl CandleAggregator {
    pub fn new(symbol: Symbol, timeframe: Timeframe) -> Self {
        Self {
            symbol,
            timeframe,
            current: None,
            last_closed: None,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// The in-progress candle, if any tick has been applied.
    pub fn current(&self) -> Option<&Candle> {
        self.current.as_ref()
    }

    /// The most recently finalised candle.
    pub fn last_closed(&self) -> Option<&Candle> {
        self.last_closed.as_ref()
    }

    /// Fold a [`Tick`] into the open bucket.
    ///
    /// Returns `None` for ticks of another symbol and for late ticks belonging to a bucket that
    /// has already closed.
    pub fn apply(&mut self, tick: &Tick) -> Option<CandleEvent> {
        if tick.symbol != self.symbol {
            debug!(
                expected = %self.symbol,
                actual = %tick.symbol,
                "dropping tick for another symbol"
            );
            return None;
        }

        let bucket_start = self.timeframe.bucket_start(tick.time.timestamp());

        match self.current.as_mut() {
            Some(candle) if bucket_start == candle.bucket_start => {
                candle.absorb(tick.price, tick.size);
                return Some(CandleEvent::Updated(*candle));
            }
            Some(candle) if bucket_start < candle.bucket_start => {
                debug!(
                    symbol = %self.symbol,
                    timeframe = %self.timeframe,
                    tick_bucket = bucket_start,
                    open_bucket = candle.bucket_start,
                    "dropping late tick for a closed bucket"
                );
                return None;
            }
            _ => {}
        }

        let opened = Candle::open_at(bucket_start, tick.price, tick.size);
        if let Some(closed) = self.current.replace(opened) {
            self.last_closed = Some(closed);
        }

        Some(CandleEvent::Opened(opened))
    }
}
