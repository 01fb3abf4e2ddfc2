use crate::{
    error::FetchError,
    indicator::IndicatorOverlay,
    model::{Candle, Selection, Symbol, Tick},
};

/// Load status of the history backing the current selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Ready,
    NoData,
    Failed(FetchError),
}

/// Rendering boundary driven by the [`ChartEngine`](crate::engine::ChartEngine).
///
/// Candle times are seconds since epoch; every `replace_all` series is ascending and unique, and
/// `upsert_last` only ever touches the final entry or appends a later one.
pub trait ChartSurface: Send + 'static {
    fn replace_all(&mut self, candles: &[Candle]);

    fn upsert_last(&mut self, candle: &Candle);

    fn set_load_state(&mut self, _selection: &Selection, _state: &LoadState) {}

    /// Latest ticker, including 24h statistics.
    fn set_ticker(&mut self, _tick: &Tick) {}

    fn set_overlay(&mut self, _overlay: &IndicatorOverlay) {}

    fn set_overlay_error(&mut self, _symbol: &Symbol, _error: &FetchError) {}
}

/// In-memory [`ChartSurface`] mirroring exactly what a chart would display.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesMirror {
    candles: Vec<Candle>,
    load_state: Option<LoadState>,
    ticker: Option<Tick>,
    overlay: Option<IndicatorOverlay>,
}

impl SeriesMirror {
    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn load_state(&self) -> Option<&LoadState> {
        self.load_state.as_ref()
    }

    pub fn ticker(&self) -> Option<&Tick> {
        self.ticker.as_ref()
    }

    pub fn overlay(&self) -> Option<&IndicatorOverlay> {
        self.overlay.as_ref()
    }
}

impl ChartSurface for SeriesMirror {
    fn replace_all(&mut self, candles: &[Candle]) {
        self.candles = candles.to_vec();
    }

    fn upsert_last(&mut self, candle: &Candle) {
        match self.candles.last_mut() {
            Some(last) if last.bucket_start == candle.bucket_start => *last = *candle,
            _ => self.candles.push(*candle),
        }
    }

    fn set_load_state(&mut self, _: &Selection, state: &LoadState) {
        self.load_state = Some(state.clone());
    }

    fn set_ticker(&mut self, tick: &Tick) {
        self.ticker = Some(tick.clone());
    }

    fn set_overlay(&mut self, overlay: &IndicatorOverlay) {
        self.overlay = Some(overlay.clone());
    }
}
