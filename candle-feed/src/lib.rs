#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms
)]
#![allow(clippy::type_complexity, clippy::too_many_arguments)]

//! # Candle Feed
//! Live OHLCV candle engine for market-data charts.
//!
//! The engine consumes a ticker stream for one symbol, buckets it into candles at a selectable
//! [`Timeframe`](model::Timeframe), and reconciles those live candles with a historical series
//! fetched over HTTP, so a chart always receives one ordered, gap-free series.
//!
//! ## Components
//! * [`TickSource`](feed::TickSource): reconnecting websocket subscription emitting normalised
//!   [`Tick`](model::Tick)s.
//! * [`CandleAggregator`](aggregator::CandleAggregator): pure bucketing state machine.
//! * [`HistoryLoader`](history::HistoryLoader): bounded historical candle fetch.
//! * [`SeriesReconciler`](reconciler::SeriesReconciler): the authoritative series, protected by
//!   generation tags.
//! * [`IndicatorOverlay`](indicator::IndicatorOverlay): precomputed indicator rows turned into
//!   named overlay lines.
//! * [`ChartEngine`](engine::ChartEngine): the event loop that owns all of the above and drives a
//!   [`ChartSurface`](surface::ChartSurface).
//!
//! ## Example
//! ```rust,no_run
//! use candle_feed::{
//!     config::EngineConfig,
//!     engine::ChartEngine,
//!     feed::CoinbaseFeed,
//!     history::HttpHistoryLoader,
//!     indicator::HttpIndicatorSource,
//!     model::{Selection, Symbol, Timeframe},
//!     surface::SeriesMirror,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = EngineConfig::from_env();
//!
//!     let engine = ChartEngine::new(
//!         config.clone(),
//!         CoinbaseFeed::new(config.feed.clone()),
//!         HttpHistoryLoader::new(config.api.clone()),
//!         HttpIndicatorSource::new(config.api.clone()),
//!         SeriesMirror::default(),
//!     );
//!
//!     let (handle, task) = engine.spawn();
//!     handle
//!         .select(Selection::new(Symbol::new("btc"), Timeframe::M5))
//!         .await
//!         .unwrap();
//!
//!     handle.shutdown().await.unwrap();
//!     task.await.unwrap();
//! }
//! ```

/// OHLCV bucketing of a [`Tick`](model::Tick) stream for one (symbol, timeframe).
pub mod aggregator;

/// Engine, feed & API configuration with environment overrides.
pub mod config;

/// Lenient deserialisation helpers shared by the HTTP loaders.
pub mod de;

/// Event loop wiring the feed, aggregator, history loader, reconciler and overlay together.
pub mod engine;

/// All errors generated in `candle-feed`.
pub mod error;

/// Live ticker subscription with a documented connection state machine.
pub mod feed;

/// Historical candle fetching and normalisation.
pub mod history;

/// Indicator polling and overlay line construction.
pub mod indicator;

/// Core data model.
pub mod model;

/// Authoritative series ownership and generation-tagged reconciliation.
pub mod reconciler;

/// Rendering boundary contract.
pub mod surface;
