use crate::command::{Input, USAGE, parse_input};
use candle_feed::{
    config::EngineConfig,
    engine::ChartEngine,
    error::FetchError,
    feed::CoinbaseFeed,
    history::HttpHistoryLoader,
    indicator::{HttpIndicatorSource, IndicatorOverlay},
    model::{Candle, Selection, Symbol, Tick, Timeframe},
    surface::{ChartSurface, LoadState, SeriesMirror},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

mod command;

/// [`ChartSurface`] logging every change on top of a [`SeriesMirror`].
#[derive(Debug, Default)]
struct LogSurface {
    mirror: SeriesMirror,
}

impl ChartSurface for LogSurface {
    fn replace_all(&mut self, candles: &[Candle]) {
        self.mirror.replace_all(candles);
        info!(
            candles = candles.len(),
            first = ?candles.first().and_then(Candle::time),
            last = ?candles.last().and_then(Candle::time),
            "series replaced"
        );
    }

    fn upsert_last(&mut self, candle: &Candle) {
        self.mirror.upsert_last(candle);
        info!(
            time = ?candle.time(),
            open = %candle.open,
            high = %candle.high,
            low = %candle.low,
            close = %candle.close,
            volume = %candle.volume,
            "candle"
        );
    }

    fn set_load_state(&mut self, selection: &Selection, state: &LoadState) {
        self.mirror.set_load_state(selection, state);
        match state {
            LoadState::Failed(error) => {
                warn!(%selection, %error, "history unavailable, type `retry` to reload")
            }
            state => info!(%selection, ?state, "history"),
        }
    }

    fn set_ticker(&mut self, tick: &Tick) {
        self.mirror.set_ticker(tick);
        debug!(
            symbol = %tick.symbol,
            price = %tick.price,
            size = %tick.size,
            side = %tick.side,
            high_24h = ?tick.stats.high_24h,
            low_24h = ?tick.stats.low_24h,
            volume_24h = ?tick.stats.volume_24h,
            "ticker"
        );
    }

    fn set_overlay(&mut self, overlay: &IndicatorOverlay) {
        self.mirror.set_overlay(overlay);

        let aligned = overlay.aligned(self.mirror.candles());
        for line in &overlay.lines {
            if let Some(latest) = line.latest() {
                info!(
                    symbol = %overlay.symbol,
                    indicator = %line.name,
                    value = latest.value,
                    points = line.points.len(),
                    aligned = aligned.line(&line.name).map_or(0, |line| line.points.len()),
                    "indicator"
                );
            }
        }
    }

    fn set_overlay_error(&mut self, symbol: &Symbol, error: &FetchError) {
        warn!(%symbol, %error, "indicators unavailable");
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();

    let config = EngineConfig::from_env();

    // Initial selection configurable via SYMBOL (default: BTC-USD) & TIMEFRAME (default: 5m)
    let symbol = Symbol::new(std::env::var("SYMBOL").unwrap_or_else(|_| "BTC-USD".to_string()));
    let timeframe = std::env::var("TIMEFRAME")
        .ok()
        .and_then(|timeframe| timeframe.parse::<Timeframe>().ok())
        .unwrap_or(Timeframe::M5);

    info!(
        feed = %config.feed.url,
        api = %config.api.base_url,
        exchange = %config.api.exchange,
        "starting candle feed"
    );

    let engine = ChartEngine::new(
        config.clone(),
        CoinbaseFeed::new(config.feed.clone()),
        HttpHistoryLoader::new(config.api.clone()),
        HttpIndicatorSource::new(config.api.clone()),
        LogSurface::default(),
    );
    let (handle, task) = engine.spawn();

    let mut current = Selection::new(symbol, timeframe);
    if let Err(error) = handle.select(current.clone()).await {
        error!(%error, "failed to start chart");
        return;
    }

    info!("{USAGE}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl-C, shutting down");
                break;
            }
            line = lines.next_line(), if stdin_open => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        debug!("stdin closed, Ctrl-C to exit");
                        stdin_open = false;
                        continue;
                    }
                    Err(error) => {
                        warn!(%error, "failed to read stdin, Ctrl-C to exit");
                        stdin_open = false;
                        continue;
                    }
                };

                if line.trim().is_empty() {
                    continue;
                }

                let sent = match parse_input(&line, &current) {
                    Some(Input::Select(selection)) => {
                        current = selection.clone();
                        handle.select(selection).await
                    }
                    Some(Input::Retry) => handle.retry().await,
                    Some(Input::Quit) => break,
                    None => {
                        warn!(input = %line.trim(), "{USAGE}");
                        Ok(())
                    }
                };

                if let Err(error) = sent {
                    error!(%error, "chart engine unavailable");
                    break;
                }
            }
        }
    }

    let _ = handle.shutdown().await;

    match task.await {
        Ok(surface) => info!(
            candles = surface.mirror.candles().len(),
            "chart closed"
        ),
        Err(error) => error!(%error, "chart engine task failed"),
    }
}
