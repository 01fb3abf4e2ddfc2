//! Single owner event loop driving one chart.
//!
//! The [`ChartEngine`] owns the [`SeriesReconciler`], the active [`Session`] (tick subscription,
//! aggregator and in-flight history fetch) and the [`ChartSurface`]. Network I/O runs in spawned
//! tasks that report back over channels; every history result is tagged with the [`Generation`]
//! it was requested for, so a newer selection always wins.

use crate::{
    aggregator::{CandleAggregator, CandleEvent},
    config::{EngineConfig, non_zero},
    error::{EngineError, FetchError},
    feed::{FeedSubscription, TickFeed},
    history::{HistoryLoader, HistoryOutcome, HistoryWindow},
    indicator::{IndicatorOverlay, IndicatorPoint, IndicatorSource},
    model::{Candle, Generation, Selection, Symbol, Tick},
    reconciler::SeriesReconciler,
    surface::{ChartSurface, LoadState},
};
use chrono::Utc;
use std::{fmt::Debug, sync::Arc};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

/// Instruction sent to a running [`ChartEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// Show a new (symbol, timeframe), tearing down the current one.
    Select(Selection),
    /// Re-run the current selection, eg/ after a failed history load.
    Retry,
    Shutdown,
}

/// Cloneable handle used to command a spawned [`ChartEngine`].
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub fn new(tx: mpsc::Sender<EngineCommand>) -> Self {
        Self { tx }
    }

    pub async fn select(&self, selection: Selection) -> Result<(), EngineError> {
        self.send(EngineCommand::Select(selection)).await
    }

    pub async fn retry(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Retry).await
    }

    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Shutdown).await
    }

    pub async fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| EngineError::Stopped)
    }
}

/// Everything belonging to one selection. Dropping it closes the tick subscription and aborts the
/// in-flight history fetch.
struct Session<Sub: FeedSubscription> {
    generation: Generation,
    selection: Selection,
    aggregator: CandleAggregator,
    ticks: mpsc::Receiver<Tick>,
    subscription: Sub,
    history_task: JoinHandle<()>,
}

impl<Sub: FeedSubscription> Drop for Session<Sub> {
    fn drop(&mut self) {
        self.subscription.close();
        self.history_task.abort();
        debug!(selection = %self.selection, generation = %self.generation, "session torn down");
    }
}

/// History fetch result tagged with the generation it was requested for.
#[derive(Debug)]
struct HistoryResult {
    generation: Generation,
    selection: Selection,
    result: Result<HistoryOutcome, FetchError>,
}

#[derive(Debug)]
struct IndicatorResult {
    symbol: Symbol,
    result: Result<Vec<IndicatorPoint>, FetchError>,
}

/// Live chart engine for one (symbol, timeframe) selection at a time.
pub struct ChartEngine<F, H, I, S>
where
    F: TickFeed,
{
    config: EngineConfig,
    feed: F,
    history: Arc<H>,
    indicators: Arc<I>,
    surface: S,
    reconciler: SeriesReconciler,
    selection: Option<Selection>,
    session: Option<Session<F::Subscription>>,
    history_tx: mpsc::Sender<HistoryResult>,
    history_rx: mpsc::Receiver<HistoryResult>,
    indicator_tx: mpsc::Sender<IndicatorResult>,
    indicator_rx: mpsc::Receiver<IndicatorResult>,
    indicator_task: Option<JoinHandle<()>>,
}

impl<F, H, I, S> Debug for ChartEngine<F, H, I, S>
where
    F: TickFeed,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChartEngine")
            .field("config", &self.config)
            .field("selection", &self.selection)
            .field("generation", &self.reconciler.generation())
            .field("series_len", &self.reconciler.series().len())
            .finish_non_exhaustive()
    }
}

impl<F, H, I, S> ChartEngine<F, H, I, S>
where
    F: TickFeed,
    H: HistoryLoader,
    I: IndicatorSource,
    S: ChartSurface,
{
    pub fn new(config: EngineConfig, feed: F, history: H, indicators: I, surface: S) -> Self {
        let (history_tx, history_rx) = mpsc::channel(config.command_buffer_size.max(1));
        let (indicator_tx, indicator_rx) = mpsc::channel(config.command_buffer_size.max(1));

        Self {
            config,
            feed,
            history: Arc::new(history),
            indicators: Arc::new(indicators),
            surface,
            reconciler: SeriesReconciler::default(),
            selection: None,
            session: None,
            history_tx,
            history_rx,
            indicator_tx,
            indicator_rx,
            indicator_task: None,
        }
    }

    /// Run the engine on a new task, returning the command handle and the task, which resolves to
    /// the surface once the engine stops.
    pub fn spawn(self) -> (EngineHandle, JoinHandle<S>) {
        let (tx, rx) = mpsc::channel(self.config.command_buffer_size.max(1));
        let task = tokio::spawn(self.run(rx));
        (EngineHandle::new(tx), task)
    }

    /// Drive the engine until [`EngineCommand::Shutdown`] or every command sender is dropped.
    pub async fn run(mut self, mut commands: mpsc::Receiver<EngineCommand>) -> S {
        let mut indicator_poll =
            tokio::time::interval(non_zero(self.config.indicator_poll_interval));
        indicator_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("chart engine running");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(EngineCommand::Select(selection)) => self.select(selection),
                    Some(EngineCommand::Retry) => self.retry(),
                    Some(EngineCommand::Shutdown) | None => break,
                },
                Some(result) = self.history_rx.recv() => self.on_history(result),
                Some(result) = self.indicator_rx.recv() => self.on_indicators(result),
                tick = next_tick(&mut self.session) => self.on_tick(tick),
                _ = indicator_poll.tick() => self.poll_indicators(false),
            }
        }

        self.teardown();
        info!("chart engine stopped");

        self.surface
    }

    fn select(&mut self, selection: Selection) {
        let symbol_changed = self
            .selection
            .as_ref()
            .is_none_or(|current| current.symbol != selection.symbol);

        self.start(selection);

        if symbol_changed {
            if let Some(selection) = &self.selection {
                self.surface
                    .set_overlay(&IndicatorOverlay::from_points(selection.symbol.clone(), &[]));
            }
            self.poll_indicators(true);
        }
    }

    fn retry(&mut self) {
        match self.selection.clone() {
            Some(selection) => {
                info!(%selection, "retrying selection");
                self.start(selection);
                self.poll_indicators(true);
            }
            None => debug!("retry ignored, nothing selected"),
        }
    }

    /// Tear down the current session and start a fresh one for `selection`.
    fn start(&mut self, selection: Selection) {
        // Close the old subscription & abort its fetch before anything of the new generation exists
        self.session = None;

        let generation = self.reconciler.begin_generation();
        info!(%selection, %generation, "starting selection");

        self.surface.replace_all(self.reconciler.series());
        self.surface.set_load_state(&selection, &LoadState::Loading);

        let (tick_tx, ticks) = mpsc::channel(self.config.feed.channel_buffer_size.max(1));
        let subscription = self.feed.subscribe(&selection.symbol, tick_tx);
        let history_task = self.spawn_history(generation, selection.clone());

        self.session = Some(Session {
            generation,
            selection: selection.clone(),
            aggregator: CandleAggregator::new(selection.symbol.clone(), selection.timeframe),
            ticks,
            subscription,
            history_task,
        });
        self.selection = Some(selection);
    }

    fn spawn_history(&self, generation: Generation, selection: Selection) -> JoinHandle<()> {
        let history = Arc::clone(&self.history);
        let tx = self.history_tx.clone();
        let window = HistoryWindow::lookback(selection.timeframe, Utc::now());

        tokio::spawn(async move {
            let result = history
                .load(&selection.symbol, selection.timeframe, window)
                .await;

            let _ = tx
                .send(HistoryResult {
                    generation,
                    selection,
                    result,
                })
                .await;
        })
    }

    fn on_history(&mut self, result: HistoryResult) {
        let HistoryResult {
            generation,
            selection,
            result,
        } = result;

        if generation != self.reconciler.generation() {
            debug!(
                %selection,
                %generation,
                current = %self.reconciler.generation(),
                "discarding stale history result"
            );
            return;
        }

        match result {
            Ok(HistoryOutcome::Loaded(candles)) => {
                // Everything in the Series before the reset was built live in this generation
                let live = self.reconciler.series().to_vec();

                match self.reconciler.reset(generation, candles) {
                    Ok(update) => update.render(&mut self.surface),
                    Err(ignored) => {
                        debug!(%selection, %ignored, "history result ignored");
                        return;
                    }
                }
                self.surface.set_load_state(&selection, &LoadState::Ready);
                self.replay_live_candles(generation, live);
            }
            Ok(HistoryOutcome::NoData) => {
                info!(%selection, "no history available");
                self.surface.set_load_state(&selection, &LoadState::NoData);
            }
            Err(error) => {
                warn!(%selection, %error, retryable = error.is_retryable(), "history load failed");
                self.surface
                    .set_load_state(&selection, &LoadState::Failed(error));
            }
        }
    }

    /// Re-apply the candles built live while history was loading, in order, so buckets newer
    /// than the history's last bucket are not lost.
    fn replay_live_candles(&mut self, generation: Generation, live: Vec<Candle>) {
        let history_last = self
            .reconciler
            .series()
            .last()
            .map(|candle| candle.bucket_start);

        let newer = live
            .into_iter()
            .filter(|candle| history_last.is_none_or(|last| candle.bucket_start > last));

        for candle in newer {
            match self
                .reconciler
                .on_aggregator_event(generation, CandleEvent::Opened(candle))
            {
                Ok(update) => update.render(&mut self.surface),
                Err(ignored) => debug!(%ignored, "live candle already covered by history"),
            }
        }
    }

    fn on_tick(&mut self, tick: Tick) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        self.surface.set_ticker(&tick);

        let Some(event) = session.aggregator.apply(&tick) else {
            return;
        };

        match self.reconciler.on_aggregator_event(session.generation, event) {
            Ok(update) => update.render(&mut self.surface),
            Err(ignored) => debug!(%ignored, "live candle ignored"),
        }
    }

    /// Poll indicators for the selected symbol. Unless `force`d, a poll still in flight is left
    /// to finish instead of starting another one.
    fn poll_indicators(&mut self, force: bool) {
        let Some(symbol) = self.selection.as_ref().map(|selection| selection.symbol.clone()) else {
            return;
        };

        if let Some(task) = self.indicator_task.take() {
            if !task.is_finished() {
                if force {
                    task.abort();
                } else {
                    debug!(%symbol, "indicator poll already in flight");
                    self.indicator_task = Some(task);
                    return;
                }
            }
        }

        let indicators = Arc::clone(&self.indicators);
        let tx = self.indicator_tx.clone();

        self.indicator_task = Some(tokio::spawn(async move {
            let result = indicators.poll(&symbol).await;
            let _ = tx.send(IndicatorResult { symbol, result }).await;
        }));
    }

    fn on_indicators(&mut self, result: IndicatorResult) {
        let IndicatorResult { symbol, result } = result;

        if self
            .selection
            .as_ref()
            .is_none_or(|selection| selection.symbol != symbol)
        {
            debug!(%symbol, "discarding indicators for a deselected symbol");
            return;
        }

        match result {
            Ok(points) => {
                let overlay = IndicatorOverlay::from_points(symbol, &points);
                debug!(symbol = %overlay.symbol, lines = overlay.lines.len(), "indicator overlay updated");
                self.surface.set_overlay(&overlay);
            }
            Err(error) => {
                warn!(%symbol, %error, "indicator poll failed");
                self.surface.set_overlay_error(&symbol, &error);
            }
        }
    }

    fn teardown(&mut self) {
        self.session = None;
        if let Some(task) = self.indicator_task.take() {
            task.abort();
        }
    }
}

/// Next tick of the active session; pends forever without a session or once its feed has gone.
async fn next_tick<Sub: FeedSubscription>(session: &mut Option<Session<Sub>>) -> Tick {
    if let Some(session) = session.as_mut() {
        if let Some(tick) = session.ticks.recv().await {
            return tick;
        }
    }

    std::future::pending().await
}
